use serde::{Deserialize, Serialize};

use crate::indicators::{calculate_rsi, calculate_sma};
use crate::models::{Candle, Signal};
use crate::strategy::Strategy;
use crate::Result;

/// Mean-reversion entry signals
///
/// Fades extremes inside a range: buys oversold prints below the mean, sells
/// overbought prints above it. Intended for ranging regimes; the selector's
/// weight table keeps it out of trending markets.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MeanReversionParams {
    pub rsi_period: usize,
    pub rsi_oversold: f64,
    pub rsi_overbought: f64,
    /// Mean the price is expected to revert to
    pub mean_period: usize,
}

impl Default for MeanReversionParams {
    fn default() -> Self {
        Self {
            rsi_period: 14,
            rsi_oversold: 30.0,
            rsi_overbought: 70.0,
            mean_period: 20,
        }
    }
}

impl MeanReversionParams {
    pub fn validate(&self, name: &str) -> anyhow::Result<()> {
        if self.rsi_period == 0 || self.mean_period == 0 {
            anyhow::bail!("strategy '{}': periods must be positive", name);
        }
        if self.rsi_oversold >= self.rsi_overbought {
            anyhow::bail!(
                "strategy '{}': oversold level must be below overbought",
                name
            );
        }
        if !(0.0..=100.0).contains(&self.rsi_oversold)
            || !(0.0..=100.0).contains(&self.rsi_overbought)
        {
            anyhow::bail!("strategy '{}': RSI levels must be within 0-100", name);
        }
        Ok(())
    }
}

pub struct MeanReversionStrategy {
    name: String,
    params: MeanReversionParams,
}

impl MeanReversionStrategy {
    pub fn new(name: String, params: MeanReversionParams) -> Self {
        Self { name, params }
    }
}

impl Strategy for MeanReversionStrategy {
    fn generate_signal(&self, candles: &[Candle]) -> Result<Signal> {
        if candles.len() < self.min_candles_required() {
            return Err(format!(
                "insufficient data: {} candles, need {}",
                candles.len(),
                self.min_candles_required()
            )
            .into());
        }

        let prices: Vec<f64> = candles.iter().map(|c| c.close).collect();

        let rsi = calculate_rsi(&prices, self.params.rsi_period)
            .ok_or("RSI calculation failed")?;
        let mean = calculate_sma(&prices, self.params.mean_period)
            .ok_or("mean calculation failed")?;

        let close = prices[prices.len() - 1];

        if rsi <= self.params.rsi_oversold && close < mean {
            Ok(Signal::Buy)
        } else if rsi >= self.params.rsi_overbought && close > mean {
            Ok(Signal::Sell)
        } else {
            Ok(Signal::Hold)
        }
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn min_candles_required(&self) -> usize {
        self.params.rsi_period.max(self.params.mean_period) + 5
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn candles_from_closes(closes: &[f64]) -> Vec<Candle> {
        closes
            .iter()
            .enumerate()
            .map(|(i, &close)| Candle {
                instrument: "USDJPY".to_string(),
                timestamp: Utc::now() - chrono::Duration::hours((closes.len() - i) as i64),
                open: close + 0.02,
                high: close + 0.08,
                low: close - 0.08,
                close,
                volume: 1000.0,
            })
            .collect()
    }

    #[test]
    fn test_oversold_below_mean_buys() {
        let strategy =
            MeanReversionStrategy::new("mr".to_string(), MeanReversionParams::default());

        // Flat range then a sharp drop to the bottom of it
        let mut closes = vec![150.00; 20];
        for i in 0..10 {
            closes.push(150.00 - (i + 1) as f64 * 0.12);
        }

        let signal = strategy.generate_signal(&candles_from_closes(&closes)).unwrap();
        assert_eq!(signal, Signal::Buy);
    }

    #[test]
    fn test_overbought_above_mean_sells() {
        let strategy =
            MeanReversionStrategy::new("mr".to_string(), MeanReversionParams::default());

        let mut closes = vec![150.00; 20];
        for i in 0..10 {
            closes.push(150.00 + (i + 1) as f64 * 0.12);
        }

        let signal = strategy.generate_signal(&candles_from_closes(&closes)).unwrap();
        assert_eq!(signal, Signal::Sell);
    }

    #[test]
    fn test_neutral_range_holds() {
        let strategy =
            MeanReversionStrategy::new("mr".to_string(), MeanReversionParams::default());
        let closes: Vec<f64> = (0..30)
            .map(|i| 150.00 + if i % 2 == 0 { 0.05 } else { -0.05 })
            .collect();

        let signal = strategy.generate_signal(&candles_from_closes(&closes)).unwrap();
        assert_eq!(signal, Signal::Hold);
    }

    #[test]
    fn test_insufficient_data_errors() {
        let strategy =
            MeanReversionStrategy::new("mr".to_string(), MeanReversionParams::default());
        let result = strategy.generate_signal(&candles_from_closes(&[150.0, 150.1]));
        assert!(result.is_err());
    }

    #[test]
    fn test_levels_must_be_ordered() {
        let params = MeanReversionParams {
            rsi_oversold: 70.0,
            rsi_overbought: 30.0,
            ..Default::default()
        };
        assert!(params.validate("mr").is_err());
    }
}
