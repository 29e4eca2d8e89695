use serde::{Deserialize, Serialize};

use crate::indicators::{calculate_adx, calculate_sma};
use crate::models::{Candle, Signal};
use crate::strategy::Strategy;
use crate::Result;

/// Trend-following entry signals
///
/// Rides established trends: a moving-average cross aligned with the last
/// close, filtered by ADX so entries only fire when the trend has strength.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TrendFollowingParams {
    pub fast_ma_period: usize,
    pub slow_ma_period: usize,
    pub adx_period: usize,
    /// Signals are suppressed below this ADX
    pub min_adx: f64,
}

impl Default for TrendFollowingParams {
    fn default() -> Self {
        Self {
            fast_ma_period: 10,
            slow_ma_period: 30,
            adx_period: 14,
            min_adx: 22.0,
        }
    }
}

impl TrendFollowingParams {
    pub fn validate(&self, name: &str) -> anyhow::Result<()> {
        if self.fast_ma_period == 0 || self.slow_ma_period == 0 {
            anyhow::bail!("strategy '{}': MA periods must be positive", name);
        }
        if self.fast_ma_period >= self.slow_ma_period {
            anyhow::bail!("strategy '{}': fast MA must be shorter than slow MA", name);
        }
        if self.min_adx < 0.0 {
            anyhow::bail!("strategy '{}': min_adx must not be negative", name);
        }
        Ok(())
    }
}

pub struct TrendFollowingStrategy {
    name: String,
    params: TrendFollowingParams,
}

impl TrendFollowingStrategy {
    pub fn new(name: String, params: TrendFollowingParams) -> Self {
        Self { name, params }
    }
}

impl Strategy for TrendFollowingStrategy {
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

        let fast = calculate_sma(&prices, self.params.fast_ma_period)
            .ok_or("fast MA calculation failed")?;
        let slow = calculate_sma(&prices, self.params.slow_ma_period)
            .ok_or("slow MA calculation failed")?;
        let (adx, plus_di, minus_di) = calculate_adx(candles, self.params.adx_period)
            .ok_or("ADX calculation failed")?;

        if adx < self.params.min_adx {
            return Ok(Signal::Hold);
        }

        let close = prices[prices.len() - 1];

        if fast > slow && close > fast && plus_di > minus_di {
            Ok(Signal::Buy)
        } else if fast < slow && close < fast && minus_di > plus_di {
            Ok(Signal::Sell)
        } else {
            Ok(Signal::Hold)
        }
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn min_candles_required(&self) -> usize {
        self.params.slow_ma_period.max(self.params.adx_period + 1) + 5
    }
}
