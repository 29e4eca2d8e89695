use serde::{Deserialize, Serialize};

use crate::models::{Candle, Signal};
use crate::strategy::Strategy;
use crate::Result;

/// Break-and-retest entry signals
///
/// Waits for price to break out of a recent range, pull back to the broken
/// level, and hold it through the confirmation bars. Entering only after the
/// retest filters out most one-bar fakeouts and momentum spikes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BreakoutParams {
    /// Bars defining the range being broken
    pub range_lookback: usize,
    /// Bars after the break that must retest and hold the level (the break
    /// bar itself plus at least one pullback bar)
    pub confirmation_bars: usize,
}

impl Default for BreakoutParams {
    fn default() -> Self {
        Self {
            range_lookback: 30,
            confirmation_bars: 3,
        }
    }
}

impl BreakoutParams {
    pub fn validate(&self, name: &str) -> anyhow::Result<()> {
        if self.range_lookback < 5 {
            anyhow::bail!("strategy '{}': range_lookback must be at least 5", name);
        }
        if self.confirmation_bars < 2 {
            anyhow::bail!(
                "strategy '{}': confirmation_bars needs the break bar plus a retest bar",
                name
            );
        }
        Ok(())
    }
}

pub struct BreakoutStrategy {
    name: String,
    params: BreakoutParams,
}

impl BreakoutStrategy {
    pub fn new(name: String, params: BreakoutParams) -> Self {
        Self { name, params }
    }
}

impl Strategy for BreakoutStrategy {
    fn generate_signal(&self, candles: &[Candle]) -> Result<Signal> {
        if candles.len() < self.min_candles_required() {
            return Err(format!(
                "insufficient data: {} candles, need {}",
                candles.len(),
                self.min_candles_required()
            )
            .into());
        }

        let confirm = self.params.confirmation_bars;
        let range_end = candles.len() - confirm;
        let range_start = range_end - self.params.range_lookback;

        let range = &candles[range_start..range_end];
        let range_high = range.iter().map(|c| c.high).fold(f64::NEG_INFINITY, f64::max);
        let range_low = range.iter().map(|c| c.low).fold(f64::INFINITY, f64::min);

        let confirmation = &candles[range_end..];

        // The break bar itself must show conviction: closed in the break
        // direction with at least the range's typical bar size
        let avg_range = range.iter().map(Candle::range).sum::<f64>() / range.len() as f64;
        let break_bar = &confirmation[0];
        let expanded = break_bar.range() >= avg_range;

        // After the break, price must come back to test the broken level; a
        // run that never pulls back is momentum, not a retest
        let tolerance = avg_range * 0.5;
        let retested_from_above = confirmation[1..]
            .iter()
            .any(|c| c.low <= range_high + tolerance);
        let retested_from_below = confirmation[1..]
            .iter()
            .any(|c| c.high >= range_low - tolerance);

        // Break above the range, retest, and every confirmation close holds
        // the level
        if expanded
            && break_bar.is_bullish()
            && retested_from_above
            && confirmation.iter().all(|c| c.close > range_high)
        {
            return Ok(Signal::Buy);
        }

        if expanded
            && !break_bar.is_bullish()
            && retested_from_below
            && confirmation.iter().all(|c| c.close < range_low)
        {
            return Ok(Signal::Sell);
        }

        Ok(Signal::Hold)
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn min_candles_required(&self) -> usize {
        self.params.range_lookback + self.params.confirmation_bars
    }
}
