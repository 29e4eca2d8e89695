// Trading strategy module
pub mod breakout;
pub mod catalog;
pub mod mean_reversion;
pub mod selector;
pub mod spec;
pub mod trend_following;

pub use catalog::StrategyCatalog;
pub use selector::{select_strategy, SelectionConfig, SelectionWeights};
pub use spec::{
    RegimeWeights, RiskParams, StopLossSpec, StrategyParams, StrategySpec, TakeProfitSpec,
};

use crate::models::{Candle, Signal};
use crate::Result;

/// Base trait for all trading strategies
pub trait Strategy: Send + Sync {
    /// Generate a trading signal based on market data
    fn generate_signal(&self, candles: &[Candle]) -> Result<Signal>;

    /// Get strategy name (the catalog name of the variant, not the kind)
    fn name(&self) -> &str;

    /// Minimum candles required for this strategy
    fn min_candles_required(&self) -> usize;
}
