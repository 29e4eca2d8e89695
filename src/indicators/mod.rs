// Technical indicators module
// Implements ADX, ATR, moving averages, RSI and market structure analysis

pub mod adx;
pub mod atr;
pub mod moving_average;
pub mod rsi;
pub mod structure;

pub use adx::calculate_adx;
pub use atr::{calculate_atr, calculate_atr_series};
pub use moving_average::{calculate_ema, calculate_sma};
pub use rsi::calculate_rsi;
pub use structure::{
    analyze_market_structure, calculate_average_volume, is_volume_spike, recent_swing_high,
    recent_swing_low, MarketStructure,
};
