use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A tradable instrument (currency pair or synthetic index)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Instrument {
    pub symbol: String,
    /// Smallest quoted price increment (0.0001 for most pairs, 0.01 for JPY pairs)
    pub pip_size: f64,
    /// Account-currency value of one pip for a 1.0 lot position
    pub pip_value_per_lot: f64,
    /// Typical spread for this instrument, in pips (baseline for the spread gate)
    pub avg_spread_pips: f64,
}

impl Instrument {
    /// Convert a raw price distance into pips
    pub fn price_to_pips(&self, distance: f64) -> f64 {
        distance / self.pip_size
    }

    /// Convert a pip distance into a raw price distance
    pub fn pips_to_price(&self, pips: f64) -> f64 {
        pips * self.pip_size
    }
}

/// OHLCV candlestick data
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candle {
    pub instrument: String,
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Candle {
    pub fn is_bullish(&self) -> bool {
        self.close > self.open
    }

    pub fn range(&self) -> f64 {
        self.high - self.low
    }
}

/// Current bid/ask for an instrument
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Quote {
    pub instrument: String,
    pub bid: f64,
    pub ask: f64,
    pub timestamp: DateTime<Utc>,
}

impl Quote {
    pub fn mid(&self) -> f64 {
        (self.bid + self.ask) / 2.0
    }

    pub fn spread(&self) -> f64 {
        self.ask - self.bid
    }

    pub fn spread_pips(&self, pip_size: f64) -> f64 {
        self.spread() / pip_size
    }
}

/// Trade direction
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Long,
    Short,
}

impl Direction {
    /// +1.0 for long, -1.0 for short
    pub fn sign(&self) -> f64 {
        match self {
            Direction::Long => 1.0,
            Direction::Short => -1.0,
        }
    }
}

/// Trading signal emitted by a strategy
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Signal {
    Buy,
    Sell,
    Hold,
}

impl Signal {
    /// Entry direction implied by the signal, None for Hold
    pub fn direction(&self) -> Option<Direction> {
        match self {
            Signal::Buy => Some(Direction::Long),
            Signal::Sell => Some(Direction::Short),
            Signal::Hold => None,
        }
    }
}
