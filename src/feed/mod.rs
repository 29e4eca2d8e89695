/// Market data boundary
///
/// The engine consumes bars and quotes through the `MarketFeed` trait; the
/// synthetic feed backs paper mode and tests with seeded, regime-shaped
/// random walks.
use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::models::{Candle, Instrument, Quote};
use crate::Result;

/// Bars kept per instrument; enough for the longest classifier lookback
const HISTORY_CAP: usize = 1_000;

#[async_trait]
pub trait MarketFeed: Send + Sync {
    /// The most recent `count` OHLCV bars, oldest first
    async fn candles(&self, instrument: &str, count: usize) -> Result<Vec<Candle>>;

    async fn quote(&self, instrument: &str) -> Result<Quote>;
}

/// Price regime a synthetic instrument walks through
#[derive(Debug, Clone, Copy)]
pub enum FeedScenario {
    /// Steady drift up with small noise
    Uptrend,
    /// Steady drift down with small noise
    Downtrend,
    /// Mean-reverting oscillation around the base price
    Ranging,
    /// Large undirected swings
    Volatile,
}

struct SeriesState {
    scenario: FeedScenario,
    rng: StdRng,
    base_price: f64,
    current_price: f64,
    pip_size: f64,
    spread_pips: f64,
    interval_minutes: i64,
    genesis: DateTime<Utc>,
    history: Vec<Candle>,
}

impl SeriesState {
    fn step(&mut self, symbol: &str) {
        let drift_per_bar = 0.02 / (24.0 * 60.0 / self.interval_minutes as f64);

        let change = match self.scenario {
            FeedScenario::Uptrend => {
                self.current_price * (drift_per_bar + self.rng.gen_range(-0.001..0.001))
            }
            FeedScenario::Downtrend => {
                self.current_price * (-drift_per_bar + self.rng.gen_range(-0.001..0.001))
            }
            FeedScenario::Ranging => {
                (self.base_price - self.current_price) * 0.1
                    + self.current_price * self.rng.gen_range(-0.002..0.002)
            }
            FeedScenario::Volatile => self.current_price * self.rng.gen_range(-0.01..0.01),
        };
        self.current_price = (self.current_price + change).max(self.base_price * 0.2);

        let noise = 0.0015;
        let close = self.current_price;
        let high = close * (1.0 + self.rng.gen_range(0.0..noise));
        let low = close * (1.0 - self.rng.gen_range(0.0..noise));
        let open = (close * (1.0 + self.rng.gen_range(-noise..noise))).clamp(low, high);
        let volume = 1_000.0 * self.rng.gen_range(0.7..1.3);

        let timestamp =
            self.genesis + Duration::minutes(self.history.len() as i64 * self.interval_minutes);

        self.history.push(Candle {
            instrument: symbol.to_string(),
            timestamp,
            open,
            high,
            low,
            close,
            volume,
        });

        if self.history.len() > HISTORY_CAP {
            self.history.remove(0);
        }
    }
}

/// Seeded synthetic feed for paper trading and tests
pub struct SyntheticFeed {
    seed: u64,
    series: Mutex<HashMap<String, SeriesState>>,
}

impl SyntheticFeed {
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            series: Mutex::new(HashMap::new()),
        }
    }

    pub fn register(
        &self,
        instrument: &Instrument,
        scenario: FeedScenario,
        base_price: f64,
        interval_minutes: i64,
    ) {
        let mut series = self.series.lock().unwrap();
        let index = series.len() as u64;
        series.insert(
            instrument.symbol.clone(),
            SeriesState {
                scenario,
                rng: StdRng::seed_from_u64(self.seed.wrapping_add(index)),
                base_price,
                current_price: base_price,
                pip_size: instrument.pip_size,
                spread_pips: instrument.avg_spread_pips,
                interval_minutes,
                genesis: Utc::now() - Duration::minutes(HISTORY_CAP as i64 * interval_minutes),
                history: Vec::new(),
            },
        );
    }

    /// Advance every registered series by one bar
    pub fn tick(&self) {
        let mut series = self.series.lock().unwrap();
        for (symbol, state) in series.iter_mut() {
            let symbol = symbol.clone();
            state.step(&symbol);
        }
    }
}

#[async_trait]
impl MarketFeed for SyntheticFeed {
    async fn candles(&self, instrument: &str, count: usize) -> Result<Vec<Candle>> {
        let mut series = self.series.lock().unwrap();
        let state = series
            .get_mut(instrument)
            .ok_or_else(|| format!("unknown instrument {instrument}"))?;

        while state.history.len() < count {
            state.step(instrument);
        }

        let start = state.history.len() - count;
        Ok(state.history[start..].to_vec())
    }

    async fn quote(&self, instrument: &str) -> Result<Quote> {
        let mut series = self.series.lock().unwrap();
        let state = series
            .get_mut(instrument)
            .ok_or_else(|| format!("unknown instrument {instrument}"))?;

        if state.history.is_empty() {
            state.step(instrument);
        }

        let mid = state.current_price;
        let half_spread = state.spread_pips * state.pip_size / 2.0;

        Ok(Quote {
            instrument: instrument.to_string(),
            bid: mid - half_spread,
            ask: mid + half_spread,
            timestamp: Utc::now(),
        })
    }
}
