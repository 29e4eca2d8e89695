/// Market condition classification
///
/// Turns a window of OHLCV bars plus the current quote into a labeled regime
/// (trend, volatility, liquidity) with a 0-100 confidence score. Classification
/// feeds trading decisions, so it degrades to `Trend::Unknown` on bad input
/// instead of failing.
use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::indicators::{
    analyze_market_structure, calculate_adx, calculate_atr, calculate_average_volume,
    is_volume_spike, MarketStructure,
};
use crate::models::{Candle, Instrument, Quote};

/// Minimum +DI/-DI separation before we call a direction
const DI_SEPARATION: f64 = 5.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Trend {
    Bullish,
    Bearish,
    Ranging,
    Choppy,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Low,
    Medium,
    High,
    Unknown,
}

/// Classified market regime for one instrument
///
/// Immutable once produced; a fresh instance replaces the prior one in the
/// classifier's cache.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketCondition {
    pub instrument: String,
    pub trend: Trend,
    pub volatility: Level,
    pub liquidity: Level,
    /// 0-100
    pub confidence: f64,
    pub computed_at: DateTime<Utc>,
}

impl MarketCondition {
    /// Degraded "do not trade" condition
    pub fn unknown(instrument: &str, computed_at: DateTime<Utc>) -> Self {
        Self {
            instrument: instrument.to_string(),
            trend: Trend::Unknown,
            volatility: Level::Unknown,
            liquidity: Level::Unknown,
            confidence: 0.0,
            computed_at,
        }
    }

    pub fn is_tradeable(&self) -> bool {
        self.trend != Trend::Unknown
    }
}

/// Weights for combining sub-scores into the final confidence; must sum to 1.0
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfidenceWeights {
    pub trend: f64,
    pub volatility: f64,
    pub liquidity: f64,
    pub price_action: f64,
}

impl Default for ConfidenceWeights {
    fn default() -> Self {
        Self {
            trend: 0.4,
            volatility: 0.2,
            liquidity: 0.2,
            price_action: 0.2,
        }
    }
}

impl ConfidenceWeights {
    pub fn sum(&self) -> f64 {
        self.trend + self.volatility + self.liquidity + self.price_action
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifierConfig {
    /// Bars required for trend classification
    pub trend_lookback: usize,
    /// Shorter window for volatility and liquidity baselines
    pub volatility_window: usize,
    pub adx_period: usize,
    /// ADX at or above this (with DI separation) = trending
    pub adx_trend_threshold: f64,
    /// ADX below this = no meaningful trend
    pub adx_chop_threshold: f64,
    /// ATR as % of price below this = low volatility
    pub atr_low_pct: f64,
    /// ATR as % of price above this = high volatility
    pub atr_high_pct: f64,
    /// Combined spread/volume score at or above this = high liquidity
    pub liquidity_threshold: f64,
    pub weights: ConfidenceWeights,
    /// Below this confidence the classifier emits Trend::Unknown
    pub min_trading_confidence: f64,
    pub cache_expiry_seconds: u64,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            trend_lookback: 100,
            volatility_window: 20,
            adx_period: 14,
            adx_trend_threshold: 25.0,
            adx_chop_threshold: 18.0,
            atr_low_pct: 0.05,
            atr_high_pct: 0.20,
            liquidity_threshold: 0.8,
            weights: ConfidenceWeights::default(),
            min_trading_confidence: 55.0,
            cache_expiry_seconds: 300,
        }
    }
}

/// Cached classification with an explicit staleness check (no background timer)
#[derive(Debug, Clone)]
pub struct CachedCondition {
    pub value: MarketCondition,
    pub computed_at: DateTime<Utc>,
}

impl CachedCondition {
    pub fn is_stale(&self, now: DateTime<Utc>, ttl_seconds: u64) -> bool {
        (now - self.computed_at).num_seconds() >= ttl_seconds as i64
    }
}

pub struct MarketClassifier {
    config: ClassifierConfig,
    cache: HashMap<String, CachedCondition>,
}

impl MarketClassifier {
    pub fn new(config: ClassifierConfig) -> Self {
        Self {
            config,
            cache: HashMap::new(),
        }
    }

    /// Fresh cached condition for an instrument, if any
    pub fn cached(&self, instrument: &str, now: DateTime<Utc>) -> Option<MarketCondition> {
        self.cache
            .get(instrument)
            .filter(|c| !c.is_stale(now, self.config.cache_expiry_seconds))
            .map(|c| c.value.clone())
    }

    /// Classify the instrument's current regime
    ///
    /// A fresh cache entry short-circuits recomputation. Never fails: short or
    /// malformed windows produce `Trend::Unknown` with zero confidence.
    pub fn classify(
        &mut self,
        instrument: &Instrument,
        candles: &[Candle],
        quote: &Quote,
        now: DateTime<Utc>,
    ) -> MarketCondition {
        if let Some(cached) = self.cached(&instrument.symbol, now) {
            tracing::debug!(instrument = %instrument.symbol, "classification cache hit");
            return cached;
        }

        let condition = self.compute(instrument, candles, quote, now);
        self.cache.insert(
            instrument.symbol.clone(),
            CachedCondition {
                value: condition.clone(),
                computed_at: now,
            },
        );
        condition
    }

    fn compute(
        &self,
        instrument: &Instrument,
        candles: &[Candle],
        quote: &Quote,
        now: DateTime<Utc>,
    ) -> MarketCondition {
        let min_bars = self
            .config
            .trend_lookback
            .max(self.config.adx_period + self.config.volatility_window);
        if candles.len() < min_bars || !window_is_well_formed(candles) {
            tracing::debug!(
                instrument = %instrument.symbol,
                bars = candles.len(),
                "insufficient or malformed window, emitting unknown"
            );
            return MarketCondition::unknown(&instrument.symbol, now);
        }

        let Some((adx, plus_di, minus_di)) = calculate_adx(candles, self.config.adx_period) else {
            return MarketCondition::unknown(&instrument.symbol, now);
        };

        let current_price = candles[candles.len() - 1].close;

        let (trend, trend_score) = self.classify_trend(adx, plus_di, minus_di, candles);
        let (volatility, vol_score) = self.classify_volatility(candles, current_price);
        let (liquidity, liq_score) = self.classify_liquidity(instrument, candles, quote);
        let pa_score = self.price_action_score(trend, candles);

        let w = &self.config.weights;
        let confidence = (100.0
            * (w.trend * trend_score
                + w.volatility * vol_score
                + w.liquidity * liq_score
                + w.price_action * pa_score))
            .clamp(0.0, 100.0);

        let trend = if confidence < self.config.min_trading_confidence {
            tracing::debug!(
                instrument = %instrument.symbol,
                confidence = format!("{:.1}", confidence),
                floor = self.config.min_trading_confidence,
                "confidence below trading floor"
            );
            Trend::Unknown
        } else {
            trend
        };

        MarketCondition {
            instrument: instrument.symbol.clone(),
            trend,
            volatility,
            liquidity,
            confidence,
            computed_at: now,
        }
    }

    fn classify_trend(
        &self,
        adx: f64,
        plus_di: f64,
        minus_di: f64,
        candles: &[Candle],
    ) -> (Trend, f64) {
        if adx >= self.config.adx_trend_threshold {
            // Directional strength score grows with ADX beyond the threshold
            let strength = ((adx - self.config.adx_trend_threshold)
                / (50.0 - self.config.adx_trend_threshold))
                .clamp(0.0, 1.0);
            let score = 0.5 + 0.5 * strength;

            if plus_di > minus_di + DI_SEPARATION {
                return (Trend::Bullish, score);
            }
            if minus_di > plus_di + DI_SEPARATION {
                return (Trend::Bearish, score);
            }
        }

        // No directional trend: distinguish an orderly range from whipsaw
        if self.is_range_bound(candles) {
            let clarity =
                ((self.config.adx_chop_threshold - adx) / self.config.adx_chop_threshold)
                    .clamp(0.0, 1.0);
            (Trend::Ranging, 0.5 + 0.5 * clarity)
        } else {
            (Trend::Choppy, 0.25)
        }
    }

    /// Range-bound = price oscillating between ATR-wide bands around its mean,
    /// touching both sides repeatedly
    fn is_range_bound(&self, candles: &[Candle]) -> bool {
        let window = self.config.volatility_window.max(10);
        if candles.len() < window {
            return false;
        }

        let Some(atr) = calculate_atr(candles, self.config.adx_period) else {
            return false;
        };

        let recent = &candles[candles.len() - window..];
        let closes: Vec<f64> = recent.iter().map(|c| c.close).collect();
        let avg = closes.iter().sum::<f64>() / closes.len() as f64;

        let upper = avg + atr;
        let lower = avg - atr;

        let upper_touches = closes.iter().filter(|&&p| p >= upper).count();
        let lower_touches = closes.iter().filter(|&&p| p <= lower).count();

        upper_touches >= 2 && lower_touches >= 2
    }

    fn classify_volatility(&self, candles: &[Candle], current_price: f64) -> (Level, f64) {
        let window = candles.len().min(self.config.volatility_window + self.config.adx_period);
        let recent = &candles[candles.len() - window..];

        let Some(atr) = calculate_atr(recent, self.config.adx_period) else {
            return (Level::Unknown, 0.0);
        };
        if current_price <= 0.0 {
            return (Level::Unknown, 0.0);
        }

        let atr_pct = (atr / current_price) * 100.0;

        // A participation spike alongside non-trivial range expansion reads
        // as panic flow before ATR catches up
        let spiking = is_volume_spike(candles, self.config.volatility_window, 2.0);

        if atr_pct > self.config.atr_high_pct
            || (atr_pct > self.config.atr_low_pct && spiking)
        {
            // Volatile markets are hard to classify reliably
            (Level::High, 0.4)
        } else if atr_pct < self.config.atr_low_pct {
            (Level::Low, 0.7)
        } else {
            (Level::Medium, 1.0)
        }
    }

    /// Liquidity score combines the quoted spread against the instrument's
    /// baseline and current volume against the rolling average
    fn classify_liquidity(
        &self,
        instrument: &Instrument,
        candles: &[Candle],
        quote: &Quote,
    ) -> (Level, f64) {
        let Some(avg_volume) = calculate_average_volume(candles, self.config.volatility_window)
        else {
            return (Level::Unknown, 0.0);
        };
        if avg_volume <= 0.0 || instrument.avg_spread_pips <= 0.0 {
            return (Level::Unknown, 0.0);
        }

        let current_volume = candles[candles.len() - 1].volume;
        let spread_pips = quote.spread_pips(instrument.pip_size);

        let volume_ratio = (current_volume / avg_volume).clamp(0.0, 1.5);
        let spread_ratio = if spread_pips > 0.0 {
            (instrument.avg_spread_pips / spread_pips).clamp(0.0, 1.5)
        } else {
            1.5
        };

        let score = 0.5 * volume_ratio + 0.5 * spread_ratio;

        let threshold = self.config.liquidity_threshold;
        let level = if score >= threshold {
            Level::High
        } else if score >= threshold / 2.0 {
            Level::Medium
        } else {
            Level::Low
        };

        let sub_score = match level {
            Level::High => 1.0,
            Level::Medium => 0.7,
            Level::Low => 0.3,
            Level::Unknown => 0.0,
        };

        (level, sub_score)
    }

    /// Price-action factor: does swing structure agree with the trend label?
    fn price_action_score(&self, trend: Trend, candles: &[Candle]) -> f64 {
        let structure = analyze_market_structure(candles, self.config.volatility_window);

        match (trend, structure) {
            (Trend::Bullish, MarketStructure::HigherHighsHigherLows) => 1.0,
            (Trend::Bearish, MarketStructure::LowerHighsLowerLows) => 1.0,
            (Trend::Bullish, MarketStructure::LowerHighsLowerLows) => 0.3,
            (Trend::Bearish, MarketStructure::HigherHighsHigherLows) => 0.3,
            (Trend::Ranging, MarketStructure::Mixed) => 0.8,
            (Trend::Choppy, MarketStructure::Mixed) => 0.6,
            _ => 0.5,
        }
    }
}

fn window_is_well_formed(candles: &[Candle]) -> bool {
    candles.iter().all(|c| {
        c.open.is_finite()
            && c.high.is_finite()
            && c.low.is_finite()
            && c.close.is_finite()
            && c.volume.is_finite()
            && c.high >= c.low
    })
}
