/// Strategy selection
///
/// Pure function over a classified market condition and the catalog: each
/// enabled strategy is scored by a weighted sum across the regime axes and the
/// best scorer wins. Ties break toward the earlier catalog registration so
/// identical inputs always produce identical selections.
use serde::{Deserialize, Serialize};

use crate::classifier::{MarketCondition, Trend};
use crate::models::Direction;
use crate::strategy::{StrategyCatalog, StrategySpec};

/// Relative importance of each condition axis during selection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelectionWeights {
    pub trend: f64,
    pub volatility: f64,
    pub liquidity: f64,
    pub direction: f64,
}

impl Default for SelectionWeights {
    fn default() -> Self {
        Self {
            trend: 0.40,
            volatility: 0.25,
            liquidity: 0.20,
            direction: 0.15,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelectionConfig {
    pub weights: SelectionWeights,
    /// Conditions below this confidence select no strategy
    pub min_confidence: f64,
}

impl Default for SelectionConfig {
    fn default() -> Self {
        Self {
            weights: SelectionWeights::default(),
            min_confidence: 55.0,
        }
    }
}

/// Score one strategy against a market condition
pub fn score_strategy(
    spec: &StrategySpec,
    condition: &MarketCondition,
    weights: &SelectionWeights,
) -> f64 {
    let trend_w = spec
        .weights
        .trend
        .get(&condition.trend)
        .copied()
        .unwrap_or(0.0);
    let vol_w = spec
        .weights
        .volatility
        .get(&condition.volatility)
        .copied()
        .unwrap_or(0.0);
    let liq_w = spec
        .weights
        .liquidity
        .get(&condition.liquidity)
        .copied()
        .unwrap_or(0.0);
    let dir_w = implied_direction(condition.trend)
        .and_then(|d| spec.weights.direction.get(&d).copied())
        .unwrap_or(0.0);

    weights.trend * trend_w
        + weights.volatility * vol_w
        + weights.liquidity * liq_w
        + weights.direction * dir_w
}

/// Pick the best-suited enabled strategy, or None when the condition is not
/// tradeable (unknown trend, confidence under the floor, or nothing scored
/// above zero)
pub fn select_strategy<'a>(
    condition: &MarketCondition,
    catalog: &'a StrategyCatalog,
    config: &SelectionConfig,
) -> Option<&'a StrategySpec> {
    if !condition.is_tradeable() || condition.confidence < config.min_confidence {
        return None;
    }

    let mut best: Option<(&StrategySpec, f64)> = None;

    for spec in catalog.enabled() {
        let score = score_strategy(spec, condition, &config.weights);
        tracing::debug!(
            strategy = %spec.name,
            score = format!("{:.3}", score),
            instrument = %condition.instrument,
            "strategy scored"
        );

        // Strict comparison keeps the first registration on ties
        match best {
            Some((_, best_score)) if score <= best_score => {}
            _ if score > 0.0 => best = Some((spec, score)),
            _ => {}
        }
    }

    best.map(|(spec, _)| spec)
}

fn implied_direction(trend: Trend) -> Option<Direction> {
    match trend {
        Trend::Bullish => Some(Direction::Long),
        Trend::Bearish => Some(Direction::Short),
        _ => None,
    }
}
