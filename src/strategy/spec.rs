/// Strategy configuration entities
///
/// Strategies are read-only configuration loaded at startup: a named variant
/// binds a signal-generating kind (with its parameters) to per-regime
/// suitability weights and risk parameters. Several variants of the same kind
/// may coexist in the catalog under different names.
use std::collections::HashMap;

use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};

use crate::classifier::{Level, Trend};
use crate::models::Direction;
use crate::strategy::breakout::{BreakoutParams, BreakoutStrategy};
use crate::strategy::mean_reversion::{MeanReversionParams, MeanReversionStrategy};
use crate::strategy::trend_following::{TrendFollowingParams, TrendFollowingStrategy};
use crate::strategy::Strategy;

/// How the stop-loss distance is derived at entry
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StopLossSpec {
    FixedPips { pips: f64 },
    AtrMultiple { multiple: f64 },
    StructureBuffer { buffer_pips: f64, lookback: usize },
}

/// Take-profit layout relative to the stop distance (R multiples)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TakeProfitSpec {
    /// One full-size target at `risk_reward_ratio` R
    Single,
    /// First target at `risk_reward_ratio` R closes `partial_fraction` of the
    /// position; the remainder runs to `second_rr` R
    Scaled { second_rr: f64, partial_fraction: f64 },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskParams {
    pub stop_loss: StopLossSpec,
    pub take_profit: TakeProfitSpec,
    pub risk_reward_ratio: f64,
    /// Entries are rejected outright above this spread
    pub max_spread_pips: f64,
}

/// Per-regime suitability weights, 0-10 per bucket
///
/// Missing buckets score zero, so a strategy can opt out of a regime simply
/// by not listing it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegimeWeights {
    #[serde(default)]
    pub trend: HashMap<Trend, f64>,
    #[serde(default)]
    pub volatility: HashMap<Level, f64>,
    #[serde(default)]
    pub liquidity: HashMap<Level, f64>,
    #[serde(default)]
    pub direction: HashMap<Direction, f64>,
}

impl RegimeWeights {
    fn validate(&self, name: &str) -> anyhow::Result<()> {
        let all = self
            .trend
            .values()
            .chain(self.volatility.values())
            .chain(self.liquidity.values())
            .chain(self.direction.values());

        for &w in all {
            if !(0.0..=10.0).contains(&w) {
                bail!("strategy '{}': regime weight {} outside 0-10", name, w);
            }
        }
        Ok(())
    }
}

/// Signal-generation parameters, one sealed variant per strategy kind
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StrategyParams {
    TrendFollowing(TrendFollowingParams),
    MeanReversion(MeanReversionParams),
    Breakout(BreakoutParams),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategySpec {
    pub name: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    pub weights: RegimeWeights,
    pub risk: RiskParams,
    pub params: StrategyParams,
}

fn default_enabled() -> bool {
    true
}

impl StrategySpec {
    /// Build the signal generator for this variant
    pub fn build(&self) -> Box<dyn Strategy> {
        match &self.params {
            StrategyParams::TrendFollowing(p) => {
                Box::new(TrendFollowingStrategy::new(self.name.clone(), p.clone()))
            }
            StrategyParams::MeanReversion(p) => {
                Box::new(MeanReversionStrategy::new(self.name.clone(), p.clone()))
            }
            StrategyParams::Breakout(p) => {
                Box::new(BreakoutStrategy::new(self.name.clone(), p.clone()))
            }
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.name.trim().is_empty() {
            bail!("strategy name must not be empty");
        }

        self.weights
            .validate(&self.name)
            .context("invalid regime weights")?;

        if self.risk.risk_reward_ratio <= 0.0 {
            bail!("strategy '{}': risk_reward_ratio must be positive", self.name);
        }
        if self.risk.max_spread_pips <= 0.0 {
            bail!("strategy '{}': max_spread_pips must be positive", self.name);
        }

        match &self.risk.stop_loss {
            StopLossSpec::FixedPips { pips } if *pips <= 0.0 => {
                bail!("strategy '{}': fixed stop must be positive", self.name)
            }
            StopLossSpec::AtrMultiple { multiple } if *multiple <= 0.0 => {
                bail!("strategy '{}': ATR multiple must be positive", self.name)
            }
            StopLossSpec::StructureBuffer { buffer_pips, .. } if *buffer_pips < 0.0 => {
                bail!("strategy '{}': structure buffer must not be negative", self.name)
            }
            _ => {}
        }

        if let TakeProfitSpec::Scaled {
            second_rr,
            partial_fraction,
        } = &self.risk.take_profit
        {
            if *second_rr <= self.risk.risk_reward_ratio {
                bail!(
                    "strategy '{}': scaled second target must exceed the first",
                    self.name
                );
            }
            if !(0.0 < *partial_fraction && *partial_fraction < 1.0) {
                bail!(
                    "strategy '{}': partial_fraction must be within (0, 1)",
                    self.name
                );
            }
        }

        match &self.params {
            StrategyParams::TrendFollowing(p) => p.validate(&self.name),
            StrategyParams::MeanReversion(p) => p.validate(&self.name),
            StrategyParams::Breakout(p) => p.validate(&self.name),
        }
    }
}
