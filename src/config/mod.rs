/// Startup configuration
///
/// Everything tunable loads once at startup from `fxbot.toml` plus
/// `FXBOT_`-prefixed environment overrides, and is validated before the
/// engine sees it. Nothing here is consulted on the hot path.
use std::collections::HashMap;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::classifier::{ClassifierConfig, Level, Trend};
use crate::correlation::{CorrelationConfig, CorrelationGroup};
use crate::engine::EngineConfig;
use crate::lifecycle::LifecycleConfig;
use crate::models::{Direction, Instrument};
use crate::risk::RiskLimits;
use crate::sizing::{AccountTier, SizerConfig, TierTable};
use crate::strategy::breakout::BreakoutParams;
use crate::strategy::mean_reversion::MeanReversionParams;
use crate::strategy::trend_following::TrendFollowingParams;
use crate::strategy::{
    RegimeWeights, RiskParams, SelectionConfig, StopLossSpec, StrategyCatalog, StrategyParams,
    StrategySpec, TakeProfitSpec,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub instruments: Vec<Instrument>,
    pub starting_balance: f64,
    pub classifier: ClassifierConfig,
    pub selection: SelectionConfig,
    pub strategies: Vec<StrategySpec>,
    pub tiers: Vec<AccountTier>,
    pub sizer: SizerConfig,
    pub correlation: CorrelationConfig,
    pub risk: RiskLimits,
    pub lifecycle: LifecycleConfig,
    pub engine: EngineConfig,
    pub redis_url: Option<String>,
}

impl AppConfig {
    /// Load from a config file (optional) layered with `FXBOT_*` environment
    /// overrides, then validate
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path).required(false))
            .add_source(config::Environment::with_prefix("FXBOT").separator("__"))
            .build()
            .context("failed to read configuration sources")?;

        let app: AppConfig = settings
            .try_deserialize()
            .context("failed to deserialize configuration")?;

        app.validate()?;
        Ok(app)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.instruments.is_empty() {
            anyhow::bail!("at least one instrument must be configured");
        }
        for instrument in &self.instruments {
            if instrument.pip_size <= 0.0 || instrument.pip_value_per_lot <= 0.0 {
                anyhow::bail!(
                    "instrument '{}': pip_size and pip_value_per_lot must be positive",
                    instrument.symbol
                );
            }
        }

        if self.starting_balance <= 0.0 {
            anyhow::bail!("starting_balance must be positive");
        }

        let weight_sum = self.classifier.weights.sum();
        if (weight_sum - 1.0).abs() > 1e-6 {
            anyhow::bail!("classifier confidence weights must sum to 1.0, got {weight_sum}");
        }

        // Tier partition and strategy specs reuse their own constructors'
        // validation
        TierTable::new(self.tiers.clone()).context("invalid tier table")?;
        StrategyCatalog::new(self.strategies.clone()).context("invalid strategy catalog")?;
        self.risk.validate().context("invalid risk limits")?;

        if !(0.0..=1.0).contains(&self.correlation.high_threshold) {
            anyhow::bail!("correlation high_threshold must be within [0, 1]");
        }

        if self.lifecycle.retry_attempts == 0 {
            anyhow::bail!("lifecycle retry_attempts must be at least 1");
        }

        Ok(())
    }

    pub fn tier_table(&self) -> TierTable {
        TierTable::new(self.tiers.clone()).expect("validated at load")
    }

    pub fn catalog(&self) -> StrategyCatalog {
        StrategyCatalog::new(self.strategies.clone()).expect("validated at load")
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            instruments: default_instruments(),
            starting_balance: 1_000.0,
            classifier: ClassifierConfig::default(),
            selection: SelectionConfig::default(),
            strategies: default_strategies(),
            tiers: TierTable::default().tiers().to_vec(),
            sizer: SizerConfig::default(),
            correlation: default_correlation(),
            risk: RiskLimits::default(),
            lifecycle: LifecycleConfig::default(),
            engine: EngineConfig::default(),
            redis_url: None,
        }
    }
}

fn default_instruments() -> Vec<Instrument> {
    vec![
        Instrument {
            symbol: "EURUSD".to_string(),
            pip_size: 0.0001,
            pip_value_per_lot: 10.0,
            avg_spread_pips: 1.2,
        },
        Instrument {
            symbol: "GBPUSD".to_string(),
            pip_size: 0.0001,
            pip_value_per_lot: 10.0,
            avg_spread_pips: 1.8,
        },
        Instrument {
            symbol: "USDJPY".to_string(),
            pip_size: 0.01,
            pip_value_per_lot: 9.0,
            avg_spread_pips: 1.5,
        },
        Instrument {
            symbol: "V75".to_string(),
            pip_size: 0.01,
            pip_value_per_lot: 1.0,
            avg_spread_pips: 4.0,
        },
    ]
}

fn default_correlation() -> CorrelationConfig {
    CorrelationConfig {
        groups: vec![
            CorrelationGroup {
                name: "usd_majors".to_string(),
                members: vec!["EURUSD".to_string(), "GBPUSD".to_string()],
            },
            CorrelationGroup {
                name: "synthetic_indices".to_string(),
                members: vec!["V75".to_string()],
            },
        ],
        ..Default::default()
    }
}

/// Built-in catalog
///
/// `break_and_retest` and `bnr_strategy` are deliberate variants of the same
/// breakout kind: the legacy parameterization and the tuned one coexist under
/// their own names and compete on regime score.
fn default_strategies() -> Vec<StrategySpec> {
    vec![
        StrategySpec {
            name: "trend_rider".to_string(),
            enabled: true,
            weights: RegimeWeights {
                trend: HashMap::from([(Trend::Bullish, 9.0), (Trend::Bearish, 9.0)]),
                volatility: HashMap::from([(Level::Low, 5.0), (Level::Medium, 8.0)]),
                liquidity: HashMap::from([(Level::Medium, 6.0), (Level::High, 8.0)]),
                direction: HashMap::from([(Direction::Long, 5.0), (Direction::Short, 5.0)]),
            },
            risk: RiskParams {
                stop_loss: StopLossSpec::AtrMultiple { multiple: 1.5 },
                take_profit: TakeProfitSpec::Scaled {
                    second_rr: 3.5,
                    partial_fraction: 0.5,
                },
                risk_reward_ratio: 2.0,
                max_spread_pips: 3.0,
            },
            params: StrategyParams::TrendFollowing(TrendFollowingParams::default()),
        },
        StrategySpec {
            name: "range_fader".to_string(),
            enabled: true,
            weights: RegimeWeights {
                trend: HashMap::from([(Trend::Ranging, 9.0)]),
                volatility: HashMap::from([(Level::Low, 8.0), (Level::Medium, 6.0)]),
                liquidity: HashMap::from([(Level::Medium, 6.0), (Level::High, 7.0)]),
                direction: HashMap::new(),
            },
            risk: RiskParams {
                stop_loss: StopLossSpec::FixedPips { pips: 15.0 },
                take_profit: TakeProfitSpec::Single,
                risk_reward_ratio: 1.5,
                max_spread_pips: 2.5,
            },
            params: StrategyParams::MeanReversion(MeanReversionParams::default()),
        },
        StrategySpec {
            name: "break_and_retest".to_string(),
            enabled: true,
            weights: RegimeWeights {
                trend: HashMap::from([(Trend::Bullish, 6.0), (Trend::Bearish, 6.0)]),
                volatility: HashMap::from([(Level::Medium, 7.0), (Level::High, 5.0)]),
                liquidity: HashMap::from([(Level::High, 7.0)]),
                direction: HashMap::from([(Direction::Long, 5.0), (Direction::Short, 5.0)]),
            },
            risk: RiskParams {
                stop_loss: StopLossSpec::StructureBuffer {
                    buffer_pips: 3.0,
                    lookback: 20,
                },
                take_profit: TakeProfitSpec::Single,
                risk_reward_ratio: 2.0,
                max_spread_pips: 3.0,
            },
            params: StrategyParams::Breakout(BreakoutParams::default()),
        },
        StrategySpec {
            name: "bnr_strategy".to_string(),
            enabled: true,
            weights: RegimeWeights {
                trend: HashMap::from([(Trend::Bullish, 8.0), (Trend::Bearish, 8.0)]),
                volatility: HashMap::from([(Level::Medium, 8.0), (Level::High, 6.0)]),
                liquidity: HashMap::from([(Level::High, 8.0)]),
                direction: HashMap::from([(Direction::Long, 5.0), (Direction::Short, 5.0)]),
            },
            risk: RiskParams {
                stop_loss: StopLossSpec::StructureBuffer {
                    buffer_pips: 2.0,
                    lookback: 30,
                },
                take_profit: TakeProfitSpec::Scaled {
                    second_rr: 3.0,
                    partial_fraction: 0.5,
                },
                risk_reward_ratio: 2.0,
                max_spread_pips: 2.5,
            },
            params: StrategyParams::Breakout(BreakoutParams {
                range_lookback: 30,
                confirmation_bars: 2,
            }),
        },
    ]
}
