/// Account tiers and position sizing
///
/// A tier is selected from current equity once per evaluation cycle; the sizer
/// maps equity, tier and the selected strategy's risk parameters to a concrete
/// lot size and stop distance. Sizing that would produce a zero-size position
/// reports untradeable instead of opening it.
use anyhow::bail;
use serde::{Deserialize, Serialize};

use crate::indicators::{calculate_atr, recent_swing_high, recent_swing_low};
use crate::models::{Candle, Direction, Instrument, Quote};
use crate::strategy::{RiskParams, StopLossSpec};

/// Lots are quoted in steps of 0.01 (micro lots)
const LOT_STEP: f64 = 0.01;

/// Balance-range bucket determining size and risk limits
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountTier {
    pub label: String,
    /// Inclusive lower bound of the balance range
    pub min_balance: f64,
    /// Exclusive upper bound of the balance range
    pub max_balance: f64,
    pub max_lot_size: f64,
    /// Percent of equity risked per trade (1.5 = 1.5%)
    pub risk_percent_per_trade: f64,
    pub max_concurrent_trades: usize,
}

/// Ordered tier table partitioning the balance axis
///
/// Validation rejects gaps and overlaps so every equity value maps to exactly
/// one tier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TierTable {
    tiers: Vec<AccountTier>,
}

impl TierTable {
    pub fn new(mut tiers: Vec<AccountTier>) -> anyhow::Result<Self> {
        if tiers.is_empty() {
            bail!("tier table must not be empty");
        }

        tiers.sort_by(|a, b| a.min_balance.total_cmp(&b.min_balance));

        for tier in &tiers {
            if tier.min_balance < 0.0 || tier.max_balance <= tier.min_balance {
                bail!(
                    "tier '{}': invalid balance range [{}, {})",
                    tier.label,
                    tier.min_balance,
                    tier.max_balance
                );
            }
            if tier.max_lot_size <= 0.0 {
                bail!("tier '{}': max_lot_size must be positive", tier.label);
            }
            if !(0.0..=100.0).contains(&tier.risk_percent_per_trade) {
                bail!("tier '{}': risk_percent_per_trade outside 0-100", tier.label);
            }
            if tier.max_concurrent_trades == 0 {
                bail!("tier '{}': max_concurrent_trades must be positive", tier.label);
            }
        }

        for pair in tiers.windows(2) {
            if pair[0].max_balance < pair[1].min_balance {
                bail!(
                    "gap in tier table between '{}' and '{}'",
                    pair[0].label,
                    pair[1].label
                );
            }
            if pair[0].max_balance > pair[1].min_balance {
                bail!(
                    "tiers '{}' and '{}' overlap",
                    pair[0].label,
                    pair[1].label
                );
            }
        }

        Ok(Self { tiers })
    }

    /// Tier covering the given equity; the top tier is open-ended upward
    pub fn tier_for(&self, equity: f64) -> Option<&AccountTier> {
        if equity < 0.0 {
            return None;
        }

        self.tiers
            .iter()
            .find(|t| equity >= t.min_balance && equity < t.max_balance)
            .or_else(|| {
                self.tiers
                    .last()
                    .filter(|t| equity >= t.max_balance)
            })
    }

    pub fn tiers(&self) -> &[AccountTier] {
        &self.tiers
    }
}

impl Default for TierTable {
    fn default() -> Self {
        Self::new(vec![
            AccountTier {
                label: "micro".to_string(),
                min_balance: 0.0,
                max_balance: 500.0,
                max_lot_size: 0.02,
                risk_percent_per_trade: 1.0,
                max_concurrent_trades: 1,
            },
            AccountTier {
                label: "mini".to_string(),
                min_balance: 500.0,
                max_balance: 2_000.0,
                max_lot_size: 0.05,
                risk_percent_per_trade: 1.5,
                max_concurrent_trades: 2,
            },
            AccountTier {
                label: "standard".to_string(),
                min_balance: 2_000.0,
                max_balance: 10_000.0,
                max_lot_size: 0.20,
                risk_percent_per_trade: 2.0,
                max_concurrent_trades: 3,
            },
            AccountTier {
                label: "professional".to_string(),
                min_balance: 10_000.0,
                max_balance: 1_000_000.0,
                max_lot_size: 1.00,
                risk_percent_per_trade: 2.0,
                max_concurrent_trades: 5,
            },
        ])
        .expect("default tier table is contiguous")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SizerConfig {
    /// Entries are rejected when the quoted spread exceeds the instrument's
    /// baseline by this factor
    pub max_spread_multiplier: f64,
    pub atr_period: usize,
}

impl Default for SizerConfig {
    fn default() -> Self {
        Self {
            max_spread_multiplier: 2.0,
            atr_period: 14,
        }
    }
}

/// Sized entry, or the reason the instrument is untradeable right now
#[derive(Debug, Clone)]
pub enum SizeDecision {
    Sized(SizedPosition),
    Untradeable(String),
}

#[derive(Debug, Clone)]
pub struct SizedPosition {
    pub lots: f64,
    pub stop_pips: f64,
}

pub struct PositionSizer {
    config: SizerConfig,
}

impl PositionSizer {
    pub fn new(config: SizerConfig) -> Self {
        Self { config }
    }

    /// Size an entry for the given equity, tier and strategy risk parameters
    ///
    /// `lots = equity * risk% / (stop_pips * pip_value)`, clamped to the
    /// tier's maximum and rounded down to the lot step.
    pub fn size(
        &self,
        equity: f64,
        tier: &AccountTier,
        risk: &RiskParams,
        instrument: &Instrument,
        direction: Direction,
        candles: &[Candle],
        quote: &Quote,
    ) -> SizeDecision {
        let spread_pips = quote.spread_pips(instrument.pip_size);

        if spread_pips > risk.max_spread_pips {
            return SizeDecision::Untradeable(format!(
                "spread {:.1} pips above strategy limit {:.1}",
                spread_pips, risk.max_spread_pips
            ));
        }

        let spread_ceiling = instrument.avg_spread_pips * self.config.max_spread_multiplier;
        if spread_pips > spread_ceiling {
            return SizeDecision::Untradeable(format!(
                "spread {:.1} pips exceeds {:.1}x baseline ({:.1})",
                spread_pips, self.config.max_spread_multiplier, spread_ceiling
            ));
        }

        let stop_pips = match self.resolve_stop_pips(risk, instrument, direction, candles, quote) {
            Some(pips) => pips,
            None => {
                return SizeDecision::Untradeable(
                    "stop distance could not be resolved from market data".to_string(),
                )
            }
        };

        if !stop_pips.is_finite() || stop_pips <= 0.0 {
            return SizeDecision::Untradeable(format!("invalid stop distance {stop_pips} pips"));
        }

        let risk_amount = equity * tier.risk_percent_per_trade / 100.0;
        let raw_lots = risk_amount / (stop_pips * instrument.pip_value_per_lot);

        let clamped = raw_lots.clamp(0.0, tier.max_lot_size);
        let lots = (clamped / LOT_STEP).floor() * LOT_STEP;

        if lots < LOT_STEP {
            return SizeDecision::Untradeable(format!(
                "equity {:.2} too small for a {:.1}-pip stop",
                equity, stop_pips
            ));
        }

        SizeDecision::Sized(SizedPosition { lots, stop_pips })
    }

    /// Resolve the stop distance in pips per the strategy's stop-loss spec
    fn resolve_stop_pips(
        &self,
        risk: &RiskParams,
        instrument: &Instrument,
        direction: Direction,
        candles: &[Candle],
        quote: &Quote,
    ) -> Option<f64> {
        match &risk.stop_loss {
            StopLossSpec::FixedPips { pips } => Some(*pips),
            StopLossSpec::AtrMultiple { multiple } => {
                let atr = calculate_atr(candles, self.config.atr_period)?;
                Some(instrument.price_to_pips(atr * multiple))
            }
            StopLossSpec::StructureBuffer {
                buffer_pips,
                lookback,
            } => {
                let entry = quote.mid();
                let anchor = match direction {
                    Direction::Long => recent_swing_low(candles, *lookback)?,
                    Direction::Short => recent_swing_high(candles, *lookback)?,
                };
                let distance = (entry - anchor).abs();
                Some(instrument.price_to_pips(distance) + buffer_pips)
            }
        }
    }
}
