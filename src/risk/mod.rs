/// Risk ledger and circuit breakers
///
/// The ledger is the only mutable shared state in the system: equity, daily
/// P&L, drawdown and the open-position index all live here, and every
/// mutation goes through one `Arc<Mutex<RiskLedger>>` boundary so concurrent
/// instrument cycles cannot over-commit the daily risk budget. Entry risk is
/// reserved inside the same critical section as the admission checks
/// (`reserve`), then promoted on fill (`confirm_open`) or refunded on a
/// failed entry (`release`); a check-then-debit split across two lock
/// acquisitions would let two cycles spend the same headroom.
///
/// Breakers latch rather than flap: the daily-loss latch clears only at the
/// next UTC day boundary, the drawdown latch only once drawdown recovers
/// below a hysteresis band.
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::correlation::OpenExposure;
use crate::models::Direction;
use crate::sizing::AccountTier;

pub type SharedLedger = Arc<Mutex<RiskLedger>>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskLimits {
    pub max_daily_loss_pct: f64,
    pub max_drawdown_pct: f64,
    /// Drawdown must recover below `max_drawdown_pct - drawdown_recovery_pct`
    /// before the latch clears
    pub drawdown_recovery_pct: f64,
    /// Ceiling on risk committed per UTC day, as a fraction of day-start equity
    pub max_daily_risk_pct: f64,
    pub max_consecutive_losses: u32,
    pub max_daily_trades: u32,
}

impl Default for RiskLimits {
    fn default() -> Self {
        Self {
            max_daily_loss_pct: 0.05,    // -5% daily
            max_drawdown_pct: 0.15,      // -15% from peak
            drawdown_recovery_pct: 0.05, // recover to -10% before trading again
            max_daily_risk_pct: 0.06,    // 6% of equity committed per day
            max_consecutive_losses: 5,
            max_daily_trades: 10,
        }
    }
}

impl RiskLimits {
    pub fn validate(&self) -> anyhow::Result<()> {
        for (name, value) in [
            ("max_daily_loss_pct", self.max_daily_loss_pct),
            ("max_drawdown_pct", self.max_drawdown_pct),
            ("max_daily_risk_pct", self.max_daily_risk_pct),
        ] {
            if !(0.0..=1.0).contains(&value) || value == 0.0 {
                anyhow::bail!("risk limit {} must be within (0, 1]", name);
            }
        }
        if self.drawdown_recovery_pct < 0.0 || self.drawdown_recovery_pct >= self.max_drawdown_pct
        {
            anyhow::bail!("drawdown_recovery_pct must be within [0, max_drawdown_pct)");
        }
        Ok(())
    }
}

/// Why a new trade was refused admission
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdmitBlock {
    DailyLossLimit,
    DrawdownLimit,
    ConsecutiveLosses,
    DailyTradeLimit,
    DailyRiskBudget,
    InstrumentLimit,
}

impl fmt::Display for AdmitBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            AdmitBlock::DailyLossLimit => "daily loss limit breached",
            AdmitBlock::DrawdownLimit => "drawdown limit breached",
            AdmitBlock::ConsecutiveLosses => "too many consecutive losses",
            AdmitBlock::DailyTradeLimit => "daily trade limit reached",
            AdmitBlock::DailyRiskBudget => "daily risk budget exhausted",
            AdmitBlock::InstrumentLimit => "instrument concurrency limit reached",
        };
        write!(f, "{reason}")
    }
}

impl AdmitBlock {
    /// Breaker trips halt the whole system; the other blocks are per-cycle
    pub fn is_circuit_breaker(&self) -> bool {
        matches!(
            self,
            AdmitBlock::DailyLossLimit
                | AdmitBlock::DrawdownLimit
                | AdmitBlock::ConsecutiveLosses
        )
    }
}

/// One open position's entry in the ledger index
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenRecord {
    pub id: Uuid,
    pub instrument: String,
    pub direction: Direction,
    /// Equity lost if the stop is hit at current size
    pub risk_amount: f64,
    pub correlation_group: Option<String>,
}

/// Read-only view of the ledger for reporting
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerSnapshot {
    pub equity: f64,
    pub high_water_mark: f64,
    pub daily_realized_pnl: f64,
    pub daily_loss_limit_breached: bool,
    pub drawdown_limit_breached: bool,
    pub current_drawdown_pct: f64,
    pub daily_risk_committed: f64,
    pub open_positions_by_instrument: HashMap<String, usize>,
    pub open_risk_by_correlation_group: HashMap<String, f64>,
    pub taken_at: DateTime<Utc>,
}

pub struct RiskLedger {
    limits: RiskLimits,
    equity: f64,
    day_start_equity: f64,
    high_water_mark: f64,
    daily_realized_pnl: f64,
    /// Risk spent on an opened trade stays spent for the rest of the day
    /// even after it closes; only reservations that never fill are refunded
    daily_risk_committed: f64,
    consecutive_losses: u32,
    daily_trades: u32,
    daily_latched: bool,
    drawdown_latched: bool,
    current_day: NaiveDate,
    open: HashMap<Uuid, OpenRecord>,
    /// Entries admitted and awaiting their fill; their risk is already
    /// debited from the daily budget
    pending: HashMap<Uuid, OpenRecord>,
}

impl RiskLedger {
    pub fn new(limits: RiskLimits, starting_equity: f64, now: DateTime<Utc>) -> Self {
        Self {
            limits,
            equity: starting_equity,
            day_start_equity: starting_equity,
            high_water_mark: starting_equity,
            daily_realized_pnl: 0.0,
            daily_risk_committed: 0.0,
            consecutive_losses: 0,
            daily_trades: 0,
            daily_latched: false,
            drawdown_latched: false,
            current_day: now.date_naive(),
            open: HashMap::new(),
            pending: HashMap::new(),
        }
    }

    pub fn into_shared(self) -> SharedLedger {
        Arc::new(Mutex::new(self))
    }

    pub fn equity(&self) -> f64 {
        self.equity
    }

    pub fn current_drawdown_pct(&self) -> f64 {
        if self.high_water_mark <= 0.0 {
            return 0.0;
        }
        ((self.high_water_mark - self.equity) / self.high_water_mark).max(0.0)
    }

    pub fn halted(&self) -> bool {
        self.daily_latched || self.drawdown_latched
    }

    /// Can a new trade on `instrument` risking `risk_amount` be admitted?
    ///
    /// Read-only query; `reserve` runs the same checks and debits the budget
    /// in one step.
    pub fn can_admit(
        &self,
        instrument: &str,
        tier: &AccountTier,
        risk_amount: f64,
    ) -> Result<(), AdmitBlock> {
        if self.daily_latched {
            return Err(AdmitBlock::DailyLossLimit);
        }
        if self.drawdown_latched {
            return Err(AdmitBlock::DrawdownLimit);
        }
        if self.consecutive_losses >= self.limits.max_consecutive_losses {
            return Err(AdmitBlock::ConsecutiveLosses);
        }
        if self.daily_trades >= self.limits.max_daily_trades {
            return Err(AdmitBlock::DailyTradeLimit);
        }

        let budget = self.day_start_equity * self.limits.max_daily_risk_pct;
        if self.daily_risk_committed + risk_amount > budget {
            return Err(AdmitBlock::DailyRiskBudget);
        }

        let open_for_instrument = self
            .open
            .values()
            .chain(self.pending.values())
            .filter(|r| r.instrument == instrument)
            .count();
        if open_for_instrument >= tier.max_concurrent_trades {
            return Err(AdmitBlock::InstrumentLimit);
        }

        Ok(())
    }

    /// Admit an entry and reserve its risk in one critical section
    ///
    /// The budget debit happens before the lock is released, so a concurrent
    /// cycle evaluating against the same headroom sees it spent. The
    /// reservation is promoted by `confirm_open` once the fill lands, or
    /// refunded by `release` if the entry never fills.
    pub fn reserve(&mut self, record: OpenRecord, tier: &AccountTier) -> Result<(), AdmitBlock> {
        self.can_admit(&record.instrument, tier, record.risk_amount)?;

        self.daily_risk_committed += record.risk_amount;
        tracing::debug!(
            position = %record.id,
            instrument = %record.instrument,
            risk = format!("{:.2}", record.risk_amount),
            committed = format!("{:.2}", self.daily_risk_committed),
            "risk reserved for pending entry"
        );
        self.pending.insert(record.id, record);
        Ok(())
    }

    /// Promote a reservation into the open index once its fill is confirmed
    pub fn confirm_open(&mut self, id: Uuid) -> anyhow::Result<()> {
        let record = self
            .pending
            .remove(&id)
            .ok_or_else(|| anyhow::anyhow!("no reservation for position {}", id))?;

        tracing::debug!(
            position = %id,
            instrument = %record.instrument,
            "trade recorded open"
        );
        self.open.insert(id, record);
        Ok(())
    }

    /// Refund a reservation whose entry never filled
    ///
    /// Only unfilled reservations are refundable; risk spent on an opened
    /// trade stays spent for the day.
    pub fn release(&mut self, id: Uuid) -> anyhow::Result<()> {
        let record = self
            .pending
            .remove(&id)
            .ok_or_else(|| anyhow::anyhow!("no reservation for position {}", id))?;

        self.daily_risk_committed = (self.daily_risk_committed - record.risk_amount).max(0.0);
        tracing::debug!(
            position = %id,
            risk = format!("{:.2}", record.risk_amount),
            "reservation refunded after failed entry"
        );
        Ok(())
    }

    /// Shrink an open record's remaining risk after a partial close
    ///
    /// `closed_fraction` is the share of the position that was closed.
    pub fn reduce_open_risk(&mut self, id: Uuid, closed_fraction: f64) -> anyhow::Result<()> {
        let record = self
            .open
            .get_mut(&id)
            .ok_or_else(|| anyhow::anyhow!("position {} not in ledger", id))?;

        let fraction = closed_fraction.clamp(0.0, 1.0);
        record.risk_amount *= 1.0 - fraction;
        Ok(())
    }

    /// Fold a close into daily aggregates and re-evaluate the breakers
    pub fn record_close(
        &mut self,
        id: Uuid,
        realized_pnl: f64,
        now: DateTime<Utc>,
    ) -> anyhow::Result<()> {
        let record = self
            .open
            .remove(&id)
            .ok_or_else(|| anyhow::anyhow!("position {} not in ledger", id))?;

        self.equity += realized_pnl;
        self.daily_realized_pnl += realized_pnl;
        self.daily_trades += 1;

        if realized_pnl < 0.0 {
            self.consecutive_losses += 1;
        } else {
            self.consecutive_losses = 0;
        }

        if self.equity > self.high_water_mark {
            self.high_water_mark = self.equity;
        }

        tracing::info!(
            position = %id,
            instrument = %record.instrument,
            pnl = format!("{:.2}", realized_pnl),
            equity = format!("{:.2}", self.equity),
            "trade recorded closed"
        );

        self.update_daily_latch(now);
        self.update_drawdown_latch();
        Ok(())
    }

    fn update_daily_latch(&mut self, _now: DateTime<Utc>) {
        if self.daily_latched || self.day_start_equity <= 0.0 {
            return;
        }

        let daily_loss_pct = -self.daily_realized_pnl / self.day_start_equity;
        if daily_loss_pct >= self.limits.max_daily_loss_pct {
            self.daily_latched = true;
            tracing::warn!(
                daily_pnl = format!("{:.2}", self.daily_realized_pnl),
                limit_pct = self.limits.max_daily_loss_pct * 100.0,
                "daily loss limit breached, halting new entries until next UTC day"
            );
        }
    }

    fn update_drawdown_latch(&mut self) {
        let drawdown = self.current_drawdown_pct();

        if !self.drawdown_latched && drawdown >= self.limits.max_drawdown_pct {
            self.drawdown_latched = true;
            tracing::warn!(
                drawdown_pct = format!("{:.2}", drawdown * 100.0),
                limit_pct = self.limits.max_drawdown_pct * 100.0,
                "drawdown limit breached, halting new entries"
            );
        } else if self.drawdown_latched {
            let recovery_floor = self.limits.max_drawdown_pct - self.limits.drawdown_recovery_pct;
            if drawdown <= recovery_floor {
                self.drawdown_latched = false;
                tracing::info!(
                    drawdown_pct = format!("{:.2}", drawdown * 100.0),
                    "drawdown recovered below hysteresis band, breaker cleared"
                );
            }
        }
    }

    /// Reset daily aggregates at the UTC day boundary
    ///
    /// The daily-loss latch clears here and only here. The drawdown latch is
    /// untouched: it clears on recovery, not on the calendar.
    pub fn roll_day(&mut self, now: DateTime<Utc>) {
        let today = now.date_naive();
        if today <= self.current_day {
            return;
        }

        if self.daily_latched {
            tracing::info!(day = %today, "new UTC day, daily loss breaker cleared");
        }

        self.current_day = today;
        self.day_start_equity = self.equity;
        self.daily_realized_pnl = 0.0;
        self.daily_risk_committed = 0.0;
        self.daily_trades = 0;
        self.daily_latched = false;
    }

    /// Open and pending exposure for the correlation admission check
    ///
    /// Reservations awaiting their fill count as exposure, so a correlated
    /// entry cannot slip in while another is mid-flight.
    pub fn open_exposure(&self) -> Vec<OpenExposure> {
        self.open
            .values()
            .chain(self.pending.values())
            .map(|r| OpenExposure {
                instrument: r.instrument.clone(),
                direction: r.direction,
            })
            .collect()
    }

    pub fn snapshot(&self, now: DateTime<Utc>) -> LedgerSnapshot {
        let mut by_instrument: HashMap<String, usize> = HashMap::new();
        let mut by_group: HashMap<String, f64> = HashMap::new();

        for record in self.open.values() {
            *by_instrument.entry(record.instrument.clone()).or_insert(0) += 1;
            if let Some(group) = &record.correlation_group {
                *by_group.entry(group.clone()).or_insert(0.0) += record.risk_amount;
            }
        }

        LedgerSnapshot {
            equity: self.equity,
            high_water_mark: self.high_water_mark,
            daily_realized_pnl: self.daily_realized_pnl,
            daily_loss_limit_breached: self.daily_latched,
            drawdown_limit_breached: self.drawdown_latched,
            current_drawdown_pct: self.current_drawdown_pct(),
            daily_risk_committed: self.daily_risk_committed,
            open_positions_by_instrument: by_instrument,
            open_risk_by_correlation_group: by_group,
            taken_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tier(max_concurrent: usize) -> AccountTier {
        AccountTier {
            label: "mini".to_string(),
            min_balance: 500.0,
            max_balance: 2_000.0,
            max_lot_size: 0.05,
            risk_percent_per_trade: 1.5,
            max_concurrent_trades: max_concurrent,
        }
    }

    fn record(instrument: &str, risk: f64) -> OpenRecord {
        OpenRecord {
            id: Uuid::new_v4(),
            instrument: instrument.to_string(),
            direction: Direction::Long,
            risk_amount: risk,
            correlation_group: Some("usd_majors".to_string()),
        }
    }

    /// Reserve and immediately confirm, as the lifecycle manager does on a
    /// clean fill
    fn open_confirmed(ledger: &mut RiskLedger, rec: OpenRecord, tier: &AccountTier) -> Uuid {
        let id = rec.id;
        ledger.reserve(rec, tier).unwrap();
        ledger.confirm_open(id).unwrap();
        id
    }

    #[test]
    fn test_admit_when_healthy() {
        let ledger = RiskLedger::new(RiskLimits::default(), 1_000.0, Utc::now());
        assert!(ledger.can_admit("EURUSD", &tier(2), 15.0).is_ok());
    }

    #[test]
    fn test_reserve_spends_budget_once() {
        let now = Utc::now();
        let mut ledger = RiskLedger::new(RiskLimits::default(), 1_000.0, now);

        let id = open_confirmed(&mut ledger, record("EURUSD", 40.0), &tier(2));

        let snapshot = ledger.snapshot(now);
        assert!((snapshot.daily_risk_committed - 40.0).abs() < 1e-9);
        assert_eq!(snapshot.open_positions_by_instrument["EURUSD"], 1);
        // The reservation was consumed by the confirmation
        assert!(ledger.confirm_open(id).is_err());
    }

    #[test]
    fn test_pending_reservation_holds_budget_and_slots() {
        let now = Utc::now();
        // 6% of 1000 = $60 budget
        let mut ledger = RiskLedger::new(RiskLimits::default(), 1_000.0, now);

        ledger.reserve(record("EURUSD", 40.0), &tier(1)).unwrap();

        // An unfilled reservation spends budget and the instrument slot
        assert_eq!(
            ledger.can_admit("GBPUSD", &tier(1), 25.0),
            Err(AdmitBlock::DailyRiskBudget)
        );
        assert_eq!(
            ledger.can_admit("EURUSD", &tier(1), 1.0),
            Err(AdmitBlock::InstrumentLimit)
        );
    }

    #[test]
    fn test_release_refunds_failed_entry() {
        let now = Utc::now();
        let mut ledger = RiskLedger::new(RiskLimits::default(), 1_000.0, now);

        let rec = record("EURUSD", 40.0);
        let id = rec.id;
        ledger.reserve(rec, &tier(2)).unwrap();
        ledger.release(id).unwrap();

        let snapshot = ledger.snapshot(now);
        assert!(snapshot.daily_risk_committed.abs() < 1e-9);
        assert!(ledger.can_admit("GBPUSD", &tier(2), 59.0).is_ok());
        // The refund is one-shot
        assert!(ledger.release(id).is_err());
    }

    #[test]
    fn test_daily_loss_latches_until_next_day() {
        let now = Utc::now();
        let mut ledger = RiskLedger::new(RiskLimits::default(), 1_000.0, now);

        let id = open_confirmed(&mut ledger, record("EURUSD", 60.0), &tier(2));
        // -6% on 1000 day-start equity breaches the 5% daily limit
        ledger.record_close(id, -60.0, now).unwrap();

        assert_eq!(
            ledger.can_admit("EURUSD", &tier(2), 1.0),
            Err(AdmitBlock::DailyLossLimit)
        );
        // Every instrument is blocked, not just the loser
        assert_eq!(
            ledger.can_admit("V75", &tier(2), 1.0),
            Err(AdmitBlock::DailyLossLimit)
        );

        // Same-day roll does nothing
        ledger.roll_day(now);
        assert!(ledger.halted());

        // Next UTC day clears the latch
        ledger.roll_day(now + chrono::Duration::days(1));
        assert!(ledger.can_admit("EURUSD", &tier(2), 1.0).is_ok());
    }

    #[test]
    fn test_drawdown_latch_with_hysteresis() {
        let now = Utc::now();
        let mut ledger = RiskLedger::new(
            RiskLimits {
                max_daily_loss_pct: 0.90, // keep the daily latch out of the way
                max_drawdown_pct: 0.15,
                drawdown_recovery_pct: 0.05,
                max_daily_risk_pct: 1.0,
                max_consecutive_losses: 100,
                max_daily_trades: 100,
            },
            1_000.0,
            now,
        );

        // All three positions admitted while healthy; the loser trips the
        // latch and the winners walk equity back up
        let loser = open_confirmed(&mut ledger, record("EURUSD", 150.0), &tier(5));
        let first_winner = open_confirmed(&mut ledger, record("EURUSD", 0.0), &tier(5));
        let second_winner = open_confirmed(&mut ledger, record("EURUSD", 0.0), &tier(5));

        // 15% drawdown latches the breaker for all instruments
        ledger.record_close(loser, -150.0, now).unwrap();
        assert_eq!(
            ledger.can_admit("EURUSD", &tier(5), 1.0),
            Err(AdmitBlock::DrawdownLimit)
        );
        assert_eq!(
            ledger.can_admit("V75", &tier(5), 1.0),
            Err(AdmitBlock::DrawdownLimit)
        );

        // Partial recovery to 12% drawdown is inside the hysteresis band
        ledger.record_close(first_winner, 30.0, now).unwrap();
        assert_eq!(
            ledger.can_admit("EURUSD", &tier(5), 1.0),
            Err(AdmitBlock::DrawdownLimit)
        );

        // Recovery to 9% (< 15% - 5%) clears it
        ledger.record_close(second_winner, 30.0, now).unwrap();
        assert!(ledger.can_admit("EURUSD", &tier(5), 1.0).is_ok());
    }

    #[test]
    fn test_instrument_concurrency_limit() {
        let mut ledger = RiskLedger::new(RiskLimits::default(), 10_000.0, Utc::now());

        open_confirmed(&mut ledger, record("EURUSD", 10.0), &tier(2));
        open_confirmed(&mut ledger, record("EURUSD", 10.0), &tier(2));

        assert_eq!(
            ledger.can_admit("EURUSD", &tier(2), 10.0),
            Err(AdmitBlock::InstrumentLimit)
        );
        // Other instruments unaffected
        assert!(ledger.can_admit("GBPUSD", &tier(2), 10.0).is_ok());
    }

    #[test]
    fn test_daily_risk_budget_is_monotonic() {
        let now = Utc::now();
        // 6% of 1000 = $60 budget
        let mut ledger = RiskLedger::new(RiskLimits::default(), 1_000.0, now);

        let first = open_confirmed(&mut ledger, record("EURUSD", 40.0), &tier(2));

        assert!(ledger.can_admit("GBPUSD", &tier(2), 15.0).is_ok());
        assert_eq!(
            ledger.can_admit("GBPUSD", &tier(2), 25.0),
            Err(AdmitBlock::DailyRiskBudget)
        );

        // Closing the position does not refund the day's budget
        ledger.record_close(first, 5.0, now).unwrap();
        assert_eq!(
            ledger.can_admit("GBPUSD", &tier(2), 25.0),
            Err(AdmitBlock::DailyRiskBudget)
        );

        // The budget resets with the day
        ledger.roll_day(now + chrono::Duration::days(1));
        assert!(ledger.can_admit("GBPUSD", &tier(2), 25.0).is_ok());
    }

    #[test]
    fn test_consecutive_losses_block() {
        let now = Utc::now();
        let mut ledger = RiskLedger::new(
            RiskLimits {
                max_consecutive_losses: 2,
                max_daily_loss_pct: 0.90,
                ..Default::default()
            },
            10_000.0,
            now,
        );

        // All three admitted while healthy; two losers trip the block, the
        // remaining winner clears it
        let losers: Vec<Uuid> = (0..2)
            .map(|_| open_confirmed(&mut ledger, record("EURUSD", 1.0), &tier(5)))
            .collect();
        let winner = open_confirmed(&mut ledger, record("EURUSD", 1.0), &tier(5));

        for id in losers {
            ledger.record_close(id, -1.0, now).unwrap();
        }
        assert_eq!(
            ledger.can_admit("EURUSD", &tier(5), 1.0),
            Err(AdmitBlock::ConsecutiveLosses)
        );

        // A winner resets the streak
        ledger.record_close(winner, 2.0, now).unwrap();
        assert!(ledger.can_admit("EURUSD", &tier(5), 1.0).is_ok());
    }

    #[test]
    fn test_partial_close_reduces_group_risk() {
        let mut ledger = RiskLedger::new(RiskLimits::default(), 10_000.0, Utc::now());

        let id = open_confirmed(&mut ledger, record("EURUSD", 40.0), &tier(2));

        ledger.reduce_open_risk(id, 0.5).unwrap();

        let snapshot = ledger.snapshot(Utc::now());
        let group_risk = snapshot.open_risk_by_correlation_group["usd_majors"];
        assert!((group_risk - 20.0).abs() < 1e-9);
        // Spent daily budget is unchanged by the reduction
        assert!((snapshot.daily_risk_committed - 40.0).abs() < 1e-9);
    }

    #[test]
    fn test_snapshot_indexes_open_positions() {
        let mut ledger = RiskLedger::new(RiskLimits::default(), 10_000.0, Utc::now());

        open_confirmed(&mut ledger, record("EURUSD", 10.0), &tier(2));
        open_confirmed(&mut ledger, record("EURUSD", 10.0), &tier(2));
        open_confirmed(&mut ledger, record("V75", 10.0), &tier(2));

        let snapshot = ledger.snapshot(Utc::now());
        assert_eq!(snapshot.open_positions_by_instrument["EURUSD"], 2);
        assert_eq!(snapshot.open_positions_by_instrument["V75"], 1);
        assert!(!snapshot.daily_loss_limit_breached);
    }

    #[test]
    fn test_close_unknown_position_errors() {
        let mut ledger = RiskLedger::new(RiskLimits::default(), 10_000.0, Utc::now());
        assert!(ledger.record_close(Uuid::new_v4(), 1.0, Utc::now()).is_err());
    }

    #[test]
    fn test_serialized_opens_never_exceed_budget() {
        // Randomized interleaving: worker threads race to reserve through
        // the shared mutex; the committed total must stay within the daily
        // budget regardless of schedule.
        let now = Utc::now();
        let ledger = RiskLedger::new(RiskLimits::default(), 1_000.0, now).into_shared();
        let budget = 1_000.0 * RiskLimits::default().max_daily_risk_pct;

        let handles: Vec<_> = (0..8)
            .map(|worker| {
                let ledger = Arc::clone(&ledger);
                std::thread::spawn(move || {
                    for i in 0..50 {
                        let instrument = format!("PAIR{}", (worker + i) % 4);
                        let rec = OpenRecord {
                            id: Uuid::new_v4(),
                            instrument,
                            direction: Direction::Long,
                            risk_amount: 7.0,
                            correlation_group: None,
                        };
                        let id = rec.id;
                        let mut guard = ledger.lock().unwrap();
                        if guard.reserve(rec, &tier(100)).is_ok() {
                            guard.confirm_open(id).unwrap();
                        }
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        let guard = ledger.lock().unwrap();
        let snapshot = guard.snapshot(now);
        assert!(
            snapshot.daily_risk_committed <= budget + 1e-9,
            "committed {} exceeds budget {}",
            snapshot.daily_risk_committed,
            budget
        );
    }
}
