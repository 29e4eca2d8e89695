/// Trade lifecycle state machine
///
/// Every position moves `PendingEntry -> Open -> Closing -> Closed`; entry
/// failure short-circuits straight to `Closed` with reason `EntryFailed`, so
/// nothing is ever silently dropped. The manager owns positions exclusively;
/// the risk ledger holds each entry's reservation, which the manager
/// promotes on fill or refunds on failure, and otherwise only sees
/// reduce/close events.
use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::sleep;
use uuid::Uuid;

use crate::execution::{ExecutionClient, ExecutionError, Fill, OrderOutcome, OrderRequest};
use crate::models::{Direction, Instrument};
use crate::risk::SharedLedger;
use crate::strategy::{RiskParams, TakeProfitSpec};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PositionStatus {
    PendingEntry,
    Open,
    Closing,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CloseReason {
    TakeProfit,
    StopLoss,
    Aged,
    Manual,
    StrategyReversal,
    EntryFailed,
}

/// One take-profit level; `fraction` is the share of the original size to
/// close when the level is crossed (1.0 closes whatever remains)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TakeProfitTarget {
    pub price: f64,
    pub fraction: f64,
    pub hit: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub id: Uuid,
    pub instrument: String,
    pub direction: Direction,
    pub entry_price: f64,
    pub size: f64,
    pub initial_size: f64,
    pub stop_loss: f64,
    pub take_profits: Vec<TakeProfitTarget>,
    pub opened_at: DateTime<Utc>,
    pub status: PositionStatus,
    pub close_reason: Option<CloseReason>,
    pub exit_price: Option<f64>,
    pub closed_at: Option<DateTime<Utc>>,
    /// Accumulated over partial and final closes
    pub realized_pnl: f64,
    pub ageing_deadline: DateTime<Utc>,
    pub next_re_evaluation: DateTime<Utc>,
    /// Set when close retries exhausted and the position had to be forced
    /// out at market
    pub fatal_error: Option<String>,
    pip_size: f64,
    pip_value_per_lot: f64,
}

impl Position {
    pub fn is_open(&self) -> bool {
        self.status == PositionStatus::Open
    }

    /// P&L of closing `lots` at `price`
    fn pnl_for(&self, price: f64, lots: f64) -> f64 {
        let pips = (price - self.entry_price) / self.pip_size * self.direction.sign();
        pips * self.pip_value_per_lot * lots
    }

    fn crossed(&self, price: f64, level: f64, upward_for_long: bool) -> bool {
        match (self.direction, upward_for_long) {
            (Direction::Long, true) | (Direction::Short, false) => price >= level,
            (Direction::Long, false) | (Direction::Short, true) => price <= level,
        }
    }

    fn stop_hit(&self, price: f64) -> bool {
        self.crossed(price, self.stop_loss, false)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LifecycleConfig {
    pub retry_attempts: u32,
    pub retry_delay_ms: u64,
    pub re_evaluation_interval_minutes: i64,
    /// Positions older than this are closed as aged
    pub max_position_age_hours: i64,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            retry_attempts: 3,
            retry_delay_ms: 500,
            re_evaluation_interval_minutes: 15,
            max_position_age_hours: 48,
        }
    }
}

/// Approved entry handed over by the orchestration loop
///
/// The ledger already holds a risk reservation under `id`; the manager
/// promotes it when the fill confirms, or refunds it when the entry fails.
#[derive(Debug, Clone)]
pub struct EntryPlan {
    pub id: Uuid,
    pub instrument: Instrument,
    pub direction: Direction,
    pub lots: f64,
    pub stop_pips: f64,
    pub risk: RiskParams,
}

pub struct TradeLifecycleManager {
    config: LifecycleConfig,
    client: Arc<dyn ExecutionClient>,
    ledger: SharedLedger,
    positions: HashMap<Uuid, Position>,
}

impl TradeLifecycleManager {
    pub fn new(
        config: LifecycleConfig,
        client: Arc<dyn ExecutionClient>,
        ledger: SharedLedger,
    ) -> Self {
        Self {
            config,
            client,
            ledger,
            positions: HashMap::new(),
        }
    }

    pub fn get(&self, id: Uuid) -> Option<&Position> {
        self.positions.get(&id)
    }

    pub fn open_positions(&self) -> Vec<&Position> {
        self.positions.values().filter(|p| p.is_open()).collect()
    }

    /// Positions that reached a fatal execution error
    pub fn fatal_positions(&self) -> Vec<&Position> {
        self.positions
            .values()
            .filter(|p| p.fatal_error.is_some())
            .collect()
    }

    /// Drain closed positions for archiving; the terminal records leave the
    /// manager once their effect is in the ledger
    pub fn take_closed(&mut self) -> Vec<Position> {
        let closed_ids: Vec<Uuid> = self
            .positions
            .values()
            .filter(|p| p.status == PositionStatus::Closed)
            .map(|p| p.id)
            .collect();

        closed_ids
            .into_iter()
            .filter_map(|id| self.positions.remove(&id))
            .collect()
    }

    /// Submit an approved entry and track the resulting position
    ///
    /// The position exists from the first submission attempt; fill failure or
    /// retry exhaustion lands it in `Closed`/`EntryFailed` and refunds the
    /// ledger reservation rather than dropping it.
    pub async fn open(&mut self, plan: EntryPlan, now: DateTime<Utc>) -> Uuid {
        let id = plan.id;
        let stop_distance = plan.instrument.pips_to_price(plan.stop_pips);

        let position = Position {
            id,
            instrument: plan.instrument.symbol.clone(),
            direction: plan.direction,
            entry_price: 0.0,
            size: plan.lots,
            initial_size: plan.lots,
            stop_loss: 0.0,
            take_profits: Vec::new(),
            opened_at: now,
            status: PositionStatus::PendingEntry,
            close_reason: None,
            exit_price: None,
            closed_at: None,
            realized_pnl: 0.0,
            ageing_deadline: now + Duration::hours(self.config.max_position_age_hours),
            next_re_evaluation: now
                + Duration::minutes(self.config.re_evaluation_interval_minutes),
            fatal_error: None,
            pip_size: plan.instrument.pip_size,
            pip_value_per_lot: plan.instrument.pip_value_per_lot,
        };
        self.positions.insert(id, position);

        // Indicative prices; the real levels are anchored on the fill
        let request = OrderRequest {
            instrument: plan.instrument.symbol.clone(),
            direction: plan.direction,
            size: plan.lots,
            stop_loss: stop_distance,
            take_profit: None,
        };

        match self.submit_entry(&request).await {
            Ok(fill) => self.confirm_entry(id, &plan, fill, stop_distance),
            Err(err) => {
                tracing::warn!(
                    position = %id,
                    instrument = %plan.instrument.symbol,
                    error = %err,
                    "entry failed, position closed without fill"
                );
                let position = self.positions.get_mut(&id).expect("position just inserted");
                position.status = PositionStatus::Closed;
                position.close_reason = Some(CloseReason::EntryFailed);
                position.closed_at = Some(Utc::now());

                if let Err(e) = self.ledger.lock().unwrap().release(id) {
                    tracing::error!(position = %id, error = %e, "reservation release failed");
                }
            }
        }

        id
    }

    fn confirm_entry(&mut self, id: Uuid, plan: &EntryPlan, fill: Fill, stop_distance: f64) {
        let sign = plan.direction.sign();
        let take_profits = build_targets(&plan.risk, fill.price, stop_distance, sign);

        let position = self.positions.get_mut(&id).expect("position just inserted");
        position.entry_price = fill.price;
        position.stop_loss = fill.price - sign * stop_distance;
        position.take_profits = take_profits;
        position.opened_at = fill.executed_at;
        position.status = PositionStatus::Open;

        tracing::info!(
            position = %id,
            instrument = %position.instrument,
            direction = ?position.direction,
            lots = position.size,
            entry = position.entry_price,
            stop = position.stop_loss,
            "entry filled"
        );

        if let Err(e) = self.ledger.lock().unwrap().confirm_open(id) {
            tracing::error!(position = %id, error = %e, "ledger open confirmation failed");
        }
    }

    async fn submit_entry(&self, request: &OrderRequest) -> Result<Fill, ExecutionError> {
        for attempt in 1..=self.config.retry_attempts {
            match self.client.open_position(request).await {
                Ok(OrderOutcome::Filled(fill)) => return Ok(fill),
                Ok(OrderOutcome::Rejected(reason)) => {
                    return Err(ExecutionError::Rejected(reason))
                }
                Ok(OrderOutcome::Timeout) => {
                    tracing::warn!(
                        instrument = %request.instrument,
                        attempt,
                        of = self.config.retry_attempts,
                        "entry submission timed out"
                    );
                }
                Err(e) => return Err(ExecutionError::Rejected(e.to_string())),
            }
            if attempt < self.config.retry_attempts {
                sleep(std::time::Duration::from_millis(self.config.retry_delay_ms)).await;
            }
        }

        Err(ExecutionError::Timeout {
            attempts: self.config.retry_attempts,
        })
    }

    /// Re-evaluate open positions against current prices
    ///
    /// Positions are only reassessed once their re-evaluation interval has
    /// elapsed. Returns the ids of positions that reached `Closed` this pass.
    pub async fn manage(
        &mut self,
        prices: &HashMap<String, f64>,
        now: DateTime<Utc>,
    ) -> Vec<Uuid> {
        let due: Vec<Uuid> = self
            .positions
            .values()
            .filter(|p| p.is_open() && now >= p.next_re_evaluation)
            .filter(|p| prices.contains_key(&p.instrument))
            .map(|p| p.id)
            .collect();

        let mut closed = Vec::new();
        for id in due {
            let price = {
                let position = &self.positions[&id];
                prices[&position.instrument]
            };

            if let Some(position) = self.positions.get_mut(&id) {
                position.next_re_evaluation =
                    now + Duration::minutes(self.config.re_evaluation_interval_minutes);
            }

            if self.re_evaluate(id, price, now).await {
                closed.push(id);
            }
        }

        closed
    }

    /// Returns true when the position reached `Closed`
    async fn re_evaluate(&mut self, id: Uuid, price: f64, now: DateTime<Utc>) -> bool {
        let (stop_hit, aged) = {
            let position = &self.positions[&id];
            (position.stop_hit(price), now >= position.ageing_deadline)
        };

        if stop_hit {
            self.close(id, price, CloseReason::StopLoss, now).await;
            return true;
        }

        if let Some(full_exit) = self.check_take_profits(id, price, now).await {
            return full_exit;
        }

        if aged {
            self.close(id, price, CloseReason::Aged, now).await;
            return true;
        }

        false
    }

    /// Walk unhit take-profit targets; partial targets shrink the position
    /// and its ledger risk, the final target closes it
    ///
    /// Returns Some(true) when the position fully closed, Some(false) when a
    /// partial was taken, None when no target was crossed.
    async fn check_take_profits(
        &mut self,
        id: Uuid,
        price: f64,
        now: DateTime<Utc>,
    ) -> Option<bool> {
        let (target_index, close_lots, remaining_after) = {
            let position = &self.positions[&id];
            let index = position
                .take_profits
                .iter()
                .position(|t| !t.hit && position.crossed(price, t.price, true))?;

            let target = &position.take_profits[index];
            let requested = position.initial_size * target.fraction;
            let close_lots = requested.min(position.size);
            (index, close_lots, position.size - close_lots)
        };

        if remaining_after <= f64::EPSILON {
            self.close(id, price, CloseReason::TakeProfit, now).await;
            return Some(true);
        }

        // Partial close: the position stays open with reduced size
        match self.submit_close(id, close_lots).await {
            Ok(_) => {
                let (pnl, closed_fraction) = {
                    let position = self.positions.get_mut(&id).expect("position exists");
                    let pnl = position.pnl_for(price, close_lots);
                    let closed_fraction = close_lots / position.size;
                    position.take_profits[target_index].hit = true;
                    position.size -= close_lots;
                    position.realized_pnl += pnl;
                    (pnl, closed_fraction)
                };

                tracing::info!(
                    position = %id,
                    closed_lots = close_lots,
                    pnl = format!("{:.2}", pnl),
                    "partial take-profit filled"
                );

                if let Err(e) = self
                    .ledger
                    .lock()
                    .unwrap()
                    .reduce_open_risk(id, closed_fraction)
                {
                    tracing::error!(position = %id, error = %e, "ledger risk reduction failed");
                }

                Some(false)
            }
            Err(err) => {
                // A failed partial leaves the position whole; the full-exit
                // paths still protect it
                tracing::warn!(position = %id, error = %err, "partial close failed, keeping full size");
                None
            }
        }
    }

    /// Close a position at the current market price
    ///
    /// Retries per policy; exhaustion surfaces a fatal execution error, is
    /// logged as a risk event, and the position is forced out at market
    /// rather than left open unmonitored.
    pub async fn close(
        &mut self,
        id: Uuid,
        price: f64,
        reason: CloseReason,
        now: DateTime<Utc>,
    ) {
        let size = match self.positions.get_mut(&id) {
            Some(position) if position.status == PositionStatus::Open => {
                position.status = PositionStatus::Closing;
                position.size
            }
            _ => return,
        };

        let exit_price = match self.submit_close(id, size).await {
            Ok(fill) => {
                // Paper fills report no meaningful price for closes; fall
                // back to the observed market price
                if fill.price > 0.0 {
                    fill.price
                } else {
                    price
                }
            }
            Err(err) => {
                let fatal = ExecutionError::Fatal {
                    position_id: id,
                    reason: err.to_string(),
                };
                tracing::error!(
                    position = %id,
                    error = %fatal,
                    "close retries exhausted, forcing at-market close"
                );

                if let Some(position) = self.positions.get_mut(&id) {
                    position.fatal_error = Some(fatal.to_string());
                }

                // Forced attempt; the position is finalized regardless so open
                // risk is never silently abandoned
                match self.client.close_position(id, size).await {
                    Ok(OrderOutcome::Filled(fill)) if fill.price > 0.0 => fill.price,
                    _ => {
                        tracing::error!(
                            position = %id,
                            "forced market close unconfirmed, finalizing at last observed price"
                        );
                        price
                    }
                }
            }
        };

        self.finalize_close(id, exit_price, reason, now);
    }

    /// Operator-initiated close
    pub async fn close_manual(&mut self, id: Uuid, price: f64, now: DateTime<Utc>) {
        self.close(id, price, CloseReason::Manual, now).await;
    }

    async fn submit_close(&self, id: Uuid, size: f64) -> Result<Fill, ExecutionError> {
        for attempt in 1..=self.config.retry_attempts {
            match self.client.close_position(id, size).await {
                Ok(OrderOutcome::Filled(fill)) => return Ok(fill),
                Ok(OrderOutcome::Rejected(reason)) => {
                    return Err(ExecutionError::Rejected(reason))
                }
                Ok(OrderOutcome::Timeout) => {
                    tracing::warn!(
                        position = %id,
                        attempt,
                        of = self.config.retry_attempts,
                        "close submission timed out"
                    );
                }
                Err(e) => return Err(ExecutionError::Rejected(e.to_string())),
            }
            if attempt < self.config.retry_attempts {
                sleep(std::time::Duration::from_millis(self.config.retry_delay_ms)).await;
            }
        }

        Err(ExecutionError::Timeout {
            attempts: self.config.retry_attempts,
        })
    }

    fn finalize_close(&mut self, id: Uuid, exit_price: f64, reason: CloseReason, now: DateTime<Utc>) {
        let total_pnl = {
            let position = match self.positions.get_mut(&id) {
                Some(p) => p,
                None => return,
            };

            let final_pnl = position.pnl_for(exit_price, position.size);
            position.realized_pnl += final_pnl;
            position.status = PositionStatus::Closed;
            position.close_reason = Some(reason);
            position.exit_price = Some(exit_price);
            position.closed_at = Some(now);
            position.size = 0.0;

            tracing::info!(
                position = %id,
                instrument = %position.instrument,
                reason = ?reason,
                exit = exit_price,
                pnl = format!("{:.2}", position.realized_pnl),
                "position closed"
            );

            position.realized_pnl
        };

        if let Err(e) = self.ledger.lock().unwrap().record_close(id, total_pnl, now) {
            tracing::error!(position = %id, error = %e, "ledger close failed");
        }
    }
}

fn build_targets(
    risk: &RiskParams,
    entry_price: f64,
    stop_distance: f64,
    sign: f64,
) -> Vec<TakeProfitTarget> {
    match &risk.take_profit {
        TakeProfitSpec::Single => vec![TakeProfitTarget {
            price: entry_price + sign * stop_distance * risk.risk_reward_ratio,
            fraction: 1.0,
            hit: false,
        }],
        TakeProfitSpec::Scaled {
            second_rr,
            partial_fraction,
        } => vec![
            TakeProfitTarget {
                price: entry_price + sign * stop_distance * risk.risk_reward_ratio,
                fraction: *partial_fraction,
                hit: false,
            },
            TakeProfitTarget {
                price: entry_price + sign * stop_distance * second_rr,
                fraction: 1.0,
                hit: false,
            },
        ],
    }
}
