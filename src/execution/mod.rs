/// Broker execution boundary
///
/// Order placement and fills are asynchronous I/O against an external
/// collaborator; everything the engine knows about it is this trait. The
/// paper broker backs tests and paper-trading mode, with injectable timeouts
/// and rejections to exercise the retry paths.
use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::models::Direction;
use crate::Result;

/// Execution failure taxonomy
///
/// Timeouts are retried per policy and escalate to `Fatal` once retries are
/// exhausted; a fatal error forces an at-market close attempt.
#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("order rejected: {0}")]
    Rejected(String),
    #[error("execution timed out after {attempts} attempts")]
    Timeout { attempts: u32 },
    #[error("fatal execution failure for position {position_id}: {reason}")]
    Fatal { position_id: Uuid, reason: String },
}

#[derive(Debug, Clone)]
pub struct OrderRequest {
    pub instrument: String,
    pub direction: Direction,
    pub size: f64,
    pub stop_loss: f64,
    pub take_profit: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Fill {
    pub price: f64,
    pub executed_at: DateTime<Utc>,
}

/// Outcome of a single order submission
#[derive(Debug, Clone)]
pub enum OrderOutcome {
    Filled(Fill),
    Timeout,
    Rejected(String),
}

/// Order-execution API of the broker collaborator
#[async_trait]
pub trait ExecutionClient: Send + Sync {
    async fn open_position(&self, request: &OrderRequest) -> Result<OrderOutcome>;

    /// Close `size` units of the position; partial closes pass less than the
    /// full position size
    async fn close_position(&self, id: Uuid, size: f64) -> Result<OrderOutcome>;

    async fn account_equity(&self) -> Result<f64>;
}

struct PaperState {
    equity: f64,
    prices: HashMap<String, f64>,
    open_timeouts: u32,
    close_timeouts: u32,
    reject_reason: Option<String>,
}

/// In-process broker simulation
///
/// Fills at the posted price. Timeout and rejection injection drive the
/// lifecycle manager's retry and fatal paths in tests.
pub struct PaperBroker {
    state: Mutex<PaperState>,
}

impl PaperBroker {
    pub fn new(equity: f64) -> Self {
        Self {
            state: Mutex::new(PaperState {
                equity,
                prices: HashMap::new(),
                open_timeouts: 0,
                close_timeouts: 0,
                reject_reason: None,
            }),
        }
    }

    pub fn set_price(&self, instrument: &str, price: f64) {
        self.state
            .lock()
            .unwrap()
            .prices
            .insert(instrument.to_string(), price);
    }

    pub fn set_equity(&self, equity: f64) {
        self.state.lock().unwrap().equity = equity;
    }

    /// The next `n` open submissions time out before filling resumes
    pub fn inject_open_timeouts(&self, n: u32) {
        self.state.lock().unwrap().open_timeouts = n;
    }

    /// The next `n` close submissions time out before filling resumes
    pub fn inject_close_timeouts(&self, n: u32) {
        self.state.lock().unwrap().close_timeouts = n;
    }

    /// All subsequent opens are rejected with the given reason
    pub fn reject_opens(&self, reason: &str) {
        self.state.lock().unwrap().reject_reason = Some(reason.to_string());
    }
}

#[async_trait]
impl ExecutionClient for PaperBroker {
    async fn open_position(&self, request: &OrderRequest) -> Result<OrderOutcome> {
        let mut state = self.state.lock().unwrap();

        if state.open_timeouts > 0 {
            state.open_timeouts -= 1;
            return Ok(OrderOutcome::Timeout);
        }
        if let Some(reason) = &state.reject_reason {
            return Ok(OrderOutcome::Rejected(reason.clone()));
        }

        match state.prices.get(&request.instrument) {
            Some(&price) => Ok(OrderOutcome::Filled(Fill {
                price,
                executed_at: Utc::now(),
            })),
            None => Ok(OrderOutcome::Rejected(format!(
                "no market for {}",
                request.instrument
            ))),
        }
    }

    async fn close_position(&self, _id: Uuid, _size: f64) -> Result<OrderOutcome> {
        let mut state = self.state.lock().unwrap();

        if state.close_timeouts > 0 {
            state.close_timeouts -= 1;
            return Ok(OrderOutcome::Timeout);
        }

        Ok(OrderOutcome::Filled(Fill {
            price: 0.0,
            executed_at: Utc::now(),
        }))
    }

    async fn account_equity(&self) -> Result<f64> {
        Ok(self.state.lock().unwrap().equity)
    }
}
