/// Orchestration loop and command surface
///
/// One evaluation cycle per instrument per tick: classify, select, admit,
/// size, open. Cycles for independent instruments run as concurrent tasks;
/// all ledger mutations serialize through its mutex. A halt (operator command
/// or circuit breaker) blocks new entries immediately while in-flight closes
/// keep running, so open risk is never abandoned.
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::MissedTickBehavior;
use uuid::Uuid;

use crate::classifier::{MarketClassifier, MarketCondition};
use crate::config::AppConfig;
use crate::correlation::CorrelationManager;
use crate::execution::ExecutionClient;
use crate::feed::MarketFeed;
use crate::lifecycle::{CloseReason, EntryPlan, Position, TradeLifecycleManager};
use crate::models::Instrument;
use crate::persistence::RedisStore;
use crate::risk::{LedgerSnapshot, OpenRecord, RiskLedger, SharedLedger};
use crate::sizing::{PositionSizer, SizeDecision, TierTable};
use crate::strategy::{select_strategy, SelectionConfig, StrategyCatalog};

/// Archive maintenance cadence, counted in evaluation ticks
const CLEANUP_INTERVAL_TICKS: u32 = 60;
/// Closed positions stay in the archive this long
const ARCHIVE_KEEP_HOURS: u64 = 7 * 24;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    pub evaluation_interval_secs: u64,
    /// Bars fetched per cycle for classification and signals
    pub history_bars: usize,
    /// Bars of history used to build correlation return series
    pub correlation_lookback_bars: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            evaluation_interval_secs: 60,
            history_bars: 150,
            correlation_lookback_bars: 200,
        }
    }
}

/// Operator-selected risk appetite, applied as a scale on the tier's
/// per-trade risk fraction
///
/// Scaling happens before sizing, so the tier lot cap, the spread gates and
/// every ledger check still apply at full strength.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Conservative,
    Standard,
    Aggressive,
}

impl Default for RiskLevel {
    fn default() -> Self {
        RiskLevel::Standard
    }
}

impl RiskLevel {
    pub fn risk_scale(&self) -> f64 {
        match self {
            RiskLevel::Conservative => 0.5,
            RiskLevel::Standard => 1.0,
            RiskLevel::Aggressive => 1.5,
        }
    }
}

/// What one evaluation cycle decided for an instrument
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Trading disabled for this instrument or globally
    Disabled,
    /// Classifier or selector produced nothing tradeable (benign)
    NoSelection,
    /// Strategy selected but its signal was Hold
    Hold,
    /// A correlation, risk or sizing rule refused the entry
    AdmissionRejected(String),
    /// An open position was closed against the new signal
    Reversed(Uuid),
    Opened(Uuid),
}

/// Read-only status feed for the dashboard collaborator
///
/// `selections` with `None` is the benign "no strategy this cycle";
/// `circuit_breaker_tripped` and `execution_fatals` are the states that
/// require attention.
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub generated_at: DateTime<Utc>,
    pub trading_enabled: bool,
    pub risk_level: RiskLevel,
    pub circuit_breaker_tripped: bool,
    pub conditions: HashMap<String, MarketCondition>,
    pub selections: HashMap<String, Option<String>>,
    pub ledger: LedgerSnapshot,
    pub open_positions: Vec<Position>,
    pub execution_fatals: Vec<(Uuid, String)>,
}

struct Controls {
    trading_enabled: AtomicBool,
    active: Mutex<HashSet<String>>,
    risk_level: Mutex<RiskLevel>,
}

/// Command surface exposed to the dashboard collaborator
///
/// Commands only flip orchestration enablement flags; admission checks are
/// never bypassed.
#[derive(Clone)]
pub struct EngineHandle {
    controls: Arc<Controls>,
}

impl EngineHandle {
    pub fn start_trading(&self, instruments: Option<&[String]>, risk_level: Option<RiskLevel>) {
        if let Some(list) = instruments {
            let mut active = self.controls.active.lock().unwrap();
            active.clear();
            active.extend(list.iter().cloned());
        }
        if let Some(level) = risk_level {
            *self.controls.risk_level.lock().unwrap() = level;
        }
        let level = *self.controls.risk_level.lock().unwrap();
        self.controls.trading_enabled.store(true, Ordering::SeqCst);
        tracing::info!(risk_level = ?level, "trading started");
    }

    /// Close-only mode: no new entries, in-flight exits continue
    pub fn stop_trading(&self) {
        self.controls.trading_enabled.store(false, Ordering::SeqCst);
        tracing::info!("trading stopped, close-only mode");
    }

    pub fn toggle_instrument(&self, symbol: &str, active: bool) {
        let mut set = self.controls.active.lock().unwrap();
        if active {
            set.insert(symbol.to_string());
        } else {
            set.remove(symbol);
        }
        tracing::info!(symbol, active, "instrument toggled");
    }
}

pub struct Engine {
    config: EngineConfig,
    instruments: Vec<Instrument>,
    classifier: Mutex<MarketClassifier>,
    catalog: StrategyCatalog,
    selection: SelectionConfig,
    correlation: RwLock<CorrelationManager>,
    sizer: PositionSizer,
    tiers: TierTable,
    ledger: SharedLedger,
    lifecycle: tokio::sync::Mutex<TradeLifecycleManager>,
    feed: Arc<dyn MarketFeed>,
    store: Option<tokio::sync::Mutex<RedisStore>>,
    controls: Arc<Controls>,
    conditions: Mutex<HashMap<String, MarketCondition>>,
    selections: Mutex<HashMap<String, Option<String>>>,
}

impl Engine {
    pub fn from_config(
        config: &AppConfig,
        feed: Arc<dyn MarketFeed>,
        broker: Arc<dyn ExecutionClient>,
        store: Option<RedisStore>,
    ) -> Self {
        let ledger = RiskLedger::new(
            config.risk.clone(),
            config.starting_balance,
            Utc::now(),
        )
        .into_shared();

        let lifecycle = TradeLifecycleManager::new(
            config.lifecycle.clone(),
            broker,
            Arc::clone(&ledger),
        );

        let active: HashSet<String> = config
            .instruments
            .iter()
            .map(|i| i.symbol.clone())
            .collect();

        Self {
            config: config.engine.clone(),
            instruments: config.instruments.clone(),
            classifier: Mutex::new(MarketClassifier::new(config.classifier.clone())),
            catalog: config.catalog(),
            selection: config.selection.clone(),
            correlation: RwLock::new(CorrelationManager::new(config.correlation.clone())),
            sizer: PositionSizer::new(config.sizer.clone()),
            tiers: config.tier_table(),
            ledger,
            lifecycle: tokio::sync::Mutex::new(lifecycle),
            feed,
            store: store.map(tokio::sync::Mutex::new),
            controls: Arc::new(Controls {
                trading_enabled: AtomicBool::new(false),
                active: Mutex::new(active),
                risk_level: Mutex::new(RiskLevel::default()),
            }),
            conditions: Mutex::new(HashMap::new()),
            selections: Mutex::new(HashMap::new()),
        }
    }

    pub fn handle(&self) -> EngineHandle {
        EngineHandle {
            controls: Arc::clone(&self.controls),
        }
    }

    fn instrument_enabled(&self, symbol: &str) -> bool {
        self.controls.trading_enabled.load(Ordering::SeqCst)
            && self.controls.active.lock().unwrap().contains(symbol)
    }

    /// One evaluation cycle for one instrument
    pub async fn run_cycle(
        &self,
        instrument: &Instrument,
        now: DateTime<Utc>,
    ) -> crate::Result<CycleOutcome> {
        let symbol = instrument.symbol.as_str();

        self.ledger.lock().unwrap().roll_day(now);

        if !self.instrument_enabled(symbol) {
            return Ok(CycleOutcome::Disabled);
        }

        let candles = self.feed.candles(symbol, self.config.history_bars).await?;
        let quote = self.feed.quote(symbol).await?;

        let condition = self
            .classifier
            .lock()
            .unwrap()
            .classify(instrument, &candles, &quote, now);
        self.conditions
            .lock()
            .unwrap()
            .insert(symbol.to_string(), condition.clone());

        let selected = select_strategy(&condition, &self.catalog, &self.selection);
        self.selections
            .lock()
            .unwrap()
            .insert(symbol.to_string(), selected.map(|s| s.name.clone()));

        let Some(spec) = selected else {
            tracing::debug!(instrument = symbol, "no strategy selected this cycle");
            return Ok(CycleOutcome::NoSelection);
        };

        let signal = match spec.build().generate_signal(&candles) {
            Ok(signal) => signal,
            Err(e) => {
                tracing::debug!(instrument = symbol, strategy = %spec.name, error = %e, "signal generation degraded");
                return Ok(CycleOutcome::NoSelection);
            }
        };

        let Some(direction) = signal.direction() else {
            return Ok(CycleOutcome::Hold);
        };

        // A signal against an open position closes it instead of stacking a
        // hedge on top
        {
            let mut lifecycle = self.lifecycle.lock().await;
            let opposing = lifecycle
                .open_positions()
                .iter()
                .find(|p| p.instrument == symbol && p.direction != direction)
                .map(|p| p.id);

            if let Some(id) = opposing {
                tracing::info!(instrument = symbol, position = %id, "signal reversal, closing open position");
                lifecycle
                    .close(id, quote.mid(), CloseReason::StrategyReversal, now)
                    .await;
                return Ok(CycleOutcome::Reversed(id));
            }
        }

        let exposure = self.ledger.lock().unwrap().open_exposure();
        let admission = self
            .correlation
            .read()
            .unwrap()
            .can_open(symbol, direction, &exposure);
        if !admission.allowed {
            tracing::info!(instrument = symbol, reason = %admission.reason, "correlation admission rejected");
            return Ok(CycleOutcome::AdmissionRejected(admission.reason));
        }

        let equity = self.ledger.lock().unwrap().equity();
        let Some(mut tier) = self.tiers.tier_for(equity).cloned() else {
            return Ok(CycleOutcome::AdmissionRejected(format!(
                "no account tier covers equity {equity:.2}"
            )));
        };
        // Operator risk appetite scales the risk fraction only; the tier's
        // lot cap and the ledger's budgets are untouched
        tier.risk_percent_per_trade *= self.controls.risk_level.lock().unwrap().risk_scale();

        let sized = match self.sizer.size(
            equity,
            &tier,
            &spec.risk,
            instrument,
            direction,
            &candles,
            &quote,
        ) {
            SizeDecision::Sized(sized) => sized,
            SizeDecision::Untradeable(reason) => {
                tracing::info!(instrument = symbol, reason = %reason, "sizing rejected entry");
                return Ok(CycleOutcome::AdmissionRejected(reason));
            }
        };

        // Risk actually committed by the clamped size, not the theoretical
        // tier risk
        let risk_amount = sized.lots * sized.stop_pips * instrument.pip_value_per_lot;

        let plan = EntryPlan {
            id: Uuid::new_v4(),
            instrument: instrument.clone(),
            direction,
            lots: sized.lots,
            stop_pips: sized.stop_pips,
            risk: spec.risk.clone(),
        };

        // Admission checks and the budget debit are one ledger critical
        // section; the lifecycle manager reconciles the reservation on fill
        // or failure
        let reservation = OpenRecord {
            id: plan.id,
            instrument: symbol.to_string(),
            direction,
            risk_amount,
            correlation_group: self.group_for(symbol),
        };
        if let Err(block) = self.ledger.lock().unwrap().reserve(reservation, &tier) {
            if block.is_circuit_breaker() {
                tracing::warn!(instrument = symbol, reason = %block, "circuit breaker blocked entry");
            } else {
                tracing::info!(instrument = symbol, reason = %block, "ledger rejected entry");
            }
            return Ok(CycleOutcome::AdmissionRejected(block.to_string()));
        }

        tracing::info!(
            instrument = symbol,
            strategy = %spec.name,
            ?direction,
            lots = sized.lots,
            stop_pips = sized.stop_pips,
            "entry approved"
        );

        let id = self.lifecycle.lock().await.open(plan, now).await;
        Ok(CycleOutcome::Opened(id))
    }

    fn group_for(&self, symbol: &str) -> Option<String> {
        self.correlation
            .read()
            .unwrap()
            .config()
            .groups
            .iter()
            .find(|g| g.members.iter().any(|m| m == symbol))
            .map(|g| g.name.clone())
    }

    /// Re-evaluate open positions and archive the ones that closed
    ///
    /// Runs regardless of the halt flag: exits must keep flowing in
    /// close-only mode.
    pub async fn manage_positions(&self, now: DateTime<Utc>) {
        let mut prices = HashMap::new();
        for instrument in &self.instruments {
            if let Ok(quote) = self.feed.quote(&instrument.symbol).await {
                prices.insert(instrument.symbol.clone(), quote.mid());
            }
        }

        let closed = {
            let mut lifecycle = self.lifecycle.lock().await;
            lifecycle.manage(&prices, now).await;
            lifecycle.take_closed()
        };

        if closed.is_empty() {
            return;
        }

        if let Some(store) = &self.store {
            let mut store = store.lock().await;
            for position in &closed {
                if let Err(e) = store.archive_position(position).await {
                    tracing::warn!(position = %position.id, error = %e, "failed to archive position");
                }
            }
            let snapshot = self.ledger.lock().unwrap().snapshot(now);
            if let Err(e) = store.save_snapshot(&snapshot).await {
                tracing::warn!(error = %e, "failed to save ledger snapshot");
            }
        }
    }

    /// Rebuild the correlation matrix from feed history when due
    pub async fn refresh_correlation(&self, now: DateTime<Utc>) {
        if !self.correlation.read().unwrap().needs_refresh(now) {
            return;
        }

        let mut returns: HashMap<String, Vec<f64>> = HashMap::new();
        for instrument in &self.instruments {
            match self
                .feed
                .candles(&instrument.symbol, self.config.correlation_lookback_bars)
                .await
            {
                Ok(candles) => {
                    let series: Vec<f64> = candles
                        .windows(2)
                        .map(|pair| (pair[1].close - pair[0].close) / pair[0].close)
                        .collect();
                    returns.insert(instrument.symbol.clone(), series);
                }
                Err(e) => {
                    tracing::warn!(instrument = %instrument.symbol, error = %e, "no history for correlation refresh");
                }
            }
        }

        self.correlation.write().unwrap().refresh(&returns, now);
    }

    /// Prune archived positions past the retention window
    pub async fn cleanup_archive(&self) {
        let Some(store) = &self.store else { return };

        let mut store = store.lock().await;
        for instrument in &self.instruments {
            if let Err(e) = store
                .cleanup_old(&instrument.symbol, ARCHIVE_KEEP_HOURS)
                .await
            {
                tracing::warn!(instrument = %instrument.symbol, error = %e, "archive cleanup failed");
            }
        }
    }

    pub async fn status(&self, now: DateTime<Utc>) -> StatusReport {
        let (ledger_snapshot, breaker) = {
            let ledger = self.ledger.lock().unwrap();
            (ledger.snapshot(now), ledger.halted())
        };

        let (open_positions, execution_fatals) = {
            let lifecycle = self.lifecycle.lock().await;
            let open: Vec<Position> =
                lifecycle.open_positions().into_iter().cloned().collect();
            let fatals = lifecycle
                .fatal_positions()
                .into_iter()
                .map(|p| (p.id, p.fatal_error.clone().unwrap_or_default()))
                .collect();
            (open, fatals)
        };

        StatusReport {
            generated_at: now,
            trading_enabled: self.controls.trading_enabled.load(Ordering::SeqCst),
            risk_level: *self.controls.risk_level.lock().unwrap(),
            circuit_breaker_tripped: breaker,
            conditions: self.conditions.lock().unwrap().clone(),
            selections: self.selections.lock().unwrap().clone(),
            ledger: ledger_snapshot,
            open_positions,
            execution_fatals,
        }
    }

    /// Main loop: evaluation cycles per instrument as concurrent tasks, then
    /// position management and archiving
    pub async fn run(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(std::time::Duration::from_secs(
            self.config.evaluation_interval_secs,
        ));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let mut tick: u32 = 0;
        loop {
            ticker.tick().await;
            tick = tick.wrapping_add(1);
            let now = Utc::now();

            self.refresh_correlation(now).await;

            let mut tasks = Vec::with_capacity(self.instruments.len());
            for instrument in self.instruments.clone() {
                let engine = Arc::clone(&self);
                tasks.push(tokio::spawn(async move {
                    match engine.run_cycle(&instrument, Utc::now()).await {
                        Ok(outcome) => {
                            tracing::debug!(instrument = %instrument.symbol, ?outcome, "cycle complete")
                        }
                        Err(e) => {
                            tracing::warn!(instrument = %instrument.symbol, error = %e, "cycle failed")
                        }
                    }
                }));
            }
            for task in tasks {
                let _ = task.await;
            }

            self.manage_positions(Utc::now()).await;

            if tick % CLEANUP_INTERVAL_TICKS == 0 {
                self.cleanup_archive().await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::PaperBroker;
    use crate::feed::{FeedScenario, SyntheticFeed};

    fn test_engine(scenario: FeedScenario) -> (Arc<Engine>, Arc<PaperBroker>) {
        let mut config = AppConfig::default();
        config.classifier.min_trading_confidence = 40.0;
        config.selection.min_confidence = 40.0;
        config.lifecycle.retry_delay_ms = 1;

        let feed = Arc::new(SyntheticFeed::new(42));
        for instrument in &config.instruments {
            let base = if instrument.symbol == "USDJPY" {
                150.0
            } else if instrument.symbol == "V75" {
                1_000.0
            } else {
                1.1
            };
            feed.register(instrument, scenario, base, 5);
        }

        let broker = Arc::new(PaperBroker::new(config.starting_balance));
        for instrument in &config.instruments {
            broker.set_price(&instrument.symbol, 1.1);
        }

        let engine = Engine::from_config(
            &config,
            feed as Arc<dyn MarketFeed>,
            broker.clone() as Arc<dyn ExecutionClient>,
            None,
        );
        (Arc::new(engine), broker)
    }

    fn eurusd() -> Instrument {
        Instrument {
            symbol: "EURUSD".to_string(),
            pip_size: 0.0001,
            pip_value_per_lot: 10.0,
            avg_spread_pips: 1.2,
        }
    }

    #[tokio::test]
    async fn test_disabled_until_started() {
        let (engine, _) = test_engine(FeedScenario::Uptrend);

        let outcome = engine.run_cycle(&eurusd(), Utc::now()).await.unwrap();
        assert_eq!(outcome, CycleOutcome::Disabled);

        engine.handle().start_trading(None, None);
        let outcome = engine.run_cycle(&eurusd(), Utc::now()).await.unwrap();
        assert_ne!(outcome, CycleOutcome::Disabled);
    }

    #[tokio::test]
    async fn test_toggle_instrument_disables_only_that_symbol() {
        let (engine, _) = test_engine(FeedScenario::Uptrend);
        let handle = engine.handle();
        handle.start_trading(None, None);
        handle.toggle_instrument("EURUSD", false);

        let outcome = engine.run_cycle(&eurusd(), Utc::now()).await.unwrap();
        assert_eq!(outcome, CycleOutcome::Disabled);

        let gbp = Instrument {
            symbol: "GBPUSD".to_string(),
            pip_size: 0.0001,
            pip_value_per_lot: 10.0,
            avg_spread_pips: 1.8,
        };
        let outcome = engine.run_cycle(&gbp, Utc::now()).await.unwrap();
        assert_ne!(outcome, CycleOutcome::Disabled);
    }

    #[tokio::test]
    async fn test_stop_trading_blocks_new_entries() {
        let (engine, _) = test_engine(FeedScenario::Uptrend);
        let handle = engine.handle();
        handle.start_trading(None, None);
        handle.stop_trading();

        let outcome = engine.run_cycle(&eurusd(), Utc::now()).await.unwrap();
        assert_eq!(outcome, CycleOutcome::Disabled);
    }

    #[tokio::test]
    async fn test_status_distinguishes_benign_from_breaker() {
        let (engine, _) = test_engine(FeedScenario::Ranging);
        engine.handle().start_trading(None, None);

        let _ = engine.run_cycle(&eurusd(), Utc::now()).await.unwrap();
        let status = engine.status(Utc::now()).await;

        // No breaker tripped; selections may legitimately be empty this cycle
        assert!(!status.circuit_breaker_tripped);
        assert!(status.execution_fatals.is_empty());
        assert!(status.conditions.contains_key("EURUSD"));
    }
}
