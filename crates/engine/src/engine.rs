//! The trading loop.
//!
//! [`HedgeEngine`] wires the components together and drives them:
//!
//! ```text
//! venue A ticks ─► PriceFeed ◄─ venue B ticks
//!                     │  (stale? → get_mid_price fallback)
//!                     ▼
//!   every tick:  OpportunityDetector ─► risk gates ─► trading lock ─► DualLegExecutor (spawned)
//!   every N min: PositionReconciler (read-only audit)
//!   every M min: statistics log line
//! ```
//!
//! A decision taken while another is executing is deferred, never queued.
//! On shutdown the loop stops, waits for the in-flight cycle and, if
//! configured, force-closes the open hedge.

use chrono::{DateTime, NaiveDate, Utc};
use parking_lot::RwLock;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use spread_hedge_core::{
    price_tick_channel, Alert, AlertKind, Leg, PricePoint, VenueClient, VenueError,
};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::bus::EventBus;
use crate::config::{ConfigError, EngineConfig};
use crate::detector::{Decision, OpportunityDetector};
use crate::executor::{DualLegExecutor, ExecutionOutcome, LockDurations};
use crate::journal::{JournalError, OpenTrade, TradeJournal};
use crate::persistence::{PersistenceError, PositionPersistence};
use crate::position::PositionStore;
use crate::price_feed::PriceFeed;
use crate::reconciler::PositionReconciler;
use crate::venues::{VenueHandle, VenuePair};

/// Startup failures. Once running, the engine does not fail.
#[derive(Error, Debug)]
pub enum EngineError {
    /// Configuration did not validate.
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    /// Position snapshot could not be loaded.
    #[error("position snapshot error: {0}")]
    Persistence(#[from] PersistenceError),

    /// Trade journal could not be loaded.
    #[error("journal error: {0}")]
    Journal(#[from] JournalError),
}

/// Why a decision was not executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SuppressReason {
    /// A position is flagged inconsistent.
    InconsistentPosition,
    /// Today's realized loss reached the limit.
    DailyLossLimit,
}

/// What one trading-loop tick did.
#[derive(Debug)]
pub enum TickAction {
    /// A price was missing and could not be fetched.
    NoPrices,
    /// Evaluated; nothing to do.
    Idle,
    /// Entry blocked by a risk gate.
    Suppressed {
        decision: Decision,
        reason: SuppressReason,
    },
    /// Another execution is in flight.
    Deferred(Decision),
    /// Execution started in the background.
    Dispatched {
        decision: Decision,
        handle: JoinHandle<ExecutionOutcome>,
    },
}

/// Trading-loop counters. Deferrals are counted once, by the executor.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunnerStats {
    pub ticks: u64,
    pub evaluated: u64,
    pub no_price_ticks: u64,
    pub price_fallbacks: u64,
    pub decisions: u64,
    pub dispatched: u64,
    pub suppressed: u64,
}

// =============================================================================
// Hedge Engine
// =============================================================================

/// Owns every component and runs the loops.
pub struct HedgeEngine {
    config: EngineConfig,
    feed: Arc<PriceFeed>,
    detector: OpportunityDetector,
    executor: Arc<DualLegExecutor>,
    reconciler: Arc<PositionReconciler>,
    bus: EventBus,
    stats: RwLock<RunnerStats>,
    loss_alert_day: RwLock<Option<NaiveDate>>,
}

impl std::fmt::Debug for HedgeEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HedgeEngine")
            .field("pair", &self.config.pair)
            .field("executor", &self.executor)
            .field("stats", &*self.stats.read())
            .finish_non_exhaustive()
    }
}

impl HedgeEngine {
    /// Builds the engine and restores state from the data directory.
    ///
    /// A leftover position snapshot is loaded back into the store, flagged
    /// positions included, so a crash between open and close never loses
    /// live exposure.
    ///
    /// # Errors
    /// Fails on invalid configuration or an unreadable snapshot/journal.
    pub fn new(
        config: EngineConfig,
        venue_a: Arc<dyn VenueClient>,
        venue_b: Arc<dyn VenueClient>,
    ) -> Result<Self, EngineError> {
        config.validate()?;

        let bus = EventBus::new();
        let venues = VenuePair::new(
            VenueHandle::with_bus(venue_a, config.circuit_breaker.clone(), bus.clone()),
            VenueHandle::with_bus(venue_b, config.circuit_breaker.clone(), bus.clone()),
        );

        let persistence = PositionPersistence::new(config.journal.snapshot_path());
        let snapshot = persistence.load()?.unwrap_or_default();
        let journal = Arc::new(TradeJournal::open(config.journal.journal_path())?);

        if let Some(active) = &snapshot.active {
            info!(
                position = %active.id,
                direction = %active.direction,
                amount = %active.amount,
                layers = active.layers,
                "Recovered open position"
            );
            if journal.open_trade(active.id).is_none() {
                warn!(position = %active.id, "Recovered position missing from journal, re-recording");
                if let Err(e) = journal.record_open(OpenTrade::from_position(active)) {
                    error!(position = %active.id, error = %e, "Failed to journal recovered position");
                }
            }
        }
        for flagged in &snapshot.flagged {
            error!(
                position = %flagged.id,
                reason = flagged.inconsistency.as_deref().unwrap_or("unknown"),
                "Recovered inconsistent position awaiting operator action"
            );
        }

        let store = Arc::new(PositionStore::from_snapshot(snapshot));

        let executor = DualLegExecutor::new(
            config.executor.clone(),
            config.retry.clone(),
            LockDurations::from(&config.detector),
            venues.clone(),
            store.clone(),
            journal,
        )
        .with_bus(bus.clone())
        .with_persistence(persistence);

        let reconciler =
            PositionReconciler::new(config.reconciler.clone(), venues, store, bus.clone())
                .with_trading_lock(executor.trading_lock());

        Ok(Self {
            feed: Arc::new(PriceFeed::new(config.runner.max_price_age)),
            detector: OpportunityDetector::new(config.detector.clone()),
            executor: Arc::new(executor),
            reconciler: Arc::new(reconciler),
            bus,
            stats: RwLock::new(RunnerStats::default()),
            loss_alert_day: RwLock::new(None),
            config,
        })
    }

    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    #[must_use]
    pub fn feed(&self) -> &Arc<PriceFeed> {
        &self.feed
    }

    #[must_use]
    pub fn executor(&self) -> &Arc<DualLegExecutor> {
        &self.executor
    }

    #[must_use]
    pub fn reconciler(&self) -> &Arc<PositionReconciler> {
        &self.reconciler
    }

    #[must_use]
    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    #[must_use]
    pub fn stats(&self) -> RunnerStats {
        self.stats.read().clone()
    }

    /// Runs until `shutdown` becomes true.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        info!(
            symbol = %self.config.pair.symbol,
            venue_a = %self.config.pair.venue_a,
            venue_b = %self.config.pair.venue_b,
            open_threshold = %self.config.detector.open_threshold,
            close_threshold = %self.config.detector.close_threshold,
            "Hedge engine starting"
        );

        let mut tasks: Vec<JoinHandle<()>> = Vec::new();
        for leg in Leg::ALL {
            let (tx, rx) = price_tick_channel();
            let client = self.executor.venues().get(leg).client.clone();
            if let Err(e) = client.subscribe_price_ticks(tx).await {
                warn!(leg = %leg, venue = %client.name(), error = %e, "Price subscription failed, polling only");
            }
            tasks.push(tokio::spawn(self.feed.clone().pump(leg, rx)));
        }

        self.reconciler.reconcile().await;
        tasks.push(tokio::spawn(
            self.reconciler.clone().run(shutdown.clone()),
        ));
        tasks.push(tokio::spawn(
            self.clone().stats_loop(shutdown.clone()),
        ));

        let mut ticker = tokio::time::interval(self.config.runner.tick_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.tick().await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("Shutdown requested, stopping trading loop");
                        break;
                    }
                }
            }
        }

        self.shutdown().await;

        for task in tasks {
            task.abort();
        }
        self.log_stats();
        info!("Hedge engine stopped");
    }

    /// One trading-loop iteration.
    pub async fn tick(&self) -> TickAction {
        let now = Utc::now();
        self.stats.write().ticks += 1;

        let (Some(price_a), Some(price_b)) = tokio::join!(
            self.current_price(Leg::A, now),
            self.current_price(Leg::B, now)
        ) else {
            self.stats.write().no_price_ticks += 1;
            return TickAction::NoPrices;
        };

        let position = self.executor.store().active();
        let locks = self.executor.store().locks();
        let decision =
            self.detector
                .evaluate(&price_a, &price_b, position.as_ref(), &locks, now);
        self.stats.write().evaluated += 1;

        if decision.is_none() {
            return TickAction::Idle;
        }
        self.stats.write().decisions += 1;

        if decision.is_entry() {
            if let Some(reason) = self.entry_gate(now) {
                self.stats.write().suppressed += 1;
                debug!(%decision, ?reason, "Entry suppressed");
                return TickAction::Suppressed { decision, reason };
            }
        }

        let Some(permit) = self.executor.try_acquire() else {
            debug!(%decision, "Execution in flight, deferring");
            return TickAction::Deferred(decision);
        };

        self.stats.write().dispatched += 1;
        let executor = self.executor.clone();
        let amount = self.config.detector.trade_amount;
        let handle = tokio::spawn(async move {
            let outcome = executor
                .execute(&permit, decision, amount, &price_a, &price_b)
                .await;
            log_outcome(&outcome);
            outcome
        });

        TickAction::Dispatched { decision, handle }
    }

    /// Latest fresh price, or a point-in-time fetch when the feed is stale.
    async fn current_price(&self, leg: Leg, now: DateTime<Utc>) -> Option<PricePoint> {
        if let Some(price) = self.feed.get_at(leg, now) {
            return Some(price);
        }

        let client = &self.executor.venues().get(leg).client;
        let timeout = self.config.executor.leg_timeout;
        let fetched = match tokio::time::timeout(timeout, client.get_mid_price()).await {
            Ok(result) => result,
            Err(_) => Err(VenueError::timeout(
                format!("{} get_mid_price", client.name()),
                timeout.as_millis() as u64,
            )),
        };

        match fetched {
            Ok(mid) if mid > Decimal::ZERO => {
                let point = PricePoint::from_mid(leg, mid, now);
                self.feed.update(point);
                self.stats.write().price_fallbacks += 1;
                debug!(leg = %leg, %mid, "Feed stale, used fetched mid");
                Some(point)
            }
            Ok(mid) => {
                warn!(leg = %leg, %mid, "Fetched non-positive mid, skipping tick");
                None
            }
            Err(e) => {
                debug!(leg = %leg, error = %e, "No usable price");
                None
            }
        }
    }

    /// Returns why new exposure must not be taken, if it must not.
    fn entry_gate(&self, now: DateTime<Utc>) -> Option<SuppressReason> {
        let risk = &self.config.risk;

        if risk.halt_on_inconsistent && self.executor.store().has_inconsistent() {
            return Some(SuppressReason::InconsistentPosition);
        }

        let today_pnl = self.executor.journal().today_pnl(now);
        if today_pnl <= -risk.daily_loss_limit {
            let today = now.date_naive();
            let first_today = {
                let mut day = self.loss_alert_day.write();
                let first = *day != Some(today);
                *day = Some(today);
                first
            };
            if first_today {
                self.bus.raise(
                    Alert::critical(
                        AlertKind::DailyLossLimit,
                        format!(
                            "daily loss limit reached: pnl {today_pnl} <= -{}, entries halted",
                            risk.daily_loss_limit
                        ),
                    )
                    .with_values(-risk.daily_loss_limit, today_pnl),
                );
            }
            return Some(SuppressReason::DailyLossLimit);
        }

        None
    }

    /// Waits for the in-flight cycle, then force-closes if configured.
    pub async fn shutdown(&self) {
        let permit = self.executor.acquire().await;

        if !self.config.runner.close_on_shutdown {
            return;
        }
        let Some(position) = self.executor.store().active() else {
            return;
        };
        if !position.is_tradeable() {
            return;
        }

        let now = Utc::now();
        let (price_a, price_b) = tokio::join!(
            self.current_price(Leg::A, now),
            self.current_price(Leg::B, now)
        );
        let price_a = price_a
            .or_else(|| self.feed.last(Leg::A))
            .unwrap_or_else(|| PricePoint::from_mid(Leg::A, position.entry_price_a, now));
        let price_b = price_b
            .or_else(|| self.feed.last(Leg::B))
            .unwrap_or_else(|| PricePoint::from_mid(Leg::B, position.entry_price_b, now));

        info!(position = %position.id, "Closing position on shutdown");
        let outcome = self
            .executor
            .execute(&permit, Decision::ForceClose, position.amount, &price_a, &price_b)
            .await;
        log_outcome(&outcome);
    }

    async fn stats_loop(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.config.runner.stats_interval);
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = ticker.tick() => self.log_stats(),
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        return;
                    }
                }
            }
        }
    }

    /// Logs journal, executor, and loop statistics.
    pub fn log_stats(&self) {
        let now = Utc::now();
        let today = self.executor.journal().today_stats(now);
        let exec = self.executor.stats();
        let runner = self.stats();
        let store = self.executor.store();

        info!(
            trades = today.total_trades,
            open = today.open_trades,
            volume = %today.total_volume,
            pnl = %today.total_pnl,
            fees = %today.total_fees,
            win_rate_pct = %today.win_rate_pct.round_dp(1),
            max_profit = %today.max_profit,
            max_loss = %today.max_loss,
            "Today"
        );
        info!(
            ticks = runner.ticks,
            decisions = runner.decisions,
            dispatched = runner.dispatched,
            deferred = exec.deferred,
            suppressed = runner.suppressed,
            succeeded = exec.succeeded,
            unwound = exec.unwound,
            inconsistent = exec.inconsistent,
            both_rejected = exec.both_rejected,
            has_position = store.has_active(),
            flagged = store.flagged().len(),
            "Execution"
        );
    }
}

fn log_outcome(outcome: &ExecutionOutcome) {
    match outcome {
        ExecutionOutcome::Inconsistent {
            position_id,
            exposed_leg,
            reason,
        } => error!(
            position = %position_id,
            leg = %exposed_leg,
            reason = %reason,
            "Execution left unhedged exposure"
        ),
        ExecutionOutcome::Unwound { filled_leg, error, attempts } => warn!(
            leg = %filled_leg,
            error = %error,
            attempts,
            "Single-leg exposure corrected"
        ),
        ExecutionOutcome::Skipped { reason } => debug!(reason = %reason, "Execution skipped"),
        other => info!(outcome = other.label(), "Execution finished"),
    }
}
