//! Dual-leg execution with single-leg unwind.
//!
//! The executor turns a [`Decision`] into two concurrent market orders, one
//! per venue, and resolves the combined outcome into exactly one state
//! transition:
//!
//! ```text
//!            ┌── leg A: breaker → retry → timeout → place_market_order ──┐
//! decision ──┤                                                           ├── fan-in
//!            └── leg B: breaker → retry → timeout → place_market_order ──┘
//!
//! both ok      → open / add layer / close, journal, set cooldown lock
//! one ok       → compensate (unwind the lone entry leg, or finish the
//!                missing close leg); if that fails, flag inconsistent + alert
//! both failed  → no state change
//! ```
//!
//! A single trading lock serializes decision cycles. Callers that cannot take
//! the lock get [`ExecutionOutcome::Deferred`] instead of racing on the same
//! position.
//!
//! # Safety
//!
//! At the end of every cycle either the hedge invariant holds for the active
//! position, or the position has been moved to the flagged set and a critical
//! alert has fired. There is no third outcome.

use chrono::Utc;
use parking_lot::RwLock;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use spread_hedge_core::serde_duration::millis;
use spread_hedge_core::{
    spread, Alert, AlertKind, Fill, FillEvent, Leg, OrderStatus, OrderUpdate, PricePoint, Side,
    SpreadDirection, VenueError,
};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::bus::EventBus;
use crate::detector::{Decision, DetectorConfig};
use crate::journal::{OpenTrade, TradeExit, TradeJournal, TradeLayer};
use crate::persistence::PositionPersistence;
use crate::position::{ArbitragePosition, PositionStatus, PositionStore};
use crate::retry::{with_retry, RetryConfig};
use crate::venues::VenuePair;

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for dual-leg execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutorConfig {
    /// Per-call timeout for each order attempt. Aborts only that leg.
    /// Default: 1.5s
    #[serde(with = "millis")]
    pub leg_timeout: Duration,

    /// Retry policy for compensating orders (unwind / close completion).
    /// Default: 3 attempts, 2s apart
    pub unwind: RetryConfig,

    /// Extra open lock after a single-leg fill was unwound.
    /// Default: 10s
    #[serde(with = "millis")]
    pub failure_cooldown: Duration,

    /// Size tolerance for the hedge invariant check.
    /// Default: 0.000001
    pub fill_tolerance: Decimal,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            leg_timeout: Duration::from_millis(1500),
            unwind: RetryConfig::unwind(),
            failure_cooldown: Duration::from_secs(10),
            fill_tolerance: dec!(0.000001),
        }
    }
}

impl ExecutorConfig {
    /// Longer timeouts and cooldowns.
    #[must_use]
    pub fn conservative() -> Self {
        Self {
            leg_timeout: Duration::from_secs(3),
            unwind: RetryConfig::unwind().with_max_retries(4),
            failure_cooldown: Duration::from_secs(60),
            fill_tolerance: dec!(0.000001),
        }
    }

    /// Sets the per-leg timeout.
    #[must_use]
    pub fn with_leg_timeout(mut self, timeout: Duration) -> Self {
        self.leg_timeout = timeout;
        self
    }

    /// Sets the compensating-order policy.
    #[must_use]
    pub fn with_unwind(mut self, unwind: RetryConfig) -> Self {
        self.unwind = unwind;
        self
    }

    /// Sets the failure cooldown.
    #[must_use]
    pub fn with_failure_cooldown(mut self, cooldown: Duration) -> Self {
        self.failure_cooldown = cooldown;
        self
    }
}

/// Cooldown lock durations applied after successful cycles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockDurations {
    pub open: Duration,
    pub close: Duration,
}

impl From<&DetectorConfig> for LockDurations {
    fn from(config: &DetectorConfig) -> Self {
        Self {
            open: config.open_lock_duration,
            close: config.close_lock_duration,
        }
    }
}

// =============================================================================
// Results
// =============================================================================

/// Result of a compensating order.
#[derive(Debug, Clone)]
pub struct UnwindResult {
    /// Leg the compensating order was placed on.
    pub leg: Leg,
    /// Fill of the compensating order, if it went through.
    pub fill: Option<Fill>,
    /// Attempts made.
    pub attempts: u32,
    /// Last error if every attempt failed.
    pub error: Option<VenueError>,
}

impl UnwindResult {
    fn success(leg: Leg, fill: Fill, attempts: u32) -> Self {
        Self {
            leg,
            fill: Some(fill),
            attempts,
            error: None,
        }
    }

    fn failure(leg: Leg, error: VenueError, attempts: u32) -> Self {
        Self {
            leg,
            fill: None,
            attempts,
            error: Some(error),
        }
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        self.fill.is_some()
    }
}

/// Outcome of one decision cycle.
#[derive(Debug, Clone)]
pub enum ExecutionOutcome {
    /// New hedge opened.
    Opened { position_id: Uuid },

    /// Layer added to the open hedge.
    AddedOn { position_id: Uuid, layers: u32 },

    /// Hedge closed. `pnl` is absent if the journal had no open entry.
    Closed {
        position_id: Uuid,
        pnl: Option<Decimal>,
        /// A close leg failed and was completed by the compensating policy.
        completed_after_failure: bool,
    },

    /// One entry leg filled alone and was unwound. No position change.
    Unwound {
        filled_leg: Leg,
        error: VenueError,
        attempts: u32,
    },

    /// Compensation failed. Position flagged and excluded from automation.
    Inconsistent {
        position_id: Uuid,
        exposed_leg: Leg,
        reason: String,
    },

    /// Both legs failed. No state change.
    BothRejected {
        error_a: VenueError,
        error_b: VenueError,
    },

    /// Another cycle holds the trading lock.
    Deferred,

    /// Decision not applicable to current state.
    Skipped { reason: String },
}

impl ExecutionOutcome {
    /// Returns true if the decision was fully realized.
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(
            self,
            Self::Opened { .. } | Self::AddedOn { .. } | Self::Closed { .. }
        )
    }

    /// Returns true if unhedged exposure remains.
    #[must_use]
    pub fn has_exposure(&self) -> bool {
        matches!(self, Self::Inconsistent { .. })
    }

    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::Opened { .. } => "opened",
            Self::AddedOn { .. } => "added_on",
            Self::Closed { .. } => "closed",
            Self::Unwound { .. } => "unwound",
            Self::Inconsistent { .. } => "inconsistent",
            Self::BothRejected { .. } => "both_rejected",
            Self::Deferred => "deferred",
            Self::Skipped { .. } => "skipped",
        }
    }
}

/// Counters for execution cycles.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutorStats {
    pub executed: u64,
    pub deferred: u64,
    pub succeeded: u64,
    pub unwound: u64,
    pub inconsistent: u64,
    pub both_rejected: u64,
    pub skipped: u64,
}

impl ExecutorStats {
    fn record(&mut self, outcome: &ExecutionOutcome) {
        match outcome {
            ExecutionOutcome::Deferred => {
                self.deferred += 1;
                return;
            }
            ExecutionOutcome::Opened { .. }
            | ExecutionOutcome::AddedOn { .. }
            | ExecutionOutcome::Closed { .. } => self.succeeded += 1,
            ExecutionOutcome::Unwound { .. } => self.unwound += 1,
            ExecutionOutcome::Inconsistent { .. } => self.inconsistent += 1,
            ExecutionOutcome::BothRejected { .. } => self.both_rejected += 1,
            ExecutionOutcome::Skipped { .. } => self.skipped += 1,
        }
        self.executed += 1;
    }
}

/// Proof of holding the trading lock.
pub struct TradingPermit {
    _guard: OwnedMutexGuard<()>,
}

impl std::fmt::Debug for TradingPermit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("TradingPermit")
    }
}

// =============================================================================
// Dual-Leg Executor
// =============================================================================

/// Executes two-leg decisions against a venue pair.
pub struct DualLegExecutor {
    config: ExecutorConfig,
    retry: RetryConfig,
    locks: LockDurations,
    venues: VenuePair,
    store: Arc<PositionStore>,
    journal: Arc<TradeJournal>,
    persistence: Option<PositionPersistence>,
    bus: EventBus,
    trading_lock: Arc<Mutex<()>>,
    stats: RwLock<ExecutorStats>,
}

impl std::fmt::Debug for DualLegExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DualLegExecutor")
            .field("config", &self.config)
            .field("venues", &self.venues.names())
            .field("stats", &*self.stats.read())
            .finish()
    }
}

impl DualLegExecutor {
    #[must_use]
    pub fn new(
        config: ExecutorConfig,
        retry: RetryConfig,
        locks: LockDurations,
        venues: VenuePair,
        store: Arc<PositionStore>,
        journal: Arc<TradeJournal>,
    ) -> Self {
        Self {
            config,
            retry,
            locks,
            venues,
            store,
            journal,
            persistence: None,
            bus: EventBus::new(),
            trading_lock: Arc::new(Mutex::new(())),
            stats: RwLock::new(ExecutorStats::default()),
        }
    }

    /// Writes the position snapshot after every transition.
    #[must_use]
    pub fn with_persistence(mut self, persistence: PositionPersistence) -> Self {
        self.persistence = Some(persistence);
        self
    }

    /// Publishes orders, fills, and alerts on `bus`.
    #[must_use]
    pub fn with_bus(mut self, bus: EventBus) -> Self {
        self.bus = bus;
        self
    }

    #[must_use]
    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    #[must_use]
    pub fn store(&self) -> &Arc<PositionStore> {
        &self.store
    }

    #[must_use]
    pub fn journal(&self) -> &Arc<TradeJournal> {
        &self.journal
    }

    #[must_use]
    pub fn venues(&self) -> &VenuePair {
        &self.venues
    }

    #[must_use]
    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    #[must_use]
    pub fn stats(&self) -> ExecutorStats {
        self.stats.read().clone()
    }

    /// Takes the trading lock if free. Counts a deferral otherwise.
    #[must_use]
    pub fn try_acquire(&self) -> Option<TradingPermit> {
        match self.trading_lock.clone().try_lock_owned() {
            Ok(guard) => Some(TradingPermit { _guard: guard }),
            Err(_) => {
                self.stats.write().record(&ExecutionOutcome::Deferred);
                None
            }
        }
    }

    /// Shared handle on the trading lock, for readers that must only see
    /// settled state.
    #[must_use]
    pub fn trading_lock(&self) -> Arc<Mutex<()>> {
        self.trading_lock.clone()
    }

    /// Waits for the trading lock.
    pub async fn acquire(&self) -> TradingPermit {
        TradingPermit {
            _guard: self.trading_lock.clone().lock_owned().await,
        }
    }

    /// Executes `decision` if no other cycle is in flight.
    pub async fn try_execute(
        &self,
        decision: Decision,
        amount: Decimal,
        price_a: &PricePoint,
        price_b: &PricePoint,
    ) -> ExecutionOutcome {
        let Some(permit) = self.try_acquire() else {
            debug!(%decision, "Trading lock held, deferring decision");
            return ExecutionOutcome::Deferred;
        };
        self.execute(&permit, decision, amount, price_a, price_b)
            .await
    }

    /// Executes `decision` under an already-held trading lock.
    ///
    /// `amount` is the per-leg size for entries; exits always close the full
    /// position.
    pub async fn execute(
        &self,
        _permit: &TradingPermit,
        decision: Decision,
        amount: Decimal,
        price_a: &PricePoint,
        price_b: &PricePoint,
    ) -> ExecutionOutcome {
        let spread = spread(price_a, price_b);
        info!(
            %decision,
            %spread,
            mid_a = %price_a.mid,
            mid_b = %price_b.mid,
            %amount,
            "Executing decision"
        );

        let outcome = match decision {
            Decision::None => ExecutionOutcome::Skipped {
                reason: "no decision".to_string(),
            },
            Decision::Open(direction) | Decision::AddOn(direction) => {
                self.execute_entry(decision, direction, amount, spread).await
            }
            Decision::Close | Decision::ForceClose => {
                self.execute_exit(decision == Decision::ForceClose, spread)
                    .await
            }
        };

        self.stats.write().record(&outcome);
        outcome
    }

    // =========================================================================
    // Entry
    // =========================================================================

    async fn execute_entry(
        &self,
        decision: Decision,
        direction: SpreadDirection,
        amount: Decimal,
        spread: Decimal,
    ) -> ExecutionOutcome {
        let is_add_on = matches!(decision, Decision::AddOn(_));

        match (is_add_on, self.store.active()) {
            (false, Some(existing)) => {
                return ExecutionOutcome::Skipped {
                    reason: format!("position {} already open", existing.id),
                };
            }
            (true, None) => {
                return ExecutionOutcome::Skipped {
                    reason: "no open position to add to".to_string(),
                };
            }
            (true, Some(existing)) if !existing.is_tradeable() || existing.direction != direction => {
                return ExecutionOutcome::Skipped {
                    reason: format!("position {} not eligible for add-on", existing.id),
                };
            }
            _ => {}
        }

        let side_a = direction.side_for(Leg::A);
        let side_b = direction.side_for(Leg::B);

        let (result_a, result_b) = tokio::join!(
            self.place_leg(Leg::A, side_a, amount, false),
            self.place_leg(Leg::B, side_b, amount, false)
        );

        match (result_a, result_b) {
            (Ok(fill_a), Ok(fill_b)) => {
                if is_add_on {
                    self.apply_add_on(fill_a, fill_b)
                } else {
                    self.apply_open(direction, fill_a, fill_b, spread)
                }
            }
            (Ok(fill), Err(error)) => {
                self.handle_lone_entry(is_add_on, direction, Leg::A, fill, error, spread)
                    .await
            }
            (Err(error), Ok(fill)) => {
                self.handle_lone_entry(is_add_on, direction, Leg::B, fill, error, spread)
                    .await
            }
            (Err(error_a), Err(error_b)) => {
                warn!(
                    error_a = %error_a,
                    error_b = %error_b,
                    "Both entry legs failed, decision not realized"
                );
                ExecutionOutcome::BothRejected { error_a, error_b }
            }
        }
    }

    fn apply_open(
        &self,
        direction: SpreadDirection,
        fill_a: Fill,
        fill_b: Fill,
        spread: Decimal,
    ) -> ExecutionOutcome {
        let now = Utc::now();
        let mut position =
            ArbitragePosition::open(direction, self.venues.names(), fill_a, fill_b, spread, now);
        let id = position.id;

        self.store.lock_open_until(now + to_chrono(self.locks.open));

        if let Err(violation) = position.check_hedge(self.config.fill_tolerance) {
            // Venues filled different sizes.
            let exposed = larger_leg(&position);
            let reason = format!("fills unequal after open: {violation}");
            position.flag_inconsistent(&reason);
            return self.park_inconsistent(position, exposed, reason);
        }

        if let Err(e) = self.journal.record_open(OpenTrade::from_position(&position)) {
            error!(position = %id, error = %e, "Failed to journal open");
        }

        info!(
            position = %id,
            %direction,
            entry_a = %position.entry_price_a,
            entry_b = %position.entry_price_b,
            amount = %position.amount,
            %spread,
            "Hedge opened"
        );
        self.store.set_active(position);
        self.persist();
        ExecutionOutcome::Opened { position_id: id }
    }

    fn apply_add_on(&self, fill_a: Fill, fill_b: Fill) -> ExecutionOutcome {
        let now = Utc::now();
        let layer = TradeLayer {
            amount: fill_a.size.min(fill_b.size),
            price_a: fill_a.price,
            price_b: fill_b.price,
            fee_a: fill_a.fee,
            fee_b: fill_b.fee,
        };

        let Some((id, layers, check)) = self.store.update_active(|p| {
            p.add_layer(fill_a, fill_b);
            (p.id, p.layers, p.check_hedge(self.config.fill_tolerance))
        }) else {
            // Guarded by execute_entry; only reachable if the store was cleared externally.
            return ExecutionOutcome::Skipped {
                reason: "position vanished during add-on".to_string(),
            };
        };

        if let Err(e) = self.journal.record_add_on(id, layer) {
            error!(position = %id, error = %e, "Failed to journal add-on");
        }
        self.store.lock_open_until(now + to_chrono(self.locks.open));

        if let Err(violation) = check {
            if let Some(mut position) = self.store.take_active() {
                let exposed = larger_leg(&position);
                let reason = format!("fills unequal after add-on: {violation}");
                position.flag_inconsistent(&reason);
                return self.park_inconsistent(position, exposed, reason);
            }
        }

        info!(position = %id, layers, "Layer added");
        self.persist();
        ExecutionOutcome::AddedOn {
            position_id: id,
            layers,
        }
    }

    async fn handle_lone_entry(
        &self,
        is_add_on: bool,
        direction: SpreadDirection,
        filled_leg: Leg,
        fill: Fill,
        error: VenueError,
        spread: Decimal,
    ) -> ExecutionOutcome {
        let failed_leg = filled_leg.other();
        warn!(
            filled_leg = %filled_leg,
            filled_venue = %self.venues.get(filled_leg).name(),
            failed_venue = %self.venues.get(failed_leg).name(),
            size = %fill.size,
            price = %fill.price,
            error = %error,
            "Single leg filled - attempting unwind"
        );

        let unwind = self
            .compensate(filled_leg, fill.side.opposite(), fill.size, "unwind")
            .await;

        if let Some(unwind_fill) = &unwind.fill {
            let now = Utc::now();
            self.store
                .lock_open_until(now + to_chrono(self.config.failure_cooldown));
            self.persist();
            self.bus.raise(
                Alert::warning(
                    AlertKind::SingleLegExposure,
                    format!(
                        "single-leg exposure corrected on {}: {} {} unwound after {} failed ({})",
                        self.venues.get(filled_leg).name(),
                        fill.side,
                        fill.size,
                        self.venues.get(failed_leg).name(),
                        error
                    ),
                )
                .with_leg(filled_leg)
                .with_values(fill.size, unwind_fill.size),
            );
            return ExecutionOutcome::Unwound {
                filled_leg,
                error,
                attempts: unwind.attempts,
            };
        }

        let unwind_error = unwind
            .error
            .as_ref()
            .map_or_else(|| "unknown".to_string(), ToString::to_string);
        let reason = format!(
            "{} leg {} filled, {} leg failed ({}), unwind failed after {} attempts ({})",
            fill.side, filled_leg, failed_leg, error, unwind.attempts, unwind_error
        );

        let position = if is_add_on {
            match self.store.take_active() {
                Some(mut existing) => {
                    existing.push_fill(filled_leg, fill);
                    existing.flag_inconsistent(&reason);
                    existing
                }
                None => ArbitragePosition::single_leg(
                    direction,
                    self.venues.names(),
                    filled_leg,
                    fill,
                    spread,
                    Utc::now(),
                    &reason,
                ),
            }
        } else {
            ArbitragePosition::single_leg(
                direction,
                self.venues.names(),
                filled_leg,
                fill,
                spread,
                Utc::now(),
                &reason,
            )
        };

        self.park_inconsistent(position, filled_leg, reason)
    }

    // =========================================================================
    // Exit
    // =========================================================================

    async fn execute_exit(&self, forced: bool, spread: Decimal) -> ExecutionOutcome {
        let Some(position) = self.store.active() else {
            return ExecutionOutcome::Skipped {
                reason: "no open position to close".to_string(),
            };
        };
        if !position.is_tradeable() {
            return ExecutionOutcome::Skipped {
                reason: format!("position {} not tradeable", position.id),
            };
        }

        self.store
            .update_active(|p| p.status = PositionStatus::Closing);

        let size_a = position.net_exposure(Leg::A).abs();
        let size_b = position.net_exposure(Leg::B).abs();
        let side_a = position.leg_a_side.opposite();
        let side_b = position.leg_b_side.opposite();

        let (result_a, result_b) = tokio::join!(
            self.place_leg(Leg::A, side_a, size_a, true),
            self.place_leg(Leg::B, side_b, size_b, true)
        );

        match (result_a, result_b) {
            (Ok(fill_a), Ok(fill_b)) => {
                self.store.update_active(|p| {
                    p.push_fill(Leg::A, fill_a);
                    p.push_fill(Leg::B, fill_b);
                });
                self.finish_close(forced, spread, false)
            }
            (Ok(fill), Err(error)) => {
                self.complete_close(Leg::A, fill, Leg::B, side_b, size_b, error, forced, spread)
                    .await
            }
            (Err(error), Ok(fill)) => {
                self.complete_close(Leg::B, fill, Leg::A, side_a, size_a, error, forced, spread)
                    .await
            }
            (Err(error_a), Err(error_b)) => {
                self.store.update_active(|p| p.status = PositionStatus::Open);
                warn!(
                    position = %position.id,
                    error_a = %error_a,
                    error_b = %error_b,
                    "Both close legs failed, position unchanged"
                );
                ExecutionOutcome::BothRejected { error_a, error_b }
            }
        }
    }

    /// One close leg went through and the other did not. Re-opening the
    /// closed leg would add exposure, so the missing close is completed with
    /// the compensating policy instead.
    #[allow(clippy::too_many_arguments)]
    async fn complete_close(
        &self,
        closed_leg: Leg,
        closed_fill: Fill,
        failed_leg: Leg,
        failed_side: Side,
        failed_size: Decimal,
        error: VenueError,
        forced: bool,
        spread: Decimal,
    ) -> ExecutionOutcome {
        warn!(
            closed_leg = %closed_leg,
            failed_leg = %failed_leg,
            error = %error,
            "Single close leg filled - completing the other leg"
        );
        self.store
            .update_active(|p| p.push_fill(closed_leg, closed_fill));

        let completion = self
            .compensate(failed_leg, failed_side, failed_size, "close completion")
            .await;

        if let Some(fill) = completion.fill {
            self.store.update_active(|p| p.push_fill(failed_leg, fill));
            self.bus.raise(
                Alert::warning(
                    AlertKind::SingleLegExposure,
                    format!(
                        "close leg on {} failed ({}), completed after {} attempts",
                        self.venues.get(failed_leg).name(),
                        error,
                        completion.attempts
                    ),
                )
                .with_leg(failed_leg),
            );
            return self.finish_close(forced, spread, true);
        }

        let reason = format!(
            "leg {} closed, leg {} close failed ({}), completion failed after {} attempts ({})",
            closed_leg,
            failed_leg,
            error,
            completion.attempts,
            completion
                .error
                .as_ref()
                .map_or_else(|| "unknown".to_string(), ToString::to_string)
        );

        match self.store.take_active() {
            Some(mut position) => {
                position.flag_inconsistent(&reason);
                self.park_inconsistent(position, failed_leg, reason)
            }
            None => ExecutionOutcome::Skipped {
                reason: "position vanished during close".to_string(),
            },
        }
    }

    fn finish_close(&self, forced: bool, spread: Decimal, completed_after_failure: bool) -> ExecutionOutcome {
        let now = Utc::now();
        let Some(mut position) = self.store.take_active() else {
            return ExecutionOutcome::Skipped {
                reason: "position vanished during close".to_string(),
            };
        };

        let residual_a = position.net_exposure(Leg::A);
        let residual_b = position.net_exposure(Leg::B);
        if residual_a.abs() > self.config.fill_tolerance
            || residual_b.abs() > self.config.fill_tolerance
        {
            let exposed = if residual_a.abs() >= residual_b.abs() {
                Leg::A
            } else {
                Leg::B
            };
            let reason = format!("residual exposure after close: A={residual_a} B={residual_b}");
            position.flag_inconsistent(&reason);
            return self.park_inconsistent(position, exposed, reason);
        }

        position.status = PositionStatus::Closed;
        let id = position.id;

        let exit = TradeExit {
            id,
            exit_price_a: position.exit_price(Leg::A).unwrap_or(position.entry_price_a),
            exit_price_b: position.exit_price(Leg::B).unwrap_or(position.entry_price_b),
            close_spread: spread,
            close_fee_a: position.close_fees(Leg::A),
            close_fee_b: position.close_fees(Leg::B),
            close_time: now,
            forced,
        };

        let pnl = match self.journal.record_close(exit) {
            Ok(trade) => Some(trade.pnl),
            Err(e) => {
                error!(position = %id, error = %e, "Failed to journal close");
                None
            }
        };

        self.store.lock_close_until(now + to_chrono(self.locks.close));
        self.persist();

        info!(
            position = %id,
            forced,
            pnl = ?pnl,
            hold_secs = position.hold_time(now).num_seconds(),
            "Hedge closed"
        );

        ExecutionOutcome::Closed {
            position_id: id,
            pnl,
            completed_after_failure,
        }
    }

    // =========================================================================
    // Order plumbing
    // =========================================================================

    /// Places one leg: breaker → retry → per-attempt timeout.
    async fn place_leg(
        &self,
        leg: Leg,
        side: Side,
        amount: Decimal,
        reduce_only: bool,
    ) -> Result<Fill, VenueError> {
        let handle = self.venues.get(leg);
        let client = handle.client.clone();
        let timeout = self.config.leg_timeout;
        let context = format!(
            "{} {} {}{}",
            handle.name(),
            side,
            amount,
            if reduce_only { " reduce-only" } else { "" }
        );

        self.publish_order(leg, side, amount, reduce_only, OrderStatus::Submitted, None);

        let result = handle
            .breaker
            .execute(|| {
                with_retry(&self.retry, &context, || {
                    let client = client.clone();
                    async move { place_with_timeout(client.as_ref(), side, amount, reduce_only, timeout).await }
                })
            })
            .await;

        self.publish_result(leg, side, amount, reduce_only, &result);
        result
    }

    /// Places a reduce-only compensating order under the unwind policy.
    ///
    /// Bypasses the breaker: a correction must be attempted even if the
    /// venue has been failing.
    async fn compensate(&self, leg: Leg, side: Side, amount: Decimal, what: &str) -> UnwindResult {
        let handle = self.venues.get(leg);
        let client = handle.client.clone();
        let timeout = self.config.leg_timeout;
        let attempts = AtomicU32::new(0);
        let context = format!("{} {} {} {}", what, handle.name(), side, amount);

        self.publish_order(leg, side, amount, true, OrderStatus::Submitted, None);

        let result = with_retry(&self.config.unwind, &context, || {
            attempts.fetch_add(1, Ordering::Relaxed);
            let client = client.clone();
            async move { place_with_timeout(client.as_ref(), side, amount, true, timeout).await }
        })
        .await;

        self.publish_result(leg, side, amount, true, &result);
        let attempts = attempts.load(Ordering::Relaxed);

        match result {
            Ok(fill) => {
                info!(leg = %leg, venue = %handle.name(), attempts, "Compensating order filled");
                UnwindResult::success(leg, fill, attempts)
            }
            Err(e) => {
                error!(leg = %leg, venue = %handle.name(), attempts, error = %e, "Compensating order failed");
                UnwindResult::failure(leg, e, attempts)
            }
        }
    }

    fn publish_order(
        &self,
        leg: Leg,
        side: Side,
        amount: Decimal,
        reduce_only: bool,
        status: OrderStatus,
        reason: Option<String>,
    ) {
        self.bus.publish_order(OrderUpdate {
            leg,
            venue: self.venues.get(leg).name().to_string(),
            side,
            amount,
            reduce_only,
            status,
            reason,
            timestamp: Utc::now(),
        });
    }

    fn publish_result(
        &self,
        leg: Leg,
        side: Side,
        amount: Decimal,
        reduce_only: bool,
        result: &Result<Fill, VenueError>,
    ) {
        match result {
            Ok(fill) => {
                self.publish_order(leg, side, amount, reduce_only, OrderStatus::Filled, None);
                self.bus.publish_fill(FillEvent {
                    leg,
                    venue: self.venues.get(leg).name().to_string(),
                    position_id: None,
                    reduce_only,
                    fill: fill.clone(),
                });
            }
            Err(e) => self.publish_order(
                leg,
                side,
                amount,
                reduce_only,
                OrderStatus::Failed,
                Some(e.to_string()),
            ),
        }
    }

    // =========================================================================
    // State helpers
    // =========================================================================

    /// Moves a position into the flagged set and fires the critical alert.
    /// Called once per position: flagged positions are never acted on again.
    fn park_inconsistent(
        &self,
        position: ArbitragePosition,
        exposed_leg: Leg,
        reason: String,
    ) -> ExecutionOutcome {
        let id = position.id;
        let expected = Decimal::ZERO;
        let actual = position.net_exposure(exposed_leg);

        self.bus.raise(
            Alert::critical(
                AlertKind::InconsistentPosition,
                format!(
                    "position {id} inconsistent, operator action required: {reason}"
                ),
            )
            .with_position(id)
            .with_leg(exposed_leg)
            .with_values(expected, actual),
        );

        self.store.push_flagged(position);
        self.persist();

        ExecutionOutcome::Inconsistent {
            position_id: id,
            exposed_leg,
            reason,
        }
    }

    fn persist(&self) {
        if let Some(persistence) = &self.persistence {
            if let Err(e) = persistence.sync(&self.store.snapshot()) {
                error!(path = %persistence.path().display(), error = %e, "Failed to persist position snapshot");
            }
        }
    }
}

async fn place_with_timeout(
    client: &dyn spread_hedge_core::VenueClient,
    side: Side,
    amount: Decimal,
    reduce_only: bool,
    timeout: Duration,
) -> Result<Fill, VenueError> {
    match tokio::time::timeout(timeout, client.place_market_order(side, amount, reduce_only)).await {
        Ok(result) => result,
        Err(_) => Err(VenueError::timeout(
            format!("{} place_market_order", client.name()),
            timeout.as_millis() as u64,
        )),
    }
}

/// Leg with the larger absolute net exposure.
fn larger_leg(position: &ArbitragePosition) -> Leg {
    if position.net_exposure(Leg::A).abs() >= position.net_exposure(Leg::B).abs() {
        Leg::A
    } else {
        Leg::B
    }
}

fn to_chrono(duration: Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or_else(|_| chrono::Duration::zero())
}

#[cfg(test)]
mod tests {
    use super::*;

    // ==================== Config Tests ====================

    #[test]
    fn test_executor_config_default() {
        let config = ExecutorConfig::default();
        assert_eq!(config.leg_timeout, Duration::from_millis(1500));
        assert_eq!(config.unwind.max_retries, 2);
        assert_eq!(config.unwind.initial_delay, Duration::from_secs(2));
        assert_eq!(config.failure_cooldown, Duration::from_secs(10));
    }

    #[test]
    fn test_executor_config_builders() {
        let config = ExecutorConfig::default()
            .with_leg_timeout(Duration::from_millis(500))
            .with_failure_cooldown(Duration::from_secs(1))
            .with_unwind(RetryConfig::no_retry());
        assert_eq!(config.leg_timeout, Duration::from_millis(500));
        assert_eq!(config.failure_cooldown, Duration::from_secs(1));
        assert_eq!(config.unwind.max_retries, 0);
    }

    #[test]
    fn test_lock_durations_from_detector() {
        let locks = LockDurations::from(&DetectorConfig::default());
        assert_eq!(locks.open, Duration::from_secs(10));
        assert_eq!(locks.close, Duration::from_secs(30));
    }

    // ==================== Outcome Tests ====================

    #[test]
    fn test_outcome_classification() {
        let opened = ExecutionOutcome::Opened {
            position_id: Uuid::new_v4(),
        };
        assert!(opened.is_success());
        assert!(!opened.has_exposure());

        let flagged = ExecutionOutcome::Inconsistent {
            position_id: Uuid::new_v4(),
            exposed_leg: Leg::A,
            reason: "x".to_string(),
        };
        assert!(!flagged.is_success());
        assert!(flagged.has_exposure());
        assert_eq!(ExecutionOutcome::Deferred.label(), "deferred");
    }

    #[test]
    fn test_stats_record() {
        let mut stats = ExecutorStats::default();
        stats.record(&ExecutionOutcome::Deferred);
        stats.record(&ExecutionOutcome::Opened {
            position_id: Uuid::new_v4(),
        });
        stats.record(&ExecutionOutcome::BothRejected {
            error_a: VenueError::timeout("a", 1),
            error_b: VenueError::timeout("b", 1),
        });
        assert_eq!(stats.deferred, 1);
        assert_eq!(stats.executed, 2);
        assert_eq!(stats.succeeded, 1);
        assert_eq!(stats.both_rejected, 1);
    }
}
