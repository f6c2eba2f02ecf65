//! Position reconciliation against venue snapshots.
//!
//! The executor's view of exposure is built from the fills it saw. Venues are
//! the source of truth. On a fixed cadence the reconciler pulls each venue's
//! signed position and compares it with the store's tally:
//!
//! ```text
//! for each leg:
//!     expected = Σ net exposure of live positions on that leg
//!     actual   = venue.get_position()
//!     |actual - expected| > tolerance  → ReconciliationMismatch (critical)
//!
//! |actual_a + actual_b| > tolerance    → HedgeImbalance (critical)
//! ```
//!
//! The reconciler only reads. It never corrects state; deciding which side
//! is right is an operator call. Given the executor's trading lock it waits
//! for any in-flight cycle, so a half-applied execution is never audited.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use spread_hedge_core::serde_duration::millis;
use spread_hedge_core::{Alert, AlertKind, Leg, VenueError};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tracing::{debug, error, info, warn};

use crate::bus::EventBus;
use crate::position::PositionStore;
use crate::venues::VenuePair;

// =============================================================================
// Configuration
// =============================================================================

/// Reconciler configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconcilerConfig {
    /// Time between audits.
    /// Default: 30 minutes
    #[serde(with = "millis")]
    pub interval: Duration,

    /// Absolute size difference tolerated before alerting.
    /// Default: 0.001
    pub tolerance: Decimal,

    /// Timeout for each venue snapshot call.
    /// Default: 5s
    #[serde(with = "millis")]
    pub snapshot_timeout: Duration,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30 * 60),
            tolerance: dec!(0.001),
            snapshot_timeout: Duration::from_secs(5),
        }
    }
}

impl ReconcilerConfig {
    /// Frequent audits with a tight tolerance, for small live tests.
    #[must_use]
    pub fn micro_testing() -> Self {
        Self {
            interval: Duration::from_secs(60),
            tolerance: dec!(0.0001),
            snapshot_timeout: Duration::from_secs(5),
        }
    }

    #[must_use]
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    #[must_use]
    pub fn with_tolerance(mut self, tolerance: Decimal) -> Self {
        self.tolerance = tolerance;
        self
    }
}

// =============================================================================
// Report Types
// =============================================================================

/// Result of comparing one leg.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LegStatus {
    /// Venue agrees with the store within tolerance.
    Matched,
    /// Venue disagrees with the store.
    Mismatch { difference: Decimal },
    /// Snapshot could not be fetched.
    Unavailable { error: String },
}

/// One leg's reconciliation line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LegReconciliation {
    pub leg: Leg,
    pub venue: String,
    /// Store tally.
    pub expected: Decimal,
    /// Venue snapshot, if it was fetched.
    pub actual: Option<Decimal>,
    pub status: LegStatus,
}

impl LegReconciliation {
    #[must_use]
    pub fn is_mismatch(&self) -> bool {
        matches!(self.status, LegStatus::Mismatch { .. })
    }
}

/// Outcome of one audit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileReport {
    pub leg_a: LegReconciliation,
    pub leg_b: LegReconciliation,
    /// `actual_a + actual_b`, when both snapshots were fetched.
    pub net_imbalance: Option<Decimal>,
    /// True if the net imbalance exceeded tolerance.
    pub imbalanced: bool,
    pub checked_at: DateTime<Utc>,
}

impl ReconcileReport {
    /// Returns true if every check passed.
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        self.leg_a.status == LegStatus::Matched
            && self.leg_b.status == LegStatus::Matched
            && !self.imbalanced
    }

    /// Number of alerts this audit raised.
    #[must_use]
    pub fn alert_count(&self) -> usize {
        usize::from(self.leg_a.is_mismatch())
            + usize::from(self.leg_b.is_mismatch())
            + usize::from(self.imbalanced)
    }

    #[must_use]
    pub fn leg(&self, leg: Leg) -> &LegReconciliation {
        match leg {
            Leg::A => &self.leg_a,
            Leg::B => &self.leg_b,
        }
    }
}

// =============================================================================
// Reconciler
// =============================================================================

/// Periodic read-only audit of venue positions.
pub struct PositionReconciler {
    config: ReconcilerConfig,
    venues: VenuePair,
    store: Arc<PositionStore>,
    bus: EventBus,
    trading_lock: Option<Arc<Mutex<()>>>,
    last_report: RwLock<Option<ReconcileReport>>,
}

impl std::fmt::Debug for PositionReconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PositionReconciler")
            .field("config", &self.config)
            .field("venues", &self.venues.names())
            .finish()
    }
}

impl PositionReconciler {
    #[must_use]
    pub fn new(
        config: ReconcilerConfig,
        venues: VenuePair,
        store: Arc<PositionStore>,
        bus: EventBus,
    ) -> Self {
        Self {
            config,
            venues,
            store,
            bus,
            trading_lock: None,
            last_report: RwLock::new(None),
        }
    }

    /// Audits only between execution cycles.
    #[must_use]
    pub fn with_trading_lock(mut self, lock: Arc<Mutex<()>>) -> Self {
        self.trading_lock = Some(lock);
        self
    }

    #[must_use]
    pub fn config(&self) -> &ReconcilerConfig {
        &self.config
    }

    /// Most recent audit result.
    #[must_use]
    pub fn last_report(&self) -> Option<ReconcileReport> {
        self.last_report.read().clone()
    }

    /// Runs one audit. Never fails: unreachable venues are reported as
    /// [`LegStatus::Unavailable`].
    pub async fn reconcile(&self) -> ReconcileReport {
        let _settled = match &self.trading_lock {
            Some(lock) => Some(lock.clone().lock_owned().await),
            None => None,
        };

        let (actual_a, actual_b) =
            tokio::join!(self.fetch(Leg::A), self.fetch(Leg::B));

        let leg_a = self.compare(Leg::A, actual_a);
        let leg_b = self.compare(Leg::B, actual_b);

        let net_imbalance = match (leg_a.actual, leg_b.actual) {
            (Some(a), Some(b)) => Some(a + b),
            _ => None,
        };
        let imbalanced = net_imbalance.is_some_and(|n| n.abs() > self.config.tolerance);

        if imbalanced {
            let net = net_imbalance.unwrap_or_default();
            self.bus.raise(
                Alert::critical(
                    AlertKind::HedgeImbalance,
                    format!(
                        "venue positions do not offset: {}={} {}={} net={}",
                        leg_a.venue,
                        leg_a.actual.unwrap_or_default(),
                        leg_b.venue,
                        leg_b.actual.unwrap_or_default(),
                        net
                    ),
                )
                .with_values(Decimal::ZERO, net),
            );
        }

        let report = ReconcileReport {
            leg_a,
            leg_b,
            net_imbalance,
            imbalanced,
            checked_at: Utc::now(),
        };

        if report.is_consistent() {
            info!(
                pos_a = ?report.leg_a.actual,
                pos_b = ?report.leg_b.actual,
                "Reconciliation passed"
            );
        }

        *self.last_report.write() = Some(report.clone());
        report
    }

    /// Audits every `interval` until `shutdown` flips to true.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.config.interval);
        // First tick fires immediately; the startup audit is done by the caller.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.reconcile().await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        debug!("Reconciler stopping");
                        return;
                    }
                }
            }
        }
    }

    async fn fetch(&self, leg: Leg) -> Result<Decimal, VenueError> {
        let client = &self.venues.get(leg).client;
        match tokio::time::timeout(self.config.snapshot_timeout, client.get_position()).await {
            Ok(result) => result,
            Err(_) => Err(VenueError::timeout(
                format!("{} get_position", client.name()),
                self.config.snapshot_timeout.as_millis() as u64,
            )),
        }
    }

    fn compare(&self, leg: Leg, fetched: Result<Decimal, VenueError>) -> LegReconciliation {
        let venue = self.venues.get(leg).name().to_string();
        let expected = self.store.net_exposure(leg);

        let actual = match fetched {
            Ok(actual) => actual,
            Err(e) => {
                warn!(leg = %leg, venue = %venue, error = %e, "Position snapshot unavailable");
                return LegReconciliation {
                    leg,
                    venue,
                    expected,
                    actual: None,
                    status: LegStatus::Unavailable {
                        error: e.to_string(),
                    },
                };
            }
        };

        let difference = actual - expected;
        let status = if difference.abs() > self.config.tolerance {
            error!(
                leg = %leg,
                venue = %venue,
                %expected,
                %actual,
                %difference,
                "Position mismatch"
            );
            self.bus.raise(
                Alert::critical(
                    AlertKind::ReconciliationMismatch,
                    format!(
                        "{venue} position {actual} differs from tracked {expected} by {difference}"
                    ),
                )
                .with_leg(leg)
                .with_values(expected, actual),
            );
            LegStatus::Mismatch { difference }
        } else {
            LegStatus::Matched
        };

        LegReconciliation {
            leg,
            venue,
            expected,
            actual: Some(actual),
            status,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ==================== Config Tests ====================

    #[test]
    fn test_reconciler_config_default() {
        let config = ReconcilerConfig::default();
        assert_eq!(config.interval, Duration::from_secs(1800));
        assert_eq!(config.tolerance, dec!(0.001));
    }

    #[test]
    fn test_reconciler_config_builders() {
        let config = ReconcilerConfig::default()
            .with_interval(Duration::from_secs(5))
            .with_tolerance(dec!(0.02));
        assert_eq!(config.interval, Duration::from_secs(5));
        assert_eq!(config.tolerance, dec!(0.02));
    }

    // ==================== Report Tests ====================

    fn line(leg: Leg, status: LegStatus) -> LegReconciliation {
        LegReconciliation {
            leg,
            venue: "v".to_string(),
            expected: dec!(0),
            actual: Some(dec!(0)),
            status,
        }
    }

    #[test]
    fn test_report_consistency() {
        let mut report = ReconcileReport {
            leg_a: line(Leg::A, LegStatus::Matched),
            leg_b: line(Leg::B, LegStatus::Matched),
            net_imbalance: Some(dec!(0)),
            imbalanced: false,
            checked_at: Utc::now(),
        };
        assert!(report.is_consistent());
        assert_eq!(report.alert_count(), 0);

        report.leg_b.status = LegStatus::Mismatch {
            difference: dec!(0.01),
        };
        report.imbalanced = true;
        assert!(!report.is_consistent());
        assert_eq!(report.alert_count(), 2);
        assert!(report.leg(Leg::B).is_mismatch());
    }

    #[test]
    fn test_unavailable_is_not_consistent() {
        let report = ReconcileReport {
            leg_a: line(
                Leg::A,
                LegStatus::Unavailable {
                    error: "timeout".to_string(),
                },
            ),
            leg_b: line(Leg::B, LegStatus::Matched),
            net_imbalance: None,
            imbalanced: false,
            checked_at: Utc::now(),
        };
        assert!(!report.is_consistent());
        assert_eq!(report.alert_count(), 0);
    }
}
