//! Per-venue circuit breaker.
//!
//! A small closed / open / half-open state machine wrapping every call to one
//! venue:
//!
//! - **Closed**: calls pass through. Each failure bumps the consecutive
//!   failure counter; reaching `failure_threshold` opens the breaker.
//! - **Open**: calls fail fast with [`VenueError::CircuitOpen`] and no network
//!   attempt is made. Once `reset_timeout` has elapsed since the last failure,
//!   the next call becomes the half-open probe.
//! - **Half-open**: exactly one trial call is in flight. Success closes the
//!   breaker; failure reopens it immediately.
//!
//! Time comes from `tokio::time::Instant`, so tests drive transitions with a
//! paused clock.
//!
//! # Example
//!
//! ```ignore
//! let breaker = CircuitBreaker::new("edgex", CircuitBreakerConfig::default());
//! let fill = breaker
//!     .execute(|| venue.place_market_order(Side::Buy, dec!(0.02), false))
//!     .await?;
//! ```

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use spread_hedge_core::serde_duration::millis;
use spread_hedge_core::{Alert, AlertKind, VenueError};
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{error, info, warn};

use crate::bus::EventBus;

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for a venue circuit breaker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open the breaker.
    /// Default: 5
    pub failure_threshold: u32,

    /// Hard deadline for a single wrapped call. Expiry counts as a failure.
    /// Default: 60s
    #[serde(with = "millis")]
    pub call_timeout: Duration,

    /// Time after the last failure before a half-open probe is allowed.
    /// Default: 30s
    #[serde(with = "millis")]
    pub reset_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            call_timeout: Duration::from_secs(60),
            reset_timeout: Duration::from_secs(30),
        }
    }
}

impl CircuitBreakerConfig {
    /// Trips faster and probes sooner. For small-size live testing.
    #[must_use]
    pub fn micro_testing() -> Self {
        Self {
            failure_threshold: 3,
            call_timeout: Duration::from_secs(10),
            reset_timeout: Duration::from_secs(10),
        }
    }

    /// Builder method to set the failure threshold.
    #[must_use]
    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold.max(1);
        self
    }

    /// Builder method to set the reset timeout.
    #[must_use]
    pub fn with_reset_timeout(mut self, timeout: Duration) -> Self {
        self.reset_timeout = timeout;
        self
    }

    /// Builder method to set the per-call timeout.
    #[must_use]
    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }
}

// =============================================================================
// State
// =============================================================================

/// Breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

impl std::fmt::Display for BreakerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::Open => write!(f, "open"),
            Self::HalfOpen => write!(f, "half-open"),
        }
    }
}

#[derive(Debug)]
struct Inner {
    state: BreakerState,
    consecutive_failures: u32,
    last_failure: Option<Instant>,
    last_failure_at: Option<DateTime<Utc>>,
    probe_in_flight: bool,
    manually_tripped: bool,
    times_opened: u32,
    rejected_calls: u64,
}

impl Inner {
    fn new() -> Self {
        Self {
            state: BreakerState::Closed,
            consecutive_failures: 0,
            last_failure: None,
            last_failure_at: None,
            probe_in_flight: false,
            manually_tripped: false,
            times_opened: 0,
            rejected_calls: 0,
        }
    }
}

/// Point-in-time view of a breaker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CircuitBreakerSnapshot {
    pub venue: String,
    pub state: BreakerState,
    pub consecutive_failures: u32,
    pub last_failure_at: Option<DateTime<Utc>>,
    pub times_opened: u32,
    pub rejected_calls: u64,
}

// =============================================================================
// Circuit Breaker
// =============================================================================

/// Circuit breaker for one venue.
pub struct CircuitBreaker {
    venue: String,
    config: CircuitBreakerConfig,
    inner: RwLock<Inner>,
    bus: Option<EventBus>,
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.read();
        f.debug_struct("CircuitBreaker")
            .field("venue", &self.venue)
            .field("state", &inner.state)
            .field("consecutive_failures", &inner.consecutive_failures)
            .finish()
    }
}

impl CircuitBreaker {
    /// Creates a closed breaker for `venue`.
    #[must_use]
    pub fn new(venue: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            venue: venue.into(),
            config,
            inner: RwLock::new(Inner::new()),
            bus: None,
        }
    }

    /// Raises a `CircuitOpen` alert on the bus whenever the breaker opens.
    #[must_use]
    pub fn with_bus(mut self, bus: EventBus) -> Self {
        self.bus = Some(bus);
        self
    }

    #[must_use]
    pub fn venue(&self) -> &str {
        &self.venue
    }

    #[must_use]
    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Runs `op` under breaker protection.
    ///
    /// # Errors
    /// - `VenueError::CircuitOpen` if the breaker rejects the call
    /// - `VenueError::Timeout` if `op` exceeds `call_timeout`
    /// - Whatever `op` returns
    pub async fn execute<T, F, Fut>(&self, op: F) -> Result<T, VenueError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, VenueError>>,
    {
        self.admit()?;

        let result = match tokio::time::timeout(self.config.call_timeout, op()).await {
            Ok(result) => result,
            Err(_) => Err(VenueError::timeout(
                format!("{} call", self.venue),
                self.config.call_timeout.as_millis() as u64,
            )),
        };

        match &result {
            Ok(_) => self.record_success(),
            Err(e) => self.record_failure(e),
        }
        result
    }

    /// Decides whether a call may proceed, moving open to half-open when due.
    fn admit(&self) -> Result<(), VenueError> {
        let mut inner = self.inner.write();

        if inner.manually_tripped {
            inner.rejected_calls += 1;
            return Err(VenueError::circuit_open(&self.venue, u64::MAX));
        }

        match inner.state {
            BreakerState::Closed => Ok(()),
            BreakerState::Open => {
                let elapsed = inner
                    .last_failure
                    .map_or(self.config.reset_timeout, |t| t.elapsed());
                if elapsed > self.config.reset_timeout {
                    inner.state = BreakerState::HalfOpen;
                    inner.probe_in_flight = true;
                    info!(venue = %self.venue, "Circuit breaker half-open, probing");
                    Ok(())
                } else {
                    inner.rejected_calls += 1;
                    let remaining = self.config.reset_timeout - elapsed;
                    Err(VenueError::circuit_open(
                        &self.venue,
                        remaining.as_secs_f64().ceil() as u64,
                    ))
                }
            }
            BreakerState::HalfOpen => {
                if inner.probe_in_flight {
                    inner.rejected_calls += 1;
                    Err(VenueError::circuit_open(&self.venue, 0))
                } else {
                    inner.probe_in_flight = true;
                    Ok(())
                }
            }
        }
    }

    /// Records a successful call.
    pub fn record_success(&self) {
        let mut inner = self.inner.write();
        if inner.state == BreakerState::HalfOpen {
            info!(venue = %self.venue, "Circuit breaker closed, venue recovered");
        }
        inner.state = BreakerState::Closed;
        inner.consecutive_failures = 0;
        inner.probe_in_flight = false;
    }

    /// Records a failed call.
    pub fn record_failure(&self, err: &VenueError) {
        let opened = {
            let mut inner = self.inner.write();
            inner.consecutive_failures += 1;
            inner.last_failure = Some(Instant::now());
            inner.last_failure_at = Some(Utc::now());
            inner.probe_in_flight = false;

            let should_open = inner.state == BreakerState::HalfOpen
                || inner.consecutive_failures >= self.config.failure_threshold;

            if should_open && inner.state != BreakerState::Open {
                inner.state = BreakerState::Open;
                inner.times_opened += 1;
                Some(inner.consecutive_failures)
            } else {
                None
            }
        };

        if let Some(failures) = opened {
            error!(
                venue = %self.venue,
                failures,
                error = %err,
                "Circuit breaker opened"
            );
            if let Some(bus) = &self.bus {
                bus.raise(
                    Alert::warning(
                        AlertKind::CircuitOpen,
                        format!(
                            "circuit breaker for {} opened after {} consecutive failures",
                            self.venue, failures
                        ),
                    )
                    .with_values(
                        self.config.failure_threshold.into(),
                        failures.into(),
                    ),
                );
            }
        } else {
            warn!(venue = %self.venue, error = %err, "Venue call failed");
        }
    }

    /// Forces the breaker open until [`reset`](Self::reset) is called.
    pub fn trip(&self) {
        let mut inner = self.inner.write();
        inner.manually_tripped = true;
        inner.state = BreakerState::Open;
    }

    /// Resets to closed with a clean counter.
    pub fn reset(&self) {
        let mut inner = self.inner.write();
        let times_opened = inner.times_opened;
        *inner = Inner::new();
        inner.times_opened = times_opened;
    }

    /// Returns the current state without triggering transitions.
    #[must_use]
    pub fn state(&self) -> BreakerState {
        self.inner.read().state
    }

    #[must_use]
    pub fn consecutive_failures(&self) -> u32 {
        self.inner.read().consecutive_failures
    }

    #[must_use]
    pub fn snapshot(&self) -> CircuitBreakerSnapshot {
        let inner = self.inner.read();
        CircuitBreakerSnapshot {
            venue: self.venue.clone(),
            state: inner.state,
            consecutive_failures: inner.consecutive_failures,
            last_failure_at: inner.last_failure_at,
            times_opened: inner.times_opened,
            rejected_calls: inner.rejected_calls,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn breaker(threshold: u32) -> CircuitBreaker {
        CircuitBreaker::new(
            "test-venue",
            CircuitBreakerConfig::default()
                .with_failure_threshold(threshold)
                .with_reset_timeout(Duration::from_secs(30)),
        )
    }

    async fn fail(b: &CircuitBreaker) -> Result<(), VenueError> {
        b.execute(|| async { Err(VenueError::api(503, "down")) })
            .await
    }

    async fn succeed(b: &CircuitBreaker) -> Result<u32, VenueError> {
        b.execute(|| async { Ok(7) }).await
    }

    // ==================== Configuration Tests ====================

    #[test]
    fn test_config_default_values() {
        let config = CircuitBreakerConfig::default();
        assert_eq!(config.failure_threshold, 5);
        assert_eq!(config.call_timeout, Duration::from_secs(60));
        assert_eq!(config.reset_timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_config_threshold_floor() {
        let config = CircuitBreakerConfig::default().with_failure_threshold(0);
        assert_eq!(config.failure_threshold, 1);
    }

    // ==================== Transition Tests ====================

    #[tokio::test(start_paused = true)]
    async fn test_opens_after_threshold_failures() {
        let b = breaker(3);

        assert!(fail(&b).await.is_err());
        assert!(fail(&b).await.is_err());
        assert_eq!(b.state(), BreakerState::Closed);

        assert!(fail(&b).await.is_err());
        assert_eq!(b.state(), BreakerState::Open);
        assert_eq!(b.consecutive_failures(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_fails_fast_without_calling() {
        let b = breaker(1);
        let _ = fail(&b).await;

        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let result = b
            .execute(|| async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .await;

        assert!(matches!(
            result,
            Err(VenueError::CircuitOpen { retry_in_secs: 30, .. })
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(b.snapshot().rejected_calls, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_after_reset_timeout_closes() {
        let b = breaker(3);
        for _ in 0..3 {
            let _ = fail(&b).await;
        }
        assert_eq!(b.state(), BreakerState::Open);

        tokio::time::advance(Duration::from_secs(31)).await;

        assert_eq!(succeed(&b).await, Ok(7));
        assert_eq!(b.state(), BreakerState::Closed);
        assert_eq!(b.consecutive_failures(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_failure_reopens_immediately() {
        let b = breaker(3);
        for _ in 0..3 {
            let _ = fail(&b).await;
        }
        tokio::time::advance(Duration::from_secs(31)).await;

        assert!(fail(&b).await.is_err());
        assert_eq!(b.state(), BreakerState::Open);

        // Freshly reopened: rejects again until the next reset window.
        assert!(matches!(
            succeed(&b).await,
            Err(VenueError::CircuitOpen { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_not_before_reset_timeout() {
        let b = breaker(1);
        let _ = fail(&b).await;

        tokio::time::advance(Duration::from_secs(30)).await;
        assert!(succeed(&b).await.is_err());
        assert_eq!(b.state(), BreakerState::Open);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_allows_single_probe() {
        let b = Arc::new(breaker(1));
        let _ = fail(&b).await;
        tokio::time::advance(Duration::from_secs(31)).await;

        let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();
        let probe_breaker = b.clone();
        let probe = tokio::spawn(async move {
            probe_breaker
                .execute(|| async move {
                    let _ = release_rx.await;
                    Ok(1)
                })
                .await
        });
        tokio::task::yield_now().await;
        assert_eq!(b.state(), BreakerState::HalfOpen);

        // Second caller is rejected while the probe is in flight.
        assert!(matches!(
            succeed(&b).await,
            Err(VenueError::CircuitOpen { .. })
        ));

        release_tx.send(()).unwrap();
        assert_eq!(probe.await.unwrap(), Ok(1));
        assert_eq!(b.state(), BreakerState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_resets_consecutive_count() {
        let b = breaker(3);
        let _ = fail(&b).await;
        let _ = fail(&b).await;
        let _ = succeed(&b).await;
        let _ = fail(&b).await;
        let _ = fail(&b).await;
        assert_eq!(b.state(), BreakerState::Closed);
        assert_eq!(b.consecutive_failures(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_call_timeout_counts_as_failure() {
        let b = CircuitBreaker::new(
            "slow",
            CircuitBreakerConfig::default()
                .with_failure_threshold(1)
                .with_call_timeout(Duration::from_millis(100)),
        );
        let result: Result<(), _> = b
            .execute(|| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            })
            .await;

        assert!(matches!(result, Err(VenueError::Timeout { .. })));
        assert_eq!(b.state(), BreakerState::Open);
    }

    // ==================== Manual Control Tests ====================

    #[tokio::test(start_paused = true)]
    async fn test_trip_and_reset() {
        let b = breaker(5);
        b.trip();
        assert!(succeed(&b).await.is_err());

        tokio::time::advance(Duration::from_secs(120)).await;
        assert!(succeed(&b).await.is_err());

        b.reset();
        assert_eq!(succeed(&b).await, Ok(7));
        assert_eq!(b.state(), BreakerState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_raises_alert_once() {
        let bus = EventBus::new();
        let b = breaker(2).with_bus(bus.clone());
        for _ in 0..4 {
            let _ = fail(&b).await;
        }
        assert_eq!(bus.alert_count(AlertKind::CircuitOpen), 1);
        assert_eq!(b.snapshot().times_opened, 1);
    }
}
