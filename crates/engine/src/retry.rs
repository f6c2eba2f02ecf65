//! Bounded exponential-backoff retry for venue calls.
//!
//! Errors are classified by substring match of the configured keywords against
//! the error text and its code. Errors the venue reports as fatal (bad
//! parameters, insufficient balance, rejection) surface on first occurrence.
//!
//! # Example
//!
//! ```ignore
//! let policy = RetryPolicy::new(RetryConfig::default());
//! let fill = policy
//!     .execute("A place_market_order", || venue.place_market_order(side, amount, false))
//!     .await?;
//! ```

use serde::{Deserialize, Serialize};
use spread_hedge_core::serde_duration::millis;
use spread_hedge_core::VenueError;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Keywords that mark an error as transient.
pub const DEFAULT_RETRYABLE_MATCHERS: [&str; 9] = [
    "timeout",
    "econnreset",
    "etimedout",
    "enotfound",
    "network",
    "429",
    "502",
    "503",
    "504",
];

// =============================================================================
// Configuration
// =============================================================================

/// Retry configuration. Immutable per call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Retries after the first attempt.
    pub max_retries: u32,

    /// Delay before the first retry.
    #[serde(with = "millis")]
    pub initial_delay: Duration,

    /// Upper bound for any single delay.
    #[serde(with = "millis")]
    pub max_delay: Duration,

    /// Factor applied to the delay after each retry.
    pub backoff_multiplier: f64,

    /// Case-insensitive substrings matched against error text and code.
    pub retryable_matchers: Vec<String>,

    /// Retry every error, including fatal ones. Used for compensating orders.
    #[serde(default)]
    pub retry_all_errors: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(10_000),
            backoff_multiplier: 2.0,
            retryable_matchers: DEFAULT_RETRYABLE_MATCHERS
                .iter()
                .map(|s| (*s).to_string())
                .collect(),
            retry_all_errors: false,
        }
    }
}

impl RetryConfig {
    /// Fixed-delay policy for unwinding a lone leg: 3 attempts, 2s apart.
    #[must_use]
    pub fn unwind() -> Self {
        Self {
            max_retries: 2,
            initial_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(2),
            backoff_multiplier: 1.0,
            retry_all_errors: true,
            ..Default::default()
        }
    }

    /// Single attempt, no retry.
    #[must_use]
    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            ..Default::default()
        }
    }

    /// Sets the maximum number of retries.
    #[must_use]
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Sets initial and maximum delays.
    #[must_use]
    pub fn with_delays(mut self, initial: Duration, max: Duration) -> Self {
        self.initial_delay = initial;
        self.max_delay = max;
        self
    }

    /// Sets the backoff multiplier.
    #[must_use]
    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Replaces the retryable keyword set.
    #[must_use]
    pub fn with_matchers<I, S>(mut self, matchers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.retryable_matchers = matchers.into_iter().map(Into::into).collect();
        self
    }

    /// Returns true if `err` should be retried under this config.
    #[must_use]
    pub fn is_retryable(&self, err: &VenueError) -> bool {
        if self.retry_all_errors {
            return true;
        }
        if err.is_fatal() {
            return false;
        }

        let text = err.to_string().to_lowercase();
        let code = err.code().map(|c| c.to_lowercase());

        self.retryable_matchers.iter().any(|m| {
            let m = m.to_lowercase();
            text.contains(&m) || code.as_deref().is_some_and(|c| c.contains(&m))
        })
    }

    /// Returns the delay that follows `current`, capped at `max_delay`.
    #[must_use]
    pub fn next_delay(&self, current: Duration) -> Duration {
        let next = current.as_secs_f64() * self.backoff_multiplier;
        let cap = self.max_delay.as_secs_f64();
        if !next.is_finite() || next >= cap {
            return self.max_delay;
        }
        Duration::from_secs_f64(next.max(0.0))
    }

    /// The first `count` retry delays.
    #[must_use]
    pub fn backoff_schedule(&self, count: usize) -> Vec<Duration> {
        let mut delays = Vec::with_capacity(count);
        let mut delay = self.initial_delay.min(self.max_delay);
        for _ in 0..count {
            delays.push(delay);
            delay = self.next_delay(delay);
        }
        delays
    }
}

// =============================================================================
// Policy
// =============================================================================

/// Retry executor bound to one [`RetryConfig`].
#[derive(Debug, Clone, Default)]
pub struct RetryPolicy {
    config: RetryConfig,
}

impl RetryPolicy {
    #[must_use]
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    #[must_use]
    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Runs `op` until it succeeds, fails non-retryably, or retries run out.
    ///
    /// # Errors
    /// Returns the last error observed.
    pub async fn execute<T, F, Fut>(&self, context: &str, op: F) -> Result<T, VenueError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, VenueError>>,
    {
        with_retry(&self.config, context, op).await
    }
}

/// Runs `op` under `config`. See [`RetryPolicy::execute`].
///
/// # Errors
/// Returns the last error observed.
pub async fn with_retry<T, F, Fut>(
    config: &RetryConfig,
    context: &str,
    mut op: F,
) -> Result<T, VenueError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, VenueError>>,
{
    let mut delay = config.initial_delay.min(config.max_delay);
    let mut attempt: u32 = 0;

    loop {
        match op().await {
            Ok(value) => {
                if attempt > 0 {
                    debug!(context, attempt, "Succeeded after retry");
                }
                return Ok(value);
            }
            Err(e) if attempt < config.max_retries && config.is_retryable(&e) => {
                attempt += 1;
                warn!(
                    context,
                    attempt,
                    max_retries = config.max_retries,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Retryable failure, backing off"
                );
                tokio::time::sleep(delay).await;
                delay = config.next_delay(delay);
            }
            Err(e) => {
                if attempt > 0 {
                    warn!(context, attempts = attempt + 1, error = %e, "Giving up");
                }
                return Err(e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    // ==================== Backoff Tests ====================

    #[test]
    fn test_backoff_sequence_is_capped() {
        let config = RetryConfig::default();
        let schedule: Vec<u128> = config
            .backoff_schedule(7)
            .iter()
            .map(Duration::as_millis)
            .collect();
        assert_eq!(schedule, vec![1000, 2000, 4000, 8000, 10000, 10000, 10000]);
    }

    #[test]
    fn test_fixed_delay_unwind_schedule() {
        let config = RetryConfig::unwind();
        let schedule = config.backoff_schedule(3);
        assert!(schedule.iter().all(|d| *d == Duration::from_secs(2)));
    }

    // ==================== Classification Tests ====================

    #[test]
    fn test_transient_errors_are_retryable() {
        let config = RetryConfig::default();
        assert!(config.is_retryable(&VenueError::timeout("order", 1500)));
        assert!(config.is_retryable(&VenueError::ConnectionReset("peer".into())));
        assert!(config.is_retryable(&VenueError::Network("dns".into())));
        assert!(config.is_retryable(&VenueError::api(429, "slow down")));
        assert!(config.is_retryable(&VenueError::api(502, "bad gateway")));
        assert!(config.is_retryable(&VenueError::api(503, "unavailable")));
        assert!(config.is_retryable(&VenueError::api(504, "gateway timeout")));
    }

    #[test]
    fn test_fatal_errors_are_not_retryable() {
        let config = RetryConfig::default();
        assert!(!config.is_retryable(&VenueError::insufficient_balance(1000, 10)));
        assert!(!config.is_retryable(&VenueError::InvalidOrder("size".into())));
        // Fatal wins even when the message contains a keyword.
        assert!(!config.is_retryable(&VenueError::Rejected("network policy".into())));
        assert!(!config.is_retryable(&VenueError::api(400, "bad request")));
    }

    #[test]
    fn test_custom_matchers() {
        let config = RetryConfig::default().with_matchers(["maintenance"]);
        assert!(config.is_retryable(&VenueError::api(500, "Scheduled MAINTENANCE")));
        assert!(!config.is_retryable(&VenueError::timeout("order", 1)));
    }

    #[test]
    fn test_retry_all_errors() {
        let config = RetryConfig::unwind();
        assert!(config.is_retryable(&VenueError::insufficient_balance(1, 0)));
    }

    // ==================== Execution Tests ====================

    #[tokio::test(start_paused = true)]
    async fn test_retries_until_success() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result = with_retry(&RetryConfig::default(), "test", || {
            let counter = counter.clone();
            async move {
                let n = counter.fetch_add(1, Ordering::SeqCst);
                if n < 2 {
                    Err(VenueError::timeout("order", 1500))
                } else {
                    Ok(n)
                }
            }
        })
        .await;

        assert_eq!(result, Ok(2));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausts_retries() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let start = tokio::time::Instant::now();

        let result: Result<(), _> = with_retry(&RetryConfig::default(), "test", || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(VenueError::api(503, "down"))
            }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        // 1s + 2s + 4s of backoff.
        assert_eq!(start.elapsed(), Duration::from_secs(7));
    }

    #[tokio::test(start_paused = true)]
    async fn test_fatal_error_surfaces_immediately() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result: Result<(), _> = with_retry(&RetryConfig::default(), "test", || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(VenueError::insufficient_balance(100, 1))
            }
        })
        .await;

        assert!(matches!(result, Err(VenueError::InsufficientBalance { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_no_retry_config_single_attempt() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let policy = RetryPolicy::new(RetryConfig::no_retry());

        let result: Result<(), _> = policy
            .execute("test", || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(VenueError::timeout("order", 1))
                }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
