//! Engine configuration.
//!
//! [`EngineConfig`] aggregates every component's settings. It is loaded by
//! [`ConfigLoader`](spread_hedge_core::ConfigLoader), so every section has a
//! complete `Default` and any subset of fields can be overridden from
//! `config/Config.toml` or `HEDGE_*` environment variables.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use spread_hedge_core::serde_duration::millis;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::circuit_breaker::CircuitBreakerConfig;
use crate::detector::DetectorConfig;
use crate::executor::ExecutorConfig;
use crate::paper::PaperVenueConfig;
use crate::reconciler::ReconcilerConfig;
use crate::retry::RetryConfig;

/// Rejected configuration.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A field is outside its valid range.
    #[error("invalid {field}: {reason}")]
    Invalid {
        /// Dotted field path.
        field: &'static str,
        /// What is wrong with it.
        reason: String,
    },
}

impl ConfigError {
    fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field,
            reason: reason.into(),
        }
    }
}

// =============================================================================
// Sections
// =============================================================================

/// The instrument and the two venues trading it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PairConfig {
    /// Instrument symbol, e.g. `BTC`.
    pub symbol: String,
    /// Venue name for leg A.
    pub venue_a: String,
    /// Venue name for leg B.
    pub venue_b: String,
}

impl Default for PairConfig {
    fn default() -> Self {
        Self {
            symbol: "BTC".to_string(),
            venue_a: "paper-a".to_string(),
            venue_b: "paper-b".to_string(),
        }
    }
}

/// Where the journal and position snapshot live.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalConfig {
    pub data_dir: PathBuf,
    pub journal_file: String,
    pub snapshot_file: String,
}

impl Default for JournalConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            journal_file: "trade-journal.json".to_string(),
            snapshot_file: "open-position.json".to_string(),
        }
    }
}

impl JournalConfig {
    #[must_use]
    pub fn journal_path(&self) -> PathBuf {
        self.data_dir.join(&self.journal_file)
    }

    #[must_use]
    pub fn snapshot_path(&self) -> PathBuf {
        self.data_dir.join(&self.snapshot_file)
    }

    #[must_use]
    pub fn with_data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.data_dir = dir.into();
        self
    }
}

/// Gates on new exposure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskConfig {
    /// Realized loss for the UTC day at which new entries stop.
    /// Default: 200
    pub daily_loss_limit: Decimal,

    /// Suppress new entries while any position is flagged inconsistent.
    /// Default: true
    pub halt_on_inconsistent: bool,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            daily_loss_limit: dec!(200),
            halt_on_inconsistent: true,
        }
    }
}

/// Trading loop timing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunnerConfig {
    /// Trading loop period.
    /// Default: 100ms
    #[serde(with = "millis")]
    pub tick_interval: Duration,

    /// Prices older than this are stale and refetched.
    /// Default: 30s
    #[serde(with = "millis")]
    pub max_price_age: Duration,

    /// Period of the statistics log line.
    /// Default: 5 minutes
    #[serde(with = "millis")]
    pub stats_interval: Duration,

    /// Force-close the open hedge on shutdown.
    /// Default: true
    pub close_on_shutdown: bool,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_millis(100),
            max_price_age: Duration::from_secs(30),
            stats_interval: Duration::from_secs(5 * 60),
            close_on_shutdown: true,
        }
    }
}

/// Simulated venues used by `spread-hedge run`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaperConfig {
    pub venue_a: PaperVenueConfig,
    pub venue_b: PaperVenueConfig,
}

impl Default for PaperConfig {
    fn default() -> Self {
        Self {
            venue_a: PaperVenueConfig::default()
                .with_mid(dec!(60000))
                .with_random_walk(4.0, 1),
            venue_b: PaperVenueConfig::default()
                .with_mid(dec!(60000))
                .with_random_walk(4.0, 2),
        }
    }
}

// =============================================================================
// Engine Config
// =============================================================================

/// Complete engine configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    pub pair: PairConfig,
    pub detector: DetectorConfig,
    pub retry: RetryConfig,
    pub circuit_breaker: CircuitBreakerConfig,
    pub executor: ExecutorConfig,
    pub reconciler: ReconcilerConfig,
    pub journal: JournalConfig,
    pub risk: RiskConfig,
    pub runner: RunnerConfig,
    pub paper: PaperConfig,
}

impl EngineConfig {
    /// Conservative sizing and slower retries.
    #[must_use]
    pub fn conservative() -> Self {
        Self {
            detector: DetectorConfig::conservative(),
            executor: ExecutorConfig::conservative(),
            risk: RiskConfig {
                daily_loss_limit: dec!(50),
                halt_on_inconsistent: true,
            },
            ..Self::default()
        }
    }

    /// Tiny sizes and fast-tripping breakers for live smoke tests.
    #[must_use]
    pub fn micro_testing() -> Self {
        Self {
            detector: DetectorConfig::micro_testing(),
            circuit_breaker: CircuitBreakerConfig::micro_testing(),
            reconciler: ReconcilerConfig::micro_testing(),
            risk: RiskConfig {
                daily_loss_limit: dec!(10),
                halt_on_inconsistent: true,
            },
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_detector(mut self, detector: DetectorConfig) -> Self {
        self.detector = detector;
        self
    }

    #[must_use]
    pub fn with_journal(mut self, journal: JournalConfig) -> Self {
        self.journal = journal;
        self
    }

    #[must_use]
    pub fn with_runner(mut self, runner: RunnerConfig) -> Self {
        self.runner = runner;
        self
    }

    /// Checks cross-field constraints.
    ///
    /// # Errors
    /// Returns the first invalid field found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let d = &self.detector;
        if d.close_threshold >= d.open_threshold {
            return Err(ConfigError::invalid(
                "detector.close_threshold",
                format!(
                    "{} must be below open_threshold {}",
                    d.close_threshold, d.open_threshold
                ),
            ));
        }
        if d.max_spread < d.open_threshold {
            return Err(ConfigError::invalid(
                "detector.max_spread",
                format!("{} is below open_threshold {}", d.max_spread, d.open_threshold),
            ));
        }
        if d.trade_amount <= Decimal::ZERO {
            return Err(ConfigError::invalid(
                "detector.trade_amount",
                "must be positive",
            ));
        }
        if d.trade_amount > d.max_position_size {
            return Err(ConfigError::invalid(
                "detector.max_position_size",
                format!(
                    "{} is below trade_amount {}",
                    d.max_position_size, d.trade_amount
                ),
            ));
        }
        if d.max_add_ons == 0 {
            return Err(ConfigError::invalid(
                "detector.max_add_ons",
                "must allow at least the initial layer",
            ));
        }
        if !self.retry.backoff_multiplier.is_finite() || self.retry.backoff_multiplier < 1.0 {
            return Err(ConfigError::invalid(
                "retry.backoff_multiplier",
                format!("{} must be at least 1", self.retry.backoff_multiplier),
            ));
        }
        if self.circuit_breaker.failure_threshold == 0 {
            return Err(ConfigError::invalid(
                "circuit_breaker.failure_threshold",
                "must be at least 1",
            ));
        }
        if self.executor.leg_timeout.is_zero() {
            return Err(ConfigError::invalid("executor.leg_timeout", "must be non-zero"));
        }
        if self.reconciler.tolerance < Decimal::ZERO {
            return Err(ConfigError::invalid(
                "reconciler.tolerance",
                "must not be negative",
            ));
        }
        if self.runner.tick_interval.is_zero() {
            return Err(ConfigError::invalid("runner.tick_interval", "must be non-zero"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ==================== Default Tests ====================

    #[test]
    fn test_defaults_are_valid() {
        assert!(EngineConfig::default().validate().is_ok());
        assert!(EngineConfig::conservative().validate().is_ok());
        assert!(EngineConfig::micro_testing().validate().is_ok());
    }

    #[test]
    fn test_default_values() {
        let config = EngineConfig::default();
        assert_eq!(config.risk.daily_loss_limit, dec!(200));
        assert!(config.risk.halt_on_inconsistent);
        assert_eq!(config.runner.tick_interval, Duration::from_millis(100));
        assert_eq!(config.runner.stats_interval, Duration::from_secs(300));
        assert!(config.runner.close_on_shutdown);
        assert_eq!(
            config.journal.snapshot_path(),
            PathBuf::from("data").join("open-position.json")
        );
    }

    // ==================== Validation Tests ====================

    #[test]
    fn test_rejects_inverted_thresholds() {
        let config = EngineConfig::default()
            .with_detector(DetectorConfig::default().with_thresholds(dec!(20), dec!(30)));
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("detector.close_threshold"));
    }

    #[test]
    fn test_rejects_oversized_trade() {
        let config = EngineConfig::default()
            .with_detector(DetectorConfig::default().with_sizing(dec!(0.1), dec!(0.05)));
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid {
                field: "detector.max_position_size",
                ..
            })
        ));
    }

    #[test]
    fn test_rejects_shrinking_backoff() {
        let mut config = EngineConfig::default();
        config.retry = config.retry.with_multiplier(0.5);
        assert!(config.validate().is_err());
    }

    // ==================== Serialization Tests ====================

    #[test]
    fn test_durations_serialize_as_millis() {
        let json = serde_json::to_value(EngineConfig::default()).unwrap();
        assert_eq!(json["runner"]["tick_interval"], 100);
        assert_eq!(json["detector"]["open_lock_duration"], 10_000);
        assert_eq!(json["executor"]["leg_timeout"], 1500);
    }
}
