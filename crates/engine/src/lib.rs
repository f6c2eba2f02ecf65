//! Two-venue spread hedge execution.
//!
//! Watches the mid-price spread between two venues trading the same
//! instrument. When the spread widens past a threshold it sells the high
//! venue and buys the low one at the same size, and it unwinds both legs when
//! the spread reverts.
//!
//! The hard part is partial failure: two independent venues can each fail
//! on their own. Every execution cycle ends either hedged or with the
//! position explicitly flagged inconsistent and a critical alert raised.
//!
//! # Modules
//!
//! - [`price_feed`]: latest price per venue with a staleness bound
//! - [`retry`]: bounded exponential backoff with error classification
//! - [`circuit_breaker`]: per-venue closed/open/half-open breaker
//! - [`detector`]: spread decision table
//! - [`executor`]: concurrent dual-leg execution with single-leg unwind
//! - [`reconciler`]: periodic audit against venue position snapshots
//! - [`journal`]: write-through trade journal with realized PnL
//! - [`persistence`]: atomic open-position snapshot for crash recovery
//! - [`paper`]: simulated venue
//! - [`engine`]: the trading loop
//!
//! # Example
//!
//! ```ignore
//! use spread_hedge_engine::{EngineConfig, HedgeEngine, PaperVenue, PaperVenueConfig};
//!
//! let config = EngineConfig::default();
//! let a = Arc::new(PaperVenue::new("paper-a", config.paper.venue_a.clone()));
//! let b = Arc::new(PaperVenue::new("paper-b", config.paper.venue_b.clone()));
//!
//! let engine = Arc::new(HedgeEngine::new(config, a, b)?);
//! let (stop_tx, stop_rx) = tokio::sync::watch::channel(false);
//! engine.run(stop_rx).await;
//! ```

pub mod bus;
pub mod circuit_breaker;
pub mod config;
pub mod detector;
pub mod engine;
pub mod executor;
pub mod journal;
pub mod paper;
pub mod persistence;
pub mod position;
pub mod price_feed;
pub mod reconciler;
pub mod retry;
pub mod venues;

pub use bus::EventBus;
pub use circuit_breaker::{BreakerState, CircuitBreaker, CircuitBreakerConfig, CircuitBreakerSnapshot};
pub use config::{
    ConfigError, EngineConfig, JournalConfig, PairConfig, PaperConfig, RiskConfig, RunnerConfig,
};
pub use detector::{CooldownLocks, Decision, DetectorConfig, OpportunityDetector};
pub use engine::{EngineError, HedgeEngine, RunnerStats, SuppressReason, TickAction};
pub use executor::{
    DualLegExecutor, ExecutionOutcome, ExecutorConfig, ExecutorStats, LockDurations,
    TradingPermit, UnwindResult,
};
pub use journal::{
    realized_pnl, ClosedTrade, JournalError, JournalStats, OpenTrade, TradeExit, TradeFees,
    TradeJournal, TradeLayer,
};
pub use paper::{PaperVenue, PaperVenueConfig, ScriptedOutcome};
pub use persistence::{PersistenceError, PositionPersistence};
pub use position::{ArbitragePosition, PositionStatus, PositionStore, StoreSnapshot};
pub use price_feed::PriceFeed;
pub use reconciler::{LegReconciliation, LegStatus, PositionReconciler, ReconcileReport, ReconcilerConfig};
pub use retry::{with_retry, RetryConfig, RetryPolicy};
pub use venues::{VenueHandle, VenuePair};
