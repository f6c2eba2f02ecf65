//! Spread opportunity detection.
//!
//! [`OpportunityDetector::evaluate`] is a pure decision table over the two
//! venue prices, the current position, the cooldown locks, and the clock. It
//! performs no I/O and holds no mutable state, so identical inputs always
//! produce the identical [`Decision`].
//!
//! Rules, in priority order:
//!
//! 1. Any cooldown lock in effect: `None`.
//! 2. No position: open when `open_threshold <= spread <= max_spread`.
//! 3. Position open: close when `spread <= close_threshold`; force-close once
//!    held longer than `force_close_timeout`; otherwise add a layer when the
//!    spread has widened past `open_threshold + layers * add_on_step_spread`
//!    and the extra layer still fits under `max_position_size`.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use spread_hedge_core::serde_duration::millis;
use spread_hedge_core::{spread, PricePoint, SpreadDirection};
use std::time::Duration;
use tracing::trace;

use crate::position::ArbitragePosition;

// =============================================================================
// Detection Configuration
// =============================================================================

/// Thresholds and sizing for spread detection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectorConfig {
    /// Minimum spread to open a hedge.
    pub open_threshold: Decimal,

    /// Spread at or below which an open hedge is closed.
    pub close_threshold: Decimal,

    /// Spreads above this are treated as bad data and ignored for opening.
    pub max_spread: Decimal,

    /// Size of each layer, per leg.
    pub trade_amount: Decimal,

    /// Maximum number of layers, including the first.
    pub max_add_ons: u32,

    /// Extra spread required for each additional layer.
    pub add_on_step_spread: Decimal,

    /// Maximum total size per leg.
    pub max_position_size: Decimal,

    /// Maximum holding time before a forced close.
    #[serde(with = "millis")]
    pub force_close_timeout: Duration,

    /// No new decisions for this long after an open or add-on.
    #[serde(with = "millis")]
    pub open_lock_duration: Duration,

    /// No new decisions for this long after a close.
    #[serde(with = "millis")]
    pub close_lock_duration: Duration,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            open_threshold: dec!(80),
            close_threshold: dec!(20),
            max_spread: dec!(150),
            trade_amount: dec!(0.02),
            max_add_ons: 4,
            add_on_step_spread: dec!(5),
            max_position_size: dec!(0.05),
            force_close_timeout: Duration::from_secs(30 * 60),
            open_lock_duration: Duration::from_secs(10),
            close_lock_duration: Duration::from_secs(30),
        }
    }
}

impl DetectorConfig {
    /// Wider entry, single layer, shorter holds.
    #[must_use]
    pub fn conservative() -> Self {
        Self {
            open_threshold: dec!(100),
            close_threshold: dec!(20),
            max_spread: dec!(150),
            trade_amount: dec!(0.01),
            max_add_ons: 1,
            add_on_step_spread: dec!(10),
            max_position_size: dec!(0.01),
            force_close_timeout: Duration::from_secs(15 * 60),
            open_lock_duration: Duration::from_secs(15),
            close_lock_duration: Duration::from_secs(60),
        }
    }

    /// Tiny sizes for validating against live venues.
    #[must_use]
    pub fn micro_testing() -> Self {
        Self {
            trade_amount: dec!(0.001),
            max_position_size: dec!(0.003),
            ..Self::default()
        }
    }

    /// Sets open and close thresholds.
    #[must_use]
    pub fn with_thresholds(mut self, open: Decimal, close: Decimal) -> Self {
        self.open_threshold = open;
        self.close_threshold = close;
        self
    }

    /// Sets the maximum accepted spread.
    #[must_use]
    pub fn with_max_spread(mut self, max_spread: Decimal) -> Self {
        self.max_spread = max_spread;
        self
    }

    /// Sets layer size and position cap.
    #[must_use]
    pub fn with_sizing(mut self, trade_amount: Decimal, max_position_size: Decimal) -> Self {
        self.trade_amount = trade_amount;
        self.max_position_size = max_position_size;
        self
    }

    /// Sets the layer limit and per-layer spread step.
    #[must_use]
    pub fn with_add_ons(mut self, max_add_ons: u32, step: Decimal) -> Self {
        self.max_add_ons = max_add_ons;
        self.add_on_step_spread = step;
        self
    }

    /// Sets the forced-close holding limit.
    #[must_use]
    pub fn with_force_close_timeout(mut self, timeout: Duration) -> Self {
        self.force_close_timeout = timeout;
        self
    }
}

// =============================================================================
// Decision Types
// =============================================================================

/// Timestamps before which no new decision may be taken.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CooldownLocks {
    pub open_lock_until: Option<DateTime<Utc>>,
    pub close_lock_until: Option<DateTime<Utc>>,
}

impl CooldownLocks {
    /// Returns true if either lock is still in effect at `now`.
    #[must_use]
    pub fn is_locked(&self, now: DateTime<Utc>) -> bool {
        self.open_lock_until.is_some_and(|t| now < t)
            || self.close_lock_until.is_some_and(|t| now < t)
    }
}

/// Outcome of one detector evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Decision {
    None,
    /// Open a new hedge.
    Open(SpreadDirection),
    /// Add a layer to the open hedge.
    AddOn(SpreadDirection),
    /// Spread reverted; close the hedge.
    Close,
    /// Holding limit reached; close regardless of spread.
    ForceClose,
}

impl Decision {
    #[must_use]
    pub fn is_none(&self) -> bool {
        matches!(self, Self::None)
    }

    /// Open or AddOn.
    #[must_use]
    pub fn is_entry(&self) -> bool {
        matches!(self, Self::Open(_) | Self::AddOn(_))
    }

    /// Close or ForceClose.
    #[must_use]
    pub fn is_exit(&self) -> bool {
        matches!(self, Self::Close | Self::ForceClose)
    }

    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Open(_) => "open",
            Self::AddOn(_) => "add_on",
            Self::Close => "close",
            Self::ForceClose => "force_close",
        }
    }
}

impl std::fmt::Display for Decision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Open(d) | Self::AddOn(d) => write!(f, "{}({d})", self.label()),
            _ => write!(f, "{}", self.label()),
        }
    }
}

// =============================================================================
// Opportunity Detector
// =============================================================================

/// Spread decision table.
#[derive(Debug, Clone, Default)]
pub struct OpportunityDetector {
    config: DetectorConfig,
}

impl OpportunityDetector {
    #[must_use]
    pub fn new(config: DetectorConfig) -> Self {
        Self { config }
    }

    #[must_use]
    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    /// Evaluates the current market against the current position.
    ///
    /// A position that is not tradeable (closing, or flagged inconsistent)
    /// yields `None`: it blocks new entries but is never acted on here.
    #[must_use]
    pub fn evaluate(
        &self,
        price_a: &PricePoint,
        price_b: &PricePoint,
        position: Option<&ArbitragePosition>,
        locks: &CooldownLocks,
        now: DateTime<Utc>,
    ) -> Decision {
        if price_a.mid <= Decimal::ZERO || price_b.mid <= Decimal::ZERO {
            return Decision::None;
        }

        if locks.is_locked(now) {
            return Decision::None;
        }

        let spread = spread(price_a, price_b);
        let direction = SpreadDirection::from_mids(price_a.mid, price_b.mid);
        let cfg = &self.config;

        let Some(position) = position else {
            if spread >= cfg.open_threshold && spread <= cfg.max_spread {
                trace!(%spread, %direction, "Open signal");
                return Decision::Open(direction);
            }
            return Decision::None;
        };

        if !position.is_tradeable() {
            return Decision::None;
        }

        if spread <= cfg.close_threshold {
            return Decision::Close;
        }

        let held = position.hold_time(now).to_std().unwrap_or(Duration::ZERO);
        if held > cfg.force_close_timeout {
            return Decision::ForceClose;
        }

        if self.add_on_allowed(position, spread, direction) {
            return Decision::AddOn(direction);
        }

        Decision::None
    }

    fn add_on_allowed(
        &self,
        position: &ArbitragePosition,
        spread: Decimal,
        direction: SpreadDirection,
    ) -> bool {
        let cfg = &self.config;
        // Layers must stack on the same sides to keep the hedge intact.
        if direction != position.direction || position.layers >= cfg.max_add_ons {
            return false;
        }

        let layers = Decimal::from(position.layers);
        let threshold = cfg.open_threshold + layers * cfg.add_on_step_spread;
        let next_size = (layers + Decimal::ONE) * cfg.trade_amount;

        spread >= threshold && next_size <= cfg.max_position_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::position::tests::open_position;
    use spread_hedge_core::Leg;

    fn prices(a: Decimal, b: Decimal, now: DateTime<Utc>) -> (PricePoint, PricePoint) {
        (
            PricePoint::from_mid(Leg::A, a, now),
            PricePoint::from_mid(Leg::B, b, now),
        )
    }

    fn detector() -> OpportunityDetector {
        OpportunityDetector::new(
            DetectorConfig::default()
                .with_thresholds(dec!(80), dec!(40))
                .with_max_spread(dec!(150)),
        )
    }

    // ==================== Open Tests ====================

    #[test]
    fn test_open_when_spread_in_band() {
        let now = Utc::now();
        let (a, b) = prices(dec!(60100), dec!(60000), now);
        let decision = detector().evaluate(&a, &b, None, &CooldownLocks::default(), now);
        assert_eq!(decision, Decision::Open(SpreadDirection::AHigher));
    }

    #[test]
    fn test_open_direction_follows_high_venue() {
        let now = Utc::now();
        let (a, b) = prices(dec!(60000), dec!(60090), now);
        let decision = detector().evaluate(&a, &b, None, &CooldownLocks::default(), now);
        assert_eq!(decision, Decision::Open(SpreadDirection::BHigher));
    }

    #[test]
    fn test_no_open_below_threshold_or_above_max() {
        let now = Utc::now();
        let d = detector();
        let locks = CooldownLocks::default();

        let (a, b) = prices(dec!(60079), dec!(60000), now);
        assert_eq!(d.evaluate(&a, &b, None, &locks, now), Decision::None);

        let (a, b) = prices(dec!(60151), dec!(60000), now);
        assert_eq!(d.evaluate(&a, &b, None, &locks, now), Decision::None);

        let (a, b) = prices(dec!(60150), dec!(60000), now);
        assert!(d.evaluate(&a, &b, None, &locks, now).is_entry());
    }

    #[test]
    fn test_invalid_prices_yield_none() {
        let now = Utc::now();
        let (a, b) = prices(dec!(0), dec!(100), now);
        assert_eq!(
            detector().evaluate(&a, &b, None, &CooldownLocks::default(), now),
            Decision::None
        );
    }

    // ==================== Lock Tests ====================

    #[test]
    fn test_locks_suppress_decisions() {
        let now = Utc::now();
        let (a, b) = prices(dec!(60100), dec!(60000), now);
        let d = detector();

        let open_locked = CooldownLocks {
            open_lock_until: Some(now + chrono::Duration::seconds(5)),
            close_lock_until: None,
        };
        assert_eq!(d.evaluate(&a, &b, None, &open_locked, now), Decision::None);

        let close_locked = CooldownLocks {
            open_lock_until: None,
            close_lock_until: Some(now + chrono::Duration::seconds(5)),
        };
        assert_eq!(d.evaluate(&a, &b, None, &close_locked, now), Decision::None);

        let expired = CooldownLocks {
            open_lock_until: Some(now),
            close_lock_until: Some(now - chrono::Duration::seconds(1)),
        };
        assert!(d.evaluate(&a, &b, None, &expired, now).is_entry());
    }

    // ==================== Close Tests ====================

    #[test]
    fn test_close_when_spread_reverts() {
        let now = Utc::now();
        let pos = open_position();
        let (a, b) = prices(dec!(60030), dec!(60000), now);
        let decision = detector().evaluate(&a, &b, Some(&pos), &CooldownLocks::default(), now);
        assert_eq!(decision, Decision::Close);
    }

    #[test]
    fn test_force_close_after_timeout() {
        let mut pos = open_position();
        pos.open_time = Utc::now() - chrono::Duration::minutes(31);
        let now = Utc::now();
        let (a, b) = prices(dec!(60060), dec!(60000), now);
        let decision = detector().evaluate(&a, &b, Some(&pos), &CooldownLocks::default(), now);
        assert_eq!(decision, Decision::ForceClose);
    }

    #[test]
    fn test_close_takes_priority_over_force_close() {
        let mut pos = open_position();
        pos.open_time = Utc::now() - chrono::Duration::hours(2);
        let now = Utc::now();
        let (a, b) = prices(dec!(60010), dec!(60000), now);
        let decision = detector().evaluate(&a, &b, Some(&pos), &CooldownLocks::default(), now);
        assert_eq!(decision, Decision::Close);
    }

    #[test]
    fn test_hold_when_spread_between_thresholds() {
        let now = Utc::now();
        let pos = open_position();
        let (a, b) = prices(dec!(60060), dec!(60000), now);
        let decision = detector().evaluate(&a, &b, Some(&pos), &CooldownLocks::default(), now);
        assert_eq!(decision, Decision::None);
    }

    // ==================== Add-On Tests ====================

    #[test]
    fn test_add_on_when_spread_widens() {
        let now = Utc::now();
        let pos = open_position();
        // layers = 1, threshold = 80 + 1*5 = 85; next size 0.04 <= 0.05.
        let (a, b) = prices(dec!(60085), dec!(60000), now);
        let decision = detector().evaluate(&a, &b, Some(&pos), &CooldownLocks::default(), now);
        assert_eq!(decision, Decision::AddOn(SpreadDirection::AHigher));

        let (a, b) = prices(dec!(60084), dec!(60000), now);
        let decision = detector().evaluate(&a, &b, Some(&pos), &CooldownLocks::default(), now);
        assert_eq!(decision, Decision::None);
    }

    #[test]
    fn test_add_on_respects_position_cap() {
        let now = Utc::now();
        let mut pos = open_position();
        pos.layers = 2;
        // next size 3 * 0.02 = 0.06 > 0.05
        let (a, b) = prices(dec!(60120), dec!(60000), now);
        let decision = detector().evaluate(&a, &b, Some(&pos), &CooldownLocks::default(), now);
        assert_eq!(decision, Decision::None);
    }

    #[test]
    fn test_add_on_respects_layer_limit() {
        let now = Utc::now();
        let d = OpportunityDetector::new(
            DetectorConfig::default()
                .with_sizing(dec!(0.01), dec!(1))
                .with_add_ons(2, dec!(5)),
        );
        let mut pos = open_position();
        pos.layers = 2;
        let (a, b) = prices(dec!(60140), dec!(60000), now);
        assert_eq!(
            d.evaluate(&a, &b, Some(&pos), &CooldownLocks::default(), now),
            Decision::None
        );
    }

    #[test]
    fn test_no_add_on_against_position_direction() {
        let now = Utc::now();
        let pos = open_position();
        let (a, b) = prices(dec!(60000), dec!(60100), now);
        let decision = detector().evaluate(&a, &b, Some(&pos), &CooldownLocks::default(), now);
        assert_eq!(decision, Decision::None);
    }

    // ==================== Exclusion Tests ====================

    #[test]
    fn test_flagged_position_is_not_acted_on() {
        let now = Utc::now();
        let mut pos = open_position();
        pos.flag_inconsistent("unwind failed");
        let (a, b) = prices(dec!(60000), dec!(60000), now);
        let decision = detector().evaluate(&a, &b, Some(&pos), &CooldownLocks::default(), now);
        assert_eq!(decision, Decision::None);
    }

    #[test]
    fn test_evaluation_is_deterministic() {
        let now = Utc::now();
        let pos = open_position();
        let (a, b) = prices(dec!(60030), dec!(60000), now);
        let d = detector();
        let first = d.evaluate(&a, &b, Some(&pos), &CooldownLocks::default(), now);
        for _ in 0..10 {
            assert_eq!(
                d.evaluate(&a, &b, Some(&pos), &CooldownLocks::default(), now),
                first
            );
        }
    }

    #[test]
    fn test_decision_display() {
        assert_eq!(Decision::Open(SpreadDirection::AHigher).to_string(), "open(A>B)");
        assert_eq!(Decision::ForceClose.to_string(), "force_close");
    }
}
