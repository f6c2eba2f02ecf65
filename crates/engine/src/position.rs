//! Hedged position model and the live position store.
//!
//! An [`ArbitragePosition`] is one hedge: a short on the high venue and an
//! equal long on the low venue, possibly built up over several layers. While
//! it is open it must satisfy the hedge invariant (opposite sides, equal net
//! size on both legs). A position that cannot be brought back to that state is
//! flagged inconsistent and parked outside automated logic.
//!
//! [`PositionStore`] is written only by the executor while it holds the
//! trading lock; everything else reads snapshots.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use spread_hedge_core::{Fill, Leg, Side, SpreadDirection};
use uuid::Uuid;

use crate::detector::CooldownLocks;

// =============================================================================
// Position Types
// =============================================================================

/// Lifecycle of a hedge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PositionStatus {
    /// Both legs filled and hedged.
    Open,
    /// Close orders in flight.
    Closing,
    /// Fully closed.
    Closed,
}

impl std::fmt::Display for PositionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Open => write!(f, "open"),
            Self::Closing => write!(f, "closing"),
            Self::Closed => write!(f, "closed"),
        }
    }
}

/// Reason a hedge invariant check failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HedgeViolation(pub String);

impl std::fmt::Display for HedgeViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A two-leg hedged position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArbitragePosition {
    /// Unique position identifier.
    pub id: Uuid,
    /// Spread direction at entry.
    pub direction: SpreadDirection,

    /// Venue name for leg A.
    pub leg_a_venue: String,
    /// Opening side on leg A.
    pub leg_a_side: Side,
    /// Venue name for leg B.
    pub leg_b_venue: String,
    /// Opening side on leg B.
    pub leg_b_side: Side,

    /// Hedged size per leg.
    pub amount: Decimal,
    /// Size-weighted entry price on leg A.
    pub entry_price_a: Decimal,
    /// Size-weighted entry price on leg B.
    pub entry_price_b: Decimal,
    /// Spread observed when the first layer was opened.
    pub entry_spread: Decimal,
    /// When the first layer was opened.
    pub open_time: DateTime<Utc>,
    /// Number of layers (1 after the initial open).
    pub layers: u32,

    /// Current lifecycle status.
    pub status: PositionStatus,
    /// All fills on leg A, opening and closing.
    pub fills_a: Vec<Fill>,
    /// All fills on leg B, opening and closing.
    pub fills_b: Vec<Fill>,

    /// Set when the hedge invariant could not be restored.
    pub inconsistent: bool,
    /// Why the position was flagged.
    pub inconsistency: Option<String>,
}

impl ArbitragePosition {
    /// Creates an open position from a pair of opening fills.
    #[must_use]
    pub fn open(
        direction: SpreadDirection,
        venues: (&str, &str),
        fill_a: Fill,
        fill_b: Fill,
        entry_spread: Decimal,
        open_time: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            direction,
            leg_a_venue: venues.0.to_string(),
            leg_a_side: direction.side_for(Leg::A),
            leg_b_venue: venues.1.to_string(),
            leg_b_side: direction.side_for(Leg::B),
            amount: fill_a.size.min(fill_b.size),
            entry_price_a: fill_a.price,
            entry_price_b: fill_b.price,
            entry_spread,
            open_time,
            layers: 1,
            status: PositionStatus::Open,
            fills_a: vec![fill_a],
            fills_b: vec![fill_b],
            inconsistent: false,
            inconsistency: None,
        }
    }

    /// Creates a position record holding a lone leg that could not be unwound.
    ///
    /// The result is already flagged inconsistent.
    #[must_use]
    pub fn single_leg(
        direction: SpreadDirection,
        venues: (&str, &str),
        leg: Leg,
        fill: Fill,
        spread: Decimal,
        open_time: DateTime<Utc>,
        reason: impl Into<String>,
    ) -> Self {
        let (entry_a, entry_b) = match leg {
            Leg::A => (fill.price, Decimal::ZERO),
            Leg::B => (Decimal::ZERO, fill.price),
        };
        let amount = fill.size;
        let (fills_a, fills_b) = match leg {
            Leg::A => (vec![fill], Vec::new()),
            Leg::B => (Vec::new(), vec![fill]),
        };
        let mut position = Self {
            id: Uuid::new_v4(),
            direction,
            leg_a_venue: venues.0.to_string(),
            leg_a_side: direction.side_for(Leg::A),
            leg_b_venue: venues.1.to_string(),
            leg_b_side: direction.side_for(Leg::B),
            amount,
            entry_price_a: entry_a,
            entry_price_b: entry_b,
            entry_spread: spread,
            open_time,
            layers: 1,
            status: PositionStatus::Open,
            fills_a,
            fills_b,
            inconsistent: false,
            inconsistency: None,
        };
        position.flag_inconsistent(reason);
        position
    }

    #[must_use]
    pub fn side(&self, leg: Leg) -> Side {
        match leg {
            Leg::A => self.leg_a_side,
            Leg::B => self.leg_b_side,
        }
    }

    #[must_use]
    pub fn venue(&self, leg: Leg) -> &str {
        match leg {
            Leg::A => &self.leg_a_venue,
            Leg::B => &self.leg_b_venue,
        }
    }

    #[must_use]
    pub fn fills(&self, leg: Leg) -> &[Fill] {
        match leg {
            Leg::A => &self.fills_a,
            Leg::B => &self.fills_b,
        }
    }

    #[must_use]
    pub fn entry_price(&self, leg: Leg) -> Decimal {
        match leg {
            Leg::A => self.entry_price_a,
            Leg::B => self.entry_price_b,
        }
    }

    /// Appends a fill to a leg.
    pub fn push_fill(&mut self, leg: Leg, fill: Fill) {
        match leg {
            Leg::A => self.fills_a.push(fill),
            Leg::B => self.fills_b.push(fill),
        }
    }

    /// Net signed exposure on a leg, from all recorded fills.
    #[must_use]
    pub fn net_exposure(&self, leg: Leg) -> Decimal {
        self.fills(leg).iter().map(Fill::signed_size).sum()
    }

    /// Fills on `leg` that reduce the opening side.
    pub fn closing_fills(&self, leg: Leg) -> impl Iterator<Item = &Fill> {
        let opening = self.side(leg);
        self.fills(leg).iter().filter(move |f| f.side != opening)
    }

    /// Size-weighted exit price on a leg, if any closing fills exist.
    #[must_use]
    pub fn exit_price(&self, leg: Leg) -> Option<Decimal> {
        let (size, notional) = self
            .closing_fills(leg)
            .fold((Decimal::ZERO, Decimal::ZERO), |(s, n), f| {
                (s + f.size, n + f.notional())
            });
        if size.is_zero() {
            None
        } else {
            Some(notional / size)
        }
    }

    /// Fees paid on a leg for opening fills.
    #[must_use]
    pub fn open_fees(&self, leg: Leg) -> Decimal {
        let opening = self.side(leg);
        self.fills(leg)
            .iter()
            .filter(|f| f.side == opening)
            .map(|f| f.fee)
            .sum()
    }

    /// Fees paid on a leg for closing fills.
    #[must_use]
    pub fn close_fees(&self, leg: Leg) -> Decimal {
        self.closing_fills(leg).map(|f| f.fee).sum()
    }

    /// Merges an add-on layer, recomputing weighted entry prices.
    pub fn add_layer(&mut self, fill_a: Fill, fill_b: Fill) {
        let added = fill_a.size.min(fill_b.size);
        let total = self.amount + added;
        if !total.is_zero() {
            self.entry_price_a =
                (self.entry_price_a * self.amount + fill_a.price * fill_a.size)
                    / (self.amount + fill_a.size);
            self.entry_price_b =
                (self.entry_price_b * self.amount + fill_b.price * fill_b.size)
                    / (self.amount + fill_b.size);
        }
        self.amount = total;
        self.layers += 1;
        self.fills_a.push(fill_a);
        self.fills_b.push(fill_b);
    }

    /// Checks the hedge invariant: opposite sides, net exposure of `amount`
    /// on each leg in its opening direction, within `tolerance`.
    ///
    /// # Errors
    /// Returns a description of the first violation found.
    pub fn check_hedge(&self, tolerance: Decimal) -> Result<(), HedgeViolation> {
        if self.leg_a_side == self.leg_b_side {
            return Err(HedgeViolation(format!(
                "both legs are {}",
                self.leg_a_side
            )));
        }

        for leg in Leg::ALL {
            let expected = self.amount * self.side(leg).sign();
            let actual = self.net_exposure(leg);
            if (actual - expected).abs() > tolerance {
                return Err(HedgeViolation(format!(
                    "leg {leg} net {actual} != expected {expected}"
                )));
            }
        }

        Ok(())
    }

    /// Marks the position inconsistent.
    pub fn flag_inconsistent(&mut self, reason: impl Into<String>) {
        self.inconsistent = true;
        self.inconsistency = Some(reason.into());
    }

    /// Returns true if automated logic may act on this position.
    #[must_use]
    pub fn is_tradeable(&self) -> bool {
        self.status == PositionStatus::Open && !self.inconsistent
    }

    /// Time held at `now`.
    #[must_use]
    pub fn hold_time(&self, now: DateTime<Utc>) -> chrono::Duration {
        now - self.open_time
    }
}

// =============================================================================
// Position Store
// =============================================================================

/// Serializable view of the store, used for crash recovery.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoreSnapshot {
    /// The tradeable position, if any.
    pub active: Option<ArbitragePosition>,
    /// Positions flagged inconsistent awaiting operator action.
    pub flagged: Vec<ArbitragePosition>,
    /// Cooldowns survive a restart so a crash cannot skip them.
    #[serde(default)]
    pub locks: CooldownLocks,
}

impl StoreSnapshot {
    /// Returns true if no position is open or flagged.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.active.is_none() && self.flagged.is_empty()
    }

    /// Returns true if nothing is open and no cooldown is still running at `now`.
    #[must_use]
    pub fn is_disposable(&self, now: DateTime<Utc>) -> bool {
        self.is_empty() && !self.locks.is_locked(now)
    }
}

#[derive(Debug, Default)]
struct StoreState {
    active: Option<ArbitragePosition>,
    flagged: Vec<ArbitragePosition>,
    locks: CooldownLocks,
}

/// Live set of positions plus the cooldown lock timestamps.
#[derive(Debug, Default)]
pub struct PositionStore {
    state: RwLock<StoreState>,
}

impl PositionStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuilds a store from a persisted snapshot.
    #[must_use]
    pub fn from_snapshot(snapshot: StoreSnapshot) -> Self {
        Self {
            state: RwLock::new(StoreState {
                active: snapshot.active,
                flagged: snapshot.flagged,
                locks: snapshot.locks,
            }),
        }
    }

    #[must_use]
    pub fn snapshot(&self) -> StoreSnapshot {
        let state = self.state.read();
        StoreSnapshot {
            active: state.active.clone(),
            flagged: state.flagged.clone(),
            locks: state.locks,
        }
    }

    /// The tradeable position, if any.
    #[must_use]
    pub fn active(&self) -> Option<ArbitragePosition> {
        self.state.read().active.clone()
    }

    #[must_use]
    pub fn has_active(&self) -> bool {
        self.state.read().active.is_some()
    }

    pub fn set_active(&self, position: ArbitragePosition) {
        self.state.write().active = Some(position);
    }

    pub fn take_active(&self) -> Option<ArbitragePosition> {
        self.state.write().active.take()
    }

    /// Applies `f` to the active position, if any.
    pub fn update_active<R>(&self, f: impl FnOnce(&mut ArbitragePosition) -> R) -> Option<R> {
        self.state.write().active.as_mut().map(f)
    }

    /// Parks a flagged position outside automated logic.
    pub fn push_flagged(&self, position: ArbitragePosition) {
        self.state.write().flagged.push(position);
    }

    #[must_use]
    pub fn flagged(&self) -> Vec<ArbitragePosition> {
        self.state.read().flagged.clone()
    }

    #[must_use]
    pub fn has_inconsistent(&self) -> bool {
        !self.state.read().flagged.is_empty()
    }

    /// Removes a flagged position after operator intervention.
    pub fn resolve_inconsistent(&self, id: Uuid) -> Option<ArbitragePosition> {
        let mut state = self.state.write();
        let idx = state.flagged.iter().position(|p| p.id == id)?;
        Some(state.flagged.remove(idx))
    }

    /// Expected signed exposure on a leg across every live position.
    #[must_use]
    pub fn net_exposure(&self, leg: Leg) -> Decimal {
        let state = self.state.read();
        state
            .active
            .iter()
            .chain(state.flagged.iter())
            .filter(|p| p.status != PositionStatus::Closed)
            .map(|p| p.net_exposure(leg))
            .sum()
    }

    #[must_use]
    pub fn locks(&self) -> CooldownLocks {
        self.state.read().locks
    }

    /// Extends the open lock to `until` (never shortens it).
    pub fn lock_open_until(&self, until: DateTime<Utc>) {
        let mut state = self.state.write();
        state.locks.open_lock_until = Some(state.locks.open_lock_until.map_or(until, |t| t.max(until)));
    }

    /// Extends the close lock to `until` (never shortens it).
    pub fn lock_close_until(&self, until: DateTime<Utc>) {
        let mut state = self.state.write();
        state.locks.close_lock_until =
            Some(state.locks.close_lock_until.map_or(until, |t| t.max(until)));
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use spread_hedge_core::Liquidity;

    pub(crate) fn fill(side: Side, size: Decimal, price: Decimal, fee: Decimal) -> Fill {
        Fill {
            id: Uuid::new_v4().to_string(),
            order_id: Uuid::new_v4().to_string(),
            side,
            size,
            price,
            fee,
            fee_asset: "USDC".to_string(),
            liquidity: Liquidity::Taker,
            timestamp: Utc::now(),
        }
    }

    pub(crate) fn open_position() -> ArbitragePosition {
        // A at 60100 (high, sell), B at 60000 (low, buy).
        ArbitragePosition::open(
            SpreadDirection::AHigher,
            ("venue-a", "venue-b"),
            fill(Side::Sell, dec!(0.02), dec!(60100), dec!(0.3)),
            fill(Side::Buy, dec!(0.02), dec!(60000), dec!(0.3)),
            dec!(100),
            Utc::now(),
        )
    }

    // ==================== Position Tests ====================

    #[test]
    fn test_open_position_satisfies_hedge() {
        let pos = open_position();
        assert_eq!(pos.leg_a_side, Side::Sell);
        assert_eq!(pos.leg_b_side, Side::Buy);
        assert_eq!(pos.amount, dec!(0.02));
        assert_eq!(pos.layers, 1);
        assert!(pos.check_hedge(Decimal::ZERO).is_ok());
        assert!(pos.is_tradeable());
    }

    #[test]
    fn test_net_exposure_signs() {
        let pos = open_position();
        assert_eq!(pos.net_exposure(Leg::A), dec!(-0.02));
        assert_eq!(pos.net_exposure(Leg::B), dec!(0.02));
    }

    #[test]
    fn test_add_layer_weighted_entry() {
        let mut pos = open_position();
        pos.add_layer(
            fill(Side::Sell, dec!(0.02), dec!(60200), dec!(0.3)),
            fill(Side::Buy, dec!(0.02), dec!(60080), dec!(0.3)),
        );

        assert_eq!(pos.amount, dec!(0.04));
        assert_eq!(pos.layers, 2);
        assert_eq!(pos.entry_price_a, dec!(60150));
        assert_eq!(pos.entry_price_b, dec!(60040));
        assert_eq!(pos.open_fees(Leg::A), dec!(0.6));
        assert!(pos.check_hedge(Decimal::ZERO).is_ok());
    }

    #[test]
    fn test_hedge_violation_on_unequal_legs() {
        let mut pos = open_position();
        pos.push_fill(Leg::A, fill(Side::Sell, dec!(0.01), dec!(60100), dec!(0)));
        let err = pos.check_hedge(dec!(0.0001)).unwrap_err();
        assert!(err.0.contains("leg A"));
    }

    #[test]
    fn test_hedge_violation_on_same_side() {
        let mut pos = open_position();
        pos.leg_b_side = Side::Sell;
        assert!(pos.check_hedge(Decimal::ZERO).is_err());
    }

    #[test]
    fn test_exit_price_and_close_fees() {
        let mut pos = open_position();
        pos.push_fill(Leg::A, fill(Side::Buy, dec!(0.01), dec!(60000), dec!(0.1)));
        pos.push_fill(Leg::A, fill(Side::Buy, dec!(0.01), dec!(60020), dec!(0.1)));

        assert_eq!(pos.exit_price(Leg::A), Some(dec!(60010)));
        assert_eq!(pos.exit_price(Leg::B), None);
        assert_eq!(pos.close_fees(Leg::A), dec!(0.2));
        assert_eq!(pos.net_exposure(Leg::A), dec!(0));
    }

    #[test]
    fn test_single_leg_is_flagged() {
        let pos = ArbitragePosition::single_leg(
            SpreadDirection::BHigher,
            ("venue-a", "venue-b"),
            Leg::A,
            fill(Side::Buy, dec!(0.02), dec!(60000), dec!(0.3)),
            dec!(90),
            Utc::now(),
            "unwind failed",
        );
        assert!(pos.inconsistent);
        assert!(!pos.is_tradeable());
        assert_eq!(pos.net_exposure(Leg::A), dec!(0.02));
        assert_eq!(pos.net_exposure(Leg::B), dec!(0));
        assert!(pos.check_hedge(dec!(0.0001)).is_err());
    }

    // ==================== Store Tests ====================

    #[test]
    fn test_store_tally_includes_flagged() {
        let store = PositionStore::new();
        store.set_active(open_position());
        store.push_flagged(ArbitragePosition::single_leg(
            SpreadDirection::AHigher,
            ("venue-a", "venue-b"),
            Leg::A,
            fill(Side::Sell, dec!(0.02), dec!(60100), dec!(0)),
            dec!(100),
            Utc::now(),
            "unwind failed",
        ));

        assert_eq!(store.net_exposure(Leg::A), dec!(-0.04));
        assert_eq!(store.net_exposure(Leg::B), dec!(0.02));
        assert!(store.has_inconsistent());
    }

    #[test]
    fn test_store_resolve_inconsistent() {
        let store = PositionStore::new();
        let pos = ArbitragePosition::single_leg(
            SpreadDirection::AHigher,
            ("a", "b"),
            Leg::B,
            fill(Side::Buy, dec!(0.02), dec!(60000), dec!(0)),
            dec!(100),
            Utc::now(),
            "x",
        );
        let id = pos.id;
        store.push_flagged(pos);

        assert!(store.resolve_inconsistent(Uuid::new_v4()).is_none());
        assert!(store.resolve_inconsistent(id).is_some());
        assert!(!store.has_inconsistent());
    }

    #[test]
    fn test_store_locks_never_shorten() {
        let store = PositionStore::new();
        let now = Utc::now();
        store.lock_open_until(now + chrono::Duration::seconds(30));
        store.lock_open_until(now + chrono::Duration::seconds(10));
        assert_eq!(
            store.locks().open_lock_until,
            Some(now + chrono::Duration::seconds(30))
        );
    }

    #[test]
    fn test_store_snapshot_round_trip() {
        let store = PositionStore::new();
        store.set_active(open_position());
        let snapshot = store.snapshot();
        let restored = PositionStore::from_snapshot(snapshot.clone());
        assert_eq!(restored.snapshot(), snapshot);
        assert!(!snapshot.is_empty());
    }

    #[test]
    fn test_store_snapshot_keeps_locks() {
        let store = PositionStore::new();
        let now = Utc::now();
        store.lock_close_until(now + chrono::Duration::seconds(30));

        let snapshot = store.snapshot();
        assert!(snapshot.is_empty());
        assert!(!snapshot.is_disposable(now));
        assert!(snapshot.is_disposable(now + chrono::Duration::seconds(31)));

        let restored = PositionStore::from_snapshot(snapshot);
        assert!(restored.locks().is_locked(now));
        assert_eq!(
            restored.locks().close_lock_until,
            Some(now + chrono::Duration::seconds(30))
        );
    }

    #[test]
    fn test_snapshot_without_locks_field_deserializes() {
        let json = r#"{"active":null,"flagged":[]}"#;
        let snapshot: StoreSnapshot = serde_json::from_str(json).unwrap();
        assert_eq!(snapshot.locks, CooldownLocks::default());
    }
}
