//! Shared domain types for two-venue spread hedging.
//!
//! A hedge always spans exactly two venues, addressed here as [`Leg::A`] and
//! [`Leg::B`]. Venue names are configuration; the engine only ever reasons
//! about the two slots.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::time::Duration;

// =============================================================================
// Leg / Side
// =============================================================================

/// One of the two venue slots of a hedge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Leg {
    /// First venue.
    A,
    /// Second venue.
    B,
}

impl Leg {
    /// Both legs, in canonical order.
    pub const ALL: [Leg; 2] = [Leg::A, Leg::B];

    /// Returns the counterpart leg.
    #[must_use]
    pub fn other(self) -> Self {
        match self {
            Self::A => Self::B,
            Self::B => Self::A,
        }
    }

    /// Returns the display string.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::A => "A",
            Self::B => "B",
        }
    }
}

impl std::fmt::Display for Leg {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Order side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    /// Long exposure.
    Buy,
    /// Short exposure.
    Sell,
}

impl Side {
    /// Returns +1 for buys and -1 for sells.
    #[must_use]
    pub fn sign(self) -> Decimal {
        match self {
            Self::Buy => Decimal::ONE,
            Self::Sell => Decimal::NEGATIVE_ONE,
        }
    }

    /// Returns the opposite side.
    #[must_use]
    pub fn opposite(self) -> Self {
        match self {
            Self::Buy => Self::Sell,
            Self::Sell => Self::Buy,
        }
    }

    /// Returns the display string.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Buy => "BUY",
            Self::Sell => "SELL",
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Liquidity classification of a fill.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Liquidity {
    /// Resting order matched later.
    Maker,
    /// Immediately matched against the book.
    Taker,
}

// =============================================================================
// Spread Direction
// =============================================================================

/// Which venue is quoting the instrument higher.
///
/// The high venue is sold (short) and the low venue is bought (long), so a
/// reverting spread profits on both legs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SpreadDirection {
    /// Venue A is above venue B.
    AHigher,
    /// Venue B is above venue A.
    BHigher,
}

impl SpreadDirection {
    /// Derives the direction from two mid prices. Ties resolve to `BHigher`.
    #[must_use]
    pub fn from_mids(mid_a: Decimal, mid_b: Decimal) -> Self {
        if mid_a > mid_b {
            Self::AHigher
        } else {
            Self::BHigher
        }
    }

    /// Returns the opening side for the given leg.
    #[must_use]
    pub fn side_for(self, leg: Leg) -> Side {
        match (self, leg) {
            (Self::AHigher, Leg::A) | (Self::BHigher, Leg::B) => Side::Sell,
            (Self::AHigher, Leg::B) | (Self::BHigher, Leg::A) => Side::Buy,
        }
    }

    /// Returns the leg on the high venue.
    #[must_use]
    pub fn high_leg(self) -> Leg {
        match self {
            Self::AHigher => Leg::A,
            Self::BHigher => Leg::B,
        }
    }
}

impl std::fmt::Display for SpreadDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AHigher => write!(f, "A>B"),
            Self::BHigher => write!(f, "B>A"),
        }
    }
}

// =============================================================================
// Price Point
// =============================================================================

/// Latest price observation for one venue.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PricePoint {
    /// Venue slot this price belongs to.
    pub leg: Leg,
    /// Best bid, if known.
    pub bid: Option<Decimal>,
    /// Best ask, if known.
    pub ask: Option<Decimal>,
    /// Mid price used for spread computation.
    pub mid: Decimal,
    /// Observation time.
    pub timestamp: DateTime<Utc>,
}

impl PricePoint {
    /// Builds a price point from a quote.
    ///
    /// Mid is `(bid + ask) / 2` when both sides are present, else the last
    /// trade price. Returns `None` when no positive price can be derived.
    #[must_use]
    pub fn from_quote(
        leg: Leg,
        bid: Option<Decimal>,
        ask: Option<Decimal>,
        last: Option<Decimal>,
        timestamp: DateTime<Utc>,
    ) -> Option<Self> {
        let mid = match (bid, ask) {
            (Some(b), Some(a)) if b > Decimal::ZERO && a > Decimal::ZERO => {
                (b + a) / Decimal::from(2)
            }
            _ => last?,
        };

        if mid <= Decimal::ZERO {
            return None;
        }

        Some(Self {
            leg,
            bid,
            ask,
            mid,
            timestamp,
        })
    }

    /// Builds a price point carrying only a mid price.
    #[must_use]
    pub fn from_mid(leg: Leg, mid: Decimal, timestamp: DateTime<Utc>) -> Self {
        Self {
            leg,
            bid: None,
            ask: None,
            mid,
            timestamp,
        }
    }

    /// Returns the age of this observation at `now`. Future timestamps count as zero.
    #[must_use]
    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        (now - self.timestamp).to_std().unwrap_or(Duration::ZERO)
    }

    /// Returns true if the observation is within the staleness window.
    #[must_use]
    pub fn is_fresh(&self, now: DateTime<Utc>, window: Duration) -> bool {
        self.age(now) <= window
    }
}

/// Absolute spread between two mid prices.
#[must_use]
pub fn spread(a: &PricePoint, b: &PricePoint) -> Decimal {
    (a.mid - b.mid).abs()
}

// =============================================================================
// Fill
// =============================================================================

/// An executed order. Immutable once recorded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fill {
    /// Fill identifier.
    pub id: String,
    /// Venue order identifier.
    pub order_id: String,
    /// Executed side.
    pub side: Side,
    /// Executed size.
    pub size: Decimal,
    /// Average execution price.
    pub price: Decimal,
    /// Fee charged.
    pub fee: Decimal,
    /// Asset the fee is denominated in.
    pub fee_asset: String,
    /// Maker or taker.
    pub liquidity: Liquidity,
    /// Execution time.
    pub timestamp: DateTime<Utc>,
}

impl Fill {
    /// Signed size: positive for buys, negative for sells.
    #[must_use]
    pub fn signed_size(&self) -> Decimal {
        self.size * self.side.sign()
    }

    /// Notional value of the fill.
    #[must_use]
    pub fn notional(&self) -> Decimal {
        self.size * self.price
    }
}
