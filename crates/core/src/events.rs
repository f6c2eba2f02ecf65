use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::{Fill, Leg, PricePoint, Side};

/// A pushed price observation.
pub type PriceTick = PricePoint;

/// A fill attributed to one leg of the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FillEvent {
    pub leg: Leg,
    pub venue: String,
    pub position_id: Option<Uuid>,
    pub reduce_only: bool,
    pub fill: Fill,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderStatus {
    Submitted,
    Filled,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderUpdate {
    pub leg: Leg,
    pub venue: String,
    pub side: Side,
    pub amount: Decimal,
    pub reduce_only: bool,
    pub status: OrderStatus,
    pub reason: Option<String>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum AlertSeverity {
    Info,
    Warning,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AlertKind {
    /// One leg filled without its counterpart and was unwound.
    SingleLegExposure,
    /// Unwind failed; the position no longer satisfies the hedge invariant.
    InconsistentPosition,
    /// Pulled venue position differs from the in-memory tally.
    ReconciliationMismatch,
    /// Pulled venue positions do not net to zero across both venues.
    HedgeImbalance,
    DailyLossLimit,
    CircuitOpen,
}

/// An operator-facing alert.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub id: Uuid,
    pub severity: AlertSeverity,
    pub kind: AlertKind,
    pub message: String,
    pub position_id: Option<Uuid>,
    pub leg: Option<Leg>,
    pub expected: Option<Decimal>,
    pub actual: Option<Decimal>,
    pub timestamp: DateTime<Utc>,
}

impl Alert {
    #[must_use]
    pub fn new(severity: AlertSeverity, kind: AlertKind, message: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            severity,
            kind,
            message: message.into(),
            position_id: None,
            leg: None,
            expected: None,
            actual: None,
            timestamp: Utc::now(),
        }
    }

    #[must_use]
    pub fn critical(kind: AlertKind, message: impl Into<String>) -> Self {
        Self::new(AlertSeverity::Critical, kind, message)
    }

    #[must_use]
    pub fn warning(kind: AlertKind, message: impl Into<String>) -> Self {
        Self::new(AlertSeverity::Warning, kind, message)
    }

    #[must_use]
    pub fn with_position(mut self, id: Uuid) -> Self {
        self.position_id = Some(id);
        self
    }

    #[must_use]
    pub fn with_leg(mut self, leg: Leg) -> Self {
        self.leg = Some(leg);
        self
    }

    /// Attaches the two compared values for operator triage.
    #[must_use]
    pub fn with_values(mut self, expected: Decimal, actual: Decimal) -> Self {
        self.expected = Some(expected);
        self.actual = Some(actual);
        self
    }

    #[must_use]
    pub fn is_critical(&self) -> bool {
        self.severity == AlertSeverity::Critical
    }
}
