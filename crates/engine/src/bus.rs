//! Typed event channels.
//!
//! One broadcast channel per event kind ([`FillEvent`], [`OrderUpdate`],
//! [`Alert`]). Alerts are also kept in a bounded in-memory history so that
//! operators and tests can inspect what fired.

use parking_lot::RwLock;
use spread_hedge_core::{Alert, AlertKind, AlertSeverity, FillEvent, OrderUpdate};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

const CHANNEL_CAPACITY: usize = 256;
const DEFAULT_ALERT_HISTORY: usize = 1000;

struct Inner {
    fills: broadcast::Sender<FillEvent>,
    orders: broadcast::Sender<OrderUpdate>,
    alerts: broadcast::Sender<Alert>,
    history: RwLock<VecDeque<Alert>>,
    max_history: usize,
}

/// Cloneable handle to the engine's event channels.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("alerts_recorded", &self.inner.history.read().len())
            .field("alert_subscribers", &self.inner.alerts.receiver_count())
            .finish()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    #[must_use]
    pub fn new() -> Self {
        Self::with_history(DEFAULT_ALERT_HISTORY)
    }

    /// Creates a bus that retains at most `max_history` alerts.
    #[must_use]
    pub fn with_history(max_history: usize) -> Self {
        let (fills, _) = broadcast::channel(CHANNEL_CAPACITY);
        let (orders, _) = broadcast::channel(CHANNEL_CAPACITY);
        let (alerts, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                fills,
                orders,
                alerts,
                history: RwLock::new(VecDeque::new()),
                max_history: max_history.max(1),
            }),
        }
    }

    pub fn publish_fill(&self, event: FillEvent) {
        // No subscribers is fine.
        let _ = self.inner.fills.send(event);
    }

    pub fn publish_order(&self, update: OrderUpdate) {
        let _ = self.inner.orders.send(update);
    }

    /// Logs, records, and broadcasts an alert.
    pub fn raise(&self, alert: Alert) {
        match alert.severity {
            AlertSeverity::Critical => error!(
                kind = ?alert.kind,
                position = ?alert.position_id,
                leg = ?alert.leg,
                expected = ?alert.expected,
                actual = ?alert.actual,
                "ALERT: {}",
                alert.message
            ),
            AlertSeverity::Warning => warn!(
                kind = ?alert.kind,
                position = ?alert.position_id,
                leg = ?alert.leg,
                "ALERT: {}",
                alert.message
            ),
            AlertSeverity::Info => info!(kind = ?alert.kind, "ALERT: {}", alert.message),
        }

        {
            let mut history = self.inner.history.write();
            if history.len() >= self.inner.max_history {
                history.pop_front();
            }
            history.push_back(alert.clone());
        }

        let _ = self.inner.alerts.send(alert);
    }

    #[must_use]
    pub fn subscribe_fills(&self) -> broadcast::Receiver<FillEvent> {
        self.inner.fills.subscribe()
    }

    #[must_use]
    pub fn subscribe_orders(&self) -> broadcast::Receiver<OrderUpdate> {
        self.inner.orders.subscribe()
    }

    #[must_use]
    pub fn subscribe_alerts(&self) -> broadcast::Receiver<Alert> {
        self.inner.alerts.subscribe()
    }

    /// Recorded alerts, oldest first.
    #[must_use]
    pub fn alerts(&self) -> Vec<Alert> {
        self.inner.history.read().iter().cloned().collect()
    }

    /// Number of recorded alerts of a given kind.
    #[must_use]
    pub fn alert_count(&self, kind: AlertKind) -> usize {
        self.inner
            .history
            .read()
            .iter()
            .filter(|a| a.kind == kind)
            .count()
    }
}
