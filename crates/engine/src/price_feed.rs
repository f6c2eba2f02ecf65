//! Latest-price holder for both venues.
//!
//! Each venue slot is written only by that venue's tick stream and read by the
//! detector, runner, and reconciler. A write replaces the whole [`PricePoint`]
//! under a short lock, which is the only synchronization involved.
//!
//! # Example
//!
//! ```ignore
//! let feed = PriceFeed::new(Duration::from_secs(30));
//! feed.update(tick);
//! if let Some(price) = feed.get(Leg::A) {
//!     // fresh price
//! }
//! ```

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use spread_hedge_core::{Leg, PricePoint, PriceTickReceiver};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace};

/// Default staleness window.
pub const DEFAULT_STALENESS: Duration = Duration::from_secs(30);

#[derive(Debug, Default)]
struct Slot {
    latest: RwLock<Option<PricePoint>>,
    updates: AtomicU64,
}

/// Holds the latest price per venue with a staleness bound.
#[derive(Debug)]
pub struct PriceFeed {
    a: Slot,
    b: Slot,
    staleness: Duration,
}

impl Default for PriceFeed {
    fn default() -> Self {
        Self::new(DEFAULT_STALENESS)
    }
}

impl PriceFeed {
    /// Creates an empty feed with the given staleness window.
    #[must_use]
    pub fn new(staleness: Duration) -> Self {
        Self {
            a: Slot::default(),
            b: Slot::default(),
            staleness,
        }
    }

    fn slot(&self, leg: Leg) -> &Slot {
        match leg {
            Leg::A => &self.a,
            Leg::B => &self.b,
        }
    }

    /// Replaces the stored price for `price.leg`.
    pub fn update(&self, price: PricePoint) {
        let slot = self.slot(price.leg);
        *slot.latest.write() = Some(price);
        slot.updates.fetch_add(1, Ordering::Relaxed);
        trace!(leg = %price.leg, mid = %price.mid, "Price updated");
    }

    /// Returns the latest price if present and fresh at the current time.
    #[must_use]
    pub fn get(&self, leg: Leg) -> Option<PricePoint> {
        self.get_at(leg, Utc::now())
    }

    /// Returns the latest price if present and fresh at `now`.
    #[must_use]
    pub fn get_at(&self, leg: Leg, now: DateTime<Utc>) -> Option<PricePoint> {
        let latest = (*self.slot(leg).latest.read())?;
        if latest.is_fresh(now, self.staleness) {
            Some(latest)
        } else {
            None
        }
    }

    /// Returns the latest price regardless of age.
    #[must_use]
    pub fn last(&self, leg: Leg) -> Option<PricePoint> {
        *self.slot(leg).latest.read()
    }

    /// Number of updates received for a leg.
    #[must_use]
    pub fn update_count(&self, leg: Leg) -> u64 {
        self.slot(leg).updates.load(Ordering::Relaxed)
    }

    /// Staleness window.
    #[must_use]
    pub fn staleness(&self) -> Duration {
        self.staleness
    }

    /// Drains a venue tick stream into this feed until the sender side closes.
    ///
    /// Ticks tagged with a different leg are re-tagged to `leg`, since a venue
    /// client only knows its own prices.
    pub async fn pump(self: Arc<Self>, leg: Leg, mut rx: PriceTickReceiver) {
        while let Some(mut tick) = rx.recv().await {
            tick.leg = leg;
            self.update(tick);
        }
        debug!(leg = %leg, "Price tick stream closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use spread_hedge_core::price_tick_channel;

    #[test]
    fn test_missing_price_is_not_ok() {
        let feed = PriceFeed::default();
        assert!(feed.get(Leg::A).is_none());
        assert!(feed.last(Leg::B).is_none());
    }

    #[test]
    fn test_update_and_get() {
        let feed = PriceFeed::default();
        let now = Utc::now();
        feed.update(PricePoint::from_mid(Leg::A, dec!(60000), now));
        feed.update(PricePoint::from_mid(Leg::B, dec!(60100), now));

        assert_eq!(feed.get_at(Leg::A, now).unwrap().mid, dec!(60000));
        assert_eq!(feed.get_at(Leg::B, now).unwrap().mid, dec!(60100));
        assert_eq!(feed.update_count(Leg::A), 1);
    }

    #[test]
    fn test_stale_price_rejected() {
        let feed = PriceFeed::new(Duration::from_secs(30));
        let then = Utc::now();
        feed.update(PricePoint::from_mid(Leg::A, dec!(60000), then));

        let later = then + chrono::Duration::seconds(31);
        assert!(feed.get_at(Leg::A, later).is_none());
        assert!(feed.last(Leg::A).is_some());

        let edge = then + chrono::Duration::seconds(30);
        assert!(feed.get_at(Leg::A, edge).is_some());
    }

    #[test]
    fn test_update_replaces_previous() {
        let feed = PriceFeed::default();
        let now = Utc::now();
        feed.update(PricePoint::from_mid(Leg::A, dec!(1), now));
        feed.update(PricePoint::from_mid(Leg::A, dec!(2), now));
        assert_eq!(feed.get_at(Leg::A, now).unwrap().mid, dec!(2));
        assert_eq!(feed.update_count(Leg::A), 2);
    }

    #[tokio::test]
    async fn test_pump_drains_channel() {
        let feed = Arc::new(PriceFeed::default());
        let (tx, rx) = price_tick_channel();

        // Venue tagged its tick with the wrong leg; pump fixes it.
        tx.send(PricePoint::from_mid(Leg::A, dec!(99), Utc::now())).unwrap();
        drop(tx);

        feed.clone().pump(Leg::B, rx).await;
        assert_eq!(feed.last(Leg::B).unwrap().mid, dec!(99));
        assert!(feed.last(Leg::A).is_none());
    }
}
