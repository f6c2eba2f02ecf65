//! Venue client interface.
//!
//! Each venue integration (signing, wire formats, market-data normalization)
//! lives behind [`VenueClient`]. The engine holds exactly two instances, one
//! per [`Leg`](crate::Leg).

use async_trait::async_trait;
use rust_decimal::Decimal;
use tokio::sync::mpsc;

use crate::error::VenueError;
use crate::types::{Fill, PricePoint, Side};

/// Sender half of a venue's price-tick stream. Sending never blocks.
pub type PriceTickSender = mpsc::UnboundedSender<PricePoint>;

/// Receiver half of a venue's price-tick stream.
pub type PriceTickReceiver = mpsc::UnboundedReceiver<PricePoint>;

/// Creates a price-tick channel.
#[must_use]
pub fn price_tick_channel() -> (PriceTickSender, PriceTickReceiver) {
    mpsc::unbounded_channel()
}

/// Capability set the engine needs from one venue.
#[async_trait]
pub trait VenueClient: Send + Sync {
    /// Human-readable venue name, used in logs and alerts.
    fn name(&self) -> &str;

    /// Point-in-time mid price. Used when the push feed is stale.
    ///
    /// # Errors
    /// Returns a classifiable [`VenueError`] on failure.
    async fn get_mid_price(&self) -> Result<Decimal, VenueError>;

    /// Starts pushing price ticks into `sink`.
    ///
    /// The venue keeps pushing until the receiver is dropped.
    ///
    /// # Errors
    /// Returns an error if the subscription cannot be established.
    async fn subscribe_price_ticks(&self, sink: PriceTickSender) -> Result<(), VenueError>;

    /// Places a market order and returns the actual fill.
    ///
    /// # Arguments
    /// * `side` - Buy or sell
    /// * `amount` - Order size in base units
    /// * `reduce_only` - If true, the order may only shrink an existing position
    ///
    /// # Errors
    /// - `VenueError::InsufficientBalance` / `InvalidOrder` / `Rejected` - fatal
    /// - `VenueError::Timeout` / `Network` / `RateLimited` / `Gateway` - transient
    async fn place_market_order(
        &self,
        side: Side,
        amount: Decimal,
        reduce_only: bool,
    ) -> Result<Fill, VenueError>;

    /// Authoritative signed position size (positive long, negative short).
    ///
    /// # Errors
    /// Returns a classifiable [`VenueError`] on failure.
    async fn get_position(&self) -> Result<Decimal, VenueError>;
}
