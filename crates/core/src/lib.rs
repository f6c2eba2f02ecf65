//! Core types for the two-venue spread hedge engine.
//!
//! This crate holds everything both the engine and venue integrations need to
//! agree on: the leg/side vocabulary, price and fill records, the
//! [`VenueClient`] capability trait, venue errors, typed events, and the
//! layered configuration loader.

pub mod config_loader;
pub mod error;
pub mod events;
pub mod serde_duration;
pub mod types;
pub mod venue;

pub use config_loader::ConfigLoader;
pub use error::VenueError;
pub use events::{
    Alert, AlertKind, AlertSeverity, FillEvent, OrderStatus, OrderUpdate, PriceTick,
};
pub use types::{spread, Fill, Leg, Liquidity, PricePoint, Side, SpreadDirection};
pub use venue::{price_tick_channel, PriceTickReceiver, PriceTickSender, VenueClient};
