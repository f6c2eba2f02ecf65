//! The two venue clients, each paired with its own circuit breaker.

use spread_hedge_core::{Leg, VenueClient};
use std::sync::Arc;

use crate::bus::EventBus;
use crate::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig};

/// A venue client and the breaker guarding it.
#[derive(Clone)]
pub struct VenueHandle {
    pub client: Arc<dyn VenueClient>,
    pub breaker: Arc<CircuitBreaker>,
}

impl std::fmt::Debug for VenueHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VenueHandle")
            .field("venue", &self.client.name())
            .field("breaker", &self.breaker)
            .finish()
    }
}

impl VenueHandle {
    /// Wraps `client` with a fresh breaker named after the venue.
    #[must_use]
    pub fn new(client: Arc<dyn VenueClient>, config: CircuitBreakerConfig) -> Self {
        let breaker = Arc::new(CircuitBreaker::new(client.name(), config));
        Self { client, breaker }
    }

    /// Like [`new`](Self::new), with breaker-open alerts raised on `bus`.
    #[must_use]
    pub fn with_bus(client: Arc<dyn VenueClient>, config: CircuitBreakerConfig, bus: EventBus) -> Self {
        let breaker = Arc::new(CircuitBreaker::new(client.name(), config).with_bus(bus));
        Self { client, breaker }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        self.client.name()
    }
}

/// Both legs' venues.
#[derive(Debug, Clone)]
pub struct VenuePair {
    pub a: VenueHandle,
    pub b: VenueHandle,
}

impl VenuePair {
    #[must_use]
    pub fn new(a: VenueHandle, b: VenueHandle) -> Self {
        Self { a, b }
    }

    #[must_use]
    pub fn get(&self, leg: Leg) -> &VenueHandle {
        match leg {
            Leg::A => &self.a,
            Leg::B => &self.b,
        }
    }

    /// Venue names as `(a, b)`.
    #[must_use]
    pub fn names(&self) -> (&str, &str) {
        (self.a.name(), self.b.name())
    }
}
