//! Error types for venue interaction.
//!
//! Every failure a venue can report is expressed as a [`VenueError`]. Retry
//! classification is driven by the error's display text and [`VenueError::code`]
//! so that configured keyword matchers can decide what is transient.

use thiserror::Error;

/// Errors that can occur when talking to a venue.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum VenueError {
    /// Request did not complete in time.
    #[error("{operation} timeout after {after_ms}ms")]
    Timeout {
        /// Operation that timed out.
        operation: String,
        /// Elapsed budget in milliseconds.
        after_ms: u64,
    },

    /// Transport-level failure.
    #[error("network error: {0}")]
    Network(String),

    /// Connection reset by peer.
    #[error("connection reset: {0}")]
    ConnectionReset(String),

    /// Rate limit exceeded.
    #[error("rate limited (429), retry after {retry_after_ms}ms")]
    RateLimited {
        /// Suggested wait in milliseconds.
        retry_after_ms: u64,
    },

    /// Upstream gateway failure (502/503/504).
    #[error("gateway error {status}: {message}")]
    Gateway {
        /// HTTP status code.
        status: u16,
        /// Error message from the venue.
        message: String,
    },

    /// Other API failure.
    #[error("API error {status}: {message}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Error message from the venue.
        message: String,
    },

    /// Not enough margin or balance for the order.
    #[error("insufficient balance: required {required}, available {available}")]
    InsufficientBalance {
        /// Required amount.
        required: String,
        /// Available amount.
        available: String,
    },

    /// Order parameters rejected before submission.
    #[error("invalid order: {0}")]
    InvalidOrder(String),

    /// Order rejected by the venue.
    #[error("order rejected: {0}")]
    Rejected(String),

    /// Venue calls are short-circuited by an open breaker.
    #[error("circuit breaker open for {venue}, retry in {retry_in_secs}s")]
    CircuitOpen {
        /// Venue name.
        venue: String,
        /// Seconds until a half-open probe is allowed.
        retry_in_secs: u64,
    },

    /// No price is available from the venue.
    #[error("no price available: {0}")]
    NoPrice(String),
}

impl VenueError {
    /// Creates a timeout error.
    pub fn timeout(operation: impl Into<String>, after_ms: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            after_ms,
        }
    }

    /// Creates an API error from status code and message.
    ///
    /// Gateway statuses (502/503/504) map to [`VenueError::Gateway`] and 429
    /// maps to [`VenueError::RateLimited`].
    pub fn api(status: u16, message: impl Into<String>) -> Self {
        match status {
            429 => Self::RateLimited { retry_after_ms: 0 },
            502..=504 => Self::Gateway {
                status,
                message: message.into(),
            },
            _ => Self::Api {
                status,
                message: message.into(),
            },
        }
    }

    /// Creates an insufficient balance error.
    pub fn insufficient_balance(required: impl ToString, available: impl ToString) -> Self {
        Self::InsufficientBalance {
            required: required.to_string(),
            available: available.to_string(),
        }
    }

    /// Creates a circuit-open error.
    pub fn circuit_open(venue: impl Into<String>, retry_in_secs: u64) -> Self {
        Self::CircuitOpen {
            venue: venue.into(),
            retry_in_secs,
        }
    }

    /// Returns a machine-readable code used by retry classification.
    #[must_use]
    pub fn code(&self) -> Option<String> {
        match self {
            Self::Timeout { .. } => Some("ETIMEDOUT".to_string()),
            Self::ConnectionReset(_) => Some("ECONNRESET".to_string()),
            Self::RateLimited { .. } => Some("429".to_string()),
            Self::Gateway { status, .. } | Self::Api { status, .. } => Some(status.to_string()),
            Self::InsufficientBalance { .. } => Some("INSUFFICIENT_BALANCE".to_string()),
            Self::InvalidOrder(_) => Some("INVALID_ORDER".to_string()),
            Self::CircuitOpen { .. } => Some("CIRCUIT_OPEN".to_string()),
            Self::Network(_) | Self::Rejected(_) | Self::NoPrice(_) => None,
        }
    }

    /// Returns true for errors that must never be retried.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::InsufficientBalance { .. } | Self::InvalidOrder(_) | Self::Rejected(_)
        )
    }

    /// Returns true if the error is a fast-fail from an open breaker.
    #[must_use]
    pub fn is_circuit_open(&self) -> bool {
        matches!(self, Self::CircuitOpen { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_maps_special_statuses() {
        assert!(matches!(
            VenueError::api(429, "slow down"),
            VenueError::RateLimited { .. }
        ));
        assert!(matches!(
            VenueError::api(503, "unavailable"),
            VenueError::Gateway { status: 503, .. }
        ));
        assert!(matches!(
            VenueError::api(400, "bad"),
            VenueError::Api { status: 400, .. }
        ));
    }

    #[test]
    fn test_codes() {
        assert_eq!(VenueError::timeout("order", 1500).code().as_deref(), Some("ETIMEDOUT"));
        assert_eq!(VenueError::api(502, "x").code().as_deref(), Some("502"));
        assert_eq!(
            VenueError::ConnectionReset("peer".into()).code().as_deref(),
            Some("ECONNRESET")
        );
        assert!(VenueError::Rejected("no".into()).code().is_none());
    }

    #[test]
    fn test_fatal_classification() {
        assert!(VenueError::insufficient_balance(100, 5).is_fatal());
        assert!(VenueError::InvalidOrder("size".into()).is_fatal());
        assert!(!VenueError::timeout("order", 1).is_fatal());
        assert!(!VenueError::api(504, "gw").is_fatal());
    }

    #[test]
    fn test_display() {
        let err = VenueError::circuit_open("edgex", 12);
        assert_eq!(err.to_string(), "circuit breaker open for edgex, retry in 12s");
        assert!(err.is_circuit_open());

        let err = VenueError::timeout("place_market_order", 1500);
        assert_eq!(err.to_string(), "place_market_order timeout after 1500ms");
    }
}
