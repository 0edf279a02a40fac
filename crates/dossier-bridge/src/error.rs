//! Error types for the resilience bridge
//!
//! Provides error handling for:
//! - Enrichment source failures, classified transient or permanent
//! - Circuit breaker short-circuits
//! - Bridge construction

use std::time::Duration;

/// Failure of one call to an enrichment source
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SourceError {
    /// Connection could not be established
    #[error("connection failed: {0}")]
    Connect(String),

    /// No response within the call timeout
    #[error("request timed out after {}ms", .0.as_millis())]
    Timeout(Duration),

    /// HTTP 5xx
    #[error("server error {status}: {message}")]
    Server {
        /// HTTP status code
        status: u16,
        /// Response text
        message: String,
    },

    /// HTTP 429 or a `rateLimited` response body
    #[error("rate limited{}", .retry_after.map(|d| format!(", retry after {}ms", d.as_millis())).unwrap_or_default())]
    RateLimited {
        /// Hint from `Retry-After` or `retryAfterMs`
        retry_after: Option<Duration>,
    },

    /// HTTP 4xx other than 429
    #[error("client error {status}: {message}")]
    Client {
        /// HTTP status code
        status: u16,
        /// Response text
        message: String,
    },

    /// Source answered with an `error` status
    #[error("source reported error: {0}")]
    Remote(String),

    /// Response body could not be understood
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// Source's circuit breaker is open; the call was not made
    #[error("circuit open for source '{0}'")]
    CircuitOpen(String),

    /// Bridge shut down while the call was pending
    #[error("call cancelled")]
    Cancelled,
}

impl SourceError {
    /// Whether retrying may succeed
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Connect(_) | Self::Timeout(_) | Self::Server { .. } | Self::RateLimited { .. }
        )
    }

    /// Whether the failure counts against the source's circuit breaker
    ///
    /// Client errors and cancellation say nothing about the source's health.
    #[must_use]
    pub fn is_source_fault(&self) -> bool {
        !matches!(
            self,
            Self::Client { .. } | Self::CircuitOpen(_) | Self::Cancelled
        )
    }

    /// Server-provided delay before the next attempt
    #[must_use]
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }
}

/// Error from a call wrapped in a circuit breaker
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BreakerError<E> {
    /// Breaker is open; the wrapped call was not invoked
    #[error("circuit breaker is open")]
    Open,

    /// Wrapped call failed
    #[error("{0}")]
    Inner(E),
}

/// Bridge setup errors
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    /// HTTP client could not be built
    #[error("failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),

    /// Configuration is unusable
    #[error("invalid bridge configuration: {0}")]
    Config(String),
}
