//! Dossier Resilience Bridge
//!
//! Calls unreliable external enrichment sources on behalf of pipeline stages.
//!
//! # Core Concepts
//!
//! - **Circuit breakers**: one per source; open after repeated source
//!   failures and fail fast until a cool-down passes
//! - **Retry**: exponential backoff for transient failures only
//! - **Bounded concurrency**: one semaphore shared by all topics and sources
//! - **Fallback**: a marked, empty result when every source fails
//! - **Session tracking**: per-session request counts, latencies and errors
//!
//! # Example
//!
//! ```rust,ignore
//! let bridge = ResilienceBridge::http(BridgeConfig::default())?;
//! let results = bridge.research_topics(session.id.as_str(), &topics).await;
//! for r in results.iter().filter(|r| r.fallback) {
//!     tracing::warn!(topic = %r.topic, note = ?r.note, "degraded enrichment");
//! }
//! ```

#![warn(missing_docs)]
#![warn(unreachable_pub)]

pub mod breaker;
pub mod bridge;
pub mod config;
pub mod error;
pub mod protocol;
pub mod retry;
pub mod tracker;
pub mod transport;

pub use breaker::{BreakerConfig, BreakerRegistry, BreakerState, CircuitBreaker};
pub use bridge::{ResilienceBridge, SourceFetch, SourceReport, TopicResearch};
pub use config::{BridgeConfig, SourceConfig};
pub use error::{BreakerError, BridgeError, SourceError};
pub use protocol::{
    EnrichmentItem, EnrichmentRequest, EnrichmentResponse, RequestOptions, ResponseData,
    ResponseMetadata, ResponseStatus,
};
pub use retry::{Attempted, RetryPolicy};
pub use tracker::{
    CallOutcome, CallRecord, ErrorEntry, OutcomeCounters, SessionMetrics, SessionTracker,
};
pub use transport::{EnrichmentTransport, HttpTransport};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
