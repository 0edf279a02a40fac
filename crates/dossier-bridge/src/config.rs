//! Bridge configuration
//!
//! All durations are stored as milliseconds so the structs read naturally
//! from TOML; accessor methods return [`Duration`]s.

use crate::breaker::BreakerConfig;
use crate::retry::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// One enrichment source reachable at `base_url + path`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Source name, also the breaker key
    pub name: String,
    /// Path appended to the bridge base URL
    pub path: String,
    /// Disabled sources are skipped
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
    /// Per-source result limit, overriding the bridge default
    #[serde(default)]
    pub limit: Option<usize>,
    /// Value for the request's `sortBy` option
    #[serde(default)]
    pub sort_by: Option<String>,
    /// Value for the request's `timeWindow` option
    #[serde(default)]
    pub time_window: Option<String>,
}

fn enabled_by_default() -> bool {
    true
}

impl SourceConfig {
    /// Enabled source with default options
    pub fn new(name: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            enabled: true,
            limit: None,
            sort_by: None,
            time_window: None,
        }
    }

    /// With enabled flag
    #[inline]
    #[must_use]
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// With result limit
    #[inline]
    #[must_use]
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// Resilience bridge configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Base URL of the enrichment service
    pub base_url: String,
    /// Sources in merge order
    pub sources: Vec<SourceConfig>,
    /// Topics researched concurrently per batch
    pub batch_size: usize,
    /// Pause between batches
    pub batch_delay_ms: u64,
    /// Calls in flight across all topics and sources
    pub max_in_flight: usize,
    /// Timeout per external call
    pub request_timeout_ms: u64,
    /// Lifetime of cached topic results
    pub cache_ttl_ms: u64,
    /// Maximum cached topics
    pub cache_capacity: u64,
    /// Default result limit per source
    pub result_limit: usize,
    /// Evict tracker sessions idle this long; `None` keeps them
    pub session_idle_timeout_ms: Option<u64>,
    /// Retry policy for transient failures
    pub retry: RetryPolicy,
    /// Circuit breaker thresholds, shared by all sources
    pub breaker: BreakerConfig,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8787".to_string(),
            sources: vec![
                SourceConfig::new("web", "/research/web"),
                SourceConfig::new("academic", "/research/academic"),
                SourceConfig::new("discussions", "/research/discussions"),
            ],
            batch_size: 3,
            batch_delay_ms: 1_000,
            max_in_flight: 5,
            request_timeout_ms: 30_000,
            cache_ttl_ms: 10 * 60 * 1_000,
            cache_capacity: 1_000,
            result_limit: 10,
            session_idle_timeout_ms: None,
            retry: RetryPolicy::default(),
            breaker: BreakerConfig::default(),
        }
    }
}

impl BridgeConfig {
    /// With base URL
    #[inline]
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// With sources, replacing the defaults
    #[inline]
    #[must_use]
    pub fn with_sources(mut self, sources: Vec<SourceConfig>) -> Self {
        self.sources = sources;
        self
    }

    /// With batch size and inter-batch delay
    #[inline]
    #[must_use]
    pub fn with_batching(mut self, batch_size: usize, delay: Duration) -> Self {
        self.batch_size = batch_size;
        self.batch_delay_ms = millis(delay);
        self
    }

    /// With in-flight call bound
    #[inline]
    #[must_use]
    pub fn with_max_in_flight(mut self, max_in_flight: usize) -> Self {
        self.max_in_flight = max_in_flight;
        self
    }

    /// With per-call timeout
    #[inline]
    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout_ms = millis(timeout);
        self
    }

    /// With retry policy
    #[inline]
    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// With breaker thresholds
    #[inline]
    #[must_use]
    pub fn with_breaker(mut self, breaker: BreakerConfig) -> Self {
        self.breaker = breaker;
        self
    }

    /// With tracker idle eviction
    #[inline]
    #[must_use]
    pub fn with_session_idle_timeout(mut self, timeout: Duration) -> Self {
        self.session_idle_timeout_ms = Some(millis(timeout));
        self
    }

    /// Enabled sources in configured order
    pub fn enabled_sources(&self) -> impl Iterator<Item = &SourceConfig> {
        self.sources.iter().filter(|s| s.enabled)
    }

    /// Pause between batches
    #[must_use]
    pub fn batch_delay(&self) -> Duration {
        Duration::from_millis(self.batch_delay_ms)
    }

    /// Timeout per external call
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Lifetime of cached topic results
    #[must_use]
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_millis(self.cache_ttl_ms)
    }

    /// Tracker idle eviction threshold
    #[must_use]
    pub fn session_idle_timeout(&self) -> Option<Duration> {
        self.session_idle_timeout_ms.map(Duration::from_millis)
    }
}

pub(crate) fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
