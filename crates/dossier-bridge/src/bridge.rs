//! Resilience bridge
//!
//! Isolates the pipeline from unreliable enrichment sources:
//! - one circuit breaker per source, consulted before every attempt
//! - retry with backoff for transient failures
//! - a semaphore bounding calls in flight across all topics and sources
//! - a per-call timeout
//! - a TTL cache of complete topic results
//! - a fallback result when every source fails
//!
//! Every fetch is recorded exactly once in the [`SessionTracker`] under the
//! caller's session id, which is also sent with each request. Nothing here
//! returns an error to the caller once the bridge is built; failures surface
//! as per-source reports and fallback results.

use crate::breaker::{BreakerRegistry, BreakerState, CircuitBreaker};
use crate::config::{millis, BridgeConfig, SourceConfig};
use crate::error::{BridgeError, SourceError};
use crate::protocol::{EnrichmentItem, EnrichmentRequest, EnrichmentResponse, RequestOptions};
use crate::tracker::{CallOutcome, CallRecord, SessionMetrics, SessionTracker};
use crate::transport::{EnrichmentTransport, HttpTransport};
use futures::future::join_all;
use moka::future::Cache;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Outcome of one source for one topic
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceReport {
    /// Source name
    pub source: String,
    /// How the fetch ended
    pub outcome: CallOutcome,
    /// Attempts made
    pub attempts: u32,
    /// Wall time across attempts
    pub latency_ms: u64,
    /// Items returned
    pub item_count: usize,
    /// Final error text
    pub error: Option<String>,
}

/// Result of one fetch: report plus items (empty on failure)
#[derive(Debug, Clone)]
pub struct SourceFetch {
    /// Per-source report
    pub report: SourceReport,
    /// Items, or the final error
    pub result: Result<Vec<EnrichmentItem>, SourceError>,
}

/// Merged enrichment for one topic
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopicResearch {
    /// Topic researched
    pub topic: String,
    /// Items from all successful sources, in configured source order
    pub items: Vec<EnrichmentItem>,
    /// One report per source attempted
    pub sources: Vec<SourceReport>,
    /// Degraded result; no source produced data
    pub fallback: bool,
    /// Explanation for fallback results
    pub note: Option<String>,
    /// Served from the bridge cache
    pub cached: bool,
}

impl TopicResearch {
    /// Fallback result with an explanatory note
    pub fn fallback(topic: impl Into<String>, note: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            items: Vec::new(),
            sources: Vec::new(),
            fallback: true,
            note: Some(note.into()),
            cached: false,
        }
    }

    /// Reports of sources that produced no data
    pub fn failed_sources(&self) -> impl Iterator<Item = &SourceReport> {
        self.sources.iter().filter(|r| !r.outcome.is_success())
    }

    fn cacheable(&self) -> bool {
        !self.fallback
            && self
                .sources
                .iter()
                .all(|r| r.outcome != CallOutcome::Cancelled)
    }
}

/// Resilience bridge over a set of enrichment sources
pub struct ResilienceBridge {
    config: BridgeConfig,
    transport: Arc<dyn EnrichmentTransport>,
    breakers: BreakerRegistry,
    tracker: SessionTracker,
    limiter: Arc<Semaphore>,
    cache: Cache<String, TopicResearch>,
    cancel: CancellationToken,
}

impl std::fmt::Debug for ResilienceBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResilienceBridge")
            .field("base_url", &self.config.base_url)
            .field("available_permits", &self.limiter.available_permits())
            .field("cancelled", &self.cancel.is_cancelled())
            .finish_non_exhaustive()
    }
}

impl ResilienceBridge {
    /// Bridge over a caller-supplied transport
    ///
    /// # Errors
    /// [`BridgeError::Config`] when `batch_size` or `max_in_flight` is zero.
    pub fn new(
        config: BridgeConfig,
        transport: Arc<dyn EnrichmentTransport>,
    ) -> Result<Self, BridgeError> {
        if config.batch_size == 0 {
            return Err(BridgeError::Config("batch_size must be at least 1".into()));
        }
        if config.max_in_flight == 0 {
            return Err(BridgeError::Config("max_in_flight must be at least 1".into()));
        }

        let cache = Cache::builder()
            .max_capacity(config.cache_capacity)
            .time_to_live(config.cache_ttl())
            .build();
        let tracker = SessionTracker::new().with_idle_timeout(config.session_idle_timeout());

        tracing::info!(
            base_url = %config.base_url,
            sources = config.enabled_sources().count(),
            max_in_flight = config.max_in_flight,
            "resilience bridge ready"
        );

        Ok(Self {
            breakers: BreakerRegistry::new(config.breaker),
            limiter: Arc::new(Semaphore::new(config.max_in_flight)),
            tracker,
            cache,
            cancel: CancellationToken::new(),
            transport,
            config,
        })
    }

    /// Bridge over HTTP to `config.base_url`
    ///
    /// # Errors
    /// Configuration errors, or the HTTP client failing to build.
    pub fn http(config: BridgeConfig) -> Result<Self, BridgeError> {
        let transport = HttpTransport::new(config.base_url.clone(), config.request_timeout())?;
        Self::new(config, Arc::new(transport))
    }

    /// With an external cancellation token
    #[inline]
    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Configuration
    #[inline]
    #[must_use]
    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    /// Session tracker
    #[inline]
    #[must_use]
    pub fn tracker(&self) -> &SessionTracker {
        &self.tracker
    }

    /// Metrics recorded under `session_id`
    #[must_use]
    pub fn metrics(&self, session_id: &str) -> Option<SessionMetrics> {
        self.tracker.snapshot(session_id)
    }

    /// Breaker states by source
    #[must_use]
    pub fn breaker_states(&self) -> Vec<(String, BreakerState)> {
        self.breakers.states()
    }

    /// Cancellation token observed by every call
    #[must_use]
    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Cancel pending batches and in-flight calls
    pub fn shutdown(&self) {
        if !self.cancel.is_cancelled() {
            tracing::info!("resilience bridge shutting down");
        }
        self.cancel.cancel();
        self.limiter.close();
    }

    /// Whether [`shutdown`](Self::shutdown) has been called
    #[must_use]
    pub fn is_shut_down(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Fetch `query` from one source through its breaker and the retry policy
    pub async fn fetch(
        &self,
        session_id: &str,
        source: &SourceConfig,
        query: &str,
    ) -> SourceFetch {
        let breaker = self.breakers.get(&source.name);
        let request = self.request_for(session_id, source, query);
        let started = Instant::now();

        let breaker_ref: &CircuitBreaker = &breaker;
        let request_ref = &request;
        let attempted = self
            .config
            .retry
            .run(&self.cancel, move |_| self.attempt(breaker_ref, source, request_ref))
            .await;

        let latency = started.elapsed();
        let attempts = attempted.attempts;
        let result = attempted.result.map(|items| {
            items
                .into_iter()
                .map(|mut item| {
                    item.source.get_or_insert_with(|| source.name.clone());
                    item
                })
                .collect::<Vec<_>>()
        });
        let outcome = classify(&result, attempts);
        let error = result.as_ref().err().map(ToString::to_string);

        self.tracker.record(
            session_id,
            &CallRecord {
                source: source.name.clone(),
                topic: query.to_string(),
                outcome,
                attempts,
                latency,
                error: error.clone(),
            },
        );

        match &result {
            Ok(items) => tracing::debug!(
                session_id,
                source = %source.name,
                query,
                attempts,
                items = items.len(),
                latency_ms = millis(latency),
                "enrichment fetched"
            ),
            Err(e) => tracing::warn!(
                session_id,
                source = %source.name,
                query,
                attempts,
                outcome = ?outcome,
                error = %e,
                "enrichment fetch failed"
            ),
        }

        SourceFetch {
            report: SourceReport {
                source: source.name.clone(),
                outcome,
                attempts,
                latency_ms: millis(latency),
                item_count: result.as_ref().map_or(0, Vec::len),
                error,
            },
            result,
        }
    }

    /// Research one topic across all enabled sources concurrently
    ///
    /// Sources fail independently. When none produces data the result is a
    /// fallback with an explanatory note.
    pub async fn research_topic(&self, session_id: &str, topic: &str) -> TopicResearch {
        if let Some(hit) = self.cache.get(topic).await {
            tracing::debug!(topic, "enrichment cache hit");
            return TopicResearch { cached: true, ..hit };
        }

        let sources: Vec<&SourceConfig> = self.config.enabled_sources().collect();
        if sources.is_empty() {
            return TopicResearch::fallback(topic, "no enrichment sources are enabled");
        }

        let fetches = join_all(sources.iter().map(|s| self.fetch(session_id, s, topic))).await;

        let mut items = Vec::new();
        let mut reports = Vec::with_capacity(fetches.len());
        for fetch in fetches {
            if let Ok(found) = fetch.result {
                items.extend(found);
            }
            reports.push(fetch.report);
        }

        let fallback = reports.iter().all(|r| !r.outcome.is_success());
        let note = fallback.then(|| {
            let reasons: Vec<String> = reports
                .iter()
                .map(|r| {
                    format!(
                        "{}: {}",
                        r.source,
                        r.error.as_deref().unwrap_or("no data")
                    )
                })
                .collect();
            format!("all enrichment sources failed ({})", reasons.join("; "))
        });
        if fallback {
            tracing::warn!(topic, "all sources failed, returning fallback result");
        }

        let research = TopicResearch {
            topic: topic.to_string(),
            items,
            sources: reports,
            fallback,
            note,
            cached: false,
        };
        if research.cacheable() {
            self.cache.insert(topic.to_string(), research.clone()).await;
        }
        research
    }

    /// Research topics in fixed-size concurrent batches
    ///
    /// Results keep topic order. Topics not reached before shutdown come back
    /// as fallbacks.
    pub async fn research_topics(
        &self,
        session_id: &str,
        topics: &[String],
    ) -> Vec<TopicResearch> {
        self.tracker.evict_idle();

        let mut results = Vec::with_capacity(topics.len());
        for (index, batch) in topics.chunks(self.config.batch_size).enumerate() {
            if index > 0 {
                tokio::select! {
                    biased;
                    () = self.cancel.cancelled() => break,
                    () = tokio::time::sleep(self.config.batch_delay()) => {}
                }
            }
            if self.cancel.is_cancelled() {
                break;
            }
            tracing::debug!(session_id, batch = index, topics = batch.len(), "researching batch");
            let researched = join_all(batch.iter().map(|t| self.research_topic(session_id, t)));
            results.extend(researched.await);
        }

        for topic in &topics[results.len()..] {
            results.push(TopicResearch::fallback(
                topic.as_str(),
                "bridge shut down before the topic was researched",
            ));
        }
        results
    }

    fn request_for(
        &self,
        session_id: &str,
        source: &SourceConfig,
        query: &str,
    ) -> EnrichmentRequest {
        EnrichmentRequest {
            query: query.to_string(),
            session_id: session_id.to_string(),
            options: RequestOptions {
                limit: Some(source.limit.unwrap_or(self.config.result_limit)),
                sort_by: source.sort_by.clone(),
                time_window: source.time_window.clone(),
                source_filters: Vec::new(),
            },
        }
    }

    async fn attempt(
        &self,
        breaker: &CircuitBreaker,
        source: &SourceConfig,
        request: &EnrichmentRequest,
    ) -> Result<Vec<EnrichmentItem>, SourceError> {
        if !breaker.allow() {
            return Err(SourceError::CircuitOpen(source.name.clone()));
        }

        let _permit = tokio::select! {
            biased;
            () = self.cancel.cancelled() => return Err(SourceError::Cancelled),
            permit = Arc::clone(&self.limiter).acquire_owned() => {
                permit.map_err(|_| SourceError::Cancelled)?
            }
        };

        let timeout = self.config.request_timeout();
        let call = tokio::time::timeout(timeout, self.transport.send(source, request));
        let result = tokio::select! {
            biased;
            () = self.cancel.cancelled() => return Err(SourceError::Cancelled),
            sent = call => match sent {
                Ok(response) => response.and_then(EnrichmentResponse::into_items),
                Err(_) => Err(SourceError::Timeout(timeout)),
            },
        };

        match &result {
            Ok(_) => breaker.record_success(),
            Err(SourceError::Cancelled) => {}
            Err(e) if e.is_source_fault() => breaker.record_failure(),
            // a half-open trial call fails on any error
            Err(_) if breaker.state() == BreakerState::HalfOpen => breaker.record_failure(),
            Err(_) => {}
        }
        result
    }
}

fn classify(result: &Result<Vec<EnrichmentItem>, SourceError>, attempts: u32) -> CallOutcome {
    match result {
        Ok(_) if attempts > 1 => CallOutcome::RetriedSuccess,
        Ok(_) => CallOutcome::Success,
        Err(SourceError::Cancelled) => CallOutcome::Cancelled,
        Err(SourceError::CircuitOpen(_)) => CallOutcome::CircuitOpen,
        Err(e) if e.is_transient() => CallOutcome::ExhaustedRetries,
        Err(_) => CallOutcome::Permanent,
    }
}
