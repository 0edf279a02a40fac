//! Per-session call metrics
//!
//! One [`SessionMetrics`] per session id, created on first use and updated
//! additively. Sessions idle longer than the configured timeout can be
//! evicted with [`SessionTracker::evict_idle`].

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::Instant;

/// How one fetch ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallOutcome {
    /// First attempt succeeded
    Success,
    /// Succeeded after at least one retry
    RetriedSuccess,
    /// Transient failures until retries ran out
    ExhaustedRetries,
    /// Failed with a non-retryable error
    Permanent,
    /// Breaker was open; nothing was sent
    CircuitOpen,
    /// Bridge shut down mid-call
    Cancelled,
}

impl CallOutcome {
    /// Whether the call produced data
    #[must_use]
    pub fn is_success(self) -> bool {
        matches!(self, Self::Success | Self::RetriedSuccess)
    }
}

/// One completed fetch
#[derive(Debug, Clone)]
pub struct CallRecord {
    /// Source name
    pub source: String,
    /// Query or topic
    pub topic: String,
    /// Outcome
    pub outcome: CallOutcome,
    /// Attempts made
    pub attempts: u32,
    /// Wall time across all attempts
    pub latency: Duration,
    /// Final error text, if any
    pub error: Option<String>,
}

/// Failure entry in a session's error log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorEntry {
    /// When it was recorded
    pub at: DateTime<Utc>,
    /// Source name
    pub source: String,
    /// Query or topic
    pub topic: String,
    /// Error text
    pub message: String,
}

/// Count of each outcome
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutcomeCounters {
    /// First-attempt successes
    pub success: u64,
    /// Successes after retry
    pub retried_success: u64,
    /// Retries exhausted
    pub exhausted_retries: u64,
    /// Non-retryable failures
    pub permanent: u64,
    /// Breaker short-circuits
    pub circuit_open: u64,
    /// Cancelled calls
    pub cancelled: u64,
}

impl OutcomeCounters {
    fn bump(&mut self, outcome: CallOutcome) {
        let slot = match outcome {
            CallOutcome::Success => &mut self.success,
            CallOutcome::RetriedSuccess => &mut self.retried_success,
            CallOutcome::ExhaustedRetries => &mut self.exhausted_retries,
            CallOutcome::Permanent => &mut self.permanent,
            CallOutcome::CircuitOpen => &mut self.circuit_open,
            CallOutcome::Cancelled => &mut self.cancelled,
        };
        *slot += 1;
    }

    /// Sum of all counters
    #[must_use]
    pub fn total(&self) -> u64 {
        self.success
            + self.retried_success
            + self.exhausted_retries
            + self.permanent
            + self.circuit_open
            + self.cancelled
    }
}

/// Metrics for one session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionMetrics {
    /// Session id
    pub session_id: String,
    /// Fetches recorded
    pub request_count: u64,
    /// Latencies per topic, in recording order
    pub per_topic_latencies: IndexMap<String, Vec<Duration>>,
    /// Failed fetches
    pub error_log: Vec<ErrorEntry>,
    /// First use
    pub started_at: DateTime<Utc>,
    /// Per-outcome counters
    pub outcomes: OutcomeCounters,
}

impl SessionMetrics {
    fn new(session_id: &str) -> Self {
        Self {
            session_id: session_id.to_string(),
            request_count: 0,
            per_topic_latencies: IndexMap::new(),
            error_log: Vec::new(),
            started_at: Utc::now(),
            outcomes: OutcomeCounters::default(),
        }
    }

    /// Mean latency for a topic
    #[must_use]
    pub fn mean_latency(&self, topic: &str) -> Option<Duration> {
        let samples = self.per_topic_latencies.get(topic)?;
        let count = u32::try_from(samples.len()).ok().filter(|n| *n > 0)?;
        Some(samples.iter().sum::<Duration>() / count)
    }
}

#[derive(Debug)]
struct Entry {
    metrics: SessionMetrics,
    last_active: Instant,
}

/// Session metrics registry
#[derive(Debug, Default)]
pub struct SessionTracker {
    sessions: DashMap<String, Entry>,
    idle_timeout: Option<Duration>,
}

impl SessionTracker {
    /// Tracker that never evicts
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// With idle eviction threshold
    #[inline]
    #[must_use]
    pub fn with_idle_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.idle_timeout = timeout;
        self
    }

    /// Record a completed fetch
    pub fn record(&self, session_id: &str, call: &CallRecord) {
        let mut entry = self
            .sessions
            .entry(session_id.to_string())
            .or_insert_with(|| Entry {
                metrics: SessionMetrics::new(session_id),
                last_active: Instant::now(),
            });
        entry.last_active = Instant::now();

        let metrics = &mut entry.metrics;
        metrics.request_count += 1;
        metrics.outcomes.bump(call.outcome);
        metrics
            .per_topic_latencies
            .entry(call.topic.clone())
            .or_default()
            .push(call.latency);
        if let Some(message) = &call.error {
            metrics.error_log.push(ErrorEntry {
                at: Utc::now(),
                source: call.source.clone(),
                topic: call.topic.clone(),
                message: message.clone(),
            });
        }
    }

    /// Copy of a session's metrics
    #[must_use]
    pub fn snapshot(&self, session_id: &str) -> Option<SessionMetrics> {
        self.sessions.get(session_id).map(|e| e.metrics.clone())
    }

    /// Drop sessions idle past the timeout, returning how many were removed
    pub fn evict_idle(&self) -> usize {
        let Some(timeout) = self.idle_timeout else {
            return 0;
        };
        let before = self.sessions.len();
        self.sessions
            .retain(|_, e| e.last_active.elapsed() < timeout);
        let evicted = before.saturating_sub(self.sessions.len());
        if evicted > 0 {
            tracing::debug!(evicted, "evicted idle tracker sessions");
        }
        evicted
    }

    /// Remove one session
    pub fn remove(&self, session_id: &str) -> Option<SessionMetrics> {
        self.sessions.remove(session_id).map(|(_, e)| e.metrics)
    }

    /// Tracked sessions
    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Whether no sessions are tracked
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call(topic: &str, outcome: CallOutcome, ms: u64, error: Option<&str>) -> CallRecord {
        CallRecord {
            source: "web".into(),
            topic: topic.into(),
            outcome,
            attempts: 1,
            latency: Duration::from_millis(ms),
            error: error.map(str::to_string),
        }
    }

    #[test]
    fn records_accumulate() {
        let t = SessionTracker::new();
        t.record("s1", &call("rust", CallOutcome::Success, 100, None));
        t.record("s1", &call("rust", CallOutcome::Permanent, 300, Some("404")));
        t.record("s1", &call("tokio", CallOutcome::CircuitOpen, 0, Some("open")));

        let m = t.snapshot("s1").expect("session");
        assert_eq!(m.request_count, 3);
        assert_eq!(m.outcomes.success, 1);
        assert_eq!(m.outcomes.permanent, 1);
        assert_eq!(m.outcomes.circuit_open, 1);
        assert_eq!(m.outcomes.total(), 3);
        assert_eq!(m.error_log.len(), 2);
        assert_eq!(m.mean_latency("rust"), Some(Duration::from_millis(200)));
        let topics: Vec<_> = m.per_topic_latencies.keys().cloned().collect();
        assert_eq!(topics, vec!["rust", "tokio"]);
    }

    #[tokio::test(start_paused = true)]
    async fn idle_sessions_are_evicted() {
        let t = SessionTracker::new().with_idle_timeout(Some(Duration::from_secs(60)));
        t.record("old", &call("a", CallOutcome::Success, 1, None));
        tokio::time::advance(Duration::from_secs(61)).await;
        t.record("fresh", &call("a", CallOutcome::Success, 1, None));

        assert_eq!(t.evict_idle(), 1);
        assert!(t.snapshot("old").is_none());
        assert!(t.snapshot("fresh").is_some());
    }

    #[test]
    fn no_timeout_keeps_everything() {
        let t = SessionTracker::new();
        t.record("s", &call("a", CallOutcome::Success, 1, None));
        assert_eq!(t.evict_idle(), 0);
        assert_eq!(t.len(), 1);
    }
}
