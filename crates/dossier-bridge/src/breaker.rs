//! Per-source circuit breakers
//!
//! State machine:
//! - `Closed` → `Open` after `failure_threshold` consecutive failures within
//!   the rolling window
//! - `Open` → `HalfOpen` once the cool-down has elapsed
//! - `HalfOpen` → `Closed` after `success_threshold` consecutive successes
//! - `HalfOpen` → `Open` on any failure
//!
//! While open, calls fail fast without invoking the wrapped function.
//! Time is read from `tokio::time::Instant`, so paused-clock tests can drive
//! the cool-down.

use crate::error::BreakerError;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BreakerState {
    /// Calls flow normally
    Closed,
    /// Calls fail fast
    Open,
    /// Trial calls allowed; one failure reopens
    HalfOpen,
}

/// Breaker thresholds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakerConfig {
    /// Consecutive failures that open the breaker
    pub failure_threshold: u32,
    /// Rolling window the failures must fall within
    pub window_ms: u64,
    /// Time spent open before trial calls are allowed
    pub cooldown_ms: u64,
    /// Consecutive half-open successes that close the breaker
    pub success_threshold: u32,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            window_ms: 60_000,
            cooldown_ms: 30_000,
            success_threshold: 2,
        }
    }
}

impl BreakerConfig {
    /// With failure threshold
    #[inline]
    #[must_use]
    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold.max(1);
        self
    }

    /// With cool-down
    #[inline]
    #[must_use]
    pub fn with_cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown_ms = crate::config::millis(cooldown);
        self
    }

    /// With rolling window
    #[inline]
    #[must_use]
    pub fn with_window(mut self, window: Duration) -> Self {
        self.window_ms = crate::config::millis(window);
        self
    }

    /// With half-open success threshold
    #[inline]
    #[must_use]
    pub fn with_success_threshold(mut self, threshold: u32) -> Self {
        self.success_threshold = threshold.max(1);
        self
    }

    fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }

    fn cooldown(&self) -> Duration {
        Duration::from_millis(self.cooldown_ms)
    }
}

#[derive(Debug)]
struct Inner {
    state: BreakerState,
    failures: VecDeque<Instant>,
    opened_at: Option<Instant>,
    half_open_successes: u32,
    trips: u64,
}

/// Circuit breaker for one source
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: BreakerConfig,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    /// Closed breaker
    pub fn new(name: impl Into<String>, config: BreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            inner: Mutex::new(Inner {
                state: BreakerState::Closed,
                failures: VecDeque::new(),
                opened_at: None,
                half_open_successes: 0,
                trips: 0,
            }),
        }
    }

    /// Source name
    #[inline]
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current state, applying an elapsed cool-down
    #[must_use]
    pub fn state(&self) -> BreakerState {
        let mut inner = self.inner.lock();
        self.refresh(&mut inner);
        inner.state
    }

    /// Times the breaker has opened
    #[must_use]
    pub fn trips(&self) -> u64 {
        self.inner.lock().trips
    }

    /// Whether a call may proceed now
    #[must_use]
    pub fn allow(&self) -> bool {
        self.state() != BreakerState::Open
    }

    /// Record a successful call
    pub fn record_success(&self) {
        let mut inner = self.inner.lock();
        self.refresh(&mut inner);
        match inner.state {
            BreakerState::Closed => inner.failures.clear(),
            BreakerState::HalfOpen => {
                inner.half_open_successes += 1;
                if inner.half_open_successes >= self.config.success_threshold {
                    inner.state = BreakerState::Closed;
                    inner.failures.clear();
                    inner.opened_at = None;
                    inner.half_open_successes = 0;
                    tracing::info!(source = %self.name, "circuit closed");
                }
            }
            BreakerState::Open => {}
        }
    }

    /// Record a failed call
    pub fn record_failure(&self) {
        let now = Instant::now();
        let mut inner = self.inner.lock();
        self.refresh(&mut inner);
        match inner.state {
            BreakerState::Closed => {
                inner.failures.push_back(now);
                let window = self.config.window();
                while inner
                    .failures
                    .front()
                    .is_some_and(|t| now.duration_since(*t) > window)
                {
                    inner.failures.pop_front();
                }
                if inner.failures.len() >= self.config.failure_threshold as usize {
                    self.trip(&mut inner, now);
                }
            }
            BreakerState::HalfOpen => self.trip(&mut inner, now),
            BreakerState::Open => {}
        }
    }

    /// Run `f` through the breaker
    ///
    /// # Errors
    /// [`BreakerError::Open`] without calling `f` while open, otherwise
    /// [`BreakerError::Inner`] with `f`'s error.
    pub async fn call<F, Fut, T, E>(&self, f: F) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if !self.allow() {
            return Err(BreakerError::Open);
        }
        match f().await {
            Ok(value) => {
                self.record_success();
                Ok(value)
            }
            Err(e) => {
                self.record_failure();
                Err(BreakerError::Inner(e))
            }
        }
    }

    fn trip(&self, inner: &mut Inner, now: Instant) {
        inner.state = BreakerState::Open;
        inner.opened_at = Some(now);
        inner.failures.clear();
        inner.half_open_successes = 0;
        inner.trips += 1;
        tracing::warn!(
            source = %self.name,
            cooldown_ms = self.config.cooldown_ms,
            trips = inner.trips,
            "circuit opened"
        );
    }

    fn refresh(&self, inner: &mut Inner) {
        if inner.state != BreakerState::Open {
            return;
        }
        let cooled = inner
            .opened_at
            .map_or(true, |at| at.elapsed() >= self.config.cooldown());
        if cooled {
            inner.state = BreakerState::HalfOpen;
            inner.half_open_successes = 0;
            tracing::info!(source = %self.name, "circuit half-open");
        }
    }
}

/// Breakers keyed by source name, created on first use
#[derive(Debug, Default)]
pub struct BreakerRegistry {
    config: BreakerConfig,
    breakers: DashMap<String, Arc<CircuitBreaker>>,
}

impl BreakerRegistry {
    /// Registry creating breakers with the given thresholds
    #[must_use]
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            breakers: DashMap::new(),
        }
    }

    /// Breaker for a source
    #[must_use]
    pub fn get(&self, source: &str) -> Arc<CircuitBreaker> {
        if let Some(existing) = self.breakers.get(source) {
            return Arc::clone(existing.value());
        }
        Arc::clone(
            self.breakers
                .entry(source.to_string())
                .or_insert_with(|| Arc::new(CircuitBreaker::new(source, self.config)))
                .value(),
        )
    }

    /// Current state of every known breaker
    #[must_use]
    pub fn states(&self) -> Vec<(String, BreakerState)> {
        let mut states: Vec<_> = self
            .breakers
            .iter()
            .map(|e| (e.key().clone(), e.value().state()))
            .collect();
        states.sort_by(|a, b| a.0.cmp(&b.0));
        states
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> BreakerConfig {
        BreakerConfig::default()
            .with_failure_threshold(3)
            .with_window(Duration::from_secs(10))
            .with_cooldown(Duration::from_secs(5))
            .with_success_threshold(2)
    }

    #[tokio::test(start_paused = true)]
    async fn opens_after_threshold_and_recovers() {
        let b = CircuitBreaker::new("web", config());
        for _ in 0..3 {
            assert!(b.allow());
            b.record_failure();
        }
        assert_eq!(b.state(), BreakerState::Open);
        assert_eq!(b.trips(), 1);

        tokio::time::advance(Duration::from_secs(5)).await;
        assert_eq!(b.state(), BreakerState::HalfOpen);

        b.record_success();
        assert_eq!(b.state(), BreakerState::HalfOpen);
        b.record_success();
        assert_eq!(b.state(), BreakerState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn half_open_failure_reopens() {
        let b = CircuitBreaker::new("web", config());
        for _ in 0..3 {
            b.record_failure();
        }
        tokio::time::advance(Duration::from_secs(6)).await;
        assert_eq!(b.state(), BreakerState::HalfOpen);
        b.record_failure();
        assert_eq!(b.state(), BreakerState::Open);
        assert_eq!(b.trips(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn failures_outside_window_do_not_count() {
        let b = CircuitBreaker::new("web", config());
        b.record_failure();
        b.record_failure();
        tokio::time::advance(Duration::from_secs(11)).await;
        b.record_failure();
        assert_eq!(b.state(), BreakerState::Closed);
    }

    #[tokio::test]
    async fn success_resets_consecutive_count() {
        let b = CircuitBreaker::new("web", config());
        b.record_failure();
        b.record_failure();
        b.record_success();
        b.record_failure();
        assert_eq!(b.state(), BreakerState::Closed);
    }

    #[tokio::test]
    async fn open_breaker_short_circuits() {
        let b = CircuitBreaker::new("web", config());
        for _ in 0..3 {
            let r: Result<(), _> = b.call(|| async { Err::<(), _>("down") }).await;
            assert_eq!(r, Err(BreakerError::Inner("down")));
        }

        let mut invoked = false;
        let r: Result<(), BreakerError<&str>> = b
            .call(|| {
                invoked = true;
                async { Ok(()) }
            })
            .await;
        assert_eq!(r, Err(BreakerError::Open));
        assert!(!invoked);
    }

    #[test]
    fn registry_reuses_breakers() {
        let reg = BreakerRegistry::new(config());
        let a = reg.get("web");
        let b = reg.get("web");
        assert!(Arc::ptr_eq(&a, &b));
        reg.get("academic");
        let names: Vec<_> = reg.states().into_iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["academic", "web"]);
    }
}
