//! Retry with exponential backoff
//!
//! Only transient [`SourceError`]s are retried. The delay before retry `n`
//! (1-based) is `base · 2^(n-1)`, capped at `max_delay`; a server-provided
//! `Retry-After` hint replaces the computed delay but is capped the same way.
//! Waiting is cancellable.

use crate::error::SourceError;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Retry limits and backoff shape
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: u32,
    /// Delay before the first retry
    pub base_delay_ms: u64,
    /// Upper bound on any single delay
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay_ms: 500,
            max_delay_ms: 8_000,
        }
    }
}

/// Result of a retried operation plus the attempts it took
#[derive(Debug)]
pub struct Attempted<T> {
    /// Final result
    pub result: Result<T, SourceError>,
    /// Attempts made, at least 1 unless cancelled before starting
    pub attempts: u32,
}

impl RetryPolicy {
    /// Policy that never retries
    #[must_use]
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// With retry count
    #[inline]
    #[must_use]
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// With base and maximum delay
    #[inline]
    #[must_use]
    pub fn with_delays(mut self, base: Duration, max: Duration) -> Self {
        self.base_delay_ms = crate::config::millis(base);
        self.max_delay_ms = crate::config::millis(max);
        self
    }

    /// Backoff before retry `attempt` (1-based)
    #[must_use]
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(32);
        let delay = self.base_delay_ms.saturating_mul(1u64 << exponent);
        Duration::from_millis(delay.min(self.max_delay_ms))
    }

    /// Delay before retry `attempt`, honouring a rate-limit hint up to
    /// `max_delay_ms`
    #[must_use]
    pub fn delay_for(&self, attempt: u32, error: &SourceError) -> Duration {
        match error.retry_after() {
            Some(hint) => hint.min(Duration::from_millis(self.max_delay_ms)),
            None => self.backoff(attempt),
        }
    }

    /// Whether another attempt is allowed after `attempts` failed ones
    #[must_use]
    pub fn should_retry(&self, attempts: u32, error: &SourceError) -> bool {
        error.is_transient() && attempts <= self.max_retries
    }

    /// Run `op` until it succeeds, fails permanently or retries run out
    ///
    /// `op` receives the 1-based attempt number. Cancellation during a
    /// backoff wait yields [`SourceError::Cancelled`].
    pub async fn run<T, F, Fut>(&self, cancel: &CancellationToken, mut op: F) -> Attempted<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, SourceError>>,
    {
        let mut attempts = 0;
        loop {
            if cancel.is_cancelled() {
                return Attempted {
                    result: Err(SourceError::Cancelled),
                    attempts,
                };
            }
            attempts += 1;
            let error = match op(attempts).await {
                Ok(value) => {
                    return Attempted {
                        result: Ok(value),
                        attempts,
                    }
                }
                Err(e) => e,
            };
            if !self.should_retry(attempts, &error) {
                return Attempted {
                    result: Err(error),
                    attempts,
                };
            }

            let delay = self.delay_for(attempts, &error);
            tracing::debug!(
                attempt = attempts,
                delay_ms = crate::config::millis(delay),
                error = %error,
                "retrying after transient failure"
            );
            tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    return Attempted { result: Err(SourceError::Cancelled), attempts };
                }
                () = tokio::time::sleep(delay) => {}
            }
        }
    }
}
