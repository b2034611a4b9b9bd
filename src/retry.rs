//! Bounded retry of whole store cycles.
//!
//! Two budgets, both counting the initial try: `max_attempts` for an unreachable store,
//! `max_conflict_attempts` for lost optimistic races. A conflict means another caller
//! committed, so a burst of K callers on one key needs up to K attempts to drain.
//! Delays grow exponentially from `base_delay`, are capped at `max_delay` and then
//! jittered. Only [`LimiterError::is_retryable`] errors are retried; an exhausted
//! budget is reported as [`LimiterError::StorageUnavailable`].

use serde::Serialize;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::{LimiterError, Result};
use crate::jitter::Jitter;
use crate::metrics::LimiterMetrics;

pub const DEFAULT_CONFLICT_ATTEMPTS: u32 = 64;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RetryPolicy {
    max_attempts: u32,
    max_conflict_attempts: u32,
    #[serde(with = "humantime_serde")]
    base_delay: Duration,
    #[serde(with = "humantime_serde")]
    max_delay: Duration,
    jitter: Jitter,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Result<Self> {
        if max_attempts == 0 {
            return Err(LimiterError::Configuration(
                "retry attempts must be greater than 0".to_string(),
            ));
        }
        if max_delay < base_delay {
            return Err(LimiterError::Configuration(format!(
                "max retry delay ({:?}) must be >= base delay ({:?})",
                max_delay, base_delay
            )));
        }

        Ok(Self {
            max_attempts,
            max_conflict_attempts: DEFAULT_CONFLICT_ATTEMPTS.max(max_attempts),
            base_delay,
            max_delay,
            jitter: Jitter::default(),
        })
    }

    /// Single attempt, no retries.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            max_conflict_attempts: 1,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            jitter: Jitter::None,
        }
    }

    pub fn with_conflict_attempts(mut self, attempts: u32) -> Result<Self> {
        if attempts == 0 {
            return Err(LimiterError::Configuration(
                "conflict attempts must be greater than 0".to_string(),
            ));
        }
        self.max_conflict_attempts = attempts;
        Ok(self)
    }

    pub fn with_jitter(mut self, jitter: Jitter) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn max_conflict_attempts(&self) -> u32 {
        self.max_conflict_attempts
    }

    /// Backoff before retry number `retry` (1-based), before jitter.
    pub fn delay(&self, retry: u32) -> Duration {
        if retry == 0 {
            return Duration::ZERO;
        }
        let factor = 1u32.checked_shl(retry - 1).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    pub async fn run<T, Op, Fut>(&self, metrics: &LimiterMetrics, mut operation: Op) -> Result<T>
    where
        Op: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut failures = 0;
        let mut conflicts = 0;
        loop {
            let err = match operation().await {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };

            if !err.is_retryable() {
                return Err(err);
            }

            let (retry, budget) = if let LimiterError::ConcurrencyConflict { .. } = err {
                metrics.record_conflict();
                conflicts += 1;
                (conflicts, self.max_conflict_attempts)
            } else {
                failures += 1;
                (failures, self.max_attempts)
            };

            if retry >= budget {
                warn!(attempts = failures + conflicts, error = %err, "Store retry budget exhausted");
                return Err(match err {
                    LimiterError::ConcurrencyConflict { key } => {
                        LimiterError::StorageUnavailable(format!(
                            "gave up on {} after {} conflicting attempts",
                            key, conflicts
                        ))
                    }
                    other => other,
                });
            }

            let delay = self.jitter.apply(self.delay(retry));
            debug!(attempt = failures + conflicts, ?delay, error = %err, "Retrying store cycle");
            metrics.record_retry();
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            max_conflict_attempts: DEFAULT_CONFLICT_ATTEMPTS,
            base_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(200),
            jitter: Jitter::Full,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn quick(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::new(max_attempts, Duration::ZERO, Duration::ZERO)
            .unwrap()
            .with_jitter(Jitter::None)
    }

    #[test]
    fn test_rejects_zero_attempts() {
        assert!(RetryPolicy::new(0, Duration::ZERO, Duration::ZERO).is_err());
    }

    #[test]
    fn test_rejects_max_below_base() {
        assert!(
            RetryPolicy::new(3, Duration::from_millis(50), Duration::from_millis(10)).is_err()
        );
    }

    #[test]
    fn test_exponential_delay_is_capped() {
        let policy =
            RetryPolicy::new(10, Duration::from_millis(10), Duration::from_millis(75)).unwrap();
        assert_eq!(policy.delay(0), Duration::ZERO);
        assert_eq!(policy.delay(1), Duration::from_millis(10));
        assert_eq!(policy.delay(2), Duration::from_millis(20));
        assert_eq!(policy.delay(3), Duration::from_millis(40));
        assert_eq!(policy.delay(4), Duration::from_millis(75));
        assert_eq!(policy.delay(64), Duration::from_millis(75));
    }

    #[tokio::test]
    async fn test_success_after_transient_failures() {
        let metrics = LimiterMetrics::new();
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result = quick(5)
            .run(&metrics, move || async move {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(LimiterError::StorageUnavailable("connection reset".into()))
                } else {
                    Ok(7)
                }
            })
            .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(counter.load(Ordering::SeqCst), 3);
        assert_eq!(metrics.snapshot().retries, 2);
    }

    #[tokio::test]
    async fn test_exhausted_conflicts_surface_as_unavailable() {
        let metrics = LimiterMetrics::new();
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result: Result<()> = quick(3)
            .with_conflict_attempts(4)
            .unwrap()
            .run(&metrics, move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(LimiterError::ConcurrencyConflict { key: "k".into() })
            })
            .await;

        assert!(matches!(result, Err(LimiterError::StorageUnavailable(_))));
        assert_eq!(counter.load(Ordering::SeqCst), 4);
        assert_eq!(metrics.snapshot().conflicts, 4);
    }

    #[tokio::test]
    async fn test_conflicts_do_not_spend_the_outage_budget() {
        let metrics = LimiterMetrics::new();
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result = quick(2)
            .run(&metrics, move || async move {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                if n < 10 {
                    Err(LimiterError::ConcurrencyConflict { key: "k".into() })
                } else if n == 10 {
                    Err(LimiterError::StorageUnavailable("connection reset".into()))
                } else {
                    Ok("committed")
                }
            })
            .await;

        assert_eq!(result.unwrap(), "committed");
        assert_eq!(counter.load(Ordering::SeqCst), 12);
        assert_eq!(metrics.snapshot().conflicts, 10);
        assert_eq!(metrics.snapshot().retries, 11);
    }

    #[test]
    fn test_conflict_budget_defaults_above_outage_budget() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts(), 3);
        assert_eq!(policy.max_conflict_attempts(), DEFAULT_CONFLICT_ATTEMPTS);
        assert!(RetryPolicy::none().with_conflict_attempts(0).is_err());
    }

    #[tokio::test]
    async fn test_configuration_errors_are_not_retried() {
        let metrics = LimiterMetrics::new();
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result: Result<()> = quick(5)
            .run(&metrics, move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(LimiterError::Configuration("bad".into()))
            })
            .await;

        assert!(matches!(result, Err(LimiterError::Configuration(_))));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_serializes_human_durations() {
        let json = serde_json::to_value(RetryPolicy::default()).unwrap();
        assert_eq!(json["max_attempts"], 3);
        assert_eq!(json["base_delay"], "10ms");
        assert_eq!(json["max_delay"], "200ms");
        assert_eq!(json["max_conflict_attempts"], 64);
        assert_eq!(json["jitter"], "full");
    }
}
