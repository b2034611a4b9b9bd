use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use crate::algorithms::RateLimitStrategy;
use crate::error::{LimiterError, Result};
use crate::metrics::{LimiterMetrics, MetricsSnapshot};
use crate::token_bucket::BucketConfig;

/// What the gateway does with a request when the limiter itself has failed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureMode {
    /// Admit the request.
    Open,
    /// Reject the request with a service-unavailable response.
    #[default]
    Closed,
}

impl FromStr for FailureMode {
    type Err = LimiterError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "open" | "fail-open" => Ok(FailureMode::Open),
            "closed" | "fail-closed" => Ok(FailureMode::Closed),
            _ => Err(LimiterError::Configuration(format!(
                "unknown failure mode '{}', expected 'open' or 'closed'",
                s
            ))),
        }
    }
}

impl fmt::Display for FailureMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureMode::Open => f.write_str("open"),
            FailureMode::Closed => f.write_str("closed"),
        }
    }
}

/// The single entry point offered to the gateway layer.
///
/// Bound to one fully built strategy for its whole lifetime. Cloning shares the strategy.
/// `Ok(false)` means the policy denied the request; `Err` means the limiter could not
/// decide, and callers must not treat the two alike.
#[derive(Clone)]
pub struct RateLimiter {
    strategy: Arc<dyn RateLimitStrategy>,
    metrics: Arc<LimiterMetrics>,
}

impl RateLimiter {
    pub fn new(strategy: Arc<dyn RateLimitStrategy>, metrics: Arc<LimiterMetrics>) -> Self {
        Self { strategy, metrics }
    }

    pub async fn is_request_allowed(&self, client_id: &str) -> Result<bool> {
        match self.strategy.is_allowed(client_id).await {
            Ok(allowed) => {
                self.metrics.record_decision(allowed);
                Ok(allowed)
            }
            Err(err) => {
                self.metrics.record_storage_failure();
                Err(err)
            }
        }
    }

    /// Remaining tokens after refill. Persists refill progress.
    pub async fn get_remaining_tokens(&self, client_id: &str) -> Result<u64> {
        self.strategy.available_tokens(client_id).await
    }

    /// Remaining tokens after refill, without writing to the store.
    pub async fn peek_remaining_tokens(&self, client_id: &str) -> Result<u64> {
        self.strategy.peek_available_tokens(client_id).await
    }

    pub fn get_capacity(&self) -> u64 {
        self.strategy.capacity()
    }

    pub fn policy_name(&self) -> &'static str {
        self.strategy.name()
    }

    pub fn bucket_config(&self) -> BucketConfig {
        *self.strategy.config()
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }
}

impl fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RateLimiter")
            .field("policy", &self.strategy.name())
            .field("config", self.strategy.config())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::factory::StrategyFactory;
    use crate::retry::RetryPolicy;
    use crate::store::MemoryStore;
    use async_trait::async_trait;

    struct BrokenStrategy(BucketConfig);

    #[async_trait]
    impl RateLimitStrategy for BrokenStrategy {
        fn name(&self) -> &'static str {
            "broken"
        }

        fn config(&self) -> &BucketConfig {
            &self.0
        }

        async fn is_allowed(&self, _client_id: &str) -> Result<bool> {
            Err(LimiterError::StorageUnavailable("connection refused".into()))
        }

        async fn available_tokens(&self, _client_id: &str) -> Result<u64> {
            Err(LimiterError::StorageUnavailable("connection refused".into()))
        }

        async fn peek_available_tokens(&self, _client_id: &str) -> Result<u64> {
            Err(LimiterError::StorageUnavailable("connection refused".into()))
        }
    }

    fn limiter(clock: ManualClock) -> RateLimiter {
        let metrics = Arc::new(LimiterMetrics::new());
        let factory = StrategyFactory::new()
            .with_clock(Arc::new(clock))
            .with_retry_policy(RetryPolicy::none())
            .with_metrics(metrics.clone());
        let strategy = factory
            .create(
                "token-bucket",
                BucketConfig::new(10, 5, 100_000).unwrap(),
                Arc::new(MemoryStore::default()),
            )
            .unwrap();
        RateLimiter::new(strategy, metrics)
    }

    #[tokio::test]
    async fn test_delegates_and_counts() {
        let clock = ManualClock::new(0);
        let limiter = limiter(clock.clone());

        assert_eq!(limiter.get_capacity(), 10);
        for _ in 0..10 {
            assert!(limiter.is_request_allowed("10.1.1.1").await.unwrap());
        }
        assert!(!limiter.is_request_allowed("10.1.1.1").await.unwrap());

        clock.advance(100_000);
        assert_eq!(limiter.get_remaining_tokens("10.1.1.1").await.unwrap(), 5);
        assert!(limiter.is_request_allowed("10.1.1.1").await.unwrap());
        assert_eq!(limiter.peek_remaining_tokens("10.1.1.1").await.unwrap(), 4);

        let metrics = limiter.metrics();
        assert_eq!(metrics.allowed_requests, 11);
        assert_eq!(metrics.throttled_requests, 1);
    }

    #[tokio::test]
    async fn test_infrastructure_failure_is_not_a_denial() {
        let metrics = Arc::new(LimiterMetrics::new());
        let limiter = RateLimiter::new(
            Arc::new(BrokenStrategy(BucketConfig::new(1, 1, 1).unwrap())),
            metrics.clone(),
        );

        let result = limiter.is_request_allowed("client").await;
        assert!(matches!(result, Err(LimiterError::StorageUnavailable(_))));
        assert_eq!(metrics.snapshot().storage_failures, 1);
        assert_eq!(metrics.snapshot().throttled_requests, 0);
    }

    #[test]
    fn test_failure_mode_parsing() {
        assert_eq!("open".parse::<FailureMode>().unwrap(), FailureMode::Open);
        assert_eq!("Fail-Closed".parse::<FailureMode>().unwrap(), FailureMode::Closed);
        assert!("maybe".parse::<FailureMode>().is_err());
        assert_eq!(FailureMode::default(), FailureMode::Closed);
    }
}
