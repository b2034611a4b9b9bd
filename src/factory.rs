//! Builds configured strategies from a policy name.

use serde::Serialize;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use crate::algorithms::{FixedWindowStrategy, RateLimitStrategy, TokenBucketStrategy};
use crate::clock::{Clock, SystemClock};
use crate::error::{LimiterError, Result};
use crate::metrics::LimiterMetrics;
use crate::retry::RetryPolicy;
use crate::store::BucketStore;
use crate::token_bucket::BucketConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Policy {
    TokenBucket,
    FixedWindow,
}

impl Policy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Policy::TokenBucket => "token-bucket",
            Policy::FixedWindow => "fixed-window",
        }
    }
}

impl fmt::Display for Policy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Policy {
    type Err = LimiterError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "token-bucket" | "tokenbucket" => Ok(Policy::TokenBucket),
            "fixed-window" | "fixedwindow" => Ok(Policy::FixedWindow),
            _ => Err(LimiterError::Configuration(format!(
                "unsupported rate limiter strategy: {}",
                s
            ))),
        }
    }
}

/// Wires algorithm, store, clock and retry policy into a strategy so callers never
/// assemble those pieces themselves.
#[derive(Debug, Clone)]
pub struct StrategyFactory {
    clock: Arc<dyn Clock>,
    retry: RetryPolicy,
    metrics: Arc<LimiterMetrics>,
}

impl StrategyFactory {
    pub fn new() -> Self {
        Self {
            clock: Arc::new(SystemClock),
            retry: RetryPolicy::default(),
            metrics: Arc::new(LimiterMetrics::new()),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<LimiterMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn metrics(&self) -> Arc<LimiterMetrics> {
        Arc::clone(&self.metrics)
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Fails with [`LimiterError::Configuration`] for an unknown `policy_name`.
    pub fn create<S>(
        &self,
        policy_name: &str,
        config: BucketConfig,
        store: Arc<S>,
    ) -> Result<Arc<dyn RateLimitStrategy>>
    where
        S: BucketStore + 'static,
    {
        let policy: Policy = policy_name.parse()?;
        Ok(self.build(policy, config, store))
    }

    pub fn create_default<S>(&self, config: BucketConfig, store: Arc<S>) -> Arc<dyn RateLimitStrategy>
    where
        S: BucketStore + 'static,
    {
        self.build(Policy::TokenBucket, config, store)
    }

    pub fn build<S>(
        &self,
        policy: Policy,
        config: BucketConfig,
        store: Arc<S>,
    ) -> Arc<dyn RateLimitStrategy>
    where
        S: BucketStore + 'static,
    {
        let clock = Arc::clone(&self.clock);
        let retry = self.retry.clone();
        let metrics = Arc::clone(&self.metrics);

        match policy {
            Policy::TokenBucket => {
                Arc::new(TokenBucketStrategy::new(config, store, clock, retry, metrics))
            }
            Policy::FixedWindow => {
                Arc::new(FixedWindowStrategy::new(config, store, clock, retry, metrics))
            }
        }
    }
}

impl Default for StrategyFactory {
    fn default() -> Self {
        Self::new()
    }
}
