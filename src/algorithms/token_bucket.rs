//! Token bucket strategy
//!
//! Each client owns a bucket of `capacity` tokens refilled by `refill_rate` tokens per
//! whole `refill_interval_ms`. Every check runs refill-then-consume inside one atomic
//! store apply.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

use super::RateLimitStrategy;
use crate::clock::Clock;
use crate::error::Result;
use crate::metrics::LimiterMetrics;
use crate::retry::RetryPolicy;
use crate::store::BucketStore;
use crate::token_bucket::{BucketConfig, TokenBucket};

pub struct TokenBucketStrategy<S> {
    bucket: TokenBucket,
    store: Arc<S>,
    clock: Arc<dyn Clock>,
    retry: RetryPolicy,
    metrics: Arc<LimiterMetrics>,
}

impl<S: BucketStore> TokenBucketStrategy<S> {
    pub fn new(
        config: BucketConfig,
        store: Arc<S>,
        clock: Arc<dyn Clock>,
        retry: RetryPolicy,
        metrics: Arc<LimiterMetrics>,
    ) -> Self {
        Self {
            bucket: TokenBucket::new(config),
            store,
            clock,
            retry,
            metrics,
        }
    }
}

#[async_trait]
impl<S: BucketStore + 'static> RateLimitStrategy for TokenBucketStrategy<S> {
    fn name(&self) -> &'static str {
        "token-bucket"
    }

    fn config(&self) -> &BucketConfig {
        self.bucket.config()
    }

    async fn is_allowed(&self, client_id: &str) -> Result<bool> {
        let bucket = &self.bucket;
        let store = &self.store;
        let clock = &self.clock;

        let admitted = self
            .retry
            .run(&self.metrics, move || async move {
                // Read per attempt so a retried cycle sees the time of its own turn.
                let now = clock.now_ms();
                store
                    .apply_atomic(client_id, bucket.config(), now, move |state| {
                        bucket.consume(bucket.refill(state, now))
                    })
                    .await
            })
            .await?;

        if !admitted {
            debug!(client_id, "Token bucket empty");
        }
        Ok(admitted)
    }

    async fn available_tokens(&self, client_id: &str) -> Result<u64> {
        let bucket = &self.bucket;
        let store = &self.store;
        let clock = &self.clock;

        self.retry
            .run(&self.metrics, move || async move {
                let now = clock.now_ms();
                store
                    .apply_atomic(client_id, bucket.config(), now, move |state| {
                        let refilled = bucket.refill(state, now);
                        (refilled, refilled.token_count)
                    })
                    .await
            })
            .await
    }

    async fn peek_available_tokens(&self, client_id: &str) -> Result<u64> {
        let bucket = &self.bucket;
        let store = &self.store;
        let clock = &self.clock;

        self.retry
            .run(&self.metrics, move || async move {
                let now = clock.now_ms();
                let state = store.get(client_id, bucket.config(), now).await?;
                Ok(bucket.refill(state, now).token_count)
            })
            .await
    }
}
