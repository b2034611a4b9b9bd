//! Fixed window strategy
//!
//! Windows are `refill_interval_ms` long and aligned to multiples of the interval since the
//! epoch. The first check in a new window resets the count to `capacity`; `refill_rate` is
//! not used. State is persisted in the same layout as the token bucket, with
//! `last_refill_ms` holding the current window start.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

use super::RateLimitStrategy;
use crate::bucket_state::BucketState;
use crate::clock::Clock;
use crate::error::Result;
use crate::metrics::LimiterMetrics;
use crate::retry::RetryPolicy;
use crate::store::BucketStore;
use crate::token_bucket::{consume_one, BucketConfig};

/// Pure window arithmetic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedWindow {
    config: BucketConfig,
}

impl FixedWindow {
    pub fn new(config: BucketConfig) -> Self {
        Self { config }
    }

    pub fn window_start(&self, now_ms: i64) -> i64 {
        let interval = self.config.refill_interval_ms() as i64;
        now_ms - now_ms.rem_euclid(interval)
    }

    /// Start a fresh window if `now_ms` is past the one recorded in `state`.
    pub fn roll(&self, state: BucketState, now_ms: i64) -> BucketState {
        let start = self.window_start(now_ms);
        if start > state.last_refill_ms {
            BucketState::new(self.config.capacity(), start)
        } else {
            state
        }
    }
}

pub struct FixedWindowStrategy<S> {
    window: FixedWindow,
    store: Arc<S>,
    clock: Arc<dyn Clock>,
    retry: RetryPolicy,
    metrics: Arc<LimiterMetrics>,
}

impl<S: BucketStore> FixedWindowStrategy<S> {
    pub fn new(
        config: BucketConfig,
        store: Arc<S>,
        clock: Arc<dyn Clock>,
        retry: RetryPolicy,
        metrics: Arc<LimiterMetrics>,
    ) -> Self {
        Self {
            window: FixedWindow::new(config),
            store,
            clock,
            retry,
            metrics,
        }
    }
}

#[async_trait]
impl<S: BucketStore + 'static> RateLimitStrategy for FixedWindowStrategy<S> {
    fn name(&self) -> &'static str {
        "fixed-window"
    }

    fn config(&self) -> &BucketConfig {
        &self.window.config
    }

    async fn is_allowed(&self, client_id: &str) -> Result<bool> {
        let window = &self.window;
        let store = &self.store;
        let clock = &self.clock;

        let admitted = self
            .retry
            .run(&self.metrics, move || async move {
                let now = clock.now_ms();
                store
                    .apply_atomic(client_id, &window.config, now, move |state| {
                        consume_one(window.roll(state, now))
                    })
                    .await
            })
            .await?;

        if !admitted {
            debug!(client_id, "Fixed window exhausted");
        }
        Ok(admitted)
    }

    async fn available_tokens(&self, client_id: &str) -> Result<u64> {
        let window = &self.window;
        let store = &self.store;
        let clock = &self.clock;

        self.retry
            .run(&self.metrics, move || async move {
                let now = clock.now_ms();
                store
                    .apply_atomic(client_id, &window.config, now, move |state| {
                        let rolled = window.roll(state, now);
                        (rolled, rolled.token_count)
                    })
                    .await
            })
            .await
    }

    async fn peek_available_tokens(&self, client_id: &str) -> Result<u64> {
        let window = &self.window;
        let store = &self.store;
        let clock = &self.clock;

        self.retry
            .run(&self.metrics, move || async move {
                let now = clock.now_ms();
                let state = store.get(client_id, &window.config, now).await?;
                Ok(window.roll(state, now).token_count)
            })
            .await
    }
}
