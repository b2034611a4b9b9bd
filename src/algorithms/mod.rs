//! Admission strategies
//!
//! A strategy binds an admission algorithm to a store and a clock and exposes the uniform
//! three-operation contract the facade calls. New policies plug in behind
//! [`RateLimitStrategy`] and a branch in the factory.

pub mod fixed_window;
pub mod token_bucket;

use async_trait::async_trait;

use crate::error::Result;
use crate::token_bucket::BucketConfig;

pub use fixed_window::FixedWindowStrategy;
pub use token_bucket::TokenBucketStrategy;

#[async_trait]
pub trait RateLimitStrategy: Send + Sync {
    /// Policy identifier as accepted by the factory.
    fn name(&self) -> &'static str;

    fn config(&self) -> &BucketConfig;

    fn capacity(&self) -> u64 {
        self.config().capacity()
    }

    /// Refill, then try to take one token. The resulting state is persisted whether or not
    /// the request is admitted.
    async fn is_allowed(&self, client_id: &str) -> Result<bool>;

    /// Refill and persist without consuming, then report the token count.
    async fn available_tokens(&self, client_id: &str) -> Result<u64>;

    /// Like [`available_tokens`](Self::available_tokens) but never writes refill progress.
    async fn peek_available_tokens(&self, client_id: &str) -> Result<u64>;
}
