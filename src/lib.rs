pub mod algorithms;
pub mod bucket_state;
pub mod clock;
pub mod config;
pub mod config_validator;
pub mod error;
pub mod factory;
pub mod handlers;
pub mod health;
pub mod jitter;
pub mod key_generator;
pub mod metrics;
pub mod middleware;
pub mod rate_limiter;
pub mod redis;
pub mod response;
pub mod retry;
pub mod server;
pub mod store;
pub mod token_bucket;

pub use algorithms::RateLimitStrategy;
pub use bucket_state::BucketState;
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::Config;
pub use error::{LimiterError, Result};
pub use factory::{Policy, StrategyFactory};
pub use rate_limiter::{FailureMode, RateLimiter};
pub use crate::redis::{RedisStore, RedisStoreOptions};
pub use retry::RetryPolicy;
pub use server::create_app;
pub use store::{BucketStore, MemoryStore, StoreProbe};
pub use token_bucket::{BucketConfig, TokenBucket};
