use envconfig::Envconfig;
use std::net::SocketAddr;
use std::time::Duration;
use validator::Validate;

use crate::config_validator::ConfigValidator;
use crate::error::{LimiterError, Result};
use crate::rate_limiter::FailureMode;
use crate::retry::RetryPolicy;
use crate::token_bucket::BucketConfig;

#[derive(Debug, Envconfig, Validate, Clone)]
pub struct Config {
    /// Server bind address
    #[envconfig(from = "BIND_ADDR", default = "127.0.0.1:3000")]
    pub bind_addr: SocketAddr,

    /// Redis connection URL. Empty selects the in-process store.
    #[envconfig(from = "REDIS_URL", default = "redis://127.0.0.1:6379")]
    pub redis_url: String,

    /// Prefix for every bucket key, one per policy instance
    #[envconfig(from = "RATE_LIMIT_NAMESPACE", default = "rate_limiter")]
    #[validate(length(min = 1, max = 64))]
    pub namespace: String,

    #[envconfig(from = "RATE_LIMIT_POLICY", default = "token-bucket")]
    pub policy: String,

    /// Maximum tokens per client
    #[envconfig(from = "RATE_LIMIT_CAPACITY", default = "10")]
    #[validate(range(min = 1))]
    pub capacity: u64,

    /// Tokens added per refill interval
    #[envconfig(from = "RATE_LIMIT_REFILL_RATE", default = "5")]
    pub refill_rate: u64,

    #[envconfig(from = "RATE_LIMIT_REFILL_INTERVAL_MS", default = "100000")]
    #[validate(range(min = 1))]
    pub refill_interval_ms: u64,

    #[envconfig(from = "RATE_LIMIT_FAILURE_MODE", default = "closed")]
    pub failure_mode: FailureMode,

    /// Total attempts per store cycle, the first one included
    #[envconfig(from = "STORE_RETRY_ATTEMPTS", default = "3")]
    #[validate(range(min = 1, max = 20))]
    pub retry_attempts: u32,

    /// Total attempts when the store keeps reporting lost optimistic races
    #[envconfig(from = "STORE_CONFLICT_ATTEMPTS", default = "64")]
    #[validate(range(min = 1, max = 1000))]
    pub conflict_attempts: u32,

    #[envconfig(from = "STORE_RETRY_BASE_DELAY_MS", default = "10")]
    pub retry_base_delay_ms: u64,

    #[envconfig(from = "STORE_RETRY_MAX_DELAY_MS", default = "200")]
    pub retry_max_delay_ms: u64,

    /// Timeout for a single store round trip
    #[envconfig(from = "STORE_TIMEOUT_MS", default = "2000")]
    #[validate(range(min = 1))]
    pub store_timeout_ms: u64,

    /// Expiry for idle buckets; 0 disables it
    #[envconfig(from = "STORE_KEY_TTL_SECS", default = "0")]
    pub key_ttl_secs: u64,

    #[envconfig(from = "LOG_LEVEL", default = "info")]
    pub log_level: String,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> std::result::Result<Self, envconfig::Error> {
        Config::init_from_env()
    }

    /// Run field rules and cross-field checks.
    pub fn check(&self) -> Result<()> {
        self.validate()
            .map_err(|e| LimiterError::Configuration(e.to_string()))?;
        ConfigValidator::validate_redis_url(&self.redis_url)?;
        ConfigValidator::validate_namespace(&self.namespace)?;
        ConfigValidator::validate_bind_address(&self.bind_addr.to_string())?;
        Ok(())
    }

    pub fn uses_redis(&self) -> bool {
        !self.redis_url.trim().is_empty()
    }

    pub fn bucket_config(&self) -> Result<BucketConfig> {
        BucketConfig::new(self.capacity, self.refill_rate, self.refill_interval_ms)
    }

    pub fn retry_policy(&self) -> Result<RetryPolicy> {
        RetryPolicy::new(
            self.retry_attempts,
            Duration::from_millis(self.retry_base_delay_ms),
            Duration::from_millis(self.retry_max_delay_ms),
        )?
        .with_conflict_attempts(self.conflict_attempts)
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }

    pub fn key_ttl(&self) -> Option<Duration> {
        (self.key_ttl_secs > 0).then(|| Duration::from_secs(self.key_ttl_secs))
    }
}
