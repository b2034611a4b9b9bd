use regex::Regex;

use crate::error::{LimiterError, Result};

/// Validates configuration values that field-level rules cannot express
pub struct ConfigValidator;

impl ConfigValidator {
    /// Validates a Redis URL. An empty URL is accepted and means "no Redis".
    pub fn validate_redis_url(url: &str) -> Result<()> {
        if url.trim().is_empty() {
            return Ok(());
        }

        let pattern = Regex::new(r"^rediss?://[^\s/]+(/\d+)?$")
            .map_err(|e| LimiterError::Configuration(e.to_string()))?;
        if !pattern.is_match(url) {
            return Err(LimiterError::Configuration(
                "Redis URL must look like redis://host:port[/db] or rediss://...".to_string(),
            ));
        }

        Ok(())
    }

    /// Validates a bind address
    pub fn validate_bind_address(address: &str) -> Result<()> {
        if address.is_empty() {
            return Err(LimiterError::Configuration(
                "Bind address cannot be empty".to_string(),
            ));
        }

        if !address.contains(':') {
            return Err(LimiterError::Configuration(
                "Bind address must be in host:port format".to_string(),
            ));
        }

        Ok(())
    }

    /// Validates the key namespace
    pub fn validate_namespace(namespace: &str) -> Result<()> {
        if namespace.is_empty() || namespace.chars().any(char::is_whitespace) {
            return Err(LimiterError::Configuration(format!(
                "Invalid key namespace {:?}: must be non-empty without whitespace",
                namespace
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_redis_url() {
        assert!(ConfigValidator::validate_redis_url("redis://localhost:6379").is_ok());
        assert!(ConfigValidator::validate_redis_url("rediss://cache.internal:6380/2").is_ok());
        assert!(ConfigValidator::validate_redis_url("redis://:secret@10.0.0.5:6379").is_ok());
        assert!(ConfigValidator::validate_redis_url("").is_ok());
    }

    #[test]
    fn test_invalid_redis_url() {
        assert!(ConfigValidator::validate_redis_url("http://localhost:6379").is_err());
        assert!(ConfigValidator::validate_redis_url("redis://").is_err());
        assert!(ConfigValidator::validate_redis_url("redis://local host").is_err());
    }

    #[test]
    fn test_valid_bind_address() {
        assert!(ConfigValidator::validate_bind_address("127.0.0.1:8080").is_ok());
        assert!(ConfigValidator::validate_bind_address("0.0.0.0:3000").is_ok());
    }

    #[test]
    fn test_invalid_bind_address() {
        assert!(ConfigValidator::validate_bind_address("").is_err());
        assert!(ConfigValidator::validate_bind_address("localhost").is_err());
    }

    #[test]
    fn test_namespace() {
        assert!(ConfigValidator::validate_namespace("rate_limiter").is_ok());
        assert!(ConfigValidator::validate_namespace("edge:eu-west").is_ok());
        assert!(ConfigValidator::validate_namespace("rate limiter").is_err());
        assert!(ConfigValidator::validate_namespace("").is_err());
    }
}
