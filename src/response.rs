use serde::{Deserialize, Serialize};

use crate::retry::RetryPolicy;
use crate::token_bucket::BucketConfig;

pub const RATE_LIMIT_EXCEEDED: &str = "Rate limit exceeded";

/// Body of a 429 answer from the gateway filter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RejectionBody {
    pub error: String,
    pub client_id: String,
}

impl RejectionBody {
    pub fn new(client_id: impl Into<String>) -> Self {
        Self {
            error: RATE_LIMIT_EXCEEDED.to_string(),
            client_id: client_id.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitStatusResponse {
    pub client_id: String,
    pub capacity: u64,
    pub available_tokens: u64,
}

/// Active policy as reported by the status endpoints
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyResponse {
    pub policy: &'static str,
    pub capacity: u64,
    pub refill_rate: u64,
    pub refill_interval_ms: u64,
    pub failure_mode: String,
    pub retry: RetryPolicy,
}

impl PolicyResponse {
    pub fn new(
        policy: &'static str,
        config: &BucketConfig,
        failure_mode: String,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            policy,
            capacity: config.capacity(),
            refill_rate: config.refill_rate(),
            refill_interval_ms: config.refill_interval_ms(),
            failure_mode,
            retry,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PingResponse {
    pub message: String,
}

impl PingResponse {
    pub fn pong() -> Self {
        Self {
            message: "pong".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub name: String,
    pub email: String,
}

impl User {
    fn new(id: &str, name: &str, email: &str) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            email: email.to_string(),
        }
    }
}

/// Fixed sample payload served behind the admission filter.
#[derive(Debug, Serialize, Deserialize)]
pub struct UsersResponse {
    pub users: Vec<User>,
    pub total: usize,
    pub message: String,
}

impl UsersResponse {
    pub fn sample() -> Self {
        let users = vec![
            User::new("1", "John Doe", "john.doe@example.com"),
            User::new("2", "Jane Smith", "jane.smith@example.com"),
            User::new("3", "Bob Johnson", "bob.johnson@example.com"),
            User::new("4", "Alice Williams", "alice.williams@example.com"),
            User::new("5", "Charlie Brown", "charlie.brown@example.com"),
        ];
        Self {
            total: users.len(),
            users,
            message: "Users retrieved successfully".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejection_body_shape() {
        let body = serde_json::to_value(RejectionBody::new("203.0.113.9")).unwrap();
        assert_eq!(
            body,
            serde_json::json!({ "error": "Rate limit exceeded", "clientId": "203.0.113.9" })
        );
    }

    #[test]
    fn test_sample_users() {
        let users = UsersResponse::sample();
        assert_eq!(users.total, 5);
        assert_eq!(users.users[0].name, "John Doe");
    }

    #[test]
    fn test_status_uses_camel_case() {
        let json = serde_json::to_string(&RateLimitStatusResponse {
            client_id: "a".into(),
            capacity: 10,
            available_tokens: 7,
        })
        .unwrap();
        assert!(json.contains("\"availableTokens\":7"));
        assert!(json.contains("\"clientId\":\"a\""));
    }
}
