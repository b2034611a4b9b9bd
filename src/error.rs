use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

#[derive(Debug, thiserror::Error)]
pub enum LimiterError {
    /// Invalid bucket parameters or an unknown policy name. Raised at startup, never retried.
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),

    /// A persisted value did not parse. Stores recover from this by resetting the bucket,
    /// so it only ever shows up in logs.
    #[error("corrupt bucket state at {key}: {reason}")]
    StorageCorrupt { key: String, reason: String },

    /// An optimistic apply lost the race against another writer.
    #[error("concurrent update conflict on {key}")]
    ConcurrencyConflict { key: String },
}

pub type Result<T> = std::result::Result<T, LimiterError>;

impl LimiterError {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            LimiterError::StorageUnavailable(_) | LimiterError::ConcurrencyConflict { .. }
        )
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            LimiterError::Configuration(_) | LimiterError::StorageCorrupt { .. } => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            LimiterError::StorageUnavailable(_) | LimiterError::ConcurrencyConflict { .. } => {
                StatusCode::SERVICE_UNAVAILABLE
            }
        }
    }
}

impl From<redis::RedisError> for LimiterError {
    fn from(err: redis::RedisError) -> Self {
        LimiterError::StorageUnavailable(err.to_string())
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
    pub code: u16,
}

impl ErrorResponse {
    pub fn new(error: &str, message: &str, code: u16) -> Self {
        Self {
            error: error.to_string(),
            message: message.to_string(),
            code,
        }
    }

    pub fn from_limiter_error(err: &LimiterError) -> Self {
        let code = err.status_code().as_u16();
        match err {
            LimiterError::Configuration(msg) => Self::new("configuration_error", msg, code),
            LimiterError::StorageUnavailable(msg) => Self::new("rate_limiter_unavailable", msg, code),
            LimiterError::ConcurrencyConflict { .. } => {
                Self::new("rate_limiter_unavailable", &err.to_string(), code)
            }
            LimiterError::StorageCorrupt { .. } => {
                Self::new("internal_error", &err.to_string(), code)
            }
        }
    }
}

impl IntoResponse for LimiterError {
    fn into_response(self) -> Response {
        let body = ErrorResponse::from_limiter_error(&self);
        (self.status_code(), Json(body)).into_response()
    }
}
