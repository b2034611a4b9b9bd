use axum::{
    extract::{Request, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use std::sync::Arc;

use crate::error::LimiterError;
use crate::health::HealthChecker;
use crate::metrics::MetricsSnapshot;
use crate::middleware::ClientIdExtractor;
use crate::rate_limiter::{FailureMode, RateLimiter};
use crate::response::{PingResponse, PolicyResponse, RateLimitStatusResponse, UsersResponse};
use crate::retry::RetryPolicy;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub limiter: RateLimiter,
    pub extractor: Arc<dyn ClientIdExtractor>,
    pub health: Arc<HealthChecker>,
    pub failure_mode: FailureMode,
    pub retry_policy: RetryPolicy,
}

/// Health check endpoint
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let health = state.health.check_health().await;
    let status = if health.is_up() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status, Json(health))
}

/// Remaining tokens for the calling client. Persists refill progress.
pub async fn rate_limit_status(
    State(state): State<AppState>,
    request: Request,
) -> Result<Json<RateLimitStatusResponse>, LimiterError> {
    let client_id = state.extractor.extract_client_id(&request);
    let available_tokens = state.limiter.get_remaining_tokens(&client_id).await?;

    Ok(Json(RateLimitStatusResponse {
        client_id,
        capacity: state.limiter.get_capacity(),
        available_tokens,
    }))
}

pub async fn policy(State(state): State<AppState>) -> Json<PolicyResponse> {
    Json(PolicyResponse::new(
        state.limiter.policy_name(),
        &state.limiter.bucket_config(),
        state.failure_mode.to_string(),
        state.retry_policy.clone(),
    ))
}

pub async fn metrics(State(state): State<AppState>) -> Json<MetricsSnapshot> {
    Json(state.limiter.metrics())
}

pub async fn ping() -> Json<PingResponse> {
    Json(PingResponse::pong())
}

pub async fn users() -> Json<UsersResponse> {
    Json(UsersResponse::sample())
}
