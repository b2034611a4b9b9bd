use axum::{
    extract::{ConnectInfo, Request, State},
    http::{HeaderMap, HeaderName, HeaderValue, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use std::net::SocketAddr;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::handlers::AppState;
use crate::rate_limiter::FailureMode;
use crate::response::RejectionBody;

pub const X_RATE_LIMIT_LIMIT: HeaderName = HeaderName::from_static("x-ratelimit-limit");
pub const X_RATE_LIMIT_REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");
pub const X_REQUEST_ID: HeaderName = HeaderName::from_static("x-request-id");

pub const UNKNOWN_CLIENT: &str = "unknown";

/// Derives the rate limiting key for a request. The limiter treats the result as opaque.
pub trait ClientIdExtractor: Send + Sync {
    fn extract_client_id(&self, request: &Request) -> String;
}

/// First `X-Forwarded-For` hop, then the peer address, then [`UNKNOWN_CLIENT`].
#[derive(Debug, Clone, Copy, Default)]
pub struct ForwardedIpExtractor;

impl ClientIdExtractor for ForwardedIpExtractor {
    fn extract_client_id(&self, request: &Request) -> String {
        if let Some(forwarded) = first_forwarded_for(request.headers()) {
            return forwarded;
        }

        if let Some(ConnectInfo(addr)) = request.extensions().get::<ConnectInfo<SocketAddr>>() {
            return addr.ip().to_string();
        }
        if let Some(addr) = request.extensions().get::<SocketAddr>() {
            return addr.ip().to_string();
        }

        warn!(uri = %request.uri(), "No client address available, using shared bucket");
        UNKNOWN_CLIENT.to_string()
    }
}

fn first_forwarded_for(headers: &HeaderMap) -> Option<String> {
    let value = headers.get("x-forwarded-for")?.to_str().ok()?;
    let first = value.split(',').next()?.trim();
    (!first.is_empty()).then(|| first.to_string())
}

/// Admission filter for protected routes
pub async fn rate_limit_middleware(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let client_id = state.extractor.extract_client_id(&request);
    let limiter = &state.limiter;

    let allowed = match limiter.is_request_allowed(&client_id).await {
        Ok(allowed) => allowed,
        Err(err) => match state.failure_mode {
            FailureMode::Closed => {
                warn!(client_id = %client_id, error = %err, "Rate limiter unavailable, rejecting request");
                let mut response = err.into_response();
                insert_limit(response.headers_mut(), limiter.get_capacity());
                return response;
            }
            FailureMode::Open => {
                warn!(client_id = %client_id, error = %err, "Rate limiter unavailable, admitting request");
                let mut response = next.run(request).await;
                insert_limit(response.headers_mut(), limiter.get_capacity());
                return response;
            }
        },
    };

    let mut response = if allowed {
        next.run(request).await
    } else {
        debug!(client_id = %client_id, "Rejecting throttled request");
        (
            StatusCode::TOO_MANY_REQUESTS,
            Json(RejectionBody::new(client_id.clone())),
        )
            .into_response()
    };

    let headers = response.headers_mut();
    insert_limit(headers, limiter.get_capacity());
    match limiter.peek_remaining_tokens(&client_id).await {
        Ok(remaining) => {
            headers.insert(X_RATE_LIMIT_REMAINING, HeaderValue::from(remaining));
        }
        Err(err) => {
            debug!(client_id = %client_id, error = %err, "Could not read remaining tokens");
        }
    }

    response
}

fn insert_limit(headers: &mut HeaderMap, capacity: u64) {
    headers.insert(X_RATE_LIMIT_LIMIT, HeaderValue::from(capacity));
}

/// Logging middleware for request/response tracking
pub async fn logging_middleware(mut request: Request, next: Next) -> Response {
    let request_id = request
        .headers()
        .get(&X_REQUEST_ID)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    let method = request.method().clone();
    let uri = request.uri().clone();

    if let Ok(value) = HeaderValue::from_str(&request_id) {
        request.headers_mut().insert(X_REQUEST_ID, value);
    }

    info!(
        target: "tollgate::middleware",
        request_id = %request_id,
        method = %method,
        uri = %uri,
        "Incoming request"
    );

    let mut response = next.run(request).await;

    let status = response.status();
    info!(
        target: "tollgate::middleware",
        request_id = %request_id,
        method = %method,
        uri = %uri,
        status = %status,
        "Request completed"
    );

    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert(X_REQUEST_ID, value);
    }
    response
}
