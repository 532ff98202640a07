//! Middleware for the protected chain.

use std::time::Instant;

use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use http::{HeaderMap, HeaderValue, StatusCode};
use serde_json::json;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::AppState;
use crate::ratelimit::{mask_caller, Decision};

/// Header carrying the caller's API key.
pub const API_KEY_HEADER: &str = "x-api-key";
/// Header carrying the per-request id.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Authenticated caller, available to handlers as a request extension.
#[derive(Debug, Clone)]
pub struct Caller(pub String);

/// The caller identity, or the empty identity when no key was sent.
fn api_key(request: &Request) -> &str {
    request
        .headers()
        .get(API_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
}

/// Tag the request with a fresh id and log its start and completion.
pub async fn request_logging(mut request: Request, next: Next) -> Response {
    let started = Instant::now();
    let request_id = Uuid::new_v4().to_string();
    let method = request.method().clone();
    let path = request.uri().path().to_string();

    let header = HeaderValue::from_str(&request_id).ok();
    if let Some(value) = header.clone() {
        request.headers_mut().insert(REQUEST_ID_HEADER, value);
    }

    info!(request_id = %request_id, method = %method, path = %path, "Request started");

    let mut response = next.run(request).await;

    info!(
        request_id = %request_id,
        method = %method,
        path = %path,
        status = response.status().as_u16(),
        latency_ms = started.elapsed().as_millis() as u64,
        "Request completed"
    );

    if let Some(value) = header {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    response
}

/// Admit or reject the request and attach the rate limit headers.
pub async fn rate_limit(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let caller = api_key(&request).to_string();
    let decision = state.facade.admit(&caller).await;

    let mut response = if decision.allowed {
        next.run(request).await
    } else {
        warn!(
            caller = %mask_caller(&caller),
            limit = decision.limit,
            reset = decision.reset_unix(),
            "Rate limit exceeded"
        );
        (
            StatusCode::TOO_MANY_REQUESTS,
            Json(json!({ "error": "Rate limit exceeded" })),
        )
            .into_response()
    };

    apply_headers(response.headers_mut(), &decision);
    response
}

fn apply_headers(headers: &mut HeaderMap, decision: &Decision) {
    for (name, value) in decision.headers().pairs() {
        if let Ok(value) = HeaderValue::from_str(&value) {
            headers.insert(name, value);
        }
    }
}

/// Reject requests without a known API key.
pub async fn require_api_key(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Response {
    let key = api_key(&request).to_string();

    if key.is_empty() {
        warn!(path = %request.uri().path(), "Missing API key in request");
        return (StatusCode::UNAUTHORIZED, "Missing API key").into_response();
    }

    if !state.api_keys.contains(&key) {
        warn!(api_key = %mask_caller(&key), "Invalid API key attempted");
        return (StatusCode::UNAUTHORIZED, "Invalid API key").into_response();
    }

    debug!(api_key = %mask_caller(&key), "Authenticated request");
    request.extensions_mut().insert(Caller(key));
    next.run(request).await
}
