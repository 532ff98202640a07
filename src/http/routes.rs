//! Route handlers.

use axum::extract::Extension;
use axum::Json;
use serde_json::{json, Value};

use super::middleware::Caller;
use crate::ratelimit::mask_caller;

/// Liveness probe.
pub async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

/// Authenticated no-op; echoes the masked caller key.
pub async fn ping(Extension(caller): Extension<Caller>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "caller": mask_caller(&caller.0),
    }))
}
