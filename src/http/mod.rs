//! HTTP surface: routes, middleware chain and server.
//!
//! Protected routes run behind, outermost first: CORS, panic recovery,
//! request logging, the request deadline, rate limiting, then API key
//! authentication. Rate limiting comes before authentication, so requests
//! without a key share one bucket.

mod middleware;
mod routes;
mod server;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use axum::middleware::{from_fn, from_fn_with_state};
use axum::routing::get;
use axum::Router;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::CorsLayer;
use tower_http::timeout::TimeoutLayer;

use crate::ratelimit::AdmissionFacade;

pub use middleware::{Caller, API_KEY_HEADER, REQUEST_ID_HEADER};
pub use server::HttpServer;

/// State shared by the middleware.
#[derive(Clone)]
pub struct AppState {
    /// Admission decisions
    pub facade: Arc<AdmissionFacade>,
    /// Accepted API keys
    pub api_keys: Arc<HashSet<String>>,
    /// Requests still running after this get a 408
    pub request_timeout: Duration,
}

impl AppState {
    pub fn new(facade: Arc<AdmissionFacade>, api_keys: HashSet<String>) -> Self {
        Self {
            facade,
            api_keys: Arc::new(api_keys),
            request_timeout: Duration::from_secs(15),
        }
    }

    /// Set the per-request deadline.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }
}

/// Build the service router.
///
/// `/health` is open; `/v1/ping` sits behind the full protected chain.
pub fn router(state: AppState) -> Router {
    let protected = protect(Router::new().route("/v1/ping", get(routes::ping)), state);

    Router::new()
        .route("/health", get(routes::health))
        .merge(protected)
}

/// Wrap every route already on `router` in the protected chain.
///
/// Routes added to the returned router afterwards are not protected.
pub fn protect(router: Router, state: AppState) -> Router {
    let request_timeout = state.request_timeout;

    router
        .layer(from_fn_with_state(state.clone(), middleware::require_api_key))
        .layer(from_fn_with_state(state, middleware::rate_limit))
        .layer(TimeoutLayer::new(request_timeout))
        .layer(from_fn(middleware::request_logging))
        .layer(CatchPanicLayer::new())
        .layer(CorsLayer::permissive())
}
