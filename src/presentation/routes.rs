//! Router assembly

use axum::{
    Router,
    middleware::from_fn_with_state,
    routing::get,
};

use super::GatehouseState;
use super::middleware::{
    identity_middleware, rate_limit_middleware, request_timeout_middleware,
    response_cache_middleware,
};
use super::status::{health, status};

/// Path of the operational status endpoint
pub const STATUS_PATH: &str = "/_gatehouse/status";

/// Wrap `downstream` with the gatehouse layers
///
/// Requests pass identity resolution, then the rate limiter, then the response
/// cache before reaching `downstream`. `/health` and the status endpoint are
/// served directly and never limited or cached.
pub fn create_router(state: GatehouseState, downstream: Router) -> Router {
    let gated = downstream
        .layer(from_fn_with_state(state.clone(), response_cache_middleware))
        .layer(from_fn_with_state(state.clone(), rate_limit_middleware))
        .layer(from_fn_with_state(state.clone(), identity_middleware))
        .layer(from_fn_with_state(state.clone(), request_timeout_middleware));

    Router::new()
        .route("/health", get(health))
        .route(STATUS_PATH, get(status))
        .with_state(state)
        .merge(gated)
}
