//! HTTP surface: middleware, proxy and operational endpoints

pub mod middleware;
pub mod models;
pub mod proxy;
pub mod routes;
pub mod status;


use std::sync::Arc;

use gatehouse_core::{Config, FallbackStore, RateLimiter, ResponseCache};

pub use middleware::RequestIdentity;
pub use proxy::ProxyHandler;
pub use routes::create_router;

/// Shared state for the gatehouse middleware and endpoints
#[derive(Clone)]
pub struct GatehouseState {
    pub limiter: Arc<RateLimiter>,
    pub cache: Arc<ResponseCache>,
    pub store: Arc<FallbackStore>,
    pub config: Arc<Config>,
}
