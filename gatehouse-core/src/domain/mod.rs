//! Domain types shared by the cache and the rate limiter

pub mod request;
pub mod route;
pub mod tier;

pub use request::{
    Downstream, FnDownstream, HandlerResponse, RequestDescriptor, is_no_cache_directive,
    parse_query,
};
pub use route::{RouteError, RouteParams, RoutePattern};
pub use tier::{TierError, TierPolicy, TierTable};
