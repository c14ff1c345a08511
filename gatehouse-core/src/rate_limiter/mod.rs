//! Tiered rate limiting

pub mod load;
pub mod service;
pub mod types;

pub use load::{TierLoad, TierLoadTracker};
pub use service::RateLimiter;
pub use types::RateLimitDecision;
