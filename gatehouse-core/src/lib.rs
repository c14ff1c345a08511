//! Gatehouse Core - response caching and tiered rate limiting
//!
//! This crate holds everything the HTTP layer needs to put a cache and a quota
//! in front of an API, independent of any web framework:
//!
//! # Modules
//!
//! - [`store`] - Key/counter store trait with Dragonfly and local implementations
//! - [`fallback`] - Connected/degraded coordination between the two stores
//! - [`cache`] - Read-through response cache with rule-based invalidation
//! - [`rate_limiter`] - Fixed-window quotas per identity and tier
//! - [`domain`] - Request descriptors, route templates and the tier table
//! - [`config`] - Strongly-typed configuration with TOML and environment variable support
//! - [`logging`] - Structured logging with tracing
//!
//! # Request flow
//!
//! ```text
//! request ─► RateLimiter::check_role ─► denied? ─► 429
//!                     │ allowed
//!                     ▼
//!            ResponseCache::handle ─► hit ─► stored response
//!                     │ miss / bypass
//!                     ▼
//!                 downstream ─► 2xx? store / invalidate
//! ```
//!
//! Both services share one [`fallback::FallbackStore`], so a backend outage
//! switches the cache and the limiter to local mode together.
//!
//! # Configuration
//!
//! Environment variables use the `GATEHOUSE__` prefix with double underscore separators:
//!
//! ```bash
//! GATEHOUSE__STORE__DRAGONFLY_URL=redis://dragonfly:6379
//! GATEHOUSE__FALLBACK__FAILURE_THRESHOLD=5
//! ```

pub mod cache;
pub mod clock;
pub mod config;
pub mod domain;
pub mod fallback;
pub mod logging;
pub mod rate_limiter;
pub mod store;

pub use cache::{CacheStatus, CachedOutcome, ResponseCache};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::Config;
pub use domain::{Downstream, HandlerResponse, RequestDescriptor, TierPolicy, TierTable};
pub use fallback::{FallbackStatus, FallbackStore, StoreMode};
pub use logging::init_tracing;
pub use rate_limiter::{RateLimitDecision, RateLimiter};
pub use store::{DragonflyStore, LocalStore, Store, StoreError};
