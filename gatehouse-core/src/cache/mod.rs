//! Response caching
//!
//! [`ResponseCache`] decides cacheability, derives keys, serves hits, stores
//! successful misses and purges related entries after successful mutations.
//! Entries are written through the injected [`crate::store::Store`] under
//! `<key_prefix>:<cache key>`.

pub mod key;
pub mod payload;
pub mod policy;
pub mod service;

pub use key::{ANONYMOUS_IDENTITY, canonical_query, derive_key, normalize_path};
pub use payload::{COMPRESSION_MARKER, CachedPayload, PayloadError};
pub use policy::{CachePolicy, InvalidationRule, RoutePolicy, substitute_params};
pub use service::{CachePlan, CacheStats, CacheStatus, CachedOutcome, ResponseCache};
