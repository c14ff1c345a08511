//! Key/counter store abstraction
//!
//! A uniform async interface over the shared backend used by both the response
//! cache and the rate limiter:
//! - [`DragonflyStore`] for the distributed Dragonfly/Redis backend
//! - [`LocalStore`] for the in-process fallback (sharded, bounded, TTL-aware)
//!
//! The [`crate::fallback::FallbackStore`] composes the two and is what request
//! handling code is normally given.

pub mod dragonfly;
pub mod local;
pub mod pattern;

pub use dragonfly::DragonflyStore;
pub use local::LocalStore;
pub use pattern::{escape_glob, glob_match};

use async_trait::async_trait;
use std::time::Duration;

/// Errors raised by a store backend
///
/// These never reach request callers when the store is wrapped by the fallback
/// coordinator; they are the signal it uses to decide the backend is degraded.
#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    #[error("store operation `{operation}` timed out after {timeout_ms}ms")]
    Timeout {
        operation: &'static str,
        timeout_ms: u64,
    },

    #[error("store connection error: {0}")]
    Connection(String),

    #[error("store command error: {0}")]
    Command(String),

    #[error("store serialization error: {0}")]
    Serialization(String),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl From<redis::RedisError> for StoreError {
    fn from(error: redis::RedisError) -> Self {
        if error.is_timeout() {
            StoreError::Timeout {
                operation: "redis",
                timeout_ms: 0,
            }
        } else if error.is_io_error()
            || error.is_connection_dropped()
            || error.is_connection_refusal()
        {
            StoreError::Connection(error.to_string())
        } else if error.kind() == redis::ErrorKind::TypeError {
            StoreError::Serialization(error.to_string())
        } else {
            StoreError::Command(error.to_string())
        }
    }
}

/// Result of a fixed-window increment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowCount {
    /// Counter value after this increment
    pub count: u64,
    /// Start of the window the increment landed in (Unix milliseconds)
    pub window_start_ms: u64,
}

/// Storage backend for cache entries and rate-limit windows
#[async_trait]
pub trait Store: Send + Sync {
    /// Read an opaque value; `None` when absent or expired
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;

    /// Write an opaque value that expires after `ttl`
    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), StoreError>;

    /// Delete every key matching a Redis glob pattern, returning how many were removed
    async fn delete_matching(&self, pattern: &str) -> Result<u64, StoreError>;

    /// Atomically increment the counter of the current fixed window for `key`
    ///
    /// The window is aligned to wall-clock multiples of `window`. Concurrent
    /// increments of the same window never observe the same pre-increment value.
    async fn increment(&self, key: &str, window: Duration) -> Result<WindowCount, StoreError>;

    /// Check that the backend is reachable
    async fn health_check(&self) -> Result<(), StoreError>;

    /// Short backend name for logs and status output
    fn backend_name(&self) -> &'static str;
}

/// Start of the fixed window containing `now_ms`
pub fn window_start(now_ms: u64, window: Duration) -> u64 {
    let window_ms = window_millis(window);
    now_ms - now_ms % window_ms
}

/// Window length in milliseconds, never zero
pub fn window_millis(window: Duration) -> u64 {
    (window.as_millis() as u64).max(1)
}

/// Storage key of the counter for the window starting at `window_start_ms`
pub fn window_key(key: &str, window_start_ms: u64) -> String {
    format!("{}:{}", key, window_start_ms)
}
