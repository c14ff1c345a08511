//! HTTP response models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use gatehouse_core::cache::CacheStats;
use gatehouse_core::fallback::{FallbackStatus, StoreMode};
use gatehouse_core::rate_limiter::TierLoad;

/// Error response model
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Machine-readable error code
    pub code: String,

    /// Human-readable error message
    pub message: String,

    /// Additional error context
    pub details: Option<serde_json::Value>,

    /// Unique request identifier for tracking and support
    pub request_id: Uuid,

    /// Error timestamp
    pub timestamp: DateTime<Utc>,
}

impl ErrorResponse {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            details: None,
            request_id: Uuid::new_v4(),
            timestamp: Utc::now(),
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }
}

/// Liveness response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub store_mode: StoreMode,
    pub timestamp: DateTime<Utc>,
}

/// Cache counters plus the derived hit ratio
#[derive(Debug, Serialize)]
pub struct CacheReport {
    pub enabled: bool,
    #[serde(flatten)]
    pub stats: CacheStats,
    pub hit_ratio: f64,
}

/// Rate limiter state per tier
#[derive(Debug, Serialize)]
pub struct RateLimitReport {
    pub enabled: bool,
    pub tiers: Vec<TierLoad>,
}

/// Response of `GET /_gatehouse/status`
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub store: FallbackStatus,
    pub cache: CacheReport,
    pub rate_limit: RateLimitReport,
    pub timestamp: DateTime<Utc>,
}
