//! Liveness and operational status endpoints

use axum::{Json, extract::State};
use chrono::Utc;

use super::GatehouseState;
use super::models::{CacheReport, HealthResponse, RateLimitReport, StatusResponse};

/// `GET /health`
///
/// Stays 200 while degraded; the store mode is reported alongside.
pub async fn health(State(state): State<GatehouseState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        store_mode: state.store.mode(),
        timestamp: Utc::now(),
    })
}

/// `GET /_gatehouse/status`
pub async fn status(State(state): State<GatehouseState>) -> Json<StatusResponse> {
    let stats = state.cache.stats();
    let hit_ratio = stats.hit_ratio();

    Json(StatusResponse {
        store: state.store.status().await,
        cache: CacheReport {
            enabled: state.cache.policy().enabled,
            stats,
            hit_ratio,
        },
        rate_limit: RateLimitReport {
            enabled: state.limiter.is_enabled(),
            tiers: state.limiter.load(),
        },
        timestamp: Utc::now(),
    })
}
