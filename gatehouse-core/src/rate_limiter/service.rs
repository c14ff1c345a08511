//! Rate Limiter Service
//!
//! Fixed-window, per-identity quotas differentiated by tier:
//! - the tier is resolved from the caller's role through the [`TierTable`]
//! - each `(tier, identity)` pair counts in wall-clock aligned windows
//! - the request that brings the count to the limit is the last one allowed
//!
//! Windows are fixed, so a client can send up to `2 × limit` requests across a
//! window boundary.

use std::sync::Arc;
use tracing::{debug, warn};

use super::load::{TierLoad, TierLoadTracker};
use super::types::{RateLimitDecision, WindowBounds};
use crate::clock::{Clock, system_clock};
use crate::config::RateLimitConfig;
use crate::domain::{TierError, TierPolicy, TierTable};
use crate::store::{Store, window_millis, window_start};

/// Main rate limiter service
pub struct RateLimiter {
    store: Arc<dyn Store>,
    tiers: TierTable,
    key_prefix: String,
    enabled: bool,
    clock: Arc<dyn Clock>,
    load: TierLoadTracker,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn Store>, tiers: TierTable, key_prefix: impl Into<String>) -> Self {
        Self {
            store,
            load: TierLoadTracker::new(tiers.tiers()),
            tiers,
            key_prefix: key_prefix.into(),
            enabled: true,
            clock: system_clock(),
        }
    }

    pub fn from_config(store: Arc<dyn Store>, config: &RateLimitConfig) -> Result<Self, TierError> {
        let mut limiter = Self::new(store, config.to_tier_table()?, config.key_prefix.clone());
        limiter.enabled = config.enabled;
        Ok(limiter)
    }

    /// Use a custom clock (for testing)
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn tiers(&self) -> &TierTable {
        &self.tiers
    }

    /// Storage key of the counter for `identity` in `tier`
    pub fn counter_key(&self, tier: &str, identity: &str) -> String {
        format!("{}:{}:{}", self.key_prefix, tier, identity)
    }

    /// Resolve the caller's tier from `role`, then check
    pub async fn check_role(&self, identity: &str, role: Option<&str>) -> RateLimitDecision {
        if let Some(role) = role
            && !self.tiers.knows_role(role)
        {
            debug!(role, "Unknown role; applying the strictest tier");
        }
        let tier = self.tiers.resolve(role);
        self.check(identity, tier).await
    }

    /// Count one request for `identity` against `tier`
    pub async fn check(&self, identity: &str, tier: &TierPolicy) -> RateLimitDecision {
        let Some(limit) = tier.limit.filter(|_| self.enabled) else {
            return RateLimitDecision::unlimited(tier.name.as_str());
        };

        let key = self.counter_key(&tier.name, identity);
        let window_ms = window_millis(tier.window);

        let counted = match self.store.increment(&key, tier.window).await {
            Ok(counted) => counted,
            Err(e) => {
                // Availability over enforcement
                warn!(
                    tier = %tier.name,
                    error = %e,
                    "Rate limit store failed; allowing request"
                );
                let now = self.clock.now_millis();
                let bounds = WindowBounds::new(window_start(now, tier.window), window_ms);
                return RateLimitDecision::allowed(
                    limit,
                    limit,
                    bounds.reset_at_secs(),
                    tier.name.as_str(),
                )
                .with_window_seconds(window_ms / 1000);
            }
        };

        let now = self.clock.now_millis();
        let bounds = WindowBounds::new(counted.window_start_ms, window_ms);

        let decision = if counted.count <= u64::from(limit) {
            let remaining = u64::from(limit) - counted.count;
            RateLimitDecision::allowed(
                limit,
                remaining as u32,
                bounds.reset_at_secs(),
                tier.name.as_str(),
            )
        } else {
            warn!(
                identity,
                tier = %tier.name,
                limit,
                count = counted.count,
                "Rate limit exceeded"
            );
            RateLimitDecision::denied(
                limit,
                bounds.reset_at_secs(),
                bounds.retry_after_secs(now),
                tier.name.as_str(),
            )
        };

        self.load.record(tier, now, decision.allowed);
        decision.with_window_seconds(window_ms / 1000)
    }

    /// Requests and denials of every tier in its current window
    pub fn load(&self) -> Vec<TierLoad> {
        self.load
            .snapshot(self.tiers.tiers(), self.clock.now_millis())
    }
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("store", &self.store.backend_name())
            .field("key_prefix", &self.key_prefix)
            .field("enabled", &self.enabled)
            .finish()
    }
}
