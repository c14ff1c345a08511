//! Rate limiter types

use serde::Serialize;

/// Outcome of a rate limit check
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RateLimitDecision {
    /// Whether the request is allowed
    pub allowed: bool,
    /// Maximum requests allowed in the current window
    pub limit: u32,
    /// Remaining requests in the current window
    pub remaining: u32,
    /// Unix timestamp (seconds) when the current window ends
    pub reset_at: u64,
    /// Retry-After duration in seconds (only set when denied)
    pub retry_after: Option<u64>,
    /// The tier that was applied
    pub tier: String,
    /// Window length in seconds (zero when unlimited)
    pub window_seconds: u64,
}

impl RateLimitDecision {
    /// Create a new allowed decision
    pub fn allowed(limit: u32, remaining: u32, reset_at: u64, tier: impl Into<String>) -> Self {
        Self {
            allowed: true,
            limit,
            remaining,
            reset_at,
            retry_after: None,
            tier: tier.into(),
            window_seconds: 0,
        }
    }

    /// Create a new denied decision
    pub fn denied(limit: u32, reset_at: u64, retry_after: u64, tier: impl Into<String>) -> Self {
        Self {
            allowed: false,
            limit,
            remaining: 0,
            reset_at,
            retry_after: Some(retry_after),
            tier: tier.into(),
            window_seconds: 0,
        }
    }

    /// Decision for unrestricted tiers and a disabled limiter
    pub fn unlimited(tier: impl Into<String>) -> Self {
        Self::allowed(u32::MAX, u32::MAX, 0, tier)
    }

    pub fn with_window_seconds(mut self, window_seconds: u64) -> Self {
        self.window_seconds = window_seconds;
        self
    }

    pub fn is_unlimited(&self) -> bool {
        self.allowed && self.limit == u32::MAX
    }

    /// `ratelimit-policy` value: `"<tier>";q=<limit>;w=<window>`, or only the
    /// quoted tier name when unlimited
    pub fn policy(&self) -> String {
        if self.is_unlimited() {
            format!("\"{}\"", self.tier)
        } else {
            format!("\"{}\";q={};w={}", self.tier, self.limit, self.window_seconds)
        }
    }
}

/// Window position derived from a counter increment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct WindowBounds {
    pub start_ms: u64,
    pub end_ms: u64,
}

impl WindowBounds {
    pub fn new(start_ms: u64, window_ms: u64) -> Self {
        Self {
            start_ms,
            end_ms: start_ms.saturating_add(window_ms),
        }
    }

    /// Window end in Unix seconds, rounded up
    pub fn reset_at_secs(&self) -> u64 {
        self.end_ms.div_ceil(1000)
    }

    /// Whole seconds until the window ends, at least 1
    pub fn retry_after_secs(&self, now_ms: u64) -> u64 {
        self.end_ms.saturating_sub(now_ms).div_ceil(1000).max(1)
    }
}
