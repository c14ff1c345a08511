//! Configuration validation module

use crate::config::{
    CacheConfig, Config, FallbackSettings, LoggingConfig, RateLimitConfig, ServerConfig,
    StoreBackend, StoreConfig, UpstreamConfig,
};
use crate::domain::RoutePattern;

/// Trait for validating configuration sections
pub trait Validate {
    fn validate(&self) -> Result<(), ValidationError>;
}

/// Configuration validation error
#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    #[error("Server configuration error: {message}")]
    Server { message: String },

    #[error("Store configuration error: {message}")]
    Store { message: String },

    #[error("Fallback configuration error: {message}")]
    Fallback { message: String },

    #[error("Cache configuration error: {message}")]
    Cache { message: String },

    #[error("Rate limit configuration error: {message}")]
    RateLimit { message: String },

    #[error("Upstream configuration error: {message}")]
    Upstream { message: String },

    #[error("Logging configuration error: {message}")]
    Logging { message: String },
}

impl ValidationError {
    pub fn server(message: impl Into<String>) -> Self {
        Self::Server {
            message: message.into(),
        }
    }

    pub fn store(message: impl Into<String>) -> Self {
        Self::Store {
            message: message.into(),
        }
    }

    pub fn fallback(message: impl Into<String>) -> Self {
        Self::Fallback {
            message: message.into(),
        }
    }

    pub fn cache(message: impl Into<String>) -> Self {
        Self::Cache {
            message: message.into(),
        }
    }

    pub fn rate_limit(message: impl Into<String>) -> Self {
        Self::RateLimit {
            message: message.into(),
        }
    }

    pub fn upstream(message: impl Into<String>) -> Self {
        Self::Upstream {
            message: message.into(),
        }
    }

    pub fn logging(message: impl Into<String>) -> Self {
        Self::Logging {
            message: message.into(),
        }
    }
}

impl Validate for ServerConfig {
    fn validate(&self) -> Result<(), ValidationError> {
        // u16 cannot exceed 65535, so only 0 is out of range
        if self.port == 0 {
            return Err(ValidationError::server(format!(
                "Port must be in range 1-65535, got {}",
                self.port
            )));
        }

        if self.host.is_empty() {
            return Err(ValidationError::server("Host cannot be empty"));
        }

        if self.request_timeout_seconds == 0 {
            return Err(ValidationError::server(
                "Request timeout must be greater than 0",
            ));
        }

        if self.max_body_bytes == 0 {
            return Err(ValidationError::server(
                "Maximum body size must be greater than 0",
            ));
        }

        Ok(())
    }
}

impl Validate for StoreConfig {
    fn validate(&self) -> Result<(), ValidationError> {
        if self.backend == StoreBackend::Dragonfly {
            if !self.dragonfly_url.starts_with("redis://")
                && !self.dragonfly_url.starts_with("rediss://")
            {
                return Err(ValidationError::store(format!(
                    "Dragonfly URL must use redis:// or rediss://, got {}",
                    self.dragonfly_url
                )));
            }

            if self.connect_timeout_seconds == 0 {
                return Err(ValidationError::store(
                    "Connect timeout must be greater than 0",
                ));
            }
        }

        if self.operation_timeout_ms == 0 {
            return Err(ValidationError::store(
                "Operation timeout must be greater than 0",
            ));
        }

        if self.scan_batch_size == 0 {
            return Err(ValidationError::store(
                "Scan batch size must be greater than 0",
            ));
        }

        Ok(())
    }
}

impl Validate for FallbackSettings {
    fn validate(&self) -> Result<(), ValidationError> {
        if self.failure_threshold == 0 {
            return Err(ValidationError::fallback(
                "Failure threshold must be greater than 0",
            ));
        }

        if self.health_check_interval_seconds == 0 {
            return Err(ValidationError::fallback(
                "Health check interval must be greater than 0",
            ));
        }

        if self.local_max_entries == 0 || self.local_shards == 0 {
            return Err(ValidationError::fallback(
                "Local store capacity and shard count must be greater than 0",
            ));
        }

        if self.cleanup_interval_seconds == 0 {
            return Err(ValidationError::fallback(
                "Cleanup interval must be greater than 0",
            ));
        }

        let retry = &self.invalidation_retry;
        if retry.max_attempts == 0 {
            return Err(ValidationError::fallback(
                "Invalidation retry needs at least one attempt",
            ));
        }
        if retry.backoff_multiplier < 1.0 {
            return Err(ValidationError::fallback(format!(
                "Backoff multiplier must be at least 1.0, got {}",
                retry.backoff_multiplier
            )));
        }
        if retry.initial_delay_ms > retry.max_delay_ms {
            return Err(ValidationError::fallback(
                "Initial retry delay cannot exceed the maximum delay",
            ));
        }

        Ok(())
    }
}

impl Validate for CacheConfig {
    fn validate(&self) -> Result<(), ValidationError> {
        if self.key_prefix.is_empty() {
            return Err(ValidationError::cache("Key prefix cannot be empty"));
        }

        if self.default_ttl_seconds == 0 {
            return Err(ValidationError::cache(
                "Default TTL must be greater than 0 seconds",
            ));
        }

        if self.enabled && self.cacheable_methods.is_empty() {
            return Err(ValidationError::cache(
                "At least one cacheable method is required when caching is enabled",
            ));
        }

        for method in &self.cacheable_methods {
            let method = method.to_ascii_uppercase();
            if matches!(method.as_str(), "POST" | "PUT" | "PATCH" | "DELETE") {
                return Err(ValidationError::cache(format!(
                    "{} is not an idempotent method and cannot be cached",
                    method
                )));
            }
        }

        for route in &self.routes {
            RoutePattern::parse(&route.route)
                .map_err(|e| ValidationError::cache(e.to_string()))?;
            if route.ttl_seconds == Some(0) {
                return Err(ValidationError::cache(format!(
                    "Route {} has a zero TTL; set cacheable = false instead",
                    route.route
                )));
            }
        }

        for rule in &self.invalidation_rules {
            RoutePattern::parse(&rule.route).map_err(|e| ValidationError::cache(e.to_string()))?;
            if rule.methods.is_empty() {
                return Err(ValidationError::cache(format!(
                    "Invalidation rule for {} lists no methods",
                    rule.route
                )));
            }
            if rule.patterns.is_empty() {
                return Err(ValidationError::cache(format!(
                    "Invalidation rule for {} lists no patterns",
                    rule.route
                )));
            }
        }

        Ok(())
    }
}

impl Validate for RateLimitConfig {
    fn validate(&self) -> Result<(), ValidationError> {
        if self.key_prefix.is_empty() {
            return Err(ValidationError::rate_limit("Key prefix cannot be empty"));
        }

        self.to_tier_table()
            .map_err(|e| ValidationError::rate_limit(e.to_string()))?;

        Ok(())
    }
}

impl Validate for UpstreamConfig {
    fn validate(&self) -> Result<(), ValidationError> {
        if !self.base_url.starts_with("http://") && !self.base_url.starts_with("https://") {
            return Err(ValidationError::upstream(format!(
                "Base URL must use http:// or https://, got {}",
                self.base_url
            )));
        }

        if self.timeout_seconds == 0 {
            return Err(ValidationError::upstream(
                "Timeout must be greater than 0",
            ));
        }

        Ok(())
    }
}

impl Validate for LoggingConfig {
    fn validate(&self) -> Result<(), ValidationError> {
        if self.level.trim().is_empty() {
            return Err(ValidationError::logging("Log level cannot be empty"));
        }
        Ok(())
    }
}

impl Validate for Config {
    fn validate(&self) -> Result<(), ValidationError> {
        self.server.validate()?;
        self.store.validate()?;
        self.fallback.validate()?;
        self.cache.validate()?;
        self.rate_limit.validate()?;
        self.upstream.validate()?;
        self.logging.validate()?;
        Ok(())
    }
}
