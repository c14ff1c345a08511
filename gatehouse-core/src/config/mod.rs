//! Configuration management

pub mod validation;

pub use validation::{Validate, ValidationError};

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::domain::{TierError, TierPolicy, TierTable};
use crate::fallback::{FallbackConfig, RetryConfig};

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub request_timeout_seconds: u64,
    /// Largest request body forwarded downstream
    pub max_body_bytes: usize,
    /// Longest wait for in-flight requests after a shutdown signal
    pub shutdown_timeout_seconds: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            request_timeout_seconds: 30,
            max_body_bytes: 2 * 1024 * 1024,
            shutdown_timeout_seconds: 5,
        }
    }
}

/// Which store backend serves as the source of truth
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// Shared Dragonfly/Redis backend with local fallback
    Dragonfly,
    /// Process-local store only (single instance deployments, development)
    Memory,
}

/// Store backend configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    pub dragonfly_url: String,
    pub connect_timeout_seconds: u64,
    /// Upper bound for every backend command (in milliseconds)
    pub operation_timeout_ms: u64,
    /// `COUNT` hint used when scanning for pattern deletes
    pub scan_batch_size: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Dragonfly,
            dragonfly_url: "redis://127.0.0.1:6379".to_string(),
            connect_timeout_seconds: 5,
            operation_timeout_ms: 250,
            scan_batch_size: 500,
        }
    }
}

impl StoreConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_seconds)
    }

    pub fn operation_timeout(&self) -> Duration {
        Duration::from_millis(self.operation_timeout_ms)
    }
}

/// Retry configuration (serializable version)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfigSerializable {
    /// Maximum number of attempts, including the first
    pub max_attempts: u32,
    /// Initial delay between retries (in milliseconds)
    pub initial_delay_ms: u64,
    /// Maximum delay between retries (in milliseconds)
    pub max_delay_ms: u64,
    /// Multiplier for exponential backoff
    pub backoff_multiplier: f64,
}

impl Default for RetryConfigSerializable {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay_ms: 500,
            max_delay_ms: 30_000,
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfigSerializable {
    /// Convert to the runtime RetryConfig
    pub fn to_retry_config(&self) -> RetryConfig {
        RetryConfig {
            max_attempts: self.max_attempts,
            initial_delay: Duration::from_millis(self.initial_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
            backoff_multiplier: self.backoff_multiplier,
        }
    }
}

/// Fallback coordinator and local store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FallbackSettings {
    /// Consecutive backend failures before switching to degraded mode
    pub failure_threshold: u32,
    pub health_check_interval_seconds: u64,
    /// Capacity of the local store across all shards
    pub local_max_entries: usize,
    pub local_shards: usize,
    /// How often expired local entries are purged
    pub cleanup_interval_seconds: u64,
    /// Pattern deletes remembered while degraded
    pub max_pending_invalidations: usize,
    pub invalidation_retry: RetryConfigSerializable,
}

impl Default for FallbackSettings {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            health_check_interval_seconds: 5,
            local_max_entries: 10_000,
            local_shards: 16,
            cleanup_interval_seconds: 30,
            max_pending_invalidations: 1024,
            invalidation_retry: RetryConfigSerializable::default(),
        }
    }
}

impl FallbackSettings {
    /// Convert to the runtime FallbackConfig
    pub fn to_fallback_config(&self, operation_timeout: Duration) -> FallbackConfig {
        FallbackConfig {
            failure_threshold: self.failure_threshold,
            health_check_interval: Duration::from_secs(self.health_check_interval_seconds),
            operation_timeout,
            invalidation_retry: self.invalidation_retry.to_retry_config(),
            max_pending_invalidations: self.max_pending_invalidations,
        }
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_seconds)
    }
}

/// Per-route cache policy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteCacheConfig {
    /// Route template, e.g. `/items/:id`
    pub route: String,
    /// TTL override; the cache default applies when absent
    #[serde(default)]
    pub ttl_seconds: Option<u64>,
    #[serde(default = "default_true")]
    pub cacheable: bool,
    /// Cache a separate copy per identity
    #[serde(default)]
    pub vary_by_identity: bool,
}

/// Cache purge triggered by a successful mutating request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvalidationRuleConfig {
    /// Mutating route template; its `:params` can be used in `patterns`
    pub route: String,
    #[serde(default = "default_mutating_methods")]
    pub methods: Vec<String>,
    /// Glob patterns over normalized paths, e.g. `/items/:id*`
    pub patterns: Vec<String>,
}

fn default_true() -> bool {
    true
}

fn default_mutating_methods() -> Vec<String> {
    ["POST", "PUT", "PATCH", "DELETE"]
        .iter()
        .map(|m| m.to_string())
        .collect()
}

/// Response cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    pub key_prefix: String,
    pub default_ttl_seconds: u64,
    pub cacheable_methods: Vec<String>,
    pub enable_compression: bool,
    pub compression_threshold_bytes: usize,
    /// Responses with larger bodies are passed through uncached
    pub max_body_bytes: usize,
    pub routes: Vec<RouteCacheConfig>,
    pub invalidation_rules: Vec<InvalidationRuleConfig>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            key_prefix: "gatehouse:cache".to_string(),
            default_ttl_seconds: 60,
            cacheable_methods: vec!["GET".to_string(), "HEAD".to_string()],
            enable_compression: true,
            compression_threshold_bytes: 10_240, // 10KB
            max_body_bytes: 1024 * 1024,
            routes: Vec::new(),
            invalidation_rules: Vec::new(),
        }
    }
}

/// One tier of the rate-limit table
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TierConfig {
    pub name: String,
    /// Requests per window; absent for an unrestricted tier
    #[serde(default)]
    pub limit: Option<u32>,
    #[serde(default = "default_window_seconds")]
    pub window_seconds: u64,
    #[serde(default)]
    pub roles: Vec<String>,
}

fn default_window_seconds() -> u64 {
    60
}

impl TierConfig {
    fn restricted(name: &str, limit: u32, roles: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            limit: Some(limit),
            window_seconds: default_window_seconds(),
            roles: roles.iter().map(|r| r.to_string()).collect(),
        }
    }

    pub fn to_policy(&self) -> TierPolicy {
        TierPolicy {
            name: self.name.clone(),
            limit: self.limit,
            window: Duration::from_secs(self.window_seconds),
        }
    }
}

/// Tiered rate limiting configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub enabled: bool,
    pub key_prefix: String,
    /// Role used for requests without one
    pub anonymous_role: String,
    pub tiers: Vec<TierConfig>,
    /// Paths never rate limited (prefix match)
    pub excluded_paths: Vec<String>,
    /// Read identity and role from the `x-gatehouse-*` headers.
    /// Enable only behind an authenticating proxy that overwrites them.
    pub trust_identity_headers: bool,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            key_prefix: "gatehouse:ratelimit".to_string(),
            anonymous_role: "anonymous".to_string(),
            tiers: vec![
                TierConfig::restricted("anonymous", 60, &["anonymous"]),
                TierConfig::restricted("standard", 300, &["user"]),
                TierConfig::restricted("elevated", 1000, &["admin", "partner"]),
                TierConfig {
                    name: "unrestricted".to_string(),
                    limit: None,
                    window_seconds: default_window_seconds(),
                    roles: vec!["service".to_string()],
                },
            ],
            excluded_paths: vec!["/health".to_string(), "/_gatehouse/".to_string()],
            trust_identity_headers: false,
        }
    }
}

impl RateLimitConfig {
    /// Build the immutable tier table
    pub fn to_tier_table(&self) -> Result<TierTable, TierError> {
        TierTable::new(
            self.tiers
                .iter()
                .map(|tier| (tier.to_policy(), tier.roles.clone()))
                .collect(),
            self.anonymous_role.clone(),
        )
    }

    pub fn is_excluded(&self, path: &str) -> bool {
        self.excluded_paths
            .iter()
            .any(|excluded| path == excluded || path.starts_with(excluded.as_str()))
    }
}

/// Downstream API the proxy forwards to
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UpstreamConfig {
    pub base_url: String,
    pub timeout_seconds: u64,
}

impl ServerConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_seconds)
    }
}

impl UpstreamConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8080".to_string(),
            timeout_seconds: 30,
        }
    }
}

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    Pretty,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Json,
        }
    }
}

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub store: StoreConfig,
    pub fallback: FallbackSettings,
    pub cache: CacheConfig,
    pub rate_limit: RateLimitConfig,
    pub upstream: UpstreamConfig,
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from files and environment variables
    pub fn load() -> Result<Self, ConfigLoadError> {
        let mut builder = config::Config::builder()
            .add_source(config::File::with_name("config/default").required(false));

        // Add environment-specific config if ENV is set
        if let Ok(env) = std::env::var("ENV") {
            builder = builder
                .add_source(config::File::with_name(&format!("config/{}", env)).required(false));
        }

        // Local overrides and environment variables win
        builder = builder
            .add_source(config::File::with_name("config/local").required(false))
            .add_source(config::Environment::with_prefix("GATEHOUSE").separator("__"));

        let mut config: Config = builder.build()?.try_deserialize()?;

        if let Ok(url) = std::env::var("DRAGONFLY_URL") {
            config.store.dragonfly_url = url;
        }

        config.validate()?;

        Ok(config)
    }

    /// Parse and validate a TOML document (used by tests and tooling)
    pub fn from_toml(source: &str) -> Result<Self, ConfigLoadError> {
        let config: Config = config::Config::builder()
            .add_source(config::File::from_str(source, config::FileFormat::Toml))
            .build()?
            .try_deserialize()?;
        config.validate()?;
        Ok(config)
    }
}

/// Error type for configuration loading
#[derive(Debug, thiserror::Error)]
pub enum ConfigLoadError {
    #[error("Configuration file error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Configuration validation error: {0}")]
    Validation(#[from] ValidationError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        Config::default().validate().unwrap();
    }

    #[test]
    fn test_default_tier_table_builds() {
        let table = RateLimitConfig::default().to_tier_table().unwrap();
        assert_eq!(table.resolve(None).name, "anonymous");
        assert_eq!(table.resolve(Some("user")).name, "standard");
        assert!(table.resolve(Some("service")).is_unrestricted());
    }

    #[test]
    fn test_identity_headers_untrusted_by_default() {
        assert!(!RateLimitConfig::default().trust_identity_headers);

        let config = Config::from_toml("[rate_limit]\nenabled = true\n").unwrap();
        assert!(!config.rate_limit.trust_identity_headers);

        let config = Config::from_toml("[rate_limit]\ntrust_identity_headers = true\n").unwrap();
        assert!(config.rate_limit.trust_identity_headers);
    }

    #[test]
    fn test_excluded_paths() {
        let config = RateLimitConfig::default();
        assert!(config.is_excluded("/health"));
        assert!(config.is_excluded("/_gatehouse/status"));
        assert!(!config.is_excluded("/items"));
    }

    #[test]
    fn test_from_toml() {
        let config = Config::from_toml(
            r#"
            [store]
            backend = "memory"

            [cache]
            default_ttl_seconds = 30

            [[cache.routes]]
            route = "/items/:id"
            ttl_seconds = 120

            [[cache.routes]]
            route = "/me"
            vary_by_identity = true

            [[cache.invalidation_rules]]
            route = "/items/:id"
            patterns = ["/items/:id*", "/items"]

            [rate_limit]
            anonymous_role = "guest"

            [[rate_limit.tiers]]
            name = "standard"
            limit = 5
            window_seconds = 60
            roles = ["guest", "user"]

            [logging]
            format = "pretty"
            "#,
        )
        .unwrap();

        assert_eq!(config.store.backend, StoreBackend::Memory);
        assert_eq!(config.cache.routes.len(), 2);
        assert!(config.cache.routes[0].cacheable);
        assert!(config.cache.routes[1].vary_by_identity);
        assert_eq!(config.cache.invalidation_rules[0].methods.len(), 4);
        assert_eq!(config.rate_limit.tiers[0].limit, Some(5));
        assert_eq!(config.logging.format, LogFormat::Pretty);
        // Unspecified sections keep their defaults
        assert_eq!(config.server.port, 3000);
    }

    #[test]
    fn test_from_toml_rejects_invalid_tier_table() {
        let result = Config::from_toml(
            r#"
            [[rate_limit.tiers]]
            name = "internal"
            roles = ["service"]
            "#,
        );
        assert!(matches!(result, Err(ConfigLoadError::Validation(_))));
    }
}
