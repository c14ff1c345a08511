//! Route cache policies and invalidation rules

use std::collections::HashSet;
use std::time::Duration;

use crate::config::CacheConfig;
use crate::domain::{RequestDescriptor, RouteError, RouteParams, RoutePattern};
use crate::store::escape_glob;

use super::key::normalize_path;

/// Cache behaviour of one route
#[derive(Debug, Clone)]
pub struct RoutePolicy {
    pub pattern: RoutePattern,
    pub ttl: Option<Duration>,
    pub cacheable: bool,
    pub vary_by_identity: bool,
}

/// Purge patterns applied after a successful mutating request
#[derive(Debug, Clone)]
pub struct InvalidationRule {
    pub route: RoutePattern,
    pub methods: HashSet<String>,
    pub patterns: Vec<String>,
}

impl InvalidationRule {
    pub fn new(route: &str, methods: &[&str], patterns: &[&str]) -> Result<Self, RouteError> {
        Ok(Self {
            route: RoutePattern::parse(route)?,
            methods: methods.iter().map(|m| m.to_ascii_uppercase()).collect(),
            patterns: patterns.iter().map(|p| p.to_string()).collect(),
        })
    }

    /// Patterns for `method path` with route captures substituted, if the rule applies
    pub fn patterns_for(&self, method: &str, path: &str) -> Option<Vec<String>> {
        if !self.methods.contains(method) {
            return None;
        }
        let params = self.route.matches(path)?;
        Some(
            self.patterns
                .iter()
                .map(|pattern| substitute_params(pattern, &params))
                .collect(),
        )
    }
}

/// Replace `:name` tokens with the glob-escaped captured value
///
/// Tokens without a matching capture are kept verbatim.
pub fn substitute_params(pattern: &str, params: &RouteParams) -> String {
    let mut result = String::with_capacity(pattern.len());
    let mut chars = pattern.char_indices().peekable();

    while let Some((index, c)) = chars.next() {
        if c != ':' {
            result.push(c);
            continue;
        }

        let start = index + 1;
        let mut end = start;
        while let Some(&(next_index, next)) = chars.peek() {
            if next.is_ascii_alphanumeric() || next == '_' {
                end = next_index + next.len_utf8();
                chars.next();
            } else {
                break;
            }
        }

        let name = &pattern[start..end];
        match params.get(name) {
            Some(value) if !name.is_empty() => result.push_str(&escape_glob(value)),
            _ => {
                result.push(':');
                result.push_str(name);
            }
        }
    }

    result
}

/// Compiled cache configuration
#[derive(Debug, Clone)]
pub struct CachePolicy {
    pub enabled: bool,
    pub key_prefix: String,
    pub default_ttl: Duration,
    pub cacheable_methods: Vec<String>,
    /// Compress stored envelopes larger than this
    pub compression_threshold: Option<usize>,
    pub max_body_bytes: usize,
    routes: Vec<RoutePolicy>,
    rules: Vec<InvalidationRule>,
}

impl CachePolicy {
    pub fn new(key_prefix: impl Into<String>, default_ttl: Duration) -> Self {
        Self {
            enabled: true,
            key_prefix: key_prefix.into(),
            default_ttl,
            cacheable_methods: vec!["GET".to_string(), "HEAD".to_string()],
            compression_threshold: None,
            max_body_bytes: 1024 * 1024,
            routes: Vec::new(),
            rules: Vec::new(),
        }
    }

    pub fn from_config(config: &CacheConfig) -> Result<Self, RouteError> {
        let mut policy = Self::new(
            config.key_prefix.clone(),
            Duration::from_secs(config.default_ttl_seconds),
        );
        policy.enabled = config.enabled;
        policy.cacheable_methods = config
            .cacheable_methods
            .iter()
            .map(|m| m.to_ascii_uppercase())
            .collect();
        policy.compression_threshold = config
            .enable_compression
            .then_some(config.compression_threshold_bytes);
        policy.max_body_bytes = config.max_body_bytes;

        for route in &config.routes {
            policy = policy.with_route(RoutePolicy {
                pattern: RoutePattern::parse(&route.route)?,
                ttl: route.ttl_seconds.map(Duration::from_secs),
                cacheable: route.cacheable,
                vary_by_identity: route.vary_by_identity,
            });
        }
        for rule in &config.invalidation_rules {
            policy = policy.with_rule(InvalidationRule {
                route: RoutePattern::parse(&rule.route)?,
                methods: rule.methods.iter().map(|m| m.to_ascii_uppercase()).collect(),
                patterns: rule.patterns.clone(),
            });
        }

        Ok(policy)
    }

    /// Add a route policy; the most specific matching route wins
    pub fn with_route(mut self, route: RoutePolicy) -> Self {
        self.routes.push(route);
        self.routes
            .sort_by_key(|r| std::cmp::Reverse(r.pattern.specificity()));
        self
    }

    pub fn with_rule(mut self, rule: InvalidationRule) -> Self {
        self.rules.push(rule);
        self
    }

    pub fn route_for(&self, path: &str) -> Option<&RoutePolicy> {
        let path = normalize_path(path);
        self.routes.iter().find(|r| r.pattern.matches(&path).is_some())
    }

    pub fn ttl_for(&self, route: Option<&RoutePolicy>) -> Duration {
        route.and_then(|r| r.ttl).unwrap_or(self.default_ttl)
    }

    /// Whether the read path may be used for `request`
    pub fn is_cacheable(&self, request: &RequestDescriptor, route: Option<&RoutePolicy>) -> bool {
        self.enabled
            && !request.no_cache
            && self.cacheable_methods.contains(&request.method)
            && route.is_none_or(|r| r.cacheable)
    }

    /// Store patterns to delete after a successful `request`
    pub fn invalidation_patterns(&self, request: &RequestDescriptor) -> Vec<String> {
        let path = normalize_path(&request.path);
        let prefix = escape_glob(&self.key_prefix);
        let mut patterns: Vec<String> = Vec::new();

        for rule in &self.rules {
            let Some(rule_patterns) = rule.patterns_for(&request.method, &path) else {
                continue;
            };
            for pattern in rule_patterns {
                for method in &self.cacheable_methods {
                    let full = format!("{}:{}:{}", prefix, method, pattern);
                    if !patterns.contains(&full) {
                        patterns.push(full);
                    }
                }
            }
        }

        patterns
    }

    /// Namespaced store key for a derived cache key
    pub fn store_key(&self, cache_key: &str) -> String {
        format!("{}:{}", self.key_prefix, cache_key)
    }
}
