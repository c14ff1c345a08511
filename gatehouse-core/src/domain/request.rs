//! Inbound request description and downstream handler contract

use async_trait::async_trait;
use std::future::Future;

/// What the middleware needs to know about an inbound request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestDescriptor {
    /// Upper-case HTTP method
    pub method: String,
    pub path: String,
    /// Query parameters in arrival order
    pub query: Vec<(String, String)>,
    /// Caller identity resolved by the upstream auth layer
    pub identity: Option<String>,
    pub role: Option<String>,
    /// The client asked to bypass caches
    pub no_cache: bool,
}

impl RequestDescriptor {
    pub fn new(method: impl AsRef<str>, path: impl Into<String>) -> Self {
        Self {
            method: method.as_ref().to_ascii_uppercase(),
            path: path.into(),
            query: Vec::new(),
            identity: None,
            role: None,
            no_cache: false,
        }
    }

    pub fn with_query(mut self, query: Vec<(String, String)>) -> Self {
        self.query = query;
        self
    }

    /// Add query parameters from a raw `a=1&b=2` string
    pub fn with_raw_query(mut self, raw: &str) -> Self {
        self.query = parse_query(raw);
        self
    }

    pub fn with_identity(mut self, identity: impl Into<String>) -> Self {
        self.identity = Some(identity.into());
        self
    }

    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.role = Some(role.into());
        self
    }

    pub fn with_no_cache(mut self, no_cache: bool) -> Self {
        self.no_cache = no_cache;
        self
    }

    /// Whether the method is expected to change server state
    pub fn is_mutating(&self) -> bool {
        matches!(self.method.as_str(), "POST" | "PUT" | "PATCH" | "DELETE")
    }
}

/// Split a raw query string into `(name, value)` pairs
///
/// Values are kept as sent; empty segments are dropped and a bare name has an
/// empty value.
pub fn parse_query(raw: &str) -> Vec<(String, String)> {
    raw.trim_start_matches('?')
        .split('&')
        .filter(|segment| !segment.is_empty())
        .map(|segment| match segment.split_once('=') {
            Some((name, value)) => (name.to_string(), value.to_string()),
            None => (segment.to_string(), String::new()),
        })
        .collect()
}

/// Whether `Cache-Control`/`Pragma` header values ask to bypass caches
pub fn is_no_cache_directive(cache_control: Option<&str>, pragma: Option<&str>) -> bool {
    let cache_control_says = cache_control.is_some_and(|value| {
        value.split(',').any(|directive| {
            let directive = directive.trim();
            directive.eq_ignore_ascii_case("no-cache") || directive.eq_ignore_ascii_case("no-store")
        })
    });
    let pragma_says = pragma.is_some_and(|value| value.trim().eq_ignore_ascii_case("no-cache"));
    cache_control_says || pragma_says
}

/// Response produced by the downstream handler
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlerResponse {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
}

impl HandlerResponse {
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            content_type: None,
            body: body.into(),
        }
    }

    pub fn ok(body: impl Into<Vec<u8>>) -> Self {
        Self::new(200, body)
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    /// 2xx
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Downstream invoked on a cache miss
#[async_trait]
pub trait Downstream: Send + Sync {
    async fn call(&self, request: &RequestDescriptor) -> HandlerResponse;
}

/// Adapter turning an async closure into a [`Downstream`]
pub struct FnDownstream<F>(pub F);

#[async_trait]
impl<F, Fut> Downstream for FnDownstream<F>
where
    F: Fn(RequestDescriptor) -> Fut + Send + Sync,
    Fut: Future<Output = HandlerResponse> + Send,
{
    async fn call(&self, request: &RequestDescriptor) -> HandlerResponse {
        (self.0)(request.clone()).await
    }
}
