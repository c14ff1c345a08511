//! Identity, rate limiting and response caching middleware

use axum::{
    body::{Body, Bytes, HttpBody},
    extract::{Request, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::time::Duration;
use tracing::{debug, warn};

use gatehouse_core::cache::{CachePlan, CacheStatus};
use gatehouse_core::domain::{HandlerResponse, RequestDescriptor, is_no_cache_directive};
use gatehouse_core::rate_limiter::RateLimitDecision;

use super::GatehouseState;
use super::models::ErrorResponse;

/// Header carrying the caller identity set by a trusted upstream authenticator
pub const IDENTITY_HEADER: &str = "x-gatehouse-identity";
/// Header carrying the caller role set by a trusted upstream authenticator
pub const ROLE_HEADER: &str = "x-gatehouse-role";
/// Header reporting how the cache served a response
pub const CACHE_HEADER: &str = "x-cache";

/// Caller identity and role resolved for a request
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestIdentity {
    pub identity: Option<String>,
    pub role: Option<String>,
}

impl RequestIdentity {
    /// Read the trusted identity headers
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let read = |name: &str| {
            headers
                .get(name)
                .and_then(|h| h.to_str().ok())
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        };

        Self {
            identity: read(IDENTITY_HEADER),
            role: read(ROLE_HEADER),
        }
    }
}

/// Attach a [`RequestIdentity`] to every request
///
/// An identity already placed by an earlier layer is kept. The identity headers
/// are honored only when `rate_limit.trust_identity_headers` is set; otherwise
/// they are removed so callers are limited by IP and nothing spoofed reaches
/// the downstream.
pub async fn identity_middleware(
    State(state): State<GatehouseState>,
    mut request: Request,
    next: Next,
) -> Response {
    if request.extensions().get::<RequestIdentity>().is_none() {
        let identity = if state.config.rate_limit.trust_identity_headers {
            RequestIdentity::from_headers(request.headers())
        } else {
            strip_identity_headers(request.headers_mut());
            RequestIdentity::default()
        };
        request.extensions_mut().insert(identity);
    }
    next.run(request).await
}

fn strip_identity_headers(headers: &mut HeaderMap) {
    let identity = headers.remove(IDENTITY_HEADER);
    let role = headers.remove(ROLE_HEADER);
    if identity.is_some() || role.is_some() {
        debug!("Dropped untrusted identity headers");
    }
}

/// Extract client IP from request headers
pub fn extract_ip(request: &Request) -> String {
    request
        .headers()
        .get("x-forwarded-for")
        .and_then(|h| h.to_str().ok())
        .and_then(|s| s.split(',').next())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .or_else(|| {
            request
                .headers()
                .get("x-real-ip")
                .and_then(|h| h.to_str().ok())
                .map(|s| s.trim().to_string())
        })
        .unwrap_or_else(|| "unknown-ip".to_string())
}

/// Add rate limit headers to response
///
/// Every decision carries `ratelimit-policy`; quota headers only apply to
/// restricted tiers.
fn add_rate_limit_headers(response: &mut Response, decision: &RateLimitDecision) {
    let headers = response.headers_mut();

    if let Ok(policy) = HeaderValue::from_str(&decision.policy()) {
        headers.insert("ratelimit-policy", policy);
    }
    if decision.is_unlimited() {
        return;
    }

    // IETF draft standard headers
    // https://datatracker.ietf.org/doc/html/draft-ietf-httpapi-ratelimit-headers
    headers.insert("ratelimit-limit", HeaderValue::from(decision.limit));
    headers.insert("ratelimit-remaining", HeaderValue::from(decision.remaining));
    headers.insert("ratelimit-reset", HeaderValue::from(decision.reset_at));
}

/// Rate limiting middleware
///
/// Identities come from [`RequestIdentity`], falling back to the client IP for
/// anonymous callers. Unrestricted tiers only get `ratelimit-policy`.
pub async fn rate_limit_middleware(
    State(state): State<GatehouseState>,
    request: Request,
    next: Next,
) -> Response {
    if !state.limiter.is_enabled() || state.config.rate_limit.is_excluded(request.uri().path()) {
        return next.run(request).await;
    }

    let resolved = request
        .extensions()
        .get::<RequestIdentity>()
        .cloned()
        .unwrap_or_default();
    let identity = resolved
        .identity
        .clone()
        .unwrap_or_else(|| extract_ip(&request));

    let decision = state
        .limiter
        .check_role(&identity, resolved.role.as_deref())
        .await;

    if decision.allowed {
        let mut response = next.run(request).await;
        add_rate_limit_headers(&mut response, &decision);
        return response;
    }

    let retry_after = decision.retry_after.unwrap_or(1);
    let mut response = (
        StatusCode::TOO_MANY_REQUESTS,
        axum::Json(
            ErrorResponse::new(
                "RATE_LIMIT_EXCEEDED",
                format!(
                    "Rate limit exceeded. Please retry after {} seconds.",
                    retry_after
                ),
            )
            .with_details(serde_json::json!({
                "retry_after": retry_after,
                "limit": decision.limit,
                "remaining": decision.remaining,
                "tier": decision.tier,
            })),
        ),
    )
        .into_response();

    add_rate_limit_headers(&mut response, &decision);
    response
        .headers_mut()
        .insert(header::RETRY_AFTER, HeaderValue::from(retry_after));

    response
}

/// Build the cache view of an incoming request
pub fn describe_request(request: &Request) -> RequestDescriptor {
    let headers = request.headers();
    let no_cache = is_no_cache_directive(
        headers
            .get(header::CACHE_CONTROL)
            .and_then(|h| h.to_str().ok()),
        headers.get(header::PRAGMA).and_then(|h| h.to_str().ok()),
    );

    let mut descriptor = RequestDescriptor::new(request.method().as_str(), request.uri().path())
        .with_no_cache(no_cache);
    if let Some(query) = request.uri().query() {
        descriptor = descriptor.with_raw_query(query);
    }
    if let Some(resolved) = request.extensions().get::<RequestIdentity>() {
        if let Some(identity) = &resolved.identity {
            descriptor = descriptor.with_identity(identity.clone());
        }
        if let Some(role) = &resolved.role {
            descriptor = descriptor.with_role(role.clone());
        }
    }
    descriptor
}

fn with_cache_status(mut response: Response, status: CacheStatus) -> Response {
    response.headers_mut().insert(
        CACHE_HEADER,
        HeaderValue::from_static(status.header_value()),
    );
    response
}

fn cached_response(stored: HandlerResponse) -> Response {
    let status = StatusCode::from_u16(stored.status).unwrap_or(StatusCode::OK);
    let mut response = (status, Body::from(stored.body)).into_response();
    if let Some(content_type) = stored.content_type
        && let Ok(value) = HeaderValue::from_str(&content_type)
    {
        response.headers_mut().insert(header::CONTENT_TYPE, value);
    }
    response
}

/// Upper bound of the body size, if the body knows it
fn known_length(response: &Response) -> Option<u64> {
    response.body().size_hint().upper()
}

/// Read-through response cache middleware
///
/// Successful cacheable responses are buffered and written to the store;
/// everything else streams through untouched with an `x-cache` header.
pub async fn response_cache_middleware(
    State(state): State<GatehouseState>,
    request: Request,
    next: Next,
) -> Response {
    let descriptor = describe_request(&request);

    match state.cache.plan(&descriptor) {
        CachePlan::Bypass => {
            state.cache.record_bypass();
            with_cache_status(next.run(request).await, CacheStatus::Bypass)
        }
        CachePlan::Mutation => {
            let response = next.run(request).await;
            // Only status matters for invalidation, the body is never buffered
            let outcome = HandlerResponse::new(response.status().as_u16(), Vec::new());
            let status = state.cache.complete_mutation(&descriptor, &outcome).await;
            with_cache_status(response, status)
        }
        CachePlan::Lookup { store_key, ttl } => {
            if let Some(stored) = state.cache.lookup(&store_key).await {
                debug!(key = %store_key, "Serving cached response");
                return with_cache_status(cached_response(stored), CacheStatus::Hit);
            }

            let response = next.run(request).await;
            fill(&state, &store_key, ttl, response).await
        }
    }
}

/// Buffer a downstream response and store it when eligible
async fn fill(state: &GatehouseState, store_key: &str, ttl: Duration, response: Response) -> Response {
    let limit = state
        .cache
        .policy()
        .max_body_bytes
        .min(state.config.server.max_body_bytes);
    // Streaming and oversized bodies pass through without buffering
    let bufferable = known_length(&response).is_some_and(|len| len <= limit as u64);
    if !response.status().is_success() || !bufferable {
        return with_cache_status(response, CacheStatus::Miss);
    }

    let (parts, body) = response.into_parts();
    let bytes: Bytes = match axum::body::to_bytes(body, limit).await {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!(key = %store_key, error = %e, "Failed to buffer downstream response");
            return (
                StatusCode::BAD_GATEWAY,
                axum::Json(ErrorResponse::new(
                    "UPSTREAM_BODY_ERROR",
                    "Failed to read the downstream response body",
                )),
            )
                .into_response();
        }
    };

    let content_type = parts
        .headers
        .get(header::CONTENT_TYPE)
        .and_then(|h| h.to_str().ok())
        .map(str::to_string);
    let mut snapshot = HandlerResponse::new(parts.status.as_u16(), bytes.to_vec());
    if let Some(content_type) = content_type {
        snapshot = snapshot.with_content_type(content_type);
    }
    state.cache.store(store_key, &snapshot, ttl).await;

    with_cache_status(Response::from_parts(parts, Body::from(bytes)), CacheStatus::Miss)
}

/// Bound the time spent on a request, downstream included
pub async fn request_timeout_middleware(
    State(state): State<GatehouseState>,
    request: Request,
    next: Next,
) -> Response {
    let timeout = state.config.server.request_timeout();
    match tokio::time::timeout(timeout, next.run(request)).await {
        Ok(response) => response,
        Err(_) => {
            warn!(timeout_secs = timeout.as_secs(), "Request timed out");
            (
                StatusCode::GATEWAY_TIMEOUT,
                axum::Json(ErrorResponse::new(
                    "REQUEST_TIMEOUT",
                    format!("Request did not complete within {} seconds", timeout.as_secs()),
                )),
            )
                .into_response()
        }
    }
}
