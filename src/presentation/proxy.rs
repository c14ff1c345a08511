//! Forwarding of gated requests to the downstream API

use axum::{
    Router,
    body::Body,
    extract::{Request, State},
    http::{HeaderMap, StatusCode, Uri},
    response::{IntoResponse, Response},
};
use std::sync::Arc;
use tracing::{debug, error};

use gatehouse_core::config::UpstreamConfig;

use super::models::ErrorResponse;

/// Headers that describe a single connection and are never forwarded
const HOP_BY_HOP_HEADERS: &[&str] = &[
    "connection",
    "host",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
    "content-length",
];

fn strip_hop_by_hop(headers: &mut HeaderMap) {
    for name in HOP_BY_HOP_HEADERS {
        headers.remove(*name);
    }
}

/// Reverse proxy to the configured upstream
#[derive(Debug, Clone)]
pub struct ProxyHandler {
    client: reqwest::Client,
    base_url: String,
    max_body_bytes: usize,
}

impl ProxyHandler {
    pub fn new(config: &UpstreamConfig, max_body_bytes: usize) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            max_body_bytes,
        })
    }

    /// Upstream URL for an inbound URI
    pub fn upstream_url(&self, uri: &Uri) -> String {
        let path_and_query = uri.path_and_query().map(|pq| pq.as_str()).unwrap_or("/");
        format!("{}{}", self.base_url, path_and_query)
    }

    /// Forward `request` and relay the upstream response
    pub async fn forward(&self, request: Request) -> Response {
        let (parts, body) = request.into_parts();
        let url = self.upstream_url(&parts.uri);

        let body = match axum::body::to_bytes(body, self.max_body_bytes).await {
            Ok(bytes) => bytes,
            Err(e) => {
                debug!(error = %e, "Rejecting request body");
                return (
                    StatusCode::PAYLOAD_TOO_LARGE,
                    axum::Json(ErrorResponse::new(
                        "PAYLOAD_TOO_LARGE",
                        format!("Request body exceeds {} bytes", self.max_body_bytes),
                    )),
                )
                    .into_response();
            }
        };

        let mut headers = parts.headers;
        strip_hop_by_hop(&mut headers);

        let upstream = match self
            .client
            .request(parts.method.clone(), url.as_str())
            .headers(headers)
            .body(body)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => return bad_gateway(&url, e),
        };

        let status = upstream.status();
        let mut response_headers = upstream.headers().clone();
        strip_hop_by_hop(&mut response_headers);

        // Bodies of known, bounded size are buffered so the cache can store them
        let body = match upstream.content_length() {
            Some(len) if len <= self.max_body_bytes as u64 => match upstream.bytes().await {
                Ok(bytes) => Body::from(bytes),
                Err(e) => return bad_gateway(&url, e),
            },
            _ => Body::from_stream(upstream.bytes_stream()),
        };

        debug!(method = %parts.method, url = %url, status = status.as_u16(), "Proxied request");

        let mut response = Response::new(body);
        *response.status_mut() = status;
        *response.headers_mut() = response_headers;
        response
    }

    /// Router that forwards every request it receives
    pub fn router(self: Arc<Self>) -> Router {
        Router::new().fallback(forward_handler).with_state(self)
    }
}

fn bad_gateway(url: &str, e: reqwest::Error) -> Response {
    error!(url = %url, error = %e, timeout = e.is_timeout(), "Upstream request failed");
    let (status, code) = if e.is_timeout() {
        (StatusCode::GATEWAY_TIMEOUT, "UPSTREAM_TIMEOUT")
    } else {
        (StatusCode::BAD_GATEWAY, "UPSTREAM_UNAVAILABLE")
    };
    (
        status,
        axum::Json(ErrorResponse::new(code, "The upstream service did not respond")),
    )
        .into_response()
}

async fn forward_handler(State(proxy): State<Arc<ProxyHandler>>, request: Request) -> Response {
    proxy.forward(request).await
}
