//! Stored response envelope
//!
//! Layout: a compact JSON header, a `\n`, then the raw body. The whole envelope is
//! gzip-compressed and prefixed with [`COMPRESSION_MARKER`] when it exceeds the
//! compression threshold.
// cspell:ignore GzEncoder GzDecoder flate

use serde::{Deserialize, Serialize};
use std::io::{Read, Write};

use crate::domain::HandlerResponse;

pub const COMPRESSION_MARKER: &[u8; 4] = b"GZIP";

/// Errors raised while encoding or decoding a cached payload
#[derive(Debug, thiserror::Error)]
pub enum PayloadError {
    #[error("payload header error: {0}")]
    Header(#[from] serde_json::Error),

    #[error("payload compression error: {0}")]
    Compression(#[from] std::io::Error),

    #[error("payload is truncated: expected {expected} body bytes, found {found}")]
    Truncated { expected: usize, found: usize },

    #[error("payload has no header separator")]
    MissingSeparator,
}

#[derive(Debug, Serialize, Deserialize)]
struct PayloadHeader {
    status: u16,
    content_type: Option<String>,
    created_at_ms: u64,
    ttl_ms: u64,
    body_len: usize,
}

/// A cached response plus its freshness metadata
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedPayload {
    pub response: HandlerResponse,
    pub created_at_ms: u64,
    pub ttl_ms: u64,
}

impl CachedPayload {
    pub fn new(response: HandlerResponse, created_at_ms: u64, ttl_ms: u64) -> Self {
        Self {
            response,
            created_at_ms,
            ttl_ms,
        }
    }

    /// Instant after which the payload must not be served
    pub fn expires_at_ms(&self) -> u64 {
        self.created_at_ms.saturating_add(self.ttl_ms)
    }

    pub fn is_fresh(&self, now_ms: u64) -> bool {
        now_ms < self.expires_at_ms()
    }

    /// Serialize, compressing when `compress_above` is set and exceeded
    pub fn encode(&self, compress_above: Option<usize>) -> Result<Vec<u8>, PayloadError> {
        let header = PayloadHeader {
            status: self.response.status,
            content_type: self.response.content_type.clone(),
            created_at_ms: self.created_at_ms,
            ttl_ms: self.ttl_ms,
            body_len: self.response.body.len(),
        };

        let mut encoded = serde_json::to_vec(&header)?;
        encoded.push(b'\n');
        encoded.extend_from_slice(&self.response.body);

        match compress_above {
            Some(threshold) if encoded.len() > threshold => {
                let mut encoder =
                    flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
                encoder.write_all(&encoded)?;
                let compressed = encoder.finish()?;

                let mut result = COMPRESSION_MARKER.to_vec();
                result.extend_from_slice(&compressed);
                Ok(result)
            }
            _ => Ok(encoded),
        }
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, PayloadError> {
        let decompressed;
        let raw = if bytes.len() > COMPRESSION_MARKER.len()
            && bytes.starts_with(COMPRESSION_MARKER.as_slice())
        {
            let mut decoder = flate2::read::GzDecoder::new(&bytes[COMPRESSION_MARKER.len()..]);
            let mut buffer = Vec::new();
            decoder.read_to_end(&mut buffer)?;
            decompressed = buffer;
            decompressed.as_slice()
        } else {
            bytes
        };

        let separator = raw
            .iter()
            .position(|b| *b == b'\n')
            .ok_or(PayloadError::MissingSeparator)?;
        let header: PayloadHeader = serde_json::from_slice(&raw[..separator])?;
        let body = &raw[separator + 1..];

        if body.len() != header.body_len {
            return Err(PayloadError::Truncated {
                expected: header.body_len,
                found: body.len(),
            });
        }

        Ok(Self {
            response: HandlerResponse {
                status: header.status,
                content_type: header.content_type,
                body: body.to_vec(),
            },
            created_at_ms: header.created_at_ms,
            ttl_ms: header.ttl_ms,
        })
    }
}
