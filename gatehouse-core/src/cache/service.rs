//! Response cache service

use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, warn};

use crate::clock::{Clock, system_clock};
use crate::domain::{Downstream, HandlerResponse, RequestDescriptor};
use crate::store::Store;

use super::key::derive_key;
use super::payload::CachedPayload;
use super::policy::CachePolicy;

/// How a request was served by the cache
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheStatus {
    /// Served from the store without calling downstream
    Hit,
    /// Downstream was called and the response considered for storage
    Miss,
    /// The cache was not consulted
    Bypass,
    /// A successful mutating request purged related entries
    Invalidated,
}

impl CacheStatus {
    /// Value of the `x-cache` response header
    pub fn header_value(&self) -> &'static str {
        match self {
            CacheStatus::Hit => "HIT",
            CacheStatus::Miss => "MISS",
            CacheStatus::Bypass | CacheStatus::Invalidated => "BYPASS",
        }
    }
}

/// What the cache does with a request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CachePlan {
    /// Call downstream without touching the cache
    Bypass,
    /// Call downstream, then apply invalidation rules on success
    Mutation,
    /// Serve from `store_key` or fill it for `ttl`
    Lookup { store_key: String, ttl: Duration },
}

/// Response plus cache metadata
#[derive(Debug, Clone)]
pub struct CachedOutcome {
    pub response: HandlerResponse,
    pub status: CacheStatus,
}

#[derive(Debug, Default)]
struct CacheCounters {
    hits: AtomicU64,
    misses: AtomicU64,
    bypasses: AtomicU64,
    stores: AtomicU64,
    invalidations: AtomicU64,
    keys_invalidated: AtomicU64,
    decode_failures: AtomicU64,
    store_errors: AtomicU64,
}

/// Snapshot of the cache counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub bypasses: u64,
    pub stores: u64,
    pub invalidations: u64,
    pub keys_invalidated: u64,
    pub decode_failures: u64,
    pub store_errors: u64,
}

impl CacheStats {
    /// Hits over lookups; 0.0 before the first lookup
    pub fn hit_ratio(&self) -> f64 {
        let lookups = self.hits + self.misses;
        if lookups == 0 {
            0.0
        } else {
            self.hits as f64 / lookups as f64
        }
    }
}

/// Read-through response cache with invalidation on mutation
pub struct ResponseCache {
    store: Arc<dyn Store>,
    policy: CachePolicy,
    clock: Arc<dyn Clock>,
    counters: CacheCounters,
}

impl ResponseCache {
    pub fn new(store: Arc<dyn Store>, policy: CachePolicy) -> Self {
        Self::with_clock(store, policy, system_clock())
    }

    pub fn with_clock(store: Arc<dyn Store>, policy: CachePolicy, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            policy,
            clock,
            counters: CacheCounters::default(),
        }
    }

    pub fn policy(&self) -> &CachePolicy {
        &self.policy
    }

    /// Decide how `request` interacts with the cache
    pub fn plan(&self, request: &RequestDescriptor) -> CachePlan {
        if !self.policy.enabled {
            return CachePlan::Bypass;
        }
        if request.is_mutating() {
            return CachePlan::Mutation;
        }

        let route = self.policy.route_for(&request.path);
        if !self.policy.is_cacheable(request, route) {
            return CachePlan::Bypass;
        }

        let vary_by_identity = route.is_some_and(|r| r.vary_by_identity);
        CachePlan::Lookup {
            store_key: self.policy.store_key(&derive_key(request, vary_by_identity)),
            ttl: self.policy.ttl_for(route),
        }
    }

    /// Serve `request`, calling `downstream` only when the cache cannot answer
    pub async fn handle<D>(&self, request: &RequestDescriptor, downstream: &D) -> CachedOutcome
    where
        D: Downstream + ?Sized,
    {
        match self.plan(request) {
            CachePlan::Bypass => {
                self.record_bypass();
                CachedOutcome {
                    response: downstream.call(request).await,
                    status: CacheStatus::Bypass,
                }
            }
            CachePlan::Mutation => {
                let response = downstream.call(request).await;
                let status = self.complete_mutation(request, &response).await;
                CachedOutcome { response, status }
            }
            CachePlan::Lookup { store_key, ttl } => {
                if let Some(response) = self.lookup(&store_key).await {
                    return CachedOutcome {
                        response,
                        status: CacheStatus::Hit,
                    };
                }

                let response = downstream.call(request).await;
                self.store(&store_key, &response, ttl).await;
                CachedOutcome {
                    response,
                    status: CacheStatus::Miss,
                }
            }
        }
    }

    pub fn record_bypass(&self) {
        self.counters.bypasses.fetch_add(1, Ordering::Relaxed);
    }

    /// Purge related entries once a mutating request has produced `response`
    pub async fn complete_mutation(
        &self,
        request: &RequestDescriptor,
        response: &HandlerResponse,
    ) -> CacheStatus {
        // Purge only after the handler has succeeded
        if response.is_success() && self.invalidate(request).await.is_some() {
            return CacheStatus::Invalidated;
        }

        self.record_bypass();
        CacheStatus::Bypass
    }

    /// Apply the invalidation rules matching `request`
    ///
    /// Returns the number of removed keys, or `None` when no rule applies.
    pub async fn invalidate(&self, request: &RequestDescriptor) -> Option<u64> {
        let patterns = self.policy.invalidation_patterns(request);
        if patterns.is_empty() {
            return None;
        }

        self.counters.invalidations.fetch_add(1, Ordering::Relaxed);
        let mut removed = 0;
        for pattern in &patterns {
            match self.store.delete_matching(pattern).await {
                Ok(count) => removed += count,
                Err(e) => {
                    self.counters.store_errors.fetch_add(1, Ordering::Relaxed);
                    warn!(pattern = %pattern, error = %e, "Cache invalidation failed");
                }
            }
        }

        self.counters
            .keys_invalidated
            .fetch_add(removed, Ordering::Relaxed);
        debug!(
            method = %request.method,
            path = %request.path,
            patterns = patterns.len(),
            removed,
            "Cache invalidated"
        );
        Some(removed)
    }

    /// Fetch a fresh stored response, counting the hit or miss
    pub async fn lookup(&self, store_key: &str) -> Option<HandlerResponse> {
        let found = self.read(store_key).await;
        if found.is_some() {
            self.counters.hits.fetch_add(1, Ordering::Relaxed);
            debug!(key = %store_key, "Cache hit");
        } else {
            self.counters.misses.fetch_add(1, Ordering::Relaxed);
            debug!(key = %store_key, "Cache miss");
        }
        found
    }

    /// Fetch and decode a fresh payload; anything else is a miss
    async fn read(&self, store_key: &str) -> Option<HandlerResponse> {
        let bytes = match self.store.get(store_key).await {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return None,
            Err(e) => {
                self.counters.store_errors.fetch_add(1, Ordering::Relaxed);
                warn!(key = %store_key, error = %e, "Cache read failed");
                return None;
            }
        };

        match CachedPayload::decode(&bytes) {
            Ok(payload) if payload.is_fresh(self.clock.now_millis()) => Some(payload.response),
            Ok(_) => None,
            Err(e) => {
                self.counters.decode_failures.fetch_add(1, Ordering::Relaxed);
                warn!(key = %store_key, error = %e, "Discarding undecodable cache payload");
                None
            }
        }
    }

    /// Store a successful response under `store_key` for `ttl`
    pub async fn store(&self, store_key: &str, response: &HandlerResponse, ttl: Duration) {
        if !response.is_success() {
            return;
        }
        if response.body.len() > self.policy.max_body_bytes {
            debug!(
                key = %store_key,
                size = response.body.len(),
                "Response too large to cache"
            );
            return;
        }

        let payload = CachedPayload::new(
            response.clone(),
            self.clock.now_millis(),
            ttl.as_millis() as u64,
        );
        let bytes = match payload.encode(self.policy.compression_threshold) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(key = %store_key, error = %e, "Failed to encode cache payload");
                return;
            }
        };

        match self.store.set(store_key, bytes, ttl).await {
            Ok(()) => {
                self.counters.stores.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                self.counters.store_errors.fetch_add(1, Ordering::Relaxed);
                warn!(key = %store_key, error = %e, "Cache write failed");
            }
        }
    }

    pub fn stats(&self) -> CacheStats {
        let c = &self.counters;
        CacheStats {
            hits: c.hits.load(Ordering::Relaxed),
            misses: c.misses.load(Ordering::Relaxed),
            bypasses: c.bypasses.load(Ordering::Relaxed),
            stores: c.stores.load(Ordering::Relaxed),
            invalidations: c.invalidations.load(Ordering::Relaxed),
            keys_invalidated: c.keys_invalidated.load(Ordering::Relaxed),
            decode_failures: c.decode_failures.load(Ordering::Relaxed),
            store_errors: c.store_errors.load(Ordering::Relaxed),
        }
    }
}

impl std::fmt::Debug for ResponseCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponseCache")
            .field("store", &self.store.backend_name())
            .field("policy", &self.policy)
            .finish()
    }
}
