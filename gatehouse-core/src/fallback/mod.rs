//! Fallback coordination between the shared backend and the local store
//!
//! [`FallbackStore`] is a two-state machine wrapped around a remote [`Store`]:
//!
//! ```text
//!    ┌─────────────┐  failure_threshold consecutive  ┌──────────────┐
//!    │  CONNECTED  │ ──────────────────────────────► │   DEGRADED   │
//!    └─────────────┘          failures               └──────────────┘
//!           ▲                                               │
//!           └───────────── health probe succeeds ───────────┘
//! ```
//!
//! - **Connected**: calls go to the remote with a timeout. A failed call is answered
//!   by the local store on a best-effort basis and counted.
//! - **Degraded**: every call is answered by the local store, which starts empty.
//!   Quotas and cache entries effectively reset at this moment.
//! - **Recovery**: a successful probe switches back and discards the local store.
//!   Local counters are never merged into the remote.
//!
//! Store errors never escape to callers of this type.

pub mod retry;

pub use retry::{RetryConfig, retry_with_backoff};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::store::{LocalStore, Store, StoreError, WindowCount};

/// Operating mode of the store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreMode {
    /// The shared backend is the source of truth
    Connected,
    /// The backend is unreachable and the local store answers every call
    Degraded,
}

impl StoreMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            StoreMode::Connected => "connected",
            StoreMode::Degraded => "degraded",
        }
    }
}

impl std::fmt::Display for StoreMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Fallback coordinator configuration
#[derive(Debug, Clone)]
pub struct FallbackConfig {
    /// Consecutive backend failures before switching to degraded mode
    pub failure_threshold: u32,
    /// How often the health probe runs
    pub health_check_interval: Duration,
    /// Upper bound for every remote call
    pub operation_timeout: Duration,
    /// Backoff schedule for failed pattern deletes
    pub invalidation_retry: RetryConfig,
    /// Pattern deletes remembered while degraded, replayed on recovery
    pub max_pending_invalidations: usize,
}

impl Default for FallbackConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            health_check_interval: Duration::from_secs(5),
            operation_timeout: Duration::from_millis(250),
            invalidation_retry: RetryConfig::default(),
            max_pending_invalidations: 1024,
        }
    }
}

/// Snapshot of the coordinator for the status endpoint
#[derive(Debug, Clone, Serialize)]
pub struct FallbackStatus {
    pub mode: StoreMode,
    /// When the current mode was entered
    pub since: DateTime<Utc>,
    /// Number of mode transitions since start
    pub transitions: u64,
    pub consecutive_failures: u32,
    pub last_error: Option<String>,
    pub remote_backend: &'static str,
    pub local_entries: usize,
    pub pending_invalidations: usize,
}

#[derive(Debug)]
struct TransitionLog {
    since: DateTime<Utc>,
    transitions: u64,
    last_error: Option<String>,
}

/// Store that fails over to a local store while the remote is unavailable
pub struct FallbackStore {
    remote: Arc<dyn Store>,
    local: Arc<LocalStore>,
    config: FallbackConfig,
    degraded: AtomicBool,
    consecutive_failures: AtomicU32,
    log: Mutex<TransitionLog>,
    pending_invalidations: Mutex<HashSet<String>>,
}

impl FallbackStore {
    /// Wrap `remote`, starting in connected mode
    pub fn new(remote: Arc<dyn Store>, local: Arc<LocalStore>, config: FallbackConfig) -> Self {
        Self {
            remote,
            local,
            config,
            degraded: AtomicBool::new(false),
            consecutive_failures: AtomicU32::new(0),
            log: Mutex::new(TransitionLog {
                since: Utc::now(),
                transitions: 0,
                last_error: None,
            }),
            pending_invalidations: Mutex::new(HashSet::new()),
        }
    }

    /// Probe the remote once at startup; an unreachable backend starts degraded
    pub async fn initialize(&self) -> StoreMode {
        match self
            .remote_call("health_check", self.remote.health_check())
            .await
        {
            Ok(()) => {
                info!(
                    backend = self.remote.backend_name(),
                    "Store connected to shared backend"
                );
            }
            Err(e) => {
                self.enter_degraded(&format!("backend unreachable at startup: {}", e))
                    .await;
            }
        }
        self.mode()
    }

    /// Current mode
    pub fn mode(&self) -> StoreMode {
        if self.degraded.load(Ordering::SeqCst) {
            StoreMode::Degraded
        } else {
            StoreMode::Connected
        }
    }

    pub fn is_degraded(&self) -> bool {
        self.mode() == StoreMode::Degraded
    }

    /// The local store used in degraded mode
    pub fn local(&self) -> &Arc<LocalStore> {
        &self.local
    }

    pub fn config(&self) -> &FallbackConfig {
        &self.config
    }

    /// Status snapshot for operational tooling
    pub async fn status(&self) -> FallbackStatus {
        let (since, transitions, last_error) = {
            let log = self.log.lock().await;
            (log.since, log.transitions, log.last_error.clone())
        };

        FallbackStatus {
            mode: self.mode(),
            since,
            transitions,
            consecutive_failures: self.consecutive_failures.load(Ordering::SeqCst),
            last_error,
            remote_backend: self.remote.backend_name(),
            local_entries: self.local.len().await,
            pending_invalidations: self.pending_invalidations.lock().await.len(),
        }
    }

    /// Run one health probe against the remote and apply the resulting transition
    pub async fn probe(&self) -> StoreMode {
        let result = self
            .remote_call("health_check", self.remote.health_check())
            .await;

        if result.is_ok() && self.is_degraded() {
            self.recover().await;
        }
        self.mode()
    }

    /// Spawn the periodic health probe; stops when `shutdown` is cancelled
    pub fn start_health_probe(self: Arc<Self>, shutdown: CancellationToken) {
        let every = self.config.health_check_interval;

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            // The first tick completes immediately; startup already probed
            interval.tick().await;

            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        let mode = self.probe().await;
                        debug!(mode = %mode, "Store health probe completed");
                    }
                    _ = shutdown.cancelled() => {
                        debug!("Store health probe stopped");
                        return;
                    }
                }
            }
        });
    }

    /// Call the remote under the operation timeout and account for the outcome
    async fn remote_call<T, F>(&self, operation: &'static str, call: F) -> Result<T, StoreError>
    where
        F: Future<Output = Result<T, StoreError>>,
    {
        let result = match tokio::time::timeout(self.config.operation_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(StoreError::Timeout {
                operation,
                timeout_ms: self.config.operation_timeout.as_millis() as u64,
            }),
        };

        match &result {
            Ok(_) => {
                self.consecutive_failures.store(0, Ordering::SeqCst);
            }
            Err(e) => self.record_failure(operation, e).await,
        }
        result
    }

    async fn record_failure(&self, operation: &'static str, error: &StoreError) {
        let failures = self.consecutive_failures.fetch_add(1, Ordering::SeqCst) + 1;
        debug!(
            operation,
            failures,
            error = %error,
            "Store backend operation failed"
        );

        self.log.lock().await.last_error = Some(format!("{}: {}", operation, error));

        if failures >= self.config.failure_threshold && !self.is_degraded() {
            self.enter_degraded(&format!(
                "{} consecutive failures, last: {}",
                failures, error
            ))
            .await;
        }
    }

    async fn enter_degraded(&self, reason: &str) {
        let mut log = self.log.lock().await;
        if self.degraded.load(Ordering::SeqCst) {
            return;
        }

        // The local store starts empty at the moment of degradation
        self.local.clear().await;
        self.degraded.store(true, Ordering::SeqCst);
        log.since = Utc::now();
        log.transitions += 1;
        log.last_error = Some(reason.to_string());

        warn!(
            backend = self.remote.backend_name(),
            reason,
            transitions = log.transitions,
            "Store switched to degraded mode; serving from local store"
        );
    }

    async fn recover(&self) {
        {
            let mut log = self.log.lock().await;
            if !self.degraded.load(Ordering::SeqCst) {
                return;
            }

            // Discard, never merge: the remote is the source of truth again
            self.local.clear().await;
            self.consecutive_failures.store(0, Ordering::SeqCst);
            self.degraded.store(false, Ordering::SeqCst);
            log.since = Utc::now();
            log.transitions += 1;

            info!(
                backend = self.remote.backend_name(),
                transitions = log.transitions,
                "Store backend recovered; switched back to connected mode"
            );
        }

        self.replay_pending_invalidations().await;
    }

    /// Remember a pattern delete that could not reach the remote
    async fn remember_invalidation(&self, pattern: &str) {
        let mut pending = self.pending_invalidations.lock().await;
        if pending.len() >= self.config.max_pending_invalidations {
            warn!(
                pattern,
                "Pending invalidation list full; entry will expire by TTL instead"
            );
            return;
        }
        pending.insert(pattern.to_string());
    }

    async fn replay_pending_invalidations(&self) {
        let patterns: Vec<String> = self.pending_invalidations.lock().await.drain().collect();
        for pattern in patterns {
            self.spawn_invalidation_retry(pattern);
        }
    }

    /// Retry a remote pattern delete in the background on a bounded schedule
    fn spawn_invalidation_retry(&self, pattern: String) {
        let remote = Arc::clone(&self.remote);
        let retry = self.config.invalidation_retry.clone();
        let timeout = self.config.operation_timeout;

        tokio::spawn(async move {
            let result = retry_with_backoff(&retry, || {
                let remote = Arc::clone(&remote);
                let pattern = pattern.clone();
                async move {
                    match tokio::time::timeout(timeout, remote.delete_matching(&pattern)).await {
                        Ok(result) => result,
                        Err(_) => Err(StoreError::Timeout {
                            operation: "delete_matching",
                            timeout_ms: timeout.as_millis() as u64,
                        }),
                    }
                }
            })
            .await;

            match result {
                Ok(removed) => {
                    debug!(pattern = %pattern, removed, "Retried invalidation succeeded");
                }
                Err(e) => {
                    error!(
                        pattern = %pattern,
                        error = %e,
                        "Invalidation retries exhausted; stale entries will expire by TTL"
                    );
                }
            }
        });
    }
}

impl std::fmt::Debug for FallbackStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FallbackStore")
            .field("remote", &self.remote.backend_name())
            .field("mode", &self.mode())
            .finish()
    }
}

#[async_trait]
impl Store for FallbackStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        if !self.is_degraded()
            && let Ok(value) = self.remote_call("get", self.remote.get(key)).await
        {
            return Ok(value);
        }
        self.local.get(key).await
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), StoreError> {
        if !self.is_degraded() {
            match self
                .remote_call("set", self.remote.set(key, value.clone(), ttl))
                .await
            {
                Ok(()) => return Ok(()),
                Err(_) => return self.local.set(key, value, ttl).await,
            }
        }
        self.local.set(key, value, ttl).await
    }

    async fn delete_matching(&self, pattern: &str) -> Result<u64, StoreError> {
        // Best-effort entries may sit in the local store in either mode
        let local_removed = self.local.delete_matching(pattern).await?;

        if self.is_degraded() {
            self.remember_invalidation(pattern).await;
            return Ok(local_removed);
        }

        match self
            .remote_call("delete_matching", self.remote.delete_matching(pattern))
            .await
        {
            Ok(removed) => Ok(removed + local_removed),
            Err(e) => {
                warn!(pattern, error = %e, "Invalidation failed; scheduling retry");
                self.spawn_invalidation_retry(pattern.to_string());
                Ok(local_removed)
            }
        }
    }

    async fn increment(&self, key: &str, window: Duration) -> Result<WindowCount, StoreError> {
        if !self.is_degraded()
            && let Ok(count) = self
                .remote_call("increment", self.remote.increment(key, window))
                .await
        {
            return Ok(count);
        }
        self.local.increment(key, window).await
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "fallback"
    }
}
