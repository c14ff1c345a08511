//! Dragonfly/Redis store backend
//!
//! Dragonfly speaks the Redis protocol, so this works against either. Every command
//! is bounded by the configured operation timeout; a timed-out command surfaces as
//! [`StoreError::Timeout`] and counts as a backend failure upstream.
// cspell:ignore Dragonfly PEXPIRE UNLINK

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use super::{Store, StoreError, WindowCount, window_key, window_millis, window_start};
use crate::clock::{Clock, system_clock};

/// Keys outlive their window by this much so a late reader still sees the final count
const WINDOW_EXPIRY_GRACE_MS: u64 = 1_000;

/// Increment the window counter and set its expiry on creation, atomically
const INCREMENT_SCRIPT: &str = r#"
local count = redis.call('INCR', KEYS[1])
if count == 1 then
    redis.call('PEXPIRE', KEYS[1], ARGV[1])
end
return count
"#;

/// Dragonfly-backed store
///
/// The connection is established lazily and re-established after a failed
/// connect, so a store created while the backend is down recovers on its own
/// once the backend comes back.
pub struct DragonflyStore {
    client: redis::Client,
    connection_manager: RwLock<Option<ConnectionManager>>,
    increment_script: redis::Script,
    connect_timeout: Duration,
    operation_timeout: Duration,
    scan_batch_size: usize,
    clock: Arc<dyn Clock>,
}

impl DragonflyStore {
    /// Create a store without connecting yet
    ///
    /// # Arguments
    /// * `url` - Connection URL (e.g., "redis://127.0.0.1:6379")
    /// * `connect_timeout` - Upper bound for establishing the connection
    /// * `operation_timeout` - Upper bound for every subsequent command
    /// * `scan_batch_size` - `COUNT` hint for pattern deletes
    pub fn new(
        url: &str,
        connect_timeout: Duration,
        operation_timeout: Duration,
        scan_batch_size: usize,
    ) -> Result<Self, StoreError> {
        let client = redis::Client::open(url).map_err(|e| {
            warn!("Failed to create Redis client for the store: {}", e);
            StoreError::Connection(format!("Failed to create Redis client: {}", e))
        })?;

        Ok(Self {
            client,
            connection_manager: RwLock::new(None),
            increment_script: redis::Script::new(INCREMENT_SCRIPT),
            connect_timeout,
            operation_timeout,
            scan_batch_size: scan_batch_size.max(1),
            clock: system_clock(),
        })
    }

    /// Create a store and verify the connection with `PING`
    pub async fn connect(
        url: &str,
        connect_timeout: Duration,
        operation_timeout: Duration,
        scan_batch_size: usize,
    ) -> Result<Self, StoreError> {
        let store = Self::new(url, connect_timeout, operation_timeout, scan_batch_size)?;
        store.health_check().await?;
        debug!("Successfully connected to Dragonfly at {}", url);
        Ok(store)
    }

    /// Shared connection, establishing it on first use
    async fn connection(&self) -> Result<ConnectionManager, StoreError> {
        if let Some(manager) = self.connection_manager.read().await.as_ref() {
            return Ok(manager.clone());
        }

        let mut slot = self.connection_manager.write().await;
        if let Some(manager) = slot.as_ref() {
            return Ok(manager.clone());
        }

        let manager = match tokio::time::timeout(
            self.connect_timeout,
            ConnectionManager::new(self.client.clone()),
        )
        .await
        {
            Ok(Ok(manager)) => manager,
            Ok(Err(e)) => {
                warn!("Failed to create connection manager for the store: {}", e);
                return Err(StoreError::Connection(format!(
                    "Failed to create connection manager: {}",
                    e
                )));
            }
            Err(_) => {
                return Err(StoreError::Timeout {
                    operation: "connect",
                    timeout_ms: self.connect_timeout.as_millis() as u64,
                });
            }
        };

        *slot = Some(manager.clone());
        Ok(manager)
    }

    /// Run a command under the operation timeout
    async fn timed<T, F>(&self, operation: &'static str, command: F) -> Result<T, StoreError>
    where
        F: Future<Output = redis::RedisResult<T>>,
    {
        match tokio::time::timeout(self.operation_timeout, command).await {
            Ok(result) => result.map_err(StoreError::from),
            Err(_) => Err(StoreError::Timeout {
                operation,
                timeout_ms: self.operation_timeout.as_millis() as u64,
            }),
        }
    }
}

impl std::fmt::Debug for DragonflyStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DragonflyStore")
            .field("connect_timeout", &self.connect_timeout)
            .field("operation_timeout", &self.operation_timeout)
            .field("scan_batch_size", &self.scan_batch_size)
            .finish()
    }
}

#[async_trait]
impl Store for DragonflyStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let mut conn = self.connection().await?;
        self.timed(
            "get",
            redis::cmd("GET")
                .arg(key)
                .query_async::<Option<Vec<u8>>>(&mut conn),
        )
        .await
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), StoreError> {
        let mut conn = self.connection().await?;
        let ttl_ms = (ttl.as_millis() as u64).max(1);
        self.timed(
            "set",
            redis::cmd("SET")
                .arg(key)
                .arg(value)
                .arg("PX")
                .arg(ttl_ms)
                .query_async::<()>(&mut conn),
        )
        .await
    }

    async fn delete_matching(&self, pattern: &str) -> Result<u64, StoreError> {
        let mut conn = self.connection().await?;
        let mut cursor: u64 = 0;
        let mut removed: u64 = 0;

        loop {
            let (next_cursor, keys): (u64, Vec<String>) = self
                .timed(
                    "scan",
                    redis::cmd("SCAN")
                        .arg(cursor)
                        .arg("MATCH")
                        .arg(pattern)
                        .arg("COUNT")
                        .arg(self.scan_batch_size)
                        .query_async(&mut conn),
                )
                .await?;

            if !keys.is_empty() {
                let unlinked: u64 = self
                    .timed(
                        "unlink",
                        redis::cmd("UNLINK").arg(&keys).query_async(&mut conn),
                    )
                    .await?;
                removed += unlinked;
            }

            if next_cursor == 0 {
                break;
            }
            cursor = next_cursor;
        }

        debug!(pattern, removed, "Deleted keys matching pattern");
        Ok(removed)
    }

    async fn increment(&self, key: &str, window: Duration) -> Result<WindowCount, StoreError> {
        let mut conn = self.connection().await?;
        let now = self.clock.now_millis();
        let window_start_ms = window_start(now, window);
        let counter_key = window_key(key, window_start_ms);
        let expire_ms = window_start_ms + window_millis(window) - now + WINDOW_EXPIRY_GRACE_MS;

        let mut invocation = self.increment_script.key(&counter_key);
        invocation.arg(expire_ms);
        let count: u64 = self
            .timed("increment", invocation.invoke_async(&mut conn))
            .await?;

        Ok(WindowCount {
            count,
            window_start_ms,
        })
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        let mut conn = self.connection().await?;
        let reply: String = self
            .timed("ping", redis::cmd("PING").query_async(&mut conn))
            .await?;
        if reply.eq_ignore_ascii_case("PONG") {
            Ok(())
        } else {
            Err(StoreError::Command(format!("unexpected PING reply: {}", reply)))
        }
    }

    fn backend_name(&self) -> &'static str {
        "dragonfly"
    }
}
