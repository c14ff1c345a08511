//! Store and downstream doubles

use async_trait::async_trait;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use gatehouse_core::domain::{Downstream, HandlerResponse, RequestDescriptor};
use gatehouse_core::store::{LocalStore, Store, StoreError, WindowCount};

/// Remote store double whose availability can be switched at runtime
pub struct FlakyStore {
    inner: LocalStore,
    failing: AtomicBool,
    calls: AtomicU32,
}

impl FlakyStore {
    pub fn new(inner: LocalStore) -> Self {
        Self {
            inner,
            failing: AtomicBool::new(false),
            calls: AtomicU32::new(0),
        }
    }

    pub fn fail(&self) {
        self.failing.store(true, Ordering::SeqCst);
    }

    pub fn heal(&self) {
        self.failing.store(false, Ordering::SeqCst);
    }

    /// Calls that reached this store, failed or not
    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    /// The backing data, bypassing the failure switch
    pub fn inner(&self) -> &LocalStore {
        &self.inner
    }

    fn enter(&self) -> Result<(), StoreError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            Err(StoreError::Connection("connection refused".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl Store for FlakyStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        self.enter()?;
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), StoreError> {
        self.enter()?;
        self.inner.set(key, value, ttl).await
    }

    async fn delete_matching(&self, pattern: &str) -> Result<u64, StoreError> {
        self.enter()?;
        self.inner.delete_matching(pattern).await
    }

    async fn increment(&self, key: &str, window: Duration) -> Result<WindowCount, StoreError> {
        self.enter()?;
        self.inner.increment(key, window).await
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        self.enter()
    }

    fn backend_name(&self) -> &'static str {
        "flaky"
    }
}

/// Store double that never answers within any reasonable timeout
pub struct HangingStore;

#[async_trait]
impl Store for HangingStore {
    async fn get(&self, _key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        std::future::pending().await
    }

    async fn set(&self, _key: &str, _value: Vec<u8>, _ttl: Duration) -> Result<(), StoreError> {
        std::future::pending().await
    }

    async fn delete_matching(&self, _pattern: &str) -> Result<u64, StoreError> {
        std::future::pending().await
    }

    async fn increment(&self, _key: &str, _window: Duration) -> Result<WindowCount, StoreError> {
        std::future::pending().await
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        std::future::pending().await
    }

    fn backend_name(&self) -> &'static str {
        "hanging"
    }
}

/// Downstream that counts calls and echoes the request path
pub struct CountingDownstream {
    calls: AtomicU32,
    status: u16,
}

impl CountingDownstream {
    pub fn new(status: u16) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicU32::new(0),
            status,
        })
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Downstream for CountingDownstream {
    async fn call(&self, request: &RequestDescriptor) -> HandlerResponse {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        HandlerResponse::new(self.status, format!("{} {} v{}", request.method, request.path, n))
            .with_content_type("text/plain")
    }
}
