//! In-process store used while the shared backend is unavailable
//!
//! Entries live in a fixed number of shards, each behind its own lock, so unrelated
//! keys never contend on a single global mutex while same-key operations (notably
//! window increments) are serialized. Capacity is bounded: a full shard first drops
//! expired entries, then the cached value closest to expiry. Live window counters
//! are only evicted to make room for another counter.

use async_trait::async_trait;
use std::collections::HashMap;
use std::collections::hash_map::RandomState;
use std::hash::BuildHasher;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::pattern::glob_match;
use super::{Store, StoreError, WindowCount, window_key, window_millis, window_start};
use crate::clock::{Clock, system_clock};

/// Default number of lock shards
pub const DEFAULT_SHARDS: usize = 16;

#[derive(Debug, Clone)]
enum LocalValue {
    Bytes(Vec<u8>),
    Counter(u64),
}

#[derive(Debug, Clone)]
struct LocalEntry {
    value: LocalValue,
    expires_at_ms: u64,
}

impl LocalEntry {
    fn is_live(&self, now_ms: u64) -> bool {
        now_ms < self.expires_at_ms
    }
}

#[derive(Debug, Default)]
struct Shard {
    entries: HashMap<String, LocalEntry>,
}

impl LocalValue {
    fn is_counter(&self) -> bool {
        matches!(self, LocalValue::Counter(_))
    }
}

impl Shard {
    /// Make room for one more key, preferring expired entries
    ///
    /// Cached bytes are evicted before any live window counter. A byte value
    /// never displaces a counter; `false` means no room could be made for it.
    fn make_room(&mut self, capacity: usize, now_ms: u64, for_counter: bool) -> bool {
        if self.entries.len() < capacity {
            return true;
        }

        self.entries.retain(|_, entry| entry.is_live(now_ms));

        while self.entries.len() >= capacity {
            let victim = self
                .entries
                .iter()
                .filter(|(_, entry)| for_counter || !entry.value.is_counter())
                .min_by_key(|(_, entry)| (entry.value.is_counter(), entry.expires_at_ms))
                .map(|(key, _)| key.clone());
            match victim {
                Some(key) => {
                    self.entries.remove(&key);
                }
                None => return false,
            }
        }
        true
    }
}

/// Sharded, bounded, TTL-aware in-memory store
pub struct LocalStore {
    shards: Vec<Mutex<Shard>>,
    shard_capacity: usize,
    hasher: RandomState,
    clock: Arc<dyn Clock>,
}

impl LocalStore {
    /// Create a local store holding at most `max_entries` keys across `shards` locks
    pub fn new(max_entries: usize, shards: usize) -> Self {
        Self::with_clock(max_entries, shards, system_clock())
    }

    /// Create a local store driven by a custom clock (for testing)
    pub fn with_clock(max_entries: usize, shards: usize, clock: Arc<dyn Clock>) -> Self {
        let shards = shards.max(1);
        let shard_capacity = max_entries.div_ceil(shards).max(1);

        Self {
            shards: (0..shards).map(|_| Mutex::new(Shard::default())).collect(),
            shard_capacity,
            hasher: RandomState::new(),
            clock,
        }
    }

    fn shard_for(&self, key: &str) -> &Mutex<Shard> {
        let index = self.hasher.hash_one(key) as usize % self.shards.len();
        &self.shards[index]
    }

    /// Number of live entries
    pub async fn len(&self) -> usize {
        let now = self.clock.now_millis();
        let mut total = 0;
        for shard in &self.shards {
            let shard = shard.lock().await;
            total += shard.entries.values().filter(|e| e.is_live(now)).count();
        }
        total
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Drop every entry
    pub async fn clear(&self) {
        for shard in &self.shards {
            shard.lock().await.entries.clear();
        }
    }

    /// Remove expired entries, returning how many were dropped
    pub async fn purge_expired(&self) -> usize {
        let now = self.clock.now_millis();
        let mut removed = 0;
        for shard in &self.shards {
            let mut shard = shard.lock().await;
            let before = shard.entries.len();
            shard.entries.retain(|_, entry| entry.is_live(now));
            removed += before - shard.entries.len();
        }
        removed
    }

    /// Periodically purge expired entries until `shutdown` is cancelled
    pub fn start_cleanup_task(self: Arc<Self>, every: Duration, shutdown: CancellationToken) {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        let removed = self.purge_expired().await;
                        if removed > 0 {
                            debug!(removed, "Local store cleanup completed");
                        }
                    }
                    _ = shutdown.cancelled() => {
                        debug!("Local store cleanup task stopped");
                        return;
                    }
                }
            }
        });
    }
}

impl Default for LocalStore {
    fn default() -> Self {
        Self::new(10_000, DEFAULT_SHARDS)
    }
}

impl std::fmt::Debug for LocalStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalStore")
            .field("shards", &self.shards.len())
            .field("shard_capacity", &self.shard_capacity)
            .finish()
    }
}

#[async_trait]
impl Store for LocalStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let now = self.clock.now_millis();
        let mut shard = self.shard_for(key).lock().await;

        let value = match shard.entries.get(key) {
            Some(entry) if entry.is_live(now) => match &entry.value {
                LocalValue::Bytes(bytes) => Some(bytes.clone()),
                LocalValue::Counter(count) => Some(count.to_string().into_bytes()),
            },
            _ => None,
        };

        if value.is_none() {
            shard.entries.remove(key);
        }
        Ok(value)
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), StoreError> {
        let now = self.clock.now_millis();
        let mut shard = self.shard_for(key).lock().await;

        if !shard.entries.contains_key(key) && !shard.make_room(self.shard_capacity, now, false) {
            debug!(key, "Local store shard full of counters; value not stored");
            return Ok(());
        }
        shard.entries.insert(
            key.to_string(),
            LocalEntry {
                value: LocalValue::Bytes(value),
                expires_at_ms: now + ttl.as_millis() as u64,
            },
        );
        Ok(())
    }

    async fn delete_matching(&self, pattern: &str) -> Result<u64, StoreError> {
        let mut removed = 0u64;
        for shard in &self.shards {
            let mut shard = shard.lock().await;
            let before = shard.entries.len();
            shard.entries.retain(|key, _| !glob_match(pattern, key));
            removed += (before - shard.entries.len()) as u64;
        }
        Ok(removed)
    }

    async fn increment(&self, key: &str, window: Duration) -> Result<WindowCount, StoreError> {
        let now = self.clock.now_millis();
        let window_start_ms = window_start(now, window);
        let counter_key = window_key(key, window_start_ms);
        let expires_at_ms = window_start_ms + window_millis(window);

        let mut shard = self.shard_for(&counter_key).lock().await;

        let current = match shard.entries.get(&counter_key) {
            Some(LocalEntry {
                value: LocalValue::Counter(count),
                expires_at_ms: live_until,
            }) if now < *live_until => *count,
            _ => 0,
        };

        if current == 0 && !shard.entries.contains_key(&counter_key) {
            shard.make_room(self.shard_capacity, now, true);
        }

        let count = current + 1;
        shard.entries.insert(
            counter_key,
            LocalEntry {
                value: LocalValue::Counter(count),
                expires_at_ms,
            },
        );

        Ok(WindowCount {
            count,
            window_start_ms,
        })
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "local"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn store_with_clock(max_entries: usize) -> (LocalStore, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(1_700_000_000_000));
        let store = LocalStore::with_clock(max_entries, 4, clock.clone());
        (store, clock)
    }

    #[tokio::test]
    async fn test_set_get_and_expiry() {
        let (store, clock) = store_with_clock(100);

        store
            .set("cache:GET:/items/1", b"payload".to_vec(), Duration::from_secs(10))
            .await
            .unwrap();
        assert_eq!(
            store.get("cache:GET:/items/1").await.unwrap(),
            Some(b"payload".to_vec())
        );

        clock.advance(Duration::from_secs(10));
        assert!(store.get("cache:GET:/items/1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_increment_counts_within_window() {
        let (store, _clock) = store_with_clock(100);
        let window = Duration::from_secs(60);

        let first = store.increment("rl:user", window).await.unwrap();
        let second = store.increment("rl:user", window).await.unwrap();

        assert_eq!(first.count, 1);
        assert_eq!(second.count, 2);
        assert_eq!(first.window_start_ms, second.window_start_ms);
        assert_eq!(first.window_start_ms % 60_000, 0);
    }

    #[tokio::test]
    async fn test_increment_resets_in_next_window() {
        let (store, clock) = store_with_clock(100);
        let window = Duration::from_secs(60);

        let first = store.increment("rl:user", window).await.unwrap();
        clock.advance(window);
        let next = store.increment("rl:user", window).await.unwrap();

        assert_eq!(next.count, 1);
        assert_eq!(next.window_start_ms, first.window_start_ms + 60_000);
    }

    #[tokio::test]
    async fn test_concurrent_increments_are_linearized() {
        let clock = Arc::new(ManualClock::new(1_700_000_000_000));
        let store = Arc::new(LocalStore::with_clock(1_000, 8, clock));
        let mut handles = Vec::new();
        for _ in 0..50 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store
                    .increment("rl:shared", Duration::from_secs(3600))
                    .await
                    .unwrap()
                    .count
            }));
        }

        let mut counts = Vec::new();
        for handle in handles {
            counts.push(handle.await.unwrap());
        }
        counts.sort_unstable();
        assert_eq!(counts, (1..=50).collect::<Vec<u64>>());
    }

    #[tokio::test]
    async fn test_delete_matching_removes_only_matches() {
        let (store, _clock) = store_with_clock(100);
        let ttl = Duration::from_secs(60);
        for key in [
            "cache:GET:/items/42",
            "cache:GET:/items/42?page=2",
            "cache:GET:/items/7",
            "cache:GET:/users/42",
        ] {
            store.set(key, b"x".to_vec(), ttl).await.unwrap();
        }

        let removed = store.delete_matching("cache:GET:/items/42*").await.unwrap();

        assert_eq!(removed, 2);
        assert!(store.get("cache:GET:/items/7").await.unwrap().is_some());
        assert!(store.get("cache:GET:/users/42").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_capacity_is_bounded() {
        let clock = Arc::new(ManualClock::new(0));
        let store = LocalStore::with_clock(4, 1, clock.clone());

        for i in 0..10u64 {
            store
                .set(&format!("k{i}"), vec![0], Duration::from_secs(100 + i))
                .await
                .unwrap();
        }

        assert_eq!(store.len().await, 4);
        // The entries closest to expiry were evicted first
        assert!(store.get("k0").await.unwrap().is_none());
        assert!(store.get("k9").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_cache_writes_never_evict_live_counters() {
        let clock = Arc::new(ManualClock::new(0));
        let store = LocalStore::with_clock(2, 1, clock.clone());
        let window = Duration::from_secs(60);
        let ttl = Duration::from_secs(300);

        assert_eq!(store.increment("rl:standard:alice", window).await.unwrap().count, 1);
        assert_eq!(store.increment("rl:standard:alice", window).await.unwrap().count, 2);
        store.set("cache:GET:/a", vec![1], ttl).await.unwrap();
        store.set("cache:GET:/b", vec![2], ttl).await.unwrap();

        let third = store.increment("rl:standard:alice", window).await.unwrap();
        assert_eq!(third.count, 3);
        assert!(store.get("cache:GET:/b").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_counter_only_shard_skips_cache_writes() {
        let clock = Arc::new(ManualClock::new(0));
        let store = LocalStore::with_clock(2, 1, clock.clone());
        let window = Duration::from_secs(60);

        store.increment("rl:a", window).await.unwrap();
        store.increment("rl:b", window).await.unwrap();
        store
            .set("cache:GET:/a", vec![1], Duration::from_secs(300))
            .await
            .unwrap();

        assert!(store.get("cache:GET:/a").await.unwrap().is_none());
        assert_eq!(store.increment("rl:a", window).await.unwrap().count, 2);
        assert_eq!(store.increment("rl:b", window).await.unwrap().count, 2);
    }

    #[tokio::test]
    async fn test_purge_and_clear() {
        let (store, clock) = store_with_clock(100);
        store
            .set("short", vec![1], Duration::from_secs(1))
            .await
            .unwrap();
        store
            .set("long", vec![1], Duration::from_secs(100))
            .await
            .unwrap();

        clock.advance(Duration::from_secs(2));
        assert_eq!(store.purge_expired().await, 1);
        assert_eq!(store.len().await, 1);

        store.clear().await;
        assert!(store.is_empty().await);
    }
}
