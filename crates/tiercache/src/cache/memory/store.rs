//! In-memory store with LRU eviction.
//!
//! Provides a thread-safe bounded store with write-based expiry using
//! tokio synchronization primitives and an LRU eviction policy. Backs every
//! L1 cache and, with the `memory` feature, the shared level as well.

use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use lru::LruCache;
use tokio::sync::RwLock;

use tiercache_core::cache::{CacheEntry, Result, Store};

/// A stored cache entry with optional expiration.
#[derive(Debug, Clone)]
struct Slot {
    entry: CacheEntry,
    expires_at: Option<Instant>,
}

impl Slot {
    fn new(entry: CacheEntry, ttl: Option<Duration>) -> Self {
        let expires_at = ttl.map(|d| Instant::now() + d);
        Self { entry, expires_at }
    }

    fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|exp| Instant::now() > exp)
    }
}

/// In-memory store for one logical cache.
///
/// Uses `Arc<RwLock<LruCache>>` for concurrent access. Expiry is counted from
/// the last write and checked lazily on read. Once `max_entries` is reached
/// the least recently used entry is dropped.
#[derive(Debug, Clone)]
pub struct MemoryStore {
    name: String,
    store: Arc<RwLock<LruCache<String, Slot>>>,
    ttl: Option<Duration>,
}

impl MemoryStore {
    /// Creates a store holding at most `max_entries` keys (at least one).
    ///
    /// `ttl` of `None` or zero keeps entries until they are evicted.
    pub fn new(name: impl Into<String>, max_entries: usize, ttl: Option<Duration>) -> Self {
        let capacity = NonZeroUsize::new(max_entries).unwrap_or(NonZeroUsize::MIN);
        Self {
            name: name.into(),
            store: Arc::new(RwLock::new(LruCache::new(capacity))),
            ttl: ttl.filter(|d| !d.is_zero()),
        }
    }

    /// Number of entries held, expired ones included until they are read.
    pub async fn len(&self) -> usize {
        self.store.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl Store for MemoryStore {
    fn name(&self) -> &str {
        &self.name
    }

    async fn get(&self, key: &str) -> Result<Option<CacheEntry>> {
        let mut store = self.store.write().await;

        let expired = match store.get(key) {
            Some(slot) if !slot.is_expired() => return Ok(Some(slot.entry.clone())),
            Some(_) => true,
            None => false,
        };
        if expired {
            store.pop(key);
        }
        Ok(None)
    }

    async fn put(&self, key: &str, entry: CacheEntry) -> Result<()> {
        let mut store = self.store.write().await;
        store.put(key.to_string(), Slot::new(entry, self.ttl));
        Ok(())
    }

    async fn evict(&self, key: &str) -> Result<()> {
        let mut store = self.store.write().await;
        store.pop(key);
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        let mut store = self.store.write().await;
        store.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    /// Default max entries for tests
    const TEST_MAX_ENTRIES: usize = 1000;

    fn entry(value: serde_json::Value) -> CacheEntry {
        CacheEntry::new(Some(value))
    }

    #[tokio::test]
    async fn test_put_and_get() {
        let store = MemoryStore::new("price", TEST_MAX_ENTRIES, None);
        let written = entry(json!({"amount": 10}));

        store.put("p1", written.clone()).await.unwrap();
        let result = store.get("p1").await.unwrap();

        assert_eq!(result, Some(written));
    }

    #[tokio::test]
    async fn test_get_nonexistent() {
        let store = MemoryStore::new("price", TEST_MAX_ENTRIES, None);
        assert_eq!(store.get("missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_null_marker_is_a_hit() {
        let store = MemoryStore::new("price", TEST_MAX_ENTRIES, None);

        store.put("p1", CacheEntry::new(None)).await.unwrap();
        let result = store.get("p1").await.unwrap();

        assert!(matches!(result, Some(CacheEntry { value: None, .. })));
    }

    #[tokio::test]
    async fn test_evict() {
        let store = MemoryStore::new("price", TEST_MAX_ENTRIES, None);

        store.put("p1", entry(json!(1))).await.unwrap();
        assert!(store.get("p1").await.unwrap().is_some());

        store.evict("p1").await.unwrap();
        assert!(store.get("p1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_evict_missing_key_is_ok() {
        let store = MemoryStore::new("price", TEST_MAX_ENTRIES, None);
        assert!(store.evict("never-written").await.is_ok());
    }

    #[tokio::test]
    async fn test_clear() {
        let store = MemoryStore::new("price", TEST_MAX_ENTRIES, None);

        store.put("p1", entry(json!(1))).await.unwrap();
        store.put("p2", entry(json!(2))).await.unwrap();
        store.clear().await.unwrap();

        assert!(store.is_empty().await);
        assert!(store.get("p1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_ttl_expiration() {
        let store = MemoryStore::new("price", TEST_MAX_ENTRIES, Some(Duration::from_millis(50)));

        store.put("p1", entry(json!(1))).await.unwrap();
        assert!(store.get("p1").await.unwrap().is_some());

        tokio::time::sleep(Duration::from_millis(100)).await;

        assert!(store.get("p1").await.unwrap().is_none());
        // Expired entries are dropped on read.
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_zero_ttl_never_expires() {
        let store = MemoryStore::new("price", TEST_MAX_ENTRIES, Some(Duration::ZERO));

        store.put("p1", entry(json!(1))).await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert!(store.get("p1").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_overwrite_value() {
        let store = MemoryStore::new("price", TEST_MAX_ENTRIES, None);

        store.put("p1", entry(json!("first"))).await.unwrap();
        store.put("p1", entry(json!("second"))).await.unwrap();

        let result = store.get("p1").await.unwrap().unwrap();
        assert_eq!(result.value, Some(json!("second")));
    }

    #[tokio::test]
    async fn test_lru_eviction() {
        let store = MemoryStore::new("price", 3, None);

        store.put("key1", entry(json!(1))).await.unwrap();
        store.put("key2", entry(json!(2))).await.unwrap();
        store.put("key3", entry(json!(3))).await.unwrap();

        // Access key1 to make it recently used
        store.get("key1").await.unwrap();

        // Insert a 4th entry - should evict key2 (least recently used)
        store.put("key4", entry(json!(4))).await.unwrap();

        assert!(store.get("key1").await.unwrap().is_some());
        assert!(store.get("key2").await.unwrap().is_none());
        assert!(store.get("key3").await.unwrap().is_some());
        assert!(store.get("key4").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_zero_max_entries_holds_one() {
        let store = MemoryStore::new("price", 0, None);

        store.put("key1", entry(json!(1))).await.unwrap();
        store.put("key2", entry(json!(2))).await.unwrap();

        assert_eq!(store.len().await, 1);
        assert!(store.get("key2").await.unwrap().is_some());
    }
}
