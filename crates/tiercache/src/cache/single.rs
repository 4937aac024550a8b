//! Cache over a single store.
//!
//! Used when only one level is configured for a name. No soft TTL, no
//! single flight and no invalidation messages: the loader runs directly on
//! every miss.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use serde_json::Value;

use tiercache_core::cache::{Cache, CacheEntry, CacheError, Loader, Result, Store};

use crate::metrics::{CacheMetrics, Level, Outcome, RefreshPhase};

pub struct SingleLevelCache {
    store: Arc<dyn Store>,
    level: Level,
    metrics: CacheMetrics,
}

impl SingleLevelCache {
    pub fn new(store: Arc<dyn Store>, level: Level) -> Self {
        let metrics = CacheMetrics::new(store.name());
        Self {
            store,
            level,
            metrics,
        }
    }

    pub fn level(&self) -> Level {
        self.level
    }
}

#[async_trait]
impl Cache for SingleLevelCache {
    fn name(&self) -> &str {
        self.store.name()
    }

    async fn get(&self, key: &str) -> Result<Option<Value>> {
        match self.store.get(key).await? {
            Some(entry) => {
                self.metrics.lookup(self.level, Outcome::Hit);
                Ok(entry.value)
            }
            None => {
                self.metrics.lookup(self.level, Outcome::Miss);
                Ok(None)
            }
        }
    }

    async fn get_or_load(&self, key: &str, loader: Loader) -> Result<Option<Value>> {
        if let Some(entry) = self.store.get(key).await? {
            self.metrics.lookup(self.level, Outcome::Hit);
            return Ok(entry.value);
        }
        self.metrics.lookup(self.level, Outcome::Miss);

        self.metrics.refresh(RefreshPhase::Started);
        let started = Instant::now();
        let loaded = loader().await;
        self.metrics.loader_duration(started.elapsed());

        let value = loaded.map_err(|err| {
            self.metrics.refresh(RefreshPhase::Failure);
            CacheError::RetrievalFailed {
                key: key.to_string(),
                cause: err.to_string(),
            }
        })?;

        if let Some(value) = &value {
            self.store
                .put(key, CacheEntry::new(Some(value.clone())))
                .await?;
        }
        self.metrics.refresh(RefreshPhase::Success);
        Ok(value)
    }

    async fn put(&self, key: &str, value: Option<Value>) -> Result<()> {
        self.store.put(key, CacheEntry::new(value)).await
    }

    async fn evict(&self, key: &str) -> Result<()> {
        self.metrics.eviction();
        self.store.evict(key).await
    }

    async fn clear(&self) -> Result<()> {
        self.metrics.clear();
        self.store.clear().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use serde_json::json;
    use tiercache_core::cache::{loader, BoxError};

    use crate::cache::memory::MemoryStore;

    fn cache() -> SingleLevelCache {
        SingleLevelCache::new(Arc::new(MemoryStore::new("price", 100, None)), Level::L1)
    }

    #[tokio::test]
    async fn test_loads_on_miss_then_hits() {
        let cache = cache();
        let calls = Arc::new(AtomicUsize::new(0));

        for _ in 0..3 {
            let calls = Arc::clone(&calls);
            let value = cache
                .get_or_load(
                    "p1",
                    loader(move || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        Ok::<_, BoxError>(Some(json!(9)))
                    }),
                )
                .await
                .unwrap();
            assert_eq!(value, Some(json!(9)));
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_loader_failure() {
        let cache = cache();

        let err = cache
            .get_or_load(
                "p1",
                loader(|| async { Err::<Option<Value>, BoxError>("timeout".into()) }),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, CacheError::RetrievalFailed { .. }));
    }

    #[tokio::test]
    async fn test_put_evict_clear() {
        let cache = cache();

        cache.put("p1", Some(json!(1))).await.unwrap();
        cache.put("p2", None).await.unwrap();
        assert_eq!(cache.get("p1").await.unwrap(), Some(json!(1)));
        assert_eq!(cache.get("p2").await.unwrap(), None);

        cache.evict("p1").await.unwrap();
        assert_eq!(cache.get("p1").await.unwrap(), None);

        cache.clear().await.unwrap();
        assert_eq!(cache.name(), "price");
        assert_eq!(cache.level(), Level::L1);
    }
}
