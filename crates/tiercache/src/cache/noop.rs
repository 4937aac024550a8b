//! Cache that stores nothing.
//!
//! Handed out for every name when caching is disabled, so callers keep the
//! same code path and simply always hit the source.

use async_trait::async_trait;
use serde_json::Value;

use tiercache_core::cache::{Cache, CacheError, Loader, Result};

pub struct NoOpCache {
    name: String,
}

impl NoOpCache {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

#[async_trait]
impl Cache for NoOpCache {
    fn name(&self) -> &str {
        &self.name
    }

    async fn get(&self, _key: &str) -> Result<Option<Value>> {
        Ok(None)
    }

    async fn get_or_load(&self, key: &str, loader: Loader) -> Result<Option<Value>> {
        loader().await.map_err(|err| CacheError::RetrievalFailed {
            key: key.to_string(),
            cause: err.to_string(),
        })
    }

    async fn put(&self, _key: &str, _value: Option<Value>) -> Result<()> {
        Ok(())
    }

    async fn evict(&self, _key: &str) -> Result<()> {
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use serde_json::json;
    use tiercache_core::cache::{loader, BoxError};

    #[tokio::test]
    async fn test_always_calls_loader() {
        let cache = NoOpCache::new("price");
        let calls = Arc::new(AtomicUsize::new(0));

        for _ in 0..2 {
            let calls = Arc::clone(&calls);
            let value = cache
                .get_or_load(
                    "p1",
                    loader(move || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        Ok::<_, BoxError>(Some(json!(1)))
                    }),
                )
                .await
                .unwrap();
            assert_eq!(value, Some(json!(1)));
        }

        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_never_stores() {
        let cache = NoOpCache::new("price");

        cache.put("p1", Some(json!(1))).await.unwrap();

        assert_eq!(cache.get("p1").await.unwrap(), None);
        assert!(cache.evict("p1").await.is_ok());
        assert!(cache.clear().await.is_ok());
    }
}
