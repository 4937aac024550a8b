use std::error::Error as StdError;

use async_trait::async_trait;
use futures_util::future::BoxFuture;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::broadcast;

use super::{CacheEntry, CacheError, InvalidationMessage, Result};

/// Error type loaders may fail with.
pub type BoxError = Box<dyn StdError + Send + Sync>;

/// Source-of-truth call producing the value for a key.
///
/// `Ok(None)` means the source has no value; nothing is cached in that case.
pub type Loader =
    Box<dyn FnOnce() -> BoxFuture<'static, std::result::Result<Option<Value>, BoxError>> + Send>;

/// Boxes an async closure into a [`Loader`].
pub fn loader<F, Fut>(f: F) -> Loader
where
    F: FnOnce() -> Fut + Send + 'static,
    Fut: std::future::Future<Output = std::result::Result<Option<Value>, BoxError>> + Send + 'static,
{
    Box::new(move || Box::pin(f()))
}

/// A named cache as seen by callers.
#[async_trait]
pub trait Cache: Send + Sync {
    /// The logical cache name.
    fn name(&self) -> &str;

    /// Looks a key up without loading. `Ok(None)` covers both a missing key
    /// and a key cached as holding no value.
    async fn get(&self, key: &str) -> Result<Option<Value>>;

    /// Looks a key up, running `loader` when it is not cached.
    ///
    /// Loader failures surface as [`CacheError::RetrievalFailed`].
    async fn get_or_load(&self, key: &str, loader: Loader) -> Result<Option<Value>>;

    /// Stores a value. `None` stores the explicit no-value marker.
    async fn put(&self, key: &str, value: Option<Value>) -> Result<()>;

    /// Removes a key.
    async fn evict(&self, key: &str) -> Result<()>;

    /// Removes every key.
    async fn clear(&self) -> Result<()>;
}

/// Typed helpers over [`Cache`].
#[async_trait]
pub trait CacheExt: Cache {
    /// Returns the cached value deserialized as `T`.
    ///
    /// A value of a different shape is treated as a miss.
    async fn get_as<T>(&self, key: &str) -> Result<Option<T>>
    where
        T: DeserializeOwned + Send,
    {
        Ok(self
            .get(key)
            .await?
            .and_then(|value| serde_json::from_value(value).ok()))
    }

    /// Stores a serializable value.
    async fn put_as<T>(&self, key: &str, value: &T) -> Result<()>
    where
        T: Serialize + Sync,
    {
        let value =
            serde_json::to_value(value).map_err(|e| CacheError::Serialization(e.to_string()))?;
        self.put(key, Some(value)).await
    }

    /// Typed [`Cache::get_or_load`]. The loader output is serialized for
    /// storage; a cached value of a different shape is treated as a miss.
    async fn get_or_load_with<T, F, Fut>(&self, key: &str, load: F) -> Result<Option<T>>
    where
        T: Serialize + DeserializeOwned + Send + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: std::future::Future<Output = std::result::Result<Option<T>, BoxError>> + Send + 'static,
    {
        let loader = loader(move || async move {
            let value = match load().await? {
                Some(value) => Some(serde_json::to_value(value)?),
                None => None,
            };
            Ok::<_, BoxError>(value)
        });
        Ok(self
            .get_or_load(key, loader)
            .await?
            .and_then(|value| serde_json::from_value(value).ok()))
    }
}

impl<C: Cache + ?Sized> CacheExt for C {}

/// One level of the cache: a key/value store of [`CacheEntry`]s for a single
/// logical cache.
#[async_trait]
pub trait Store: Send + Sync {
    /// The logical cache this store belongs to.
    fn name(&self) -> &str;

    async fn get(&self, key: &str) -> Result<Option<CacheEntry>>;

    async fn put(&self, key: &str, entry: CacheEntry) -> Result<()>;

    async fn evict(&self, key: &str) -> Result<()>;

    async fn clear(&self) -> Result<()>;
}

/// Hands out the [`Store`] for each logical cache of one level.
pub trait StoreProvider: Send + Sync {
    /// Returns the store for `name`, or `None` when this level does not know it.
    fn store(&self, name: &str) -> Option<std::sync::Arc<dyn Store>>;

    /// Names of every logical cache this level knows about.
    fn names(&self) -> Vec<String>;
}

/// Sends invalidation events to peer instances.
///
/// Implementations must not block the caller on the transport and must not
/// fail: delivery problems are logged and dropped.
pub trait InvalidationPublisher: Send + Sync {
    fn publish(&self, message: InvalidationMessage);

    fn publish_evict(&self, cache: &str, key: &str) {
        self.publish(InvalidationMessage::evict(cache, key));
    }

    fn publish_clear(&self, cache: &str) {
        self.publish(InvalidationMessage::clear(cache));
    }

    fn publish_clear_all(&self) {
        self.publish(InvalidationMessage::ClearAll);
    }
}

/// Text pub/sub channel underneath the invalidation bus.
#[async_trait]
pub trait PubSubTransport: Send + Sync {
    /// Publishes one payload on `channel`.
    async fn publish(&self, channel: &str, payload: &str) -> Result<()>;

    /// Subscribes to `channel`. The receiver closes when the underlying
    /// subscription ends; callers resubscribe to recover.
    async fn subscribe(&self, channel: &str) -> Result<broadcast::Receiver<String>>;
}
