//! Composition root.
//!
//! Builds the L1 registry, the breaker-wrapped L2 provider, the invalidation
//! publisher and subscriber, and the cache registry on top of them.

use std::sync::Arc;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use tiercache_core::cache::{
    Cache, InvalidationPublisher, PubSubTransport, Result, StoreProvider,
};

use crate::cache::{
    BreakerStoreProvider, CacheRegistry, ChannelPublisher, CircuitBreaker, InvalidationSubscriber,
    MemoryStoreRegistry, DEFAULT_BREAKER_NAME,
};
use crate::config::Config;

/// Every long-lived cache component of a process.
pub struct CacheStack {
    registry: Arc<CacheRegistry>,
    l1: Option<Arc<MemoryStoreRegistry>>,
    breaker: Option<Arc<CircuitBreaker>>,
    publisher: Option<Arc<ChannelPublisher>>,
    subscriber: Option<JoinHandle<()>>,
    shutdown_tx: broadcast::Sender<()>,
}

impl CacheStack {
    /// Wires every component described by `config`.
    ///
    /// Spawns the invalidation subscriber, so it must be called from within a
    /// tokio runtime.
    pub async fn build(config: &Config) -> Result<Self> {
        let (shutdown_tx, _) = broadcast::channel(1);

        if !config.enabled {
            tracing::info!("Caching disabled, all caches are no-ops");
            return Ok(Self {
                registry: Arc::new(CacheRegistry::disabled()),
                l1: None,
                breaker: None,
                publisher: None,
                subscriber: None,
                shutdown_tx,
            });
        }

        let l1 = config.l1_enabled.then(|| Arc::new(l1_registry(config)));

        let mut breaker = None;
        let l2: Option<Arc<dyn StoreProvider>> = if config.l2_enabled {
            let cb = Arc::new(
                CircuitBreaker::new(DEFAULT_BREAKER_NAME, config.breaker_settings())
                    .with_call_timeout(config.l2_timeout()),
            );
            let inner = backend::shared_stores(config).await?;
            breaker = Some(Arc::clone(&cb));
            Some(Arc::new(BreakerStoreProvider::new(inner, cb)))
        } else {
            None
        };

        let mut publisher = None;
        let mut subscriber = None;
        if config.invalidation_enabled {
            let transport = backend::transport(config).await?;
            publisher = Some(Arc::new(ChannelPublisher::new(
                Arc::clone(&transport),
                config.invalidation_channel.clone(),
            )));

            if let Some(l1) = &l1 {
                let handle = InvalidationSubscriber::new(Arc::clone(l1)).spawn(
                    transport,
                    config.invalidation_channel.clone(),
                    shutdown_tx.subscribe(),
                );
                subscriber = Some(handle);
            }
        }

        let registry = CacheRegistry::new(
            l1.clone().map(|l1| l1 as Arc<dyn StoreProvider>),
            l2,
        )
        .with_publisher(
            publisher
                .clone()
                .map(|p| p as Arc<dyn InvalidationPublisher>),
        )
        .with_soft_ttl(config.soft_ttl())
        .with_l2_failure_policy(config.l2_failure_policy);

        tracing::info!(
            l1 = config.l1_enabled,
            l2 = config.l2_enabled,
            invalidation = config.invalidation_enabled,
            soft_ttl_ms = config.soft_ttl().map(|d| d.as_millis() as u64),
            l2_failure_policy = %config.l2_failure_policy,
            "Cache stack ready"
        );

        Ok(Self {
            registry: Arc::new(registry),
            l1,
            breaker,
            publisher,
            subscriber,
            shutdown_tx,
        })
    }

    pub fn registry(&self) -> &Arc<CacheRegistry> {
        &self.registry
    }

    pub fn get_cache(&self, name: &str) -> Option<Arc<dyn Cache>> {
        self.registry.get_cache(name)
    }

    pub fn cache_names(&self) -> Vec<String> {
        self.registry.cache_names()
    }

    pub fn l1(&self) -> Option<&Arc<MemoryStoreRegistry>> {
        self.l1.as_ref()
    }

    pub fn breaker(&self) -> Option<&Arc<CircuitBreaker>> {
        self.breaker.as_ref()
    }

    pub fn publisher(&self) -> Option<&Arc<ChannelPublisher>> {
        self.publisher.as_ref()
    }

    /// Stops the invalidation subscriber and waits for it to exit.
    pub async fn shutdown(mut self) {
        let _ = self.shutdown_tx.send(());
        if let Some(handle) = self.subscriber.take() {
            if let Err(err) = handle.await {
                tracing::error!(error = %err, "Invalidation subscriber task failed");
            }
        }
    }
}

fn l1_registry(config: &Config) -> MemoryStoreRegistry {
    let ttl = Some(config.l1_ttl());
    if config.cache_names.is_empty() {
        MemoryStoreRegistry::dynamic(config.l1_max_entries, ttl)
    } else {
        MemoryStoreRegistry::fixed(config.cache_names.iter().cloned(), config.l1_max_entries, ttl)
    }
}

#[cfg(feature = "memory")]
mod backend {
    use super::*;

    use crate::cache::MemoryPubSub;

    /// In-process shared level with the same name set as L1.
    pub(super) async fn shared_stores(config: &Config) -> Result<Arc<dyn StoreProvider>> {
        let ttl = Some(config.l2_ttl());
        let stores = if config.cache_names.is_empty() {
            MemoryStoreRegistry::dynamic(config.l1_max_entries, ttl)
        } else {
            MemoryStoreRegistry::fixed(
                config.cache_names.iter().cloned(),
                config.l1_max_entries,
                ttl,
            )
        };
        Ok(Arc::new(stores))
    }

    pub(super) async fn transport(_config: &Config) -> Result<Arc<dyn PubSubTransport>> {
        Ok(Arc::new(MemoryPubSub::new()))
    }
}

#[cfg(feature = "redis")]
mod backend {
    use super::*;

    use crate::cache::{RedisPubSub, RedisStoreProvider};

    pub(super) async fn shared_stores(config: &Config) -> Result<Arc<dyn StoreProvider>> {
        let provider = RedisStoreProvider::connect(&config.redis_url, Some(config.l2_ttl()))
            .await?
            .with_names(config.cache_names.iter().cloned());
        tracing::info!(url = %config.redis_url, "Connected shared store");
        Ok(Arc::new(provider))
    }

    pub(super) async fn transport(config: &Config) -> Result<Arc<dyn PubSubTransport>> {
        Ok(Arc::new(RedisPubSub::new(&config.redis_url).await?))
    }
}

#[cfg(all(test, feature = "memory"))]
mod tests {
    use super::*;
    use std::time::Duration;

    use serde_json::json;
    use tiercache_core::cache::{loader, BoxError, Store};

    fn config() -> Config {
        Config {
            cache_names: vec!["price".to_string(), "stock".to_string()],
            ..Config::default()
        }
    }

    #[tokio::test]
    async fn test_build_wires_composite_caches() {
        let stack = CacheStack::build(&config()).await.unwrap();

        assert_eq!(stack.cache_names(), vec!["price", "stock"]);
        assert!(stack.breaker().is_some());
        assert!(stack.publisher().is_some());

        let cache = stack.get_cache("price").unwrap();
        let value = cache
            .get_or_load(
                "p1",
                loader(|| async { Ok::<_, BoxError>(Some(json!(10))) }),
            )
            .await
            .unwrap();
        assert_eq!(value, Some(json!(10)));
        assert_eq!(cache.get("p1").await.unwrap(), Some(json!(10)));
        assert!(stack.get_cache("catalog").is_none());

        stack.shutdown().await;
    }

    #[tokio::test]
    async fn test_published_clear_reaches_local_l1() {
        let stack = CacheStack::build(&config()).await.unwrap();
        let l1 = Arc::clone(stack.l1().unwrap());
        let stock = l1.lookup("stock").unwrap();

        let mut cleared = false;
        for _ in 0..50 {
            stock
                .put("s1", tiercache_core::cache::CacheEntry::new(Some(json!(1))))
                .await
                .unwrap();
            stack.publisher().unwrap().publish_clear("stock");
            tokio::time::sleep(Duration::from_millis(10)).await;
            if stock.is_empty().await {
                cleared = true;
                break;
            }
        }
        assert!(cleared);

        stack.shutdown().await;
    }

    #[tokio::test]
    async fn test_disabled_stack_hands_out_noop_caches() {
        let config = Config {
            enabled: false,
            ..Config::default()
        };
        let stack = CacheStack::build(&config).await.unwrap();

        let cache = stack.get_cache("anything").unwrap();
        cache.put("k", Some(json!(1))).await.unwrap();
        assert_eq!(cache.get("k").await.unwrap(), None);
        assert!(stack.l1().is_none());

        stack.shutdown().await;
    }

    #[tokio::test]
    async fn test_l1_only_stack() {
        let config = Config {
            l2_enabled: false,
            invalidation_enabled: false,
            ..config()
        };
        let stack = CacheStack::build(&config).await.unwrap();

        let cache = stack.get_cache("price").unwrap();
        cache.put("p1", Some(json!(3))).await.unwrap();

        let l1 = stack.l1().unwrap().lookup("price").unwrap();
        assert!(l1.get("p1").await.unwrap().is_some());
        assert!(stack.breaker().is_none());

        stack.shutdown().await;
    }
}
