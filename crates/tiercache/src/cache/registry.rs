//! Cache registry.
//!
//! Resolves a logical cache name to the cache callers talk to, depending on
//! which levels know the name.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;

use tiercache_core::cache::{Cache, InvalidationPublisher, StoreProvider};

use super::multilevel::{L2FailurePolicy, MultiLevelCache};
use super::noop::NoOpCache;
use super::single::SingleLevelCache;
use crate::metrics::Level;

/// Maps logical cache names to caches.
///
/// Resolved caches are built once and reused, so every caller of a name
/// shares one single-flight coordinator.
pub struct CacheRegistry {
    enabled: bool,
    l1: Option<Arc<dyn StoreProvider>>,
    l2: Option<Arc<dyn StoreProvider>>,
    publisher: Option<Arc<dyn InvalidationPublisher>>,
    soft_ttl: Option<Duration>,
    l2_policy: L2FailurePolicy,
    caches: DashMap<String, Arc<dyn Cache>>,
}

impl CacheRegistry {
    pub fn new(l1: Option<Arc<dyn StoreProvider>>, l2: Option<Arc<dyn StoreProvider>>) -> Self {
        Self {
            enabled: true,
            l1,
            l2,
            publisher: None,
            soft_ttl: None,
            l2_policy: L2FailurePolicy::default(),
            caches: DashMap::new(),
        }
    }

    /// A registry that hands out no-op caches for every name.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::new(None, None)
        }
    }

    pub fn with_publisher(mut self, publisher: Option<Arc<dyn InvalidationPublisher>>) -> Self {
        self.publisher = publisher;
        self
    }

    pub fn with_soft_ttl(mut self, soft_ttl: Option<Duration>) -> Self {
        self.soft_ttl = soft_ttl;
        self
    }

    pub fn with_l2_failure_policy(mut self, policy: L2FailurePolicy) -> Self {
        self.l2_policy = policy;
        self
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Returns the cache for `name`, or `None` when no level knows it.
    ///
    /// A disabled registry hands out a fresh no-op cache per call and keeps
    /// nothing.
    pub fn get_cache(&self, name: &str) -> Option<Arc<dyn Cache>> {
        if !self.enabled {
            return Some(Arc::new(NoOpCache::new(name)));
        }
        if let Some(cache) = self.caches.get(name) {
            return Some(Arc::clone(cache.value()));
        }

        let cache = self.build(name)?;
        let cache = self
            .caches
            .entry(name.to_string())
            .or_insert(cache)
            .value()
            .clone();
        Some(cache)
    }

    fn build(&self, name: &str) -> Option<Arc<dyn Cache>> {
        let l1 = self.l1.as_ref().and_then(|provider| provider.store(name));
        let l2 = self.l2.as_ref().and_then(|provider| provider.store(name));

        let cache: Arc<dyn Cache> = match (l1, l2) {
            (Some(l1), Some(l2)) => {
                tracing::debug!(cache = %name, "Creating multi-level cache");
                Arc::new(
                    MultiLevelCache::new(name, l1, l2)
                        .with_publisher(self.publisher.clone())
                        .with_soft_ttl(self.soft_ttl)
                        .with_l2_failure_policy(self.l2_policy),
                )
            }
            (Some(l1), None) => {
                tracing::debug!(cache = %name, "Creating L1-only cache");
                Arc::new(SingleLevelCache::new(l1, Level::L1))
            }
            (None, Some(l2)) => {
                tracing::debug!(cache = %name, "Creating L2-only cache");
                Arc::new(SingleLevelCache::new(l2, Level::L2))
            }
            (None, None) => {
                tracing::trace!(cache = %name, "Unknown cache name");
                return None;
            }
        };
        Some(cache)
    }

    /// Union of the names known to either level, sorted.
    pub fn cache_names(&self) -> Vec<String> {
        let mut names = BTreeSet::new();
        for provider in self.l1.iter().chain(self.l2.iter()) {
            names.extend(provider.names());
        }
        names.into_iter().collect()
    }
}
