//! Two-level cache.
//!
//! Reads go L1, then L2, then the loader. Writes go to L1 then L2. Entries
//! older than the soft TTL are served while a single background load
//! replaces them. Evictions and clears are announced on the invalidation bus
//! so peers drop their L1 copies.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use futures_util::future::{BoxFuture, FutureExt};
use serde_json::Value;

use tiercache_core::cache::{
    Cache, CacheEntry, CacheError, InvalidationPublisher, Loader, Result, Store,
};

use super::flight::{Flight, RefreshCoordinator};
use crate::metrics::{CacheMetrics, Level, Outcome, RefreshPhase};

/// What the composite does with shared-store errors.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum L2FailurePolicy {
    /// Return the error to the caller.
    #[default]
    Propagate,
    /// Log it; reads become misses and writes become no-ops.
    Degrade,
}

impl fmt::Display for L2FailurePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            L2FailurePolicy::Propagate => f.write_str("propagate"),
            L2FailurePolicy::Degrade => f.write_str("degrade"),
        }
    }
}

impl FromStr for L2FailurePolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "propagate" => Ok(L2FailurePolicy::Propagate),
            "degrade" => Ok(L2FailurePolicy::Degrade),
            other => Err(format!("unknown L2 failure policy: {}", other)),
        }
    }
}

impl L2FailurePolicy {
    /// Applies the policy to the result of an L2 call. `fallback` replaces
    /// the error when degrading.
    fn apply<T>(self, cache: &str, operation: &str, result: Result<T>, fallback: T) -> Result<T> {
        match (self, result) {
            (_, Ok(value)) => Ok(value),
            (L2FailurePolicy::Propagate, Err(err)) => Err(err),
            (L2FailurePolicy::Degrade, Err(err)) => {
                tracing::warn!(
                    cache,
                    operation,
                    unavailable = err.is_unavailable(),
                    error = %err,
                    "Shared store failed, continuing without it"
                );
                Ok(fallback)
            }
        }
    }
}

/// Composite cache over an L1 and an L2 store.
pub struct MultiLevelCache {
    name: String,
    l1: Arc<dyn Store>,
    l2: Arc<dyn Store>,
    publisher: Option<Arc<dyn InvalidationPublisher>>,
    soft_ttl: Option<Duration>,
    l2_policy: L2FailurePolicy,
    flights: RefreshCoordinator,
    metrics: CacheMetrics,
}

impl MultiLevelCache {
    /// Creates a composite with stale-while-revalidate disabled and L2
    /// errors propagated.
    pub fn new(name: impl Into<String>, l1: Arc<dyn Store>, l2: Arc<dyn Store>) -> Self {
        let name = name.into();
        let metrics = CacheMetrics::new(&name);
        Self {
            flights: RefreshCoordinator::new(metrics.clone()),
            name,
            l1,
            l2,
            publisher: None,
            soft_ttl: None,
            l2_policy: L2FailurePolicy::default(),
            metrics,
        }
    }

    pub fn with_publisher(mut self, publisher: Option<Arc<dyn InvalidationPublisher>>) -> Self {
        self.publisher = publisher;
        self
    }

    /// Entries at least this old are served stale and refreshed. `None`
    /// disables staleness.
    pub fn with_soft_ttl(mut self, soft_ttl: Option<Duration>) -> Self {
        self.soft_ttl = soft_ttl;
        self
    }

    pub fn with_l2_failure_policy(mut self, policy: L2FailurePolicy) -> Self {
        self.l2_policy = policy;
        self
    }

    pub fn soft_ttl(&self) -> Option<Duration> {
        self.soft_ttl
    }

    /// Number of loads currently running for this cache.
    pub fn in_flight(&self) -> usize {
        self.flights.in_flight()
    }

    async fn l2_get(&self, key: &str) -> Result<Option<CacheEntry>> {
        let result = self.l2.get(key).await;
        self.l2_policy.apply(&self.name, "get", result, None)
    }

    /// Starts a load for `key` unless one is running.
    fn refresh(&self, key: &str, loader: Loader) -> Flight {
        self.flights.trigger(key, || {
            load_and_store(
                key.to_string(),
                loader,
                Arc::clone(&self.l1),
                Arc::clone(&self.l2),
                self.soft_ttl,
                self.l2_policy,
                self.metrics.clone(),
            )
        })
    }

    fn publisher(&self) -> Option<&dyn InvalidationPublisher> {
        self.publisher.as_deref()
    }
}

/// Runs the loader and writes a present value to both levels with a fresh
/// timestamp.
///
/// Both levels are read again first: a caller that missed before an earlier
/// load finished must not run the loader a second time.
fn load_and_store(
    key: String,
    loader: Loader,
    l1: Arc<dyn Store>,
    l2: Arc<dyn Store>,
    soft_ttl: Option<Duration>,
    l2_policy: L2FailurePolicy,
    metrics: CacheMetrics,
) -> BoxFuture<'static, Result<Option<Value>>> {
    async move {
        let now = Utc::now();
        if let Some(entry) = l1.get(&key).await? {
            if !entry.is_stale(soft_ttl, now) {
                tracing::debug!(cache = %l1.name(), key = %key, "Loaded by an earlier flight");
                metrics.refresh(RefreshPhase::DuplicateSuppressed);
                return Ok(entry.value);
            }
        }
        let result = l2.get(&key).await;
        if let Some(entry) = l2_policy.apply(l1.name(), "get", result, None)? {
            if !entry.is_stale(soft_ttl, now) {
                tracing::debug!(cache = %l1.name(), key = %key, "Loaded by an earlier flight");
                metrics.refresh(RefreshPhase::DuplicateSuppressed);
                l1.put(&key, entry.clone()).await?;
                return Ok(entry.value);
            }
        }

        let started = Instant::now();
        let loaded = loader().await;
        metrics.loader_duration(started.elapsed());

        let value = match loaded {
            Ok(value) => value,
            Err(err) => {
                metrics.refresh(RefreshPhase::Failure);
                return Err(CacheError::RetrievalFailed {
                    key,
                    cause: err.to_string(),
                });
            }
        };

        if let Some(value) = &value {
            let entry = CacheEntry::new(Some(value.clone()));
            let written = async {
                l1.put(&key, entry.clone()).await?;
                let result = l2.put(&key, entry).await;
                l2_policy.apply(l1.name(), "put", result, ())
            }
            .await;
            if let Err(err) = written {
                metrics.refresh(RefreshPhase::Failure);
                return Err(err);
            }
        }

        metrics.refresh(RefreshPhase::Success);
        Ok(value)
    }
    .boxed()
}

#[async_trait]
impl Cache for MultiLevelCache {
    fn name(&self) -> &str {
        &self.name
    }

    async fn get(&self, key: &str) -> Result<Option<Value>> {
        if let Some(entry) = self.l1.get(key).await? {
            self.metrics.lookup(Level::L1, Outcome::Hit);
            tracing::trace!(cache = %self.name, key, "L1 hit");
            return Ok(entry.value);
        }
        self.metrics.lookup(Level::L1, Outcome::Miss);

        match self.l2_get(key).await? {
            Some(entry) => {
                self.metrics.lookup(Level::L2, Outcome::Hit);
                tracing::debug!(cache = %self.name, key, "L2 hit, backfilling L1");
                self.l1.put(key, CacheEntry::new(entry.value.clone())).await?;
                Ok(entry.value)
            }
            None => {
                self.metrics.lookup(Level::L2, Outcome::Miss);
                Ok(None)
            }
        }
    }

    async fn get_or_load(&self, key: &str, loader: Loader) -> Result<Option<Value>> {
        let now = Utc::now();

        let l1_entry = self.l1.get(key).await?;
        if let Some(entry) = &l1_entry {
            if !entry.is_stale(self.soft_ttl, now) {
                self.metrics.lookup(Level::L1, Outcome::Hit);
                return Ok(entry.value.clone());
            }
        }
        // A stale L1 entry is a miss as far as freshness goes.
        self.metrics.lookup(Level::L1, Outcome::Miss);

        let Some(entry) = self.l2_get(key).await? else {
            self.metrics.lookup(Level::L2, Outcome::Miss);
            tracing::debug!(cache = %self.name, key, "Miss on both levels, loading");
            return self.refresh(key, loader).into_future().await;
        };

        self.metrics.lookup(Level::L2, Outcome::Hit);
        self.l1.put(key, entry.clone()).await?;

        if entry.is_stale(self.soft_ttl, now) {
            tracing::debug!(cache = %self.name, key, "Serving stale value while refreshing");
            if let Flight::Started(load) = self.refresh(key, loader) {
                let cache = self.name.clone();
                let key = key.to_string();
                tokio::spawn(async move {
                    if let Err(err) = load.await {
                        let err = CacheError::RefreshFailed {
                            key,
                            cause: err.to_string(),
                        };
                        tracing::warn!(cache = %cache, error = %err, "Background refresh failed");
                    }
                });
            }
        }

        Ok(entry.value)
    }

    async fn put(&self, key: &str, value: Option<Value>) -> Result<()> {
        let entry = CacheEntry::new(value);
        self.l1.put(key, entry.clone()).await?;
        let result = self.l2.put(key, entry).await;
        self.l2_policy.apply(&self.name, "put", result, ())
    }

    async fn evict(&self, key: &str) -> Result<()> {
        let l1 = self.l1.evict(key).await;
        let l2 = self.l2.evict(key).await;
        self.metrics.eviction();
        if let Some(publisher) = self.publisher() {
            publisher.publish_evict(&self.name, key);
        }
        l1?;
        self.l2_policy.apply(&self.name, "evict", l2, ())
    }

    async fn clear(&self) -> Result<()> {
        let l1 = self.l1.clear().await;
        let l2 = self.l2.clear().await;
        self.metrics.clear();
        if let Some(publisher) = self.publisher() {
            publisher.publish_clear(&self.name);
        }
        l1?;
        self.l2_policy.apply(&self.name, "clear", l2, ())
    }
}
