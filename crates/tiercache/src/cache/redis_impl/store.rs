//! Redis store implementation.
//!
//! Entries are stored as JSON under `<cache>::<key>`. Every key written for
//! a logical cache is tracked in a Redis Set (`<cache>:_keys`) so clearing a
//! cache never has to SCAN the keyspace.
//!
//! # Non-Atomicity Safety
//!
//! Writes and deletes involve more than one command. This is safe:
//!
//! - **Stale tracking members**: a tracked key that already expired is
//!   harmless, DEL on a missing key is a no-op.
//! - **Partial clear**: a clear interrupted halfway is finished by the next
//!   clear.
//!
//! The worst case is temporary inconsistency, not lost writes.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashSet;
use redis::AsyncCommands;

use tiercache_core::cache::{
    shared_key, tracking_key, CacheEntry, CacheError, Result, Store, StoreProvider,
};

use super::error::map_redis_error;

/// Redis-backed store for one logical cache.
///
/// Uses a connection manager shared with every other store of the provider.
#[derive(Clone)]
pub struct RedisStore {
    name: String,
    conn: redis::aio::ConnectionManager,
    ttl: Option<Duration>,
}

impl RedisStore {
    pub fn new(
        name: impl Into<String>,
        conn: redis::aio::ConnectionManager,
        ttl: Option<Duration>,
    ) -> Self {
        Self {
            name: name.into(),
            conn,
            ttl: ttl.filter(|d| !d.is_zero()),
        }
    }
}

#[async_trait]
impl Store for RedisStore {
    fn name(&self) -> &str {
        &self.name
    }

    async fn get(&self, key: &str) -> Result<Option<CacheEntry>> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn
            .get(shared_key(&self.name, key))
            .await
            .map_err(map_redis_error)?;

        raw.map(|json| {
            serde_json::from_str(&json).map_err(|e| CacheError::Serialization(e.to_string()))
        })
        .transpose()
    }

    async fn put(&self, key: &str, entry: CacheEntry) -> Result<()> {
        let mut conn = self.conn.clone();
        let redis_key = shared_key(&self.name, key);
        let payload =
            serde_json::to_string(&entry).map_err(|e| CacheError::Serialization(e.to_string()))?;

        match self.ttl {
            Some(duration) => {
                let seconds = duration.as_secs().max(1);
                conn.set_ex::<_, _, ()>(&redis_key, payload, seconds)
                    .await
                    .map_err(map_redis_error)?;
            }
            None => {
                conn.set::<_, _, ()>(&redis_key, payload)
                    .await
                    .map_err(map_redis_error)?;
            }
        }

        conn.sadd::<_, _, ()>(tracking_key(&self.name), &redis_key)
            .await
            .map_err(map_redis_error)?;

        Ok(())
    }

    async fn evict(&self, key: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        let redis_key = shared_key(&self.name, key);

        conn.del::<_, ()>(&redis_key)
            .await
            .map_err(map_redis_error)?;
        conn.srem::<_, _, ()>(tracking_key(&self.name), &redis_key)
            .await
            .map_err(map_redis_error)?;

        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        let mut conn = self.conn.clone();
        let tracking = tracking_key(&self.name);

        let tracked_keys: Vec<String> = conn
            .smembers(&tracking)
            .await
            .map_err(map_redis_error)?;

        if !tracked_keys.is_empty() {
            conn.del::<_, ()>(&tracked_keys)
                .await
                .map_err(map_redis_error)?;
        }

        conn.del::<_, ()>(&tracking)
            .await
            .map_err(map_redis_error)?;

        Ok(())
    }
}

/// Hands out [`RedisStore`]s over one shared connection.
///
/// Without configured names any logical cache is served and remembered once
/// requested. With [`RedisStoreProvider::with_names`] only those names are.
pub struct RedisStoreProvider {
    conn: redis::aio::ConnectionManager,
    ttl: Option<Duration>,
    names: DashSet<String>,
    fixed: bool,
}

impl RedisStoreProvider {
    /// Connects to Redis.
    ///
    /// # Arguments
    ///
    /// * `url` - Redis connection URL (e.g., "redis://localhost:6379")
    /// * `ttl` - Expiry applied to every write
    ///
    /// # Errors
    ///
    /// Returns `CacheError::ConnectionFailed` if the connection cannot be established.
    pub async fn connect(url: &str, ttl: Option<Duration>) -> Result<Self> {
        let client = redis::Client::open(url).map_err(map_redis_error)?;
        let conn = redis::aio::ConnectionManager::new(client)
            .await
            .map_err(map_redis_error)?;
        Ok(Self {
            conn,
            ttl,
            names: DashSet::new(),
            fixed: false,
        })
    }

    /// Restricts the provider to `names`. An empty list keeps it open.
    pub fn with_names<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for name in names {
            self.names.insert(name.into());
        }
        self.fixed = !self.names.is_empty();
        self
    }
}

impl StoreProvider for RedisStoreProvider {
    fn store(&self, name: &str) -> Option<Arc<dyn Store>> {
        if self.fixed {
            if !self.names.contains(name) {
                return None;
            }
        } else {
            self.names.insert(name.to_string());
        }
        Some(Arc::new(RedisStore::new(name, self.conn.clone(), self.ttl)))
    }

    fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.names.iter().map(|name| name.key().clone()).collect();
        names.sort();
        names
    }
}
