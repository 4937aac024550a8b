//! Registry of in-memory stores, one per logical cache.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tiercache_core::cache::{Store, StoreProvider};

use super::MemoryStore;

/// Hands out one [`MemoryStore`] per logical cache name.
///
/// A *dynamic* registry creates a store the first time a name is requested.
/// A *fixed* registry only knows the names it was built with.
#[derive(Debug)]
pub struct MemoryStoreRegistry {
    stores: DashMap<String, Arc<MemoryStore>>,
    max_entries: usize,
    ttl: Option<Duration>,
    dynamic: bool,
}

impl MemoryStoreRegistry {
    /// Creates a registry that creates stores on demand.
    pub fn dynamic(max_entries: usize, ttl: Option<Duration>) -> Self {
        Self {
            stores: DashMap::new(),
            max_entries,
            ttl,
            dynamic: true,
        }
    }

    /// Creates a registry restricted to `names`.
    pub fn fixed<I, S>(names: I, max_entries: usize, ttl: Option<Duration>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let stores = DashMap::new();
        for name in names {
            let name = name.into();
            let store = Arc::new(MemoryStore::new(name.clone(), max_entries, ttl));
            stores.insert(name, store);
        }
        Self {
            stores,
            max_entries,
            ttl,
            dynamic: false,
        }
    }

    /// Returns the store for `name` only if it already exists.
    pub fn lookup(&self, name: &str) -> Option<Arc<MemoryStore>> {
        self.stores.get(name).map(|store| Arc::clone(store.value()))
    }

    /// Returns the store for `name`, creating it when the registry is dynamic.
    pub fn get_or_create(&self, name: &str) -> Option<Arc<MemoryStore>> {
        if let Some(store) = self.lookup(name) {
            return Some(store);
        }
        if !self.dynamic {
            return None;
        }
        let store = self
            .stores
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(MemoryStore::new(name, self.max_entries, self.ttl)));
        Some(Arc::clone(store.value()))
    }

    /// Every store created so far.
    pub fn stores(&self) -> Vec<Arc<MemoryStore>> {
        self.stores
            .iter()
            .map(|store| Arc::clone(store.value()))
            .collect()
    }
}

impl StoreProvider for MemoryStoreRegistry {
    fn store(&self, name: &str) -> Option<Arc<dyn Store>> {
        self.get_or_create(name)
            .map(|store| store as Arc<dyn Store>)
    }

    fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.stores.iter().map(|s| s.key().clone()).collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dynamic_creates_on_demand() {
        let registry = MemoryStoreRegistry::dynamic(10, None);

        assert!(registry.lookup("price").is_none());
        assert!(registry.get_or_create("price").is_some());
        assert!(registry.lookup("price").is_some());
        assert_eq!(registry.names(), vec!["price".to_string()]);
    }

    #[test]
    fn test_dynamic_returns_same_store() {
        let registry = MemoryStoreRegistry::dynamic(10, None);

        let first = registry.get_or_create("price").unwrap();
        let second = registry.get_or_create("price").unwrap();

        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn test_fixed_only_knows_configured_names() {
        let registry = MemoryStoreRegistry::fixed(["price", "stock"], 10, None);

        assert!(registry.get_or_create("price").is_some());
        assert!(registry.get_or_create("unknown").is_none());
        assert!(registry.store("unknown").is_none());
        assert_eq!(
            registry.names(),
            vec!["price".to_string(), "stock".to_string()]
        );
    }

    #[test]
    fn test_lookup_never_creates() {
        let registry = MemoryStoreRegistry::dynamic(10, None);

        assert!(registry.lookup("price").is_none());
        assert!(registry.names().is_empty());
    }
}
