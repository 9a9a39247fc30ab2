//! Cache Manager - Registry Backing Store
//!
//! Maps `(area, name)` to the shared cache built for it. Lookups are lock-free
//! (DashMap shards); the construction lock lives in the context, not here.

use std::sync::Arc;

use dashmap::DashMap;

use crate::cache::Cache;

/// Storage for built caches keyed by `(area, name)`
pub trait CacheManager: Send + Sync {
    /// Look up a cache
    fn get_cache(&self, area: &str, name: &str) -> Option<Arc<dyn Cache>>;

    /// Store a cache, replacing any previous entry
    fn put_cache(&self, area: &str, name: &str, cache: Arc<dyn Cache>);

    /// Remove a cache, returning it if present
    fn remove_cache(&self, area: &str, name: &str) -> Option<Arc<dyn Cache>>;

    /// All registered `(area, name)` pairs
    fn cache_names(&self) -> Vec<(String, String)>;
}

/// In-memory cache manager
#[derive(Default)]
pub struct SimpleCacheManager {
    caches: DashMap<(String, String), Arc<dyn Cache>>,
}

impl SimpleCacheManager {
    /// Create an empty manager
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of registered caches
    pub fn len(&self) -> usize {
        self.caches.len()
    }

    /// Whether no cache is registered
    pub fn is_empty(&self) -> bool {
        self.caches.is_empty()
    }
}

impl CacheManager for SimpleCacheManager {
    fn get_cache(&self, area: &str, name: &str) -> Option<Arc<dyn Cache>> {
        self.caches
            .get(&(area.to_string(), name.to_string()))
            .map(|entry| Arc::clone(entry.value()))
    }

    fn put_cache(&self, area: &str, name: &str, cache: Arc<dyn Cache>) {
        self.caches
            .insert((area.to_string(), name.to_string()), cache);
    }

    fn remove_cache(&self, area: &str, name: &str) -> Option<Arc<dyn Cache>> {
        self.caches
            .remove(&(area.to_string(), name.to_string()))
            .map(|(_, cache)| cache)
    }

    fn cache_names(&self) -> Vec<(String, String)> {
        let mut names: Vec<_> = self.caches.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }
}

// =============================================================================
// Tests
// =============================================================================
