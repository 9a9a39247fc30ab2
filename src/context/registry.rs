//! Lazy Shared Registry
//!
//! At most one cache per `(area, name)`. Lookups go straight to the cache
//! manager; only a miss takes the process-wide construction lock, re-checks,
//! and builds.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info};

use crate::cache::Cache;
use crate::error::Result;
use crate::provider::CacheManager;

/// Double-checked registry over a [`CacheManager`]
pub struct CacheRegistry {
    manager: Arc<dyn CacheManager>,
    build_lock: Mutex<()>,
    builds: AtomicU64,
}

impl CacheRegistry {
    /// Create a registry storing caches in `manager`
    pub fn new(manager: Arc<dyn CacheManager>) -> Self {
        Self {
            manager,
            build_lock: Mutex::new(()),
            builds: AtomicU64::new(0),
        }
    }

    /// Return the cache for `(area, name)`, building it on first use
    ///
    /// A failed build inserts nothing; the next call builds again.
    pub fn get_or_create<F>(&self, area: &str, name: &str, build: F) -> Result<Arc<dyn Cache>>
    where
        F: FnOnce() -> Result<Arc<dyn Cache>>,
    {
        if let Some(cache) = self.manager.get_cache(area, name) {
            return Ok(cache);
        }

        let _guard = self.build_lock.lock();
        if let Some(cache) = self.manager.get_cache(area, name) {
            debug!(area, name, "Cache built by another thread while waiting");
            return Ok(cache);
        }

        let cache = build()?;
        self.manager.put_cache(area, name, Arc::clone(&cache));
        self.builds.fetch_add(1, Ordering::Relaxed);
        info!(area, name, kind = %cache.kind(), "Cache created");
        Ok(cache)
    }

    /// Look up without building
    pub fn get(&self, area: &str, name: &str) -> Option<Arc<dyn Cache>> {
        self.manager.get_cache(area, name)
    }

    /// Remove a cache; the next lookup builds a new one
    pub fn remove(&self, area: &str, name: &str) -> Option<Arc<dyn Cache>> {
        let _guard = self.build_lock.lock();
        self.manager.remove_cache(area, name)
    }

    /// Successful builds so far
    pub fn build_count(&self) -> u64 {
        self.builds.load(Ordering::Relaxed)
    }

    /// Backing manager
    pub fn manager(&self) -> &Arc<dyn CacheManager> {
        &self.manager
    }
}

// =============================================================================
// Tests
// =============================================================================
