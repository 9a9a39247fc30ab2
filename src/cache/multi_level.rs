//! Multi-Level Cache
//!
//! Ordered tiers, fastest first. Reads check tiers in order and back-fill the
//! tiers above a hit; writes and invalidations go to every tier.
//!
//! Expiry source is fixed at build time: either the composite's own expiry
//! (propagated to every tier, remaining lifetime on back-fill) or, with
//! `use_expire_of_sub_cache`, each tier's own default expiry.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tracing::trace;

use super::entry::CacheEntry;
use super::{Cache, CacheConfig, CacheKind};
use crate::error::{Error, Result};

/// Composite over ordered tiers
pub struct MultiLevelCache {
    caches: Vec<Arc<dyn Cache>>,
    config: CacheConfig,
}

impl MultiLevelCache {
    /// Tiers, fastest first
    pub fn caches(&self) -> &[Arc<dyn Cache>] {
        &self.caches
    }

    fn tier_expire(&self, tier: &Arc<dyn Cache>, fallback: Option<Duration>) -> Option<Duration> {
        if self.config.use_expire_of_sub_cache {
            tier.config().expire_after_write
        } else {
            fallback
        }
    }

    fn back_fill(&self, hit_level: usize, key: &Value, entry: &CacheEntry) -> Result<()> {
        let remaining = entry.remaining();
        if remaining == Some(Duration::ZERO) {
            return Ok(());
        }
        for tier in &self.caches[..hit_level] {
            let expire = self.tier_expire(tier, remaining);
            tier.put_with_expire(key, entry.value().clone(), expire)?;
        }
        if hit_level > 0 {
            trace!(level = hit_level, "Back-filled upper tiers");
        }
        Ok(())
    }
}

impl Cache for MultiLevelCache {
    fn kind(&self) -> CacheKind {
        CacheKind::MultiLevel
    }

    fn config(&self) -> &CacheConfig {
        &self.config
    }

    fn get_entry(&self, key: &Value) -> Result<Option<CacheEntry>> {
        for (level, tier) in self.caches.iter().enumerate() {
            if let Some(entry) = tier.get_entry(key)? {
                self.back_fill(level, key, &entry)?;
                return Ok(Some(entry));
            }
        }
        Ok(None)
    }

    fn put_with_expire(&self, key: &Value, value: Value, expire: Option<Duration>) -> Result<()> {
        for tier in &self.caches {
            let tier_expire = self.tier_expire(tier, expire);
            tier.put_with_expire(key, value.clone(), tier_expire)?;
        }
        Ok(())
    }

    fn invalidate(&self, key: &Value) -> Result<bool> {
        let mut found = false;
        for tier in &self.caches {
            found |= tier.invalidate(key)?;
        }
        Ok(found)
    }

    fn children(&self) -> Vec<Arc<dyn Cache>> {
        self.caches.clone()
    }
}

// =============================================================================
// Builder
// =============================================================================

/// Builder for [`MultiLevelCache`]
#[derive(Clone, Default)]
pub struct MultiLevelCacheBuilder {
    caches: Vec<Arc<dyn Cache>>,
    config: CacheConfig,
}

impl MultiLevelCacheBuilder {
    /// Create an empty builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a tier (slower than the ones before it)
    pub fn add_cache(mut self, cache: Arc<dyn Cache>) -> Self {
        self.caches.push(cache);
        self
    }

    /// Composite expiry
    pub fn expire_after_write(mut self, expire: Option<Duration>) -> Self {
        self.config.expire_after_write = expire;
        self
    }

    /// Let every tier keep its own expiry
    pub fn use_expire_of_sub_cache(mut self, enabled: bool) -> Self {
        self.config.use_expire_of_sub_cache = enabled;
        self
    }

    /// Store `null` loader results
    pub fn cache_null_value(mut self, cache_null_value: bool) -> Self {
        self.config.cache_null_value = cache_null_value;
        self
    }

    /// Build the composite; at least one tier is required
    pub fn build_cache(&self) -> Result<Arc<dyn Cache>> {
        if self.caches.is_empty() {
            return Err(Error::Config(
                "multi-level cache needs at least one tier".to_string(),
            ));
        }
        Ok(Arc::new(MultiLevelCache {
            caches: self.caches.clone(),
            config: self.config.clone(),
        }))
    }
}

// =============================================================================
// Tests
// =============================================================================
