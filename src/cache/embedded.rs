//! Embedded Cache - In-Process Tier
//!
//! Sharded in-memory store with an entry-count limit, write expiry and idle
//! expiry.
//!
//! # Design
//!
//! - ShardedMap for low lock contention
//! - Expired entries are dropped lazily on read
//! - Over the limit, expired entries go first, then the least recently
//!   accessed one

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tracing::trace;

use super::entry::{expire_at, CacheEntry, StoredEntry};
use super::shard::ShardedMap;
use super::{Cache, CacheConfig, CacheKind, EMBEDDED_SHARD_COUNT};
use crate::codec::{CodecSlot, KeyConvertor};
use crate::error::Result;

/// Embedded cache - in-process tier
pub struct EmbeddedCache {
    /// Sharded storage keyed by converted key
    storage: ShardedMap<String, Arc<StoredEntry>, EMBEDDED_SHARD_COUNT>,
    /// Configuration
    config: CacheConfig,
    /// Eviction count
    evictions: AtomicU64,
}

impl EmbeddedCache {
    /// Create a cache; the key convertor slot must already be resolved
    pub fn new(config: CacheConfig) -> Result<Self> {
        if let Some(slot) = &config.key_convertor {
            slot.get()?;
        }
        Ok(Self {
            storage: ShardedMap::new(),
            config,
            evictions: AtomicU64::new(0),
        })
    }

    /// Number of live and not-yet-purged entries
    pub fn len(&self) -> usize {
        self.storage.len()
    }

    /// Check if the cache is empty
    pub fn is_empty(&self) -> bool {
        self.storage.is_empty()
    }

    /// Entries evicted because of the limit
    pub fn evictions(&self) -> u64 {
        self.evictions.load(Ordering::Relaxed)
    }

    /// Drop everything
    pub fn clear(&self) {
        self.storage.clear();
    }

    /// Evict until the limit holds
    fn enforce_limit(&self, limit: usize) {
        while self.storage.len() > limit {
            let mut victim: Option<(String, u64)> = None;
            let mut expired = Vec::new();

            for shard in self.storage.shards() {
                for (key, entry) in shard.entries() {
                    if entry.is_expired(self.config.expire_after_access) {
                        expired.push(key);
                        continue;
                    }
                    let last = entry.last_access();
                    if victim.as_ref().map_or(true, |(_, oldest)| last < *oldest) {
                        victim = Some((key, last));
                    }
                }
            }

            if !expired.is_empty() {
                for key in expired {
                    self.storage.remove(&key);
                }
                continue;
            }

            match victim {
                Some((key, _)) => {
                    trace!(key = %key, "Evicting least recently accessed entry");
                    if self.storage.remove(&key).is_some() {
                        self.evictions.fetch_add(1, Ordering::Relaxed);
                    }
                }
                None => break,
            }
        }
    }
}

impl Cache for EmbeddedCache {
    fn kind(&self) -> CacheKind {
        CacheKind::Embedded
    }

    fn config(&self) -> &CacheConfig {
        &self.config
    }

    fn get_entry(&self, key: &Value) -> Result<Option<CacheEntry>> {
        let key = self.config.convert_key(key)?;
        let Some(stored) = self.storage.get(&key) else {
            return Ok(None);
        };

        if stored.is_expired(self.config.expire_after_access) {
            self.storage.remove_if(&key, |current| Arc::ptr_eq(current, &stored));
            return Ok(None);
        }

        stored.record_access();
        Ok(Some(stored.to_entry()))
    }

    fn put_with_expire(&self, key: &Value, value: Value, expire: Option<Duration>) -> Result<()> {
        let key = self.config.convert_key(key)?;
        self.storage
            .insert(key, Arc::new(StoredEntry::new(value, expire_at(expire))));

        if let Some(limit) = self.config.limit {
            self.enforce_limit(limit);
        }
        Ok(())
    }

    fn invalidate(&self, key: &Value) -> Result<bool> {
        let key = self.config.convert_key(key)?;
        Ok(self.storage.remove(&key).is_some())
    }
}

// =============================================================================
// Builder
// =============================================================================

/// Builder for [`EmbeddedCache`]; cloned per site from the area template
#[derive(Debug, Clone, Default)]
pub struct EmbeddedCacheBuilder {
    config: CacheConfig,
}

impl EmbeddedCacheBuilder {
    /// Create a builder with no limit and no expiry
    pub fn new() -> Self {
        Self::default()
    }

    /// Maximum entry count
    pub fn limit(mut self, limit: usize) -> Self {
        self.config.limit = Some(limit);
        self
    }

    /// Default write expiry
    pub fn expire_after_write(mut self, expire: Duration) -> Self {
        self.config.expire_after_write = Some(expire);
        self
    }

    /// Idle expiry
    pub fn expire_after_access(mut self, expire: Duration) -> Self {
        self.config.expire_after_access = Some(expire);
        self
    }

    /// Key convertor, resolved or deferred
    pub fn key_convertor(mut self, slot: CodecSlot<dyn KeyConvertor>) -> Self {
        self.config.key_convertor = Some(slot);
        self
    }

    /// Store `null` loader results
    pub fn cache_null_value(mut self, cache_null_value: bool) -> Self {
        self.config.cache_null_value = cache_null_value;
        self
    }

    /// Current settings
    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Mutable settings, used by the build pipeline on a clone
    pub fn config_mut(&mut self) -> &mut CacheConfig {
        &mut self.config
    }

    /// Build the cache
    pub fn build_cache(&self) -> Result<Arc<dyn Cache>> {
        Ok(Arc::new(EmbeddedCache::new(self.config.clone())?))
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::NoneKeyConvertor;
    use crate::error::Error;
    use serde_json::json;

    fn build(builder: EmbeddedCacheBuilder) -> EmbeddedCache {
        EmbeddedCache::new(builder.config().clone()).unwrap()
    }

    #[test]
    fn test_put_get_invalidate() {
        let cache = build(EmbeddedCacheBuilder::new());

        assert!(cache.get(&json!("a")).unwrap().is_none());
        cache.put(&json!("a"), json!({"n": 1})).unwrap();
        assert_eq!(cache.get(&json!("a")).unwrap(), Some(json!({"n": 1})));

        assert!(cache.invalidate(&json!("a")).unwrap());
        assert!(!cache.invalidate(&json!("a")).unwrap());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_write_expiry() {
        let cache = build(EmbeddedCacheBuilder::new());
        cache
            .put_with_expire(&json!("k"), json!(1), Some(Duration::ZERO))
            .unwrap();
        assert!(cache.get(&json!("k")).unwrap().is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_default_expiry_applies_to_put() {
        let cache = build(EmbeddedCacheBuilder::new().expire_after_write(Duration::from_secs(30)));
        cache.put(&json!("k"), json!(1)).unwrap();

        let entry = cache.get_entry(&json!("k")).unwrap().unwrap();
        let remaining = entry.remaining().unwrap();
        assert!(remaining <= Duration::from_secs(30));
        assert!(remaining > Duration::from_secs(25));
    }

    #[test]
    fn test_limit_evicts_least_recently_accessed() {
        let cache = build(EmbeddedCacheBuilder::new().limit(2));
        cache.put(&json!("a"), json!(1)).unwrap();
        std::thread::sleep(Duration::from_millis(5));
        cache.put(&json!("b"), json!(2)).unwrap();
        std::thread::sleep(Duration::from_millis(5));
        cache.get(&json!("a")).unwrap();
        std::thread::sleep(Duration::from_millis(5));
        cache.put(&json!("c"), json!(3)).unwrap();

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.evictions(), 1);
        assert!(cache.get(&json!("b")).unwrap().is_none());
        assert!(cache.get(&json!("a")).unwrap().is_some());
        assert!(cache.get(&json!("c")).unwrap().is_some());
    }

    #[test]
    fn test_key_convertor_shapes_keys() {
        let cache = build(
            EmbeddedCacheBuilder::new().key_convertor(CodecSlot::resolved(Arc::new(NoneKeyConvertor))),
        );
        cache.put(&json!("1"), json!("string key")).unwrap();
        // "1" and 1 collapse onto the same stored key with the none convertor
        assert_eq!(cache.get(&json!(1)).unwrap(), Some(json!("string key")));
    }

    #[test]
    fn test_unresolved_convertor_rejected() {
        let builder = EmbeddedCacheBuilder::new().key_convertor(CodecSlot::unresolved("json"));
        let err = builder.build_cache().err().unwrap();
        assert!(matches!(err, Error::UnresolvedCodec(name) if name == "json"));
    }

    #[test]
    fn test_builder_clone_is_independent() {
        let template = EmbeddedCacheBuilder::new().limit(100);
        let site = template.clone().limit(5);
        assert_eq!(template.config().limit, Some(100));
        assert_eq!(site.config().limit, Some(5));
    }
}
