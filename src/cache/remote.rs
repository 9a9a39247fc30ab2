//! Remote Cache - Network Store Tier
//!
//! Values are encoded to bytes and written through a [`RemoteBackend`]
//! under `prefix + converted key`.
//!
//! # Design
//!
//! - Pluggable backend; the in-memory backend stands in for a network store
//! - One backend client is shared by every cache of an area
//! - Expiry is stored with each record and enforced by the backend

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use dashmap::DashMap;
use serde_json::Value;

use super::entry::{expire_at, now_millis, CacheEntry};
use super::{Cache, CacheConfig, CacheKind, KeyPrefix};
use crate::codec::{CodecSlot, JsonValueCodec, KeyConvertor, ValueDecoder, ValueEncoder};
use crate::error::Result;

/// A stored remote record
#[derive(Debug, Clone)]
pub struct RemoteRecord {
    /// Encoded value
    pub data: Bytes,
    /// Expiry (epoch millis), `None` = never
    pub expire_at: Option<u64>,
}

impl RemoteRecord {
    fn is_expired(&self) -> bool {
        matches!(self.expire_at, Some(at) if now_millis() >= at)
    }
}

/// Remote storage backend trait
pub trait RemoteBackend: Send + Sync {
    /// Backend name used in logs
    fn name(&self) -> &str;

    /// Get a record
    fn get(&self, key: &str) -> Result<Option<RemoteRecord>>;

    /// Put a record
    fn put(&self, key: &str, record: RemoteRecord) -> Result<()>;

    /// Delete a record
    fn delete(&self, key: &str) -> Result<bool>;

    /// Get backend statistics
    fn stats(&self) -> RemoteBackendStats;
}

/// Remote backend statistics
#[derive(Debug, Clone, Default)]
pub struct RemoteBackendStats {
    /// Records stored
    pub record_count: u64,
    /// Total payload bytes stored
    pub total_bytes: u64,
    /// Read operations
    pub reads: u64,
    /// Write operations
    pub writes: u64,
    /// Delete operations
    pub deletes: u64,
}

/// In-memory remote backend
#[derive(Default)]
pub struct InMemoryRemoteBackend {
    storage: DashMap<String, RemoteRecord>,
    total_bytes: AtomicU64,
    reads: AtomicU64,
    writes: AtomicU64,
    deletes: AtomicU64,
}

impl InMemoryRemoteBackend {
    /// Create a new in-memory backend
    pub fn new() -> Self {
        Self::default()
    }

    /// Stored keys, sorted
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<_> = self.storage.iter().map(|e| e.key().clone()).collect();
        keys.sort();
        keys
    }

    fn forget(&self, record: &RemoteRecord) {
        self.total_bytes
            .fetch_sub(record.data.len() as u64, Ordering::Relaxed);
    }
}

impl RemoteBackend for InMemoryRemoteBackend {
    fn name(&self) -> &str {
        "memory"
    }

    fn get(&self, key: &str) -> Result<Option<RemoteRecord>> {
        self.reads.fetch_add(1, Ordering::Relaxed);

        let record = match self.storage.get(key) {
            Some(record) => record.clone(),
            None => return Ok(None),
        };
        if record.is_expired() {
            if let Some((_, removed)) = self.storage.remove_if(key, |_, r| r.is_expired()) {
                self.forget(&removed);
            }
            return Ok(None);
        }
        Ok(Some(record))
    }

    fn put(&self, key: &str, record: RemoteRecord) -> Result<()> {
        self.writes.fetch_add(1, Ordering::Relaxed);

        let size = record.data.len() as u64;
        self.total_bytes.fetch_add(size, Ordering::Relaxed);
        if let Some(old) = self.storage.insert(key.to_string(), record) {
            self.forget(&old);
        }
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<bool> {
        self.deletes.fetch_add(1, Ordering::Relaxed);

        match self.storage.remove(key) {
            Some((_, record)) => {
                self.forget(&record);
                Ok(!record.is_expired())
            }
            None => Ok(false),
        }
    }

    fn stats(&self) -> RemoteBackendStats {
        RemoteBackendStats {
            record_count: self.storage.len() as u64,
            total_bytes: self.total_bytes.load(Ordering::Relaxed),
            reads: self.reads.load(Ordering::Relaxed),
            writes: self.writes.load(Ordering::Relaxed),
            deletes: self.deletes.load(Ordering::Relaxed),
        }
    }
}

// =============================================================================
// Remote Cache
// =============================================================================

/// Remote cache - encodes values and writes them through a backend
pub struct RemoteCache {
    backend: Arc<dyn RemoteBackend>,
    config: CacheConfig,
    encoder: Arc<dyn ValueEncoder>,
    decoder: Arc<dyn ValueDecoder>,
}

impl RemoteCache {
    /// Create a cache; codec slots must already be resolved
    pub fn new(backend: Arc<dyn RemoteBackend>, config: CacheConfig) -> Result<Self> {
        if let Some(slot) = &config.key_convertor {
            slot.get()?;
        }
        let encoder: Arc<dyn ValueEncoder> = match &config.value_encoder {
            Some(slot) => slot.get()?,
            None => Arc::new(JsonValueCodec),
        };
        let decoder: Arc<dyn ValueDecoder> = match &config.value_decoder {
            Some(slot) => slot.get()?,
            None => Arc::new(JsonValueCodec),
        };
        Ok(Self {
            backend,
            config,
            encoder,
            decoder,
        })
    }

    /// Storage key for a cache key
    pub fn full_key(&self, key: &Value) -> Result<String> {
        let converted = self.config.convert_key(key)?;
        Ok(match &self.config.key_prefix {
            Some(prefix) => format!("{}{}", prefix.current(), converted),
            None => converted,
        })
    }

    /// Current key prefix, empty when unset
    pub fn key_prefix(&self) -> String {
        self.config
            .key_prefix
            .as_ref()
            .map(KeyPrefix::current)
            .unwrap_or_default()
    }

    /// Backing store
    pub fn backend(&self) -> &Arc<dyn RemoteBackend> {
        &self.backend
    }
}

impl Cache for RemoteCache {
    fn kind(&self) -> CacheKind {
        CacheKind::Remote
    }

    fn config(&self) -> &CacheConfig {
        &self.config
    }

    fn get_entry(&self, key: &Value) -> Result<Option<CacheEntry>> {
        let key = self.full_key(key)?;
        match self.backend.get(&key)? {
            Some(record) => {
                let value = self.decoder.decode(&record.data)?;
                Ok(Some(CacheEntry::new(value, record.expire_at)))
            }
            None => Ok(None),
        }
    }

    fn put_with_expire(&self, key: &Value, value: Value, expire: Option<Duration>) -> Result<()> {
        let key = self.full_key(key)?;
        let record = RemoteRecord {
            data: self.encoder.encode(&value)?,
            expire_at: expire_at(expire),
        };
        self.backend.put(&key, record)
    }

    fn invalidate(&self, key: &Value) -> Result<bool> {
        let key = self.full_key(key)?;
        self.backend.delete(&key)
    }
}

// =============================================================================
// Builder
// =============================================================================

/// Builder for [`RemoteCache`]; cloned per site from the area template
#[derive(Clone)]
pub struct RemoteCacheBuilder {
    backend: Arc<dyn RemoteBackend>,
    config: CacheConfig,
}

impl RemoteCacheBuilder {
    /// Create a builder over a backend client
    pub fn new(backend: Arc<dyn RemoteBackend>) -> Self {
        Self {
            backend,
            config: CacheConfig::default(),
        }
    }

    /// Builder over a fresh in-memory backend
    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemoryRemoteBackend::new()))
    }

    /// Static key prefix
    pub fn key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.config.key_prefix = Some(KeyPrefix::Static(prefix.into()));
        self
    }

    /// Key prefix computed on every key conversion
    pub fn key_prefix_supplier<F>(mut self, supplier: F) -> Self
    where
        F: Fn() -> String + Send + Sync + 'static,
    {
        self.config.key_prefix = Some(KeyPrefix::supplier(supplier));
        self
    }

    /// Default write expiry
    pub fn expire_after_write(mut self, expire: Duration) -> Self {
        self.config.expire_after_write = Some(expire);
        self
    }

    /// Key convertor, resolved or deferred
    pub fn key_convertor(mut self, slot: CodecSlot<dyn KeyConvertor>) -> Self {
        self.config.key_convertor = Some(slot);
        self
    }

    /// Value encoder, resolved or deferred
    pub fn value_encoder(mut self, slot: CodecSlot<dyn ValueEncoder>) -> Self {
        self.config.value_encoder = Some(slot);
        self
    }

    /// Value decoder, resolved or deferred
    pub fn value_decoder(mut self, slot: CodecSlot<dyn ValueDecoder>) -> Self {
        self.config.value_decoder = Some(slot);
        self
    }

    /// Defer both value codec halves to a named serial policy
    pub fn serial_policy(self, name: &str) -> Self {
        self.value_encoder(CodecSlot::unresolved(name))
            .value_decoder(CodecSlot::unresolved(name))
    }

    /// Store `null` loader results
    pub fn cache_null_value(mut self, cache_null_value: bool) -> Self {
        self.config.cache_null_value = cache_null_value;
        self
    }

    /// Backend client
    pub fn backend(&self) -> &Arc<dyn RemoteBackend> {
        &self.backend
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
        Ok(Arc::new(RemoteCache::new(
            Arc::clone(&self.backend),
            self.config.clone(),
        )?))
    }
}

impl std::fmt::Debug for RemoteCacheBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteCacheBuilder")
            .field("backend", &self.backend.name())
            .field("config", &self.config)
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
