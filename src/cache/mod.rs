//! Cache Capability and Tiers
//!
//! Every cache the engine hands out implements [`Cache`]. Concrete tiers are
//! composed into a decorator chain:
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │ RefreshCache (stats, refresh, penetration)   │
//! ├──────────────────────────────────────────────┤
//! │ MultiLevelCache        (only for BOTH sites) │
//! │   ┌──────────────────┐  ┌──────────────────┐ │
//! │   │ EmbeddedCache    │  │ RemoteCache      │ │
//! │   │ ShardedMap       │  │ RemoteBackend    │ │
//! │   └──────────────────┘  └──────────────────┘ │
//! └──────────────────────────────────────────────┘
//! ```
//!
//! Keys and values are `serde_json::Value`. A `null` loader result means
//! "no value" and is only stored when `cache_null_value` is set.

mod embedded;
mod entry;
mod multi_level;
mod refresh;
mod remote;
mod shard;
mod stats;

pub use embedded::{EmbeddedCache, EmbeddedCacheBuilder};
pub use entry::{expire_at, now_millis, CacheEntry, StoredEntry};
pub use multi_level::{MultiLevelCache, MultiLevelCacheBuilder};
pub use refresh::{CachePolicy, RefreshCache};
pub use remote::{
    InMemoryRemoteBackend, RemoteBackend, RemoteBackendStats, RemoteCache, RemoteCacheBuilder,
    RemoteRecord,
};
pub use shard::{Shard, ShardedMap};
pub use stats::{CacheStats, StatsSnapshot};

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use crate::codec::{CodecSlot, JsonKeyConvertor, KeyConvertor, ValueDecoder, ValueEncoder};
use crate::config::RefreshPolicy;
use crate::error::Result;

/// Number of shards per embedded cache
pub const EMBEDDED_SHARD_COUNT: usize = 16;

/// Loader invoked on a miss; `Value::Null` means "no value"
pub type Loader = Arc<dyn Fn(&Value) -> Result<Value> + Send + Sync>;

// =============================================================================
// Cache Kind
// =============================================================================

/// Concrete shape of a cache
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheKind {
    Embedded,
    Remote,
    MultiLevel,
    Refresh,
}

impl fmt::Display for CacheKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheKind::Embedded => write!(f, "embedded"),
            CacheKind::Remote => write!(f, "remote"),
            CacheKind::MultiLevel => write!(f, "multi_level"),
            CacheKind::Refresh => write!(f, "refresh"),
        }
    }
}

// =============================================================================
// Key Prefix
// =============================================================================

/// Prefix prepended to every remote key
#[derive(Clone)]
pub enum KeyPrefix {
    /// Fixed text
    Static(String),
    /// Evaluated on every key conversion
    Supplier(Arc<dyn Fn() -> String + Send + Sync>),
}

impl KeyPrefix {
    /// Wrap a closure as a supplier
    pub fn supplier<F>(f: F) -> Self
    where
        F: Fn() -> String + Send + Sync + 'static,
    {
        KeyPrefix::Supplier(Arc::new(f))
    }

    /// Current prefix text
    pub fn current(&self) -> String {
        match self {
            KeyPrefix::Static(prefix) => prefix.clone(),
            KeyPrefix::Supplier(supplier) => supplier(),
        }
    }

    /// Whether the prefix is computed lazily
    pub fn is_supplier(&self) -> bool {
        matches!(self, KeyPrefix::Supplier(_))
    }
}

impl fmt::Debug for KeyPrefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyPrefix::Static(prefix) => f.debug_tuple("Static").field(prefix).finish(),
            KeyPrefix::Supplier(supplier) => {
                f.debug_tuple("Supplier").field(&supplier()).finish()
            }
        }
    }
}

// =============================================================================
// Cache Configuration
// =============================================================================

/// Settings carried by every cache and builder
#[derive(Debug, Clone, Default)]
pub struct CacheConfig {
    /// Default write expiry, `None` = never
    pub expire_after_write: Option<Duration>,
    /// Idle expiry (embedded tier only)
    pub expire_after_access: Option<Duration>,
    pub key_convertor: Option<CodecSlot<dyn KeyConvertor>>,
    pub value_encoder: Option<CodecSlot<dyn ValueEncoder>>,
    pub value_decoder: Option<CodecSlot<dyn ValueDecoder>>,
    /// Remote key prefix
    pub key_prefix: Option<KeyPrefix>,
    /// Maximum entry count (embedded tier only)
    pub limit: Option<usize>,
    pub cache_null_value: bool,
    /// Multi-level only: let every tier keep its own expiry
    pub use_expire_of_sub_cache: bool,
    pub refresh_policy: Option<RefreshPolicy>,
    pub penetration_protect: bool,
    /// How long a penetration-protected miss waits for a concurrent load
    pub penetration_protect_timeout: Option<Duration>,
}

impl CacheConfig {
    /// Convert a key with the configured convertor, JSON text when unset
    pub fn convert_key(&self, key: &Value) -> Result<String> {
        match &self.key_convertor {
            Some(slot) => slot.get()?.convert(key),
            None => JsonKeyConvertor.convert(key),
        }
    }

    /// Whether a loaded value should be written back
    #[inline]
    pub fn should_store(&self, value: &Value) -> bool {
        !value.is_null() || self.cache_null_value
    }
}

// =============================================================================
// Cache Trait
// =============================================================================

/// Key-value cache capability shared by all tiers and decorators
pub trait Cache: Send + Sync {
    /// Concrete shape
    fn kind(&self) -> CacheKind;

    /// Effective settings
    fn config(&self) -> &CacheConfig;

    /// Read a value with its absolute expiry
    fn get_entry(&self, key: &Value) -> Result<Option<CacheEntry>>;

    /// Write a value; `expire = None` stores it without expiry
    fn put_with_expire(&self, key: &Value, value: Value, expire: Option<Duration>) -> Result<()>;

    /// Remove a key; true if it was present
    fn invalidate(&self, key: &Value) -> Result<bool>;

    /// Wrapped or composed caches, outermost first
    fn children(&self) -> Vec<Arc<dyn Cache>> {
        Vec::new()
    }

    /// Counters, if this cache keeps any
    fn stats(&self) -> Option<StatsSnapshot> {
        None
    }

    /// Read a value
    fn get(&self, key: &Value) -> Result<Option<Value>> {
        Ok(self.get_entry(key)?.map(CacheEntry::into_value))
    }

    /// Write a value with the default expiry
    fn put(&self, key: &Value, value: Value) -> Result<()> {
        self.put_with_expire(key, value, self.config().expire_after_write)
    }

    /// Read a value, loading and storing it on a miss
    fn compute_if_absent(&self, key: &Value, loader: Loader) -> Result<Value> {
        if let Some(value) = self.get(key)? {
            return Ok(value);
        }
        let value = loader(key)?;
        if self.config().should_store(&value) {
            self.put(key, value.clone())?;
        }
        Ok(value)
    }
}

/// Wrap a closure as a [`Loader`]
pub fn loader<F>(f: F) -> Loader
where
    F: Fn(&Value) -> Result<Value> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Render a cache and its children as an indented tree
pub fn render_tree(cache: &Arc<dyn Cache>) -> String {
    let mut out = String::new();
    render_node(cache, 0, &mut out);
    out
}

fn render_node(cache: &Arc<dyn Cache>, depth: usize, out: &mut String) {
    let config = cache.config();
    let mut attrs = Vec::new();

    if let Some(expire) = config.expire_after_write {
        attrs.push(format!("expire={}ms", expire.as_millis()));
    }
    if let Some(limit) = config.limit {
        attrs.push(format!("limit={}", limit));
    }
    if let Some(prefix) = &config.key_prefix {
        attrs.push(format!("prefix={:?}", prefix.current()));
    }
    if let Some(slot) = &config.key_convertor {
        attrs.push(format!("key={}", slot.describe()));
    }
    if let Some(slot) = &config.value_encoder {
        attrs.push(format!("value={}", slot.describe()));
    }
    if config.use_expire_of_sub_cache {
        attrs.push("use_expire_of_sub_cache".to_string());
    }
    if config.cache_null_value {
        attrs.push("cache_null".to_string());
    }
    if cache.kind() == CacheKind::Refresh {
        if let Some(policy) = &config.refresh_policy {
            attrs.push(format!("refresh={}ms", policy.refresh.as_millis()));
        }
        if config.penetration_protect {
            attrs.push("penetration_protect".to_string());
        }
    }

    out.push_str(&"  ".repeat(depth));
    out.push_str(&cache.kind().to_string());
    if !attrs.is_empty() {
        out.push_str(" [");
        out.push_str(&attrs.join(", "));
        out.push(']');
    }
    out.push('\n');

    for child in cache.children() {
        render_node(&child, depth + 1, out);
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_key_prefix_supplier_is_lazy() {
        let counter = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&counter);
        let prefix = KeyPrefix::supplier(move || {
            format!("gen{}:", c.fetch_add(1, Ordering::SeqCst))
        });

        assert!(prefix.is_supplier());
        assert_eq!(prefix.current(), "gen0:");
        assert_eq!(prefix.current(), "gen1:");
        assert_eq!(KeyPrefix::Static("p:".into()).current(), "p:");
    }

    #[test]
    fn test_convert_key_defaults_to_json() {
        let config = CacheConfig::default();
        assert_eq!(config.convert_key(&json!("k")).unwrap(), "\"k\"");
    }

    #[test]
    fn test_should_store_null_only_when_enabled() {
        let mut config = CacheConfig::default();
        assert!(!config.should_store(&Value::Null));
        assert!(config.should_store(&json!(0)));
        config.cache_null_value = true;
        assert!(config.should_store(&Value::Null));
    }

    #[test]
    fn test_default_compute_if_absent() {
        let cache = EmbeddedCacheBuilder::new().build_cache().unwrap();
        let calls = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&calls);
        let load = loader(move |key| {
            c.fetch_add(1, Ordering::SeqCst);
            Ok(json!(format!("v-{}", key)))
        });

        let first = cache.compute_if_absent(&json!(1), Arc::clone(&load)).unwrap();
        let second = cache.compute_if_absent(&json!(1), load).unwrap();
        assert_eq!(first, json!("v-1"));
        assert_eq!(first, second);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_render_tree() {
        let cache = EmbeddedCacheBuilder::new()
            .limit(10)
            .expire_after_write(Duration::from_secs(1))
            .build_cache()
            .unwrap();
        let tree = render_tree(&cache);
        assert_eq!(tree, "embedded [expire=1000ms, limit=10]\n");
    }
}
