//! Call-Site Declarations
//!
//! A [`SiteConfig`] is created once per intercepted call site and is read-only
//! afterwards, apart from its late-bound cache which is set at most once.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};

use crate::cache::Cache;

/// Which tiers a site uses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheType {
    /// Embedded tier only
    #[serde(alias = "local")]
    Embedded,
    /// Remote tier only
    #[default]
    Remote,
    /// Embedded in front of remote
    Both,
}

impl fmt::Display for CacheType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheType::Embedded => write!(f, "embedded"),
            CacheType::Remote => write!(f, "remote"),
            CacheType::Both => write!(f, "both"),
        }
    }
}

/// Proactive reload of loaded keys
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshPolicy {
    /// Interval between reloads of one key
    pub refresh: Duration,
    /// Stop reloading a key not read for this long
    pub stop_refresh_after_last_access: Option<Duration>,
}

impl RefreshPolicy {
    /// Refresh every `refresh`, forever
    pub fn every(refresh: Duration) -> Self {
        Self {
            refresh,
            stop_refresh_after_last_access: None,
        }
    }
}

/// Site override of the process-wide penetration protection default
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PenetrationProtectConfig {
    pub enabled: bool,
    /// How long a miss waits for a concurrent load of the same key
    pub timeout: Option<Duration>,
}

/// Settings of a "cached" declaration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedSettings {
    pub cache_type: CacheType,
    /// Site expiry, applies to every tier
    pub expire: Option<Duration>,
    /// Embedded-tier expiry, only used with [`CacheType::Both`]
    pub local_expire: Option<Duration>,
    /// Embedded entry limit
    pub local_limit: Option<usize>,
    pub cache_null_value: bool,
    /// Key convertor name, overrides the area template
    pub key_convertor: Option<String>,
    /// Serial policy name, overrides the area template
    pub serial_policy: Option<String>,
    pub refresh_policy: Option<RefreshPolicy>,
    pub penetration_protect: Option<PenetrationProtectConfig>,
    /// Ask for cross-instance embedded-tier synchronization
    pub sync_local: bool,
    /// Static enable flag
    pub enabled: bool,
}

impl Default for CachedSettings {
    fn default() -> Self {
        Self {
            cache_type: CacheType::default(),
            expire: None,
            local_expire: None,
            local_limit: None,
            cache_null_value: false,
            key_convertor: None,
            serial_policy: None,
            refresh_policy: None,
            penetration_protect: None,
            sync_local: false,
            enabled: true,
        }
    }
}

impl CachedSettings {
    /// Embedded tier expiry override for this site
    ///
    /// Under [`CacheType::Both`] a positive `local_expire` wins, otherwise the
    /// site `expire` applies. `None` keeps the template expiry.
    pub fn embedded_expire(&self) -> Option<Duration> {
        match self.local_expire {
            Some(local) if self.cache_type == CacheType::Both && !local.is_zero() => Some(local),
            _ => self.site_expire(),
        }
    }

    /// Site expiry override; zero means unset
    pub fn site_expire(&self) -> Option<Duration> {
        self.expire.filter(|d| !d.is_zero())
    }

    /// Whether every tier of a multi-level cache keeps its own expiry
    pub fn use_expire_of_sub_cache(&self) -> bool {
        self.cache_type == CacheType::Both && self.local_expire.is_some_and(|d| !d.is_zero())
    }
}

/// Kind of declaration at a call site
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SiteKind {
    /// Reads through and populates a cache
    Cached(CachedSettings),
    /// Removes entries from a cache declared elsewhere
    Invalidate,
    /// Overwrites entries of a cache declared elsewhere
    Update,
}

impl SiteKind {
    /// Short label used in logs
    pub fn label(&self) -> &'static str {
        match self {
            SiteKind::Cached(_) => "cached",
            SiteKind::Invalidate => "invalidate",
            SiteKind::Update => "update",
        }
    }
}

/// Signature of an intercepted method
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MethodSignature {
    pub declaring_type: String,
    pub method: String,
    #[serde(default)]
    pub param_types: Vec<String>,
}

impl MethodSignature {
    /// Create a signature
    pub fn new(
        declaring_type: impl Into<String>,
        method: impl Into<String>,
        param_types: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Self {
            declaring_type: declaring_type.into(),
            method: method.into(),
            param_types: param_types.into_iter().map(Into::into).collect(),
        }
    }
}

impl fmt::Display for MethodSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{}({})",
            self.declaring_type,
            self.method,
            self.param_types.join(",")
        )
    }
}

/// Per call-site configuration
pub struct SiteConfig {
    area: String,
    name: Option<String>,
    define_method: String,
    kind: SiteKind,
    resolved: OnceCell<Arc<dyn Cache>>,
}

impl SiteConfig {
    /// A "cached" declaration; `name = None` generates one from the method
    pub fn cached(area: impl Into<String>, name: Option<String>, settings: CachedSettings) -> Self {
        Self::new(area.into(), name, SiteKind::Cached(settings))
    }

    /// An "invalidate" declaration referencing `(area, name)`
    pub fn invalidate(area: impl Into<String>, name: impl Into<String>) -> Self {
        Self::new(area.into(), Some(name.into()), SiteKind::Invalidate)
    }

    /// An "update" declaration referencing `(area, name)`
    pub fn update(area: impl Into<String>, name: impl Into<String>) -> Self {
        Self::new(area.into(), Some(name.into()), SiteKind::Update)
    }

    fn new(area: String, name: Option<String>, kind: SiteKind) -> Self {
        Self {
            area,
            name: name.filter(|n| !n.is_empty()),
            define_method: String::new(),
            kind,
            resolved: OnceCell::new(),
        }
    }

    /// Record where the declaration was found
    pub fn with_define_method(mut self, define_method: impl Into<String>) -> Self {
        self.define_method = define_method.into();
        self
    }

    pub fn area(&self) -> &str {
        &self.area
    }

    /// Explicit cache name, if declared
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn define_method(&self) -> &str {
        &self.define_method
    }

    pub fn kind(&self) -> &SiteKind {
        &self.kind
    }

    /// Settings of a "cached" declaration
    pub fn cached_settings(&self) -> Option<&CachedSettings> {
        match &self.kind {
            SiteKind::Cached(settings) => Some(settings),
            _ => None,
        }
    }

    /// Cache bound to this site, if resolved
    pub fn resolved_cache(&self) -> Option<Arc<dyn Cache>> {
        self.resolved.get().cloned()
    }

    /// Bind a cache; the first binding wins and is returned
    pub(crate) fn bind_cache(&self, cache: Arc<dyn Cache>) -> Arc<dyn Cache> {
        Arc::clone(self.resolved.get_or_init(|| cache))
    }
}

impl fmt::Debug for SiteConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SiteConfig")
            .field("area", &self.area)
            .field("name", &self.name)
            .field("define_method", &self.define_method)
            .field("kind", &self.kind)
            .field("resolved", &self.resolved.get().is_some())
            .finish()
    }
}

/// Known declarations, by method and by cache name
#[derive(Default)]
pub struct ConfigMap {
    by_method: DashMap<String, Arc<SiteConfig>>,
    by_cache_name: DashMap<(String, String), Arc<SiteConfig>>,
}

impl ConfigMap {
    /// Create an empty map
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a declaration for a method
    ///
    /// Named "cached" declarations also become resolvable by `(area, name)`.
    pub fn register(&self, method: &MethodSignature, site: Arc<SiteConfig>) {
        if let (SiteKind::Cached(_), Some(name)) = (site.kind(), site.name()) {
            self.by_cache_name
                .insert((site.area().to_string(), name.to_string()), Arc::clone(&site));
        }
        self.by_method.insert(method.to_string(), site);
    }

    /// Declaration registered for a method
    pub fn get_by_method(&self, method: &MethodSignature) -> Option<Arc<SiteConfig>> {
        self.by_method
            .get(&method.to_string())
            .map(|e| Arc::clone(e.value()))
    }

    /// "Cached" declaration for `(area, name)`
    pub fn get_by_cache_name(&self, area: &str, name: &str) -> Option<Arc<SiteConfig>> {
        self.by_cache_name
            .get(&(area.to_string(), name.to_string()))
            .map(|e| Arc::clone(e.value()))
    }

    /// Number of registered methods
    pub fn len(&self) -> usize {
        self.by_method.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_method.is_empty()
    }
}

// =============================================================================
// Tests
// =============================================================================
