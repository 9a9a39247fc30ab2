//! Cache Context
//!
//! Owns the collaborators of the construction engine: the config provider,
//! the global area templates, the shared registry and the refresh
//! scheduler. Every cache in the process is built through here.

mod build;
mod enable;
mod invoke;
mod registry;
mod scheduler;

pub use build::remote_key_prefix;
pub use enable::{enable_cache, enable_depth, is_enabled, EnableGuard};
pub use invoke::{CacheInvokeContext, CallContext};
pub use registry::CacheRegistry;
pub use scheduler::RefreshScheduler;

use std::sync::Arc;

use crate::cache::Cache;
use crate::config::{CachedSettings, ConfigMap, GlobalCacheConfig, DEFAULT_AREA};
use crate::error::Result;
use crate::provider::ConfigProvider;

/// Process-wide cache construction context
pub struct CacheContext {
    config_provider: Arc<dyn ConfigProvider>,
    global_config: Arc<GlobalCacheConfig>,
    registry: CacheRegistry,
    scheduler: Arc<RefreshScheduler>,
}

impl CacheContext {
    /// Create a context; the registry stores caches in the provider's manager
    pub fn new(config_provider: Arc<dyn ConfigProvider>, global_config: Arc<GlobalCacheConfig>) -> Arc<Self> {
        let registry = CacheRegistry::new(config_provider.cache_manager());
        Arc::new(Self {
            config_provider,
            global_config,
            registry,
            scheduler: Arc::new(RefreshScheduler::new()),
        })
    }

    /// Shared cache for `(area, name)`, built from `settings` on first use
    ///
    /// Later calls return the first instance whatever settings they pass.
    pub fn get_or_create(&self, settings: &CachedSettings, area: &str, name: &str) -> Result<Arc<dyn Cache>> {
        self.registry
            .get_or_create(area, name, || self.build_cache(settings, area, name))
    }

    /// Existing cache for `(area, name)`
    pub fn get_cache(&self, area: &str, name: &str) -> Option<Arc<dyn Cache>> {
        self.registry.get(area, name)
    }

    /// Existing cache named `name` in the default area
    pub fn get_cache_in_default_area(&self, name: &str) -> Option<Arc<dyn Cache>> {
        self.get_cache(DEFAULT_AREA, name)
    }

    /// Drop a cache from the registry
    pub fn remove_cache(&self, area: &str, name: &str) -> Option<Arc<dyn Cache>> {
        self.registry.remove(area, name)
    }

    /// Per-call resolution strategy over the known declarations
    pub fn create_invoke_context(self: &Arc<Self>, config_map: Arc<ConfigMap>) -> CacheInvokeContext {
        CacheInvokeContext::new(Arc::clone(self), config_map)
    }

    pub fn refresh_scheduler(&self) -> &Arc<RefreshScheduler> {
        &self.scheduler
    }

    pub fn config_provider(&self) -> &Arc<dyn ConfigProvider> {
        &self.config_provider
    }

    pub fn global_config(&self) -> &Arc<GlobalCacheConfig> {
        &self.global_config
    }

    pub fn registry(&self) -> &CacheRegistry {
        &self.registry
    }
}

// =============================================================================
// Tests
// =============================================================================
