//! Invocation Context
//!
//! Resolves the cache behind a declaration for one intercepted call and
//! memoizes it on the declaration.

use std::sync::Arc;

use tracing::{debug, error};

use super::{is_enabled, CacheContext};
use crate::cache::Cache;
use crate::config::{CachedSettings, ConfigMap, MethodSignature, SiteConfig, SiteKind};
use crate::error::{Error, Result};

/// Resolution strategy shared by every call
pub struct CacheInvokeContext {
    context: Arc<CacheContext>,
    config_map: Arc<ConfigMap>,
}

impl CacheInvokeContext {
    pub(crate) fn new(context: Arc<CacheContext>, config_map: Arc<ConfigMap>) -> Self {
        Self { context, config_map }
    }

    /// Context for one call of `method`
    pub fn new_call(&self, method: MethodSignature, hidden_packages: Vec<String>) -> CallContext<'_> {
        CallContext {
            invoke: self,
            method,
            hidden_packages,
        }
    }

    pub fn config_map(&self) -> &Arc<ConfigMap> {
        &self.config_map
    }

    pub fn context(&self) -> &Arc<CacheContext> {
        &self.context
    }
}

/// One intercepted call
pub struct CallContext<'a> {
    invoke: &'a CacheInvokeContext,
    method: MethodSignature,
    hidden_packages: Vec<String>,
}

impl CallContext<'_> {
    pub fn method(&self) -> &MethodSignature {
        &self.method
    }

    /// Cache behind `site`, built on first use
    ///
    /// Build failures propagate. An invalidate or update declaration whose
    /// cached definition is unknown logs an error and yields `None`.
    pub fn resolve_cache(&self, site: &SiteConfig) -> Result<Option<Arc<dyn Cache>>> {
        if let Some(cache) = site.resolved_cache() {
            return Ok(Some(cache));
        }

        let cache = match site.kind() {
            SiteKind::Cached(settings) => self.resolve_cached(site, settings)?,
            SiteKind::Invalidate | SiteKind::Update => {
                let name = site.name().unwrap_or_default();
                let definition = self.invoke.config_map.get_by_cache_name(site.area(), name);
                let Some(settings) = definition.as_deref().and_then(SiteConfig::cached_settings) else {
                    let err = Error::MissingCachedDefinition {
                        area: site.area().to_string(),
                        name: name.to_string(),
                        define_method: site.define_method().to_string(),
                    };
                    error!(kind = site.kind().label(), error = %err, "Cannot resolve referenced cache");
                    return Ok(None);
                };
                self.invoke.context.get_or_create(settings, site.area(), name)?
            }
        };

        Ok(Some(site.bind_cache(cache)))
    }

    /// Whether caching applies to this call
    pub fn is_caching_active(&self, settings: &CachedSettings) -> bool {
        settings.enabled || is_enabled()
    }

    fn resolve_cached(&self, site: &SiteConfig, settings: &CachedSettings) -> Result<Arc<dyn Cache>> {
        let name = match site.name() {
            Some(name) => name.to_string(),
            None => {
                let generator = self
                    .invoke
                    .context
                    .config_provider()
                    .create_cache_name_generator(&self.hidden_packages);
                let generated = generator.generate_cache_name(&self.method);
                debug!(method = %self.method, name = %generated, "Generated cache name");
                generated
            }
        };
        self.invoke.context.get_or_create(settings, site.area(), &name)
    }
}

// =============================================================================
// Tests
// =============================================================================
