//! Process-Wide Cache Configuration
//!
//! [`GlobalCacheConfig`] holds one builder template per `(tier, area)` plus
//! the flags every build consults. It is assembled once at startup and
//! shared read-only behind an `Arc`; builds clone templates, never mutate
//! them.

mod settings;
mod site;

pub use settings::{
    CacheSettings, LocalAreaSettings, RemoteAreaSettings, RemoteBackendKind, SiteKindSettings,
    SiteSettings,
};
pub use site::{
    CacheType, CachedSettings, ConfigMap, MethodSignature, PenetrationProtectConfig,
    RefreshPolicy, SiteConfig, SiteKind,
};

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::cache::{EmbeddedCacheBuilder, RemoteCacheBuilder};

/// Default area name
pub const DEFAULT_AREA: &str = "default";

/// Backend tier of an area template
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TierKind {
    Embedded,
    Remote,
}

impl fmt::Display for TierKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TierKind::Embedded => write!(f, "embedded"),
            TierKind::Remote => write!(f, "remote"),
        }
    }
}

/// Area templates and process-wide flags
#[derive(Debug, Clone, Default)]
pub struct GlobalCacheConfig {
    local_templates: HashMap<String, Arc<EmbeddedCacheBuilder>>,
    remote_templates: HashMap<String, Arc<RemoteCacheBuilder>>,
    area_in_cache_name: bool,
    penetration_protect: bool,
    hidden_packages: Vec<String>,
}

impl GlobalCacheConfig {
    /// Empty configuration: no templates, all flags off
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the embedded template of an area
    pub fn with_local_template(mut self, area: impl Into<String>, template: EmbeddedCacheBuilder) -> Self {
        self.local_templates.insert(area.into(), Arc::new(template));
        self
    }

    /// Register the remote template of an area
    pub fn with_remote_template(mut self, area: impl Into<String>, template: RemoteCacheBuilder) -> Self {
        self.remote_templates.insert(area.into(), Arc::new(template));
        self
    }

    /// Qualify remote key prefixes with the area (`area_name`)
    pub fn with_area_in_cache_name(mut self, enabled: bool) -> Self {
        self.area_in_cache_name = enabled;
        self
    }

    /// Default penetration protection for every site
    pub fn with_penetration_protect(mut self, enabled: bool) -> Self {
        self.penetration_protect = enabled;
        self
    }

    /// Package prefixes stripped from generated cache names
    pub fn with_hidden_packages(mut self, packages: Vec<String>) -> Self {
        self.hidden_packages = packages;
        self
    }

    /// Embedded template of an area
    pub fn local_template(&self, area: &str) -> Option<&Arc<EmbeddedCacheBuilder>> {
        self.local_templates.get(area)
    }

    /// Remote template of an area
    pub fn remote_template(&self, area: &str) -> Option<&Arc<RemoteCacheBuilder>> {
        self.remote_templates.get(area)
    }

    pub fn is_area_in_cache_name(&self) -> bool {
        self.area_in_cache_name
    }

    pub fn is_penetration_protect(&self) -> bool {
        self.penetration_protect
    }

    pub fn hidden_packages(&self) -> &[String] {
        &self.hidden_packages
    }

    /// Areas with an embedded template, sorted
    pub fn local_areas(&self) -> Vec<&str> {
        let mut areas: Vec<_> = self.local_templates.keys().map(String::as_str).collect();
        areas.sort_unstable();
        areas
    }

    /// Areas with a remote template, sorted
    pub fn remote_areas(&self) -> Vec<&str> {
        let mut areas: Vec<_> = self.remote_templates.keys().map(String::as_str).collect();
        areas.sort_unstable();
        areas
    }
}

// =============================================================================
// Tests
// =============================================================================
