//! YAML Settings Model
//!
//! File form of the global configuration and the site declarations.
//! Durations are milliseconds. Codec names given for an area are kept as
//! deferred specifiers and resolved when a cache of that area is built.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::site::{
    CacheType, CachedSettings, ConfigMap, MethodSignature, PenetrationProtectConfig,
    RefreshPolicy, SiteConfig,
};
use super::{GlobalCacheConfig, DEFAULT_AREA};
use crate::cache::{EmbeddedCacheBuilder, InMemoryRemoteBackend, RemoteCacheBuilder};
use crate::codec::CodecSlot;
use crate::error::{Error, Result};

fn ms(value: Option<u64>) -> Option<Duration> {
    value.map(Duration::from_millis)
}

fn default_area() -> String {
    DEFAULT_AREA.to_string()
}

fn default_true() -> bool {
    true
}

/// Root of a settings file
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct CacheSettings {
    pub area_in_cache_name: bool,
    pub penetration_protect: bool,
    pub hidden_packages: Vec<String>,
    /// Embedded templates by area
    pub local: BTreeMap<String, LocalAreaSettings>,
    /// Remote templates by area
    pub remote: BTreeMap<String, RemoteAreaSettings>,
    pub sites: Vec<SiteSettings>,
}

/// Embedded template of one area
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct LocalAreaSettings {
    pub limit: Option<usize>,
    pub expire_after_write_ms: Option<u64>,
    pub expire_after_access_ms: Option<u64>,
    pub key_convertor: Option<String>,
}

/// Remote store implementation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RemoteBackendKind {
    #[default]
    Memory,
}

/// Remote template of one area
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct RemoteAreaSettings {
    pub backend: RemoteBackendKind,
    /// Prepended to every site prefix of this area
    pub key_prefix: Option<String>,
    pub key_convertor: Option<String>,
    pub serial_policy: Option<String>,
    pub expire_after_write_ms: Option<u64>,
}

/// Declaration kind in the file
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SiteKindSettings {
    #[default]
    Cached,
    Invalidate,
    Update,
}

/// One call-site declaration
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct SiteSettings {
    #[serde(default)]
    pub kind: SiteKindSettings,
    #[serde(default = "default_area")]
    pub area: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub method: Option<MethodSignature>,
    #[serde(default)]
    pub cache_type: CacheType,
    #[serde(default)]
    pub expire_ms: Option<u64>,
    #[serde(default)]
    pub local_expire_ms: Option<u64>,
    #[serde(default)]
    pub local_limit: Option<usize>,
    #[serde(default)]
    pub cache_null_value: bool,
    #[serde(default)]
    pub key_convertor: Option<String>,
    #[serde(default)]
    pub serial_policy: Option<String>,
    #[serde(default)]
    pub refresh_ms: Option<u64>,
    #[serde(default)]
    pub stop_refresh_after_last_access_ms: Option<u64>,
    /// Overrides the global default when set
    #[serde(default)]
    pub penetration_protect: Option<bool>,
    #[serde(default)]
    pub penetration_protect_timeout_ms: Option<u64>,
    #[serde(default)]
    pub sync_local: bool,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl CacheSettings {
    /// Parse settings from YAML text
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Read settings from a YAML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_yaml_str(&content)
    }

    /// Build the global configuration with one template per declared area
    pub fn to_global_config(&self) -> GlobalCacheConfig {
        let mut config = GlobalCacheConfig::new()
            .with_area_in_cache_name(self.area_in_cache_name)
            .with_penetration_protect(self.penetration_protect)
            .with_hidden_packages(self.hidden_packages.clone());

        for (area, local) in &self.local {
            config = config.with_local_template(area.clone(), local.to_template());
        }
        for (area, remote) in &self.remote {
            config = config.with_remote_template(area.clone(), remote.to_template());
        }
        config
    }

    /// Turn the site list into declarations
    ///
    /// Returns each declaration with its method; sites without a method get
    /// a synthetic one so they can still be registered.
    pub fn to_site_configs(&self) -> Result<Vec<(MethodSignature, Arc<SiteConfig>)>> {
        self.sites
            .iter()
            .enumerate()
            .map(|(index, site)| {
                let method = site.method.clone().unwrap_or_else(|| {
                    MethodSignature::new("config", format!("site{}", index), Vec::<String>::new())
                });
                let config = site
                    .to_site_config()?
                    .with_define_method(method.to_string());
                Ok((method, Arc::new(config)))
            })
            .collect()
    }

    /// Declarations registered in a fresh [`ConfigMap`]
    pub fn to_config_map(&self) -> Result<ConfigMap> {
        let map = ConfigMap::new();
        for (method, site) in self.to_site_configs()? {
            map.register(&method, site);
        }
        Ok(map)
    }
}

impl LocalAreaSettings {
    fn to_template(&self) -> EmbeddedCacheBuilder {
        let mut builder = EmbeddedCacheBuilder::new();
        if let Some(limit) = self.limit {
            builder = builder.limit(limit);
        }
        if let Some(expire) = ms(self.expire_after_write_ms) {
            builder = builder.expire_after_write(expire);
        }
        if let Some(expire) = ms(self.expire_after_access_ms) {
            builder = builder.expire_after_access(expire);
        }
        if let Some(name) = &self.key_convertor {
            builder = builder.key_convertor(CodecSlot::unresolved(name.as_str()));
        }
        builder
    }
}

impl RemoteAreaSettings {
    fn to_template(&self) -> RemoteCacheBuilder {
        let mut builder = match self.backend {
            RemoteBackendKind::Memory => {
                RemoteCacheBuilder::new(Arc::new(InMemoryRemoteBackend::new()))
            }
        };
        if let Some(prefix) = &self.key_prefix {
            // A supplier survives the per-site prefix composition
            let prefix = prefix.clone();
            builder = builder.key_prefix_supplier(move || prefix.clone());
        }
        if let Some(name) = &self.key_convertor {
            builder = builder.key_convertor(CodecSlot::unresolved(name.as_str()));
        }
        if let Some(name) = &self.serial_policy {
            builder = builder.serial_policy(name);
        }
        if let Some(expire) = ms(self.expire_after_write_ms) {
            builder = builder.expire_after_write(expire);
        }
        builder
    }
}

impl SiteSettings {
    /// Declaration described by this entry
    pub fn to_site_config(&self) -> Result<SiteConfig> {
        match self.kind {
            SiteKindSettings::Cached => Ok(SiteConfig::cached(
                self.area.clone(),
                self.name.clone(),
                self.cached_settings(),
            )),
            SiteKindSettings::Invalidate => Ok(SiteConfig::invalidate(
                self.area.clone(),
                self.referenced_name()?,
            )),
            SiteKindSettings::Update => Ok(SiteConfig::update(
                self.area.clone(),
                self.referenced_name()?,
            )),
        }
    }

    fn referenced_name(&self) -> Result<String> {
        match self.name.as_deref() {
            Some(name) if !name.is_empty() => Ok(name.to_string()),
            _ => Err(Error::Config(format!(
                "{:?} site in area '{}' must name the cache it references",
                self.kind, self.area
            ))),
        }
    }

    fn cached_settings(&self) -> CachedSettings {
        let refresh_policy = ms(self.refresh_ms).map(|refresh| RefreshPolicy {
            refresh,
            stop_refresh_after_last_access: ms(self.stop_refresh_after_last_access_ms),
        });
        let penetration_protect = self.penetration_protect.map(|enabled| PenetrationProtectConfig {
            enabled,
            timeout: ms(self.penetration_protect_timeout_ms),
        });

        CachedSettings {
            cache_type: self.cache_type,
            expire: ms(self.expire_ms),
            local_expire: ms(self.local_expire_ms),
            local_limit: self.local_limit,
            cache_null_value: self.cache_null_value,
            key_convertor: self.key_convertor.clone(),
            serial_policy: self.serial_policy.clone(),
            refresh_policy,
            penetration_protect,
            sync_local: self.sync_local,
            enabled: self.enabled,
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
