//! Cachewright - Declarative Cache Construction Engine
//!
//! Turns per-site cache declarations into shared, fully-configured cache
//! instances. Each `(area, name)` gets exactly one instance, built lazily from
//! an immutable per-area template plus the site's overrides.
//!
//! # Architecture
//!
//! ```text
//! SiteConfig → CallContext → CacheContext → CacheRegistry
//!                                  │
//!                   AreaTemplate clone + overrides
//!                                  │
//!        Embedded / Remote tier → MultiLevel → RefreshCache → Monitor
//! ```
//!
//! # Modules
//!
//! - [`cache`] - Cache trait, tiers and the refresh decorator
//! - [`codec`] - Key convertors, value encoders and decoders
//! - [`config`] - Site declarations, area templates and YAML settings
//! - [`context`] - Registry, build pipeline, invocation and enable scope
//! - [`error`] - Error types
//! - [`monitor`] - Cache monitoring (Prometheus)
//! - [`provider`] - Config provider, cache manager and name generation

pub mod cache;
pub mod codec;
pub mod config;
pub mod context;
pub mod error;
pub mod monitor;
pub mod provider;

// Re-export commonly used types
pub use cache::{Cache, CacheConfig, CacheKind, EmbeddedCacheBuilder, RemoteCacheBuilder};
pub use config::{CacheSettings, CacheType, CachedSettings, ConfigMap, GlobalCacheConfig, MethodSignature, SiteConfig};
pub use context::{enable_cache, is_enabled, CacheContext, CacheInvokeContext, CallContext};
pub use error::{Error, Result};
pub use monitor::{CacheMonitorManager, PrometheusMonitorManager};
pub use provider::{ConfigProvider, DefaultConfigProvider};

/// Crate version
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
