//! Configuration Provider
//!
//! The provider hands the engine its collaborators: the cache manager that
//! backs the registry, the name generator, the codec registry and the
//! optional monitor manager.

mod manager;
mod naming;

pub use manager::{CacheManager, SimpleCacheManager};
pub use naming::{CacheNameGenerator, DefaultCacheNameGenerator};

use std::sync::Arc;

use dashmap::DashMap;

use crate::codec::{
    builtin_key_convertor, builtin_value_decoder, builtin_value_encoder, KeyConvertor,
    ValueDecoder, ValueEncoder,
};
use crate::error::{Error, Result};
use crate::monitor::CacheMonitorManager;

/// Source of the engine's collaborators
pub trait ConfigProvider: Send + Sync {
    /// Registry backing store
    fn cache_manager(&self) -> Arc<dyn CacheManager>;

    /// Name generator honoring the given hidden packages
    fn create_cache_name_generator(&self, hidden_packages: &[String]) -> Arc<dyn CacheNameGenerator>;

    /// Key convertor by name
    fn parse_key_convertor(&self, name: &str) -> Result<Arc<dyn KeyConvertor>>;

    /// Value encoder by serial policy name
    fn parse_value_encoder(&self, name: &str) -> Result<Arc<dyn ValueEncoder>>;

    /// Value decoder by serial policy name
    fn parse_value_decoder(&self, name: &str) -> Result<Arc<dyn ValueDecoder>>;

    /// Monitor manager, if monitoring is configured
    fn cache_monitor_manager(&self) -> Option<Arc<dyn CacheMonitorManager>> {
        None
    }
}

/// Default provider with built-in and registered codecs
pub struct DefaultConfigProvider {
    cache_manager: Arc<dyn CacheManager>,
    monitor: Option<Arc<dyn CacheMonitorManager>>,
    key_convertors: DashMap<String, Arc<dyn KeyConvertor>>,
    serial_policies: DashMap<String, (Arc<dyn ValueEncoder>, Arc<dyn ValueDecoder>)>,
    name_generators: DashMap<Vec<String>, Arc<dyn CacheNameGenerator>>,
}

impl Default for DefaultConfigProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl DefaultConfigProvider {
    /// Provider with a [`SimpleCacheManager`] and no monitor
    pub fn new() -> Self {
        Self {
            cache_manager: Arc::new(SimpleCacheManager::new()),
            monitor: None,
            key_convertors: DashMap::new(),
            serial_policies: DashMap::new(),
            name_generators: DashMap::new(),
        }
    }

    /// Use a specific cache manager
    pub fn with_cache_manager(mut self, manager: Arc<dyn CacheManager>) -> Self {
        self.cache_manager = manager;
        self
    }

    /// Register finished caches with a monitor manager
    pub fn with_monitor(mut self, monitor: Arc<dyn CacheMonitorManager>) -> Self {
        self.monitor = Some(monitor);
        self
    }

    /// Register a custom key convertor; it shadows a built-in of the same name
    pub fn register_key_convertor(&self, name: &str, convertor: Arc<dyn KeyConvertor>) {
        self.key_convertors
            .insert(name.to_ascii_lowercase(), convertor);
    }

    /// Register a custom serial policy
    pub fn register_serial_policy(
        &self,
        name: &str,
        encoder: Arc<dyn ValueEncoder>,
        decoder: Arc<dyn ValueDecoder>,
    ) {
        self.serial_policies
            .insert(name.to_ascii_lowercase(), (encoder, decoder));
    }
}

impl ConfigProvider for DefaultConfigProvider {
    fn cache_manager(&self) -> Arc<dyn CacheManager> {
        Arc::clone(&self.cache_manager)
    }

    fn create_cache_name_generator(&self, hidden_packages: &[String]) -> Arc<dyn CacheNameGenerator> {
        let generator = self
            .name_generators
            .entry(hidden_packages.to_vec())
            .or_insert_with(|| Arc::new(DefaultCacheNameGenerator::new(hidden_packages)));
        Arc::clone(generator.value())
    }

    fn parse_key_convertor(&self, name: &str) -> Result<Arc<dyn KeyConvertor>> {
        if let Some(custom) = self.key_convertors.get(&name.to_ascii_lowercase()) {
            return Ok(Arc::clone(custom.value()));
        }
        builtin_key_convertor(name).ok_or_else(|| Error::UnknownKeyConvertor(name.to_string()))
    }

    fn parse_value_encoder(&self, name: &str) -> Result<Arc<dyn ValueEncoder>> {
        if let Some(custom) = self.serial_policies.get(&name.to_ascii_lowercase()) {
            return Ok(Arc::clone(&custom.value().0));
        }
        builtin_value_encoder(name).ok_or_else(|| Error::UnknownSerialPolicy(name.to_string()))
    }

    fn parse_value_decoder(&self, name: &str) -> Result<Arc<dyn ValueDecoder>> {
        if let Some(custom) = self.serial_policies.get(&name.to_ascii_lowercase()) {
            return Ok(Arc::clone(&custom.value().1));
        }
        builtin_value_decoder(name).ok_or_else(|| Error::UnknownSerialPolicy(name.to_string()))
    }

    fn cache_monitor_manager(&self) -> Option<Arc<dyn CacheMonitorManager>> {
        self.monitor.clone()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{Codec, JsonValueCodec};
    use crate::config::MethodSignature;
    use serde_json::{json, Value};

    struct UpperConvertor;

    impl Codec for UpperConvertor {
        fn name(&self) -> &str {
            "upper"
        }
    }

    impl KeyConvertor for UpperConvertor {
        fn convert(&self, key: &Value) -> Result<String> {
            Ok(key.to_string().to_uppercase())
        }
    }

    #[test]
    fn test_builtins() {
        let provider = DefaultConfigProvider::new();
        assert_eq!(provider.parse_key_convertor("Json").unwrap().name(), "json");
        assert_eq!(provider.parse_value_encoder("json_lz4").unwrap().name(), "json_lz4");
        assert_eq!(provider.parse_value_decoder("JSON").unwrap().name(), "json");
    }

    #[test]
    fn test_unknown_names() {
        let provider = DefaultConfigProvider::new();
        assert!(matches!(
            provider.parse_key_convertor("fastjson"),
            Err(Error::UnknownKeyConvertor(name)) if name == "fastjson"
        ));
        assert!(matches!(
            provider.parse_value_encoder("kryo"),
            Err(Error::UnknownSerialPolicy(name)) if name == "kryo"
        ));
        assert!(matches!(
            provider.parse_value_decoder("kryo"),
            Err(Error::UnknownSerialPolicy(_))
        ));
    }

    #[test]
    fn test_custom_codecs() {
        let provider = DefaultConfigProvider::new();
        provider.register_key_convertor("Upper", Arc::new(UpperConvertor));
        provider.register_serial_policy("raw", Arc::new(JsonValueCodec), Arc::new(JsonValueCodec));

        let convertor = provider.parse_key_convertor("upper").unwrap();
        assert_eq!(convertor.convert(&json!("ab")).unwrap(), "\"AB\"");
        assert_eq!(provider.parse_value_encoder("RAW").unwrap().name(), "json");
    }

    #[test]
    fn test_name_generator_shared_per_package_set() {
        let provider = DefaultConfigProvider::new();
        let hidden = vec!["com.example".to_string()];
        let a = provider.create_cache_name_generator(&hidden);
        let b = provider.create_cache_name_generator(&hidden);
        assert!(Arc::ptr_eq(&a, &b));

        let method = MethodSignature::new("com.example.Svc", "m", Vec::<String>::new());
        assert_eq!(a.generate_cache_name(&method), "Svc.m()");
    }

    #[test]
    fn test_no_monitor_by_default() {
        assert!(DefaultConfigProvider::new().cache_monitor_manager().is_none());
    }
}
