//! Build Pipeline
//!
//! Tier adapters, composition and policy wrapping. Everything here runs
//! under the registry's construction lock.

use std::sync::Arc;

use tracing::{debug, error};

use super::CacheContext;
use crate::cache::{Cache, CachePolicy, KeyPrefix, MultiLevelCacheBuilder, RefreshCache};
use crate::codec::{resolve_key_convertor, resolve_value_codec};
use crate::config::{CacheType, CachedSettings, TierKind};
use crate::error::{Error, Result};

/// Remote key prefix for a cache name
pub fn remote_key_prefix(area_in_cache_name: bool, area: &str, name: &str) -> String {
    if area_in_cache_name {
        format!("{}_{}", area, name)
    } else {
        name.to_string()
    }
}

/// Effective prefix given the template's current one
///
/// A template supplier is kept and the site prefix appended to its output;
/// anything else is replaced.
fn compose_prefix(template: Option<&KeyPrefix>, site_prefix: String) -> KeyPrefix {
    match template {
        Some(KeyPrefix::Supplier(supplier)) => {
            let supplier = Arc::clone(supplier);
            KeyPrefix::supplier(move || format!("{}{}", supplier(), site_prefix))
        }
        _ => KeyPrefix::Static(site_prefix),
    }
}

impl CacheContext {
    /// Full pipeline: compose tiers, then wrap with policies
    pub(crate) fn build_cache(&self, settings: &CachedSettings, area: &str, name: &str) -> Result<Arc<dyn Cache>> {
        let composed = self.compose(settings, area, name)?;
        Ok(self.apply_policies(composed, settings, area, name))
    }

    /// Embedded tier from the area template plus site overrides
    pub(crate) fn build_embedded_tier(&self, settings: &CachedSettings, area: &str) -> Result<Arc<dyn Cache>> {
        let template = self
            .global_config
            .local_template(area)
            .ok_or_else(|| Error::NoTierBuilder {
                tier: TierKind::Embedded,
                area: area.to_string(),
            })?;

        let mut builder = (**template).clone();
        let config = builder.config_mut();
        if let Some(limit) = settings.local_limit {
            config.limit = Some(limit);
        }
        if let Some(expire) = settings.embedded_expire() {
            config.expire_after_write = Some(expire);
        }
        resolve_key_convertor(
            self.config_provider.as_ref(),
            settings.key_convertor.as_deref(),
            &mut config.key_convertor,
        )?;
        config.cache_null_value = settings.cache_null_value;

        builder.build_cache()
    }

    /// Remote tier from the area template plus site overrides
    pub(crate) fn build_remote_tier(&self, settings: &CachedSettings, area: &str, name: &str) -> Result<Arc<dyn Cache>> {
        let template = self
            .global_config
            .remote_template(area)
            .ok_or_else(|| Error::NoTierBuilder {
                tier: TierKind::Remote,
                area: area.to_string(),
            })?;

        let mut builder = (**template).clone();
        let config = builder.config_mut();
        if let Some(expire) = settings.site_expire() {
            config.expire_after_write = Some(expire);
        }

        let site_prefix = remote_key_prefix(self.global_config.is_area_in_cache_name(), area, name);
        config.key_prefix = Some(compose_prefix(config.key_prefix.as_ref(), site_prefix));

        resolve_key_convertor(
            self.config_provider.as_ref(),
            settings.key_convertor.as_deref(),
            &mut config.key_convertor,
        )?;
        resolve_value_codec(
            self.config_provider.as_ref(),
            settings.serial_policy.as_deref(),
            &mut config.value_encoder,
            &mut config.value_decoder,
        )?;
        config.cache_null_value = settings.cache_null_value;

        builder.build_cache()
    }

    /// One tier, or embedded in front of remote
    pub(crate) fn compose(&self, settings: &CachedSettings, area: &str, name: &str) -> Result<Arc<dyn Cache>> {
        match settings.cache_type {
            CacheType::Embedded => self.build_embedded_tier(settings, area),
            CacheType::Remote => self.build_remote_tier(settings, area, name),
            CacheType::Both => {
                let local = self.build_embedded_tier(settings, area)?;
                let remote = self.build_remote_tier(settings, area, name)?;
                let use_expire_of_sub_cache = settings.use_expire_of_sub_cache();
                debug!(area, name, use_expire_of_sub_cache, "Composing multi-level cache");

                MultiLevelCacheBuilder::new()
                    .expire_after_write(remote.config().expire_after_write)
                    .add_cache(local)
                    .add_cache(remote)
                    .use_expire_of_sub_cache(use_expire_of_sub_cache)
                    .cache_null_value(settings.cache_null_value)
                    .build_cache()
            }
        }
    }

    /// Wrap with the refresh decorator and register with the monitor
    pub(crate) fn apply_policies(
        &self,
        composed: Arc<dyn Cache>,
        settings: &CachedSettings,
        area: &str,
        name: &str,
    ) -> Arc<dyn Cache> {
        let mut policy = CachePolicy {
            refresh_policy: settings.refresh_policy.clone(),
            penetration_protect: self.global_config.is_penetration_protect(),
            penetration_protect_timeout: None,
        };
        if let Some(site) = &settings.penetration_protect {
            policy.penetration_protect = site.enabled;
            policy.penetration_protect_timeout = site.timeout;
        }

        let decorated = Arc::new(RefreshCache::new(composed, policy));
        self.scheduler.register(&decorated);
        let cache: Arc<dyn Cache> = decorated;

        if let Some(monitor) = self.config_provider.cache_monitor_manager() {
            if let Err(e) = monitor.add_monitors(area, name, &cache, settings.sync_local) {
                error!(area, name, error = %e, "Failed to register cache monitor");
            }
        }
        cache
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{CacheKind, EmbeddedCacheBuilder, RemoteCacheBuilder};
    use crate::codec::{Codec, CodecSlot, NoneKeyConvertor};
    use crate::config::{GlobalCacheConfig, PenetrationProtectConfig, DEFAULT_AREA};
    use crate::provider::DefaultConfigProvider;
    use std::time::Duration;

    fn context(global: GlobalCacheConfig) -> Arc<CacheContext> {
        CacheContext::new(Arc::new(DefaultConfigProvider::new()), Arc::new(global))
    }

    fn global() -> GlobalCacheConfig {
        GlobalCacheConfig::new()
            .with_local_template(
                DEFAULT_AREA,
                EmbeddedCacheBuilder::new()
                    .limit(100)
                    .expire_after_write(Duration::from_secs(600))
                    .key_convertor(CodecSlot::unresolved("json")),
            )
            .with_remote_template(
                DEFAULT_AREA,
                RemoteCacheBuilder::in_memory()
                    .expire_after_write(Duration::from_secs(120))
                    .serial_policy("json"),
            )
    }

    #[test]
    fn test_prefix_rule() {
        assert_eq!(remote_key_prefix(true, "orders", "findById"), "orders_findById");
        assert_eq!(remote_key_prefix(false, "orders", "findById"), "findById");
    }

    #[test]
    fn test_supplier_prefix_is_composed() {
        let template = KeyPrefix::supplier(|| "app:".to_string());
        let prefix = compose_prefix(Some(&template), "users".into());
        assert!(prefix.is_supplier());
        assert_eq!(prefix.current(), "app:users");

        let prefix = compose_prefix(Some(&KeyPrefix::Static("old".into())), "users".into());
        assert_eq!(prefix.current(), "users");
    }

    #[test]
    fn test_embedded_tier_overrides() {
        let ctx = context(global());
        let settings = CachedSettings {
            cache_type: CacheType::Embedded,
            local_limit: Some(5),
            expire: Some(Duration::from_secs(30)),
            key_convertor: Some("none".into()),
            ..Default::default()
        };
        let tier = ctx.build_embedded_tier(&settings, DEFAULT_AREA).unwrap();

        assert_eq!(tier.config().limit, Some(5));
        assert_eq!(tier.config().expire_after_write, Some(Duration::from_secs(30)));
        let convertor = tier.config().key_convertor.as_ref().unwrap().get().unwrap();
        assert_eq!(convertor.name(), "none");
    }

    #[test]
    fn test_template_expiry_kept_without_site_value() {
        let ctx = context(global());
        let tier = ctx
            .build_embedded_tier(&CachedSettings::default(), DEFAULT_AREA)
            .unwrap();
        assert_eq!(tier.config().expire_after_write, Some(Duration::from_secs(600)));
        // Deferred template codec resolved on the clone only
        assert!(tier.config().key_convertor.as_ref().unwrap().is_resolved());
        let template = ctx.global_config().local_template(DEFAULT_AREA).unwrap();
        assert!(!template.config().key_convertor.as_ref().unwrap().is_resolved());
    }

    #[test]
    fn test_zero_site_expire_keeps_template() {
        let ctx = context(global());
        let settings = CachedSettings {
            cache_type: CacheType::Both,
            expire: Some(Duration::ZERO),
            ..Default::default()
        };
        let composed = ctx.compose(&settings, DEFAULT_AREA, "users").unwrap();

        assert_eq!(
            composed.config().expire_after_write,
            Some(Duration::from_secs(120))
        );
        let tiers = composed.children();
        assert_eq!(tiers[0].config().expire_after_write, Some(Duration::from_secs(600)));
        assert_eq!(tiers[1].config().expire_after_write, Some(Duration::from_secs(120)));

        composed.put(&serde_json::json!("k"), serde_json::json!(1)).unwrap();
        assert_eq!(composed.get(&serde_json::json!("k")).unwrap(), Some(serde_json::json!(1)));
    }

    #[test]
    fn test_missing_template() {
        let ctx = context(GlobalCacheConfig::new());
        let err = ctx
            .build_remote_tier(&CachedSettings::default(), "orders", "byId")
            .err()
            .unwrap();
        assert_eq!(
            err.to_string(),
            "No remote cache builder registered for area: orders"
        );
    }

    #[test]
    fn test_compose_both() {
        let ctx = context(global());
        let settings = CachedSettings {
            cache_type: CacheType::Both,
            local_expire: Some(Duration::from_secs(5)),
            cache_null_value: true,
            ..Default::default()
        };
        let composed = ctx.compose(&settings, DEFAULT_AREA, "users").unwrap();

        assert_eq!(composed.kind(), CacheKind::MultiLevel);
        assert!(composed.config().use_expire_of_sub_cache);
        assert!(composed.config().cache_null_value);
        assert_eq!(
            composed.config().expire_after_write,
            Some(Duration::from_secs(120))
        );
        let tiers = composed.children();
        assert_eq!(tiers[0].kind(), CacheKind::Embedded);
        assert_eq!(tiers[0].config().expire_after_write, Some(Duration::from_secs(5)));
        assert_eq!(tiers[1].kind(), CacheKind::Remote);
    }

    #[test]
    fn test_site_penetration_override() {
        let ctx = context(global().with_penetration_protect(true));
        let composed = EmbeddedCacheBuilder::new().build_cache().unwrap();

        let default = ctx.apply_policies(Arc::clone(&composed), &CachedSettings::default(), "a", "x");
        assert!(default.config().penetration_protect);
        assert_eq!(default.config().penetration_protect_timeout, None);

        let settings = CachedSettings {
            penetration_protect: Some(PenetrationProtectConfig {
                enabled: false,
                timeout: Some(Duration::from_millis(250)),
            }),
            ..Default::default()
        };
        let overridden = ctx.apply_policies(composed, &settings, "a", "y");
        assert!(!overridden.config().penetration_protect);
        assert_eq!(
            overridden.config().penetration_protect_timeout,
            Some(Duration::from_millis(250))
        );
        assert_eq!(overridden.kind(), CacheKind::Refresh);
    }

    #[test]
    fn test_custom_convertor_from_template_untouched() {
        let custom: Arc<dyn crate::codec::KeyConvertor> = Arc::new(NoneKeyConvertor);
        let global = GlobalCacheConfig::new().with_local_template(
            DEFAULT_AREA,
            EmbeddedCacheBuilder::new().key_convertor(CodecSlot::resolved(Arc::clone(&custom))),
        );
        let ctx = context(global);
        let tier = ctx
            .build_embedded_tier(&CachedSettings::default(), DEFAULT_AREA)
            .unwrap();
        let used = tier.config().key_convertor.as_ref().unwrap().get().unwrap();
        assert!(Arc::ptr_eq(&used, &custom));
    }
}
