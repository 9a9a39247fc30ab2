//! Codec Resolution
//!
//! Two-stage resolution applied to a builder's codec slots:
//!
//! 1. a name given explicitly at the call site is parsed now and always wins;
//! 2. otherwise a deferred name left in the slot by the area template is
//!    parsed now;
//! 3. a slot that already holds a codec is left untouched.

use std::sync::Arc;

use tracing::trace;

use super::{CodecSlot, KeyConvertor, ValueDecoder, ValueEncoder};
use crate::error::Result;
use crate::provider::ConfigProvider;

/// Resolve one slot against an optional site specifier
fn resolve_slot<T: ?Sized>(
    slot: &mut Option<CodecSlot<T>>,
    site_spec: Option<&str>,
    parse: impl Fn(&str) -> Result<Arc<T>>,
) -> Result<()> {
    if let Some(name) = site_spec {
        *slot = Some(CodecSlot::Resolved(parse(name)?));
        return Ok(());
    }

    let deferred = slot
        .as_ref()
        .and_then(|s| s.deferred_name())
        .map(str::to_owned);
    if let Some(name) = deferred {
        trace!(codec = %name, "Resolving deferred codec from area template");
        *slot = Some(CodecSlot::Resolved(parse(&name)?));
    }
    Ok(())
}

/// Resolve the key convertor slot
pub fn resolve_key_convertor(
    provider: &dyn ConfigProvider,
    site_spec: Option<&str>,
    slot: &mut Option<CodecSlot<dyn KeyConvertor>>,
) -> Result<()> {
    resolve_slot(slot, site_spec, |name| provider.parse_key_convertor(name))
}

/// Resolve the value encoder and decoder slots
///
/// A site serial policy sets both halves; otherwise each half resolves its
/// own deferred name independently.
pub fn resolve_value_codec(
    provider: &dyn ConfigProvider,
    site_serial_policy: Option<&str>,
    encoder: &mut Option<CodecSlot<dyn ValueEncoder>>,
    decoder: &mut Option<CodecSlot<dyn ValueDecoder>>,
) -> Result<()> {
    resolve_slot(encoder, site_serial_policy, |name| {
        provider.parse_value_encoder(name)
    })?;
    resolve_slot(decoder, site_serial_policy, |name| {
        provider.parse_value_decoder(name)
    })
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{Codec, JsonValueCodec, NoneKeyConvertor};
    use crate::error::Error;
    use crate::provider::DefaultConfigProvider;

    struct CustomConvertor;

    impl Codec for CustomConvertor {
        fn name(&self) -> &str {
            "custom"
        }
    }

    impl KeyConvertor for CustomConvertor {
        fn convert(&self, key: &serde_json::Value) -> Result<String> {
            Ok(format!("custom:{}", key))
        }
    }

    #[test]
    fn test_site_specifier_overrides_deferred_template() {
        let provider = DefaultConfigProvider::new();
        let mut slot = Some(CodecSlot::unresolved("json"));

        resolve_key_convertor(&provider, Some("none"), &mut slot).unwrap();

        let codec = slot.unwrap().get().unwrap();
        assert_eq!(codec.name(), "none");
    }

    #[test]
    fn test_site_specifier_overrides_resolved_template() {
        let provider = DefaultConfigProvider::new();
        let mut slot: Option<CodecSlot<dyn KeyConvertor>> =
            Some(CodecSlot::resolved(Arc::new(CustomConvertor)));

        resolve_key_convertor(&provider, Some("json"), &mut slot).unwrap();

        assert_eq!(slot.unwrap().get().unwrap().name(), "json");
    }

    #[test]
    fn test_deferred_template_is_resolved() {
        let provider = DefaultConfigProvider::new();
        let mut slot = Some(CodecSlot::unresolved("NONE"));

        resolve_key_convertor(&provider, None, &mut slot).unwrap();

        let slot = slot.unwrap();
        assert!(slot.is_resolved());
        assert_eq!(slot.get().unwrap().name(), "none");
    }

    #[test]
    fn test_resolved_template_is_untouched() {
        let provider = DefaultConfigProvider::new();
        let custom: Arc<dyn KeyConvertor> = Arc::new(CustomConvertor);
        let mut slot = Some(CodecSlot::resolved(Arc::clone(&custom)));

        resolve_key_convertor(&provider, None, &mut slot).unwrap();

        let resolved = slot.unwrap().get().unwrap();
        assert!(Arc::ptr_eq(&resolved, &custom));
    }

    #[test]
    fn test_empty_slot_stays_empty() {
        let provider = DefaultConfigProvider::new();
        let mut slot: Option<CodecSlot<dyn KeyConvertor>> = None;

        resolve_key_convertor(&provider, None, &mut slot).unwrap();

        assert!(slot.is_none());
    }

    #[test]
    fn test_unknown_deferred_name_fails() {
        let provider = DefaultConfigProvider::new();
        let mut slot: Option<CodecSlot<dyn KeyConvertor>> = Some(CodecSlot::unresolved("kryo"));

        let err = resolve_key_convertor(&provider, None, &mut slot).unwrap_err();
        assert!(matches!(err, Error::UnknownKeyConvertor(name) if name == "kryo"));
    }

    #[test]
    fn test_value_codec_halves_resolve_independently() {
        let provider = DefaultConfigProvider::new();
        let json: Arc<dyn ValueEncoder> = Arc::new(JsonValueCodec);
        let mut encoder = Some(CodecSlot::resolved(Arc::clone(&json)));
        let mut decoder = Some(CodecSlot::unresolved("json_lz4"));

        resolve_value_codec(&provider, None, &mut encoder, &mut decoder).unwrap();

        assert!(Arc::ptr_eq(&encoder.unwrap().get().unwrap(), &json));
        assert_eq!(decoder.unwrap().get().unwrap().name(), "json_lz4");
    }

    #[test]
    fn test_site_serial_policy_sets_both_halves() {
        let provider = DefaultConfigProvider::new();
        let mut encoder = Some(CodecSlot::unresolved("json"));
        let mut decoder: Option<CodecSlot<dyn ValueDecoder>> = None;

        resolve_value_codec(&provider, Some("json_lz4"), &mut encoder, &mut decoder).unwrap();

        assert_eq!(encoder.unwrap().get().unwrap().name(), "json_lz4");
        assert_eq!(decoder.unwrap().get().unwrap().name(), "json_lz4");
    }

    #[test]
    fn test_none_convertor_registered_by_default() {
        let provider = DefaultConfigProvider::new();
        let convertor = provider.parse_key_convertor("none").unwrap();
        let expected = NoneKeyConvertor.convert(&serde_json::json!("k")).unwrap();
        assert_eq!(convertor.convert(&serde_json::json!("k")).unwrap(), expected);
    }
}
