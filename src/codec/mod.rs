//! Key Convertors and Value Codecs
//!
//! Caches see keys and values as `serde_json::Value`. Before a key touches a
//! store it is turned into a string by a [`KeyConvertor`]; before a value is
//! written to a remote tier it is turned into bytes by a [`ValueEncoder`]
//! (and back by a [`ValueDecoder`]).
//!
//! Area templates may name a codec before any provider exists to build it.
//! Such a slot holds [`CodecSlot::Unresolved`] until the build pipeline
//! resolves it (see [`resolver`]).
//!
//! # Built-in codecs
//!
//! | kind           | name       | format                               |
//! |----------------|------------|--------------------------------------|
//! | key convertor  | `json`     | canonical JSON text                  |
//! | key convertor  | `none`     | strings verbatim, others as JSON     |
//! | value codec    | `json`     | `serde_json` bytes                   |
//! | value codec    | `json_lz4` | `serde_json` bytes, LZ4 block        |

pub mod compression;
pub mod resolver;

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use serde_json::Value;

use crate::error::{Error, Result};
use compression::Lz4Compressor;

pub use resolver::{resolve_key_convertor, resolve_value_codec};

/// Key convertor name: canonical JSON text
pub const KEY_CONVERTOR_JSON: &str = "json";

/// Key convertor name: identity for strings
pub const KEY_CONVERTOR_NONE: &str = "none";

/// Serial policy name: plain JSON
pub const SERIAL_POLICY_JSON: &str = "json";

/// Serial policy name: LZ4-compressed JSON
pub const SERIAL_POLICY_JSON_LZ4: &str = "json_lz4";

// =============================================================================
// Codec Traits
// =============================================================================

/// Common surface of every codec
pub trait Codec: Send + Sync {
    /// Registry name of the codec
    fn name(&self) -> &str;
}

/// Turns a cache key into the string used by the backing store
pub trait KeyConvertor: Codec {
    /// Convert a key
    fn convert(&self, key: &Value) -> Result<String>;
}

/// Serializes values for remote tiers
pub trait ValueEncoder: Codec {
    /// Encode a value
    fn encode(&self, value: &Value) -> Result<Bytes>;
}

/// Deserializes values read from remote tiers
pub trait ValueDecoder: Codec {
    /// Decode a value
    fn decode(&self, data: &[u8]) -> Result<Value>;
}

// =============================================================================
// Deferred Specifier
// =============================================================================

/// A codec slot: either a name still waiting for a provider, or a codec
pub enum CodecSlot<T: ?Sized> {
    /// Name captured from configuration, not yet turned into a codec
    Unresolved(String),
    /// Working codec
    Resolved(Arc<T>),
}

impl<T: ?Sized> CodecSlot<T> {
    /// Create a deferred slot
    pub fn unresolved(name: impl Into<String>) -> Self {
        CodecSlot::Unresolved(name.into())
    }

    /// Create a resolved slot
    pub fn resolved(codec: Arc<T>) -> Self {
        CodecSlot::Resolved(codec)
    }

    /// Whether the slot already holds a codec
    pub fn is_resolved(&self) -> bool {
        matches!(self, CodecSlot::Resolved(_))
    }

    /// Deferred name, if still unresolved
    pub fn deferred_name(&self) -> Option<&str> {
        match self {
            CodecSlot::Unresolved(name) => Some(name),
            CodecSlot::Resolved(_) => None,
        }
    }

    /// Get the codec; unresolved slots are a configuration error
    pub fn get(&self) -> Result<Arc<T>> {
        match self {
            CodecSlot::Resolved(codec) => Ok(Arc::clone(codec)),
            CodecSlot::Unresolved(name) => Err(Error::UnresolvedCodec(name.clone())),
        }
    }
}

impl<T: ?Sized + Codec> CodecSlot<T> {
    /// Human-readable description (`json` or `json (deferred)`)
    pub fn describe(&self) -> String {
        match self {
            CodecSlot::Resolved(codec) => codec.name().to_string(),
            CodecSlot::Unresolved(name) => format!("{} (deferred)", name),
        }
    }
}

impl<T: ?Sized> Clone for CodecSlot<T> {
    fn clone(&self) -> Self {
        match self {
            CodecSlot::Unresolved(name) => CodecSlot::Unresolved(name.clone()),
            CodecSlot::Resolved(codec) => CodecSlot::Resolved(Arc::clone(codec)),
        }
    }
}

impl<T: ?Sized> fmt::Debug for CodecSlot<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CodecSlot::Unresolved(name) => f.debug_tuple("Unresolved").field(name).finish(),
            CodecSlot::Resolved(_) => f.write_str("Resolved(..)"),
        }
    }
}

// =============================================================================
// Key Convertors
// =============================================================================

/// Canonical JSON key text
#[derive(Debug, Default)]
pub struct JsonKeyConvertor;

impl Codec for JsonKeyConvertor {
    fn name(&self) -> &str {
        KEY_CONVERTOR_JSON
    }
}

impl KeyConvertor for JsonKeyConvertor {
    fn convert(&self, key: &Value) -> Result<String> {
        serde_json::to_string(key).map_err(|e| Error::Encode {
            codec: KEY_CONVERTOR_JSON.into(),
            reason: e.to_string(),
        })
    }
}

/// Strings pass through untouched; everything else becomes JSON text
#[derive(Debug, Default)]
pub struct NoneKeyConvertor;

impl Codec for NoneKeyConvertor {
    fn name(&self) -> &str {
        KEY_CONVERTOR_NONE
    }
}

impl KeyConvertor for NoneKeyConvertor {
    fn convert(&self, key: &Value) -> Result<String> {
        match key {
            Value::String(s) => Ok(s.clone()),
            other => Ok(other.to_string()),
        }
    }
}

// =============================================================================
// Value Codecs
// =============================================================================

/// Plain JSON value codec
#[derive(Debug, Default)]
pub struct JsonValueCodec;

impl Codec for JsonValueCodec {
    fn name(&self) -> &str {
        SERIAL_POLICY_JSON
    }
}

impl ValueEncoder for JsonValueCodec {
    fn encode(&self, value: &Value) -> Result<Bytes> {
        serde_json::to_vec(value)
            .map(Bytes::from)
            .map_err(|e| Error::Encode {
                codec: SERIAL_POLICY_JSON.into(),
                reason: e.to_string(),
            })
    }
}

impl ValueDecoder for JsonValueCodec {
    fn decode(&self, data: &[u8]) -> Result<Value> {
        serde_json::from_slice(data).map_err(|e| Error::Decode {
            codec: SERIAL_POLICY_JSON.into(),
            reason: e.to_string(),
        })
    }
}

/// JSON compressed with LZ4
#[derive(Default)]
pub struct Lz4JsonValueCodec {
    compressor: Lz4Compressor,
}

impl Codec for Lz4JsonValueCodec {
    fn name(&self) -> &str {
        SERIAL_POLICY_JSON_LZ4
    }
}

impl ValueEncoder for Lz4JsonValueCodec {
    fn encode(&self, value: &Value) -> Result<Bytes> {
        let json = JsonValueCodec.encode(value)?;
        self.compressor.compress(&json).map(Bytes::from)
    }
}

impl ValueDecoder for Lz4JsonValueCodec {
    fn decode(&self, data: &[u8]) -> Result<Value> {
        let json = self.compressor.decompress(data)?;
        JsonValueCodec.decode(&json)
    }
}

// =============================================================================
// Built-in Lookup
// =============================================================================

/// Look up a built-in key convertor (case-insensitive)
pub fn builtin_key_convertor(name: &str) -> Option<Arc<dyn KeyConvertor>> {
    match name.to_ascii_lowercase().as_str() {
        KEY_CONVERTOR_JSON => Some(Arc::new(JsonKeyConvertor)),
        KEY_CONVERTOR_NONE => Some(Arc::new(NoneKeyConvertor)),
        _ => None,
    }
}

/// Look up a built-in value encoder (case-insensitive)
pub fn builtin_value_encoder(name: &str) -> Option<Arc<dyn ValueEncoder>> {
    match name.to_ascii_lowercase().as_str() {
        SERIAL_POLICY_JSON => Some(Arc::new(JsonValueCodec)),
        SERIAL_POLICY_JSON_LZ4 => Some(Arc::new(Lz4JsonValueCodec::default())),
        _ => None,
    }
}

/// Look up a built-in value decoder (case-insensitive)
pub fn builtin_value_decoder(name: &str) -> Option<Arc<dyn ValueDecoder>> {
    match name.to_ascii_lowercase().as_str() {
        SERIAL_POLICY_JSON => Some(Arc::new(JsonValueCodec)),
        SERIAL_POLICY_JSON_LZ4 => Some(Arc::new(Lz4JsonValueCodec::default())),
        _ => None,
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_json_key_convertor() {
        let convertor = JsonKeyConvertor;
        assert_eq!(convertor.convert(&json!("abc")).unwrap(), "\"abc\"");
        assert_eq!(convertor.convert(&json!([1, 2])).unwrap(), "[1,2]");
    }

    #[test]
    fn test_none_key_convertor_keeps_strings() {
        let convertor = NoneKeyConvertor;
        assert_eq!(convertor.convert(&json!("abc")).unwrap(), "abc");
        assert_eq!(convertor.convert(&json!(42)).unwrap(), "42");
    }

    #[test]
    fn test_lz4_json_codec() {
        let codec = Lz4JsonValueCodec::default();
        let value = json!({"user": "alice", "bio": "a".repeat(512)});

        let encoded = codec.encode(&value).unwrap();
        assert!(encoded.len() < serde_json::to_vec(&value).unwrap().len());
        assert_eq!(codec.decode(&encoded).unwrap(), value);
    }

    #[test]
    fn test_json_decode_garbage_fails() {
        let err = JsonValueCodec.decode(b"{not json").unwrap_err();
        assert!(matches!(err, Error::Decode { .. }));
    }

    #[test]
    fn test_codec_slot_states() {
        let deferred: CodecSlot<dyn KeyConvertor> = CodecSlot::unresolved("json");
        assert!(!deferred.is_resolved());
        assert_eq!(deferred.deferred_name(), Some("json"));
        assert_eq!(deferred.describe(), "json (deferred)");
        assert!(matches!(deferred.get(), Err(Error::UnresolvedCodec(_))));

        let resolved: CodecSlot<dyn KeyConvertor> = CodecSlot::resolved(Arc::new(NoneKeyConvertor));
        assert!(resolved.is_resolved());
        assert_eq!(resolved.describe(), "none");
        assert_eq!(resolved.get().unwrap().name(), "none");
    }

    #[test]
    fn test_builtin_lookup_is_case_insensitive() {
        assert!(builtin_key_convertor("JSON").is_some());
        assert!(builtin_value_encoder("Json_Lz4").is_some());
        assert!(builtin_value_decoder("java").is_none());
    }
}
