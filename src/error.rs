//! Error types for cachewright

use thiserror::Error;

use crate::config::TierKind;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while building or using caches
#[derive(Error, Debug)]
#[allow(clippy::enum_variant_names)]
pub enum Error {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // =========================================================================
    // Configuration Errors
    // =========================================================================
    /// Configuration file could not be parsed
    #[error("Failed to parse configuration: {0}")]
    ConfigParse(#[from] serde_yaml::Error),

    /// Generic configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// No area template registered for the requested tier
    #[error("No {tier} cache builder registered for area: {area}")]
    NoTierBuilder { tier: TierKind, area: String },

    /// Key convertor name not known to the provider
    #[error("Unknown key convertor: {0}")]
    UnknownKeyConvertor(String),

    /// Serial policy name not known to the provider
    #[error("Unknown serial policy: {0}")]
    UnknownSerialPolicy(String),

    /// A deferred codec specifier reached build time unresolved
    #[error("Codec '{0}' was never resolved before build")]
    UnresolvedCodec(String),

    // =========================================================================
    // Reference Errors
    // =========================================================================
    /// Invalidate/update declaration points at an unknown cached definition
    #[error("Can't find cached definition with area={area} name={name}, specified in {define_method}")]
    MissingCachedDefinition {
        area: String,
        name: String,
        define_method: String,
    },

    // =========================================================================
    // Codec Errors
    // =========================================================================
    /// Value or key encoding failed
    #[error("Encoding with {codec} failed: {reason}")]
    Encode { codec: String, reason: String },

    /// Value decoding failed
    #[error("Decoding with {codec} failed: {reason}")]
    Decode { codec: String, reason: String },

    /// Compression failed
    #[error("Compression with {algorithm} failed: {reason}")]
    CompressionFailed { algorithm: String, reason: String },

    /// Decompression failed
    #[error("Decompression with {algorithm} failed: {reason}")]
    DecompressionFailed { algorithm: String, reason: String },

    // =========================================================================
    // Runtime Errors
    // =========================================================================
    /// Value loader supplied to compute_if_absent failed
    #[error("Cache loader failed for key {key}: {reason}")]
    Loader { key: String, reason: String },

    /// Monitor could not be attached to a cache
    #[error("Monitor registration failed for {area}/{name}: {reason}")]
    MonitorRegistration {
        area: String,
        name: String,
        reason: String,
    },

    /// Prometheus registry error
    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// True for errors raised by the build path because of bad configuration
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            Error::Config(_)
                | Error::ConfigParse(_)
                | Error::NoTierBuilder { .. }
                | Error::UnknownKeyConvertor(_)
                | Error::UnknownSerialPolicy(_)
                | Error::UnresolvedCodec(_)
        )
    }
}
