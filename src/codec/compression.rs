//! LZ4 Compression for Encoded Values
//!
//! Block compression with a size prefix so the decoder does not need to know
//! the original length.
//!
//! # Example
//!
//! ```
//! use cachewright::codec::compression::Lz4Compressor;
//!
//! let lz4 = Lz4Compressor::new();
//!
//! let data = b"Hello, this is test data that should compress well! well! well!";
//! let compressed = lz4.compress(data).unwrap();
//!
//! let decompressed = lz4.decompress(&compressed).unwrap();
//! assert_eq!(decompressed.as_slice(), data);
//! ```

use crate::error::{Error, Result};

/// Default LZ4 high-compression level
const DEFAULT_LEVEL: i32 = 4;

/// LZ4 compressor (fast compression)
#[derive(Debug, Clone)]
pub struct Lz4Compressor {
    level: i32,
}

impl Lz4Compressor {
    /// Create new LZ4 compressor with default settings
    pub fn new() -> Self {
        Self {
            level: DEFAULT_LEVEL,
        }
    }

    /// Create with custom compression level
    pub fn with_level(level: i32) -> Self {
        Self { level }
    }

    /// Compression level in use
    pub fn level(&self) -> i32 {
        self.level
    }

    /// Compress data, prefixing the original size
    pub fn compress(&self, data: &[u8]) -> Result<Vec<u8>> {
        lz4::block::compress(
            data,
            Some(lz4::block::CompressionMode::HIGHCOMPRESSION(self.level)),
            true,
        )
        .map_err(|e| Error::CompressionFailed {
            algorithm: "LZ4".into(),
            reason: e.to_string(),
        })
    }

    /// Decompress size-prefixed data
    pub fn decompress(&self, data: &[u8]) -> Result<Vec<u8>> {
        lz4::block::decompress(data, None).map_err(|e| Error::DecompressionFailed {
            algorithm: "LZ4".into(),
            reason: e.to_string(),
        })
    }
}

impl Default for Lz4Compressor {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lz4_roundtrip() {
        let lz4 = Lz4Compressor::new();
        let data: Vec<u8> = b"abcdefgh".iter().cycle().take(4096).copied().collect();

        let compressed = lz4.compress(&data).unwrap();
        assert!(compressed.len() < data.len());

        let decompressed = lz4.decompress(&compressed).unwrap();
        assert_eq!(decompressed, data);
    }

    #[test]
    fn test_lz4_custom_level() {
        let lz4 = Lz4Compressor::with_level(9);
        assert_eq!(lz4.level(), 9);

        let compressed = lz4.compress(b"short").unwrap();
        assert_eq!(lz4.decompress(&compressed).unwrap(), b"short");
    }

    #[test]
    fn test_lz4_rejects_corrupt_input() {
        let lz4 = Lz4Compressor::new();
        // Size prefix claims 16 bytes, body is a truncated literal run
        let corrupt = [0x10, 0x00, 0x00, 0x00, 0xFF, 0xFF];
        let result = lz4.decompress(&corrupt);
        assert!(matches!(result, Err(Error::DecompressionFailed { .. })));
    }
}
