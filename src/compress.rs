//! Value Blob Compression
//!
//! LZ4 compression for value blobs headed to the slower tiers. Blobs below
//! the configured size floor stay plain; compression that fails or does not
//! shrink the blob falls back to plain.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::config::CompressionConfig;
use crate::error::{Error, Result};

/// Payload encoding marker stored alongside every entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Encoding {
    /// Uncompressed bytes
    Plain,
    /// LZ4 block compression with length prepended
    Lz4,
}

impl Encoding {
    /// Human-readable name
    pub fn name(&self) -> &'static str {
        match self {
            Encoding::Plain => "plain",
            Encoding::Lz4 => "lz4",
        }
    }
}

impl std::fmt::Display for Encoding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Compression codec for value blobs
pub struct BlobCompressor {
    config: CompressionConfig,
}

impl BlobCompressor {
    /// Create a compressor with the given configuration
    pub fn new(config: CompressionConfig) -> Self {
        Self { config }
    }

    /// Encode a blob for storage. Returns the (possibly compressed) bytes
    /// and the encoding to record with them.
    pub fn encode(&self, data: &Bytes) -> (Bytes, Encoding) {
        if !self.config.enabled || data.len() < self.config.min_size_bytes {
            return (data.clone(), Encoding::Plain);
        }

        match lz4::block::compress(
            data,
            Some(lz4::block::CompressionMode::HIGHCOMPRESSION(
                self.config.level,
            )),
            true,
        ) {
            Ok(compressed) if compressed.len() < data.len() => {
                (Bytes::from(compressed), Encoding::Lz4)
            }
            Ok(_) => (data.clone(), Encoding::Plain),
            Err(e) => {
                tracing::warn!(error = %e, "lz4 compression failed, storing plain");
                (data.clone(), Encoding::Plain)
            }
        }
    }

    /// Decode a stored blob back to its plain bytes
    pub fn decode(&self, data: &Bytes, encoding: Encoding) -> Result<Bytes> {
        match encoding {
            Encoding::Plain => Ok(data.clone()),
            Encoding::Lz4 => lz4::block::decompress(data, None)
                .map(Bytes::from)
                .map_err(|e| Error::DecompressionFailed {
                    algorithm: "lz4".into(),
                    reason: e.to_string(),
                }),
        }
    }
}

impl Default for BlobCompressor {
    fn default() -> Self {
        Self::new(CompressionConfig::default())
    }
}

// =============================================================================
// Tests
// =============================================================================
