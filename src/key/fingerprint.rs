//! Source Fingerprints
//!
//! A fingerprint ties a cache entry to the content of a mutable source file:
//! `(mtime, SHA-256)`. The mtime is a fast advisory check; the hash is the
//! authoritative one. Mtime alone is insufficient because file writes can
//! preserve it (`touch -r`), and hashing on every probe is too expensive, so
//! the coordinator trusts mtime equality and rehashes only on mismatch.

use std::path::Path;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};

/// Result of a metadata-only probe: the current mtime without rehashing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MtimeProbe {
    /// Modification time in unix milliseconds
    pub mtime_ms: i64,
}

/// `(mtime, content_hash)` pair used to detect source-file changes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fingerprint {
    /// Modification time in unix milliseconds (advisory fast path)
    pub mtime_ms: i64,
    /// SHA-256 digest of the full file bytes (authoritative)
    pub content_hash: [u8; 32],
}

impl Fingerprint {
    /// Compute the full fingerprint of a file: mtime plus SHA-256 over the
    /// entire byte stream. Fails with [`Error::SourceUnavailable`] if the
    /// path cannot be opened or read.
    pub async fn of_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let probe = Self::probe_mtime(path).await?;

        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| source_unavailable(path, e))?;

        let mut hasher = Sha256::new();
        hasher.update(&bytes);
        let content_hash: [u8; 32] = hasher.finalize().into();

        Ok(Self {
            mtime_ms: probe.mtime_ms,
            content_hash,
        })
    }

    /// Read only the mtime, skipping the hash. This is the coordinator's
    /// fast path for entry validation.
    pub async fn probe_mtime(path: impl AsRef<Path>) -> Result<MtimeProbe> {
        let path = path.as_ref();
        let meta = tokio::fs::metadata(path)
            .await
            .map_err(|e| source_unavailable(path, e))?;
        let mtime = meta.modified().map_err(|e| source_unavailable(path, e))?;
        let mtime_ms = mtime
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_millis() as i64)
            .unwrap_or(0);
        Ok(MtimeProbe { mtime_ms })
    }

    /// Constant-time compare on the hash field. Mtime is advisory and is
    /// deliberately excluded.
    pub fn content_eq(&self, other: &Fingerprint) -> bool {
        let mut diff = 0u8;
        for (a, b) in self.content_hash.iter().zip(other.content_hash.iter()) {
            diff |= a ^ b;
        }
        diff == 0
    }

    /// Replace the advisory mtime, keeping the hash. Used when a probe shows
    /// a new mtime but the content hash still matches.
    pub fn with_mtime(self, mtime_ms: i64) -> Self {
        Self { mtime_ms, ..self }
    }

    /// Hex rendering of the content hash
    pub fn hash_hex(&self) -> String {
        hex::encode(self.content_hash)
    }
}

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", &self.hash_hex()[..12], self.mtime_ms)
    }
}

fn source_unavailable(path: &Path, err: std::io::Error) -> Error {
    Error::SourceUnavailable {
        path: path.display().to_string(),
        reason: err.to_string(),
    }
}

// =============================================================================
// Tests
// =============================================================================
