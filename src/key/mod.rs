//! Cache Keys
//!
//! Deterministic, content-addressed cache keys. A key is the tuple
//! `(namespace, identifier, variant)` flattened to a stable byte sequence
//! with length-prefixed fields, so equal tuples always produce equal bytes
//! and differing tuples never collide.

mod fingerprint;

pub use fingerprint::{Fingerprint, MtimeProbe};

use std::hash::{Hash, Hasher};

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{Error, Result};

/// Cache key - `(namespace, identifier, variant)` tuple
#[derive(Clone, Debug, Eq)]
pub struct CacheKey {
    /// Precomputed hash of the encoded bytes (for fast comparison and
    /// compact Markov states)
    state_hash: u64,
    /// Namespace selecting the compute callback and codec
    namespace: String,
    /// Caller-supplied identifier: path, content hash, or normalized query
    identifier: String,
    /// Parameters that change the result (analysis level, model, count)
    variant: String,
}

impl CacheKey {
    /// Create a new cache key.
    ///
    /// Rejects empty `namespace` or `identifier` with [`Error::InvalidKey`];
    /// an empty `variant` is allowed.
    pub fn new(
        namespace: impl Into<String>,
        identifier: impl Into<String>,
        variant: impl Into<String>,
    ) -> Result<Self> {
        let namespace = namespace.into();
        let identifier = identifier.into();
        let variant = variant.into();

        if namespace.is_empty() {
            return Err(Error::InvalidKey("empty namespace".into()));
        }
        if identifier.is_empty() {
            return Err(Error::InvalidKey("empty identifier".into()));
        }

        let state_hash = fx_hash_fields(&namespace, &identifier, &variant);

        Ok(Self {
            state_hash,
            namespace,
            identifier,
            variant,
        })
    }

    /// Encode to a stable byte sequence: `u32` little-endian length prefix
    /// followed by UTF-8 bytes, per field, in fixed field order.
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(
            12 + self.namespace.len() + self.identifier.len() + self.variant.len(),
        );
        for field in [&self.namespace, &self.identifier, &self.variant] {
            buf.put_u32_le(field.len() as u32);
            buf.put_slice(field.as_bytes());
        }
        buf.freeze()
    }

    /// Decode a key previously produced by [`CacheKey::encode`]
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let mut rest = bytes;
        let mut fields = Vec::with_capacity(3);
        for _ in 0..3 {
            if rest.len() < 4 {
                return Err(Error::InvalidKey("truncated key bytes".into()));
            }
            let len = u32::from_le_bytes([rest[0], rest[1], rest[2], rest[3]]) as usize;
            rest = &rest[4..];
            if rest.len() < len {
                return Err(Error::InvalidKey("truncated key field".into()));
            }
            let field = std::str::from_utf8(&rest[..len])
                .map_err(|_| Error::InvalidKey("non-UTF-8 key field".into()))?;
            fields.push(field.to_string());
            rest = &rest[len..];
        }
        if !rest.is_empty() {
            return Err(Error::InvalidKey("trailing bytes after key".into()));
        }
        let variant = fields.pop().unwrap_or_default();
        let identifier = fields.pop().unwrap_or_default();
        let namespace = fields.pop().unwrap_or_default();
        Self::new(namespace, identifier, variant)
    }

    /// Namespace name
    #[inline]
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Caller-supplied identifier
    #[inline]
    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    /// Result variant
    #[inline]
    pub fn variant(&self) -> &str {
        &self.variant
    }

    /// Compact 64-bit state hash, used by the Markov model and the
    /// single-flight map
    #[inline]
    pub fn state_hash(&self) -> u64 {
        self.state_hash
    }
}

impl PartialEq for CacheKey {
    fn eq(&self, other: &Self) -> bool {
        // Fast path: compare precomputed hashes first
        if self.state_hash != other.state_hash {
            return false;
        }
        self.namespace == other.namespace
            && self.identifier == other.identifier
            && self.variant == other.variant
    }
}

impl Hash for CacheKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.state_hash.hash(state);
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}:{}", self.namespace, self.identifier, self.variant)
    }
}

/// Fast non-cryptographic hash (FxHash algorithm) over the three fields,
/// fed with length separators so field boundaries stay unambiguous
fn fx_hash_fields(namespace: &str, identifier: &str, variant: &str) -> u64 {
    const SEED: u64 = 0x517cc1b727220a95;
    let mut hash = SEED;
    let mut feed = |bytes: &[u8]| {
        for chunk in (bytes.len() as u32).to_le_bytes().iter().chain(bytes) {
            hash = hash.rotate_left(5) ^ (*chunk as u64);
            hash = hash.wrapping_mul(SEED);
        }
    };
    feed(namespace.as_bytes());
    feed(identifier.as_bytes());
    feed(variant.as_bytes());
    hash
}

// =============================================================================
// Tests
// =============================================================================
