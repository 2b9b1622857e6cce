//! Cache Entry Types
//!
//! An entry is an opaque value blob plus the metadata every tier stores
//! alongside it: fingerprint, timestamps, size, and invalidation tags. The
//! cache never interprets the blob except to measure its size.

use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use chrono::Utc;

use crate::compress::Encoding;
use crate::key::{CacheKey, Fingerprint};

/// Process-global access clock. Every entry creation or touch draws a
/// fresh tick, so LRU ordering is strict even for accesses landing on the
/// same wall-clock millisecond.
static ACCESS_CLOCK: AtomicU64 = AtomicU64::new(1);

fn next_access_tick() -> u64 {
    ACCESS_CLOCK.fetch_add(1, Ordering::Relaxed)
}

/// Cache entry containing a value blob and its metadata
#[derive(Debug)]
pub struct CacheEntry {
    /// The key this entry belongs to
    key: CacheKey,
    /// Opaque serialized payload
    value: Bytes,
    /// Payload encoding (plain or compressed)
    encoding: Encoding,
    /// Fingerprint of the mutable source, if the key has one
    fingerprint: Option<Fingerprint>,
    /// Creation timestamp in unix milliseconds
    created_at_ms: i64,
    /// Last access tick (LRU ordering)
    last_accessed: AtomicU64,
    /// Uncompressed payload size in bytes
    size_bytes: u64,
    /// Tags for bulk invalidation
    tags: Vec<String>,
}

impl CacheEntry {
    /// Create a new entry. `size_bytes` records the uncompressed payload
    /// size regardless of `encoding`.
    pub fn new(key: CacheKey, value: Bytes) -> Self {
        let now = Utc::now().timestamp_millis();
        let size = value.len() as u64;
        Self {
            key,
            value,
            encoding: Encoding::Plain,
            fingerprint: None,
            created_at_ms: now,
            last_accessed: AtomicU64::new(next_access_tick()),
            size_bytes: size,
            tags: Vec::new(),
        }
    }

    /// Reconstitute an entry from fields read back out of a tier store
    #[allow(clippy::too_many_arguments)]
    pub fn from_parts(
        key: CacheKey,
        value: Bytes,
        encoding: Encoding,
        size_bytes: u64,
        fingerprint: Option<Fingerprint>,
        created_at_ms: i64,
        tags: Vec<String>,
    ) -> Self {
        Self {
            key,
            value,
            encoding,
            fingerprint,
            created_at_ms,
            last_accessed: AtomicU64::new(next_access_tick()),
            size_bytes,
            tags,
        }
    }

    /// Attach a source fingerprint
    pub fn with_fingerprint(mut self, fingerprint: Option<Fingerprint>) -> Self {
        self.fingerprint = fingerprint;
        self
    }

    /// Attach invalidation tags
    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }

    /// Replace the payload with a re-encoded form, keeping the recorded
    /// uncompressed size
    pub fn with_encoded_value(mut self, value: Bytes, encoding: Encoding) -> Self {
        self.value = value;
        self.encoding = encoding;
        self
    }

    /// Entry key
    #[inline]
    pub fn key(&self) -> &CacheKey {
        &self.key
    }

    /// Payload bytes (zero-copy)
    #[inline]
    pub fn value(&self) -> &Bytes {
        &self.value
    }

    /// Payload encoding
    #[inline]
    pub fn encoding(&self) -> Encoding {
        self.encoding
    }

    /// Source fingerprint, if any
    #[inline]
    pub fn fingerprint(&self) -> Option<&Fingerprint> {
        self.fingerprint.as_ref()
    }

    /// Patch the stored fingerprint's advisory mtime after a rehash
    /// confirmed the content is unchanged
    pub fn patch_fingerprint_mtime(&mut self, mtime_ms: i64) {
        if let Some(fp) = self.fingerprint.take() {
            self.fingerprint = Some(fp.with_mtime(mtime_ms));
        }
    }

    /// Creation timestamp in unix milliseconds
    #[inline]
    pub fn created_at_ms(&self) -> i64 {
        self.created_at_ms
    }

    /// Last access tick on the process-global access clock
    #[inline]
    pub fn last_accessed_tick(&self) -> u64 {
        self.last_accessed.load(Ordering::Relaxed)
    }

    /// Record an access for LRU ordering
    #[inline]
    pub fn touch(&self) {
        self.last_accessed.store(next_access_tick(), Ordering::Relaxed);
    }

    /// Uncompressed payload size in bytes
    #[inline]
    pub fn size_bytes(&self) -> u64 {
        self.size_bytes
    }

    /// Bytes actually resident in the tier (post-encoding)
    #[inline]
    pub fn resident_bytes(&self) -> u64 {
        self.value.len() as u64
    }

    /// Invalidation tags
    #[inline]
    pub fn tags(&self) -> &[String] {
        &self.tags
    }

    /// Whether the entry carries the given tag
    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }
}

impl Clone for CacheEntry {
    fn clone(&self) -> Self {
        Self {
            key: self.key.clone(),
            value: self.value.clone(),
            encoding: self.encoding,
            fingerprint: self.fingerprint,
            created_at_ms: self.created_at_ms,
            last_accessed: AtomicU64::new(self.last_accessed.load(Ordering::Relaxed)),
            size_bytes: self.size_bytes,
            tags: self.tags.clone(),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
