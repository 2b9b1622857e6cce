//! L2 Cache - Remote Key-Value Warm Tier
//!
//! TTL-aware tier backed by a pluggable key-value store (Redis-shaped
//! contract). Records are stored under the key bytes produced by the key
//! encoder as `(value, encoding, fingerprint, created_at_unix_ms, tags)`
//! with a namespace-configured TTL. Expired records read as absent and are
//! deleted asynchronously.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::{BufMut, Bytes, BytesMut};
use chrono::Utc;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use super::{Tier, TierStats, TierStatsSnapshot, TierStore};
use crate::compress::Encoding;
use crate::entry::CacheEntry;
use crate::error::{Error, Result};
use crate::key::{CacheKey, Fingerprint};

/// Record stored in the key-value backend
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KvRecord {
    /// Serialized (possibly compressed) value bytes
    pub value: Bytes,
    /// Payload encoding
    pub encoding: Encoding,
    /// Source fingerprint, if the key has one
    pub fingerprint: Option<Fingerprint>,
    /// Write timestamp in unix milliseconds
    pub created_at_ms: i64,
    /// Time-to-live in seconds
    pub ttl_seconds: u64,
    /// Uncompressed payload size
    pub size_bytes: u64,
    /// Invalidation tags
    pub tags: Vec<String>,
}

impl KvRecord {
    /// Whether the record has outlived its TTL
    pub fn is_expired(&self, now_ms: i64) -> bool {
        now_ms >= self.created_at_ms + (self.ttl_seconds as i64) * 1000
    }
}

/// Remote key-value store contract (Redis-shaped)
#[async_trait]
pub trait KvBackend: Send + Sync {
    /// Fetch a record by key bytes
    async fn get(&self, key: &[u8]) -> Result<Option<KvRecord>>;

    /// Store a record, replacing any prior record for the key
    async fn set(&self, key: &[u8], record: KvRecord) -> Result<()>;

    /// Delete a record. Returns whether anything was removed.
    async fn delete(&self, key: &[u8]) -> Result<bool>;

    /// Key bytes of every live record carrying the tag
    async fn keys_with_tag(&self, tag: &str) -> Result<Vec<Bytes>>;

    /// Delete every record whose key starts with the prefix; empty prefix
    /// flushes everything. Returns how many were removed.
    async fn delete_prefix(&self, prefix: &[u8]) -> Result<u64>;
}

/// Key-bytes prefix shared by every key in a namespace
pub(crate) fn namespace_prefix(namespace: &str) -> Bytes {
    let mut buf = BytesMut::with_capacity(4 + namespace.len());
    buf.put_u32_le(namespace.len() as u32);
    buf.put_slice(namespace.as_bytes());
    buf.freeze()
}

/// Key-bytes prefix shared by every variant of `(namespace, identifier)`.
/// Length-prefixed fields keep this unambiguous: no other identifier can
/// produce these bytes as a prefix.
pub(crate) fn variant_prefix(namespace: &str, identifier: &str) -> Bytes {
    let mut buf = BytesMut::with_capacity(8 + namespace.len() + identifier.len());
    for field in [namespace, identifier] {
        buf.put_u32_le(field.len() as u32);
        buf.put_slice(field.as_bytes());
    }
    buf.freeze()
}

// =============================================================================
// In-Memory Backend
// =============================================================================

/// In-memory key-value backend for tests and single-node deployments
#[derive(Default)]
pub struct InMemoryKvBackend {
    records: DashMap<Bytes, KvRecord>,
}

impl InMemoryKvBackend {
    /// Create a new empty backend
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records, expired ones included
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the backend holds no records
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[async_trait]
impl KvBackend for InMemoryKvBackend {
    async fn get(&self, key: &[u8]) -> Result<Option<KvRecord>> {
        Ok(self.records.get(key).map(|r| r.clone()))
    }

    async fn set(&self, key: &[u8], record: KvRecord) -> Result<()> {
        self.records.insert(Bytes::copy_from_slice(key), record);
        Ok(())
    }

    async fn delete(&self, key: &[u8]) -> Result<bool> {
        Ok(self.records.remove(key).is_some())
    }

    async fn keys_with_tag(&self, tag: &str) -> Result<Vec<Bytes>> {
        Ok(self
            .records
            .iter()
            .filter(|r| r.value().tags.iter().any(|t| t == tag))
            .map(|r| r.key().clone())
            .collect())
    }

    async fn delete_prefix(&self, prefix: &[u8]) -> Result<u64> {
        let victims: Vec<Bytes> = self
            .records
            .iter()
            .filter(|r| r.key().starts_with(prefix))
            .map(|r| r.key().clone())
            .collect();
        let mut removed = 0;
        for key in victims {
            if self.records.remove(&key).is_some() {
                removed += 1;
            }
        }
        Ok(removed)
    }
}

// =============================================================================
// L2 Cache
// =============================================================================

/// L2 cache - TTL-aware warm tier over a key-value backend
pub struct L2Cache {
    backend: Arc<dyn KvBackend>,
    /// TTL applied when the write carries none
    default_ttl_seconds: u64,
    stats: TierStats,
}

impl L2Cache {
    /// Create an L2 cache over the given backend
    pub fn new(backend: Arc<dyn KvBackend>, default_ttl_seconds: u64) -> Self {
        Self {
            backend,
            default_ttl_seconds,
            stats: TierStats::default(),
        }
    }

    /// Create with an in-memory backend (for testing)
    pub fn in_memory(default_ttl_seconds: u64) -> Self {
        Self::new(Arc::new(InMemoryKvBackend::new()), default_ttl_seconds)
    }

    fn unavailable(err: Error) -> Error {
        match err {
            e @ Error::TierUnavailable { .. } => e,
            other => Error::TierUnavailable {
                tier: Tier::L2,
                reason: other.to_string(),
            },
        }
    }

    fn entry_from_record(key: &CacheKey, record: KvRecord) -> CacheEntry {
        CacheEntry::from_parts(
            key.clone(),
            record.value,
            record.encoding,
            record.size_bytes,
            record.fingerprint,
            record.created_at_ms,
            record.tags,
        )
    }
}

#[async_trait]
impl TierStore for L2Cache {
    fn tier(&self) -> Tier {
        Tier::L2
    }

    async fn get(&self, key: &CacheKey) -> Result<Option<CacheEntry>> {
        let key_bytes = key.encode();
        let record = self
            .backend
            .get(&key_bytes)
            .await
            .map_err(Self::unavailable)?;

        match record {
            Some(record) if record.is_expired(Utc::now().timestamp_millis()) => {
                // Read as absent; reclaim in the background
                let backend = Arc::clone(&self.backend);
                tokio::spawn(async move {
                    if let Err(e) = backend.delete(&key_bytes).await {
                        tracing::debug!(error = %e, "expired L2 record cleanup failed");
                    }
                });
                self.stats.record_miss();
                Ok(None)
            }
            Some(record) => {
                self.stats.record_hit();
                Ok(Some(Self::entry_from_record(key, record)))
            }
            None => {
                self.stats.record_miss();
                Ok(None)
            }
        }
    }

    async fn set(&self, entry: CacheEntry, ttl_seconds: Option<u64>) -> Result<()> {
        let record = KvRecord {
            value: entry.value().clone(),
            encoding: entry.encoding(),
            fingerprint: entry.fingerprint().copied(),
            created_at_ms: Utc::now().timestamp_millis(),
            ttl_seconds: ttl_seconds.unwrap_or(self.default_ttl_seconds),
            size_bytes: entry.size_bytes(),
            tags: entry.tags().to_vec(),
        };
        self.backend
            .set(&entry.key().encode(), record)
            .await
            .map_err(Self::unavailable)?;
        self.stats.record_write();
        Ok(())
    }

    async fn delete(&self, key: &CacheKey) -> Result<bool> {
        self.backend
            .delete(&key.encode())
            .await
            .map_err(Self::unavailable)
    }

    async fn delete_variants(&self, namespace: &str, identifier: &str) -> Result<u64> {
        self.backend
            .delete_prefix(&variant_prefix(namespace, identifier))
            .await
            .map_err(Self::unavailable)
    }

    async fn invalidate_by_tag(&self, tag: &str) -> Result<u64> {
        let keys = self
            .backend
            .keys_with_tag(tag)
            .await
            .map_err(Self::unavailable)?;
        let mut removed = 0;
        for key in keys {
            if self.backend.delete(&key).await.map_err(Self::unavailable)? {
                removed += 1;
            }
        }
        Ok(removed)
    }

    async fn clear(&self, namespace: Option<&str>) -> Result<()> {
        let prefix = namespace.map(namespace_prefix).unwrap_or_default();
        self.backend
            .delete_prefix(&prefix)
            .await
            .map_err(Self::unavailable)?;
        Ok(())
    }

    fn stats(&self) -> TierStatsSnapshot {
        self.stats.snapshot()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn make_key(id: &str) -> CacheKey {
        CacheKey::new("features", id, "std").unwrap()
    }

    fn make_entry(id: &str, data: &[u8]) -> CacheEntry {
        CacheEntry::new(make_key(id), Bytes::copy_from_slice(data))
    }

    #[tokio::test]
    async fn test_put_get() {
        let cache = L2Cache::in_memory(3600);
        cache.set(make_entry("a.wav", b"tempo"), None).await.unwrap();

        let got = cache.get(&make_key("a.wav")).await.unwrap().unwrap();
        assert_eq!(got.value().as_ref(), b"tempo");
        assert_eq!(got.key(), &make_key("a.wav"));
    }

    #[tokio::test]
    async fn test_ttl_expiry_reads_as_absent() {
        let backend = Arc::new(InMemoryKvBackend::new());
        let cache = L2Cache::new(backend.clone(), 3600);

        // Write directly with an already-expired record
        let record = KvRecord {
            value: Bytes::from_static(b"stale"),
            encoding: Encoding::Plain,
            fingerprint: None,
            created_at_ms: Utc::now().timestamp_millis() - 10_000,
            ttl_seconds: 1,
            size_bytes: 5,
            tags: vec![],
        };
        backend
            .set(&make_key("old").encode(), record)
            .await
            .unwrap();

        assert!(cache.get(&make_key("old")).await.unwrap().is_none());
        assert_eq!(cache.stats().misses, 1);

        // Background cleanup removes the record
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert!(backend.get(&make_key("old").encode()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_explicit_ttl_overrides_default() {
        let backend = Arc::new(InMemoryKvBackend::new());
        let cache = L2Cache::new(backend.clone(), 3600);

        cache
            .set(make_entry("a", b"v"), Some(7200))
            .await
            .unwrap();

        let record = backend.get(&make_key("a").encode()).await.unwrap().unwrap();
        assert_eq!(record.ttl_seconds, 7200);
    }

    #[tokio::test]
    async fn test_fingerprint_roundtrips() {
        let cache = L2Cache::in_memory(60);
        let fp = Fingerprint {
            mtime_ms: 123,
            content_hash: [9u8; 32],
        };
        let entry = make_entry("a", b"v").with_fingerprint(Some(fp));
        cache.set(entry, None).await.unwrap();

        let got = cache.get(&make_key("a")).await.unwrap().unwrap();
        assert_eq!(got.fingerprint(), Some(&fp));
    }

    #[tokio::test]
    async fn test_invalidate_by_tag() {
        let cache = L2Cache::in_memory(60);
        for id in ["a", "b"] {
            let entry = make_entry(id, b"v").with_tags(vec!["user:42".into()]);
            cache.set(entry, None).await.unwrap();
        }
        cache.set(make_entry("c", b"v"), None).await.unwrap();

        let removed = cache.invalidate_by_tag("user:42").await.unwrap();
        assert_eq!(removed, 2);
        assert!(cache.get(&make_key("a")).await.unwrap().is_none());
        assert!(cache.get(&make_key("c")).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_clear_namespace_prefix() {
        let backend = Arc::new(InMemoryKvBackend::new());
        let cache = L2Cache::new(backend.clone(), 60);

        cache.set(make_entry("a", b"v"), None).await.unwrap();
        let query_key = CacheKey::new("query", "q1", "").unwrap();
        cache
            .set(CacheEntry::new(query_key.clone(), Bytes::from_static(b"r")), None)
            .await
            .unwrap();

        cache.clear(Some("features")).await.unwrap();
        assert!(cache.get(&make_key("a")).await.unwrap().is_none());
        assert!(cache.get(&query_key).await.unwrap().is_some());

        cache.clear(None).await.unwrap();
        assert!(backend.is_empty());
    }

    #[tokio::test]
    async fn test_delete_variants_spares_other_identifiers() {
        let cache = L2Cache::in_memory(60);
        for variant in ["std", "detailed"] {
            let key = CacheKey::new("features", "a.wav", variant).unwrap();
            cache
                .set(CacheEntry::new(key, Bytes::from_static(b"v")), None)
                .await
                .unwrap();
        }
        cache.set(make_entry("b.wav", b"v"), None).await.unwrap();

        let removed = cache.delete_variants("features", "a.wav").await.unwrap();
        assert_eq!(removed, 2);
        assert!(cache.get(&make_key("b.wav")).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_size_survives_storage() {
        let cache = L2Cache::in_memory(60);
        let entry = make_entry("a", b"0123456789")
            .with_encoded_value(Bytes::from_static(b"z"), Encoding::Lz4);
        cache.set(entry, None).await.unwrap();

        let got = cache.get(&make_key("a")).await.unwrap().unwrap();
        assert_eq!(got.size_bytes(), 10);
        assert_eq!(got.encoding(), Encoding::Lz4);
        assert_eq!(got.value().as_ref(), b"z");
    }
}
