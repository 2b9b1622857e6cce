//! L3 Cache - Document Store Tier
//!
//! Durable tier backed by a pluggable document store (MongoDB-shaped
//! contract). Documents are keyed by the key bytes and add a `namespace`
//! field for collection partitioning, indexed by `tags` and `namespace`.
//! No TTL; entries live until explicitly invalidated.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use super::{Tier, TierStats, TierStatsSnapshot, TierStore};
use crate::compress::Encoding;
use crate::entry::CacheEntry;
use crate::error::{Error, Result};
use crate::key::{CacheKey, Fingerprint};

/// Document stored in the backend
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    /// Key bytes produced by the key encoder
    pub key_bytes: Bytes,
    /// Namespace, for collection partitioning and indexed scans
    pub namespace: String,
    /// Serialized (possibly compressed) value bytes
    pub value: Bytes,
    /// Payload encoding
    pub encoding: Encoding,
    /// Source fingerprint, if the key has one
    pub fingerprint: Option<Fingerprint>,
    /// Write timestamp in unix milliseconds
    pub created_at_ms: i64,
    /// Uncompressed payload size
    pub size_bytes: u64,
    /// Invalidation tags (indexed)
    pub tags: Vec<String>,
}

/// Document store contract
#[async_trait]
pub trait DocumentBackend: Send + Sync {
    /// Point query by key bytes
    async fn get(&self, key: &[u8]) -> Result<Option<Document>>;

    /// Insert or replace the document for its key
    async fn upsert(&self, doc: Document) -> Result<()>;

    /// Delete one document. Returns whether anything was removed.
    async fn delete(&self, key: &[u8]) -> Result<bool>;

    /// Key bytes of every document carrying the tag
    async fn keys_with_tag(&self, tag: &str) -> Result<Vec<Bytes>>;

    /// Delete every document whose key starts with the prefix.
    /// Returns how many were removed.
    async fn delete_key_prefix(&self, prefix: &[u8]) -> Result<u64>;

    /// Drop a namespace collection, or everything when `None`.
    /// Returns how many documents were removed.
    async fn drop_namespace(&self, namespace: Option<&str>) -> Result<u64>;
}

// =============================================================================
// In-Memory Backend
// =============================================================================

/// In-memory document backend for tests and single-node deployments
#[derive(Default)]
pub struct InMemoryDocumentBackend {
    documents: DashMap<Bytes, Document>,
}

impl InMemoryDocumentBackend {
    /// Create a new empty backend
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored documents
    pub fn len(&self) -> usize {
        self.documents.len()
    }

    /// Whether the backend holds no documents
    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }
}

#[async_trait]
impl DocumentBackend for InMemoryDocumentBackend {
    async fn get(&self, key: &[u8]) -> Result<Option<Document>> {
        Ok(self.documents.get(key).map(|d| d.clone()))
    }

    async fn upsert(&self, doc: Document) -> Result<()> {
        self.documents.insert(doc.key_bytes.clone(), doc);
        Ok(())
    }

    async fn delete(&self, key: &[u8]) -> Result<bool> {
        Ok(self.documents.remove(key).is_some())
    }

    async fn keys_with_tag(&self, tag: &str) -> Result<Vec<Bytes>> {
        Ok(self
            .documents
            .iter()
            .filter(|d| d.value().tags.iter().any(|t| t == tag))
            .map(|d| d.key().clone())
            .collect())
    }

    async fn delete_key_prefix(&self, prefix: &[u8]) -> Result<u64> {
        let victims: Vec<Bytes> = self
            .documents
            .iter()
            .filter(|d| d.key().starts_with(prefix))
            .map(|d| d.key().clone())
            .collect();
        let mut removed = 0;
        for key in victims {
            if self.documents.remove(&key).is_some() {
                removed += 1;
            }
        }
        Ok(removed)
    }

    async fn drop_namespace(&self, namespace: Option<&str>) -> Result<u64> {
        match namespace {
            Some(ns) => {
                let victims: Vec<Bytes> = self
                    .documents
                    .iter()
                    .filter(|d| d.value().namespace == ns)
                    .map(|d| d.key().clone())
                    .collect();
                let mut removed = 0;
                for key in victims {
                    if self.documents.remove(&key).is_some() {
                        removed += 1;
                    }
                }
                Ok(removed)
            }
            None => {
                let removed = self.documents.len() as u64;
                self.documents.clear();
                Ok(removed)
            }
        }
    }
}

// =============================================================================
// L3 Cache
// =============================================================================

/// L3 cache - durable tier over a document backend
pub struct L3Cache {
    backend: Arc<dyn DocumentBackend>,
    stats: TierStats,
}

impl L3Cache {
    /// Create an L3 cache over the given backend
    pub fn new(backend: Arc<dyn DocumentBackend>) -> Self {
        Self {
            backend,
            stats: TierStats::default(),
        }
    }

    /// Create with an in-memory backend (for testing)
    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemoryDocumentBackend::new()))
    }

    fn unavailable(err: Error) -> Error {
        match err {
            e @ Error::TierUnavailable { .. } => e,
            other => Error::TierUnavailable {
                tier: Tier::L3,
                reason: other.to_string(),
            },
        }
    }
}

#[async_trait]
impl TierStore for L3Cache {
    fn tier(&self) -> Tier {
        Tier::L3
    }

    async fn get(&self, key: &CacheKey) -> Result<Option<CacheEntry>> {
        let doc = self
            .backend
            .get(&key.encode())
            .await
            .map_err(Self::unavailable)?;

        match doc {
            Some(doc) => {
                self.stats.record_hit();
                Ok(Some(CacheEntry::from_parts(
                    key.clone(),
                    doc.value,
                    doc.encoding,
                    doc.size_bytes,
                    doc.fingerprint,
                    doc.created_at_ms,
                    doc.tags,
                )))
            }
            None => {
                self.stats.record_miss();
                Ok(None)
            }
        }
    }

    async fn set(&self, entry: CacheEntry, _ttl_seconds: Option<u64>) -> Result<()> {
        let doc = Document {
            key_bytes: entry.key().encode(),
            namespace: entry.key().namespace().to_string(),
            value: entry.value().clone(),
            encoding: entry.encoding(),
            fingerprint: entry.fingerprint().copied(),
            created_at_ms: entry.created_at_ms(),
            size_bytes: entry.size_bytes(),
            tags: entry.tags().to_vec(),
        };
        self.backend.upsert(doc).await.map_err(Self::unavailable)?;
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
            .delete_key_prefix(&super::l2::variant_prefix(namespace, identifier))
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
        self.backend
            .drop_namespace(namespace)
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
