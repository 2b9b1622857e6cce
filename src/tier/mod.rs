//! Tier Stores
//!
//! Three storage tiers share one contract: L1 (in-process memory), L2
//! (remote key-value store), and L3 (document store). Tiers are
//! independently failable; the coordinator treats a failing tier as a miss
//! for reads and a best-effort no-op for writes, so the system keeps
//! running with L2 or L3 entirely absent.

mod l1;
mod l2;
mod l3;

pub use l1::L1Cache;
pub use l2::{InMemoryKvBackend, KvBackend, KvRecord, L2Cache};
pub use l3::{Document, DocumentBackend, InMemoryDocumentBackend, L3Cache};

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::entry::CacheEntry;
use crate::error::Result;
use crate::key::CacheKey;

/// Cache tier identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Tier {
    /// L1 - in-process memory (hot)
    L1,
    /// L2 - remote key-value store (warm)
    L2,
    /// L3 - document store (durable)
    L3,
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Tier::L1 => write!(f, "L1 (memory)"),
            Tier::L2 => write!(f, "L2 (kv)"),
            Tier::L3 => write!(f, "L3 (documents)"),
        }
    }
}

/// Shared contract implemented by all three tiers
#[async_trait]
pub trait TierStore: Send + Sync {
    /// Which tier this store is
    fn tier(&self) -> Tier;

    /// Fetch an entry. TTL-expired or absent entries return `None`.
    async fn get(&self, key: &CacheKey) -> Result<Option<CacheEntry>>;

    /// Write an entry, replacing any prior entry for the same key
    /// atomically. `ttl_seconds` applies to TTL-aware tiers only.
    async fn set(&self, entry: CacheEntry, ttl_seconds: Option<u64>) -> Result<()>;

    /// Remove one entry. Returns whether anything was removed.
    async fn delete(&self, key: &CacheKey) -> Result<bool>;

    /// Remove every variant stored under `(namespace, identifier)`.
    /// Returns how many entries were removed.
    async fn delete_variants(&self, namespace: &str, identifier: &str) -> Result<u64>;

    /// Remove every entry carrying the tag. Returns how many were removed.
    async fn invalidate_by_tag(&self, tag: &str) -> Result<u64>;

    /// Drop a namespace, or everything when `namespace` is `None`
    async fn clear(&self, namespace: Option<&str>) -> Result<()>;

    /// Tier-local statistics snapshot
    fn stats(&self) -> TierStatsSnapshot;
}

/// Tier-local statistics, updated with relaxed atomics
#[derive(Debug, Default)]
pub struct TierStats {
    hits: AtomicU64,
    misses: AtomicU64,
    writes: AtomicU64,
    evictions: AtomicU64,
    bytes_resident: AtomicU64,
    entries: AtomicU64,
}

impl TierStats {
    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_write(&self) {
        self.writes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_eviction(&self) {
        self.evictions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_resident(&self, bytes: u64) {
        self.bytes_resident.fetch_add(bytes, Ordering::Relaxed);
        self.entries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn sub_resident(&self, bytes: u64) {
        self.bytes_resident.fetch_sub(bytes, Ordering::Relaxed);
        self.entries.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn reset_residency(&self) {
        self.bytes_resident.store(0, Ordering::Relaxed);
        self.entries.store(0, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> TierStatsSnapshot {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        TierStatsSnapshot {
            hits,
            misses,
            writes: self.writes.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            bytes_resident: self.bytes_resident.load(Ordering::Relaxed),
            entries: self.entries.load(Ordering::Relaxed),
            hit_ratio: if total == 0 {
                0.0
            } else {
                hits as f64 / total as f64
            },
        }
    }
}

/// Point-in-time view of a tier's counters. Counters are sampled
/// independently, so a snapshot may be slightly inconsistent across fields.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TierStatsSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub writes: u64,
    pub evictions: u64,
    pub bytes_resident: u64,
    pub entries: u64,
    pub hit_ratio: f64,
}

// =============================================================================
// Tests
// =============================================================================
