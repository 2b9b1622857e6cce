//! L1 Cache - In-Process Hot Tier
//!
//! Process-local map under a single lock with strict LRU eviction on
//! `last_accessed`, bounded by entry count rather than bytes. Eviction from
//! L1 never cascades to the other tiers.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;

use super::{Tier, TierStats, TierStatsSnapshot, TierStore};
use crate::entry::CacheEntry;
use crate::error::Result;
use crate::key::CacheKey;

/// L1 cache - in-process hot tier
pub struct L1Cache {
    /// Entry map, single lock per the concurrency model
    entries: RwLock<HashMap<CacheKey, CacheEntry>>,
    /// Hard cap on entry count; `0` degrades the tier to a no-op
    max_items: usize,
    /// Tier-local statistics
    stats: TierStats,
}

impl L1Cache {
    /// Create an L1 cache bounded to `max_items` entries
    pub fn new(max_items: usize) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            max_items,
            stats: TierStats::default(),
        }
    }

    /// Number of resident entries
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Whether the tier holds no entries
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Whether the key is resident (no LRU touch, no stats update)
    pub fn contains(&self, key: &CacheKey) -> bool {
        self.entries.read().contains_key(key)
    }

    /// Evict the least recently used entry. Caller holds the write lock.
    fn evict_lru(&self, entries: &mut HashMap<CacheKey, CacheEntry>) {
        let victim = entries
            .iter()
            .min_by_key(|(_, e)| e.last_accessed_tick())
            .map(|(k, _)| k.clone());

        if let Some(key) = victim {
            if let Some(removed) = entries.remove(&key) {
                self.stats.sub_resident(removed.resident_bytes());
                self.stats.record_eviction();
                tracing::debug!(key = %key, "L1 LRU eviction");
            }
        }
    }
}

#[async_trait]
impl TierStore for L1Cache {
    fn tier(&self) -> Tier {
        Tier::L1
    }

    async fn get(&self, key: &CacheKey) -> Result<Option<CacheEntry>> {
        let entries = self.entries.read();
        match entries.get(key) {
            Some(entry) => {
                entry.touch();
                self.stats.record_hit();
                Ok(Some(entry.clone()))
            }
            None => {
                self.stats.record_miss();
                Ok(None)
            }
        }
    }

    async fn set(&self, entry: CacheEntry, _ttl_seconds: Option<u64>) -> Result<()> {
        if self.max_items == 0 {
            return Ok(());
        }

        let mut entries = self.entries.write();
        let size = entry.resident_bytes();

        if let Some(old) = entries.insert(entry.key().clone(), entry) {
            self.stats.sub_resident(old.resident_bytes());
        }
        self.stats.add_resident(size);
        self.stats.record_write();

        // The insert above may have pushed us one past the cap
        while entries.len() > self.max_items {
            self.evict_lru(&mut entries);
        }
        Ok(())
    }

    async fn delete(&self, key: &CacheKey) -> Result<bool> {
        let mut entries = self.entries.write();
        match entries.remove(key) {
            Some(removed) => {
                self.stats.sub_resident(removed.resident_bytes());
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete_variants(&self, namespace: &str, identifier: &str) -> Result<u64> {
        let mut entries = self.entries.write();
        let keys: Vec<CacheKey> = entries
            .keys()
            .filter(|k| k.namespace() == namespace && k.identifier() == identifier)
            .cloned()
            .collect();

        let mut removed = 0;
        for key in keys {
            if let Some(old) = entries.remove(&key) {
                self.stats.sub_resident(old.resident_bytes());
                removed += 1;
            }
        }
        Ok(removed)
    }

    async fn invalidate_by_tag(&self, tag: &str) -> Result<u64> {
        let mut entries = self.entries.write();
        let keys: Vec<CacheKey> = entries
            .iter()
            .filter(|(_, e)| e.has_tag(tag))
            .map(|(k, _)| k.clone())
            .collect();

        let mut removed = 0;
        for key in keys {
            if let Some(old) = entries.remove(&key) {
                self.stats.sub_resident(old.resident_bytes());
                removed += 1;
            }
        }
        Ok(removed)
    }

    async fn clear(&self, namespace: Option<&str>) -> Result<()> {
        let mut entries = self.entries.write();
        match namespace {
            Some(ns) => {
                let keys: Vec<CacheKey> = entries
                    .keys()
                    .filter(|k| k.namespace() == ns)
                    .cloned()
                    .collect();
                for key in keys {
                    if let Some(old) = entries.remove(&key) {
                        self.stats.sub_resident(old.resident_bytes());
                    }
                }
            }
            None => {
                entries.clear();
                self.stats.reset_residency();
            }
        }
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
    use bytes::Bytes;

    fn make_key(id: &str) -> CacheKey {
        CacheKey::new("features", id, "std").unwrap()
    }

    fn make_entry(id: &str, data: &[u8]) -> CacheEntry {
        CacheEntry::new(make_key(id), Bytes::copy_from_slice(data))
    }

    #[tokio::test]
    async fn test_put_get() {
        let cache = L1Cache::new(16);
        cache.set(make_entry("a.wav", b"tempo"), None).await.unwrap();

        let got = cache.get(&make_key("a.wav")).await.unwrap().unwrap();
        assert_eq!(got.value().as_ref(), b"tempo");
        assert_eq!(cache.len(), 1);

        let snap = cache.stats();
        assert_eq!(snap.hits, 1);
        assert_eq!(snap.writes, 1);
    }

    #[tokio::test]
    async fn test_miss_counted() {
        let cache = L1Cache::new(16);
        assert!(cache.get(&make_key("missing")).await.unwrap().is_none());
        assert_eq!(cache.stats().misses, 1);
    }

    #[tokio::test]
    async fn test_replace_is_atomic_single_entry() {
        let cache = L1Cache::new(16);
        cache.set(make_entry("a", b"one"), None).await.unwrap();
        cache.set(make_entry("a", b"two"), None).await.unwrap();

        assert_eq!(cache.len(), 1);
        let got = cache.get(&make_key("a")).await.unwrap().unwrap();
        assert_eq!(got.value().as_ref(), b"two");
        assert_eq!(cache.stats().bytes_resident, 3);
    }

    #[tokio::test]
    async fn test_lru_eviction_bounded_by_count() {
        let cache = L1Cache::new(2);
        cache.set(make_entry("a", b"1"), None).await.unwrap();
        cache.set(make_entry("b", b"2"), None).await.unwrap();

        // Touch "a" so "b" becomes the LRU victim
        cache.get(&make_key("a")).await.unwrap();
        cache.set(make_entry("c", b"3"), None).await.unwrap();

        assert_eq!(cache.len(), 2);
        assert!(cache.contains(&make_key("a")));
        assert!(!cache.contains(&make_key("b")));
        assert!(cache.contains(&make_key("c")));
        assert_eq!(cache.stats().evictions, 1);
    }

    #[tokio::test]
    async fn test_burst_writes_evict_oldest_not_newest() {
        // Back-to-back inserts land within the same millisecond; the
        // access clock must still order them strictly so the stale entry
        // is the victim every time
        for _ in 0..200 {
            let cache = L1Cache::new(1);
            cache.set(make_entry("old", b"1"), None).await.unwrap();
            cache.set(make_entry("new", b"2"), None).await.unwrap();

            assert!(!cache.contains(&make_key("old")));
            assert!(cache.contains(&make_key("new")));
        }
    }

    #[tokio::test]
    async fn test_size_never_exceeds_cap_after_set() {
        let cache = L1Cache::new(3);
        for i in 0..20 {
            cache
                .set(make_entry(&format!("f{i}"), b"x"), None)
                .await
                .unwrap();
            assert!(cache.len() <= 3);
        }
    }

    #[tokio::test]
    async fn test_zero_capacity_is_noop() {
        let cache = L1Cache::new(0);
        cache.set(make_entry("a", b"1"), None).await.unwrap();
        assert!(cache.is_empty());
        assert!(cache.get(&make_key("a")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_invalidate_by_tag() {
        let cache = L1Cache::new(16);
        let tagged = CacheEntry::new(make_key("a"), Bytes::from_static(b"1"))
            .with_tags(vec!["user:42".into()]);
        cache.set(tagged, None).await.unwrap();
        cache.set(make_entry("b", b"2"), None).await.unwrap();

        let removed = cache.invalidate_by_tag("user:42").await.unwrap();
        assert_eq!(removed, 1);
        assert!(!cache.contains(&make_key("a")));
        assert!(cache.contains(&make_key("b")));
    }

    #[tokio::test]
    async fn test_clear_namespace_only() {
        let cache = L1Cache::new(16);
        cache.set(make_entry("a", b"1"), None).await.unwrap();
        let other = CacheEntry::new(
            CacheKey::new("query", "q1", "").unwrap(),
            Bytes::from_static(b"r"),
        );
        cache.set(other, None).await.unwrap();

        cache.clear(Some("features")).await.unwrap();
        assert_eq!(cache.len(), 1);
        assert!(cache.contains(&CacheKey::new("query", "q1", "").unwrap()));

        cache.clear(None).await.unwrap();
        assert!(cache.is_empty());
        assert_eq!(cache.stats().bytes_resident, 0);
    }
}
