//! Cache Coordinator
//!
//! The read-through, write-through front door of the engine. A request
//! probes L1, L2, and L3 in order, validates hits against the source
//! fingerprint, promotes valid hits into the faster tiers, and computes
//! misses through the namespace callback exactly once per key thanks to
//! single-flight deduplication. Every settled request feeds the usage
//! tracker, which drives prediction and background prefetch.

mod single_flight;

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use futures::FutureExt;
use serde::de::DeserializeOwned;

use crate::compress::BlobCompressor;
use crate::config::CacheConfig;
use crate::entry::CacheEntry;
use crate::error::{Error, Result};
use crate::key::{CacheKey, Fingerprint};
use crate::namespace::{decode_json, ComputeContext, Namespace, NamespaceRegistry};
use crate::predict::{
    MarkovPredictor, PredictorSnapshot, Prefetcher, PrefetchStatsSnapshot, UsageEvent,
    UsageTracker,
};
use crate::stats::{CacheStatsSnapshot, Outcome, RequestStats};
use crate::tier::{
    DocumentBackend, InMemoryDocumentBackend, InMemoryKvBackend, KvBackend, L1Cache, L2Cache,
    L3Cache, TierStatsSnapshot, TierStore,
};

use single_flight::SingleFlight;

/// Probed state of a request's source file
struct SourceState {
    path: PathBuf,
    mtime_ms: i64,
    /// Full fingerprint, computed at most once per request
    full: Option<Fingerprint>,
}

/// Multi-tier cache coordinator
pub struct CacheCoordinator {
    config: CacheConfig,
    registry: NamespaceRegistry,
    l1: L1Cache,
    l2: Option<L2Cache>,
    l3: Option<L3Cache>,
    compressor: BlobCompressor,
    single_flight: Arc<SingleFlight>,
    tracker: UsageTracker,
    predictor: MarkovPredictor,
    prefetcher: Prefetcher,
    stats: RequestStats,
    closed: AtomicBool,
}

impl CacheCoordinator {
    /// Build a coordinator over in-memory L2/L3 backends. Suitable for
    /// tests and single-node deployments.
    pub fn new(config: CacheConfig) -> Result<Arc<Self>> {
        Self::with_backends(config, None, None)
    }

    /// Build a coordinator over the given remote backends. A `None`
    /// backend for an enabled tier falls back to the in-memory
    /// implementation.
    pub fn with_backends(
        config: CacheConfig,
        kv: Option<Arc<dyn KvBackend>>,
        documents: Option<Arc<dyn DocumentBackend>>,
    ) -> Result<Arc<Self>> {
        config.validate()?;

        let l2 = config.l2_enabled.then(|| {
            L2Cache::new(
                kv.unwrap_or_else(|| Arc::new(InMemoryKvBackend::new())),
                config.default_ttl_seconds,
            )
        });
        let l3 = config.l3_enabled.then(|| {
            L3Cache::new(documents.unwrap_or_else(|| Arc::new(InMemoryDocumentBackend::new())))
        });

        tracing::info!(
            l1_max_items = config.l1_max_items,
            l2 = config.l2_enabled,
            l3 = config.l3_enabled,
            prefetch = config.prefetch.enabled,
            "cache coordinator starting"
        );

        Ok(Arc::new(Self {
            l1: L1Cache::new(config.l1_max_items),
            l2,
            l3,
            compressor: BlobCompressor::new(config.compression.clone()),
            single_flight: Arc::new(SingleFlight::new()),
            tracker: UsageTracker::new(config.max_tracked_events, config.prediction.decay_alpha),
            predictor: MarkovPredictor::new(config.prediction.clone()),
            prefetcher: Prefetcher::new(config.prefetch.enabled, config.prefetch.concurrency),
            registry: NamespaceRegistry::new(),
            stats: RequestStats::default(),
            config,
            closed: AtomicBool::new(false),
        }))
    }

    /// Register a namespace. Must happen before the first request for it.
    pub fn register(&self, namespace: Namespace) -> Result<()> {
        self.registry.register(namespace)
    }

    // =========================================================================
    // Read path
    // =========================================================================

    /// Fetch the value for `(namespace, identifier, variant)`, computing
    /// it through the namespace callback on miss. Returns the plain value
    /// bytes and where they came from.
    ///
    /// With a `source` path, tier hits are validated against the file's
    /// fingerprint: matching mtime is trusted, a changed mtime triggers a
    /// rehash, and changed content invalidates the entry and recomputes.
    pub async fn get_or_compute(
        self: &Arc<Self>,
        namespace: &str,
        identifier: &str,
        variant: &str,
        source: Option<&Path>,
    ) -> Result<(Bytes, Outcome)> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::Closed);
        }
        let started = Instant::now();
        let key = CacheKey::new(namespace, identifier, variant)?;
        let ns = self.registry.get(namespace)?;

        // Probe the source before touching any tier so a vanished file
        // surfaces as SourceUnavailable with no event recorded.
        let mut src = match source {
            Some(path) => Some(self.probe_source(path).await?),
            None => None,
        };

        if let Some(value) = self.probe_tiers(&key, &ns, &mut src).await? {
            let (bytes, outcome) = value;
            self.settle(&key, outcome, None, started);
            return Ok((bytes, outcome));
        }

        // Miss everywhere: compute through single-flight
        let flight = self.single_flight.join(key.encode(), namespace, || {
            let this = Arc::clone(self);
            let key = key.clone();
            let ns = Arc::clone(&ns);
            let source = src.as_ref().map(|s| s.path.clone());
            let known_fp = src.as_ref().and_then(|s| s.full);
            this.compute_flight(key, ns, source, known_fp)
        });

        match flight.await {
            Ok((value, compute_ms)) => {
                self.settle(&key, Outcome::Miss, Some(compute_ms), started);
                Ok((value, Outcome::Miss))
            }
            Err(shared_err) => {
                let err = shared_err.duplicate();
                if matches!(err, Error::ComputeFailed { .. }) {
                    // A failed compute still counts as a miss
                    self.settle(&key, Outcome::Miss, None, started);
                }
                Err(err)
            }
        }
    }

    /// Typed read over the JSON codec
    pub async fn get_json<T: DeserializeOwned>(
        self: &Arc<Self>,
        namespace: &str,
        identifier: &str,
        variant: &str,
        source: Option<&Path>,
    ) -> Result<(T, Outcome)> {
        let (bytes, outcome) = self
            .get_or_compute(namespace, identifier, variant, source)
            .await?;
        let value = decode_json(&bytes).map_err(|e| e.into_compute_failed(namespace))?;
        Ok((value, outcome))
    }

    /// Probe L1 -> L2 -> L3, validating and promoting. Returns the plain
    /// value and hit tier, or `None` when every tier misses.
    async fn probe_tiers(
        &self,
        key: &CacheKey,
        ns: &Namespace,
        src: &mut Option<SourceState>,
    ) -> Result<Option<(Bytes, Outcome)>> {
        // L1
        if let Some(mut entry) = self.tier_get(&self.l1, key).await {
            if self.validate_entry(&self.l1, &mut entry, src, None).await? {
                if let Some(value) = self.decode_entry(&self.l1, &entry).await {
                    return Ok(Some((value, Outcome::HitL1)));
                }
            }
        }

        // L2
        if let Some(l2) = &self.l2 {
            if let Some(mut entry) = self.tier_get(l2, key).await {
                let ttl = ns.ttl_seconds();
                if self.validate_entry(l2, &mut entry, src, ttl).await? {
                    if let Some(value) = self.decode_entry(l2, &entry).await {
                        self.tier_set(&self.l1, entry, None).await;
                        return Ok(Some((value, Outcome::HitL2)));
                    }
                }
            }
        }

        // L3
        if let Some(l3) = &self.l3 {
            if let Some(mut entry) = self.tier_get(l3, key).await {
                if self.validate_entry(l3, &mut entry, src, None).await? {
                    if let Some(value) = self.decode_entry(l3, &entry).await {
                        if let Some(l2) = &self.l2 {
                            self.tier_set(l2, entry.clone(), ns.ttl_seconds()).await;
                        }
                        self.tier_set(&self.l1, entry, None).await;
                        return Ok(Some((value, Outcome::HitL3)));
                    }
                }
            }
        }

        Ok(None)
    }

    /// Tier read with degradation: an unavailable tier reads as a miss
    async fn tier_get(&self, tier: &dyn TierStore, key: &CacheKey) -> Option<CacheEntry> {
        match tier.get(key).await {
            Ok(entry) => entry,
            Err(e) if e.is_degradable() => {
                tracing::warn!(tier = %tier.tier(), error = %e, "tier read failed, degrading to miss");
                None
            }
            Err(e) => {
                tracing::error!(tier = %tier.tier(), error = %e, "unexpected tier read failure");
                None
            }
        }
    }

    /// Tier write with degradation: an unavailable tier is a no-op
    async fn tier_set(&self, tier: &dyn TierStore, entry: CacheEntry, ttl: Option<u64>) {
        if let Err(e) = tier.set(entry, ttl).await {
            tracing::warn!(tier = %tier.tier(), error = %e, "tier write failed, skipping");
        }
    }

    /// Check a tier hit against the current source fingerprint.
    ///
    /// Returns `false` (and removes the entry from the tier) when the
    /// source content changed. A hash match under a new mtime patches the
    /// stored mtime in place so the next probe takes the fast path.
    async fn validate_entry(
        &self,
        tier: &dyn TierStore,
        entry: &mut CacheEntry,
        src: &mut Option<SourceState>,
        ttl: Option<u64>,
    ) -> Result<bool> {
        let Some(state) = src.as_mut() else {
            return Ok(true);
        };
        let Some(stored) = entry.fingerprint().copied() else {
            return Ok(true);
        };

        if !self.config.always_hash && stored.mtime_ms == state.mtime_ms {
            return Ok(true);
        }

        let current = self.full_fingerprint(state).await?;
        if stored.content_eq(&current) {
            if stored.mtime_ms != current.mtime_ms {
                entry.patch_fingerprint_mtime(current.mtime_ms);
                self.tier_set(tier, entry.clone(), ttl).await;
            }
            return Ok(true);
        }

        tracing::debug!(
            key = %entry.key(),
            tier = %tier.tier(),
            "source content changed, invalidating stale entry"
        );
        if let Err(e) = tier.delete(entry.key()).await {
            tracing::warn!(tier = %tier.tier(), error = %e, "stale entry removal failed");
        }
        Ok(false)
    }

    /// Decompress an entry's payload. A blob that no longer decodes is
    /// treated like a stale entry: removed and read as a miss.
    async fn decode_entry(&self, tier: &dyn TierStore, entry: &CacheEntry) -> Option<Bytes> {
        match self.compressor.decode(entry.value(), entry.encoding()) {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!(
                    key = %entry.key(),
                    tier = %tier.tier(),
                    error = %e,
                    "undecodable entry, removing"
                );
                let _ = tier.delete(entry.key()).await;
                None
            }
        }
    }

    async fn probe_source(&self, path: &Path) -> Result<SourceState> {
        if self.config.always_hash {
            let fp = Fingerprint::of_path(path).await?;
            Ok(SourceState {
                path: path.to_path_buf(),
                mtime_ms: fp.mtime_ms,
                full: Some(fp),
            })
        } else {
            let probe = Fingerprint::probe_mtime(path).await?;
            Ok(SourceState {
                path: path.to_path_buf(),
                mtime_ms: probe.mtime_ms,
                full: None,
            })
        }
    }

    async fn full_fingerprint(&self, state: &mut SourceState) -> Result<Fingerprint> {
        if let Some(fp) = state.full {
            return Ok(fp);
        }
        let fp = Fingerprint::of_path(&state.path).await?;
        state.full = Some(fp);
        Ok(fp)
    }

    // =========================================================================
    // Compute path
    // =========================================================================

    /// The single-flight leader future: fingerprint, compute, compress,
    /// write through every tier.
    fn compute_flight(
        self: Arc<Self>,
        key: CacheKey,
        ns: Arc<Namespace>,
        source: Option<PathBuf>,
        known_fp: Option<Fingerprint>,
    ) -> futures::future::BoxFuture<'static, Result<(Bytes, u64)>> {
        async move {
            // A flight that settled between this caller's tier probe and
            // its join may have cached the value already; serve that
            // instead of computing the same generation twice
            if let Some(entry) = self.tier_get(&self.l1, &key).await {
                if let Some(value) = self.decode_entry(&self.l1, &entry).await {
                    return Ok((value, 0));
                }
            }

            self.stats.record_compute();
            let started = Instant::now();

            let fingerprint = match (&source, known_fp) {
                (_, Some(fp)) => Some(fp),
                (Some(path), None) => Some(Fingerprint::of_path(path).await?),
                (None, None) => None,
            };

            let ctx = ComputeContext {
                key: key.clone(),
                source,
            };
            let output = ns.compute(ctx).await.map_err(|e| {
                self.stats.record_compute_failure();
                let e = e.into_compute_failed(key.namespace());
                tracing::error!(key = %key, error = %e, "compute callback failed");
                e
            })?;
            let compute_ms = started.elapsed().as_millis() as u64;
            self.stats.compute_latency.record(compute_ms as f64);

            let mut tags = ns.default_tags().to_vec();
            tags.extend(output.tags);
            let (encoded, encoding) = self.compressor.encode(&output.value);
            let entry = CacheEntry::new(key, output.value.clone())
                .with_encoded_value(encoded, encoding)
                .with_fingerprint(fingerprint)
                .with_tags(tags);

            self.write_through(entry, ns.ttl_seconds()).await;
            Ok((output.value, compute_ms))
        }
        .boxed()
    }

    /// Best-effort write to every enabled tier, L1 first
    async fn write_through(&self, entry: CacheEntry, ttl: Option<u64>) {
        self.tier_set(&self.l1, entry.clone(), None).await;
        if let Some(l2) = &self.l2 {
            self.tier_set(l2, entry.clone(), ttl).await;
        }
        if let Some(l3) = &self.l3 {
            self.tier_set(l3, entry, None).await;
        }
    }

    // =========================================================================
    // Event stream and prefetch
    // =========================================================================

    /// Record a settled request and drive prediction from it
    fn settle(
        self: &Arc<Self>,
        key: &CacheKey,
        outcome: Outcome,
        compute_ms: Option<u64>,
        started: Instant,
    ) {
        self.stats.record_outcome(outcome);
        self.stats
            .request_latency
            .record(started.elapsed().as_micros() as f64 / 1000.0);
        self.tracker.record(key.clone(), outcome, compute_ms);
        self.predictor.observe(key);

        let lookahead = self.config.prefetch.lookahead;
        let predictions =
            self.predictor
                .predict_next(&self.tracker, key, self.config.prefetch.top_n, lookahead);
        if predictions.is_empty() {
            return;
        }
        self.predictor.track(&predictions, lookahead);

        for prediction in predictions {
            if self.l1.contains(&prediction.key) {
                self.prefetcher.record_skipped();
                continue;
            }
            let Ok(ns) = self.registry.get(prediction.key.namespace()) else {
                self.prefetcher.record_skipped();
                continue;
            };
            let this = Arc::clone(self);
            let target = prediction.key.clone();
            self.prefetcher
                .schedule(&prediction.key, ns.cancel_safe(), async move {
                    this.prefetch_one(target).await
                });
        }
    }

    /// Warm one predicted key: promote it from a lower tier, or compute
    /// it through single-flight. Prefetches do not record usage events.
    async fn prefetch_one(self: Arc<Self>, key: CacheKey) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) || self.l1.contains(&key) {
            return Ok(());
        }
        let ns = self.registry.get(key.namespace())?;

        let mut no_source = None;
        if self.probe_tiers(&key, &ns, &mut no_source).await?.is_some() {
            return Ok(());
        }

        let flight = self.single_flight.join(key.encode(), key.namespace(), || {
            let this = Arc::clone(&self);
            this.compute_flight(key.clone(), Arc::clone(&ns), None, None)
        });
        flight.await.map(|_| ()).map_err(|e| e.duplicate())
    }

    // =========================================================================
    // Writes and invalidation
    // =========================================================================

    /// Write a precomputed value through every tier, bypassing the
    /// namespace callback
    pub async fn put(
        &self,
        namespace: &str,
        identifier: &str,
        variant: &str,
        value: Bytes,
        tags: Vec<String>,
    ) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::Closed);
        }
        let key = CacheKey::new(namespace, identifier, variant)?;
        let ns = self.registry.get(namespace)?;

        let mut all_tags = ns.default_tags().to_vec();
        all_tags.extend(tags);
        let (encoded, encoding) = self.compressor.encode(&value);
        let entry = CacheEntry::new(key, value)
            .with_encoded_value(encoded, encoding)
            .with_tags(all_tags);

        self.write_through(entry, ns.ttl_seconds()).await;
        Ok(())
    }

    /// Remove one variant - or, with `variant: None`, every variant - of
    /// `(namespace, identifier)` from every tier. Returns whether any tier
    /// held a matching entry.
    pub async fn invalidate(
        &self,
        namespace: &str,
        identifier: &str,
        variant: Option<&str>,
    ) -> Result<bool> {
        match variant {
            Some(variant) => {
                let key = CacheKey::new(namespace, identifier, variant)?;
                let mut removed = self.tier_delete(&self.l1, &key).await;
                if let Some(l2) = &self.l2 {
                    removed |= self.tier_delete(l2, &key).await;
                }
                if let Some(l3) = &self.l3 {
                    removed |= self.tier_delete(l3, &key).await;
                }
                Ok(removed)
            }
            None => {
                // Validate the tuple without naming a variant
                CacheKey::new(namespace, identifier, "")?;
                let mut removed = self.tier_delete_variants(&self.l1, namespace, identifier).await;
                if let Some(l2) = &self.l2 {
                    removed += self.tier_delete_variants(l2, namespace, identifier).await;
                }
                if let Some(l3) = &self.l3 {
                    removed += self.tier_delete_variants(l3, namespace, identifier).await;
                }
                Ok(removed > 0)
            }
        }
    }

    async fn tier_delete(&self, tier: &dyn TierStore, key: &CacheKey) -> bool {
        match tier.delete(key).await {
            Ok(removed) => removed,
            Err(e) => {
                tracing::warn!(tier = %tier.tier(), error = %e, "tier delete failed, skipping");
                false
            }
        }
    }

    async fn tier_delete_variants(
        &self,
        tier: &dyn TierStore,
        namespace: &str,
        identifier: &str,
    ) -> u64 {
        match tier.delete_variants(namespace, identifier).await {
            Ok(removed) => removed,
            Err(e) => {
                tracing::warn!(tier = %tier.tier(), error = %e, "variant sweep failed, skipping");
                0
            }
        }
    }

    /// Remove every entry carrying `tag` from every tier. Returns the
    /// total number of tier entries removed.
    pub async fn invalidate_by_tag(&self, tag: &str) -> Result<u64> {
        let mut removed = self.tier_invalidate_tag(&self.l1, tag).await;
        if let Some(l2) = &self.l2 {
            removed += self.tier_invalidate_tag(l2, tag).await;
        }
        if let Some(l3) = &self.l3 {
            removed += self.tier_invalidate_tag(l3, tag).await;
        }
        Ok(removed)
    }

    async fn tier_invalidate_tag(&self, tier: &dyn TierStore, tag: &str) -> u64 {
        match tier.invalidate_by_tag(tag).await {
            Ok(n) => n,
            Err(e) => {
                tracing::warn!(tier = %tier.tier(), error = %e, "tag invalidation failed, skipping");
                0
            }
        }
    }

    /// Drop a namespace from every tier, or everything when `None`
    pub async fn clear(&self, namespace: Option<&str>) -> Result<()> {
        if let Err(e) = self.l1.clear(namespace).await {
            tracing::warn!(error = %e, "L1 clear failed");
        }
        if let Some(l2) = &self.l2 {
            if let Err(e) = l2.clear(namespace).await {
                tracing::warn!(error = %e, "L2 clear failed");
            }
        }
        if let Some(l3) = &self.l3 {
            if let Err(e) = l3.clear(namespace).await {
                tracing::warn!(error = %e, "L3 clear failed");
            }
        }
        Ok(())
    }

    // =========================================================================
    // Introspection and shutdown
    // =========================================================================

    /// Engine statistics: request counters plus every tier's view.
    /// Disabled tiers report zeroed counters.
    pub fn stats(&self) -> CacheStatsSnapshot {
        CacheStatsSnapshot {
            requests: self.stats.snapshot(),
            l1: self.l1.stats(),
            l2: self
                .l2
                .as_ref()
                .map(|t| t.stats())
                .unwrap_or_else(TierStatsSnapshot::default),
            l3: self
                .l3
                .as_ref()
                .map(|t| t.stats())
                .unwrap_or_else(TierStatsSnapshot::default),
        }
    }

    /// Prefetch pool statistics
    pub fn prefetch_stats(&self) -> PrefetchStatsSnapshot {
        self.prefetcher.stats()
    }

    /// Prediction model state
    pub fn predictor_snapshot(&self) -> PredictorSnapshot {
        self.predictor.snapshot()
    }

    /// The `n` most recent usage events, newest first
    pub fn recent_events(&self, n: usize) -> Vec<UsageEvent> {
        self.tracker.recent_events(n)
    }

    /// Frequent 3-key access sequences, for workflow dashboards
    pub fn workflow_patterns(&self, min_frequency: usize) -> Vec<([CacheKey; 3], usize)> {
        self.tracker.workflow_patterns(min_frequency)
    }

    /// Drop all learned usage patterns and prediction state bookkeeping
    pub fn reset_patterns(&self) {
        self.tracker.reset();
    }

    /// Shut down: stop prefetching, drain in-flight computes up to the
    /// configured deadline, and flush L1. Idempotent; requests after
    /// close fail with [`Error::Closed`].
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.prefetcher.shutdown();

        let deadline = Instant::now() + Duration::from_millis(self.config.close_drain_timeout_ms);
        while !self.single_flight.is_empty() && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let stranded = self.single_flight.len();
        if stranded > 0 {
            tracing::warn!(stranded, "close deadline reached with computes in flight");
        }

        if let Err(e) = self.l1.clear(None).await {
            tracing::warn!(error = %e, "L1 flush on close failed");
        }
        tracing::info!("cache coordinator closed");
    }
}

// =============================================================================
// Tests
// =============================================================================
