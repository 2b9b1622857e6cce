//! Engine-Level Statistics
//!
//! Request outcomes, per-request counters, and latency EMAs. Tier-local
//! counters live with the tiers; this module aggregates the view a caller
//! sees from the coordinator.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use crate::tier::{Tier, TierStatsSnapshot};

/// Where a request was satisfied
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Outcome {
    /// Served from the in-process tier
    HitL1,
    /// Served from the KV tier
    HitL2,
    /// Served from the document tier
    HitL3,
    /// Computed fresh
    Miss,
}

impl Outcome {
    /// Whether the request was served from any tier
    #[inline]
    pub fn is_hit(&self) -> bool {
        !matches!(self, Outcome::Miss)
    }

    /// The tier that served the request, if any
    pub fn tier(&self) -> Option<Tier> {
        match self {
            Outcome::HitL1 => Some(Tier::L1),
            Outcome::HitL2 => Some(Tier::L2),
            Outcome::HitL3 => Some(Tier::L3),
            Outcome::Miss => None,
        }
    }
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Outcome::HitL1 => "hit_l1",
            Outcome::HitL2 => "hit_l2",
            Outcome::HitL3 => "hit_l3",
            Outcome::Miss => "miss",
        };
        f.write_str(s)
    }
}

// =============================================================================
// Latency EMA
// =============================================================================

/// Exponential moving average of a latency series, lock-free.
/// Stores the f64 bit pattern in an atomic; a lost race skews the
/// average by one sample at most.
pub struct LatencyEma {
    bits: AtomicU64,
    alpha: f64,
}

impl LatencyEma {
    /// EMA with the given smoothing factor
    pub fn new(alpha: f64) -> Self {
        Self {
            bits: AtomicU64::new(0f64.to_bits()),
            alpha,
        }
    }

    /// Fold one sample into the average
    pub fn record(&self, sample_ms: f64) {
        let prev = f64::from_bits(self.bits.load(Ordering::Relaxed));
        let next = if prev == 0.0 {
            sample_ms
        } else {
            self.alpha * sample_ms + (1.0 - self.alpha) * prev
        };
        self.bits.store(next.to_bits(), Ordering::Relaxed);
    }

    /// Current average in milliseconds
    pub fn get(&self) -> f64 {
        f64::from_bits(self.bits.load(Ordering::Relaxed))
    }
}

impl Default for LatencyEma {
    fn default() -> Self {
        Self::new(0.2)
    }
}

// =============================================================================
// Coordinator counters
// =============================================================================

/// Per-request counters maintained by the coordinator
#[derive(Default)]
pub struct RequestStats {
    requests: AtomicU64,
    hits_l1: AtomicU64,
    hits_l2: AtomicU64,
    hits_l3: AtomicU64,
    misses: AtomicU64,
    computes: AtomicU64,
    compute_failures: AtomicU64,
    /// EMA of the full get_or_compute latency
    pub request_latency: LatencyEma,
    /// EMA of compute callback latency alone
    pub compute_latency: LatencyEma,
}

impl RequestStats {
    /// Record a settled request outcome
    pub fn record_outcome(&self, outcome: Outcome) {
        self.requests.fetch_add(1, Ordering::Relaxed);
        let counter = match outcome {
            Outcome::HitL1 => &self.hits_l1,
            Outcome::HitL2 => &self.hits_l2,
            Outcome::HitL3 => &self.hits_l3,
            Outcome::Miss => &self.misses,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a compute invocation
    pub fn record_compute(&self) {
        self.computes.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a failed compute
    pub fn record_compute_failure(&self) {
        self.compute_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Point-in-time view of the counters
    pub fn snapshot(&self) -> RequestStatsSnapshot {
        let requests = self.requests.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let hit_rate = if requests > 0 {
            (requests - misses) as f64 / requests as f64
        } else {
            0.0
        };
        RequestStatsSnapshot {
            requests,
            hits_l1: self.hits_l1.load(Ordering::Relaxed),
            hits_l2: self.hits_l2.load(Ordering::Relaxed),
            hits_l3: self.hits_l3.load(Ordering::Relaxed),
            misses,
            computes: self.computes.load(Ordering::Relaxed),
            compute_failures: self.compute_failures.load(Ordering::Relaxed),
            hit_rate,
            request_latency_ema_ms: self.request_latency.get(),
            compute_latency_ema_ms: self.compute_latency.get(),
        }
    }
}

/// Point-in-time view of the request counters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestStatsSnapshot {
    pub requests: u64,
    pub hits_l1: u64,
    pub hits_l2: u64,
    pub hits_l3: u64,
    pub misses: u64,
    pub computes: u64,
    pub compute_failures: u64,
    /// Fraction of requests served from any tier
    pub hit_rate: f64,
    pub request_latency_ema_ms: f64,
    pub compute_latency_ema_ms: f64,
}

/// Complete engine statistics: request counters plus each tier's view
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheStatsSnapshot {
    pub requests: RequestStatsSnapshot,
    pub l1: TierStatsSnapshot,
    pub l2: TierStatsSnapshot,
    pub l3: TierStatsSnapshot,
}

// =============================================================================
// Tests
// =============================================================================
