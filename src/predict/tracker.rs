//! Usage Pattern Tracker
//!
//! Records the stream of cache accesses and maintains a first-order
//! transition table over consecutive keys. The table feeds the Markov
//! predictor; the event ring feeds accuracy bookkeeping and workflow
//! mining.
//!
//! Transition counts decay geometrically so stale habits fade. Decay is
//! applied lazily: each cell stores `(count, last_tick)` and the effective
//! count is `count * alpha^(now_tick - last_tick)`, computed on read. No
//! background sweeper runs.

use std::collections::{HashMap, VecDeque};

use chrono::Utc;
use parking_lot::Mutex;

use crate::key::CacheKey;
use crate::stats::Outcome;

/// One recorded cache access
#[derive(Debug, Clone)]
pub struct UsageEvent {
    /// Wall-clock timestamp in unix milliseconds
    pub timestamp_ms: i64,
    /// The key that was requested
    pub key: CacheKey,
    /// How the request was satisfied
    pub outcome: Outcome,
    /// Compute duration when the request missed, in milliseconds
    pub compute_ms: Option<u64>,
}

/// Transition cell: decayed count plus the tick it was last folded at
#[derive(Debug, Clone, Copy)]
struct TransitionCell {
    count: f64,
    last_tick: u64,
}

impl TransitionCell {
    fn effective(&self, now_tick: u64, alpha: f64) -> f64 {
        self.count * alpha.powi((now_tick - self.last_tick) as i32)
    }
}

struct TrackerInner {
    /// Bounded event ring, oldest first
    events: VecDeque<UsageEvent>,
    /// previous key -> next key -> decayed count
    transitions: HashMap<CacheKey, HashMap<CacheKey, TransitionCell>>,
    /// Previous event's key, for the next transition edge
    last_key: Option<CacheKey>,
    /// Monotonic event counter driving the decay clock
    tick: u64,
}

/// Ring buffer of usage events plus the transition table built from them
pub struct UsageTracker {
    inner: Mutex<TrackerInner>,
    max_events: usize,
    decay_alpha: f64,
}

impl UsageTracker {
    /// Create a tracker bounded to `max_events` with the given decay factor
    pub fn new(max_events: usize, decay_alpha: f64) -> Self {
        Self {
            inner: Mutex::new(TrackerInner {
                events: VecDeque::with_capacity(max_events.min(1024)),
                transitions: HashMap::new(),
                last_key: None,
                tick: 0,
            }),
            max_events,
            decay_alpha,
        }
    }

    /// Record one access. O(1) amortized; the ring push and the transition
    /// update happen under the same lock so observers never see one
    /// without the other.
    pub fn record(&self, key: CacheKey, outcome: Outcome, compute_ms: Option<u64>) {
        let event = UsageEvent {
            timestamp_ms: Utc::now().timestamp_millis(),
            key,
            outcome,
            compute_ms,
        };

        let mut inner = self.inner.lock();
        inner.tick += 1;
        let tick = inner.tick;
        let alpha = self.decay_alpha;

        if let Some(prev) = inner.last_key.take() {
            let cell = inner
                .transitions
                .entry(prev)
                .or_default()
                .entry(event.key.clone())
                .or_insert(TransitionCell {
                    count: 0.0,
                    last_tick: tick,
                });
            cell.count = cell.effective(tick, alpha) + 1.0;
            cell.last_tick = tick;
        }
        inner.last_key = Some(event.key.clone());

        if self.max_events > 0 {
            if inner.events.len() == self.max_events {
                inner.events.pop_front();
            }
            inner.events.push_back(event);
        }
    }

    /// The `n` most recent events, newest first
    pub fn recent_events(&self, n: usize) -> Vec<UsageEvent> {
        let inner = self.inner.lock();
        inner.events.iter().rev().take(n).cloned().collect()
    }

    /// Normalized transition weights out of `state`, heaviest first.
    /// Weights sum to at most 1; an unseen state yields an empty vec.
    pub fn transitions_from(&self, state: &CacheKey) -> Vec<(CacheKey, f64)> {
        let inner = self.inner.lock();
        let Some(row) = inner.transitions.get(state) else {
            return Vec::new();
        };

        let tick = inner.tick;
        let alpha = self.decay_alpha;
        let total: f64 = row.values().map(|c| c.effective(tick, alpha)).sum();
        if total <= 0.0 {
            return Vec::new();
        }

        let mut weights: Vec<(CacheKey, f64)> = row
            .iter()
            .map(|(k, c)| (k.clone(), c.effective(tick, alpha) / total))
            .collect();
        weights.sort_by(|a, b| b.1.total_cmp(&a.1));
        weights
    }

    /// Consecutive 3-key sequences seen at least `min_frequency` times,
    /// most frequent first
    pub fn workflow_patterns(
        &self,
        min_frequency: usize,
    ) -> Vec<([CacheKey; 3], usize)> {
        let inner = self.inner.lock();
        let events: Vec<&CacheKey> = inner.events.iter().map(|e| &e.key).collect();

        let mut counts: HashMap<[CacheKey; 3], usize> = HashMap::new();
        for window in events.windows(3) {
            let seq = [window[0].clone(), window[1].clone(), window[2].clone()];
            *counts.entry(seq).or_insert(0) += 1;
        }

        let mut patterns: Vec<([CacheKey; 3], usize)> = counts
            .into_iter()
            .filter(|(_, count)| *count >= min_frequency)
            .collect();
        patterns.sort_by(|a, b| b.1.cmp(&a.1));
        patterns
    }

    /// Number of buffered events
    pub fn len(&self) -> usize {
        self.inner.lock().events.len()
    }

    /// Whether no events have been buffered
    pub fn is_empty(&self) -> bool {
        self.inner.lock().events.is_empty()
    }

    /// Number of states with outgoing transitions
    pub fn tracked_states(&self) -> usize {
        self.inner.lock().transitions.len()
    }

    /// Drop all events and transitions
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        inner.events.clear();
        inner.transitions.clear();
        inner.last_key = None;
        tracing::debug!("usage tracker reset");
    }
}

// =============================================================================
// Tests
// =============================================================================
