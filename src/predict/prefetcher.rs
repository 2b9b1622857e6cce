//! Background Prefetcher
//!
//! Runs predicted computes ahead of demand. Concurrency is capped by a
//! semaphore; tasks queue on the permit rather than being dropped, and the
//! whole pool cancels on shutdown. Prefetches go through the same
//! single-flight path as foreground requests, so a prefetch and a caller
//! racing on one key still compute it once.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::key::CacheKey;

/// Prefetch pool counters
#[derive(Default)]
pub struct PrefetchStats {
    scheduled: AtomicU64,
    completed: AtomicU64,
    skipped: AtomicU64,
    failed: AtomicU64,
    cancelled: AtomicU64,
    queued: AtomicU64,
}

impl PrefetchStats {
    fn snapshot(&self) -> PrefetchStatsSnapshot {
        PrefetchStatsSnapshot {
            scheduled: self.scheduled.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            cancelled: self.cancelled.load(Ordering::Relaxed),
            queue_depth: self.queued.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time view of the prefetch pool
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrefetchStatsSnapshot {
    /// Tasks handed to the pool
    pub scheduled: u64,
    /// Tasks that finished with a value
    pub completed: u64,
    /// Predictions not scheduled (already resident, or scheduling disabled)
    pub skipped: u64,
    /// Tasks whose compute returned an error
    pub failed: u64,
    /// Tasks abandoned by shutdown
    pub cancelled: u64,
    /// Tasks scheduled but not yet settled
    pub queue_depth: u64,
}

/// Semaphore-gated background prefetch pool
pub struct Prefetcher {
    enabled: bool,
    concurrency: usize,
    semaphore: Arc<Semaphore>,
    cancel: CancellationToken,
    stats: Arc<PrefetchStats>,
}

impl Prefetcher {
    /// Create a pool with at most `concurrency` computes in flight.
    /// `concurrency = 0` or `enabled = false` disables scheduling while
    /// keeping the statistics live.
    pub fn new(enabled: bool, concurrency: usize) -> Self {
        Self {
            enabled,
            concurrency,
            semaphore: Arc::new(Semaphore::new(concurrency)),
            cancel: CancellationToken::new(),
            stats: Arc::new(PrefetchStats::default()),
        }
    }

    /// Whether the pool will actually run tasks
    pub fn is_active(&self) -> bool {
        self.enabled && self.concurrency > 0 && !self.cancel.is_cancelled()
    }

    /// Record a prediction that was not worth scheduling
    pub fn record_skipped(&self) {
        self.stats.skipped.fetch_add(1, Ordering::Relaxed);
    }

    /// Schedule a prefetch compute. The task queues on the concurrency
    /// permit; `cancel_safe` controls whether shutdown may abort it
    /// mid-compute or only before it starts.
    pub fn schedule<F>(&self, key: &CacheKey, cancel_safe: bool, compute: F)
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        if !self.is_active() {
            self.record_skipped();
            return;
        }

        self.stats.scheduled.fetch_add(1, Ordering::Relaxed);
        self.stats.queued.fetch_add(1, Ordering::Relaxed);

        let semaphore = self.semaphore.clone();
        let cancel = self.cancel.clone();
        let stats = self.stats.clone();
        let key = key.clone();

        tokio::spawn(async move {
            let permit = tokio::select! {
                permit = semaphore.acquire_owned() => match permit {
                    Ok(p) => p,
                    // semaphore closed: shutting down
                    Err(_) => {
                        stats.cancelled.fetch_add(1, Ordering::Relaxed);
                        stats.queued.fetch_sub(1, Ordering::Relaxed);
                        return;
                    }
                },
                _ = cancel.cancelled() => {
                    stats.cancelled.fetch_add(1, Ordering::Relaxed);
                    stats.queued.fetch_sub(1, Ordering::Relaxed);
                    return;
                }
            };

            let outcome = if cancel_safe {
                tokio::select! {
                    result = compute => Some(result),
                    _ = cancel.cancelled() => None,
                }
            } else {
                Some(compute.await)
            };

            match outcome {
                Some(Ok(())) => {
                    stats.completed.fetch_add(1, Ordering::Relaxed);
                    tracing::debug!(key = %key, "prefetch completed");
                }
                Some(Err(err)) => {
                    stats.failed.fetch_add(1, Ordering::Relaxed);
                    tracing::debug!(key = %key, error = %err, "prefetch failed");
                }
                None => {
                    stats.cancelled.fetch_add(1, Ordering::Relaxed);
                }
            }
            stats.queued.fetch_sub(1, Ordering::Relaxed);
            drop(permit);
        });
    }

    /// Cancel queued and cancel-safe running tasks. Idempotent.
    pub fn shutdown(&self) {
        self.cancel.cancel();
        self.semaphore.close();
    }

    /// Point-in-time pool statistics
    pub fn stats(&self) -> PrefetchStatsSnapshot {
        self.stats.snapshot()
    }
}

// =============================================================================
// Tests
// =============================================================================
