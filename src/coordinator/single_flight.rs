//! Single-Flight Compute Deduplication
//!
//! At most one compute runs per key at any time. The first caller to miss
//! installs a shared future under the encoded key bytes; everyone else
//! arriving before it settles awaits the same future and receives the same
//! value or the same error. The compute itself runs on a spawned task, so
//! it finishes and caches its result even if every caller is cancelled,
//! and the task removes its own map entry on completion so a later
//! invalidate-then-get computes fresh.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use bytes::Bytes;
use dashmap::DashMap;
use futures::future::{BoxFuture, Shared};
use futures::FutureExt;

use crate::error::{Error, Result};

/// What a settled compute hands every waiter: the plain value bytes and
/// the compute duration in milliseconds
pub(crate) type FlightOutput = std::result::Result<(Bytes, u64), Arc<Error>>;

type FlightFuture = Shared<BoxFuture<'static, FlightOutput>>;

/// Per-key in-flight compute map
#[derive(Default)]
pub(crate) struct SingleFlight {
    inflight: DashMap<Bytes, FlightFuture>,
}

impl SingleFlight {
    pub fn new() -> Self {
        Self::default()
    }

    /// Join the flight for `key_bytes`, creating it from `make` if absent.
    /// `make` only constructs the future; nothing is polled under the map
    /// shard lock. A panic in the compute settles the flight with
    /// [`Error::ComputeFailed`] for `namespace`.
    pub fn join<F>(self: &Arc<Self>, key_bytes: Bytes, namespace: &str, make: F) -> FlightFuture
    where
        F: FnOnce() -> BoxFuture<'static, Result<(Bytes, u64)>>,
    {
        match self.inflight.entry(key_bytes.clone()) {
            dashmap::mapref::entry::Entry::Occupied(existing) => existing.get().clone(),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                let this = Arc::clone(self);
                let namespace = namespace.to_string();
                let fut = make();

                // The compute runs detached so it finishes and caches even
                // if every caller goes away, and it cleans up its own map
                // entry whether it returns, errors, or panics.
                let task = tokio::spawn(async move {
                    let result = AssertUnwindSafe(fut).catch_unwind().await;
                    this.inflight.remove(&key_bytes);
                    match result {
                        Ok(settled) => settled.map_err(Arc::new),
                        Err(_) => Err(Arc::new(Error::ComputeFailed {
                            namespace,
                            reason: "compute callback panicked".into(),
                        })),
                    }
                });

                let shared = async move {
                    match task.await {
                        Ok(output) => output,
                        Err(join_err) => Err(Arc::new(Error::ComputeFailed {
                            namespace: String::new(),
                            reason: format!("compute task failed: {join_err}"),
                        })),
                    }
                }
                .boxed()
                .shared();
                slot.insert(shared.clone());
                shared
            }
        }
    }

    /// Number of keys currently being computed
    pub fn len(&self) -> usize {
        self.inflight.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inflight.is_empty()
    }
}

// =============================================================================
// Tests
// =============================================================================
