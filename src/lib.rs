//! # samplecache
//!
//! Multi-level caching and predictive prefetch engine for audio-analysis
//! pipelines. Expensive derived artifacts (feature vectors, embeddings,
//! search results) are cached across three tiers - in-process memory, a
//! remote key-value store, and a durable document store - while a Markov
//! model over the access stream prefetches what a user is likely to touch
//! next.
//!
//! ## Quick start
//!
//! ```no_run
//! use bytes::Bytes;
//! use samplecache::{CacheConfig, CacheCoordinator, ComputeContext, ComputeOutput, Namespace};
//!
//! # async fn demo() -> samplecache::Result<()> {
//! let cache = CacheCoordinator::new(CacheConfig::default())?;
//! cache.register(Namespace::new("features", |ctx: ComputeContext| async move {
//!     let analysis = format!("{{\"file\":\"{}\"}}", ctx.key.identifier());
//!     Ok(ComputeOutput::plain(Bytes::from(analysis)))
//! }))?;
//!
//! let (value, outcome) = cache
//!     .get_or_compute("features", "kick.wav", "std", None)
//!     .await?;
//! println!("{outcome}: {} bytes", value.len());
//! # Ok(())
//! # }
//! ```

pub mod compress;
pub mod config;
pub mod coordinator;
pub mod entry;
pub mod error;
pub mod key;
pub mod namespace;
pub mod predict;
pub mod stats;
pub mod tier;

pub use compress::Encoding;
pub use config::{CacheConfig, CompressionConfig, PredictionConfig, PrefetchConfig};
pub use coordinator::CacheCoordinator;
pub use entry::CacheEntry;
pub use error::{Error, Result};
pub use key::{CacheKey, Fingerprint};
pub use namespace::{ComputeContext, ComputeOutput, Namespace, NamespaceRegistry};
pub use predict::{Prediction, PredictorSnapshot, PrefetchStatsSnapshot, UsageEvent};
pub use stats::{CacheStatsSnapshot, Outcome, RequestStatsSnapshot};
pub use tier::{
    DocumentBackend, InMemoryDocumentBackend, InMemoryKvBackend, KvBackend, Tier,
    TierStatsSnapshot, TierStore,
};
