//! Cache Engine Configuration
//!
//! Plain config structs with sensible defaults. Embedders construct these
//! directly or deserialize them from their own configuration files.

use serde::{Deserialize, Serialize};

/// Top-level cache engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Hard cap on L1 entry count; triggers LRU eviction.
    /// `0` degrades L1 to a no-op while L2/L3 keep functioning.
    pub l1_max_items: usize,
    /// If false, L2 is bypassed entirely
    pub l2_enabled: bool,
    /// If false, L3 is bypassed entirely
    pub l3_enabled: bool,
    /// Default L2 TTL in seconds when a namespace does not specify one
    pub default_ttl_seconds: u64,
    /// Always recompute the content hash on probe instead of trusting
    /// mtime equality. Slower, but detects mtime-preserving rewrites.
    pub always_hash: bool,
    /// Prefetch configuration
    pub prefetch: PrefetchConfig,
    /// Prediction model configuration
    pub prediction: PredictionConfig,
    /// Value blob compression configuration
    pub compression: CompressionConfig,
    /// Maximum events retained in the usage tracker ring buffer
    pub max_tracked_events: usize,
    /// Deadline in milliseconds for draining in-flight computes on close
    pub close_drain_timeout_ms: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            l1_max_items: 1024,
            l2_enabled: true,
            l3_enabled: true,
            default_ttl_seconds: 3600,
            always_hash: false,
            prefetch: PrefetchConfig::default(),
            prediction: PredictionConfig::default(),
            compression: CompressionConfig::default(),
            max_tracked_events: 1000,
            close_drain_timeout_ms: 5_000,
        }
    }
}

/// Background prefetch configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PrefetchConfig {
    /// If false, events are still recorded but no background tasks run
    pub enabled: bool,
    /// Max concurrent prefetch computes. `0` disables scheduling while
    /// leaving prediction statistics intact.
    pub concurrency: usize,
    /// Max steps ahead for prediction chains
    pub lookahead: usize,
    /// Top candidates considered at each prediction step
    pub top_n: usize,
}

impl Default for PrefetchConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            concurrency: 2,
            lookahead: 2,
            top_n: 5,
        }
    }
}

/// Markov prediction model configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PredictionConfig {
    /// Starting value for the adaptive confidence threshold
    pub confidence_threshold_initial: f64,
    /// Lower bound on the adaptive threshold
    pub confidence_threshold_min: f64,
    /// Upper bound on the adaptive threshold
    pub confidence_threshold_max: f64,
    /// Step applied when the threshold adapts
    pub threshold_delta: f64,
    /// Geometric decay factor for transition counts, in (0, 1]
    pub decay_alpha: f64,
    /// Sliding window size for recent-accuracy calculation
    pub accuracy_window: usize,
}

impl Default for PredictionConfig {
    fn default() -> Self {
        Self {
            confidence_threshold_initial: 0.60,
            confidence_threshold_min: 0.30,
            confidence_threshold_max: 0.90,
            threshold_delta: 0.05,
            decay_alpha: 0.98,
            accuracy_window: 100,
        }
    }
}

/// Value blob compression configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CompressionConfig {
    /// Enable LZ4 compression of value blobs written to L2/L3
    pub enabled: bool,
    /// Minimum blob size to compress (smaller blobs stay plain)
    pub min_size_bytes: usize,
    /// LZ4 high-compression level
    pub level: i32,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min_size_bytes: 1024,
            level: 4,
        }
    }
}

impl CacheConfig {
    /// Validate config invariants that cannot be expressed in the types
    pub fn validate(&self) -> crate::error::Result<()> {
        let p = &self.prediction;
        if !(0.0 < p.decay_alpha && p.decay_alpha <= 1.0) {
            return Err(crate::error::Error::Config(format!(
                "decay_alpha must be in (0, 1], got {}",
                p.decay_alpha
            )));
        }
        if p.confidence_threshold_min > p.confidence_threshold_max {
            return Err(crate::error::Error::Config(
                "confidence_threshold_min exceeds confidence_threshold_max".into(),
            ));
        }
        let init = p.confidence_threshold_initial;
        if !(p.confidence_threshold_min..=p.confidence_threshold_max).contains(&init) {
            return Err(crate::error::Error::Config(format!(
                "confidence_threshold_initial {init} outside [{}, {}]",
                p.confidence_threshold_min, p.confidence_threshold_max
            )));
        }
        if p.accuracy_window == 0 {
            return Err(crate::error::Error::Config(
                "accuracy_window must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================
