//! Error types for the samplecache engine

use thiserror::Error;

use crate::tier::Tier;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the cache engine
#[derive(Error, Debug)]
pub enum Error {
    /// Source file for fingerprinting could not be read.
    /// Always surfaced to the caller; no event is recorded.
    #[error("source unavailable: {path}: {reason}")]
    SourceUnavailable { path: String, reason: String },

    /// A namespace compute callback returned an error.
    /// Surfaced to the caller and recorded as a miss; nothing is written.
    #[error("compute failed for namespace {namespace}: {reason}")]
    ComputeFailed { namespace: String, reason: String },

    /// A tier backend failed. Recoverable: the coordinator logs it and
    /// treats reads as misses and writes as no-ops.
    #[error("tier {tier} unavailable: {reason}")]
    TierUnavailable { tier: Tier, reason: String },

    /// A namespace codec failed to serialize or deserialize a value.
    /// Surfaced to callers as `ComputeFailed`; logged at error level.
    #[error("serialization failed: {0}")]
    SerializationFailed(String),

    /// Caller passed an empty namespace or identifier. Programmer error,
    /// surfaced synchronously.
    #[error("invalid key: {0}")]
    InvalidKey(String),

    /// Namespace was never registered with the coordinator
    #[error("unknown namespace: {0}")]
    UnknownNamespace(String),

    /// Namespace registered twice
    #[error("namespace already registered: {0}")]
    NamespaceExists(String),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Coordinator has been closed
    #[error("cache coordinator is closed")]
    Closed,

    /// Compression failed
    #[error("compression with {algorithm} failed: {reason}")]
    CompressionFailed { algorithm: String, reason: String },

    /// Decompression failed
    #[error("decompression with {algorithm} failed: {reason}")]
    DecompressionFailed { algorithm: String, reason: String },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether the coordinator may swallow this error on the read path
    pub fn is_degradable(&self) -> bool {
        matches!(self, Error::TierUnavailable { .. })
    }

    /// Rebuild an owned copy of this error. Single-flight waiters share
    /// one error behind an `Arc`; each caller surfaces its own copy.
    pub(crate) fn duplicate(&self) -> Error {
        match self {
            Error::SourceUnavailable { path, reason } => Error::SourceUnavailable {
                path: path.clone(),
                reason: reason.clone(),
            },
            Error::ComputeFailed { namespace, reason } => Error::ComputeFailed {
                namespace: namespace.clone(),
                reason: reason.clone(),
            },
            Error::TierUnavailable { tier, reason } => Error::TierUnavailable {
                tier: *tier,
                reason: reason.clone(),
            },
            Error::SerializationFailed(reason) => Error::SerializationFailed(reason.clone()),
            Error::InvalidKey(reason) => Error::InvalidKey(reason.clone()),
            Error::UnknownNamespace(name) => Error::UnknownNamespace(name.clone()),
            Error::NamespaceExists(name) => Error::NamespaceExists(name.clone()),
            Error::Config(reason) => Error::Config(reason.clone()),
            Error::Closed => Error::Closed,
            Error::CompressionFailed { algorithm, reason } => Error::CompressionFailed {
                algorithm: algorithm.clone(),
                reason: reason.clone(),
            },
            Error::DecompressionFailed { algorithm, reason } => Error::DecompressionFailed {
                algorithm: algorithm.clone(),
                reason: reason.clone(),
            },
            Error::Io(e) => Error::Io(std::io::Error::new(e.kind(), e.to_string())),
        }
    }

    /// Convert a codec failure into the caller-facing compute error
    pub(crate) fn into_compute_failed(self, namespace: &str) -> Error {
        match self {
            Error::SerializationFailed(reason) => Error::ComputeFailed {
                namespace: namespace.to_string(),
                reason,
            },
            other => other,
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
