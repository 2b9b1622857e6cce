//! Namespace Registry
//!
//! A namespace binds a name to the recipe for producing its values: an async
//! compute callback, a TTL for the KV tier, and default invalidation tags.
//! Callbacks must be idempotent and side-effect-free; the engine may invoke
//! them from background prefetch tasks as well as foreground misses.

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;

use bytes::Bytes;
use dashmap::DashMap;
use futures::future::BoxFuture;
use futures::FutureExt;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{Error, Result};
use crate::key::CacheKey;

/// Everything a compute callback gets to see
#[derive(Debug, Clone)]
pub struct ComputeContext {
    /// The key being computed
    pub key: CacheKey,
    /// Source path, when the caller supplied one for fingerprinting
    pub source: Option<PathBuf>,
}

/// Result of a compute callback: the serialized value plus any tags to
/// attach beyond the namespace defaults
#[derive(Debug)]
pub struct ComputeOutput {
    /// Serialized value blob
    pub value: Bytes,
    /// Entry-specific invalidation tags
    pub tags: Vec<String>,
}

impl ComputeOutput {
    /// Output with no entry-specific tags
    pub fn plain(value: Bytes) -> Self {
        Self {
            value,
            tags: Vec::new(),
        }
    }
}

type ComputeHandler =
    Arc<dyn Fn(ComputeContext) -> BoxFuture<'static, Result<ComputeOutput>> + Send + Sync>;

/// A registered namespace: compute callback, codec, TTL, and default tags
#[derive(Clone)]
pub struct Namespace {
    name: String,
    compute: ComputeHandler,
    /// TTL override for the KV tier; falls back to the engine default
    ttl_seconds: Option<u64>,
    /// Tags attached to every entry in this namespace
    default_tags: Vec<String>,
    /// Whether the callback tolerates being dropped mid-flight. Prefetch
    /// tasks for non-cancel-safe namespaces are drained on close instead
    /// of aborted.
    cancel_safe: bool,
}

impl Namespace {
    /// Register a raw byte-level namespace. The callback is responsible
    /// for its own serialization.
    pub fn new<F, Fut>(name: impl Into<String>, compute: F) -> Self
    where
        F: Fn(ComputeContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<ComputeOutput>> + Send + 'static,
    {
        Self {
            name: name.into(),
            compute: Arc::new(move |ctx| compute(ctx).boxed()),
            ttl_seconds: None,
            default_tags: Vec::new(),
            cancel_safe: true,
        }
    }

    /// Register a typed namespace over the built-in JSON codec. The
    /// callback returns a `Serialize` value; codec failures surface as
    /// [`Error::SerializationFailed`].
    pub fn json<T, F, Fut>(name: impl Into<String>, compute: F) -> Self
    where
        T: Serialize + Send + 'static,
        F: Fn(ComputeContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        Self::new(name, move |ctx| {
            let fut = compute(ctx);
            async move {
                let value = fut.await?;
                let bytes = serde_json::to_vec(&value)
                    .map_err(|e| Error::SerializationFailed(e.to_string()))?;
                Ok(ComputeOutput::plain(Bytes::from(bytes)))
            }
        })
    }

    /// Override the engine-default TTL for this namespace's L2 entries
    pub fn with_ttl_seconds(mut self, ttl_seconds: u64) -> Self {
        self.ttl_seconds = Some(ttl_seconds);
        self
    }

    /// Attach tags to every entry written under this namespace
    pub fn with_default_tags(mut self, tags: Vec<String>) -> Self {
        self.default_tags = tags;
        self
    }

    /// Mark the callback as unsafe to abort mid-flight
    pub fn not_cancel_safe(mut self) -> Self {
        self.cancel_safe = false;
        self
    }

    /// Namespace name
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// TTL override, if any
    #[inline]
    pub fn ttl_seconds(&self) -> Option<u64> {
        self.ttl_seconds
    }

    /// Tags attached to every entry
    #[inline]
    pub fn default_tags(&self) -> &[String] {
        &self.default_tags
    }

    /// Whether the callback tolerates cancellation
    #[inline]
    pub fn cancel_safe(&self) -> bool {
        self.cancel_safe
    }

    /// Invoke the compute callback
    pub fn compute(&self, ctx: ComputeContext) -> BoxFuture<'static, Result<ComputeOutput>> {
        (self.compute)(ctx)
    }
}

impl std::fmt::Debug for Namespace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Namespace")
            .field("name", &self.name)
            .field("ttl_seconds", &self.ttl_seconds)
            .field("default_tags", &self.default_tags)
            .field("cancel_safe", &self.cancel_safe)
            .finish_non_exhaustive()
    }
}

/// Decode a JSON value produced by a [`Namespace::json`] callback
pub fn decode_json<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    serde_json::from_slice(bytes).map_err(|e| Error::SerializationFailed(e.to_string()))
}

// =============================================================================
// Registry
// =============================================================================

/// Concurrent name -> namespace map
#[derive(Default)]
pub struct NamespaceRegistry {
    namespaces: DashMap<String, Arc<Namespace>>,
}

impl NamespaceRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a namespace. Fails with [`Error::NamespaceExists`] if the
    /// name is taken.
    pub fn register(&self, namespace: Namespace) -> Result<()> {
        let name = namespace.name().to_string();
        match self.namespaces.entry(name.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => Err(Error::NamespaceExists(name)),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                tracing::debug!(namespace = %name, "registered namespace");
                slot.insert(Arc::new(namespace));
                Ok(())
            }
        }
    }

    /// Look up a namespace by name
    pub fn get(&self, name: &str) -> Result<Arc<Namespace>> {
        self.namespaces
            .get(name)
            .map(|ns| ns.clone())
            .ok_or_else(|| Error::UnknownNamespace(name.to_string()))
    }

    /// Whether the name is registered
    pub fn contains(&self, name: &str) -> bool {
        self.namespaces.contains_key(name)
    }

    /// Registered namespace names
    pub fn names(&self) -> Vec<String> {
        self.namespaces.iter().map(|ns| ns.key().clone()).collect()
    }

    /// Number of registered namespaces
    pub fn len(&self) -> usize {
        self.namespaces.len()
    }

    /// Whether the registry is empty
    pub fn is_empty(&self) -> bool {
        self.namespaces.is_empty()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use serde::Deserialize;

    fn ctx(id: &str) -> ComputeContext {
        ComputeContext {
            key: CacheKey::new("features", id, "std").unwrap(),
            source: None,
        }
    }

    #[derive(Serialize, Deserialize, PartialEq, Debug)]
    struct Features {
        tempo: f32,
        key: String,
    }

    #[tokio::test]
    async fn test_raw_namespace_compute() {
        let ns = Namespace::new("features", |ctx: ComputeContext| async move {
            Ok(ComputeOutput::plain(Bytes::from(
                ctx.key.identifier().to_string(),
            )))
        });

        let out = ns.compute(ctx("kick.wav")).await.unwrap();
        assert_eq!(out.value.as_ref(), b"kick.wav");
    }

    #[tokio::test]
    async fn test_json_namespace_roundtrip() {
        let ns = Namespace::json("features", |_ctx| async move {
            Ok(Features {
                tempo: 128.0,
                key: "Am".into(),
            })
        });

        let out = ns.compute(ctx("a.wav")).await.unwrap();
        let back: Features = decode_json(&out.value).unwrap();
        assert_eq!(
            back,
            Features {
                tempo: 128.0,
                key: "Am".into()
            }
        );
    }

    #[tokio::test]
    async fn test_callback_error_propagates() {
        let ns = Namespace::json("features", |_ctx| async move {
            Err::<Features, _>(Error::ComputeFailed {
                namespace: "features".into(),
                reason: "decoder crashed".into(),
            })
        });

        let err = ns.compute(ctx("bad.wav")).await.unwrap_err();
        assert_matches!(err, Error::ComputeFailed { .. });
    }

    #[test]
    fn test_duplicate_registration_rejected() {
        let registry = NamespaceRegistry::new();
        let make = || {
            Namespace::new("features", |_ctx| async move {
                Ok(ComputeOutput::plain(Bytes::new()))
            })
        };

        registry.register(make()).unwrap();
        assert_matches!(
            registry.register(make()),
            Err(Error::NamespaceExists(name)) if name == "features"
        );
    }

    #[test]
    fn test_unknown_namespace() {
        let registry = NamespaceRegistry::new();
        assert_matches!(
            registry.get("embedding"),
            Err(Error::UnknownNamespace(name)) if name == "embedding"
        );
    }

    #[test]
    fn test_builder_options() {
        let ns = Namespace::new("embedding", |_ctx| async move {
            Ok(ComputeOutput::plain(Bytes::new()))
        })
        .with_ttl_seconds(7200)
        .with_default_tags(vec!["model:clap".into()])
        .not_cancel_safe();

        assert_eq!(ns.ttl_seconds(), Some(7200));
        assert_eq!(ns.default_tags(), ["model:clap".to_string()]);
        assert!(!ns.cancel_safe());
    }
}
