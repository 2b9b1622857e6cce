//! End-to-end scenarios for the cache engine

use std::io::Write;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;
use bytes::Bytes;
use samplecache::{
    CacheConfig, CacheCoordinator, ComputeContext, ComputeOutput, Error, Namespace, Outcome,
    PrefetchConfig,
};

fn config_no_prefetch() -> CacheConfig {
    init_tracing();
    CacheConfig {
        prefetch: PrefetchConfig {
            enabled: false,
            ..Default::default()
        },
        ..Default::default()
    }
}

/// Honor `RUST_LOG` when debugging a failing scenario
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Coordinator with a "features" namespace that derives its value from the
/// source file content when one is given
fn analysis_engine(config: CacheConfig) -> (Arc<CacheCoordinator>, Arc<AtomicU64>) {
    let cache = CacheCoordinator::new(config).unwrap();
    let computes = Arc::new(AtomicU64::new(0));
    let counter = computes.clone();
    cache
        .register(Namespace::new("features", move |ctx: ComputeContext| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                let body = match &ctx.source {
                    Some(path) => tokio::fs::read_to_string(path).await.map_err(|e| {
                        Error::ComputeFailed {
                            namespace: "features".into(),
                            reason: e.to_string(),
                        }
                    })?,
                    None => ctx.key.identifier().to_string(),
                };
                Ok(ComputeOutput::plain(Bytes::from(format!("analyzed:{body}"))))
            }
        }))
        .unwrap();
    (cache, computes)
}

// =============================================================================
// Scenario: cold start, warm hit, invalidate
// =============================================================================

#[tokio::test]
async fn cold_warm_invalidate_cycle() {
    let (cache, computes) = analysis_engine(config_no_prefetch());

    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(b"waveform v1").unwrap();
    file.flush().unwrap();
    let path = file.path().to_path_buf();

    // Cold: compute once
    let (value, outcome) = cache
        .get_or_compute("features", "sample.wav", "std", Some(&path))
        .await
        .unwrap();
    assert_eq!(outcome, Outcome::Miss);
    assert_eq!(value.as_ref(), b"analyzed:waveform v1");
    assert_eq!(computes.load(Ordering::SeqCst), 1);

    // Warm: same fingerprint, served from L1
    let (_, outcome) = cache
        .get_or_compute("features", "sample.wav", "std", Some(&path))
        .await
        .unwrap();
    assert_eq!(outcome, Outcome::HitL1);
    assert_eq!(computes.load(Ordering::SeqCst), 1);

    // Rewrite the source with new content and a new mtime
    tokio::time::sleep(Duration::from_millis(20)).await;
    std::fs::write(&path, b"waveform v2").unwrap();

    let (value, outcome) = cache
        .get_or_compute("features", "sample.wav", "std", Some(&path))
        .await
        .unwrap();
    assert_eq!(outcome, Outcome::Miss);
    assert_eq!(value.as_ref(), b"analyzed:waveform v2");
    assert_eq!(computes.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn touched_but_unchanged_source_stays_cached() {
    let (cache, computes) = analysis_engine(config_no_prefetch());

    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(b"stable content").unwrap();
    file.flush().unwrap();
    let path = file.path().to_path_buf();

    cache
        .get_or_compute("features", "s.wav", "std", Some(&path))
        .await
        .unwrap();

    // Bump mtime without changing content
    tokio::time::sleep(Duration::from_millis(20)).await;
    std::fs::write(&path, b"stable content").unwrap();

    // Rehash confirms the content; no recompute
    let (_, outcome) = cache
        .get_or_compute("features", "s.wav", "std", Some(&path))
        .await
        .unwrap();
    assert!(outcome.is_hit());
    assert_eq!(computes.load(Ordering::SeqCst), 1);

    // The stored mtime was patched, so the next probe is pure fast path
    let (_, outcome) = cache
        .get_or_compute("features", "s.wav", "std", Some(&path))
        .await
        .unwrap();
    assert_eq!(outcome, Outcome::HitL1);
    assert_eq!(computes.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn missing_source_surfaces_without_event() {
    let (cache, computes) = analysis_engine(config_no_prefetch());

    let err = cache
        .get_or_compute(
            "features",
            "gone.wav",
            "std",
            Some(std::path::Path::new("/nonexistent/gone.wav")),
        )
        .await
        .unwrap_err();
    assert_matches!(err, Error::SourceUnavailable { .. });
    assert_eq!(computes.load(Ordering::SeqCst), 0);

    // No usage event was recorded
    assert!(cache.recent_events(10).is_empty());
    assert_eq!(cache.stats().requests.requests, 0);
}

// =============================================================================
// Scenario: tier degradation
// =============================================================================

#[tokio::test]
async fn survives_with_only_l3() {
    let mut config = config_no_prefetch();
    config.l1_max_items = 1;
    config.l2_enabled = false;
    let (cache, computes) = analysis_engine(config);

    cache
        .get_or_compute("features", "a.wav", "std", None)
        .await
        .unwrap();
    cache
        .get_or_compute("features", "b.wav", "std", None)
        .await
        .unwrap();

    // a.wav fell out of the single-slot L1; L3 still has it
    let (value, outcome) = cache
        .get_or_compute("features", "a.wav", "std", None)
        .await
        .unwrap();
    assert_eq!(outcome, Outcome::HitL3);
    assert_eq!(value.as_ref(), b"analyzed:a.wav");
    assert_eq!(computes.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn l1_only_engine_still_serves() {
    let mut config = config_no_prefetch();
    config.l2_enabled = false;
    config.l3_enabled = false;
    let (cache, computes) = analysis_engine(config);

    cache
        .get_or_compute("features", "a.wav", "std", None)
        .await
        .unwrap();
    let (_, outcome) = cache
        .get_or_compute("features", "a.wav", "std", None)
        .await
        .unwrap();
    assert_eq!(outcome, Outcome::HitL1);
    assert_eq!(computes.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn zero_l1_capacity_degrades_to_lower_tiers() {
    let mut config = config_no_prefetch();
    config.l1_max_items = 0;
    let (cache, computes) = analysis_engine(config);

    cache
        .get_or_compute("features", "a.wav", "std", None)
        .await
        .unwrap();
    let (_, outcome) = cache
        .get_or_compute("features", "a.wav", "std", None)
        .await
        .unwrap();
    // L1 is a no-op, so the warm read lands in L2
    assert_eq!(outcome, Outcome::HitL2);
    assert_eq!(computes.load(Ordering::SeqCst), 1);
    assert_eq!(cache.stats().l1.entries, 0);
}

// =============================================================================
// Scenario: thundering herd
// =============================================================================

#[tokio::test]
async fn concurrent_callers_compute_once() {
    let cache = CacheCoordinator::new(config_no_prefetch()).unwrap();
    let computes = Arc::new(AtomicU64::new(0));
    let counter = computes.clone();
    cache
        .register(Namespace::new("features", move |_ctx: ComputeContext| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(30)).await;
                Ok(ComputeOutput::plain(Bytes::from_static(b"slow result")))
            }
        }))
        .unwrap();

    let mut handles = Vec::new();
    for _ in 0..10 {
        let cache = cache.clone();
        handles.push(tokio::spawn(async move {
            cache
                .get_or_compute("features", "popular.wav", "std", None)
                .await
        }));
    }

    for handle in handles {
        let (value, _) = handle.await.unwrap().unwrap();
        assert_eq!(value.as_ref(), b"slow result");
    }
    assert_eq!(computes.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn concurrent_callers_share_failure() {
    let cache = CacheCoordinator::new(config_no_prefetch()).unwrap();
    let computes = Arc::new(AtomicU64::new(0));
    let counter = computes.clone();
    cache
        .register(Namespace::new("features", move |_ctx: ComputeContext| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(20)).await;
                Err::<ComputeOutput, _>(Error::ComputeFailed {
                    namespace: "features".into(),
                    reason: "decoder crashed".into(),
                })
            }
        }))
        .unwrap();

    let mut handles = Vec::new();
    for _ in 0..5 {
        let cache = cache.clone();
        handles.push(tokio::spawn(async move {
            cache
                .get_or_compute("features", "broken.wav", "std", None)
                .await
        }));
    }
    for handle in handles {
        assert_matches!(
            handle.await.unwrap().unwrap_err(),
            Error::ComputeFailed { .. }
        );
    }
    assert_eq!(computes.load(Ordering::SeqCst), 1);
}

// =============================================================================
// Scenario: prediction accuracy adaptation
// =============================================================================

#[tokio::test]
async fn threshold_adapts_to_access_regularity() {
    let mut config = CacheConfig::default();
    // Keep prediction live but scheduling off so the test is deterministic,
    // and use a short window so regime changes show up quickly
    config.prefetch.concurrency = 0;
    config.prediction.accuracy_window = 20;
    let (cache, _) = analysis_engine(config);

    let initial = cache.predictor_snapshot().threshold;

    // A strict A -> B -> C loop: predictions keep coming true
    for _ in 0..30 {
        for id in ["a.wav", "b.wav", "c.wav"] {
            cache
                .get_or_compute("features", id, "std", None)
                .await
                .unwrap();
        }
    }
    let after_regular = cache.predictor_snapshot();
    assert!(after_regular.recent_accuracy.unwrap() > 0.8);
    assert!(after_regular.threshold < initial);

    // Break the habit: a.wav is now followed by a fresh key every time,
    // so the model keeps predicting b.wav and keeps being wrong
    for i in 0..60 {
        cache
            .get_or_compute("features", "a.wav", "std", None)
            .await
            .unwrap();
        cache
            .get_or_compute("features", &format!("rand{i}.wav"), "std", None)
            .await
            .unwrap();
    }
    let after_random = cache.predictor_snapshot();
    assert!(after_random.threshold > after_regular.threshold);
}

#[tokio::test]
async fn workflow_patterns_surface_repeated_sequences() {
    let (cache, _) = analysis_engine(config_no_prefetch());

    for _ in 0..4 {
        for id in ["record.wav", "trim.wav", "master.wav"] {
            cache
                .get_or_compute("features", id, "std", None)
                .await
                .unwrap();
        }
    }

    let patterns = cache.workflow_patterns(4);
    assert!(!patterns.is_empty());
    let (sequence, count) = &patterns[0];
    assert_eq!(sequence[0].identifier(), "record.wav");
    assert_eq!(sequence[2].identifier(), "master.wav");
    assert!(*count >= 4);
}

// =============================================================================
// Scenario: prefetch warms the cache
// =============================================================================

#[tokio::test]
async fn prefetch_turns_predicted_miss_into_hit() {
    let config = CacheConfig::default();
    let (cache, computes) = analysis_engine(config);

    // Teach the model a -> b hard enough to clear the threshold
    for _ in 0..10 {
        cache
            .get_or_compute("features", "a.wav", "std", None)
            .await
            .unwrap();
        cache
            .get_or_compute("features", "b.wav", "std", None)
            .await
            .unwrap();
    }
    cache
        .invalidate("features", "b.wav", Some("std"))
        .await
        .unwrap();
    let computes_before = computes.load(Ordering::SeqCst);

    // Accessing a.wav triggers a background prefetch of b.wav
    cache
        .get_or_compute("features", "a.wav", "std", None)
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    let (_, outcome) = cache
        .get_or_compute("features", "b.wav", "std", None)
        .await
        .unwrap();
    assert!(outcome.is_hit(), "expected prefetched hit, got {outcome}");
    // The prefetch recomputed b.wav once in the background
    assert_eq!(computes.load(Ordering::SeqCst), computes_before + 1);

    let prefetch = cache.prefetch_stats();
    assert!(prefetch.scheduled >= 1);
    assert!(prefetch.completed >= 1);
}

#[tokio::test]
async fn zero_prefetch_concurrency_disables_scheduling() {
    let mut config = CacheConfig::default();
    config.prefetch.concurrency = 0;
    let (cache, _) = analysis_engine(config);

    for _ in 0..10 {
        cache
            .get_or_compute("features", "a.wav", "std", None)
            .await
            .unwrap();
        cache
            .get_or_compute("features", "b.wav", "std", None)
            .await
            .unwrap();
    }

    let prefetch = cache.prefetch_stats();
    assert_eq!(prefetch.scheduled, 0);
    assert_eq!(prefetch.queue_depth, 0);
    // Prediction bookkeeping stays live even with scheduling off
    assert!(cache.predictor_snapshot().predictions_evaluated > 0);
}

// =============================================================================
// Scenario: tag invalidation
// =============================================================================

#[tokio::test]
async fn tag_invalidation_sweeps_all_tiers() {
    let cache = CacheCoordinator::new(config_no_prefetch()).unwrap();
    cache
        .register(
            Namespace::new("features", |ctx: ComputeContext| async move {
                Ok(ComputeOutput {
                    value: Bytes::from(format!("v:{}", ctx.key.identifier())),
                    tags: vec![format!("collection:{}", ctx.key.variant())],
                })
            })
            .with_default_tags(vec!["engine:v1".into()]),
        )
        .unwrap();

    for id in ["a.wav", "b.wav"] {
        cache
            .get_or_compute("features", id, "drums", None)
            .await
            .unwrap();
    }
    cache
        .get_or_compute("features", "c.wav", "vocals", None)
        .await
        .unwrap();

    // Three tiers each drop the two drum entries
    let removed = cache.invalidate_by_tag("collection:drums").await.unwrap();
    assert_eq!(removed, 6);

    // Idempotent: nothing left to remove
    assert_eq!(cache.invalidate_by_tag("collection:drums").await.unwrap(), 0);

    let (_, outcome) = cache
        .get_or_compute("features", "a.wav", "drums", None)
        .await
        .unwrap();
    assert_eq!(outcome, Outcome::Miss);
    let (_, outcome) = cache
        .get_or_compute("features", "c.wav", "vocals", None)
        .await
        .unwrap();
    assert!(outcome.is_hit());
}

// =============================================================================
// Cross-cutting: compression, shutdown
// =============================================================================

#[tokio::test]
async fn large_values_roundtrip_through_compressed_tiers() {
    let mut config = config_no_prefetch();
    config.l1_max_items = 1;
    let cache = CacheCoordinator::new(config).unwrap();
    cache
        .register(Namespace::new("features", |_ctx| async move {
            // Repetitive payload well above the compression floor
            Ok(ComputeOutput::plain(Bytes::from(
                "{\"mfcc\":[0.5,0.5,0.5]}".repeat(500),
            )))
        }))
        .unwrap();

    let (original, _) = cache
        .get_or_compute("features", "big.wav", "std", None)
        .await
        .unwrap();
    // Push it out of L1 so the next read decompresses from L2
    cache
        .get_or_compute("features", "other.wav", "std", None)
        .await
        .unwrap();

    let (roundtripped, outcome) = cache
        .get_or_compute("features", "big.wav", "std", None)
        .await
        .unwrap();
    assert_eq!(outcome, Outcome::HitL2);
    assert_eq!(roundtripped, original);
}

#[tokio::test]
async fn close_drains_and_rejects() {
    let (cache, _) = analysis_engine(config_no_prefetch());
    cache
        .get_or_compute("features", "a.wav", "std", None)
        .await
        .unwrap();

    cache.close().await;

    assert_matches!(
        cache
            .get_or_compute("features", "a.wav", "std", None)
            .await
            .unwrap_err(),
        Error::Closed
    );
    assert_matches!(
        cache
            .put("features", "x", "std", Bytes::new(), vec![])
            .await
            .unwrap_err(),
        Error::Closed
    );
    // L1 was flushed
    assert_eq!(cache.stats().l1.entries, 0);
}
