//! Markov Predictor
//!
//! First-order Markov chain over the tracker's transition table with
//! beam-bounded multi-step lookahead and a self-tuning confidence
//! threshold. Predictions are verified against the live event stream: a
//! prediction counts as correct when its key is requested within the next
//! `lookahead` events.

use std::collections::{HashMap, VecDeque};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::config::PredictionConfig;
use crate::key::CacheKey;
use crate::predict::tracker::UsageTracker;

/// Accuracy samples required before the threshold starts adapting
const MIN_ADAPT_SAMPLES: usize = 10;

/// A predicted next access
#[derive(Debug, Clone)]
pub struct Prediction {
    /// The key expected to be requested
    pub key: CacheKey,
    /// Chain-product confidence in `(0, 1]`
    pub confidence: f64,
    /// How many steps ahead the prediction reaches (1 = immediate next)
    pub steps_ahead: usize,
}

/// A prediction awaiting verification against the event stream
struct PendingPrediction {
    key: CacheKey,
    events_remaining: usize,
}

struct PredictorInner {
    /// Current adaptive confidence threshold
    threshold: f64,
    /// Sliding window of verification outcomes, oldest first
    window: VecDeque<bool>,
    /// Predictions not yet confirmed or expired
    pending: Vec<PendingPrediction>,
    predictions_made: u64,
    predictions_evaluated: u64,
    predictions_correct: u64,
}

/// Markov predictor with adaptive confidence threshold
pub struct MarkovPredictor {
    config: PredictionConfig,
    inner: Mutex<PredictorInner>,
}

impl MarkovPredictor {
    /// Create a predictor with its threshold at the configured start value
    pub fn new(config: PredictionConfig) -> Self {
        let threshold = config.confidence_threshold_initial;
        Self {
            config,
            inner: Mutex::new(PredictorInner {
                threshold,
                window: VecDeque::new(),
                pending: Vec::new(),
                predictions_made: 0,
                predictions_evaluated: 0,
                predictions_correct: 0,
            }),
        }
    }

    /// Predict likely next accesses after `current`.
    ///
    /// One-step candidates come straight from the normalized transition
    /// weights. Deeper steps multiply weights along beam-bounded chains,
    /// so confidence never increases with depth. Candidates below the
    /// adaptive threshold are dropped; survivors are deduplicated keeping
    /// the highest confidence and sorted by confidence descending.
    pub fn predict_next(
        &self,
        tracker: &UsageTracker,
        current: &CacheKey,
        top_n: usize,
        lookahead: usize,
    ) -> Vec<Prediction> {
        if top_n == 0 || lookahead == 0 {
            return Vec::new();
        }
        let threshold = self.inner.lock().threshold;

        // best confidence seen per key, with the shallowest step that
        // produced it
        let mut best: HashMap<CacheKey, (f64, usize)> = HashMap::new();
        // beam frontier for the current depth
        let mut frontier: Vec<(CacheKey, f64)> = vec![(current.clone(), 1.0)];

        for step in 1..=lookahead {
            let mut next_frontier: Vec<(CacheKey, f64)> = Vec::new();
            for (state, base) in &frontier {
                for (candidate, weight) in tracker.transitions_from(state).into_iter().take(top_n)
                {
                    let confidence = base * weight;
                    if confidence < threshold {
                        continue;
                    }
                    if candidate != *current {
                        match best.get(&candidate) {
                            Some((c, _)) if *c >= confidence => {}
                            _ => {
                                best.insert(candidate.clone(), (confidence, step));
                            }
                        }
                    }
                    next_frontier.push((candidate, confidence));
                }
            }
            // keep the beam bounded
            next_frontier.sort_by(|a, b| b.1.total_cmp(&a.1));
            next_frontier.truncate(top_n);
            if next_frontier.is_empty() {
                break;
            }
            frontier = next_frontier;
        }

        let mut predictions: Vec<Prediction> = best
            .into_iter()
            .map(|(key, (confidence, steps_ahead))| Prediction {
                key,
                confidence,
                steps_ahead,
            })
            .collect();
        predictions.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
        predictions
    }

    /// Start tracking predictions for verification. Each prediction gets
    /// `lookahead` upcoming events to come true.
    pub fn track(&self, predictions: &[Prediction], lookahead: usize) {
        if predictions.is_empty() || lookahead == 0 {
            return;
        }
        let mut inner = self.inner.lock();
        inner.predictions_made += predictions.len() as u64;
        for p in predictions {
            inner.pending.push(PendingPrediction {
                key: p.key.clone(),
                events_remaining: lookahead,
            });
        }
    }

    /// Feed one observed access. Settles pending predictions and adapts
    /// the threshold from the sliding accuracy window.
    pub fn observe(&self, key: &CacheKey) {
        let mut inner = self.inner.lock();

        let mut outcomes: Vec<bool> = Vec::new();
        inner.pending.retain_mut(|p| {
            if p.key == *key {
                outcomes.push(true);
                return false;
            }
            p.events_remaining -= 1;
            if p.events_remaining == 0 {
                outcomes.push(false);
                return false;
            }
            true
        });

        if outcomes.is_empty() {
            return;
        }

        let window_cap = self.config.accuracy_window;
        for correct in outcomes {
            inner.predictions_evaluated += 1;
            if correct {
                inner.predictions_correct += 1;
            }
            if inner.window.len() == window_cap {
                inner.window.pop_front();
            }
            inner.window.push_back(correct);
        }
        self.adapt_threshold(&mut inner);
    }

    /// Accuracy over the sliding window, or `None` before any evaluation
    pub fn recent_accuracy(&self) -> Option<f64> {
        let inner = self.inner.lock();
        if inner.window.is_empty() {
            return None;
        }
        let correct = inner.window.iter().filter(|c| **c).count();
        Some(correct as f64 / inner.window.len() as f64)
    }

    /// Current adaptive threshold
    pub fn threshold(&self) -> f64 {
        self.inner.lock().threshold
    }

    /// Point-in-time model view for dashboards
    pub fn snapshot(&self) -> PredictorSnapshot {
        let inner = self.inner.lock();
        let window_correct = inner.window.iter().filter(|c| **c).count();
        PredictorSnapshot {
            threshold: inner.threshold,
            recent_accuracy: if inner.window.is_empty() {
                None
            } else {
                Some(window_correct as f64 / inner.window.len() as f64)
            },
            predictions_made: inner.predictions_made,
            predictions_evaluated: inner.predictions_evaluated,
            predictions_correct: inner.predictions_correct,
            pending: inner.pending.len(),
        }
    }

    fn adapt_threshold(&self, inner: &mut PredictorInner) {
        if inner.window.len() < MIN_ADAPT_SAMPLES {
            return;
        }
        let correct = inner.window.iter().filter(|c| **c).count();
        let accuracy = correct as f64 / inner.window.len() as f64;
        let c = &self.config;

        let next = if accuracy > 0.80 {
            (inner.threshold - c.threshold_delta).max(c.confidence_threshold_min)
        } else if accuracy < 0.50 {
            (inner.threshold + c.threshold_delta).min(c.confidence_threshold_max)
        } else {
            inner.threshold
        };

        if (next - inner.threshold).abs() > f64::EPSILON {
            tracing::debug!(
                accuracy,
                from = inner.threshold,
                to = next,
                "adapted prediction confidence threshold"
            );
            inner.threshold = next;
        }
    }
}

/// Point-in-time view of the predictor's model state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictorSnapshot {
    pub threshold: f64,
    pub recent_accuracy: Option<f64>,
    pub predictions_made: u64,
    pub predictions_evaluated: u64,
    pub predictions_correct: u64,
    pub pending: usize,
}

// =============================================================================
// Tests
// =============================================================================
