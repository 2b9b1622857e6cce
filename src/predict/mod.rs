//! Usage Tracking, Prediction, and Prefetch
//!
//! The learning half of the engine: the tracker records every access and
//! maintains a decayed transition table, the predictor turns that table
//! into confidence-gated next-access predictions, and the prefetcher runs
//! the predicted computes in the background.

mod predictor;
mod prefetcher;
pub(crate) mod tracker;

pub use predictor::{MarkovPredictor, Prediction, PredictorSnapshot};
pub use prefetcher::{PrefetchStatsSnapshot, Prefetcher};
pub use tracker::{UsageEvent, UsageTracker};
