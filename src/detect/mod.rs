//! Anomaly detection: online detectors scoring events against learned
//! per-metric baselines.
//!
//! The pipeline always calls [`AnomalyDetector::score`] before
//! [`AnomalyDetector::train`], so an event is evaluated against the state
//! learned from *prior* events and a fresh observation cannot mask its own
//! anomaly.

pub mod ensemble;
pub mod moving_average;
pub mod rate;
pub mod zscore;

use std::sync::Arc;
use std::time::Duration;

use crate::event::Event;

pub use ensemble::{CombineMethod, EnsembleDetector};
pub use moving_average::MovingAverageDetector;
pub use rate::RateDetector;
pub use zscore::ZScoreDetector;

/// An online anomaly detection algorithm.
///
/// Detectors keep their own state behind an interior mutex, so a single
/// instance is shared across worker threads.
pub trait AnomalyDetector: Send + Sync {
    /// Score the event against previously learned state, in [0, 1].
    ///
    /// Metrics the detector has no baseline for contribute nothing: absence
    /// of signal is never treated as zero.
    fn score(&self, event: &Event) -> f64;

    /// Update learned state with the event's observations.
    fn train(&self, event: &Event);

    fn name(&self) -> &'static str;
}

/// The stock detector: a max-combined ensemble of z-score, moving-average,
/// and rate detectors.
pub fn default_detector() -> Arc<dyn AnomalyDetector> {
    let mut ensemble = EnsembleDetector::new(CombineMethod::Max);
    ensemble.add_detector(Arc::new(ZScoreDetector::new(3.0)), 1.0);
    ensemble.add_detector(Arc::new(MovingAverageDetector::new(100, 2.5)), 1.0);
    ensemble.add_detector(Arc::new(RateDetector::new(Duration::from_secs(60))), 0.8);
    Arc::new(ensemble)
}
