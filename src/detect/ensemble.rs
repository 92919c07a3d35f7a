//! Ensemble detector: combines child detectors under a configurable policy.

use std::sync::Arc;

use super::AnomalyDetector;
use crate::event::Event;

/// Votes require a child score of at least this.
const VOTE_THRESHOLD: f64 = 0.5;

/// How child scores fold into a single ensemble score.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CombineMethod {
    /// Maximum child score.
    Max,
    /// Arithmetic mean of child scores.
    Average,
    /// Weighted average of child scores.
    Weighted,
    /// Fraction of children scoring at least 0.5.
    Voting,
}

/// An ordered set of `(detector, weight)` pairs sharing one capability.
pub struct EnsembleDetector {
    detectors: Vec<(Arc<dyn AnomalyDetector>, f64)>,
    method: CombineMethod,
}

impl EnsembleDetector {
    pub fn new(method: CombineMethod) -> Self {
        Self {
            detectors: Vec::new(),
            method,
        }
    }

    pub fn add_detector(&mut self, detector: Arc<dyn AnomalyDetector>, weight: f64) {
        self.detectors.push((detector, weight));
    }

    pub fn len(&self) -> usize {
        self.detectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.detectors.is_empty()
    }
}

impl AnomalyDetector for EnsembleDetector {
    fn score(&self, event: &Event) -> f64 {
        if self.detectors.is_empty() {
            return 0.0;
        }

        let scores: Vec<f64> = self
            .detectors
            .iter()
            .map(|(detector, _)| detector.score(event))
            .collect();

        match self.method {
            CombineMethod::Max => scores.iter().copied().fold(0.0, f64::max),
            CombineMethod::Average => scores.iter().sum::<f64>() / scores.len() as f64,
            CombineMethod::Weighted => {
                let weight_sum: f64 = self.detectors.iter().map(|(_, w)| w).sum();
                if weight_sum <= 0.0 {
                    return 0.0;
                }
                scores
                    .iter()
                    .zip(self.detectors.iter())
                    .map(|(score, (_, weight))| score * weight)
                    .sum::<f64>()
                    / weight_sum
            }
            CombineMethod::Voting => {
                let votes = scores.iter().filter(|s| **s >= VOTE_THRESHOLD).count();
                votes as f64 / scores.len() as f64
            }
        }
    }

    fn train(&self, event: &Event) {
        for (detector, _) in &self.detectors {
            detector.train(event);
        }
    }

    fn name(&self) -> &'static str {
        "ensemble"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Fixed-score detector for exercising combine arithmetic.
    struct Fixed(f64);

    impl AnomalyDetector for Fixed {
        fn score(&self, _event: &Event) -> f64 {
            self.0
        }
        fn train(&self, _event: &Event) {}
        fn name(&self) -> &'static str {
            "fixed"
        }
    }

    fn ensemble_of(method: CombineMethod, scores: &[(f64, f64)]) -> EnsembleDetector {
        let mut ensemble = EnsembleDetector::new(method);
        for (score, weight) in scores {
            ensemble.add_detector(Arc::new(Fixed(*score)), *weight);
        }
        ensemble
    }

    #[test]
    fn combine_methods() {
        let event = Event::new("test.event");
        let members = [(0.2, 1.0), (0.8, 1.0), (0.6, 2.0)];

        let max = ensemble_of(CombineMethod::Max, &members);
        assert_eq!(max.score(&event), 0.8);

        let avg = ensemble_of(CombineMethod::Average, &members);
        assert!((avg.score(&event) - (0.2 + 0.8 + 0.6) / 3.0).abs() < 1e-12);

        let weighted = ensemble_of(CombineMethod::Weighted, &members);
        let expected = (0.2 + 0.8 + 0.6 * 2.0) / 4.0;
        assert!((weighted.score(&event) - expected).abs() < 1e-12);

        let voting = ensemble_of(CombineMethod::Voting, &members);
        assert!((voting.score(&event) - 2.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn empty_ensemble_scores_zero() {
        let ensemble = EnsembleDetector::new(CombineMethod::Max);
        assert_eq!(ensemble.score(&Event::new("test.event")), 0.0);
    }

    #[test]
    fn default_factory_shape() {
        let detector = super::super::default_detector();
        assert_eq!(detector.name(), "ensemble");
    }
}
