//! Z-score detector: per-metric running mean and variance via Welford's
//! recurrence.

use std::collections::HashMap;

use parking_lot::Mutex;

use super::AnomalyDetector;
use crate::event::Event;

/// Samples required before a metric is scored at all.
const MIN_SAMPLES: u64 = 30;
/// Below this a baseline is considered constant.
const VARIANCE_FLOOR: f64 = 1e-6;

#[derive(Debug, Default, Clone)]
struct MetricStats {
    mean: f64,
    /// Sum of squared differences from the running mean.
    m2: f64,
    count: u64,
}

impl MetricStats {
    fn stddev(&self) -> f64 {
        if self.count > 1 {
            (self.m2 / (self.count - 1) as f64).sqrt()
        } else {
            0.0
        }
    }
}

/// Scores each metric by its deviation from the learned mean, normalized
/// through `tanh(z / threshold)`; the event score is the maximum across its
/// metrics.
pub struct ZScoreDetector {
    stats: Mutex<HashMap<String, MetricStats>>,
    threshold: f64,
}

impl ZScoreDetector {
    pub fn new(threshold: f64) -> Self {
        Self {
            stats: Mutex::new(HashMap::new()),
            threshold,
        }
    }

    /// Learned mean for a metric, if any samples were seen.
    pub fn mean(&self, metric: &str) -> Option<f64> {
        self.stats.lock().get(metric).map(|s| s.mean)
    }

    /// Learned standard deviation for a metric.
    pub fn stddev(&self, metric: &str) -> Option<f64> {
        self.stats.lock().get(metric).map(MetricStats::stddev)
    }
}

impl AnomalyDetector for ZScoreDetector {
    fn score(&self, event: &Event) -> f64 {
        if event.metrics.is_empty() {
            return 0.0;
        }

        let stats = self.stats.lock();
        let mut max_score: f64 = 0.0;

        for (metric, value) in &event.metrics {
            let Some(metric_stats) = stats.get(metric) else {
                continue;
            };
            if metric_stats.count < MIN_SAMPLES {
                continue;
            }

            let stddev = metric_stats.stddev();
            if stddev < VARIANCE_FLOOR {
                // Constant baseline: any real deviation is maximally anomalous.
                if (value - metric_stats.mean).abs() >= VARIANCE_FLOOR {
                    return 1.0;
                }
                continue;
            }

            let z = (value - metric_stats.mean).abs() / stddev;
            max_score = max_score.max((z / self.threshold).tanh());
        }

        max_score
    }

    fn train(&self, event: &Event) {
        let mut stats = self.stats.lock();
        for (metric, value) in &event.metrics {
            let entry = stats.entry(metric.clone()).or_default();
            entry.count += 1;
            let delta = value - entry.mean;
            entry.mean += delta / entry.count as f64;
            let delta2 = value - entry.mean;
            entry.m2 += delta * delta2;
        }
    }

    fn name(&self) -> &'static str {
        "z_score"
    }
}
