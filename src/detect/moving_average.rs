//! Moving-average detector: spikes and drops against a sliding window,
//! measured in mean absolute deviations.

use std::collections::{HashMap, VecDeque};

use parking_lot::Mutex;

use super::AnomalyDetector;
use crate::event::Event;

/// Window entries required before a metric is scored.
const MIN_WINDOW: usize = 10;
const DEVIATION_FLOOR: f64 = 1e-6;

#[derive(Debug, Default)]
struct MetricWindow {
    values: VecDeque<f64>,
    sum: f64,
}

/// Scores each metric by `tanh(|value - mean| / (threshold * MAD))` over a
/// bounded per-metric window; the event score is the maximum across metrics.
pub struct MovingAverageDetector {
    windows: Mutex<HashMap<String, MetricWindow>>,
    window_size: usize,
    threshold: f64,
}

impl MovingAverageDetector {
    pub fn new(window_size: usize, threshold: f64) -> Self {
        Self {
            windows: Mutex::new(HashMap::new()),
            window_size,
            threshold,
        }
    }
}

impl AnomalyDetector for MovingAverageDetector {
    fn score(&self, event: &Event) -> f64 {
        if event.metrics.is_empty() {
            return 0.0;
        }

        let windows = self.windows.lock();
        let mut max_score: f64 = 0.0;

        for (metric, value) in &event.metrics {
            let Some(window) = windows.get(metric) else {
                continue;
            };
            if window.values.len() < MIN_WINDOW {
                continue;
            }

            let mean = window.sum / window.values.len() as f64;
            let mad = window.values.iter().map(|v| (v - mean).abs()).sum::<f64>()
                / window.values.len() as f64;

            if mad < DEVIATION_FLOOR {
                if (value - mean).abs() >= DEVIATION_FLOOR {
                    return 1.0;
                }
                continue;
            }

            let deviation = (value - mean).abs() / (self.threshold * mad);
            max_score = max_score.max(deviation.tanh());
        }

        max_score
    }

    fn train(&self, event: &Event) {
        let mut windows = self.windows.lock();
        for (metric, value) in &event.metrics {
            let window = windows.entry(metric.clone()).or_default();
            window.values.push_back(*value);
            window.sum += value;
            if window.values.len() > self.window_size {
                if let Some(evicted) = window.values.pop_front() {
                    window.sum -= evicted;
                }
            }
        }
    }

    fn name(&self) -> &'static str {
        "moving_average"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventBuilder;

    fn metric_event(value: f64) -> Event {
        EventBuilder::detached("api.latency").metric("latency_ms", value).build()
    }

    #[test]
    fn silent_below_minimum_window() {
        let detector = MovingAverageDetector::new(100, 2.5);
        for i in 0..(MIN_WINDOW - 1) {
            detector.train(&metric_event(40.0 + i as f64));
        }
        assert_eq!(detector.score(&metric_event(4000.0)), 0.0);
    }

    #[test]
    fn spike_against_noisy_window_scores_high() {
        let detector = MovingAverageDetector::new(100, 2.5);
        for i in 0..50 {
            detector.train(&metric_event(40.0 + (i % 5) as f64));
        }
        let score = detector.score(&metric_event(400.0));
        assert!(score > 0.9, "score was {score}");
    }

    #[test]
    fn window_evicts_oldest_values() {
        let detector = MovingAverageDetector::new(10, 2.5);
        // Old regime around 1000, fully displaced by a regime around 10.
        for _ in 0..10 {
            detector.train(&metric_event(1000.0));
        }
        for i in 0..10 {
            detector.train(&metric_event(10.0 + (i % 3) as f64));
        }
        // 1000 is now an outlier against the current window.
        assert!(detector.score(&metric_event(1000.0)) > 0.9);
        assert!(detector.score(&metric_event(11.0)) < 0.5);
    }

    #[test]
    fn constant_window_flags_any_change() {
        let detector = MovingAverageDetector::new(100, 2.5);
        for _ in 0..20 {
            detector.train(&metric_event(5.0));
        }
        assert_eq!(detector.score(&metric_event(5.0)), 0.0);
        assert_eq!(detector.score(&metric_event(6.0)), 1.0);
    }
}
