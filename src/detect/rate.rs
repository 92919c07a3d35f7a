//! Rate detector: per-event-type arrival rate against an exponentially
//! weighted baseline.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use super::AnomalyDetector;
use crate::event::Event;

/// EMA weight for baseline updates.
const BASELINE_ALPHA: f64 = 0.1;
/// Baselines below this are considered unestablished and score nothing.
const BASELINE_FLOOR: f64 = 0.1;
/// Rate above `SPIKE_RATIO` times baseline starts scoring as a spike.
const SPIKE_RATIO: f64 = 2.0;
/// Rate below `DROP_RATIO` times baseline starts scoring as a drop.
const DROP_RATIO: f64 = 0.5;

#[derive(Debug, Default)]
struct RateWindow {
    timestamps: VecDeque<DateTime<Utc>>,
    baseline: f64,
}

/// Flags event types whose current arrival rate deviates sharply from their
/// learned baseline, in either direction.
pub struct RateDetector {
    windows: Mutex<HashMap<String, RateWindow>>,
    window: chrono::Duration,
    window_secs: f64,
}

impl RateDetector {
    pub fn new(window: Duration) -> Self {
        Self {
            windows: Mutex::new(HashMap::new()),
            window: chrono::Duration::from_std(window)
                .unwrap_or_else(|_| chrono::Duration::seconds(60)),
            window_secs: window.as_secs_f64().max(1.0),
        }
    }

    fn prune(window: &mut RateWindow, cutoff: DateTime<Utc>) {
        while window
            .timestamps
            .front()
            .is_some_and(|ts| *ts < cutoff)
        {
            window.timestamps.pop_front();
        }
    }
}

impl AnomalyDetector for RateDetector {
    fn score(&self, event: &Event) -> f64 {
        let mut windows = self.windows.lock();
        let Some(window) = windows.get_mut(&event.event_type) else {
            return 0.0;
        };

        Self::prune(window, event.timestamp - self.window);
        let current_rate = window.timestamps.len() as f64 / self.window_secs;

        if window.baseline < BASELINE_FLOOR {
            return 0.0;
        }

        let ratio = current_rate / window.baseline;
        if ratio > SPIKE_RATIO {
            ((ratio - SPIKE_RATIO) / 3.0).min(1.0)
        } else if ratio < DROP_RATIO {
            ((DROP_RATIO - ratio) / DROP_RATIO).min(1.0)
        } else {
            0.0
        }
    }

    fn train(&self, event: &Event) {
        let mut windows = self.windows.lock();
        let window = windows.entry(event.event_type.clone()).or_default();

        window.timestamps.push_back(event.timestamp);
        Self::prune(window, event.timestamp - self.window);

        let current_rate = window.timestamps.len() as f64 / self.window_secs;
        if window.baseline < BASELINE_FLOOR {
            window.baseline = current_rate;
        } else {
            window.baseline =
                (1.0 - BASELINE_ALPHA) * window.baseline + BASELINE_ALPHA * current_rate;
        }
    }

    fn name(&self) -> &'static str {
        "rate"
    }
}
