//! Frequency patterns: bursts, repeated entities, and (reserved) absences of
//! a bound event type within a sliding window.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use super::PatternMatcher;
use crate::event::Event;

/// What kind of frequency anomaly the pattern looks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrequencyKind {
    /// Sudden spike in overall event frequency.
    Burst,
    /// A single entity value appearing too often.
    Repeated,
    /// Expected events not occurring. Reserved: accepted but never scored.
    Absence,
}

#[derive(Default)]
struct FrequencyState {
    event_times: VecDeque<DateTime<Utc>>,
    entity_times: HashMap<String, VecDeque<DateTime<Utc>>>,
}

/// Counts occurrences of one event type (globally and per entity value)
/// within a sliding window. Counts include the incoming event, so a
/// threshold of N fires on the N-th occurrence.
pub struct FrequencyPattern {
    name: String,
    event_type: String,
    kind: FrequencyKind,
    threshold: usize,
    window: chrono::Duration,
    state: Mutex<FrequencyState>,
}

impl FrequencyPattern {
    pub fn new(
        name: impl Into<String>,
        event_type: impl Into<String>,
        kind: FrequencyKind,
        threshold: usize,
        window: Duration,
    ) -> Self {
        Self {
            name: name.into(),
            event_type: event_type.into(),
            kind,
            threshold: threshold.max(1),
            window: chrono::Duration::from_std(window)
                .unwrap_or_else(|_| chrono::Duration::seconds(60)),
            state: Mutex::new(FrequencyState::default()),
        }
    }

    fn prune(times: &mut VecDeque<DateTime<Utc>>, cutoff: DateTime<Utc>) {
        while times.front().is_some_and(|ts| *ts < cutoff) {
            times.pop_front();
        }
    }
}

impl PatternMatcher for FrequencyPattern {
    fn matches(&self, event: &Event, _history: &[Arc<Event>]) -> f64 {
        if event.event_type != self.event_type {
            return 0.0;
        }

        let mut state = self.state.lock();
        let cutoff = event.timestamp - self.window;

        match self.kind {
            FrequencyKind::Burst => {
                Self::prune(&mut state.event_times, cutoff);
                let count = state.event_times.len() + 1;
                if count >= self.threshold {
                    let excess = (count - self.threshold + 1) as f64 / self.threshold as f64;
                    (0.7 + excess * 0.3).min(1.0)
                } else {
                    0.0
                }
            }
            FrequencyKind::Repeated => {
                for value in event.entities.values() {
                    if let Some(times) = state.entity_times.get_mut(value) {
                        Self::prune(times, cutoff);
                        if times.len() + 1 >= self.threshold {
                            return 1.0;
                        }
                    }
                }
                0.0
            }
            FrequencyKind::Absence => 0.0,
        }
    }

    fn train(&self, event: &Event) {
        if event.event_type != self.event_type {
            return;
        }

        let mut state = self.state.lock();
        state.event_times.push_back(event.timestamp);
        for value in event.entities.values() {
            state
                .entity_times
                .entry(value.clone())
                .or_default()
                .push_back(event.timestamp);
        }
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> String {
        let kind = match self.kind {
            FrequencyKind::Burst => "burst detection",
            FrequencyKind::Repeated => "repeated entity",
            FrequencyKind::Absence => "absence detection",
        };
        format!(
            "Frequency pattern: {} ({kind}, threshold={})",
            self.event_type, self.threshold
        )
    }
}
