//! Sequential patterns: ordered event-type chains within per-step time
//! budgets (e.g. `database.slow` then `api.timeout` then `user.error`).

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use regex::Regex;

use super::PatternMatcher;
use crate::event::Event;
use crate::PipelineError;

/// One step in a sequential pattern.
pub struct Step {
    pub event_type: String,
    /// Entity keys that must be present on a matching event.
    pub required_entities: Vec<String>,
    /// Optional regex at least one entity value must match.
    pub entity_matcher: Option<Regex>,
    /// Maximum gap back to the previous step in the chain.
    pub max_time_since_prev: chrono::Duration,
}

impl Step {
    pub fn new(event_type: impl Into<String>, max_time_since_prev: Duration) -> Self {
        Self {
            event_type: event_type.into(),
            required_entities: Vec::new(),
            entity_matcher: None,
            max_time_since_prev: chrono::Duration::from_std(max_time_since_prev)
                .unwrap_or_else(|_| chrono::Duration::seconds(60)),
        }
    }

    pub fn require_entity(mut self, key: impl Into<String>) -> Self {
        self.required_entities.push(key.into());
        self
    }

    pub fn entity_value_matching(mut self, pattern: &str) -> Result<Self, PipelineError> {
        self.entity_matcher = Some(Regex::new(pattern).map_err(|source| {
            PipelineError::RegexInvalid {
                pattern: pattern.to_string(),
                source,
            }
        })?);
        Ok(self)
    }

    fn matches(&self, event: &Event) -> bool {
        if event.event_type != self.event_type {
            return false;
        }
        if !self
            .required_entities
            .iter()
            .all(|key| event.entities.contains_key(key))
        {
            return false;
        }
        if let Some(matcher) = &self.entity_matcher {
            if !event.entities.values().any(|value| matcher.is_match(value)) {
                return false;
            }
        }
        true
    }
}

/// Matches an ordered chain of steps ending at the incoming event.
///
/// A full chain scores 1.0; a partial chain of `k` of `N` steps scores
/// `0.5 * k / N`.
pub struct SequentialPattern {
    name: String,
    steps: Vec<Step>,
    match_count: AtomicU64,
}

impl SequentialPattern {
    pub fn new(name: impl Into<String>, steps: Vec<Step>) -> Self {
        Self {
            name: name.into(),
            steps,
            match_count: AtomicU64::new(0),
        }
    }

    /// How many complete chains this pattern has matched.
    pub fn match_count(&self) -> u64 {
        self.match_count.load(Ordering::Relaxed)
    }
}

impl PatternMatcher for SequentialPattern {
    fn matches(&self, event: &Event, history: &[Arc<Event>]) -> f64 {
        // The incoming event must complete the chain.
        let Some(last) = self.steps.last() else {
            return 0.0;
        };
        if !last.matches(event) {
            return 0.0;
        }

        if self.steps.len() == 1 {
            self.match_count.fetch_add(1, Ordering::Relaxed);
            return 1.0;
        }

        // Walk history backwards, chaining earlier steps within each sought
        // step's time budget measured against the later matched event.
        let mut current_step = self.steps.len() - 1;
        let mut current_time = event.timestamp;

        for prev in history.iter().rev() {
            let sought = &self.steps[current_step - 1];
            if current_time - prev.timestamp > sought.max_time_since_prev {
                break;
            }
            if sought.matches(prev) {
                current_step -= 1;
                current_time = prev.timestamp;
                if current_step == 0 {
                    self.match_count.fetch_add(1, Ordering::Relaxed);
                    return 1.0;
                }
            }
        }

        let matched = self.steps.len() - current_step;
        0.5 * matched as f64 / self.steps.len() as f64
    }

    fn train(&self, _event: &Event) {
        // Chains are stateless; history supplies the context.
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> String {
        let chain: Vec<&str> = self.steps.iter().map(|s| s.event_type.as_str()).collect();
        format!(
            "Sequential pattern: {} (matched {} times)",
            chain.join(" -> "),
            self.match_count()
        )
    }
}
