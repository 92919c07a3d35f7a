//! Regex patterns over a chosen event field.

use std::sync::Arc;

use regex::Regex;

use super::PatternMatcher;
use crate::event::Event;
use crate::PipelineError;

/// Matches a compiled regex against `message`, `event_type`, or a named
/// entity. Scores 1.0 on match, 0 otherwise.
pub struct RegexPattern {
    name: String,
    pattern: String,
    field: String,
    regex: Regex,
}

impl RegexPattern {
    /// Compile a pattern over the given field. An invalid regex is fatal for
    /// this matcher only.
    pub fn new(
        name: impl Into<String>,
        pattern: &str,
        field: impl Into<String>,
    ) -> Result<Self, PipelineError> {
        let regex = Regex::new(pattern).map_err(|source| PipelineError::RegexInvalid {
            pattern: pattern.to_string(),
            source,
        })?;
        Ok(Self {
            name: name.into(),
            pattern: pattern.to_string(),
            field: field.into(),
            regex,
        })
    }
}

impl PatternMatcher for RegexPattern {
    fn matches(&self, event: &Event, _history: &[Arc<Event>]) -> f64 {
        let value = match self.field.as_str() {
            "message" => Some(event.message.as_str()),
            "event_type" => Some(event.event_type.as_str()),
            entity_key => event.entities.get(entity_key).map(String::as_str),
        };

        match value {
            Some(value) if self.regex.is_match(value) => 1.0,
            _ => 0.0,
        }
    }

    fn train(&self, _event: &Event) {}

    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> String {
        format!("Regex pattern: {} in field '{}'", self.pattern, self.field)
    }
}
