//! Pattern engine: named structural rules evaluated against each event and
//! the recent history window.

pub mod frequency;
pub mod regex;
pub mod sequential;

use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tracing::warn;

use crate::event::Event;

pub use self::frequency::{FrequencyKind, FrequencyPattern};
pub use self::regex::RegexPattern;
pub use self::sequential::{SequentialPattern, Step};

/// Matches below this are not reported.
const REPORT_THRESHOLD: f64 = 0.5;

/// A named rule over events and history.
///
/// Matchers keep any learned state behind an interior mutex and are shared
/// across worker threads.
pub trait PatternMatcher: Send + Sync {
    /// Score the event against this pattern, in [0, 1].
    fn matches(&self, event: &Event, history: &[Arc<Event>]) -> f64;

    /// Learn from an observed event.
    fn train(&self, event: &Event);

    fn name(&self) -> &str;

    /// Human-readable description of what the pattern detects.
    fn description(&self) -> String;
}

/// A reported match.
#[derive(Debug, Clone)]
pub struct PatternMatch {
    pub name: String,
    pub score: f64,
    pub description: String,
}

/// Registry of pattern matchers.
pub struct PatternEngine {
    matchers: RwLock<Vec<Arc<dyn PatternMatcher>>>,
}

impl PatternEngine {
    pub fn new() -> Self {
        Self {
            matchers: RwLock::new(Vec::new()),
        }
    }

    pub fn register(&self, matcher: Arc<dyn PatternMatcher>) {
        self.matchers.write().push(matcher);
    }

    /// Evaluate every matcher; report scores above 0.5, sorted descending.
    pub fn match_event(&self, event: &Event, history: &[Arc<Event>]) -> Vec<PatternMatch> {
        let matchers = self.matchers.read();
        let mut matches: Vec<PatternMatch> = matchers
            .iter()
            .filter_map(|matcher| {
                let score = matcher.matches(event, history);
                (score > REPORT_THRESHOLD).then(|| PatternMatch {
                    name: matcher.name().to_string(),
                    score,
                    description: matcher.description(),
                })
            })
            .collect();

        matches.sort_by(|a, b| b.score.total_cmp(&a.score));
        matches
    }

    /// Train every matcher with the event.
    pub fn train_all(&self, event: &Event) {
        for matcher in self.matchers.read().iter() {
            matcher.train(event);
        }
    }

    /// Snapshot of registered matchers.
    pub fn matchers(&self) -> Vec<Arc<dyn PatternMatcher>> {
        self.matchers.read().clone()
    }

    /// Register the stock pattern set.
    pub fn register_builtins(&self) {
        self.register(Arc::new(cascading_failure()));
        self.register(Arc::new(auth_failure_burst()));
        self.register(Arc::new(retry_storm()));
        match exception_detected() {
            Ok(pattern) => self.register(Arc::new(pattern)),
            Err(err) => warn!(error = %err, "skipping builtin exception pattern"),
        }
    }
}

impl Default for PatternEngine {
    fn default() -> Self {
        Self::new()
    }
}

/// Cascading failure: slow database, then API timeouts, then user errors.
pub fn cascading_failure() -> SequentialPattern {
    SequentialPattern::new(
        "cascading_failure",
        vec![
            Step::new("database.slow", Duration::from_secs(10)),
            Step::new("api.timeout", Duration::from_secs(5)),
            Step::new("user.error", Duration::from_secs(3)),
        ],
    )
}

/// Repeated authentication failures from one entity (user, IP, ...).
pub fn auth_failure_burst() -> FrequencyPattern {
    FrequencyPattern::new(
        "auth_failure_burst",
        "auth.failed",
        FrequencyKind::Repeated,
        5,
        Duration::from_secs(60),
    )
}

/// Burst of retries of the same operation.
pub fn retry_storm() -> FrequencyPattern {
    FrequencyPattern::new(
        "retry_storm",
        "api.retry",
        FrequencyKind::Burst,
        10,
        Duration::from_secs(30),
    )
}

/// Gradual memory exhaustion leading to OOM warnings. Not registered by
/// default.
pub fn memory_leak() -> SequentialPattern {
    SequentialPattern::new(
        "memory_leak",
        vec![
            Step::new("memory.high", Duration::from_secs(5 * 60)),
            Step::new("gc.frequent", Duration::from_secs(2 * 60)),
            Step::new("oom.warning", Duration::from_secs(60)),
        ],
    )
}

/// Exception and stack-trace markers in event messages.
pub fn exception_detected() -> Result<RegexPattern, crate::PipelineError> {
    RegexPattern::new(
        "exception_detected",
        r"Exception|Error|Traceback|at \w+\.\w+\(",
        "message",
    )
}
