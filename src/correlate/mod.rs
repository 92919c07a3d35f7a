//! Correlation engine: groups related events by trace, entity, service, and
//! time; learns causal relationships; selects root causes.

pub mod causality;
pub mod correlator;
pub mod root_cause;

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::event::Event;

pub use self::causality::{CausalRelationship, CausalityAnalyzer, CausalityKind};
pub use self::correlator::EventCorrelator;
pub use self::root_cause::{Evidence, RootCause, RootCauseAnalyzer};

/// Stored events and correlations older than this are evicted by
/// [`CorrelationEngine::cleanup`].
pub const DEFAULT_MAX_AGE: Duration = Duration::from_secs(60 * 60);

/// The strategy that produced a correlation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CorrelationStrategy {
    TraceId,
    Entity,
    Service,
    Temporal,
}

impl CorrelationStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            CorrelationStrategy::TraceId => "trace_id",
            CorrelationStrategy::Entity => "entity",
            CorrelationStrategy::Service => "service",
            CorrelationStrategy::Temporal => "temporal",
        }
    }
}

impl fmt::Display for CorrelationStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A group of events linked by one strategy.
#[derive(Debug, Clone, Serialize)]
pub struct Correlation {
    /// Members of the group, the triggering event included. Always >= 2.
    pub event_ids: Vec<u64>,
    pub strategy: CorrelationStrategy,
    /// Strategy confidence in [0, 1].
    pub confidence: f64,
    pub reason: String,
    pub first_event_time: DateTime<Utc>,
    pub last_event_time: DateTime<Utc>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,
}

/// Owns the correlator, the causality analyzer, and the root-cause selector.
///
/// The selector is strictly downstream: it borrows handles to the other two
/// at construction and feeds nothing back.
pub struct CorrelationEngine {
    correlator: Arc<EventCorrelator>,
    causality: Arc<CausalityAnalyzer>,
    root_cause: RootCauseAnalyzer,
}

impl CorrelationEngine {
    pub fn new() -> Self {
        let correlator = Arc::new(EventCorrelator::new());
        let causality = Arc::new(CausalityAnalyzer::new());
        let root_cause = RootCauseAnalyzer::new(Arc::clone(&correlator), Arc::clone(&causality));
        Self {
            correlator,
            causality,
            root_cause,
        }
    }

    /// Correlate the event against the store and learn causality from the
    /// history window. Returns every correlation found for this event.
    pub fn process(&self, event: &Event, history: &[Arc<Event>]) -> Vec<Correlation> {
        let correlations = self.correlator.correlate(event);
        self.causality.learn(event, history);
        correlations
    }

    pub fn correlator(&self) -> &Arc<EventCorrelator> {
        &self.correlator
    }

    pub fn causality(&self) -> &Arc<CausalityAnalyzer> {
        &self.causality
    }

    pub fn root_cause(&self) -> &RootCauseAnalyzer {
        &self.root_cause
    }

    /// Seed the causality analyzer with well-known service relationships.
    pub fn register_builtin_relationships(&self) {
        self.causality.register_builtins();
    }

    /// Evict stored events, correlations, and causal relationships older
    /// than `max_age` and rebuild the lookup indexes.
    pub fn cleanup(&self, max_age: Duration) {
        self.correlator.cleanup(max_age);
        self.causality.cleanup(max_age);
    }
}

impl Default for CorrelationEngine {
    fn default() -> Self {
        Self::new()
    }
}
