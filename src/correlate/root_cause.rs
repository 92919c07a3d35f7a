//! Root-cause selection over correlation groups.

use std::sync::Arc;

use super::{CausalityAnalyzer, Correlation, EventCorrelator};

/// Weight carried by the earliest-in-time evidence item.
const TEMPORAL_WEIGHT: f64 = 0.6;
/// Overall confidence scales the group confidence by this factor.
const CONFIDENCE_FACTOR: f64 = 0.7;

/// One piece of support for a root-cause verdict.
#[derive(Debug, Clone)]
pub struct Evidence {
    /// `temporal`, `correlation`, or `causal`.
    pub kind: &'static str,
    pub description: String,
    pub weight: f64,
}

/// A selected root cause with its supporting evidence.
#[derive(Debug, Clone)]
pub struct RootCause {
    pub root_event_id: u64,
    pub root_event_type: String,
    pub affected_event_ids: Vec<u64>,
    pub confidence: f64,
    pub explanation: String,
    pub evidence: Vec<Evidence>,
}

/// Selects the root cause of a correlation group: the earliest member, with
/// temporal and correlation evidence, plus causal evidence when the analyzer
/// knows a relationship from the root's type to another member's type.
///
/// Strictly downstream of the correlator and causality analyzer; it reads
/// both and feeds nothing back.
pub struct RootCauseAnalyzer {
    correlator: Arc<EventCorrelator>,
    causality: Arc<CausalityAnalyzer>,
}

impl RootCauseAnalyzer {
    pub fn new(correlator: Arc<EventCorrelator>, causality: Arc<CausalityAnalyzer>) -> Self {
        Self {
            correlator,
            causality,
        }
    }

    /// Root cause of a correlation group, or `None` for an empty group.
    pub fn find_root_cause(&self, correlation: &Correlation) -> Option<RootCause> {
        let members: Vec<_> = correlation
            .event_ids
            .iter()
            .filter_map(|id| self.correlator.event(*id))
            .collect();

        // Earliest member still in the store; fall back to the first listed
        // id when every member has been evicted.
        let root = members.iter().min_by_key(|event| event.timestamp);
        let (root_event_id, root_event_type) = match root {
            Some(event) => (event.event_id, event.event_type.clone()),
            None => (*correlation.event_ids.first()?, String::new()),
        };

        let mut evidence = vec![
            Evidence {
                kind: "temporal",
                description: "First event in time sequence".to_string(),
                weight: TEMPORAL_WEIGHT,
            },
            Evidence {
                kind: "correlation",
                description: correlation.reason.clone(),
                weight: correlation.confidence,
            },
        ];

        // Known causal links from the root's type to other member types.
        for member in &members {
            if member.event_id == root_event_id {
                continue;
            }
            if let Some(rel) = self
                .causality
                .relationship(&root_event_type, &member.event_type)
            {
                evidence.push(Evidence {
                    kind: "causal",
                    description: rel.to_string(),
                    weight: rel.strength,
                });
            }
        }

        Some(RootCause {
            root_event_id,
            root_event_type,
            affected_event_ids: correlation.event_ids.clone(),
            confidence: CONFIDENCE_FACTOR * correlation.confidence,
            explanation: "Earliest event in correlation chain".to_string(),
            evidence,
        })
    }

    /// Root cause for a specific event, using its strongest stored
    /// correlation.
    pub fn find_root_cause_for_event(&self, event_id: u64) -> Option<RootCause> {
        let correlations = self.correlator.correlations_for_event(event_id);
        let best = correlations
            .into_iter()
            .max_by(|a, b| a.confidence.total_cmp(&b.confidence))?;
        self.find_root_cause(&best)
    }
}
