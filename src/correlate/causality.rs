//! Causality analyzer: learns directed relationships between event types
//! from temporal adjacency, alongside operator-registered canon.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;

use crate::event::Event;

/// Prior events further back than this are not considered related.
const LEARN_WINDOW: chrono::Duration = chrono::Duration::seconds(60);
/// Strength assigned the first time a pair is seen.
const INITIAL_STRENGTH: f64 = 0.1;
/// Strength gained per repeated observation, capped at 1.0.
const STRENGTH_STEP: f64 = 0.05;

/// The nature of a directed relationship between two event types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CausalityKind {
    /// A reliably produces B.
    Causes,
    /// A suppresses B.
    Prevents,
    /// A is a precondition of B.
    Enables,
    /// A is observed before B; nothing stronger is claimed.
    Precedes,
}

impl CausalityKind {
    fn verb(&self) -> &'static str {
        match self {
            CausalityKind::Causes => "causes",
            CausalityKind::Prevents => "prevents",
            CausalityKind::Enables => "enables",
            CausalityKind::Precedes => "precedes",
        }
    }
}

/// A directed, strength-weighted association between two event types.
#[derive(Debug, Clone)]
pub struct CausalRelationship {
    pub cause_event_type: String,
    pub effect_event_type: String,
    pub kind: CausalityKind,
    /// Confidence in [0, 1].
    pub strength: f64,
    /// Typical cause-to-effect delay, tracked as an incremental mean.
    pub typical_delay: chrono::Duration,
    pub observed_count: u64,
    pub last_observed: chrono::DateTime<Utc>,
}

impl fmt::Display for CausalRelationship {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} (strength={}, observed={}x)",
            self.cause_event_type,
            self.kind.verb(),
            self.effect_event_type,
            self.strength,
            self.observed_count
        )
    }
}

/// Learns and answers queries about (cause type, effect type) pairs.
pub struct CausalityAnalyzer {
    relationships: Mutex<HashMap<(String, String), CausalRelationship>>,
}

impl CausalityAnalyzer {
    pub fn new() -> Self {
        Self {
            relationships: Mutex::new(HashMap::new()),
        }
    }

    /// Treat every history event within the learn window as a potential
    /// cause of `event`: create the pair as PRECEDES on first sight, then
    /// refine delay, count, and strength on every repeat.
    pub fn learn(&self, event: &Event, history: &[Arc<Event>]) {
        let cutoff = event.timestamp - LEARN_WINDOW;
        let mut relationships = self.relationships.lock();

        for prev in history {
            if prev.timestamp < cutoff {
                continue;
            }

            let key = (prev.event_type.clone(), event.event_type.clone());
            let delay = event.timestamp - prev.timestamp;

            let rel = relationships
                .entry(key)
                .or_insert_with(|| CausalRelationship {
                    cause_event_type: prev.event_type.clone(),
                    effect_event_type: event.event_type.clone(),
                    kind: CausalityKind::Precedes,
                    strength: INITIAL_STRENGTH,
                    typical_delay: delay,
                    observed_count: 0,
                    last_observed: event.timestamp,
                });

            rel.observed_count += 1;
            let n = rel.observed_count as i32;
            rel.typical_delay = (rel.typical_delay * (n - 1) + delay) / n;
            rel.strength = (rel.strength + STRENGTH_STEP).min(1.0);
            rel.last_observed = event.timestamp;
        }
    }

    /// Known relationships for which some prior event in history is the
    /// cause and `event` the effect.
    pub fn analyze(&self, event: &Event, history: &[Arc<Event>]) -> Vec<CausalRelationship> {
        let relationships = self.relationships.lock();
        let mut seen: HashSet<&str> = HashSet::new();
        let mut found = Vec::new();

        for prev in history {
            if !seen.insert(prev.event_type.as_str()) {
                continue;
            }
            let key = (prev.event_type.clone(), event.event_type.clone());
            if let Some(rel) = relationships.get(&key) {
                found.push(rel.clone());
            }
        }

        found
    }

    /// A specific known relationship, if any.
    pub fn relationship(&self, cause: &str, effect: &str) -> Option<CausalRelationship> {
        self.relationships
            .lock()
            .get(&(cause.to_string(), effect.to_string()))
            .cloned()
    }

    /// Every known relationship.
    pub fn known_relationships(&self) -> Vec<CausalRelationship> {
        self.relationships.lock().values().cloned().collect()
    }

    /// Register (or replace) a canonical relationship.
    pub fn register(&self, rel: CausalRelationship) {
        let key = (rel.cause_event_type.clone(), rel.effect_event_type.clone());
        self.relationships.lock().insert(key, rel);
    }

    /// Canonical service relationships worth knowing from the start.
    pub fn register_builtins(&self) {
        let now = Utc::now();
        let canon = [
            (
                "database.slow",
                "api.timeout",
                CausalityKind::Causes,
                0.9,
                chrono::Duration::milliseconds(500),
            ),
            (
                "api.timeout",
                "user.error",
                CausalityKind::Causes,
                0.8,
                chrono::Duration::milliseconds(100),
            ),
            (
                "circuit_breaker.open",
                "api.call",
                CausalityKind::Prevents,
                1.0,
                chrono::Duration::zero(),
            ),
        ];
        for (cause, effect, kind, strength, delay) in canon {
            self.register(CausalRelationship {
                cause_event_type: cause.to_string(),
                effect_event_type: effect.to_string(),
                kind,
                strength,
                typical_delay: delay,
                observed_count: 100,
                last_observed: now,
            });
        }
    }

    /// Drop relationships not observed within `max_age`.
    pub fn cleanup(&self, max_age: Duration) {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(max_age).unwrap_or_else(|_| chrono::Duration::hours(1));
        self.relationships
            .lock()
            .retain(|_, rel| rel.last_observed >= cutoff);
    }
}

impl Default for CausalityAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}
