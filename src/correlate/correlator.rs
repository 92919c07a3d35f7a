//! Event correlator: stores recent events under trace/entity/service indexes
//! and groups each incoming event by four strategies.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use super::{Correlation, CorrelationStrategy};
use crate::event::Event;

/// Same-service events older than this are not grouped.
const SERVICE_WINDOW: chrono::Duration = chrono::Duration::seconds(60);
/// Temporal proximity radius.
const TEMPORAL_WINDOW: chrono::Duration = chrono::Duration::seconds(5);
/// Prior events required before a temporal group is reported.
const TEMPORAL_MIN_PRIOR: usize = 2;

#[derive(Default)]
struct CorrelatorState {
    events: HashMap<u64, Arc<Event>>,
    correlations: Vec<Correlation>,
    trace_index: HashMap<String, Vec<u64>>,
    entity_index: HashMap<String, Vec<u64>>,
    service_index: HashMap<String, Vec<u64>>,
}

impl CorrelatorState {
    fn index(&mut self, event: &Arc<Event>) {
        let id = event.event_id;
        if let Some(trace_id) = &event.trace_id {
            self.trace_index.entry(trace_id.clone()).or_default().push(id);
        }
        for value in event.entities.values() {
            self.entity_index.entry(value.clone()).or_default().push(id);
        }
        if let Some(service) = &event.service_name {
            self.service_index.entry(service.clone()).or_default().push(id);
        }
        self.events.insert(id, Arc::clone(event));
    }

    /// First/last timestamps over the group members that are still stored;
    /// the triggering event covers any unknown ids.
    fn time_span(&self, ids: &[u64], current: &Event) -> (DateTime<Utc>, DateTime<Utc>) {
        let mut first = current.timestamp;
        let mut last = current.timestamp;
        for id in ids {
            if let Some(event) = self.events.get(id) {
                first = first.min(event.timestamp);
                last = last.max(event.timestamp);
            }
        }
        (first, last)
    }
}

/// Groups events by shared trace id, shared entities, shared service, and
/// temporal proximity, in that order of confidence.
pub struct EventCorrelator {
    state: Mutex<CorrelatorState>,
}

impl EventCorrelator {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(CorrelatorState::default()),
        }
    }

    /// Apply every strategy to the event, then add it to the store and
    /// indexes. Returns the correlations found, one per strategy that
    /// yielded a non-empty group.
    pub fn correlate(&self, event: &Event) -> Vec<Correlation> {
        let mut state = self.state.lock();

        let mut found = Vec::new();
        if let Some(corr) = Self::by_trace_id(&state, event) {
            found.push(corr);
        }
        if let Some(corr) = Self::by_entities(&state, event) {
            found.push(corr);
        }
        if let Some(corr) = Self::by_service(&state, event) {
            found.push(corr);
        }
        if let Some(corr) = Self::by_time(&state, event) {
            found.push(corr);
        }

        state.index(&Arc::new(event.clone()));
        state.correlations.extend(found.iter().cloned());

        found
    }

    fn by_trace_id(state: &CorrelatorState, event: &Event) -> Option<Correlation> {
        let trace_id = event.trace_id.as_deref()?;
        let prior = state.trace_index.get(trace_id)?;
        if prior.is_empty() {
            return None;
        }

        let mut event_ids = prior.clone();
        event_ids.push(event.event_id);
        let (first, last) = state.time_span(&event_ids, event);

        let mut metadata = BTreeMap::new();
        metadata.insert("trace_id".to_string(), trace_id.to_string());

        Some(Correlation {
            event_ids,
            strategy: CorrelationStrategy::TraceId,
            confidence: 1.0,
            reason: format!("Events share trace ID: {trace_id}"),
            first_event_time: first,
            last_event_time: last,
            metadata,
        })
    }

    fn by_entities(state: &CorrelatorState, event: &Event) -> Option<Correlation> {
        let mut related: HashSet<u64> = HashSet::new();
        for value in event.entities.values() {
            if let Some(ids) = state.entity_index.get(value) {
                related.extend(ids.iter().filter(|id| **id != event.event_id));
            }
        }
        if related.is_empty() {
            return None;
        }

        let mut event_ids: Vec<u64> = related.into_iter().collect();
        event_ids.sort_unstable();
        event_ids.push(event.event_id);
        let (first, last) = state.time_span(&event_ids, event);

        Some(Correlation {
            event_ids,
            strategy: CorrelationStrategy::Entity,
            confidence: 0.8,
            reason: "Events share common entities".to_string(),
            first_event_time: first,
            last_event_time: last,
            metadata: BTreeMap::new(),
        })
    }

    fn by_service(state: &CorrelatorState, event: &Event) -> Option<Correlation> {
        let service = event.service_name.as_deref()?;
        let ids = state.service_index.get(service)?;

        let cutoff = event.timestamp - SERVICE_WINDOW;
        let recent: Vec<u64> = ids
            .iter()
            .copied()
            .filter(|id| {
                state
                    .events
                    .get(id)
                    .is_some_and(|e| e.timestamp >= cutoff)
            })
            .collect();
        if recent.is_empty() {
            return None;
        }

        let mut event_ids = recent;
        event_ids.push(event.event_id);
        let (first, last) = state.time_span(&event_ids, event);

        let mut metadata = BTreeMap::new();
        metadata.insert("service".to_string(), service.to_string());

        Some(Correlation {
            event_ids,
            strategy: CorrelationStrategy::Service,
            confidence: 0.6,
            reason: format!("Events from same service: {service}"),
            first_event_time: first,
            last_event_time: last,
            metadata,
        })
    }

    fn by_time(state: &CorrelatorState, event: &Event) -> Option<Correlation> {
        let mut nearby: Vec<u64> = state
            .events
            .values()
            .filter(|other| {
                other.event_id != event.event_id
                    && (event.timestamp - other.timestamp).abs() <= TEMPORAL_WINDOW
            })
            .map(|other| other.event_id)
            .collect();
        if nearby.len() < TEMPORAL_MIN_PRIOR {
            return None;
        }

        nearby.sort_unstable();
        let mut event_ids = nearby;
        event_ids.push(event.event_id);
        let (first, last) = state.time_span(&event_ids, event);

        Some(Correlation {
            event_ids,
            strategy: CorrelationStrategy::Temporal,
            confidence: 0.4,
            reason: "Events occurred within 5 seconds".to_string(),
            first_event_time: first,
            last_event_time: last,
            metadata: BTreeMap::new(),
        })
    }

    /// All stored correlations involving the given event.
    pub fn correlations_for_event(&self, event_id: u64) -> Vec<Correlation> {
        self.state
            .lock()
            .correlations
            .iter()
            .filter(|corr| corr.event_ids.contains(&event_id))
            .cloned()
            .collect()
    }

    /// Every correlation still in the store.
    pub fn active_correlations(&self) -> Vec<Correlation> {
        self.state.lock().correlations.clone()
    }

    /// A stored event by id, if it has not been evicted.
    pub fn event(&self, event_id: u64) -> Option<Arc<Event>> {
        self.state.lock().events.get(&event_id).cloned()
    }

    pub fn event_count(&self) -> usize {
        self.state.lock().events.len()
    }

    /// Drop events and correlations older than `max_age` and rebuild the
    /// indexes from the survivors.
    pub fn cleanup(&self, max_age: Duration) {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(max_age).unwrap_or_else(|_| chrono::Duration::hours(1));

        let mut state = self.state.lock();
        state.events.retain(|_, event| event.timestamp >= cutoff);
        state.correlations.retain(|corr| corr.last_event_time >= cutoff);

        state.trace_index.clear();
        state.entity_index.clear();
        state.service_index.clear();

        let survivors: Vec<Arc<Event>> = state.events.values().cloned().collect();
        for event in survivors {
            let id = event.event_id;
            if let Some(trace_id) = &event.trace_id {
                state.trace_index.entry(trace_id.clone()).or_default().push(id);
            }
            for value in event.entities.values() {
                state.entity_index.entry(value.clone()).or_default().push(id);
            }
            if let Some(service) = &event.service_name {
                state.service_index.entry(service.clone()).or_default().push(id);
            }
        }
    }
}

impl Default for EventCorrelator {
    fn default() -> Self {
        Self::new()
    }
}
