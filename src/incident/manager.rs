//! Incident manager: threshold fusion, severity mapping, deduplication,
//! lifecycle, and dispatch to external integrations.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt::Write as _;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tracing::{debug, info};

use super::{Incident, IncidentCallback, IncidentSeverity, IncidentStatus};
use crate::correlate::Correlation;
use crate::event::Event;
use crate::integrations::IncidentIntegration;

/// Reason stamped on incidents closed by the staleness sweep.
const AUTO_RESOLVE_REASON: &str = "Auto-resolved: no further activity";
/// Score at which the `critical-anomaly` tag is attached.
const CRITICAL_TAG_SCORE: f64 = 0.9;

/// Thresholds and windows governing incident creation and lifecycle.
#[derive(Debug, Clone)]
pub struct IncidentPolicy {
    /// Minimum anomaly score to open an incident.
    pub anomaly_threshold: f64,
    /// Minimum matched patterns to open an incident.
    pub pattern_threshold: usize,
    /// Minimum correlations to open an incident.
    pub correlation_threshold: usize,

    /// Severity boundaries, evaluated top-down.
    pub critical_threshold: f64,
    pub high_threshold: f64,
    pub medium_threshold: f64,

    pub enable_deduplication: bool,
    pub deduplication_window: chrono::Duration,

    pub enable_auto_resolution: bool,
    pub resolution_timeout: chrono::Duration,
}

impl Default for IncidentPolicy {
    fn default() -> Self {
        Self {
            anomaly_threshold: 0.75,
            pattern_threshold: 1,
            correlation_threshold: 3,
            critical_threshold: 0.95,
            high_threshold: 0.85,
            medium_threshold: 0.75,
            enable_deduplication: true,
            deduplication_window: chrono::Duration::minutes(5),
            enable_auto_resolution: true,
            resolution_timeout: chrono::Duration::minutes(15),
        }
    }
}

/// Counter snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IncidentStats {
    pub total_created: u64,
    pub currently_open: u64,
    pub resolved: u64,
    pub deduplicated: u64,
}

/// Creates, deduplicates, resolves, and dispatches incidents.
pub struct IncidentManager {
    policy: IncidentPolicy,
    next_id: AtomicU64,
    incidents: Mutex<HashMap<String, Incident>>,
    integrations: Mutex<Vec<Arc<dyn IncidentIntegration>>>,
    created_callbacks: Mutex<Vec<IncidentCallback>>,
    resolved_callbacks: Mutex<Vec<IncidentCallback>>,
    total_created: AtomicU64,
    currently_open: AtomicU64,
    resolved: AtomicU64,
    deduplicated: AtomicU64,
}

impl IncidentManager {
    pub fn new(policy: IncidentPolicy) -> Self {
        Self {
            policy,
            next_id: AtomicU64::new(1),
            incidents: Mutex::new(HashMap::new()),
            integrations: Mutex::new(Vec::new()),
            created_callbacks: Mutex::new(Vec::new()),
            resolved_callbacks: Mutex::new(Vec::new()),
            total_created: AtomicU64::new(0),
            currently_open: AtomicU64::new(0),
            resolved: AtomicU64::new(0),
            deduplicated: AtomicU64::new(0),
        }
    }

    /// Decide whether the processed event (with its correlations and pattern
    /// matches) warrants an incident; create, dedupe, dispatch.
    pub fn evaluate_event(
        &self,
        event: &Event,
        correlations: &[Correlation],
        matched_patterns: &[String],
    ) -> Option<Incident> {
        self.evaluate_event_at(event, correlations, matched_patterns, Utc::now())
    }

    /// [`evaluate_event`](Self::evaluate_event) with an explicit creation
    /// time, for replay and tests.
    pub fn evaluate_event_at(
        &self,
        event: &Event,
        correlations: &[Correlation],
        matched_patterns: &[String],
        now: DateTime<Utc>,
    ) -> Option<Incident> {
        let should_create = event.anomaly_score >= self.policy.anomaly_threshold
            || matched_patterns.len() >= self.policy.pattern_threshold
            || correlations.len() >= self.policy.correlation_threshold;
        if !should_create {
            return None;
        }

        let severity = self.severity_for(
            event.anomaly_score,
            matched_patterns.len(),
            correlations.len(),
        );

        let title = match matched_patterns.first() {
            Some(pattern) => format!("Pattern detected: {pattern}"),
            None => format!("Anomaly in {}", event.event_type),
        };

        let mut incident = Incident {
            incident_id: self.generate_id(),
            title,
            description: Self::describe(event, correlations, matched_patterns),
            severity,
            status: IncidentStatus::Open,
            created_at: now,
            resolved_at: None,
            event_ids: Self::collect_event_ids(event, correlations),
            root_cause: None,
            root_cause_event_id: None,
            anomaly_score: event.anomaly_score,
            affected_services: Self::count_services(event, correlations),
            labels: BTreeMap::new(),
            tags: Vec::new(),
            external_ids: BTreeMap::new(),
        };

        incident
            .labels
            .insert("severity".to_string(), severity.as_str().to_string());
        incident
            .labels
            .insert("event_type".to_string(), event.event_type.clone());
        if let Some(service) = &event.service_name {
            incident.labels.insert("service".to_string(), service.clone());
        }

        if event.anomaly_score >= CRITICAL_TAG_SCORE {
            incident.tags.push("critical-anomaly".to_string());
        }
        for pattern in matched_patterns {
            incident.tags.push(format!("pattern:{pattern}"));
        }

        let mut incidents = self.incidents.lock();

        if self.policy.enable_deduplication {
            if let Some(existing_id) = self.find_duplicate(&incidents, &incident) {
                debug!(
                    incident = %existing_id,
                    title = %incident.title,
                    "incident deduplicated against open incident"
                );
                self.deduplicated.fetch_add(1, Ordering::Relaxed);
                return None;
            }
        }

        // Dispatch before storing so recorded external ids land in the map.
        for integration in self.integrations.lock().iter() {
            let external_id = integration.create_incident(&incident);
            incident
                .external_ids
                .insert(integration.name().to_string(), external_id);
        }

        incidents.insert(incident.incident_id.clone(), incident.clone());
        drop(incidents);

        self.total_created.fetch_add(1, Ordering::Relaxed);
        self.currently_open.fetch_add(1, Ordering::Relaxed);
        info!(incident = %incident.incident_id, severity = %incident.severity, "incident created");

        for callback in self.created_callbacks.lock().iter() {
            callback(&incident);
        }

        Some(incident)
    }

    /// Open an incident directly, bypassing threshold evaluation.
    pub fn create_incident(
        &self,
        title: impl Into<String>,
        description: impl Into<String>,
        severity: IncidentSeverity,
        event_ids: Vec<u64>,
    ) -> Incident {
        let mut incident = Incident {
            incident_id: self.generate_id(),
            title: title.into(),
            description: description.into(),
            severity,
            status: IncidentStatus::Open,
            created_at: Utc::now(),
            resolved_at: None,
            event_ids,
            root_cause: None,
            root_cause_event_id: None,
            anomaly_score: 0.0,
            affected_services: 0,
            labels: BTreeMap::new(),
            tags: Vec::new(),
            external_ids: BTreeMap::new(),
        };

        for integration in self.integrations.lock().iter() {
            let external_id = integration.create_incident(&incident);
            incident
                .external_ids
                .insert(integration.name().to_string(), external_id);
        }

        self.incidents
            .lock()
            .insert(incident.incident_id.clone(), incident.clone());
        self.total_created.fetch_add(1, Ordering::Relaxed);
        self.currently_open.fetch_add(1, Ordering::Relaxed);

        for callback in self.created_callbacks.lock().iter() {
            callback(&incident);
        }

        incident
    }

    /// Set an incident's status without lifecycle bookkeeping.
    pub fn update_status(&self, incident_id: &str, status: IncidentStatus) {
        if let Some(incident) = self.incidents.lock().get_mut(incident_id) {
            incident.status = status;
        }
    }

    /// Resolve an incident: stamp the resolution, notify integrations for
    /// every recorded external id, and fire resolved-callbacks.
    pub fn resolve(&self, incident_id: &str, reason: &str) -> Option<Incident> {
        self.resolve_at(incident_id, reason, Utc::now())
    }

    /// [`resolve`](Self::resolve) with an explicit resolution time.
    pub fn resolve_at(
        &self,
        incident_id: &str,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Option<Incident> {
        let resolved = {
            let mut incidents = self.incidents.lock();
            let incident = incidents.get_mut(incident_id)?;
            if matches!(
                incident.status,
                IncidentStatus::Resolved | IncidentStatus::Closed
            ) {
                return None;
            }

            incident.status = IncidentStatus::Resolved;
            incident.resolved_at = Some(now);
            incident.root_cause = Some(reason.to_string());
            incident.clone()
        };

        self.currently_open.fetch_sub(1, Ordering::Relaxed);
        self.resolved.fetch_add(1, Ordering::Relaxed);

        for integration in self.integrations.lock().iter() {
            if let Some(external_id) = resolved.external_ids.get(integration.name()) {
                integration.resolve_incident(external_id, reason);
            }
        }

        for callback in self.resolved_callbacks.lock().iter() {
            callback(&resolved);
        }

        Some(resolved)
    }

    /// Sweep every active incident older than the resolution timeout into
    /// RESOLVED. Caller-driven; no internal timer.
    pub fn auto_resolve_stale(&self) {
        self.auto_resolve_stale_at(Utc::now());
    }

    /// [`auto_resolve_stale`](Self::auto_resolve_stale) against a supplied
    /// clock.
    pub fn auto_resolve_stale_at(&self, now: DateTime<Utc>) {
        if !self.policy.enable_auto_resolution {
            return;
        }

        let cutoff = now - self.policy.resolution_timeout;
        let stale: Vec<String> = self
            .incidents
            .lock()
            .values()
            .filter(|incident| incident.status.is_active() && incident.created_at < cutoff)
            .map(|incident| incident.incident_id.clone())
            .collect();

        for incident_id in stale {
            self.resolve_at(&incident_id, AUTO_RESOLVE_REASON, now);
        }
    }

    pub fn register_integration(&self, integration: Arc<dyn IncidentIntegration>) {
        self.integrations.lock().push(integration);
    }

    pub fn on_created(&self, callback: IncidentCallback) {
        self.created_callbacks.lock().push(callback);
    }

    pub fn on_resolved(&self, callback: IncidentCallback) {
        self.resolved_callbacks.lock().push(callback);
    }

    pub fn incident(&self, incident_id: &str) -> Option<Incident> {
        self.incidents.lock().get(incident_id).cloned()
    }

    pub fn open_incidents(&self) -> Vec<Incident> {
        self.incidents
            .lock()
            .values()
            .filter(|incident| incident.status.is_active())
            .cloned()
            .collect()
    }

    pub fn all_incidents(&self) -> Vec<Incident> {
        self.incidents.lock().values().cloned().collect()
    }

    pub fn stats(&self) -> IncidentStats {
        IncidentStats {
            total_created: self.total_created.load(Ordering::Relaxed),
            currently_open: self.currently_open.load(Ordering::Relaxed),
            resolved: self.resolved.load(Ordering::Relaxed),
            deduplicated: self.deduplicated.load(Ordering::Relaxed),
        }
    }

    /// Severity rules, evaluated top-down; the first match wins.
    fn severity_for(
        &self,
        anomaly_score: f64,
        pattern_matches: usize,
        correlated_events: usize,
    ) -> IncidentSeverity {
        if anomaly_score >= self.policy.critical_threshold {
            IncidentSeverity::Critical
        } else if anomaly_score >= self.policy.high_threshold || pattern_matches >= 2 {
            IncidentSeverity::High
        } else if anomaly_score >= self.policy.medium_threshold || correlated_events >= 5 {
            IncidentSeverity::Medium
        } else {
            IncidentSeverity::Low
        }
    }

    /// An existing active incident the candidate duplicates: same title and
    /// severity inside the window, or sharing more than half its event ids.
    fn find_duplicate(
        &self,
        incidents: &HashMap<String, Incident>,
        candidate: &Incident,
    ) -> Option<String> {
        let cutoff = candidate.created_at - self.policy.deduplication_window;

        for (id, existing) in incidents {
            if existing.created_at < cutoff || !existing.status.is_active() {
                continue;
            }

            if existing.title == candidate.title && existing.severity == candidate.severity {
                return Some(id.clone());
            }

            let existing_ids: HashSet<u64> = existing.event_ids.iter().copied().collect();
            let overlap = candidate
                .event_ids
                .iter()
                .filter(|event_id| existing_ids.contains(event_id))
                .count();
            if overlap > candidate.event_ids.len() / 2 {
                return Some(id.clone());
            }
        }

        None
    }

    fn generate_id(&self) -> String {
        format!("INC-{:06}", self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    fn collect_event_ids(event: &Event, correlations: &[Correlation]) -> Vec<u64> {
        let mut seen = HashSet::new();
        let mut ids = Vec::new();
        for id in std::iter::once(event.event_id)
            .chain(correlations.iter().flat_map(|c| c.event_ids.iter().copied()))
        {
            if seen.insert(id) {
                ids.push(id);
            }
        }
        ids
    }

    fn count_services(event: &Event, correlations: &[Correlation]) -> usize {
        let mut services: HashSet<&str> = HashSet::new();
        if let Some(service) = &event.service_name {
            services.insert(service);
        }
        for correlation in correlations {
            if let Some(service) = correlation.metadata.get("service") {
                services.insert(service);
            }
        }
        services.len()
    }

    fn describe(event: &Event, correlations: &[Correlation], matched_patterns: &[String]) -> String {
        let mut desc = format!(
            "Incident created from event: {}\nAnomaly score: {}\n",
            event.event_type, event.anomaly_score
        );

        if !matched_patterns.is_empty() {
            desc.push_str("\nMatched patterns:\n");
            for pattern in matched_patterns {
                let _ = writeln!(desc, "  - {pattern}");
            }
        }

        if !correlations.is_empty() {
            let _ = writeln!(desc, "\nCorrelated events: {}", correlations.len());
            for correlation in correlations {
                let _ = writeln!(
                    desc,
                    "  - {} (confidence: {})",
                    correlation.reason, correlation.confidence
                );
            }
        }

        if !event.message.is_empty() {
            let _ = writeln!(desc, "\nMessage: {}", event.message);
        }

        if !event.entities.is_empty() {
            desc.push_str("\nEntities:\n");
            for (key, value) in &event.entities {
                let _ = writeln!(desc, "  {key}: {value}");
            }
        }

        if !event.metrics.is_empty() {
            desc.push_str("\nMetrics:\n");
            for (key, value) in &event.metrics {
                let _ = writeln!(desc, "  {key}: {value}");
            }
        }

        desc
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::correlate::CorrelationStrategy;
    use crate::event::EventBuilder;
    use crate::integrations::{InMemoryIntegration, IncidentIntegration};
    use std::sync::atomic::AtomicUsize;

    fn scored_event(event_type: &str, score: f64) -> Event {
        let mut event = EventBuilder::detached(event_type).build();
        event.anomaly_score = score;
        event
    }

    fn correlation_of(ids: Vec<u64>) -> Correlation {
        Correlation {
            event_ids: ids,
            strategy: CorrelationStrategy::Temporal,
            confidence: 0.4,
            reason: "Events occurred within 5 seconds".to_string(),
            first_event_time: Utc::now(),
            last_event_time: Utc::now(),
            metadata: BTreeMap::new(),
        }
    }

    #[test]
    fn below_all_thresholds_creates_nothing() {
        let manager = IncidentManager::new(IncidentPolicy::default());
        let event = scored_event("api.call", 0.5);
        assert!(manager.evaluate_event(&event, &[], &[]).is_none());
        assert_eq!(manager.stats(), IncidentStats::default());
    }

    #[test]
    fn each_threshold_triggers_creation() {
        // Anomaly score path.
        let manager = IncidentManager::new(IncidentPolicy::default());
        let incident = manager
            .evaluate_event(&scored_event("db.query", 0.8), &[], &[])
            .expect("score threshold");
        assert_eq!(incident.title, "Anomaly in db.query");
        assert_eq!(incident.incident_id, "INC-000001");

        // Pattern path.
        let manager = IncidentManager::new(IncidentPolicy::default());
        let patterns = vec!["retry_storm".to_string()];
        let incident = manager
            .evaluate_event(&scored_event("api.retry", 0.0), &[], &patterns)
            .expect("pattern threshold");
        assert_eq!(incident.title, "Pattern detected: retry_storm");
        assert!(incident.tags.contains(&"pattern:retry_storm".to_string()));

        // Correlation path.
        let manager = IncidentManager::new(IncidentPolicy::default());
        let correlations = vec![
            correlation_of(vec![1, 2]),
            correlation_of(vec![1, 3]),
            correlation_of(vec![1, 4]),
        ];
        let incident = manager
            .evaluate_event(&scored_event("api.call", 0.0), &correlations, &[])
            .expect("correlation threshold");
        // The triggering event leads, then unseen correlation members.
        assert!(incident.event_ids.len() >= 4);
    }

    #[test]
    fn severity_rules_are_top_down() {
        let manager = IncidentManager::new(IncidentPolicy::default());
        assert_eq!(manager.severity_for(0.96, 0, 0), IncidentSeverity::Critical);
        // 0.90 with two patterns hits the HIGH rule before anything else.
        assert_eq!(manager.severity_for(0.90, 2, 0), IncidentSeverity::High);
        assert_eq!(manager.severity_for(0.0, 2, 0), IncidentSeverity::High);
        assert_eq!(manager.severity_for(0.80, 1, 0), IncidentSeverity::Medium);
        assert_eq!(manager.severity_for(0.0, 0, 5), IncidentSeverity::Medium);
        assert_eq!(manager.severity_for(0.0, 1, 2), IncidentSeverity::Low);
    }

    #[test]
    fn severity_is_monotone_in_anomaly_score() {
        let manager = IncidentManager::new(IncidentPolicy::default());
        let mut last = IncidentSeverity::Low;
        for step in 0..=20 {
            let score = step as f64 / 20.0;
            let severity = manager.severity_for(score, 1, 3);
            assert!(severity >= last, "severity decreased at score {score}");
            last = severity;
        }
    }

    #[test]
    fn duplicate_title_and_severity_is_rejected_inside_window() {
        let manager = IncidentManager::new(IncidentPolicy::default());
        let event = scored_event("db.query", 0.8);

        assert!(manager.evaluate_event(&event, &[], &[]).is_some());
        assert!(manager.evaluate_event(&event, &[], &[]).is_none());

        let stats = manager.stats();
        assert_eq!(stats.total_created, 1);
        assert_eq!(stats.deduplicated, 1);
    }

    #[test]
    fn duplicate_outside_window_is_created() {
        let manager = IncidentManager::new(IncidentPolicy::default());
        let event = scored_event("db.query", 0.8);
        let t0 = Utc::now();

        assert!(manager
            .evaluate_event_at(&event, &[], &[], t0)
            .is_some());
        let later = t0 + chrono::Duration::minutes(6);
        assert!(manager
            .evaluate_event_at(&event, &[], &[], later)
            .is_some());
        assert_eq!(manager.stats().total_created, 2);
    }

    #[test]
    fn resolved_incident_does_not_block_duplicates() {
        let manager = IncidentManager::new(IncidentPolicy::default());
        let event = scored_event("db.query", 0.8);

        let first = manager.evaluate_event(&event, &[], &[]).expect("created");
        manager.resolve(&first.incident_id, "fixed");
        assert!(manager.evaluate_event(&event, &[], &[]).is_some());
    }

    #[test]
    fn shared_event_ids_deduplicate() {
        let manager = IncidentManager::new(IncidentPolicy::default());

        let mut first = scored_event("db.query", 0.8);
        first.event_id = 100;
        let corr = correlation_of(vec![100, 101, 102]);
        assert!(manager
            .evaluate_event(&first, &[corr.clone()], &[])
            .is_some());

        // Different title (different event type), same underlying events.
        let mut second = scored_event("db.timeout", 0.8);
        second.event_id = 101;
        assert!(manager.evaluate_event(&second, &[corr], &[]).is_none());
        assert_eq!(manager.stats().deduplicated, 1);
    }

    #[test]
    fn resolve_updates_lifecycle_and_notifies() {
        let manager = IncidentManager::new(IncidentPolicy::default());
        let sink = Arc::new(InMemoryIntegration::new());
        manager.register_integration(sink.clone());

        let resolved_count = Arc::new(AtomicUsize::new(0));
        let seen = resolved_count.clone();
        manager.on_resolved(Box::new(move |incident| {
            assert_eq!(incident.status, IncidentStatus::Resolved);
            seen.fetch_add(1, Ordering::SeqCst);
        }));

        let incident = manager
            .evaluate_event(&scored_event("db.query", 0.8), &[], &[])
            .expect("created");
        assert_eq!(sink.created().len(), 1);
        assert!(incident.external_ids.contains_key(sink.name()));

        let resolved = manager
            .resolve(&incident.incident_id, "failover completed")
            .expect("resolved");
        assert_eq!(resolved.root_cause.as_deref(), Some("failover completed"));
        assert!(resolved.resolved_at.is_some());
        assert_eq!(resolved_count.load(Ordering::SeqCst), 1);
        assert_eq!(sink.resolved().len(), 1);

        let stats = manager.stats();
        assert_eq!(stats.currently_open, 0);
        assert_eq!(stats.resolved, 1);

        // Resolving again is a no-op.
        assert!(manager.resolve(&incident.incident_id, "again").is_none());
    }

    #[test]
    fn stale_incidents_are_swept() {
        let manager = IncidentManager::new(IncidentPolicy::default());
        let t0 = Utc::now();
        let incident = manager
            .evaluate_event_at(&scored_event("db.query", 0.8), &[], &[], t0)
            .expect("created");

        // Fourteen minutes in: still open.
        manager.auto_resolve_stale_at(t0 + chrono::Duration::minutes(14));
        assert_eq!(
            manager.incident(&incident.incident_id).unwrap().status,
            IncidentStatus::Open
        );

        // Sixteen minutes in: swept.
        manager.auto_resolve_stale_at(t0 + chrono::Duration::minutes(16));
        let swept = manager.incident(&incident.incident_id).unwrap();
        assert_eq!(swept.status, IncidentStatus::Resolved);
        assert_eq!(swept.root_cause.as_deref(), Some(AUTO_RESOLVE_REASON));
        assert_eq!(manager.stats().currently_open, 0);
    }

    #[test]
    fn description_collects_context() {
        let manager = IncidentManager::new(IncidentPolicy::default());
        let mut event = EventBuilder::detached("database.slow")
            .message("replication lag climbing")
            .entity("db", "orders")
            .metric("lag_s", 42.0)
            .build();
        event.anomaly_score = 0.8;

        let incident = manager
            .evaluate_event(&event, &[correlation_of(vec![1, 2])], &["cascading_failure".into()])
            .expect("created");

        for needle in [
            "Incident created from event: database.slow",
            "Anomaly score: 0.8",
            "  - cascading_failure",
            "Correlated events: 1",
            "Message: replication lag climbing",
            "  db: orders",
            "  lag_s: 42",
        ] {
            assert!(
                incident.description.contains(needle),
                "missing {needle:?} in {}",
                incident.description
            );
        }
    }
}
