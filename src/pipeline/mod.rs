//! Pipeline controller: lifecycle, sampling, worker threads, processing
//! stages, callbacks, and statistics.

pub mod global;
pub mod history;
pub mod queue;
pub mod sink;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use parking_lot::Mutex;
use serde::Serialize;
use tracing::{error, info};

use crate::config::Config;
use crate::correlate::CorrelationEngine;
use crate::detect::{self, AnomalyDetector};
use crate::event::{Event, EventBuilder, Severity};
use crate::incident::{IncidentManager, IncidentPolicy};
use crate::integrations::{JiraIntegration, PagerDutyIntegration, SlackIntegration};
use crate::pattern::PatternEngine;
use crate::PipelineError;

pub use history::HistoryRing;
pub use queue::EventQueue;
pub use sink::TextMirror;

/// Callback invoked synchronously on a worker thread for each processed
/// event (or each anomalous one).
pub type EventCallback = Box<dyn Fn(&Event) + Send + Sync>;

/// Counter snapshot of pipeline activity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub events_total: u64,
    pub events_dropped: u64,
    pub anomalies_detected: u64,
    pub patterns_matched: u64,
    pub correlations_found: u64,
    pub incidents_created: u64,
}

#[derive(Default)]
struct Stats {
    events_total: AtomicU64,
    events_dropped: AtomicU64,
    anomalies_detected: AtomicU64,
    patterns_matched: AtomicU64,
    correlations_found: AtomicU64,
    incidents_created: AtomicU64,
}

impl Stats {
    fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            events_total: self.events_total.load(Ordering::Relaxed),
            events_dropped: self.events_dropped.load(Ordering::Relaxed),
            anomalies_detected: self.anomalies_detected.load(Ordering::Relaxed),
            patterns_matched: self.patterns_matched.load(Ordering::Relaxed),
            correlations_found: self.correlations_found.load(Ordering::Relaxed),
            incidents_created: self.incidents_created.load(Ordering::Relaxed),
        }
    }
}

struct Inner {
    config: Config,
    queue: EventQueue,
    history: HistoryRing,
    detector: Option<Arc<dyn AnomalyDetector>>,
    patterns: Option<Arc<PatternEngine>>,
    correlation: Option<Arc<CorrelationEngine>>,
    incidents: Option<Arc<IncidentManager>>,
    mirror: TextMirror,
    stats: Stats,
    event_callbacks: Mutex<Vec<EventCallback>>,
    anomaly_callbacks: Mutex<Vec<EventCallback>>,
}

/// An event-processing pipeline instance.
///
/// Cheap to clone; clones share the same queue, engines, and workers. Call
/// [`shutdown`](Pipeline::shutdown) (or [`global::shutdown`]) to drain the
/// queue and join the workers; a pipeline that is merely dropped leaves its
/// workers parked until process exit.
#[derive(Clone)]
pub struct Pipeline {
    inner: Arc<Inner>,
    workers: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl Pipeline {
    /// Build the configured engines and start the worker pool.
    pub fn new(config: Config) -> Self {
        let config = config.sanitized();

        let detector = config
            .enable_anomaly_detection
            .then(detect::default_detector);

        let patterns = config.enable_pattern_matching.then(|| {
            let engine = PatternEngine::new();
            engine.register_builtins();
            Arc::new(engine)
        });

        let correlation = config.enable_correlation.then(|| {
            let engine = CorrelationEngine::new();
            engine.register_builtin_relationships();
            Arc::new(engine)
        });

        let incidents = config
            .enable_auto_incidents
            .then(|| Arc::new(Self::build_incident_manager(&config)));

        let inner = Arc::new(Inner {
            queue: EventQueue::new(config.async_queue_size),
            history: HistoryRing::new(history::DEFAULT_CAPACITY),
            detector,
            patterns,
            correlation,
            incidents,
            mirror: TextMirror::new(config.log_to_console, &config.log_file_path),
            stats: Stats::default(),
            event_callbacks: Mutex::new(Vec::new()),
            anomaly_callbacks: Mutex::new(Vec::new()),
            config,
        });

        let mut workers = Vec::new();
        for i in 0..inner.config.worker_threads {
            let worker_inner = Arc::clone(&inner);
            let spawned = std::thread::Builder::new()
                .name(format!("pulsewatch-worker-{i}"))
                .spawn(move || {
                    while let Some(event) = worker_inner.queue.pop() {
                        worker_inner.process_event(event);
                    }
                });
            match spawned {
                Ok(handle) => workers.push(handle),
                Err(err) => error!(error = %err, "failed to spawn worker thread"),
            }
        }

        info!(
            service = %inner.config.service_name,
            workers = inner.config.worker_threads,
            queue = inner.config.async_queue_size,
            anomaly = inner.detector.is_some(),
            patterns = inner.patterns.is_some(),
            correlation = inner.correlation.is_some(),
            incidents = inner.incidents.is_some(),
            "pipeline started"
        );

        Self {
            inner,
            workers: Arc::new(Mutex::new(workers)),
        }
    }

    fn build_incident_manager(config: &Config) -> IncidentManager {
        let policy = IncidentPolicy {
            anomaly_threshold: config.incident_anomaly_threshold,
            pattern_threshold: config.incident_pattern_threshold,
            correlation_threshold: config.incident_correlation_threshold,
            critical_threshold: config.critical_threshold,
            high_threshold: config.high_threshold,
            medium_threshold: config.medium_threshold,
            deduplication_window: chrono::Duration::seconds(
                config.deduplication_window_secs as i64,
            ),
            resolution_timeout: chrono::Duration::seconds(config.resolution_timeout_secs as i64),
            ..IncidentPolicy::default()
        };
        let manager = IncidentManager::new(policy);

        let integrations = &config.integrations;
        if integrations.jira.enabled && !integrations.jira.url.is_empty() {
            manager.register_integration(Arc::new(JiraIntegration::new(integrations.jira.clone())));
            info!(url = %integrations.jira.url, "Jira integration enabled");
        }
        if integrations.pagerduty.enabled && !integrations.pagerduty.integration_key.is_empty() {
            manager.register_integration(Arc::new(PagerDutyIntegration::new(
                integrations.pagerduty.clone(),
            )));
            info!("PagerDuty integration enabled");
        }
        if integrations.slack.enabled && !integrations.slack.webhook_url.is_empty() {
            manager
                .register_integration(Arc::new(SlackIntegration::new(integrations.slack.clone())));
            info!("Slack integration enabled");
        }

        manager
    }

    /// Builder for an event of the given type, bound to this pipeline.
    pub fn event(&self, event_type: impl Into<String>) -> EventBuilder {
        EventBuilder::bound(self.clone(), event_type)
    }

    /// Builder for a metric observation (`metric.observed`).
    pub fn observe(&self, metric_name: impl Into<String>) -> EventBuilder {
        let metric_name: String = metric_name.into();
        self.event("metric.observed").context("metric_name", metric_name)
    }

    /// Stamp configured service identity, sample, and enqueue. Never fails:
    /// a full queue counts a drop, a closed queue discards silently.
    pub fn emit(&self, mut event: Event) {
        let config = &self.inner.config;
        if event.service_name.is_none() && !config.service_name.is_empty() {
            event.service_name = Some(config.service_name.clone());
        }
        if event.service_instance.is_none() && !config.service_instance.is_empty() {
            event.service_instance = Some(config.service_instance.clone());
        }
        if !config.environment.is_empty() {
            event
                .context
                .entry("environment".to_string())
                .or_insert_with(|| config.environment.clone());
        }

        if !self.inner.should_sample(&event) {
            return;
        }

        match self.inner.queue.push(event) {
            Ok(()) => {
                self.inner.stats.events_total.fetch_add(1, Ordering::Relaxed);
            }
            Err(PipelineError::QueueFull) => {
                self.inner.stats.events_dropped.fetch_add(1, Ordering::Relaxed);
            }
            Err(_) => {
                // Closed during shutdown: discarded, uncounted.
            }
        }
    }

    pub fn trace(&self, message: impl Into<String>) {
        self.log_message(Severity::Trace, message, false);
    }

    pub fn debug(&self, message: impl Into<String>) {
        self.log_message(Severity::Debug, message, false);
    }

    pub fn info(&self, message: impl Into<String>) {
        self.log_message(Severity::Info, message, false);
    }

    pub fn warn(&self, message: impl Into<String>) {
        self.log_message(Severity::Warning, message, false);
    }

    pub fn error(&self, message: impl Into<String>) {
        self.log_message(Severity::Error, message, false);
    }

    /// Critical messages also capture the call stack.
    pub fn critical(&self, message: impl Into<String>) {
        self.log_message(Severity::Critical, message, true);
    }

    fn log_message(&self, severity: Severity, message: impl Into<String>, with_stack: bool) {
        let mut builder = self
            .event("log.message")
            .severity(severity)
            .message(message);
        if with_stack {
            builder = builder.capture_stack_trace();
        }
        builder.emit();
    }

    /// Register a callback invoked for every processed event.
    pub fn on_event(&self, callback: EventCallback) {
        self.inner.event_callbacks.lock().push(callback);
    }

    /// Register a callback invoked for every anomalous processed event.
    pub fn on_anomaly(&self, callback: EventCallback) {
        self.inner.anomaly_callbacks.lock().push(callback);
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.inner.stats.snapshot()
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// Advanced access to the pattern engine, when enabled.
    pub fn pattern_engine(&self) -> Option<&Arc<PatternEngine>> {
        self.inner.patterns.as_ref()
    }

    /// Advanced access to the correlation engine, when enabled.
    pub fn correlation_engine(&self) -> Option<&Arc<CorrelationEngine>> {
        self.inner.correlation.as_ref()
    }

    /// Advanced access to the incident manager, when enabled.
    pub fn incident_manager(&self) -> Option<&Arc<IncidentManager>> {
        self.inner.incidents.as_ref()
    }

    /// Close the queue, drain it through the workers, and join them.
    /// Events emitted after shutdown are silently discarded.
    pub fn shutdown(&self) {
        self.inner.queue.close();

        let handles: Vec<JoinHandle<()>> = self.workers.lock().drain(..).collect();
        for handle in handles {
            let _ = handle.join();
        }

        self.inner.mirror.flush();
        let stats = self.stats();
        info!(
            events = stats.events_total,
            anomalies = stats.anomalies_detected,
            dropped = stats.events_dropped,
            incidents = stats.incidents_created,
            "pipeline shut down"
        );
    }
}

impl Inner {
    fn should_sample(&self, event: &Event) -> bool {
        if self.config.sample_anomalies_always
            && (event.is_anomalous() || event.severity >= Severity::Error)
        {
            return true;
        }
        if self.config.sampling_rate >= 1.0 {
            return true;
        }
        rand::random::<f64>() < self.config.sampling_rate
    }

    /// The four processing stages, run on a worker thread.
    fn process_event(&self, mut event: Event) {
        // Stage 1: anomaly scoring. Score against prior state, then train.
        if let Some(detector) = &self.detector {
            if !event.metrics.is_empty() {
                let score = detector.score(&event).clamp(0.0, 1.0);
                event.anomaly_score = score;
                detector.train(&event);
                if event.is_anomalous() {
                    self.stats.anomalies_detected.fetch_add(1, Ordering::Relaxed);
                }
            }
        }

        // Stages 2 and 3 observe history strictly older than this event.
        let history = self.history.snapshot();

        // Stage 2: pattern matching.
        let mut matched_patterns = Vec::new();
        if let Some(engine) = &self.patterns {
            let matches = engine.match_event(&event, &history);
            if !matches.is_empty() {
                self.stats
                    .patterns_matched
                    .fetch_add(matches.len() as u64, Ordering::Relaxed);
            }
            matched_patterns = matches.into_iter().map(|m| m.name).collect();
            engine.train_all(&event);
        }

        // Stage 3: correlation and causality learning.
        let mut correlations = Vec::new();
        if let Some(engine) = &self.correlation {
            correlations = engine.process(&event, &history);
            if !correlations.is_empty() {
                self.stats
                    .correlations_found
                    .fetch_add(correlations.len() as u64, Ordering::Relaxed);
            }
        }

        // The ring gains this event after stages 1-3 and before incident
        // evaluation.
        self.history.push(Arc::new(event.clone()));

        // Stage 4: incident evaluation and dispatch.
        if let Some(manager) = &self.incidents {
            if let Some(incident) = manager.evaluate_event(&event, &correlations, &matched_patterns)
            {
                self.stats.incidents_created.fetch_add(1, Ordering::Relaxed);
                event.incident_id = Some(incident.incident_id);
            }
        }

        self.mirror.write(&event, &matched_patterns);

        for callback in self.event_callbacks.lock().iter() {
            callback(&event);
        }
        if event.is_anomalous() {
            for callback in self.anomaly_callbacks.lock().iter() {
                callback(&event);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn quiet_config() -> Config {
        let mut config = Config::default();
        config.log_to_console = false;
        config
    }

    #[test]
    fn emit_stamps_service_identity_from_config() {
        let mut config = quiet_config();
        config.service_name = "checkout".to_string();
        config.service_instance = "c-1".to_string();
        config.environment = "staging".to_string();
        config.worker_threads = 1;
        let pipeline = Pipeline::new(config);

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        pipeline.on_event(Box::new(move |event| {
            sink.lock().push(event.clone());
        }));

        pipeline.event("order.placed").emit();
        // An explicit service name wins over the configured one.
        pipeline
            .event("order.shipped")
            .service_name("fulfillment")
            .emit();
        pipeline.shutdown();

        let events = seen.lock();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].service_name.as_deref(), Some("checkout"));
        assert_eq!(events[0].service_instance.as_deref(), Some("c-1"));
        assert_eq!(
            events[0].context.get("environment").map(String::as_str),
            Some("staging")
        );
        assert_eq!(events[1].service_name.as_deref(), Some("fulfillment"));
    }

    #[test]
    fn queue_overflow_counts_drops() {
        let mut config = quiet_config();
        config.async_queue_size = 4;
        config.worker_threads = 0;
        let pipeline = Pipeline::new(config);

        for _ in 0..10 {
            pipeline.event("load.test").emit();
        }

        let stats = pipeline.stats();
        assert_eq!(stats.events_total, 4);
        assert_eq!(stats.events_dropped, 6);
        pipeline.shutdown();
    }

    #[test]
    fn emit_after_shutdown_is_silently_discarded() {
        let mut config = quiet_config();
        config.worker_threads = 1;
        let pipeline = Pipeline::new(config);
        pipeline.event("before").emit();
        pipeline.shutdown();

        pipeline.event("after").emit();
        let stats = pipeline.stats();
        assert_eq!(stats.events_total, 1);
        assert_eq!(stats.events_dropped, 0);
    }

    #[test]
    fn sampling_rate_zero_admits_only_severe_events() {
        let mut config = quiet_config();
        config.sampling_rate = 0.0;
        config.worker_threads = 1;
        let pipeline = Pipeline::new(config);

        let delivered = Arc::new(AtomicUsize::new(0));
        let sink = delivered.clone();
        pipeline.on_event(Box::new(move |_| {
            sink.fetch_add(1, Ordering::SeqCst);
        }));

        for _ in 0..20 {
            pipeline.event("chatty.debug").emit();
        }
        pipeline.event("failed.request").severity(Severity::Error).emit();
        pipeline.shutdown();

        assert_eq!(pipeline.stats().events_total, 1);
        assert_eq!(delivered.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn observe_builds_metric_observation_events() {
        let mut config = quiet_config();
        config.worker_threads = 1;
        let pipeline = Pipeline::new(config);

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        pipeline.on_event(Box::new(move |event| {
            sink.lock().push(event.clone());
        }));

        pipeline.observe("api.latency").metric("latency_ms", 42.0).emit();
        pipeline.shutdown();

        let events = seen.lock();
        assert_eq!(events[0].event_type, "metric.observed");
        assert_eq!(
            events[0].context.get("metric_name").map(String::as_str),
            Some("api.latency")
        );
    }

    #[test]
    fn severity_shorthands_emit_log_messages() {
        let mut config = quiet_config();
        config.worker_threads = 1;
        let pipeline = Pipeline::new(config);

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        pipeline.on_event(Box::new(move |event| {
            sink.lock().push(event.clone());
        }));

        pipeline.warn("disk filling up");
        pipeline.critical("db connection pool exhausted");
        pipeline.shutdown();

        let events = seen.lock();
        assert_eq!(events.len(), 2);
        assert!(events.iter().all(|e| e.event_type == "log.message"));
        let critical = events
            .iter()
            .find(|e| e.severity == Severity::Critical)
            .unwrap();
        assert!(!critical.stack_trace.is_empty());
    }
}
