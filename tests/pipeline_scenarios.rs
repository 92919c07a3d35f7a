//! End-to-end pipeline scenarios: emit real events through worker threads
//! and assert on detection, correlation, incidents, and lifecycle.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use pulsewatch::correlate::CorrelationStrategy;
use pulsewatch::incident::{IncidentSeverity, IncidentStatus};
use pulsewatch::{Config, Event, Pipeline, Severity};

/// Route pipeline diagnostics through a subscriber; repeated calls are
/// no-ops, so every test can ask for it.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}

fn test_config() -> Config {
    init_tracing();
    let mut config = Config::default();
    config.log_to_console = false;
    config.worker_threads = 1;
    config.enable_auto_incidents = true;
    config
}

/// Collects every processed event in arrival order.
fn capture_events(pipeline: &Pipeline) -> Arc<Mutex<Vec<Event>>> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    pipeline.on_event(Box::new(move |event| {
        sink.lock().push(event.clone());
    }));
    seen
}

#[test]
fn cascading_failure_is_detected_and_escalated() {
    let pipeline = Pipeline::new(test_config());
    let seen = capture_events(&pipeline);

    pipeline
        .event("database.slow")
        .trace_id("T1")
        .entity("db", "orders")
        .severity(Severity::Warning)
        .emit();
    pipeline.event("api.timeout").trace_id("T1").emit();
    pipeline
        .event("user.error")
        .trace_id("T1")
        .severity(Severity::Error)
        .emit();
    pipeline.shutdown();

    let events = seen.lock();
    assert_eq!(events.len(), 3);
    assert!(events.iter().all(|e| (0.0..=1.0).contains(&e.anomaly_score)));

    // The chain completes on the third event.
    let stats = pipeline.stats();
    assert_eq!(stats.events_total, 3);
    assert_eq!(stats.patterns_matched, 1);
    let cascade = pipeline
        .pattern_engine()
        .unwrap()
        .matchers()
        .into_iter()
        .find(|m| m.name() == "cascading_failure")
        .unwrap();
    assert!(cascade.description().contains("matched 1 times"));

    // Trace correlation on event 2; trace + temporal on event 3.
    assert_eq!(stats.correlations_found, 3);
    let engine = pipeline.correlation_engine().unwrap();
    let final_event = &events[2];
    let correlations = engine.correlator().correlations_for_event(final_event.event_id);
    let trace_group = correlations
        .iter()
        .find(|c| c.strategy == CorrelationStrategy::TraceId)
        .expect("trace group");
    assert_eq!(trace_group.confidence, 1.0);
    assert_eq!(trace_group.event_ids.len(), 3);

    // Exactly one incident, opened by the pattern rule. With one matched
    // pattern, no anomaly score, and two correlations, the top-down severity
    // rules bottom out at LOW.
    assert_eq!(stats.incidents_created, 1);
    let manager = pipeline.incident_manager().unwrap();
    let incidents = manager.all_incidents();
    assert_eq!(incidents.len(), 1);
    let incident = &incidents[0];
    assert_eq!(incident.title, "Pattern detected: cascading_failure");
    assert_eq!(incident.severity, IncidentSeverity::Low);
    assert_eq!(incident.event_ids.len(), 3);
    assert_eq!(incident.event_ids[0], final_event.event_id);
    assert!(incident.tags.contains(&"pattern:cascading_failure".to_string()));

    // The selected root cause is the earliest event of the group.
    let root = engine
        .root_cause()
        .find_root_cause(trace_group)
        .expect("root cause");
    assert_eq!(root.root_event_id, events[0].event_id);
    for member in root.affected_event_ids.iter() {
        let event = events.iter().find(|e| e.event_id == *member).unwrap();
        assert!(events[0].timestamp <= event.timestamp);
    }
    // The canon database.slow -> api.timeout relationship backs the verdict.
    assert!(root.evidence.iter().any(|e| e.kind == "causal"));
}

#[test]
fn auth_burst_creates_one_incident_then_deduplicates() {
    let pipeline = Pipeline::new(test_config());

    for _ in 0..6 {
        pipeline
            .event("auth.failed")
            .entity("ip", "10.0.0.1")
            .emit();
    }
    pipeline.shutdown();

    // The repeated-entity matcher fires on the fifth failure and again on
    // the sixth; the second incident collapses into the first.
    let stats = pipeline.stats();
    assert_eq!(stats.patterns_matched, 2);
    assert_eq!(stats.incidents_created, 1);

    let manager = pipeline.incident_manager().unwrap();
    let incidents = manager.all_incidents();
    assert_eq!(incidents.len(), 1);
    assert_eq!(incidents[0].title, "Pattern detected: auth_failure_burst");

    let incident_stats = manager.stats();
    assert_eq!(incident_stats.total_created, 1);
    assert_eq!(incident_stats.deduplicated, 1);
    assert_eq!(incident_stats.currently_open, 1);
}

#[test]
fn latency_spike_scores_anomalous_and_opens_critical_incident() {
    let pipeline = Pipeline::new(test_config());

    let anomaly_count = Arc::new(AtomicUsize::new(0));
    let counter = anomaly_count.clone();
    pipeline.on_anomaly(Box::new(move |event| {
        assert!(event.is_anomalous());
        counter.fetch_add(1, Ordering::SeqCst);
    }));

    // Forty unremarkable latency samples between 50 and 95 ms.
    for i in 0..40 {
        pipeline
            .event("api.latency")
            .metric("latency_ms", 50.0 + (i % 10) as f64 * 5.0)
            .emit();
    }
    pipeline.event("api.latency").metric("latency_ms", 500.0).emit();
    pipeline.shutdown();

    let stats = pipeline.stats();
    assert_eq!(stats.events_total, 41);
    assert_eq!(stats.anomalies_detected, 1);
    assert_eq!(anomaly_count.load(Ordering::SeqCst), 1);

    let manager = pipeline.incident_manager().unwrap();
    let incidents = manager.all_incidents();
    assert_eq!(incidents.len(), 1);
    let incident = &incidents[0];
    assert_eq!(incident.title, "Anomaly in api.latency");
    assert_eq!(incident.severity, IncidentSeverity::Critical);
    assert!(incident.anomaly_score >= 0.9);
    assert!(incident.tags.contains(&"critical-anomaly".to_string()));
}

#[test]
fn queue_overflow_drops_beyond_capacity() {
    let mut config = test_config();
    config.async_queue_size = 4;
    config.worker_threads = 0;
    let pipeline = Pipeline::new(config);

    for _ in 0..10 {
        pipeline.event("load.spike").emit();
    }

    let stats = pipeline.stats();
    assert_eq!(stats.events_total, 4);
    assert_eq!(stats.events_dropped, 6);
    pipeline.shutdown();
}

#[test]
fn unrelated_events_form_only_a_temporal_group() {
    let pipeline = Pipeline::new(test_config());
    let seen = capture_events(&pipeline);

    pipeline.event("disk.pressure").emit();
    pipeline.event("cache.evicted").emit();
    pipeline.event("queue.lag").emit();
    pipeline.shutdown();

    let stats = pipeline.stats();
    assert_eq!(stats.correlations_found, 1);
    assert_eq!(stats.incidents_created, 0);

    let events = seen.lock();
    let correlations = pipeline
        .correlation_engine()
        .unwrap()
        .correlator()
        .correlations_for_event(events[2].event_id);
    assert_eq!(correlations.len(), 1);
    assert_eq!(correlations[0].strategy, CorrelationStrategy::Temporal);
    assert_eq!(correlations[0].confidence, 0.4);
}

#[test]
fn stale_incident_is_swept_with_resolution_callbacks() {
    let pipeline = Pipeline::new(test_config());
    let manager = pipeline.incident_manager().unwrap().clone();

    let resolved_count = Arc::new(AtomicUsize::new(0));
    let counter = resolved_count.clone();
    manager.on_resolved(Box::new(move |incident| {
        assert_eq!(incident.status, IncidentStatus::Resolved);
        counter.fetch_add(1, Ordering::SeqCst);
    }));

    let incident = manager.create_incident(
        "Anomaly in api.latency",
        "latency spike",
        IncidentSeverity::High,
        vec![1, 2],
    );
    assert_eq!(manager.stats().currently_open, 1);

    // Sixteen minutes later the sweep resolves it.
    manager.auto_resolve_stale_at(Utc::now() + chrono::Duration::minutes(16));

    let swept = manager.incident(&incident.incident_id).unwrap();
    assert_eq!(swept.status, IncidentStatus::Resolved);
    assert_eq!(
        swept.root_cause.as_deref(),
        Some("Auto-resolved: no further activity")
    );
    assert!(swept.resolved_at.is_some());
    assert_eq!(manager.stats().currently_open, 0);
    assert_eq!(manager.stats().resolved, 1);
    assert_eq!(resolved_count.load(Ordering::SeqCst), 1);

    pipeline.shutdown();
}

#[test]
fn every_admitted_event_is_delivered_exactly_once() {
    let mut config = test_config();
    config.worker_threads = 2;
    let pipeline = Pipeline::new(config);

    let delivered = Arc::new(AtomicUsize::new(0));
    let counter = delivered.clone();
    pipeline.on_event(Box::new(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    }));

    for i in 0..200 {
        pipeline
            .event("api.call")
            .entity("request", format!("r-{i}"))
            .emit();
    }
    pipeline.shutdown();

    let stats = pipeline.stats();
    assert_eq!(stats.events_total + stats.events_dropped, 200);
    assert_eq!(delivered.load(Ordering::SeqCst) as u64, stats.events_total);
}

#[test]
fn single_producer_order_is_preserved_through_one_worker() {
    let mut config = test_config();
    config.enable_auto_incidents = false;
    let pipeline = Pipeline::new(config);
    let seen = capture_events(&pipeline);

    for i in 0..50 {
        pipeline.event("ordered.step").metric("seq", i as f64).emit();
    }
    pipeline.shutdown();

    let events = seen.lock();
    assert_eq!(events.len(), 50);
    let sequence: Vec<f64> = events.iter().map(|e| e.metrics["seq"]).collect();
    let mut sorted = sequence.clone();
    sorted.sort_by(f64::total_cmp);
    assert_eq!(sequence, sorted);

    // Event ids are unique and strictly increasing in emit order.
    let ids: Vec<u64> = events.iter().map(|e| e.event_id).collect();
    assert!(ids.windows(2).all(|pair| pair[0] < pair[1]));
}
