//! Process-wide pipeline instance with a one-shot `init`/`shutdown`
//! lifecycle.
//!
//! Producers that emit before `init` fall back to a stderr text mirror
//! rather than failing; a second `init` warns and keeps the first instance.

use parking_lot::RwLock;

use super::{EventCallback, Pipeline, StatsSnapshot};
use crate::config::Config;
use crate::event::{Event, EventBuilder};

static PIPELINE: RwLock<Option<Pipeline>> = RwLock::new(None);

/// Initialize the global pipeline. A second call warns and is ignored.
pub fn init(config: Config) {
    let mut guard = PIPELINE.write();
    if guard.is_some() {
        tracing::warn!("pipeline already initialized, ignoring repeated init");
        return;
    }
    *guard = Some(Pipeline::new(config));
}

/// One-call setup: service name plus all analysis stages on or off.
pub fn quick_init(service_name: impl Into<String>, enable_analysis: bool) {
    let mut config = Config::default();
    config.service_name = service_name.into();
    config.enable_anomaly_detection = enable_analysis;
    config.enable_pattern_matching = enable_analysis;
    config.enable_correlation = enable_analysis;
    init(config);
}

/// Shut the global pipeline down, draining the queue and joining workers.
/// Safe to call when never initialized.
pub fn shutdown() {
    let pipeline = PIPELINE.write().take();
    if let Some(pipeline) = pipeline {
        pipeline.shutdown();
    }
}

pub fn is_initialized() -> bool {
    PIPELINE.read().is_some()
}

/// A clone of the global pipeline handle, if initialized.
pub fn instance() -> Option<Pipeline> {
    PIPELINE.read().clone()
}

/// Builder for an event of the given type.
pub fn event(event_type: impl Into<String>) -> EventBuilder {
    match &*PIPELINE.read() {
        Some(pipeline) => pipeline.event(event_type),
        None => EventBuilder::detached(event_type),
    }
}

/// Builder for a metric observation.
pub fn observe(metric_name: impl Into<String>) -> EventBuilder {
    match &*PIPELINE.read() {
        Some(pipeline) => pipeline.observe(metric_name),
        None => {
            let metric_name: String = metric_name.into();
            EventBuilder::detached("metric.observed").context("metric_name", metric_name)
        }
    }
}

/// Route an already-built event. Used by detached builders; before `init`
/// the event goes to the stderr mirror.
pub(crate) fn emit(event: Event) {
    match &*PIPELINE.read() {
        Some(pipeline) => pipeline.emit(event),
        None => eprintln!("{}", event.format_line()),
    }
}

pub fn trace(message: impl Into<String>) {
    log_message(|p, m| p.trace(m), crate::Severity::Trace, message);
}

pub fn debug(message: impl Into<String>) {
    log_message(|p, m| p.debug(m), crate::Severity::Debug, message);
}

pub fn info(message: impl Into<String>) {
    log_message(|p, m| p.info(m), crate::Severity::Info, message);
}

pub fn warn(message: impl Into<String>) {
    log_message(|p, m| p.warn(m), crate::Severity::Warning, message);
}

pub fn error(message: impl Into<String>) {
    log_message(|p, m| p.error(m), crate::Severity::Error, message);
}

pub fn critical(message: impl Into<String>) {
    log_message(|p, m| p.critical(m), crate::Severity::Critical, message);
}

fn log_message(
    deliver: impl Fn(&Pipeline, String),
    severity: crate::Severity,
    message: impl Into<String>,
) {
    let message = message.into();
    match &*PIPELINE.read() {
        Some(pipeline) => deliver(pipeline, message),
        None => {
            let event = EventBuilder::detached("log.message")
                .severity(severity)
                .message(message)
                .build();
            eprintln!("{}", event.format_line());
        }
    }
}

/// Register a callback for every processed event. Ignored (with a warning)
/// before `init`.
pub fn on_event(callback: EventCallback) {
    match &*PIPELINE.read() {
        Some(pipeline) => pipeline.on_event(callback),
        None => tracing::warn!("on_event called before init, callback dropped"),
    }
}

/// Register a callback for every anomalous processed event.
pub fn on_anomaly(callback: EventCallback) {
    match &*PIPELINE.read() {
        Some(pipeline) => pipeline.on_anomaly(callback),
        None => tracing::warn!("on_anomaly called before init, callback dropped"),
    }
}

/// Statistics snapshot, if initialized.
pub fn stats() -> Option<StatsSnapshot> {
    PIPELINE.read().as_ref().map(Pipeline::stats)
}
