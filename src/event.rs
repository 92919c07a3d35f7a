//! Structured semantic events and the fluent builder that produces them.
//!
//! An [`Event`] is a value: once emitted, the pipeline mutates only the copy
//! flowing through the processing stages. Identifiers are process-unique and
//! monotonic; timestamps are assigned at construction and never rewritten.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};

use crate::pipeline::{global, Pipeline};
use crate::stacktrace::{self, StackFrame};

/// Events scoring at or above this are considered anomalous.
pub const ANOMALY_THRESHOLD: f64 = 0.7;

/// Severity levels, ordered from least to most severe.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Trace,
    Debug,
    #[default]
    Info,
    Warning,
    Error,
    Critical,
    /// High-priority alert raised by the analysis stages themselves.
    Alert,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Trace => "TRACE",
            Severity::Debug => "DEBUG",
            Severity::Info => "INFO",
            Severity::Warning => "WARNING",
            Severity::Error => "ERROR",
            Severity::Critical => "CRITICAL",
            Severity::Alert => "ALERT",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

static NEXT_EVENT_ID: AtomicU64 = AtomicU64::new(1);

fn next_event_id() -> u64 {
    NEXT_EVENT_ID.fetch_add(1, Ordering::Relaxed)
}

/// A structured log event with semantic entities, numeric metrics, and
/// analysis annotations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub event_id: u64,
    pub event_type: String,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub timestamp: DateTime<Utc>,
    pub severity: Severity,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,

    #[serde(default, rename = "service", skip_serializing_if = "Option::is_none")]
    pub service_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_instance: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub span_id: Option<String>,

    /// Semantic identifiers (`user_id`, `order_id`, `endpoint`, ...).
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub entities: BTreeMap<String, String>,
    /// Numeric measurements; absent keys mean "no signal", never zero.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metrics: BTreeMap<String, f64>,
    /// Non-semantic attributes.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub context: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stack_trace: Vec<StackFrame>,

    /// Stamped by the anomaly stage; always within [0, 1].
    #[serde(default)]
    pub anomaly_score: f64,
    /// Set when incident evaluation opened an incident for this event.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub incident_id: Option<String>,
}

impl Event {
    /// Create an event of the given type, stamping a fresh id and the current
    /// wall-clock time.
    pub fn new(event_type: impl Into<String>) -> Self {
        Self {
            event_id: next_event_id(),
            event_type: event_type.into(),
            timestamp: Utc::now(),
            severity: Severity::Info,
            message: String::new(),
            service_name: None,
            service_instance: None,
            trace_id: None,
            span_id: None,
            entities: BTreeMap::new(),
            metrics: BTreeMap::new(),
            context: BTreeMap::new(),
            tags: Vec::new(),
            stack_trace: Vec::new(),
            anomaly_score: 0.0,
            incident_id: None,
        }
    }

    /// Whether the stamped anomaly score crosses [`ANOMALY_THRESHOLD`].
    pub fn is_anomalous(&self) -> bool {
        self.anomaly_score >= ANOMALY_THRESHOLD
    }

    /// One-line human-readable form, as written to the console/file mirror.
    pub fn format_line(&self) -> String {
        let mut line = format!(
            "{} [{}]",
            self.timestamp
                .with_timezone(&Local)
                .format("%Y-%m-%d %H:%M:%S"),
            self.severity
        );

        if let Some(service) = &self.service_name {
            match &self.service_instance {
                Some(instance) => line.push_str(&format!(" [{service}:{instance}]")),
                None => line.push_str(&format!(" [{service}]")),
            }
        }

        line.push(' ');
        line.push_str(&self.event_type);

        if !self.message.is_empty() {
            line.push_str(" - ");
            line.push_str(&self.message);
        }

        if !self.entities.is_empty() {
            let pairs: Vec<String> = self
                .entities
                .iter()
                .map(|(k, v)| format!("{k}={v}"))
                .collect();
            line.push_str(&format!(" {{{}}}", pairs.join(", ")));
        }

        if !self.metrics.is_empty() {
            let pairs: Vec<String> = self
                .metrics
                .iter()
                .map(|(k, v)| format!("{k}={v}"))
                .collect();
            line.push_str(&format!(" [{}]", pairs.join(", ")));
        }

        if self.is_anomalous() {
            line.push_str(&format!(" ⚠️ ANOMALY({})", self.anomaly_score));
        }

        line
    }

    /// JSON wire form, used by the file mirror and outbound integrations.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }
}

/// Fluent builder for [`Event`]s.
///
/// Obtained from [`Pipeline::event`] or [`global::event`]; finish with
/// [`emit`](EventBuilder::emit) to hand the event to the pipeline, or
/// [`build`](EventBuilder::build) to take the value without emitting.
pub struct EventBuilder {
    event: Event,
    pipeline: Option<Pipeline>,
}

impl EventBuilder {
    /// Builder bound to a specific pipeline instance.
    pub(crate) fn bound(pipeline: Pipeline, event_type: impl Into<String>) -> Self {
        Self {
            event: Event::new(event_type),
            pipeline: Some(pipeline),
        }
    }

    /// Builder not bound to any instance; `emit` goes through the global
    /// pipeline (or the stderr fallback when none is initialized).
    pub fn detached(event_type: impl Into<String>) -> Self {
        Self {
            event: Event::new(event_type),
            pipeline: None,
        }
    }

    pub fn severity(mut self, severity: Severity) -> Self {
        self.event.severity = severity;
        self
    }

    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.event.message = message.into();
        self
    }

    /// Attach a semantic entity. Re-adding a key overwrites.
    pub fn entity(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.event.entities.insert(name.into(), value.into());
        self
    }

    /// Attach a numeric metric. Re-adding a key overwrites.
    pub fn metric(mut self, name: impl Into<String>, value: f64) -> Self {
        self.event.metrics.insert(name.into(), value);
        self
    }

    /// Attach a context attribute. Re-adding a key overwrites.
    pub fn context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.event.context.insert(key.into(), value.into());
        self
    }

    /// Append a tag; insertion order is preserved and duplicates are kept.
    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.event.tags.push(tag.into());
        self
    }

    /// Append several tags at once.
    pub fn tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.event.tags.extend(tags.into_iter().map(Into::into));
        self
    }

    pub fn trace_id(mut self, id: impl Into<String>) -> Self {
        self.event.trace_id = Some(id.into());
        self
    }

    pub fn span_id(mut self, id: impl Into<String>) -> Self {
        self.event.span_id = Some(id.into());
        self
    }

    pub fn service_name(mut self, name: impl Into<String>) -> Self {
        self.event.service_name = Some(name.into());
        self
    }

    pub fn service_instance(mut self, instance: impl Into<String>) -> Self {
        self.event.service_instance = Some(instance.into());
        self
    }

    /// Capture the current call stack onto the event.
    pub fn capture_stack_trace(mut self) -> Self {
        self.event.stack_trace = stacktrace::capture(stacktrace::DEFAULT_MAX_FRAMES);
        self
    }

    /// Pin an explicit construction timestamp (event replay and tests).
    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.event.timestamp = timestamp;
        self
    }

    /// Hand the built event to the pipeline. Never fails; an un-initialized
    /// pipeline falls back to a stderr mirror, a full queue drops and counts.
    pub fn emit(self) {
        match self.pipeline {
            Some(pipeline) => pipeline.emit(self.event),
            None => global::emit(self.event),
        }
    }

    /// Return the built event without emitting it.
    pub fn build(self) -> Event {
        self.event
    }
}
