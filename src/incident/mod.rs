//! Incidents: severity-rated records aggregating contributing events, with
//! lifecycle management and external dispatch.

pub mod manager;

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;

pub use manager::{IncidentManager, IncidentPolicy, IncidentStats};

/// Incident severity, ordered from least to most urgent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum IncidentSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl IncidentSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            IncidentSeverity::Low => "LOW",
            IncidentSeverity::Medium => "MEDIUM",
            IncidentSeverity::High => "HIGH",
            IncidentSeverity::Critical => "CRITICAL",
        }
    }
}

impl fmt::Display for IncidentSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where an incident is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum IncidentStatus {
    Open,
    Investigating,
    Identified,
    Monitoring,
    Resolved,
    Closed,
}

impl IncidentStatus {
    /// Open and Investigating incidents are "active" for deduplication and
    /// the auto-resolve sweep.
    pub fn is_active(&self) -> bool {
        matches!(self, IncidentStatus::Open | IncidentStatus::Investigating)
    }
}

/// A tracked incident.
#[derive(Debug, Clone, Serialize)]
pub struct Incident {
    /// Process-unique id of the form `INC-NNNNNN`.
    pub incident_id: String,
    pub title: String,
    pub description: String,
    pub severity: IncidentSeverity,
    pub status: IncidentStatus,

    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<DateTime<Utc>>,

    /// Contributing event ids, the triggering event first.
    pub event_ids: Vec<u64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub root_cause: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub root_cause_event_id: Option<u64>,

    pub anomaly_score: f64,
    pub affected_services: usize,

    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,

    /// External ids keyed by integration name, recorded at dispatch time.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub external_ids: BTreeMap<String, String>,
}

impl Incident {
    /// Short single-line form for logs and notifications.
    pub fn summary(&self) -> String {
        format!(
            "[{}] {} (ID: {}, Score: {})",
            self.severity, self.title, self.incident_id, self.anomaly_score
        )
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }
}

/// Callback invoked on incident lifecycle transitions.
pub type IncidentCallback = Box<dyn Fn(&Incident) + Send + Sync>;
