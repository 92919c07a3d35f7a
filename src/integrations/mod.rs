//! Outbound incident integrations.
//!
//! Every adapter is fire-and-forget: a call either returns a short opaque
//! external id or a sentinel (`<NAME>-DISABLED`, `<NAME>-ERROR`), never an
//! error. HTTP exchanges run on the worker thread that created the incident
//! with bounded timeouts and no retries, so a slow sink degrades throughput
//! but never blocks producers.

pub mod jira;
pub mod pagerduty;
pub mod slack;

use std::time::Duration;

use parking_lot::Mutex;

use crate::incident::Incident;

pub use jira::JiraIntegration;
pub use pagerduty::PagerDutyIntegration;
pub use slack::SlackIntegration;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// An outbound adapter mirroring incidents into an external system.
pub trait IncidentIntegration: Send + Sync {
    /// Create the incident externally; returns an opaque external id.
    fn create_incident(&self, incident: &Incident) -> String;

    /// Push updated incident state for a previously returned external id.
    fn update_incident(&self, external_id: &str, incident: &Incident);

    /// Mark the external incident resolved.
    fn resolve_incident(&self, external_id: &str, resolution: &str);

    fn name(&self) -> &'static str;
}

/// Shared blocking client with the integration timeout policy.
pub(crate) fn http_client() -> reqwest::blocking::Client {
    reqwest::blocking::Client::builder()
        .connect_timeout(CONNECT_TIMEOUT)
        .timeout(REQUEST_TIMEOUT)
        .build()
        .unwrap_or_else(|_| reqwest::blocking::Client::new())
}

/// What an [`InMemoryIntegration`] recorded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordedCall {
    Created { incident_id: String },
    Updated { external_id: String },
    Resolved { external_id: String, resolution: String },
}

/// In-process integration recording every call, a peer of the HTTP adapters
/// for tests and demos.
pub struct InMemoryIntegration {
    calls: Mutex<Vec<RecordedCall>>,
}

impl InMemoryIntegration {
    pub fn new() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().clone()
    }

    pub fn created(&self) -> Vec<String> {
        self.calls
            .lock()
            .iter()
            .filter_map(|call| match call {
                RecordedCall::Created { incident_id } => Some(incident_id.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn resolved(&self) -> Vec<String> {
        self.calls
            .lock()
            .iter()
            .filter_map(|call| match call {
                RecordedCall::Resolved { external_id, .. } => Some(external_id.clone()),
                _ => None,
            })
            .collect()
    }
}

impl Default for InMemoryIntegration {
    fn default() -> Self {
        Self::new()
    }
}

impl IncidentIntegration for InMemoryIntegration {
    fn create_incident(&self, incident: &Incident) -> String {
        self.calls.lock().push(RecordedCall::Created {
            incident_id: incident.incident_id.clone(),
        });
        format!("MEM-{}", incident.incident_id)
    }

    fn update_incident(&self, external_id: &str, _incident: &Incident) {
        self.calls.lock().push(RecordedCall::Updated {
            external_id: external_id.to_string(),
        });
    }

    fn resolve_incident(&self, external_id: &str, resolution: &str) {
        self.calls.lock().push(RecordedCall::Resolved {
            external_id: external_id.to_string(),
            resolution: resolution.to_string(),
        });
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}
