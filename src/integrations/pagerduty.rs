//! PagerDuty adapter: triggers and resolves alerts through the Events API v2.

use serde_json::json;
use tracing::warn;

use super::{http_client, IncidentIntegration};
use crate::config::PagerDutyConfig;
use crate::incident::{Incident, IncidentSeverity};

const DEFAULT_EVENTS_URL: &str = "https://events.pagerduty.com/v2/enqueue";

fn pd_severity(severity: IncidentSeverity) -> &'static str {
    match severity {
        IncidentSeverity::Critical => "critical",
        IncidentSeverity::High => "error",
        IncidentSeverity::Medium => "warning",
        IncidentSeverity::Low => "info",
    }
}

pub struct PagerDutyIntegration {
    config: PagerDutyConfig,
    client: reqwest::blocking::Client,
}

impl PagerDutyIntegration {
    pub fn new(config: PagerDutyConfig) -> Self {
        Self {
            config,
            client: http_client(),
        }
    }

    fn enabled(&self) -> bool {
        !self.config.integration_key.is_empty()
    }

    fn events_url(&self) -> &str {
        if self.config.events_url.is_empty() {
            DEFAULT_EVENTS_URL
        } else {
            &self.config.events_url
        }
    }

    fn send_event(&self, payload: serde_json::Value) -> Option<serde_json::Value> {
        match self.client.post(self.events_url()).json(&payload).send() {
            Ok(resp) if resp.status().is_success() => resp.json().ok(),
            Ok(resp) => {
                warn!(status = %resp.status(), "PagerDuty event rejected");
                None
            }
            Err(err) => {
                warn!(error = %err, "PagerDuty request failed");
                None
            }
        }
    }
}

impl IncidentIntegration for PagerDutyIntegration {
    fn create_incident(&self, incident: &Incident) -> String {
        if !self.enabled() {
            return "PD-DISABLED".to_string();
        }

        let payload = json!({
            "routing_key": self.config.integration_key,
            "event_action": "trigger",
            "dedup_key": incident.incident_id,
            "payload": {
                "summary": incident.title,
                "severity": pd_severity(incident.severity),
                "source": "pulsewatch",
                "custom_details": {
                    "incident_id": incident.incident_id,
                    "anomaly_score": incident.anomaly_score,
                    "event_count": incident.event_ids.len(),
                }
            }
        });

        match self.send_event(payload) {
            Some(body) => body
                .get("dedup_key")
                .and_then(|key| key.as_str())
                .map(str::to_string)
                .unwrap_or_else(|| format!("PD-{}", incident.incident_id)),
            None => "PD-ERROR".to_string(),
        }
    }

    fn update_incident(&self, external_id: &str, incident: &Incident) {
        if !self.enabled() || external_id == "PD-DISABLED" || external_id == "PD-ERROR" {
            return;
        }

        // Re-triggering with the same dedup key updates the open alert.
        let payload = json!({
            "routing_key": self.config.integration_key,
            "event_action": "trigger",
            "dedup_key": external_id,
            "payload": {
                "summary": incident.summary(),
                "severity": pd_severity(incident.severity),
                "source": "pulsewatch",
            }
        });
        self.send_event(payload);
    }

    fn resolve_incident(&self, external_id: &str, _resolution: &str) {
        if !self.enabled() || external_id == "PD-DISABLED" || external_id == "PD-ERROR" {
            return;
        }

        let payload = json!({
            "routing_key": self.config.integration_key,
            "event_action": "resolve",
            "dedup_key": external_id,
        });
        self.send_event(payload);
    }

    fn name(&self) -> &'static str {
        "PagerDuty"
    }
}
