//! Slack adapter: posts incident notifications through an incoming webhook.
//!
//! Webhooks are one-way, so updates and resolutions are delivered as new
//! messages rather than edits.

use serde_json::json;
use tracing::warn;

use super::{http_client, IncidentIntegration};
use crate::config::SlackConfig;
use crate::incident::{Incident, IncidentSeverity};

fn color(severity: IncidentSeverity) -> &'static str {
    match severity {
        IncidentSeverity::Critical => "#FF0000",
        IncidentSeverity::High => "#FF6600",
        IncidentSeverity::Medium => "#FFCC00",
        IncidentSeverity::Low => "#36A64F",
    }
}

fn emoji(severity: IncidentSeverity) -> &'static str {
    match severity {
        IncidentSeverity::Critical => ":fire:",
        IncidentSeverity::High => ":warning:",
        IncidentSeverity::Medium => ":large_orange_diamond:",
        IncidentSeverity::Low => ":information_source:",
    }
}

pub struct SlackIntegration {
    config: SlackConfig,
    client: reqwest::blocking::Client,
}

impl SlackIntegration {
    pub fn new(config: SlackConfig) -> Self {
        Self {
            config,
            client: http_client(),
        }
    }

    fn enabled(&self) -> bool {
        !self.config.webhook_url.is_empty()
    }

    fn post(&self, payload: serde_json::Value) -> bool {
        match self
            .client
            .post(&self.config.webhook_url)
            .json(&payload)
            .send()
        {
            Ok(resp) if resp.status().is_success() => true,
            Ok(resp) => {
                warn!(status = %resp.status(), "Slack webhook rejected message");
                false
            }
            Err(err) => {
                warn!(error = %err, "Slack webhook request failed");
                false
            }
        }
    }
}

impl IncidentIntegration for SlackIntegration {
    fn create_incident(&self, incident: &Incident) -> String {
        if !self.enabled() {
            return "SLACK-DISABLED".to_string();
        }

        let mut payload = json!({
            "text": format!(
                "{} New Incident: {}",
                emoji(incident.severity),
                incident.title
            ),
            "attachments": [{
                "color": color(incident.severity),
                "fields": [
                    { "title": "Incident ID", "value": incident.incident_id, "short": true },
                    { "title": "Severity", "value": incident.severity.as_str(), "short": true },
                    { "title": "Description", "value": incident.description, "short": false },
                    {
                        "title": "Events",
                        "value": format!("{} related events", incident.event_ids.len()),
                        "short": true
                    },
                ],
                "footer": "pulsewatch",
                "ts": incident.created_at.timestamp(),
            }]
        });
        if !self.config.channel.is_empty() {
            payload["channel"] = json!(self.config.channel);
        }

        if self.post(payload) {
            format!("SLACK-{}", incident.incident_id)
        } else {
            "SLACK-ERROR".to_string()
        }
    }

    fn update_incident(&self, external_id: &str, incident: &Incident) {
        if !self.enabled() || external_id == "SLACK-DISABLED" || external_id == "SLACK-ERROR" {
            return;
        }
        self.post(json!({
            "text": format!(":arrows_counterclockwise: Incident Updated: {}", incident.title)
        }));
    }

    fn resolve_incident(&self, external_id: &str, resolution: &str) {
        if !self.enabled() || external_id == "SLACK-DISABLED" || external_id == "SLACK-ERROR" {
            return;
        }
        self.post(json!({
            "text": format!(
                ":white_check_mark: Incident Resolved: {external_id}\nResolution: {resolution}"
            )
        }));
    }

    fn name(&self) -> &'static str {
        "Slack"
    }
}
