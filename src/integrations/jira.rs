//! Jira Cloud adapter: files incidents as Bug issues over the REST API.

use serde_json::json;
use tracing::warn;

use super::{http_client, IncidentIntegration};
use crate::config::JiraConfig;
use crate::incident::{Incident, IncidentSeverity};

fn priority_name(severity: IncidentSeverity) -> &'static str {
    match severity {
        IncidentSeverity::Critical => "Highest",
        IncidentSeverity::High => "High",
        IncidentSeverity::Medium => "Medium",
        IncidentSeverity::Low => "Low",
    }
}

pub struct JiraIntegration {
    config: JiraConfig,
    client: reqwest::blocking::Client,
}

impl JiraIntegration {
    pub fn new(config: JiraConfig) -> Self {
        Self {
            config,
            client: http_client(),
        }
    }

    fn enabled(&self) -> bool {
        !self.config.url.is_empty() && !self.config.project_key.is_empty()
    }

    fn api_url(&self, path: &str) -> String {
        format!("{}/{}", self.config.url.trim_end_matches('/'), path)
    }
}

impl IncidentIntegration for JiraIntegration {
    fn create_incident(&self, incident: &Incident) -> String {
        if !self.enabled() {
            return "JIRA-DISABLED".to_string();
        }

        let payload = json!({
            "fields": {
                "project": { "key": self.config.project_key },
                "summary": incident.title,
                "description": incident.description,
                "issuetype": { "name": "Bug" },
                "priority": { "name": priority_name(incident.severity) },
                "labels": incident.tags,
            }
        });

        let response = self
            .client
            .post(self.api_url("rest/api/2/issue"))
            .basic_auth(&self.config.username, Some(&self.config.api_token))
            .json(&payload)
            .send();

        match response {
            Ok(resp) if resp.status().is_success() => resp
                .json::<serde_json::Value>()
                .ok()
                .and_then(|body| body.get("key")?.as_str().map(str::to_string))
                .unwrap_or_else(|| "JIRA-ERROR".to_string()),
            Ok(resp) => {
                warn!(status = %resp.status(), "Jira issue creation failed");
                "JIRA-ERROR".to_string()
            }
            Err(err) => {
                warn!(error = %err, "Jira request failed");
                "JIRA-ERROR".to_string()
            }
        }
    }

    fn update_incident(&self, external_id: &str, incident: &Incident) {
        if !self.enabled() || external_id.starts_with("JIRA-") {
            return;
        }

        let payload = json!({ "body": incident.summary() });
        let result = self
            .client
            .post(self.api_url(&format!("rest/api/2/issue/{external_id}/comment")))
            .basic_auth(&self.config.username, Some(&self.config.api_token))
            .json(&payload)
            .send();
        if let Err(err) = result {
            warn!(error = %err, issue = external_id, "Jira update failed");
        }
    }

    fn resolve_incident(&self, external_id: &str, resolution: &str) {
        if !self.enabled() || external_id.starts_with("JIRA-") {
            return;
        }

        // Transition 31 is the conventional "Done" transition id.
        let payload = json!({
            "transition": { "id": "31" },
            "fields": { "resolution": { "name": resolution } }
        });
        let result = self
            .client
            .post(self.api_url(&format!("rest/api/3/issue/{external_id}/transitions")))
            .basic_auth(&self.config.username, Some(&self.config.api_token))
            .json(&payload)
            .send();
        if let Err(err) = result {
            warn!(error = %err, issue = external_id, "Jira resolve failed");
        }
    }

    fn name(&self) -> &'static str {
        "Jira"
    }
}
