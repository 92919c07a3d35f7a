//! Pipeline configuration: a plain struct with serde defaults and optional
//! TOML loading.
//!
//! Every numeric option is sanitized at pipeline start: negative, NaN, or
//! out-of-range values fall back to the documented default rather than
//! failing initialization.

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Root configuration for a pipeline instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Stamped on every emitted event that does not set its own.
    pub service_name: String,
    pub environment: String,
    pub service_instance: String,

    /// Fraction of non-anomalous events admitted, in [0, 1].
    pub sampling_rate: f64,
    /// Admit anomalous and ERROR+ events regardless of the sampling rate.
    pub sample_anomalies_always: bool,

    /// Bounded handoff queue depth.
    pub async_queue_size: usize,
    /// Consumer worker thread count.
    pub worker_threads: usize,

    pub enable_anomaly_detection: bool,
    pub enable_pattern_matching: bool,
    pub enable_correlation: bool,
    pub enable_auto_incidents: bool,

    /// Minimum anomaly score for incident creation.
    pub incident_anomaly_threshold: f64,
    /// Minimum matched patterns for incident creation.
    pub incident_pattern_threshold: usize,
    /// Minimum correlations for incident creation.
    pub incident_correlation_threshold: usize,

    /// Incident severity boundaries, evaluated top-down.
    pub critical_threshold: f64,
    pub high_threshold: f64,
    pub medium_threshold: f64,

    /// Open incidents older than this are swept to RESOLVED.
    pub resolution_timeout_secs: u64,
    /// Window within which near-identical incidents merge.
    pub deduplication_window_secs: u64,

    /// Mirror every processed event to this file when set.
    pub log_file_path: String,
    /// Mirror every processed event to stdout.
    pub log_to_console: bool,

    pub integrations: IntegrationsConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            service_name: String::new(),
            environment: "production".to_string(),
            service_instance: String::new(),
            sampling_rate: 1.0,
            sample_anomalies_always: true,
            async_queue_size: 8192,
            worker_threads: 2,
            enable_anomaly_detection: true,
            enable_pattern_matching: true,
            enable_correlation: true,
            enable_auto_incidents: false,
            incident_anomaly_threshold: 0.75,
            incident_pattern_threshold: 1,
            incident_correlation_threshold: 3,
            critical_threshold: 0.95,
            high_threshold: 0.85,
            medium_threshold: 0.75,
            resolution_timeout_secs: 15 * 60,
            deduplication_window_secs: 5 * 60,
            log_file_path: String::new(),
            log_to_console: true,
            integrations: IntegrationsConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file at `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("failed to parse config file: {}", path.display()))?;
        info!(path = %path.display(), "loaded pipeline configuration");
        Ok(config)
    }

    /// Replace invalid numeric options with their defaults.
    pub fn sanitized(mut self) -> Self {
        let defaults = Config::default();

        if !self.sampling_rate.is_finite() || !(0.0..=1.0).contains(&self.sampling_rate) {
            warn!(value = self.sampling_rate, "invalid sampling_rate, using default");
            self.sampling_rate = defaults.sampling_rate;
        }
        if self.async_queue_size == 0 {
            warn!("async_queue_size of 0, using default");
            self.async_queue_size = defaults.async_queue_size;
        }
        for (value, default, name) in [
            (&mut self.incident_anomaly_threshold, defaults.incident_anomaly_threshold, "incident_anomaly_threshold"),
            (&mut self.critical_threshold, defaults.critical_threshold, "critical_threshold"),
            (&mut self.high_threshold, defaults.high_threshold, "high_threshold"),
            (&mut self.medium_threshold, defaults.medium_threshold, "medium_threshold"),
        ] {
            if !value.is_finite() || !(0.0..=1.0).contains(&*value) {
                warn!(value = *value, option = name, "invalid threshold, using default");
                *value = default;
            }
        }
        if self.resolution_timeout_secs == 0 {
            self.resolution_timeout_secs = defaults.resolution_timeout_secs;
        }
        if self.deduplication_window_secs == 0 {
            self.deduplication_window_secs = defaults.deduplication_window_secs;
        }

        self
    }
}

/// Per-sink endpoint and credential bundles.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct IntegrationsConfig {
    pub jira: JiraConfig,
    pub pagerduty: PagerDutyConfig,
    pub slack: SlackConfig,
}

/// Jira Cloud REST API configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct JiraConfig {
    /// Base URL, e.g. `https://your-domain.atlassian.net`.
    pub url: String,
    pub username: String,
    pub api_token: String,
    /// Project key issues are filed under, e.g. `OPS`.
    pub project_key: String,
    pub enabled: bool,
}

/// PagerDuty Events API v2 configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PagerDutyConfig {
    pub integration_key: String,
    /// Events API endpoint; the public default is overridable for testing.
    pub events_url: String,
    pub enabled: bool,
}

/// Slack incoming-webhook configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SlackConfig {
    pub webhook_url: String,
    /// Optional channel override.
    pub channel: String,
    pub enabled: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = Config::default();
        assert_eq!(config.async_queue_size, 8192);
        assert_eq!(config.worker_threads, 2);
        assert_eq!(config.sampling_rate, 1.0);
        assert!(config.sample_anomalies_always);
        assert_eq!(config.incident_anomaly_threshold, 0.75);
        assert_eq!(config.incident_pattern_threshold, 1);
        assert_eq!(config.incident_correlation_threshold, 3);
        assert_eq!(config.resolution_timeout_secs, 900);
        assert_eq!(config.deduplication_window_secs, 300);
        assert!(!config.enable_auto_incidents);
    }

    #[test]
    fn sanitize_restores_defaults_for_invalid_values() {
        let mut config = Config::default();
        config.sampling_rate = -0.5;
        config.async_queue_size = 0;
        config.critical_threshold = 42.0;
        config.deduplication_window_secs = 0;

        let config = config.sanitized();
        assert_eq!(config.sampling_rate, 1.0);
        assert_eq!(config.async_queue_size, 8192);
        assert_eq!(config.critical_threshold, 0.95);
        assert_eq!(config.deduplication_window_secs, 300);
    }

    #[test]
    fn toml_round_trip() {
        let toml = r#"
            service_name = "checkout"
            worker_threads = 4

            [integrations.slack]
            webhook_url = "https://hooks.slack.invalid/T000/B000"
            enabled = true
        "#;
        let config: Config = toml::from_str(toml).expect("parse");
        assert_eq!(config.service_name, "checkout");
        assert_eq!(config.worker_threads, 4);
        assert!(config.integrations.slack.enabled);
        // Unspecified sections keep their defaults.
        assert_eq!(config.async_queue_size, 8192);
        assert!(!config.integrations.jira.enabled);
    }
}
