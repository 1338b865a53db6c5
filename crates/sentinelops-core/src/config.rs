//! Application configuration.
//!
//! Parsed once at startup from a YAML file into an immutable value that is
//! passed by reference through every component. Secrets (API keys, tokens)
//! come from the environment only, never from the file.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::env;
use std::path::Path;

use crate::types::Severity;
use crate::{Error, Result};

/// Full application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub polling: PollingConfig,
    #[serde(default)]
    pub detection: DetectionConfig,
    #[serde(default)]
    pub correlation: CorrelationConfig,
    #[serde(default)]
    pub incidents: IncidentConfig,
    #[serde(default)]
    pub analyzer: AnalyzerConfig,
    #[serde(default)]
    pub elasticsearch: ElasticsearchConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

impl Config {
    /// Load configuration from a YAML file.
    ///
    /// A missing file yields the built-in defaults; a file that exists but
    /// does not parse or validate is a fatal configuration error.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            let config = Config::default();
            config.validate()?;
            return Ok(config);
        }

        let raw = std::fs::read_to_string(path)
            .map_err(|e| Error::config(format!("failed to read {}: {e}", path.display())))?;
        let config: Config = serde_yaml::from_str(&raw)
            .map_err(|e| Error::config(format!("failed to parse {}: {e}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    /// Check cross-field invariants that serde cannot express.
    pub fn validate(&self) -> Result<()> {
        if self.polling.interval_seconds == 0 {
            return Err(Error::config("polling.interval_seconds must be positive"));
        }
        if self.polling.lookback_minutes == 0 {
            return Err(Error::config("polling.lookback_minutes must be positive"));
        }

        let t = &self.detection.thresholds;
        if !(t.p1 > t.p2 && t.p2 > t.p3 && t.p3 > t.p4 && t.p4 > 0.0) {
            return Err(Error::config(
                "detection.thresholds must satisfy p1 > p2 > p3 > p4 > 0",
            ));
        }
        if self.detection.min_data_points == 0 {
            return Err(Error::config("detection.min_data_points must be positive"));
        }
        if self.detection.baseline_window_minutes <= self.polling.lookback_minutes {
            return Err(Error::config(
                "detection.baseline_window_minutes must exceed polling.lookback_minutes",
            ));
        }

        if self.correlation.max_events == 0 {
            return Err(Error::config("correlation.max_events must be positive"));
        }
        if self.incidents.max_incidents == 0 {
            return Err(Error::config("incidents.max_incidents must be positive"));
        }
        Ok(())
    }
}

/// Polling-loop settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PollingConfig {
    /// Seconds between tick starts.
    #[serde(default = "default_interval_seconds")]
    pub interval_seconds: u64,
    /// Recent span the detector compares against the baseline.
    #[serde(default = "default_lookback_minutes")]
    pub lookback_minutes: u32,
    /// Hard deadline for the in-flight tick during shutdown.
    #[serde(default = "default_shutdown_grace_seconds")]
    pub shutdown_grace_seconds: u64,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            interval_seconds: default_interval_seconds(),
            lookback_minutes: default_lookback_minutes(),
            shutdown_grace_seconds: default_shutdown_grace_seconds(),
        }
    }
}

/// Z-score thresholds, descending by severity.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Thresholds {
    #[serde(default = "default_p1")]
    pub p1: f64,
    #[serde(default = "default_p2")]
    pub p2: f64,
    #[serde(default = "default_p3")]
    pub p3: f64,
    #[serde(default = "default_p4")]
    pub p4: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            p1: default_p1(),
            p2: default_p2(),
            p3: default_p3(),
            p4: default_p4(),
        }
    }
}

impl Thresholds {
    /// Map a z-score to the highest severity band it clears, if any.
    /// Boundaries are inclusive at the higher severity.
    pub fn severity_for(&self, z_score: f64) -> Option<Severity> {
        if z_score >= self.p1 {
            Some(Severity::P1)
        } else if z_score >= self.p2 {
            Some(Severity::P2)
        } else if z_score >= self.p3 {
            Some(Severity::P3)
        } else if z_score >= self.p4 {
            Some(Severity::P4)
        } else {
            None
        }
    }
}

/// Detection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DetectionConfig {
    #[serde(default)]
    pub thresholds: Thresholds,
    /// Historical span used to compute baseline mean/stddev.
    #[serde(default = "default_baseline_window_minutes")]
    pub baseline_window_minutes: u32,
    /// Minimum non-null baseline buckets required per metric.
    #[serde(default = "default_min_data_points")]
    pub min_data_points: usize,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            thresholds: Thresholds::default(),
            baseline_window_minutes: default_baseline_window_minutes(),
            min_data_points: default_min_data_points(),
        }
    }
}

/// Cross-service correlation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CorrelationConfig {
    /// Half-width of the event window around the earliest anomaly.
    #[serde(default = "default_correlation_window_minutes")]
    pub window_minutes: u32,
    /// Bound on the correlated-event list per incident.
    #[serde(default = "default_max_events")]
    pub max_events: usize,
}

impl Default for CorrelationConfig {
    fn default() -> Self {
        Self {
            window_minutes: default_correlation_window_minutes(),
            max_events: default_max_events(),
        }
    }
}

/// Incident lifecycle settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IncidentConfig {
    /// Window during which identical dedup keys are suppressed.
    #[serde(default = "default_dedup_cooldown_minutes")]
    pub dedup_cooldown_minutes: u32,
    /// Severities that page in addition to the chat notification.
    #[serde(default = "default_pagerduty_severities")]
    pub pagerduty_severities: Vec<Severity>,
    /// Store retention bound; oldest incidents are evicted past it.
    #[serde(default = "default_max_incidents")]
    pub max_incidents: usize,
}

impl Default for IncidentConfig {
    fn default() -> Self {
        Self {
            dedup_cooldown_minutes: default_dedup_cooldown_minutes(),
            pagerduty_severities: default_pagerduty_severities(),
            max_incidents: default_max_incidents(),
        }
    }
}

/// Language-model analyzer settings. The model identifier is opaque
/// configuration and is not validated against any list.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AnalyzerConfig {
    #[serde(default = "default_analyzer_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_analyzer_model")]
    pub model: String,
    #[serde(default = "default_analyzer_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_analyzer_timeout_seconds")]
    pub timeout_seconds: u64,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            endpoint: default_analyzer_endpoint(),
            model: default_analyzer_model(),
            max_tokens: default_analyzer_max_tokens(),
            timeout_seconds: default_analyzer_timeout_seconds(),
        }
    }
}

/// Observability backend location and index names.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ElasticsearchConfig {
    #[serde(default = "default_es_url")]
    pub url: String,
    #[serde(default = "default_log_index")]
    pub log_index: String,
    #[serde(default = "default_metrics_index")]
    pub metrics_index: String,
    #[serde(default = "default_runbook_index")]
    pub runbook_index: String,
}

impl Default for ElasticsearchConfig {
    fn default() -> Self {
        Self {
            url: default_es_url(),
            log_index: default_log_index(),
            metrics_index: default_metrics_index(),
            runbook_index: default_runbook_index(),
        }
    }
}

/// Read-API server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

/// Secrets loaded from environment variables only.
#[derive(Clone, Default)]
pub struct Secrets {
    pub elasticsearch_api_key: Option<String>,
    pub anthropic_api_key: Option<String>,
    pub slack_bot_token: Option<String>,
    pub slack_channel_id: Option<String>,
    pub pagerduty_api_key: Option<String>,
    pub pagerduty_service_id: Option<String>,
}

impl std::fmt::Debug for Secrets {
    /// Values never appear in logs, only which integrations are enabled.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Secrets")
            .field("elasticsearch_api_key", &self.elasticsearch_api_key.is_some())
            .field("anthropic_api_key", &self.anthropic_api_key.is_some())
            .field("slack_bot_token", &self.slack_bot_token.is_some())
            .field("slack_channel_id", &self.slack_channel_id.is_some())
            .field("pagerduty_api_key", &self.pagerduty_api_key.is_some())
            .field("pagerduty_service_id", &self.pagerduty_service_id.is_some())
            .finish()
    }
}

impl Secrets {
    /// Read all recognized secrets from the environment. Unset or empty
    /// variables disable the corresponding integration.
    pub fn from_env() -> Self {
        fn non_empty(name: &str) -> Option<String> {
            env::var(name).ok().filter(|v| !v.is_empty())
        }

        Self {
            elasticsearch_api_key: non_empty("SENTINELOPS_ES_API_KEY"),
            anthropic_api_key: non_empty("SENTINELOPS_ANTHROPIC_API_KEY"),
            slack_bot_token: non_empty("SENTINELOPS_SLACK_BOT_TOKEN"),
            slack_channel_id: non_empty("SENTINELOPS_SLACK_CHANNEL_ID"),
            pagerduty_api_key: non_empty("SENTINELOPS_PAGERDUTY_API_KEY"),
            pagerduty_service_id: non_empty("SENTINELOPS_PAGERDUTY_SERVICE_ID"),
        }
    }
}

fn default_interval_seconds() -> u64 {
    30
}
fn default_lookback_minutes() -> u32 {
    5
}
fn default_shutdown_grace_seconds() -> u64 {
    30
}
fn default_p1() -> f64 {
    5.0
}
fn default_p2() -> f64 {
    3.5
}
fn default_p3() -> f64 {
    2.5
}
fn default_p4() -> f64 {
    2.0
}
fn default_baseline_window_minutes() -> u32 {
    60
}
fn default_min_data_points() -> usize {
    10
}
fn default_correlation_window_minutes() -> u32 {
    10
}
fn default_max_events() -> usize {
    50
}
fn default_dedup_cooldown_minutes() -> u32 {
    30
}
fn default_pagerduty_severities() -> Vec<Severity> {
    vec![Severity::P1, Severity::P2]
}
fn default_max_incidents() -> usize {
    1000
}
fn default_analyzer_endpoint() -> String {
    "https://api.anthropic.com".to_string()
}
fn default_analyzer_model() -> String {
    "claude-sonnet-4-6".to_string()
}
fn default_analyzer_max_tokens() -> u32 {
    1024
}
fn default_analyzer_timeout_seconds() -> u64 {
    30
}
fn default_es_url() -> String {
    "https://localhost:9200".to_string()
}
fn default_log_index() -> String {
    "app-logs-*".to_string()
}
fn default_metrics_index() -> String {
    "app-metrics-*".to_string()
}
fn default_runbook_index() -> String {
    "incident-runbooks".to_string()
}
fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    8000
}
fn default_request_timeout_secs() -> u64 {
    30
}

/// Render the effective configuration as sorted key/value pairs for startup
/// logging. Secrets never appear here.
pub fn effective_summary(config: &Config) -> BTreeMap<&'static str, String> {
    let mut summary = BTreeMap::new();
    summary.insert("polling.interval_seconds", config.polling.interval_seconds.to_string());
    summary.insert("polling.lookback_minutes", config.polling.lookback_minutes.to_string());
    summary.insert(
        "detection.baseline_window_minutes",
        config.detection.baseline_window_minutes.to_string(),
    );
    summary.insert("detection.min_data_points", config.detection.min_data_points.to_string());
    summary.insert("correlation.window_minutes", config.correlation.window_minutes.to_string());
    summary.insert("correlation.max_events", config.correlation.max_events.to_string());
    summary.insert(
        "incidents.dedup_cooldown_minutes",
        config.incidents.dedup_cooldown_minutes.to_string(),
    );
    summary.insert("incidents.max_incidents", config.incidents.max_incidents.to_string());
    summary.insert("analyzer.model", config.analyzer.model.clone());
    summary.insert("elasticsearch.url", config.elasticsearch.url.clone());
    summary
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.polling.interval_seconds, 30);
        assert_eq!(config.detection.thresholds.p1, 5.0);
        assert_eq!(
            config.incidents.pagerduty_severities,
            vec![Severity::P1, Severity::P2]
        );
    }

    #[test]
    fn parses_partial_yaml_with_defaults() {
        let yaml = r#"
polling:
  interval_seconds: 10
detection:
  min_data_points: 5
incidents:
  pagerduty_severities: [P1]
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.polling.interval_seconds, 10);
        assert_eq!(config.polling.lookback_minutes, 5);
        assert_eq!(config.detection.min_data_points, 5);
        assert_eq!(config.incidents.pagerduty_severities, vec![Severity::P1]);
        assert_eq!(config.correlation.max_events, 50);
        config.validate().unwrap();
    }

    #[test]
    fn rejects_non_descending_thresholds() {
        let yaml = r#"
detection:
  thresholds:
    p1: 2.0
    p2: 3.5
    p3: 2.5
    p4: 2.0
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn severity_bands_inclusive_at_higher_severity() {
        let t = Thresholds::default();
        assert_eq!(t.severity_for(1.99), None);
        assert_eq!(t.severity_for(2.0), Some(Severity::P4));
        assert_eq!(t.severity_for(2.5), Some(Severity::P3));
        assert_eq!(t.severity_for(3.5), Some(Severity::P2));
        assert_eq!(t.severity_for(5.0), Some(Severity::P1));
        assert_eq!(t.severity_for(48.0), Some(Severity::P1));
    }

    #[test]
    fn missing_config_file_yields_defaults() {
        let config = Config::from_file("/nonexistent/sentinelops.yaml").unwrap();
        assert_eq!(config.polling.interval_seconds, 30);
    }
}
