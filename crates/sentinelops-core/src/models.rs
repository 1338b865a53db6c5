//! The incident data model.
//!
//! `Anomaly` and `CorrelatedEvent` values are immutable after construction;
//! `Incident` records are mutated only by the incident manager and stored
//! only by the incident store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{Confidence, DedupKey, EventLevel, IncidentStatus, MetricKind, Severity};

/// A statistical deviation of one metric of one service in the lookback
/// window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Anomaly {
    pub service: String,
    pub metric: MetricKind,
    pub current_value: f64,
    /// Mean over the non-null baseline buckets. Always `>= 0`.
    pub baseline_mean: f64,
    /// Standard deviation over the non-null baseline buckets. Always `>= 0`;
    /// a zero stddev never reaches this type (the detector discards it).
    pub baseline_stddev: f64,
    /// Standard deviations above the baseline mean, clamped to `>= 0`.
    pub z_score: f64,
    pub severity: Severity,
    pub detected_at: DateTime<Utc>,
    /// Number of non-null baseline buckets behind the statistics.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sample_count: Option<usize>,
}

/// A raw log document as returned by the observability backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEvent {
    pub timestamp: DateTime<Utc>,
    pub service: String,
    pub level: EventLevel,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
}

/// An event from the same time window as an anomaly, possibly from another
/// service. Ordered by timestamp ascending within an incident.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrelatedEvent {
    pub timestamp: DateTime<Utc>,
    pub service: String,
    pub level: EventLevel,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
}

impl From<LogEvent> for CorrelatedEvent {
    fn from(event: LogEvent) -> Self {
        CorrelatedEvent {
            timestamp: event.timestamp,
            service: event.service,
            level: event.level,
            message: event.message,
            trace_id: event.trace_id,
            status_code: event.status_code,
        }
    }
}

/// A historical runbook entry matched to the current anomalies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunbookMatch {
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub incident_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub services_affected: Vec<String>,
    #[serde(default)]
    pub root_cause: String,
    #[serde(default)]
    pub resolution_steps: Vec<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    /// Backend relevance score.
    #[serde(default)]
    pub score: f64,
}

/// Structured output from the language-model analysis of an incident.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Analysis {
    /// One-sentence title. Non-empty; an analysis without one is rejected.
    pub summary: String,
    #[serde(default)]
    pub root_cause: String,
    #[serde(default)]
    pub confidence: Confidence,
    #[serde(default)]
    pub affected_services: Vec<String>,
    #[serde(default)]
    pub remediation_steps: Vec<String>,
}

/// A fully assembled incident.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Incident {
    /// `INC-YYYYMMDDhhmmss`, collision-broken by a `-N` suffix.
    pub id: String,
    pub created_at: DateTime<Utc>,
    /// Worst severity among the constituent anomalies.
    pub severity: Severity,
    pub title: String,
    /// Union of anomaly services, sorted.
    pub services: Vec<String>,
    /// Non-empty, in the deterministic (service, metric) detection order.
    pub anomalies: Vec<Anomaly>,
    #[serde(default)]
    pub correlated_events: Vec<CorrelatedEvent>,
    #[serde(default)]
    pub matched_runbooks: Vec<RunbookMatch>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub analysis: Option<Analysis>,
    pub dedup_key: DedupKey,
    pub status: IncidentStatus,
}

impl Incident {
    /// Metric kinds present across the constituent anomalies, sorted and
    /// deduplicated.
    pub fn metrics(&self) -> Vec<MetricKind> {
        let mut metrics: Vec<MetricKind> = self.anomalies.iter().map(|a| a.metric).collect();
        metrics.sort_unstable();
        metrics.dedup();
        metrics
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn anomaly(service: &str, metric: MetricKind) -> Anomaly {
        Anomaly {
            service: service.to_string(),
            metric,
            current_value: 50.0,
            baseline_mean: 2.0,
            baseline_stddev: 1.0,
            z_score: 48.0,
            severity: Severity::P1,
            detected_at: Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap(),
            sample_count: Some(60),
        }
    }

    #[test]
    fn log_event_converts_to_correlated_event() {
        let event = LogEvent {
            timestamp: Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap(),
            service: "payment".to_string(),
            level: EventLevel::Error,
            message: "connection refused".to_string(),
            trace_id: Some("abc123".to_string()),
            status_code: Some(502),
        };
        let correlated = CorrelatedEvent::from(event.clone());
        assert_eq!(correlated.service, event.service);
        assert_eq!(correlated.trace_id.as_deref(), Some("abc123"));
        assert_eq!(correlated.status_code, Some(502));
    }

    #[test]
    fn incident_metrics_are_sorted_and_unique() {
        let incident = Incident {
            id: "INC-20250601120000".to_string(),
            created_at: Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap(),
            severity: Severity::P1,
            title: "test".to_string(),
            services: vec!["payment".to_string()],
            anomalies: vec![
                anomaly("payment", MetricKind::LatencyP99),
                anomaly("payment", MetricKind::ErrorRate),
                anomaly("order", MetricKind::ErrorRate),
            ],
            correlated_events: vec![],
            matched_runbooks: vec![],
            analysis: None,
            dedup_key: DedupKey::compute(
                &["payment".to_string()],
                &[MetricKind::ErrorRate],
                Severity::P1,
            ),
            status: IncidentStatus::Active,
        };
        assert_eq!(
            incident.metrics(),
            vec![MetricKind::ErrorRate, MetricKind::LatencyP99]
        );
    }
}
