//! Request handlers and response shapes for the read API.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use sentinelops_core::models::Incident;
use sentinelops_core::types::{Confidence, DedupKey, IncidentStatus, MetricKind, Severity};
use sentinelops_incidents::IncidentStore;

const DEFAULT_PAGE_LIMIT: usize = 50;

// =============================================================================
// RESPONSE TYPES
// =============================================================================

/// `GET /health` response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub incidents_tracked: usize,
}

/// Derived per-service health state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceStatus {
    Critical,
    Warning,
    Degraded,
    Healthy,
}

impl ServiceStatus {
    /// Critical on any P1, warning on P2, degraded on P3/P4.
    fn from_worst_severity(severity: Severity) -> Self {
        match severity {
            Severity::P1 => ServiceStatus::Critical,
            Severity::P2 => ServiceStatus::Warning,
            Severity::P3 | Severity::P4 => ServiceStatus::Degraded,
        }
    }
}

/// One anomaly as shown in the service summary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceAnomaly {
    pub metric: MetricKind,
    pub z_score: f64,
    pub current_value: f64,
    pub baseline_mean: f64,
    pub severity: Severity,
    pub timestamp: DateTime<Utc>,
}

/// Per-service rollup across retained incidents.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceSummary {
    pub service: String,
    pub status: ServiceStatus,
    pub worst_severity: Severity,
    pub incident_count: usize,
    pub last_incident_id: Option<String>,
    pub last_incident_at: Option<DateTime<Utc>>,
    pub anomalies: Vec<ServiceAnomaly>,
}

/// `GET /services` response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServicesResponse {
    pub services: Vec<ServiceSummary>,
}

/// One incident as shown in the list view.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IncidentSummary {
    pub id: String,
    pub title: String,
    pub severity: Severity,
    pub status: IncidentStatus,
    pub created_at: DateTime<Utc>,
    pub dedup_key: DedupKey,
    pub services: Vec<String>,
    pub anomaly_count: usize,
    pub has_analysis: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub root_cause: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<Confidence>,
}

impl From<&Incident> for IncidentSummary {
    fn from(incident: &Incident) -> Self {
        IncidentSummary {
            id: incident.id.clone(),
            title: incident.title.clone(),
            severity: incident.severity,
            status: incident.status,
            created_at: incident.created_at,
            dedup_key: incident.dedup_key.clone(),
            services: incident.services.clone(),
            anomaly_count: incident.anomalies.len(),
            has_analysis: incident.analysis.is_some(),
            root_cause: incident.analysis.as_ref().map(|a| a.root_cause.clone()),
            confidence: incident.analysis.as_ref().map(|a| a.confidence),
        }
    }
}

/// `GET /incidents` response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IncidentListResponse {
    pub total: usize,
    pub incidents: Vec<IncidentSummary>,
}

/// `GET /incidents` query parameters.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListParams {
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

// =============================================================================
// HANDLERS
// =============================================================================

/// GET /health
pub async fn health(State(store): State<Arc<IncidentStore>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        incidents_tracked: store.count(),
    })
}

/// GET /services
pub async fn list_services(State(store): State<Arc<IncidentStore>>) -> Json<ServicesResponse> {
    Json(ServicesResponse {
        services: service_summaries(&store),
    })
}

/// GET /incidents?limit=&offset=
pub async fn list_incidents(
    State(store): State<Arc<IncidentStore>>,
    Query(params): Query<ListParams>,
) -> Json<IncidentListResponse> {
    let limit = params.limit.unwrap_or(DEFAULT_PAGE_LIMIT);
    let offset = params.offset.unwrap_or(0);
    debug!(limit, offset, "listing incidents");

    let incidents = store
        .list(limit, offset)
        .iter()
        .map(IncidentSummary::from)
        .collect();

    Json(IncidentListResponse {
        total: store.count(),
        incidents,
    })
}

/// GET /incidents/{id}
pub async fn get_incident(
    State(store): State<Arc<IncidentStore>>,
    Path(id): Path<String>,
) -> Result<Json<Incident>, StatusCode> {
    store.get(&id).map(Json).ok_or(StatusCode::NOT_FOUND)
}

/// Roll retained incidents up into per-service health, worst first.
pub fn service_summaries(store: &IncidentStore) -> Vec<ServiceSummary> {
    let incidents = store.list(store.count(), 0);

    let mut by_service: HashMap<String, ServiceSummary> = HashMap::new();
    for incident in &incidents {
        for anomaly in &incident.anomalies {
            let entry = by_service
                .entry(anomaly.service.clone())
                .or_insert_with(|| ServiceSummary {
                    service: anomaly.service.clone(),
                    status: ServiceStatus::Degraded,
                    worst_severity: anomaly.severity,
                    incident_count: 0,
                    last_incident_id: None,
                    last_incident_at: None,
                    anomalies: vec![],
                });

            entry.worst_severity = entry.worst_severity.max(anomaly.severity);
            if entry.last_incident_at.is_none_or(|at| incident.created_at > at) {
                entry.last_incident_at = Some(incident.created_at);
                entry.last_incident_id = Some(incident.id.clone());
            }
            entry.anomalies.push(ServiceAnomaly {
                metric: anomaly.metric,
                z_score: anomaly.z_score,
                current_value: anomaly.current_value,
                baseline_mean: anomaly.baseline_mean,
                severity: anomaly.severity,
                timestamp: anomaly.detected_at,
            });
        }
        for service in &incident.services {
            if let Some(entry) = by_service.get_mut(service) {
                entry.incident_count += 1;
            }
        }
    }

    let mut services: Vec<ServiceSummary> = by_service
        .into_values()
        .map(|mut summary| {
            summary.status = ServiceStatus::from_worst_severity(summary.worst_severity);
            summary
        })
        .collect();
    // Worst severity first, name as tiebreak for a stable dashboard order.
    services.sort_by(|a, b| {
        b.worst_severity
            .cmp(&a.worst_severity)
            .then_with(|| a.service.cmp(&b.service))
    });
    services
}
