//! PagerDuty paging notifications.
//!
//! Creates one PagerDuty incident per SentinelOps incident, carrying the
//! dedup key as `incident_key` so PagerDuty's own grouping lines up with
//! ours.

use async_trait::async_trait;
use serde_json::json;
use std::time::Duration;
use tracing::debug;

use sentinelops_core::models::Incident;
use sentinelops_core::types::Severity;
use sentinelops_core::{Error, Result};

use crate::Notifier;

const PAGERDUTY_API_URL: &str = "https://api.pagerduty.com/incidents";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Map severity onto PagerDuty urgency.
fn urgency(severity: Severity) -> &'static str {
    match severity {
        Severity::P1 | Severity::P2 => "high",
        Severity::P3 | Severity::P4 => "low",
    }
}

/// Paging notifier backed by the PagerDuty REST API.
#[derive(Clone)]
pub struct PagerDutyNotifier {
    api_key: String,
    service_id: String,
    client: reqwest::Client,
}

impl std::fmt::Debug for PagerDutyNotifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PagerDutyNotifier")
            .field("service_id", &self.service_id)
            .finish()
    }
}

impl PagerDutyNotifier {
    pub fn new(api_key: String, service_id: String) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| {
                Error::notifier("pagerduty", format!("failed to build http client: {e}"))
            })?;

        Ok(Self {
            api_key,
            service_id,
            client,
        })
    }

    fn body_details(incident: &Incident) -> String {
        let mut lines = vec![
            format!("Severity: {}", incident.severity),
            format!("Services: {}", incident.services.join(", ")),
        ];
        if let Some(analysis) = &incident.analysis {
            lines.push(format!("Root cause: {}", analysis.root_cause));
            for (i, step) in analysis.remediation_steps.iter().enumerate() {
                lines.push(format!("  {}. {step}", i + 1));
            }
        }
        lines.join("\n")
    }
}

#[async_trait]
impl Notifier for PagerDutyNotifier {
    fn name(&self) -> &'static str {
        "pagerduty"
    }

    async fn notify(&self, incident: &Incident) -> Result<()> {
        let body = json!({
            "incident": {
                "type": "incident",
                "title": format!("[{}] {}", incident.severity, incident.title),
                "service": { "id": self.service_id, "type": "service_reference" },
                "urgency": urgency(incident.severity),
                "body": { "type": "incident_body", "details": Self::body_details(incident) },
                "incident_key": incident.dedup_key.as_str(),
            }
        });

        debug!(incident_id = %incident.id, "creating pagerduty incident");
        let response = self
            .client
            .post(PAGERDUTY_API_URL)
            .header("Authorization", format!("Token token={}", self.api_key))
            .header("Accept", "application/vnd.pagerduty+json;version=2")
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::notifier("pagerduty", e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(Error::notifier(
                "pagerduty",
                format!("status {status}: {detail}"),
            ));
        }

        Ok(())
    }
}
