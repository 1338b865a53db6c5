//! Slack chat notifications.
//!
//! Posts one Block Kit message per incident via `chat.postMessage`. Slack
//! reports application errors inside a 200 response (`{"ok": false, ...}`),
//! so both transport and application failures map to a notifier error.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::debug;

use sentinelops_core::models::Incident;
use sentinelops_core::types::Severity;
use sentinelops_core::{Error, Result};

use crate::Notifier;

const SLACK_API_URL: &str = "https://slack.com/api/chat.postMessage";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
const MAX_ANOMALY_BLOCKS: usize = 5;
const MAX_RUNBOOK_TITLES: usize = 3;

/// Chat notifier backed by the Slack Web API.
#[derive(Clone)]
pub struct SlackNotifier {
    bot_token: String,
    channel_id: String,
    client: reqwest::Client,
}

impl std::fmt::Debug for SlackNotifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SlackNotifier")
            .field("channel_id", &self.channel_id)
            .finish()
    }
}

impl SlackNotifier {
    pub fn new(bot_token: String, channel_id: String) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| Error::notifier("slack", format!("failed to build http client: {e}")))?;

        Ok(Self {
            bot_token,
            channel_id,
            client,
        })
    }

    fn severity_emoji(severity: Severity) -> &'static str {
        match severity {
            Severity::P1 => ":red_circle:",
            Severity::P2 => ":large_orange_circle:",
            Severity::P3 => ":large_yellow_circle:",
            Severity::P4 => ":white_circle:",
        }
    }

    fn build_blocks(incident: &Incident) -> Vec<Value> {
        let emoji = Self::severity_emoji(incident.severity);
        let services = incident.services.join(", ");

        let mut blocks = vec![
            json!({
                "type": "header",
                "text": {
                    "type": "plain_text",
                    "text": format!("{emoji} {} Incident: {}", incident.severity, incident.title),
                }
            }),
            json!({
                "type": "section",
                "fields": [
                    { "type": "mrkdwn", "text": format!("*Incident ID:*\n`{}`", incident.id) },
                    { "type": "mrkdwn", "text": format!("*Severity:*\n{}", incident.severity) },
                    { "type": "mrkdwn", "text": format!("*Services:*\n{services}") },
                    {
                        "type": "mrkdwn",
                        "text": format!(
                            "*Detected at:*\n{}",
                            incident.created_at.format("%Y-%m-%d %H:%M:%S UTC")
                        )
                    },
                ]
            }),
            json!({ "type": "divider" }),
        ];

        for anomaly in incident.anomalies.iter().take(MAX_ANOMALY_BLOCKS) {
            blocks.push(json!({
                "type": "section",
                "text": {
                    "type": "mrkdwn",
                    "text": format!(
                        "*{}* — `{}`\nCurrent: `{:.1}` | Baseline: `{:.1}` | Z-score: `{:.1}`",
                        anomaly.service,
                        anomaly.metric,
                        anomaly.current_value,
                        anomaly.baseline_mean,
                        anomaly.z_score,
                    )
                }
            }));
        }

        if let Some(analysis) = &incident.analysis {
            blocks.push(json!({ "type": "divider" }));
            blocks.push(json!({
                "type": "section",
                "text": {
                    "type": "mrkdwn",
                    "text": format!(
                        "*AI Analysis* (confidence: {})\n>{}",
                        analysis.confidence, analysis.root_cause,
                    )
                }
            }));
            if !analysis.remediation_steps.is_empty() {
                let steps = analysis
                    .remediation_steps
                    .iter()
                    .enumerate()
                    .map(|(i, step)| format!("{}. {step}", i + 1))
                    .collect::<Vec<_>>()
                    .join("\n");
                blocks.push(json!({
                    "type": "section",
                    "text": { "type": "mrkdwn", "text": format!("*Suggested Remediation:*\n{steps}") }
                }));
            }
        }

        if !incident.matched_runbooks.is_empty() {
            let titles = incident
                .matched_runbooks
                .iter()
                .take(MAX_RUNBOOK_TITLES)
                .map(|rb| format!("- {}", rb.title))
                .collect::<Vec<_>>()
                .join("\n");
            blocks.push(json!({ "type": "divider" }));
            blocks.push(json!({
                "type": "section",
                "text": { "type": "mrkdwn", "text": format!("*Related Runbooks:*\n{titles}") }
            }));
        }

        blocks
    }
}

#[async_trait]
impl Notifier for SlackNotifier {
    fn name(&self) -> &'static str {
        "slack"
    }

    async fn notify(&self, incident: &Incident) -> Result<()> {
        let body = json!({
            "channel": self.channel_id,
            "text": format!("[{}] {}", incident.severity, incident.title),
            "blocks": Self::build_blocks(incident),
        });

        debug!(incident_id = %incident.id, "posting slack notification");
        let response = self
            .client
            .post(SLACK_API_URL)
            .bearer_auth(&self.bot_token)
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::notifier("slack", e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::notifier("slack", format!("status {status}")));
        }

        let payload: Value = response
            .json()
            .await
            .map_err(|e| Error::notifier("slack", format!("invalid response: {e}")))?;
        if payload.get("ok").and_then(Value::as_bool) != Some(true) {
            let detail = payload
                .get("error")
                .and_then(Value::as_str)
                .unwrap_or("unknown error");
            return Err(Error::notifier("slack", detail.to_string()));
        }

        Ok(())
    }
}
