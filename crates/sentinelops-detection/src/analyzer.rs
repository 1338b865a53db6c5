//! Language-model incident analysis.
//!
//! Builds one structured prompt per incident candidate from the anomalies,
//! correlated events, and matched runbooks, and asks the model for a JSON
//! assessment. Every failure path (timeout, non-2xx, unparseable body,
//! missing summary) degrades to "no analysis" — the incident proceeds
//! unenriched, and no retries are issued.

use async_trait::async_trait;
use serde::Deserialize;
use std::fmt::Write as _;
use std::time::Duration;
use tracing::{debug, info, warn};

use sentinelops_core::config::AnalyzerConfig;
use sentinelops_core::models::{Analysis, Anomaly, CorrelatedEvent, RunbookMatch};
use sentinelops_core::types::Confidence;
use sentinelops_core::{Error, Result};

/// Events included in the prompt before the character budget applies.
const MAX_CONTEXT_EVENTS: usize = 20;
/// Character budget for the correlated-events section.
const MAX_EVENTS_CHARS: usize = 4000;

const ANTHROPIC_VERSION: &str = "2023-06-01";

const SYSTEM_PROMPT: &str = "\
You are an expert SRE incident analyst. You will be given:
1. Detected anomalies (service, metric, z-score, severity)
2. Correlated events across services from the same time window
3. Matching historical runbooks (if any)

Your job:
- Identify the most likely root cause
- Assess your confidence (high/medium/low)
- List the affected services
- Provide concrete, prioritized remediation steps
- Write a one-sentence summary suitable for an incident title

Respond ONLY with valid JSON matching this schema:
{
  \"root_cause\": \"string\",
  \"confidence\": \"high|medium|low\",
  \"affected_services\": [\"string\"],
  \"remediation_steps\": [\"string\"],
  \"summary\": \"string\"
}";

/// Incident analysis seam. The production implementation calls an external
/// language model; tests substitute canned results.
#[async_trait]
pub trait Analyzer: Send + Sync {
    /// Analyze one incident candidate. `None` means no usable result.
    async fn analyze(
        &self,
        anomalies: &[Anomaly],
        events: &[CorrelatedEvent],
        runbooks: &[RunbookMatch],
    ) -> Option<Analysis>;
}

/// Analyzer backed by an Anthropic-style `/v1/messages` endpoint.
#[derive(Clone)]
pub struct ClaudeAnalyzer {
    endpoint: String,
    model: String,
    max_tokens: u32,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl std::fmt::Debug for ClaudeAnalyzer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClaudeAnalyzer")
            .field("endpoint", &self.endpoint)
            .field("model", &self.model)
            .field("max_tokens", &self.max_tokens)
            .field("api_key", &self.api_key.is_some())
            .finish()
    }
}

impl ClaudeAnalyzer {
    /// Create a new analyzer. Without an API key the analyzer is disabled
    /// and every candidate proceeds without analysis.
    pub fn new(config: &AnalyzerConfig, api_key: Option<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .map_err(|e| Error::analyzer(format!("failed to build http client: {e}")))?;

        Ok(Self {
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            max_tokens: config.max_tokens,
            api_key,
            client,
        })
    }

    fn build_context(
        anomalies: &[Anomaly],
        events: &[CorrelatedEvent],
        runbooks: &[RunbookMatch],
    ) -> String {
        let mut out = String::new();

        out.push_str("## Detected Anomalies\n");
        for a in anomalies {
            let _ = writeln!(
                out,
                "- Service: {} | Metric: {} | Value: {:.1} | Baseline: {:.1} +/- {:.1} | Z-score: {:.1} | Severity: {}",
                a.service, a.metric, a.current_value, a.baseline_mean, a.baseline_stddev, a.z_score, a.severity,
            );
        }

        if !events.is_empty() {
            out.push_str("\n## Correlated Events Across Services\n");
            let section_start = out.len();
            for e in events.iter().take(MAX_CONTEXT_EVENTS) {
                let trace = e
                    .trace_id
                    .as_deref()
                    .map(|t| format!(" [trace: {t}]"))
                    .unwrap_or_default();
                let line = format!(
                    "- [{}] {} ({}): {}{trace}\n",
                    e.timestamp.to_rfc3339(),
                    e.service,
                    e.level,
                    e.message,
                );
                if out.len() - section_start + line.len() > MAX_EVENTS_CHARS {
                    break;
                }
                out.push_str(&line);
            }
        }

        if !runbooks.is_empty() {
            out.push_str("\n## Similar Past Incidents (Runbooks)\n");
            for rb in runbooks {
                let _ = writeln!(out, "### {}", rb.title);
                if !rb.root_cause.is_empty() {
                    let _ = writeln!(out, "Root cause: {}", rb.root_cause);
                }
            }
        }

        out
    }
}

#[async_trait]
impl Analyzer for ClaudeAnalyzer {
    async fn analyze(
        &self,
        anomalies: &[Anomaly],
        events: &[CorrelatedEvent],
        runbooks: &[RunbookMatch],
    ) -> Option<Analysis> {
        if anomalies.is_empty() {
            return None;
        }
        let Some(api_key) = &self.api_key else {
            debug!("analyzer disabled: no api key configured");
            return None;
        };

        let context = Self::build_context(anomalies, events, runbooks);
        info!(
            anomalies = anomalies.len(),
            events = events.len(),
            runbooks = runbooks.len(),
            "requesting incident analysis"
        );

        let body = serde_json::json!({
            "model": self.model,
            "max_tokens": self.max_tokens,
            "system": SYSTEM_PROMPT,
            "messages": [{ "role": "user", "content": context }],
        });

        let url = format!("{}/v1/messages", self.endpoint);
        let response = match self
            .client
            .post(&url)
            .header("x-api-key", api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&body)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                warn!(error = %e, "analysis request failed");
                return None;
            }
        };

        let status = response.status();
        if !status.is_success() {
            warn!(status = %status, "analysis request rejected");
            return None;
        }

        let payload: serde_json::Value = match response.json().await {
            Ok(payload) => payload,
            Err(e) => {
                warn!(error = %e, "unreadable analysis response");
                return None;
            }
        };

        let text = payload
            .pointer("/content/0/text")
            .and_then(serde_json::Value::as_str)?;

        let analysis = parse_analysis(text);
        if let Some(analysis) = &analysis {
            info!(confidence = %analysis.confidence, "analysis complete");
        } else {
            warn!("analysis response did not contain a usable result");
        }
        analysis
    }
}

/// Wire shape of the model reply, deliberately looser than [`Analysis`]:
/// unknown keys are ignored and every field except `summary` defaults.
#[derive(Debug, Deserialize)]
struct RawAnalysis {
    #[serde(default)]
    summary: String,
    #[serde(default)]
    root_cause: String,
    #[serde(default)]
    confidence: String,
    #[serde(default)]
    affected_services: Vec<String>,
    #[serde(default)]
    remediation_steps: Vec<String>,
}

/// Parse the model's reply text into an [`Analysis`].
///
/// Strips markdown code fences, tolerates missing optional keys, and
/// rejects (returns `None`) any reply without a non-empty `summary`.
pub fn parse_analysis(text: &str) -> Option<Analysis> {
    let mut text = text.trim();
    if let Some(stripped) = text.strip_prefix("```") {
        // Drop the opening fence line (possibly "```json") and the closing fence.
        let after_fence = stripped.split_once('\n').map(|(_, rest)| rest)?;
        text = after_fence.rsplit_once("```").map(|(body, _)| body)?.trim();
    }

    let raw: RawAnalysis = serde_json::from_str(text).ok()?;
    if raw.summary.trim().is_empty() {
        return None;
    }

    let confidence = match raw.confidence.to_ascii_lowercase().as_str() {
        "high" => Confidence::High,
        "medium" => Confidence::Medium,
        _ => Confidence::Low,
    };

    Some(Analysis {
        summary: raw.summary,
        root_cause: raw.root_cause,
        confidence,
        affected_services: raw.affected_services,
        remediation_steps: raw.remediation_steps,
    })
}
