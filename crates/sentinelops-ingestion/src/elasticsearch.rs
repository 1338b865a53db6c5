//! Elasticsearch implementation of the observability backend.
//!
//! Issues `_search`/`_count` aggregation queries over HTTP. Transient
//! transport failures (connect, timeout, 5xx) are retried once within the
//! call; malformed hits are logged and skipped, never aborting the query.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, warn};

use sentinelops_core::config::ElasticsearchConfig;
use sentinelops_core::models::{LogEvent, RunbookMatch};
use sentinelops_core::types::{EventLevel, MetricKind};
use sentinelops_core::{Error, Result};

use crate::backend::{ObservabilityBackend, SeriesPoint, TimeRange};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
const MAX_DISCOVERED_SERVICES: usize = 200;

/// HTTP client for the Elasticsearch observability backend.
#[derive(Clone)]
pub struct ElasticsearchClient {
    base_url: String,
    log_index: String,
    runbook_index: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl std::fmt::Debug for ElasticsearchClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ElasticsearchClient")
            .field("base_url", &self.base_url)
            .field("log_index", &self.log_index)
            .field("runbook_index", &self.runbook_index)
            .field("api_key", &self.api_key.is_some())
            .finish()
    }
}

impl ElasticsearchClient {
    /// Create a new client. Without an API key the client accepts
    /// self-signed certificates, matching local development clusters.
    pub fn new(config: &ElasticsearchConfig, api_key: Option<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .pool_max_idle_per_host(10)
            .danger_accept_invalid_certs(api_key.is_none())
            .build()
            .map_err(|e| Error::backend(format!("failed to build http client: {e}")))?;

        Ok(Self {
            base_url: config.url.trim_end_matches('/').to_string(),
            log_index: config.log_index.clone(),
            runbook_index: config.runbook_index.clone(),
            api_key,
            client,
        })
    }

    /// POST a JSON body to `{base_url}/{path}` and return the parsed
    /// response. One retry on transient failure.
    async fn post_json(&self, path: &str, body: &Value) -> Result<Value> {
        match self.post_json_once(path, body).await {
            Err(e) if e.is_transient() => {
                debug!(path, error = %e, "retrying transient backend failure");
                self.post_json_once(path, body).await
            }
            other => other,
        }
    }

    async fn post_json_once(&self, path: &str, body: &Value) -> Result<Value> {
        let url = format!("{}/{path}", self.base_url);
        let mut request = self.client.post(&url).json(body);
        if let Some(key) = &self.api_key {
            request = request.header("Authorization", format!("ApiKey {key}"));
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() || e.is_connect() {
                Error::backend_transient(format!("{url}: {e}"))
            } else {
                Error::backend(format!("{url}: {e}"))
            }
        })?;

        let status = response.status();
        if status.is_server_error() {
            return Err(Error::backend_transient(format!("{url}: status {status}")));
        }
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(Error::backend(format!("{url}: status {status}: {detail}")));
        }

        response
            .json::<Value>()
            .await
            .map_err(|e| Error::backend(format!("{url}: invalid response body: {e}")))
    }

    fn range_filter(range: TimeRange) -> Value {
        json!({
            "range": {
                "@timestamp": {
                    "gte": range.start.to_rfc3339(),
                    "lte": range.end.to_rfc3339(),
                }
            }
        })
    }

    fn metric_filters(service: &str, metric: MetricKind, range: TimeRange) -> Vec<Value> {
        let mut filters = vec![
            json!({ "term": { "service.name": service } }),
            Self::range_filter(range),
        ];
        match metric {
            MetricKind::ErrorRate => filters.push(json!({ "term": { "level": "error" } })),
            MetricKind::LatencyP99 => filters.push(json!({ "exists": { "field": "duration_ms" } })),
        }
        filters
    }
}

#[async_trait]
impl ObservabilityBackend for ElasticsearchClient {
    async fn ping(&self) -> Result<()> {
        let url = format!("{}/", self.base_url);
        let mut request = self.client.get(&url);
        if let Some(key) = &self.api_key {
            request = request.header("Authorization", format!("ApiKey {key}"));
        }

        let response = request
            .send()
            .await
            .map_err(|e| Error::backend_transient(format!("{url}: {e}")))?;
        if response.status() != StatusCode::OK {
            return Err(Error::backend(format!(
                "{url}: status {}",
                response.status()
            )));
        }
        Ok(())
    }

    async fn active_services(&self, range: TimeRange) -> Result<Vec<String>> {
        let body = json!({
            "size": 0,
            "query": Self::range_filter(range),
            "aggs": {
                "services": {
                    "terms": { "field": "service.name", "size": MAX_DISCOVERED_SERVICES }
                }
            }
        });

        let response = self
            .post_json(&format!("{}/_search", self.log_index), &body)
            .await?;
        let buckets = response
            .pointer("/aggregations/services/buckets")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        let mut services: Vec<String> = buckets
            .iter()
            .filter_map(|b| b.get("key").and_then(Value::as_str).map(str::to_string))
            .collect();
        services.sort_unstable();
        Ok(services)
    }

    async fn metric_value(
        &self,
        service: &str,
        metric: MetricKind,
        range: TimeRange,
    ) -> Result<Option<f64>> {
        match metric {
            MetricKind::ErrorRate => {
                let body = json!({
                    "query": { "bool": { "filter": Self::metric_filters(service, metric, range) } }
                });
                let response = self
                    .post_json(&format!("{}/_count", self.log_index), &body)
                    .await?;
                let count = response.get("count").and_then(Value::as_f64).ok_or_else(|| {
                    Error::malformed("count response missing numeric `count`")
                })?;
                Ok(Some(count))
            }
            MetricKind::LatencyP99 => {
                let body = json!({
                    "size": 0,
                    "query": { "bool": { "filter": Self::metric_filters(service, metric, range) } },
                    "aggs": {
                        "latency": {
                            "percentiles": { "field": "duration_ms", "percents": [99] }
                        }
                    }
                });
                let response = self
                    .post_json(&format!("{}/_search", self.log_index), &body)
                    .await?;
                Ok(response
                    .pointer("/aggregations/latency/values/99.0")
                    .and_then(Value::as_f64))
            }
        }
    }

    async fn metric_series(
        &self,
        service: &str,
        metric: MetricKind,
        range: TimeRange,
    ) -> Result<Vec<SeriesPoint>> {
        let mut histogram = json!({
            "date_histogram": {
                "field": "@timestamp",
                "fixed_interval": "1m",
                "min_doc_count": 0,
                "extended_bounds": {
                    "min": range.start.timestamp_millis(),
                    "max": range.end.timestamp_millis(),
                }
            }
        });
        if metric == MetricKind::LatencyP99 {
            histogram["aggs"] = json!({
                "latency": {
                    "percentiles": { "field": "duration_ms", "percents": [99] }
                }
            });
        }

        let body = json!({
            "size": 0,
            "query": { "bool": { "filter": Self::metric_filters(service, metric, range) } },
            "aggs": { "over_time": histogram }
        });

        let response = self
            .post_json(&format!("{}/_search", self.log_index), &body)
            .await?;
        let buckets = response
            .pointer("/aggregations/over_time/buckets")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        let mut series = Vec::with_capacity(buckets.len());
        for bucket in &buckets {
            let Some(millis) = bucket.get("key").and_then(Value::as_i64) else {
                warn!(service, metric = %metric, "histogram bucket without key, skipping");
                continue;
            };
            let Some(minute) = DateTime::<Utc>::from_timestamp_millis(millis) else {
                warn!(service, metric = %metric, millis, "unrepresentable bucket key, skipping");
                continue;
            };

            let value = match metric {
                MetricKind::ErrorRate => bucket.get("doc_count").and_then(Value::as_f64),
                MetricKind::LatencyP99 => bucket.pointer("/latency/values/99.0").and_then(Value::as_f64),
            };
            series.push(SeriesPoint { minute, value });
        }
        debug!(service, metric = %metric, buckets = series.len(), "fetched metric series");
        Ok(series)
    }

    async fn events(
        &self,
        range: TimeRange,
        levels: &[EventLevel],
        limit: usize,
    ) -> Result<Vec<LogEvent>> {
        let levels: Vec<&str> = levels.iter().map(EventLevel::as_str).collect();
        let body = json!({
            "size": limit,
            "query": {
                "bool": {
                    "filter": [
                        Self::range_filter(range),
                        { "terms": { "level": levels } },
                    ]
                }
            },
            "sort": [{ "@timestamp": "asc" }]
        });

        let response = self
            .post_json(&format!("{}/_search", self.log_index), &body)
            .await?;
        let hits = response
            .pointer("/hits/hits")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        let mut events = Vec::with_capacity(hits.len());
        for hit in &hits {
            let Some(source) = hit.get("_source") else {
                continue;
            };
            match parse_log_hit(source) {
                Ok(event) => events.push(event),
                Err(e) => warn!(error = %e, "skipping malformed log document"),
            }
        }
        Ok(events)
    }

    async fn search_runbooks(
        &self,
        services: &[String],
        keywords: &[String],
        limit: usize,
    ) -> Result<Vec<RunbookMatch>> {
        let mut should: Vec<Value> = Vec::new();
        if !services.is_empty() {
            should.push(json!({ "terms": { "services_affected": services } }));
        }
        for keyword in keywords.iter().take(10) {
            should.push(json!({ "match": { "root_cause": keyword } }));
            should.push(json!({ "match": { "tags": keyword } }));
        }
        if should.is_empty() {
            return Ok(vec![]);
        }

        let body = json!({
            "size": limit,
            "query": { "bool": { "should": should, "minimum_should_match": 1 } },
            "sort": [{ "_score": "desc" }]
        });

        let response = self
            .post_json(&format!("{}/_search", self.runbook_index), &body)
            .await?;
        let hits = response
            .pointer("/hits/hits")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        let mut runbooks = Vec::with_capacity(hits.len());
        for hit in &hits {
            let score = hit.get("_score").and_then(Value::as_f64).unwrap_or(0.0);
            let Some(source) = hit.get("_source") else {
                continue;
            };
            match parse_runbook_hit(source, score) {
                Ok(runbook) => runbooks.push(runbook),
                Err(e) => warn!(error = %e, "skipping malformed runbook document"),
            }
        }
        Ok(runbooks)
    }
}

/// Interpret one log-index `_source` document.
fn parse_log_hit(source: &Value) -> Result<LogEvent> {
    let timestamp = source
        .get("@timestamp")
        .and_then(Value::as_str)
        .ok_or_else(|| Error::malformed("log document missing @timestamp"))?;
    let timestamp = DateTime::parse_from_rfc3339(timestamp)
        .map_err(|e| Error::malformed(format!("unparseable @timestamp: {e}")))?
        .with_timezone(&Utc);

    let service = source
        .pointer("/service/name")
        .or_else(|| source.get("service.name"))
        .or_else(|| source.get("service"))
        .and_then(Value::as_str)
        .unwrap_or("unknown")
        .to_string();

    let level = source
        .get("level")
        .cloned()
        .map(serde_json::from_value::<EventLevel>)
        .transpose()
        .map_err(|e| Error::malformed(format!("unparseable level: {e}")))?
        .unwrap_or(EventLevel::Info);

    let message = source
        .get("message")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    let trace_id = source
        .pointer("/trace/id")
        .or_else(|| source.get("trace.id"))
        .and_then(Value::as_str)
        .map(str::to_string);

    let status_code = source
        .get("status_code")
        .and_then(Value::as_u64)
        .and_then(|c| u16::try_from(c).ok());

    Ok(LogEvent {
        timestamp,
        service,
        level,
        message,
        trace_id,
        status_code,
    })
}

/// Interpret one runbook-index `_source` document.
fn parse_runbook_hit(source: &Value, score: f64) -> Result<RunbookMatch> {
    let title = source
        .get("title")
        .and_then(Value::as_str)
        .unwrap_or("Untitled")
        .to_string();

    let incident_date = source
        .get("incident_date")
        .and_then(Value::as_str)
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|d| d.with_timezone(&Utc));

    let string_list = |key: &str| -> Vec<String> {
        source
            .get(key)
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    };

    Ok(RunbookMatch {
        title,
        incident_date,
        services_affected: string_list("services_affected"),
        root_cause: source
            .get("root_cause")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        resolution_steps: string_list("resolution_steps"),
        tags: string_list("tags"),
        score,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_nested_and_flat_service_names() {
        let nested = json!({
            "@timestamp": "2025-06-01T12:00:00Z",
            "service": { "name": "payment-service" },
            "level": "error",
            "message": "boom",
        });
        let flat = json!({
            "@timestamp": "2025-06-01T12:00:00Z",
            "service.name": "order-service",
            "level": "warning",
            "message": "slow",
            "trace.id": "t-1",
            "status_code": 503,
        });

        let a = parse_log_hit(&nested).unwrap();
        assert_eq!(a.service, "payment-service");
        assert_eq!(a.level, EventLevel::Error);

        let b = parse_log_hit(&flat).unwrap();
        assert_eq!(b.service, "order-service");
        assert_eq!(b.level, EventLevel::Warn);
        assert_eq!(b.trace_id.as_deref(), Some("t-1"));
        assert_eq!(b.status_code, Some(503));
    }

    #[test]
    fn missing_timestamp_is_malformed() {
        let source = json!({ "service": "x", "level": "error", "message": "m" });
        assert!(matches!(
            parse_log_hit(&source),
            Err(Error::MalformedDocument(_))
        ));
    }

    #[test]
    fn runbook_hit_defaults_missing_fields() {
        let source = json!({ "title": "Payment DB failover" });
        let runbook = parse_runbook_hit(&source, 7.5).unwrap();
        assert_eq!(runbook.title, "Payment DB failover");
        assert_eq!(runbook.score, 7.5);
        assert!(runbook.resolution_steps.is_empty());
        assert!(runbook.incident_date.is_none());
    }
}
