//! Closed domain sums: severities, metric kinds, event levels, and the
//! deduplication key.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

use crate::{Error, Result};

/// Incident severity, `P1` being the worst.
///
/// Variants are declared in ascending order so that `Ord`/`max` picks the
/// most severe level when folding over a set of anomalies.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum Severity {
    /// Minor deviation, tracked but rarely actionable on its own.
    P4,
    /// Noticeable degradation.
    P3,
    /// Major degradation, usually pageable.
    P2,
    /// Critical, outage-level deviation.
    P1,
}

impl Severity {
    /// Stable string form (`"P1"`..`"P4"`).
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::P1 => "P1",
            Severity::P2 => "P2",
            Severity::P3 => "P3",
            Severity::P4 => "P4",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Severity {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "P1" | "p1" => Ok(Severity::P1),
            "P2" | "p2" => Ok(Severity::P2),
            "P3" | "p3" => Ok(Severity::P3),
            "P4" | "p4" => Ok(Severity::P4),
            other => Err(Error::config(format!("unknown severity: {other}"))),
        }
    }
}

/// Metric kinds the detector evaluates per service.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    /// Count of `level=error` log documents in the window.
    ErrorRate,
    /// 99th percentile of `duration_ms` in the window.
    LatencyP99,
}

impl MetricKind {
    /// All monitored metrics, in the deterministic evaluation order.
    pub const ALL: [MetricKind; 2] = [MetricKind::ErrorRate, MetricKind::LatencyP99];

    /// Stable string form used in queries, dedup keys, and titles.
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricKind::ErrorRate => "error_rate",
            MetricKind::LatencyP99 => "latency_p99",
        }
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Log level of a correlated event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventLevel {
    Error,
    /// Accepts both `warn` and `warning` on the wire.
    #[serde(alias = "warning")]
    Warn,
    Info,
}

impl EventLevel {
    /// Wire form as stored in the log index.
    pub fn as_str(&self) -> &'static str {
        match self {
            EventLevel::Error => "error",
            EventLevel::Warn => "warning",
            EventLevel::Info => "info",
        }
    }
}

impl fmt::Display for EventLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Incident lifecycle status, computed lazily at store-read time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IncidentStatus {
    /// Created within the cooldown window, still matching fresh anomalies.
    Active,
    /// No matching anomaly for a full cooldown interval.
    Cooling,
}

/// Analyzer confidence in its root-cause assessment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    High,
    Medium,
    #[default]
    Low,
}

impl fmt::Display for Confidence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Confidence::High => "high",
            Confidence::Medium => "medium",
            Confidence::Low => "low",
        };
        f.write_str(s)
    }
}

/// Deterministic digest identifying incidents that should be treated as the
/// same alert.
///
/// Computed over the ordered tuple `(sorted services, sorted metrics,
/// severity)`: two anomaly groupings yielding the same key within the
/// cooldown window produce at most one emitted incident.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DedupKey(String);

impl DedupKey {
    /// Compute the key for one incident candidate.
    pub fn compute(services: &[String], metrics: &[MetricKind], severity: Severity) -> Self {
        let mut services: Vec<&str> = services.iter().map(String::as_str).collect();
        services.sort_unstable();
        services.dedup();

        let mut metrics: Vec<&str> = metrics.iter().map(MetricKind::as_str).collect();
        metrics.sort_unstable();
        metrics.dedup();

        let mut hasher = Sha256::new();
        for service in &services {
            hasher.update(service.as_bytes());
            hasher.update(b":");
        }
        for metric in &metrics {
            hasher.update(metric.as_bytes());
            hasher.update(b":");
        }
        hasher.update(severity.as_str().as_bytes());

        let digest = format!("{:x}", hasher.finalize());
        DedupKey(digest[..16].to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DedupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
