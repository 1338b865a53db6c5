//! The observability backend contract.
//!
//! The pipeline consumes exactly three kinds of data: distinct active
//! services, per-minute metric series, and level-filtered raw events — plus
//! the runbook index search. Everything is abstract over wire format.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sentinelops_core::models::{LogEvent, RunbookMatch};
use sentinelops_core::types::{EventLevel, MetricKind};
use sentinelops_core::Result;

/// Half-open UTC time window `[start, end]` for backend queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeRange {
    /// Window of the given number of minutes ending at `end`.
    pub fn ending_at(end: DateTime<Utc>, minutes: u32) -> Self {
        TimeRange {
            start: end - Duration::minutes(i64::from(minutes)),
            end,
        }
    }

    /// Window of `minutes` on either side of `center`.
    pub fn around(center: DateTime<Utc>, minutes: u32) -> Self {
        let half = Duration::minutes(i64::from(minutes));
        TimeRange {
            start: center - half,
            end: center + half,
        }
    }
}

/// One per-minute bucket of a metric series. `value` is `None` when the
/// bucket holds no data for the metric (e.g. a percentile over zero
/// documents).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SeriesPoint {
    pub minute: DateTime<Utc>,
    pub value: Option<f64>,
}

/// Read operations the pipeline needs from the observability backend.
///
/// Implementations retry transient failures once per call; persistent
/// failures surface as `Error::Backend` for the caller to skip or abort on.
#[async_trait]
pub trait ObservabilityBackend: Send + Sync {
    /// Startup connectivity check.
    async fn ping(&self) -> Result<()>;

    /// Distinct service identifiers with any log activity in the window.
    async fn active_services(&self, range: TimeRange) -> Result<Vec<String>>;

    /// Aggregate value of one metric for one service over the window.
    ///
    /// `None` means the backend holds no data to aggregate (an error count
    /// is always `Some`, possibly zero; a latency percentile over zero
    /// documents is `None`).
    async fn metric_value(
        &self,
        service: &str,
        metric: MetricKind,
        range: TimeRange,
    ) -> Result<Option<f64>>;

    /// One-minute-bucketed series of one metric for one service.
    async fn metric_series(
        &self,
        service: &str,
        metric: MetricKind,
        range: TimeRange,
    ) -> Result<Vec<SeriesPoint>>;

    /// Raw events in the window matching any of the given levels, ordered by
    /// timestamp ascending, truncated to `limit`.
    async fn events(
        &self,
        range: TimeRange,
        levels: &[EventLevel],
        limit: usize,
    ) -> Result<Vec<LogEvent>>;

    /// Runbook entries whose affected services or tags match, scored by
    /// backend relevance, at most `limit`.
    async fn search_runbooks(
        &self,
        services: &[String],
        keywords: &[String],
        limit: usize,
    ) -> Result<Vec<RunbookMatch>>;
}
