//! Rolling-baseline anomaly detection.
//!
//! For every active service and monitored metric, the most recent lookback
//! window is compared against per-minute baseline statistics from the window
//! that ends where the lookback begins. Per-service checks fan out
//! concurrently; results are returned in deterministic (service, metric)
//! order.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, info, warn};

use sentinelops_core::config::{Config, Thresholds};
use sentinelops_core::models::Anomaly;
use sentinelops_core::types::MetricKind;
use sentinelops_core::{Error, Result};
use sentinelops_ingestion::{ObservabilityBackend, TimeRange};

use crate::stats;

/// Per-tick anomaly detector. Stateless between ticks.
pub struct Detector {
    backend: Arc<dyn ObservabilityBackend>,
    thresholds: Thresholds,
    baseline_window_minutes: u32,
    lookback_minutes: u32,
    min_data_points: usize,
}

impl std::fmt::Debug for Detector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Detector")
            .field("baseline_window_minutes", &self.baseline_window_minutes)
            .field("lookback_minutes", &self.lookback_minutes)
            .field("min_data_points", &self.min_data_points)
            .finish()
    }
}

impl Detector {
    pub fn new(config: &Config, backend: Arc<dyn ObservabilityBackend>) -> Self {
        Self {
            backend,
            thresholds: config.detection.thresholds.clone(),
            baseline_window_minutes: config.detection.baseline_window_minutes,
            lookback_minutes: config.polling.lookback_minutes,
            min_data_points: config.detection.min_data_points,
        }
    }

    /// Run all detection checks for the tick anchored at `now`.
    ///
    /// A failed check for one service-metric pair is logged and skipped; the
    /// call only errors when every single check failed, which signals a
    /// complete backend outage and aborts the tick.
    pub async fn detect(&self, now: DateTime<Utc>) -> Result<Vec<Anomaly>> {
        let lookback = TimeRange::ending_at(now, self.lookback_minutes);
        let baseline = TimeRange::ending_at(lookback.start, self.baseline_window_minutes);
        let discovery = TimeRange {
            start: baseline.start,
            end: now,
        };

        let services = self.backend.active_services(discovery).await?;
        info!(services = services.len(), "detection cycle started");

        let checks: Vec<(String, MetricKind)> = services
            .iter()
            .flat_map(|service| {
                MetricKind::ALL
                    .iter()
                    .map(move |metric| (service.clone(), *metric))
            })
            .collect();

        let results = futures::future::join_all(checks.into_iter().map(
            |(service, metric)| async move {
                let outcome = self.check_metric(&service, metric, lookback, baseline).await;
                (service, metric, outcome)
            },
        ))
        .await;

        let total = results.len();
        let mut failures = 0usize;
        let mut anomalies = Vec::new();
        for (service, metric, outcome) in results {
            match outcome {
                Ok(Some(anomaly)) => anomalies.push(anomaly),
                Ok(None) => {}
                Err(e) => {
                    failures += 1;
                    warn!(service, metric = %metric, error = %e, "metric check failed, skipping");
                }
            }
        }

        if total > 0 && failures == total {
            return Err(Error::backend("all detection queries failed"));
        }

        anomalies.sort_by(|a, b| (a.service.as_str(), a.metric).cmp(&(b.service.as_str(), b.metric)));
        info!(anomalies = anomalies.len(), "detection cycle complete");
        Ok(anomalies)
    }

    async fn check_metric(
        &self,
        service: &str,
        metric: MetricKind,
        lookback: TimeRange,
        baseline: TimeRange,
    ) -> Result<Option<Anomaly>> {
        let series = self.backend.metric_series(service, metric, baseline).await?;
        let values: Vec<f64> = series.iter().filter_map(|point| point.value).collect();

        if values.len() < self.min_data_points {
            debug!(
                service,
                metric = %metric,
                data_points = values.len(),
                "insufficient baseline data, skipping"
            );
            return Ok(None);
        }

        let Some((mean, stddev)) = stats::mean_stddev(&values) else {
            return Ok(None);
        };
        if stddev == 0.0 {
            debug!(service, metric = %metric, "flat baseline, skipping");
            return Ok(None);
        }

        let Some(current) = self.backend.metric_value(service, metric, lookback).await? else {
            return Ok(None);
        };

        let z = stats::z_score(current, mean, stddev);
        let Some(severity) = self.thresholds.severity_for(z) else {
            return Ok(None);
        };

        warn!(
            service,
            metric = %metric,
            z_score = stats::round2(z),
            severity = %severity,
            "anomaly detected"
        );

        Ok(Some(Anomaly {
            service: service.to_string(),
            metric,
            current_value: current,
            baseline_mean: stats::round2(mean),
            baseline_stddev: stats::round2(stddev),
            z_score: stats::round2(z),
            severity,
            detected_at: lookback.end,
            sample_count: Some(values.len()),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::{Duration, TimeZone};
    use sentinelops_core::models::{LogEvent, RunbookMatch};
    use sentinelops_core::types::{EventLevel, Severity};
    use sentinelops_ingestion::SeriesPoint;
    use std::collections::{HashMap, HashSet};

    #[derive(Default)]
    struct MockBackend {
        services: Vec<String>,
        series: HashMap<(String, MetricKind), Vec<SeriesPoint>>,
        values: HashMap<(String, MetricKind), Option<f64>>,
        failing: HashSet<(String, MetricKind)>,
    }

    impl MockBackend {
        fn with_service(mut self, service: &str) -> Self {
            self.services.push(service.to_string());
            self
        }

        /// Baseline of alternating 1.0/3.0 buckets: mean 2.0, stddev 1.0.
        fn with_spiky_baseline(mut self, service: &str, metric: MetricKind, current: f64) -> Self {
            let start = Utc.with_ymd_and_hms(2025, 6, 1, 11, 0, 0).unwrap();
            let series = (0..60)
                .map(|i| SeriesPoint {
                    minute: start + Duration::minutes(i),
                    value: Some(if i % 2 == 0 { 1.0 } else { 3.0 }),
                })
                .collect();
            self.series.insert((service.to_string(), metric), series);
            self.values.insert((service.to_string(), metric), Some(current));
            self
        }

        fn with_failure(mut self, service: &str, metric: MetricKind) -> Self {
            self.failing.insert((service.to_string(), metric));
            self
        }
    }

    #[async_trait]
    impl ObservabilityBackend for MockBackend {
        async fn ping(&self) -> Result<()> {
            Ok(())
        }

        async fn active_services(&self, _range: TimeRange) -> Result<Vec<String>> {
            Ok(self.services.clone())
        }

        async fn metric_value(
            &self,
            service: &str,
            metric: MetricKind,
            _range: TimeRange,
        ) -> Result<Option<f64>> {
            Ok(self
                .values
                .get(&(service.to_string(), metric))
                .copied()
                .flatten())
        }

        async fn metric_series(
            &self,
            service: &str,
            metric: MetricKind,
            _range: TimeRange,
        ) -> Result<Vec<SeriesPoint>> {
            if self.failing.contains(&(service.to_string(), metric)) {
                return Err(Error::backend("mock failure"));
            }
            Ok(self
                .series
                .get(&(service.to_string(), metric))
                .cloned()
                .unwrap_or_default())
        }

        async fn events(
            &self,
            _range: TimeRange,
            _levels: &[EventLevel],
            _limit: usize,
        ) -> Result<Vec<LogEvent>> {
            Ok(vec![])
        }

        async fn search_runbooks(
            &self,
            _services: &[String],
            _keywords: &[String],
            _limit: usize,
        ) -> Result<Vec<RunbookMatch>> {
            Ok(vec![])
        }
    }

    fn detector(backend: MockBackend) -> Detector {
        Detector::new(&Config::default(), Arc::new(backend))
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn p1_spike_yields_z_score_48() {
        let backend = MockBackend::default()
            .with_service("payment-service")
            .with_spiky_baseline("payment-service", MetricKind::ErrorRate, 50.0);

        let anomalies = detector(backend).detect(now()).await.unwrap();
        assert_eq!(anomalies.len(), 1);

        let anomaly = &anomalies[0];
        assert_eq!(anomaly.service, "payment-service");
        assert_eq!(anomaly.metric, MetricKind::ErrorRate);
        assert!((anomaly.z_score - 48.0).abs() < 0.01);
        assert_eq!(anomaly.severity, Severity::P1);
        assert_eq!(anomaly.sample_count, Some(60));
    }

    #[tokio::test]
    async fn negative_deviation_is_not_anomalous() {
        let backend = MockBackend::default()
            .with_service("payment-service")
            .with_spiky_baseline("payment-service", MetricKind::ErrorRate, 0.0);

        let anomalies = detector(backend).detect(now()).await.unwrap();
        assert!(anomalies.is_empty());
    }

    #[tokio::test]
    async fn insufficient_baseline_is_skipped() {
        let start = Utc.with_ymd_and_hms(2025, 6, 1, 11, 0, 0).unwrap();
        let mut backend = MockBackend::default().with_service("quiet-service");
        // 6 non-null buckets out of 60, below the default min of 10.
        let series: Vec<SeriesPoint> = (0..60)
            .map(|i| SeriesPoint {
                minute: start + Duration::minutes(i),
                value: (i < 6).then_some(if i % 2 == 0 { 1.0 } else { 3.0 }),
            })
            .collect();
        backend
            .series
            .insert(("quiet-service".to_string(), MetricKind::ErrorRate), series);
        backend
            .values
            .insert(("quiet-service".to_string(), MetricKind::ErrorRate), Some(100.0));

        let anomalies = detector(backend).detect(now()).await.unwrap();
        assert!(anomalies.is_empty());
    }

    #[tokio::test]
    async fn flat_baseline_is_skipped() {
        let start = Utc.with_ymd_and_hms(2025, 6, 1, 11, 0, 0).unwrap();
        let mut backend = MockBackend::default().with_service("steady-service");
        let series: Vec<SeriesPoint> = (0..60)
            .map(|i| SeriesPoint {
                minute: start + Duration::minutes(i),
                value: Some(2.0),
            })
            .collect();
        backend
            .series
            .insert(("steady-service".to_string(), MetricKind::ErrorRate), series);
        backend
            .values
            .insert(("steady-service".to_string(), MetricKind::ErrorRate), Some(100.0));

        let anomalies = detector(backend).detect(now()).await.unwrap();
        assert!(anomalies.is_empty());
    }

    #[tokio::test]
    async fn results_are_ordered_by_service_then_metric() {
        let backend = MockBackend::default()
            .with_service("zeta")
            .with_service("alpha")
            .with_spiky_baseline("zeta", MetricKind::ErrorRate, 50.0)
            .with_spiky_baseline("alpha", MetricKind::LatencyP99, 50.0)
            .with_spiky_baseline("alpha", MetricKind::ErrorRate, 50.0);

        let anomalies = detector(backend).detect(now()).await.unwrap();
        let order: Vec<(String, MetricKind)> = anomalies
            .iter()
            .map(|a| (a.service.clone(), a.metric))
            .collect();
        assert_eq!(
            order,
            vec![
                ("alpha".to_string(), MetricKind::ErrorRate),
                ("alpha".to_string(), MetricKind::LatencyP99),
                ("zeta".to_string(), MetricKind::ErrorRate),
            ]
        );
    }

    #[tokio::test]
    async fn single_failed_check_is_skipped() {
        let backend = MockBackend::default()
            .with_service("payment-service")
            .with_spiky_baseline("payment-service", MetricKind::ErrorRate, 50.0)
            .with_failure("payment-service", MetricKind::LatencyP99);

        let anomalies = detector(backend).detect(now()).await.unwrap();
        assert_eq!(anomalies.len(), 1);
        assert_eq!(anomalies[0].metric, MetricKind::ErrorRate);
    }

    #[tokio::test]
    async fn complete_outage_aborts_the_tick() {
        let backend = MockBackend::default()
            .with_service("payment-service")
            .with_failure("payment-service", MetricKind::ErrorRate)
            .with_failure("payment-service", MetricKind::LatencyP99);

        let result = detector(backend).detect(now()).await;
        assert!(matches!(result, Err(Error::Backend { .. })));
    }
}
