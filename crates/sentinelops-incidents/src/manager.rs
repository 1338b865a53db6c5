//! Incident creation.
//!
//! Groups a tick's anomalies into candidates, suppresses duplicates against
//! the store, runs the analyzer for each surviving candidate, allocates ids,
//! commits to the store, and fans out notifications. The store write is the
//! final synchronous act before notification, so a cancelled tick never
//! leaves partial incident state behind.

use chrono::{DateTime, Duration, Utc};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::Arc;
use tracing::{info, warn};

use sentinelops_alerting::NotifierSet;
use sentinelops_core::config::Config;
use sentinelops_core::models::{Anomaly, CorrelatedEvent, Incident, RunbookMatch};
use sentinelops_core::types::{DedupKey, IncidentStatus, MetricKind, Severity};
use sentinelops_detection::Analyzer;

use crate::store::IncidentStore;

/// One incident candidate: a group of anomalies plus the correlated events
/// attached to it.
#[derive(Debug, Clone)]
struct Candidate {
    anomalies: Vec<Anomaly>,
    events: Vec<CorrelatedEvent>,
}

/// Creates deduplicated incidents from a tick's detection output.
pub struct IncidentManager {
    store: Arc<IncidentStore>,
    analyzer: Arc<dyn Analyzer>,
    notifiers: Arc<NotifierSet>,
    dedup_cooldown: Duration,
}

impl std::fmt::Debug for IncidentManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IncidentManager")
            .field("dedup_cooldown", &self.dedup_cooldown)
            .finish()
    }
}

impl IncidentManager {
    pub fn new(
        config: &Config,
        store: Arc<IncidentStore>,
        analyzer: Arc<dyn Analyzer>,
        notifiers: Arc<NotifierSet>,
    ) -> Self {
        Self {
            store,
            analyzer,
            notifiers,
            dedup_cooldown: Duration::minutes(i64::from(config.incidents.dedup_cooldown_minutes)),
        }
    }

    /// Turn one tick's anomalies into zero or more incidents.
    ///
    /// Candidates are processed in deterministic order; the analyzer runs
    /// sequentially (one in-flight model request per tick). Returns the
    /// incidents created this tick.
    pub async fn process(
        &self,
        anomalies: Vec<Anomaly>,
        events: Vec<CorrelatedEvent>,
        runbooks: Vec<RunbookMatch>,
    ) -> Vec<Incident> {
        let mut created = Vec::new();

        for candidate in group_candidates(anomalies, events) {
            let Some(severity) = candidate.anomalies.iter().map(|a| a.severity).max() else {
                continue;
            };
            let services = unique_services(&candidate.anomalies);
            let metrics = unique_metrics(&candidate.anomalies);
            let dedup_key = DedupKey::compute(&services, &metrics, severity);

            if let Some(existing) = self
                .store
                .find_active_by_dedup_key(&dedup_key, self.dedup_cooldown)
            {
                ::metrics::counter!("sentinelops_incidents_deduplicated_total").increment(1);
                self.store.touch(&dedup_key);
                info!(
                    dedup_key = %dedup_key,
                    suppressed_by = %existing.id,
                    "duplicate incident suppressed within cooldown"
                );
                continue;
            }

            let analysis = self
                .analyzer
                .analyze(&candidate.anomalies, &candidate.events, &runbooks)
                .await;
            let title = analysis
                .as_ref()
                .map(|a| a.summary.clone())
                .unwrap_or_else(|| fallback_title(severity, &metrics, &services));

            let created_at = Utc::now();
            let mut incident = Incident {
                id: self.allocate_id(created_at),
                created_at,
                severity,
                title,
                services,
                anomalies: candidate.anomalies,
                correlated_events: candidate.events,
                matched_runbooks: runbooks.clone(),
                analysis,
                dedup_key,
                status: IncidentStatus::Active,
            };

            // The store rejects id collisions; re-allocation is the caller's
            // job per its contract.
            while !self.store.put(incident.clone()) {
                warn!(incident_id = %incident.id, "incident id collided on insert, re-allocating");
                incident.id = self.allocate_id(Utc::now());
            }

            ::metrics::counter!("sentinelops_incidents_created_total").increment(1);
            info!(
                incident_id = %incident.id,
                severity = %incident.severity,
                title = %incident.title,
                services = ?incident.services,
                "incident created"
            );
            self.notifiers.dispatch(&incident).await;
            created.push(incident);
        }

        created
    }

    /// Allocate `INC-YYYYMMDDhhmmss`, breaking same-second collisions with
    /// the smallest free `-N` suffix.
    fn allocate_id(&self, created_at: DateTime<Utc>) -> String {
        let base = format!("INC-{}", created_at.format("%Y%m%d%H%M%S"));
        if !self.store.contains_id(&base) {
            return base;
        }
        let mut n = 1u32;
        loop {
            let candidate = format!("{base}-{n}");
            if !self.store.contains_id(&candidate) {
                return candidate;
            }
            n += 1;
        }
    }
}

/// Group a tick's anomalies into incident candidates.
///
/// When the anomaly services intersect the correlated events' services, the
/// whole tick forms one candidate carrying every event. Otherwise each
/// service gets its own candidate with only its own events.
fn group_candidates(anomalies: Vec<Anomaly>, events: Vec<CorrelatedEvent>) -> Vec<Candidate> {
    if anomalies.is_empty() {
        return vec![];
    }

    let intersects = {
        let event_services: HashSet<&str> = events.iter().map(|e| e.service.as_str()).collect();
        anomalies
            .iter()
            .any(|a| event_services.contains(a.service.as_str()))
    };

    if intersects {
        return vec![Candidate { anomalies, events }];
    }

    let mut by_service: BTreeMap<String, Vec<Anomaly>> = BTreeMap::new();
    for anomaly in anomalies {
        by_service
            .entry(anomaly.service.clone())
            .or_default()
            .push(anomaly);
    }

    by_service
        .into_iter()
        .map(|(service, anomalies)| {
            let events = events
                .iter()
                .filter(|e| e.service == service)
                .cloned()
                .collect();
            Candidate { anomalies, events }
        })
        .collect()
}

fn unique_services(anomalies: &[Anomaly]) -> Vec<String> {
    anomalies
        .iter()
        .map(|a| a.service.clone())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

fn unique_metrics(anomalies: &[Anomaly]) -> Vec<MetricKind> {
    let mut metrics: Vec<MetricKind> = anomalies.iter().map(|a| a.metric).collect();
    metrics.sort_unstable();
    metrics.dedup();
    metrics
}

/// Deterministic title used when no analysis summary is available.
fn fallback_title(severity: Severity, metrics: &[MetricKind], services: &[String]) -> String {
    let metrics = metrics
        .iter()
        .map(MetricKind::as_str)
        .collect::<Vec<_>>()
        .join(", ");
    format!("{severity}: {metrics} anomaly on {}", services.join(", "))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::StoreConfig;
    use async_trait::async_trait;
    use sentinelops_core::models::Analysis;
    use sentinelops_core::types::{Confidence, EventLevel};

    struct NullAnalyzer;

    #[async_trait]
    impl Analyzer for NullAnalyzer {
        async fn analyze(
            &self,
            _anomalies: &[Anomaly],
            _events: &[CorrelatedEvent],
            _runbooks: &[RunbookMatch],
        ) -> Option<Analysis> {
            None
        }
    }

    struct CannedAnalyzer(Analysis);

    #[async_trait]
    impl Analyzer for CannedAnalyzer {
        async fn analyze(
            &self,
            _anomalies: &[Anomaly],
            _events: &[CorrelatedEvent],
            _runbooks: &[RunbookMatch],
        ) -> Option<Analysis> {
            Some(self.0.clone())
        }
    }

    fn anomaly(service: &str, metric: MetricKind, severity: Severity) -> Anomaly {
        Anomaly {
            service: service.to_string(),
            metric,
            current_value: 50.0,
            baseline_mean: 2.0,
            baseline_stddev: 1.0,
            z_score: 48.0,
            severity,
            detected_at: Utc::now(),
            sample_count: Some(60),
        }
    }

    fn event(service: &str) -> CorrelatedEvent {
        CorrelatedEvent {
            timestamp: Utc::now(),
            service: service.to_string(),
            level: EventLevel::Error,
            message: "connection refused".to_string(),
            trace_id: None,
            status_code: None,
        }
    }

    fn manager_with(analyzer: Arc<dyn Analyzer>) -> (IncidentManager, Arc<IncidentStore>) {
        let config = Config::default();
        let store = Arc::new(IncidentStore::new(StoreConfig::from_config(&config)));
        let notifiers = Arc::new(NotifierSet::new(None, None, vec![]));
        let manager = IncidentManager::new(&config, store.clone(), analyzer, notifiers);
        (manager, store)
    }

    #[tokio::test]
    async fn identical_ticks_within_cooldown_create_one_incident() {
        let (manager, store) = manager_with(Arc::new(NullAnalyzer));
        let anomalies = vec![anomaly("payment", MetricKind::ErrorRate, Severity::P1)];

        let first = manager.process(anomalies.clone(), vec![], vec![]).await;
        assert_eq!(first.len(), 1);
        assert_eq!(store.count(), 1);

        let second = manager.process(anomalies, vec![], vec![]).await;
        assert!(second.is_empty());
        assert_eq!(store.count(), 1);
    }

    #[tokio::test]
    async fn expired_cooldown_allows_a_second_incident() {
        let (manager, store) = manager_with(Arc::new(NullAnalyzer));
        let anomalies = vec![anomaly("payment", MetricKind::ErrorRate, Severity::P1)];

        // Seed an incident with the same dedup key, aged past the 30m
        // cooldown.
        let aged = Incident {
            id: "INC-aged".to_string(),
            created_at: Utc::now() - Duration::minutes(31),
            severity: Severity::P1,
            title: "aged".to_string(),
            services: vec!["payment".to_string()],
            anomalies: anomalies.clone(),
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
        assert!(store.put(aged));

        let created = manager.process(anomalies, vec![], vec![]).await;
        assert_eq!(created.len(), 1);
        assert_eq!(store.count(), 2);
    }

    #[tokio::test]
    async fn cascading_failure_forms_one_incident() {
        let (manager, store) = manager_with(Arc::new(NullAnalyzer));
        let anomalies = vec![
            anomaly("gateway", MetricKind::ErrorRate, Severity::P1),
            anomaly("order", MetricKind::ErrorRate, Severity::P1),
            anomaly("payment", MetricKind::ErrorRate, Severity::P1),
        ];
        let events: Vec<CorrelatedEvent> = ["payment", "order", "gateway"]
            .iter()
            .cycle()
            .take(40)
            .map(|s| event(s))
            .collect();

        let created = manager.process(anomalies, events, vec![]).await;
        assert_eq!(created.len(), 1);
        let incident = &created[0];
        assert_eq!(
            incident.services,
            vec!["gateway".to_string(), "order".to_string(), "payment".to_string()]
        );
        assert_eq!(incident.severity, Severity::P1);
        assert_eq!(incident.anomalies.len(), 3);
        assert_eq!(incident.correlated_events.len(), 40);
        assert_eq!(store.count(), 1);
    }

    #[tokio::test]
    async fn disjoint_events_split_candidates_per_service() {
        let (manager, _store) = manager_with(Arc::new(NullAnalyzer));
        let anomalies = vec![
            anomaly("order", MetricKind::ErrorRate, Severity::P2),
            anomaly("payment", MetricKind::ErrorRate, Severity::P1),
        ];
        // Events reference a third, unrelated service.
        let events = vec![event("search")];

        let created = manager.process(anomalies, events, vec![]).await;
        assert_eq!(created.len(), 2);
        assert_eq!(created[0].services, vec!["order".to_string()]);
        assert_eq!(created[1].services, vec!["payment".to_string()]);
        assert!(created.iter().all(|i| i.correlated_events.is_empty()));
    }

    #[tokio::test]
    async fn same_second_ids_are_unique() {
        let (manager, store) = manager_with(Arc::new(NullAnalyzer));
        let anomalies: Vec<Anomaly> = (0..5)
            .map(|i| anomaly(&format!("svc-{i}"), MetricKind::ErrorRate, Severity::P1))
            .collect();

        // Disjoint from any event service: five per-service candidates,
        // all created within the same wallclock second in practice.
        let created = manager.process(anomalies, vec![], vec![]).await;
        assert_eq!(created.len(), 5);

        let ids: HashSet<&str> = created.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids.len(), 5);
        assert_eq!(store.count(), 5);
        assert!(created.iter().all(|i| i.id.starts_with("INC-")));
    }

    #[tokio::test]
    async fn severity_is_worst_of_constituents() {
        let (manager, _store) = manager_with(Arc::new(NullAnalyzer));
        let anomalies = vec![
            anomaly("payment", MetricKind::ErrorRate, Severity::P3),
            anomaly("payment", MetricKind::LatencyP99, Severity::P1),
        ];
        let events = vec![event("payment")];

        let created = manager.process(anomalies, events, vec![]).await;
        assert_eq!(created.len(), 1);
        assert_eq!(created[0].severity, Severity::P1);
    }

    #[tokio::test]
    async fn fallback_title_is_deterministic() {
        let (manager, _store) = manager_with(Arc::new(NullAnalyzer));
        let anomalies = vec![anomaly("payment-service", MetricKind::ErrorRate, Severity::P1)];

        let created = manager.process(anomalies, vec![], vec![]).await;
        assert_eq!(created[0].title, "P1: error_rate anomaly on payment-service");
    }

    #[tokio::test]
    async fn analysis_summary_becomes_the_title() {
        let analysis = Analysis {
            summary: "Payment DB connection pool exhausted".to_string(),
            root_cause: "pool misconfiguration".to_string(),
            confidence: Confidence::High,
            affected_services: vec!["payment-service".to_string()],
            remediation_steps: vec![],
        };
        let (manager, _store) = manager_with(Arc::new(CannedAnalyzer(analysis)));
        let anomalies = vec![anomaly("payment-service", MetricKind::ErrorRate, Severity::P1)];

        let created = manager.process(anomalies, vec![], vec![]).await;
        assert_eq!(created[0].title, "Payment DB connection pool exhausted");
        assert!(created[0].analysis.is_some());
    }
}
