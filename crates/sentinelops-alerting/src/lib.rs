//! # SentinelOps Alerting
//!
//! Outbound notification channels and their dispatch policy:
//!
//! - [`SlackNotifier`] — chat channel, invoked for every new incident
//! - [`PagerDutyNotifier`] — paging channel, high severities only
//! - [`NotifierSet`] — ordered, best-effort fan-out (chat, then page)
//!
//! Notifier failures are logged and counted; they never fail incident
//! creation. The incident is committed to the store before either channel
//! is invoked.

#![warn(missing_debug_implementations, rust_2018_idioms)]

pub mod pagerduty;
pub mod slack;

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{error, info};

use sentinelops_core::models::Incident;
use sentinelops_core::types::Severity;
use sentinelops_core::Result;

pub use pagerduty::PagerDutyNotifier;
pub use slack::SlackNotifier;

/// One outbound notification channel.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Channel name for logs and metrics.
    fn name(&self) -> &'static str;

    /// Deliver one incident notification.
    async fn notify(&self, incident: &Incident) -> Result<()>;
}

/// The configured channels and the paging severity filter.
///
/// Either channel may be absent (its credentials were not configured);
/// dispatch order is chat then page, and a chat failure never skips the
/// page.
pub struct NotifierSet {
    chat: Option<Arc<dyn Notifier>>,
    pager: Option<Arc<dyn Notifier>>,
    paging_severities: Vec<Severity>,
}

impl std::fmt::Debug for NotifierSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotifierSet")
            .field("chat", &self.chat.as_ref().map(|n| n.name()))
            .field("pager", &self.pager.as_ref().map(|n| n.name()))
            .field("paging_severities", &self.paging_severities)
            .finish()
    }
}

impl NotifierSet {
    pub fn new(
        chat: Option<Arc<dyn Notifier>>,
        pager: Option<Arc<dyn Notifier>>,
        paging_severities: Vec<Severity>,
    ) -> Self {
        Self {
            chat,
            pager,
            paging_severities,
        }
    }

    /// Fan out notifications for a newly created incident, best-effort.
    pub async fn dispatch(&self, incident: &Incident) {
        if let Some(chat) = &self.chat {
            self.send(chat.as_ref(), incident).await;
        }

        if self.paging_severities.contains(&incident.severity) {
            if let Some(pager) = &self.pager {
                self.send(pager.as_ref(), incident).await;
            }
        }
    }

    async fn send(&self, notifier: &dyn Notifier, incident: &Incident) {
        match notifier.notify(incident).await {
            Ok(()) => {
                info!(
                    channel = notifier.name(),
                    incident_id = %incident.id,
                    "notification sent"
                );
            }
            Err(e) => {
                ::metrics::counter!("sentinelops_notifier_failures_total").increment(1);
                error!(
                    channel = notifier.name(),
                    incident_id = %incident.id,
                    error = %e,
                    "notification failed"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use sentinelops_core::models::Anomaly;
    use sentinelops_core::types::{DedupKey, IncidentStatus, MetricKind};
    use sentinelops_core::Error;
    use std::sync::Mutex;

    struct Recording {
        name: &'static str,
        calls: Arc<Mutex<Vec<&'static str>>>,
        fail: bool,
    }

    #[async_trait]
    impl Notifier for Recording {
        fn name(&self) -> &'static str {
            self.name
        }

        async fn notify(&self, _incident: &Incident) -> Result<()> {
            self.calls.lock().unwrap().push(self.name);
            if self.fail {
                return Err(Error::notifier(self.name, "mock failure"));
            }
            Ok(())
        }
    }

    fn incident(severity: Severity) -> Incident {
        Incident {
            id: "INC-20250601120000".to_string(),
            created_at: Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap(),
            severity,
            title: "test incident".to_string(),
            services: vec!["payment".to_string()],
            anomalies: vec![Anomaly {
                service: "payment".to_string(),
                metric: MetricKind::ErrorRate,
                current_value: 50.0,
                baseline_mean: 2.0,
                baseline_stddev: 1.0,
                z_score: 48.0,
                severity,
                detected_at: Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap(),
                sample_count: None,
            }],
            correlated_events: vec![],
            matched_runbooks: vec![],
            analysis: None,
            dedup_key: DedupKey::compute(
                &["payment".to_string()],
                &[MetricKind::ErrorRate],
                severity,
            ),
            status: IncidentStatus::Active,
        }
    }

    fn set_with(
        calls: &Arc<Mutex<Vec<&'static str>>>,
        chat_fails: bool,
        severities: Vec<Severity>,
    ) -> NotifierSet {
        NotifierSet::new(
            Some(Arc::new(Recording {
                name: "slack",
                calls: calls.clone(),
                fail: chat_fails,
            })),
            Some(Arc::new(Recording {
                name: "pagerduty",
                calls: calls.clone(),
                fail: false,
            })),
            severities,
        )
    }

    #[tokio::test]
    async fn pages_only_for_configured_severities() {
        let calls = Arc::new(Mutex::new(vec![]));
        let set = set_with(&calls, false, vec![Severity::P1, Severity::P2]);

        set.dispatch(&incident(Severity::P3)).await;
        assert_eq!(*calls.lock().unwrap(), vec!["slack"]);

        calls.lock().unwrap().clear();
        set.dispatch(&incident(Severity::P1)).await;
        assert_eq!(*calls.lock().unwrap(), vec!["slack", "pagerduty"]);
    }

    #[tokio::test]
    async fn chat_failure_does_not_skip_page() {
        let calls = Arc::new(Mutex::new(vec![]));
        let set = set_with(&calls, true, vec![Severity::P1]);

        set.dispatch(&incident(Severity::P1)).await;
        assert_eq!(*calls.lock().unwrap(), vec!["slack", "pagerduty"]);
    }

    #[tokio::test]
    async fn absent_channels_are_skipped() {
        let set = NotifierSet::new(None, None, vec![Severity::P1]);
        // Nothing to assert beyond "does not panic".
        set.dispatch(&incident(Severity::P1)).await;
    }
}
