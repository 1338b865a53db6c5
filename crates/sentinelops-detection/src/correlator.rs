//! Cross-service event correlation.
//!
//! Given a tick's anomalies, fetches error/warning events from every service
//! in a window centered on the earliest anomaly, producing a bounded,
//! deterministically ordered list.

use std::collections::HashSet;
use std::sync::Arc;
use tracing::{info, warn};

use sentinelops_core::config::Config;
use sentinelops_core::models::{Anomaly, CorrelatedEvent};
use sentinelops_core::types::EventLevel;
use sentinelops_ingestion::{ObservabilityBackend, TimeRange};

/// Correlates anomalies with related events across services.
pub struct Correlator {
    backend: Arc<dyn ObservabilityBackend>,
    window_minutes: u32,
    max_events: usize,
}

impl std::fmt::Debug for Correlator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Correlator")
            .field("window_minutes", &self.window_minutes)
            .field("max_events", &self.max_events)
            .finish()
    }
}

impl Correlator {
    pub fn new(config: &Config, backend: Arc<dyn ObservabilityBackend>) -> Self {
        Self {
            backend,
            window_minutes: config.correlation.window_minutes,
            max_events: config.correlation.max_events,
        }
    }

    /// Find events related to the detected anomalies.
    ///
    /// A backend failure yields an empty list: correlation enriches an
    /// incident but never blocks it.
    pub async fn correlate(&self, anomalies: &[Anomaly]) -> Vec<CorrelatedEvent> {
        let Some(earliest) = anomalies.iter().map(|a| a.detected_at).min() else {
            return vec![];
        };
        let window = TimeRange::around(earliest, self.window_minutes);

        let raw = match self
            .backend
            .events(window, &[EventLevel::Error, EventLevel::Warn], self.max_events)
            .await
        {
            Ok(events) => events,
            Err(e) => {
                warn!(error = %e, "event correlation query failed, continuing without");
                return vec![];
            }
        };

        let mut events: Vec<CorrelatedEvent> =
            raw.into_iter().map(CorrelatedEvent::from).collect();

        // Ascending timestamp, ties broken by service; sort is stable.
        events.sort_by(|a, b| (a.timestamp, a.service.as_str()).cmp(&(b.timestamp, b.service.as_str())));

        let mut seen = HashSet::new();
        events.retain(|event| {
            seen.insert((event.timestamp, event.service.clone(), event.message.clone()))
        });
        events.truncate(self.max_events);

        info!(events = events.len(), "event correlation complete");
        events
    }
}
