//! One tick of the detection-to-incident pipeline.
//!
//! Stages run sequentially — detect, correlate, match runbooks, then group,
//! analyze, create, and notify — and the cancellation token is checked
//! between stages so a shutdown discards partial work. Incident writes are
//! the final synchronous act of a tick, so the store is never left
//! inconsistent.

use chrono::Utc;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;

use sentinelops_alerting::NotifierSet;
use sentinelops_core::config::Config;
use sentinelops_core::Result;
use sentinelops_detection::{Analyzer, Correlator, Detector, RunbookSearch};
use sentinelops_incidents::{IncidentManager, IncidentStore};
use sentinelops_ingestion::ObservabilityBackend;

/// What one tick accomplished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// No anomalies detected; nothing else ran.
    Idle,
    /// The tick ran to completion.
    Completed { anomalies: usize, incidents: usize },
    /// Shutdown arrived mid-tick; remaining stages were skipped.
    Cancelled,
}

/// The assembled pipeline. All components are stateless between ticks
/// except the incident store.
pub struct Pipeline {
    detector: Detector,
    correlator: Correlator,
    runbooks: RunbookSearch,
    manager: IncidentManager,
    cancel: CancellationToken,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline").finish()
    }
}

impl Pipeline {
    pub fn new(
        config: &Config,
        backend: Arc<dyn ObservabilityBackend>,
        analyzer: Arc<dyn Analyzer>,
        notifiers: Arc<NotifierSet>,
        store: Arc<IncidentStore>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            detector: Detector::new(config, backend.clone()),
            correlator: Correlator::new(config, backend.clone()),
            runbooks: RunbookSearch::new(backend),
            manager: IncidentManager::new(config, store, analyzer, notifiers),
            cancel,
        }
    }

    /// Run one full detection-to-incident cycle.
    ///
    /// Errors only on a complete backend outage during detection; every
    /// other failure is recovered inside its stage. One unhealthy tick
    /// never prevents the next.
    pub async fn run_tick(&self) -> Result<TickOutcome> {
        let tick_id = Uuid::new_v4();
        ::metrics::counter!("sentinelops_ticks_total").increment(1);
        debug!(%tick_id, "tick started");

        let anomalies = self.detector.detect(Utc::now()).await?;
        if anomalies.is_empty() {
            debug!(%tick_id, "tick idle");
            return Ok(TickOutcome::Idle);
        }
        if self.cancel.is_cancelled() {
            return Ok(TickOutcome::Cancelled);
        }

        let events = self.correlator.correlate(&anomalies).await;
        if self.cancel.is_cancelled() {
            return Ok(TickOutcome::Cancelled);
        }

        let runbooks = self.runbooks.find_matching(&anomalies).await;
        if self.cancel.is_cancelled() {
            return Ok(TickOutcome::Cancelled);
        }

        let anomaly_count = anomalies.len();
        let incidents = self.manager.process(anomalies, events, runbooks).await;

        info!(
            %tick_id,
            anomalies = anomaly_count,
            incidents = incidents.len(),
            "tick complete"
        );
        Ok(TickOutcome::Completed {
            anomalies: anomaly_count,
            incidents: incidents.len(),
        })
    }
}
