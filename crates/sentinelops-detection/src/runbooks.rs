//! Historical runbook matching.

use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{info, warn};

use sentinelops_core::models::{Anomaly, RunbookMatch};
use sentinelops_ingestion::ObservabilityBackend;

/// Runbook entries returned per incident candidate.
const MAX_MATCHES: usize = 5;

/// Searches the runbook index for entries matching the current anomalies.
pub struct RunbookSearch {
    backend: Arc<dyn ObservabilityBackend>,
}

impl std::fmt::Debug for RunbookSearch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunbookSearch").finish()
    }
}

impl RunbookSearch {
    pub fn new(backend: Arc<dyn ObservabilityBackend>) -> Self {
        Self { backend }
    }

    /// Top matches by backend relevance, newest first among equal scores.
    ///
    /// A missing index or failed query yields an empty list; runbook
    /// matching never aborts the pipeline.
    pub async fn find_matching(&self, anomalies: &[Anomaly]) -> Vec<RunbookMatch> {
        if anomalies.is_empty() {
            return vec![];
        }

        let services: Vec<String> = anomalies
            .iter()
            .map(|a| a.service.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let keywords: Vec<String> = anomalies
            .iter()
            .map(|a| a.metric.as_str().to_string())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        let mut matches = match self
            .backend
            .search_runbooks(&services, &keywords, MAX_MATCHES)
            .await
        {
            Ok(matches) => matches,
            Err(e) => {
                warn!(error = %e, "runbook search failed, continuing without");
                return vec![];
            }
        };

        // Relevance descending, then incident date descending; undated
        // entries sort last among equal scores.
        matches.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| b.incident_date.cmp(&a.incident_date))
        });
        matches.truncate(MAX_MATCHES);

        info!(matches = matches.len(), "runbook search complete");
        matches
    }
}
