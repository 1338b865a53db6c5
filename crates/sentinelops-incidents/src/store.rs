//! Process-local incident storage.
//!
//! Writes are serialized by a single mutex over the ordered state
//! (insertion order plus the dedup index); id lookups are served from a
//! `DashMap` so readers never block writers. All reads return owned copies
//! with the lifecycle status computed at read time, so callers cannot
//! mutate stored records.

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use tracing::debug;

use sentinelops_core::config::Config;
use sentinelops_core::models::Incident;
use sentinelops_core::types::{DedupKey, IncidentStatus};

/// Store bounds and lifecycle timing.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Retention bound; the oldest incident is evicted past it.
    pub max_incidents: usize,
    /// Cooldown after which an untouched incident reads as `cooling`.
    pub dedup_cooldown: Duration,
}

impl StoreConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_incidents: config.incidents.max_incidents,
            dedup_cooldown: Duration::minutes(i64::from(config.incidents.dedup_cooldown_minutes)),
        }
    }
}

#[derive(Debug, Clone)]
struct StoredIncident {
    incident: Incident,
    /// Last time a fresh anomaly matched this incident's dedup key.
    last_matched_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct OrderedState {
    /// Incident ids, oldest first.
    order: VecDeque<String>,
    /// Most recent incident id per dedup key.
    by_dedup: HashMap<String, String>,
}

/// In-memory incident store with O(1) lookup by id and by dedup key.
#[derive(Debug)]
pub struct IncidentStore {
    config: StoreConfig,
    by_id: DashMap<String, StoredIncident>,
    state: Mutex<OrderedState>,
}

impl IncidentStore {
    pub fn new(config: StoreConfig) -> Self {
        Self {
            config,
            by_id: DashMap::new(),
            state: Mutex::new(OrderedState::default()),
        }
    }

    /// Insert a new incident, evicting the oldest past the retention bound.
    ///
    /// Returns `false` on an id collision without inserting; the caller
    /// re-allocates the id.
    pub fn put(&self, incident: Incident) -> bool {
        let mut state = self.lock_state();
        if self.by_id.contains_key(&incident.id) {
            return false;
        }

        let id = incident.id.clone();
        state.order.push_back(id.clone());
        state
            .by_dedup
            .insert(incident.dedup_key.as_str().to_string(), id.clone());
        self.by_id.insert(
            id,
            StoredIncident {
                last_matched_at: incident.created_at,
                incident,
            },
        );

        while state.order.len() > self.config.max_incidents {
            if let Some(evicted) = state.order.pop_front() {
                if let Some((_, stored)) = self.by_id.remove(&evicted) {
                    let key = stored.incident.dedup_key.as_str();
                    if state.by_dedup.get(key).is_some_and(|id| *id == evicted) {
                        state.by_dedup.remove(key);
                    }
                    debug!(incident_id = %evicted, "evicted incident past retention bound");
                }
            }
        }
        true
    }

    /// Whether an incident with this id is retained.
    pub fn contains_id(&self, id: &str) -> bool {
        self.by_id.contains_key(id)
    }

    /// Fetch one incident by id.
    pub fn get(&self, id: &str) -> Option<Incident> {
        let stored = self.by_id.get(id)?;
        Some(self.with_status(&stored, Utc::now()))
    }

    /// The most recent incident with this dedup key created within `within`
    /// of now, if any.
    pub fn find_active_by_dedup_key(&self, key: &DedupKey, within: Duration) -> Option<Incident> {
        let id = {
            let state = self.lock_state();
            state.by_dedup.get(key.as_str()).cloned()?
        };
        let stored = self.by_id.get(&id)?;
        let now = Utc::now();
        if now - stored.incident.created_at < within {
            Some(self.with_status(&stored, now))
        } else {
            None
        }
    }

    /// Record that a fresh anomaly matched this dedup key, keeping the
    /// incident `active`.
    pub fn touch(&self, key: &DedupKey) {
        let id = {
            let state = self.lock_state();
            state.by_dedup.get(key.as_str()).cloned()
        };
        if let Some(id) = id {
            if let Some(mut stored) = self.by_id.get_mut(&id) {
                stored.last_matched_at = Utc::now();
            }
        }
    }

    /// Retained incidents, newest first.
    pub fn list(&self, limit: usize, offset: usize) -> Vec<Incident> {
        let ids: Vec<String> = {
            let state = self.lock_state();
            state
                .order
                .iter()
                .rev()
                .skip(offset)
                .take(limit)
                .cloned()
                .collect()
        };
        let now = Utc::now();
        ids.iter()
            .filter_map(|id| self.by_id.get(id).map(|stored| self.with_status(&stored, now)))
            .collect()
    }

    /// Total incidents retained.
    pub fn count(&self) -> usize {
        self.lock_state().order.len()
    }

    fn with_status(&self, stored: &StoredIncident, now: DateTime<Utc>) -> Incident {
        let last_activity = stored.incident.created_at.max(stored.last_matched_at);
        let status = if now - last_activity >= self.config.dedup_cooldown {
            IncidentStatus::Cooling
        } else {
            IncidentStatus::Active
        };
        let mut incident = stored.incident.clone();
        incident.status = status;
        incident
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, OrderedState> {
        // State stays consistent across a poisoned lock: every write
        // completes its bookkeeping before releasing.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sentinelops_core::models::Anomaly;
    use sentinelops_core::types::{MetricKind, Severity};

    fn store(max: usize) -> IncidentStore {
        IncidentStore::new(StoreConfig {
            max_incidents: max,
            dedup_cooldown: Duration::minutes(30),
        })
    }

    fn incident(id: &str, service: &str, age_minutes: i64) -> Incident {
        let created_at = Utc::now() - Duration::minutes(age_minutes);
        Incident {
            id: id.to_string(),
            created_at,
            severity: Severity::P1,
            title: format!("incident on {service}"),
            services: vec![service.to_string()],
            anomalies: vec![Anomaly {
                service: service.to_string(),
                metric: MetricKind::ErrorRate,
                current_value: 50.0,
                baseline_mean: 2.0,
                baseline_stddev: 1.0,
                z_score: 48.0,
                severity: Severity::P1,
                detected_at: created_at,
                sample_count: None,
            }],
            correlated_events: vec![],
            matched_runbooks: vec![],
            analysis: None,
            dedup_key: DedupKey::compute(
                &[service.to_string()],
                &[MetricKind::ErrorRate],
                Severity::P1,
            ),
            status: IncidentStatus::Active,
        }
    }

    #[test]
    fn put_then_get_round_trips() {
        let store = store(10);
        assert!(store.put(incident("INC-1", "payment", 0)));
        let fetched = store.get("INC-1").unwrap();
        assert_eq!(fetched.id, "INC-1");
        assert_eq!(fetched.status, IncidentStatus::Active);
        assert_eq!(store.count(), 1);
    }

    #[test]
    fn id_collision_is_rejected() {
        let store = store(10);
        assert!(store.put(incident("INC-1", "payment", 0)));
        assert!(!store.put(incident("INC-1", "order", 0)));
        assert_eq!(store.count(), 1);
    }

    #[test]
    fn retention_evicts_oldest_first() {
        let store = store(3);
        for i in 0..5 {
            // Distinct services so dedup entries don't overwrite each other.
            assert!(store.put(incident(&format!("INC-{i}"), &format!("svc-{i}"), 5 - i)));
        }
        assert_eq!(store.count(), 3);
        assert!(store.get("INC-0").is_none());
        assert!(store.get("INC-1").is_none());
        assert!(store.get("INC-2").is_some());
        assert!(store.get("INC-4").is_some());
    }

    #[test]
    fn dedup_lookup_respects_window() {
        let store = store(10);
        let recent = incident("INC-recent", "payment", 10);
        let key = recent.dedup_key.clone();
        assert!(store.put(recent));

        assert!(store
            .find_active_by_dedup_key(&key, Duration::minutes(30))
            .is_some());
        assert!(store
            .find_active_by_dedup_key(&key, Duration::minutes(5))
            .is_none());
    }

    #[test]
    fn dedup_lookup_sees_most_recent_for_key() {
        let store = store(10);
        let older = incident("INC-old", "payment", 45);
        let key = older.dedup_key.clone();
        assert!(store.put(older));
        // Outside the window: the old incident no longer suppresses.
        assert!(store
            .find_active_by_dedup_key(&key, Duration::minutes(30))
            .is_none());

        assert!(store.put(incident("INC-new", "payment", 1)));
        let found = store
            .find_active_by_dedup_key(&key, Duration::minutes(30))
            .unwrap();
        assert_eq!(found.id, "INC-new");
    }

    #[test]
    fn status_cools_after_cooldown_without_touch() {
        let store = store(10);
        assert!(store.put(incident("INC-stale", "payment", 45)));
        assert!(store.put(incident("INC-fresh", "order", 1)));

        assert_eq!(store.get("INC-stale").unwrap().status, IncidentStatus::Cooling);
        assert_eq!(store.get("INC-fresh").unwrap().status, IncidentStatus::Active);
    }

    #[test]
    fn touch_keeps_an_old_incident_active() {
        let store = store(10);
        let stale = incident("INC-stale", "payment", 45);
        let key = stale.dedup_key.clone();
        assert!(store.put(stale));
        assert_eq!(store.get("INC-stale").unwrap().status, IncidentStatus::Cooling);

        store.touch(&key);
        assert_eq!(store.get("INC-stale").unwrap().status, IncidentStatus::Active);
    }

    #[test]
    fn list_is_newest_first_with_pagination() {
        let store = store(10);
        for i in 0..5 {
            assert!(store.put(incident(&format!("INC-{i}"), &format!("svc-{i}"), 0)));
        }

        let page = store.list(2, 0);
        assert_eq!(
            page.iter().map(|i| i.id.as_str()).collect::<Vec<_>>(),
            vec!["INC-4", "INC-3"]
        );

        let page = store.list(2, 2);
        assert_eq!(
            page.iter().map(|i| i.id.as_str()).collect::<Vec<_>>(),
            vec!["INC-2", "INC-1"]
        );

        assert_eq!(store.list(10, 4).len(), 1);
        assert!(store.list(10, 5).is_empty());
    }
}
