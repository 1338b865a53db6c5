//! Route definitions for the read API.

use axum::{routing::get, Router};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::timeout::TimeoutLayer;

use sentinelops_incidents::IncidentStore;

use crate::handlers;
use crate::ApiConfig;

/// Build the router over the incident store.
pub fn router(store: Arc<IncidentStore>, config: &ApiConfig) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handlers::health))
        .route("/services", get(handlers::list_services))
        .route("/incidents", get(handlers::list_incidents))
        .route("/incidents/{id}", get(handlers::get_incident))
        .with_state(store)
        .layer(cors)
        .layer(TimeoutLayer::new(config.request_timeout))
}

#[cfg(test)]
mod tests {
    use super::*;
    use sentinelops_incidents::StoreConfig;
    use std::time::Duration;

    #[test]
    fn router_builds() {
        let store = Arc::new(IncidentStore::new(StoreConfig {
            max_incidents: 10,
            dedup_cooldown: chrono::Duration::minutes(30),
        }));
        let config = ApiConfig {
            bind_addr: "127.0.0.1:8000".parse().unwrap(),
            request_timeout: Duration::from_secs(30),
        };
        drop(router(store, &config));
    }
}
