//! # SentinelOps API
//!
//! Read-only HTTP surface over the in-memory incident store, consumed by
//! the dashboard:
//!
//! - `GET /health` — liveness plus the number of tracked incidents
//! - `GET /services` — per-service health summary derived from incidents
//! - `GET /incidents?limit=&offset=` — newest-first incident summaries
//! - `GET /incidents/{id}` — one full incident
//!
//! The adapter never mutates the store.

#![warn(missing_debug_implementations, rust_2018_idioms)]

pub mod handlers;
pub mod routes;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::info;

use sentinelops_core::config::ServerConfig;
use sentinelops_core::{Error, Result};
use sentinelops_incidents::IncidentStore;

/// HTTP server settings.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub bind_addr: SocketAddr,
    pub request_timeout: Duration,
}

impl ApiConfig {
    pub fn from_config(server: &ServerConfig) -> Result<Self> {
        let bind_addr = format!("{}:{}", server.host, server.port)
            .parse()
            .map_err(|e| Error::config(format!("invalid server bind address: {e}")))?;
        Ok(Self {
            bind_addr,
            request_timeout: Duration::from_secs(server.request_timeout_secs),
        })
    }
}

/// The read-API server.
#[derive(Debug)]
pub struct ApiServer {
    config: ApiConfig,
    store: Arc<IncidentStore>,
}

impl ApiServer {
    pub fn new(config: ApiConfig, store: Arc<IncidentStore>) -> Self {
        Self { config, store }
    }

    /// Serve until the shutdown token fires.
    pub async fn serve(self, shutdown: CancellationToken) -> Result<()> {
        let app = routes::router(self.store, &self.config);

        let listener = tokio::net::TcpListener::bind(self.config.bind_addr)
            .await
            .map_err(|e| {
                Error::config(format!("failed to bind {}: {e}", self.config.bind_addr))
            })?;
        info!(addr = %self.config.bind_addr, "read api listening");

        axum::serve(listener, app)
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await
            .map_err(|e| Error::config(format!("api server error: {e}")))
    }
}
