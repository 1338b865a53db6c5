//! SentinelOps main binary.
//!
//! Wires all components of the incident-response agent:
//! - Ingestion: Elasticsearch observability client
//! - Detection: z-score detector, correlator, runbook matcher
//! - Analysis: language-model analyzer
//! - Incidents: manager + in-memory store
//! - Alerting: Slack chat + PagerDuty paging
//! - API: read-only HTTP server for the dashboard
//!
//! Exit codes: 0 clean shutdown, 1 unrecoverable configuration error,
//! 2 startup connectivity failure to the observability backend.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use sentinelops::{Pipeline, TickScheduler};
use sentinelops_alerting::{Notifier, NotifierSet, PagerDutyNotifier, SlackNotifier};
use sentinelops_api::{ApiConfig, ApiServer};
use sentinelops_core::config::{effective_summary, Config, Secrets};
use sentinelops_detection::ClaudeAnalyzer;
use sentinelops_incidents::{IncidentStore, StoreConfig};
use sentinelops_ingestion::{ElasticsearchClient, ObservabilityBackend};

const EXIT_CONFIG_ERROR: u8 = 1;
const EXIT_CONNECTIVITY_ERROR: u8 = 2;

/// SentinelOps CLI arguments
#[derive(Debug, Parser)]
#[clap(name = "sentinelops", version, about = "Incident-response agent")]
struct Cli {
    /// Configuration file path
    #[clap(short, long, default_value = "config.yaml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[clap(long, env = "SENTINELOPS_LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Enable JSON logging
    #[clap(long, env = "SENTINELOPS_LOG_JSON")]
    log_json: bool,

    /// Validate configuration and exit without starting services
    #[clap(long)]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = init_logging(&cli) {
        eprintln!("failed to initialize logging: {e}");
        return ExitCode::from(EXIT_CONFIG_ERROR);
    }

    info!("starting sentinelops v{}", env!("CARGO_PKG_VERSION"));

    let config = match Config::from_file(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            error!(path = %cli.config.display(), error = %e, "configuration error");
            return ExitCode::from(EXIT_CONFIG_ERROR);
        }
    };
    for (key, value) in effective_summary(&config) {
        info!(key, value = %value, "config");
    }

    if cli.dry_run {
        info!("dry run: configuration validated");
        return ExitCode::SUCCESS;
    }

    let secrets = Secrets::from_env();
    let app = match SentinelOps::new(config, secrets) {
        Ok(app) => app,
        Err(e) => {
            error!(error = %e, "failed to initialize components");
            return ExitCode::from(EXIT_CONFIG_ERROR);
        }
    };

    if let Err(e) = app.backend.ping().await {
        error!(error = %e, "observability backend unreachable at startup");
        return ExitCode::from(EXIT_CONNECTIVITY_ERROR);
    }
    info!("observability backend reachable");

    app.run().await;
    info!("sentinelops stopped");
    ExitCode::SUCCESS
}

/// Initialize logging based on CLI arguments
fn init_logging(cli: &Cli) -> Result<()> {
    let log_level = cli
        .log_level
        .parse::<tracing::Level>()
        .context("invalid log level")?;

    let filter = tracing_subscriber::EnvFilter::from_default_env()
        .add_directive(log_level.into());

    if cli.log_json {
        tracing_subscriber::registry()
            .with(tracing_subscriber::fmt::layer().json().with_target(true))
            .with(filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(tracing_subscriber::fmt::layer().with_target(true))
            .with(filter)
            .init();
    }

    Ok(())
}

/// Main orchestrator: owns the wired components and the shutdown token.
struct SentinelOps {
    config: Config,
    backend: Arc<dyn ObservabilityBackend>,
    pipeline: Arc<Pipeline>,
    store: Arc<IncidentStore>,
    shutdown: CancellationToken,
}

impl SentinelOps {
    fn new(config: Config, secrets: Secrets) -> Result<Self> {
        let backend: Arc<dyn ObservabilityBackend> = Arc::new(
            ElasticsearchClient::new(&config.elasticsearch, secrets.elasticsearch_api_key.clone())
                .context("failed to build elasticsearch client")?,
        );

        let analyzer = Arc::new(
            ClaudeAnalyzer::new(&config.analyzer, secrets.anthropic_api_key.clone())
                .context("failed to build analyzer")?,
        );

        let chat: Option<Arc<dyn Notifier>> =
            match (&secrets.slack_bot_token, &secrets.slack_channel_id) {
                (Some(token), Some(channel)) => Some(Arc::new(
                    SlackNotifier::new(token.clone(), channel.clone())
                        .context("failed to build slack notifier")?,
                )),
                _ => None,
            };
        let pager: Option<Arc<dyn Notifier>> =
            match (&secrets.pagerduty_api_key, &secrets.pagerduty_service_id) {
                (Some(key), Some(service)) => Some(Arc::new(
                    PagerDutyNotifier::new(key.clone(), service.clone())
                        .context("failed to build pagerduty notifier")?,
                )),
                _ => None,
            };
        info!(
            slack_enabled = chat.is_some(),
            pagerduty_enabled = pager.is_some(),
            "notification channels configured"
        );
        let notifiers = Arc::new(NotifierSet::new(
            chat,
            pager,
            config.incidents.pagerduty_severities.clone(),
        ));

        let store = Arc::new(IncidentStore::new(StoreConfig::from_config(&config)));
        let shutdown = CancellationToken::new();
        let pipeline = Arc::new(Pipeline::new(
            &config,
            backend.clone(),
            analyzer,
            notifiers,
            store.clone(),
            shutdown.clone(),
        ));

        Ok(Self {
            config,
            backend,
            pipeline,
            store,
            shutdown,
        })
    }

    /// Run the API server and the polling loop until shutdown.
    async fn run(self) {
        let api_handle = {
            let shutdown = self.shutdown.clone();
            let store = self.store.clone();
            let server_config = self.config.server.clone();
            tokio::spawn(async move {
                let api_config = match ApiConfig::from_config(&server_config) {
                    Ok(api_config) => api_config,
                    Err(e) => {
                        error!(error = %e, "invalid api configuration");
                        return;
                    }
                };
                if let Err(e) = ApiServer::new(api_config, store).serve(shutdown).await {
                    error!(error = %e, "api server exited");
                }
            })
        };

        let signal_handle = {
            let shutdown = self.shutdown.clone();
            tokio::spawn(async move {
                wait_for_shutdown().await;
                info!("shutdown signal received");
                shutdown.cancel();
            })
        };

        let scheduler = TickScheduler::new(&self.config);
        let pipeline = self.pipeline.clone();
        scheduler
            .run(self.shutdown.clone(), move || {
                let pipeline = pipeline.clone();
                async move { pipeline.run_tick().await }
            })
            .await;

        // The scheduler only returns on shutdown; make sure the other
        // tasks observe it too.
        self.shutdown.cancel();
        signal_handle.abort();
        let _ = api_handle.await;
    }
}

/// Wait for SIGTERM or CTRL+C.
async fn wait_for_shutdown() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "failed to install ctrl+c handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to install sigterm handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
