//! The tick scheduler.
//!
//! Drives the pipeline at a fixed interval, measured tick-start to
//! tick-start, with single-flight execution: when a tick overruns the
//! interval, the missed firings are skipped, never queued. On shutdown the
//! in-flight tick may finish under a hard deadline before the scheduler
//! exits.

use std::future::Future;
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use sentinelops_core::config::Config;
use sentinelops_core::Result;

use crate::pipeline::TickOutcome;

/// Fixed-interval, single-flight driver for the pipeline.
#[derive(Debug, Clone)]
pub struct TickScheduler {
    interval: Duration,
    shutdown_grace: Duration,
}

impl TickScheduler {
    pub fn new(config: &Config) -> Self {
        Self {
            interval: Duration::from_secs(config.polling.interval_seconds),
            shutdown_grace: Duration::from_secs(config.polling.shutdown_grace_seconds),
        }
    }

    /// Run ticks until the shutdown token fires.
    ///
    /// `tick_fn` produces one tick future per firing; the scheduler awaits
    /// it to completion before the next firing can run. A firing that
    /// arrives while a tick is in flight is skipped by the interval timer.
    pub async fn run<F, Fut>(&self, shutdown: CancellationToken, mut tick_fn: F)
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<TickOutcome>>,
    {
        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(
            interval_secs = self.interval.as_secs(),
            "scheduler started"
        );

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = interval.tick() => {
                    let started = Instant::now();
                    let tick = tick_fn();
                    tokio::pin!(tick);

                    let outcome = tokio::select! {
                        outcome = &mut tick => Some(outcome),
                        _ = shutdown.cancelled() => {
                            // Let the in-flight tick finish, bounded by the
                            // hard shutdown deadline.
                            match tokio::time::timeout(self.shutdown_grace, &mut tick).await {
                                Ok(outcome) => Some(outcome),
                                Err(_) => {
                                    warn!(
                                        grace_secs = self.shutdown_grace.as_secs(),
                                        "in-flight tick exceeded shutdown deadline, abandoning"
                                    );
                                    None
                                }
                            }
                        }
                    };

                    match outcome {
                        Some(Ok(outcome)) => debug!(?outcome, "tick finished"),
                        Some(Err(e)) => error!(error = %e, "tick aborted"),
                        None => {}
                    }

                    let elapsed = started.elapsed();
                    if elapsed > self.interval {
                        warn!(
                            elapsed_ms = elapsed.as_millis() as u64,
                            interval_ms = self.interval.as_millis() as u64,
                            "tick overran the interval; missed firings skipped"
                        );
                    }

                    if shutdown.is_cancelled() {
                        break;
                    }
                }
            }
        }

        info!("scheduler stopped");
    }
}
