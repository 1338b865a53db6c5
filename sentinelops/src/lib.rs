//! # SentinelOps
//!
//! The pipeline driver: one periodic tick runs detection, correlation,
//! runbook matching, analysis, and incident creation in sequence, under a
//! single-flight scheduler with graceful shutdown.

#![warn(missing_debug_implementations, rust_2018_idioms)]

pub mod pipeline;
pub mod scheduler;

pub use pipeline::{Pipeline, TickOutcome};
pub use scheduler::TickScheduler;
