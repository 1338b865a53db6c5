//! # SentinelOps Detection
//!
//! The analytical stages of the pipeline, in tick order:
//!
//! - [`Detector`] — rolling-baseline z-score anomaly detection per service
//! - [`Correlator`] — related error/warning events across services
//! - [`RunbookSearch`] — historical runbook matching
//! - [`Analyzer`] / [`ClaudeAnalyzer`] — language-model incident analysis
//!
//! Every stage is stateless between ticks and recovers its own failures:
//! only a complete backend outage during detection aborts a tick.

#![warn(missing_debug_implementations, rust_2018_idioms)]

pub mod analyzer;
pub mod correlator;
pub mod detector;
pub mod runbooks;
pub mod stats;

pub use analyzer::{Analyzer, ClaudeAnalyzer};
pub use correlator::Correlator;
pub use detector::Detector;
pub use runbooks::RunbookSearch;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::analyzer::{Analyzer, ClaudeAnalyzer};
    pub use crate::correlator::Correlator;
    pub use crate::detector::Detector;
    pub use crate::runbooks::RunbookSearch;
}
