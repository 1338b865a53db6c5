//! Error taxonomy for the pipeline.
//!
//! The set is closed on purpose: every external failure a component can see
//! maps onto exactly one of these variants, and each variant carries its
//! recovery policy. Only `Config` is fatal; everything else is recovered at
//! the smallest enclosing component.

use thiserror::Error;

/// Result alias used throughout SentinelOps.
pub type Result<T> = std::result::Result<T, Error>;

/// All errors the pipeline can produce.
#[derive(Debug, Error)]
pub enum Error {
    /// Invalid or unreadable configuration. Fatal at startup.
    #[error("configuration error: {0}")]
    Config(String),

    /// Observability backend query failure. Transient failures are retried
    /// once within the tick; persistent ones skip the affected query.
    #[error("backend error: {message}")]
    Backend {
        message: String,
        /// Connect/timeout class failures that may succeed on retry.
        transient: bool,
    },

    /// A backend document that could not be interpreted. Logged and skipped.
    #[error("malformed document: {0}")]
    MalformedDocument(String),

    /// Language-model analysis failure. The incident proceeds unenriched.
    #[error("analyzer error: {0}")]
    Analyzer(String),

    /// Notification channel failure. Logged; the incident stays in the store.
    #[error("notifier error ({channel}): {message}")]
    Notifier { channel: String, message: String },
}

impl Error {
    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Error::Config(message.into())
    }

    /// Create a non-transient backend error.
    pub fn backend(message: impl Into<String>) -> Self {
        Error::Backend {
            message: message.into(),
            transient: false,
        }
    }

    /// Create a transient backend error (connect/timeout class).
    pub fn backend_transient(message: impl Into<String>) -> Self {
        Error::Backend {
            message: message.into(),
            transient: true,
        }
    }

    /// Create a malformed-document error.
    pub fn malformed(message: impl Into<String>) -> Self {
        Error::MalformedDocument(message.into())
    }

    /// Create an analyzer error.
    pub fn analyzer(message: impl Into<String>) -> Self {
        Error::Analyzer(message.into())
    }

    /// Create a notifier error for the named channel.
    pub fn notifier(channel: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Notifier {
            channel: channel.into(),
            message: message.into(),
        }
    }

    /// Whether a retry within the same tick is worthwhile.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Backend { transient: true, .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_flag_only_on_backend_errors() {
        assert!(Error::backend_transient("timeout").is_transient());
        assert!(!Error::backend("mapping missing").is_transient());
        assert!(!Error::config("bad yaml").is_transient());
        assert!(!Error::analyzer("503").is_transient());
    }

    #[test]
    fn display_includes_channel() {
        let err = Error::notifier("slack", "channel_not_found");
        assert_eq!(err.to_string(), "notifier error (slack): channel_not_found");
    }
}
