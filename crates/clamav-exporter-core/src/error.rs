//! Error types for configuration, scraping and build-time interpretation.

use std::io;
use std::time::Duration;

use thiserror::Error;

/// Invalid scrape configuration. Raised at construction, never at scrape time.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid retry count {0}")]
    InvalidRetries(i64),

    #[error("timeout must be greater than zero")]
    ZeroTimeout,

    #[error("invalid daemon address {address:?}: {reason}")]
    InvalidAddress { address: String, reason: String },

    #[error("unsupported address scheme {0:?} (expected tcp or unix)")]
    UnsupportedScheme(String),

    #[error("tcp address {0:?} has no host")]
    MissingHost(String),

    #[error("unix address {0:?} has no socket path")]
    MissingPath(String),
}

/// A response stream that cannot be split into numbered frames.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    #[error("failed to find response ID")]
    MissingId,

    #[error("invalid response ID {0:?}")]
    InvalidId(String),

    #[error("response ID {0} out of range")]
    IdOutOfRange(i64),

    #[error("missing trailing NUL")]
    MissingTerminator,
}

/// Failure of a single scrape attempt.
///
/// Every variant is retried the same way by the collector; only the log
/// message differs.
#[derive(Debug, Error)]
pub enum ScrapeError {
    #[error("failed to {action}: {source}")]
    Connection {
        action: &'static str,
        #[source]
        source: io::Error,
    },

    #[error("failed to parse response: {0}")]
    MalformedFrame(#[from] FrameError),

    #[error("unexpected PING response {0:?}")]
    ProtocolViolation(String),
}

impl ScrapeError {
    pub(crate) fn io(action: &'static str, source: io::Error) -> Self {
        ScrapeError::Connection { action, source }
    }

    pub(crate) fn timed_out(action: &'static str, after: Duration) -> Self {
        ScrapeError::Connection {
            action,
            source: io::Error::new(
                io::ErrorKind::TimedOut,
                format!("no progress within {:?}", after),
            ),
        }
    }

    /// Returns true if the attempt ran into the configured timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            ScrapeError::Connection { source, .. } if source.kind() == io::ErrorKind::TimedOut
        )
    }
}

/// The database build time could not be mapped to an instant.
#[derive(Debug, Error)]
pub enum BuildTimeError {
    #[error("failed to parse build time {text:?}: {source}")]
    Parse {
        text: String,
        #[source]
        source: chrono::ParseError,
    },

    #[error("build time {0:?} does not start with a weekday")]
    InvalidWeekday(String),

    #[error("build time {0:?} does not exist in the configured timezone")]
    NonExistent(String),
}
