//! Error types for pagewatch-rs.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// The snapshot is the earliest capture of its page. Expected for
    /// every first observation; the pipeline skips it without retry.
    #[error("snapshot {0} has no ancestor")]
    NoAncestor(crate::model::SnapshotId),

    #[error("not found: {0}")]
    NotFound(String),

    /// The snapshot pair handed to diff persistence is not a
    /// same-page, time-ordered pair. Caller bug, never retried.
    #[error("invalid snapshot pair: {0}")]
    InvalidPair(String),

    /// Checkin from a user who holds no lease. Caller bug, non-fatal.
    #[error("user {0} holds no active lease")]
    NoActiveLease(String),

    /// Checkout while already holding a lease. The prior lease must be
    /// checked in first.
    #[error("user {0} already holds an active lease")]
    LeaseConflict(String),

    /// Transport, timeout, or non-OK status from the diff or scoring
    /// service. Recoverable; the backlog message is left for redelivery.
    #[error("external service error ({kind}): {message}")]
    ExternalService {
        kind: ServiceErrorKind,
        message: String,
    },

    #[error("config error: {0}")]
    Config(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration failed: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("{0}")]
    Other(String),
}

/// Which way an external-service call failed. All three kinds are
/// retryable; the distinction is surfaced for display and metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceErrorKind {
    Timeout,
    Status,
    Transport,
}

impl std::fmt::Display for ServiceErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ServiceErrorKind::Timeout => "timeout",
            ServiceErrorKind::Status => "status",
            ServiceErrorKind::Transport => "transport",
        };
        write!(f, "{s}")
    }
}

impl Error {
    /// Per-item skip, not a failure: the drain loop archives the
    /// message and moves on.
    pub fn is_no_ancestor(&self) -> bool {
        matches!(self, Error::NoAncestor(_))
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        let kind = if e.is_timeout() {
            ServiceErrorKind::Timeout
        } else if e.is_status() {
            ServiceErrorKind::Status
        } else {
            ServiceErrorKind::Transport
        };
        Error::ExternalService {
            kind,
            message: e.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
