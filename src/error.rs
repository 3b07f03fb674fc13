//! Error types for pool, fetch, store and notify operations
//!
//! Each collaborator boundary has its own error enum. The orchestrator folds
//! all of them into a [`crate::orchestrator::FailureKind`] when it classifies a tick.

use std::time::Duration;

/// Session creation failed inside the external factory
#[derive(Debug, Clone, thiserror::Error)]
#[error("Session factory failed for {identity}: {message}")]
pub struct FactoryError {
    pub identity: String,
    pub message: String,
}

impl FactoryError {
    pub fn new(identity: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            identity: identity.into(),
            message: message.into(),
        }
    }
}

/// Persisting durable session state failed
#[derive(Debug, Clone, thiserror::Error)]
#[error("Failed to save session state: {0}")]
pub struct SaveError(pub String);

/// Error types for session pool operations
#[derive(Debug, Clone, thiserror::Error)]
pub enum PoolError {
    /// Session creation failed; the pool entry was cleared
    #[error(transparent)]
    Factory(#[from] FactoryError),

    /// `acquire` was called after `shutdown` began
    #[error("Session pool is shutting down")]
    ShuttingDown,

    /// No session was handed out before the acquisition deadline
    #[error("Session acquisition for {identity} timed out after {}s", .after.as_secs())]
    AcquireTimeout { identity: String, after: Duration },
}

/// Error types reported by a [`crate::fetch::Fetcher`]
#[derive(Debug, Clone, thiserror::Error)]
pub enum FetchError {
    /// Connection, navigation or transport failure
    #[error("Network error: {0}")]
    Network(String),

    /// The page loaded but items could not be extracted
    #[error("Parse error: {0}")]
    Parse(String),

    /// Stored credentials are no longer accepted upstream
    #[error("Authentication expired: {0}")]
    AuthExpired(String),

    /// Upstream signalled that we are requesting too often
    #[error("Upstream rate limit: {0}")]
    RateLimited(String),

    /// The call did not finish within its deadline
    #[error("{operation} timeout after {}s", .after.as_secs())]
    Timeout { operation: String, after: Duration },
}

/// Error types for item store operations
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Underlying database failure
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A uniqueness constraint rejected the write
    ///
    /// Bulk inserts absorb conflicts themselves; this only surfaces from
    /// single-row operations.
    #[error("Duplicate key {key} for target {target_id}")]
    Conflict { target_id: String, key: String },

    /// Stored data could not be decoded
    #[error("Corrupt stored value: {0}")]
    Corrupt(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Error types reported by a [`crate::notify::Notifier`]
#[derive(Debug, Clone, thiserror::Error)]
pub enum NotifyError {
    /// The downstream endpoint asked us to slow down
    #[error("Notification endpoint rate limited (retry after {retry_after:?})")]
    RateLimited { retry_after: Option<Duration> },

    /// The downstream endpoint refused the payload
    #[error("Notification rejected with status {status}: {body}")]
    Rejected { status: u16, body: String },

    /// The downstream endpoint failed or timed out on its side (5xx, 408)
    #[error("Notification endpoint unavailable with status {status}: {body}")]
    Unavailable { status: u16, body: String },

    /// Transport failure
    #[error("Notification transport error: {0}")]
    Transport(String),

    /// The call did not finish within its deadline
    #[error("Notification timeout after {}s", .0.as_secs())]
    Timeout(Duration),
}

/// Configuration problems detected while loading or validating
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConfigError {
    /// A field value is out of range or malformed
    #[error("Invalid value for {field}: {reason}")]
    Invalid { field: String, reason: String },

    /// Two targets share the same id
    #[error("Duplicate target id: {0}")]
    DuplicateTarget(String),

    /// A time-of-day string could not be parsed
    #[error("Invalid time of day '{0}' (expected HH:MM or HH:MM:SS)")]
    TimeOfDay(String),
}

impl ConfigError {
    pub(crate) fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field: field.into(),
            reason: reason.into(),
        }
    }
}
