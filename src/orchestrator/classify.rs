//! Failure classification for tick errors

use serde::Serialize;

use crate::error::{FetchError, NotifyError, PoolError, StoreError};

/// Everything that can end a tick early
#[derive(Debug, thiserror::Error)]
pub enum TickError {
    #[error(transparent)]
    Pool(#[from] PoolError),

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Notify(#[from] NotifyError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// What a classified failure means for the target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// Scheduling stops until an external reset
    Fatal,
    /// The tick ends; the next tick retries
    Retryable,
    /// Retryable, but hints at upstream drift worth a look
    Degraded,
    /// Expected backpressure, not a failure
    Routine,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Stored credentials refused upstream
    AuthExpired,
    /// Upstream or downstream throttling
    RateLimited,
    /// Transport failure
    Network,
    /// An external call overran its deadline
    Timeout,
    /// Page loaded but its shape was unexpected
    Parse,
    /// Session creation failed
    Factory,
    /// Item store failure
    Store,
    /// Notification delivery failure
    Notify,
    /// Anything else
    Other,
}

impl FailureKind {
    /// Classify a tick error into a failure kind
    #[must_use]
    pub fn classify(error: &TickError) -> Self {
        match error {
            TickError::Fetch(FetchError::AuthExpired(_)) => Self::AuthExpired,
            TickError::Fetch(FetchError::RateLimited(_)) => Self::RateLimited,
            TickError::Fetch(FetchError::Network(_)) => Self::Network,
            TickError::Fetch(FetchError::Timeout { .. }) => Self::Timeout,
            TickError::Fetch(FetchError::Parse(_)) => Self::Parse,
            TickError::Pool(PoolError::Factory(_)) => Self::Factory,
            TickError::Pool(PoolError::AcquireTimeout { .. }) => Self::Timeout,
            TickError::Pool(PoolError::ShuttingDown) => Self::Other,
            TickError::Store(StoreError::Conflict { .. }) => Self::Other,
            TickError::Store(_) => Self::Store,
            TickError::Notify(NotifyError::RateLimited { .. }) => Self::RateLimited,
            TickError::Notify(NotifyError::Timeout(_)) => Self::Timeout,
            TickError::Notify(_) => Self::Notify,
            TickError::Other(_) => Self::Other,
        }
    }

    #[must_use]
    pub const fn severity(&self) -> Severity {
        match self {
            Self::AuthExpired => Severity::Fatal,
            Self::RateLimited => Severity::Routine,
            Self::Parse => Severity::Degraded,
            Self::Network | Self::Timeout | Self::Factory | Self::Store | Self::Notify | Self::Other => {
                Severity::Retryable
            }
        }
    }

    /// Whether the target stays scheduled after this failure
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        !matches!(self.severity(), Severity::Fatal)
    }

    /// Level this failure is logged at
    #[must_use]
    pub const fn log_level(&self) -> log::Level {
        match self {
            Self::AuthExpired | Self::Store | Self::Other => log::Level::Error,
            Self::Network | Self::Timeout | Self::Parse | Self::Factory | Self::Notify => log::Level::Warn,
            Self::RateLimited => log::Level::Debug,
        }
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::AuthExpired => "auth_expired",
            Self::RateLimited => "rate_limited",
            Self::Network => "network",
            Self::Timeout => "timeout",
            Self::Parse => "parse",
            Self::Factory => "factory",
            Self::Store => "store",
            Self::Notify => "notify",
            Self::Other => "other",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FactoryError;
    use std::time::Duration;

    #[test]
    fn test_auth_expired_is_the_only_fatal_kind() {
        let fatal = TickError::Fetch(FetchError::AuthExpired("login".into()));
        assert_eq!(FailureKind::classify(&fatal), FailureKind::AuthExpired);
        assert!(!FailureKind::AuthExpired.is_retryable());

        for kind in [
            FailureKind::RateLimited,
            FailureKind::Network,
            FailureKind::Timeout,
            FailureKind::Parse,
            FailureKind::Factory,
            FailureKind::Store,
            FailureKind::Notify,
            FailureKind::Other,
        ] {
            assert!(kind.is_retryable(), "{kind} should be retryable");
        }
    }

    #[test]
    fn test_classification_table() {
        let cases = [
            (TickError::Fetch(FetchError::Network("reset".into())), FailureKind::Network),
            (
                TickError::Fetch(FetchError::Timeout {
                    operation: "fetch".into(),
                    after: Duration::from_secs(1),
                }),
                FailureKind::Timeout,
            ),
            (TickError::Fetch(FetchError::Parse("shape".into())), FailureKind::Parse),
            (
                TickError::Pool(PoolError::Factory(FactoryError::new("id", "boom"))),
                FailureKind::Factory,
            ),
            (
                TickError::Pool(PoolError::AcquireTimeout {
                    identity: "id".into(),
                    after: Duration::from_secs(90),
                }),
                FailureKind::Timeout,
            ),
            (
                TickError::Notify(NotifyError::Unavailable {
                    status: 503,
                    body: String::new(),
                }),
                FailureKind::Notify,
            ),
            (
                TickError::Notify(NotifyError::RateLimited { retry_after: None }),
                FailureKind::RateLimited,
            ),
            (TickError::Other(anyhow::anyhow!("surprise")), FailureKind::Other),
        ];
        for (error, expected) in cases {
            assert_eq!(FailureKind::classify(&error), expected, "{error}");
        }
        assert_eq!(FailureKind::Parse.severity(), Severity::Degraded);
        assert_eq!(FailureKind::RateLimited.log_level(), log::Level::Debug);
    }
}
