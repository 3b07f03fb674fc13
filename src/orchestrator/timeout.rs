//! Deadline wrappers for external calls

use std::future::Future;
use std::time::Duration;

use crate::error::{FetchError, NotifyError};

/// Run a fetch under a deadline; overrunning becomes `FetchError::Timeout`
pub async fn with_fetch_timeout<F, T>(operation: F, after: Duration, operation_name: &str) -> Result<T, FetchError>
where
    F: Future<Output = Result<T, FetchError>>,
{
    match tokio::time::timeout(after, operation).await {
        Ok(result) => result,
        Err(_) => Err(FetchError::Timeout {
            operation: operation_name.to_string(),
            after,
        }),
    }
}

/// Run a notification under a deadline; overrunning becomes `NotifyError::Timeout`
pub async fn with_notify_timeout<F>(operation: F, after: Duration) -> Result<(), NotifyError>
where
    F: Future<Output = Result<(), NotifyError>>,
{
    match tokio::time::timeout(after, operation).await {
        Ok(result) => result,
        Err(_) => Err(NotifyError::Timeout(after)),
    }
}
