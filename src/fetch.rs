//! Contract for pulling raw items out of a target with a pooled session

use async_trait::async_trait;

use crate::error::FetchError;
use crate::item::RawItem;
use crate::orchestrator::MonitorTarget;

/// Returns the current items of a target using a borrowed session
///
/// Implementations classify their own failures: `AuthExpired` when stored
/// credentials are refused, `RateLimited` when the upstream throttles,
/// `Parse` when the page loaded but its shape was unexpected, and `Network`
/// for everything transport-related.
#[async_trait]
pub trait Fetcher<S>: Send + Sync + 'static
where
    S: Send + Sync + 'static,
{
    async fn fetch(&self, session: &S, target: &MonitorTarget) -> Result<Vec<RawItem>, FetchError>;
}
