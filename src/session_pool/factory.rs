//! Contract for whatever actually creates remote sessions

use async_trait::async_trait;

use super::SessionIdentity;
use crate::error::{FactoryError, SaveError};

/// Creates, persists and destroys live sessions on behalf of the pool
///
/// Creation and closing are expensive (seconds). The pool only ever calls
/// them while holding the lock of the identity concerned.
#[async_trait]
pub trait SessionFactory: Send + Sync + 'static {
    /// Live session handle shared by concurrent borrowers
    type Session: Send + Sync + 'static;

    /// Create a new live session for `identity`
    async fn create(&self, identity: &SessionIdentity) -> Result<Self::Session, FactoryError>;

    /// Persist durable state (authentication cookies and the like)
    async fn save(&self, session: &Self::Session) -> Result<(), SaveError>;

    /// Tear the session down; errors are the factory's to log
    async fn close(&self, session: &Self::Session);

    /// Whether a pooled session can still be handed out
    fn is_live(&self, _session: &Self::Session) -> bool {
        true
    }
}
