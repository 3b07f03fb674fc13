//! Borrowed session handle

use std::sync::Arc;

use super::{PoolEntry, SessionFactory, SessionIdentity, SessionPool};

/// One outstanding borrow of a pooled session
///
/// Holding a lease keeps the session's reference count above zero, which
/// shields it from the idle reaper. Give it back with
/// [`SessionPool::release`] to optionally persist state first; simply dropping
/// it also decrements the count, but never persists.
pub struct SessionLease<F: SessionFactory> {
    pub(super) session: Arc<F::Session>,
    pub(super) entry: Arc<PoolEntry<F::Session>>,
    pub(super) pool: Arc<SessionPool<F>>,
    pub(super) released: bool,
}

impl<F: SessionFactory> SessionLease<F> {
    /// Borrowed session
    #[must_use]
    pub fn session(&self) -> &F::Session {
        &self.session
    }

    /// Shareable handle to the borrowed session
    #[must_use]
    pub fn session_arc(&self) -> Arc<F::Session> {
        Arc::clone(&self.session)
    }

    /// Identity this lease was acquired for
    #[must_use]
    pub fn identity(&self) -> &SessionIdentity {
        &self.entry.identity
    }
}

impl<F: SessionFactory> std::fmt::Debug for SessionLease<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionLease")
            .field("identity", &self.entry.identity)
            .field("released", &self.released)
            .finish()
    }
}

impl<F: SessionFactory> Drop for SessionLease<F> {
    fn drop(&mut self) {
        if !self.released {
            self.released = true;
            self.pool.finish_release(&self.entry);
        }
    }
}
