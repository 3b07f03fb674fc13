//! Reference-counted pool of reusable remote sessions
//!
//! Sessions are keyed by [`SessionIdentity`] and created lazily on the first
//! `acquire` for an identity. Concurrent borrowers of the same identity share
//! one live session and bump its reference count. When the count drops to zero
//! the session stays warm until it has been idle for `idle_timeout`, after
//! which the background reaper closes it.
//!
//! Locking is per identity: each entry owns an async mutex that serializes
//! creation, reuse and reaping for that identity only. A slow creation for one
//! identity never blocks acquires of another. Releases only touch the entry's
//! atomic counter, so they never wait on a creation in flight.

pub mod factory;
pub mod identity;
pub mod lease;

pub use factory::SessionFactory;
pub use identity::SessionIdentity;
pub use lease::SessionLease;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::clock::SharedClock;
use crate::error::PoolError;

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for the session pool
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Close unborrowed sessions idle longer than this (default: 5 minutes)
    pub idle_timeout_secs: u64,
    /// Interval between reaper sweeps (default: 30s)
    pub reap_interval_secs: u64,
    /// How long shutdown waits for outstanding leases (default: 10s)
    pub shutdown_grace_secs: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            idle_timeout_secs: 300,
            reap_interval_secs: 30,
            shutdown_grace_secs: 10,
        }
    }
}

impl PoolConfig {
    #[must_use]
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    #[must_use]
    pub fn reap_interval(&self) -> Duration {
        Duration::from_secs(self.reap_interval_secs.max(1))
    }

    #[must_use]
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

// =============================================================================
// Pool Entry
// =============================================================================

/// Live session plus creation metadata
struct LiveSession<S> {
    session: Arc<S>,
    created_at: Instant,
}

/// State of one identity's slot
enum Slot<S> {
    /// No session yet, or the last creation failed
    Empty,
    /// A live session is pooled
    Ready(LiveSession<S>),
    /// Removed from the registry; acquirers must look the identity up again
    Retired,
}

/// Registry entry for one identity
pub(crate) struct PoolEntry<S> {
    pub(crate) identity: SessionIdentity,
    slot: tokio::sync::Mutex<Slot<S>>,
    refcount: AtomicUsize,
    last_released: parking_lot::Mutex<Instant>,
    live: AtomicBool,
}

impl<S> PoolEntry<S> {
    fn new(identity: SessionIdentity, now: Instant) -> Self {
        Self {
            identity,
            slot: tokio::sync::Mutex::new(Slot::Empty),
            refcount: AtomicUsize::new(0),
            last_released: parking_lot::Mutex::new(now),
            live: AtomicBool::new(false),
        }
    }

    fn refcount(&self) -> usize {
        self.refcount.load(Ordering::Acquire)
    }
}

// =============================================================================
// Statistics
// =============================================================================

/// Snapshot of one pool entry
#[derive(Debug, Clone, Serialize)]
pub struct SessionStats {
    pub identity: String,
    pub refcount: usize,
    pub live: bool,
    /// Seconds since the last release, only when nothing is borrowed
    pub idle_for_secs: Option<f64>,
}

/// Snapshot of the whole pool
#[derive(Debug, Clone, Serialize)]
pub struct PoolStats {
    pub live_sessions: usize,
    pub outstanding_leases: usize,
    pub shutting_down: bool,
    pub entries: Vec<SessionStats>,
}

/// Result of [`SessionPool::shutdown`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ShutdownReport {
    /// Sessions closed during shutdown
    pub closed: usize,
    /// Whether the grace period expired with leases still outstanding
    pub forced: bool,
}

// =============================================================================
// Session Pool
// =============================================================================

/// Reference-counted, idle-reaped session registry
pub struct SessionPool<F: SessionFactory> {
    factory: Arc<F>,
    config: PoolConfig,
    clock: SharedClock,
    entries: DashMap<SessionIdentity, Arc<PoolEntry<F::Session>>>,
    shutting_down: AtomicBool,
    /// Signalled whenever an entry's refcount drops to zero
    idle_notify: Notify,
    reaper_handle: parking_lot::Mutex<Option<JoinHandle<()>>>,
    shutdown_report: tokio::sync::Mutex<Option<ShutdownReport>>,
}

impl<F: SessionFactory> std::fmt::Debug for SessionPool<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionPool")
            .field("config", &self.config)
            .field("entries", &self.entries.len())
            .field("shutting_down", &self.shutting_down.load(Ordering::Relaxed))
            .finish()
    }
}

impl<F: SessionFactory> SessionPool<F> {
    /// Create a new pool (does NOT start the reaper)
    pub fn new(factory: Arc<F>, config: PoolConfig, clock: SharedClock) -> Arc<Self> {
        Arc::new(Self {
            factory,
            config,
            clock,
            entries: DashMap::new(),
            shutting_down: AtomicBool::new(false),
            idle_notify: Notify::new(),
            reaper_handle: parking_lot::Mutex::new(None),
            shutdown_report: tokio::sync::Mutex::new(None),
        })
    }

    #[must_use]
    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    #[must_use]
    pub fn factory(&self) -> &Arc<F> {
        &self.factory
    }

    #[must_use]
    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::Acquire)
    }

    /// Borrow a live session for `identity`, creating one if needed
    ///
    /// Suspends while another task is creating a session for the same
    /// identity. A failed creation leaves the entry empty so the next acquire
    /// starts over cleanly.
    pub async fn acquire(self: &Arc<Self>, identity: &SessionIdentity) -> Result<SessionLease<F>, PoolError> {
        loop {
            if self.is_shutting_down() {
                return Err(PoolError::ShuttingDown);
            }

            let entry = self
                .entries
                .entry(identity.clone())
                .or_insert_with(|| Arc::new(PoolEntry::new(identity.clone(), self.clock.now())))
                .clone();

            let mut slot = entry.slot.lock().await;

            if self.is_shutting_down() {
                return Err(PoolError::ShuttingDown);
            }

            match &*slot {
                Slot::Retired => {
                    // Reaped while we waited; look the identity up again
                    continue;
                }
                Slot::Ready(live) if self.factory.is_live(&live.session) => {
                    let session = Arc::clone(&live.session);
                    let refs = entry.refcount.fetch_add(1, Ordering::AcqRel) + 1;
                    drop(slot);
                    debug!(identity = %identity, refs, "Reusing pooled session");
                    return Ok(self.lease(entry, session));
                }
                Slot::Ready(_) => {
                    if let Slot::Ready(dead) = std::mem::replace(&mut *slot, Slot::Empty) {
                        warn!(
                            identity = %identity,
                            age = ?self.clock.now().saturating_duration_since(dead.created_at),
                            "Pooled session is no longer live, replacing it"
                        );
                        entry.live.store(false, Ordering::Release);
                        self.factory.close(&dead.session).await;
                    }
                }
                Slot::Empty => {}
            }

            info!(identity = %identity, "Creating pooled session");
            let session = match self.factory.create(identity).await {
                Ok(session) => Arc::new(session),
                Err(e) => {
                    *slot = Slot::Empty;
                    warn!(identity = %identity, "Session creation failed: {e}");
                    return Err(PoolError::Factory(e));
                }
            };

            if self.is_shutting_down() {
                // Shutdown began while we were creating; don't hand this one out
                self.factory.close(&session).await;
                return Err(PoolError::ShuttingDown);
            }

            *slot = Slot::Ready(LiveSession {
                session: Arc::clone(&session),
                created_at: self.clock.now(),
            });
            entry.live.store(true, Ordering::Release);
            entry.refcount.fetch_add(1, Ordering::AcqRel);
            drop(slot);
            return Ok(self.lease(entry, session));
        }
    }

    /// [`acquire`](Self::acquire) bounded by a deadline
    ///
    /// A creation still running when the deadline passes is abandoned; the
    /// entry stays empty and its refcount untouched, so the next acquire
    /// starts over.
    pub async fn acquire_within(
        self: &Arc<Self>,
        identity: &SessionIdentity,
        deadline: Duration,
    ) -> Result<SessionLease<F>, PoolError> {
        match tokio::time::timeout(deadline, self.acquire(identity)).await {
            Ok(result) => result,
            Err(_) => {
                warn!(identity = %identity, ?deadline, "Session acquisition timed out");
                Err(PoolError::AcquireTimeout {
                    identity: identity.to_string(),
                    after: deadline,
                })
            }
        }
    }

    fn lease(self: &Arc<Self>, entry:Arc<PoolEntry<F::Session>>, session: Arc<F::Session>) -> SessionLease<F> {
        SessionLease {
            session,
            entry,
            pool: Arc::clone(self),
            released: false,
        }
    }

    /// Give a lease back, persisting durable state first when asked
    ///
    /// The save hook runs while the lease is still counted, so the session
    /// cannot be reaped mid-save. Save failures are logged, not returned.
    pub async fn release(&self, mut lease: SessionLease<F>, persist_hint: bool) {
        if persist_hint {
            if let Err(e) = self.factory.save(lease.session()).await {
                warn!(identity = %lease.identity(), "Failed to persist session state: {e}");
            } else {
                debug!(identity = %lease.identity(), "Persisted session state");
            }
        }
        lease.released = true;
        self.finish_release(&lease.entry);
    }

    /// Decrement an entry's refcount without ever going below zero
    pub(crate) fn finish_release(&self, entry: &PoolEntry<F::Session>) {
        *entry.last_released.lock() = self.clock.now();

        let previous = entry
            .refcount
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));

        match previous {
            Ok(1) => {
                debug!(identity = %entry.identity, "Session idle");
                self.idle_notify.notify_waiters();
            }
            Ok(refs) => debug!(identity = %entry.identity, refs = refs - 1, "Released session"),
            Err(_) => warn!(identity = %entry.identity, "Release without outstanding lease ignored"),
        }
    }

    /// Scoped acquisition: borrow, run `f`, release on every exit path
    ///
    /// If `f` panics or the returned future is dropped, the lease is still
    /// returned through its `Drop` (without persisting).
    pub async fn with_session<T, Fut, Op>(
        self: &Arc<Self>,
        identity: &SessionIdentity,
        persist_hint: bool,
        op: Op,
    ) -> Result<T, PoolError>
    where
        Op: FnOnce(Arc<F::Session>) -> Fut,
        Fut: Future<Output = T>,
    {
        let lease = self.acquire(identity).await?;
        let output = op(lease.session_arc()).await;
        self.release(lease, persist_hint).await;
        Ok(output)
    }

    /// Total leases currently outstanding across identities
    #[must_use]
    pub fn outstanding(&self) -> usize {
        self.entries.iter().map(|e| e.value().refcount()).sum()
    }

    /// Reference count for one identity (0 if unknown)
    #[must_use]
    pub fn refcount(&self, identity: &SessionIdentity) -> usize {
        self.entries.get(identity).map_or(0, |e| e.value().refcount())
    }

    /// One reaper sweep: close unborrowed sessions idle past the threshold
    ///
    /// Entries whose lock is held (a creation or reuse in flight) are skipped
    /// for this sweep. Returns the number of sessions closed.
    pub async fn reap_idle(&self) -> usize {
        let now = self.clock.now();
        let idle_timeout = self.config.idle_timeout();
        let candidates: Vec<_> = self.entries.iter().map(|e| Arc::clone(e.value())).collect();
        let mut reaped = 0;

        for entry in candidates {
            let Ok(mut slot) = entry.slot.try_lock() else {
                continue;
            };
            if entry.refcount() > 0 || matches!(*slot, Slot::Retired) {
                continue;
            }
            let idle_for = now.saturating_duration_since(*entry.last_released.lock());
            if idle_for < idle_timeout {
                continue;
            }

            let previous = std::mem::replace(&mut *slot, Slot::Retired);
            entry.live.store(false, Ordering::Release);
            self.entries
                .remove_if(&entry.identity, |_, current| Arc::ptr_eq(current, &entry));
            drop(slot);

            if let Slot::Ready(live) = previous {
                info!(identity = %entry.identity, idle = ?idle_for, "Reaping idle session");
                self.factory.close(&live.session).await;
                reaped += 1;
            }
        }

        if reaped > 0 {
            debug!(reaped, "Reaper sweep complete");
        }
        reaped
    }

    /// Start the background reaper (every `reap_interval`)
    ///
    /// The task holds only a weak reference, so it ends on its own once the
    /// pool is dropped; `shutdown` aborts it explicitly.
    pub fn start_reaper(self: &Arc<Self>) {
        let weak: Weak<Self> = Arc::downgrade(self);
        let period = self.config.reap_interval();

        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.tick().await;
            loop {
                interval.tick().await;
                let Some(pool) = weak.upgrade() else { break };
                if pool.is_shutting_down() {
                    break;
                }
                pool.reap_idle().await;
            }
            debug!("Reaper loop exiting");
        });

        if let Some(previous) = self.reaper_handle.lock().replace(handle) {
            previous.abort();
        }
    }

    /// Gracefully shut the pool down
    ///
    /// Blocks new acquires, waits up to `grace` for outstanding leases to come
    /// back, then closes every session. Calling it again returns the first
    /// report.
    pub async fn shutdown(&self, grace: Duration) -> ShutdownReport {
        let mut report_slot = self.shutdown_report.lock().await;
        if let Some(report) = *report_slot {
            return report;
        }

        info!("Shutting down session pool");
        self.shutting_down.store(true, Ordering::Release);

        if let Some(handle) = self.reaper_handle.lock().take() {
            handle.abort();
        }

        let deadline = tokio::time::Instant::now() + grace;
        loop {
            let notified = self.idle_notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.outstanding() == 0 {
                break;
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                break;
            }
        }

        let forced = self.outstanding() > 0;
        if forced {
            warn!(
                outstanding = self.outstanding(),
                "Shutdown grace expired with leases outstanding, closing anyway"
            );
        }

        let entries: Vec<_> = self.entries.iter().map(|e| Arc::clone(e.value())).collect();
        self.entries.clear();

        let mut closed = 0;
        for entry in entries {
            let mut slot = entry.slot.lock().await;
            let previous = std::mem::replace(&mut *slot, Slot::Retired);
            entry.live.store(false, Ordering::Release);
            drop(slot);
            if let Slot::Ready(live) = previous {
                self.factory.close(&live.session).await;
                closed += 1;
            }
        }

        let report = ShutdownReport { closed, forced };
        info!(closed, forced, "Session pool shutdown complete");
        *report_slot = Some(report);
        report
    }

    /// Read-only snapshot for health surfaces
    #[must_use]
    pub fn stats(&self) -> PoolStats {
        let now = self.clock.now();
        let mut entries: Vec<SessionStats> = self
            .entries
            .iter()
            .map(|e| {
                let entry = e.value();
                let refcount = entry.refcount();
                let idle_for_secs = (refcount == 0).then(|| {
                    now.saturating_duration_since(*entry.last_released.lock())
                        .as_secs_f64()
                });
                SessionStats {
                    identity: entry.identity.to_string(),
                    refcount,
                    live: entry.live.load(Ordering::Acquire),
                    idle_for_secs,
                }
            })
            .collect();
        entries.sort_by(|a, b| a.identity.cmp(&b.identity));

        PoolStats {
            live_sessions: entries.iter().filter(|e| e.live).count(),
            outstanding_leases: entries.iter().map(|e| e.refcount).sum(),
            shutting_down: self.is_shutting_down(),
            entries,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::error::{FactoryError, SaveError};
    use async_trait::async_trait;
    use std::sync::atomic::AtomicU64;

    #[derive(Debug)]
    struct FakeSession {
        id: u64,
        dead: AtomicBool,
    }

    #[derive(Default)]
    struct FakeFactory {
        next_id: AtomicU64,
        created: AtomicUsize,
        closed: AtomicUsize,
        saved: AtomicUsize,
        fail_next: AtomicBool,
        /// Creations for this identity park until the gate is notified
        held: parking_lot::Mutex<Option<(SessionIdentity, Arc<Notify>)>>,
        /// Signalled when a parked creation has started
        creating: Notify,
    }

    impl FakeFactory {
        fn hold_creation(&self, identity: &SessionIdentity) -> Arc<Notify> {
            let gate = Arc::new(Notify::new());
            *self.held.lock() = Some((identity.clone(), Arc::clone(&gate)));
            gate
        }
    }

    #[async_trait]
    impl SessionFactory for FakeFactory {
        type Session = FakeSession;

        async fn create(&self, identity: &SessionIdentity) -> Result<FakeSession, FactoryError> {
            if self.fail_next.swap(false, Ordering::SeqCst) {
                return Err(FactoryError::new(identity.as_str(), "launch failed"));
            }
            let gate = self
                .held
                .lock()
                .as_ref()
                .filter(|(held, _)| held == identity)
                .map(|(_, gate)| Arc::clone(gate));
            if let Some(gate) = gate {
                self.creating.notify_one();
                gate.notified().await;
            }
            self.created.fetch_add(1, Ordering::SeqCst);
            Ok(FakeSession {
                id: self.next_id.fetch_add(1, Ordering::SeqCst),
                dead: AtomicBool::new(false),
            })
        }

        async fn save(&self, _session: &FakeSession) -> Result<(), SaveError> {
            self.saved.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn close(&self, _session: &FakeSession) {
            self.closed.fetch_add(1, Ordering::SeqCst);
        }

        fn is_live(&self, session: &FakeSession) -> bool {
            !session.dead.load(Ordering::SeqCst)
        }
    }

    fn pool() -> (Arc<FakeFactory>, Arc<ManualClock>, Arc<SessionPool<FakeFactory>>) {
        let factory = Arc::new(FakeFactory::default());
        let clock = Arc::new(ManualClock::starting_now());
        let config = PoolConfig {
            idle_timeout_secs: 60,
            reap_interval_secs: 1,
            shutdown_grace_secs: 1,
        };
        let pool = SessionPool::new(factory.clone(), config, clock.clone());
        (factory, clock, pool)
    }

    #[tokio::test]
    async fn test_concurrent_borrowers_share_one_session() {
        let (factory, _clock, pool) = pool();
        let id = SessionIdentity::new("alice");

        let a = pool.acquire(&id).await.expect("first acquire");
        let b = pool.acquire(&id).await.expect("second acquire");

        assert_eq!(a.session().id, b.session().id);
        assert_eq!(pool.refcount(&id), 2);
        assert_eq!(factory.created.load(Ordering::SeqCst), 1);

        pool.release(a, false).await;
        assert_eq!(pool.refcount(&id), 1);
        drop(b);
        assert_eq!(pool.refcount(&id), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_one_creation_serves_every_waiting_borrower() {
        let (factory, _clock, pool) = pool();
        let slow = SessionIdentity::new("a");
        let gate = factory.hold_creation(&slow);

        let mut borrowers = tokio::task::JoinSet::new();
        for _ in 0..16 {
            let pool = Arc::clone(&pool);
            let slow = slow.clone();
            borrowers.spawn(async move { pool.acquire(&slow).await });
        }
        factory.creating.notified().await;

        // A parked creation for "a" leaves other identities alone
        let other = tokio::time::timeout(Duration::from_secs(5), pool.acquire(&SessionIdentity::new("b")))
            .await
            .expect("acquire of b does not wait on a")
            .expect("b created");
        assert_eq!(pool.refcount(&slow), 0);
        assert_eq!(factory.created.load(Ordering::SeqCst), 1);

        gate.notify_one();
        let mut leases = Vec::new();
        while let Some(joined) = borrowers.join_next().await {
            leases.push(joined.expect("borrower task").expect("acquire of a"));
        }

        assert_eq!(factory.created.load(Ordering::SeqCst), 2);
        assert_eq!(pool.refcount(&slow), 16);
        let first = leases[0].session().id;
        assert!(leases.iter().all(|lease| lease.session().id == first));

        drop(leases);
        drop(other);
        assert_eq!(pool.outstanding(), 0);
    }

    #[tokio::test]
    async fn test_acquire_within_abandons_a_hung_creation() {
        let (factory, _clock, pool) = pool();
        let id = SessionIdentity::new("a");
        let gate = factory.hold_creation(&id);

        let err = pool
            .acquire_within(&id, Duration::from_millis(50))
            .await
            .expect_err("creation is parked");
        assert!(matches!(err, PoolError::AcquireTimeout { .. }));
        assert_eq!(pool.refcount(&id), 0);

        *factory.held.lock() = None;
        drop(gate);
        let lease = pool.acquire_within(&id, Duration::from_secs(5)).await.expect("fresh creation");
        assert_eq!(pool.refcount(&id), 1);
        drop(lease);
    }

    #[tokio::test]
    async fn test_release_with_persist_calls_save() {
        let (factory, _clock, pool) = pool();
        let id = SessionIdentity::new("alice");

        let lease = pool.acquire(&id).await.expect("acquire");
        pool.release(lease, true).await;
        let lease = pool.acquire(&id).await.expect("acquire");
        pool.release(lease, false).await;

        assert_eq!(factory.saved.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_factory_failure_clears_entry_for_retry() {
        let (factory, _clock, pool) = pool();
        let id = SessionIdentity::new("bob");
        factory.fail_next.store(true, Ordering::SeqCst);

        let err = pool.acquire(&id).await.expect_err("creation should fail");
        assert!(matches!(err, PoolError::Factory(_)));
        assert_eq!(pool.refcount(&id), 0);

        let lease = pool.acquire(&id).await.expect("retry should create cleanly");
        assert_eq!(factory.created.load(Ordering::SeqCst), 1);
        drop(lease);
    }

    #[tokio::test]
    async fn test_dead_session_is_replaced() {
        let (factory, _clock, pool) = pool();
        let id = SessionIdentity::new("carol");

        let lease = pool.acquire(&id).await.expect("acquire");
        let first = lease.session().id;
        lease.session().dead.store(true, Ordering::SeqCst);
        pool.release(lease, false).await;

        let lease = pool.acquire(&id).await.expect("acquire");
        assert_ne!(lease.session().id, first);
        assert_eq!(factory.closed.load(Ordering::SeqCst), 1);
        drop(lease);
    }

    #[tokio::test]
    async fn test_reaper_skips_borrowed_and_closes_idle() {
        let (factory, clock, pool) = pool();
        let held = SessionIdentity::new("held");
        let idle = SessionIdentity::new("idle");

        let lease = pool.acquire(&held).await.expect("acquire held");
        let other = pool.acquire(&idle).await.expect("acquire idle");
        pool.release(other, false).await;

        clock.advance(Duration::from_secs(30));
        assert_eq!(pool.reap_idle().await, 0);

        clock.advance(Duration::from_secs(31));
        assert_eq!(pool.reap_idle().await, 1);
        assert_eq!(factory.closed.load(Ordering::SeqCst), 1);
        assert_eq!(pool.refcount(&held), 1);
        assert_eq!(pool.stats().live_sessions, 1);

        // A reaped identity is recreated on demand
        let again = pool.acquire(&idle).await.expect("reacquire");
        assert_eq!(factory.created.load(Ordering::SeqCst), 3);
        drop(again);
        drop(lease);
    }

    #[tokio::test]
    async fn test_shutdown_blocks_acquire_and_is_idempotent() {
        let (factory, _clock, pool) = pool();
        let id = SessionIdentity::new("dave");
        let lease = pool.acquire(&id).await.expect("acquire");
        pool.release(lease, false).await;

        let report = pool.shutdown(Duration::from_millis(50)).await;
        assert_eq!(report, ShutdownReport { closed: 1, forced: false });
        assert!(matches!(pool.acquire(&id).await, Err(PoolError::ShuttingDown)));

        let again = pool.shutdown(Duration::from_millis(50)).await;
        assert_eq!(again, report);
        assert_eq!(factory.closed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_shutdown_waits_for_outstanding_lease() {
        let (_factory, _clock, pool) = pool();
        let id = SessionIdentity::new("erin");
        let lease = pool.acquire(&id).await.expect("acquire");

        let releaser = {
            let pool = Arc::clone(&pool);
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                pool.release(lease, false).await;
            })
        };

        let report = pool.shutdown(Duration::from_secs(5)).await;
        assert!(!report.forced);
        assert_eq!(report.closed, 1);
        releaser.await.expect("releaser task");
    }

    #[tokio::test]
    async fn test_shutdown_forces_after_grace() {
        let (_factory, _clock, pool) = pool();
        let id = SessionIdentity::new("frank");
        let lease = pool.acquire(&id).await.expect("acquire");

        let report = pool.shutdown(Duration::from_millis(20)).await;
        assert!(report.forced);
        drop(lease);
        assert_eq!(pool.outstanding(), 0);
    }

    #[tokio::test]
    async fn test_with_session_releases_on_error_path() {
        let (_factory, _clock, pool) = pool();
        let id = SessionIdentity::new("gina");

        let result: Result<Result<(), &str>, PoolError> = pool
            .with_session(&id, true, |_session| async { Err("fetch failed") })
            .await;

        assert!(matches!(result, Ok(Err("fetch failed"))));
        assert_eq!(pool.refcount(&id), 0);
    }
}
