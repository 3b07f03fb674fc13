//! Per-target tick loop tying schedule, limiter, pool, fetch, dedup and notify together
//!
//! Each tick walks one target through
//! `Evaluating → (Skip | Admitting → Fetching → Deduping → Notifying)`.
//! A target never overlaps with itself: a tick that finds the previous one
//! still running reports `InFlight` and does nothing. Different targets tick
//! concurrently and only meet at the session pool and the rate limiter; the
//! run loop gives every target its own task so a slow one never holds back
//! the rest.

pub mod classify;
pub mod outcome;
pub mod target;
pub mod timeout;

pub use classify::{FailureKind, Severity, TickError};
pub use outcome::{TickFailure, TickOutcome, TickStatus};
pub use target::{MonitorTarget, TargetStatus};

use chrono::NaiveDateTime;
use dashmap::DashMap;
use futures::StreamExt;
use futures::stream::FuturesUnordered;
use log::{debug, error, info, log, warn};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Semaphore, broadcast};
use tokio::task::{JoinError, JoinSet};
use tokio::time::MissedTickBehavior;

use crate::clock::SharedClock;
use crate::dedup::DedupAndPersist;
use crate::error::{NotifyError, StoreError};
use crate::fetch::Fetcher;
use crate::item::{RawItem, TargetId};
use crate::notify::Notifier;
use crate::rate_limiter::{FETCH_RESOURCE, LimiterStats, NOTIFY_RESOURCE, RateLimiter};
use crate::schedule::{ScheduleEvaluator, ScheduleMode, ScheduleRule};
use crate::session_pool::{PoolStats, SessionFactory, SessionPool, ShutdownReport};
use crate::utils::constants::{
    DEFAULT_ACQUIRE_TIMEOUT_SECS, DEFAULT_FACTORY_BACKOFF_BASE_SECS, DEFAULT_FACTORY_BACKOFF_MAX_SECS, DEFAULT_FETCH_TIMEOUT_SECS,
    DEFAULT_MAX_PENDING, DEFAULT_NOTIFY_TIMEOUT_SECS, DEFAULT_TICK_INTERVAL_SECS,
};
use target::{InFlightGuard, PendingNotice, TargetState};
use timeout::{with_fetch_timeout, with_notify_timeout};

/// Outcome broadcast buffer; slow subscribers see `Lagged` past this
const OUTCOME_CHANNEL_CAPACITY: usize = 256;

// =============================================================================
// Configuration
// =============================================================================

/// Tick loop configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    /// How often every target is evaluated (default: 15s)
    pub tick_interval_secs: u64,
    /// Deadline for borrowing a session, creation included (default: 90s)
    pub acquire_timeout_secs: u64,
    /// Deadline for one fetch, excluding session creation (default: 60s)
    pub fetch_timeout_secs: u64,
    /// Deadline for one notification (default: 15s)
    pub notify_timeout_secs: u64,
    /// First delay after a session-creation failure (default: 30s)
    pub factory_backoff_base_secs: u64,
    /// Upper bound for the doubling backoff (default: 30min)
    pub factory_backoff_max_secs: u64,
    /// Queued notifications kept per target (default: 500)
    pub max_pending: usize,
    /// Targets ticked at once (default: 4)
    pub max_concurrent_ticks: usize,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            tick_interval_secs: DEFAULT_TICK_INTERVAL_SECS,
            acquire_timeout_secs: DEFAULT_ACQUIRE_TIMEOUT_SECS,
            fetch_timeout_secs: DEFAULT_FETCH_TIMEOUT_SECS,
            notify_timeout_secs: DEFAULT_NOTIFY_TIMEOUT_SECS,
            factory_backoff_base_secs: DEFAULT_FACTORY_BACKOFF_BASE_SECS,
            factory_backoff_max_secs: DEFAULT_FACTORY_BACKOFF_MAX_SECS,
            max_pending: DEFAULT_MAX_PENDING,
            max_concurrent_ticks: 4,
        }
    }
}

impl RunnerConfig {
    #[must_use]
    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.tick_interval_secs.max(1))
    }

    #[must_use]
    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_secs(self.acquire_timeout_secs)
    }

    #[must_use]
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    #[must_use]
    pub fn notify_timeout(&self) -> Duration {
        Duration::from_secs(self.notify_timeout_secs)
    }

    /// `base * 2^(failures-1)`, capped at the configured maximum
    #[must_use]
    pub fn factory_backoff(&self, failures: u32) -> Duration {
        let exponent = failures.saturating_sub(1).min(20);
        let secs = self
            .factory_backoff_base_secs
            .saturating_mul(1u64 << exponent)
            .min(self.factory_backoff_max_secs);
        Duration::from_secs(secs)
    }
}

// =============================================================================
// Health
// =============================================================================

/// Pool, limiter and target state in one document
#[derive(Debug, Clone, Serialize)]
pub struct HealthSnapshot {
    pub pool: PoolStats,
    pub limiters: BTreeMap<String, LimiterStats>,
    pub targets: Vec<TargetStatus>,
}

// =============================================================================
// Orchestrator
// =============================================================================

/// Collaborators an [`Orchestrator`] is assembled from
pub struct Components<F: SessionFactory> {
    pub pool: Arc<SessionPool<F>>,
    pub limiter: Arc<RateLimiter>,
    pub store: Arc<dyn crate::store::ItemStore>,
    pub fetcher: Arc<dyn Fetcher<F::Session>>,
    pub notifier: Arc<dyn Notifier>,
    pub evaluator: ScheduleEvaluator,
    pub clock: SharedClock,
}

/// What the schedule asked this tick to do
enum Plan {
    Fetch { mode: ScheduleMode, flush: Option<NaiveDateTime> },
    Skip { mode: ScheduleMode, status: TickStatus },
}

pub struct Orchestrator<F: SessionFactory> {
    pool: Arc<SessionPool<F>>,
    limiter: Arc<RateLimiter>,
    store: Arc<dyn crate::store::ItemStore>,
    dedup: DedupAndPersist,
    fetcher: Arc<dyn Fetcher<F::Session>>,
    notifier: Arc<dyn Notifier>,
    evaluator: ScheduleEvaluator,
    clock: SharedClock,
    config: RunnerConfig,
    targets: DashMap<TargetId, Arc<TargetState>>,
    outcomes: broadcast::Sender<TickOutcome>,
}

impl<F: SessionFactory> std::fmt::Debug for Orchestrator<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("targets", &self.targets.len())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl<F: SessionFactory> Orchestrator<F> {
    pub fn new(components: Components<F>, config: RunnerConfig) -> Arc<Self> {
        let (outcomes, _) = broadcast::channel(OUTCOME_CHANNEL_CAPACITY);
        Arc::new(Self {
            dedup: DedupAndPersist::new(Arc::clone(&components.store)),
            pool: components.pool,
            limiter: components.limiter,
            store: components.store,
            fetcher: components.fetcher,
            notifier: components.notifier,
            evaluator: components.evaluator,
            clock: components.clock,
            config,
            targets: DashMap::new(),
            outcomes,
        })
    }

    #[must_use]
    pub fn pool(&self) -> &Arc<SessionPool<F>> {
        &self.pool
    }

    #[must_use]
    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    /// Receive every tick outcome from now on
    pub fn subscribe(&self) -> broadcast::Receiver<TickOutcome> {
        self.outcomes.subscribe()
    }

    // -------------------------------------------------------------------------
    // Target management
    // -------------------------------------------------------------------------

    /// Start monitoring `target`; false if its id is already registered
    pub fn add_target(&self, target: MonitorTarget) -> bool {
        let id = target.id.clone();
        match self.targets.entry(id.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                warn!("Target {id} already registered");
                false
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(Arc::new(TargetState::new(target)));
                info!("Registered target {id}");
                true
            }
        }
    }

    /// Stop monitoring a target; a tick already running finishes on its own
    pub fn remove_target(&self, id: &TargetId) -> bool {
        let removed = self.targets.remove(id).is_some();
        if removed {
            info!("Removed target {id}");
        }
        removed
    }

    /// Replace a target's schedule rules
    pub fn set_rules(&self, id: &TargetId, rules: Vec<ScheduleRule>) -> bool {
        let Some(state) = self.state(id) else { return false };
        state.target.write().rules = rules;
        debug!("Updated schedule rules for target {id}");
        true
    }

    /// External reset after re-authentication: clear the broken flag and backoff
    pub async fn reset_target(&self, id: &TargetId) -> Result<bool, StoreError> {
        let Some(state) = self.state(id) else { return Ok(false) };
        self.store.clear_target_broken(id).await?;
        {
            let mut runtime = state.runtime.lock();
            runtime.broken = None;
            runtime.factory_failures = 0;
            runtime.backoff_until = None;
        }
        info!("Target {id} reset, scheduling resumed");
        Ok(true)
    }

    /// Restore broken flags and flush markers persisted by earlier runs
    ///
    /// Returns the number of registered targets found broken.
    pub async fn load_broken_targets(&self) -> Result<usize, StoreError> {
        let mut broken = 0;
        for record in self.store.broken_targets().await? {
            if let Some(state) = self.state(&record.target_id) {
                warn!("Target {} is marked broken: {}", record.target_id, record.reason);
                state.runtime.lock().broken = Some(record.reason);
                broken += 1;
            }
        }

        let states: Vec<(TargetId, Arc<TargetState>)> =
            self.targets.iter().map(|e| (e.key().clone(), Arc::clone(e.value()))).collect();
        for (id, state) in states {
            if let Some(marker) = self.store.last_flush(&id).await? {
                let mut runtime = state.runtime.lock();
                runtime.last_flushed = runtime.last_flushed.max(Some(marker));
            }
        }

        Ok(broken)
    }

    fn state(&self, id: &TargetId) -> Option<Arc<TargetState>> {
        self.targets.get(id).map(|e| Arc::clone(e.value()))
    }

    /// Registered target ids, sorted
    #[must_use]
    pub fn target_ids(&self) -> Vec<TargetId> {
        let mut ids: Vec<TargetId> = self.targets.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    /// Snapshot of one target
    #[must_use]
    pub fn target_status(&self, id: &TargetId) -> Option<TargetStatus> {
        let state = self.state(id)?;
        let target = state.target.read().clone();
        let runtime = state.runtime.lock();
        let next_check = runtime.broken.is_none().then(|| {
            self.evaluator
                .next_check_at(&target.rules, runtime.last_checked, self.clock.wall())
        });
        Some(TargetStatus {
            session: target.session_identity(),
            target_id: target.id,
            url: target.url,
            broken: runtime.broken.clone(),
            in_flight: state.is_in_flight(),
            last_checked: runtime.last_checked,
            last_mode: runtime.last_mode,
            last_flushed: runtime.last_flushed,
            last_status: runtime.last_status,
            next_check,
            pending_notifications: state.pending_len(),
            factory_failures: runtime.factory_failures,
        })
    }

    /// Pool, limiter and per-target state for health surfaces
    #[must_use]
    pub fn health(&self) -> HealthSnapshot {
        HealthSnapshot {
            pool: self.pool.stats(),
            limiters: self.limiter.all_stats(),
            targets: self
                .target_ids()
                .iter()
                .filter_map(|id| self.target_status(id))
                .collect(),
        }
    }

    // -------------------------------------------------------------------------
    // Ticking
    // -------------------------------------------------------------------------

    /// Run one tick for every target, at most `max_concurrent_ticks` at a time
    pub async fn tick_all(&self) -> Vec<TickOutcome> {
        let mut queue = self.target_ids().into_iter();
        let concurrency = self.config.max_concurrent_ticks.max(1);
        let mut active = FuturesUnordered::new();
        let mut outcomes = Vec::new();

        loop {
            while active.len() < concurrency {
                let Some(id) = queue.next() else { break };
                active.push(async move { self.tick_target(&id).await });
            }
            match active.next().await {
                Some(Some(outcome)) => outcomes.push(outcome),
                Some(None) => {}
                None => break,
            }
        }

        outcomes
    }

    /// Run one tick for one target; `None` if the target is unknown
    pub async fn tick_target(&self, id: &TargetId) -> Option<TickOutcome> {
        let state = self.state(id)?;
        let Some(claim) = state.begin_tick() else {
            debug!("Target {id} still has a tick in flight, skipping");
            let outcome = TickOutcome::new(id.clone(), self.clock.wall(), TickStatus::InFlight);
            return Some(self.publish(&state, outcome));
        };
        Some(self.tick_claimed(id, &state, claim).await)
    }

    /// Tick a target whose in-flight flag the caller already holds
    async fn tick_claimed(&self, id: &TargetId, state: &TargetState, claim: InFlightGuard) -> TickOutcome {
        let outcome = self.run_tick(id, state).await;
        drop(claim);
        self.publish(state, outcome)
    }

    fn publish(&self, state: &TargetState, outcome: TickOutcome) -> TickOutcome {
        state.runtime.lock().last_status = Some(outcome.status);
        // No subscribers is fine
        let _ = self.outcomes.send(outcome.clone());
        outcome
    }

    async fn run_tick(&self, id: &TargetId, state: &TargetState) -> TickOutcome {
        let wall = self.clock.wall();

        if state.runtime.lock().broken.is_some() {
            debug!("Target {id} is broken, skipping");
            return TickOutcome::new(id.clone(), wall, TickStatus::Broken);
        }

        let mut notify_error = None;
        let mut notified = self.drain_pending(id, state, &mut notify_error).await;

        let mut outcome = match self.plan(state, wall) {
            Plan::Skip { mode, status } => {
                let mut outcome = TickOutcome::new(id.clone(), wall, status);
                outcome.mode = Some(mode);
                outcome
            }
            Plan::Fetch { mode, flush } => {
                let mut outcome = TickOutcome::new(id.clone(), wall, TickStatus::Completed);
                outcome.mode = Some(mode);
                if self.limiter.try_admit(FETCH_RESOURCE) {
                    self.fetch_and_persist(id, state, wall, mode, flush, &mut outcome).await;
                    if outcome.error.is_none() {
                        notified += self.drain_pending(id, state, &mut notify_error).await;
                    }
                } else {
                    debug!("Fetch admission denied for target {id}, retrying next tick");
                    outcome.status = TickStatus::RateLimited;
                }
                outcome
            }
        };

        outcome.notified = notified;
        outcome.pending = state.pending_len();
        if outcome.error.is_none()
            && let Some(e) = notify_error
        {
            outcome.error = Some(self.classify(id, &TickError::Notify(e)));
        }
        outcome
    }

    /// Decide what this tick should do
    fn plan(&self, state: &TargetState, wall: NaiveDateTime) -> Plan {
        let rules = state.target.read().rules.clone();
        let runtime = state.runtime.lock();

        if let Some(until) = runtime.backoff_until
            && self.clock.now() < until
        {
            return Plan::Skip {
                mode: self.evaluator.evaluate(&rules, wall).mode,
                status: TickStatus::BackingOff,
            };
        }

        if let Some(due) = self.evaluator.due_flush(&rules, wall, runtime.last_flushed) {
            return Plan::Fetch {
                mode: ScheduleMode::BatchedSummary,
                flush: Some(due.boundary),
            };
        }

        let evaluation = self.evaluator.evaluate(&rules, wall);
        match evaluation.mode {
            ScheduleMode::BatchedSummary => Plan::Skip {
                mode: evaluation.mode,
                status: TickStatus::Deferred,
            },
            ScheduleMode::Frequent
                if !self
                    .evaluator
                    .should_run_now(runtime.last_checked, wall, evaluation.interval_secs) =>
            {
                Plan::Skip {
                    mode: evaluation.mode,
                    status: TickStatus::NotDue,
                }
            }
            ScheduleMode::Frequent => Plan::Fetch {
                mode: evaluation.mode,
                flush: None,
            },
        }
    }

    /// Fetching → Deduping, then queue what has to be notified
    async fn fetch_and_persist(
        &self,
        id: &TargetId,
        state: &TargetState,
        wall: NaiveDateTime,
        mode: ScheduleMode,
        flush: Option<NaiveDateTime>,
        outcome: &mut TickOutcome,
    ) {
        let target = state.target.read().clone();
        let identity = target.session_identity();
        let operation = format!("Fetch of {id}");

        // Released (and persisted) on every path; a dropped future still decrements via the lease
        let fetched = match self.pool.acquire_within(&identity, self.config.acquire_timeout()).await {
            Ok(lease) => {
                let fetched = with_fetch_timeout(
                    self.fetcher.fetch(lease.session(), &target),
                    self.config.fetch_timeout(),
                    &operation,
                )
                .await;
                self.pool.release(lease, true).await;
                fetched.map_err(TickError::Fetch)
            }
            Err(e) => Err(TickError::Pool(e)),
        };

        {
            let mut runtime = state.runtime.lock();
            runtime.last_checked = Some(wall);
            runtime.last_mode = Some(mode);
        }

        let items: Vec<RawItem> = match fetched {
            Ok(items) => {
                let mut runtime = state.runtime.lock();
                runtime.factory_failures = 0;
                runtime.backoff_until = None;
                items
            }
            Err(e) => return self.fail(id, state, e, outcome).await,
        };

        let deduped = match self.dedup.filter_and_store(id, items).await {
            Ok(deduped) => deduped,
            Err(e) => return self.fail(id, state, TickError::Store(e), outcome).await,
        };
        outcome.inserted_count = deduped.inserted_count;
        outcome.skipped_count = deduped.skipped_count;

        match flush {
            Some(boundary) => {
                if !deduped.inserted.is_empty() {
                    self.enqueue(id, state, PendingNotice::Summary(deduped.inserted));
                }
                if let Err(e) = self.store.record_flush(id, boundary).await {
                    error!("Failed to persist flush marker for target {id}: {e}");
                }
                let mut runtime = state.runtime.lock();
                runtime.last_flushed = runtime.last_flushed.max(Some(boundary));
                outcome.status = TickStatus::Flushed;
                info!(
                    "Target {id} flushed batched boundary {boundary} with {} new items",
                    outcome.inserted_count
                );
            }
            None => {
                for item in deduped.inserted {
                    self.enqueue(id, state, PendingNotice::Item(item));
                }
                if outcome.inserted_count > 0 {
                    info!("Target {id}: {} new items", outcome.inserted_count);
                }
            }
        }
    }

    fn enqueue(&self, id: &TargetId, state: &TargetState, notice: PendingNotice) {
        let dropped = state.enqueue(notice, self.config.max_pending);
        if dropped > 0 {
            warn!("Pending notifications for target {id} over capacity, dropped {dropped} oldest");
        }
    }

    /// Notifying: deliver queued notices while `notify` admission allows
    ///
    /// Denials and transient failures (throttling, transport, timeouts, 5xx)
    /// leave the notice at the head of the queue for the next tick. Only
    /// payloads the endpoint rejected outright are dropped.
    async fn drain_pending(&self, id: &TargetId, state: &TargetState, last_error: &mut Option<NotifyError>) -> usize {
        let mut delivered = 0;
        loop {
            let Some(notice) = state.pending.lock().pop_front() else { break };

            if !self.limiter.try_admit(NOTIFY_RESOURCE) {
                debug!("Notify admission denied for target {id}, keeping notice queued");
                state.pending.lock().push_front(notice);
                break;
            }

            let timeout = self.config.notify_timeout();
            let result = match &notice {
                PendingNotice::Item(item) => with_notify_timeout(self.notifier.send(id, item), timeout).await,
                PendingNotice::Summary(items) => {
                    with_notify_timeout(self.notifier.send_summary(id, items), timeout).await
                }
            };

            match result {
                Ok(()) => delivered += 1,
                Err(NotifyError::Rejected { status, body }) => {
                    warn!("Notification for target {id} rejected ({status}), dropping it: {body}");
                    *last_error = Some(NotifyError::Rejected { status, body });
                }
                Err(e) => {
                    state.pending.lock().push_front(notice);
                    *last_error = Some(e);
                    break;
                }
            }
        }
        delivered
    }

    /// Classify, log and apply the consequences of a failed tick
    async fn fail(&self, id: &TargetId, state: &TargetState, error: TickError, outcome: &mut TickOutcome) {
        let failure = self.classify(id, &error);
        match failure.kind {
            FailureKind::AuthExpired => {
                state.runtime.lock().broken = Some(failure.message.clone());
                if let Err(e) = self.store.mark_target_broken(id, &failure.message).await {
                    error!("Failed to persist broken flag for target {id}: {e}");
                }
            }
            FailureKind::Factory => {
                let mut runtime = state.runtime.lock();
                runtime.factory_failures = runtime.factory_failures.saturating_add(1);
                let delay = self.config.factory_backoff(runtime.factory_failures);
                runtime.backoff_until = Some(self.clock.now() + delay);
                warn!(
                    "Target {id} backing off {delay:?} after {} session creation failures",
                    runtime.factory_failures
                );
            }
            FailureKind::RateLimited => {
                // Upstream backpressure; the next due tick simply tries again
                outcome.status = TickStatus::RateLimited;
                return;
            }
            _ => {}
        }
        outcome.status = TickStatus::Failed;
        outcome.error = Some(failure);
    }

    fn classify(&self, id: &TargetId, error: &TickError) -> TickFailure {
        let kind = FailureKind::classify(error);
        let message = error.to_string();
        match kind {
            FailureKind::AuthExpired => {
                log!(kind.log_level(), "Target {id} authentication expired, suspending until reset: {message}");
            }
            FailureKind::Parse => {
                log!(kind.log_level(), "Target {id} parse failure (upstream format drift?): {message}");
            }
            FailureKind::Other => log!(kind.log_level(), "Target {id} tick failed: {error:#?}"),
            _ => log!(kind.log_level(), "Target {id} tick failed ({kind}): {message}"),
        }
        TickFailure {
            kind,
            severity: kind.severity(),
            message,
        }
    }

    // -------------------------------------------------------------------------
    // Run loop
    // -------------------------------------------------------------------------

    /// Tick on the configured interval until `shutdown` resolves
    ///
    /// Every interval, each target that is not already in flight gets its own
    /// task; at most `max_concurrent_ticks` of them run at once. The reaper
    /// runs alongside. On shutdown no new ticks start, the ticks in progress
    /// finish (each call bounded by its own deadline), then the pool is
    /// drained within its grace period.
    pub async fn run(self: &Arc<Self>, shutdown: impl Future<Output = ()>) -> ShutdownReport {
        self.pool.start_reaper();
        let mut interval = tokio::time::interval(self.config.tick_interval());
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let permits = Arc::new(Semaphore::new(self.config.max_concurrent_ticks.max(1)));
        let mut ticks = JoinSet::new();
        tokio::pin!(shutdown);

        info!(
            "Monitoring {} targets every {:?}",
            self.targets.len(),
            self.config.tick_interval()
        );

        loop {
            tokio::select! {
                () = &mut shutdown => break,
                Some(joined) = ticks.join_next() => Self::joined(joined),
                _ = interval.tick() => self.spawn_ticks(&mut ticks, &permits),
            }
        }

        info!("Shutdown requested, waiting for {} ticks in flight", ticks.len());
        while let Some(joined) = ticks.join_next().await {
            Self::joined(joined);
        }

        info!("Draining session pool");
        self.pool.shutdown(self.pool.config().shutdown_grace()).await
    }

    /// Start a tick task for every target not already in flight
    fn spawn_ticks(self: &Arc<Self>, ticks: &mut JoinSet<TickOutcome>, permits: &Arc<Semaphore>) {
        let mut busy = 0;
        for id in self.target_ids() {
            let Some(state) = self.state(&id) else { continue };
            // Claimed here so the next interval sees the target as in flight
            // even while its task still waits for a permit
            let Some(claim) = state.begin_tick() else {
                busy += 1;
                continue;
            };
            let orchestrator = Arc::clone(self);
            let permits = Arc::clone(permits);
            ticks.spawn(async move {
                // The semaphore is never closed
                let _permit = permits.acquire_owned().await.ok();
                orchestrator.tick_claimed(&id, &state, claim).await
            });
        }
        if busy > 0 {
            debug!("{busy} targets still in flight, not ticked this interval");
        }
    }

    fn joined(joined: Result<TickOutcome, JoinError>) {
        match joined {
            Ok(outcome) => debug!(
                "Tick for {} finished: {:?} ({} new)",
                outcome.target_id, outcome.status, outcome.inserted_count
            ),
            Err(e) if e.is_panic() => error!("Tick task panicked: {e}"),
            Err(e) => warn!("Tick task ended early: {e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_factory_backoff_doubles_and_caps() {
        let config = RunnerConfig {
            factory_backoff_base_secs: 10,
            factory_backoff_max_secs: 60,
            ..RunnerConfig::default()
        };
        assert_eq!(config.factory_backoff(1), Duration::from_secs(10));
        assert_eq!(config.factory_backoff(2), Duration::from_secs(20));
        assert_eq!(config.factory_backoff(3), Duration::from_secs(40));
        assert_eq!(config.factory_backoff(4), Duration::from_secs(60));
        assert_eq!(config.factory_backoff(100), Duration::from_secs(60));
    }

    #[test]
    fn test_acquire_timeout_defaults_to_ninety_seconds() {
        let config: RunnerConfig = serde_json::from_str("{}").expect("defaults");
        assert_eq!(config.acquire_timeout(), Duration::from_secs(90));
    }
}
