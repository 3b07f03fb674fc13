//! Scripted collaborators shared by the integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::watch;

use kodegen_tools_pagewatch::error::{FactoryError, FetchError, NotifyError, SaveError};
use kodegen_tools_pagewatch::{
    Components, DedupKey, Fetcher, ManualClock, MemoryStore, MonitorTarget, Notifier, Orchestrator, PoolConfig,
    RateLimiter, RawItem, RunnerConfig, ScheduleEvaluator, SessionFactory, SessionIdentity, SessionPool, TargetId,
};

/// Wall time on a fixed day
pub fn at(h: u32, m: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 3, 10)
        .and_then(|d| d.and_hms_opt(h, m, 0))
        .expect("valid timestamp")
}

pub fn items(keys: &[&str]) -> Vec<RawItem> {
    keys.iter().map(|k| RawItem::with_key(*k).title(format!("post {k}"))).collect()
}

#[derive(Debug)]
pub struct FakeSession {
    pub identity: SessionIdentity,
}

#[derive(Debug, Default)]
pub struct FakeFactory {
    pub created: AtomicUsize,
    pub saved: AtomicUsize,
    pub closed: AtomicUsize,
    /// Number of upcoming `create` calls that fail
    pub failing_creates: AtomicUsize,
    /// Number of upcoming `create` calls that never return
    pub stalled_creates: AtomicUsize,
}

#[async_trait]
impl SessionFactory for FakeFactory {
    type Session = FakeSession;

    async fn create(&self, identity: &SessionIdentity) -> Result<FakeSession, FactoryError> {
        if take_one(&self.stalled_creates) {
            std::future::pending::<()>().await;
        }
        if take_one(&self.failing_creates) {
            return Err(FactoryError::new(identity.as_str(), "browser failed to launch"));
        }
        self.created.fetch_add(1, Ordering::SeqCst);
        Ok(FakeSession {
            identity: identity.clone(),
        })
    }

    async fn save(&self, _session: &FakeSession) -> Result<(), SaveError> {
        self.saved.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn close(&self, _session: &FakeSession) {
        self.closed.fetch_add(1, Ordering::SeqCst);
    }
}

/// Returns queued responses in order, then empty pages
///
/// Fetches of a held target park until `true` is sent on the returned gate.
#[derive(Debug, Default)]
pub struct ScriptedFetcher {
    responses: Mutex<VecDeque<Result<Vec<RawItem>, FetchError>>>,
    held: Mutex<Vec<(TargetId, watch::Receiver<bool>)>>,
    pub calls: AtomicUsize,
    pub calls_by_target: Mutex<Vec<TargetId>>,
}

impl ScriptedFetcher {
    pub fn push(&self, response: Result<Vec<RawItem>, FetchError>) {
        self.responses.lock().push_back(response);
    }

    /// Park every fetch of `target` until the gate opens
    pub fn hold(&self, target: &str) -> watch::Sender<bool> {
        let (gate, open) = watch::channel(false);
        self.held.lock().push((TargetId::new(target), open));
        gate
    }

    pub fn calls_for(&self, target: &str) -> usize {
        self.calls_by_target.lock().iter().filter(|id| id.as_str() == target).count()
    }
}

#[async_trait]
impl Fetcher<FakeSession> for ScriptedFetcher {
    async fn fetch(&self, _session: &FakeSession, target: &MonitorTarget) -> Result<Vec<RawItem>, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.calls_by_target.lock().push(target.id.clone());
        let gate = self
            .held
            .lock()
            .iter()
            .find(|(id, _)| *id == target.id)
            .map(|(_, open)| open.clone());
        if let Some(mut open) = gate {
            // A dropped sender leaves the gate shut for good
            if open.wait_for(|released| *released).await.is_err() {
                std::future::pending::<()>().await;
            }
        }
        let next = self.responses.lock().pop_front();
        next.unwrap_or_else(|| Ok(Vec::new()))
    }
}

/// Records deliveries
///
/// The next `failures` sends fail with a transport error, then the next
/// `outages` sends fail with a 503 from the endpoint.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    pub sent: Mutex<Vec<(TargetId, DedupKey)>>,
    pub summaries: Mutex<Vec<(TargetId, Vec<DedupKey>)>>,
    pub failures: AtomicUsize,
    pub outages: AtomicUsize,
}

fn take_one(counter: &AtomicUsize) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

impl RecordingNotifier {
    fn take_failure(&self) -> Result<(), NotifyError> {
        if take_one(&self.failures) {
            return Err(NotifyError::Transport("connection reset".into()));
        }
        if take_one(&self.outages) {
            return Err(NotifyError::Unavailable {
                status: 503,
                body: "upstream maintenance".into(),
            });
        }
        Ok(())
    }

    pub fn sent_keys(&self) -> Vec<String> {
        self.sent.lock().iter().map(|(_, k)| k.to_string()).collect()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send(&self, target: &TargetId, item: &RawItem) -> Result<(), NotifyError> {
        self.take_failure()?;
        self.sent.lock().push((target.clone(), item.key.clone()));
        Ok(())
    }

    async fn send_summary(&self, target: &TargetId, items: &[RawItem]) -> Result<(), NotifyError> {
        self.take_failure()?;
        let keys = items.iter().map(|i| i.key.clone()).collect();
        self.summaries.lock().push((target.clone(), keys));
        Ok(())
    }
}

/// An orchestrator wired to in-memory fakes and a manual clock
pub struct Harness {
    pub clock: Arc<ManualClock>,
    pub factory: Arc<FakeFactory>,
    pub fetcher: Arc<ScriptedFetcher>,
    pub notifier: Arc<RecordingNotifier>,
    pub store: Arc<MemoryStore>,
    pub limiter: Arc<RateLimiter>,
    pub orchestrator: Arc<Orchestrator<FakeFactory>>,
}

impl Harness {
    /// Unlimited limiter (no buckets registered) and default runner settings
    pub fn new(start: NaiveDateTime) -> Self {
        Self::with_runner(start, RunnerConfig::default())
    }

    pub fn with_runner(start: NaiveDateTime, runner: RunnerConfig) -> Self {
        let clock = Arc::new(ManualClock::new(start));
        let factory = Arc::new(FakeFactory::default());
        let fetcher = Arc::new(ScriptedFetcher::default());
        let notifier = Arc::new(RecordingNotifier::default());
        let store = Arc::new(MemoryStore::new());
        let limiter = Arc::new(RateLimiter::new(clock.clone()));
        let pool = SessionPool::new(factory.clone(), PoolConfig::default(), clock.clone());

        let orchestrator = Orchestrator::new(
            Components {
                pool,
                limiter: limiter.clone(),
                store: store.clone(),
                fetcher: fetcher.clone(),
                notifier: notifier.clone(),
                evaluator: ScheduleEvaluator::default(),
                clock: clock.clone(),
            },
            runner,
        );

        Self {
            clock,
            factory,
            fetcher,
            notifier,
            store,
            limiter,
            orchestrator,
        }
    }
}
