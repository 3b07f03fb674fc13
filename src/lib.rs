pub mod browser;
pub mod clock;
pub mod config;
pub mod dedup;
pub mod error;
pub mod fetch;
pub mod item;
pub mod notify;
pub mod orchestrator;
pub mod rate_limiter;
pub mod schedule;
pub mod session_pool;
pub mod store;
pub mod utils;

pub use browser::{BrowserSettings, ChromiumSession, ChromiumSessionFactory, ScriptFetcher};
pub use clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use config::MonitorConfig;
pub use dedup::{DedupAndPersist, DedupOutcome};
pub use error::{ConfigError, FactoryError, FetchError, NotifyError, PoolError, SaveError, StoreError};
pub use fetch::Fetcher;
pub use item::{DedupKey, RawItem, TargetId};
pub use notify::{LogNotifier, Notifier, WebhookNotifier};
pub use orchestrator::{
    Components, FailureKind, HealthSnapshot, MonitorTarget, Orchestrator, RunnerConfig, Severity,
    TargetStatus, TickError, TickFailure, TickOutcome, TickStatus,
};
pub use rate_limiter::{LimiterStats, RateLimitConfig, RateLimiter};
pub use schedule::{Evaluation, RuleMode, ScheduleConfig, ScheduleEvaluator, ScheduleMode, ScheduleRule, TimeOfDay};
pub use session_pool::{PoolConfig, PoolStats, SessionFactory, SessionIdentity, SessionLease, SessionPool};
pub use store::{ItemStore, MemoryStore, SqliteStore};
