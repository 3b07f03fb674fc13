//! Structured per-tick outcome records

use chrono::NaiveDateTime;
use serde::Serialize;

use super::classify::{FailureKind, Severity};
use crate::item::TargetId;
use crate::schedule::ScheduleMode;

/// How a tick ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TickStatus {
    /// Interval not yet elapsed
    NotDue,
    /// Inside a batched window; results wait for the flush boundary
    Deferred,
    /// Fetch admission denied; retried next tick
    RateLimited,
    /// Waiting out a session-creation backoff
    BackingOff,
    /// A previous tick for this target is still running
    InFlight,
    /// Suspended until an external reset
    Broken,
    /// Fetched, deduplicated and notified
    Completed,
    /// Fetched and flushed a batched-summary digest
    Flushed,
    /// Ended early with a classified error
    Failed,
}

impl TickStatus {
    /// Whether this tick actually performed a fetch attempt
    #[must_use]
    pub const fn fetched(&self) -> bool {
        matches!(self, Self::Completed | Self::Flushed | Self::Failed)
    }
}

/// Classified error carried by an outcome
#[derive(Debug, Clone, Serialize)]
pub struct TickFailure {
    pub kind: FailureKind,
    pub severity: Severity,
    pub message: String,
}

/// One record per tick per target
#[derive(Debug, Clone, Serialize)]
pub struct TickOutcome {
    pub target_id: TargetId,
    pub at: NaiveDateTime,
    pub mode: Option<ScheduleMode>,
    pub status: TickStatus,
    pub inserted_count: usize,
    pub skipped_count: usize,
    /// Notifications delivered during this tick (including queued ones)
    pub notified: usize,
    /// Notifications still queued after this tick
    pub pending: usize,
    pub error: Option<TickFailure>,
}

impl TickOutcome {
    pub(crate) fn new(target_id: TargetId, at: NaiveDateTime, status: TickStatus) -> Self {
        Self {
            target_id,
            at,
            mode: None,
            status,
            inserted_count: 0,
            skipped_count: 0,
            notified: 0,
            pending: 0,
            error: None,
        }
    }

    #[must_use]
    pub fn is_failure(&self) -> bool {
        self.error.is_some()
    }
}
