//! Monitored targets and their per-target runtime state

use chrono::NaiveDateTime;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use crate::item::{RawItem, TargetId};
use crate::schedule::{ScheduleMode, ScheduleRule};
use crate::session_pool::SessionIdentity;

use super::outcome::TickStatus;

/// A page to watch and the rules deciding when
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitorTarget {
    pub id: TargetId,
    pub url: String,
    /// JavaScript evaluated on the loaded page, returning the item array
    #[serde(default)]
    pub extraction_script: String,
    /// Explicit session identity
    ///
    /// When unset, `ChromiumSessionFactory::bind_target` derives it from
    /// `state_file`; without either, the target borrows a session named after `id`.
    #[serde(default)]
    pub session: Option<SessionIdentity>,
    /// Storage-state file with the login cookies for this target
    #[serde(default)]
    pub state_file: Option<PathBuf>,
    #[serde(default)]
    pub rules: Vec<ScheduleRule>,
}

impl MonitorTarget {
    pub fn new(id: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            id: TargetId::new(id),
            url: url.into(),
            extraction_script: String::new(),
            session: None,
            state_file: None,
            rules: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_rules(mut self, rules: Vec<ScheduleRule>) -> Self {
        self.rules = rules;
        self
    }

    #[must_use]
    pub fn with_session(mut self, identity: SessionIdentity) -> Self {
        self.session = Some(identity);
        self
    }

    /// Identity of the pooled session this target borrows
    #[must_use]
    pub fn session_identity(&self) -> SessionIdentity {
        self.session
            .clone()
            .unwrap_or_else(|| SessionIdentity::new(self.id.as_str()))
    }
}

/// A notification that could not be delivered yet
#[derive(Debug, Clone)]
pub(crate) enum PendingNotice {
    Item(RawItem),
    Summary(Vec<RawItem>),
}

/// Mutable bookkeeping, touched at most once per tick
#[derive(Debug, Default)]
pub(crate) struct TargetRuntime {
    pub last_checked: Option<NaiveDateTime>,
    pub last_mode: Option<ScheduleMode>,
    pub last_flushed: Option<NaiveDateTime>,
    pub broken: Option<String>,
    pub factory_failures: u32,
    pub backoff_until: Option<Instant>,
    pub last_status: Option<TickStatus>,
}

/// A target plus everything the orchestrator tracks for it
#[derive(Debug)]
pub(crate) struct TargetState {
    pub target: RwLock<MonitorTarget>,
    pub runtime: Mutex<TargetRuntime>,
    pub pending: Mutex<VecDeque<PendingNotice>>,
    in_flight: AtomicBool,
}

impl TargetState {
    pub fn new(target: MonitorTarget) -> Self {
        Self {
            target: RwLock::new(target),
            runtime: Mutex::new(TargetRuntime::default()),
            pending: Mutex::new(VecDeque::new()),
            in_flight: AtomicBool::new(false),
        }
    }

    /// Claim the target for one tick; `None` if a tick is already running
    ///
    /// The claim owns a handle to the state so it can move into a spawned task.
    pub fn begin_tick(self: &Arc<Self>) -> Option<InFlightGuard> {
        self.in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| InFlightGuard {
                state: Arc::clone(self),
            })
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Queue a notice, dropping the oldest beyond `cap`; returns how many were dropped
    pub fn enqueue(&self, notice: PendingNotice, cap: usize) -> usize {
        let mut pending = self.pending.lock();
        pending.push_back(notice);
        let mut dropped = 0;
        while pending.len() > cap.max(1) {
            pending.pop_front();
            dropped += 1;
        }
        dropped
    }

    pub fn pending_len(&self) -> usize {
        self.pending.lock().len()
    }
}

/// Clears the in-flight flag on every exit path, panics and aborts included
pub(crate) struct InFlightGuard {
    state: Arc<TargetState>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.state.in_flight.store(false, Ordering::Release);
    }
}

/// Read-only snapshot of one target for health surfaces
#[derive(Debug, Clone, Serialize)]
pub struct TargetStatus {
    pub target_id: TargetId,
    pub url: String,
    pub session: SessionIdentity,
    /// Reason recorded when the target was marked broken
    pub broken: Option<String>,
    pub in_flight: bool,
    pub last_checked: Option<NaiveDateTime>,
    pub last_mode: Option<ScheduleMode>,
    pub last_flushed: Option<NaiveDateTime>,
    pub last_status: Option<TickStatus>,
    pub next_check: Option<NaiveDateTime>,
    pub pending_notifications: usize,
    pub factory_failures: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_flight_guard_releases_on_drop() {
        let state = Arc::new(TargetState::new(MonitorTarget::new("t", "https://example.com")));
        let guard = state.begin_tick().expect("first claim");
        assert!(state.begin_tick().is_none());
        assert!(state.is_in_flight());
        drop(guard);
        assert!(!state.is_in_flight());
        assert!(state.begin_tick().is_some());
    }

    #[test]
    fn test_pending_queue_drops_oldest_past_cap() {
        let state = TargetState::new(MonitorTarget::new("t", "https://example.com"));
        for key in ["a", "b", "c"] {
            state.enqueue(PendingNotice::Item(RawItem::with_key(key)), 2);
        }
        let pending = state.pending.lock();
        assert_eq!(pending.len(), 2);
        assert!(matches!(&pending[0], PendingNotice::Item(item) if item.key.as_str() == "b"));
    }

    #[test]
    fn test_session_identity_defaults_to_target_id() {
        let target = MonitorTarget::new("forum-7", "https://example.com");
        assert_eq!(target.session_identity().as_str(), "forum-7");
    }
}
