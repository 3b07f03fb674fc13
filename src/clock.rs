//! Injectable time source
//!
//! The limiter, the session pool and the orchestrator never read the system
//! clock directly. They go through [`Clock`] so tests can drive time forward
//! deterministically with [`ManualClock`] instead of sleeping.

use chrono::{Local, NaiveDateTime};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Source of monotonic and wall-clock time
pub trait Clock: Send + Sync + std::fmt::Debug {
    /// Monotonic instant, used for token refill and idle tracking
    fn now(&self) -> Instant;

    /// Local wall-clock time, used for time-of-day schedule evaluation
    fn wall(&self) -> NaiveDateTime;
}

/// Shared clock handle
pub type SharedClock = Arc<dyn Clock>;

/// Clock backed by the operating system
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    #[inline]
    fn now(&self) -> Instant {
        Instant::now()
    }

    #[inline]
    fn wall(&self) -> NaiveDateTime {
        Local::now().naive_local()
    }
}

/// Clock that only moves when told to
///
/// Monotonic and wall time advance together by the same offset.
#[derive(Debug)]
pub struct ManualClock {
    base_instant: Instant,
    base_wall: NaiveDateTime,
    offset: Mutex<Duration>,
}

impl ManualClock {
    /// Create a manual clock whose wall time starts at `wall`
    #[must_use]
    pub fn new(wall: NaiveDateTime) -> Self {
        Self {
            base_instant: Instant::now(),
            base_wall: wall,
            offset: Mutex::new(Duration::ZERO),
        }
    }

    /// Create a manual clock starting at the current local time
    #[must_use]
    pub fn starting_now() -> Self {
        Self::new(Local::now().naive_local())
    }

    /// Move time forward
    pub fn advance(&self, by: Duration) {
        let mut offset = self.offset.lock();
        *offset += by;
    }

    /// Jump wall time forward to `target` (no-op if `target` is in the past)
    pub fn advance_to(&self, target: NaiveDateTime) {
        let mut offset = self.offset.lock();
        let current = self.base_wall + chrono::Duration::from_std(*offset).unwrap_or(chrono::Duration::zero());
        if let Ok(delta) = (target - current).to_std() {
            *offset += delta;
        }
    }

    /// Total time advanced since creation
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        *self.offset.lock()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.base_instant + *self.offset.lock()
    }

    fn wall(&self) -> NaiveDateTime {
        let offset = *self.offset.lock();
        self.base_wall + chrono::Duration::from_std(offset).unwrap_or(chrono::Duration::zero())
    }
}
