//! Time-of-day rules and their windows

use chrono::{NaiveTime, Timelike};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::ConfigError;

/// Seconds in one day; also the encoding of "24:00"
pub const SECONDS_PER_DAY: u32 = 86_400;

/// Longest accepted check interval: one week
pub const MAX_INTERVAL_SECS: u64 = 7 * SECONDS_PER_DAY as u64;

/// Time of day at one-second resolution, `00:00:00` through `24:00:00`
///
/// Serialized as `"HH:MM"` (or `"HH:MM:SS"` when seconds are non-zero).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TimeOfDay(u32);

impl TimeOfDay {
    pub const MIDNIGHT: Self = Self(0);
    pub const END_OF_DAY: Self = Self(SECONDS_PER_DAY);

    /// Build from hours/minutes/seconds; `24:00:00` is the only value past 23:59:59
    pub fn hms(hours: u32, minutes: u32, seconds: u32) -> Result<Self, ConfigError> {
        let total = hours
            .saturating_mul(3600)
            .saturating_add(minutes.saturating_mul(60))
            .saturating_add(seconds);
        if minutes >= 60 || seconds >= 60 || total > SECONDS_PER_DAY {
            return Err(ConfigError::TimeOfDay(format!("{hours:02}:{minutes:02}:{seconds:02}")));
        }
        Ok(Self(total))
    }

    /// Seconds since midnight
    #[must_use]
    pub fn seconds(self) -> u32 {
        self.0
    }

    /// Time of day of a wall-clock reading (sub-second part dropped)
    #[must_use]
    pub fn of(time: NaiveTime) -> Self {
        Self(time.num_seconds_from_midnight())
    }
}

impl FromStr for TimeOfDay {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bad = || ConfigError::TimeOfDay(s.to_string());
        let parts: Vec<&str> = s.trim().split(':').collect();
        if !(2..=3).contains(&parts.len()) {
            return Err(bad());
        }
        let mut fields = [0u32; 3];
        for (slot, part) in fields.iter_mut().zip(&parts) {
            if part.is_empty() || part.len() > 2 {
                return Err(bad());
            }
            *slot = part.parse().map_err(|_| bad())?;
        }
        Self::hms(fields[0], fields[1], fields[2]).map_err(|_| bad())
    }
}

impl TryFrom<String> for TimeOfDay {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<TimeOfDay> for String {
    fn from(value: TimeOfDay) -> Self {
        value.to_string()
    }
}

impl fmt::Display for TimeOfDay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (h, m, s) = (self.0 / 3600, (self.0 % 3600) / 60, self.0 % 60);
        if s == 0 {
            write!(f, "{h:02}:{m:02}")
        } else {
            write!(f, "{h:02}:{m:02}:{s:02}")
        }
    }
}

/// Half-open daily window `[start, end)`
///
/// `start > end` wraps past midnight; `start == end` covers the whole day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub start: TimeOfDay,
    pub end: TimeOfDay,
}

impl TimeWindow {
    #[must_use]
    pub fn new(start: TimeOfDay, end: TimeOfDay) -> Self {
        Self { start, end }
    }

    #[must_use]
    pub fn wraps_midnight(&self) -> bool {
        self.start > self.end
    }

    #[must_use]
    pub fn contains(&self, at: TimeOfDay) -> bool {
        let (start, end, t) = (self.start.0, self.end.0, at.0 % SECONDS_PER_DAY);
        if start == end {
            true
        } else if start < end {
            start <= t && t < end
        } else {
            t >= start || t < end
        }
    }

    /// Seconds from `at` until the window next ends (1..=86400)
    #[must_use]
    pub fn seconds_until_end(&self, at: TimeOfDay) -> u32 {
        let end = self.end.0 % SECONDS_PER_DAY;
        let t = at.0 % SECONDS_PER_DAY;
        match (i64::from(end) - i64::from(t)).rem_euclid(i64::from(SECONDS_PER_DAY)) {
            0 => SECONDS_PER_DAY,
            d => d as u32,
        }
    }
}

/// Operating mode a rule selects
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum RuleMode {
    /// Check on a fixed cadence
    Frequent { interval_secs: u64 },
    /// Hold results until the window ends, then emit one digest
    BatchedSummary,
}

/// One entry of a target's schedule
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleRule {
    #[serde(default)]
    pub name: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    pub start: TimeOfDay,
    pub end: TimeOfDay,
    /// Higher wins
    #[serde(default)]
    pub priority: i32,
    #[serde(flatten)]
    pub mode: RuleMode,
}

fn default_enabled() -> bool {
    true
}

impl ScheduleRule {
    /// Frequent-check rule
    #[must_use]
    pub fn frequent(start: TimeOfDay, end: TimeOfDay, priority: i32, interval_secs: u64) -> Self {
        Self {
            name: String::new(),
            enabled: true,
            start,
            end,
            priority,
            mode: RuleMode::Frequent { interval_secs },
        }
    }

    /// Batched-summary rule
    #[must_use]
    pub fn batched(start: TimeOfDay, end: TimeOfDay, priority: i32) -> Self {
        Self {
            name: String::new(),
            enabled: true,
            start,
            end,
            priority,
            mode: RuleMode::BatchedSummary,
        }
    }

    #[must_use]
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    #[must_use]
    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    #[must_use]
    pub fn window(&self) -> TimeWindow {
        TimeWindow::new(self.start, self.end)
    }

    #[must_use]
    pub fn is_batched(&self) -> bool {
        matches!(self.mode, RuleMode::BatchedSummary)
    }

    /// Enabled and covering `at`
    #[must_use]
    pub fn matches(&self, at: TimeOfDay) -> bool {
        self.enabled && self.window().contains(at)
    }

    /// Reject frequent intervals of zero or longer than [`MAX_INTERVAL_SECS`]
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let RuleMode::Frequent { interval_secs } = self.mode {
            let field = || format!("rule '{}'.interval_secs", self.name);
            if interval_secs == 0 {
                return Err(ConfigError::invalid(field(), "must be greater than zero"));
            }
            if interval_secs > MAX_INTERVAL_SECS {
                return Err(ConfigError::invalid(
                    field(),
                    format!("must be at most {MAX_INTERVAL_SECS}, got {interval_secs}"),
                ));
            }
        }
        Ok(())
    }
}
