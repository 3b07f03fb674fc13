//! Time-of-day schedule evaluation
//!
//! Everything here is a pure function of `(rules, now, markers)`. The
//! evaluator carries only configuration, never a "current mode", so the same
//! inputs always yield the same answer.

pub mod rule;

pub use rule::{MAX_INTERVAL_SECS, RuleMode, ScheduleRule, TimeOfDay, TimeWindow, SECONDS_PER_DAY};

use chrono::{NaiveDateTime, NaiveTime, TimeDelta};
use serde::{Deserialize, Serialize};

/// Mode a target runs in at a given instant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleMode {
    Frequent,
    BatchedSummary,
}

impl std::fmt::Display for ScheduleMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Frequent => f.write_str("frequent"),
            Self::BatchedSummary => f.write_str("batched_summary"),
        }
    }
}

/// Result of [`ScheduleEvaluator::evaluate`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Evaluation {
    pub mode: ScheduleMode,
    /// Check cadence for `Frequent`; seconds until the window ends for `BatchedSummary`
    pub interval_secs: u64,
    /// Index of the winning rule, `None` when the fallback applied
    pub rule_index: Option<usize>,
}

/// A batched-summary boundary that is due to be flushed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlushDue {
    pub rule_index: usize,
    /// The instant the rule's window ended
    pub boundary: NaiveDateTime,
}

/// Evaluator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    /// Frequent-mode interval used when no rule matches (default: 60s)
    pub fallback_interval_secs: u64,
    /// How long after a batched window ends its flush may still fire (default: 300s)
    pub flush_grace_secs: u64,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            fallback_interval_secs: 60,
            flush_grace_secs: 300,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ScheduleEvaluator {
    config: ScheduleConfig,
}

impl ScheduleEvaluator {
    #[must_use]
    pub fn new(config: ScheduleConfig) -> Self {
        Self { config }
    }

    #[must_use]
    pub fn config(&self) -> &ScheduleConfig {
        &self.config
    }

    /// Index of the rule in force at `now`
    ///
    /// Highest priority among enabled rules covering `now`; on a tie the
    /// earliest-defined rule wins.
    #[must_use]
    pub fn active_rule(&self, rules: &[ScheduleRule], now: NaiveDateTime) -> Option<usize> {
        let at = TimeOfDay::of(now.time());
        let mut best: Option<(usize, i32)> = None;
        for (index, rule) in rules.iter().enumerate() {
            if !rule.matches(at) {
                continue;
            }
            match best {
                Some((_, priority)) if priority >= rule.priority => {}
                _ => best = Some((index, rule.priority)),
            }
        }
        best.map(|(index, _)| index)
    }

    /// Mode and interval in force at `now`
    #[must_use]
    pub fn evaluate(&self, rules: &[ScheduleRule], now: NaiveDateTime) -> Evaluation {
        let Some(index) = self.active_rule(rules, now) else {
            return Evaluation {
                mode: ScheduleMode::Frequent,
                interval_secs: self.config.fallback_interval_secs,
                rule_index: None,
            };
        };

        let rule = &rules[index];
        match rule.mode {
            RuleMode::Frequent { interval_secs } => Evaluation {
                mode: ScheduleMode::Frequent,
                interval_secs,
                rule_index: Some(index),
            },
            RuleMode::BatchedSummary => Evaluation {
                mode: ScheduleMode::BatchedSummary,
                interval_secs: u64::from(rule.window().seconds_until_end(TimeOfDay::of(now.time()))),
                rule_index: Some(index),
            },
        }
    }

    /// True iff at least `interval_secs` elapsed since `last_checked`
    ///
    /// A `last_checked` in the future (clock stepped back) counts as not due.
    #[must_use]
    pub fn should_run_now(
        &self,
        last_checked: Option<NaiveDateTime>,
        now: NaiveDateTime,
        interval_secs: u64,
    ) -> bool {
        match last_checked {
            None => true,
            Some(last) => u64::try_from((now - last).num_seconds()).is_ok_and(|elapsed| elapsed >= interval_secs),
        }
    }

    /// Most recent end of `rule`'s window at or before `now`
    #[must_use]
    pub fn latest_boundary(&self, rule: &ScheduleRule, now: NaiveDateTime) -> NaiveDateTime {
        let end = rule.end.seconds() % SECONDS_PER_DAY;
        let end_time = NaiveTime::from_num_seconds_from_midnight_opt(end, 0).unwrap_or(NaiveTime::MIN);
        let today = now.date().and_time(end_time);
        if today <= now {
            today
        } else {
            today - chrono::Duration::days(1)
        }
    }

    /// Whether `rule`'s window ended within the last `flush_grace`
    #[must_use]
    pub fn is_flush_boundary(&self, rule: &ScheduleRule, now: NaiveDateTime) -> bool {
        if !rule.enabled || !rule.is_batched() {
            return false;
        }
        let since = (now - self.latest_boundary(rule, now)).num_seconds();
        since < self.config.flush_grace_secs.max(1) as i64
    }

    /// The batched boundary that should be flushed now, if any
    ///
    /// A boundary counts only when its rule was the active rule right before
    /// it; a batched rule shadowed by a higher-priority one never flushes. A
    /// boundary at or before `last_flushed` has already been emitted and is
    /// never returned again, which makes flushing exactly-once per crossing.
    #[must_use]
    pub fn due_flush(
        &self,
        rules: &[ScheduleRule],
        now: NaiveDateTime,
        last_flushed: Option<NaiveDateTime>,
    ) -> Option<FlushDue> {
        let mut best: Option<(FlushDue, i32)> = None;
        for (rule_index, rule) in rules.iter().enumerate() {
            if !self.is_flush_boundary(rule, now) {
                continue;
            }
            let boundary = self.latest_boundary(rule, now);
            if last_flushed.is_some_and(|marker| boundary <= marker) {
                continue;
            }
            // Only the end of an interval in which this rule actually governed
            if self.active_rule(rules, boundary - TimeDelta::seconds(1)) != Some(rule_index) {
                continue;
            }
            match best {
                Some((_, priority)) if priority >= rule.priority => {}
                _ => best = Some((FlushDue { rule_index, boundary }, rule.priority)),
            }
        }
        best.map(|(due, _)| due)
    }

    /// Predicted instant of the next check
    #[must_use]
    pub fn next_check_at(
        &self,
        rules: &[ScheduleRule],
        last_checked: Option<NaiveDateTime>,
        now: NaiveDateTime,
    ) -> NaiveDateTime {
        let evaluation = self.evaluate(rules, now);
        let after = |from: NaiveDateTime| {
            i64::try_from(evaluation.interval_secs)
                .ok()
                .and_then(TimeDelta::try_seconds)
                .and_then(|interval| from.checked_add_signed(interval))
        };
        match evaluation.mode {
            ScheduleMode::BatchedSummary => after(now).unwrap_or(NaiveDateTime::MAX),
            ScheduleMode::Frequent => match last_checked {
                None => now,
                Some(last) => after(last).unwrap_or(NaiveDateTime::MAX).max(now),
            },
        }
    }
}
