//! Dual-window token bucket
//!
//! A bucket holds two independent token pools for one named resource: a short
//! (burst) window and a long (sustained) window. Refill is continuous, so
//! tokens are plain `f64` values advanced by `elapsed * rate` and capped at
//! capacity. An admission debits one token from *both* windows under a single
//! lock, or from neither.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

/// Upper bound reported as `retry_after` when a window never refills
const MAX_RETRY_AFTER: Duration = Duration::from_secs(3600);

/// Rate limit decision for one admission request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitDecision {
    /// Request is allowed to proceed
    Allow,
    /// Request should be deferred
    /// Contains the duration after which both windows will hold a token
    Deny { retry_after: Duration },
}

impl RateLimitDecision {
    #[inline]
    #[must_use]
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allow)
    }
}

/// Capacities and refill rates of the two windows
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Burst size of the short window
    pub short_capacity: f64,
    /// Tokens per second added to the short window
    pub short_rate_per_sec: f64,
    /// Budget of the long window
    pub long_capacity: f64,
    /// Tokens per second added to the long window
    pub long_rate_per_sec: f64,
}

impl RateLimitConfig {
    /// Build a config from a per-second burst window and a per-minute budget
    #[must_use]
    pub fn per_minute(burst: f64, per_second: f64, per_minute: f64) -> Self {
        Self {
            short_capacity: burst,
            short_rate_per_sec: per_second,
            long_capacity: per_minute,
            long_rate_per_sec: per_minute / 60.0,
        }
    }

    /// Outbound notification budget: 1 every 2 seconds, burst of 2, 30 per minute
    #[must_use]
    pub fn notify() -> Self {
        Self::per_minute(2.0, 0.5, 30.0)
    }

    /// AI completion budget: 1 every 5 seconds, no burst, 20 per minute
    #[must_use]
    pub fn ai() -> Self {
        Self::per_minute(1.0, 0.2, 20.0)
    }

    /// Page fetch budget: 1 per second, burst of 3, 30 per minute
    #[must_use]
    pub fn fetch() -> Self {
        Self::per_minute(3.0, 1.0, 30.0)
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self::fetch()
    }
}

#[derive(Debug)]
struct WindowLevels {
    short: f64,
    long: f64,
    last_refill: Instant,
}

/// Token levels plus counters, as seen at one instant
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BucketSnapshot {
    pub short_tokens: f64,
    pub long_tokens: f64,
    pub admitted: u64,
    pub denied: u64,
}

/// One dual-window bucket
#[derive(Debug)]
pub struct RateBucket {
    config: RateLimitConfig,
    levels: Mutex<WindowLevels>,
    counters: Mutex<(u64, u64)>,
}

impl RateBucket {
    /// Create a bucket with both windows full
    #[must_use]
    pub fn new(config: RateLimitConfig, now: Instant) -> Self {
        Self {
            config,
            levels: Mutex::new(WindowLevels {
                short: config.short_capacity,
                long: config.long_capacity,
                last_refill: now,
            }),
            counters: Mutex::new((0, 0)),
        }
    }

    #[must_use]
    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Attempt to take one token from both windows
    pub fn try_consume(&self, now: Instant) -> RateLimitDecision {
        let decision = {
            let mut levels = self.levels.lock();
            self.refill(&mut levels, now);

            if levels.short >= 1.0 && levels.long >= 1.0 {
                levels.short -= 1.0;
                levels.long -= 1.0;
                RateLimitDecision::Allow
            } else {
                let retry_after = time_until_one(levels.short, self.config.short_rate_per_sec)
                    .max(time_until_one(levels.long, self.config.long_rate_per_sec));
                RateLimitDecision::Deny { retry_after }
            }
        };

        let mut counters = self.counters.lock();
        match decision {
            RateLimitDecision::Allow => counters.0 += 1,
            RateLimitDecision::Deny { .. } => counters.1 += 1,
        }
        decision
    }

    /// Token levels projected to `now` without mutating the bucket
    #[must_use]
    pub fn snapshot(&self, now: Instant) -> BucketSnapshot {
        let (short_tokens, long_tokens) = {
            let levels = self.levels.lock();
            let elapsed = now.saturating_duration_since(levels.last_refill).as_secs_f64();
            (
                refilled(levels.short, elapsed, self.config.short_rate_per_sec, self.config.short_capacity),
                refilled(levels.long, elapsed, self.config.long_rate_per_sec, self.config.long_capacity),
            )
        };
        let (admitted, denied) = *self.counters.lock();
        BucketSnapshot {
            short_tokens,
            long_tokens,
            admitted,
            denied,
        }
    }

    fn refill(&self, levels: &mut WindowLevels, now: Instant) {
        if now <= levels.last_refill {
            return;
        }
        let elapsed = (now - levels.last_refill).as_secs_f64();
        levels.short = refilled(
            levels.short,
            elapsed,
            self.config.short_rate_per_sec,
            self.config.short_capacity,
        );
        levels.long = refilled(
            levels.long,
            elapsed,
            self.config.long_rate_per_sec,
            self.config.long_capacity,
        );
        levels.last_refill = now;
    }
}

#[inline]
fn refilled(tokens: f64, elapsed_secs: f64, rate: f64, capacity: f64) -> f64 {
    (tokens + elapsed_secs * rate.max(0.0)).min(capacity).max(0.0)
}

#[inline]
fn time_until_one(tokens: f64, rate: f64) -> Duration {
    if tokens >= 1.0 {
        return Duration::ZERO;
    }
    if rate <= 0.0 {
        return MAX_RETRY_AFTER;
    }
    Duration::try_from_secs_f64((1.0 - tokens) / rate)
        .unwrap_or(MAX_RETRY_AFTER)
        .min(MAX_RETRY_AFTER)
}
