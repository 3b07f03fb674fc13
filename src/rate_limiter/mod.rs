//! Per-resource admission control for outbound calls
//!
//! Every outbound call class (page fetches, notifications, AI completions) is
//! guarded by a named [`RateBucket`] with a burst window and a sustained
//! window. Buckets live in a `DashMap`, so the only lock an admission takes is
//! the one on its own bucket; resources never contend with each other.
//!
//! Resources that were never registered are unlimited.

pub mod bucket;

pub use bucket::{BucketSnapshot, RateBucket, RateLimitConfig, RateLimitDecision};

use dashmap::DashMap;
use log::{debug, warn};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use crate::clock::SharedClock;

/// Resource name guarding page fetches
pub const FETCH_RESOURCE: &str = "fetch";
/// Resource name guarding outbound notifications
pub const NOTIFY_RESOURCE: &str = "notify";
/// Resource name guarding AI completion calls
pub const AI_RESOURCE: &str = "ai";

/// Lower bound on a single wait, so rounding never produces a zero-length sleep loop
const MIN_WAIT_SLICE: Duration = Duration::from_millis(1);

/// Read-only view of one resource's bucket
#[derive(Debug, Clone, Serialize)]
pub struct LimiterStats {
    pub name: String,
    pub short_tokens: f64,
    pub long_tokens: f64,
    pub short_capacity: f64,
    pub long_capacity: f64,
    pub short_rate_per_sec: f64,
    pub long_rate_per_sec: f64,
    pub admitted: u64,
    pub denied: u64,
}

/// Registry of named dual-window buckets
#[derive(Debug)]
pub struct RateLimiter {
    buckets: DashMap<String, Arc<RateBucket>>,
    clock: SharedClock,
}

impl RateLimiter {
    /// Create an empty limiter (every resource unlimited until registered)
    #[must_use]
    pub fn new(clock: SharedClock) -> Self {
        Self {
            buckets: DashMap::new(),
            clock,
        }
    }

    /// Create a limiter with the built-in `fetch`, `notify` and `ai` budgets
    #[must_use]
    pub fn with_defaults(clock: SharedClock) -> Self {
        let limiter = Self::new(clock);
        limiter.register(FETCH_RESOURCE, RateLimitConfig::fetch());
        limiter.register(NOTIFY_RESOURCE, RateLimitConfig::notify());
        limiter.register(AI_RESOURCE, RateLimitConfig::ai());
        limiter
    }

    /// Install (or replace) the bucket for `name`, starting full
    pub fn register(&self, name: &str, config: RateLimitConfig) {
        let bucket = Arc::new(RateBucket::new(config, self.clock.now()));
        if self.buckets.insert(name.to_string(), bucket).is_some() {
            debug!("Replaced rate limit bucket for resource '{name}'");
        }
    }

    /// Names of all registered resources
    #[must_use]
    pub fn resources(&self) -> Vec<String> {
        let mut names: Vec<String> = self.buckets.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    fn bucket(&self, name: &str) -> Option<Arc<RateBucket>> {
        // Clone the Arc and release the shard guard before touching the bucket lock
        self.buckets.get(name).map(|entry| Arc::clone(entry.value()))
    }

    /// Admission decision for one unit of work on `name`
    pub fn check(&self, name: &str) -> RateLimitDecision {
        match self.bucket(name) {
            Some(bucket) => bucket.try_consume(self.clock.now()),
            None => {
                debug!("No rate limit registered for resource '{name}', allowing");
                RateLimitDecision::Allow
            }
        }
    }

    /// Non-blocking admission: true if both windows were debited
    pub fn try_admit(&self, name: &str) -> bool {
        self.check(name).is_allowed()
    }

    /// Wait until admitted or `timeout` elapses
    ///
    /// Sleeps for the bucket's reported `retry_after` between attempts, never
    /// past the deadline. Returns false on deadline expiry.
    pub async fn wait_admit(&self, name: &str, timeout: Duration) -> bool {
        let deadline = self.clock.now() + timeout;

        let waiting = async {
            loop {
                match self.check(name) {
                    RateLimitDecision::Allow => return true,
                    RateLimitDecision::Deny { retry_after } => {
                        let now = self.clock.now();
                        if now >= deadline {
                            return false;
                        }
                        let nap = retry_after.min(deadline - now).max(MIN_WAIT_SLICE);
                        tokio::time::sleep(nap).await;
                    }
                }
            }
        };

        match tokio::time::timeout(timeout, waiting).await {
            Ok(admitted) => admitted,
            Err(_) => {
                // One last attempt at the deadline itself
                let admitted = self.try_admit(name);
                if !admitted {
                    warn!("Rate limit wait for '{name}' timed out after {timeout:?}");
                }
                admitted
            }
        }
    }

    /// Snapshot of a single resource, `None` if unregistered
    #[must_use]
    pub fn stats(&self, name: &str) -> Option<LimiterStats> {
        let bucket = self.bucket(name)?;
        let snap = bucket.snapshot(self.clock.now());
        let config = bucket.config();
        Some(LimiterStats {
            name: name.to_string(),
            short_tokens: snap.short_tokens,
            long_tokens: snap.long_tokens,
            short_capacity: config.short_capacity,
            long_capacity: config.long_capacity,
            short_rate_per_sec: config.short_rate_per_sec,
            long_rate_per_sec: config.long_rate_per_sec,
            admitted: snap.admitted,
            denied: snap.denied,
        })
    }

    /// Snapshot of every registered resource, keyed by name
    #[must_use]
    pub fn all_stats(&self) -> BTreeMap<String, LimiterStats> {
        self.resources()
            .into_iter()
            .filter_map(|name| self.stats(&name).map(|s| (name, s)))
            .collect()
    }
}
