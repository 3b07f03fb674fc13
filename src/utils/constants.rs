//! Shared configuration constants for pagewatch
//!
//! Default values used by the config layer and the browser integration, kept
//! in one place to avoid magic numbers.

/// Default orchestrator tick: 15 seconds
///
/// A tick only evaluates schedules; fetching happens when a target's own
/// interval says so. Should stay well below the smallest frequent interval.
pub const DEFAULT_TICK_INTERVAL_SECS: u64 = 15;

/// Default per-fetch deadline: 60 seconds
///
/// Covers navigation plus extraction. A timeout is a retryable network failure.
pub const DEFAULT_FETCH_TIMEOUT_SECS: u64 = 60;

/// Default session acquisition deadline: 90 seconds
///
/// Bounds a browser launch that never comes back. Overrunning is a retryable
/// timeout, not a factory failure.
pub const DEFAULT_ACQUIRE_TIMEOUT_SECS: u64 = 90;

/// Default per-notification deadline: 15 seconds
pub const DEFAULT_NOTIFY_TIMEOUT_SECS: u64 = 15;

/// Factory backoff: first retry after 30 seconds, doubling up to 30 minutes
pub const DEFAULT_FACTORY_BACKOFF_BASE_SECS: u64 = 30;
pub const DEFAULT_FACTORY_BACKOFF_MAX_SECS: u64 = 1800;

/// Pending notifications kept per target before the oldest are dropped
pub const DEFAULT_MAX_PENDING: usize = 500;

/// Page text meaning the stored login is no longer accepted
pub const DEFAULT_AUTH_MARKERS: &[&str] = &["ERROR:2048", "必须登录"];

/// Page text meaning the site is throttling us
pub const DEFAULT_RATE_LIMIT_MARKERS: &[&str] = &["访问过于频繁", "请稍后再试"];

/// Prefix of per-session Chrome profile directories
pub const PROFILE_PREFIX: &str = "kodegen_pagewatch";

/// Chrome user agent string for stealth mode
///
/// Chrome releases new stable versions ~every 4 weeks.
/// Update quarterly to stay within reasonable version window.
///
/// Reference: https://chromiumdash.appspot.com/schedule
pub const CHROME_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/132.0.6834.160 Safari/537.36";
