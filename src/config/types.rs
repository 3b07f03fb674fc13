//! Configuration document for the page watcher
//!
//! Every section falls back to its `Default` when missing, so an empty JSON
//! object is a valid (if target-less) configuration.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::browser::BrowserSettings;
use crate::notify::WebhookConfig;
use crate::orchestrator::{MonitorTarget, RunnerConfig};
use crate::rate_limiter::{AI_RESOURCE, FETCH_RESOURCE, NOTIFY_RESOURCE, RateLimitConfig};
use crate::schedule::ScheduleConfig;
use crate::session_pool::PoolConfig;

/// Where items, broken flags and flush markers are persisted
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreSettings {
    /// SQLite database file; the platform data directory when unset
    pub path: Option<PathBuf>,
}

/// Top-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub pool: PoolConfig,
    /// Rate limit budgets keyed by resource name (`fetch`, `notify`, `ai`, ...)
    pub limits: BTreeMap<String, RateLimitConfig>,
    pub schedule: ScheduleConfig,
    pub runner: RunnerConfig,
    pub browser: BrowserSettings,
    pub store: StoreSettings,
    pub notifier: WebhookConfig,
    pub targets: Vec<MonitorTarget>,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            pool: PoolConfig::default(),
            limits: default_limits(),
            schedule: ScheduleConfig::default(),
            runner: RunnerConfig::default(),
            browser: BrowserSettings::default(),
            store: StoreSettings::default(),
            notifier: WebhookConfig::default(),
            targets: Vec::new(),
        }
    }
}

/// Built-in budgets for the three resources every deployment uses
#[must_use]
pub fn default_limits() -> BTreeMap<String, RateLimitConfig> {
    BTreeMap::from([
        (FETCH_RESOURCE.to_string(), RateLimitConfig::fetch()),
        (NOTIFY_RESOURCE.to_string(), RateLimitConfig::notify()),
        (AI_RESOURCE.to_string(), RateLimitConfig::ai()),
    ])
}
