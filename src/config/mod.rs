//! Configuration for the page watcher
//!
//! A single JSON document describes the pool, rate limits, schedule defaults,
//! tick loop, browser, store, notifier and the monitored targets.

pub mod methods;
pub mod types;

pub use methods::{CONFIG_PATH_ENV, DB_PATH_ENV, WEBHOOK_URL_ENV};
pub use types::{MonitorConfig, StoreSettings, default_limits};
