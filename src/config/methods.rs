//! Loading, environment overrides and validation for [`MonitorConfig`]

use anyhow::{Context, Result};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

use super::types::MonitorConfig;
use crate::error::ConfigError;
use crate::schedule::MAX_INTERVAL_SECS;
use crate::store::SqliteStore;

/// Environment variable naming the configuration file
pub const CONFIG_PATH_ENV: &str = "PAGEWATCH_CONFIG";
/// Environment variable overriding `store.path`
pub const DB_PATH_ENV: &str = "PAGEWATCH_DB";
/// Environment variable overriding `notifier.url`
pub const WEBHOOK_URL_ENV: &str = "PAGEWATCH_WEBHOOK";

impl MonitorConfig {
    /// Read and validate a JSON configuration file
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config = Self::from_json(&raw)
            .with_context(|| format!("Failed to load config file {}", path.display()))?;
        Ok(config)
    }

    /// Parse and validate a JSON document
    pub fn from_json(raw: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(raw).context("Malformed configuration JSON")?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `PAGEWATCH_DB` and `PAGEWATCH_WEBHOOK` from the process environment
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|name| std::env::var(name).ok());
    }

    /// Apply overrides from an arbitrary lookup; empty values are ignored
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let lookup = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        if let Some(db) = lookup(DB_PATH_ENV) {
            self.store.path = Some(PathBuf::from(db));
        }
        if let Some(url) = lookup(WEBHOOK_URL_ENV) {
            self.notifier.url = Some(url);
        }
    }

    /// SQLite database location, falling back to the platform data directory
    #[must_use]
    pub fn store_path(&self) -> PathBuf {
        self.store.path.clone().unwrap_or_else(SqliteStore::default_path)
    }

    /// Reject values the runtime cannot honour
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.pool.idle_timeout_secs == 0 {
            return Err(ConfigError::invalid("pool.idle_timeout_secs", "must be greater than zero"));
        }
        if self.pool.reap_interval_secs == 0 {
            return Err(ConfigError::invalid("pool.reap_interval_secs", "must be greater than zero"));
        }

        for (name, limit) in &self.limits {
            let capacities = [
                ("short_capacity", limit.short_capacity),
                ("long_capacity", limit.long_capacity),
            ];
            for (field, value) in capacities {
                if !value.is_finite() || value < 1.0 {
                    return Err(ConfigError::invalid(
                        format!("limits.{name}.{field}"),
                        format!("must be at least 1, got {value}"),
                    ));
                }
            }
            let rates = [
                ("short_rate_per_sec", limit.short_rate_per_sec),
                ("long_rate_per_sec", limit.long_rate_per_sec),
            ];
            for (field, value) in rates {
                if !value.is_finite() || value <= 0.0 {
                    return Err(ConfigError::invalid(
                        format!("limits.{name}.{field}"),
                        format!("must be positive, got {value}"),
                    ));
                }
            }
        }

        if self.schedule.fallback_interval_secs == 0 {
            return Err(ConfigError::invalid(
                "schedule.fallback_interval_secs",
                "must be greater than zero",
            ));
        }
        if self.schedule.fallback_interval_secs > MAX_INTERVAL_SECS {
            return Err(ConfigError::invalid(
                "schedule.fallback_interval_secs",
                format!("must be at most {MAX_INTERVAL_SECS}"),
            ));
        }

        let runner = [
            ("runner.tick_interval_secs", self.runner.tick_interval_secs),
            ("runner.acquire_timeout_secs", self.runner.acquire_timeout_secs),
            ("runner.fetch_timeout_secs", self.runner.fetch_timeout_secs),
            ("runner.notify_timeout_secs", self.runner.notify_timeout_secs),
            ("runner.max_pending", self.runner.max_pending as u64),
            ("runner.max_concurrent_ticks", self.runner.max_concurrent_ticks as u64),
        ];
        for (field, value) in runner {
            if value == 0 {
                return Err(ConfigError::invalid(field, "must be greater than zero"));
            }
        }
        if self.runner.factory_backoff_max_secs < self.runner.factory_backoff_base_secs {
            return Err(ConfigError::invalid(
                "runner.factory_backoff_max_secs",
                "must not be smaller than factory_backoff_base_secs",
            ));
        }

        if let Some(url) = &self.notifier.url {
            url::Url::parse(url)
                .map_err(|e| ConfigError::invalid("notifier.url", format!("'{url}': {e}")))?;
        }

        let mut seen = HashSet::new();
        for target in &self.targets {
            if target.id.as_str().trim().is_empty() {
                return Err(ConfigError::invalid("targets[].id", "must not be empty"));
            }
            if !seen.insert(target.id.clone()) {
                return Err(ConfigError::DuplicateTarget(target.id.to_string()));
            }
            url::Url::parse(&target.url).map_err(|e| {
                ConfigError::invalid(format!("targets.{}.url", target.id), format!("'{}': {e}", target.url))
            })?;
            for rule in &target.rules {
                rule.validate()?;
            }
        }

        Ok(())
    }
}
