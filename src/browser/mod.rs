//! Chromium-backed implementations of the session factory and fetcher

pub mod factory;
pub mod fetcher;
pub mod profile;
pub mod setup;

pub use factory::{ChromiumSession, ChromiumSessionFactory, StorageState, StoredCookie};
pub use fetcher::ScriptFetcher;
pub use profile::{BrowserProfile, create_unique_profile_with_prefix};
pub use setup::{CHROMIUM_PATH_ENV, ExecutableSource, launch_browser};

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::utils::constants::{DEFAULT_AUTH_MARKERS, DEFAULT_RATE_LIMIT_MARKERS};

/// Browser launch and page-classification settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrowserSettings {
    /// Run Chromium without a window (default: true)
    pub headless: bool,
    /// Explicit executable; see [`BrowserSettings::resolve_executable`] for the fallbacks
    pub executable: Option<PathBuf>,
    /// Deadline for `goto` plus navigation (default: 30s)
    pub navigation_timeout_secs: u64,
    /// Page text meaning the stored login was refused
    pub auth_markers: Vec<String>,
    /// Page text meaning the upstream is throttling
    pub rate_limit_markers: Vec<String>,
}

impl Default for BrowserSettings {
    fn default() -> Self {
        Self {
            headless: true,
            executable: None,
            navigation_timeout_secs: 30,
            auth_markers: DEFAULT_AUTH_MARKERS.iter().map(|s| (*s).to_string()).collect(),
            rate_limit_markers: DEFAULT_RATE_LIMIT_MARKERS.iter().map(|s| (*s).to_string()).collect(),
        }
    }
}

impl BrowserSettings {
    #[must_use]
    pub fn navigation_timeout(&self) -> Duration {
        Duration::from_secs(self.navigation_timeout_secs)
    }
}
