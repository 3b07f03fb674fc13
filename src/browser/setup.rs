//! Locating and launching Chromium
//!
//! The executable is resolved once per factory: the configured path, then
//! `CHROMIUM_PATH`, then the `PATH` directories, then the platform's usual
//! install locations. When none of them exists a Chromium build is downloaded
//! into the user cache directory and reused from there.

use anyhow::{Context, Result};
use chromiumoxide::browser::{Browser, BrowserConfigBuilder, HeadlessMode};
use chromiumoxide::fetcher::{BrowserFetcher, BrowserFetcherOptions};
use futures::StreamExt;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

use super::BrowserSettings;
use crate::utils::constants::{CHROME_USER_AGENT, PROFILE_PREFIX};

/// Environment variable naming the Chromium executable
pub const CHROMIUM_PATH_ENV: &str = "CHROMIUM_PATH";

/// Executable names looked up in every `PATH` directory
const PATH_NAMES: &[&str] = &["chromium", "chromium-browser", "google-chrome", "google-chrome-stable", "chrome"];

#[cfg(target_os = "macos")]
const INSTALL_LOCATIONS: &[&str] = &[
    "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
    "/Applications/Chromium.app/Contents/MacOS/Chromium",
    "/opt/homebrew/bin/chromium",
];

#[cfg(target_os = "windows")]
const INSTALL_LOCATIONS: &[&str] = &[
    r"C:\Program Files\Google\Chrome\Application\chrome.exe",
    r"C:\Program Files (x86)\Google\Chrome\Application\chrome.exe",
    r"C:\Program Files\Chromium\Application\chrome.exe",
];

#[cfg(not(any(target_os = "macos", target_os = "windows")))]
const INSTALL_LOCATIONS: &[&str] = &[
    "/usr/bin/chromium",
    "/usr/bin/google-chrome",
    "/snap/bin/chromium",
    "/opt/google/chrome/chrome",
];

/// Flags for a quiet, unattended watcher browser
const LAUNCH_ARGS: &[&str] = &[
    "--disable-blink-features=AutomationControlled",
    "--disable-infobars",
    "--disable-notifications",
    "--disable-extensions",
    "--disable-background-networking",
    "--disable-breakpad",
    "--disable-features=TranslateUI",
    "--no-first-run",
    "--no-default-browser-check",
    "--no-sandbox",
    "--password-store=basic",
    "--use-mock-keychain",
    "--mute-audio",
];

/// Where a resolved executable came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutableSource {
    Configured,
    Environment,
    SearchPath,
    InstallLocation,
    Managed,
}

impl BrowserSettings {
    /// First existing executable among the configured path, `CHROMIUM_PATH`,
    /// `PATH` and the platform's install locations
    #[must_use]
    pub fn locate_executable(&self) -> Option<(PathBuf, ExecutableSource)> {
        self.locate_with(std::env::var_os(CHROMIUM_PATH_ENV), std::env::var_os("PATH"))
    }

    fn locate_with(
        &self,
        env_override: Option<OsString>,
        search_path: Option<OsString>,
    ) -> Option<(PathBuf, ExecutableSource)> {
        if let Some(path) = &self.executable {
            if path.is_file() {
                return Some((path.clone(), ExecutableSource::Configured));
            }
            warn!(path = %path.display(), "Configured browser executable does not exist");
        }

        if let Some(path) = env_override.map(PathBuf::from) {
            if path.is_file() {
                return Some((path, ExecutableSource::Environment));
            }
            warn!(path = %path.display(), "{CHROMIUM_PATH_ENV} does not point at a file");
        }

        let on_path = search_path
            .iter()
            .flat_map(std::env::split_paths)
            .flat_map(|dir| PATH_NAMES.iter().map(move |name| dir.join(executable_name(name))))
            .find(|candidate| candidate.is_file());
        if let Some(path) = on_path {
            return Some((path, ExecutableSource::SearchPath));
        }

        INSTALL_LOCATIONS
            .iter()
            .map(PathBuf::from)
            .find(|candidate| candidate.is_file())
            .map(|path| (path, ExecutableSource::InstallLocation))
    }

    /// [`locate_executable`](Self::locate_executable), downloading a managed
    /// Chromium when nothing is installed
    pub async fn resolve_executable(&self) -> Result<PathBuf> {
        let (path, source) = match self.locate_executable() {
            Some(found) => found,
            None => {
                warn!("No browser executable found, downloading a managed Chromium");
                (download_chromium(&managed_dir()).await?, ExecutableSource::Managed)
            }
        };
        info!(path = %path.display(), ?source, "Using browser executable");
        Ok(path)
    }
}

fn executable_name(name: &str) -> String {
    if cfg!(target_os = "windows") {
        format!("{name}.exe")
    } else {
        name.to_string()
    }
}

fn managed_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(PROFILE_PREFIX)
        .join("chromium")
}

async fn download_chromium(dir: &Path) -> Result<PathBuf> {
    tokio::fs::create_dir_all(dir)
        .await
        .with_context(|| format!("Failed to create {}", dir.display()))?;
    let options = BrowserFetcherOptions::builder()
        .with_path(dir)
        .build()
        .context("Invalid Chromium download options")?;
    let installed = BrowserFetcher::new(options)
        .fetch()
        .await
        .context("Chromium download failed")?;
    Ok(installed.executable_path)
}

/// CDP events chromiumoxide has no model for; harmless
fn is_unmodelled_event(message: &str) -> bool {
    message.contains("did not match any variant of untagged enum Message")
        || message.contains("Failed to deserialize WS response")
}

/// Launch `executable` on a dedicated profile and drive its CDP connection on a task
pub async fn launch_browser(
    executable: &Path,
    headless: bool,
    user_data_dir: &Path,
) -> Result<(Browser, JoinHandle<()>)> {
    let mut builder = BrowserConfigBuilder::default()
        .chrome_executable(executable)
        .user_data_dir(user_data_dir)
        .request_timeout(Duration::from_secs(30))
        .window_size(1920, 1080)
        .arg(format!("--user-agent={CHROME_USER_AGENT}"));
    for arg in LAUNCH_ARGS {
        builder = builder.arg(*arg);
    }
    builder = if headless {
        builder.headless_mode(HeadlessMode::default())
    } else {
        builder.with_head()
    };
    let config = builder
        .build()
        .map_err(|e| anyhow::anyhow!("Invalid browser config: {e}"))?;

    debug!(profile = %user_data_dir.display(), "Launching browser");
    let (browser, mut events) = Browser::launch(config)
        .await
        .with_context(|| format!("Failed to launch {}", executable.display()))?;

    let handler = tokio::spawn(async move {
        while let Some(event) = events.next().await {
            match event {
                Ok(()) => {}
                Err(e) if is_unmodelled_event(&e.to_string()) => trace!("Ignored CDP event: {e}"),
                Err(e) => error!("CDP handler error: {e}"),
            }
        }
        debug!("CDP handler finished");
    });

    Ok((browser, handler))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn touch(dir: &Path, name: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, b"").expect("create fake executable");
        path
    }

    #[test]
    fn test_configured_executable_wins() {
        let dir = tempfile::tempdir().expect("tempdir");
        let configured = touch(dir.path(), "configured");
        let from_env = touch(dir.path(), "from-env");
        let settings = BrowserSettings {
            executable: Some(configured.clone()),
            ..BrowserSettings::default()
        };

        let found = settings.locate_with(Some(from_env.into_os_string()), None);
        assert_eq!(found, Some((configured, ExecutableSource::Configured)));
    }

    #[test]
    fn test_missing_configured_executable_falls_through() {
        let dir = tempfile::tempdir().expect("tempdir");
        let from_env = touch(dir.path(), "from-env");
        let settings = BrowserSettings {
            executable: Some(dir.path().join("gone")),
            ..BrowserSettings::default()
        };

        let found = settings.locate_with(Some(from_env.clone().into_os_string()), None);
        assert_eq!(found, Some((from_env, ExecutableSource::Environment)));
    }

    #[test]
    fn test_search_path_is_scanned_in_order() {
        let first = tempfile::tempdir().expect("tempdir");
        let second = tempfile::tempdir().expect("tempdir");
        let expected = touch(second.path(), &executable_name("google-chrome"));
        let search_path =
            std::env::join_paths([first.path(), second.path()]).expect("joinable search path");

        let found = BrowserSettings::default().locate_with(None, Some(search_path));
        assert_eq!(found, Some((expected, ExecutableSource::SearchPath)));
    }

    #[test]
    fn test_unmodelled_events_are_recognised() {
        assert!(is_unmodelled_event(
            "data did not match any variant of untagged enum Message"
        ));
        assert!(!is_unmodelled_event("Connection closed"));
    }
}
