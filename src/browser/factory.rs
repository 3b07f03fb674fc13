//! Session factory launching one Chromium per pooled identity
//!
//! Durable state is a JSON storage-state file holding the logged-in cookies.
//! `create` loads it into the fresh browser; `save` writes the browser's
//! current cookies back so refreshed logins survive restarts.

use async_trait::async_trait;
use chromiumoxide::Page;
use chromiumoxide::browser::Browser;
use chromiumoxide::cdp::browser_protocol::network::{Cookie, CookieParam, TimeSinceEpoch};
use chromiumoxide::cdp::browser_protocol::storage::{GetCookiesParams, SetCookiesParams};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::BrowserSettings;
use super::profile::{BrowserProfile, create_unique_profile_with_prefix};
use super::setup::launch_browser;
use crate::error::{FactoryError, SaveError};
use crate::orchestrator::MonitorTarget;
use crate::session_pool::{SessionFactory, SessionIdentity};
use crate::utils::constants::PROFILE_PREFIX;

/// One cookie as kept in a storage-state file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredCookie {
    pub name: String,
    pub value: String,
    pub domain: String,
    #[serde(default = "default_cookie_path")]
    pub path: String,
    /// Seconds since epoch; negative for session cookies
    #[serde(default = "default_expires")]
    pub expires: f64,
    #[serde(default)]
    pub http_only: bool,
    #[serde(default)]
    pub secure: bool,
}

fn default_cookie_path() -> String {
    "/".to_string()
}

fn default_expires() -> f64 {
    -1.0
}

impl From<&Cookie> for StoredCookie {
    fn from(cookie: &Cookie) -> Self {
        Self {
            name: cookie.name.clone(),
            value: cookie.value.clone(),
            domain: cookie.domain.clone(),
            path: cookie.path.clone(),
            expires: if cookie.session { -1.0 } else { cookie.expires },
            http_only: cookie.http_only,
            secure: cookie.secure,
        }
    }
}

impl StoredCookie {
    fn to_param(&self) -> Result<CookieParam, String> {
        let mut builder = CookieParam::builder()
            .name(self.name.clone())
            .value(self.value.clone())
            .domain(self.domain.clone())
            .path(self.path.clone())
            .http_only(self.http_only)
            .secure(self.secure);
        if self.expires >= 0.0 {
            builder = builder.expires(TimeSinceEpoch::new(self.expires));
        }
        builder.build()
    }
}

/// Storage-state document; unknown fields (origins, local storage) are ignored
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StorageState {
    #[serde(default)]
    pub cookies: Vec<StoredCookie>,
}

/// A live Chromium instance owned by the pool
pub struct ChromiumSession {
    identity: SessionIdentity,
    browser: tokio::sync::Mutex<Browser>,
    handler: JoinHandle<()>,
    state_file: Option<PathBuf>,
    closed: AtomicBool,
    // Dropped last: removes the profile directory
    _profile: BrowserProfile,
}

impl std::fmt::Debug for ChromiumSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChromiumSession")
            .field("identity", &self.identity)
            .field("state_file", &self.state_file)
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl ChromiumSession {
    #[must_use]
    pub fn identity(&self) -> &SessionIdentity {
        &self.identity
    }

    /// Open a fresh tab; callers close it when done
    pub async fn new_page(&self) -> chromiumoxide::error::Result<Page> {
        self.browser.lock().await.new_page("about:blank").await
    }

    /// All cookies in the browser, across domains
    pub async fn cookies(&self) -> chromiumoxide::error::Result<Vec<Cookie>> {
        let browser = self.browser.lock().await;
        let response = browser.execute(GetCookiesParams::default()).await?;
        Ok(response.result.cookies)
    }

    async fn install_cookies(&self, cookies: Vec<CookieParam>) -> chromiumoxide::error::Result<()> {
        if cookies.is_empty() {
            return Ok(());
        }
        let browser = self.browser.lock().await;
        browser.execute(SetCookiesParams::new(cookies)).await?;
        Ok(())
    }
}

/// [`SessionFactory`] launching Chromium with per-session profiles
#[derive(Debug)]
pub struct ChromiumSessionFactory {
    settings: BrowserSettings,
    state_files: DashMap<SessionIdentity, PathBuf>,
    /// Resolved on the first launch, downloaded at most once
    executable: tokio::sync::OnceCell<PathBuf>,
}

impl ChromiumSessionFactory {
    #[must_use]
    pub fn new(settings: BrowserSettings) -> Self {
        Self {
            settings,
            state_files: DashMap::new(),
            executable: tokio::sync::OnceCell::new(),
        }
    }

    /// Register a storage-state file; its content hash is the session identity
    ///
    /// Targets sharing one state file share one pooled browser.
    pub async fn register_state_file(&self, path: &Path) -> anyhow::Result<SessionIdentity> {
        let bytes = read_state_bytes(path).await?;
        let identity = SessionIdentity::from_state(&bytes);
        self.register_as(identity.clone(), path);
        Ok(identity)
    }

    /// Give `target` the session its storage-state file calls for
    ///
    /// An explicit `session` keeps its name and gets the file's cookies;
    /// otherwise the file's content hash becomes the identity. Targets without
    /// a state file are left alone and borrow a session named after their id.
    pub async fn bind_target(&self, target: &mut MonitorTarget) -> anyhow::Result<()> {
        let Some(path) = target.state_file.clone() else { return Ok(()) };
        let bytes = read_state_bytes(&path).await?;
        let identity = target
            .session
            .clone()
            .unwrap_or_else(|| SessionIdentity::from_state(&bytes));
        self.register_as(identity.clone(), &path);
        target.session = Some(identity);
        Ok(())
    }

    fn register_as(&self, identity: SessionIdentity, path: &Path) {
        info!(identity = %identity, path = %path.display(), "Registered storage state");
        self.state_files.insert(identity, path.to_path_buf());
    }

    fn state_file_for(&self, identity: &SessionIdentity) -> Option<PathBuf> {
        self.state_files.get(identity).map(|p| p.value().clone())
    }
}

/// Raw storage-state bytes, checked to parse
async fn read_state_bytes(path: &Path) -> anyhow::Result<Vec<u8>> {
    use anyhow::Context;

    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("Failed to read storage state {}", path.display()))?;
    serde_json::from_slice::<StorageState>(&bytes)
        .with_context(|| format!("Invalid storage state {}", path.display()))?;
    Ok(bytes)
}

async fn read_state(path: &Path) -> Result<StorageState, String> {
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|e| format!("Failed to read {}: {e}", path.display()))?;
    serde_json::from_slice(&bytes).map_err(|e| format!("Invalid storage state {}: {e}", path.display()))
}

/// Replace `path` with `state` via a sibling temp file and rename
async fn write_state(path: &Path, state: &StorageState) -> Result<(), SaveError> {
    let json = serde_json::to_vec_pretty(state).map_err(|e| SaveError(format!("Failed to encode state: {e}")))?;
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, json)
        .await
        .map_err(|e| SaveError(format!("Failed to write {}: {e}", tmp.display())))?;
    tokio::fs::rename(&tmp, path)
        .await
        .map_err(|e| SaveError(format!("Failed to replace {}: {e}", path.display())))
}

#[async_trait]
impl SessionFactory for ChromiumSessionFactory {
    type Session = ChromiumSession;

    async fn create(&self, identity: &SessionIdentity) -> Result<ChromiumSession, FactoryError> {
        let fail = |message: String| FactoryError::new(identity.as_str(), message);

        let state_file = self.state_file_for(identity);
        let cookies = match &state_file {
            Some(path) => read_state(path).await.map_err(fail)?.cookies,
            None => Vec::new(),
        };

        let executable = self
            .executable
            .get_or_try_init(|| self.settings.resolve_executable())
            .await
            .map_err(|e| fail(format!("{e:#}")))?;
        let profile = create_unique_profile_with_prefix(PROFILE_PREFIX).map_err(|e| fail(format!("{e:#}")))?;
        let (browser, handler) = launch_browser(executable, self.settings.headless, profile.path())
            .await
            .map_err(|e| fail(format!("{e:#}")))?;

        let session = ChromiumSession {
            identity: identity.clone(),
            browser: tokio::sync::Mutex::new(browser),
            handler,
            state_file,
            closed: AtomicBool::new(false),
            _profile: profile,
        };

        let params: Vec<CookieParam> = cookies
            .iter()
            .filter_map(|c| match c.to_param() {
                Ok(param) => Some(param),
                Err(e) => {
                    warn!(identity = %identity, cookie = %c.name, "Skipping unusable cookie: {e}");
                    None
                }
            })
            .collect();
        let loaded = params.len();

        if let Err(e) = session.install_cookies(params).await {
            self.close(&session).await;
            return Err(fail(format!("Failed to load cookies: {e}")));
        }

        info!(identity = %identity, cookies = loaded, "Chromium session ready");
        Ok(session)
    }

    async fn save(&self, session: &ChromiumSession) -> Result<(), SaveError> {
        let Some(path) = &session.state_file else {
            debug!(identity = %session.identity, "No storage state registered, nothing to save");
            return Ok(());
        };
        let cookies = session
            .cookies()
            .await
            .map_err(|e| SaveError(format!("Failed to read cookies: {e}")))?;
        let state = StorageState {
            cookies: cookies.iter().map(StoredCookie::from).collect(),
        };
        write_state(path, &state).await?;
        debug!(identity = %session.identity, cookies = state.cookies.len(), "Saved storage state");
        Ok(())
    }

    async fn close(&self, session: &ChromiumSession) {
        if session.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let mut browser = session.browser.lock().await;
        if let Err(e) = browser.close().await {
            warn!(identity = %session.identity, "Failed to close browser: {e}");
        }
        if let Err(e) = browser.wait().await {
            debug!(identity = %session.identity, "Browser process wait failed: {e}");
        }
        session.handler.abort();
        info!(identity = %session.identity, "Chromium session closed");
    }

    fn is_live(&self, session: &ChromiumSession) -> bool {
        !session.closed.load(Ordering::Acquire) && !session.handler.is_finished()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_state_accepts_exported_cookie_shape() {
        let json = r#"{
            "cookies": [
                {"name":"sid","value":"abc","domain":".example.com","path":"/","expires":1893456000,"httpOnly":true,"secure":true,"sameSite":"Lax"},
                {"name":"lang","value":"en","domain":"example.com"}
            ],
            "origins": []
        }"#;
        let state: StorageState = serde_json::from_str(json).expect("state parses");

        assert_eq!(state.cookies.len(), 2);
        assert!(state.cookies[0].http_only);
        assert_eq!(state.cookies[1].path, "/");
        assert!(state.cookies[1].expires < 0.0);
    }

    #[test]
    fn test_cookie_param_builds_without_expiry() {
        let cookie = StoredCookie {
            name: "sid".into(),
            value: "abc".into(),
            domain: "example.com".into(),
            path: "/".into(),
            expires: -1.0,
            http_only: false,
            secure: false,
        };
        let param = cookie.to_param().expect("param builds");
        assert_eq!(param.name, "sid");
        assert!(param.expires.is_none());
    }

    #[tokio::test]
    async fn test_state_file_round_trip() {
        let dir = tempfile::TempDir::new().expect("temp dir");
        let path = dir.path().join("state.json");
        let state = StorageState {
            cookies: vec![StoredCookie {
                name: "sid".into(),
                value: "v1".into(),
                domain: "example.com".into(),
                path: "/".into(),
                expires: 10.0,
                http_only: true,
                secure: true,
            }],
        };

        write_state(&path, &state).await.expect("write");
        assert_eq!(read_state(&path).await.expect("read"), state);

        let factory = ChromiumSessionFactory::new(BrowserSettings::default());
        let identity = factory.register_state_file(&path).await.expect("register");
        assert_eq!(factory.state_file_for(&identity), Some(path));
    }

    #[tokio::test]
    async fn test_bind_target_derives_identity_from_state_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("login.json");
        write_state(&path, &StorageState { cookies: Vec::new() }).await.expect("write");
        let bytes = tokio::fs::read(&path).await.expect("read back");
        let factory = ChromiumSessionFactory::new(BrowserSettings::default());

        let mut derived = MonitorTarget::new("forum-7", "https://example.com");
        derived.state_file = Some(path.clone());
        factory.bind_target(&mut derived).await.expect("bind");
        let identity = SessionIdentity::from_state(&bytes);
        assert_eq!(derived.session_identity(), identity);
        assert_eq!(factory.state_file_for(&identity), Some(path.clone()));

        let mut explicit =
            MonitorTarget::new("forum-8", "https://example.com").with_session(SessionIdentity::new("shared"));
        explicit.state_file = Some(path.clone());
        factory.bind_target(&mut explicit).await.expect("bind");
        assert_eq!(explicit.session_identity().as_str(), "shared");
        assert_eq!(factory.state_file_for(&SessionIdentity::new("shared")), Some(path));

        let mut plain = MonitorTarget::new("forum-9", "https://example.com");
        factory.bind_target(&mut plain).await.expect("nothing to bind");
        assert_eq!(plain.session_identity().as_str(), "forum-9");
    }
}
