//! Fetcher that runs a target's extraction script in a fresh tab
//!
//! Site-specific parsing lives in each target's `extraction_script`, which
//! must evaluate to a JSON array of `{ key, title?, body?, url?, posted_at? }`.

use async_trait::async_trait;
use chromiumoxide::Page;
use std::time::Duration;
use tracing::{debug, warn};

use super::BrowserSettings;
use super::factory::ChromiumSession;
use crate::error::FetchError;
use crate::fetch::Fetcher;
use crate::item::RawItem;
use crate::orchestrator::MonitorTarget;

/// How the loaded page presents itself before extraction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PageVerdict {
    Ok,
    AuthExpired,
    RateLimited,
}

/// Check page text against the configured markers; auth wins over throttling
pub(crate) fn classify_page(content: &str, settings: &BrowserSettings) -> PageVerdict {
    if settings.auth_markers.iter().any(|m| !m.is_empty() && content.contains(m.as_str())) {
        PageVerdict::AuthExpired
    } else if settings
        .rate_limit_markers
        .iter()
        .any(|m| !m.is_empty() && content.contains(m.as_str()))
    {
        PageVerdict::RateLimited
    } else {
        PageVerdict::Ok
    }
}

/// Decode the script result into items
pub(crate) fn decode_items(value: serde_json::Value) -> Result<Vec<RawItem>, FetchError> {
    if !value.is_array() {
        return Err(FetchError::Parse(format!(
            "extraction script returned {}, expected an array",
            json_kind(&value)
        )));
    }
    serde_json::from_value(value).map_err(|e| FetchError::Parse(format!("Malformed item: {e}")))
}

fn json_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "a boolean",
        serde_json::Value::Number(_) => "a number",
        serde_json::Value::String(_) => "a string",
        serde_json::Value::Array(_) => "an array",
        serde_json::Value::Object(_) => "an object",
    }
}

#[derive(Debug, Clone)]
pub struct ScriptFetcher {
    settings: BrowserSettings,
}

impl ScriptFetcher {
    #[must_use]
    pub fn new(settings: BrowserSettings) -> Self {
        Self { settings }
    }

    async fn navigate(&self, page: &Page, url: &str) -> Result<(), FetchError> {
        let timeout = self.settings.navigation_timeout();
        let navigation = async {
            page.goto(url)
                .await
                .map_err(|e| FetchError::Network(format!("Navigation to {url} failed: {e}")))?;
            page.wait_for_navigation()
                .await
                .map_err(|e| FetchError::Network(format!("Waiting for {url} failed: {e}")))?;
            Ok(())
        };
        match tokio::time::timeout(timeout, navigation).await {
            Ok(result) => result,
            Err(_) => Err(FetchError::Timeout {
                operation: format!("Navigation to {url}"),
                after: timeout,
            }),
        }
    }

    async fn extract(&self, page: &Page, target: &MonitorTarget) -> Result<Vec<RawItem>, FetchError> {
        self.navigate(page, &target.url).await?;

        let content = page
            .content()
            .await
            .map_err(|e| FetchError::Network(format!("Failed to read page content: {e}")))?;

        match classify_page(&content, &self.settings) {
            PageVerdict::AuthExpired => {
                return Err(FetchError::AuthExpired(format!("{} requires login", target.url)));
            }
            PageVerdict::RateLimited => {
                return Err(FetchError::RateLimited(format!("{} is throttling requests", target.url)));
            }
            PageVerdict::Ok => {}
        }

        let value = page
            .evaluate(target.extraction_script.as_str())
            .await
            .map_err(|e| FetchError::Parse(format!("Extraction script failed: {e}")))?
            .into_value::<serde_json::Value>()
            .map_err(|e| FetchError::Parse(format!("Extraction script result unreadable: {e}")))?;

        let items = decode_items(value)?;
        debug!(target = %target.id, items = items.len(), "Extracted items");
        Ok(items)
    }
}

#[async_trait]
impl Fetcher<ChromiumSession> for ScriptFetcher {
    async fn fetch(&self, session: &ChromiumSession, target: &MonitorTarget) -> Result<Vec<RawItem>, FetchError> {
        let page = session
            .new_page()
            .await
            .map_err(|e| FetchError::Network(format!("Failed to open tab: {e}")))?;

        let result = self.extract(&page, target).await;

        // Close the tab on every path, bounded so a wedged tab cannot hold the tick
        match tokio::time::timeout(Duration::from_secs(5), page.close()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(target = %target.id, "Failed to close tab: {e}"),
            Err(_) => warn!(target = %target.id, "Timed out closing tab"),
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_markers_classify_page() {
        let settings = BrowserSettings::default();
        assert_eq!(classify_page("<p>ERROR:2048</p>", &settings), PageVerdict::AuthExpired);
        assert_eq!(classify_page("访问过于频繁", &settings), PageVerdict::RateLimited);
        assert_eq!(classify_page("<p>hello</p>", &settings), PageVerdict::Ok);
        // Login wall wins when both appear
        assert_eq!(classify_page("必须登录 请稍后再试", &settings), PageVerdict::AuthExpired);
    }

    #[test]
    fn test_decode_items() {
        let items = decode_items(json!([{"key": "1", "title": "a"}, {"key": "2"}])).expect("decodes");
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].title.as_deref(), Some("a"));

        assert!(matches!(decode_items(json!({"key": "1"})), Err(FetchError::Parse(_))));
        assert!(matches!(decode_items(json!([{"title": "no key"}])), Err(FetchError::Parse(_))));
    }
}
