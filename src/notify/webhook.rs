//! JSON webhook delivery over reqwest

use async_trait::async_trait;
use log::debug;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::Notifier;
use crate::error::NotifyError;
use crate::item::{RawItem, TargetId};

/// Maximum response body kept in a `Rejected` or `Unavailable` error
const MAX_ERROR_BODY: usize = 512;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WebhookConfig {
    /// Endpoint receiving the JSON documents; notifications are logged only when unset
    pub url: Option<String>,
    /// Per-request timeout (default: 10s)
    pub timeout_secs: u64,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            url: None,
            timeout_secs: 10,
        }
    }
}

#[derive(Serialize)]
struct ItemPayload<'a> {
    target: &'a TargetId,
    item: &'a RawItem,
}

#[derive(Serialize)]
struct SummaryPayload<'a> {
    target: &'a TargetId,
    items: &'a [RawItem],
}

/// Posts one JSON document per item or digest
#[derive(Debug, Clone)]
pub struct WebhookNotifier {
    client: Client,
    url: url::Url,
    timeout: Duration,
}

impl WebhookNotifier {
    pub fn new(url: url::Url, timeout: Duration) -> Result<Self, NotifyError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| NotifyError::Transport(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self { client, url, timeout })
    }

    async fn post<T: Serialize + Sync>(&self, payload: &T) -> Result<(), NotifyError> {
        let response = self
            .client
            .post(self.url.clone())
            .json(payload)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    NotifyError::Timeout(self.timeout)
                } else {
                    NotifyError::Transport(format!("Request failed: {e}"))
                }
            })?;

        let status = response.status();
        if status.is_success() {
            debug!("Webhook accepted payload ({})", status.as_u16());
            return Ok(());
        }

        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u64>().ok())
                .map(Duration::from_secs);
            return Err(NotifyError::RateLimited { retry_after });
        }

        let mut body = response.text().await.unwrap_or_default();
        if body.len() > MAX_ERROR_BODY {
            let cut = (0..=MAX_ERROR_BODY).rev().find(|i| body.is_char_boundary(*i)).unwrap_or(0);
            body.truncate(cut);
        }
        let status = status.as_u16();
        if is_transient(status) {
            Err(NotifyError::Unavailable { status, body })
        } else {
            Err(NotifyError::Rejected { status, body })
        }
    }
}

/// Statuses worth retrying: the endpoint failed, not the payload
fn is_transient(status: u16) -> bool {
    status == StatusCode::REQUEST_TIMEOUT.as_u16() || (500..600).contains(&status)
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn send(&self, target: &TargetId, item: &RawItem) -> Result<(), NotifyError> {
        self.post(&ItemPayload { target, item }).await
    }

    async fn send_summary(&self, target: &TargetId, items: &[RawItem]) -> Result<(), NotifyError> {
        self.post(&SummaryPayload { target, items }).await
    }
}
