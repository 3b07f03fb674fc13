//! Outbound delivery of new items
//!
//! Message layout is not this crate's concern: notifiers receive raw items
//! and decide how to present them.

pub mod webhook;

pub use webhook::{WebhookConfig, WebhookNotifier};

use async_trait::async_trait;
use log::info;

use crate::error::NotifyError;
use crate::item::{RawItem, TargetId};

#[async_trait]
pub trait Notifier: Send + Sync + 'static {
    /// Deliver one new item (frequent mode)
    async fn send(&self, target: &TargetId, item: &RawItem) -> Result<(), NotifyError>;

    /// Deliver one digest of everything collected in a batched window
    async fn send_summary(&self, target: &TargetId, items: &[RawItem]) -> Result<(), NotifyError>;
}

/// Notifier that only logs, for dry runs without a webhook
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, target: &TargetId, item: &RawItem) -> Result<(), NotifyError> {
        info!(
            "[{target}] new item {}: {}",
            item.key,
            item.title.as_deref().unwrap_or("(untitled)")
        );
        Ok(())
    }

    async fn send_summary(&self, target: &TargetId, items: &[RawItem]) -> Result<(), NotifyError> {
        info!("[{target}] summary of {} items", items.len());
        Ok(())
    }
}
