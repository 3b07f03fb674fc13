//! Persistence boundary for seen items, broken flags and flush markers
//!
//! The store's uniqueness constraint on `(target_id, item_key)` is the final
//! arbiter of "already present": several processes may share one store, so
//! nothing above this layer relies on in-process locking for dedup.

pub mod memory;
pub mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use async_trait::async_trait;
use chrono::NaiveDateTime;
use serde::Serialize;
use std::collections::HashSet;

use crate::error::StoreError;
use crate::item::{DedupKey, RawItem, TargetId};

/// A target flagged as fatally broken, with the reason recorded at the time
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BrokenTarget {
    pub target_id: TargetId,
    pub reason: String,
}

/// Transactional, key-addressable item store
#[async_trait]
pub trait ItemStore: Send + Sync + 'static {
    /// Subset of `keys` already stored for `target` (one batched lookup)
    async fn find_existing_keys(
        &self,
        target: &TargetId,
        keys: &[DedupKey],
    ) -> Result<HashSet<DedupKey>, StoreError>;

    /// Insert `items`, silently ignoring keys that already exist
    ///
    /// Returns the keys this call actually inserted. Duplicate keys are never
    /// an error here.
    async fn bulk_insert(&self, target: &TargetId, items: &[RawItem]) -> Result<Vec<DedupKey>, StoreError>;

    /// Flag `target` as needing manual intervention
    async fn mark_target_broken(&self, target: &TargetId, reason: &str) -> Result<(), StoreError>;

    /// Clear the broken flag after an external reset
    async fn clear_target_broken(&self, target: &TargetId) -> Result<(), StoreError>;

    /// Every target currently flagged broken
    async fn broken_targets(&self) -> Result<Vec<BrokenTarget>, StoreError>;

    /// Last batched-summary boundary flushed for `target`
    async fn last_flush(&self, target: &TargetId) -> Result<Option<NaiveDateTime>, StoreError>;

    /// Advance the flush marker; a boundary older than the stored one is ignored
    async fn record_flush(&self, target: &TargetId, boundary: NaiveDateTime) -> Result<(), StoreError>;

    /// Number of items stored for `target`
    async fn item_count(&self, target: &TargetId) -> Result<u64, StoreError>;
}
