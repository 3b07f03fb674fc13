//! Filter fetched items against what is already stored, then bulk-insert the rest
//!
//! One existence lookup and one bulk insert per batch, never one query per
//! item. The lookup only narrows the batch; the store's uniqueness constraint
//! still decides, so an item whose key shows up in two overlapping batches is
//! inserted by exactly one of them.

use log::debug;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;

use crate::error::StoreError;
use crate::item::{DedupKey, RawItem, TargetId};
use crate::store::ItemStore;

/// Result of one [`DedupAndPersist::filter_and_store`] call
#[derive(Debug, Clone, Default, Serialize)]
pub struct DedupOutcome {
    /// Items this call actually inserted, in batch order
    pub inserted: Vec<RawItem>,
    pub inserted_count: usize,
    /// Candidates that were already present (stored before, lost a race, or repeated within the batch)
    pub skipped_count: usize,
}

/// Dedup stage sitting in front of an [`ItemStore`]
pub struct DedupAndPersist {
    store: Arc<dyn ItemStore>,
}

impl std::fmt::Debug for DedupAndPersist {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DedupAndPersist").finish_non_exhaustive()
    }
}

impl DedupAndPersist {
    #[must_use]
    pub fn new(store: Arc<dyn ItemStore>) -> Self {
        Self { store }
    }

    #[must_use]
    pub fn store(&self) -> &Arc<dyn ItemStore> {
        &self.store
    }

    /// Persist the candidates not yet stored for `target`
    pub async fn filter_and_store(
        &self,
        target: &TargetId,
        candidates: Vec<RawItem>,
    ) -> Result<DedupOutcome, StoreError> {
        let total = candidates.len();
        if total == 0 {
            return Ok(DedupOutcome::default());
        }

        // First occurrence of a key within the batch wins
        let mut seen = HashSet::with_capacity(total);
        let unique: Vec<RawItem> = candidates
            .into_iter()
            .filter(|item| seen.insert(item.key.clone()))
            .collect();

        let keys: Vec<DedupKey> = unique.iter().map(|item| item.key.clone()).collect();
        let existing = self.store.find_existing_keys(target, &keys).await?;

        let fresh: Vec<RawItem> = unique
            .into_iter()
            .filter(|item| !existing.contains(&item.key))
            .collect();

        if fresh.is_empty() {
            debug!("No new items for target {target} ({total} candidates)");
            return Ok(DedupOutcome {
                inserted: Vec::new(),
                inserted_count: 0,
                skipped_count: total,
            });
        }

        let inserted_keys: HashSet<DedupKey> = self.store.bulk_insert(target, &fresh).await?.into_iter().collect();
        let lost_race = fresh.len() - inserted_keys.len().min(fresh.len());
        if lost_race > 0 {
            debug!("{lost_race} items for target {target} were inserted concurrently elsewhere");
        }

        let inserted: Vec<RawItem> = fresh
            .into_iter()
            .filter(|item| inserted_keys.contains(&item.key))
            .collect();
        let inserted_count = inserted.len();

        debug!(
            "Target {target}: {inserted_count} new, {} skipped of {total} candidates",
            total - inserted_count
        );

        Ok(DedupOutcome {
            inserted,
            inserted_count,
            skipped_count: total - inserted_count,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn items(keys: &[&str]) -> Vec<RawItem> {
        keys.iter().map(|k| RawItem::with_key(*k)).collect()
    }

    #[tokio::test]
    async fn test_batch_uses_one_lookup_and_one_insert() {
        let store = Arc::new(MemoryStore::new());
        let dedup = DedupAndPersist::new(store.clone());
        let target = TargetId::new("t");

        let outcome = dedup
            .filter_and_store(&target, items(&["a", "b", "c"]))
            .await
            .expect("dedup");

        assert_eq!(outcome.inserted_count, 3);
        assert_eq!(store.lookup_calls(), 1);
        assert_eq!(store.insert_calls(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_keys_within_batch_collapse() {
        let store = Arc::new(MemoryStore::new());
        let dedup = DedupAndPersist::new(store.clone());
        let target = TargetId::new("t");

        let outcome = dedup
            .filter_and_store(&target, items(&["a", "a", "b"]))
            .await
            .expect("dedup");

        assert_eq!(outcome.inserted_count, 2);
        assert_eq!(outcome.skipped_count, 1);
    }

    #[tokio::test]
    async fn test_second_identical_batch_inserts_nothing() {
        let store = Arc::new(MemoryStore::new());
        let dedup = DedupAndPersist::new(store.clone());
        let target = TargetId::new("t");

        let first = dedup.filter_and_store(&target, items(&["a", "b"])).await.expect("first");
        let second = dedup.filter_and_store(&target, items(&["a", "b"])).await.expect("second");

        assert_eq!(first.inserted_count, 2);
        assert_eq!(second.inserted_count, 0);
        assert_eq!(second.skipped_count, 2);
        assert_eq!(store.insert_calls(), 1);
    }

    #[tokio::test]
    async fn test_empty_batch_touches_nothing() {
        let store = Arc::new(MemoryStore::new());
        let dedup = DedupAndPersist::new(store.clone());

        let outcome = dedup
            .filter_and_store(&TargetId::new("t"), Vec::new())
            .await
            .expect("dedup");

        assert_eq!(outcome.inserted_count, 0);
        assert_eq!(store.lookup_calls(), 0);
    }
}
