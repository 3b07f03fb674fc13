//! In-process store for tests and dry runs

use async_trait::async_trait;
use chrono::NaiveDateTime;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, HashSet};

use super::{BrokenTarget, ItemStore};
use crate::error::StoreError;
use crate::item::{DedupKey, RawItem, TargetId};

#[derive(Debug, Default)]
struct MemoryState {
    items: HashMap<TargetId, HashMap<DedupKey, RawItem>>,
    broken: BTreeMap<TargetId, String>,
    flushes: HashMap<TargetId, NaiveDateTime>,
    insert_calls: usize,
    lookup_calls: usize,
}

/// Mutex-guarded maps behind the [`ItemStore`] contract
///
/// Each operation holds the lock for its whole duration, which gives bulk
/// inserts the same all-or-nothing uniqueness the SQLite constraint does.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed `target` with already-seen items
    pub fn preload(&self, target: &TargetId, items: impl IntoIterator<Item = RawItem>) {
        let mut state = self.state.lock();
        let stored = state.items.entry(target.clone()).or_default();
        for item in items {
            stored.entry(item.key.clone()).or_insert(item);
        }
    }

    /// Stored items for `target`, in key order
    #[must_use]
    pub fn items(&self, target: &TargetId) -> Vec<RawItem> {
        let state = self.state.lock();
        let mut items: Vec<RawItem> = state
            .items
            .get(target)
            .map(|m| m.values().cloned().collect())
            .unwrap_or_default();
        items.sort_by(|a, b| a.key.cmp(&b.key));
        items
    }

    /// How many `bulk_insert` calls have been made
    #[must_use]
    pub fn insert_calls(&self) -> usize {
        self.state.lock().insert_calls
    }

    /// How many `find_existing_keys` calls have been made
    #[must_use]
    pub fn lookup_calls(&self) -> usize {
        self.state.lock().lookup_calls
    }
}

#[async_trait]
impl ItemStore for MemoryStore {
    async fn find_existing_keys(
        &self,
        target: &TargetId,
        keys: &[DedupKey],
    ) -> Result<HashSet<DedupKey>, StoreError> {
        let mut state = self.state.lock();
        state.lookup_calls += 1;
        let Some(stored) = state.items.get(target) else {
            return Ok(HashSet::new());
        };
        Ok(keys.iter().filter(|k| stored.contains_key(*k)).cloned().collect())
    }

    async fn bulk_insert(&self, target: &TargetId, items: &[RawItem]) -> Result<Vec<DedupKey>, StoreError> {
        let mut state = self.state.lock();
        state.insert_calls += 1;
        let stored = state.items.entry(target.clone()).or_default();
        let mut inserted = Vec::new();
        for item in items {
            if !stored.contains_key(&item.key) {
                stored.insert(item.key.clone(), item.clone());
                inserted.push(item.key.clone());
            }
        }
        Ok(inserted)
    }

    async fn mark_target_broken(&self, target: &TargetId, reason: &str) -> Result<(), StoreError> {
        self.state.lock().broken.insert(target.clone(), reason.to_string());
        Ok(())
    }

    async fn clear_target_broken(&self, target: &TargetId) -> Result<(), StoreError> {
        self.state.lock().broken.remove(target);
        Ok(())
    }

    async fn broken_targets(&self) -> Result<Vec<BrokenTarget>, StoreError> {
        Ok(self
            .state
            .lock()
            .broken
            .iter()
            .map(|(target_id, reason)| BrokenTarget {
                target_id: target_id.clone(),
                reason: reason.clone(),
            })
            .collect())
    }

    async fn last_flush(&self, target: &TargetId) -> Result<Option<NaiveDateTime>, StoreError> {
        Ok(self.state.lock().flushes.get(target).copied())
    }

    async fn record_flush(&self, target: &TargetId, boundary: NaiveDateTime) -> Result<(), StoreError> {
        let mut state = self.state.lock();
        let marker = state.flushes.entry(target.clone()).or_insert(boundary);
        if boundary > *marker {
            *marker = boundary;
        }
        Ok(())
    }

    async fn item_count(&self, target: &TargetId) -> Result<u64, StoreError> {
        Ok(self.state.lock().items.get(target).map_or(0, |m| m.len() as u64))
    }
}
