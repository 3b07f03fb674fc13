//! SQLite-backed item store
//!
//! Uses WAL mode so status reads never wait behind a bulk insert. Inserts go
//! through `ON CONFLICT DO NOTHING RETURNING`, so the primary key on
//! `(target_id, item_key)` decides what is new, even across processes sharing
//! the same database file.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime};
use log::debug;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Row, SqlitePool};

use super::{BrokenTarget, ItemStore};
use crate::error::StoreError;
use crate::item::{DedupKey, RawItem, TargetId};

/// SQL schema for the item store
const SCHEMA_SQL: &str = r#"
-- Every item ever seen, unique per target
CREATE TABLE IF NOT EXISTS items (
    target_id TEXT NOT NULL,
    item_key TEXT NOT NULL,
    title TEXT,
    body TEXT,
    url TEXT,
    posted_at INTEGER,
    stored_at INTEGER NOT NULL,
    PRIMARY KEY (target_id, item_key)
);

-- Targets suspended until manual intervention
CREATE TABLE IF NOT EXISTS target_status (
    target_id TEXT PRIMARY KEY,
    broken INTEGER NOT NULL DEFAULT 0,
    reason TEXT,
    updated_at INTEGER NOT NULL
);

-- Last batched-summary boundary flushed per target
CREATE TABLE IF NOT EXISTS flush_marks (
    target_id TEXT PRIMARY KEY,
    boundary INTEGER NOT NULL
);
"#;

/// Bound parameters per inserted row
const INSERT_COLUMNS: usize = 7;

/// Rows per INSERT statement, kept under SQLite's 999 bound-parameter floor
const INSERT_CHUNK_ROWS: usize = 999 / INSERT_COLUMNS;

/// Keys per `IN (...)` lookup (target id takes one parameter)
const LOOKUP_CHUNK: usize = 500;

/// Item store on a SQLite database file
#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
    path: PathBuf,
}

impl SqliteStore {
    /// Open an existing database or create a new one at `path`
    pub async fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(Duration::from_secs(30));

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await?;

        // Idempotent: every statement is CREATE ... IF NOT EXISTS
        sqlx::query(SCHEMA_SQL).execute(&pool).await?;

        debug!("Opened item store at {}", path.display());
        Ok(Self {
            pool,
            path: path.to_path_buf(),
        })
    }

    /// Default database location under the user's data directory
    #[must_use]
    pub fn default_path() -> PathBuf {
        dirs::data_local_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join("kodegen")
            .join("pagewatch")
            .join("pagewatch.sqlite")
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Close the database connection pool
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

fn to_epoch(at: NaiveDateTime) -> i64 {
    at.and_utc().timestamp()
}

fn from_epoch(secs: i64) -> Result<NaiveDateTime, StoreError> {
    DateTime::from_timestamp(secs, 0)
        .map(|dt| dt.naive_utc())
        .ok_or_else(|| StoreError::Corrupt(format!("flush boundary {secs} out of range")))
}

#[async_trait]
impl ItemStore for SqliteStore {
    async fn find_existing_keys(
        &self,
        target: &TargetId,
        keys: &[DedupKey],
    ) -> Result<HashSet<DedupKey>, StoreError> {
        let mut existing = HashSet::new();

        for chunk in keys.chunks(LOOKUP_CHUNK) {
            let placeholders = vec!["?"; chunk.len()].join(", ");
            let query_str =
                format!("SELECT item_key FROM items WHERE target_id = ? AND item_key IN ({placeholders})");

            let mut query = sqlx::query(&query_str).bind(target.as_str());
            for key in chunk {
                query = query.bind(key.as_str());
            }

            for row in query.fetch_all(&self.pool).await? {
                let key: String = row.try_get("item_key")?;
                existing.insert(DedupKey::from(key));
            }
        }

        Ok(existing)
    }

    async fn bulk_insert(&self, target: &TargetId, items: &[RawItem]) -> Result<Vec<DedupKey>, StoreError> {
        if items.is_empty() {
            return Ok(Vec::new());
        }

        let stored_at = chrono::Utc::now().timestamp();
        let mut inserted = Vec::with_capacity(items.len());
        let mut tx = self.pool.begin().await?;

        for chunk in items.chunks(INSERT_CHUNK_ROWS) {
            let rows = vec!["(?, ?, ?, ?, ?, ?, ?)"; chunk.len()].join(", ");
            let query_str = format!(
                "INSERT INTO items (target_id, item_key, title, body, url, posted_at, stored_at) \
                 VALUES {rows} \
                 ON CONFLICT(target_id, item_key) DO NOTHING \
                 RETURNING item_key"
            );

            let mut query = sqlx::query(&query_str);
            for item in chunk {
                query = query
                    .bind(target.as_str())
                    .bind(item.key.as_str())
                    .bind(item.title.as_deref())
                    .bind(item.body.as_deref())
                    .bind(item.url.as_deref())
                    .bind(item.posted_at)
                    .bind(stored_at);
            }

            for row in query.fetch_all(&mut *tx).await? {
                let key: String = row.try_get("item_key")?;
                inserted.push(DedupKey::from(key));
            }
        }

        tx.commit().await?;
        Ok(inserted)
    }

    async fn mark_target_broken(&self, target: &TargetId, reason: &str) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO target_status (target_id, broken, reason, updated_at)
            VALUES (?, 1, ?, ?)
            ON CONFLICT(target_id) DO UPDATE SET
                broken = 1,
                reason = excluded.reason,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(target.as_str())
        .bind(reason)
        .bind(chrono::Utc::now().timestamp())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn clear_target_broken(&self, target: &TargetId) -> Result<(), StoreError> {
        sqlx::query("UPDATE target_status SET broken = 0, reason = NULL, updated_at = ? WHERE target_id = ?")
            .bind(chrono::Utc::now().timestamp())
            .bind(target.as_str())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn broken_targets(&self) -> Result<Vec<BrokenTarget>, StoreError> {
        let rows: Vec<(String, Option<String>)> = sqlx::query_as(
            "SELECT target_id, reason FROM target_status WHERE broken = 1 ORDER BY target_id",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(target_id, reason)| BrokenTarget {
                target_id: TargetId::new(target_id),
                reason: reason.unwrap_or_default(),
            })
            .collect())
    }

    async fn last_flush(&self, target: &TargetId) -> Result<Option<NaiveDateTime>, StoreError> {
        let row: Option<(i64,)> = sqlx::query_as("SELECT boundary FROM flush_marks WHERE target_id = ?")
            .bind(target.as_str())
            .fetch_optional(&self.pool)
            .await?;

        row.map(|(secs,)| from_epoch(secs)).transpose()
    }

    async fn record_flush(&self, target: &TargetId, boundary: NaiveDateTime) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO flush_marks (target_id, boundary)
            VALUES (?, ?)
            ON CONFLICT(target_id) DO UPDATE SET
                boundary = MAX(boundary, excluded.boundary)
            "#,
        )
        .bind(target.as_str())
        .bind(to_epoch(boundary))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn item_count(&self, target: &TargetId) -> Result<u64, StoreError> {
        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM items WHERE target_id = ?")
            .bind(target.as_str())
            .fetch_one(&self.pool)
            .await?;
        Ok(row.0.max(0) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use tempfile::TempDir;

    async fn open_temp() -> (TempDir, SqliteStore) {
        let dir = TempDir::new().expect("temp dir");
        let store = SqliteStore::open(&dir.path().join("nested").join("items.sqlite"))
            .await
            .expect("open store");
        (dir, store)
    }

    #[tokio::test]
    async fn test_insert_and_lookup() {
        let (_dir, store) = open_temp().await;
        let target = TargetId::new("forum-1");

        let items: Vec<RawItem> = (0..5)
            .map(|i| RawItem::with_key(format!("k{i}")).title(format!("post {i}")))
            .collect();
        let inserted = store.bulk_insert(&target, &items).await.expect("insert");
        assert_eq!(inserted.len(), 5);

        let probe = vec![DedupKey::new("k1"), DedupKey::new("k4"), DedupKey::new("missing")];
        let existing = store.find_existing_keys(&target, &probe).await.expect("lookup");
        assert_eq!(existing.len(), 2);
        assert!(existing.contains(&DedupKey::new("k4")));

        // Keys are scoped per target
        let other = store
            .find_existing_keys(&TargetId::new("forum-2"), &probe)
            .await
            .expect("lookup");
        assert!(other.is_empty());

        store.close().await;
    }

    #[tokio::test]
    async fn test_conflicting_insert_reports_only_new_keys() {
        let (_dir, store) = open_temp().await;
        let target = TargetId::new("forum-1");

        store
            .bulk_insert(&target, &[RawItem::with_key("a"), RawItem::with_key("b")])
            .await
            .expect("first insert");
        let inserted = store
            .bulk_insert(&target, &[RawItem::with_key("b"), RawItem::with_key("c")])
            .await
            .expect("second insert");

        assert_eq!(inserted, vec![DedupKey::new("c")]);
        assert_eq!(store.item_count(&target).await.expect("count"), 3);
        store.close().await;
    }

    #[tokio::test]
    async fn test_large_batch_spans_chunks() {
        let (_dir, store) = open_temp().await;
        let target = TargetId::new("big");

        let items: Vec<RawItem> = (0..1_200).map(|i| RawItem::with_key(format!("k{i}"))).collect();
        let inserted = store.bulk_insert(&target, &items).await.expect("insert");
        assert_eq!(inserted.len(), 1_200);

        let keys: Vec<DedupKey> = items.iter().map(|i| i.key.clone()).collect();
        let existing = store.find_existing_keys(&target, &keys).await.expect("lookup");
        assert_eq!(existing.len(), 1_200);
        store.close().await;
    }

    #[tokio::test]
    async fn test_broken_flag_round_trip() {
        let (_dir, store) = open_temp().await;
        let target = TargetId::new("forum-1");

        store.mark_target_broken(&target, "login expired").await.expect("mark");
        let broken = store.broken_targets().await.expect("list");
        assert_eq!(broken.len(), 1);
        assert_eq!(broken[0].reason, "login expired");

        store.clear_target_broken(&target).await.expect("clear");
        assert!(store.broken_targets().await.expect("list").is_empty());
        store.close().await;
    }

    #[tokio::test]
    async fn test_flush_marker_never_moves_backwards() {
        let (_dir, store) = open_temp().await;
        let target = TargetId::new("forum-1");
        let day = NaiveDate::from_ymd_opt(2024, 5, 1).expect("date");
        let later = day.and_hms_opt(8, 0, 0).expect("time");
        let earlier = day.and_hms_opt(0, 0, 0).expect("time");

        assert_eq!(store.last_flush(&target).await.expect("read"), None);
        store.record_flush(&target, later).await.expect("record");
        store.record_flush(&target, earlier).await.expect("record");
        assert_eq!(store.last_flush(&target).await.expect("read"), Some(later));
        store.close().await;
    }
}
