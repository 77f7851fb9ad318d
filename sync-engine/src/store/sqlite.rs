//! SQLite storage backend for sync records.

use super::{PutOutcome, RecordStore, Version, VersionedRecord};
use crate::error::StoreError;
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;
use sync_types::{CommentId, CommentLink, IssueId, PairKey, Side, SyncRecord, SyncStatus};

/// SQLite-based record storage.
///
/// Uses WAL mode for concurrent reads/writes. The compare-and-set contract
/// is a single `UPDATE ... WHERE version = ?`; SQLite serializes writers,
/// so exactly one racing caller wins.
#[derive(Clone)]
pub struct SqliteRecordStore {
    pool: SqlitePool,
}

impl SqliteRecordStore {
    /// Open the store configured in `[storage]`.
    pub async fn from_config(config: &crate::config::StorageConfig) -> Result<Self, StoreError> {
        Self::open(&config.database).await
    }

    /// Open (or create) a record store at the given database path.
    pub async fn open(path: &Path) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(path.to_str().unwrap_or("pairlink.db"))
            .map_err(StoreError::Database)?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
            .busy_timeout(std::time::Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(10)
            .connect_with(options)
            .await
            .map_err(StoreError::Database)?;

        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    /// Create an in-memory record store (for testing).
    pub async fn in_memory() -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(":memory:")
            .map_err(StoreError::Database)?
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(StoreError::Database)?;

        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    /// Run database migrations.
    async fn run_migrations(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS sync_records (
                record_id TEXT PRIMARY KEY,
                issue_one TEXT,
                issue_two TEXT,
                status TEXT NOT NULL,
                version INTEGER NOT NULL,
                body TEXT NOT NULL,
                updated_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(StoreError::Database)?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS comment_links (
                link_id TEXT PRIMARY KEY,
                body TEXT NOT NULL,
                synced_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(StoreError::Database)?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_records_status ON sync_records(status)")
            .execute(&self.pool)
            .await
            .map_err(StoreError::Database)?;

        // One record per issue, per side. A provisional record and its
        // re-keyed successor carry the same issue key, so the constraint
        // survives re-keying.
        sqlx::query(
            "CREATE UNIQUE INDEX IF NOT EXISTS idx_records_issue_one \
             ON sync_records(issue_one) WHERE issue_one IS NOT NULL",
        )
        .execute(&self.pool)
        .await
        .map_err(StoreError::Database)?;

        sqlx::query(
            "CREATE UNIQUE INDEX IF NOT EXISTS idx_records_issue_two \
             ON sync_records(issue_two) WHERE issue_two IS NOT NULL",
        )
        .execute(&self.pool)
        .await
        .map_err(StoreError::Database)?;

        Ok(())
    }

    fn decode(key: &str, version: i64, body: &str) -> Result<VersionedRecord, StoreError> {
        let record: SyncRecord =
            serde_json::from_str(body).map_err(|e| StoreError::Corrupt {
                key: key.to_string(),
                reason: e.to_string(),
            })?;
        Ok(VersionedRecord {
            version: Version::new(version as u64),
            record,
        })
    }

    fn comment_link_id(source_side: Side, issue: &IssueId, comment: &CommentId) -> String {
        format!("{source_side}#{issue}#{comment}")
    }
}

#[async_trait]
impl RecordStore for SqliteRecordStore {
    async fn get(&self, key: &PairKey) -> Result<Option<VersionedRecord>, StoreError> {
        let row: Option<(i64, String)> = sqlx::query_as(
            "SELECT version, body FROM sync_records WHERE record_id = ?1",
        )
        .bind(key.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(StoreError::Database)?;

        row.map(|(version, body)| Self::decode(&key.to_string(), version, &body))
            .transpose()
    }

    async fn find_by_issue(
        &self,
        side: Side,
        id: &IssueId,
    ) -> Result<Option<VersionedRecord>, StoreError> {
        let column = match side {
            Side::One => "issue_one",
            Side::Two => "issue_two",
        };
        let sql = format!("SELECT record_id, version, body FROM sync_records WHERE {column} = ?1");
        let row: Option<(String, i64, String)> = sqlx::query_as(&sql)
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(StoreError::Database)?;

        row.map(|(record_id, version, body)| Self::decode(&record_id, version, &body))
            .transpose()
    }

    async fn put_if_version(
        &self,
        key: &PairKey,
        expected: Version,
        record: &SyncRecord,
    ) -> Result<PutOutcome, StoreError> {
        let body = serde_json::to_string(record).map_err(|e| StoreError::Corrupt {
            key: record.key().to_string(),
            reason: e.to_string(),
        })?;
        let new_key = record.key().to_string();
        let issue_one = record.issue_one.as_ref().map(IssueId::as_str);
        let issue_two = record.issue_two.as_ref().map(IssueId::as_str);
        let status = record.status.as_str();

        if expected == Version::NEW {
            let result = sqlx::query(
                r#"
                INSERT INTO sync_records
                    (record_id, issue_one, issue_two, status, version, body, updated_at)
                VALUES (?1, ?2, ?3, ?4, 1, ?5, ?6)
                "#,
            )
            .bind(&new_key)
            .bind(issue_one)
            .bind(issue_two)
            .bind(status)
            .bind(&body)
            .bind(record.updated_at)
            .execute(&self.pool)
            .await;

            return match result {
                Ok(_) => Ok(PutOutcome::Stored(Version::new(1))),
                Err(e) if is_unique_violation(&e) => Ok(PutOutcome::Stale),
                Err(e) => Err(StoreError::Database(e)),
            };
        }

        let result = sqlx::query(
            r#"
            UPDATE sync_records
            SET record_id = ?1, issue_one = ?2, issue_two = ?3, status = ?4,
                version = version + 1, body = ?5, updated_at = ?6
            WHERE record_id = ?7 AND version = ?8
            "#,
        )
        .bind(&new_key)
        .bind(issue_one)
        .bind(issue_two)
        .bind(status)
        .bind(&body)
        .bind(record.updated_at)
        .bind(key.to_string())
        .bind(expected.value() as i64)
        .execute(&self.pool)
        .await;

        match result {
            Ok(done) if done.rows_affected() == 0 => Ok(PutOutcome::Stale),
            Ok(_) => Ok(PutOutcome::Stored(Version::new(expected.value() + 1))),
            // A re-key that collides with an existing row loses like any
            // other race.
            Err(e) if is_unique_violation(&e) => Ok(PutOutcome::Stale),
            Err(e) => Err(StoreError::Database(e)),
        }
    }

    async fn scan_status(
        &self,
        statuses: &[SyncStatus],
    ) -> Result<Vec<VersionedRecord>, StoreError> {
        if statuses.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders = vec!["?"; statuses.len()].join(", ");
        let sql = format!(
            "SELECT record_id, version, body FROM sync_records \
             WHERE status IN ({placeholders}) ORDER BY record_id"
        );
        let mut query = sqlx::query_as::<_, (String, i64, String)>(&sql);
        for status in statuses {
            query = query.bind(status.as_str());
        }
        let rows = query
            .fetch_all(&self.pool)
            .await
            .map_err(StoreError::Database)?;

        rows.into_iter()
            .map(|(record_id, version, body)| Self::decode(&record_id, version, &body))
            .collect()
    }

    async fn list_all(&self) -> Result<Vec<VersionedRecord>, StoreError> {
        let rows: Vec<(String, i64, String)> = sqlx::query_as(
            "SELECT record_id, version, body FROM sync_records ORDER BY record_id",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(StoreError::Database)?;

        rows.into_iter()
            .map(|(record_id, version, body)| Self::decode(&record_id, version, &body))
            .collect()
    }

    async fn get_comment_link(
        &self,
        source_side: Side,
        issue: &IssueId,
        comment: &CommentId,
    ) -> Result<Option<CommentLink>, StoreError> {
        let link_id = Self::comment_link_id(source_side, issue, comment);
        let row: Option<(String,)> =
            sqlx::query_as("SELECT body FROM comment_links WHERE link_id = ?1")
                .bind(&link_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(StoreError::Database)?;

        row.map(|(body,)| {
            serde_json::from_str(&body).map_err(|e| StoreError::Corrupt {
                key: link_id.clone(),
                reason: e.to_string(),
            })
        })
        .transpose()
    }

    async fn put_comment_link(&self, link: &CommentLink) -> Result<(), StoreError> {
        let link_id = Self::comment_link_id(link.source_side, &link.issue_id, &link.source_comment);
        let body = serde_json::to_string(link).map_err(|e| StoreError::Corrupt {
            key: link_id.clone(),
            reason: e.to_string(),
        })?;

        sqlx::query(
            r#"
            INSERT INTO comment_links (link_id, body, synced_at)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(link_id) DO UPDATE SET body = ?2, synced_at = ?3
            "#,
        )
        .bind(&link_id)
        .bind(&body)
        .bind(link.synced_at)
        .execute(&self.pool)
        .await
        .map_err(StoreError::Database)?;

        Ok(())
    }
}

fn is_unique_violation(error: &sqlx::Error) -> bool {
    error
        .as_database_error()
        .is_some_and(|db| db.is_unique_violation())
}

#[cfg(test)]
mod tests {
    use super::*;
    use sync_types::SyncStatus;

    fn record(side: Side, key: &str) -> SyncRecord {
        SyncRecord::new(side, IssueId::from(key), 1_000)
    }

    #[tokio::test]
    async fn insert_and_get_roundtrip() {
        let store = SqliteRecordStore::in_memory().await.unwrap();
        let rec = record(Side::One, "P1-10");

        let outcome = store
            .put_if_version(&rec.key(), Version::NEW, &rec)
            .await
            .unwrap();
        assert_eq!(outcome, PutOutcome::Stored(Version::new(1)));

        let loaded = store.get(&rec.key()).await.unwrap().unwrap();
        assert_eq!(loaded.version, Version::new(1));
        assert_eq!(loaded.record, rec);
    }

    #[tokio::test]
    async fn double_insert_is_stale() {
        let store = SqliteRecordStore::in_memory().await.unwrap();
        let rec = record(Side::One, "P1-10");

        store
            .put_if_version(&rec.key(), Version::NEW, &rec)
            .await
            .unwrap();
        let second = store
            .put_if_version(&rec.key(), Version::NEW, &rec)
            .await
            .unwrap();
        assert_eq!(second, PutOutcome::Stale);
    }

    #[tokio::test]
    async fn stale_version_is_rejected() {
        let store = SqliteRecordStore::in_memory().await.unwrap();
        let mut rec = record(Side::One, "P1-10");
        store
            .put_if_version(&rec.key(), Version::NEW, &rec)
            .await
            .unwrap();

        rec.status = SyncStatus::Failed;
        let first = store
            .put_if_version(&rec.key(), Version::new(1), &rec)
            .await
            .unwrap();
        assert_eq!(first, PutOutcome::Stored(Version::new(2)));

        // Writing against the superseded version must lose.
        let second = store
            .put_if_version(&rec.key(), Version::new(1), &rec)
            .await
            .unwrap();
        assert_eq!(second, PutOutcome::Stale);
    }

    #[tokio::test]
    async fn rekeying_moves_the_row() {
        let store = SqliteRecordStore::in_memory().await.unwrap();
        let mut rec = record(Side::One, "P1-10");
        let provisional_key = rec.key();
        store
            .put_if_version(&provisional_key, Version::NEW, &rec)
            .await
            .unwrap();

        rec.set_issue(Side::Two, IssueId::from("P2-7"));
        rec.status = SyncStatus::Linked;
        let outcome = store
            .put_if_version(&provisional_key, Version::new(1), &rec)
            .await
            .unwrap();
        assert_eq!(outcome, PutOutcome::Stored(Version::new(2)));

        assert!(store.get(&provisional_key).await.unwrap().is_none());
        let loaded = store.get(&rec.key()).await.unwrap().unwrap();
        assert_eq!(loaded.record.issue(Side::Two), Some(&IssueId::from("P2-7")));

        // Lookups by either side's issue key find the moved row.
        let by_one = store
            .find_by_issue(Side::One, &IssueId::from("P1-10"))
            .await
            .unwrap();
        assert!(by_one.is_some());
        let by_two = store
            .find_by_issue(Side::Two, &IssueId::from("P2-7"))
            .await
            .unwrap();
        assert!(by_two.is_some());
    }

    #[tokio::test]
    async fn scan_status_filters() {
        let store = SqliteRecordStore::in_memory().await.unwrap();

        let linked = {
            let mut r = record(Side::One, "P1-1");
            r.status = SyncStatus::Linked;
            r
        };
        let failed = {
            let mut r = record(Side::One, "P1-2");
            r.status = SyncStatus::Failed;
            r
        };
        store
            .put_if_version(&linked.key(), Version::NEW, &linked)
            .await
            .unwrap();
        store
            .put_if_version(&failed.key(), Version::NEW, &failed)
            .await
            .unwrap();

        let found = store.scan_status(&[SyncStatus::Failed]).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].record.status, SyncStatus::Failed);

        let both = store
            .scan_status(&[SyncStatus::Failed, SyncStatus::Linked])
            .await
            .unwrap();
        assert_eq!(both.len(), 2);

        assert!(store.scan_status(&[]).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn comment_link_roundtrip() {
        let store = SqliteRecordStore::in_memory().await.unwrap();
        let link = CommentLink {
            source_side: Side::One,
            issue_id: IssueId::from("P1-10"),
            source_comment: CommentId::new("c-41"),
            target_comment: Some(CommentId::new("c-99")),
            synced_at: 5_000,
        };

        store.put_comment_link(&link).await.unwrap();
        let loaded = store
            .get_comment_link(Side::One, &IssueId::from("P1-10"), &CommentId::new("c-41"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(loaded, link);

        // Upsert replaces.
        let updated = CommentLink {
            synced_at: 6_000,
            ..link.clone()
        };
        store.put_comment_link(&updated).await.unwrap();
        let loaded = store
            .get_comment_link(Side::One, &IssueId::from("P1-10"), &CommentId::new("c-41"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(loaded.synced_at, 6_000);

        assert!(store
            .get_comment_link(Side::Two, &IssueId::from("P1-10"), &CommentId::new("c-41"))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn open_on_disk_creates_database() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pairlink.db");
        let store = SqliteRecordStore::open(&path).await.unwrap();

        let rec = record(Side::Two, "P2-1");
        store
            .put_if_version(&rec.key(), Version::NEW, &rec)
            .await
            .unwrap();
        assert!(path.exists());

        let loaded = store
            .find_by_issue(Side::Two, &IssueId::from("P2-1"))
            .await
            .unwrap();
        assert!(loaded.is_some());
    }
}
