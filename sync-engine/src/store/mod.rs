//! Sync record storage.
//!
//! One row per linked issue pair, with version-guarded writes. Optimistic
//! concurrency is mandatory: the orchestrator and the retry scheduler may
//! race on the same record, and a `Stale` result forces the loser to
//! re-read and re-decide rather than overwrite blindly.

mod sqlite;

pub use sqlite::SqliteRecordStore;

use crate::error::StoreError;
use async_trait::async_trait;
use std::fmt;
use sync_types::{CommentId, CommentLink, IssueId, PairKey, Side, SyncRecord, SyncStatus};

/// Monotonic per-record write counter used for compare-and-set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Version(u64);

impl Version {
    /// Expected version for inserting a record that must not exist yet.
    pub const NEW: Self = Self(0);

    /// Wrap a raw version counter.
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    /// The raw counter value.
    pub fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A record together with the version it was read at.
#[derive(Debug, Clone)]
pub struct VersionedRecord {
    /// Version to pass back to [`RecordStore::put_if_version`].
    pub version: Version,
    /// The record as stored.
    pub record: SyncRecord,
}

/// Result of a version-guarded write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutOutcome {
    /// The write was applied; the record is now at this version.
    Stored(Version),
    /// Someone else mutated the record first; re-read and re-decide.
    Stale,
}

/// Trait for sync record storage backends.
///
/// Records are never deleted; they remain as an audit trail. Retention is
/// an external concern.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Point lookup by pair key.
    async fn get(&self, key: &PairKey) -> Result<Option<VersionedRecord>, StoreError>;

    /// Point lookup by one side's issue key.
    async fn find_by_issue(
        &self,
        side: Side,
        id: &IssueId,
    ) -> Result<Option<VersionedRecord>, StoreError>;

    /// Version-guarded write.
    ///
    /// `key` is the key the record is currently stored under; the record's
    /// own key may differ when a completed mirror re-keys a provisional
    /// record, and the row is moved in the same guarded write.
    /// `Version::NEW` means "insert; fail `Stale` if the key exists".
    async fn put_if_version(
        &self,
        key: &PairKey,
        expected: Version,
        record: &SyncRecord,
    ) -> Result<PutOutcome, StoreError>;

    /// All records whose status is in `statuses`.
    async fn scan_status(
        &self,
        statuses: &[SyncStatus],
    ) -> Result<Vec<VersionedRecord>, StoreError>;

    /// Every record. Used by the reconciliation sweep and status queries.
    async fn list_all(&self) -> Result<Vec<VersionedRecord>, StoreError>;

    /// Loop-prevention link for a mirrored comment, if one exists.
    async fn get_comment_link(
        &self,
        source_side: Side,
        issue: &IssueId,
        comment: &CommentId,
    ) -> Result<Option<CommentLink>, StoreError>;

    /// Insert or replace a comment link.
    async fn put_comment_link(&self, link: &CommentLink) -> Result<(), StoreError>;
}
