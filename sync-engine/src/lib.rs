//! # sync-engine
//!
//! Sync orchestration for pairlink: keeps two independently-administered
//! issue-tracker instances consistent by replicating issue creation and
//! field/status changes in both directions.
//!
//! ## Architecture
//!
//! ```text
//! Tracker 1 ──┐                      ┌── Tracker 2
//!             │  change notifications │
//!             ▼                       ▼
//!        ┌────────────────────────────────┐
//!        │          sync-engine           │
//!        │  normalize → decide → write    │
//!        │  ┌──────────────────────────┐  │
//!        │  │ SQLite (sync records,    │  │
//!        │  │ version-guarded CAS)     │  │
//!        │  └──────────────────────────┘  │
//!        │  retry pass · reconciliation   │
//!        └────────────────────────────────┘
//! ```
//!
//! The engine is built for short-lived concurrent invocations with no
//! shared in-process state: all coordination happens through the record
//! store's optimistic concurrency. Decision logic is pure (sync-core), so
//! losing a compare-and-set race is always recoverable by re-reading and
//! re-deciding.
//!
//! What the engine guarantees:
//! - Idempotent redelivery: processing the same change twice performs one
//!   external write.
//! - Echo suppression: its own mirrored writes are never re-mirrored.
//! - At most one outstanding write per record; newer changes coalesce.
//! - Concurrent divergent edits conflict instead of silently losing one
//!   side; resolution is an explicit operator decision.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod comments;
pub mod config;
pub mod error;
pub mod orchestrator;
pub mod resolver;
pub mod scheduler;
pub mod store;
pub mod tracker;

pub use comments::{CommentOutcome, MIRROR_MARKER};
pub use config::{EngineConfig, RetryConfig, SchedulerConfig, StorageConfig, SyncOptions};
pub use error::{EngineError, StoreError};
pub use orchestrator::{Orchestrator, ProcessOutcome, StatusSummary};
pub use resolver::Resolution;
pub use scheduler::{spawn_scheduler, ReconcileStats, RetryStats};
pub use store::{PutOutcome, RecordStore, SqliteRecordStore, Version, VersionedRecord};
pub use tracker::{
    FieldDelta, IssueStub, MockTracker, RemoteComment, RemoteIssue, TrackerClient, TrackerError,
    TransitionOutcome,
};
