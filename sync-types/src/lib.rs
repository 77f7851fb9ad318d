//! # sync-types
//!
//! Shared types for pairlink, a bidirectional issue-tracker sync engine.
//!
//! This crate provides the foundational types used across all pairlink
//! crates:
//! - [`Side`], [`IssueId`], [`Revision`], [`Direction`], [`PairKey`] -
//!   identity and ordering types
//! - [`SyncRecord`], [`SyncStatus`], [`PendingIntent`] - the persisted unit
//!   of synchronization state
//! - [`Change`], [`IssueSnapshot`], [`Field`] - the ephemeral canonical
//!   change event
//! - [`NormalizeError`] - shared error types

#![warn(missing_docs)]
#![warn(clippy::all)]

mod change;
mod error;
mod ids;
mod record;

pub use change::{
    Change, ChangeKind, CommentEvent, CommentEventKind, Field, IssueSnapshot, Observation,
    RawNotification,
};
pub use error::NormalizeError;
pub use ids::{CommentId, Direction, IssueId, PairKey, Revision, Side};
pub use record::{CommentLink, ConflictDetails, IntentOp, PendingIntent, SyncRecord, SyncStatus};
