//! The persisted unit of synchronization state.
//!
//! One [`SyncRecord`] exists per linked issue pair. Records are created on
//! the first observed change for an issue with no known counterpart,
//! mutated on every processed change and retry outcome, and never deleted
//! (they remain as an audit trail; retention is an external concern).

use crate::change::{Field, IssueSnapshot, Observation};
use crate::ids::{CommentId, Direction, IssueId, PairKey, Revision, Side};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Lifecycle status of a sync record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    /// Both sides exist and match as of the last applied revisions.
    Linked,
    /// A create-mirror write is outstanding for the counterpart side.
    PendingCreate,
    /// An update write is outstanding for the counterpart side.
    PendingUpdate,
    /// Both sides diverged concurrently; waiting on an operator decision.
    Conflicted,
    /// The last external write failed; the retry scheduler owns the record.
    Failed,
    /// An operator decision was accepted; the resolving write is in flight.
    Resolved,
}

impl SyncStatus {
    /// Stable string form used for storage and filtered scans.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Linked => "linked",
            Self::PendingCreate => "pending_create",
            Self::PendingUpdate => "pending_update",
            Self::Conflicted => "conflicted",
            Self::Failed => "failed",
            Self::Resolved => "resolved",
        }
    }

    /// Parse the stable string form.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "linked" => Some(Self::Linked),
            "pending_create" => Some(Self::PendingCreate),
            "pending_update" => Some(Self::PendingUpdate),
            "conflicted" => Some(Self::Conflicted),
            "failed" => Some(Self::Failed),
            "resolved" => Some(Self::Resolved),
            _ => None,
        }
    }

    /// Whether a write intent may be outstanding in this status.
    pub fn has_outstanding_intent(self) -> bool {
        matches!(
            self,
            Self::PendingCreate | Self::PendingUpdate | Self::Failed | Self::Resolved
        )
    }
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The operation an outstanding intent will perform on the target side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentOp {
    /// Create the mirror issue.
    Create,
    /// Apply a field/status delta to the existing mirror.
    Update,
}

/// The single outstanding write a record may carry.
///
/// A record never holds more than one intent; a newer change observed while
/// an intent is outstanding replaces the payload (last-writer-wins) and
/// unions the changed-field set, so at most one external write is ever in
/// flight per record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingIntent {
    /// Side the write goes to.
    pub target: Side,
    /// Create-mirror or apply-update.
    pub op: IntentOp,
    /// Source-side snapshot to mirror.
    pub snapshot: IssueSnapshot,
    /// Revision of the source state captured in `snapshot`.
    pub source_revision: Revision,
    /// Fields to apply on the target.
    pub fields: BTreeSet<Field>,
}

/// Both sides' divergent states, captured when a conflict is declared.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictDetails {
    /// Side one's observed state at detection time.
    pub one: Observation,
    /// Side two's observed state at detection time.
    pub two: Observation,
    /// Unix timestamp (milliseconds) of detection.
    pub detected_at: i64,
}

impl ConflictDetails {
    /// The captured observation for the given side.
    pub fn side(&self, side: Side) -> &Observation {
        match side {
            Side::One => &self.one,
            Side::Two => &self.two,
        }
    }

    /// Replace the captured observation for the given side.
    pub fn set_side(&mut self, side: Side, observation: Observation) {
        match side {
            Side::One => self.one = observation,
            Side::Two => self.two = observation,
        }
    }
}

/// One record per linked issue pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncRecord {
    /// Issue key on side one, once known.
    pub issue_one: Option<IssueId>,
    /// Issue key on side two, once known.
    pub issue_two: Option<IssueId>,
    /// Lifecycle status.
    pub status: SyncStatus,
    /// Last revision side one had when the engine last wrote to or
    /// mirrored from it. Used for echo and divergence detection.
    pub last_applied_one: Option<Revision>,
    /// Same, for side two.
    pub last_applied_two: Option<Revision>,
    /// Which side initiated the most recently applied change.
    pub last_direction: Option<Direction>,
    /// The single outstanding write intent, if any.
    pub pending: Option<PendingIntent>,
    /// Consecutive failed attempts for the current intent.
    pub retry_count: u32,
    /// Unix timestamp (milliseconds) before which the retry pass must not
    /// re-drive the intent. `None` once retries are exhausted.
    pub next_retry_at: Option<i64>,
    /// Present exactly when `status == Conflicted`.
    pub conflict: Option<ConflictDetails>,
    /// Message from the most recent write failure.
    pub last_error: Option<String>,
    /// Message from the most recent partial apply (e.g. rejected status
    /// transition).
    pub last_warning: Option<String>,
    /// Unix timestamp (milliseconds) of the last mutation.
    pub updated_at: i64,
}

impl SyncRecord {
    /// A fresh record knowing only one side, with no history.
    pub fn new(side: Side, id: IssueId, now: i64) -> Self {
        let mut record = Self {
            issue_one: None,
            issue_two: None,
            status: SyncStatus::PendingCreate,
            last_applied_one: None,
            last_applied_two: None,
            last_direction: None,
            pending: None,
            retry_count: 0,
            next_retry_at: None,
            conflict: None,
            last_error: None,
            last_warning: None,
            updated_at: now,
        };
        record.set_issue(side, id);
        record
    }

    /// The key this record is (or should be) stored under.
    pub fn key(&self) -> PairKey {
        PairKey {
            one: self.issue_one.clone(),
            two: self.issue_two.clone(),
        }
    }

    /// Issue key on the given side, if known.
    pub fn issue(&self, side: Side) -> Option<&IssueId> {
        match side {
            Side::One => self.issue_one.as_ref(),
            Side::Two => self.issue_two.as_ref(),
        }
    }

    /// Record the issue key for a side.
    pub fn set_issue(&mut self, side: Side, id: IssueId) {
        match side {
            Side::One => self.issue_one = Some(id),
            Side::Two => self.issue_two = Some(id),
        }
    }

    /// Last applied revision for a side.
    pub fn last_applied(&self, side: Side) -> Option<Revision> {
        match side {
            Side::One => self.last_applied_one,
            Side::Two => self.last_applied_two,
        }
    }

    /// Advance a side's last applied revision. Revisions only move forward;
    /// an older value is ignored.
    pub fn advance_last_applied(&mut self, side: Side, revision: Revision) {
        let slot = match side {
            Side::One => &mut self.last_applied_one,
            Side::Two => &mut self.last_applied_two,
        };
        match slot {
            Some(current) if *current >= revision => {}
            _ => *slot = Some(revision),
        }
    }
}

/// Loop-prevention link for one mirrored comment.
///
/// Keyed by the source comment; the presence of a link means the comment
/// has already been mirrored and must not be mirrored again.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommentLink {
    /// Side the source comment lives on.
    pub source_side: Side,
    /// Issue the source comment belongs to, keyed on the source side.
    pub issue_id: IssueId,
    /// Source comment id.
    pub source_comment: CommentId,
    /// Mirrored comment id on the counterpart side, once created.
    pub target_comment: Option<CommentId>,
    /// Unix timestamp (milliseconds) of the last mirror write.
    pub synced_at: i64,
}
