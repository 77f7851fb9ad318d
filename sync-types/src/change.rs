//! Canonical change events produced by the normalizer.
//!
//! A [`Change`] is ephemeral: it is produced once per inbound notification,
//! consumed once by the orchestrator, and never persisted.

use crate::ids::{CommentId, IssueId, Revision, Side};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// A verified raw notification handed to the engine by the inbound adapter.
///
/// Authenticity (signature verification) happens entirely outside the
/// engine; every payload delivered here is trusted.
#[derive(Debug, Clone)]
pub struct RawNotification {
    /// Which tracker instance emitted the notification.
    pub side: Side,
    /// Unix timestamp (milliseconds) when the adapter received it.
    pub received_at: i64,
    /// The tracker's webhook payload, as delivered.
    pub payload: serde_json::Value,
}

/// What kind of issue event a change describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    /// The issue was created on the source side.
    Created,
    /// Fields or status changed on an existing issue.
    Updated,
}

/// A synchronizable issue field.
///
/// Status is listed here like any other field, but the orchestrator applies
/// it through the tracker's transition operation rather than a field write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Field {
    /// Issue summary / title.
    Summary,
    /// Issue description body.
    Description,
    /// Workflow status name.
    Status,
    /// Priority name.
    Priority,
    /// Assignee identifier.
    Assignee,
    /// Label set.
    Labels,
}

impl Field {
    /// Map a tracker changelog field name onto a synchronizable field.
    ///
    /// Unknown names return `None` and are ignored by the normalizer.
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "summary" => Some(Self::Summary),
            "description" => Some(Self::Description),
            "status" => Some(Self::Status),
            "priority" => Some(Self::Priority),
            "assignee" => Some(Self::Assignee),
            "labels" => Some(Self::Labels),
            _ => None,
        }
    }

    /// Field name used in payloads and logs.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Summary => "summary",
            Self::Description => "description",
            Self::Status => "status",
            Self::Priority => "priority",
            Self::Assignee => "assignee",
            Self::Labels => "labels",
        }
    }

    /// The complete synchronizable field set.
    pub fn all() -> BTreeSet<Self> {
        [
            Self::Summary,
            Self::Description,
            Self::Status,
            Self::Priority,
            Self::Assignee,
            Self::Labels,
        ]
        .into_iter()
        .collect()
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Canonical snapshot of an issue's synchronizable fields.
///
/// Every field except the summary is optional; trackers routinely omit
/// assignee, priority, or even status, and normalization must not fail on
/// their absence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct IssueSnapshot {
    /// Issue summary.
    pub summary: String,
    /// Description body, if set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Workflow status name, if reported.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    /// Priority name, if set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<String>,
    /// Assignee identifier, if set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assignee: Option<String>,
    /// Labels, possibly empty.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub labels: Vec<String>,
}

/// The canonical change event: one normalized notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Change {
    /// Side the change was observed on.
    pub side: Side,
    /// Issue key on the observing side.
    pub issue_id: IssueId,
    /// Revision marker of the issue state carried in `snapshot`.
    pub revision: Revision,
    /// Created vs updated.
    pub kind: ChangeKind,
    /// Fields the notification reported as changed.
    pub changed_fields: BTreeSet<Field>,
    /// Full field snapshot at `revision`.
    pub snapshot: IssueSnapshot,
}

/// An observed remote state, used for divergence checks and conflict
/// capture.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Observation {
    /// Revision marker of the observed state.
    pub revision: Revision,
    /// Field snapshot at that revision.
    pub snapshot: IssueSnapshot,
}

/// What kind of comment event a notification describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommentEventKind {
    /// A comment was added.
    Created,
    /// An existing comment's body changed.
    Updated,
    /// A comment was removed.
    Deleted,
}

/// A normalized comment notification.
#[derive(Debug, Clone)]
pub struct CommentEvent {
    /// Side the comment event was observed on.
    pub side: Side,
    /// Issue the comment belongs to, keyed on the observing side.
    pub issue_id: IssueId,
    /// Tracker-issued comment id on the observing side.
    pub comment_id: CommentId,
    /// Created / updated / deleted.
    pub kind: CommentEventKind,
}
