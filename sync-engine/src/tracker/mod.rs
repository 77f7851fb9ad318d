//! Tracker adapter abstraction.
//!
//! Each side of the pair is reached through one [`TrackerClient`]
//! instance. The orchestrator never branches on which tracker it is
//! talking to beyond routing to the correct instance; the concrete
//! schema mapping (Jira, GitLab, ...) lives in the adapter, outside the
//! engine.
//!
//! Errors are opaque beyond their retry classification: transient
//! failures go through backoff, permanent ones are parked for the
//! operator after a single confirmation attempt.

mod mock;

pub use mock::MockTracker;

use async_trait::async_trait;
use std::collections::BTreeSet;
use sync_types::{CommentId, Field, IssueId, IssueSnapshot, Revision};
use thiserror::Error;

/// Tracker adapter errors, classified for retry.
#[derive(Debug, Clone, Error)]
pub enum TrackerError {
    /// Network trouble, timeout, or rate limiting. Retried with backoff.
    #[error("transient tracker error: {0}")]
    Transient(String),

    /// Validation rejection or permission denial. Retrying cannot help.
    #[error("permanent tracker error: {0}")]
    Permanent(String),

    /// The referenced issue or comment does not exist.
    #[error("not found: {0}")]
    NotFound(String),
}

/// An issue as fetched from a tracker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteIssue {
    /// Tracker-issued issue key.
    pub id: IssueId,
    /// Current revision marker.
    pub revision: Revision,
    /// Current field snapshot.
    pub snapshot: IssueSnapshot,
}

/// A lightweight issue listing entry for reconciliation sweeps.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssueStub {
    /// Tracker-issued issue key.
    pub id: IssueId,
    /// Current revision marker.
    pub revision: Revision,
}

/// A comment as fetched from a tracker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteComment {
    /// Tracker-issued comment id.
    pub id: CommentId,
    /// Comment body.
    pub body: String,
    /// Display name of the author.
    pub author_name: String,
    /// Author email, when the tracker exposes it.
    pub author_email: Option<String>,
}

/// The field portion of an update write.
///
/// The adapter applies exactly the named fields, taking their values from
/// the snapshot. Status is never in this set; it goes through
/// [`TrackerClient::transition_status`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDelta {
    /// Values to write, one snapshot for all named fields.
    pub snapshot: IssueSnapshot,
    /// Which fields to apply.
    pub fields: BTreeSet<Field>,
}

/// Result of requesting a status transition.
///
/// The engine does not model the target's workflow graph; it requests
/// "transition to X" and treats rejection as a partial, non-fatal outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransitionOutcome {
    /// The transition was performed.
    Applied {
        /// Revision of the issue after the transition.
        revision: Revision,
    },
    /// The issue does not exist on the target.
    NotFound,
    /// The workflow does not allow a transition to the requested status.
    Rejected {
        /// The tracker's explanation.
        reason: String,
    },
}

/// Capability interface for one tracker instance.
#[async_trait]
pub trait TrackerClient: Send + Sync {
    /// Fetch the current state of an issue.
    async fn fetch_issue(&self, id: &IssueId) -> Result<RemoteIssue, TrackerError>;

    /// Create a new issue from the given snapshot; returns it as created.
    async fn create_issue(&self, snapshot: &IssueSnapshot) -> Result<RemoteIssue, TrackerError>;

    /// Apply a field delta; returns the issue's revision after the write.
    async fn update_issue(&self, id: &IssueId, delta: &FieldDelta)
        -> Result<Revision, TrackerError>;

    /// Request a workflow transition to the named status.
    async fn transition_status(
        &self,
        id: &IssueId,
        target: &str,
    ) -> Result<TransitionOutcome, TrackerError>;

    /// List all issues in the synchronized project.
    async fn list_issues(&self) -> Result<Vec<IssueStub>, TrackerError>;

    /// Fetch one comment.
    async fn fetch_comment(
        &self,
        issue: &IssueId,
        comment: &CommentId,
    ) -> Result<RemoteComment, TrackerError>;

    /// Add a comment; returns its tracker-issued id.
    async fn add_comment(&self, issue: &IssueId, body: &str) -> Result<CommentId, TrackerError>;

    /// Replace a comment's body.
    async fn update_comment(
        &self,
        issue: &IssueId,
        comment: &CommentId,
        body: &str,
    ) -> Result<(), TrackerError>;

    /// Delete a comment.
    async fn delete_comment(
        &self,
        issue: &IssueId,
        comment: &CommentId,
    ) -> Result<(), TrackerError>;
}
