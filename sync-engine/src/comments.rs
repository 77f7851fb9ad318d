//! Comment replication.
//!
//! Comments are mirrored one-way per event: a comment created, edited, or
//! deleted on one side is replayed onto the counterpart issue. Two guards
//! prevent loops: a per-comment link record (a mirrored comment is never
//! mirrored twice), and a marker prefix on mirrored bodies (the engine's
//! own comments are recognized and dropped when their notifications come
//! back).

use crate::error::Result;
use crate::orchestrator::{now_millis, Orchestrator};
use crate::store::RecordStore;
use crate::tracker::{RemoteComment, TrackerClient, TrackerError};
use sync_types::{CommentEvent, CommentEventKind, CommentLink, IssueId, Side};
use tracing::{debug, info, warn};

/// Prefix carried by every mirrored comment body.
pub const MIRROR_MARKER: &str = "[mirrored]";

/// How processing one comment event concluded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommentOutcome {
    /// The comment was mirrored (created or updated) on the counterpart.
    Mirrored,
    /// The mirrored counterpart comment was deleted.
    Deleted,
    /// Nothing to do: sync disabled, no linked pair, already mirrored, or
    /// the comment is the engine's own mirror.
    Skipped,
    /// The tracker write failed; comment events are not retried, the next
    /// edit or the operator re-syncs them.
    Failed,
}

/// Build the body a mirrored comment carries on the counterpart side.
fn mirrored_body(comment: &RemoteComment, source: Side) -> String {
    let author = match &comment.author_email {
        Some(email) => format!("{} ({email})", comment.author_name),
        None => comment.author_name.clone(),
    };
    format!(
        "{MIRROR_MARKER} side {source}, comment {id}, author: {author}\n\n{body}",
        id = comment.id,
        body = comment.body,
    )
}

/// Whether a comment body is one of the engine's own mirrors.
fn is_mirrored_body(body: &str) -> bool {
    body.trim_start().starts_with(MIRROR_MARKER)
}

impl Orchestrator {
    /// Mirror one comment event onto the counterpart issue.
    pub async fn process_comment(&self, event: &CommentEvent) -> Result<CommentOutcome> {
        if !self.config().sync.comments {
            debug!(comment = %event.comment_id, "comment sync disabled");
            return Ok(CommentOutcome::Skipped);
        }

        let Some(versioned) = self
            .store()
            .find_by_issue(event.side, &event.issue_id)
            .await?
        else {
            warn!(issue = %event.issue_id, side = %event.side,
                  "comment event for an unlinked issue");
            return Ok(CommentOutcome::Skipped);
        };

        let target_side = event.side.opposite();
        let Some(target_issue) = versioned.record.issue(target_side).cloned() else {
            debug!(issue = %event.issue_id, "no counterpart yet; comment not mirrored");
            return Ok(CommentOutcome::Skipped);
        };

        match event.kind {
            CommentEventKind::Deleted => self.delete_mirror(event, &target_issue).await,
            CommentEventKind::Created | CommentEventKind::Updated => {
                self.mirror_comment(event, &target_issue).await
            }
        }
    }

    async fn mirror_comment(
        &self,
        event: &CommentEvent,
        target_issue: &IssueId,
    ) -> Result<CommentOutcome> {
        let link = self
            .store()
            .get_comment_link(event.side, &event.issue_id, &event.comment_id)
            .await?;

        if event.kind == CommentEventKind::Created && link.is_some() {
            debug!(comment = %event.comment_id, "already mirrored");
            return Ok(CommentOutcome::Skipped);
        }

        let comment = match self
            .tracker(event.side)
            .fetch_comment(&event.issue_id, &event.comment_id)
            .await
        {
            Ok(comment) => comment,
            Err(TrackerError::NotFound(_)) => {
                // Deleted between the notification and now.
                return self.delete_mirror(event, target_issue).await;
            }
            Err(e) => {
                warn!(comment = %event.comment_id, error = %e, "comment fetch failed");
                return Ok(CommentOutcome::Failed);
            }
        };

        if is_mirrored_body(&comment.body) {
            debug!(comment = %event.comment_id, "own mirror echoed back; dropped");
            return Ok(CommentOutcome::Skipped);
        }

        let body = mirrored_body(&comment, event.side);
        let target_side = event.side.opposite();

        let target_comment = match link.as_ref().and_then(|l| l.target_comment.clone()) {
            Some(existing) => {
                match self
                    .tracker(target_side)
                    .update_comment(target_issue, &existing, &body)
                    .await
                {
                    Ok(()) => Some(existing),
                    Err(TrackerError::NotFound(_)) => {
                        // The mirror vanished; recreate it.
                        match self.tracker(target_side).add_comment(target_issue, &body).await {
                            Ok(id) => Some(id),
                            Err(e) => {
                                warn!(comment = %event.comment_id, error = %e,
                                      "mirror recreate failed");
                                None
                            }
                        }
                    }
                    Err(e) => {
                        warn!(comment = %event.comment_id, error = %e, "mirror update failed");
                        None
                    }
                }
            }
            None => match self.tracker(target_side).add_comment(target_issue, &body).await {
                Ok(id) => Some(id),
                Err(e) => {
                    warn!(comment = %event.comment_id, error = %e, "mirror create failed");
                    None
                }
            },
        };

        let Some(target_comment) = target_comment else {
            return Ok(CommentOutcome::Failed);
        };

        self.store()
            .put_comment_link(&CommentLink {
                source_side: event.side,
                issue_id: event.issue_id.clone(),
                source_comment: event.comment_id.clone(),
                target_comment: Some(target_comment.clone()),
                synced_at: now_millis(),
            })
            .await?;

        info!(comment = %event.comment_id, mirror = %target_comment, "comment mirrored");
        Ok(CommentOutcome::Mirrored)
    }

    async fn delete_mirror(
        &self,
        event: &CommentEvent,
        target_issue: &IssueId,
    ) -> Result<CommentOutcome> {
        let Some(link) = self
            .store()
            .get_comment_link(event.side, &event.issue_id, &event.comment_id)
            .await?
        else {
            debug!(comment = %event.comment_id, "no mirror to delete");
            return Ok(CommentOutcome::Skipped);
        };

        let Some(target_comment) = link.target_comment else {
            return Ok(CommentOutcome::Skipped);
        };

        match self
            .tracker(event.side.opposite())
            .delete_comment(target_issue, &target_comment)
            .await
        {
            Ok(()) => {
                info!(comment = %event.comment_id, mirror = %target_comment, "mirror deleted");
                Ok(CommentOutcome::Deleted)
            }
            // Already gone is as good as deleted.
            Err(TrackerError::NotFound(_)) => Ok(CommentOutcome::Deleted),
            Err(e) => {
                warn!(comment = %event.comment_id, error = %e, "mirror delete failed");
                Ok(CommentOutcome::Failed)
            }
        }
    }
}
