//! Conflict resolution.
//!
//! A conflicted record never resolves on its own: an operator picks a
//! direction, and the chosen side's captured snapshot overwrites the other
//! side wholesale. Applying a decision is idempotent; replaying it against
//! an already-resolved record is a no-op.

use crate::error::Result;
use crate::orchestrator::{now_millis, Orchestrator};
use crate::store::{PutOutcome, RecordStore};
use sync_types::{Direction, Field, IntentOp, PairKey, PendingIntent, SyncStatus};
use tracing::{info, warn};

/// Result of applying an operator decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// The decision was accepted and the overwriting sync was driven.
    Applied,
    /// The decision had already been applied; no side effects.
    AlreadyResolved,
    /// The record is not in conflict (or does not exist).
    NotConflicted,
}

impl Orchestrator {
    /// Apply an operator decision to a conflicted record.
    ///
    /// The chosen side's snapshot, as captured in the conflict details,
    /// becomes the sole source of truth and overwrites the counterpart.
    /// On write success the record transitions `resolved` → `linked`; on
    /// failure the retry scheduler re-drives it like any failed write.
    pub async fn resolve(&self, key: &PairKey, direction: Direction) -> Result<Resolution> {
        loop {
            let Some(existing) = self.store().get(key).await? else {
                return Ok(Resolution::NotConflicted);
            };

            match existing.record.status {
                SyncStatus::Conflicted => {
                    let Some(conflict) = existing.record.conflict.clone() else {
                        // Violates the conflicted-iff-details invariant;
                        // nothing trustworthy to resolve from.
                        warn!(key = %key, "conflicted record carries no conflict details");
                        return Ok(Resolution::NotConflicted);
                    };

                    let chosen = conflict.side(direction.source()).clone();
                    let target = direction.target();
                    let op = if existing.record.issue(target).is_some() {
                        IntentOp::Update
                    } else {
                        IntentOp::Create
                    };

                    let mut next = existing.record.clone();
                    next.status = SyncStatus::Resolved;
                    next.conflict = None;
                    next.pending = Some(PendingIntent {
                        target,
                        op,
                        snapshot: chosen.snapshot,
                        source_revision: chosen.revision,
                        // Full overwrite: the chosen side wins every field.
                        fields: Field::all(),
                    });
                    next.retry_count = 0;
                    next.next_retry_at = None;
                    next.last_error = None;
                    next.updated_at = now_millis();

                    match self
                        .store()
                        .put_if_version(key, existing.version, &next)
                        .await?
                    {
                        PutOutcome::Stored(version) => {
                            info!(key = %key, direction = %direction, "conflict resolution accepted");
                            let _ = self.drive_pending(next, version).await?;
                            return Ok(Resolution::Applied);
                        }
                        PutOutcome::Stale => continue,
                    }
                }
                SyncStatus::Resolved => return Ok(Resolution::AlreadyResolved),
                SyncStatus::Linked
                    if existing.record.conflict.is_none()
                        && existing.record.last_direction == Some(direction) =>
                {
                    // The resolving write already completed in this
                    // direction; replaying the decision changes nothing.
                    return Ok(Resolution::AlreadyResolved);
                }
                _ => return Ok(Resolution::NotConflicted),
            }
        }
    }
}
