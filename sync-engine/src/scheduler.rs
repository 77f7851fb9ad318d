//! Retry and reconciliation passes.
//!
//! Both passes are read-scan-then-process over the record store and are
//! safe to run concurrently with live traffic: every mutation is
//! version-guarded, so a pass that loses a race simply skips the record.

use crate::config::SchedulerConfig;
use crate::error::Result;
use crate::orchestrator::{now_millis, Orchestrator, ProcessOutcome};
use crate::store::{PutOutcome, RecordStore};
use crate::tracker::TrackerClient;
use std::sync::Arc;
use std::time::Duration;
use sync_core::diff_snapshots;
use sync_types::{Change, ChangeKind, Field, IntentOp, Side, SyncStatus};
use tokio::time::interval;
use tracing::{debug, info, warn};

/// Counters from one retry pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetryStats {
    /// Records whose intent was re-driven.
    pub retried: u64,
    /// Re-drives that ended linked.
    pub succeeded: u64,
    /// Re-drives that failed again (or conflicted).
    pub failed: u64,
}

/// Counters from one reconciliation sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileStats {
    /// Remote issues examined across both sides.
    pub scanned: u64,
    /// Missed creations repaired.
    pub created: u64,
    /// Missed updates repaired.
    pub updated: u64,
    /// Divergences surfaced as conflicts.
    pub conflicted: u64,
}

impl Orchestrator {
    /// Re-drive failed records whose backoff has elapsed, plus pending
    /// records orphaned by a crashed invocation.
    pub async fn retry_pass(&self) -> Result<RetryStats> {
        let now = now_millis();
        let stuck_after_ms = (self.config().scheduler.stuck_after_secs * 1_000) as i64;
        let mut stats = RetryStats::default();

        let candidates = self
            .store()
            .scan_status(&[
                SyncStatus::Failed,
                SyncStatus::PendingCreate,
                SyncStatus::PendingUpdate,
                SyncStatus::Resolved,
            ])
            .await?;

        for versioned in candidates {
            let record = &versioned.record;
            let due = match record.status {
                // next_retry_at of None means retries are exhausted and
                // the record is parked for the operator.
                SyncStatus::Failed => record.next_retry_at.is_some_and(|at| at <= now),
                _ => record.updated_at + stuck_after_ms <= now,
            };
            let Some(intent) = record.pending.clone() else {
                continue;
            };
            if !due {
                continue;
            }

            let mut next = record.clone();
            if next.status == SyncStatus::Failed {
                next.status = match intent.op {
                    IntentOp::Create => SyncStatus::PendingCreate,
                    IntentOp::Update => SyncStatus::PendingUpdate,
                };
            }
            next.updated_at = now;

            match self
                .store()
                .put_if_version(&record.key(), versioned.version, &next)
                .await?
            {
                PutOutcome::Stored(version) => {
                    debug!(key = %next.key(), attempt = next.retry_count + 1, "re-driving intent");
                    stats.retried += 1;
                    match self.drive_pending(next, version).await? {
                        ProcessOutcome::Created | ProcessOutcome::Updated => stats.succeeded += 1,
                        _ => stats.failed += 1,
                    }
                }
                // Live traffic got there first; its decision supersedes.
                PutOutcome::Stale => continue,
            }
        }

        if stats.retried > 0 {
            info!(
                retried = stats.retried,
                succeeded = stats.succeeded,
                failed = stats.failed,
                "retry pass complete"
            );
        }
        Ok(stats)
    }

    /// Full sweep: compare every remote issue on both sides against the
    /// record store, repairing missed creations and missed updates. This
    /// is the safety net against dropped notifications.
    pub async fn reconcile(&self) -> Result<ReconcileStats> {
        let mut stats = ReconcileStats::default();
        for side in [Side::One, Side::Two] {
            self.reconcile_side(side, &mut stats).await?;
        }
        info!(
            scanned = stats.scanned,
            created = stats.created,
            updated = stats.updated,
            conflicted = stats.conflicted,
            "reconciliation sweep complete"
        );
        Ok(stats)
    }

    async fn reconcile_side(&self, side: Side, stats: &mut ReconcileStats) -> Result<()> {
        let stubs = match self.tracker(side).list_issues().await {
            Ok(stubs) => stubs,
            Err(e) => {
                warn!(side = %side, error = %e, "issue listing failed; skipping side");
                return Ok(());
            }
        };

        for stub in stubs {
            stats.scanned += 1;
            let existing = self.store().find_by_issue(side, &stub.id).await?;

            let needs_sync = match &existing {
                // No record: this creation was never observed.
                None => true,
                // Linked but the remote moved past what was last applied:
                // an update notification was lost.
                Some(v) if v.record.status == SyncStatus::Linked => {
                    match v.record.last_applied(side) {
                        Some(last) => stub.revision > last,
                        None => true,
                    }
                }
                // Pending, failed, and conflicted records already have an
                // owner (driver, retry pass, or operator).
                Some(_) => false,
            };
            if !needs_sync {
                continue;
            }

            let remote = match self.tracker(side).fetch_issue(&stub.id).await {
                Ok(remote) => remote,
                Err(e) => {
                    warn!(issue = %stub.id, side = %side, error = %e, "fetch failed during sweep");
                    continue;
                }
            };

            // Re-diff against the counterpart where possible so the
            // synthesized change carries only what actually drifted.
            let changed_fields = match &existing {
                Some(v) => match self.counterpart_snapshot(&v.record, side).await {
                    Some(counterpart) => diff_snapshots(&remote.snapshot, &counterpart),
                    None => Field::all(),
                },
                None => Field::all(),
            };

            let outcome = self
                .process_change(Change {
                    side,
                    issue_id: remote.id,
                    revision: remote.revision,
                    kind: if existing.is_none() {
                        ChangeKind::Created
                    } else {
                        ChangeKind::Updated
                    },
                    changed_fields,
                    snapshot: remote.snapshot,
                })
                .await?;

            match outcome {
                ProcessOutcome::Created => stats.created += 1,
                ProcessOutcome::Updated => stats.updated += 1,
                ProcessOutcome::Conflicted => stats.conflicted += 1,
                _ => {}
            }
        }
        Ok(())
    }

    async fn counterpart_snapshot(
        &self,
        record: &sync_types::SyncRecord,
        source: Side,
    ) -> Option<sync_types::IssueSnapshot> {
        let target = source.opposite();
        let id = record.issue(target)?;
        self.tracker(target)
            .fetch_issue(id)
            .await
            .ok()
            .map(|remote| remote.snapshot)
    }
}

/// Spawn the background scheduler task.
///
/// Runs the retry pass and the reconciliation sweep on independent
/// intervals. Returns a handle that can be used to abort the task.
pub fn spawn_scheduler(
    orchestrator: Arc<Orchestrator>,
    config: SchedulerConfig,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        if !config.enabled {
            tracing::info!("scheduler disabled");
            return;
        }

        tracing::info!(
            retry_interval = config.retry_interval_secs,
            reconcile_interval = config.reconcile_interval_secs,
            "scheduler started"
        );

        let mut retry_timer = interval(Duration::from_secs(config.retry_interval_secs.max(1)));
        let mut reconcile_timer =
            interval(Duration::from_secs(config.reconcile_interval_secs.max(1)));

        loop {
            tokio::select! {
                _ = retry_timer.tick() => {
                    if let Err(e) = orchestrator.retry_pass().await {
                        tracing::error!(error = %e, "retry pass failed");
                    }
                }
                _ = reconcile_timer.tick() => {
                    if let Err(e) = orchestrator.reconcile().await {
                        tracing::error!(error = %e, "reconciliation sweep failed");
                    }
                }
            }
        }
    })
}
