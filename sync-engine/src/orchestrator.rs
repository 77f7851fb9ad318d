//! The sync orchestrator.
//!
//! Drives the pure decision core against real I/O: looks up the record,
//! decides, persists through the versioned store, performs the single
//! outstanding tracker write, and persists the outcome.
//!
//! ```text
//! inbound adapter → normalize → decide (sync-core, pure)
//!                                  │
//!                       ┌──────────┴──────────┐
//!                  record store          tracker client
//!                (version-guarded)      (opposite side)
//! ```
//!
//! Every store mutation goes through compare-and-set; a `Stale` result
//! means another invocation got there first, so the orchestrator re-reads
//! and re-decides. Because the decision is a pure function of record +
//! change, replays are safe, and redelivering the same notification is
//! idempotent end to end.

use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::store::{PutOutcome, RecordStore, Version, VersionedRecord};
use crate::tracker::{FieldDelta, TrackerClient, TrackerError, TransitionOutcome};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use sync_core::{apply_write_outcome, decide, Decision, RetryPolicy, WriteOutcome};
use sync_types::{
    Change, ChangeKind, Field, IntentOp, IssueId, IssueSnapshot, Observation, PairKey,
    PendingIntent, RawNotification, Side, SyncRecord, SyncStatus,
};
use tracing::{debug, info, warn};

/// Bound on compare-and-set replays for a single operation. Losing this
/// many races in a row means the record is hot; the caller may redeliver.
const MAX_CAS_ATTEMPTS: u32 = 8;

/// Current Unix timestamp in milliseconds.
pub(crate) fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// How processing one notification concluded. Purely informational; the
/// caller never needs it to decide on redelivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// A mirror issue was created and the record is linked.
    Created,
    /// The counterpart was updated and the record is linked.
    Updated,
    /// Echo or redelivery; nothing to do.
    Ignored,
    /// The change was folded into an intent another invocation is driving.
    Coalesced,
    /// Concurrent divergence was detected; the record awaits resolution.
    Conflicted,
    /// The external write failed; the retry scheduler owns the record.
    Failed,
    /// The notification is not something the engine replicates.
    Skipped,
}

/// The synchronization engine.
///
/// Cheap to clone-share via `Arc`; all state lives in the record store,
/// so any number of concurrent instances coordinate correctly.
pub struct Orchestrator {
    store: Arc<dyn RecordStore>,
    tracker_one: Arc<dyn TrackerClient>,
    tracker_two: Arc<dyn TrackerClient>,
    config: EngineConfig,
}

impl Orchestrator {
    /// Build an engine over a record store and one tracker client per side.
    pub fn new(
        store: Arc<dyn RecordStore>,
        tracker_one: Arc<dyn TrackerClient>,
        tracker_two: Arc<dyn TrackerClient>,
        config: EngineConfig,
    ) -> Self {
        Self {
            store,
            tracker_one,
            tracker_two,
            config,
        }
    }

    pub(crate) fn tracker(&self, side: Side) -> &dyn TrackerClient {
        match side {
            Side::One => self.tracker_one.as_ref(),
            Side::Two => self.tracker_two.as_ref(),
        }
    }

    pub(crate) fn store(&self) -> &dyn RecordStore {
        self.store.as_ref()
    }

    pub(crate) fn config(&self) -> &EngineConfig {
        &self.config
    }

    fn policy(&self) -> RetryPolicy {
        self.config.retry.policy()
    }

    /// Process one verified inbound notification.
    ///
    /// Never fails on tracker trouble; write failures and conflicts are
    /// parked in the record and reported through the outcome.
    pub async fn process_notification(&self, raw: &RawNotification) -> Result<ProcessOutcome> {
        match sync_core::parse_notification(raw) {
            Ok(sync_core::Normalized::Issue(change)) => self.process_change(change).await,
            Ok(sync_core::Normalized::Comment(event)) => {
                Ok(match self.process_comment(&event).await? {
                    crate::comments::CommentOutcome::Mirrored
                    | crate::comments::CommentOutcome::Deleted => ProcessOutcome::Updated,
                    crate::comments::CommentOutcome::Skipped => ProcessOutcome::Skipped,
                    crate::comments::CommentOutcome::Failed => ProcessOutcome::Failed,
                })
            }
            Err(sync_types::NormalizeError::UnhandledEvent(kind)) => {
                debug!(side = %raw.side, event = %kind, "dropping unhandled event");
                Ok(ProcessOutcome::Skipped)
            }
            Err(e) => {
                warn!(side = %raw.side, error = %e, "dropping malformed notification");
                Ok(ProcessOutcome::Skipped)
            }
        }
    }

    /// Process a canonical change through the decision core.
    pub async fn process_change(&self, change: Change) -> Result<ProcessOutcome> {
        for _ in 0..MAX_CAS_ATTEMPTS {
            let existing = self
                .store
                .find_by_issue(change.side, &change.issue_id)
                .await?;

            let (key, version) = match &existing {
                Some(v) => (v.record.key(), v.version),
                None => (
                    PairKey::provisional(change.side, change.issue_id.clone()),
                    Version::NEW,
                ),
            };

            let counterpart = match &existing {
                Some(v) if v.record.status == SyncStatus::Linked => {
                    self.observe_counterpart(&v.record, change.side).await
                }
                _ => None,
            };

            let decision = decide(
                existing.as_ref().map(|v| &v.record),
                &change,
                counterpart.as_ref(),
                now_millis(),
            );

            match decision {
                Decision::Ignore(reason) => {
                    debug!(key = %key, side = %change.side, revision = %change.revision,
                           ?reason, "change ignored");
                    return Ok(ProcessOutcome::Ignored);
                }
                Decision::Conflict(next) => {
                    match self.store.put_if_version(&key, version, &next).await? {
                        PutOutcome::Stored(_) => {
                            warn!(key = %next.key(), side = %change.side,
                                  "concurrent divergence detected; record conflicted");
                            return Ok(ProcessOutcome::Conflicted);
                        }
                        PutOutcome::Stale => continue,
                    }
                }
                Decision::Stage(next) => {
                    // A write may already be in flight for pending records;
                    // only failed records are known to have no live driver.
                    let driver_may_be_live = existing.as_ref().is_some_and(|v| {
                        v.record.status.has_outstanding_intent()
                            && v.record.status != SyncStatus::Failed
                    });

                    match self.store.put_if_version(&key, version, &next).await? {
                        PutOutcome::Stored(new_version) => {
                            if driver_may_be_live {
                                debug!(key = %next.key(), "coalesced into outstanding intent");
                                return Ok(ProcessOutcome::Coalesced);
                            }
                            return self.drive_pending(next, new_version).await;
                        }
                        PutOutcome::Stale => continue,
                    }
                }
            }
        }

        Err(EngineError::Contention {
            key: change.issue_id.to_string(),
            attempts: MAX_CAS_ATTEMPTS,
        })
    }

    /// Fetch the counterpart's current state for divergence detection.
    ///
    /// A fetch failure is not a conflict signal; it is logged and treated
    /// as "no independent advance observed".
    async fn observe_counterpart(&self, record: &SyncRecord, source: Side) -> Option<Observation> {
        let target = source.opposite();
        let id = record.issue(target)?;
        match self.tracker(target).fetch_issue(id).await {
            Ok(remote) => Some(Observation {
                revision: remote.revision,
                snapshot: remote.snapshot,
            }),
            Err(e) => {
                warn!(issue = %id, side = %target, error = %e,
                      "counterpart fetch failed; skipping divergence check");
                None
            }
        }
    }

    /// Perform the record's outstanding intent and persist the outcome,
    /// re-driving any payload that was coalesced in while writing.
    pub(crate) async fn drive_pending(
        &self,
        mut record: SyncRecord,
        mut version: Version,
    ) -> Result<ProcessOutcome> {
        let mut last_write: Option<WriteOutcome> = None;

        loop {
            let Some(intent) = record.pending.clone() else {
                return Ok(match record.status {
                    SyncStatus::Conflicted => ProcessOutcome::Conflicted,
                    _ => match last_write {
                        Some(WriteOutcome::Created { .. }) => ProcessOutcome::Created,
                        _ => ProcessOutcome::Updated,
                    },
                });
            };

            let outcome = self.perform_write(&record, &intent).await;
            if let WriteOutcome::PartiallyApplied { warning, .. } = &outcome {
                warn!(key = %record.key(), warning = %warning, "partial apply");
            }
            last_write = Some(outcome.clone());

            let (next, next_version) = self
                .persist_outcome(record, version, &intent, &outcome)
                .await?;
            record = next;
            version = next_version;

            match record.status {
                SyncStatus::Failed => {
                    info!(key = %record.key(), retry_count = record.retry_count,
                          error = record.last_error.as_deref().unwrap_or(""),
                          "write failed; record parked for retry");
                    return Ok(ProcessOutcome::Failed);
                }
                SyncStatus::Conflicted => return Ok(ProcessOutcome::Conflicted),
                _ if record.pending.is_none() => {
                    info!(key = %record.key(), status = %record.status, "sync applied");
                    return Ok(match last_write {
                        Some(WriteOutcome::Created { .. }) => ProcessOutcome::Created,
                        _ => ProcessOutcome::Updated,
                    });
                }
                // A newer payload was coalesced in while writing; this
                // invocation holds the freshest state, so it drives on.
                _ => continue,
            }
        }
    }

    /// Fold a write outcome into the record, CAS-looping against
    /// concurrent mutations.
    async fn persist_outcome(
        &self,
        mut record: SyncRecord,
        mut version: Version,
        intent: &PendingIntent,
        outcome: &WriteOutcome,
    ) -> Result<(SyncRecord, Version)> {
        let source = intent.target.opposite();
        let source_issue = record.issue(source).cloned();

        for _ in 0..MAX_CAS_ATTEMPTS {
            let key = record.key();
            let updated =
                apply_write_outcome(record.clone(), intent, outcome, now_millis(), &self.policy());

            match self.store.put_if_version(&key, version, &updated).await? {
                PutOutcome::Stored(v) => return Ok((updated, v)),
                PutOutcome::Stale => {
                    let fresh = self.reread(&key, source, source_issue.as_ref()).await?;
                    match fresh {
                        Some(v) => {
                            record = v.record;
                            version = v.version;
                        }
                        None => {
                            // Records are never deleted; a vanished row
                            // means the store is being manipulated
                            // externally. Report the folded state so the
                            // drive loop terminates.
                            warn!(key = %key, "record disappeared while persisting outcome");
                            return Ok((updated, version));
                        }
                    }
                }
            }
        }

        Err(EngineError::Contention {
            key: record.key().to_string(),
            attempts: MAX_CAS_ATTEMPTS,
        })
    }

    async fn reread(
        &self,
        key: &PairKey,
        source: Side,
        source_issue: Option<&IssueId>,
    ) -> Result<Option<VersionedRecord>> {
        if let Some(found) = self.store.get(key).await? {
            return Ok(Some(found));
        }
        // The row may have been re-keyed by a concurrent completion; the
        // source-side issue key still finds it.
        match source_issue {
            Some(id) => Ok(self.store.find_by_issue(source, id).await?),
            None => Ok(None),
        }
    }

    /// Perform one external write for the given intent. Never errors;
    /// failures come back classified for the outcome fold.
    async fn perform_write(&self, record: &SyncRecord, intent: &PendingIntent) -> WriteOutcome {
        let tracker = self.tracker(intent.target);
        let snapshot = self.effective_snapshot(&intent.snapshot);

        match intent.op {
            IntentOp::Create => match tracker.create_issue(&snapshot).await {
                Ok(remote) => {
                    let mut revision = remote.revision;
                    let mut warning = None;
                    if let Some(target_status) = self.wanted_status(&snapshot, &intent.fields) {
                        if remote.snapshot.status.as_deref() != Some(target_status) {
                            match self
                                .request_transition(intent.target, &remote.id, target_status)
                                .await
                            {
                                Ok(r) => revision = r,
                                Err(w) => warning = Some(w),
                            }
                        }
                    }
                    WriteOutcome::Created {
                        remote_id: remote.id,
                        revision,
                        warning,
                    }
                }
                Err(e) => classify(e),
            },
            IntentOp::Update => {
                let Some(target_id) = record.issue(intent.target) else {
                    return WriteOutcome::PermanentFailure {
                        message: "update intent without a known counterpart issue".to_string(),
                    };
                };

                let fields = self.effective_fields(&intent.fields);
                let mut revision = None;

                if !fields.is_empty() {
                    let delta = FieldDelta {
                        snapshot: snapshot.clone(),
                        fields,
                    };
                    match tracker.update_issue(target_id, &delta).await {
                        Ok(r) => revision = Some(r),
                        Err(e) => return classify(e),
                    }
                }

                let mut warning = None;
                if let Some(target_status) = self.wanted_status(&snapshot, &intent.fields) {
                    match self
                        .request_transition(intent.target, target_id, target_status)
                        .await
                    {
                        Ok(r) => revision = Some(r),
                        Err(w) => warning = Some(w),
                    }
                }

                // Nothing written at all: the target did not move, so its
                // last-applied marker must not move either.
                let revision = revision
                    .unwrap_or_else(|| record.last_applied(intent.target).unwrap_or_default());

                match warning {
                    Some(warning) => WriteOutcome::PartiallyApplied { revision, warning },
                    None => WriteOutcome::Applied { revision },
                }
            }
        }
    }

    /// The status value an intent wants on the target, when status sync is
    /// enabled and the intent touches status.
    fn wanted_status<'a>(
        &self,
        snapshot: &'a IssueSnapshot,
        fields: &BTreeSet<Field>,
    ) -> Option<&'a str> {
        if !self.config.sync.status_transitions || !fields.contains(&Field::Status) {
            return None;
        }
        snapshot.status.as_deref()
    }

    /// Request a transition; any non-applied outcome folds into a partial
    /// warning rather than failing the sync.
    async fn request_transition(
        &self,
        side: Side,
        id: &IssueId,
        target_status: &str,
    ) -> std::result::Result<sync_types::Revision, String> {
        match self.tracker(side).transition_status(id, target_status).await {
            Ok(TransitionOutcome::Applied { revision }) => Ok(revision),
            Ok(TransitionOutcome::Rejected { reason }) => Err(format!(
                "transition to '{target_status}' rejected: {reason}"
            )),
            Ok(TransitionOutcome::NotFound) => {
                Err(format!("transition to '{target_status}': issue not found"))
            }
            Err(e) => Err(format!("transition to '{target_status}' failed: {e}")),
        }
    }

    fn effective_snapshot(&self, snapshot: &IssueSnapshot) -> IssueSnapshot {
        let mut snapshot = snapshot.clone();
        if !self.config.sync.assignee {
            snapshot.assignee = None;
        }
        snapshot
    }

    fn effective_fields(&self, fields: &BTreeSet<Field>) -> BTreeSet<Field> {
        fields
            .iter()
            .copied()
            .filter(|f| *f != Field::Status)
            .filter(|f| self.config.sync.assignee || *f != Field::Assignee)
            .collect()
    }

    /// Manually re-sync one issue from its current remote state, as if a
    /// fresh notification had arrived. Operator surface.
    pub async fn resync_issue(&self, side: Side, id: &IssueId) -> Result<ProcessOutcome> {
        let remote = match self.tracker(side).fetch_issue(id).await {
            Ok(remote) => remote,
            Err(e) => {
                warn!(issue = %id, side = %side, error = %e, "re-sync fetch failed");
                return Ok(ProcessOutcome::Skipped);
            }
        };

        self.process_change(Change {
            side,
            issue_id: remote.id,
            revision: remote.revision,
            kind: ChangeKind::Updated,
            changed_fields: Field::all(),
            snapshot: remote.snapshot,
        })
        .await
    }

    /// Record counts by status, for read-only operator queries.
    pub async fn status_summary(&self) -> Result<StatusSummary> {
        let mut summary = StatusSummary::default();
        for v in self.store.list_all().await? {
            summary.total += 1;
            match v.record.status {
                SyncStatus::Linked => summary.linked += 1,
                SyncStatus::PendingCreate | SyncStatus::PendingUpdate => summary.pending += 1,
                SyncStatus::Conflicted => summary.conflicted += 1,
                SyncStatus::Failed => summary.failed += 1,
                SyncStatus::Resolved => summary.resolved += 1,
            }
        }
        Ok(summary)
    }
}

/// Record counts by status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatusSummary {
    /// All records.
    pub total: u64,
    /// Linked pairs.
    pub linked: u64,
    /// Records with an in-flight create or update.
    pub pending: u64,
    /// Records awaiting an operator decision.
    pub conflicted: u64,
    /// Records parked after write failures.
    pub failed: u64,
    /// Records whose resolving write is in flight.
    pub resolved: u64,
}

fn classify(error: TrackerError) -> WriteOutcome {
    match error {
        TrackerError::Transient(message) => WriteOutcome::TransientFailure { message },
        TrackerError::Permanent(message) => WriteOutcome::PermanentFailure { message },
        TrackerError::NotFound(what) => WriteOutcome::PermanentFailure {
            message: format!("not found: {what}"),
        },
    }
}
