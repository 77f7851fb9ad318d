//! Pure application of external write outcomes to a sync record.
//!
//! After the engine performs (or fails) the single outstanding write, the
//! record must be updated accordingly. Because another invocation may have
//! coalesced a newer payload into the record while the write was in
//! flight, [`apply_write_outcome`] distinguishes the intent it actually
//! performed from whatever the record carries now, and only completes the
//! record when the two still match. This makes outcome persistence safe to
//! re-run against a re-read record after a stale compare-and-set.

use crate::backoff::{jittered_retry_delay, RetryPolicy};
use pairlink_types::{
    Direction, IntentOp, IssueId, PendingIntent, Revision, Side, SyncRecord, SyncStatus,
};

/// Classified result of one external write attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOutcome {
    /// The mirror issue was created on the target side.
    Created {
        /// The tracker-issued key of the new mirror.
        remote_id: IssueId,
        /// Revision of the mirror as created.
        revision: Revision,
        /// Set when a follow-up status transition was rejected.
        warning: Option<String>,
    },
    /// The field/status delta was fully applied.
    Applied {
        /// Revision of the target after the write.
        revision: Revision,
    },
    /// Fields applied, but the status transition was rejected by the
    /// target tracker. Non-fatal per policy.
    PartiallyApplied {
        /// Revision of the target after the field write.
        revision: Revision,
        /// What was rejected and why.
        warning: String,
    },
    /// Network, timeout, or rate-limit failure; eligible for backoff retry.
    TransientFailure {
        /// Classified error message.
        message: String,
    },
    /// Validation or permission rejection; retrying cannot help.
    PermanentFailure {
        /// Classified error message.
        message: String,
    },
}

impl WriteOutcome {
    /// Whether the write reached the target (possibly partially).
    pub fn reached_target(&self) -> bool {
        matches!(
            self,
            Self::Created { .. } | Self::Applied { .. } | Self::PartiallyApplied { .. }
        )
    }
}

/// Fold the outcome of performing `intent` into `record`.
///
/// Pure; the caller persists the result through the versioned store and,
/// on `stale`, re-reads and calls this again with the fresh record.
pub fn apply_write_outcome(
    mut record: SyncRecord,
    intent: &PendingIntent,
    outcome: &WriteOutcome,
    now: i64,
    policy: &RetryPolicy,
) -> SyncRecord {
    let target = intent.target;
    let source = target.opposite();
    let current = record.pending.as_ref() == Some(intent);

    record.updated_at = now;

    if !current {
        // A newer payload was coalesced in while this write was in
        // flight. Record what the completed write achieved, but leave the
        // fresh intent outstanding for the next drive.
        if let WriteOutcome::Created {
            remote_id,
            revision,
            ..
        } = outcome
        {
            if record.issue(target).is_none() {
                record.set_issue(target, remote_id.clone());
            }
            record.advance_last_applied(target, *revision);
            record.advance_last_applied(source, intent.source_revision);
            // The mirror exists now; a coalesced create must not create
            // a second one.
            if let Some(pending) = record.pending.as_mut() {
                if pending.target == target && pending.op == IntentOp::Create {
                    pending.op = IntentOp::Update;
                }
            }
            if record.status == SyncStatus::PendingCreate {
                record.status = SyncStatus::PendingUpdate;
            }
        } else if let WriteOutcome::Applied { revision }
        | WriteOutcome::PartiallyApplied { revision, .. } = outcome
        {
            record.advance_last_applied(target, *revision);
            record.advance_last_applied(source, intent.source_revision);
        }
        return record;
    }

    match outcome {
        WriteOutcome::Created {
            remote_id,
            revision,
            warning,
        } => {
            record.set_issue(target, remote_id.clone());
            complete(&mut record, intent, target, *revision, warning.clone());
        }
        WriteOutcome::Applied { revision } => {
            complete(&mut record, intent, target, *revision, None);
        }
        WriteOutcome::PartiallyApplied { revision, warning } => {
            complete(&mut record, intent, target, *revision, Some(warning.clone()));
        }
        WriteOutcome::TransientFailure { message } => {
            record.status = SyncStatus::Failed;
            record.retry_count = record.retry_count.saturating_add(1);
            record.last_error = Some(message.clone());
            record.next_retry_at = if record.retry_count >= policy.max_attempts {
                // Retry budget exhausted; parked for manual intervention.
                None
            } else {
                let delay = jittered_retry_delay(record.retry_count, policy);
                Some(now + delay.as_millis() as i64)
            };
        }
        WriteOutcome::PermanentFailure { message } => {
            // One confirmation attempt has happened; suppress retries.
            record.status = SyncStatus::Failed;
            record.retry_count = policy.max_attempts;
            record.last_error = Some(message.clone());
            record.next_retry_at = None;
        }
    }

    record
}

fn complete(
    record: &mut SyncRecord,
    intent: &PendingIntent,
    target: Side,
    revision: Revision,
    warning: Option<String>,
) {
    record.advance_last_applied(target, revision);
    record.advance_last_applied(target.opposite(), intent.source_revision);
    record.status = SyncStatus::Linked;
    record.last_direction = Some(Direction::from_source(target.opposite()));
    record.pending = None;
    record.retry_count = 0;
    record.next_retry_at = None;
    record.last_error = None;
    record.last_warning = warning;
}

#[cfg(test)]
mod tests {
    use super::*;
    use pairlink_types::{Field, IssueSnapshot, Side};

    const NOW: i64 = 1_718_000_000_000;

    fn intent(op: IntentOp, source_revision: i64) -> PendingIntent {
        PendingIntent {
            target: Side::Two,
            op,
            snapshot: IssueSnapshot {
                summary: "mirror me".into(),
                ..Default::default()
            },
            source_revision: Revision::new(source_revision),
            fields: Field::all(),
        }
    }

    fn staged(op: IntentOp, source_revision: i64) -> SyncRecord {
        let mut record = SyncRecord::new(Side::One, IssueId::from("P1-10"), NOW);
        record.status = match op {
            IntentOp::Create => SyncStatus::PendingCreate,
            IntentOp::Update => SyncStatus::PendingUpdate,
        };
        record.pending = Some(intent(op, source_revision));
        record
    }

    #[test]
    fn successful_create_links_and_rekeys() {
        let record = staged(IntentOp::Create, 100);
        let i = intent(IntentOp::Create, 100);
        let outcome = WriteOutcome::Created {
            remote_id: IssueId::from("P2-7"),
            revision: Revision::new(500),
            warning: None,
        };

        let next = apply_write_outcome(record, &i, &outcome, NOW, &RetryPolicy::default());
        assert_eq!(next.status, SyncStatus::Linked);
        assert_eq!(next.issue(Side::Two), Some(&IssueId::from("P2-7")));
        assert_eq!(next.last_applied(Side::Two), Some(Revision::new(500)));
        assert_eq!(next.last_applied(Side::One), Some(Revision::new(100)));
        assert_eq!(next.last_direction, Some(Direction::OneToTwo));
        assert!(next.pending.is_none());
        assert_eq!(next.key().to_string(), "P1-10#P2-7");
    }

    #[test]
    fn successful_update_links() {
        let record = staged(IntentOp::Update, 150);
        let i = intent(IntentOp::Update, 150);
        let outcome = WriteOutcome::Applied {
            revision: Revision::new(600),
        };

        let next = apply_write_outcome(record, &i, &outcome, NOW, &RetryPolicy::default());
        assert_eq!(next.status, SyncStatus::Linked);
        assert_eq!(next.last_applied(Side::Two), Some(Revision::new(600)));
        assert!(next.pending.is_none());
        assert!(next.last_warning.is_none());
    }

    #[test]
    fn partial_apply_links_with_warning() {
        let record = staged(IntentOp::Update, 150);
        let i = intent(IntentOp::Update, 150);
        let outcome = WriteOutcome::PartiallyApplied {
            revision: Revision::new(600),
            warning: "no transition to Closed".into(),
        };

        let next = apply_write_outcome(record, &i, &outcome, NOW, &RetryPolicy::default());
        assert_eq!(next.status, SyncStatus::Linked);
        assert_eq!(next.last_warning.as_deref(), Some("no transition to Closed"));
    }

    #[test]
    fn transient_failure_schedules_backoff() {
        let record = staged(IntentOp::Update, 150);
        let i = intent(IntentOp::Update, 150);
        let outcome = WriteOutcome::TransientFailure {
            message: "rate limited".into(),
        };
        let policy = RetryPolicy::default();

        let next = apply_write_outcome(record, &i, &outcome, NOW, &policy);
        assert_eq!(next.status, SyncStatus::Failed);
        assert_eq!(next.retry_count, 1);
        // Base delay for the first retry is 10s, plus up to 5s of jitter.
        let next_retry_at = next.next_retry_at.unwrap();
        assert!(next_retry_at >= NOW + 10_000);
        assert!(next_retry_at <= NOW + 15_000);
        // The intent stays put for the retry pass.
        assert!(next.pending.is_some());
    }

    #[test]
    fn retry_budget_exhaustion_parks_the_record() {
        let mut record = staged(IntentOp::Update, 150);
        let i = intent(IntentOp::Update, 150);
        let policy = RetryPolicy::default();
        let outcome = WriteOutcome::TransientFailure {
            message: "timeout".into(),
        };

        for _ in 0..policy.max_attempts {
            record.status = SyncStatus::PendingUpdate;
            record = apply_write_outcome(record, &i, &outcome, NOW, &policy);
        }

        assert_eq!(record.status, SyncStatus::Failed);
        assert_eq!(record.retry_count, policy.max_attempts);
        assert!(record.next_retry_at.is_none());
    }

    #[test]
    fn permanent_failure_suppresses_retry_immediately() {
        let record = staged(IntentOp::Create, 100);
        let i = intent(IntentOp::Create, 100);
        let outcome = WriteOutcome::PermanentFailure {
            message: "field 'priority' is required".into(),
        };
        let policy = RetryPolicy::default();

        let next = apply_write_outcome(record, &i, &outcome, NOW, &policy);
        assert_eq!(next.status, SyncStatus::Failed);
        assert_eq!(next.retry_count, policy.max_attempts);
        assert!(next.next_retry_at.is_none());
    }

    #[test]
    fn superseded_create_converts_coalesced_intent_to_update() {
        // While the create was in flight, a newer change coalesced into
        // the record. The completed create must register the mirror and
        // demote the outstanding intent so no duplicate is created.
        let mut record = staged(IntentOp::Create, 100);
        let newer = intent(IntentOp::Create, 120);
        record.pending = Some(newer.clone());

        let performed = intent(IntentOp::Create, 100);
        let outcome = WriteOutcome::Created {
            remote_id: IssueId::from("P2-7"),
            revision: Revision::new(500),
            warning: None,
        };

        let next = apply_write_outcome(record, &performed, &outcome, NOW, &RetryPolicy::default());
        assert_eq!(next.status, SyncStatus::PendingUpdate);
        assert_eq!(next.issue(Side::Two), Some(&IssueId::from("P2-7")));
        let pending = next.pending.clone().unwrap();
        assert_eq!(pending.op, IntentOp::Update);
        assert_eq!(pending.source_revision, Revision::new(120));
        assert_eq!(next.last_applied(Side::One), Some(Revision::new(100)));
    }

    #[test]
    fn superseded_failure_leaves_fresh_intent_untouched() {
        let mut record = staged(IntentOp::Update, 100);
        let newer = intent(IntentOp::Update, 120);
        record.pending = Some(newer.clone());

        let performed = intent(IntentOp::Update, 100);
        let outcome = WriteOutcome::TransientFailure {
            message: "timeout".into(),
        };

        let next = apply_write_outcome(record, &performed, &outcome, NOW, &RetryPolicy::default());
        assert_eq!(next.status, SyncStatus::PendingUpdate);
        assert_eq!(next.retry_count, 0);
        assert_eq!(next.pending, Some(newer));
    }
}
