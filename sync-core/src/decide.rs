//! The orchestrator's decision core.
//!
//! [`decide`] is a pure function of the stored record, the incoming change,
//! and the counterpart's observed state. It performs no I/O and is safe to
//! re-run after an optimistic-concurrency conflict: the caller re-reads the
//! record and decides again against the fresh state.
//!
//! The I/O layer (sync-engine) persists the returned record and performs
//! the single outstanding write intent, if any.

use pairlink_types::{
    Change, ConflictDetails, Field, IntentOp, Observation, PendingIntent, Revision, Side,
    SyncRecord, SyncStatus,
};

/// Why an incoming change produced no action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IgnoreReason {
    /// The revision is at or below the side's last applied marker: the
    /// engine's own mirrored write coming back, or a redelivery of a
    /// change already applied.
    Echo {
        /// Side the notification came from.
        side: Side,
        /// The notification's revision marker.
        revision: Revision,
    },
    /// The exact revision is already captured in the outstanding intent;
    /// redelivery while pending changes nothing.
    AlreadyStaged,
}

/// The outcome of deciding an incoming change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// Drop the event. No state change, no write.
    Ignore(IgnoreReason),
    /// Persist the record (it carries exactly one pending intent), then
    /// perform that intent against the target side.
    Stage(SyncRecord),
    /// Persist the record as conflicted. Take no write action; resolution
    /// is an explicit external decision.
    Conflict(SyncRecord),
}

/// Decide what to do about `change`, given the record as last read and the
/// counterpart's currently observed state (when the caller could fetch it).
///
/// `counterpart` is only consulted for divergence detection on settled
/// records; `None` means "not fetched" or "no counterpart yet" and is
/// treated as no independent advance.
pub fn decide(
    existing: Option<&SyncRecord>,
    change: &Change,
    counterpart: Option<&Observation>,
    now: i64,
) -> Decision {
    let Some(record) = existing else {
        return Decision::Stage(stage_create(change, now));
    };

    if let Some(last) = record.last_applied(change.side) {
        if change.revision <= last {
            return Decision::Ignore(IgnoreReason::Echo {
                side: change.side,
                revision: change.revision,
            });
        }
    }

    match record.status {
        SyncStatus::Conflicted => Decision::Conflict(refresh_conflict(record, change, now)),
        SyncStatus::Linked => decide_settled(record, change, counterpart, now),
        SyncStatus::PendingCreate
        | SyncStatus::PendingUpdate
        | SyncStatus::Failed
        | SyncStatus::Resolved => match &record.pending {
            Some(intent) => decide_pending(record, intent.clone(), change, now),
            // A pending-family status with no intent should not exist;
            // fall back to the settled path so the change is not lost.
            None => decide_settled(record, change, counterpart, now),
        },
    }
}

/// First observed change for an issue with no known counterpart: create the
/// mirror on the opposite side.
fn stage_create(change: &Change, now: i64) -> SyncRecord {
    let mut record = SyncRecord::new(change.side, change.issue_id.clone(), now);
    record.pending = Some(PendingIntent {
        target: change.side.opposite(),
        op: IntentOp::Create,
        snapshot: change.snapshot.clone(),
        source_revision: change.revision,
        fields: Field::all(),
    });
    record
}

/// Settled record (`linked`): a strictly newer revision is either a simple
/// forward update or, if the counterpart advanced independently, a
/// conflict.
fn decide_settled(
    record: &SyncRecord,
    change: &Change,
    counterpart: Option<&Observation>,
    now: i64,
) -> Decision {
    let target = change.side.opposite();

    if let Some(observed) = counterpart {
        let diverged = match record.last_applied(target) {
            Some(last) => observed.revision > last,
            // A settled record without a counterpart marker cannot tell
            // its own writes from independent edits; treat any observed
            // state as an independent advance.
            None => true,
        };
        if diverged {
            let mut next = record.clone();
            next.status = SyncStatus::Conflicted;
            next.pending = None;
            next.next_retry_at = None;
            next.conflict = Some(conflict_details(change, target, observed.clone(), now));
            next.updated_at = now;
            return Decision::Conflict(next);
        }
    }

    let mut next = record.clone();
    next.status = SyncStatus::PendingUpdate;
    next.pending = Some(PendingIntent {
        target,
        op: IntentOp::Update,
        snapshot: change.snapshot.clone(),
        source_revision: change.revision,
        fields: change.changed_fields.clone(),
    });
    next.retry_count = 0;
    next.next_retry_at = None;
    next.last_error = None;
    next.updated_at = now;
    Decision::Stage(next)
}

/// A write intent is already outstanding. A newer change on the intent's
/// source side coalesces into it (last-writer-wins payload, unioned field
/// set); a change on the intent's target side means both sides advanced
/// independently, which is a conflict.
fn decide_pending(
    record: &SyncRecord,
    intent: PendingIntent,
    change: &Change,
    now: i64,
) -> Decision {
    if change.side == intent.target {
        let mut next = record.clone();
        next.status = SyncStatus::Conflicted;
        next.pending = None;
        next.next_retry_at = None;
        next.conflict = Some(conflict_details(
            change,
            intent.target.opposite(),
            Observation {
                revision: intent.source_revision,
                snapshot: intent.snapshot,
            },
            now,
        ));
        next.updated_at = now;
        return Decision::Conflict(next);
    }

    if change.revision == intent.source_revision {
        return Decision::Ignore(IgnoreReason::AlreadyStaged);
    }

    let mut fields = intent.fields;
    fields.extend(change.changed_fields.iter().copied());

    let mut next = record.clone();
    next.pending = Some(PendingIntent {
        target: intent.target,
        op: intent.op,
        snapshot: change.snapshot.clone(),
        source_revision: change.revision,
        fields,
    });
    // A fresh observation supersedes the payload that was failing; the
    // retry clock restarts with it.
    if next.status == SyncStatus::Failed {
        next.status = match intent.op {
            IntentOp::Create => SyncStatus::PendingCreate,
            IntentOp::Update => SyncStatus::PendingUpdate,
        };
    }
    next.retry_count = 0;
    next.next_retry_at = None;
    next.last_error = None;
    next.updated_at = now;
    Decision::Stage(next)
}

/// A change arriving on an already-conflicted record refreshes that side's
/// captured snapshot so resolution works from the freshest state. Still no
/// write action.
fn refresh_conflict(record: &SyncRecord, change: &Change, now: i64) -> SyncRecord {
    let mut next = record.clone();
    if let Some(conflict) = next.conflict.as_mut() {
        conflict.set_side(
            change.side,
            Observation {
                revision: change.revision,
                snapshot: change.snapshot.clone(),
            },
        );
    }
    next.updated_at = now;
    next
}

fn conflict_details(
    change: &Change,
    other_side: Side,
    other: Observation,
    now: i64,
) -> ConflictDetails {
    let changed = Observation {
        revision: change.revision,
        snapshot: change.snapshot.clone(),
    };
    let (one, two) = match change.side {
        Side::One => (changed, other),
        Side::Two => (other, changed),
    };
    debug_assert_eq!(other_side, change.side.opposite());
    ConflictDetails {
        one,
        two,
        detected_at: now,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pairlink_types::{ChangeKind, Direction, IssueId, IssueSnapshot};
    use std::collections::BTreeSet;

    const NOW: i64 = 1_718_000_000_000;

    fn change(side: Side, key: &str, revision: i64) -> Change {
        Change {
            side,
            issue_id: IssueId::from(key),
            revision: Revision::new(revision),
            kind: ChangeKind::Updated,
            changed_fields: [Field::Summary].into_iter().collect(),
            snapshot: IssueSnapshot {
                summary: format!("summary at r{revision}"),
                ..Default::default()
            },
        }
    }

    fn linked_record(one_rev: i64, two_rev: i64) -> SyncRecord {
        let mut record = SyncRecord::new(Side::One, IssueId::from("P1-10"), NOW - 1_000);
        record.set_issue(Side::Two, IssueId::from("P2-7"));
        record.status = SyncStatus::Linked;
        record.advance_last_applied(Side::One, Revision::new(one_rev));
        record.advance_last_applied(Side::Two, Revision::new(two_rev));
        record.last_direction = Some(Direction::OneToTwo);
        record
    }

    #[test]
    fn first_change_stages_a_create() {
        let c = change(Side::One, "P1-10", 100);
        let Decision::Stage(record) = decide(None, &c, None, NOW) else {
            panic!("expected stage");
        };
        assert_eq!(record.status, SyncStatus::PendingCreate);
        let intent = record.pending.unwrap();
        assert_eq!(intent.target, Side::Two);
        assert_eq!(intent.op, IntentOp::Create);
        assert_eq!(intent.source_revision, Revision::new(100));
        assert_eq!(intent.fields, Field::all());
    }

    #[test]
    fn echo_is_ignored() {
        let record = linked_record(100, 50);
        let c = change(Side::One, "P1-10", 100);
        assert!(matches!(
            decide(Some(&record), &c, None, NOW),
            Decision::Ignore(IgnoreReason::Echo { .. })
        ));

        let older = change(Side::One, "P1-10", 90);
        assert!(matches!(
            decide(Some(&record), &older, None, NOW),
            Decision::Ignore(IgnoreReason::Echo { .. })
        ));
    }

    #[test]
    fn forward_update_stages_when_counterpart_is_unchanged() {
        let record = linked_record(100, 50);
        let c = change(Side::One, "P1-10", 150);
        let counterpart = Observation {
            revision: Revision::new(50),
            snapshot: IssueSnapshot::default(),
        };

        let Decision::Stage(next) = decide(Some(&record), &c, Some(&counterpart), NOW) else {
            panic!("expected stage");
        };
        assert_eq!(next.status, SyncStatus::PendingUpdate);
        let intent = next.pending.unwrap();
        assert_eq!(intent.op, IntentOp::Update);
        assert_eq!(intent.target, Side::Two);
        assert_eq!(intent.source_revision, Revision::new(150));
    }

    #[test]
    fn independent_counterpart_advance_is_a_conflict() {
        let record = linked_record(100, 50);
        let c = change(Side::One, "P1-10", 150);
        let counterpart = Observation {
            revision: Revision::new(80),
            snapshot: IssueSnapshot {
                summary: "edited on side two".into(),
                ..Default::default()
            },
        };

        let Decision::Conflict(next) = decide(Some(&record), &c, Some(&counterpart), NOW) else {
            panic!("expected conflict");
        };
        assert_eq!(next.status, SyncStatus::Conflicted);
        assert!(next.pending.is_none());
        let conflict = next.conflict.unwrap();
        assert_eq!(conflict.one.revision, Revision::new(150));
        assert_eq!(conflict.two.revision, Revision::new(80));
        assert_eq!(conflict.two.snapshot.summary, "edited on side two");
    }

    #[test]
    fn conflict_is_symmetric_in_arrival_order() {
        // Side one's change first, side two's observed advance second --
        // versus side two's change first, side one's observed advance
        // second. Both orders must conflict.
        let record = linked_record(100, 50);

        let c1 = change(Side::One, "P1-10", 150);
        let obs2 = Observation {
            revision: Revision::new(80),
            snapshot: IssueSnapshot::default(),
        };
        assert!(matches!(
            decide(Some(&record), &c1, Some(&obs2), NOW),
            Decision::Conflict(_)
        ));

        let c2 = change(Side::Two, "P2-7", 80);
        let obs1 = Observation {
            revision: Revision::new(150),
            snapshot: IssueSnapshot::default(),
        };
        assert!(matches!(
            decide(Some(&record), &c2, Some(&obs1), NOW),
            Decision::Conflict(_)
        ));
    }

    #[test]
    fn newer_change_coalesces_into_outstanding_intent() {
        let c1 = change(Side::One, "P1-10", 100);
        let Decision::Stage(record) = decide(None, &c1, None, NOW) else {
            panic!("expected stage");
        };

        let mut c2 = change(Side::One, "P1-10", 120);
        c2.changed_fields = [Field::Status].into_iter().collect();
        let Decision::Stage(next) = decide(Some(&record), &c2, None, NOW) else {
            panic!("expected stage");
        };

        let intent = next.pending.unwrap();
        // Last writer wins on the payload, fields accumulate.
        assert_eq!(intent.source_revision, Revision::new(120));
        assert_eq!(intent.snapshot.summary, "summary at r120");
        let expected: BTreeSet<_> = Field::all();
        assert_eq!(intent.fields, expected);
        assert_eq!(intent.op, IntentOp::Create);
    }

    #[test]
    fn redelivery_while_pending_is_already_staged() {
        let c = change(Side::One, "P1-10", 100);
        let Decision::Stage(record) = decide(None, &c, None, NOW) else {
            panic!("expected stage");
        };
        assert_eq!(
            decide(Some(&record), &c, None, NOW),
            Decision::Ignore(IgnoreReason::AlreadyStaged)
        );
    }

    #[test]
    fn target_side_change_while_pending_conflicts() {
        let mut record = linked_record(100, 50);
        let c1 = change(Side::One, "P1-10", 150);
        let obs = Observation {
            revision: Revision::new(50),
            snapshot: IssueSnapshot::default(),
        };
        let Decision::Stage(staged) = decide(Some(&record), &c1, Some(&obs), NOW) else {
            panic!("expected stage");
        };
        record = staged;

        // Counterpart edited while our update to it is outstanding.
        let c2 = change(Side::Two, "P2-7", 80);
        let Decision::Conflict(next) = decide(Some(&record), &c2, None, NOW) else {
            panic!("expected conflict");
        };
        let conflict = next.conflict.unwrap();
        assert_eq!(conflict.one.revision, Revision::new(150));
        assert_eq!(conflict.two.revision, Revision::new(80));
    }

    #[test]
    fn coalescing_onto_failed_resets_the_retry_clock() {
        let c1 = change(Side::One, "P1-10", 100);
        let Decision::Stage(mut record) = decide(None, &c1, None, NOW) else {
            panic!("expected stage");
        };
        record.status = SyncStatus::Failed;
        record.retry_count = 2;
        record.next_retry_at = Some(NOW + 20_000);
        record.last_error = Some("rate limited".into());

        let c2 = change(Side::One, "P1-10", 120);
        let Decision::Stage(next) = decide(Some(&record), &c2, None, NOW) else {
            panic!("expected stage");
        };
        assert_eq!(next.status, SyncStatus::PendingCreate);
        assert_eq!(next.retry_count, 0);
        assert!(next.next_retry_at.is_none());
        assert!(next.last_error.is_none());
    }

    #[test]
    fn conflicted_record_refreshes_snapshot_without_writing() {
        let record = linked_record(100, 50);
        let c1 = change(Side::One, "P1-10", 150);
        let obs = Observation {
            revision: Revision::new(80),
            snapshot: IssueSnapshot::default(),
        };
        let Decision::Conflict(conflicted) = decide(Some(&record), &c1, Some(&obs), NOW) else {
            panic!("expected conflict");
        };

        // A later, newer edit on side one lands in the captured details.
        let c3 = change(Side::One, "P1-10", 200);
        let Decision::Conflict(updated) = decide(Some(&conflicted), &c3, None, NOW) else {
            panic!("expected conflict refresh");
        };
        assert_eq!(updated.status, SyncStatus::Conflicted);
        let conflict = updated.conflict.unwrap();
        assert_eq!(conflict.one.revision, Revision::new(200));
        assert_eq!(conflict.two.revision, Revision::new(80));
    }

    #[test]
    fn decision_is_stable_under_replay() {
        // Re-deciding the same change against the same record must produce
        // the same result; the engine relies on this after a stale
        // compare-and-set.
        let record = linked_record(100, 50);
        let c = change(Side::One, "P1-10", 150);
        let obs = Observation {
            revision: Revision::new(50),
            snapshot: IssueSnapshot::default(),
        };
        let first = decide(Some(&record), &c, Some(&obs), NOW);
        let second = decide(Some(&record), &c, Some(&obs), NOW);
        assert_eq!(first, second);
    }
}
