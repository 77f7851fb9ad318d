//! Snapshot diffing.
//!
//! Used by the reconciliation sweep to work out which fields actually
//! drifted, and by the engine to avoid no-op field writes.

use pairlink_types::{Field, IssueSnapshot};
use std::collections::BTreeSet;

/// Fields whose values differ between the two snapshots.
pub fn diff_snapshots(a: &IssueSnapshot, b: &IssueSnapshot) -> BTreeSet<Field> {
    let mut changed = BTreeSet::new();
    if a.summary != b.summary {
        changed.insert(Field::Summary);
    }
    if a.description != b.description {
        changed.insert(Field::Description);
    }
    if a.status != b.status {
        changed.insert(Field::Status);
    }
    if a.priority != b.priority {
        changed.insert(Field::Priority);
    }
    if a.assignee != b.assignee {
        changed.insert(Field::Assignee);
    }
    if a.labels != b.labels {
        changed.insert(Field::Labels);
    }
    changed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_snapshots_have_no_diff() {
        let snap = IssueSnapshot {
            summary: "s".into(),
            status: Some("Open".into()),
            ..Default::default()
        };
        assert!(diff_snapshots(&snap, &snap.clone()).is_empty());
    }

    #[test]
    fn changed_fields_are_reported() {
        let a = IssueSnapshot {
            summary: "old".into(),
            status: Some("Open".into()),
            labels: vec!["bug".into()],
            ..Default::default()
        };
        let b = IssueSnapshot {
            summary: "new".into(),
            status: Some("Closed".into()),
            labels: vec!["bug".into()],
            ..Default::default()
        };

        let expected: BTreeSet<_> = [Field::Summary, Field::Status].into_iter().collect();
        assert_eq!(diff_snapshots(&a, &b), expected);
    }

    #[test]
    fn absent_versus_present_is_a_diff() {
        let a = IssueSnapshot {
            summary: "s".into(),
            ..Default::default()
        };
        let b = IssueSnapshot {
            summary: "s".into(),
            assignee: Some("dev@example.com".into()),
            ..Default::default()
        };
        assert_eq!(
            diff_snapshots(&a, &b),
            [Field::Assignee].into_iter().collect()
        );
    }
}
