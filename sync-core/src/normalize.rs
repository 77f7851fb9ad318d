//! Change normalization for pairlink.
//!
//! Converts a raw tracker notification into a canonical [`Change`] or
//! [`CommentEvent`]. Parsing is pure (no I/O); the engine applies the echo
//! rule with [`is_echo`] before acting on the result.
//!
//! The inbound adapter delivers payloads of this shape (field mapping from
//! the concrete tracker schema happens outside the engine):
//!
//! ```json
//! {
//!   "event": "issue_updated",
//!   "issue": {
//!     "key": "P1-10",
//!     "updated": 1718000000000,
//!     "fields": { "summary": "...", "status": "In Progress", "labels": [] }
//!   },
//!   "changelog": { "items": [ { "field": "summary" }, { "field": "status" } ] },
//!   "comment": { "id": "c-41" }
//! }
//! ```
//!
//! Optional issue fields (assignee, status, priority, description, labels,
//! changelog) may be absent; normalization never fails on their absence.

use pairlink_types::{
    Change, ChangeKind, CommentEvent, CommentEventKind, CommentId, Field, IssueId, IssueSnapshot,
    NormalizeError, RawNotification, Revision, Side, SyncRecord,
};
use serde_json::Value;
use std::collections::BTreeSet;

/// A successfully normalized notification.
#[derive(Debug, Clone)]
pub enum Normalized {
    /// An issue creation or field/status change.
    Issue(Change),
    /// A comment creation, edit, or deletion.
    Comment(CommentEvent),
}

/// Parse a raw notification into its canonical form.
///
/// Event kinds the engine does not replicate (issue deletion, worklog
/// updates, ...) are reported as [`NormalizeError::UnhandledEvent`] so the
/// caller can drop them without treating them as failures.
pub fn parse_notification(raw: &RawNotification) -> Result<Normalized, NormalizeError> {
    let event = raw
        .payload
        .get("event")
        .and_then(Value::as_str)
        .ok_or(NormalizeError::MissingField("event"))?;

    // Tolerate tracker-prefixed event names ("jira:issue_updated").
    let event = event.rsplit(':').next().unwrap_or(event);

    match event {
        "issue_created" => parse_issue(raw, ChangeKind::Created).map(Normalized::Issue),
        "issue_updated" => parse_issue(raw, ChangeKind::Updated).map(Normalized::Issue),
        "comment_created" => parse_comment(raw, CommentEventKind::Created).map(Normalized::Comment),
        "comment_updated" => parse_comment(raw, CommentEventKind::Updated).map(Normalized::Comment),
        "comment_deleted" => parse_comment(raw, CommentEventKind::Deleted).map(Normalized::Comment),
        other => Err(NormalizeError::UnhandledEvent(other.to_string())),
    }
}

/// Whether a change notification is the engine's own mirrored write coming
/// back (or a redelivery of one already applied).
///
/// This is the primary defense against infinite replication loops: a
/// revision at or below the side's last applied marker was either written
/// by the engine itself or has already been mirrored, and must be dropped.
pub fn is_echo(record: Option<&SyncRecord>, side: Side, revision: Revision) -> bool {
    record
        .and_then(|r| r.last_applied(side))
        .is_some_and(|last| revision <= last)
}

fn parse_issue(raw: &RawNotification, kind: ChangeKind) -> Result<Change, NormalizeError> {
    let issue = raw
        .payload
        .get("issue")
        .ok_or(NormalizeError::MissingField("issue"))?;

    let key = issue
        .get("key")
        .and_then(Value::as_str)
        .ok_or(NormalizeError::MissingField("issue.key"))?;

    let revision = parse_revision(issue)?;
    let snapshot = parse_snapshot(issue.get("fields"));
    let changed_fields = parse_changelog(raw.payload.get("changelog"));

    Ok(Change {
        side: raw.side,
        issue_id: IssueId::from(key),
        revision,
        kind,
        // A lost or empty changelog means anything may have changed.
        changed_fields: if changed_fields.is_empty() {
            Field::all()
        } else {
            changed_fields
        },
        snapshot,
    })
}

fn parse_comment(
    raw: &RawNotification,
    kind: CommentEventKind,
) -> Result<CommentEvent, NormalizeError> {
    let issue_key = raw
        .payload
        .get("issue")
        .and_then(|i| i.get("key"))
        .and_then(Value::as_str)
        .ok_or(NormalizeError::MissingField("issue.key"))?;

    let comment_id = raw
        .payload
        .get("comment")
        .and_then(|c| c.get("id"))
        .and_then(Value::as_str)
        .ok_or(NormalizeError::MissingField("comment.id"))?;

    Ok(CommentEvent {
        side: raw.side,
        issue_id: IssueId::from(issue_key),
        comment_id: CommentId::new(comment_id),
        kind,
    })
}

fn parse_revision(issue: &Value) -> Result<Revision, NormalizeError> {
    let updated = issue
        .get("updated")
        .ok_or(NormalizeError::MissingField("issue.updated"))?;

    // Numeric epoch milliseconds, or a numeric string from trackers that
    // stringify their counters.
    if let Some(n) = updated.as_i64() {
        return Ok(Revision::new(n));
    }
    if let Some(s) = updated.as_str() {
        if let Ok(n) = s.parse::<i64>() {
            return Ok(Revision::new(n));
        }
    }
    Err(NormalizeError::InvalidPayload(format!(
        "issue.updated is not a revision marker: {updated}"
    )))
}

fn parse_snapshot(fields: Option<&Value>) -> IssueSnapshot {
    let Some(fields) = fields else {
        return IssueSnapshot::default();
    };

    let text = |name: &str| {
        fields
            .get(name)
            .and_then(Value::as_str)
            .map(str::to_string)
    };

    IssueSnapshot {
        summary: text("summary").unwrap_or_default(),
        description: text("description"),
        status: text("status"),
        priority: text("priority"),
        assignee: text("assignee"),
        labels: fields
            .get("labels")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default(),
    }
}

fn parse_changelog(changelog: Option<&Value>) -> BTreeSet<Field> {
    changelog
        .and_then(|c| c.get("items"))
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|item| item.get("field"))
                .filter_map(Value::as_str)
                .filter_map(Field::parse)
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pairlink_types::IssueId;
    use serde_json::json;

    fn raw(side: Side, payload: Value) -> RawNotification {
        RawNotification {
            side,
            received_at: 1_718_000_000_000,
            payload,
        }
    }

    #[test]
    fn parses_issue_created() {
        let n = raw(
            Side::One,
            json!({
                "event": "issue_created",
                "issue": {
                    "key": "P1-10",
                    "updated": 100,
                    "fields": { "summary": "crash on save", "status": "Open" }
                }
            }),
        );

        let Normalized::Issue(change) = parse_notification(&n).unwrap() else {
            panic!("expected issue change");
        };
        assert_eq!(change.kind, ChangeKind::Created);
        assert_eq!(change.issue_id, IssueId::from("P1-10"));
        assert_eq!(change.revision, Revision::new(100));
        assert_eq!(change.snapshot.summary, "crash on save");
        // No changelog: everything may have changed.
        assert_eq!(change.changed_fields, Field::all());
    }

    #[test]
    fn parses_changelog_fields() {
        let n = raw(
            Side::Two,
            json!({
                "event": "issue_updated",
                "issue": { "key": "P2-7", "updated": 200, "fields": { "summary": "s" } },
                "changelog": { "items": [
                    { "field": "summary" },
                    { "field": "status" },
                    { "field": "timespent" }
                ]}
            }),
        );

        let Normalized::Issue(change) = parse_notification(&n).unwrap() else {
            panic!("expected issue change");
        };
        let expected: BTreeSet<_> = [Field::Summary, Field::Status].into_iter().collect();
        assert_eq!(change.changed_fields, expected);
    }

    #[test]
    fn tolerates_absent_optional_fields() {
        let n = raw(
            Side::One,
            json!({
                "event": "issue_updated",
                "issue": { "key": "P1-10", "updated": 300 }
            }),
        );

        let Normalized::Issue(change) = parse_notification(&n).unwrap() else {
            panic!("expected issue change");
        };
        assert_eq!(change.snapshot.summary, "");
        assert!(change.snapshot.status.is_none());
        assert!(change.snapshot.assignee.is_none());
    }

    #[test]
    fn accepts_prefixed_event_names() {
        let n = raw(
            Side::One,
            json!({
                "event": "jira:issue_updated",
                "issue": { "key": "P1-10", "updated": 300 }
            }),
        );
        assert!(matches!(
            parse_notification(&n),
            Ok(Normalized::Issue(_))
        ));
    }

    #[test]
    fn accepts_stringified_revision() {
        let n = raw(
            Side::One,
            json!({
                "event": "issue_updated",
                "issue": { "key": "P1-10", "updated": "12345" }
            }),
        );
        let Normalized::Issue(change) = parse_notification(&n).unwrap() else {
            panic!("expected issue change");
        };
        assert_eq!(change.revision, Revision::new(12_345));
    }

    #[test]
    fn rejects_missing_issue_key() {
        let n = raw(
            Side::One,
            json!({ "event": "issue_updated", "issue": { "updated": 1 } }),
        );
        assert!(matches!(
            parse_notification(&n),
            Err(NormalizeError::MissingField("issue.key"))
        ));
    }

    #[test]
    fn unhandled_events_are_reported_as_such() {
        let n = raw(Side::One, json!({ "event": "issue_deleted", "issue": {} }));
        assert!(matches!(
            parse_notification(&n),
            Err(NormalizeError::UnhandledEvent(_))
        ));
    }

    #[test]
    fn parses_comment_events() {
        let n = raw(
            Side::Two,
            json!({
                "event": "comment_deleted",
                "issue": { "key": "P2-7" },
                "comment": { "id": "c-41" }
            }),
        );
        let Normalized::Comment(ev) = parse_notification(&n).unwrap() else {
            panic!("expected comment event");
        };
        assert_eq!(ev.kind, CommentEventKind::Deleted);
        assert_eq!(ev.comment_id, CommentId::new("c-41"));
    }

    #[test]
    fn echo_rule_drops_own_writes() {
        let mut record = SyncRecord::new(Side::One, IssueId::from("P1-10"), 0);
        record.advance_last_applied(Side::One, Revision::new(100));

        assert!(is_echo(Some(&record), Side::One, Revision::new(100)));
        assert!(is_echo(Some(&record), Side::One, Revision::new(99)));
        assert!(!is_echo(Some(&record), Side::One, Revision::new(101)));
        // Nothing applied yet for side two.
        assert!(!is_echo(Some(&record), Side::Two, Revision::new(1)));
        // No record at all: nothing to echo against.
        assert!(!is_echo(None, Side::One, Revision::new(1)));
    }
}
