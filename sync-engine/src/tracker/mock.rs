//! Mock tracker for testing.
//!
//! Holds issues in memory, captures every write for verification, and can
//! be scripted to fail or reject on demand.

use super::{
    FieldDelta, IssueStub, RemoteComment, RemoteIssue, TrackerClient, TrackerError,
    TransitionOutcome,
};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use sync_types::{CommentId, Field, IssueId, IssueSnapshot, Revision};

/// Mock tracker for testing.
///
/// Clones share state, so a test can hand a clone to the engine and keep
/// one for assertions.
#[derive(Debug)]
pub struct MockTracker {
    inner: Arc<Mutex<MockTrackerInner>>,
}

#[derive(Debug)]
struct MockTrackerInner {
    prefix: String,
    issues: BTreeMap<IssueId, RemoteIssue>,
    comments: BTreeMap<(IssueId, CommentId), RemoteComment>,
    created: Vec<IssueId>,
    updates: Vec<(IssueId, FieldDelta)>,
    transitions: Vec<(IssueId, String)>,
    next_issue: u64,
    next_comment: u64,
    next_revision: i64,
    fail_next_create: Option<TrackerError>,
    fail_next_update: Option<TrackerError>,
    reject_next_transition: Option<String>,
}

impl MockTracker {
    /// Create a mock tracker whose generated issue keys use `prefix`
    /// (e.g. `"P2"` yields `P2-1`, `P2-2`, ...).
    ///
    /// Revisions issued by writes start at 1000 and increase by one, so
    /// tests can seed changes below and observe writes above that line.
    pub fn new(prefix: &str) -> Self {
        Self {
            inner: Arc::new(Mutex::new(MockTrackerInner {
                prefix: prefix.to_string(),
                issues: BTreeMap::new(),
                comments: BTreeMap::new(),
                created: Vec::new(),
                updates: Vec::new(),
                transitions: Vec::new(),
                next_issue: 1,
                next_comment: 1,
                next_revision: 1_000,
                fail_next_create: None,
                fail_next_update: None,
                reject_next_transition: None,
            })),
        }
    }

    /// Seed an existing issue.
    pub fn seed_issue(&self, id: &str, revision: i64, snapshot: IssueSnapshot) {
        let mut inner = self.inner.lock().unwrap();
        let id = IssueId::from(id);
        inner.issues.insert(
            id.clone(),
            RemoteIssue {
                id,
                revision: Revision::new(revision),
                snapshot,
            },
        );
    }

    /// Seed an existing comment.
    pub fn seed_comment(&self, issue: &str, comment: RemoteComment) {
        let mut inner = self.inner.lock().unwrap();
        inner
            .comments
            .insert((IssueId::from(issue), comment.id.clone()), comment);
    }

    /// Current state of an issue, if it exists.
    pub fn issue(&self, id: &str) -> Option<RemoteIssue> {
        let inner = self.inner.lock().unwrap();
        inner.issues.get(&IssueId::from(id)).cloned()
    }

    /// Current state of a comment, if it exists.
    pub fn comment(&self, issue: &str, comment: &str) -> Option<RemoteComment> {
        let inner = self.inner.lock().unwrap();
        inner
            .comments
            .get(&(IssueId::from(issue), CommentId::new(comment)))
            .cloned()
    }

    /// Keys of all issues created through the client.
    pub fn created_issues(&self) -> Vec<IssueId> {
        self.inner.lock().unwrap().created.clone()
    }

    /// Every update applied through the client.
    pub fn update_log(&self) -> Vec<(IssueId, FieldDelta)> {
        self.inner.lock().unwrap().updates.clone()
    }

    /// Every transition requested through the client.
    pub fn transition_log(&self) -> Vec<(IssueId, String)> {
        self.inner.lock().unwrap().transitions.clone()
    }

    /// Total number of issue writes (creates + updates) performed.
    pub fn write_count(&self) -> usize {
        let inner = self.inner.lock().unwrap();
        inner.created.len() + inner.updates.len()
    }

    /// Cause the next `create_issue` to fail with the given error.
    pub fn fail_next_create(&self, error: TrackerError) {
        self.inner.lock().unwrap().fail_next_create = Some(error);
    }

    /// Cause the next `update_issue` to fail with the given error.
    pub fn fail_next_update(&self, error: TrackerError) {
        self.inner.lock().unwrap().fail_next_update = Some(error);
    }

    /// Cause the next `transition_status` to be rejected.
    pub fn reject_next_transition(&self, reason: &str) {
        self.inner.lock().unwrap().reject_next_transition = Some(reason.to_string());
    }
}

impl Clone for MockTracker {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl MockTrackerInner {
    fn next_revision(&mut self) -> Revision {
        self.next_revision += 1;
        Revision::new(self.next_revision)
    }
}

#[async_trait]
impl TrackerClient for MockTracker {
    async fn fetch_issue(&self, id: &IssueId) -> Result<RemoteIssue, TrackerError> {
        let inner = self.inner.lock().unwrap();
        inner
            .issues
            .get(id)
            .cloned()
            .ok_or_else(|| TrackerError::NotFound(id.to_string()))
    }

    async fn create_issue(&self, snapshot: &IssueSnapshot) -> Result<RemoteIssue, TrackerError> {
        let mut inner = self.inner.lock().unwrap();

        if let Some(error) = inner.fail_next_create.take() {
            return Err(error);
        }

        let id = IssueId::new(format!("{}-{}", inner.prefix, inner.next_issue));
        inner.next_issue += 1;
        let revision = inner.next_revision();
        let issue = RemoteIssue {
            id: id.clone(),
            revision,
            snapshot: snapshot.clone(),
        };
        inner.issues.insert(id.clone(), issue.clone());
        inner.created.push(id);
        Ok(issue)
    }

    async fn update_issue(
        &self,
        id: &IssueId,
        delta: &FieldDelta,
    ) -> Result<Revision, TrackerError> {
        let mut inner = self.inner.lock().unwrap();

        if let Some(error) = inner.fail_next_update.take() {
            return Err(error);
        }

        let revision = inner.next_revision();
        let issue = inner
            .issues
            .get_mut(id)
            .ok_or_else(|| TrackerError::NotFound(id.to_string()))?;

        for field in &delta.fields {
            match field {
                Field::Summary => issue.snapshot.summary = delta.snapshot.summary.clone(),
                Field::Description => {
                    issue.snapshot.description = delta.snapshot.description.clone();
                }
                Field::Priority => issue.snapshot.priority = delta.snapshot.priority.clone(),
                Field::Assignee => issue.snapshot.assignee = delta.snapshot.assignee.clone(),
                Field::Labels => issue.snapshot.labels = delta.snapshot.labels.clone(),
                // Status only moves through transition_status.
                Field::Status => {}
            }
        }
        issue.revision = revision;
        inner.updates.push((id.clone(), delta.clone()));
        Ok(revision)
    }

    async fn transition_status(
        &self,
        id: &IssueId,
        target: &str,
    ) -> Result<TransitionOutcome, TrackerError> {
        let mut inner = self.inner.lock().unwrap();

        if let Some(reason) = inner.reject_next_transition.take() {
            inner.transitions.push((id.clone(), target.to_string()));
            return Ok(TransitionOutcome::Rejected { reason });
        }

        let revision = inner.next_revision();
        let Some(issue) = inner.issues.get_mut(id) else {
            return Ok(TransitionOutcome::NotFound);
        };
        issue.snapshot.status = Some(target.to_string());
        issue.revision = revision;
        inner.transitions.push((id.clone(), target.to_string()));
        Ok(TransitionOutcome::Applied { revision })
    }

    async fn list_issues(&self) -> Result<Vec<IssueStub>, TrackerError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .issues
            .values()
            .map(|issue| IssueStub {
                id: issue.id.clone(),
                revision: issue.revision,
            })
            .collect())
    }

    async fn fetch_comment(
        &self,
        issue: &IssueId,
        comment: &CommentId,
    ) -> Result<RemoteComment, TrackerError> {
        let inner = self.inner.lock().unwrap();
        inner
            .comments
            .get(&(issue.clone(), comment.clone()))
            .cloned()
            .ok_or_else(|| TrackerError::NotFound(comment.to_string()))
    }

    async fn add_comment(&self, issue: &IssueId, body: &str) -> Result<CommentId, TrackerError> {
        let mut inner = self.inner.lock().unwrap();
        if !inner.issues.contains_key(issue) {
            return Err(TrackerError::NotFound(issue.to_string()));
        }
        let id = CommentId::new(format!("{}-c{}", inner.prefix, inner.next_comment));
        inner.next_comment += 1;
        inner.comments.insert(
            (issue.clone(), id.clone()),
            RemoteComment {
                id: id.clone(),
                body: body.to_string(),
                author_name: "sync".to_string(),
                author_email: None,
            },
        );
        Ok(id)
    }

    async fn update_comment(
        &self,
        issue: &IssueId,
        comment: &CommentId,
        body: &str,
    ) -> Result<(), TrackerError> {
        let mut inner = self.inner.lock().unwrap();
        match inner.comments.get_mut(&(issue.clone(), comment.clone())) {
            Some(existing) => {
                existing.body = body.to_string();
                Ok(())
            }
            None => Err(TrackerError::NotFound(comment.to_string())),
        }
    }

    async fn delete_comment(
        &self,
        issue: &IssueId,
        comment: &CommentId,
    ) -> Result<(), TrackerError> {
        let mut inner = self.inner.lock().unwrap();
        match inner.comments.remove(&(issue.clone(), comment.clone())) {
            Some(_) => Ok(()),
            None => Err(TrackerError::NotFound(comment.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn create_assigns_keys_and_revisions() {
        let tracker = MockTracker::new("P2");
        let first = tracker
            .create_issue(&IssueSnapshot {
                summary: "a".into(),
                ..Default::default()
            })
            .await
            .unwrap();
        let second = tracker
            .create_issue(&IssueSnapshot {
                summary: "b".into(),
                ..Default::default()
            })
            .await
            .unwrap();

        assert_eq!(first.id, IssueId::from("P2-1"));
        assert_eq!(second.id, IssueId::from("P2-2"));
        assert!(second.revision > first.revision);
        assert_eq!(tracker.created_issues().len(), 2);
    }

    #[tokio::test]
    async fn update_applies_only_named_fields() {
        let tracker = MockTracker::new("P2");
        tracker.seed_issue(
            "P2-1",
            100,
            IssueSnapshot {
                summary: "original".into(),
                description: Some("keep me".into()),
                ..Default::default()
            },
        );

        let delta = FieldDelta {
            snapshot: IssueSnapshot {
                summary: "changed".into(),
                description: Some("ignored".into()),
                ..Default::default()
            },
            fields: [Field::Summary].into_iter().collect(),
        };
        tracker
            .update_issue(&IssueId::from("P2-1"), &delta)
            .await
            .unwrap();

        let issue = tracker.issue("P2-1").unwrap();
        assert_eq!(issue.snapshot.summary, "changed");
        assert_eq!(issue.snapshot.description.as_deref(), Some("keep me"));
    }

    #[tokio::test]
    async fn scripted_failures_fire_once() {
        let tracker = MockTracker::new("P2");
        tracker.fail_next_create(TrackerError::Transient("down".into()));

        let err = tracker
            .create_issue(&IssueSnapshot::default())
            .await
            .unwrap_err();
        assert!(matches!(err, TrackerError::Transient(_)));

        // Next attempt succeeds.
        assert!(tracker.create_issue(&IssueSnapshot::default()).await.is_ok());
    }

    #[tokio::test]
    async fn rejected_transition_is_reported_not_errored() {
        let tracker = MockTracker::new("P2");
        tracker.seed_issue("P2-1", 100, IssueSnapshot::default());
        tracker.reject_next_transition("no transition to Closed");

        let outcome = tracker
            .transition_status(&IssueId::from("P2-1"), "Closed")
            .await
            .unwrap();
        assert!(matches!(outcome, TransitionOutcome::Rejected { .. }));

        // Status is unchanged but the request was logged.
        assert!(tracker.issue("P2-1").unwrap().snapshot.status.is_none());
        assert_eq!(tracker.transition_log().len(), 1);
    }

    #[tokio::test]
    async fn comment_lifecycle() {
        let tracker = MockTracker::new("P2");
        tracker.seed_issue("P2-1", 100, IssueSnapshot::default());

        let id = tracker
            .add_comment(&IssueId::from("P2-1"), "hello")
            .await
            .unwrap();
        assert_eq!(tracker.comment("P2-1", id.as_str()).unwrap().body, "hello");

        tracker
            .update_comment(&IssueId::from("P2-1"), &id, "edited")
            .await
            .unwrap();
        assert_eq!(tracker.comment("P2-1", id.as_str()).unwrap().body, "edited");

        tracker
            .delete_comment(&IssueId::from("P2-1"), &id)
            .await
            .unwrap();
        assert!(tracker.comment("P2-1", id.as_str()).is_none());
    }
}
