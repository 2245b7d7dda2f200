//! Field reconciliation
//!
//! Turns a before/after pair of issue fields into the smallest update for the
//! other tracker, honoring the sync policy switches.

use super::markers::{format_mirrored_title, strip_native_key, ControlMarkers, System};
use crate::config::SyncPolicy;
use crate::integrations::GitHubIssue;

/// Tracker-neutral workflow state
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum IssueStatus {
    #[default]
    Open,
    /// The terminal state; the only one that propagates
    Done,
    Other(String),
}

impl IssueStatus {
    pub fn from_github_state(state: &str) -> Self {
        if state.eq_ignore_ascii_case("closed") {
            IssueStatus::Done
        } else {
            IssueStatus::Open
        }
    }

    pub fn from_jira_status(name: &str, done_status_name: &str) -> Self {
        if name.eq_ignore_ascii_case(done_status_name) {
            IssueStatus::Done
        } else {
            IssueStatus::Other(name.to_string())
        }
    }
}

/// The synced fields of one issue at one point in time
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct IssueFields {
    pub title: String,
    pub body: Option<String>,
    pub labels: Vec<String>,
    /// Native user id in the tracker the fields came from
    pub assignee: Option<String>,
    pub status: IssueStatus,
}

impl IssueFields {
    pub fn from_github(issue: &GitHubIssue) -> Self {
        Self {
            title: issue.title.clone(),
            body: issue.body.clone(),
            labels: issue.label_names(),
            assignee: issue.primary_assignee().map(str::to_string),
            status: IssueStatus::from_github_state(&issue.state),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssigneeChange {
    /// Native id in the source tracker, still to be resolved
    Assign(String),
    Unassign,
}

/// Sparse update for the target tracker
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct IssueUpdate {
    pub title: Option<String>,
    pub body: Option<String>,
    pub labels: Option<Vec<String>>,
    pub assignee: Option<AssigneeChange>,
    pub close: bool,
}

impl IssueUpdate {
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.body.is_none()
            && self.labels.is_none()
            && self.assignee.is_none()
            && !self.close
    }
}

/// Policy-aware diff of issue fields
#[derive(Debug, Clone)]
pub struct Reconciler {
    policy: SyncPolicy,
    markers: ControlMarkers,
}

impl Reconciler {
    pub fn new(policy: SyncPolicy, markers: ControlMarkers) -> Self {
        Self { policy, markers }
    }

    pub fn policy(&self) -> &SyncPolicy {
        &self.policy
    }

    pub fn markers(&self) -> &ControlMarkers {
        &self.markers
    }

    /// Compute the update for the tracker opposite `source`
    ///
    /// `native_key` is the Jira key of the pair; GitHub-bound titles are
    /// rendered with it as prefix, Jira-bound titles lose any prefix.
    pub fn reconcile(
        &self,
        previous: &IssueFields,
        current: &IssueFields,
        native_key: &str,
        source: System,
    ) -> IssueUpdate {
        let mut update = IssueUpdate::default();

        let (prev_title, new_title) = match source {
            System::GitHub => (
                strip_native_key(&previous.title).to_string(),
                strip_native_key(&current.title).to_string(),
            ),
            System::Jira => (
                format_mirrored_title(native_key, &previous.title),
                format_mirrored_title(native_key, &current.title),
            ),
        };
        if prev_title != new_title {
            update.title = Some(new_title);
        }

        if self.policy.descriptions && previous.body != current.body {
            update.body = Some(current.body.clone().unwrap_or_default());
        }

        if self.policy.labels && self.label_set(&previous.labels) != self.label_set(&current.labels)
        {
            let origin = self.markers.origin_of(&current.labels, source);
            update.labels = Some(self.markers.tag_labels(&current.labels, origin));
        }

        if self.policy.assignees && previous.assignee != current.assignee {
            update.assignee = Some(match current.assignee {
                Some(ref id) => AssigneeChange::Assign(id.clone()),
                None => AssigneeChange::Unassign,
            });
        }

        if current.status == IssueStatus::Done && previous.status != IssueStatus::Done {
            update.close = true;
        }

        update
    }

    /// Tagged comment body for the other tracker, or `None` when comments are off
    pub fn comment_body(&self, body: &str, source: System) -> Option<String> {
        self.policy
            .comments
            .then(|| self.markers.tag_comment(body, source))
    }

    /// Labels without control labels, as a sorted set
    fn label_set(&self, labels: &[String]) -> Vec<String> {
        let mut set = self.markers.strip_control_labels(labels);
        set.sort();
        set
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields(title: &str, labels: &[&str]) -> IssueFields {
        IssueFields {
            title: title.to_string(),
            body: Some("body".to_string()),
            labels: labels.iter().map(|s| s.to_string()).collect(),
            assignee: None,
            status: IssueStatus::Open,
        }
    }

    fn reconciler(policy: SyncPolicy) -> Reconciler {
        Reconciler::new(policy, ControlMarkers::default())
    }

    #[test]
    fn test_label_only_edit_with_labels_disabled_is_empty() {
        let r = reconciler(SyncPolicy {
            labels: false,
            ..Default::default()
        });
        let prev = fields("PROJ-1 - Crash", &["bug"]);
        let curr = fields("PROJ-1 - Crash", &["bug", "p1"]);

        let update = r.reconcile(&prev, &curr, "PROJ-1", System::GitHub);
        assert!(update.is_empty());
    }

    #[test]
    fn test_label_only_edit_with_labels_enabled() {
        let r = reconciler(SyncPolicy::default());
        let prev = fields("PROJ-1 - Crash", &["bug", "source:github"]);
        let curr = fields("PROJ-1 - Crash", &["bug", "p1", "source:github", "p1"]);

        let update = r.reconcile(&prev, &curr, "PROJ-1", System::GitHub);
        assert_eq!(
            update,
            IssueUpdate {
                labels: Some(vec![
                    "bug".to_string(),
                    "p1".to_string(),
                    "source:github".to_string()
                ]),
                ..Default::default()
            }
        );
    }

    #[test]
    fn test_label_reorder_is_not_a_change() {
        let r = reconciler(SyncPolicy::default());
        let prev = fields("t", &["a", "b"]);
        let curr = fields("t", &["b", "a", "source:jira"]);

        assert!(r.reconcile(&prev, &curr, "PROJ-1", System::Jira).is_empty());
    }

    #[test]
    fn test_labels_keep_existing_origin() {
        let r = reconciler(SyncPolicy::default());
        // GitHub mirror of a Jira-born issue
        let prev = fields("PROJ-1 - t", &["source:jira"]);
        let curr = fields("PROJ-1 - t", &["source:jira", "ux"]);

        let update = r.reconcile(&prev, &curr, "PROJ-1", System::GitHub);
        assert_eq!(
            update.labels,
            Some(vec!["ux".to_string(), "source:jira".to_string()])
        );
    }

    #[test]
    fn test_title_towards_github_gets_prefix() {
        let r = reconciler(SyncPolicy::default());
        let prev = fields("Crash", &[]);
        let curr = fields("Crash on start", &[]);

        let update = r.reconcile(&prev, &curr, "PROJ-7", System::Jira);
        assert_eq!(update.title.as_deref(), Some("PROJ-7 - Crash on start"));
    }

    #[test]
    fn test_title_towards_jira_drops_prefix() {
        let r = reconciler(SyncPolicy::default());
        let prev = fields("PROJ-7 - Crash", &[]);
        let curr = fields("PROJ-7 - Crash on start", &[]);

        let update = r.reconcile(&prev, &curr, "PROJ-7", System::GitHub);
        assert_eq!(update.title.as_deref(), Some("Crash on start"));
    }

    #[test]
    fn test_title_propagates_even_when_everything_is_off() {
        let r = reconciler(SyncPolicy {
            descriptions: false,
            labels: false,
            assignees: false,
            attachments: false,
            comments: false,
        });
        let prev = fields("Old", &[]);
        let mut curr = fields("New", &["x"]);
        curr.body = Some("changed".to_string());

        let update = r.reconcile(&prev, &curr, "PROJ-1", System::GitHub);
        assert_eq!(update.title.as_deref(), Some("New"));
        assert!(update.body.is_none());
        assert!(update.labels.is_none());
    }

    #[test]
    fn test_body_and_assignee() {
        let r = reconciler(SyncPolicy::default());
        let prev = fields("t", &[]);
        let mut curr = prev.clone();
        curr.body = None;
        curr.assignee = Some("octocat".to_string());

        let update = r.reconcile(&prev, &curr, "PROJ-1", System::GitHub);
        assert_eq!(update.body.as_deref(), Some(""));
        assert_eq!(
            update.assignee,
            Some(AssigneeChange::Assign("octocat".to_string()))
        );

        let back = r.reconcile(&curr, &prev, "PROJ-1", System::GitHub);
        assert_eq!(back.assignee, Some(AssigneeChange::Unassign));
    }

    #[test]
    fn test_only_done_closes() {
        let r = reconciler(SyncPolicy::default());
        let prev = fields("t", &[]);
        let mut progress = prev.clone();
        progress.status = IssueStatus::Other("In Progress".to_string());
        let mut done = prev.clone();
        done.status = IssueStatus::from_jira_status("done", "Done");

        assert!(r.reconcile(&prev, &progress, "PROJ-1", System::Jira).is_empty());
        assert!(r.reconcile(&progress, &done, "PROJ-1", System::Jira).close);
        assert!(!r.reconcile(&done, &done, "PROJ-1", System::Jira).close);
    }

    #[test]
    fn test_comment_body_gated_by_policy() {
        let on = reconciler(SyncPolicy::default());
        assert_eq!(
            on.comment_body("hi", System::Jira).as_deref(),
            Some("hi\n\ncomment from jira")
        );

        let off = reconciler(SyncPolicy {
            comments: false,
            ..Default::default()
        });
        assert!(off.comment_body("hi", System::Jira).is_none());
    }
}
