//! Jira webhook payloads

use crate::integrations::{JiraComment, JiraIssue};
use crate::sync::reconcile::{IssueFields, IssueStatus};
use crate::{Result, SyncError};
use serde::Deserialize;

/// One changed field of an `issue_updated` delivery
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChangeItem {
    pub field: String,
    #[serde(default)]
    pub from: Option<String>,
    #[serde(rename = "fromString", default)]
    pub from_string: Option<String>,
    #[serde(default)]
    pub to: Option<String>,
    #[serde(rename = "toString", default)]
    pub to_string: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Changelog {
    #[serde(default)]
    pub items: Vec<ChangeItem>,
}

/// Raw webhook body
#[derive(Debug, Clone, Deserialize)]
pub struct JiraWebhookPayload {
    #[serde(rename = "webhookEvent", default)]
    pub webhook_event: Option<String>,
    #[serde(default)]
    pub issue: Option<JiraIssue>,
    #[serde(default)]
    pub comment: Option<JiraComment>,
    #[serde(default)]
    pub changelog: Option<Changelog>,
}

#[derive(Debug, Clone)]
pub struct JiraCommentEvent {
    pub issue: JiraIssue,
    pub comment: JiraComment,
}

/// Validated Jira event
#[derive(Debug, Clone)]
pub enum JiraEvent {
    IssueCreated(JiraIssue),
    IssueUpdated {
        issue: JiraIssue,
        changelog: Changelog,
    },
    IssueDeleted(JiraIssue),
    CommentCreated(JiraCommentEvent),
    CommentUpdated(JiraCommentEvent),
    CommentDeleted(JiraCommentEvent),
    Unhandled(String),
}

impl JiraEvent {
    pub fn parse(body: &[u8]) -> Result<Self> {
        let payload: JiraWebhookPayload = serde_json::from_slice(body)
            .map_err(|e| SyncError::InvalidPayload(format!("Jira payload: {}", e)))?;
        Self::from_payload(payload)
    }

    pub fn from_payload(payload: JiraWebhookPayload) -> Result<Self> {
        let event = required(payload.webhook_event, "webhookEvent")?;

        Ok(match event.as_str() {
            "jira:issue_created" => JiraEvent::IssueCreated(required(payload.issue, "issue")?),
            "jira:issue_updated" => JiraEvent::IssueUpdated {
                issue: required(payload.issue, "issue")?,
                changelog: payload.changelog.unwrap_or_default(),
            },
            "jira:issue_deleted" => JiraEvent::IssueDeleted(required(payload.issue, "issue")?),
            "comment_created" | "comment_updated" | "comment_deleted" => {
                let comment_event = JiraCommentEvent {
                    issue: required(payload.issue, "issue")?,
                    comment: required(payload.comment, "comment")?,
                };
                match event.as_str() {
                    "comment_created" => JiraEvent::CommentCreated(comment_event),
                    "comment_updated" => JiraEvent::CommentUpdated(comment_event),
                    _ => JiraEvent::CommentDeleted(comment_event),
                }
            }
            _ => JiraEvent::Unhandled(event),
        })
    }

    pub fn name(&self) -> &str {
        match self {
            JiraEvent::IssueCreated(_) => "jira:issue_created",
            JiraEvent::IssueUpdated { .. } => "jira:issue_updated",
            JiraEvent::IssueDeleted(_) => "jira:issue_deleted",
            JiraEvent::CommentCreated(_) => "comment_created",
            JiraEvent::CommentUpdated(_) => "comment_updated",
            JiraEvent::CommentDeleted(_) => "comment_deleted",
            JiraEvent::Unhandled(name) => name,
        }
    }
}

/// Current synced fields of a Jira issue
pub fn current_fields(issue: &JiraIssue, done_status_name: &str) -> IssueFields {
    IssueFields {
        title: issue.fields.summary.clone(),
        body: issue.fields.description.clone(),
        labels: issue.fields.labels.clone(),
        assignee: issue
            .fields
            .assignee
            .as_ref()
            .and_then(|a| a.account_id.clone()),
        status: issue
            .fields
            .status_name()
            .map(|name| IssueStatus::from_jira_status(name, done_status_name))
            .unwrap_or_default(),
    }
}

impl Changelog {
    /// Previous and current field sets implied by the changelog
    ///
    /// Fields the changelog does not mention are identical on both sides.
    /// Labels arrive space-separated; assignees as account ids.
    pub fn field_sets(&self, issue: &JiraIssue, done_status_name: &str) -> (IssueFields, IssueFields) {
        let mut current = current_fields(issue, done_status_name);
        let mut previous = current.clone();

        for item in &self.items {
            match item.field.as_str() {
                "summary" => {
                    previous.title = item.from_string.clone().unwrap_or_default();
                    if let Some(ref to) = item.to_string {
                        current.title = to.clone();
                    }
                }
                "description" => {
                    previous.body = item.from_string.clone();
                    current.body = item.to_string.clone();
                }
                "labels" => {
                    previous.labels = split_labels(item.from_string.as_deref());
                    current.labels = split_labels(item.to_string.as_deref());
                }
                "assignee" => {
                    previous.assignee = item.from.clone();
                    current.assignee = item.to.clone();
                }
                "status" => {
                    previous.status = item
                        .from_string
                        .as_deref()
                        .map(|s| IssueStatus::from_jira_status(s, done_status_name))
                        .unwrap_or_default();
                    if let Some(ref to) = item.to_string {
                        current.status = IssueStatus::from_jira_status(to, done_status_name);
                    }
                }
                _ => {}
            }
        }

        (previous, current)
    }
}

fn split_labels(value: Option<&str>) -> Vec<String> {
    value
        .unwrap_or_default()
        .split_whitespace()
        .map(str::to_string)
        .collect()
}

fn required<T>(value: Option<T>, field: &str) -> Result<T> {
    value.ok_or_else(|| SyncError::InvalidPayload(format!("Jira payload is missing {}", field)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn issue_json() -> serde_json::Value {
        json!({
            "id": "10001",
            "key": "PROJ-7",
            "fields": {
                "summary": "Crash on start",
                "description": "new body",
                "labels": ["bug", "p1"],
                "status": { "name": "Done" },
                "assignee": { "displayName": "Mona", "accountId": "5b10a" }
            }
        })
    }

    #[test]
    fn test_parse_updated_with_changelog() {
        let body = json!({
            "webhookEvent": "jira:issue_updated",
            "issue": issue_json(),
            "changelog": { "items": [
                { "field": "summary", "fromString": "Crash", "toString": "Crash on start" },
                { "field": "labels", "fromString": "bug", "toString": "bug p1" },
                { "field": "status", "fromString": "In Progress", "toString": "Done" },
                { "field": "assignee", "from": null, "to": "5b10a" }
            ]}
        });

        let event = JiraEvent::parse(&serde_json::to_vec(&body).unwrap()).unwrap();
        let JiraEvent::IssueUpdated { issue, changelog } = event else {
            panic!("expected issue_updated");
        };

        let (prev, curr) = changelog.field_sets(&issue, "Done");
        assert_eq!(prev.title, "Crash");
        assert_eq!(curr.title, "Crash on start");
        assert_eq!(prev.labels, vec!["bug"]);
        assert_eq!(curr.labels, vec!["bug", "p1"]);
        assert_eq!(prev.status, IssueStatus::Other("In Progress".to_string()));
        assert_eq!(curr.status, IssueStatus::Done);
        assert_eq!(prev.assignee, None);
        assert_eq!(curr.assignee.as_deref(), Some("5b10a"));
        // not in the changelog
        assert_eq!(prev.body, curr.body);
    }

    #[test]
    fn test_comment_event_requires_comment() {
        let body = json!({ "webhookEvent": "comment_created", "issue": issue_json() });
        let result = JiraEvent::parse(&serde_json::to_vec(&body).unwrap());
        assert!(matches!(result, Err(SyncError::InvalidPayload(_))));
    }

    #[test]
    fn test_comment_created() {
        let body = json!({
            "webhookEvent": "comment_created",
            "issue": { "id": "10001", "key": "PROJ-7", "fields": { "summary": "Crash" } },
            "comment": { "id": "2001", "body": "looks good" }
        });
        let event = JiraEvent::parse(&serde_json::to_vec(&body).unwrap()).unwrap();
        match event {
            JiraEvent::CommentCreated(e) => {
                assert_eq!(e.issue.key, "PROJ-7");
                assert_eq!(e.comment.id, "2001");
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn test_unhandled_and_missing_event() {
        let body = json!({ "webhookEvent": "sprint_started" });
        let event = JiraEvent::parse(&serde_json::to_vec(&body).unwrap()).unwrap();
        assert_eq!(event.name(), "sprint_started");

        let result = JiraEvent::parse(b"{}");
        assert!(matches!(result, Err(SyncError::InvalidPayload(_))));
    }
}
