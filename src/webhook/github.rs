//! GitHub webhook payloads
//!
//! `issues` and `issue_comment` deliveries are decoded into [`GitHubEvent`]
//! variants. A payload missing the data its action needs is rejected here,
//! before any routing happens.

use crate::integrations::{GitHubComment, GitHubIssue, GitHubLabel, GitHubUser};
use crate::{Result, SyncError};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct GitHubRepository {
    pub full_name: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChangedFrom {
    pub from: String,
}

/// `changes` object of an `edited` delivery
#[derive(Debug, Clone, Default, Deserialize)]
pub struct IssueChanges {
    #[serde(default)]
    pub title: Option<ChangedFrom>,
    #[serde(default)]
    pub body: Option<ChangedFrom>,
}

/// Raw webhook body, as loose as GitHub sends it
#[derive(Debug, Clone, Deserialize)]
pub struct GitHubWebhookPayload {
    #[serde(default)]
    pub action: Option<String>,
    #[serde(default)]
    pub issue: Option<GitHubIssue>,
    #[serde(default)]
    pub comment: Option<GitHubComment>,
    #[serde(default)]
    pub repository: Option<GitHubRepository>,
    #[serde(default)]
    pub changes: Option<IssueChanges>,
    #[serde(default)]
    pub label: Option<GitHubLabel>,
    #[serde(default)]
    pub assignee: Option<GitHubUser>,
}

/// Issue the event is about
#[derive(Debug, Clone)]
pub struct IssueEvent {
    /// `owner/name`
    pub repository: String,
    pub issue: GitHubIssue,
}

#[derive(Debug, Clone)]
pub struct CommentEvent {
    pub repository: String,
    pub issue: GitHubIssue,
    pub comment: GitHubComment,
}

/// Validated GitHub event
#[derive(Debug, Clone)]
pub enum GitHubEvent {
    IssueOpened(IssueEvent),
    IssueEdited {
        event: IssueEvent,
        changes: IssueChanges,
    },
    IssueClosed(IssueEvent),
    IssueDeleted(IssueEvent),
    /// `labeled` (`added`) or `unlabeled`
    IssueLabeled {
        event: IssueEvent,
        label: String,
        added: bool,
    },
    /// `assigned` (`added`) or `unassigned`
    IssueAssigned {
        event: IssueEvent,
        login: String,
        added: bool,
    },
    CommentCreated(CommentEvent),
    CommentEdited(CommentEvent),
    CommentDeleted(CommentEvent),
    Unhandled(String),
}

impl GitHubEvent {
    /// Decode a delivery body; `event_type` is the `X-GitHub-Event` header
    pub fn parse(event_type: Option<&str>, body: &[u8]) -> Result<Self> {
        let payload: GitHubWebhookPayload = serde_json::from_slice(body)
            .map_err(|e| SyncError::InvalidPayload(format!("GitHub payload: {}", e)))?;
        Self::from_payload(event_type, payload)
    }

    pub fn from_payload(event_type: Option<&str>, payload: GitHubWebhookPayload) -> Result<Self> {
        let kind = match event_type {
            Some(kind) => kind,
            None if payload.comment.is_some() => "issue_comment",
            None if payload.issue.is_some() => "issues",
            None => return Ok(GitHubEvent::Unhandled("unknown".to_string())),
        };

        match kind {
            "issues" => Self::issue_event(payload),
            "issue_comment" => Self::comment_event(payload),
            other => Ok(GitHubEvent::Unhandled(other.to_string())),
        }
    }

    fn issue_event(payload: GitHubWebhookPayload) -> Result<Self> {
        let action = required(payload.action, "action")?;
        let event = IssueEvent {
            repository: required(payload.repository, "repository")?.full_name,
            issue: required(payload.issue, "issue")?,
        };

        Ok(match action.as_str() {
            "opened" => GitHubEvent::IssueOpened(event),
            "edited" => GitHubEvent::IssueEdited {
                event,
                changes: payload.changes.unwrap_or_default(),
            },
            "closed" => GitHubEvent::IssueClosed(event),
            "deleted" => GitHubEvent::IssueDeleted(event),
            "labeled" | "unlabeled" => GitHubEvent::IssueLabeled {
                event,
                label: required(payload.label, "label")?.name,
                added: action == "labeled",
            },
            "assigned" | "unassigned" => GitHubEvent::IssueAssigned {
                event,
                login: required(payload.assignee, "assignee")?.login,
                added: action == "assigned",
            },
            other => GitHubEvent::Unhandled(format!("issues.{}", other)),
        })
    }

    fn comment_event(payload: GitHubWebhookPayload) -> Result<Self> {
        let action = required(payload.action, "action")?;
        let event = CommentEvent {
            repository: required(payload.repository, "repository")?.full_name,
            issue: required(payload.issue, "issue")?,
            comment: required(payload.comment, "comment")?,
        };

        Ok(match action.as_str() {
            "created" => GitHubEvent::CommentCreated(event),
            "edited" => GitHubEvent::CommentEdited(event),
            "deleted" => GitHubEvent::CommentDeleted(event),
            other => GitHubEvent::Unhandled(format!("issue_comment.{}", other)),
        })
    }

    /// Short name for logs
    pub fn name(&self) -> &str {
        match self {
            GitHubEvent::IssueOpened(_) => "issue.opened",
            GitHubEvent::IssueEdited { .. } => "issue.edited",
            GitHubEvent::IssueClosed(_) => "issue.closed",
            GitHubEvent::IssueDeleted(_) => "issue.deleted",
            GitHubEvent::IssueLabeled { added: true, .. } => "issue.labeled",
            GitHubEvent::IssueLabeled { added: false, .. } => "issue.unlabeled",
            GitHubEvent::IssueAssigned { added: true, .. } => "issue.assigned",
            GitHubEvent::IssueAssigned { added: false, .. } => "issue.unassigned",
            GitHubEvent::CommentCreated(_) => "comment.created",
            GitHubEvent::CommentEdited(_) => "comment.edited",
            GitHubEvent::CommentDeleted(_) => "comment.deleted",
            GitHubEvent::Unhandled(name) => name,
        }
    }
}

fn required<T>(value: Option<T>, field: &str) -> Result<T> {
    value.ok_or_else(|| SyncError::InvalidPayload(format!("GitHub payload is missing {}", field)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn issue_json() -> serde_json::Value {
        json!({
            "number": 42,
            "title": "Fix crash",
            "state": "open",
            "labels": [],
            "html_url": "https://github.com/acme/widgets/issues/42"
        })
    }

    fn parse(kind: Option<&str>, value: serde_json::Value) -> Result<GitHubEvent> {
        GitHubEvent::parse(kind, &serde_json::to_vec(&value).unwrap())
    }

    #[test]
    fn test_opened() {
        let event = parse(
            Some("issues"),
            json!({
                "action": "opened",
                "issue": issue_json(),
                "repository": { "full_name": "acme/widgets" }
            }),
        )
        .unwrap();

        match event {
            GitHubEvent::IssueOpened(e) => {
                assert_eq!(e.repository, "acme/widgets");
                assert_eq!(e.issue.number, 42);
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn test_edited_carries_changes() {
        let event = parse(
            Some("issues"),
            json!({
                "action": "edited",
                "issue": issue_json(),
                "changes": { "title": { "from": "Fix crsh" } },
                "repository": { "full_name": "acme/widgets" }
            }),
        )
        .unwrap();

        match event {
            GitHubEvent::IssueEdited { changes, .. } => {
                assert_eq!(changes.title.unwrap().from, "Fix crsh");
                assert!(changes.body.is_none());
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn test_comment_detected_without_header() {
        let event = parse(
            None,
            json!({
                "action": "created",
                "issue": issue_json(),
                "comment": { "id": 7, "body": "hi" },
                "repository": { "full_name": "acme/widgets" }
            }),
        )
        .unwrap();

        assert_eq!(event.name(), "comment.created");
    }

    #[test]
    fn test_unlabeled_needs_label() {
        let result = parse(
            Some("issues"),
            json!({
                "action": "unlabeled",
                "issue": issue_json(),
                "repository": { "full_name": "acme/widgets" }
            }),
        );
        assert!(matches!(result, Err(SyncError::InvalidPayload(_))));
    }

    #[test]
    fn test_unhandled_actions() {
        let reopened = parse(
            Some("issues"),
            json!({
                "action": "reopened",
                "issue": issue_json(),
                "repository": { "full_name": "acme/widgets" }
            }),
        )
        .unwrap();
        assert_eq!(reopened.name(), "issues.reopened");

        let ping = parse(Some("ping"), json!({ "zen": "Keep it logically awesome." })).unwrap();
        assert_eq!(ping.name(), "ping");
    }

    #[test]
    fn test_malformed_json() {
        let result = GitHubEvent::parse(Some("issues"), b"{not json");
        assert!(matches!(result, Err(SyncError::InvalidPayload(_))));
    }
}
