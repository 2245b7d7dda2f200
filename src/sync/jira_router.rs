//! Jira event router

use super::markers::{format_mirrored_title, System};
use super::outcome::{Outcome, SyncReport};
use super::reconcile::AssigneeChange;
use super::{EntityLocks, SyncContext};
use crate::integrations::{CreateIssueRequest, JiraComment, JiraFieldUpdate, JiraIssue, UpdateIssueRequest};
use crate::store::{CommentLink, CommentRef, IssueLink};
use crate::webhook::jira::{Changelog, JiraCommentEvent, JiraEvent};
use crate::Result;
use std::sync::Arc;
use tracing::{debug, error, info};

/// GitHub issue a Jira issue is mirrored to
#[derive(Debug, Clone, PartialEq, Eq)]
struct GitHubTarget {
    repository: String,
    number: u64,
}

/// Routes Jira events into GitHub
#[derive(Clone)]
pub struct JiraRouter {
    ctx: Arc<SyncContext>,
}

impl JiraRouter {
    pub fn new(ctx: Arc<SyncContext>) -> Self {
        Self { ctx }
    }

    pub async fn handle(&self, event: JiraEvent) -> Outcome {
        let name = event.name().to_string();
        let _guard = match lock_key(&event) {
            Some(key) => Some(self.ctx.locks.lock(&key).await),
            None => None,
        };

        let outcome = match self.dispatch(event).await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(event = %name, error = %e, "Jira event failed");
                Outcome::from_error(&e)
            }
        };

        info!(event = %name, outcome = outcome.label(), "Jira event handled");
        outcome
    }

    async fn dispatch(&self, event: JiraEvent) -> Result<Outcome> {
        match event {
            JiraEvent::IssueCreated(issue) => self.issue_created(issue).await,
            JiraEvent::IssueUpdated { issue, changelog } => self.issue_updated(issue, changelog).await,
            JiraEvent::IssueDeleted(issue) => self.issue_deleted(issue).await,
            JiraEvent::CommentCreated(e) => self.comment_created(e).await,
            JiraEvent::CommentUpdated(e) => self.comment_updated(e).await,
            JiraEvent::CommentDeleted(e) => self.comment_deleted(e).await,
            JiraEvent::Unhandled(name) => Ok(Outcome::no_op(format!("unhandled event {}", name))),
        }
    }

    async fn issue_created(&self, issue: JiraIssue) -> Result<Outcome> {
        let ctx = &self.ctx;
        let markers = ctx.markers();
        let policy = *ctx.policy();

        if markers.is_issue_echo(System::Jira, &issue.fields.labels) {
            return Ok(Outcome::conflict(format!("{} was created by sync", issue.key)));
        }
        if let Some(link) = ctx.store.get_issue_link(&issue.key)? {
            return Ok(Outcome::no_op(format!(
                "{} is already linked to {}#{}",
                issue.key, link.target_repository, link.target_issue_number
            )));
        }
        if let Some(target) = self.target_from_fields(&issue) {
            return Ok(Outcome::no_op(format!(
                "{} already points at {}#{}",
                issue.key, target.repository, target.number
            )));
        }

        let repository = ctx.github_settings.default_repository();
        let labels = if policy.labels {
            issue.fields.labels.clone()
        } else {
            Vec::new()
        };
        let request = CreateIssueRequest {
            title: format_mirrored_title(&issue.key, &issue.fields.summary),
            body: if policy.descriptions {
                issue.fields.description.clone()
            } else {
                None
            },
            labels: Some(markers.tag_labels(&labels, System::Jira)),
            assignees: None,
        };

        let created = ctx
            .retry
            .execute("github.create_issue", || {
                ctx.github.create_issue(&repository, request.clone())
            })
            .await?;
        let mut report = SyncReport::new();
        report.record_success("github.create_issue");

        ctx.store
            .save_issue_link(&IssueLink::new(&issue.key, &repository, created.number))?;
        info!(
            key = %issue.key,
            repository = %repository,
            number = created.number,
            "Mirrored Jira issue into GitHub"
        );

        let link_fields = ctx.jira_link_fields(&repository, created.number);
        if !link_fields.is_empty() {
            let update = JiraFieldUpdate {
                custom_fields: link_fields,
                ..Default::default()
            };
            report
                .attempt(&ctx.retry, "jira.update_issue", || {
                    ctx.jira.update_issue(&issue.key, update.clone())
                })
                .await;
        }

        let account = issue.fields.assignee.as_ref().and_then(|a| a.account_id.clone());
        if let (Some(account), true) = (account, policy.assignees) {
            match ctx.identity.github_login_for(&account).await? {
                Some(login) => {
                    let logins = vec![login];
                    report
                        .attempt(&ctx.retry, "github.add_assignees", || {
                            ctx.github
                                .add_assignees(&repository, created.number, &logins)
                        })
                        .await;
                }
                None => report.skip(
                    "github.assignee",
                    &format!("no GitHub login mapped for {}", account),
                ),
            }
        }

        Ok(report.into_outcome())
    }

    async fn issue_updated(&self, issue: JiraIssue, changelog: Changelog) -> Result<Outcome> {
        let ctx = &self.ctx;
        let Some(target) = self.resolve_target(&issue)? else {
            return Ok(not_linked(&issue.key));
        };

        let (previous, current) = changelog.field_sets(&issue, &ctx.jira_settings.done_status_name);
        let update = ctx
            .reconciler
            .reconcile(&previous, &current, &issue.key, System::Jira);
        if update.is_empty() {
            return Ok(Outcome::no_op("no synced field changed"));
        }

        let mut report = SyncReport::new();
        let request = UpdateIssueRequest {
            title: update.title,
            body: update.body,
            state: update.close.then(|| "closed".to_string()),
            labels: None,
        };
        if !request.is_empty() {
            report
                .attempt(&ctx.retry, "github.update_issue", || {
                    ctx.github
                        .update_issue(&target.repository, target.number, request.clone())
                })
                .await;
        }

        if let Some(labels) = update.labels {
            report
                .attempt(&ctx.retry, "github.replace_labels", || {
                    ctx.github
                        .replace_labels(&target.repository, target.number, &labels)
                })
                .await;
        }

        if let Some(change) = update.assignee {
            self.sync_assignee(&target, change, previous.assignee.as_deref(), &mut report)
                .await?;
        }

        Ok(report.into_outcome())
    }

    async fn sync_assignee(
        &self,
        target: &GitHubTarget,
        change: AssigneeChange,
        previous: Option<&str>,
        report: &mut SyncReport,
    ) -> Result<()> {
        let ctx = &self.ctx;

        if let Some(account) = previous {
            match ctx.identity.github_login_for(account).await? {
                Some(login) => {
                    let logins = vec![login];
                    report
                        .attempt(&ctx.retry, "github.remove_assignees", || {
                            ctx.github
                                .remove_assignees(&target.repository, target.number, &logins)
                        })
                        .await;
                }
                None => report.skip(
                    "github.unassign",
                    &format!("no GitHub login mapped for {}", account),
                ),
            }
        }

        if let AssigneeChange::Assign(account) = change {
            match ctx.identity.github_login_for(&account).await? {
                Some(login) => {
                    let logins = vec![login];
                    report
                        .attempt(&ctx.retry, "github.add_assignees", || {
                            ctx.github
                                .add_assignees(&target.repository, target.number, &logins)
                        })
                        .await;
                }
                None => report.skip(
                    "github.assignee",
                    &format!("no GitHub login mapped for {}", account),
                ),
            }
        }

        Ok(())
    }

    async fn issue_deleted(&self, issue: JiraIssue) -> Result<Outcome> {
        let ctx = &self.ctx;
        let Some(target) = self.resolve_target(&issue)? else {
            return Ok(not_linked(&issue.key));
        };

        let mut report = SyncReport::new();
        let close = UpdateIssueRequest {
            state: Some("closed".to_string()),
            ..Default::default()
        };
        report
            .attempt(&ctx.retry, "github.close_issue", || {
                ctx.github
                    .update_issue(&target.repository, target.number, close.clone())
            })
            .await;

        let notice = ctx.markers().tag_comment(
            &format!("Jira issue {} was deleted.", issue.key),
            System::Jira,
        );
        report
            .attempt(&ctx.retry, "github.create_comment", || {
                ctx.github
                    .create_comment(&target.repository, target.number, &notice)
            })
            .await;

        Ok(report.into_outcome())
    }

    async fn comment_created(&self, e: JiraCommentEvent) -> Result<Outcome> {
        let ctx = &self.ctx;
        if let Some(outcome) = self.screen_comment(&e.comment, true) {
            return Ok(outcome);
        }
        let Some(body) = ctx.reconciler.comment_body(&e.comment.body, System::Jira) else {
            return Ok(Outcome::no_op("comment sync is disabled"));
        };
        if let Some(link) = ctx.store.get_comment_link(CommentRef::Jira(&e.comment.id))? {
            return Ok(Outcome::no_op(format!(
                "comment {} is already mirrored as {}",
                e.comment.id, link.comment_id_a
            )));
        }

        let issue = ctx
            .retry
            .execute("jira.get_issue", || ctx.jira.get_issue(&e.issue.key))
            .await?;
        let Some(target) = self.resolve_target(&issue)? else {
            return Ok(Outcome::unprocessable(format!(
                "no GitHub issue linked to {}",
                issue.key
            )));
        };

        let mirrored = ctx
            .retry
            .execute("github.create_comment", || {
                ctx.github
                    .create_comment(&target.repository, target.number, &body)
            })
            .await?;

        ctx.store.save_comment_link(&CommentLink {
            comment_id_a: mirrored.id,
            comment_id_b: e.comment.id.clone(),
            issue_number_a: target.number,
            repository_a: target.repository.clone(),
            issue_key_b: issue.key.clone(),
        })?;
        debug!(jira_comment = %e.comment.id, github_comment = mirrored.id, "Linked comments");

        let mut report = SyncReport::new();
        report.record_success("github.create_comment");
        Ok(report.into_outcome())
    }

    async fn comment_updated(&self, e: JiraCommentEvent) -> Result<Outcome> {
        let ctx = &self.ctx;
        if let Some(outcome) = self.screen_comment(&e.comment, true) {
            return Ok(outcome);
        }
        let Some(body) = ctx.reconciler.comment_body(&e.comment.body, System::Jira) else {
            return Ok(Outcome::no_op("comment sync is disabled"));
        };
        let Some(link) = ctx.store.get_comment_link(CommentRef::Jira(&e.comment.id))? else {
            return Ok(Outcome::no_op(format!(
                "comment {} has no linked GitHub comment",
                e.comment.id
            )));
        };

        ctx.retry
            .execute("github.update_comment", || {
                ctx.github
                    .update_comment(&link.repository_a, link.comment_id_a, &body)
            })
            .await?;

        let mut report = SyncReport::new();
        report.record_success("github.update_comment");
        Ok(report.into_outcome())
    }

    async fn comment_deleted(&self, e: JiraCommentEvent) -> Result<Outcome> {
        let ctx = &self.ctx;
        if let Some(outcome) = self.screen_comment(&e.comment, false) {
            return Ok(outcome);
        }
        if !ctx.policy().comments {
            return Ok(Outcome::no_op("comment sync is disabled"));
        }
        let Some(link) = ctx.store.get_comment_link(CommentRef::Jira(&e.comment.id))? else {
            return Ok(Outcome::no_op(format!(
                "comment {} has no linked GitHub comment",
                e.comment.id
            )));
        };

        let deleted = ctx
            .retry
            .execute("github.delete_comment", || {
                ctx.github
                    .delete_comment(&link.repository_a, link.comment_id_a)
            })
            .await;
        match deleted {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {
                debug!(github_comment = link.comment_id_a, "GitHub comment already gone");
            }
            Err(e) => return Err(e),
        }
        ctx.store
            .delete_comment_link(CommentRef::Jira(&e.comment.id))?;

        let mut report = SyncReport::new();
        report.record_success("github.delete_comment");
        Ok(report.into_outcome())
    }

    /// Reject empty bodies (when a body is needed) and our own comments
    fn screen_comment(&self, comment: &JiraComment, needs_body: bool) -> Option<Outcome> {
        if needs_body && comment.body.trim().is_empty() {
            return Some(Outcome::BadRequest(format!(
                "comment {} has an empty body",
                comment.id
            )));
        }
        self.ctx
            .markers()
            .is_comment_echo(&comment.body)
            .then(|| Outcome::conflict(format!("comment {} was written by sync", comment.id)))
    }

    /// GitHub issue for a Jira issue: custom fields first, then the link table
    fn resolve_target(&self, issue: &JiraIssue) -> Result<Option<GitHubTarget>> {
        if let Some(target) = self.target_from_fields(issue) {
            return Ok(Some(target));
        }
        Ok(self
            .ctx
            .store
            .get_issue_link(&issue.key)?
            .map(|link| GitHubTarget {
                repository: link.target_repository,
                number: link.target_issue_number,
            }))
    }

    fn target_from_fields(&self, issue: &JiraIssue) -> Option<GitHubTarget> {
        let ids = &self.ctx.jira_settings.custom_fields;
        if ids.github_repository.is_empty() || ids.github_issue_number.is_empty() {
            return None;
        }

        let repository = issue.fields.custom_field(&ids.github_repository)?;
        let number = issue
            .fields
            .custom_field(&ids.github_issue_number)?
            .parse::<u64>()
            .ok()?;
        (!repository.is_empty()).then_some(GitHubTarget { repository, number })
    }
}

fn not_linked(key: &str) -> Outcome {
    Outcome::no_op(format!("{} is not linked to a GitHub issue", key))
}

fn lock_key(event: &JiraEvent) -> Option<String> {
    let key = match event {
        JiraEvent::IssueCreated(issue)
        | JiraEvent::IssueDeleted(issue)
        | JiraEvent::IssueUpdated { issue, .. } => &issue.key,
        JiraEvent::CommentCreated(e)
        | JiraEvent::CommentUpdated(e)
        | JiraEvent::CommentDeleted(e) => &e.issue.key,
        JiraEvent::Unhandled(_) => return None,
    };
    Some(EntityLocks::jira_key(key))
}
