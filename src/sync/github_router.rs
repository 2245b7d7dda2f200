//! GitHub event router
//!
//! Dispatches `issues` and `issue_comment` deliveries to handlers that mirror
//! the change into Jira.

use super::markers::{extract_native_key, format_mirrored_title, strip_native_key, System};
use super::outcome::{Outcome, SyncReport};
use super::reconcile::{AssigneeChange, IssueFields};
use super::{EntityLocks, SyncContext};
use crate::integrations::{GitHubComment, GitHubIssue, JiraCreateIssue, JiraFieldUpdate, UpdateIssueRequest};
use crate::store::{CommentLink, CommentRef, IssueLink};
use crate::webhook::github::{CommentEvent, GitHubEvent, IssueChanges, IssueEvent};
use crate::Result;
use std::sync::Arc;
use tracing::{debug, error, info};

/// Routes GitHub events into Jira
#[derive(Clone)]
pub struct GitHubRouter {
    ctx: Arc<SyncContext>,
}

impl GitHubRouter {
    pub fn new(ctx: Arc<SyncContext>) -> Self {
        Self { ctx }
    }

    /// Handle one event, holding the issue's lock for the duration
    pub async fn handle(&self, event: GitHubEvent) -> Outcome {
        let name = event.name().to_string();
        let _guard = match lock_key(&event) {
            Some(key) => Some(self.ctx.locks.lock(&key).await),
            None => None,
        };

        let outcome = match self.dispatch(event).await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(event = %name, error = %e, "GitHub event failed");
                Outcome::from_error(&e)
            }
        };

        info!(event = %name, outcome = outcome.label(), "GitHub event handled");
        outcome
    }

    async fn dispatch(&self, event: GitHubEvent) -> Result<Outcome> {
        match event {
            GitHubEvent::IssueOpened(e) => self.issue_opened(e).await,
            GitHubEvent::IssueEdited { event, changes } => self.issue_edited(event, changes).await,
            GitHubEvent::IssueClosed(e) => self.issue_closed(e).await,
            GitHubEvent::IssueDeleted(e) => self.issue_deleted(e).await,
            GitHubEvent::IssueLabeled {
                event,
                label,
                added,
            } => self.issue_labeled(event, label, added).await,
            GitHubEvent::IssueAssigned {
                event,
                login,
                added,
            } => self.issue_assigned(event, login, added).await,
            GitHubEvent::CommentCreated(e) => self.comment_created(e).await,
            GitHubEvent::CommentEdited(e) => self.comment_edited(e).await,
            GitHubEvent::CommentDeleted(e) => self.comment_deleted(e).await,
            GitHubEvent::Unhandled(name) => Ok(Outcome::no_op(format!("unhandled event {}", name))),
        }
    }

    async fn issue_opened(&self, e: IssueEvent) -> Result<Outcome> {
        let ctx = &self.ctx;
        let markers = ctx.markers();
        let policy = *ctx.policy();
        let labels = e.issue.label_names();

        if markers.is_issue_echo(System::GitHub, &labels) {
            return Ok(Outcome::conflict(format!(
                "{}#{} was created by sync",
                e.repository, e.issue.number
            )));
        }
        if let Some(link) = ctx.store.find_issue_link(&e.repository, e.issue.number)? {
            return Ok(Outcome::no_op(format!("already linked to {}", link.source_key)));
        }

        let mut report = SyncReport::new();

        let assignee = match e.issue.primary_assignee() {
            Some(login) if policy.assignees => {
                let account = ctx.identity.jira_account_for(login).await?;
                if account.is_none() {
                    report.skip(
                        "jira.assignee",
                        &format!("no Jira account mapped for {}", login),
                    );
                }
                account
            }
            _ => None,
        };

        let outgoing_labels = if policy.labels { labels } else { Vec::new() };
        let title = strip_native_key(&e.issue.title).to_string();
        let request = JiraCreateIssue {
            summary: title.clone(),
            description: if policy.descriptions {
                e.issue.body.clone()
            } else {
                None
            },
            labels: markers.tag_labels(&outgoing_labels, System::GitHub),
            assignee_account_id: assignee,
            custom_fields: ctx.jira_link_fields(&e.repository, e.issue.number),
        };

        let created = ctx
            .retry
            .execute("jira.create_issue", || ctx.jira.create_issue(request.clone()))
            .await?;
        report.record_success("jira.create_issue");

        ctx.store
            .save_issue_link(&IssueLink::new(&created.key, &e.repository, e.issue.number))?;
        info!(
            key = %created.key,
            repository = %e.repository,
            number = e.issue.number,
            "Mirrored GitHub issue into Jira"
        );

        let retitle = UpdateIssueRequest {
            title: Some(format_mirrored_title(&created.key, &title)),
            ..Default::default()
        };
        report
            .attempt(&ctx.retry, "github.update_title", || {
                ctx.github
                    .update_issue(&e.repository, e.issue.number, retitle.clone())
            })
            .await;

        Ok(report.into_outcome())
    }

    async fn issue_edited(&self, e: IssueEvent, changes: IssueChanges) -> Result<Outcome> {
        let Some(key) = self.resolve_jira_key(&e.repository, &e.issue).await? else {
            return Ok(not_linked(&e));
        };

        let current = IssueFields::from_github(&e.issue);
        let mut previous = current.clone();
        if let Some(title) = changes.title {
            previous.title = title.from;
        }
        if let Some(body) = changes.body {
            previous.body = Some(body.from);
        }

        self.push_to_jira(&key, &previous, &current).await
    }

    async fn issue_closed(&self, e: IssueEvent) -> Result<Outcome> {
        let ctx = &self.ctx;
        let Some(key) = self.resolve_jira_key(&e.repository, &e.issue).await? else {
            return Ok(Outcome::unprocessable(format!(
                "no Jira issue linked to {}#{}",
                e.repository, e.issue.number
            )));
        };

        let issue = ctx
            .retry
            .execute("jira.get_issue", || ctx.jira.get_issue(&key))
            .await?;
        let done = &ctx.jira_settings.done_status_name;
        if issue
            .fields
            .status_name()
            .is_some_and(|status| status.eq_ignore_ascii_case(done))
        {
            return Ok(Outcome::no_op(format!("{} is already {}", key, done)));
        }

        ctx.retry
            .execute("jira.close_issue", || ctx.jira.close_issue(&key))
            .await?;

        let mut report = SyncReport::new();
        report.record_success("jira.close_issue");
        Ok(report.into_outcome())
    }

    async fn issue_deleted(&self, e: IssueEvent) -> Result<Outcome> {
        let ctx = &self.ctx;
        let Some(key) = self.resolve_jira_key(&e.repository, &e.issue).await? else {
            return Ok(not_linked(&e));
        };

        ctx.retry
            .execute("jira.delete_issue", || ctx.jira.delete_issue(&key))
            .await?;

        let mut report = SyncReport::new();
        report.record_success("jira.delete_issue");
        Ok(report.into_outcome())
    }

    async fn issue_labeled(&self, e: IssueEvent, label: String, added: bool) -> Result<Outcome> {
        let Some(key) = self.resolve_jira_key(&e.repository, &e.issue).await? else {
            return Ok(not_linked(&e));
        };

        let current = IssueFields::from_github(&e.issue);
        let mut previous = current.clone();
        if added {
            previous.labels.retain(|l| *l != label);
        } else if !previous.labels.contains(&label) {
            previous.labels.push(label);
        }

        self.push_to_jira(&key, &previous, &current).await
    }

    async fn issue_assigned(&self, e: IssueEvent, login: String, added: bool) -> Result<Outcome> {
        let Some(key) = self.resolve_jira_key(&e.repository, &e.issue).await? else {
            return Ok(not_linked(&e));
        };

        let mut current = IssueFields::from_github(&e.issue);
        let mut previous = current.clone();
        if added {
            previous.assignee = None;
            current.assignee = Some(login);
        } else {
            current.assignee = current.assignee.filter(|a| *a != login);
            previous.assignee = Some(login);
        }

        self.push_to_jira(&key, &previous, &current).await
    }

    async fn comment_created(&self, e: CommentEvent) -> Result<Outcome> {
        let ctx = &self.ctx;
        if let Some(outcome) = self.screen_comment(&e.comment) {
            return Ok(outcome);
        }
        let Some(body) = ctx.reconciler.comment_body(&e.comment.body, System::GitHub) else {
            return Ok(Outcome::no_op("comment sync is disabled"));
        };
        if let Some(link) = ctx.store.get_comment_link(CommentRef::GitHub(e.comment.id))? {
            return Ok(Outcome::no_op(format!(
                "comment {} is already mirrored as {}",
                e.comment.id, link.comment_id_b
            )));
        }
        let Some(key) = self.resolve_jira_key(&e.repository, &e.issue).await? else {
            return Ok(Outcome::unprocessable(format!(
                "no Jira issue linked to {}#{}",
                e.repository, e.issue.number
            )));
        };

        let mirrored = ctx
            .retry
            .execute("jira.add_comment", || ctx.jira.add_comment(&key, &body))
            .await?;

        ctx.store.save_comment_link(&CommentLink {
            comment_id_a: e.comment.id,
            comment_id_b: mirrored.id.clone(),
            issue_number_a: e.issue.number,
            repository_a: e.repository.clone(),
            issue_key_b: key.clone(),
        })?;
        debug!(github_comment = e.comment.id, jira_comment = %mirrored.id, "Linked comments");

        let mut report = SyncReport::new();
        report.record_success("jira.add_comment");
        Ok(report.into_outcome())
    }

    async fn comment_edited(&self, e: CommentEvent) -> Result<Outcome> {
        let ctx = &self.ctx;
        if let Some(outcome) = self.screen_comment(&e.comment) {
            return Ok(outcome);
        }
        let Some(body) = ctx.reconciler.comment_body(&e.comment.body, System::GitHub) else {
            return Ok(Outcome::no_op("comment sync is disabled"));
        };
        let Some(link) = ctx.store.get_comment_link(CommentRef::GitHub(e.comment.id))? else {
            return Ok(Outcome::no_op(format!(
                "comment {} has no linked Jira comment",
                e.comment.id
            )));
        };

        ctx.retry
            .execute("jira.update_comment", || {
                ctx.jira
                    .update_comment(&link.issue_key_b, &link.comment_id_b, &body)
            })
            .await?;

        let mut report = SyncReport::new();
        report.record_success("jira.update_comment");
        Ok(report.into_outcome())
    }

    async fn comment_deleted(&self, e: CommentEvent) -> Result<Outcome> {
        let ctx = &self.ctx;
        if let Some(outcome) = self.screen_comment(&e.comment) {
            return Ok(outcome);
        }
        if !ctx.policy().comments {
            return Ok(Outcome::no_op("comment sync is disabled"));
        }
        let Some(link) = ctx.store.get_comment_link(CommentRef::GitHub(e.comment.id))? else {
            return Ok(Outcome::no_op(format!(
                "comment {} has no linked Jira comment",
                e.comment.id
            )));
        };

        let deleted = ctx
            .retry
            .execute("jira.delete_comment", || {
                ctx.jira.delete_comment(&link.issue_key_b, &link.comment_id_b)
            })
            .await;
        match deleted {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {
                debug!(jira_comment = %link.comment_id_b, "Jira comment already gone");
            }
            Err(e) => return Err(e),
        }
        ctx.store
            .delete_comment_link(CommentRef::GitHub(e.comment.id))?;

        let mut report = SyncReport::new();
        report.record_success("jira.delete_comment");
        Ok(report.into_outcome())
    }

    /// Conflict for comments the sync wrote itself
    fn screen_comment(&self, comment: &GitHubComment) -> Option<Outcome> {
        self.ctx
            .markers()
            .is_comment_echo(&comment.body)
            .then(|| Outcome::conflict(format!("comment {} was written by sync", comment.id)))
    }

    /// Reconcile a GitHub change and apply it to the linked Jira issue
    async fn push_to_jira(
        &self,
        key: &str,
        previous: &IssueFields,
        current: &IssueFields,
    ) -> Result<Outcome> {
        let ctx = &self.ctx;
        let update = ctx
            .reconciler
            .reconcile(previous, current, key, System::GitHub);
        if update.is_empty() {
            return Ok(Outcome::no_op("no synced field changed"));
        }

        let mut report = SyncReport::new();
        let mut fields = JiraFieldUpdate {
            summary: update.title,
            description: update.body,
            labels: update.labels,
            ..Default::default()
        };

        match update.assignee {
            Some(AssigneeChange::Assign(login)) => {
                match ctx.identity.jira_account_for(&login).await? {
                    Some(account) => fields.assignee = Some(Some(account)),
                    None => report.skip(
                        "jira.assignee",
                        &format!("no Jira account mapped for {}", login),
                    ),
                }
            }
            Some(AssigneeChange::Unassign) => fields.assignee = Some(None),
            None => {}
        }

        if !fields.is_empty() {
            report
                .attempt(&ctx.retry, "jira.update_issue", || {
                    ctx.jira.update_issue(key, fields.clone())
                })
                .await;
        }
        if update.close {
            report
                .attempt(&ctx.retry, "jira.close_issue", || ctx.jira.close_issue(key))
                .await;
        }

        Ok(report.into_outcome())
    }

    /// Jira key for a GitHub issue: title prefix, then link table, then search
    ///
    /// A key found by search is saved as a link.
    async fn resolve_jira_key(&self, repository: &str, issue: &GitHubIssue) -> Result<Option<String>> {
        if let Some(key) = extract_native_key(&issue.title) {
            return Ok(Some(key.to_string()));
        }
        if let Some(link) = self.ctx.store.find_issue_link(repository, issue.number)? {
            return Ok(Some(link.source_key));
        }

        let settings = &self.ctx.jira_settings;
        let ids = &settings.custom_fields;
        if ids.github_repository.is_empty() || ids.github_issue_number.is_empty() {
            return Ok(None);
        }

        let jql = format!(
            "project = \"{}\" AND {} ~ \"{}\" AND {} = {}",
            sanitize_jql(&settings.project),
            jql_field(&ids.github_repository),
            sanitize_jql(repository),
            jql_field(&ids.github_issue_number),
            issue.number
        );
        let found = self
            .ctx
            .retry
            .execute("jira.search", || self.ctx.jira.search(&jql, 1))
            .await?;

        match found.into_iter().next() {
            Some(jira_issue) => {
                info!(
                    key = %jira_issue.key,
                    repository = %repository,
                    number = issue.number,
                    "Recovered Jira link by search"
                );
                self.ctx.store.save_issue_link(&IssueLink::new(
                    jira_issue.key.clone(),
                    repository,
                    issue.number,
                ))?;
                Ok(Some(jira_issue.key))
            }
            None => Ok(None),
        }
    }
}

fn not_linked(e: &IssueEvent) -> Outcome {
    Outcome::no_op(format!(
        "{}#{} is not linked to a Jira issue",
        e.repository, e.issue.number
    ))
}

fn lock_key(event: &GitHubEvent) -> Option<String> {
    let (repository, number) = match event {
        GitHubEvent::IssueOpened(e) | GitHubEvent::IssueClosed(e) | GitHubEvent::IssueDeleted(e) => {
            (&e.repository, e.issue.number)
        }
        GitHubEvent::IssueEdited { event: e, .. }
        | GitHubEvent::IssueLabeled { event: e, .. }
        | GitHubEvent::IssueAssigned { event: e, .. } => (&e.repository, e.issue.number),
        GitHubEvent::CommentCreated(e)
        | GitHubEvent::CommentEdited(e)
        | GitHubEvent::CommentDeleted(e) => (&e.repository, e.issue.number),
        GitHubEvent::Unhandled(_) => return None,
    };
    Some(EntityLocks::github_key(repository, number))
}

/// `cf[N]` for numeric custom fields, a quoted name otherwise
fn jql_field(id: &str) -> String {
    match id.strip_prefix("customfield_") {
        Some(n) if !n.is_empty() && n.chars().all(|c| c.is_ascii_digit()) => format!("cf[{}]", n),
        _ => format!("\"{}\"", sanitize_jql(id)),
    }
}

/// Keep only characters that cannot break out of a JQL string literal
fn sanitize_jql(value: &str) -> String {
    value
        .chars()
        .filter(|c| c.is_alphanumeric() || matches!(c, '-' | '_' | '/' | '.' | ' '))
        .collect()
}
