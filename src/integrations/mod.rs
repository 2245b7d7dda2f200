//! External Integrations
//!
//! Tracker clients used by the sync routers, plus the retry executor that
//! wraps every remote call.
//!
//! # Overview
//!
//! The routers only see the [`GitHubClient`] and [`JiraClient`] traits. The
//! REST adapters in [`github`] and [`jira`] are the production
//! implementations; tests substitute in-memory fakes.
//!
//! Every adapter call fails with a [`SyncError`] that carries the HTTP status
//! when the tracker answered, so the retry executor can classify it.

pub mod github;
pub mod jira;
pub mod retry;

use crate::{Result, SyncError};
use async_trait::async_trait;
use reqwest::{Response, StatusCode};

// GitHub exports
pub use github::{
    CreateIssueRequest, GitHubAdapter, GitHubComment, GitHubIssue, GitHubLabel, GitHubUser,
    UpdateIssueRequest,
};

// JIRA exports
pub use jira::{
    JiraAdapter, JiraComment, JiraCreateIssue, JiraCreatedIssue, JiraFieldUpdate, JiraFields,
    JiraIssue, JiraStatus, JiraUser,
};

// Retry exports
pub use retry::{RetryAttempt, RetryConfig, RetryDecision, RetryExecutor, RetryableError};

/// Issue tracker A: GitHub Issues
///
/// `repo` is always `owner/name`.
#[async_trait]
pub trait GitHubClient: Send + Sync {
    async fn get_issue(&self, repo: &str, number: u64) -> Result<GitHubIssue>;

    async fn create_issue(&self, repo: &str, request: CreateIssueRequest) -> Result<GitHubIssue>;

    async fn update_issue(
        &self,
        repo: &str,
        number: u64,
        request: UpdateIssueRequest,
    ) -> Result<GitHubIssue>;

    async fn delete_issue(&self, repo: &str, number: u64) -> Result<()>;

    async fn list_comments(&self, repo: &str, number: u64) -> Result<Vec<GitHubComment>>;

    async fn create_comment(&self, repo: &str, number: u64, body: &str) -> Result<GitHubComment>;

    async fn update_comment(&self, repo: &str, comment_id: u64, body: &str)
        -> Result<GitHubComment>;

    async fn delete_comment(&self, repo: &str, comment_id: u64) -> Result<()>;

    /// Replace the full label set of an issue
    async fn replace_labels(&self, repo: &str, number: u64, labels: &[String]) -> Result<()>;

    async fn add_assignees(&self, repo: &str, number: u64, logins: &[String]) -> Result<()>;

    async fn remove_assignees(&self, repo: &str, number: u64, logins: &[String]) -> Result<()>;
}

/// Issue tracker B: Jira
#[async_trait]
pub trait JiraClient: Send + Sync {
    async fn get_issue(&self, key: &str) -> Result<JiraIssue>;

    async fn create_issue(&self, request: JiraCreateIssue) -> Result<JiraCreatedIssue>;

    async fn update_issue(&self, key: &str, update: JiraFieldUpdate) -> Result<()>;

    async fn delete_issue(&self, key: &str) -> Result<()>;

    async fn add_comment(&self, key: &str, body: &str) -> Result<JiraComment>;

    async fn update_comment(&self, key: &str, comment_id: &str, body: &str)
        -> Result<JiraComment>;

    async fn delete_comment(&self, key: &str, comment_id: &str) -> Result<()>;

    /// Apply the configured "done" transition
    async fn close_issue(&self, key: &str) -> Result<()>;

    /// Search issues with JQL
    async fn search(&self, jql: &str, max_results: u32) -> Result<Vec<JiraIssue>>;
}

/// Pass successful responses through, turn everything else into a status-carrying error
pub(crate) async fn check_response(system: &'static str, response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    if status == StatusCode::TOO_MANY_REQUESTS {
        let retry_after = response
            .headers()
            .get("Retry-After")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok());
        return Err(SyncError::RateLimited {
            system,
            retry_after,
        });
    }

    let error_body = response.text().await.unwrap_or_default();
    Err(SyncError::remote(system, status.as_u16(), error_body))
}
