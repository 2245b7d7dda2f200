//! GitHub Issues Integration Adapter
//!
//! REST API client for the GitHub side of the sync. Issue deletion is only
//! exposed through GraphQL, so that one call goes through the GraphQL endpoint.

use super::{check_response, GitHubClient};
use crate::config::GitHubSettings;
use crate::{Result, SyncError};
use async_trait::async_trait;
use reqwest::{header, Client, RequestBuilder};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};

/// Per-request timeout for GraphQL queries
const GRAPHQL_TIMEOUT: Duration = Duration::from_secs(30);
/// Per-request timeout for single issue fetches
const GET_TIMEOUT: Duration = Duration::from_secs(10);
/// Per-request timeout for create/update operations
const WRITE_TIMEOUT: Duration = Duration::from_secs(15);

const SYSTEM: &str = "GitHub";

/// GitHub API client
pub struct GitHubAdapter {
    client: Client,
    config: GitHubSettings,
    rest_base_url: String,
    graphql_url: String,
    auth_token: Option<String>,
}

/// GitHub issue (REST API and webhook format)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GitHubIssue {
    pub number: u64,
    #[serde(default)]
    pub id: Option<u64>,
    #[serde(default)]
    pub node_id: Option<String>,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub labels: Vec<GitHubLabel>,
    #[serde(default)]
    pub assignee: Option<GitHubUser>,
    #[serde(default)]
    pub assignees: Vec<GitHubUser>,
    #[serde(default)]
    pub user: Option<GitHubUser>,
    #[serde(default)]
    pub html_url: String,
}

impl GitHubIssue {
    pub fn label_names(&self) -> Vec<String> {
        self.labels.iter().map(|l| l.name.clone()).collect()
    }

    /// The single assignee the sync tracks
    pub fn primary_assignee(&self) -> Option<&str> {
        self.assignee
            .as_ref()
            .or_else(|| self.assignees.first())
            .map(|u| u.login.as_str())
    }

    pub fn is_closed(&self) -> bool {
        self.state.eq_ignore_ascii_case("closed")
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GitHubLabel {
    #[serde(default)]
    pub id: u64,
    pub name: String,
    #[serde(default)]
    pub color: Option<String>,
}

impl GitHubLabel {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GitHubUser {
    pub login: String,
    #[serde(default)]
    pub id: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GitHubComment {
    pub id: u64,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub user: Option<GitHubUser>,
}

/// Issue creation request
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CreateIssueRequest {
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub labels: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assignees: Option<Vec<String>>,
}

/// Issue update request
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct UpdateIssueRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub labels: Option<Vec<String>>,
}

impl UpdateIssueRequest {
    pub fn is_empty(&self) -> bool {
        self.title.is_none() && self.body.is_none() && self.state.is_none() && self.labels.is_none()
    }
}

#[derive(Debug, Clone, Serialize)]
struct CommentBody<'a> {
    body: &'a str,
}

#[derive(Debug, Clone, Serialize)]
struct LabelsBody<'a> {
    labels: &'a [String],
}

#[derive(Debug, Clone, Serialize)]
struct AssigneesBody<'a> {
    assignees: &'a [String],
}

/// GraphQL response wrapper
#[derive(Debug, Clone, Deserialize)]
struct GraphQLResponse<T> {
    data: Option<T>,
    errors: Option<Vec<GraphQLError>>,
}

#[derive(Debug, Clone, Deserialize)]
struct GraphQLError {
    message: String,
}

impl GitHubAdapter {
    /// Create a new GitHub adapter
    ///
    /// Returns an error if the HTTP client cannot be created.
    pub fn new(config: GitHubSettings) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .default_headers({
                let mut headers = header::HeaderMap::new();
                headers.insert(
                    header::USER_AGENT,
                    header::HeaderValue::from_static(concat!("tracksync/", env!("CARGO_PKG_VERSION"))),
                );
                headers.insert(
                    header::ACCEPT,
                    header::HeaderValue::from_static("application/vnd.github.v3+json"),
                );
                headers
            })
            .build()?;

        let (rest_base_url, graphql_url) = api_urls(&config.url);
        let auth_token = config.resolve_token();

        Ok(Self {
            client,
            config,
            rest_base_url,
            graphql_url,
            auth_token,
        })
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.auth_token = Some(token.into());
        self
    }

    pub fn is_authenticated(&self) -> bool {
        self.auth_token.is_some()
    }

    pub fn owner(&self) -> &str {
        &self.config.organization
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match self.auth_token {
            Some(ref token) => request.bearer_auth(token),
            None => request,
        }
    }

    /// Accept `owner/name` or a bare name under the configured owner
    fn repo_path(&self, repo: &str) -> String {
        if repo.contains('/') {
            repo.to_string()
        } else {
            format!("{}/{}", self.config.organization, repo)
        }
    }

    fn issue_url(&self, repo: &str, number: u64) -> String {
        format!(
            "{}/repos/{}/issues/{}",
            self.rest_base_url,
            self.repo_path(repo),
            number
        )
    }

    fn comment_url(&self, repo: &str, comment_id: u64) -> String {
        format!(
            "{}/repos/{}/issues/comments/{}",
            self.rest_base_url,
            self.repo_path(repo),
            comment_id
        )
    }

    /// Execute a GraphQL query
    async fn graphql<T: for<'de> Deserialize<'de>>(
        &self,
        query: &str,
        variables: serde_json::Value,
    ) -> Result<T> {
        let body = serde_json::json!({
            "query": query,
            "variables": variables,
        });

        let request = self.authorize(self.client.post(&self.graphql_url).json(&body));
        let response = request.timeout(GRAPHQL_TIMEOUT).send().await?;
        let response = check_response(SYSTEM, response).await?;

        let result: GraphQLResponse<T> = response.json().await?;
        if let Some(errors) = result.errors {
            let error_msg = errors
                .iter()
                .map(|e| e.message.clone())
                .collect::<Vec<_>>()
                .join("; ");
            return Err(SyncError::remote(
                SYSTEM,
                422,
                format!("GraphQL error: {}", error_msg),
            ));
        }
        result
            .data
            .ok_or_else(|| SyncError::Other("No data in GraphQL response".to_string()))
    }
}

fn api_urls(url: &str) -> (String, String) {
    let base_url = url.trim_end_matches('/');
    if base_url.contains("api.github.com") {
        (
            base_url.to_string(),
            "https://api.github.com/graphql".to_string(),
        )
    } else if base_url.contains("github.com") {
        (
            "https://api.github.com".to_string(),
            "https://api.github.com/graphql".to_string(),
        )
    } else {
        (
            format!("{}/api/v3", base_url),
            format!("{}/api/graphql", base_url),
        )
    }
}

#[async_trait]
impl GitHubClient for GitHubAdapter {
    async fn get_issue(&self, repo: &str, number: u64) -> Result<GitHubIssue> {
        debug!(repo = %repo, number = %number, "Fetching GitHub issue");

        let request = self.authorize(self.client.get(self.issue_url(repo, number)));
        let response = request.timeout(GET_TIMEOUT).send().await?;
        let response = check_response(SYSTEM, response).await?;
        Ok(response.json().await?)
    }

    async fn create_issue(&self, repo: &str, request: CreateIssueRequest) -> Result<GitHubIssue> {
        let url = format!("{}/repos/{}/issues", self.rest_base_url, self.repo_path(repo));

        info!(repo = %repo, title = %request.title, "Creating GitHub issue");

        let http_request = self.authorize(self.client.post(&url).json(&request));
        let response = http_request.timeout(WRITE_TIMEOUT).send().await?;
        let response = check_response(SYSTEM, response).await?;

        let issue: GitHubIssue = response.json().await?;
        info!(number = issue.number, "GitHub issue created");
        Ok(issue)
    }

    async fn update_issue(
        &self,
        repo: &str,
        number: u64,
        request: UpdateIssueRequest,
    ) -> Result<GitHubIssue> {
        info!(repo = %repo, number = %number, "Updating GitHub issue");

        let http_request =
            self.authorize(self.client.patch(self.issue_url(repo, number)).json(&request));
        let response = http_request.timeout(WRITE_TIMEOUT).send().await?;
        let response = check_response(SYSTEM, response).await?;
        Ok(response.json().await?)
    }

    async fn delete_issue(&self, repo: &str, number: u64) -> Result<()> {
        let issue = self.get_issue(repo, number).await?;
        let node_id = issue.node_id.ok_or_else(|| {
            SyncError::Other(format!("Issue {}#{} has no node id", repo, number))
        })?;

        info!(repo = %repo, number = %number, "Deleting GitHub issue");

        let _: serde_json::Value = self
            .graphql(
                "mutation($id: ID!) { deleteIssue(input: { issueId: $id }) { clientMutationId } }",
                serde_json::json!({ "id": node_id }),
            )
            .await?;
        Ok(())
    }

    async fn list_comments(&self, repo: &str, number: u64) -> Result<Vec<GitHubComment>> {
        let url = format!("{}/comments", self.issue_url(repo, number));

        let request = self.authorize(self.client.get(&url).query(&[("per_page", "100")]));
        let response = request.timeout(GET_TIMEOUT).send().await?;
        let response = check_response(SYSTEM, response).await?;
        Ok(response.json().await?)
    }

    async fn create_comment(&self, repo: &str, number: u64, body: &str) -> Result<GitHubComment> {
        let url = format!("{}/comments", self.issue_url(repo, number));

        info!(repo = %repo, number = %number, "Adding comment to GitHub issue");

        let request = self.authorize(self.client.post(&url).json(&CommentBody { body }));
        let response = request.timeout(WRITE_TIMEOUT).send().await?;
        let response = check_response(SYSTEM, response).await?;
        Ok(response.json().await?)
    }

    async fn update_comment(&self, repo: &str, comment_id: u64, body: &str) -> Result<GitHubComment> {
        info!(repo = %repo, comment_id = %comment_id, "Updating GitHub comment");

        let request = self.authorize(
            self.client
                .patch(self.comment_url(repo, comment_id))
                .json(&CommentBody { body }),
        );
        let response = request.timeout(WRITE_TIMEOUT).send().await?;
        let response = check_response(SYSTEM, response).await?;
        Ok(response.json().await?)
    }

    async fn delete_comment(&self, repo: &str, comment_id: u64) -> Result<()> {
        info!(repo = %repo, comment_id = %comment_id, "Deleting GitHub comment");

        let request = self.authorize(self.client.delete(self.comment_url(repo, comment_id)));
        let response = request.timeout(WRITE_TIMEOUT).send().await?;
        check_response(SYSTEM, response).await?;
        Ok(())
    }

    async fn replace_labels(&self, repo: &str, number: u64, labels: &[String]) -> Result<()> {
        let url = format!("{}/labels", self.issue_url(repo, number));

        debug!(repo = %repo, number = %number, count = labels.len(), "Replacing GitHub labels");

        let request = self.authorize(self.client.put(&url).json(&LabelsBody { labels }));
        let response = request.timeout(WRITE_TIMEOUT).send().await?;
        check_response(SYSTEM, response).await?;
        Ok(())
    }

    async fn add_assignees(&self, repo: &str, number: u64, logins: &[String]) -> Result<()> {
        let url = format!("{}/assignees", self.issue_url(repo, number));

        let request = self.authorize(
            self.client
                .post(&url)
                .json(&AssigneesBody { assignees: logins }),
        );
        let response = request.timeout(WRITE_TIMEOUT).send().await?;
        check_response(SYSTEM, response).await?;
        Ok(())
    }

    async fn remove_assignees(&self, repo: &str, number: u64, logins: &[String]) -> Result<()> {
        let url = format!("{}/assignees", self.issue_url(repo, number));

        let request = self.authorize(
            self.client
                .delete(&url)
                .json(&AssigneesBody { assignees: logins }),
        );
        let response = request.timeout(WRITE_TIMEOUT).send().await?;
        check_response(SYSTEM, response).await?;
        Ok(())
    }
}
