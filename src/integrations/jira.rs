//! JIRA Integration Adapter
//!
//! REST API v2 client used as the Jira side of the sync. Bodies are sent as
//! plain text, which v2 accepts for descriptions and comments.

use super::{check_response, JiraClient};
use crate::config::JiraSettings;
use crate::Result;
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info};

/// Per-request timeout for search/query operations (large result sets)
const SEARCH_TIMEOUT: Duration = Duration::from_secs(30);
/// Per-request timeout for single issue fetches
const GET_TIMEOUT: Duration = Duration::from_secs(10);
/// Per-request timeout for create/update operations
const WRITE_TIMEOUT: Duration = Duration::from_secs(15);

const SYSTEM: &str = "Jira";

/// JIRA API client
pub struct JiraAdapter {
    client: Client,
    config: JiraSettings,
    base_url: String,
    auth_token: Option<String>,
}

/// JIRA issue representation
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JiraIssue {
    pub key: String,
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub fields: JiraFields,
}

/// JIRA issue fields
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JiraFields {
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub status: Option<JiraStatus>,
    #[serde(default)]
    pub labels: Vec<String>,
    #[serde(default)]
    pub assignee: Option<JiraUser>,
    /// Everything else, including `customfield_*` values
    #[serde(flatten)]
    pub extra: HashMap<String, Value>,
}

impl JiraFields {
    /// Read a custom field as text; numeric fields come back without a fraction
    pub fn custom_field(&self, id: &str) -> Option<String> {
        match self.extra.get(id)? {
            Value::String(s) if !s.is_empty() => Some(s.clone()),
            Value::Number(n) => match n.as_u64() {
                Some(int) => Some(int.to_string()),
                None => n.as_f64().map(|f| format!("{}", f.trunc() as u64)),
            },
            _ => None,
        }
    }

    pub fn status_name(&self) -> Option<&str> {
        self.status.as_ref().map(|s| s.name.as_str())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JiraStatus {
    pub name: String,
    #[serde(default)]
    pub id: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JiraUser {
    #[serde(rename = "displayName", default)]
    pub display_name: String,
    #[serde(rename = "accountId", default)]
    pub account_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JiraSearchResponse {
    pub total: u32,
    #[serde(default)]
    pub issues: Vec<JiraIssue>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JiraComment {
    pub id: String,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub author: Option<JiraUser>,
}

/// Issue creation request; project and issue type come from the adapter settings
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JiraCreateIssue {
    pub summary: String,
    pub description: Option<String>,
    pub labels: Vec<String>,
    pub assignee_account_id: Option<String>,
    pub custom_fields: Map<String, Value>,
}

/// Response to an issue creation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JiraCreatedIssue {
    pub id: String,
    pub key: String,
}

/// Sparse field update; `None` leaves a field untouched
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JiraFieldUpdate {
    pub summary: Option<String>,
    pub description: Option<String>,
    pub labels: Option<Vec<String>>,
    /// `Some(None)` unassigns
    pub assignee: Option<Option<String>>,
    pub custom_fields: Map<String, Value>,
}

impl JiraFieldUpdate {
    pub fn is_empty(&self) -> bool {
        self.summary.is_none()
            && self.description.is_none()
            && self.labels.is_none()
            && self.assignee.is_none()
            && self.custom_fields.is_empty()
    }

    /// Render as the `fields` object of an edit request
    pub fn to_fields(&self) -> Map<String, Value> {
        let mut fields = self.custom_fields.clone();
        if let Some(ref summary) = self.summary {
            fields.insert("summary".into(), json!(summary));
        }
        if let Some(ref description) = self.description {
            fields.insert("description".into(), json!(description));
        }
        if let Some(ref labels) = self.labels {
            fields.insert("labels".into(), json!(labels));
        }
        if let Some(ref assignee) = self.assignee {
            let value = match assignee {
                Some(account_id) => json!({ "accountId": account_id }),
                None => Value::Null,
            };
            fields.insert("assignee".into(), value);
        }
        fields
    }
}

#[derive(Debug, Clone, Serialize)]
struct JiraTransitionRequest {
    transition: JiraTransitionId,
}

#[derive(Debug, Clone, Serialize)]
struct JiraTransitionId {
    id: String,
}

#[derive(Debug, Clone, Serialize)]
struct JiraCommentBody<'a> {
    body: &'a str,
}

impl JiraAdapter {
    /// Create a new JIRA adapter
    ///
    /// Returns an error if the HTTP client cannot be created.
    pub fn new(config: JiraSettings) -> Result<Self> {
        let client = Client::builder().timeout(Duration::from_secs(30)).build()?;

        let base_url = format!("{}/rest/api/2", config.url.trim_end_matches('/'));
        let auth_token = config.resolve_token();

        Ok(Self {
            client,
            config,
            base_url,
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

    pub fn project(&self) -> &str {
        &self.config.project
    }

    /// Basic auth with the issuer email when configured, bearer otherwise
    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match self.auth_token {
            Some(ref token) if !self.config.issuer_email.is_empty() => {
                request.basic_auth(&self.config.issuer_email, Some(token))
            }
            Some(ref token) => request.bearer_auth(token),
            None => request,
        }
    }

    fn create_body(&self, request: &JiraCreateIssue) -> Value {
        let mut fields = request.custom_fields.clone();
        fields.insert("project".into(), json!({ "id": self.config.project_id }));
        fields.insert("issuetype".into(), json!({ "id": self.config.issue_type_id }));
        fields.insert("summary".into(), json!(request.summary));
        if let Some(ref description) = request.description {
            fields.insert("description".into(), json!(description));
        }
        if !request.labels.is_empty() {
            fields.insert("labels".into(), json!(request.labels));
        }
        if let Some(ref account_id) = request.assignee_account_id {
            fields.insert("assignee".into(), json!({ "accountId": account_id }));
        }
        json!({ "fields": fields })
    }
}

#[async_trait]
impl JiraClient for JiraAdapter {
    async fn get_issue(&self, key: &str) -> Result<JiraIssue> {
        let url = format!("{}/issue/{}", self.base_url, key);

        debug!(key = %key, "Fetching JIRA issue");

        let request = self.authorize(self.client.get(&url));
        let response = request.timeout(GET_TIMEOUT).send().await?;
        let response = check_response(SYSTEM, response).await?;

        Ok(response.json().await?)
    }

    async fn create_issue(&self, request: JiraCreateIssue) -> Result<JiraCreatedIssue> {
        let url = format!("{}/issue", self.base_url);

        info!(project = %self.config.project, summary = %request.summary, "Creating JIRA issue");

        let body = self.create_body(&request);
        let http_request = self.authorize(self.client.post(&url).json(&body));
        let response = http_request.timeout(WRITE_TIMEOUT).send().await?;
        let response = check_response(SYSTEM, response).await?;

        let created: JiraCreatedIssue = response.json().await?;
        info!(key = %created.key, "JIRA issue created");
        Ok(created)
    }

    async fn update_issue(&self, key: &str, update: JiraFieldUpdate) -> Result<()> {
        let url = format!("{}/issue/{}", self.base_url, key);

        info!(key = %key, "Updating JIRA issue");

        let body = json!({ "fields": update.to_fields() });
        let request = self.authorize(self.client.put(&url).json(&body));
        let response = request.timeout(WRITE_TIMEOUT).send().await?;
        check_response(SYSTEM, response).await?;
        Ok(())
    }

    async fn delete_issue(&self, key: &str) -> Result<()> {
        let url = format!("{}/issue/{}", self.base_url, key);

        info!(key = %key, "Deleting JIRA issue");

        let request = self.authorize(self.client.delete(&url));
        let response = request.timeout(WRITE_TIMEOUT).send().await?;
        check_response(SYSTEM, response).await?;
        Ok(())
    }

    async fn add_comment(&self, key: &str, body: &str) -> Result<JiraComment> {
        let url = format!("{}/issue/{}/comment", self.base_url, key);

        info!(key = %key, "Adding comment to JIRA issue");

        let request = self.authorize(self.client.post(&url).json(&JiraCommentBody { body }));
        let response = request.timeout(WRITE_TIMEOUT).send().await?;
        let response = check_response(SYSTEM, response).await?;
        Ok(response.json().await?)
    }

    async fn update_comment(&self, key: &str, comment_id: &str, body: &str) -> Result<JiraComment> {
        let url = format!("{}/issue/{}/comment/{}", self.base_url, key, comment_id);

        info!(key = %key, comment_id = %comment_id, "Updating JIRA comment");

        let request = self.authorize(self.client.put(&url).json(&JiraCommentBody { body }));
        let response = request.timeout(WRITE_TIMEOUT).send().await?;
        let response = check_response(SYSTEM, response).await?;
        Ok(response.json().await?)
    }

    async fn delete_comment(&self, key: &str, comment_id: &str) -> Result<()> {
        let url = format!("{}/issue/{}/comment/{}", self.base_url, key, comment_id);

        info!(key = %key, comment_id = %comment_id, "Deleting JIRA comment");

        let request = self.authorize(self.client.delete(&url));
        let response = request.timeout(WRITE_TIMEOUT).send().await?;
        check_response(SYSTEM, response).await?;
        Ok(())
    }

    async fn close_issue(&self, key: &str) -> Result<()> {
        let url = format!("{}/issue/{}/transitions", self.base_url, key);

        let body = JiraTransitionRequest {
            transition: JiraTransitionId {
                id: self.config.done_transition_id.clone(),
            },
        };

        info!(
            key = %key,
            transition_id = %self.config.done_transition_id,
            "Transitioning JIRA issue to done"
        );

        let request = self.authorize(self.client.post(&url).json(&body));
        let response = request.timeout(WRITE_TIMEOUT).send().await?;
        check_response(SYSTEM, response).await?;
        Ok(())
    }

    async fn search(&self, jql: &str, max_results: u32) -> Result<Vec<JiraIssue>> {
        let url = format!("{}/search", self.base_url);

        let fields = format!(
            "summary,description,status,labels,assignee,{},{}",
            self.config.custom_fields.github_repository,
            self.config.custom_fields.github_issue_number
        );
        let params = [
            ("jql", jql.to_string()),
            ("maxResults", max_results.to_string()),
            ("fields", fields),
        ];

        debug!(jql = %jql, max_results = %max_results, "Searching JIRA issues");

        let request = self.authorize(self.client.get(&url).query(&params));
        let response = request.timeout(SEARCH_TIMEOUT).send().await?;
        let response = check_response(SYSTEM, response).await?;

        let search_result: JiraSearchResponse = response.json().await?;
        info!(
            total = search_result.total,
            returned = search_result.issues.len(),
            "JIRA search complete"
        );
        Ok(search_result.issues)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::JiraCustomFields;

    fn test_config() -> JiraSettings {
        JiraSettings {
            url: "https://jira.example.com/".to_string(),
            project: "TEST".to_string(),
            project_id: "10000".to_string(),
            issuer_email: "bot@example.com".to_string(),
            token: Some("secret".to_string()),
            token_env: "JIRA_API_TOKEN".to_string(),
            done_transition_id: "41".to_string(),
            done_status_name: "Done".to_string(),
            issue_type_id: "10002".to_string(),
            custom_fields: JiraCustomFields {
                github_repository: "customfield_10050".to_string(),
                github_issue_number: "customfield_10051".to_string(),
            },
        }
    }

    #[test]
    fn test_adapter_creation() {
        let adapter = JiraAdapter::new(test_config()).expect("Failed to create adapter");
        assert_eq!(adapter.project(), "TEST");
        assert_eq!(adapter.base_url, "https://jira.example.com/rest/api/2");
        assert!(adapter.is_authenticated());
    }

    #[test]
    fn test_create_body_carries_settings() {
        let adapter = JiraAdapter::new(test_config()).unwrap();
        let mut custom_fields = Map::new();
        custom_fields.insert("customfield_10051".into(), json!(42));

        let body = adapter.create_body(&JiraCreateIssue {
            summary: "Fix crash".to_string(),
            description: None,
            labels: vec!["source:github".to_string()],
            assignee_account_id: Some("5b10a".to_string()),
            custom_fields,
        });

        let fields = &body["fields"];
        assert_eq!(fields["project"]["id"], "10000");
        assert_eq!(fields["issuetype"]["id"], "10002");
        assert_eq!(fields["summary"], "Fix crash");
        assert_eq!(fields["labels"][0], "source:github");
        assert_eq!(fields["assignee"]["accountId"], "5b10a");
        assert_eq!(fields["customfield_10051"], 42);
        assert!(fields.get("description").is_none());
    }

    #[test]
    fn test_field_update_rendering() {
        let update = JiraFieldUpdate {
            summary: Some("New title".to_string()),
            assignee: Some(None),
            ..Default::default()
        };

        let fields = update.to_fields();
        assert_eq!(fields["summary"], "New title");
        assert!(fields["assignee"].is_null());
        assert!(!fields.contains_key("labels"));
        assert!(JiraFieldUpdate::default().is_empty());
    }

    #[test]
    fn test_custom_field_parsing() {
        let issue: JiraIssue = serde_json::from_value(json!({
            "id": "10001",
            "key": "PROJ-1",
            "fields": {
                "summary": "Crash",
                "status": { "name": "To Do" },
                "customfield_10050": "acme/widgets",
                "customfield_10051": 42.0,
                "customfield_10052": null
            }
        }))
        .unwrap();

        assert_eq!(
            issue.fields.custom_field("customfield_10050").as_deref(),
            Some("acme/widgets")
        );
        assert_eq!(
            issue.fields.custom_field("customfield_10051").as_deref(),
            Some("42")
        );
        assert_eq!(issue.fields.custom_field("customfield_10052"), None);
        assert_eq!(issue.fields.status_name(), Some("To Do"));
    }
}
