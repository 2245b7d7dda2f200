//! Tracksync configuration file handling
//!
//! Loads `config.yaml` when present and falls back to environment variables
//! otherwise. The resulting [`SyncConfig`] is built once at startup and handed
//! to every component by reference.

use crate::sync::markers::ControlMarkers;
use crate::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// GitHub (System A) settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitHubSettings {
    /// GitHub instance URL (e.g., "https://github.com" or an Enterprise host)
    #[serde(default = "default_github_url")]
    pub url: String,

    /// Inline API token (prefer `token_env`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,

    /// Environment variable holding the API token
    #[serde(default = "default_github_token_env")]
    pub token_env: String,

    /// Organization or user owning the synced repositories
    pub organization: String,

    /// Repository that receives issues created in Jira
    pub repository: String,
}

fn default_github_url() -> String {
    "https://github.com".to_string()
}

fn default_github_token_env() -> String {
    "GITHUB_TOKEN".to_string()
}

impl GitHubSettings {
    /// Token from the inline value or the configured environment variable
    pub fn resolve_token(&self) -> Option<String> {
        self.token
            .clone()
            .or_else(|| std::env::var(self.token_env.trim_start_matches('$')).ok())
    }

    /// `owner/name` of the default repository
    pub fn default_repository(&self) -> String {
        if self.repository.contains('/') {
            self.repository.clone()
        } else {
            format!("{}/{}", self.organization, self.repository)
        }
    }
}

/// Ids of the Jira custom fields that hold the GitHub cross-reference
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JiraCustomFields {
    /// e.g. `customfield_10050`
    pub github_repository: String,
    pub github_issue_number: String,
}

/// Jira (System B) settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JiraSettings {
    /// Jira instance URL
    pub url: String,

    /// Jira project key
    pub project: String,

    /// Numeric project id used when creating issues
    pub project_id: String,

    /// Account email used for basic authentication
    #[serde(default)]
    pub issuer_email: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,

    #[serde(default = "default_jira_token_env")]
    pub token_env: String,

    #[serde(default = "default_done_transition_id")]
    pub done_transition_id: String,

    #[serde(default = "default_done_status_name")]
    pub done_status_name: String,

    #[serde(default = "default_issue_type_id")]
    pub issue_type_id: String,

    #[serde(default)]
    pub custom_fields: JiraCustomFields,
}

fn default_jira_token_env() -> String {
    "JIRA_API_TOKEN".to_string()
}

fn default_done_transition_id() -> String {
    "41".to_string()
}

fn default_done_status_name() -> String {
    "Done".to_string()
}

fn default_issue_type_id() -> String {
    // "Task" in a default Jira Cloud project
    "10002".to_string()
}

impl JiraSettings {
    pub fn resolve_token(&self) -> Option<String> {
        self.token
            .clone()
            .or_else(|| std::env::var(self.token_env.trim_start_matches('$')).ok())
    }
}

/// Switches deciding which field edits propagate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncPolicy {
    #[serde(default = "enabled")]
    pub descriptions: bool,
    #[serde(default = "enabled")]
    pub labels: bool,
    #[serde(default = "enabled")]
    pub assignees: bool,
    #[serde(default)]
    pub attachments: bool,
    #[serde(default = "enabled")]
    pub comments: bool,
}

fn enabled() -> bool {
    true
}

impl Default for SyncPolicy {
    fn default() -> Self {
        Self {
            descriptions: true,
            labels: true,
            assignees: true,
            attachments: false,
            comments: true,
        }
    }
}

/// Retry settings for remote calls
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrySettings {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,

    /// Upper bound for any single delay, including a tracker's `Retry-After`
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Spread each delay by up to 25%
    #[serde(default)]
    pub jitter: bool,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_delay_ms() -> u64 {
    1000
}

fn default_max_delay_ms() -> u64 {
    4000
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            jitter: false,
        }
    }
}

/// HTTP server settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Request body size limit in bytes
    #[serde(default = "default_max_body_size")]
    pub max_body_size: usize,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8000
}

fn default_max_body_size() -> usize {
    5 * 1024 * 1024
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            max_body_size: default_max_body_size(),
        }
    }
}

impl ServerSettings {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Mapping store location
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseSettings {
    #[serde(default = "default_database_path")]
    pub path: PathBuf,

    /// Enable WAL mode so readers never block the writer
    #[serde(default = "enabled")]
    pub wal_mode: bool,
}

fn default_database_path() -> PathBuf {
    // Always use ~/.config for consistency across platforms (macOS, Linux)
    let mut path = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
    path.push(".config");
    path.push("tracksync");
    path.push("tracksync.db");
    path
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            path: default_database_path(),
            wal_mode: true,
        }
    }
}

/// Complete tracksync configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    pub github: GitHubSettings,

    pub jira: JiraSettings,

    #[serde(default)]
    pub sync: SyncPolicy,

    #[serde(default)]
    pub markers: ControlMarkers,

    #[serde(default)]
    pub retry: RetrySettings,

    #[serde(default)]
    pub server: ServerSettings,

    #[serde(default)]
    pub database: DatabaseSettings,

    /// Static `githubLogin:jiraAccountId` pairs separated by `;` or `,`
    #[serde(default)]
    pub user_mappings: String,
}

impl SyncConfig {
    /// Load configuration from a YAML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(crate::SyncError::Config(format!(
                "Config file not found: {}",
                path.display()
            )));
        }

        tracing::info!(path = %path.display(), "Loading tracksync configuration");

        let content = fs::read_to_string(path)?;
        let config: Self = serde_yaml::from_str(&content)?;

        tracing::debug!(
            organization = %config.github.organization,
            project = %config.jira.project,
            "Configuration loaded successfully"
        );

        Ok(config)
    }

    /// Load from `path` when it exists, else from the process environment
    pub fn load_or_env(path: Option<&Path>) -> Result<Self> {
        let path = path
            .map(Path::to_path_buf)
            .unwrap_or_else(Self::default_path);
        if path.exists() {
            Self::load(&path)
        } else {
            tracing::info!(
                path = %path.display(),
                "No config file, reading configuration from environment"
            );
            Ok(Self::from_env())
        }
    }

    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a configuration from an environment-like lookup
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |key: &str| lookup(key).unwrap_or_default();
        let get_or = |key: &str, default: String| lookup(key).unwrap_or(default);

        let server = ServerSettings {
            port: lookup("PORT")
                .and_then(|p| p.parse().ok())
                .unwrap_or_else(default_port),
            ..Default::default()
        };

        let database = DatabaseSettings {
            path: lookup("DATABASE_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(default_database_path),
            ..Default::default()
        };

        Self {
            github: GitHubSettings {
                url: get_or("GITHUB_URL", default_github_url()),
                token: lookup("GITHUB_TOKEN"),
                token_env: default_github_token_env(),
                organization: get("GITHUB_ORGANIZATION"),
                repository: get("GITHUB_REPOSITORY"),
            },
            jira: JiraSettings {
                url: get("JIRA_HOST"),
                project: get("JIRA_PROJECT"),
                project_id: get("JIRA_PROJECT_ID"),
                issuer_email: get("JIRA_ISSUER_EMAIL"),
                token: lookup("JIRA_API_TOKEN"),
                token_env: default_jira_token_env(),
                done_transition_id: get_or("JIRA_DONE_TRANSITION_ID", default_done_transition_id()),
                done_status_name: get_or("JIRA_DONE_STATUS_NAME", default_done_status_name()),
                issue_type_id: get_or("JIRA_DEFAULT_ISSUE_TYPE_ID", default_issue_type_id()),
                custom_fields: JiraCustomFields {
                    github_repository: get("JIRA_CUSTOM_GITHUB_REPOSITORY_FIELD"),
                    github_issue_number: get("JIRA_CUSTOM_GITHUB_ISSUE_NUMBER_FIELD"),
                },
            },
            sync: SyncPolicy::default(),
            markers: ControlMarkers::default(),
            retry: RetrySettings::default(),
            server,
            database,
            user_mappings: get("USER_MAPPINGS"),
        }
    }

    /// Save configuration to a specific path
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        tracing::info!(path = %path.display(), "Saving tracksync configuration");

        let yaml = serde_yaml::to_string(self)?;
        fs::write(path, yaml)?;

        Ok(())
    }

    /// `config.yaml` in the working directory
    pub fn default_path() -> PathBuf {
        PathBuf::from("config.yaml")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::NamedTempFile;

    const MINIMAL_YAML: &str = r#"
github:
  organization: acme
  repository: widgets
jira:
  url: https://acme.atlassian.net
  project: PROJ
  project_id: "10000"
  custom_fields:
    github_repository: customfield_10050
    github_issue_number: customfield_10051
"#;

    #[test]
    fn test_minimal_yaml_gets_defaults() {
        let config: SyncConfig = serde_yaml::from_str(MINIMAL_YAML).unwrap();

        assert_eq!(config.github.url, "https://github.com");
        assert_eq!(config.github.token_env, "GITHUB_TOKEN");
        assert_eq!(config.jira.done_transition_id, "41");
        assert_eq!(config.jira.done_status_name, "Done");
        assert_eq!(config.sync, SyncPolicy::default());
        assert!(!config.sync.attachments);
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.retry.initial_delay_ms, 1000);
        assert_eq!(config.server.port, 8000);
        assert_eq!(config.markers.label_from_github, "source:github");
    }

    #[test]
    fn test_policy_overrides() {
        let yaml = format!("{}sync:\n  labels: false\n  attachments: true\n", MINIMAL_YAML);
        let config: SyncConfig = serde_yaml::from_str(&yaml).unwrap();

        assert!(!config.sync.labels);
        assert!(config.sync.attachments);
        assert!(config.sync.comments);
    }

    #[test]
    fn test_default_repository() {
        let config: SyncConfig = serde_yaml::from_str(MINIMAL_YAML).unwrap();
        assert_eq!(config.github.default_repository(), "acme/widgets");

        let mut settings = config.github.clone();
        settings.repository = "other/repo".to_string();
        assert_eq!(settings.default_repository(), "other/repo");
    }

    #[test]
    fn test_save_and_load() {
        let temp_file = NamedTempFile::new().unwrap();
        let config: SyncConfig = serde_yaml::from_str(MINIMAL_YAML).unwrap();

        config.save(temp_file.path()).unwrap();
        let loaded = SyncConfig::load(temp_file.path()).unwrap();

        assert_eq!(loaded.github.organization, "acme");
        assert_eq!(loaded.jira.custom_fields.github_issue_number, "customfield_10051");
    }

    #[test]
    fn test_load_missing_file() {
        let result = SyncConfig::load("/nonexistent/config.yaml");
        assert!(result.is_err());
    }

    #[test]
    fn test_from_lookup() {
        let env: HashMap<&str, &str> = [
            ("GITHUB_ORGANIZATION", "acme"),
            ("GITHUB_REPOSITORY", "widgets"),
            ("JIRA_HOST", "https://acme.atlassian.net"),
            ("JIRA_PROJECT", "PROJ"),
            ("JIRA_DONE_STATUS_NAME", "Closed"),
            ("PORT", "9090"),
            ("USER_MAPPINGS", "octocat:5b10a"),
        ]
        .into_iter()
        .collect();

        let config = SyncConfig::from_lookup(|k| env.get(k).map(|v| v.to_string()));

        assert_eq!(config.github.organization, "acme");
        assert_eq!(config.jira.done_status_name, "Closed");
        assert_eq!(config.jira.done_transition_id, "41");
        assert_eq!(config.server.port, 9090);
        assert_eq!(config.user_mappings, "octocat:5b10a");
    }
}
