//! Configuration system
//!
//! Loads `config.yaml` (or the environment) with support for:
//! - GitHub and Jira connection settings
//! - Sync policy switches
//! - Control markers used for loop prevention
//! - Retry, server and database settings
//! - A static GitHub login to Jira account id table

mod sync_config;
pub mod validation;

pub use sync_config::{
    DatabaseSettings, GitHubSettings, JiraCustomFields, JiraSettings, RetrySettings,
    ServerSettings, SyncConfig, SyncPolicy,
};
pub use validation::{validate_config, validate_config_result, ValidationError};
