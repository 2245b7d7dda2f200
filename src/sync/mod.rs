//! Synchronization core
//!
//! Routers receive validated webhook events, screen out echoes of our own
//! writes, reconcile changed fields, and drive the tracker clients through the
//! retry executor. Link rows are read and written only through the mapping
//! store.

pub mod github_router;
pub mod identity;
pub mod jira_router;
pub mod locks;
pub mod markers;
pub mod outcome;
pub mod reconcile;

pub use github_router::GitHubRouter;
pub use identity::IdentityResolver;
pub use jira_router::JiraRouter;
pub use locks::EntityLocks;
pub use markers::{ControlMarkers, System};
pub use outcome::{Outcome, SyncReport};
pub use reconcile::{IssueFields, IssueStatus, IssueUpdate, Reconciler};

use crate::config::{GitHubSettings, JiraSettings, SyncConfig, SyncPolicy};
use crate::integrations::{GitHubClient, JiraClient, RetryConfig, RetryExecutor};
use crate::store::MappingStore;
use crate::Result;
use serde_json::{json, Map, Value};
use std::sync::Arc;

/// Everything a router needs, built once at startup
pub struct SyncContext {
    pub github: Arc<dyn GitHubClient>,
    pub jira: Arc<dyn JiraClient>,
    pub store: Arc<MappingStore>,
    pub reconciler: Reconciler,
    pub identity: IdentityResolver,
    pub retry: RetryExecutor,
    pub locks: EntityLocks,
    pub github_settings: GitHubSettings,
    pub jira_settings: JiraSettings,
}

impl SyncContext {
    pub fn new(
        config: &SyncConfig,
        github: Arc<dyn GitHubClient>,
        jira: Arc<dyn JiraClient>,
        store: Arc<MappingStore>,
    ) -> Result<Self> {
        let identity = IdentityResolver::from_config(store.clone(), &config.user_mappings)?;

        Ok(Self {
            github,
            jira,
            store,
            reconciler: Reconciler::new(config.sync, config.markers.clone()),
            identity,
            retry: RetryExecutor::new(RetryConfig::from(&config.retry)),
            locks: EntityLocks::new(),
            github_settings: config.github.clone(),
            jira_settings: config.jira.clone(),
        })
    }

    /// Replace the retry executor (tests use short backoffs)
    pub fn with_retry(mut self, retry: RetryExecutor) -> Self {
        self.retry = retry;
        self
    }

    pub fn markers(&self) -> &ControlMarkers {
        self.reconciler.markers()
    }

    pub fn policy(&self) -> &SyncPolicy {
        self.reconciler.policy()
    }

    /// Jira custom field values pointing at a GitHub issue
    pub fn jira_link_fields(&self, repository: &str, number: u64) -> Map<String, Value> {
        let ids = &self.jira_settings.custom_fields;
        let mut fields = Map::new();
        if !ids.github_repository.is_empty() {
            fields.insert(ids.github_repository.clone(), json!(repository));
        }
        if !ids.github_issue_number.is_empty() {
            fields.insert(ids.github_issue_number.clone(), json!(number));
        }
        fields
    }
}
