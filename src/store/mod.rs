//! Mapping store
//!
//! Durable SQLite tables correlating identifiers across GitHub and Jira:
//! issue links, comment links, user links and processed webhook deliveries.
//! The store is the only component that writes these rows.

mod sqlite;

pub use sqlite::{MappingStore, StoreConfig, StoreStats};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A Jira issue and the GitHub issue mirroring it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssueLink {
    /// Jira native key, e.g. `PROJ-123`
    pub source_key: String,
    /// GitHub `owner/name`
    pub target_repository: String,
    pub target_issue_number: u64,
    pub created_at: DateTime<Utc>,
}

impl IssueLink {
    pub fn new(
        source_key: impl Into<String>,
        target_repository: impl Into<String>,
        target_issue_number: u64,
    ) -> Self {
        Self {
            source_key: source_key.into(),
            target_repository: target_repository.into(),
            target_issue_number,
            created_at: Utc::now(),
        }
    }
}

/// One-to-one pairing of a GitHub comment and its Jira mirror
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommentLink {
    pub comment_id_a: u64,
    pub comment_id_b: String,
    pub issue_number_a: u64,
    pub repository_a: String,
    pub issue_key_b: String,
}

/// GitHub login resolved to a Jira account id
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserLink {
    pub username_a: String,
    pub account_id_b: String,
    pub updated_at: DateTime<Utc>,
}

impl UserLink {
    pub fn new(username_a: impl Into<String>, account_id_b: impl Into<String>) -> Self {
        Self {
            username_a: username_a.into(),
            account_id_b: account_id_b.into(),
            updated_at: Utc::now(),
        }
    }
}

/// Lookup key for a comment link, from either side
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommentRef<'a> {
    GitHub(u64),
    Jira(&'a str),
}

/// Lookup key for a user link, from either side
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserRef<'a> {
    GitHub(&'a str),
    Jira(&'a str),
}
