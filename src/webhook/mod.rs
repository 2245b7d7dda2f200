//! Inbound webhook payloads
//!
//! Boundary decoding of native tracker deliveries into tagged event variants.

pub mod github;
pub mod jira;

pub use github::{CommentEvent, GitHubEvent, IssueEvent};
pub use jira::{JiraCommentEvent, JiraEvent};
