//! Assignee identity resolution
//!
//! Maps GitHub logins to Jira account ids and back. The mapping store is
//! consulted first, then the static table from configuration; static hits are
//! written to the store so later lookups skip the table.

use crate::store::{MappingStore, UserLink, UserRef};
use crate::{Result, SyncError};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Parse `login:accountId` pairs separated by `;` or `,`
///
/// Blank entries are ignored; an entry without both halves is an error.
pub fn parse_user_table(raw: &str) -> Result<Vec<(String, String)>> {
    raw.split([';', ','])
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| match entry.split_once(':') {
            Some((login, account)) if !login.trim().is_empty() && !account.trim().is_empty() => {
                Ok((login.trim().to_string(), account.trim().to_string()))
            }
            _ => Err(SyncError::Config(format!(
                "invalid user mapping entry {:?}, expected login:accountId",
                entry
            ))),
        })
        .collect()
}

/// Store-first user resolver with a static fallback table
pub struct IdentityResolver {
    store: Arc<MappingStore>,
    by_login: HashMap<String, String>,
    by_account: HashMap<String, String>,
}

impl IdentityResolver {
    pub fn new(store: Arc<MappingStore>, table: Vec<(String, String)>) -> Self {
        let by_account = table
            .iter()
            .map(|(login, account)| (account.clone(), login.clone()))
            .collect();
        Self {
            store,
            by_login: table.into_iter().collect(),
            by_account,
        }
    }

    /// Build from the raw configuration string
    pub fn from_config(store: Arc<MappingStore>, raw: &str) -> Result<Self> {
        Ok(Self::new(store, parse_user_table(raw)?))
    }

    /// Jira account id for a GitHub login
    pub async fn jira_account_for(&self, login: &str) -> Result<Option<String>> {
        if let Some(link) = self.store.get_user_link(UserRef::GitHub(login))? {
            return Ok(Some(link.account_id_b));
        }

        match self.by_login.get(login) {
            Some(account) => {
                debug!(login = %login, "Resolved GitHub user from static table");
                self.store.save_user_link(&UserLink::new(login, account.clone()))?;
                Ok(Some(account.clone()))
            }
            None => {
                warn!(login = %login, "No Jira account mapped for GitHub user");
                Ok(None)
            }
        }
    }

    /// GitHub login for a Jira account id
    pub async fn github_login_for(&self, account_id: &str) -> Result<Option<String>> {
        if let Some(link) = self.store.get_user_link(UserRef::Jira(account_id))? {
            return Ok(Some(link.username_a));
        }

        match self.by_account.get(account_id) {
            Some(login) => {
                debug!(account_id = %account_id, "Resolved Jira user from static table");
                self.store.save_user_link(&UserLink::new(login.clone(), account_id))?;
                Ok(Some(login.clone()))
            }
            None => {
                warn!(account_id = %account_id, "No GitHub login mapped for Jira account");
                Ok(None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_user_table() {
        let table = parse_user_table(" octocat:5b10a ; hubot:99ff,mona:abc ;").unwrap();
        assert_eq!(
            table,
            vec![
                ("octocat".to_string(), "5b10a".to_string()),
                ("hubot".to_string(), "99ff".to_string()),
                ("mona".to_string(), "abc".to_string()),
            ]
        );
        assert!(parse_user_table("").unwrap().is_empty());
        assert!(parse_user_table("octocat").is_err());
        assert!(parse_user_table("octocat:").is_err());
    }

    #[tokio::test]
    async fn test_static_hit_is_persisted() {
        let store = Arc::new(MappingStore::in_memory().unwrap());
        let resolver = IdentityResolver::from_config(store.clone(), "octocat:5b10a").unwrap();

        assert!(store.get_user_link(UserRef::GitHub("octocat")).unwrap().is_none());
        assert_eq!(
            resolver.jira_account_for("octocat").await.unwrap().as_deref(),
            Some("5b10a")
        );
        assert!(store.get_user_link(UserRef::GitHub("octocat")).unwrap().is_some());
    }

    #[tokio::test]
    async fn test_store_wins_over_static_table() {
        let store = Arc::new(MappingStore::in_memory().unwrap());
        store.save_user_link(&UserLink::new("octocat", "fresh")).unwrap();
        let resolver = IdentityResolver::from_config(store, "octocat:stale").unwrap();

        assert_eq!(
            resolver.jira_account_for("octocat").await.unwrap().as_deref(),
            Some("fresh")
        );
    }

    #[tokio::test]
    async fn test_reverse_lookup_and_miss() {
        let store = Arc::new(MappingStore::in_memory().unwrap());
        let resolver = IdentityResolver::from_config(store, "octocat:5b10a").unwrap();

        assert_eq!(
            resolver.github_login_for("5b10a").await.unwrap().as_deref(),
            Some("octocat")
        );
        assert!(resolver.github_login_for("nobody").await.unwrap().is_none());
        assert!(resolver.jira_account_for("hubot").await.unwrap().is_none());
    }
}
