//! SQLite mapping store implementation

use super::{CommentLink, CommentRef, IssueLink, UserLink, UserRef};
use crate::{Result, SyncError};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

/// How long a delivery id is remembered for redelivery detection
const DELIVERY_RETENTION_DAYS: i64 = 7;

/// Mapping store configuration
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Path to SQLite database file
    pub path: PathBuf,

    /// Enable WAL mode so readers do not block the writer
    pub wal_mode: bool,
}

impl From<&crate::config::DatabaseSettings> for StoreConfig {
    fn from(settings: &crate::config::DatabaseSettings) -> Self {
        Self {
            path: settings.path.clone(),
            wal_mode: settings.wal_mode,
        }
    }
}

/// SQLite-backed store for cross-system identity pairs
pub struct MappingStore {
    conn: Mutex<Connection>,
}

impl std::fmt::Debug for MappingStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MappingStore").finish_non_exhaustive()
    }
}

impl MappingStore {
    /// Open or create a mapping database
    pub fn open(config: &StoreConfig) -> Result<Self> {
        if let Some(parent) = config.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        tracing::info!(path = %config.path.display(), "Opening mapping store");

        let conn = Connection::open(&config.path)?;
        if config.wal_mode {
            conn.pragma_update(None, "journal_mode", "WAL")?;
        }

        Self::with_connection(conn)
    }

    /// Open a file-backed store with default settings
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        Self::open(&StoreConfig {
            path: path.as_ref().to_path_buf(),
            wal_mode: true,
        })
    }

    /// Create a store backed by an in-memory database
    pub fn in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    /// Create tables if absent; safe to run on every startup
    pub fn init_schema(&self) -> Result<()> {
        self.conn()?.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS issue_links (
                source_key TEXT PRIMARY KEY,
                target_repository TEXT NOT NULL,
                target_issue_number INTEGER NOT NULL,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS comment_links (
                comment_id_a INTEGER PRIMARY KEY,
                comment_id_b TEXT NOT NULL,
                issue_number_a INTEGER NOT NULL,
                repository_a TEXT NOT NULL,
                issue_key_b TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS user_links (
                username_a TEXT PRIMARY KEY,
                account_id_b TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS processed_deliveries (
                delivery_id TEXT PRIMARY KEY,
                source TEXT NOT NULL,
                processed_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_issue_links_target
                ON issue_links(target_repository, target_issue_number);
            CREATE INDEX IF NOT EXISTS idx_comment_links_b ON comment_links(comment_id_b);
            CREATE INDEX IF NOT EXISTS idx_user_links_b ON user_links(account_id_b);
            "#,
        )?;
        Ok(())
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| SyncError::Storage("mapping store connection poisoned".to_string()))
    }

    // Issue links

    pub fn save_issue_link(&self, link: &IssueLink) -> Result<()> {
        self.conn()?.execute(
            r#"
            INSERT OR REPLACE INTO issue_links
                (source_key, target_repository, target_issue_number, created_at)
            VALUES (?1, ?2, ?3, ?4)
            "#,
            params![
                link.source_key,
                link.target_repository,
                link.target_issue_number as i64,
                link.created_at.to_rfc3339(),
            ],
        )?;
        tracing::debug!(
            key = %link.source_key,
            repository = %link.target_repository,
            number = link.target_issue_number,
            "Saved issue link"
        );
        Ok(())
    }

    pub fn get_issue_link(&self, source_key: &str) -> Result<Option<IssueLink>> {
        let row = self
            .conn()?
            .query_row(
                "SELECT source_key, target_repository, target_issue_number, created_at
                 FROM issue_links WHERE source_key = ?1",
                [source_key],
                issue_row,
            )
            .optional()?;
        row.map(IssueRow::into_link).transpose()
    }

    /// Reverse lookup by the GitHub side of the pair
    pub fn find_issue_link(&self, repository: &str, number: u64) -> Result<Option<IssueLink>> {
        let row = self
            .conn()?
            .query_row(
                "SELECT source_key, target_repository, target_issue_number, created_at
                 FROM issue_links
                 WHERE target_repository = ?1 AND target_issue_number = ?2
                 ORDER BY created_at DESC LIMIT 1",
                params![repository, number as i64],
                issue_row,
            )
            .optional()?;
        row.map(IssueRow::into_link).transpose()
    }

    // Comment links

    pub fn save_comment_link(&self, link: &CommentLink) -> Result<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        // one row per Jira comment as well
        tx.execute(
            "DELETE FROM comment_links WHERE comment_id_b = ?1 AND comment_id_a != ?2",
            params![link.comment_id_b, link.comment_id_a as i64],
        )?;
        tx.execute(
            r#"
            INSERT OR REPLACE INTO comment_links
                (comment_id_a, comment_id_b, issue_number_a, repository_a, issue_key_b)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
            params![
                link.comment_id_a as i64,
                link.comment_id_b,
                link.issue_number_a as i64,
                link.repository_a,
                link.issue_key_b,
            ],
        )?;
        tx.commit()?;
        Ok(())
    }

    pub fn get_comment_link(&self, by: CommentRef<'_>) -> Result<Option<CommentLink>> {
        const COLUMNS: &str =
            "SELECT comment_id_a, comment_id_b, issue_number_a, repository_a, issue_key_b FROM comment_links";
        let conn = self.conn()?;
        let link = match by {
            CommentRef::GitHub(id) => conn
                .query_row(
                    &format!("{} WHERE comment_id_a = ?1", COLUMNS),
                    [id as i64],
                    comment_row,
                )
                .optional()?,
            CommentRef::Jira(id) => conn
                .query_row(
                    &format!("{} WHERE comment_id_b = ?1", COLUMNS),
                    [id],
                    comment_row,
                )
                .optional()?,
        };
        Ok(link)
    }

    /// Remove a comment link; returns whether a row existed
    pub fn delete_comment_link(&self, by: CommentRef<'_>) -> Result<bool> {
        let conn = self.conn()?;
        let removed = match by {
            CommentRef::GitHub(id) => conn.execute(
                "DELETE FROM comment_links WHERE comment_id_a = ?1",
                [id as i64],
            )?,
            CommentRef::Jira(id) => {
                conn.execute("DELETE FROM comment_links WHERE comment_id_b = ?1", [id])?
            }
        };
        Ok(removed > 0)
    }

    // User links

    pub fn save_user_link(&self, link: &UserLink) -> Result<()> {
        self.conn()?.execute(
            r#"
            INSERT OR REPLACE INTO user_links (username_a, account_id_b, updated_at)
            VALUES (?1, ?2, ?3)
            "#,
            params![link.username_a, link.account_id_b, link.updated_at.to_rfc3339()],
        )?;
        Ok(())
    }

    pub fn get_user_link(&self, by: UserRef<'_>) -> Result<Option<UserLink>> {
        let conn = self.conn()?;
        let (sql, key) = match by {
            UserRef::GitHub(login) => (
                "SELECT username_a, account_id_b, updated_at FROM user_links WHERE username_a = ?1",
                login,
            ),
            UserRef::Jira(account) => (
                "SELECT username_a, account_id_b, updated_at FROM user_links
                 WHERE account_id_b = ?1 ORDER BY updated_at DESC LIMIT 1",
                account,
            ),
        };
        let row = conn
            .query_row(sql, [key], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                ))
            })
            .optional()?;

        row.map(|(username_a, account_id_b, updated_at)| {
            Ok(UserLink {
                username_a,
                account_id_b,
                updated_at: parse_timestamp(&updated_at)?,
            })
        })
        .transpose()
    }

    // Webhook deliveries

    pub fn is_delivery_processed(&self, delivery_id: &str) -> Result<bool> {
        let found: Option<i64> = self
            .conn()?
            .query_row(
                "SELECT 1 FROM processed_deliveries WHERE delivery_id = ?1",
                [delivery_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    /// Record a handled delivery and forget ids past the retention window
    pub fn mark_delivery_processed(&self, delivery_id: &str, source: &str) -> Result<()> {
        let now = Utc::now();
        let cutoff = now - chrono::Duration::days(DELIVERY_RETENTION_DAYS);

        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT OR REPLACE INTO processed_deliveries (delivery_id, source, processed_at)
             VALUES (?1, ?2, ?3)",
            params![delivery_id, source, now.to_rfc3339()],
        )?;
        let pruned = tx.execute(
            "DELETE FROM processed_deliveries WHERE processed_at < ?1",
            [cutoff.to_rfc3339()],
        )?;
        tx.commit()?;

        if pruned > 0 {
            tracing::debug!(pruned = pruned, "Pruned expired delivery ids");
        }
        Ok(())
    }

    /// Row counts per table, for `init-db` reporting
    pub fn stats(&self) -> Result<StoreStats> {
        let conn = self.conn()?;
        let count = |table: &str| -> Result<usize> {
            let n: i64 =
                conn.query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| {
                    row.get(0)
                })?;
            Ok(n as usize)
        };
        Ok(StoreStats {
            issue_links: count("issue_links")?,
            comment_links: count("comment_links")?,
            user_links: count("user_links")?,
            processed_deliveries: count("processed_deliveries")?,
        })
    }
}

/// Mapping store statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreStats {
    pub issue_links: usize,
    pub comment_links: usize,
    pub user_links: usize,
    pub processed_deliveries: usize,
}

struct IssueRow {
    source_key: String,
    target_repository: String,
    target_issue_number: i64,
    created_at: String,
}

impl IssueRow {
    fn into_link(self) -> Result<IssueLink> {
        Ok(IssueLink {
            source_key: self.source_key,
            target_repository: self.target_repository,
            target_issue_number: self.target_issue_number as u64,
            created_at: parse_timestamp(&self.created_at)?,
        })
    }
}

fn issue_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<IssueRow> {
    Ok(IssueRow {
        source_key: row.get(0)?,
        target_repository: row.get(1)?,
        target_issue_number: row.get(2)?,
        created_at: row.get(3)?,
    })
}

fn comment_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<CommentLink> {
    Ok(CommentLink {
        comment_id_a: row.get::<_, i64>(0)? as u64,
        comment_id_b: row.get(1)?,
        issue_number_a: row.get::<_, i64>(2)? as u64,
        repository_a: row.get(3)?,
        issue_key_b: row.get(4)?,
    })
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| SyncError::Storage(format!("invalid timestamp {:?}: {}", value, e)))
}
