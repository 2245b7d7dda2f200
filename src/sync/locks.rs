//! Per-entity serialization of webhook processing
//!
//! Two deliveries touching the same issue are handled one after the other.
//! Entries are weak so idle keys do not accumulate.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::trace;

/// Guard held for the duration of one event
pub type EntityGuard = OwnedMutexGuard<()>;

/// Keyed async mutexes
#[derive(Debug, Default)]
pub struct EntityLocks {
    locks: Mutex<HashMap<String, Weak<AsyncMutex<()>>>>,
}

impl EntityLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Key for a GitHub issue
    pub fn github_key(repository: &str, number: u64) -> String {
        format!("github:{}#{}", repository, number)
    }

    /// Key for a Jira issue
    pub fn jira_key(key: &str) -> String {
        format!("jira:{}", key)
    }

    /// Wait for exclusive access to `key`
    pub async fn lock(&self, key: &str) -> EntityGuard {
        let mutex = {
            let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
            locks.retain(|_, weak| weak.strong_count() > 0);
            match locks.get(key).and_then(Weak::upgrade) {
                Some(existing) => existing,
                None => {
                    let fresh = Arc::new(AsyncMutex::new(()));
                    locks.insert(key.to_string(), Arc::downgrade(&fresh));
                    fresh
                }
            }
        };

        trace!(key = %key, "Acquiring entity lock");
        mutex.lock_owned().await
    }

    /// Number of keys currently held or awaited
    pub fn active(&self) -> usize {
        let locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        locks.values().filter(|w| w.strong_count() > 0).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_same_key_is_serialized() {
        let locks = Arc::new(EntityLocks::new());
        let order = Arc::new(Mutex::new(Vec::new()));

        let guard = locks.lock("jira:PROJ-1").await;

        let task = {
            let locks = locks.clone();
            let order = order.clone();
            tokio::spawn(async move {
                let _guard = locks.lock("jira:PROJ-1").await;
                order.lock().unwrap().push("second");
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        order.lock().unwrap().push("first");
        drop(guard);
        task.await.unwrap();

        assert_eq!(*order.lock().unwrap(), vec!["first", "second"]);
    }

    #[tokio::test]
    async fn test_different_keys_do_not_block() {
        let locks = EntityLocks::new();
        let _a = locks.lock(&EntityLocks::jira_key("PROJ-1")).await;
        let _b = locks.lock(&EntityLocks::github_key("acme/widgets", 42)).await;
        assert_eq!(locks.active(), 2);
    }

    #[tokio::test]
    async fn test_released_keys_are_dropped() {
        let locks = EntityLocks::new();
        drop(locks.lock("jira:PROJ-1").await);
        assert_eq!(locks.active(), 0);
    }
}
