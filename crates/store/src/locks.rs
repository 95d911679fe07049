//! Named lock map guarding racy creation paths.
//!
//! The one mandated use is project creation: the key
//! `project_creation:{user_id}:{name}` serializes concurrent creations of
//! the same project so exactly one writer reaches the repository first.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Build the creation lock key for a project. Names compare
/// case-insensitively, matching the repository's duplicate check.
pub fn project_creation_key(user_id: &str, name: &str) -> String {
    format!("project_creation:{user_id}:{}", name.to_lowercase())
}

/// Manages per-key exclusive locks. Each key maps to a `Semaphore(1)`;
/// the returned permit releases on drop, covering every exit path.
pub struct NamedLockMap {
    locks: Mutex<HashMap<String, Arc<Semaphore>>>,
}

impl Default for NamedLockMap {
    fn default() -> Self {
        Self::new()
    }
}

impl NamedLockMap {
    pub fn new() -> Self {
        Self {
            locks: Mutex::new(HashMap::new()),
        }
    }

    fn semaphore(&self, key: &str) -> Arc<Semaphore> {
        let mut locks = self.locks.lock();
        locks
            .entry(key.to_owned())
            .or_insert_with(|| Arc::new(Semaphore::new(1)))
            .clone()
    }

    /// Acquire the lock for a key, waiting FIFO behind current holders.
    pub async fn acquire(&self, key: &str) -> OwnedSemaphorePermit {
        let sem = self.semaphore(key);
        // The semaphore is never closed, so acquisition only fails if the
        // map entry were dropped mid-wait — which prune_idle avoids by
        // retaining held entries.
        loop {
            match sem.clone().acquire_owned().await {
                Ok(permit) => return permit,
                Err(_) => tokio::task::yield_now().await,
            }
        }
    }

    /// Acquire without waiting. `None` when another holder is active.
    pub fn try_acquire(&self, key: &str) -> Option<OwnedSemaphorePermit> {
        self.semaphore(key).try_acquire_owned().ok()
    }

    /// Number of tracked keys (for monitoring).
    pub fn key_count(&self) -> usize {
        self.locks.lock().len()
    }

    /// Drop map entries whose lock is not currently held.
    pub fn prune_idle(&self) {
        let mut locks = self.locks.lock();
        locks.retain(|_, sem| sem.available_permits() == 0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_format() {
        assert_eq!(
            project_creation_key("u1", "Acme Intel"),
            "project_creation:u1:acme intel"
        );
    }

    #[tokio::test]
    async fn exclusive_within_key() {
        let map = NamedLockMap::new();
        let key = project_creation_key("u1", "intel");

        let held = map.acquire(&key).await;
        assert!(map.try_acquire(&key).is_none());
        drop(held);
        assert!(map.try_acquire(&key).is_some());
    }

    #[tokio::test]
    async fn independent_keys_do_not_contend() {
        let map = NamedLockMap::new();
        let a = map.acquire("project_creation:u1:a").await;
        let b = map.acquire("project_creation:u1:b").await;
        assert_eq!(map.key_count(), 2);
        drop(a);
        drop(b);
    }

    #[tokio::test]
    async fn waiter_proceeds_after_release() {
        let map = Arc::new(NamedLockMap::new());
        let key = "project_creation:u1:contended".to_string();

        let held = map.acquire(&key).await;
        let map2 = map.clone();
        let key2 = key.clone();
        let waiter = tokio::spawn(async move {
            let _permit = map2.acquire(&key2).await;
            7
        });

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        drop(held);
        assert_eq!(waiter.await.unwrap(), 7);
    }

    #[tokio::test]
    async fn prune_keeps_held_locks() {
        let map = NamedLockMap::new();
        let held = map.acquire("busy").await;
        let _idle = map.try_acquire("idle").unwrap();
        drop(_idle);

        map.prune_idle();
        assert_eq!(map.key_count(), 1);
        drop(held);
    }
}
