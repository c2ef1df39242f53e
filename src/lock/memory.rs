//! In-memory lock store
//!
//! Atomicity comes from DashMap's entry API: acquire holds the shard lock
//! across the check-and-insert, mirroring the conditional-write semantics
//! of the production store.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use super::{new_lock_id, Lock, LockError, LockStore};

/// In-process lock table
#[derive(Default)]
pub struct MemoryLockStore {
    locks: DashMap<String, Lock>,
}

impl MemoryLockStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LockStore for MemoryLockStore {
    async fn acquire(&self, key: &str, ttl: Duration, owner: &str) -> Result<Lock, LockError> {
        let now = Utc::now();
        let lock = Lock {
            key: key.to_string(),
            lock_id: new_lock_id(),
            owner: owner.to_string(),
            acquired_at: now,
            expires_at: now + chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::zero()),
        };
        if lock.is_expired(now) {
            return Err(LockError::Expired {
                key: key.to_string(),
            });
        }

        match self.locks.entry(key.to_string()) {
            Entry::Occupied(mut entry) => {
                let existing = entry.get();
                if existing.is_expired(now) {
                    entry.insert(lock.clone());
                    Ok(lock)
                } else {
                    Err(LockError::AlreadyHeld {
                        key: key.to_string(),
                        holder: existing.owner.clone(),
                        expires_at: existing.expires_at,
                    })
                }
            }
            Entry::Vacant(entry) => {
                entry.insert(lock.clone());
                Ok(lock)
            }
        }
    }

    async fn refresh(&self, lock: &Lock, ttl: Duration) -> Result<Lock, LockError> {
        match self.locks.entry(lock.key.clone()) {
            Entry::Occupied(mut entry) if entry.get().lock_id == lock.lock_id => {
                let mut renewed = entry.get().clone();
                renewed.expires_at = Utc::now()
                    + chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::zero());
                entry.insert(renewed.clone());
                Ok(renewed)
            }
            _ => Err(LockError::NotHeld {
                key: lock.key.clone(),
            }),
        }
    }

    async fn release(&self, lock: &Lock) -> Result<(), LockError> {
        // Conditional on the token; releasing a lock someone else took over
        // (or one already gone) is a no-op.
        self.locks
            .remove_if(&lock.key, |_, stored| stored.lock_id == lock.lock_id);
        Ok(())
    }

    async fn force_release(&self, key: &str) -> Result<(), LockError> {
        self.locks.remove(key);
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Lock>, LockError> {
        Ok(self
            .locks
            .get(key)
            .filter(|l| !l.is_expired(Utc::now()))
            .map(|l| l.clone()))
    }

    async fn list(&self, prefix: &str) -> Result<Vec<Lock>, LockError> {
        let now = Utc::now();
        let mut locks: Vec<Lock> = self
            .locks
            .iter()
            .filter(|entry| entry.key().starts_with(prefix) && !entry.value().is_expired(now))
            .map(|entry| entry.value().clone())
            .collect();
        locks.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(locks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_second_acquire_reports_holder() {
        let store = MemoryLockStore::new();
        let ttl = Duration::from_secs(60);
        store.acquire("stack:app:env:dev", ttl, "alice").await.unwrap();

        let err = store
            .acquire("stack:app:env:dev", ttl, "bob")
            .await
            .unwrap_err();
        match err {
            LockError::AlreadyHeld { holder, .. } => assert_eq!(holder, "alice"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_expired_lock_is_taken_over() {
        let store = MemoryLockStore::new();
        store
            .acquire("k", Duration::from_millis(10), "alice")
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;

        let lock = store.acquire("k", Duration::from_secs(60), "bob").await.unwrap();
        assert_eq!(lock.owner, "bob");
    }

    #[tokio::test]
    async fn test_refresh_requires_matching_token() {
        let store = MemoryLockStore::new();
        let ttl = Duration::from_secs(60);
        let lock = store.acquire("k", ttl, "alice").await.unwrap();

        let renewed = store.refresh(&lock, ttl).await.unwrap();
        assert!(renewed.expires_at >= lock.expires_at);

        let mut forged = lock.clone();
        forged.lock_id = "0000".into();
        assert!(matches!(
            store.refresh(&forged, ttl).await,
            Err(LockError::NotHeld { .. })
        ));
    }

    #[tokio::test]
    async fn test_release_is_idempotent() {
        let store = MemoryLockStore::new();
        let lock = store
            .acquire("k", Duration::from_secs(60), "alice")
            .await
            .unwrap();
        store.release(&lock).await.unwrap();
        store.release(&lock).await.unwrap();
        assert!(store.get("k").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_release_does_not_remove_new_holder() {
        let store = MemoryLockStore::new();
        let stale = store
            .acquire("k", Duration::from_millis(10), "alice")
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        store.acquire("k", Duration::from_secs(60), "bob").await.unwrap();

        store.release(&stale).await.unwrap();
        let current = store.get("k").await.unwrap().unwrap();
        assert_eq!(current.owner, "bob");
    }

    #[tokio::test]
    async fn test_concurrent_acquire_exactly_one_wins() {
        use std::sync::Arc;
        let store = Arc::new(MemoryLockStore::new());
        let mut handles = Vec::new();
        for i in 0..8 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                store
                    .acquire("k", Duration::from_secs(60), &format!("owner-{i}"))
                    .await
                    .is_ok()
            }));
        }
        let mut wins = 0;
        for handle in handles {
            if handle.await.unwrap() {
                wins += 1;
            }
        }
        assert_eq!(wins, 1);
    }

    #[tokio::test]
    async fn test_list_filters_prefix() {
        let store = MemoryLockStore::new();
        let ttl = Duration::from_secs(60);
        store.acquire("tenant:a:stack:x:env:dev", ttl, "o").await.unwrap();
        store.acquire("tenant:b:stack:y:env:dev", ttl, "o").await.unwrap();
        store.acquire("admin:registry", ttl, "o").await.unwrap();

        assert_eq!(store.list("tenant:a:").await.unwrap().len(), 1);
        assert_eq!(store.list("").await.unwrap().len(), 3);
    }
}
