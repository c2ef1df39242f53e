//! In-memory state backend
//!
//! Keeps the full version chain per key, so `list_versions`/`get_version`
//! behave exactly like the production store. Backs the test suite and
//! `--dry-run` invocations.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;

use super::{StateBackend, StateError, VersionInfo};

#[derive(Debug, Clone)]
struct StoredVersion {
    version_id: String,
    body: String,
    timestamp: DateTime<Utc>,
}

/// Lock-free in-memory versioned store
#[derive(Default)]
pub struct MemoryStateBackend {
    /// key → version chain, oldest first
    objects: DashMap<String, Vec<StoredVersion>>,
    counter: AtomicU64,
}

impl MemoryStateBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_version(&self) -> String {
        format!("v{:08}", self.counter.fetch_add(1, Ordering::SeqCst) + 1)
    }
}

#[async_trait]
impl StateBackend for MemoryStateBackend {
    async fn save(&self, key: &str, body: &str) -> Result<String, StateError> {
        let version_id = self.next_version();
        self.objects
            .entry(key.to_string())
            .or_default()
            .push(StoredVersion {
                version_id: version_id.clone(),
                body: body.to_string(),
                timestamp: Utc::now(),
            });
        Ok(version_id)
    }

    async fn load(&self, key: &str) -> Result<(String, String), StateError> {
        self.objects
            .get(key)
            .and_then(|chain| {
                chain
                    .last()
                    .map(|v| (v.body.clone(), v.version_id.clone()))
            })
            .ok_or_else(|| StateError::NotFound {
                key: key.to_string(),
            })
    }

    async fn exists(&self, key: &str) -> Result<bool, StateError> {
        Ok(self
            .objects
            .get(key)
            .is_some_and(|chain| !chain.is_empty()))
    }

    async fn delete(&self, key: &str) -> Result<(), StateError> {
        self.objects
            .remove(key)
            .map(|_| ())
            .ok_or_else(|| StateError::NotFound {
                key: key.to_string(),
            })
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, StateError> {
        let mut keys: Vec<String> = self
            .objects
            .iter()
            .filter(|entry| entry.key().starts_with(prefix) && !entry.value().is_empty())
            .map(|entry| entry.key().clone())
            .collect();
        keys.sort();
        Ok(keys)
    }

    async fn list_versions(&self, key: &str) -> Result<Vec<VersionInfo>, StateError> {
        let chain = self.objects.get(key).ok_or_else(|| StateError::NotFound {
            key: key.to_string(),
        })?;
        let latest = chain.len().saturating_sub(1);
        // Newest first, matching the production store's listing order.
        Ok(chain
            .iter()
            .enumerate()
            .rev()
            .map(|(i, v)| VersionInfo {
                version_id: v.version_id.clone(),
                timestamp: v.timestamp,
                size: v.body.len() as u64,
                is_latest: i == latest,
            })
            .collect())
    }

    async fn get_version(&self, key: &str, version_id: &str) -> Result<String, StateError> {
        let chain = self.objects.get(key).ok_or_else(|| StateError::NotFound {
            key: key.to_string(),
        })?;
        chain
            .iter()
            .find(|v| v.version_id == version_id)
            .map(|v| v.body.clone())
            .ok_or_else(|| StateError::VersionNotFound {
                key: key.to_string(),
                version: version_id.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_versions_are_ordered_newest_first() {
        let backend = MemoryStateBackend::new();
        backend.save("k", "one").await.unwrap();
        backend.save("k", "two").await.unwrap();

        let versions = backend.list_versions("k").await.unwrap();
        assert_eq!(versions.len(), 2);
        assert!(versions[0].is_latest);
        let body = backend
            .get_version("k", &versions[1].version_id)
            .await
            .unwrap();
        assert_eq!(body, "one");
    }

    #[tokio::test]
    async fn test_list_filters_by_prefix() {
        let backend = MemoryStateBackend::new();
        backend.save("stacks/app/dev/state.json", "{}").await.unwrap();
        backend.save("stacks/app/prod/state.json", "{}").await.unwrap();
        backend.save("other/key", "{}").await.unwrap();

        let keys = backend.list("stacks/app/").await.unwrap();
        assert_eq!(keys.len(), 2);
    }

    #[tokio::test]
    async fn test_delete_unknown_key_is_not_found() {
        let backend = MemoryStateBackend::new();
        let err = backend.delete("missing").await.unwrap_err();
        assert!(err.is_not_found());
    }
}
