//! # State Backend
//!
//! Versioned key/value store of deployment state documents. Versioning is
//! an intrinsic property of the backing store, not managed in the
//! document. The backend provides no mutual exclusion; a single writer is
//! guaranteed by the lock manager.
//!
//! Implementations:
//!
//! - [`MemoryStateBackend`] - full version chains in memory, for tests and
//!   dry runs
//! - [`S3StateBackend`] - production store over S3 object versioning

mod document;
mod memory;
mod s3;

pub use document::{
    state_key, ConfigurationInfo, DeploymentInfo, DeploymentStatus, ResourceState, ResourceStatus,
    StateDocument, StateMetadata, STATE_SCHEMA_VERSION,
};
pub use memory::MemoryStateBackend;
pub use s3::S3StateBackend;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::warn;

// ============================================================================
// STATE ERROR
// ============================================================================

#[derive(Debug, Error)]
pub enum StateError {
    #[error("state key not found: {key}")]
    NotFound { key: String },

    #[error("version {version} of {key} not found")]
    VersionNotFound { key: String, version: String },

    #[error("state serialization failed for {key}: {source}")]
    Serialization {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("state transport error for {key}: {message}")]
    Transport { key: String, message: String },
}

impl StateError {
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            StateError::NotFound { .. } | StateError::VersionNotFound { .. }
        )
    }
}

// ============================================================================
// VERSION INFO
// ============================================================================

/// One entry of a key's version history
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionInfo {
    pub version_id: String,
    pub timestamp: DateTime<Utc>,
    pub size: u64,
    pub is_latest: bool,
}

// ============================================================================
// STATE BACKEND TRAIT
// ============================================================================

/// Versioned document store contract
///
/// Bodies are opaque UTF-8 strings; the typed [`StateDocument`] layer sits
/// above via [`load_state`] / [`save_state`]. Keys are tenant-relative;
/// the tenancy wrapper applies prefixes before any implementation sees
/// them.
#[async_trait]
pub trait StateBackend: Send + Sync {
    /// Store a new version of `key`; returns the version id
    async fn save(&self, key: &str, body: &str) -> Result<String, StateError>;

    /// Latest version of `key`
    async fn load(&self, key: &str) -> Result<(String, String), StateError>;

    async fn exists(&self, key: &str) -> Result<bool, StateError>;

    /// Remove the latest version (the key stops resolving)
    async fn delete(&self, key: &str) -> Result<(), StateError>;

    /// Keys under a prefix
    async fn list(&self, prefix: &str) -> Result<Vec<String>, StateError>;

    /// Version history of `key`, newest first
    async fn list_versions(&self, key: &str) -> Result<Vec<VersionInfo>, StateError>;

    /// A specific stored version
    async fn get_version(&self, key: &str, version_id: &str) -> Result<String, StateError>;
}

// ============================================================================
// TYPED HELPERS
// ============================================================================

/// Save attempts before a transport failure becomes fatal
const SAVE_ATTEMPTS: u32 = 3;

/// Load and deserialize a state document; `Ok(None)` means first deployment
pub async fn load_state(
    backend: &Arc<dyn StateBackend>,
    key: &str,
) -> Result<Option<(StateDocument, String)>, StateError> {
    match backend.load(key).await {
        Ok((body, version)) => {
            let doc: StateDocument =
                serde_json::from_str(&body).map_err(|source| StateError::Serialization {
                    key: key.to_string(),
                    source,
                })?;
            Ok(Some((doc, version)))
        }
        Err(err) if err.is_not_found() => Ok(None),
        Err(err) => Err(err),
    }
}

/// Serialize and store a state document, retrying transport failures with
/// backoff; returns the new version id
pub async fn save_state(
    backend: &Arc<dyn StateBackend>,
    key: &str,
    document: &StateDocument,
) -> Result<String, StateError> {
    let body = serde_json::to_string_pretty(document).map_err(|source| {
        StateError::Serialization {
            key: key.to_string(),
            source,
        }
    })?;

    let mut delay = Duration::from_millis(250);
    let mut last_err = None;
    for attempt in 1..=SAVE_ATTEMPTS {
        match backend.save(key, &body).await {
            Ok(version) => return Ok(version),
            Err(err @ StateError::Transport { .. }) => {
                warn!(key, attempt, error = %err, "state save failed; retrying");
                last_err = Some(err);
                tokio::time::sleep(delay).await;
                delay *= 2;
            }
            Err(err) => return Err(err),
        }
    }
    Err(last_err.expect("at least one attempt"))
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_load_state_absent_is_first_deployment() {
        let backend: Arc<dyn StateBackend> = Arc::new(MemoryStateBackend::new());
        let loaded = load_state(&backend, "stacks/app/dev/state.json")
            .await
            .unwrap();
        assert!(loaded.is_none());
    }

    #[tokio::test]
    async fn test_save_then_load_round_trips() {
        let backend: Arc<dyn StateBackend> = Arc::new(MemoryStateBackend::new());
        let doc = StateDocument::new("app", "dev", None, "ops");
        let key = state_key("app", "dev");

        let v1 = save_state(&backend, &key, &doc).await.unwrap();
        let (loaded, version) = load_state(&backend, &key).await.unwrap().unwrap();
        assert_eq!(loaded, doc);
        assert_eq!(version, v1);
    }

    #[tokio::test]
    async fn test_each_save_is_a_new_version() {
        let backend: Arc<dyn StateBackend> = Arc::new(MemoryStateBackend::new());
        let key = state_key("app", "dev");
        let doc = StateDocument::new("app", "dev", None, "ops");

        for _ in 0..3 {
            save_state(&backend, &key, &doc).await.unwrap();
        }
        let versions = backend.list_versions(&key).await.unwrap();
        assert_eq!(versions.len(), 3);
        assert!(versions[0].is_latest);
        assert!(!versions[1].is_latest);
    }
}
