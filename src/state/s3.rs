//! S3 state backend
//!
//! Maps the backend contract onto native S3 object versioning: every
//! `save` produces a new object version, `list_versions`/`get_version`
//! surface the bucket's version history. Noncurrent-version retention is a
//! bucket lifecycle concern, not handled here.
//!
//! Advisory metadata (stack, environment, schema version) is attached to
//! each object when the key follows the canonical layout; the document
//! body stays authoritative.

use async_trait::async_trait;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use chrono::{DateTime, Utc};

use super::{StateBackend, StateError, VersionInfo};

/// Version id reported by unversioned buckets
const NULL_VERSION: &str = "null";

/// State store over one S3 bucket
#[derive(Debug, Clone)]
pub struct S3StateBackend {
    client: Client,
    bucket: String,
}

impl S3StateBackend {
    /// Use a pre-built client, e.g. one pointed at a custom endpoint
    pub fn new(client: Client, bucket: impl Into<String>) -> Self {
        Self {
            client,
            bucket: bucket.into(),
        }
    }

    /// Standard AWS config chain (env vars, profiles, IMDS)
    pub async fn from_env(bucket: impl Into<String>) -> Self {
        let config = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
        Self::new(Client::new(&config), bucket)
    }
}

fn transport(key: &str, err: impl std::fmt::Display) -> StateError {
    StateError::Transport {
        key: key.to_string(),
        message: err.to_string(),
    }
}

fn to_chrono(dt: &aws_sdk_s3::primitives::DateTime) -> DateTime<Utc> {
    DateTime::from_timestamp(dt.secs(), dt.subsec_nanos()).unwrap_or_else(Utc::now)
}

/// Advisory object metadata derived from canonical keys
fn advisory_metadata(key: &str) -> Vec<(&'static str, String)> {
    let mut meta = vec![(
        "panka-schema-version",
        super::STATE_SCHEMA_VERSION.to_string(),
    )];
    // .../stacks/{stack}/{environment}/state.json
    let parts: Vec<&str> = key.split('/').collect();
    if let Some(pos) = parts.iter().position(|p| *p == "stacks") {
        if parts.len() > pos + 2 {
            meta.push(("panka-stack", parts[pos + 1].to_string()));
            meta.push(("panka-environment", parts[pos + 2].to_string()));
        }
    }
    if let Some(pos) = parts.iter().position(|p| *p == "tenants") {
        if parts.len() > pos + 1 {
            meta.push(("panka-tenant", parts[pos + 1].to_string()));
        }
    }
    meta
}

#[async_trait]
impl StateBackend for S3StateBackend {
    async fn save(&self, key: &str, body: &str) -> Result<String, StateError> {
        let mut request = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .content_type("application/json")
            .body(ByteStream::from(body.as_bytes().to_vec()));
        for (name, value) in advisory_metadata(key) {
            request = request.metadata(name, value);
        }

        let output = request.send().await.map_err(|e| transport(key, e))?;
        Ok(output
            .version_id()
            .unwrap_or(NULL_VERSION)
            .to_string())
    }

    async fn load(&self, key: &str) -> Result<(String, String), StateError> {
        let result = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await;

        let output = match result {
            Ok(output) => output,
            Err(err) => {
                if err
                    .as_service_error()
                    .is_some_and(|e| e.is_no_such_key())
                {
                    return Err(StateError::NotFound {
                        key: key.to_string(),
                    });
                }
                return Err(transport(key, err));
            }
        };

        let version = output
            .version_id()
            .unwrap_or(NULL_VERSION)
            .to_string();
        let bytes = output
            .body
            .collect()
            .await
            .map_err(|e| transport(key, e))?
            .into_bytes();
        let body = String::from_utf8(bytes.to_vec())
            .map_err(|e| transport(key, format!("body is not UTF-8: {e}")))?;
        Ok((body, version))
    }

    async fn exists(&self, key: &str) -> Result<bool, StateError> {
        match self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
        {
            Ok(_) => Ok(true),
            Err(err) => {
                if err.as_service_error().is_some_and(|e| e.is_not_found()) {
                    Ok(false)
                } else {
                    Err(transport(key, err))
                }
            }
        }
    }

    async fn delete(&self, key: &str) -> Result<(), StateError> {
        if !self.exists(key).await? {
            return Err(StateError::NotFound {
                key: key.to_string(),
            });
        }
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| transport(key, e))?;
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, StateError> {
        let mut keys = Vec::new();
        let mut continuation: Option<String> = None;

        loop {
            let mut request = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .prefix(prefix);
            if let Some(token) = continuation.take() {
                request = request.continuation_token(token);
            }
            let output = request.send().await.map_err(|e| transport(prefix, e))?;
            for object in output.contents() {
                if let Some(key) = object.key() {
                    keys.push(key.to_string());
                }
            }
            match output.next_continuation_token() {
                Some(token) => continuation = Some(token.to_string()),
                None => break,
            }
        }

        keys.sort();
        Ok(keys)
    }

    async fn list_versions(&self, key: &str) -> Result<Vec<VersionInfo>, StateError> {
        let output = self
            .client
            .list_object_versions()
            .bucket(&self.bucket)
            .prefix(key)
            .send()
            .await
            .map_err(|e| transport(key, e))?;

        let mut versions: Vec<VersionInfo> = output
            .versions()
            .iter()
            .filter(|v| v.key() == Some(key))
            .map(|v| VersionInfo {
                version_id: v.version_id().unwrap_or(NULL_VERSION).to_string(),
                timestamp: v.last_modified().map(to_chrono).unwrap_or_else(Utc::now),
                size: v.size().unwrap_or(0) as u64,
                is_latest: v.is_latest().unwrap_or(false),
            })
            .collect();

        if versions.is_empty() {
            return Err(StateError::NotFound {
                key: key.to_string(),
            });
        }
        // Newest first.
        versions.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok(versions)
    }

    async fn get_version(&self, key: &str, version_id: &str) -> Result<String, StateError> {
        let result = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .version_id(version_id)
            .send()
            .await;

        let output = match result {
            Ok(output) => output,
            Err(err) => {
                if err
                    .as_service_error()
                    .is_some_and(|e| e.is_no_such_key())
                {
                    return Err(StateError::VersionNotFound {
                        key: key.to_string(),
                        version: version_id.to_string(),
                    });
                }
                return Err(transport(key, err));
            }
        };

        let bytes = output
            .body
            .collect()
            .await
            .map_err(|e| transport(key, e))?
            .into_bytes();
        String::from_utf8(bytes.to_vec())
            .map_err(|e| transport(key, format!("body is not UTF-8: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_advisory_metadata_from_canonical_key() {
        let meta = advisory_metadata("tenants/team-a/v1/stacks/app/dev/state.json");
        assert!(meta.contains(&("panka-stack", "app".to_string())));
        assert!(meta.contains(&("panka-environment", "dev".to_string())));
        assert!(meta.contains(&("panka-tenant", "team-a".to_string())));
    }

    #[test]
    fn test_advisory_metadata_from_flat_key() {
        let meta = advisory_metadata("tenants.yaml");
        assert_eq!(meta.len(), 1); // schema version only
    }
}
