//! State document model
//!
//! The top-level persisted unit, keyed under
//! `stacks/{stack}/{environment}/state.json` (tenant prefix applied by the
//! tenancy layer). Serialized as canonically indented UTF-8 JSON so stored
//! versions diff cleanly. The document is authoritative; object metadata is
//! advisory.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::schema::Kind;

/// Schema version of the document layout
pub const STATE_SCHEMA_VERSION: u32 = 1;

// ============================================================================
// RESOURCE STATE (current)
// ============================================================================

/// Provisioning status of a stored resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceStatus {
    Pending,
    Creating,
    Ready,
    Updating,
    Deleting,
    Failed,
}

/// Stored representation of one provisioned resource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceState {
    /// Component name; the cross-document join key
    pub id: String,
    pub kind: Kind,
    /// Containing service, for naming and tagging
    #[serde(default)]
    pub service: String,
    /// Provider that owns this resource
    pub provider_name: String,
    pub status: ResourceStatus,
    /// Cross-reference target space: string-keyed output attributes
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub outputs: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<String>,
    /// Snapshot of the desired spec at provisioning time; the differ's
    /// comparison baseline
    #[serde(default)]
    pub attributes: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub tags: BTreeMap<String, String>,
}

// ============================================================================
// STATE DOCUMENT
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateMetadata {
    pub stack: String,
    pub environment: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant: Option<String>,
    pub deployed_by: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Source configuration captured at apply time
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigurationInfo {
    #[serde(default)]
    pub source_checksum: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub variables: BTreeMap<String, String>,
}

/// Outcome of the most recent deployment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentStatus {
    InProgress,
    Success,
    Failed,
    RolledBack,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentInfo {
    #[serde(default)]
    pub plan_hash: String,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    pub status: DeploymentStatus,
}

/// The persisted deployment state of one (stack, environment)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateDocument {
    pub version: u32,
    pub metadata: StateMetadata,
    #[serde(default)]
    pub configuration: ConfigurationInfo,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub resources: BTreeMap<String, ResourceState>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub outputs: BTreeMap<String, serde_json::Value>,
    pub deployment: DeploymentInfo,
}

impl StateDocument {
    /// Fresh document for a first deployment
    pub fn new(
        stack: impl Into<String>,
        environment: impl Into<String>,
        tenant: Option<String>,
        deployed_by: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            version: STATE_SCHEMA_VERSION,
            metadata: StateMetadata {
                stack: stack.into(),
                environment: environment.into(),
                tenant,
                deployed_by: deployed_by.into(),
                created_at: now,
                updated_at: now,
            },
            configuration: ConfigurationInfo::default(),
            resources: BTreeMap::new(),
            outputs: BTreeMap::new(),
            deployment: DeploymentInfo {
                plan_hash: String::new(),
                started_at: now,
                completed_at: None,
                status: DeploymentStatus::InProgress,
            },
        }
    }

    /// Per-component outputs map consumed by the lazy reference resolver
    pub fn component_outputs(&self) -> BTreeMap<String, BTreeMap<String, String>> {
        self.resources
            .iter()
            .map(|(id, r)| (id.clone(), r.outputs.clone()))
            .collect()
    }
}

/// Tenant-relative state key for a (stack, environment)
pub fn state_key(stack: &str, environment: &str) -> String {
    format!("stacks/{stack}/{environment}/state.json")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_key_layout() {
        assert_eq!(state_key("app", "dev"), "stacks/app/dev/state.json");
    }

    #[test]
    fn test_document_json_round_trip() {
        let mut doc = StateDocument::new("app", "dev", Some("team-a".into()), "alice");
        doc.resources.insert(
            "db".into(),
            ResourceState {
                id: "db".into(),
                service: "backend".into(),
                kind: Kind::Rds,
                provider_name: "aws".into(),
                status: ResourceStatus::Ready,
                outputs: BTreeMap::from([("endpoint".into(), "db.internal:5432".into())]),
                dependencies: vec![],
                attributes: serde_json::json!({"engine": "postgres"}),
                created_at: Utc::now(),
                updated_at: Utc::now(),
                tags: BTreeMap::new(),
            },
        );

        let json = serde_json::to_string_pretty(&doc).unwrap();
        let parsed: StateDocument = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, doc);
        assert_eq!(parsed.resources["db"].outputs["endpoint"], "db.internal:5432");
    }

    #[test]
    fn test_component_outputs_projection() {
        let mut doc = StateDocument::new("app", "dev", None, "ops");
        doc.resources.insert(
            "q".into(),
            ResourceState {
                id: "q".into(),
                service: "backend".into(),
                kind: Kind::Sqs,
                provider_name: "aws".into(),
                status: ResourceStatus::Ready,
                outputs: BTreeMap::from([("url".into(), "https://sqs/q".into())]),
                dependencies: vec![],
                attributes: serde_json::Value::Null,
                created_at: Utc::now(),
                updated_at: Utc::now(),
                tags: BTreeMap::new(),
            },
        );
        assert_eq!(doc.component_outputs()["q"]["url"], "https://sqs/q");
    }
}
