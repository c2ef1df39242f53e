//! # Differ
//!
//! Resource-level comparison of desired configuration against stored
//! state, producing a structured change-set:
//!
//! - no current → `create` (every attribute an addition)
//! - no desired → `delete`
//! - both present → walk the kind's attribute space; each differing leaf
//!   is classified by its mutability tag, and any `replace-required`
//!   difference forces `recreate`
//!
//! Formatting for display is a separate concern; consumers get
//! `(path, old, new, mutability)` tuples.

use std::collections::BTreeMap;
use std::fmt;

use serde_json::Value;

use crate::parser::ResourceSet;
use crate::schema::Kind;
use crate::state::StateDocument;

// ============================================================================
// CLASSIFICATION
// ============================================================================

/// How a changed attribute can be applied
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mutability {
    /// Applied in place
    Mutable,
    /// Forces destroy-and-recreate of the resource
    ReplaceRequired,
    /// Observed but never acted on
    IgnoredDrift,
}

/// Per-resource change classification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeType {
    Create,
    Update,
    Delete,
    Recreate,
    NoOp,
}

impl ChangeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeType::Create => "create",
            ChangeType::Update => "update",
            ChangeType::Delete => "delete",
            ChangeType::Recreate => "recreate",
            ChangeType::NoOp => "none",
        }
    }
}

impl fmt::Display for ChangeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One attribute-level difference
#[derive(Debug, Clone, PartialEq)]
pub struct AttributeDiff {
    /// Dotted leaf path into the spec, `[i]` for array elements
    pub path: String,
    pub old: Option<Value>,
    pub new: Option<Value>,
    pub mutability: Mutability,
}

/// One resource's change record
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceChange {
    pub id: String,
    pub kind: Kind,
    pub change_type: ChangeType,
    pub diffs: Vec<AttributeDiff>,
    pub requires_recreate: bool,
}

/// Ordered change records for a whole stack
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChangeSet {
    pub changes: Vec<ResourceChange>,
}

impl ChangeSet {
    /// True when nothing would change
    pub fn is_noop(&self) -> bool {
        self.changes
            .iter()
            .all(|c| c.change_type == ChangeType::NoOp)
    }

    pub fn get(&self, id: &str) -> Option<&ResourceChange> {
        self.changes.iter().find(|c| c.id == id)
    }

    /// Records that require work, in change-set order
    pub fn pending(&self) -> impl Iterator<Item = &ResourceChange> {
        self.changes
            .iter()
            .filter(|c| c.change_type != ChangeType::NoOp)
    }

    /// Count per change type, for summaries
    pub fn counts(&self) -> BTreeMap<&'static str, usize> {
        let mut counts = BTreeMap::new();
        for change in &self.changes {
            *counts.entry(change.change_type.as_str()).or_insert(0) += 1;
        }
        counts
    }
}

// ============================================================================
// DIFFING
// ============================================================================

/// Compare desired components against the stored state
pub fn diff(desired: &ResourceSet, current: Option<&StateDocument>) -> ChangeSet {
    let empty = BTreeMap::new();
    let current_resources = current.map(|doc| &doc.resources).unwrap_or(&empty);

    let mut changes = Vec::new();

    for component in &desired.components {
        let id = component.name().to_string();
        let desired_value = component.spec_value();

        match current_resources.get(&id) {
            None => {
                let diffs = flatten(&desired_value)
                    .into_iter()
                    .map(|(path, value)| AttributeDiff {
                        mutability: mutability_for(component.kind, &path),
                        path,
                        old: None,
                        new: Some(value),
                    })
                    .collect();
                changes.push(ResourceChange {
                    id,
                    kind: component.kind,
                    change_type: ChangeType::Create,
                    diffs,
                    requires_recreate: false,
                });
            }
            Some(stored) => {
                let diffs = diff_values(component.kind, &stored.attributes, &desired_value);
                let requires_recreate = diffs
                    .iter()
                    .any(|d| d.mutability == Mutability::ReplaceRequired);
                let actionable = diffs
                    .iter()
                    .any(|d| d.mutability != Mutability::IgnoredDrift);
                let change_type = if !actionable {
                    ChangeType::NoOp
                } else if requires_recreate {
                    ChangeType::Recreate
                } else {
                    ChangeType::Update
                };
                changes.push(ResourceChange {
                    id,
                    kind: component.kind,
                    change_type,
                    diffs,
                    requires_recreate,
                });
            }
        }
    }

    // Stored resources absent from desired are deletions.
    for (id, stored) in current_resources {
        if desired.component(id).is_none() {
            changes.push(ResourceChange {
                id: id.clone(),
                kind: stored.kind,
                change_type: ChangeType::Delete,
                diffs: Vec::new(),
                requires_recreate: false,
            });
        }
    }

    ChangeSet { changes }
}

/// Leaf-path differences between two spec snapshots
fn diff_values(kind: Kind, old: &Value, new: &Value) -> Vec<AttributeDiff> {
    let old_leaves = flatten(old);
    let new_leaves = flatten(new);
    let mut diffs = Vec::new();

    for (path, new_value) in &new_leaves {
        match old_leaves.get(path) {
            Some(old_value) if old_value == new_value => {}
            Some(old_value) => diffs.push(AttributeDiff {
                mutability: mutability_for(kind, path),
                path: path.clone(),
                old: Some(old_value.clone()),
                new: Some(new_value.clone()),
            }),
            None => diffs.push(AttributeDiff {
                mutability: mutability_for(kind, path),
                path: path.clone(),
                old: None,
                new: Some(new_value.clone()),
            }),
        }
    }
    for (path, old_value) in &old_leaves {
        if !new_leaves.contains_key(path) {
            diffs.push(AttributeDiff {
                mutability: mutability_for(kind, path),
                path: path.clone(),
                old: Some(old_value.clone()),
                new: None,
            });
        }
    }

    diffs.sort_by(|a, b| a.path.cmp(&b.path));
    diffs
}

/// Flatten a JSON value into dotted leaf paths
fn flatten(value: &Value) -> BTreeMap<String, Value> {
    let mut leaves = BTreeMap::new();
    flatten_into(value, String::new(), &mut leaves);
    leaves
}

fn flatten_into(value: &Value, path: String, leaves: &mut BTreeMap<String, Value>) {
    match value {
        Value::Object(map) => {
            if map.is_empty() && !path.is_empty() {
                leaves.insert(path, value.clone());
                return;
            }
            for (key, child) in map {
                let child_path = if path.is_empty() {
                    key.clone()
                } else {
                    format!("{path}.{key}")
                };
                flatten_into(child, child_path, leaves);
            }
        }
        Value::Array(items) => {
            if items.is_empty() && !path.is_empty() {
                leaves.insert(path, value.clone());
                return;
            }
            for (i, item) in items.iter().enumerate() {
                flatten_into(item, format!("{path}[{i}]"), leaves);
            }
        }
        _ => {
            leaves.insert(path, value.clone());
        }
    }
}

// ============================================================================
// MUTABILITY SCHEMAS
// ============================================================================

/// Mutability of one attribute path for a kind
///
/// Unlisted attributes are mutable; labels and tags never drive changes.
pub fn mutability_for(kind: Kind, path: &str) -> Mutability {
    if path.starts_with("tags") || path.starts_with("labels") {
        return Mutability::IgnoredDrift;
    }

    let replace: &[&str] = match kind {
        Kind::Rds => &["engine", "databaseName", "username", "storageType"],
        Kind::DynamoDb => &["hashKey", "rangeKey", "attributes"],
        Kind::DocumentDb => &["engineVersion"],
        Kind::S3 => &[],
        Kind::Efs => &["performanceMode", "encrypted"],
        Kind::Ebs => &["availabilityZone", "encrypted"],
        Kind::Sqs => &["fifo"],
        Kind::Sns => &["fifo"],
        Kind::Msk => &["instanceType"],
        Kind::Kafka => &["cluster"],
        Kind::MicroService => &["platform"],
        Kind::Alb | Kind::Nlb => &["internal"],
        Kind::ApiGateway => &["protocolType"],
        Kind::CloudFront => &[],
        Kind::Lambda | Kind::Worker | Kind::CronJob => &[],
        Kind::EventBridge => &[],
        Kind::Stack | Kind::Service => &[],
    };

    if replace
        .iter()
        .any(|p| path == *p || path.starts_with(&format!("{p}.")) || path.starts_with(&format!("{p}[")))
    {
        Mutability::ReplaceRequired
    } else {
        Mutability::Mutable
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_documents;
    use crate::state::{ResourceState, ResourceStatus};
    use chrono::Utc;
    use std::path::PathBuf;

    fn desired(yaml: &str) -> ResourceSet {
        let stack = r#"
kind: Stack
metadata: {name: app}
spec:
  provider: {name: aws, region: us-east-1}
---
"#;
        let docs =
            parse_documents(&format!("{stack}{yaml}"), &PathBuf::from("test.yaml")).unwrap();
        let mut set = ResourceSet {
            stack: docs[0].clone(),
            services: Vec::new(),
            components: docs[1..].to_vec(),
            variables: Default::default(),
            source_checksum: String::new(),
        };
        for c in &mut set.components {
            c.metadata.stack = Some("app".into());
            c.metadata.service = Some("backend".into());
        }
        set
    }

    fn stored(id: &str, kind: Kind, attributes: serde_json::Value) -> ResourceState {
        ResourceState {
            id: id.into(),
            service: "backend".into(),
            kind,
            provider_name: "aws".into(),
            status: ResourceStatus::Ready,
            outputs: Default::default(),
            dependencies: vec![],
            attributes,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            tags: Default::default(),
        }
    }

    const RDS_YAML: &str = r#"
kind: RDS
metadata: {name: db}
spec:
  engine: postgres
  allocatedStorage: 20
  passwordSecret: arn:aws:secretsmanager:us-east-1:123456789012:secret:db
"#;

    #[test]
    fn test_no_current_is_create() {
        let set = desired(RDS_YAML);
        let changes = diff(&set, None);
        assert_eq!(changes.changes.len(), 1);
        assert_eq!(changes.changes[0].change_type, ChangeType::Create);
        assert!(changes.changes[0].diffs.iter().all(|d| d.old.is_none()));
    }

    #[test]
    fn test_identical_is_noop() {
        let set = desired(RDS_YAML);
        let mut doc = StateDocument::new("app", "dev", None, "ops");
        let attrs = set.components[0].spec_value();
        doc.resources
            .insert("db".into(), stored("db", Kind::Rds, attrs));

        let changes = diff(&set, Some(&doc));
        assert!(changes.is_noop());
    }

    #[test]
    fn test_mutable_change_is_update() {
        let set = desired(RDS_YAML);
        let mut attrs = set.components[0].spec_value();
        attrs["allocatedStorage"] = serde_json::json!(10);
        let mut doc = StateDocument::new("app", "dev", None, "ops");
        doc.resources
            .insert("db".into(), stored("db", Kind::Rds, attrs));

        let changes = diff(&set, Some(&doc));
        let change = changes.get("db").unwrap();
        assert_eq!(change.change_type, ChangeType::Update);
        let d = change
            .diffs
            .iter()
            .find(|d| d.path == "allocatedStorage")
            .unwrap();
        assert_eq!(d.old, Some(serde_json::json!(10)));
        assert_eq!(d.new, Some(serde_json::json!(20)));
        assert_eq!(d.mutability, Mutability::Mutable);
    }

    #[test]
    fn test_replace_required_forces_recreate() {
        let set = desired(RDS_YAML);
        let mut attrs = set.components[0].spec_value();
        attrs["engine"] = serde_json::json!("mysql");
        let mut doc = StateDocument::new("app", "dev", None, "ops");
        doc.resources
            .insert("db".into(), stored("db", Kind::Rds, attrs));

        let changes = diff(&set, Some(&doc));
        let change = changes.get("db").unwrap();
        assert_eq!(change.change_type, ChangeType::Recreate);
        assert!(change.requires_recreate);
    }

    #[test]
    fn test_absent_from_desired_is_delete() {
        let set = desired(RDS_YAML);
        let mut doc = StateDocument::new("app", "dev", None, "ops");
        doc.resources.insert(
            "old-queue".into(),
            stored("old-queue", Kind::Sqs, serde_json::json!({})),
        );
        doc.resources.insert(
            "db".into(),
            stored("db", Kind::Rds, set.components[0].spec_value()),
        );

        let changes = diff(&set, Some(&doc));
        assert_eq!(
            changes.get("old-queue").unwrap().change_type,
            ChangeType::Delete
        );
        assert!(!changes.is_noop());
    }

    #[test]
    fn test_counts_summary() {
        let set = desired(RDS_YAML);
        let changes = diff(&set, None);
        assert_eq!(changes.counts()["create"], 1);
    }

    #[test]
    fn test_flatten_paths() {
        let leaves = flatten(&serde_json::json!({
            "a": {"b": 1},
            "list": [{"x": true}]
        }));
        assert_eq!(leaves["a.b"], serde_json::json!(1));
        assert_eq!(leaves["list[0].x"], serde_json::json!(true));
    }
}
