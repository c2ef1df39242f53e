//! Database kinds: RDS, DynamoDB, DocumentDB

use serde::{Deserialize, Serialize};

// ============================================================================
// RDS
// ============================================================================

/// Managed relational database instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct RdsSpec {
    /// Engine: postgres, mysql, mariadb, or aurora
    pub engine: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub engine_version: Option<String>,
    #[serde(default = "default_instance_class")]
    pub instance_class: String,
    /// Gigabytes; engine-specific minimum enforced by validation
    pub allocated_storage: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_type: Option<String>,
    #[serde(default)]
    pub multi_az: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    /// ARN or path of the master-password secret
    pub password_secret: String,
    #[serde(default = "default_backup_retention")]
    pub backup_retention_days: u32,
}

fn default_instance_class() -> String {
    "db.t3.micro".to_string()
}

fn default_backup_retention() -> u32 {
    7
}

impl RdsSpec {
    /// Minimum allocated storage (GB) for an engine
    pub fn engine_minimum_storage(engine: &str) -> u32 {
        match engine {
            "aurora" => 10,
            "postgres" | "mysql" | "mariadb" => 20,
            _ => 20,
        }
    }
}

// ============================================================================
// DYNAMODB
// ============================================================================

/// Key attribute definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct AttributeDef {
    pub name: String,
    /// S, N, or B
    #[serde(rename = "type")]
    pub attr_type: String,
}

/// Hash or range key reference
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct KeySpec {
    pub name: String,
}

/// Global secondary index
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct GlobalSecondaryIndex {
    pub name: String,
    pub hash_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub range_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub projection: Option<String>,
}

/// Serverless key/value table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct DynamoDbSpec {
    /// PAY_PER_REQUEST or PROVISIONED
    pub billing_mode: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub read_capacity: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub write_capacity: Option<u32>,
    pub hash_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub range_key: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attributes: Vec<AttributeDef>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub global_secondary_indexes: Vec<GlobalSecondaryIndex>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl_attribute: Option<String>,
}

// ============================================================================
// DOCUMENTDB
// ============================================================================

/// Managed document database cluster
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct DocumentDbSpec {
    #[serde(default = "default_docdb_class")]
    pub instance_class: String,
    #[serde(default = "default_instances")]
    pub instances: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub engine_version: Option<String>,
    /// ARN or path of the master-password secret
    pub password_secret: String,
}

fn default_docdb_class() -> String {
    "db.t3.medium".to_string()
}

fn default_instances() -> u32 {
    1
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rds_parses() {
        let spec: RdsSpec = serde_yaml::from_str(
            r#"
engine: postgres
engineVersion: "16.3"
allocatedStorage: 50
passwordSecret: arn:aws:secretsmanager:us-east-1:123456789012:secret:db-master
"#,
        )
        .unwrap();
        assert_eq!(spec.engine, "postgres");
        assert_eq!(spec.backup_retention_days, 7);
        assert!(!spec.multi_az);
    }

    #[test]
    fn test_engine_minimums() {
        assert_eq!(RdsSpec::engine_minimum_storage("aurora"), 10);
        assert_eq!(RdsSpec::engine_minimum_storage("postgres"), 20);
    }

    #[test]
    fn test_dynamodb_parses() {
        let spec: DynamoDbSpec = serde_yaml::from_str(
            r#"
billingMode: PROVISIONED
readCapacity: 5
writeCapacity: 5
hashKey: pk
rangeKey: sk
attributes:
  - name: pk
    type: S
  - name: sk
    type: S
globalSecondaryIndexes:
  - name: by-owner
    hashKey: pk
"#,
        )
        .unwrap();
        assert_eq!(spec.attributes.len(), 2);
        assert_eq!(spec.global_secondary_indexes[0].name, "by-owner");
    }
}
