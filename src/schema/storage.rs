//! Storage kinds: S3, EFS, EBS

use serde::{Deserialize, Serialize};

// ============================================================================
// S3
// ============================================================================

/// Object lifecycle transition or expiration rule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct LifecycleRule {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,
    pub days: u32,
    /// Transition target (STANDARD_IA, INTELLIGENT_TIERING, GLACIER,
    /// GLACIER_IR, DEEP_ARCHIVE) or omitted for expiration
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_class: Option<String>,
    #[serde(default)]
    pub expire: bool,
}

/// Object storage bucket
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct S3Spec {
    /// private, public-read, public-read-write, or authenticated-read
    #[serde(default = "default_acl")]
    pub acl: String,
    #[serde(default)]
    pub versioning: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub lifecycle_rules: Vec<LifecycleRule>,
    #[serde(default)]
    pub encryption: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub website_index_document: Option<String>,
}

fn default_acl() -> String {
    "private".to_string()
}

impl S3Spec {
    pub const VALID_ACLS: &'static [&'static str] = &[
        "private",
        "public-read",
        "public-read-write",
        "authenticated-read",
    ];

    pub const VALID_STORAGE_CLASSES: &'static [&'static str] = &[
        "STANDARD_IA",
        "INTELLIGENT_TIERING",
        "ONEZONE_IA",
        "GLACIER",
        "GLACIER_IR",
        "DEEP_ARCHIVE",
    ];
}

// ============================================================================
// EFS
// ============================================================================

/// Shared network filesystem
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct EfsSpec {
    #[serde(default = "default_performance_mode")]
    pub performance_mode: String,
    #[serde(default = "default_throughput_mode")]
    pub throughput_mode: String,
    #[serde(default = "default_true")]
    pub encrypted: bool,
}

fn default_performance_mode() -> String {
    "generalPurpose".to_string()
}

fn default_throughput_mode() -> String {
    "bursting".to_string()
}

fn default_true() -> bool {
    true
}

// ============================================================================
// EBS
// ============================================================================

/// Block storage volume
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct EbsSpec {
    pub size_gb: u32,
    #[serde(default = "default_volume_type")]
    pub volume_type: String,
    #[serde(default = "default_true")]
    pub encrypted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub availability_zone: Option<String>,
}

fn default_volume_type() -> String {
    "gp3".to_string()
}
