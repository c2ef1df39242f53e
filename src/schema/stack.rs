//! Core grouping documents: Stack and Service

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Cloud provider block required on every Stack
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ProviderBlock {
    /// Provider name: aws, azure, or gcp
    pub name: String,
    pub region: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile: Option<String>,
}

/// Stack spec: deployment root and variable scope
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct StackSpec {
    pub provider: ProviderBlock,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Stack-level interpolation variables
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub variables: BTreeMap<String, String>,
    /// Environments this stack may be deployed to
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub environments: Vec<String>,
}

/// Service spec: a named group of components
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ServiceSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Service-level interpolation variables; shadow stack variables
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub variables: BTreeMap<String, String>,
    /// Explicitly marks a service that intentionally has no components
    #[serde(default)]
    pub empty: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stack_spec_parses() {
        let spec: StackSpec = serde_yaml::from_str(
            r#"
provider:
  name: aws
  region: us-east-1
variables:
  domain: example.com
environments: [dev, prod]
"#,
        )
        .unwrap();
        assert_eq!(spec.provider.name, "aws");
        assert_eq!(spec.variables["domain"], "example.com");
        assert_eq!(spec.environments, vec!["dev", "prod"]);
    }

    #[test]
    fn test_service_spec_defaults() {
        let spec: ServiceSpec = serde_yaml::from_str("{}").unwrap();
        assert!(!spec.empty);
        assert!(spec.variables.is_empty());
    }
}
