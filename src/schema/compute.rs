//! Compute kinds: MicroService, Worker, CronJob, Lambda

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::ValueFrom;

// ============================================================================
// SHARED PIECES
// ============================================================================

/// Environment variable: literal value or a reference to another
/// component's output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct EnvVar {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_from: Option<ValueFrom>,
}

/// Container image reference
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ImageSpec {
    pub repository: String,
    #[serde(default = "default_tag")]
    pub tag: String,
}

fn default_tag() -> String {
    "latest".to_string()
}

/// Named container port
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct PortSpec {
    pub name: String,
    pub container_port: u16,
    #[serde(default = "default_protocol")]
    pub protocol: String,
}

fn default_protocol() -> String {
    "tcp".to_string()
}

/// Liveness/readiness probe configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct HealthCheck {
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(default = "default_interval")]
    pub interval_seconds: u32,
    #[serde(default = "default_timeout")]
    pub timeout_seconds: u32,
    #[serde(default = "default_threshold")]
    pub healthy_threshold: u32,
}

fn default_interval() -> u32 {
    30
}

fn default_timeout() -> u32 {
    5
}

fn default_threshold() -> u32 {
    3
}

/// CPU/memory requests
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ResourceRequests {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory: Option<String>,
}

// ============================================================================
// MICROSERVICE
// ============================================================================

/// Long-running HTTP service behind the stack's load balancing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct MicroServiceSpec {
    pub image: ImageSpec,
    /// Runtime platform: ecs, fargate, or eks
    pub platform: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ports: Vec<PortSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health_check: Option<HealthCheck>,
    #[serde(default = "default_replicas")]
    pub replicas: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<ResourceRequests>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<EnvVar>,
}

fn default_replicas() -> u32 {
    1
}

// ============================================================================
// WORKER
// ============================================================================

/// Queue-draining background process
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct WorkerSpec {
    pub image: ImageSpec,
    #[serde(default = "default_replicas")]
    pub replicas: u32,
    /// Component name of the queue this worker drains
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub queue: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<ResourceRequests>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<EnvVar>,
}

// ============================================================================
// CRONJOB
// ============================================================================

/// Scheduled container execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct CronJobSpec {
    pub image: ImageSpec,
    /// Five-field cron expression
    pub schedule: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<ResourceRequests>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<EnvVar>,
}

// ============================================================================
// LAMBDA
// ============================================================================

/// Serverless function
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct LambdaSpec {
    pub runtime: String,
    pub handler: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code_uri: Option<String>,
    #[serde(default = "default_memory_mb")]
    pub memory_mb: u32,
    #[serde(default = "default_lambda_timeout")]
    pub timeout_seconds: u32,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub environment: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<EnvVar>,
}

fn default_memory_mb() -> u32 {
    128
}

fn default_lambda_timeout() -> u32 {
    30
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_microservice_parses() {
        let spec: MicroServiceSpec = serde_yaml::from_str(
            r#"
image:
  repository: registry.example.com/api
  tag: "1.4.2"
platform: fargate
ports:
  - name: http
    containerPort: 8080
healthCheck:
  path: /healthz
env:
  - name: DB_HOST
    valueFrom:
      component: db
      output: endpoint
"#,
        )
        .unwrap();
        assert_eq!(spec.ports[0].container_port, 8080);
        assert_eq!(spec.replicas, 1);
        let vf = spec.env[0].value_from.as_ref().unwrap();
        assert_eq!(vf.component, "db");
        assert_eq!(vf.output, "endpoint");
    }

    #[test]
    fn test_cronjob_requires_schedule() {
        let missing: Result<CronJobSpec, _> = serde_yaml::from_str(
            r#"
image:
  repository: registry.example.com/job
"#,
        );
        assert!(missing.is_err());
    }

    #[test]
    fn test_lambda_defaults() {
        let spec: LambdaSpec = serde_yaml::from_str(
            r#"
runtime: python3.12
handler: app.handler
"#,
        )
        .unwrap();
        assert_eq!(spec.memory_mb, 128);
        assert_eq!(spec.timeout_seconds, 30);
    }
}
