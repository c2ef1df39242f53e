//! Messaging kinds: SQS, SNS, EventBridge, Kafka, MSK

use serde::{Deserialize, Serialize};

// ============================================================================
// SQS
// ============================================================================

/// Dead-letter redrive target
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct DeadLetterSpec {
    /// Component name of the dead-letter queue
    pub target_component: String,
    #[serde(default = "default_max_receive")]
    pub max_receive_count: u32,
}

fn default_max_receive() -> u32 {
    5
}

/// Message queue
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct SqsSpec {
    #[serde(default)]
    pub fifo: bool,
    #[serde(default = "default_visibility")]
    pub visibility_timeout_seconds: u32,
    #[serde(default = "default_retention")]
    pub message_retention_seconds: u32,
    #[serde(default)]
    pub delay_seconds: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dead_letter: Option<DeadLetterSpec>,
}

fn default_visibility() -> u32 {
    30
}

fn default_retention() -> u32 {
    345_600 // 4 days
}

// ============================================================================
// SNS
// ============================================================================

/// Topic subscription
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Subscription {
    /// sqs, lambda, email, https
    pub protocol: String,
    /// Component name (sqs/lambda protocols) or literal endpoint
    pub endpoint: String,
}

/// Pub/sub topic
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct SnsSpec {
    #[serde(default)]
    pub fifo: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub subscriptions: Vec<Subscription>,
}

// ============================================================================
// EVENTBRIDGE
// ============================================================================

/// Rule target: a sibling component or a literal ARN
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct EventTarget {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub component: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arn: Option<String>,
}

/// Event bus rule
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct EventBridgeSpec {
    /// rate(...) or cron(...) expression
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schedule_expression: Option<String>,
    /// JSON event pattern, mutually completing with the schedule
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_pattern: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub targets: Vec<EventTarget>,
}

// ============================================================================
// KAFKA / MSK
// ============================================================================

/// Topic declaration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct TopicSpec {
    pub name: String,
    #[serde(default = "default_partitions")]
    pub partitions: u32,
    #[serde(default = "default_replication")]
    pub replication_factor: u32,
}

fn default_partitions() -> u32 {
    3
}

fn default_replication() -> u32 {
    2
}

/// Self-managed Kafka topics on an existing cluster
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct KafkaSpec {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub topics: Vec<TopicSpec>,
    /// Component name of the backing MSK cluster, when managed here
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster: Option<String>,
}

/// Managed Kafka cluster
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct MskSpec {
    #[serde(default = "default_brokers")]
    pub broker_count: u32,
    #[serde(default = "default_broker_type")]
    pub instance_type: String,
    pub kafka_version: String,
    #[serde(default = "default_storage_gb")]
    pub storage_gb: u32,
}

fn default_brokers() -> u32 {
    3
}

fn default_broker_type() -> String {
    "kafka.m5.large".to_string()
}

fn default_storage_gb() -> u32 {
    100
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sqs_defaults() {
        let spec: SqsSpec = serde_yaml::from_str("{}").unwrap();
        assert!(!spec.fifo);
        assert_eq!(spec.visibility_timeout_seconds, 30);
        assert_eq!(spec.message_retention_seconds, 345_600);
    }

    #[test]
    fn test_sqs_dead_letter_target() {
        let spec: SqsSpec = serde_yaml::from_str(
            r#"
fifo: true
deadLetter:
  targetComponent: orders-dlq
"#,
        )
        .unwrap();
        assert_eq!(
            spec.dead_letter.unwrap().target_component,
            "orders-dlq"
        );
    }

    #[test]
    fn test_msk_requires_version() {
        let missing: Result<MskSpec, _> = serde_yaml::from_str("brokerCount: 3");
        assert!(missing.is_err());
    }
}
