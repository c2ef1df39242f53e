//! # Resource Schema
//!
//! Typed model for every document kind Panka ingests. A document stream
//! yields a heterogeneous sequence of [`Resource`] values; discrimination is
//! two-phase: a header probe reads `apiVersion`/`kind`/`metadata`, then the
//! kind-specific decoder populates the matching [`ComponentSpec`] arm.
//! Unknown kinds and unknown fields within a known kind are both errors.
//!
//! ## Kinds
//!
//! | Group | Kinds |
//! |-------|-------|
//! | Core | `Stack`, `Service` |
//! | Compute | `MicroService`, `Worker`, `CronJob`, `Lambda` |
//! | Database | `RDS`, `DynamoDB`, `DocumentDB` |
//! | Storage | `S3`, `EFS`, `EBS` |
//! | Messaging | `SQS`, `SNS`, `EventBridge`, `Kafka`, `MSK` |
//! | Networking | `ALB`, `NLB`, `CloudFront`, `APIGateway` |

mod compute;
mod database;
mod messaging;
mod network;
mod stack;
mod storage;

pub use compute::{
    CronJobSpec, EnvVar, HealthCheck, ImageSpec, LambdaSpec, MicroServiceSpec, PortSpec,
    ResourceRequests, WorkerSpec,
};
pub use database::{AttributeDef, DocumentDbSpec, DynamoDbSpec, GlobalSecondaryIndex, KeySpec, RdsSpec};
pub use messaging::{DeadLetterSpec, EventBridgeSpec, EventTarget, KafkaSpec, MskSpec, SnsSpec, SqsSpec, Subscription, TopicSpec};
pub use network::{ApiGatewaySpec, CloudFrontSpec, Listener, LoadBalancerSpec, Origin, Route};
pub use stack::{ProviderBlock, ServiceSpec, StackSpec};
pub use storage::{EbsSpec, EfsSpec, LifecycleRule, S3Spec};

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

// ============================================================================
// KIND
// ============================================================================

/// Discriminant enum tagging each parsed resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Kind {
    Stack,
    Service,
    MicroService,
    Worker,
    CronJob,
    Lambda,
    #[serde(rename = "RDS")]
    Rds,
    #[serde(rename = "DynamoDB")]
    DynamoDb,
    #[serde(rename = "DocumentDB")]
    DocumentDb,
    S3,
    #[serde(rename = "EFS")]
    Efs,
    #[serde(rename = "EBS")]
    Ebs,
    #[serde(rename = "SQS")]
    Sqs,
    #[serde(rename = "SNS")]
    Sns,
    EventBridge,
    Kafka,
    #[serde(rename = "MSK")]
    Msk,
    #[serde(rename = "ALB")]
    Alb,
    #[serde(rename = "NLB")]
    Nlb,
    CloudFront,
    #[serde(rename = "APIGateway")]
    ApiGateway,
}

impl Kind {
    pub const ALL: &'static [Kind] = &[
        Kind::Stack,
        Kind::Service,
        Kind::MicroService,
        Kind::Worker,
        Kind::CronJob,
        Kind::Lambda,
        Kind::Rds,
        Kind::DynamoDb,
        Kind::DocumentDb,
        Kind::S3,
        Kind::Efs,
        Kind::Ebs,
        Kind::Sqs,
        Kind::Sns,
        Kind::EventBridge,
        Kind::Kafka,
        Kind::Msk,
        Kind::Alb,
        Kind::Nlb,
        Kind::CloudFront,
        Kind::ApiGateway,
    ];

    /// Canonical YAML spelling
    pub fn as_str(&self) -> &'static str {
        match self {
            Kind::Stack => "Stack",
            Kind::Service => "Service",
            Kind::MicroService => "MicroService",
            Kind::Worker => "Worker",
            Kind::CronJob => "CronJob",
            Kind::Lambda => "Lambda",
            Kind::Rds => "RDS",
            Kind::DynamoDb => "DynamoDB",
            Kind::DocumentDb => "DocumentDB",
            Kind::S3 => "S3",
            Kind::Efs => "EFS",
            Kind::Ebs => "EBS",
            Kind::Sqs => "SQS",
            Kind::Sns => "SNS",
            Kind::EventBridge => "EventBridge",
            Kind::Kafka => "Kafka",
            Kind::Msk => "MSK",
            Kind::Alb => "ALB",
            Kind::Nlb => "NLB",
            Kind::CloudFront => "CloudFront",
            Kind::ApiGateway => "APIGateway",
        }
    }

    /// Whether this kind names a deployable cloud resource (not a grouping
    /// document)
    pub fn is_component(&self) -> bool {
        !matches!(self, Kind::Stack | Kind::Service)
    }

    /// FIFO-flavored kinds get `.fifo` appended to generated names
    pub fn is_fifo_capable(&self) -> bool {
        matches!(self, Kind::Sqs | Kind::Sns)
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Kind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Kind::ALL
            .iter()
            .find(|k| k.as_str() == s)
            .copied()
            .ok_or_else(|| format!("unknown kind '{s}'"))
    }
}

// ============================================================================
// METADATA
// ============================================================================

/// Common metadata carried by every document
///
/// `stack` and `service` are inherited from the containing folder in folder
/// mode; in multi-document file mode they may be set explicitly.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Metadata {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
}

// ============================================================================
// CROSS-REFERENCES
// ============================================================================

/// Reference to another component's output, resolved at reconcile time
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ValueFrom {
    pub component: String,
    pub output: String,
}

/// Implicit dependency extracted from a component's spec
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ImplicitRef {
    /// Referenced component name
    pub component: String,
    /// Referenced output attribute, when the reference names one
    pub output: Option<String>,
}

// ============================================================================
// COMPONENT SPEC (tagged variant)
// ============================================================================

/// Kind-specific spec payload
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ComponentSpec {
    Stack(StackSpec),
    Service(ServiceSpec),
    MicroService(MicroServiceSpec),
    Worker(WorkerSpec),
    CronJob(CronJobSpec),
    Lambda(LambdaSpec),
    Rds(RdsSpec),
    DynamoDb(DynamoDbSpec),
    DocumentDb(DocumentDbSpec),
    S3(S3Spec),
    Efs(EfsSpec),
    Ebs(EbsSpec),
    Sqs(SqsSpec),
    Sns(SnsSpec),
    EventBridge(EventBridgeSpec),
    Kafka(KafkaSpec),
    Msk(MskSpec),
    Alb(LoadBalancerSpec),
    Nlb(LoadBalancerSpec),
    CloudFront(CloudFrontSpec),
    ApiGateway(ApiGatewaySpec),
}

impl ComponentSpec {
    /// Decode the spec payload for a given kind
    ///
    /// This is the second phase of the two-phase parse: the header told us
    /// the kind, here the kind-specific decoder rejects unknown fields.
    pub fn decode(kind: Kind, value: serde_yaml::Value) -> Result<Self, serde_yaml::Error> {
        Ok(match kind {
            Kind::Stack => ComponentSpec::Stack(serde_yaml::from_value(value)?),
            Kind::Service => ComponentSpec::Service(serde_yaml::from_value(value)?),
            Kind::MicroService => ComponentSpec::MicroService(serde_yaml::from_value(value)?),
            Kind::Worker => ComponentSpec::Worker(serde_yaml::from_value(value)?),
            Kind::CronJob => ComponentSpec::CronJob(serde_yaml::from_value(value)?),
            Kind::Lambda => ComponentSpec::Lambda(serde_yaml::from_value(value)?),
            Kind::Rds => ComponentSpec::Rds(serde_yaml::from_value(value)?),
            Kind::DynamoDb => ComponentSpec::DynamoDb(serde_yaml::from_value(value)?),
            Kind::DocumentDb => ComponentSpec::DocumentDb(serde_yaml::from_value(value)?),
            Kind::S3 => ComponentSpec::S3(serde_yaml::from_value(value)?),
            Kind::Efs => ComponentSpec::Efs(serde_yaml::from_value(value)?),
            Kind::Ebs => ComponentSpec::Ebs(serde_yaml::from_value(value)?),
            Kind::Sqs => ComponentSpec::Sqs(serde_yaml::from_value(value)?),
            Kind::Sns => ComponentSpec::Sns(serde_yaml::from_value(value)?),
            Kind::EventBridge => ComponentSpec::EventBridge(serde_yaml::from_value(value)?),
            Kind::Kafka => ComponentSpec::Kafka(serde_yaml::from_value(value)?),
            Kind::Msk => ComponentSpec::Msk(serde_yaml::from_value(value)?),
            Kind::Alb => ComponentSpec::Alb(serde_yaml::from_value(value)?),
            Kind::Nlb => ComponentSpec::Nlb(serde_yaml::from_value(value)?),
            Kind::CloudFront => ComponentSpec::CloudFront(serde_yaml::from_value(value)?),
            Kind::ApiGateway => ComponentSpec::ApiGateway(serde_yaml::from_value(value)?),
        })
    }
}

// ============================================================================
// RESOURCE (desired)
// ============================================================================

/// A parsed desired-state resource: one YAML document
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Resource {
    pub api_version: String,
    pub kind: Kind,
    pub metadata: Metadata,
    /// Explicit dependencies on sibling components
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,
    pub spec: ComponentSpec,
}

impl Resource {
    /// Component name (graph node id)
    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    /// Containing service, when known
    pub fn service(&self) -> Option<&str> {
        self.metadata.service.as_deref()
    }

    /// Containing stack, when known
    pub fn stack(&self) -> Option<&str> {
        self.metadata.stack.as_deref()
    }

    /// Whether this resource is a deployable component
    pub fn is_component(&self) -> bool {
        self.kind.is_component()
    }

    /// Spec serialized to a JSON value, the differ's comparison space
    pub fn spec_value(&self) -> serde_json::Value {
        serde_json::to_value(&self.spec).unwrap_or(serde_json::Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_round_trip() {
        for kind in Kind::ALL {
            let parsed: Kind = kind.as_str().parse().unwrap();
            assert_eq!(parsed, *kind);
        }
    }

    #[test]
    fn test_unknown_kind_rejected() {
        assert!("Database".parse::<Kind>().is_err());
        assert!("rds".parse::<Kind>().is_err());
    }

    #[test]
    fn test_component_classification() {
        assert!(!Kind::Stack.is_component());
        assert!(!Kind::Service.is_component());
        assert!(Kind::Rds.is_component());
        assert!(Kind::Sqs.is_fifo_capable());
        assert!(!Kind::Rds.is_fifo_capable());
    }

    #[test]
    fn test_spec_decode_rejects_unknown_fields() {
        let value: serde_yaml::Value = serde_yaml::from_str(
            r#"
engine: postgres
allocatedStorage: 20
passwordSecret: arn:aws:secretsmanager:us-east-1:123:secret:db
bogusField: true
"#,
        )
        .unwrap();
        assert!(ComponentSpec::decode(Kind::Rds, value).is_err());
    }
}
