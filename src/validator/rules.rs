//! Kind-specific validation rules
//!
//! One check function per component family; every violation lands in the
//! shared report so the caller sees the complete picture.

use once_cell::sync::Lazy;
use regex::Regex;

use super::{ErrorCategory, ValidationReport};
use crate::schema::{ComponentSpec, DynamoDbSpec, RdsSpec, Resource, S3Spec};

/// ARN shape: at least `arn:partition:service:region:account:resource`
static ARN_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^arn:[a-z0-9-]+:[a-z0-9-]+:[a-z0-9-]*:[0-9]*:.+$").expect("valid regex"));

/// Secret path shape when not an ARN
static SECRET_PATH_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^/?[A-Za-z0-9_.-]+(/[A-Za-z0-9_.-]+)*$").expect("valid regex"));

/// Run the rules for one component
pub fn check_component(component: &Resource, path: &str, report: &mut ValidationReport) {
    match &component.spec {
        ComponentSpec::MicroService(spec) => check_microservice(spec, path, report),
        ComponentSpec::Rds(spec) => check_rds(spec, path, report),
        ComponentSpec::DynamoDb(spec) => check_dynamodb(spec, path, report),
        ComponentSpec::S3(spec) => check_s3(spec, path, report),
        ComponentSpec::DocumentDb(spec) => {
            check_secret_ref(&spec.password_secret, path, report);
        }
        ComponentSpec::CronJob(spec) => check_cron_schedule(&spec.schedule, path, report),
        ComponentSpec::Lambda(spec) => {
            if spec.runtime.trim().is_empty() {
                report.push(
                    format!("{path}.spec.runtime"),
                    ErrorCategory::KindRule,
                    "runtime is required",
                );
            }
            if spec.handler.trim().is_empty() {
                report.push(
                    format!("{path}.spec.handler"),
                    ErrorCategory::KindRule,
                    "handler is required",
                );
            }
        }
        ComponentSpec::Alb(spec) | ComponentSpec::Nlb(spec) => {
            if spec.listeners.is_empty() {
                report.push(
                    format!("{path}.spec.listeners"),
                    ErrorCategory::KindRule,
                    "at least one listener is required",
                );
            }
        }
        ComponentSpec::CloudFront(spec) => {
            if spec.origins.is_empty() {
                report.push(
                    format!("{path}.spec.origins"),
                    ErrorCategory::KindRule,
                    "at least one origin is required",
                );
            }
            for (i, origin) in spec.origins.iter().enumerate() {
                if origin.component.is_none() && origin.domain_name.is_none() {
                    report.push(
                        format!("{path}.spec.origins[{i}]"),
                        ErrorCategory::KindRule,
                        "origin needs a component or a domainName",
                    );
                }
            }
        }
        ComponentSpec::EventBridge(spec) => {
            if spec.schedule_expression.is_none() && spec.event_pattern.is_none() {
                report.push(
                    format!("{path}.spec"),
                    ErrorCategory::KindRule,
                    "a scheduleExpression or an eventPattern is required",
                );
            }
        }
        ComponentSpec::Msk(spec) => {
            if spec.kafka_version.trim().is_empty() {
                report.push(
                    format!("{path}.spec.kafkaVersion"),
                    ErrorCategory::KindRule,
                    "kafkaVersion is required",
                );
            }
        }
        _ => {}
    }
}

fn check_microservice(
    spec: &crate::schema::MicroServiceSpec,
    path: &str,
    report: &mut ValidationReport,
) {
    if spec.image.repository.trim().is_empty() {
        report.push(
            format!("{path}.spec.image.repository"),
            ErrorCategory::KindRule,
            "image repository is required",
        );
    }
    if spec.ports.is_empty() {
        report.push(
            format!("{path}.spec.ports"),
            ErrorCategory::KindRule,
            "at least one port is required",
        );
    }
    let mut seen = std::collections::BTreeSet::new();
    for port in &spec.ports {
        if !seen.insert(port.name.as_str()) {
            report.push(
                format!("{path}.spec.ports"),
                ErrorCategory::KindRule,
                format!("duplicate port name '{}'", port.name),
            );
        }
    }
    if !matches!(spec.platform.as_str(), "ecs" | "fargate" | "eks") {
        report.push(
            format!("{path}.spec.platform"),
            ErrorCategory::KindRule,
            format!(
                "unsupported platform '{}': expected ecs, fargate, or eks",
                spec.platform
            ),
        );
    }
    if spec.health_check.is_none() {
        report.push(
            format!("{path}.spec.healthCheck"),
            ErrorCategory::KindRule,
            "a healthCheck section is required",
        );
    }
}

fn check_rds(spec: &RdsSpec, path: &str, report: &mut ValidationReport) {
    if !matches!(
        spec.engine.as_str(),
        "postgres" | "mysql" | "mariadb" | "aurora"
    ) {
        report.push(
            format!("{path}.spec.engine"),
            ErrorCategory::KindRule,
            format!(
                "unsupported engine '{}': expected postgres, mysql, mariadb, or aurora",
                spec.engine
            ),
        );
    }
    let minimum = RdsSpec::engine_minimum_storage(&spec.engine);
    if spec.allocated_storage < minimum {
        report.push(
            format!("{path}.spec.allocatedStorage"),
            ErrorCategory::KindRule,
            format!(
                "allocatedStorage {} is below the {} minimum of {minimum} GB",
                spec.allocated_storage, spec.engine
            ),
        );
    }
    check_secret_ref(&spec.password_secret, path, report);
}

fn check_dynamodb(spec: &DynamoDbSpec, path: &str, report: &mut ValidationReport) {
    match spec.billing_mode.as_str() {
        "PAY_PER_REQUEST" => {}
        "PROVISIONED" => {
            if spec.read_capacity.is_none() || spec.write_capacity.is_none() {
                report.push(
                    format!("{path}.spec.billingMode"),
                    ErrorCategory::KindRule,
                    "PROVISIONED billing requires readCapacity and writeCapacity",
                );
            }
        }
        other => {
            report.push(
                format!("{path}.spec.billingMode"),
                ErrorCategory::KindRule,
                format!("unsupported billing mode '{other}': expected PAY_PER_REQUEST or PROVISIONED"),
            );
        }
    }

    // Every key and GSI key must be covered by an attribute definition.
    let defined: std::collections::BTreeSet<&str> =
        spec.attributes.iter().map(|a| a.name.as_str()).collect();
    let mut required: Vec<&str> = vec![spec.hash_key.as_str()];
    if let Some(range) = &spec.range_key {
        required.push(range);
    }
    for gsi in &spec.global_secondary_indexes {
        required.push(&gsi.hash_key);
        if let Some(range) = &gsi.range_key {
            required.push(range);
        }
    }
    for key in required {
        if !defined.contains(key) {
            report.push(
                format!("{path}.spec.attributes"),
                ErrorCategory::KindRule,
                format!("key attribute '{key}' has no attribute definition"),
            );
        }
    }
}

fn check_s3(spec: &S3Spec, path: &str, report: &mut ValidationReport) {
    if !S3Spec::VALID_ACLS.contains(&spec.acl.as_str()) {
        report.push(
            format!("{path}.spec.acl"),
            ErrorCategory::KindRule,
            format!(
                "invalid ACL '{}': expected one of {}",
                spec.acl,
                S3Spec::VALID_ACLS.join(", ")
            ),
        );
    }
    for (i, rule) in spec.lifecycle_rules.iter().enumerate() {
        match &rule.storage_class {
            Some(class) if !S3Spec::VALID_STORAGE_CLASSES.contains(&class.as_str()) => {
                report.push(
                    format!("{path}.spec.lifecycleRules[{i}].storageClass"),
                    ErrorCategory::KindRule,
                    format!("invalid storage class '{class}'"),
                );
            }
            None if !rule.expire => {
                report.push(
                    format!("{path}.spec.lifecycleRules[{i}]"),
                    ErrorCategory::KindRule,
                    "rule needs a storageClass transition or expire: true",
                );
            }
            _ => {}
        }
    }
}

fn check_cron_schedule(schedule: &str, path: &str, report: &mut ValidationReport) {
    if schedule.split_whitespace().count() != 5 {
        report.push(
            format!("{path}.spec.schedule"),
            ErrorCategory::KindRule,
            format!("schedule '{schedule}' is not a five-field cron expression"),
        );
    }
}

/// A secret reference is a well-formed ARN or a path
fn check_secret_ref(value: &str, path: &str, report: &mut ValidationReport) {
    let ok = if value.starts_with("arn:") {
        ARN_RE.is_match(value)
    } else {
        SECRET_PATH_RE.is_match(value)
    };
    if !ok {
        report.push(
            format!("{path}.spec.passwordSecret"),
            ErrorCategory::KindRule,
            format!("'{value}' is not a valid secret ARN or path"),
        );
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_documents;
    use std::path::PathBuf;

    fn check(yaml: &str) -> ValidationReport {
        let resource = parse_documents(yaml, &PathBuf::from("test.yaml"))
            .unwrap()
            .remove(0);
        let mut report = ValidationReport::default();
        check_component(&resource, resource.name(), &mut report);
        report
    }

    #[test]
    fn test_microservice_requires_health_check_and_platform() {
        let report = check(
            r#"
kind: MicroService
metadata: {name: api}
spec:
  image: {repository: registry.example.com/api}
  platform: bare-metal
  ports:
    - {name: http, containerPort: 8080}
    - {name: http, containerPort: 8081}
"#,
        );
        let messages: Vec<_> = report.errors.iter().map(|e| e.message.as_str()).collect();
        assert!(messages.iter().any(|m| m.contains("platform")));
        assert!(messages.iter().any(|m| m.contains("healthCheck")));
        assert!(messages.iter().any(|m| m.contains("duplicate port")));
    }

    #[test]
    fn test_rds_storage_minimum() {
        let report = check(
            r#"
kind: RDS
metadata: {name: db}
spec:
  engine: postgres
  allocatedStorage: 5
  passwordSecret: arn:aws:secretsmanager:us-east-1:123456789012:secret:db
"#,
        );
        assert!(report.errors[0].message.contains("minimum of 20"));
    }

    #[test]
    fn test_rds_bad_secret_ref() {
        let report = check(
            r#"
kind: RDS
metadata: {name: db}
spec:
  engine: postgres
  allocatedStorage: 20
  passwordSecret: "arn:nope"
"#,
        );
        assert!(report
            .errors
            .iter()
            .any(|e| e.message.contains("secret ARN or path")));
    }

    #[test]
    fn test_dynamodb_provisioned_needs_capacity() {
        let report = check(
            r#"
kind: DynamoDB
metadata: {name: table}
spec:
  billingMode: PROVISIONED
  hashKey: pk
  attributes: [{name: pk, type: S}]
"#,
        );
        assert!(report
            .errors
            .iter()
            .any(|e| e.message.contains("readCapacity")));
    }

    #[test]
    fn test_dynamodb_gsi_keys_need_definitions() {
        let report = check(
            r#"
kind: DynamoDB
metadata: {name: table}
spec:
  billingMode: PAY_PER_REQUEST
  hashKey: pk
  attributes: [{name: pk, type: S}]
  globalSecondaryIndexes:
    - {name: by-owner, hashKey: owner}
"#,
        );
        assert!(report.errors.iter().any(|e| e.message.contains("'owner'")));
    }

    #[test]
    fn test_s3_acl_and_storage_class() {
        let report = check(
            r#"
kind: S3
metadata: {name: assets}
spec:
  acl: everyone
  lifecycleRules:
    - {days: 30, storageClass: FROZEN}
"#,
        );
        assert_eq!(report.errors.len(), 2);
    }

    #[test]
    fn test_cron_schedule_field_count() {
        let report = check(
            r#"
kind: CronJob
metadata: {name: nightly}
spec:
  image: {repository: r}
  schedule: "0 3 * * *"
"#,
        );
        assert!(report.is_valid());

        let bad = check(
            r#"
kind: CronJob
metadata: {name: nightly}
spec:
  image: {repository: r}
  schedule: "every day"
"#,
        );
        assert!(!bad.is_valid());
    }

    #[test]
    fn test_eventbridge_needs_trigger() {
        let report = check(
            r#"
kind: EventBridge
metadata: {name: rule}
spec:
  targets: [{component: fn}]
"#,
        );
        assert!(report
            .errors
            .iter()
            .any(|e| e.message.contains("scheduleExpression")));
    }
}
