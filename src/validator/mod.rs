//! # Validator
//!
//! Structural, naming, kind-specific, cross-reference, and cycle checks
//! over a parsed [`ResourceSet`]. Every rule runs; the result carries all
//! errors or none, so users fix a configuration in one round trip.
//!
//! Errors are structured (`path`, `message`, category); warnings (empty
//! stack, orphan components) never fail validation.

mod rules;

use std::collections::BTreeMap;
use std::fmt;

use crate::graph::{DependencyGraph, GraphError};
use crate::parser::{extract_implicit_refs, ResourceSet};
use crate::schema::{ComponentSpec, Kind};
use crate::types::{ComponentName, NameError, ServiceName, StackName};

// ============================================================================
// VALIDATION ERRORS
// ============================================================================

/// One structured validation failure
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationError {
    /// Where in the resource tree, e.g. `backend/db.spec.engine`
    pub path: String,
    pub message: String,
    pub category: ErrorCategory,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Naming,
    Structure,
    KindRule,
    Reference,
    Cycle,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::Naming => "naming",
            ErrorCategory::Structure => "structure",
            ErrorCategory::KindRule => "kind",
            ErrorCategory::Reference => "reference",
            ErrorCategory::Cycle => "cycle",
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}: {}", self.category.as_str(), self.path, self.message)
    }
}

/// Aggregate result: all errors, or none
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ValidationReport {
    pub errors: Vec<ValidationError>,
    pub warnings: Vec<String>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn push(&mut self, path: impl Into<String>, category: ErrorCategory, message: impl Into<String>) {
        self.errors.push(ValidationError {
            path: path.into(),
            message: message.into(),
            category,
        });
    }

    pub fn warn(&mut self, message: impl Into<String>) {
        self.warnings.push(message.into());
    }

    /// Errors of one category, for targeted assertions
    pub fn by_category(&self, category: ErrorCategory) -> Vec<&ValidationError> {
        self.errors
            .iter()
            .filter(|e| e.category == category)
            .collect()
    }
}

impl fmt::Display for ValidationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "validation failed with {} error(s):", self.errors.len())?;
        for error in &self.errors {
            writeln!(f, "  {error}")?;
        }
        Ok(())
    }
}

impl std::error::Error for ValidationReport {}

// ============================================================================
// VALIDATOR
// ============================================================================

#[derive(Debug, Default)]
pub struct Validator;

impl Validator {
    pub fn new() -> Self {
        Self
    }

    /// Run every check over the resource set
    pub fn validate(&self, set: &ResourceSet) -> ValidationReport {
        let mut report = ValidationReport::default();

        self.check_stack(set, &mut report);
        self.check_names_and_uniqueness(set, &mut report);
        self.check_services(set, &mut report);
        for component in &set.components {
            let path = component_path(component.service(), component.name());
            rules::check_component(component, &path, &mut report);
        }
        self.check_references(set, &mut report);
        self.check_cycles(set, &mut report);

        report
    }

    fn check_stack(&self, set: &ResourceSet, report: &mut ValidationReport) {
        let path = set.stack_name().to_string();
        if let ComponentSpec::Stack(spec) = &set.stack.spec {
            if !matches!(spec.provider.name.as_str(), "aws" | "azure" | "gcp") {
                report.push(
                    format!("{path}.spec.provider.name"),
                    ErrorCategory::Structure,
                    format!(
                        "unsupported provider '{}': expected aws, azure, or gcp",
                        spec.provider.name
                    ),
                );
            }
            if spec.provider.region.trim().is_empty() {
                report.push(
                    format!("{path}.spec.provider.region"),
                    ErrorCategory::Structure,
                    "region is required",
                );
            }
        }
        if set.components.is_empty() {
            report.warn(format!("stack '{}' declares no components", set.stack_name()));
        }
    }

    fn check_names_and_uniqueness(&self, set: &ResourceSet, report: &mut ValidationReport) {
        if let Err(err) = StackName::new(set.stack_name()) {
            report.push(set.stack_name(), ErrorCategory::Naming, name_message(&err));
        }

        let mut service_names: BTreeMap<&str, usize> = BTreeMap::new();
        for service in &set.services {
            if let Err(err) = ServiceName::new(service.name()) {
                report.push(service.name(), ErrorCategory::Naming, name_message(&err));
            }
            *service_names.entry(service.name()).or_insert(0) += 1;
        }
        for (name, count) in service_names {
            if count > 1 {
                report.push(
                    name,
                    ErrorCategory::Structure,
                    format!("service name '{name}' is declared {count} times in the stack"),
                );
            }
        }

        // Component names are graph node ids: unique within the service
        // scope and across the whole stack.
        let mut scoped: BTreeMap<(String, &str), usize> = BTreeMap::new();
        let mut global: BTreeMap<&str, usize> = BTreeMap::new();
        for component in &set.components {
            let path = component_path(component.service(), component.name());
            if let Err(err) = ComponentName::new(component.name()) {
                report.push(path.clone(), ErrorCategory::Naming, name_message(&err));
            }
            let scope = component.service().unwrap_or_default().to_string();
            *scoped.entry((scope, component.name())).or_insert(0) += 1;
            *global.entry(component.name()).or_insert(0) += 1;
        }
        for ((service, name), count) in &scoped {
            if *count > 1 {
                report.push(
                    component_path(Some(service.as_str()), name),
                    ErrorCategory::Structure,
                    format!("component name '{name}' is declared {count} times in service '{service}'"),
                );
            }
        }
        for (name, count) in global {
            if count > 1 && !scoped.iter().any(|((_, n), c)| *n == name && *c > 1) {
                report.push(
                    name,
                    ErrorCategory::Structure,
                    format!("component name '{name}' is used in more than one service; names must be stack-unique"),
                );
            }
        }
    }

    fn check_services(&self, set: &ResourceSet, report: &mut ValidationReport) {
        for service in &set.services {
            let has_components = set
                .components
                .iter()
                .any(|c| c.service() == Some(service.name()));
            let marked_empty = matches!(&service.spec, ComponentSpec::Service(s) if s.empty);
            if !has_components && !marked_empty {
                report.push(
                    service.name(),
                    ErrorCategory::Structure,
                    format!(
                        "service '{}' declares no components; set spec.empty if intentional",
                        service.name()
                    ),
                );
            }
        }
    }

    fn check_references(&self, set: &ResourceSet, report: &mut ValidationReport) {
        for component in &set.components {
            let path = component_path(component.service(), component.name());
            for target in &component.depends_on {
                if set.component(target).is_none() {
                    report.push(
                        format!("{path}.dependsOn"),
                        ErrorCategory::Reference,
                        format!("dependsOn target '{target}' does not exist"),
                    );
                }
            }
            for implicit in extract_implicit_refs(component) {
                if set.component(&implicit.component).is_none() {
                    let what = match &implicit.output {
                        Some(output) => format!("output '{}.{output}'", implicit.component),
                        None => format!("component '{}'", implicit.component),
                    };
                    report.push(
                        path.clone(),
                        ErrorCategory::Reference,
                        format!("reference to unknown {what}"),
                    );
                }
            }
        }
    }

    fn check_cycles(&self, set: &ResourceSet, report: &mut ValidationReport) {
        let graph = DependencyGraph::from_resources(set);
        if let Err(GraphError::CycleDetected { path }) = graph.ensure_acyclic() {
            report.push(
                path.first().cloned().unwrap_or_default(),
                ErrorCategory::Cycle,
                format!("dependency cycle: {}", path.join(" → ")),
            );
        }
    }
}

fn component_path(service: Option<&str>, name: &str) -> String {
    match service {
        Some(service) => format!("{service}/{name}"),
        None => name.to_string(),
    }
}

fn name_message(err: &NameError) -> String {
    err.to_string()
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_documents;
    use std::path::PathBuf;

    fn set_from(yaml: &str) -> ResourceSet {
        let docs = parse_documents(yaml, &PathBuf::from("test.yaml")).unwrap();
        let stack = docs.iter().find(|d| d.kind == Kind::Stack).cloned().unwrap();
        let services = docs.iter().filter(|d| d.kind == Kind::Service).cloned().collect();
        let mut components: Vec<_> =
            docs.into_iter().filter(|d| d.kind.is_component()).collect();
        for c in &mut components {
            c.metadata.stack.get_or_insert_with(|| "app".into());
            c.metadata.service.get_or_insert_with(|| "backend".into());
        }
        ResourceSet {
            stack,
            services,
            components,
            variables: Default::default(),
            source_checksum: String::new(),
        }
    }

    const STACK_HEADER: &str = r#"
kind: Stack
metadata: {name: app}
spec:
  provider: {name: aws, region: us-east-1}
---
kind: Service
metadata: {name: backend}
---
"#;

    #[test]
    fn test_valid_two_component_stack() {
        let set = set_from(&format!(
            "{STACK_HEADER}
kind: RDS
metadata: {{name: db}}
spec:
  engine: postgres
  allocatedStorage: 20
  passwordSecret: arn:aws:secretsmanager:us-east-1:123456789012:secret:db
---
kind: MicroService
metadata: {{name: api}}
dependsOn: [db]
spec:
  image: {{repository: registry.example.com/api}}
  platform: fargate
  ports: [{{name: http, containerPort: 8080}}]
  healthCheck: {{path: /healthz}}
"
        ));
        let report = Validator::new().validate(&set);
        assert!(report.is_valid(), "unexpected errors: {report}");
    }

    #[test]
    fn test_duplicate_component_name_fails() {
        let set = set_from(&format!(
            "{STACK_HEADER}
kind: SQS
metadata: {{name: orders}}
---
kind: SQS
metadata: {{name: orders}}
"
        ));
        let report = Validator::new().validate(&set);
        assert!(!report.is_valid());
        assert!(!report.by_category(ErrorCategory::Structure).is_empty());
    }

    #[test]
    fn test_missing_depends_on_target_is_reference_error() {
        let set = set_from(&format!(
            "{STACK_HEADER}
kind: SQS
metadata: {{name: orders}}
dependsOn: [ghost]
"
        ));
        let report = Validator::new().validate(&set);
        let refs = report.by_category(ErrorCategory::Reference);
        assert_eq!(refs.len(), 1);
        assert!(refs[0].message.contains("ghost"));
        assert!(refs[0].path.contains("orders"));
    }

    #[test]
    fn test_cycle_reported_with_path() {
        let set = set_from(&format!(
            "{STACK_HEADER}
kind: SQS
metadata: {{name: a}}
dependsOn: [b]
---
kind: SQS
metadata: {{name: b}}
dependsOn: [c]
---
kind: SQS
metadata: {{name: c}}
dependsOn: [a]
"
        ));
        let report = Validator::new().validate(&set);
        let cycles = report.by_category(ErrorCategory::Cycle);
        assert_eq!(cycles.len(), 1);
        assert!(cycles[0].message.contains("→"));
    }

    #[test]
    fn test_unsupported_provider_rejected() {
        let set = set_from(
            r#"
kind: Stack
metadata: {name: app}
spec:
  provider: {name: hetzner, region: eu-central}
---
kind: Service
metadata: {name: backend}
---
kind: SQS
metadata: {name: q}
"#,
        );
        let report = Validator::new().validate(&set);
        assert!(report
            .by_category(ErrorCategory::Structure)
            .iter()
            .any(|e| e.message.contains("hetzner")));
    }

    #[test]
    fn test_bad_component_name_is_naming_error() {
        let set = set_from(&format!(
            "{STACK_HEADER}
kind: SQS
metadata: {{name: Bad_Name}}
"
        ));
        let report = Validator::new().validate(&set);
        assert!(!report.by_category(ErrorCategory::Naming).is_empty());
    }

    #[test]
    fn test_all_errors_collected_before_abort() {
        let set = set_from(&format!(
            "{STACK_HEADER}
kind: SQS
metadata: {{name: Bad_Name}}
---
kind: SQS
metadata: {{name: orders}}
dependsOn: [ghost]
"
        ));
        let report = Validator::new().validate(&set);
        // Naming and reference failures surface together.
        assert!(!report.by_category(ErrorCategory::Naming).is_empty());
        assert!(!report.by_category(ErrorCategory::Reference).is_empty());
    }
}
