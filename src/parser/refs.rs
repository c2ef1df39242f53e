//! Implicit-reference extraction
//!
//! A component's spec can point at sibling components three ways:
//!
//! - `valueFrom: {component: C, output: X}` anywhere in the spec
//! - kind-specific target fields (`targetComponent`, `component`, `queue`,
//!   `cluster`, sqs/lambda subscription endpoints)
//! - lazy `${component.output}` text references left by interpolation
//!
//! Each occurrence becomes an [`ImplicitRef`], surfaced to the graph
//! builder as an edge and to the validator for resolution checks.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

use crate::schema::{ImplicitRef, Resource};

static OUTPUT_REF_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\$\{([A-Za-z0-9_-]+)\.([A-Za-z0-9_-]+)\}").expect("valid regex"));

/// Collect every implicit reference in a component's spec
///
/// Grouping documents (Stack, Service) yield nothing. Duplicates are
/// removed, preserving first-seen order.
pub fn extract_implicit_refs(resource: &Resource) -> Vec<ImplicitRef> {
    if !resource.is_component() {
        return Vec::new();
    }

    let mut refs = Vec::new();
    walk(&resource.spec_value(), &mut refs);

    let mut seen = std::collections::HashSet::new();
    refs.retain(|r| seen.insert(r.clone()));
    refs
}

fn walk(value: &Value, refs: &mut Vec<ImplicitRef>) {
    match value {
        Value::Object(map) => {
            // valueFrom: {component, output}
            if let Some(Value::Object(vf)) = map.get("valueFrom") {
                if let (Some(Value::String(component)), Some(Value::String(output))) =
                    (vf.get("component"), vf.get("output"))
                {
                    refs.push(ImplicitRef {
                        component: component.clone(),
                        output: Some(output.clone()),
                    });
                }
            }

            // Kind-specific component pointers
            for key in ["targetComponent", "component", "queue", "cluster"] {
                if key == "component" && map.contains_key("output") {
                    continue; // interior of a valueFrom object
                }
                if let Some(Value::String(name)) = map.get(key) {
                    refs.push(ImplicitRef {
                        component: name.clone(),
                        output: None,
                    });
                }
            }

            // sqs/lambda subscriptions name a component in `endpoint`
            if let (Some(Value::String(protocol)), Some(Value::String(endpoint))) =
                (map.get("protocol"), map.get("endpoint"))
            {
                if matches!(protocol.as_str(), "sqs" | "lambda") {
                    refs.push(ImplicitRef {
                        component: endpoint.clone(),
                        output: None,
                    });
                }
            }

            for (key, child) in map {
                if key == "valueFrom" {
                    continue;
                }
                walk(child, refs);
            }
        }
        Value::Array(items) => {
            for item in items {
                walk(item, refs);
            }
        }
        Value::String(text) => {
            for caps in OUTPUT_REF_RE.captures_iter(text) {
                refs.push(ImplicitRef {
                    component: caps[1].to_string(),
                    output: Some(caps[2].to_string()),
                });
            }
        }
        _ => {}
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

    fn parse_one(yaml: &str) -> Resource {
        parse_documents(yaml, &PathBuf::from("test.yaml"))
            .unwrap()
            .remove(0)
    }

    #[test]
    fn test_value_from_extracted() {
        let resource = parse_one(
            r#"
kind: MicroService
metadata: {name: api}
spec:
  image: {repository: r}
  platform: fargate
  env:
    - name: DB_HOST
      valueFrom: {component: db, output: endpoint}
"#,
        );
        let refs = extract_implicit_refs(&resource);
        assert_eq!(
            refs,
            vec![ImplicitRef {
                component: "db".into(),
                output: Some("endpoint".into())
            }]
        );
    }

    #[test]
    fn test_target_component_extracted() {
        let resource = parse_one(
            r#"
kind: ALB
metadata: {name: edge}
spec:
  listeners:
    - port: 443
      protocol: HTTPS
      targetComponent: api
"#,
        );
        let refs = extract_implicit_refs(&resource);
        assert_eq!(refs[0].component, "api");
        assert_eq!(refs[0].output, None);
    }

    #[test]
    fn test_text_output_ref_extracted() {
        let resource = parse_one(
            r#"
kind: Lambda
metadata: {name: notifier}
spec:
  runtime: python3.12
  handler: app.handler
  environment:
    QUEUE_URL: ${orders.url}
"#,
        );
        let refs = extract_implicit_refs(&resource);
        assert_eq!(
            refs,
            vec![ImplicitRef {
                component: "orders".into(),
                output: Some("url".into())
            }]
        );
    }

    #[test]
    fn test_subscription_endpoint_extracted() {
        let resource = parse_one(
            r#"
kind: SNS
metadata: {name: events}
spec:
  subscriptions:
    - protocol: sqs
      endpoint: orders
    - protocol: email
      endpoint: ops@example.com
"#,
        );
        let refs = extract_implicit_refs(&resource);
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].component, "orders");
    }

    #[test]
    fn test_grouping_documents_yield_nothing() {
        let resource = parse_one(
            r#"
kind: Service
metadata: {name: backend}
"#,
        );
        assert!(extract_implicit_refs(&resource).is_empty());
    }

    #[test]
    fn test_duplicates_removed() {
        let resource = parse_one(
            r#"
kind: Worker
metadata: {name: consumer}
spec:
  image: {repository: r}
  queue: orders
  env:
    - name: QUEUE_URL
      valueFrom: {component: orders, output: url}
    - name: QUEUE_URL_AGAIN
      valueFrom: {component: orders, output: url}
"#,
        );
        let refs = extract_implicit_refs(&resource);
        assert_eq!(refs.len(), 2); // (orders, url) and (orders, None)
    }
}
