//! Mock resource provider
//!
//! Simulates a cloud in memory: creations land in a DashMap, outputs are
//! synthesized per kind, and failures/latency are scriptable per resource.
//! Backs the test suite, the E2E scenarios, and `--dry-run`.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;

use super::{
    cloud_resource_name, resource_tags, ProviderError, ProviderOptions, ProviderResult,
    ResourceProvider,
};
use crate::schema::{Kind, Resource};
use crate::state::{ResourceState, ResourceStatus};

#[derive(Debug, Clone)]
struct MockResource {
    kind: Kind,
    outputs: BTreeMap<String, String>,
    #[allow(dead_code)]
    tags: BTreeMap<String, String>,
}

/// Scriptable in-memory provider
#[derive(Default)]
pub struct MockProvider {
    resources: DashMap<String, MockResource>,
    /// Component name → error message injected on create/update
    failures: DashMap<String, String>,
    /// Component name → error message injected on read
    read_failures: DashMap<String, String>,
    /// Simulated latency applied to every mutation
    latency: Mutex<Option<Duration>>,
    /// Per-resource latency overrides
    latency_overrides: DashMap<String, Duration>,
    create_calls: AtomicUsize,
    delete_calls: AtomicUsize,
    /// Mutation order, for assertions on rollback sequencing
    journal: Mutex<Vec<String>>,
}

impl MockProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Script a failure for one component
    pub fn fail_on(&self, component: &str, message: &str) {
        self.failures
            .insert(component.to_string(), message.to_string());
    }

    /// Apply a fixed latency to every mutation
    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock().expect("latency lock") = Some(latency);
    }

    /// Override the latency for one resource
    pub fn set_latency_for(&self, id: &str, latency: Duration) {
        self.latency_overrides.insert(id.to_string(), latency);
    }

    /// Script a failure for one component's reads
    pub fn fail_read(&self, component: &str, message: &str) {
        self.read_failures
            .insert(component.to_string(), message.to_string());
    }

    /// Simulate out-of-band deletion (drift)
    pub fn remove_externally(&self, id: &str) -> bool {
        self.resources.remove(id).is_some()
    }

    /// Simulate an out-of-band modification of a live resource's outputs
    pub fn set_outputs(&self, id: &str, outputs: BTreeMap<String, String>) -> bool {
        match self.resources.get_mut(id) {
            Some(mut resource) => {
                resource.outputs = outputs;
                true
            }
            None => false,
        }
    }

    pub fn resource_count(&self) -> usize {
        self.resources.len()
    }

    pub fn create_calls(&self) -> usize {
        self.create_calls.load(Ordering::SeqCst)
    }

    pub fn delete_calls(&self) -> usize {
        self.delete_calls.load(Ordering::SeqCst)
    }

    /// Ordered record of mutations, e.g. `create db`, `delete api`
    pub fn journal(&self) -> Vec<String> {
        self.journal.lock().expect("journal lock").clone()
    }

    fn record(&self, entry: String) {
        self.journal.lock().expect("journal lock").push(entry);
    }

    async fn simulate_latency(&self, id: &str) {
        let latency = self
            .latency_overrides
            .get(id)
            .map(|entry| *entry.value())
            .or(*self.latency.lock().expect("latency lock"));
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
    }

    fn check_failure(&self, id: &str, operation: &str) -> Result<(), ProviderError> {
        if let Some(message) = self.failures.get(id) {
            return Err(ProviderError::new("mock", operation, id, message.clone()));
        }
        Ok(())
    }

    /// Kind-appropriate synthetic outputs
    fn synthesize_outputs(kind: Kind, cloud_name: &str) -> BTreeMap<String, String> {
        let arn = format!("arn:aws:mock:us-east-1:000000000000:{cloud_name}");
        let mut outputs = BTreeMap::from([("arn".to_string(), arn)]);
        match kind {
            Kind::Rds | Kind::DocumentDb => {
                outputs.insert(
                    "endpoint".to_string(),
                    format!("{cloud_name}.cluster.mock.rds.amazonaws.com:5432"),
                );
            }
            Kind::Sqs => {
                outputs.insert(
                    "url".to_string(),
                    format!("https://sqs.mock.amazonaws.com/000000000000/{cloud_name}"),
                );
            }
            Kind::Sns | Kind::EventBridge => {}
            Kind::S3 => {
                outputs.insert("bucket".to_string(), cloud_name.to_string());
            }
            Kind::DynamoDb => {
                outputs.insert("table".to_string(), cloud_name.to_string());
            }
            Kind::Alb | Kind::Nlb | Kind::CloudFront | Kind::ApiGateway => {
                outputs.insert(
                    "dnsName".to_string(),
                    format!("{cloud_name}.mock.elb.amazonaws.com"),
                );
            }
            Kind::MicroService | Kind::Worker | Kind::CronJob | Kind::Lambda => {
                outputs.insert("serviceName".to_string(), cloud_name.to_string());
            }
            _ => {}
        }
        outputs
    }
}

#[async_trait]
impl ResourceProvider for MockProvider {
    fn name(&self) -> &str {
        "mock"
    }

    async fn create(
        &self,
        desired: &Resource,
        opts: &ProviderOptions,
    ) -> Result<ProviderResult, ProviderError> {
        let id = desired.name().to_string();
        self.simulate_latency(&id).await;
        self.check_failure(&id, "create")?;
        self.create_calls.fetch_add(1, Ordering::SeqCst);

        let cloud_name = cloud_resource_name(&opts.stack, &opts.service, &id, desired.kind);
        let outputs = Self::synthesize_outputs(desired.kind, &cloud_name);
        let tags = resource_tags(opts, &id, desired.kind, &desired.metadata.labels);

        if !opts.dry_run {
            self.resources.insert(
                id.clone(),
                MockResource {
                    kind: desired.kind,
                    outputs: outputs.clone(),
                    tags,
                },
            );
            self.record(format!("create {id}"));
        }

        Ok(ProviderResult {
            id,
            status: ResourceStatus::Ready,
            outputs,
        })
    }

    async fn read(&self, id: &str) -> Result<ProviderResult, ProviderError> {
        if let Some(message) = self.read_failures.get(id) {
            return Err(ProviderError::new("mock", "read", id, message.clone()));
        }
        match self.resources.get(id) {
            Some(resource) => Ok(ProviderResult {
                id: id.to_string(),
                status: ResourceStatus::Ready,
                outputs: resource.outputs.clone(),
            }),
            None => Err(ProviderError::new(
                "mock",
                "read",
                id,
                "resource not found",
            )),
        }
    }

    async fn update(
        &self,
        desired: &Resource,
        _current: &ResourceState,
        opts: &ProviderOptions,
    ) -> Result<ProviderResult, ProviderError> {
        let id = desired.name().to_string();
        self.simulate_latency(&id).await;
        self.check_failure(&id, "update")?;

        let cloud_name = cloud_resource_name(&opts.stack, &opts.service, &id, desired.kind);
        let outputs = Self::synthesize_outputs(desired.kind, &cloud_name);
        if !opts.dry_run {
            self.resources.insert(
                id.clone(),
                MockResource {
                    kind: desired.kind,
                    outputs: outputs.clone(),
                    tags: resource_tags(opts, &id, desired.kind, &desired.metadata.labels),
                },
            );
            self.record(format!("update {id}"));
        }

        Ok(ProviderResult {
            id,
            status: ResourceStatus::Ready,
            outputs,
        })
    }

    async fn delete(&self, id: &str, opts: &ProviderOptions) -> Result<(), ProviderError> {
        self.simulate_latency(id).await;
        self.check_failure(id, "delete")?;
        self.delete_calls.fetch_add(1, Ordering::SeqCst);
        if !opts.dry_run {
            self.resources.remove(id);
            self.record(format!("delete {id}"));
        }
        Ok(())
    }

    async fn exists(&self, id: &str) -> Result<bool, ProviderError> {
        Ok(self.resources.contains_key(id))
    }

    async fn get_outputs(&self, id: &str) -> Result<BTreeMap<String, String>, ProviderError> {
        self.resources
            .get(id)
            .map(|r| r.outputs.clone())
            .ok_or_else(|| ProviderError::new("mock", "get_outputs", id, "resource not found"))
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

    fn rds() -> Resource {
        parse_documents(
            r#"
kind: RDS
metadata: {name: db}
spec:
  engine: postgres
  allocatedStorage: 20
  passwordSecret: arn:aws:secretsmanager:us-east-1:123456789012:secret:db
"#,
            &PathBuf::from("test.yaml"),
        )
        .unwrap()
        .remove(0)
    }

    fn opts() -> ProviderOptions {
        ProviderOptions {
            stack: "app".into(),
            service: "backend".into(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_create_synthesizes_kind_outputs() {
        let provider = MockProvider::new();
        let result = provider.create(&rds(), &opts()).await.unwrap();

        assert_eq!(result.status, ResourceStatus::Ready);
        assert!(result.outputs["endpoint"].contains("app-backend-db"));
        assert!(provider.exists("db").await.unwrap());
    }

    #[tokio::test]
    async fn test_scripted_failure() {
        let provider = MockProvider::new();
        provider.fail_on("db", "quota exceeded");

        let err = provider.create(&rds(), &opts()).await.unwrap_err();
        assert_eq!(err.operation, "create");
        assert!(err.message.contains("quota"));
        assert!(!provider.exists("db").await.unwrap());
    }

    #[tokio::test]
    async fn test_dry_run_mutates_nothing() {
        let provider = MockProvider::new();
        let mut options = opts();
        options.dry_run = true;

        provider.create(&rds(), &options).await.unwrap();
        assert_eq!(provider.resource_count(), 0);
    }

    #[tokio::test]
    async fn test_external_removal_detected() {
        let provider = MockProvider::new();
        provider.create(&rds(), &opts()).await.unwrap();
        assert!(provider.remove_externally("db"));
        assert!(!provider.exists("db").await.unwrap());
        assert!(provider.read("db").await.is_err());
    }

    #[tokio::test]
    async fn test_external_modification_changes_outputs() {
        let provider = MockProvider::new();
        provider.create(&rds(), &opts()).await.unwrap();

        let changed = BTreeMap::from([(
            "endpoint".to_string(),
            "moved.cluster.mock.rds.amazonaws.com:5432".to_string(),
        )]);
        assert!(provider.set_outputs("db", changed.clone()));
        assert_eq!(provider.read("db").await.unwrap().outputs, changed);
        // Unknown ids are reported, not upserted.
        assert!(!provider.set_outputs("ghost", BTreeMap::new()));
    }

    #[tokio::test]
    async fn test_scripted_read_failure() {
        let provider = MockProvider::new();
        provider.create(&rds(), &opts()).await.unwrap();
        provider.fail_read("db", "throttled");

        let err = provider.read("db").await.unwrap_err();
        assert_eq!(err.operation, "read");
        assert!(err.message.contains("throttled"));
        // The resource is still there; only reads are failing.
        assert!(provider.exists("db").await.unwrap());
    }

    #[tokio::test]
    async fn test_journal_records_order() {
        let provider = MockProvider::new();
        provider.create(&rds(), &opts()).await.unwrap();
        provider.delete("db", &opts()).await.unwrap();
        assert_eq!(provider.journal(), vec!["create db", "delete db"]);
    }
}
