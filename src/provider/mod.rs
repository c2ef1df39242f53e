//! # Resource Provider Abstraction
//!
//! The reconciler is provider-agnostic: it dispatches every cloud mutation
//! through the [`ResourceProvider`] contract, looked up by kind in a
//! [`ProviderRegistry`] populated at startup. Concrete AWS adapters live
//! outside the orchestration core; the in-tree [`MockProvider`] simulates
//! a cloud for tests and dry runs.
//!
//! The module also owns the two conventions every provider applies:
//!
//! - **Naming**: `{stack}-{service}-{resource}`, lowercased and
//!   alphanumeric-normalized per kind; FIFO kinds get `.fifo` appended.
//! - **Tagging**: `ManagedBy=panka` plus `panka-*` identity tags, merged
//!   with the user's labels. On conflict, user-provided options win over
//!   user labels, which win over the standard set.

mod mock;

pub use mock::MockProvider;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use thiserror::Error;

use crate::schema::{Kind, Resource};
use crate::state::{ResourceState, ResourceStatus};

// ============================================================================
// PROVIDER ERROR
// ============================================================================

/// Structured provider failure; the cause chain is preserved for display
#[derive(Debug, Error)]
#[error(
    "provider {provider} failed during {operation} of {resource_id}: {message}{}",
    cause.as_ref().map(|c| format!(" (cause: {c:#})")).unwrap_or_default()
)]
pub struct ProviderError {
    pub provider: String,
    pub operation: String,
    pub resource_id: String,
    pub message: String,
    pub cause: Option<anyhow::Error>,
}

impl ProviderError {
    pub fn new(
        provider: impl Into<String>,
        operation: impl Into<String>,
        resource_id: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            provider: provider.into(),
            operation: operation.into(),
            resource_id: resource_id.into(),
            message: message.into(),
            cause: None,
        }
    }

    pub fn with_cause(mut self, cause: anyhow::Error) -> Self {
        self.cause = Some(cause);
        self
    }
}

// ============================================================================
// OPTIONS AND RESULTS
// ============================================================================

/// Call options threaded into every provider operation
#[derive(Debug, Clone, Default)]
pub struct ProviderOptions {
    pub tenant_id: Option<String>,
    pub stack: String,
    pub service: String,
    pub tags: BTreeMap<String, String>,
    pub dry_run: bool,
    pub force: bool,
    pub timeout: Option<Duration>,
}

/// Outcome of a provider mutation or read
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderResult {
    /// Provider-assigned resource identity
    pub id: String,
    pub status: ResourceStatus,
    /// Output attributes; the cross-reference target space
    pub outputs: BTreeMap<String, String>,
}

// ============================================================================
// PROVIDER TRAIT
// ============================================================================

/// Contract every resource provider implements
///
/// Calls must be assumed blocking network I/O; the reconciler wraps each
/// in a per-kind timeout and may cancel it when a sibling in the same
/// stage fails.
#[async_trait]
pub trait ResourceProvider: Send + Sync {
    /// Provider name recorded in state (e.g. "aws", "mock")
    fn name(&self) -> &str;

    async fn create(
        &self,
        desired: &Resource,
        opts: &ProviderOptions,
    ) -> Result<ProviderResult, ProviderError>;

    async fn read(&self, id: &str) -> Result<ProviderResult, ProviderError>;

    async fn update(
        &self,
        desired: &Resource,
        current: &ResourceState,
        opts: &ProviderOptions,
    ) -> Result<ProviderResult, ProviderError>;

    async fn delete(&self, id: &str, opts: &ProviderOptions) -> Result<(), ProviderError>;

    async fn exists(&self, id: &str) -> Result<bool, ProviderError>;

    async fn get_outputs(&self, id: &str) -> Result<BTreeMap<String, String>, ProviderError>;
}

// ============================================================================
// REGISTRY
// ============================================================================

/// Kind → provider dispatch table, populated at startup
#[derive(Default)]
pub struct ProviderRegistry {
    providers: DashMap<Kind, Arc<dyn ResourceProvider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, kind: Kind, provider: Arc<dyn ResourceProvider>) {
        self.providers.insert(kind, provider);
    }

    /// Register one provider for every component kind
    pub fn register_for_all(&self, provider: Arc<dyn ResourceProvider>) {
        for kind in Kind::ALL.iter().filter(|k| k.is_component()) {
            self.providers.insert(*kind, Arc::clone(&provider));
        }
    }

    pub fn get(&self, kind: Kind) -> Result<Arc<dyn ResourceProvider>, ProviderError> {
        self.providers
            .get(&kind)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| {
                ProviderError::new(
                    "registry",
                    "dispatch",
                    kind.as_str(),
                    format!("no provider registered for kind {kind}"),
                )
            })
    }
}

// ============================================================================
// TIMEOUTS
// ============================================================================

/// Per-kind provider call timeout, derived from typical latency
pub fn provider_timeout(kind: Kind) -> Duration {
    let secs = match kind {
        Kind::Rds | Kind::DocumentDb => 30 * 60,
        Kind::Msk => 40 * 60,
        Kind::CloudFront => 15 * 60,
        Kind::Lambda => 120,
        Kind::Sqs | Kind::Sns => 60,
        _ => 5 * 60,
    };
    Duration::from_secs(secs)
}

// ============================================================================
// NAMING CONVENTION
// ============================================================================

/// Cloud-side name: `{stack}-{service}-{resource}`, normalized per kind
pub fn cloud_resource_name(stack: &str, service: &str, resource: &str, kind: Kind) -> String {
    let raw = format!("{stack}-{service}-{resource}").to_lowercase();
    let mut name: String = raw
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' {
                c
            } else {
                '-'
            }
        })
        .collect();
    while name.contains("--") {
        name = name.replace("--", "-");
    }
    let name = name.trim_matches('-').to_string();

    if kind.is_fifo_capable() {
        // FIFO names must end in .fifo; appended when missing.
        if name.ends_with(".fifo") {
            name
        } else {
            format!("{name}.fifo")
        }
    } else {
        name
    }
}

// ============================================================================
// TAGGING CONVENTION
// ============================================================================

/// Standard tag set merged with the user's labels
///
/// Priority on conflict: provider options > user labels > standard set.
pub fn resource_tags(
    opts: &ProviderOptions,
    resource: &str,
    kind: Kind,
    labels: &BTreeMap<String, String>,
) -> BTreeMap<String, String> {
    let mut tags = BTreeMap::new();
    tags.insert("ManagedBy".to_string(), "panka".to_string());
    if let Some(tenant) = &opts.tenant_id {
        tags.insert("panka-tenant".to_string(), tenant.clone());
    }
    tags.insert("panka-stack".to_string(), opts.stack.clone());
    tags.insert("panka-service".to_string(), opts.service.clone());
    tags.insert("panka-resource".to_string(), resource.to_string());
    tags.insert("panka-kind".to_string(), kind.as_str().to_string());
    tags.insert(
        "panka-version".to_string(),
        env!("CARGO_PKG_VERSION").to_string(),
    );

    for (key, value) in labels {
        tags.insert(key.clone(), value.clone());
    }
    for (key, value) in &opts.tags {
        tags.insert(key.clone(), value.clone());
    }
    tags
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cloud_name_normalization() {
        assert_eq!(
            cloud_resource_name("app", "backend", "db", Kind::Rds),
            "app-backend-db"
        );
        assert_eq!(
            cloud_resource_name("App", "Back_End", "q", Kind::S3),
            "app-back-end-q"
        );
    }

    #[test]
    fn test_fifo_suffix_applied_once() {
        assert_eq!(
            cloud_resource_name("app", "backend", "orders", Kind::Sqs),
            "app-backend-orders.fifo"
        );
        assert!(!cloud_resource_name("app", "backend", "orders", Kind::Rds).ends_with(".fifo"));
    }

    #[test]
    fn test_tag_priority() {
        let mut opts = ProviderOptions {
            stack: "app".into(),
            service: "backend".into(),
            tenant_id: Some("team-a".into()),
            ..Default::default()
        };
        opts.tags
            .insert("panka-stack".to_string(), "forced".to_string());

        let labels: BTreeMap<String, String> =
            [("team".to_string(), "payments".to_string())].into();
        let tags = resource_tags(&opts, "db", Kind::Rds, &labels);

        assert_eq!(tags["ManagedBy"], "panka");
        assert_eq!(tags["panka-tenant"], "team-a");
        assert_eq!(tags["team"], "payments");
        // Option-level tag wins over the standard value.
        assert_eq!(tags["panka-stack"], "forced");
    }

    #[test]
    fn test_registry_dispatch() {
        let registry = ProviderRegistry::new();
        let provider: Arc<dyn ResourceProvider> = Arc::new(MockProvider::new());
        registry.register_for_all(Arc::clone(&provider));

        assert!(registry.get(Kind::Rds).is_ok());
        assert!(registry.get(Kind::Sqs).is_ok());
        // Grouping kinds are never dispatched.
        assert!(registry.get(Kind::Stack).is_err());
    }

    #[test]
    fn test_timeouts_scale_with_kind() {
        assert_eq!(provider_timeout(Kind::Rds), Duration::from_secs(1800));
        assert_eq!(provider_timeout(Kind::Lambda), Duration::from_secs(120));
        assert_eq!(provider_timeout(Kind::Sqs), Duration::from_secs(60));
        assert_eq!(provider_timeout(Kind::S3), Duration::from_secs(300));
        // MicroService takes the default tier.
        assert_eq!(
            provider_timeout(Kind::MicroService),
            Duration::from_secs(300)
        );
    }
}
