//! # Panka
//!
//! Multi-tenant AWS stack orchestration: declarative YAML in,
//! dependency-ordered parallel deployment out.
//!
//! ## Overview
//!
//! A stack folder (one `stack.yaml`, a `services/` subtree of component
//! documents) is parsed into a typed resource set, validated, and turned
//! into a dependency graph. The planner groups components into parallel
//! **stages** by graph level; the reconciler drives each stage through
//! pluggable resource providers under a DynamoDB-backed distributed lock,
//! checkpointing an S3-versioned state document between stages and
//! rolling back LIFO on failure.
//!
//! ## Pipeline
//!
//! ```text
//! CLI → Session → Parser → Validator → Graph → Planner → Differ
//!     → Lock acquire → Reconciler ⇄ Providers → State write → Lock release
//! ```
//!
//! State and locks are always accessed through the tenancy wrappers,
//! which namespace every key with the active tenant's prefix.
//!
//! ## Modules
//!
//! - [`schema`] / [`parser`] - typed kinds, folder ingestion, `${...}`
//!   interpolation, implicit-reference extraction
//! - [`validator`] - aggregated structural/naming/kind/cycle checks
//! - [`graph`] - adjacency store, cycle detection, level-based sorting
//! - [`plan`] - differ (mutability-tagged change-set) and stage planner
//! - [`state`] / [`lock`] / [`tenancy`] - versioned documents, TTL locks
//!   with heartbeat, tenant key namespacing
//! - [`registry`] / [`session`] - tenant catalog with bcrypt credentials,
//!   client-side sessions
//! - [`provider`] - the resource provider contract, registry, and mock
//! - [`reconciler`] - apply/destroy/drift protocols and the rollback
//!   transaction
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use std::collections::BTreeMap;
//! use std::sync::Arc;
//!
//! use panka::context::ExecutionContext;
//! use panka::lock::MemoryLockStore;
//! use panka::parser::parse_stack_folder;
//! use panka::provider::{MockProvider, ProviderRegistry};
//! use panka::reconciler::{ReconcileOptions, Reconciler};
//! use panka::state::MemoryStateBackend;
//!
//! # async fn example() -> Result<(), panka::error::PankaError> {
//! let set = parse_stack_folder("stacks/app".as_ref(), &BTreeMap::new())?;
//!
//! let providers = Arc::new(ProviderRegistry::new());
//! providers.register_for_all(Arc::new(MockProvider::new()));
//!
//! let reconciler = Reconciler::new(
//!     Arc::new(MemoryStateBackend::new()),
//!     Arc::new(MemoryLockStore::new()),
//!     providers,
//!     ExecutionContext::single_tenant("ops"),
//!     ReconcileOptions::default(),
//! );
//! let report = reconciler.apply(&set, "dev").await?;
//! println!("applied {} resources", report.resources_applied);
//! # Ok(())
//! # }
//! ```

pub mod context;
pub mod error;
pub mod graph;
pub mod lock;
pub mod parser;
pub mod plan;
pub mod provider;
pub mod reconciler;
pub mod registry;
pub mod schema;
pub mod session;
pub mod state;
pub mod tenancy;
pub mod types;
pub mod validator;

pub use context::{ExecutionContext, Principal};
pub use error::PankaError;
pub use graph::{DependencyGraph, EdgeKind, EdgeLabel, GraphError};
pub use parser::{parse_stack_file, parse_stack_folder, ParseError, ResourceSet};
pub use plan::{diff, plan_deploy, plan_destroy, ChangeSet, ChangeType, DeploymentPlan};
pub use provider::{MockProvider, ProviderRegistry, ResourceProvider};
pub use reconciler::{ApplyReport, DestroyReport, DriftReport, ReconcileOptions, Reconciler};
pub use registry::{TenantRegistry, TenantStatus};
pub use schema::{Kind, Resource};
pub use session::{Session, SessionKind, SessionStore};
pub use state::{StateBackend, StateDocument};
pub use tenancy::{TenantLockStore, TenantStateBackend};
pub use types::{ComponentName, EnvName, ServiceName, StackName, TenantId};
pub use validator::{ValidationReport, Validator};
