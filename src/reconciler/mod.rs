//! # Reconciler
//!
//! Drives a deployment plan through provider calls, one stage at a time:
//!
//! 1. Validate, build the graph, confirm acyclicity.
//! 2. Acquire the stack/environment lock; start the heartbeat.
//! 3. Load current state, diff, plan. An empty change-set releases the
//!    lock and reports "no changes" without writing a state version.
//! 4. Per stage: dispatch every resource concurrently on a `JoinSet`;
//!    record each success in the rollback transaction; on the first
//!    failure cancel the siblings, short-circuit later stages, and take
//!    the rollback path.
//! 5. Flush state between stages so partial progress is observable.
//! 6. On success, write the final version, clear the transaction, stop
//!    the heartbeat, release the lock.
//!
//! Destroy runs the symmetric reverse-topological protocol with no
//! rollback; drift asks providers for actual status without mutating
//! anything.
//!
//! Stage workers share only the rollback log (concurrent append) and
//! their own result slots; state is written solely by this single-writer
//! checkpoint loop.

mod rollback;

pub use rollback::{ActionKind, RollbackAction, RollbackError, RollbackLog};

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinSet;
use tracing::{error, info, instrument, warn};

use crate::context::ExecutionContext;
use crate::error::PankaError;
use crate::graph::DependencyGraph;
use crate::lock::{stack_lock_key, Heartbeat, Lock, LockStore};
use crate::parser::{resolve_output_refs, ResourceSet};
use crate::plan::{plan_deploy, plan_destroy, ChangeSet, ChangeType, DeploymentPlan};
use crate::provider::{
    provider_timeout, ProviderError, ProviderOptions, ProviderRegistry, ProviderResult,
    ResourceProvider,
};
use crate::schema::{ComponentSpec, Kind, Resource};
use crate::state::{
    load_state, save_state, state_key, DeploymentStatus, ResourceState, ResourceStatus,
    StateBackend, StateDocument,
};
use crate::validator::Validator;

// ============================================================================
// OPTIONS AND REPORTS
// ============================================================================

/// Knobs threaded from the CLI
#[derive(Debug, Clone)]
pub struct ReconcileOptions {
    /// Lock TTL; must exceed the longest expected single stage
    pub lock_ttl: Duration,
    pub rollback_enabled: bool,
    pub dry_run: bool,
}

impl Default for ReconcileOptions {
    fn default() -> Self {
        Self {
            lock_ttl: Duration::from_secs(3600),
            rollback_enabled: true,
            dry_run: false,
        }
    }
}

/// Outcome of a successful (or no-op) apply
#[derive(Debug, Clone, PartialEq)]
pub struct ApplyReport {
    pub no_changes: bool,
    pub state_version: Option<String>,
    pub resources_applied: usize,
    pub plan_hash: String,
}

/// Outcome of a destroy
#[derive(Debug, Clone, PartialEq)]
pub struct DestroyReport {
    pub resources_deleted: usize,
    pub state_removed: bool,
}

/// Per-resource drift classification
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DriftStatus {
    InSync,
    Modified,
    Deleted,
    Unknown,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DriftEntry {
    pub id: String,
    pub kind: Kind,
    pub status: DriftStatus,
    pub detail: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DriftReport {
    pub entries: Vec<DriftEntry>,
}

impl DriftReport {
    pub fn has_drift(&self) -> bool {
        self.entries.iter().any(|e| e.status != DriftStatus::InSync)
    }
}

// ============================================================================
// STAGE WORKER PLUMBING
// ============================================================================

/// Result slot returned by one stage worker
struct StageOutcome {
    id: String,
    kind: Kind,
    action: ChangeType,
    service: String,
    provider_name: String,
    /// Unresolved desired spec snapshot stored for future diffs
    desired_attributes: Option<serde_json::Value>,
    dependencies: Vec<String>,
    result: Result<Option<ProviderResult>, ProviderError>,
}

// ============================================================================
// RECONCILER
// ============================================================================

pub struct Reconciler {
    state: Arc<dyn StateBackend>,
    locks: Arc<dyn LockStore>,
    providers: Arc<ProviderRegistry>,
    context: ExecutionContext,
    options: ReconcileOptions,
}

impl Reconciler {
    /// `state` and `locks` must already be tenancy-wrapped for the context
    pub fn new(
        state: Arc<dyn StateBackend>,
        locks: Arc<dyn LockStore>,
        providers: Arc<ProviderRegistry>,
        context: ExecutionContext,
        options: ReconcileOptions,
    ) -> Self {
        Self {
            state,
            locks,
            providers,
            context,
            options,
        }
    }

    // ------------------------------------------------------------------
    // Plan preview (no lock, no mutation)
    // ------------------------------------------------------------------

    /// Diff and plan against current state without acquiring the lock
    pub async fn preview(
        &self,
        set: &ResourceSet,
        environment: &str,
    ) -> Result<(ChangeSet, DeploymentPlan), PankaError> {
        self.validate(set)?;
        let mut graph = DependencyGraph::from_resources(set);
        graph.ensure_acyclic()?;

        let key = state_key(set.stack_name(), environment);
        let current = load_state(&self.state, &key).await?;
        let doc = current.as_ref().map(|(doc, _)| doc);
        let changes = crate::plan::diff(set, doc);
        let plan = plan_deploy(&mut graph, &changes, doc)?;
        Ok((changes, plan))
    }

    // ------------------------------------------------------------------
    // Apply
    // ------------------------------------------------------------------

    #[instrument(skip(self, set), fields(
        stack = %set.stack_name(),
        tenant = self.context.tenant_id.as_ref().map(|t| t.as_str()).unwrap_or("-"),
    ))]
    pub async fn apply(
        &self,
        set: &ResourceSet,
        environment: &str,
    ) -> Result<ApplyReport, PankaError> {
        self.validate(set)?;
        let mut graph = DependencyGraph::from_resources(set);
        graph.ensure_acyclic()?;

        let key = state_key(set.stack_name(), environment);
        let lock_key = stack_lock_key(set.stack_name(), environment);
        let lock = self
            .locks
            .acquire(
                &lock_key,
                self.options.lock_ttl,
                self.context.principal.id(),
            )
            .await?;
        let heartbeat = Heartbeat::start(
            Arc::clone(&self.locks),
            lock.clone(),
            self.options.lock_ttl,
        );

        let result = self
            .apply_locked(set, environment, &key, &mut graph, &heartbeat)
            .await;

        heartbeat.stop();
        self.release(&lock).await;
        result
    }

    async fn apply_locked(
        &self,
        set: &ResourceSet,
        environment: &str,
        key: &str,
        graph: &mut DependencyGraph,
        heartbeat: &Heartbeat,
    ) -> Result<ApplyReport, PankaError> {
        let current = load_state(&self.state, key).await?;
        let current_doc = current.as_ref().map(|(doc, _)| doc);

        let changes = crate::plan::diff(set, current_doc);
        if changes.is_noop() {
            info!("no changes; nothing to deploy");
            return Ok(ApplyReport {
                no_changes: true,
                state_version: None,
                resources_applied: 0,
                plan_hash: String::new(),
            });
        }

        let plan = plan_deploy(graph, &changes, current_doc)?;
        info!(
            stages = plan.stages.len(),
            resources = plan.resource_count(),
            plan_hash = %plan.plan_hash,
            "plan computed"
        );

        if self.options.dry_run {
            return Ok(ApplyReport {
                no_changes: false,
                state_version: None,
                resources_applied: 0,
                plan_hash: plan.plan_hash,
            });
        }

        let mut doc = match current {
            Some((doc, _)) => doc,
            None => StateDocument::new(
                set.stack_name(),
                environment,
                self.context.tenant_id.as_ref().map(|t| t.to_string()),
                self.context.principal.id(),
            ),
        };
        doc.metadata.deployed_by = self.context.principal.id().to_string();
        doc.metadata.updated_at = Utc::now();
        doc.configuration.source_checksum = set.source_checksum.clone();
        doc.configuration.variables = set.variables.clone();
        doc.deployment.plan_hash = plan.plan_hash.clone();
        doc.deployment.started_at = Utc::now();
        doc.deployment.completed_at = None;
        doc.deployment.status = DeploymentStatus::InProgress;

        let log = Arc::new(RollbackLog::new());
        let executed = self
            .execute_plan(set, graph, &plan, &mut doc, key, &log, heartbeat)
            .await;

        match executed {
            Ok(applied) => {
                doc.deployment.status = DeploymentStatus::Success;
                doc.deployment.completed_at = Some(Utc::now());
                doc.metadata.updated_at = Utc::now();
                let version = save_state(&self.state, key, &doc).await?;
                log.clear();
                info!(version = %version, applied, "apply complete");
                Ok(ApplyReport {
                    no_changes: false,
                    state_version: Some(version),
                    resources_applied: applied,
                    plan_hash: plan.plan_hash,
                })
            }
            Err(cause) => {
                let cause_text = cause.to_string();
                error!(error = %cause_text, "apply failed");
                if self.options.rollback_enabled && !log.is_empty() {
                    let errors = self.reverse(&log, &mut doc, key).await;
                    doc.deployment.status = DeploymentStatus::RolledBack;
                    doc.deployment.completed_at = Some(Utc::now());
                    if let Err(save_err) = save_state(&self.state, key, &doc).await {
                        warn!(error = %save_err, "failed to write rolled-back state");
                    }
                    if errors.is_empty() {
                        Err(PankaError::RolledBack { cause: cause_text })
                    } else {
                        Err(PankaError::RollbackFailed {
                            cause: cause_text,
                            errors: errors.iter().map(|e| e.to_string()).collect(),
                        })
                    }
                } else {
                    doc.deployment.status = DeploymentStatus::Failed;
                    doc.deployment.completed_at = Some(Utc::now());
                    if let Err(save_err) = save_state(&self.state, key, &doc).await {
                        warn!(error = %save_err, "failed to write failed state");
                    }
                    Err(cause)
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // Stage execution
    // ------------------------------------------------------------------

    #[allow(clippy::too_many_arguments)]
    async fn execute_plan(
        &self,
        set: &ResourceSet,
        graph: &DependencyGraph,
        plan: &DeploymentPlan,
        doc: &mut StateDocument,
        key: &str,
        log: &Arc<RollbackLog>,
        heartbeat: &Heartbeat,
    ) -> Result<usize, PankaError> {
        let mut applied = 0usize;
        let mut abort = heartbeat.abort_signal();

        for (index, stage) in plan.stages.iter().enumerate() {
            if *abort.borrow() {
                return Err(PankaError::other(
                    "lock heartbeat failed; aborting before next stage",
                ));
            }
            info!(stage = index, resources = stage.resources.len(), "stage started");

            let outputs = doc.component_outputs();
            let mut join_set: JoinSet<StageOutcome> = JoinSet::new();

            for planned in &stage.resources {
                let provider = self.providers.get(planned.kind)?;
                let desired = set.component(&planned.id).cloned();
                let resolved = match &desired {
                    Some(resource) => Some(resolve_resource(resource, &outputs)?),
                    None => None,
                };
                let before = doc.resources.get(&planned.id).cloned();
                let service = desired
                    .as_ref()
                    .and_then(|r| r.service().map(str::to_string))
                    .or_else(|| before.as_ref().map(|b| b.service.clone()))
                    .unwrap_or_default();
                let opts = ProviderOptions {
                    tenant_id: self.context.tenant_id.as_ref().map(|t| t.to_string()),
                    stack: set.stack_name().to_string(),
                    service: service.clone(),
                    tags: BTreeMap::new(),
                    dry_run: self.options.dry_run,
                    force: false,
                    timeout: Some(provider_timeout(planned.kind)),
                };

                let outcome_seed = StageOutcome {
                    id: planned.id.clone(),
                    kind: planned.kind,
                    action: planned.action,
                    service,
                    provider_name: provider.name().to_string(),
                    desired_attributes: desired.as_ref().map(|r| r.spec_value()),
                    dependencies: graph.dependencies(&planned.id).map(str::to_string).collect(),
                    result: Ok(None),
                };
                let log = Arc::clone(log);

                join_set.spawn(async move {
                    let result =
                        run_resource(provider, &outcome_seed, resolved, before, &opts, log).await;
                    StageOutcome {
                        result,
                        ..outcome_seed
                    }
                });
            }

            let mut failure: Option<PankaError> = None;
            let mut abort_armed = true;
            loop {
                tokio::select! {
                    changed = abort.changed(), if abort_armed => {
                        match changed {
                            Ok(()) if *abort.borrow() && failure.is_none() => {
                                warn!("heartbeat abort observed mid-stage; cancelling siblings");
                                failure = Some(PankaError::other(
                                    "lock heartbeat failed; stage aborted",
                                ));
                                join_set.abort_all();
                            }
                            Ok(()) => {}
                            Err(_) => abort_armed = false,
                        }
                    }
                    next = join_set.join_next() => {
                        let Some(joined) = next else { break };
                        match joined {
                            Err(join_err) if join_err.is_cancelled() => continue,
                            Err(join_err) => {
                                if failure.is_none() {
                                    failure = Some(PankaError::other(format!(
                                        "stage worker panicked: {join_err}"
                                    )));
                                    join_set.abort_all();
                                }
                            }
                            Ok(mut outcome) => {
                                let result = std::mem::replace(&mut outcome.result, Ok(None));
                                match result {
                                    Ok(provider_result) => {
                                        applied += 1;
                                        apply_outcome_to_state(doc, &outcome, provider_result);
                                    }
                                    Err(provider_err) => {
                                        if failure.is_none() {
                                            failure = Some(provider_err.into());
                                            join_set.abort_all();
                                        }
                                    }
                                }
                            }
                        }
                    }
                }
            }

            if let Some(err) = failure {
                return Err(err);
            }

            // Flush between stages so partial progress is observable.
            // The completion write covers the final stage.
            if index + 1 < plan.stages.len() {
                doc.metadata.updated_at = Utc::now();
                save_state(&self.state, key, doc).await?;
                info!(stage = index, "stage complete; state checkpointed");
            } else {
                info!(stage = index, "stage complete");
            }
        }

        Ok(applied)
    }

    // ------------------------------------------------------------------
    // Rollback reversal
    // ------------------------------------------------------------------

    /// Reverse recorded actions LIFO, writing state after each reversal.
    /// Errors are collected; reversal continues past them.
    async fn reverse(
        &self,
        log: &RollbackLog,
        doc: &mut StateDocument,
        key: &str,
    ) -> Vec<RollbackError> {
        let mut errors = Vec::new();
        let actions = log.drain_lifo();
        info!(actions = actions.len(), "rolling back");

        for action in actions {
            let provider = match self.providers.get(action.resource_kind) {
                Ok(provider) => provider,
                Err(err) => {
                    errors.push(RollbackError {
                        resource_id: action.resource_id.clone(),
                        message: err.to_string(),
                    });
                    continue;
                }
            };
            let opts = ProviderOptions {
                tenant_id: self.context.tenant_id.as_ref().map(|t| t.to_string()),
                stack: doc.metadata.stack.clone(),
                service: action
                    .before
                    .as_ref()
                    .or(action.after.as_ref())
                    .map(|s| s.service.clone())
                    .unwrap_or_default(),
                ..Default::default()
            };

            let reversed = match action.kind {
                ActionKind::Created => provider
                    .delete(&action.resource_id, &opts)
                    .await
                    .map(|_| None),
                ActionKind::Updated | ActionKind::Deleted => {
                    match action
                        .before
                        .as_ref()
                        .and_then(|before| resource_from_state(&doc.metadata.stack, before))
                    {
                        Some(desired) => match action.kind {
                            ActionKind::Updated => {
                                let current = action
                                    .after
                                    .clone()
                                    .or_else(|| action.before.clone())
                                    .unwrap_or_else(|| placeholder_state(&action));
                                provider
                                    .update(&desired, &current, &opts)
                                    .await
                                    .map(|r| Some((desired, r)))
                            }
                            _ => provider
                                .create(&desired, &opts)
                                .await
                                .map(|r| Some((desired, r))),
                        },
                        None => Err(ProviderError::new(
                            provider.name(),
                            "rollback",
                            &action.resource_id,
                            "before-state cannot be reconstructed",
                        )),
                    }
                }
            };

            match reversed {
                Ok(None) => {
                    doc.resources.remove(&action.resource_id);
                    doc.outputs.remove(&action.resource_id);
                }
                Ok(Some(_)) => {
                    if let Some(before) = action.before.clone() {
                        doc.resources.insert(action.resource_id.clone(), before);
                    }
                }
                Err(err) => {
                    errors.push(RollbackError {
                        resource_id: action.resource_id.clone(),
                        message: err.to_string(),
                    });
                    continue;
                }
            }

            doc.metadata.updated_at = Utc::now();
            if let Err(save_err) = save_state(&self.state, key, doc).await {
                // State may be contended if the lock was lost; surfaced but
                // reversal of cloud resources continues.
                errors.push(RollbackError {
                    resource_id: action.resource_id.clone(),
                    message: format!("state write after reversal failed: {save_err}"),
                });
            }
        }

        errors
    }

    // ------------------------------------------------------------------
    // Destroy
    // ------------------------------------------------------------------

    #[instrument(skip(self))]
    pub async fn destroy(
        &self,
        stack: &str,
        environment: &str,
    ) -> Result<DestroyReport, PankaError> {
        let key = state_key(stack, environment);
        let lock_key = stack_lock_key(stack, environment);
        let lock = self
            .locks
            .acquire(
                &lock_key,
                self.options.lock_ttl,
                self.context.principal.id(),
            )
            .await?;
        let heartbeat = Heartbeat::start(
            Arc::clone(&self.locks),
            lock.clone(),
            self.options.lock_ttl,
        );

        let result = self.destroy_locked(&key, &heartbeat).await;

        heartbeat.stop();
        self.release(&lock).await;
        result
    }

    async fn destroy_locked(
        &self,
        key: &str,
        heartbeat: &Heartbeat,
    ) -> Result<DestroyReport, PankaError> {
        let Some((mut doc, _)) = load_state(&self.state, key).await? else {
            return Ok(DestroyReport {
                resources_deleted: 0,
                state_removed: false,
            });
        };
        let plan = plan_destroy(&doc)?;
        if self.options.dry_run {
            return Ok(DestroyReport {
                resources_deleted: 0,
                state_removed: false,
            });
        }

        let mut deleted = 0usize;
        for stage in &plan.stages {
            if heartbeat.is_aborted() {
                save_state(&self.state, key, &doc).await?;
                return Err(PankaError::other(
                    "lock heartbeat failed; destroy aborted",
                ));
            }

            let mut join_set: JoinSet<(String, Result<(), ProviderError>)> = JoinSet::new();
            for planned in &stage.resources {
                let provider = self.providers.get(planned.kind)?;
                let opts = ProviderOptions {
                    tenant_id: self.context.tenant_id.as_ref().map(|t| t.to_string()),
                    stack: doc.metadata.stack.clone(),
                    service: doc
                        .resources
                        .get(&planned.id)
                        .map(|r| r.service.clone())
                        .unwrap_or_default(),
                    timeout: Some(provider_timeout(planned.kind)),
                    ..Default::default()
                };
                let id = planned.id.clone();
                let kind = planned.kind;
                join_set.spawn(async move {
                    let result = with_timeout(
                        provider_timeout(kind),
                        provider.name().to_string(),
                        "delete",
                        &id,
                        provider.delete(&id, &opts),
                    )
                    .await;
                    (id, result)
                });
            }

            let mut failure: Option<PankaError> = None;
            while let Some(joined) = join_set.join_next().await {
                match joined {
                    Err(join_err) if join_err.is_cancelled() => continue,
                    Err(join_err) => {
                        failure.get_or_insert(PankaError::other(format!(
                            "destroy worker panicked: {join_err}"
                        )));
                    }
                    Ok((id, Ok(()))) => {
                        deleted += 1;
                        doc.resources.remove(&id);
                        doc.outputs.remove(&id);
                    }
                    Ok((_, Err(err))) => {
                        if failure.is_none() {
                            failure = Some(err.into());
                            join_set.abort_all();
                        }
                    }
                }
            }

            doc.metadata.updated_at = Utc::now();
            if let Some(err) = failure {
                // Partial progress stays observable; destruction of a
                // destruction would be revival, so no rollback.
                save_state(&self.state, key, &doc).await?;
                return Err(err);
            }
            save_state(&self.state, key, &doc).await?;
        }

        let state_removed = if doc.resources.is_empty() {
            self.state.delete(key).await.is_ok()
        } else {
            false
        };

        Ok(DestroyReport {
            resources_deleted: deleted,
            state_removed,
        })
    }

    // ------------------------------------------------------------------
    // Drift
    // ------------------------------------------------------------------

    /// Read-only comparison of stored state against the live cloud
    pub async fn drift(&self, stack: &str, environment: &str) -> Result<DriftReport, PankaError> {
        let key = state_key(stack, environment);
        let Some((doc, _)) = load_state(&self.state, &key).await? else {
            return Ok(DriftReport::default());
        };

        let mut report = DriftReport::default();
        for (id, stored) in &doc.resources {
            let provider = match self.providers.get(stored.kind) {
                Ok(provider) => provider,
                Err(err) => {
                    report.entries.push(DriftEntry {
                        id: id.clone(),
                        kind: stored.kind,
                        status: DriftStatus::Unknown,
                        detail: Some(err.to_string()),
                    });
                    continue;
                }
            };

            let entry = match provider.exists(id).await {
                Ok(false) => DriftEntry {
                    id: id.clone(),
                    kind: stored.kind,
                    status: DriftStatus::Deleted,
                    detail: None,
                },
                Ok(true) => match provider.read(id).await {
                    Ok(actual) if actual.outputs == stored.outputs => DriftEntry {
                        id: id.clone(),
                        kind: stored.kind,
                        status: DriftStatus::InSync,
                        detail: None,
                    },
                    Ok(_) => DriftEntry {
                        id: id.clone(),
                        kind: stored.kind,
                        status: DriftStatus::Modified,
                        detail: Some("live outputs differ from recorded state".to_string()),
                    },
                    Err(err) => DriftEntry {
                        id: id.clone(),
                        kind: stored.kind,
                        status: DriftStatus::Unknown,
                        detail: Some(err.to_string()),
                    },
                },
                Err(err) => DriftEntry {
                    id: id.clone(),
                    kind: stored.kind,
                    status: DriftStatus::Unknown,
                    detail: Some(err.to_string()),
                },
            };
            report.entries.push(entry);
        }

        Ok(report)
    }

    // ------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------

    fn validate(&self, set: &ResourceSet) -> Result<(), PankaError> {
        let report = Validator::new().validate(set);
        if report.is_valid() {
            Ok(())
        } else {
            Err(report.into())
        }
    }

    async fn release(&self, lock: &Lock) {
        if let Err(err) = self.locks.release(lock).await {
            warn!(key = %lock.key, error = %err, "lock release failed");
        }
    }
}

// ============================================================================
// WORKER BODY
// ============================================================================

/// Execute one planned resource; records rollback actions as side effects
async fn run_resource(
    provider: Arc<dyn ResourceProvider>,
    seed: &StageOutcome,
    resolved: Option<Resource>,
    before: Option<ResourceState>,
    opts: &ProviderOptions,
    log: Arc<RollbackLog>,
) -> Result<Option<ProviderResult>, ProviderError> {
    let timeout = provider_timeout(seed.kind);
    let id = seed.id.as_str();

    let missing_desired = || {
        ProviderError::new(
            provider.name(),
            seed.action.as_str(),
            id,
            "desired resource missing from configuration",
        )
    };

    match seed.action {
        ChangeType::Create => {
            let desired = resolved.ok_or_else(missing_desired)?;
            let result = with_timeout(
                timeout,
                provider.name().to_string(),
                "create",
                id,
                provider.create(&desired, opts),
            )
            .await?;
            log.record(RollbackAction {
                kind: ActionKind::Created,
                resource_id: id.to_string(),
                resource_kind: seed.kind,
                before: None,
                after: Some(state_entry(seed, &result)),
            });
            Ok(Some(result))
        }
        ChangeType::Update => {
            let desired = resolved.ok_or_else(missing_desired)?;
            let current = before.clone().ok_or_else(|| {
                ProviderError::new(provider.name(), "update", id, "no recorded state to update")
            })?;
            let result = with_timeout(
                timeout,
                provider.name().to_string(),
                "update",
                id,
                provider.update(&desired, &current, opts),
            )
            .await?;
            log.record(RollbackAction {
                kind: ActionKind::Updated,
                resource_id: id.to_string(),
                resource_kind: seed.kind,
                before,
                after: Some(state_entry(seed, &result)),
            });
            Ok(Some(result))
        }
        ChangeType::Recreate => {
            let desired = resolved.ok_or_else(missing_desired)?;
            with_timeout(
                timeout,
                provider.name().to_string(),
                "delete",
                id,
                provider.delete(id, opts),
            )
            .await?;
            log.record(RollbackAction {
                kind: ActionKind::Deleted,
                resource_id: id.to_string(),
                resource_kind: seed.kind,
                before: before.clone(),
                after: None,
            });
            let result = with_timeout(
                timeout,
                provider.name().to_string(),
                "create",
                id,
                provider.create(&desired, opts),
            )
            .await?;
            log.record(RollbackAction {
                kind: ActionKind::Created,
                resource_id: id.to_string(),
                resource_kind: seed.kind,
                before: None,
                after: Some(state_entry(seed, &result)),
            });
            Ok(Some(result))
        }
        ChangeType::Delete => {
            with_timeout(
                timeout,
                provider.name().to_string(),
                "delete",
                id,
                provider.delete(id, opts),
            )
            .await?;
            log.record(RollbackAction {
                kind: ActionKind::Deleted,
                resource_id: id.to_string(),
                resource_kind: seed.kind,
                before,
                after: None,
            });
            Ok(None)
        }
        ChangeType::NoOp => Ok(None),
    }
}

/// Timeout wrapper classifying elapse as a provider failure
async fn with_timeout<T>(
    timeout: Duration,
    provider: String,
    operation: &str,
    id: &str,
    fut: impl std::future::Future<Output = Result<T, ProviderError>>,
) -> Result<T, ProviderError> {
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => Err(ProviderError::new(
            provider,
            operation,
            id,
            format!("timed out after {}s", timeout.as_secs()),
        )),
    }
}

/// State entry for a freshly applied resource
fn state_entry(seed: &StageOutcome, result: &ProviderResult) -> ResourceState {
    let now = Utc::now();
    ResourceState {
        id: seed.id.clone(),
        kind: seed.kind,
        service: seed.service.clone(),
        provider_name: seed.provider_name.clone(),
        status: result.status,
        outputs: result.outputs.clone(),
        dependencies: seed.dependencies.clone(),
        attributes: seed
            .desired_attributes
            .clone()
            .unwrap_or(serde_json::Value::Null),
        created_at: now,
        updated_at: now,
        tags: BTreeMap::new(),
    }
}

/// Fold a worker's success into the single-writer state document
fn apply_outcome_to_state(
    doc: &mut StateDocument,
    outcome: &StageOutcome,
    result: Option<ProviderResult>,
) {
    match (outcome.action, result) {
        (ChangeType::Delete, _) | (_, None) => {
            doc.resources.remove(&outcome.id);
            doc.outputs.remove(&outcome.id);
        }
        (_, Some(result)) => {
            let created_at = doc
                .resources
                .get(&outcome.id)
                .map(|existing| existing.created_at)
                .unwrap_or_else(Utc::now);
            let mut entry = state_entry(outcome, &result);
            entry.created_at = created_at;
            doc.outputs.insert(
                outcome.id.clone(),
                serde_json::to_value(&result.outputs).unwrap_or(serde_json::Value::Null),
            );
            doc.resources.insert(outcome.id.clone(), entry);
        }
    }
}

/// Reconstruct a desired resource from its stored attribute snapshot, for
/// rollback re-creation and re-application
fn resource_from_state(stack: &str, state: &ResourceState) -> Option<Resource> {
    let yaml_value: serde_yaml::Value = serde_yaml::to_value(&state.attributes).ok()?;
    let spec = ComponentSpec::decode(state.kind, yaml_value).ok()?;
    Some(Resource {
        api_version: "components.panka.io/v1".to_string(),
        kind: state.kind,
        metadata: crate::schema::Metadata {
            name: state.id.clone(),
            tenant: None,
            stack: Some(stack.to_string()),
            service: (!state.service.is_empty()).then(|| state.service.clone()),
            labels: BTreeMap::new(),
            annotations: BTreeMap::new(),
        },
        depends_on: state.dependencies.clone(),
        spec,
    })
}

/// Placeholder when an update rollback lacks both snapshots
fn placeholder_state(action: &RollbackAction) -> ResourceState {
    let now = Utc::now();
    ResourceState {
        id: action.resource_id.clone(),
        kind: action.resource_kind,
        service: String::new(),
        provider_name: String::new(),
        status: ResourceStatus::Failed,
        outputs: BTreeMap::new(),
        dependencies: Vec::new(),
        attributes: serde_json::Value::Null,
        created_at: now,
        updated_at: now,
        tags: BTreeMap::new(),
    }
}

// ============================================================================
// LAZY REFERENCE RESOLUTION
// ============================================================================

/// Substitute `valueFrom` and `${component.output}` references against the
/// outputs recorded so far, re-decoding the spec afterwards
fn resolve_resource(
    resource: &Resource,
    outputs: &BTreeMap<String, BTreeMap<String, String>>,
) -> Result<Resource, PankaError> {
    let mut value = resource.spec_value();
    resolve_value(&mut value, outputs);

    let yaml_value: serde_yaml::Value = serde_yaml::to_value(&value)?;
    let spec = ComponentSpec::decode(resource.kind, yaml_value)?;
    Ok(Resource {
        spec,
        ..resource.clone()
    })
}

fn resolve_value(
    value: &mut serde_json::Value,
    outputs: &BTreeMap<String, BTreeMap<String, String>>,
) {
    match value {
        serde_json::Value::Object(map) => {
            let resolved = match map.get("valueFrom") {
                Some(serde_json::Value::Object(vf)) => {
                    match (vf.get("component"), vf.get("output")) {
                        (
                            Some(serde_json::Value::String(component)),
                            Some(serde_json::Value::String(output)),
                        ) => outputs
                            .get(component)
                            .and_then(|m| m.get(output))
                            .cloned(),
                        _ => None,
                    }
                }
                _ => None,
            };
            if let Some(resolved) = resolved {
                map.remove("valueFrom");
                map.insert("value".to_string(), serde_json::Value::String(resolved));
            }
            for child in map.values_mut() {
                resolve_value(child, outputs);
            }
        }
        serde_json::Value::Array(items) => {
            for item in items {
                resolve_value(item, outputs);
            }
        }
        serde_json::Value::String(text) => {
            if text.contains("${") {
                *text = resolve_output_refs(text, outputs);
            }
        }
        _ => {}
    }
}

// ============================================================================
// TESTS
// ============================================================================
