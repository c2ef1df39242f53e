//! # Deployment Planner
//!
//! Converts the dependency graph plus the change-set into an ordered list
//! of **stages**. A stage is a set of resources at one graph level:
//! independent by construction, dispatched concurrently. Stages execute
//! strictly sequentially.
//!
//! - Deploy modes emit one stage per level, ascending; resources carry
//!   `create`/`update`/`recreate` from the change-set, and a resource
//!   whose direct dependency is being recreated is promoted to `update`
//!   so it re-reads the dependency's fresh outputs. All-`none` stages are
//!   elided. Resources present only in state are deleted last, in
//!   reverse-topological order.
//! - Destroy mode emits reverse-topological stages of `delete` actions
//!   over the stored state.
//!
//! Every plan carries a SHA-256 `plan_hash` over its structural content
//! (ordered stage/action/resource/diff tuples) for idempotence checks,
//! and an advisory duration estimate from per-kind baselines.

mod differ;

pub use differ::{
    diff, mutability_for, AttributeDiff, ChangeSet, ChangeType, Mutability, ResourceChange,
};

use std::collections::BTreeMap;
use std::time::Duration;

use sha2::{Digest, Sha256};

use crate::graph::{DependencyGraph, EdgeKind, EdgeLabel, GraphError};
use crate::schema::Kind;
use crate::state::StateDocument;

// ============================================================================
// PLAN MODEL
// ============================================================================

/// Requested action mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanMode {
    /// First deployment of a (stack, environment)
    Create,
    /// Subsequent deployment over existing state
    Update,
    /// Tear-down of everything in state
    Destroy,
}

impl PlanMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlanMode::Create => "create",
            PlanMode::Update => "update",
            PlanMode::Destroy => "destroy",
        }
    }
}

/// One resource scheduled within a stage
#[derive(Debug, Clone, PartialEq)]
pub struct PlannedResource {
    pub id: String,
    pub kind: Kind,
    pub action: ChangeType,
}

/// A set of independent resources executed concurrently
#[derive(Debug, Clone, PartialEq)]
pub struct Stage {
    pub level: usize,
    pub resources: Vec<PlannedResource>,
}

impl Stage {
    /// Advisory duration: slowest resource in the stage plus fixed overhead
    pub fn estimated_duration(&self) -> Duration {
        let slowest = self
            .resources
            .iter()
            .map(|r| baseline_secs(r.kind))
            .max()
            .unwrap_or(0);
        Duration::from_secs(slowest + STAGE_OVERHEAD_SECS)
    }
}

/// Ordered multi-stage execution plan
#[derive(Debug, Clone, PartialEq)]
pub struct DeploymentPlan {
    pub mode: PlanMode,
    pub stages: Vec<Stage>,
    pub plan_hash: String,
}

impl DeploymentPlan {
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    pub fn resource_count(&self) -> usize {
        self.stages.iter().map(|s| s.resources.len()).sum()
    }

    /// Advisory wall-clock estimate: stages are sequential
    pub fn estimated_duration(&self) -> Duration {
        self.stages.iter().map(Stage::estimated_duration).sum()
    }
}

// ============================================================================
// DURATION BASELINES
// ============================================================================

const STAGE_OVERHEAD_SECS: u64 = 5;

/// Typical provisioning latency per kind, seconds
fn baseline_secs(kind: Kind) -> u64 {
    match kind {
        Kind::Rds | Kind::DocumentDb => 1800,
        Kind::Msk => 2400,
        Kind::CloudFront => 900,
        Kind::MicroService => 300,
        Kind::Alb | Kind::Nlb => 180,
        Kind::Efs => 120,
        Kind::Lambda | Kind::Worker | Kind::CronJob => 120,
        Kind::DynamoDb => 90,
        Kind::Sqs | Kind::Sns | Kind::EventBridge => 60,
        Kind::S3 | Kind::Ebs | Kind::Kafka | Kind::ApiGateway => 60,
        Kind::Stack | Kind::Service => 0,
    }
}

// ============================================================================
// PLANNER
// ============================================================================

/// Produce a deploy-mode plan (create/update)
pub fn plan_deploy(
    graph: &mut DependencyGraph,
    changes: &ChangeSet,
    current: Option<&StateDocument>,
) -> Result<DeploymentPlan, GraphError> {
    let mode = if current.is_some_and(|doc| !doc.resources.is_empty()) {
        PlanMode::Update
    } else {
        PlanMode::Create
    };

    let mut stages = Vec::new();
    let mut planned_actions: BTreeMap<String, ChangeType> = BTreeMap::new();

    for (level, group) in graph.level_groups()?.into_iter().enumerate() {
        let mut resources = Vec::new();
        for id in group {
            let Some(change) = changes.get(&id) else {
                continue;
            };
            let mut action = change.change_type;
            if action == ChangeType::NoOp {
                // A recreated dependency invalidates the outputs this
                // resource consumed; it must re-apply against them.
                let dependency_recreated = graph
                    .dependencies(&id)
                    .any(|dep| planned_actions.get(dep) == Some(&ChangeType::Recreate));
                if dependency_recreated {
                    action = ChangeType::Update;
                }
            }
            planned_actions.insert(id.clone(), action);
            if action != ChangeType::NoOp {
                resources.push(PlannedResource {
                    id,
                    kind: change.kind,
                    action,
                });
            }
        }
        if !resources.is_empty() {
            stages.push(Stage { level, resources });
        }
    }

    // Orphans (in state, not in desired) are deleted last, reverse-topo
    // among themselves based on their stored dependencies.
    if let Some(doc) = current {
        let orphan_changes: Vec<&ResourceChange> = changes
            .changes
            .iter()
            .filter(|c| c.change_type == ChangeType::Delete)
            .collect();
        if !orphan_changes.is_empty() {
            let mut orphan_graph = DependencyGraph::new();
            for change in &orphan_changes {
                orphan_graph.add_node(change.id.clone());
            }
            for change in &orphan_changes {
                if let Some(stored) = doc.resources.get(&change.id) {
                    for dep in &stored.dependencies {
                        if orphan_graph.contains(dep) && dep != &change.id {
                            orphan_graph.add_edge(
                                change.id.clone(),
                                dep.clone(),
                                EdgeLabel {
                                    kind: EdgeKind::Order,
                                    output: None,
                                },
                            );
                        }
                    }
                }
            }
            let next_level = stages.last().map(|s| s.level + 1).unwrap_or(0);
            for (offset, group) in orphan_graph.reverse_level_groups()?.into_iter().enumerate() {
                let resources = group
                    .into_iter()
                    .filter_map(|id| {
                        changes.get(&id).map(|c| PlannedResource {
                            id: c.id.clone(),
                            kind: c.kind,
                            action: ChangeType::Delete,
                        })
                    })
                    .collect::<Vec<_>>();
                if !resources.is_empty() {
                    stages.push(Stage {
                        level: next_level + offset,
                        resources,
                    });
                }
            }
        }
    }

    let plan_hash = hash_plan(mode, &stages, changes);
    Ok(DeploymentPlan {
        mode,
        stages,
        plan_hash,
    })
}

/// Produce a destroy-mode plan from the stored state
pub fn plan_destroy(current: &StateDocument) -> Result<DeploymentPlan, GraphError> {
    let mut graph = graph_from_state(current);
    let mut stages = Vec::new();

    for (level, group) in graph.reverse_level_groups()?.into_iter().enumerate() {
        let resources = group
            .into_iter()
            .filter_map(|id| {
                current.resources.get(&id).map(|stored| PlannedResource {
                    id: stored.id.clone(),
                    kind: stored.kind,
                    action: ChangeType::Delete,
                })
            })
            .collect::<Vec<_>>();
        if !resources.is_empty() {
            stages.push(Stage { level, resources });
        }
    }

    let plan_hash = hash_plan(PlanMode::Destroy, &stages, &ChangeSet::default());
    Ok(DeploymentPlan {
        mode: PlanMode::Destroy,
        stages,
        plan_hash,
    })
}

/// Dependency graph reconstructed from stored resource dependencies
pub fn graph_from_state(doc: &StateDocument) -> DependencyGraph {
    let mut graph = DependencyGraph::new();
    for id in doc.resources.keys() {
        graph.add_node(id.clone());
    }
    for (id, stored) in &doc.resources {
        for dep in &stored.dependencies {
            if graph.contains(dep) && dep != id {
                graph.add_edge(
                    id.clone(),
                    dep.clone(),
                    EdgeLabel {
                        kind: EdgeKind::Order,
                        output: None,
                    },
                );
            }
        }
    }
    graph
}

/// Structural hash over ordered stage/action/resource/diff tuples
fn hash_plan(mode: PlanMode, stages: &[Stage], changes: &ChangeSet) -> String {
    let mut hasher = Sha256::new();
    hasher.update(mode.as_str().as_bytes());
    for (index, stage) in stages.iter().enumerate() {
        for resource in &stage.resources {
            hasher.update(format!("\n{index}|{}|{}", resource.action, resource.id).as_bytes());
            if let Some(change) = changes.get(&resource.id) {
                for diff in &change.diffs {
                    hasher.update(
                        format!(
                            "\n  {}={:?}->{:?}",
                            diff.path,
                            diff.old.as_ref(),
                            diff.new.as_ref()
                        )
                        .as_bytes(),
                    );
                }
            }
        }
    }
    hex::encode(hasher.finalize())
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::DependencyGraph;
    use crate::state::{ResourceState, ResourceStatus};
    use chrono::Utc;

    fn change(id: &str, kind: Kind, change_type: ChangeType) -> ResourceChange {
        ResourceChange {
            id: id.into(),
            kind,
            change_type,
            diffs: Vec::new(),
            requires_recreate: change_type == ChangeType::Recreate,
        }
    }

    fn stored(id: &str, kind: Kind, dependencies: Vec<String>) -> ResourceState {
        ResourceState {
            id: id.into(),
            service: "backend".into(),
            kind,
            provider_name: "aws".into(),
            status: ResourceStatus::Ready,
            outputs: Default::default(),
            dependencies,
            attributes: serde_json::Value::Null,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            tags: Default::default(),
        }
    }

    fn api_db_graph() -> DependencyGraph {
        let mut graph = DependencyGraph::new();
        graph.add_node("db");
        graph.add_edge(
            "api",
            "db",
            EdgeLabel {
                kind: EdgeKind::Explicit,
                output: None,
            },
        );
        graph
    }

    #[test]
    fn test_first_deploy_orders_stages_by_level() {
        let mut graph = api_db_graph();
        let changes = ChangeSet {
            changes: vec![
                change("db", Kind::Rds, ChangeType::Create),
                change("api", Kind::MicroService, ChangeType::Create),
            ],
        };

        let plan = plan_deploy(&mut graph, &changes, None).unwrap();
        assert_eq!(plan.mode, PlanMode::Create);
        assert_eq!(plan.stages.len(), 2);
        assert_eq!(plan.stages[0].resources[0].id, "db");
        assert_eq!(plan.stages[1].resources[0].id, "api");
    }

    #[test]
    fn test_noop_stages_are_elided() {
        let mut graph = api_db_graph();
        let changes = ChangeSet {
            changes: vec![
                change("db", Kind::Rds, ChangeType::NoOp),
                change("api", Kind::MicroService, ChangeType::NoOp),
            ],
        };

        let mut doc = StateDocument::new("app", "dev", None, "ops");
        doc.resources
            .insert("db".into(), stored("db", Kind::Rds, vec![]));
        let plan = plan_deploy(&mut graph, &changes, Some(&doc)).unwrap();
        assert!(plan.is_empty());
    }

    #[test]
    fn test_recreated_dependency_promotes_dependent_to_update() {
        let mut graph = api_db_graph();
        let changes = ChangeSet {
            changes: vec![
                change("db", Kind::Rds, ChangeType::Recreate),
                change("api", Kind::MicroService, ChangeType::NoOp),
            ],
        };
        let mut doc = StateDocument::new("app", "dev", None, "ops");
        doc.resources
            .insert("db".into(), stored("db", Kind::Rds, vec![]));
        doc.resources.insert(
            "api".into(),
            stored("api", Kind::MicroService, vec!["db".into()]),
        );

        let plan = plan_deploy(&mut graph, &changes, Some(&doc)).unwrap();
        assert_eq!(plan.stages.len(), 2);
        assert_eq!(plan.stages[0].resources[0].action, ChangeType::Recreate);
        assert_eq!(plan.stages[1].resources[0].id, "api");
        assert_eq!(plan.stages[1].resources[0].action, ChangeType::Update);
    }

    #[test]
    fn test_orphans_deleted_last() {
        let mut graph = DependencyGraph::new();
        graph.add_node("api");
        let changes = ChangeSet {
            changes: vec![
                change("api", Kind::MicroService, ChangeType::Update),
                change("old-db", Kind::Rds, ChangeType::Delete),
            ],
        };
        let mut doc = StateDocument::new("app", "dev", None, "ops");
        doc.resources
            .insert("old-db".into(), stored("old-db", Kind::Rds, vec![]));
        doc.resources.insert(
            "api".into(),
            stored("api", Kind::MicroService, vec![]),
        );

        let plan = plan_deploy(&mut graph, &changes, Some(&doc)).unwrap();
        let last = plan.stages.last().unwrap();
        assert_eq!(last.resources[0].id, "old-db");
        assert_eq!(last.resources[0].action, ChangeType::Delete);
    }

    #[test]
    fn test_destroy_is_reverse_topological() {
        let mut doc = StateDocument::new("app", "dev", None, "ops");
        doc.resources
            .insert("db".into(), stored("db", Kind::Rds, vec![]));
        doc.resources.insert(
            "api".into(),
            stored("api", Kind::MicroService, vec!["db".into()]),
        );

        let plan = plan_destroy(&doc).unwrap();
        assert_eq!(plan.mode, PlanMode::Destroy);
        assert_eq!(plan.stages.len(), 2);
        assert_eq!(plan.stages[0].resources[0].id, "api");
        assert_eq!(plan.stages[1].resources[0].id, "db");
        assert!(plan
            .stages
            .iter()
            .flat_map(|s| &s.resources)
            .all(|r| r.action == ChangeType::Delete));
    }

    #[test]
    fn test_plan_hash_is_stable_and_structural() {
        let mut graph = api_db_graph();
        let changes = ChangeSet {
            changes: vec![
                change("db", Kind::Rds, ChangeType::Create),
                change("api", Kind::MicroService, ChangeType::Create),
            ],
        };
        let a = plan_deploy(&mut graph.clone(), &changes, None).unwrap();
        let b = plan_deploy(&mut graph, &changes, None).unwrap();
        assert_eq!(a.plan_hash, b.plan_hash);

        let fewer = ChangeSet {
            changes: vec![change("db", Kind::Rds, ChangeType::Create)],
        };
        let mut graph2 = DependencyGraph::new();
        graph2.add_node("db");
        let c = plan_deploy(&mut graph2, &fewer, None).unwrap();
        assert_ne!(a.plan_hash, c.plan_hash);
    }

    #[test]
    fn test_duration_estimate_uses_stage_max() {
        let stage = Stage {
            level: 0,
            resources: vec![
                PlannedResource {
                    id: "db".into(),
                    kind: Kind::Rds,
                    action: ChangeType::Create,
                },
                PlannedResource {
                    id: "q".into(),
                    kind: Kind::Sqs,
                    action: ChangeType::Create,
                },
            ],
        };
        assert_eq!(stage.estimated_duration(), Duration::from_secs(1805));
    }
}
