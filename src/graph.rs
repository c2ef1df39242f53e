//! # Dependency Graph
//!
//! Directed graph over component names. An edge `A → B` encodes "B must
//! exist before A" (A depends on B). The structure keeps forward and
//! reverse adjacency, a label per edge, a level integer per node, and a
//! dirty flag so levels are recomputed at most once per mutation batch
//! within an invocation.
//!
//! - Cycle detection: DFS with three-color marking; on a back-edge the
//!   cycle path is recovered from the recursion stack.
//! - Topological sort: Kahn's algorithm emitting dependency-satisfied
//!   order; ties break by ascending node id, which makes orderings a
//!   testable contract.
//! - Level grouping: `level(n) = 0` for nodes with no dependencies, else
//!   `1 + max(level of deps)`. Nodes within a level are independent and
//!   may be dispatched concurrently; reverse-level order drives
//!   destruction.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::fmt;

use thiserror::Error;

use crate::parser::{extract_implicit_refs, ResourceSet};

// ============================================================================
// EDGES
// ============================================================================

/// How an edge entered the graph
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeKind {
    /// Listed in `dependsOn`
    Explicit,
    /// Extracted from `valueFrom` / target fields / `${...}` references
    Implicit,
    /// Synthetic ordering constraint
    Order,
}

/// Edge annotation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EdgeLabel {
    pub kind: EdgeKind,
    /// Referenced output attribute, for implicit output edges
    pub output: Option<String>,
}

// ============================================================================
// GRAPH ERROR
// ============================================================================

#[derive(Debug, Error)]
pub enum GraphError {
    #[error("dependency cycle: {}", path.join(" → "))]
    CycleDetected { path: Vec<String> },
}

// ============================================================================
// DEPENDENCY GRAPH
// ============================================================================

/// Node/edge store with forward and reverse adjacency
#[derive(Debug, Default, Clone)]
pub struct DependencyGraph {
    nodes: BTreeSet<String>,
    /// node → its dependencies
    forward: BTreeMap<String, BTreeSet<String>>,
    /// node → its dependents
    reverse: BTreeMap<String, BTreeSet<String>>,
    /// (from, to) → label
    labels: BTreeMap<(String, String), EdgeLabel>,
    /// node → level, valid only when `dirty` is false
    levels: BTreeMap<String, usize>,
    dirty: bool,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the graph for a parsed resource set: one node per component,
    /// explicit `dependsOn` edges plus extracted implicit edges
    ///
    /// References to unknown components are skipped here; the validator
    /// reports them before any plan is produced.
    pub fn from_resources(set: &ResourceSet) -> Self {
        let mut graph = Self::new();
        for component in &set.components {
            graph.add_node(component.name());
        }
        for component in &set.components {
            for dep in &component.depends_on {
                if graph.contains(dep) && dep != component.name() {
                    graph.add_edge(
                        component.name(),
                        dep,
                        EdgeLabel {
                            kind: EdgeKind::Explicit,
                            output: None,
                        },
                    );
                }
            }
            for implicit in extract_implicit_refs(component) {
                if graph.contains(&implicit.component) && implicit.component != component.name() {
                    graph.add_edge(
                        component.name(),
                        &implicit.component,
                        EdgeLabel {
                            kind: EdgeKind::Implicit,
                            output: implicit.output,
                        },
                    );
                }
            }
        }
        graph
    }

    pub fn add_node(&mut self, id: impl Into<String>) {
        let id = id.into();
        if self.nodes.insert(id.clone()) {
            self.forward.entry(id.clone()).or_default();
            self.reverse.entry(id).or_default();
            self.dirty = true;
        }
    }

    /// Add edge `from → to` ("to must exist before from"); nodes are
    /// created as needed. An existing edge keeps its first label unless
    /// the new one is explicit.
    pub fn add_edge(&mut self, from: impl Into<String>, to: impl Into<String>, label: EdgeLabel) {
        let from = from.into();
        let to = to.into();
        self.add_node(from.clone());
        self.add_node(to.clone());
        self.forward.entry(from.clone()).or_default().insert(to.clone());
        self.reverse.entry(to.clone()).or_default().insert(from.clone());
        let key = (from, to);
        match self.labels.get(&key) {
            Some(existing) if existing.kind == EdgeKind::Explicit => {}
            _ if label.kind == EdgeKind::Explicit => {
                self.labels.insert(key, label);
            }
            Some(_) => {}
            None => {
                self.labels.insert(key, label);
            }
        }
        self.dirty = true;
    }

    pub fn contains(&self, id: &str) -> bool {
        self.nodes.contains(id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node_ids(&self) -> impl Iterator<Item = &str> {
        self.nodes.iter().map(String::as_str)
    }

    /// Direct dependencies of a node
    pub fn dependencies(&self, id: &str) -> impl Iterator<Item = &str> {
        self.forward
            .get(id)
            .into_iter()
            .flat_map(|set| set.iter().map(String::as_str))
    }

    /// Direct dependents of a node
    pub fn dependents(&self, id: &str) -> impl Iterator<Item = &str> {
        self.reverse
            .get(id)
            .into_iter()
            .flat_map(|set| set.iter().map(String::as_str))
    }

    pub fn edge_label(&self, from: &str, to: &str) -> Option<&EdgeLabel> {
        self.labels.get(&(from.to_string(), to.to_string()))
    }

    // ------------------------------------------------------------------
    // Cycle detection
    // ------------------------------------------------------------------

    /// DFS three-color cycle check; returns the cycle path on failure
    pub fn ensure_acyclic(&self) -> Result<(), GraphError> {
        #[derive(Clone, Copy, PartialEq, Eq)]
        enum Color {
            White,
            Gray,
            Black,
        }

        let mut colors: BTreeMap<&str, Color> =
            self.nodes.iter().map(|n| (n.as_str(), Color::White)).collect();
        let mut stack: Vec<&str> = Vec::new();

        fn dfs<'a>(
            node: &'a str,
            forward: &'a BTreeMap<String, BTreeSet<String>>,
            colors: &mut BTreeMap<&'a str, Color>,
            stack: &mut Vec<&'a str>,
        ) -> Result<(), Vec<String>> {
            colors.insert(node, Color::Gray);
            stack.push(node);

            if let Some(neighbors) = forward.get(node) {
                for neighbor in neighbors {
                    match colors.get(neighbor.as_str()) {
                        Some(Color::Gray) => {
                            let start = stack
                                .iter()
                                .position(|n| *n == neighbor.as_str())
                                .unwrap_or(0);
                            let mut path: Vec<String> =
                                stack[start..].iter().map(|s| s.to_string()).collect();
                            path.push(neighbor.to_string());
                            return Err(path);
                        }
                        Some(Color::White) | None => {
                            dfs(neighbor, forward, colors, stack)?;
                        }
                        Some(Color::Black) => {}
                    }
                }
            }

            stack.pop();
            colors.insert(node, Color::Black);
            Ok(())
        }

        for node in &self.nodes {
            if colors.get(node.as_str()) == Some(&Color::White) {
                if let Err(path) = dfs(node, &self.forward, &mut colors, &mut stack) {
                    return Err(GraphError::CycleDetected { path });
                }
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Ordering
    // ------------------------------------------------------------------

    /// Kahn's algorithm over the reverse adjacency: emission order is
    /// dependency-satisfied order, ties by ascending node id
    pub fn topological_sort(&self) -> Result<Vec<String>, GraphError> {
        let mut in_degree: BTreeMap<&str, usize> = self
            .nodes
            .iter()
            .map(|n| (n.as_str(), self.forward.get(n).map_or(0, BTreeSet::len)))
            .collect();

        // BTreeSet as the ready queue gives the ascending-id tie-break.
        let mut ready: BTreeSet<&str> = in_degree
            .iter()
            .filter(|(_, d)| **d == 0)
            .map(|(n, _)| *n)
            .collect();

        let mut order = Vec::with_capacity(self.nodes.len());
        while let Some(&node) = ready.iter().next() {
            ready.remove(node);
            order.push(node.to_string());
            if let Some(dependents) = self.reverse.get(node) {
                for dependent in dependents {
                    let degree = in_degree.get_mut(dependent.as_str()).expect("known node");
                    *degree -= 1;
                    if *degree == 0 {
                        ready.insert(dependent.as_str());
                    }
                }
            }
        }

        if order.len() != self.nodes.len() {
            // A cycle kept some nodes unemitted; report it precisely.
            self.ensure_acyclic()?;
            unreachable!("sort shortfall implies a cycle");
        }
        Ok(order)
    }

    /// Recompute node levels if anything changed since the last pass
    fn assign_levels(&mut self) -> Result<(), GraphError> {
        if !self.dirty {
            return Ok(());
        }
        let order = self.topological_sort()?;
        self.levels.clear();
        for node in order {
            let level = self
                .forward
                .get(&node)
                .map(|deps| {
                    deps.iter()
                        .map(|d| self.levels.get(d).copied().unwrap_or(0) + 1)
                        .max()
                        .unwrap_or(0)
                })
                .unwrap_or(0);
            self.levels.insert(node, level);
        }
        self.dirty = false;
        Ok(())
    }

    /// Level of one node
    pub fn level(&mut self, id: &str) -> Result<Option<usize>, GraphError> {
        self.assign_levels()?;
        Ok(self.levels.get(id).copied())
    }

    /// Nodes grouped by level, ascending; within a level, ascending by id
    pub fn level_groups(&mut self) -> Result<Vec<Vec<String>>, GraphError> {
        self.assign_levels()?;
        let mut groups: BTreeMap<usize, Vec<String>> = BTreeMap::new();
        for (node, level) in &self.levels {
            groups.entry(*level).or_default().push(node.clone());
        }
        Ok(groups.into_values().collect())
    }

    /// Level groups in reverse order, for destruction
    pub fn reverse_level_groups(&mut self) -> Result<Vec<Vec<String>>, GraphError> {
        let mut groups = self.level_groups()?;
        groups.reverse();
        Ok(groups)
    }

    /// Longest dependency chain, root-first; the minimum wall-clock floor
    /// for a deployment
    pub fn critical_path(&mut self) -> Result<Vec<String>, GraphError> {
        self.assign_levels()?;
        if self.nodes.is_empty() {
            return Ok(Vec::new());
        }

        // Deepest node, then walk down through the deepest dependency.
        let (mut current, _) = self
            .levels
            .iter()
            .max_by_key(|(id, level)| (**level, std::cmp::Reverse((*id).clone())))
            .map(|(id, level)| (id.clone(), *level))
            .expect("non-empty graph");

        let mut path = vec![current.clone()];
        loop {
            let next: Option<String> = self.forward.get(&current).and_then(|deps| {
                deps.iter()
                    .max_by_key(|d| {
                        (
                            self.levels.get(d.as_str()).copied().unwrap_or(0),
                            std::cmp::Reverse(d.as_str()),
                        )
                    })
                    .map(|d| d.clone())
            });
            match next {
                Some(dep) => {
                    path.push(dep.clone());
                    current = dep;
                }
                None => break,
            }
        }
        path.reverse();
        Ok(path)
    }

    /// BFS reachability, used to answer "does A transitively depend on B"
    pub fn depends_on(&self, from: &str, to: &str) -> bool {
        if from == to {
            return true;
        }
        let mut visited: BTreeSet<&str> = BTreeSet::new();
        let mut queue: VecDeque<&str> = VecDeque::new();
        queue.push_back(from);
        visited.insert(from);
        while let Some(current) = queue.pop_front() {
            if let Some(deps) = self.forward.get(current) {
                for dep in deps {
                    if dep == to {
                        return true;
                    }
                    if visited.insert(dep) {
                        queue.push_back(dep);
                    }
                }
            }
        }
        false
    }
}

impl fmt::Display for DependencyGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for node in &self.nodes {
            let deps: Vec<&str> = self.dependencies(node).collect();
            if deps.is_empty() {
                writeln!(f, "{node}")?;
            } else {
                writeln!(f, "{node} → {}", deps.join(", "))?;
            }
        }
        Ok(())
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn edge() -> EdgeLabel {
        EdgeLabel {
            kind: EdgeKind::Explicit,
            output: None,
        }
    }

    fn diamond() -> DependencyGraph {
        // d depends on b and c; b and c depend on a
        let mut g = DependencyGraph::new();
        g.add_edge("b", "a", edge());
        g.add_edge("c", "a", edge());
        g.add_edge("d", "b", edge());
        g.add_edge("d", "c", edge());
        g
    }

    #[test]
    fn test_adjacency_both_directions() {
        let g = diamond();
        assert_eq!(g.dependencies("d").collect::<Vec<_>>(), vec!["b", "c"]);
        assert_eq!(g.dependents("a").collect::<Vec<_>>(), vec!["b", "c"]);
    }

    #[test]
    fn test_topological_sort_dependency_first() {
        let g = diamond();
        let order = g.topological_sort().unwrap();
        assert_eq!(order, vec!["a", "b", "c", "d"]);
        let pos = |n: &str| order.iter().position(|x| x == n).unwrap();
        assert!(pos("a") < pos("b"));
        assert!(pos("b") < pos("d"));
        assert!(pos("c") < pos("d"));
    }

    #[test]
    fn test_levels() {
        let mut g = diamond();
        assert_eq!(g.level("a").unwrap(), Some(0));
        assert_eq!(g.level("b").unwrap(), Some(1));
        assert_eq!(g.level("c").unwrap(), Some(1));
        assert_eq!(g.level("d").unwrap(), Some(2));
        assert_eq!(
            g.level_groups().unwrap(),
            vec![vec!["a"], vec!["b", "c"], vec!["d"]]
        );
    }

    #[test]
    fn test_reverse_levels_for_destroy() {
        let mut g = diamond();
        assert_eq!(
            g.reverse_level_groups().unwrap(),
            vec![vec!["d"], vec!["b", "c"], vec!["a"]]
        );
    }

    #[test]
    fn test_cycle_detected_with_path() {
        let mut g = DependencyGraph::new();
        g.add_edge("a", "b", edge());
        g.add_edge("b", "c", edge());
        g.add_edge("c", "a", edge());
        let err = g.ensure_acyclic().unwrap_err();
        let GraphError::CycleDetected { path } = err;
        assert_eq!(path.first(), path.last());
        assert_eq!(path.len(), 4);
        assert!(path.contains(&"a".to_string()));
        assert!(path.contains(&"b".to_string()));
        assert!(path.contains(&"c".to_string()));
    }

    #[test]
    fn test_self_loop_is_cycle() {
        let mut g = DependencyGraph::new();
        g.add_edge("a", "a", edge());
        assert!(g.ensure_acyclic().is_err());
        assert!(g.topological_sort().is_err());
    }

    #[test]
    fn test_sort_is_deterministic() {
        let build = || {
            let mut g = DependencyGraph::new();
            g.add_node("zeta");
            g.add_node("alpha");
            g.add_node("mid");
            g.add_edge("mid", "alpha", edge());
            g
        };
        let a = build().topological_sort().unwrap();
        let b = build().topological_sort().unwrap();
        assert_eq!(a, b);
        // alpha unblocks mid, which sorts before zeta by id.
        assert_eq!(a, vec!["alpha", "mid", "zeta"]);

        assert_eq!(build().level_groups().unwrap(), build().level_groups().unwrap());
    }

    #[test]
    fn test_critical_path() {
        let mut g = diamond();
        let path = g.critical_path().unwrap();
        assert_eq!(path.len(), 3);
        assert_eq!(path.first().map(String::as_str), Some("a"));
        assert_eq!(path.last().map(String::as_str), Some("d"));
    }

    #[test]
    fn test_depends_on_transitive() {
        let g = diamond();
        assert!(g.depends_on("d", "a"));
        assert!(!g.depends_on("a", "d"));
    }

    #[test]
    fn test_explicit_label_wins() {
        let mut g = DependencyGraph::new();
        g.add_edge(
            "api",
            "db",
            EdgeLabel {
                kind: EdgeKind::Implicit,
                output: Some("endpoint".into()),
            },
        );
        g.add_edge("api", "db", edge());
        assert_eq!(g.edge_label("api", "db").unwrap().kind, EdgeKind::Explicit);
    }
}
