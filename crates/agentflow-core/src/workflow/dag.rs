//! Dependency graph analysis for task lists.
//!
//! Uses `petgraph` to model task dependencies as a directed graph. The
//! analysis is advisory: the scheduler never refuses a workflow because of
//! it. Unknown references simply block their dependents at run time and
//! cycles stall, so the report exists to warn early and to render
//! execution waves in the CLI.

use std::collections::{HashMap, HashSet};

use agentflow_types::task::{Task, TaskSpec};
use petgraph::algo::toposort;
use petgraph::graph::DiGraph;

// ---------------------------------------------------------------------------
// Node abstraction
// ---------------------------------------------------------------------------

/// Anything with an ID and a list of dependency IDs.
pub trait DagNode {
    fn node_id(&self) -> &str;
    fn node_dependencies(&self) -> &[String];
}

impl DagNode for Task {
    fn node_id(&self) -> &str {
        &self.id
    }

    fn node_dependencies(&self) -> &[String] {
        &self.dependencies
    }
}

impl DagNode for TaskSpec {
    fn node_id(&self) -> &str {
        &self.id
    }

    fn node_dependencies(&self) -> &[String] {
        &self.dependencies
    }
}

// ---------------------------------------------------------------------------
// Report
// ---------------------------------------------------------------------------

/// Result of [`analyze`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DagReport {
    /// `(task_id, missing_dependency_id)` pairs.
    pub unknown_dependencies: Vec<(String, String)>,
    /// A task ID that participates in a dependency cycle.
    pub cycle: Option<String>,
    /// Tasks grouped by dependency depth. Empty when a cycle exists.
    pub waves: Vec<Vec<String>>,
}

impl DagReport {
    pub fn is_clean(&self) -> bool {
        self.unknown_dependencies.is_empty() && self.cycle.is_none()
    }

    /// Emit one warning per problem found, tagged with `scope`.
    pub fn log_problems(&self, scope: &str) {
        for (task_id, dep) in &self.unknown_dependencies {
            tracing::warn!(
                scope,
                task_id = task_id.as_str(),
                dependency = dep.as_str(),
                "task depends on unknown task and will never become ready"
            );
        }
        if let Some(task_id) = &self.cycle {
            tracing::warn!(
                scope,
                task_id = task_id.as_str(),
                "dependency cycle detected; involved tasks will never become ready"
            );
        }
    }
}

// ---------------------------------------------------------------------------
// Analysis
// ---------------------------------------------------------------------------

/// Analyze a task list for unknown references and cycles, and compute
/// parallel execution waves.
///
/// Edges run from dependency to dependent. Unknown references are recorded
/// and left out of the graph. When IDs repeat, the first occurrence wins.
pub fn analyze<N: DagNode>(nodes: &[N]) -> DagReport {
    let mut report = DagReport::default();
    if nodes.is_empty() {
        return report;
    }

    let mut graph = DiGraph::<&str, ()>::new();
    let mut id_to_idx = HashMap::new();
    for node in nodes {
        id_to_idx
            .entry(node.node_id())
            .or_insert_with(|| graph.add_node(node.node_id()));
    }

    for node in nodes {
        let to_idx = id_to_idx[node.node_id()];
        for dep in node.node_dependencies() {
            match id_to_idx.get(dep.as_str()) {
                Some(&from_idx) => {
                    graph.update_edge(from_idx, to_idx, ());
                }
                None => report
                    .unknown_dependencies
                    .push((node.node_id().to_string(), dep.clone())),
            }
        }
    }

    // Topological sort -- detects cycles
    let sorted = match toposort(&graph, None) {
        Ok(sorted) => sorted,
        Err(cycle) => {
            report.cycle = Some(graph[cycle.node_id()].to_string());
            return report;
        }
    };

    // Depth: roots (and tasks whose only dependencies are unknown) sit at 0
    let mut depths: HashMap<&str, usize> = HashMap::new();
    for node_idx in sorted {
        let depth = graph
            .neighbors_directed(node_idx, petgraph::Direction::Incoming)
            .map(|dep_idx| depths.get(graph[dep_idx]).copied().unwrap_or(0) + 1)
            .max()
            .unwrap_or(0);
        depths.insert(graph[node_idx], depth);
    }

    let max_depth = depths.values().copied().max().unwrap_or(0);
    let mut waves: Vec<Vec<String>> = vec![vec![]; max_depth + 1];
    let mut placed = HashSet::new();
    for node in nodes {
        let id = node.node_id();
        if placed.insert(id) {
            waves[depths[id]].push(id.to_string());
        }
    }
    report.waves = waves;

    report
}
