// src/dag/graph.rs

use std::collections::HashMap;

use petgraph::algo::{kosaraju_scc, toposort};
use petgraph::graphmap::DiGraphMap;

use crate::dag::TaskName;
use crate::errors::{Result, ScanflowError};

/// Internal node structure: stores immediate deps and dependents.
#[derive(Debug, Clone)]
struct DagNode {
    /// Direct dependencies: tasks that must finish before this one can run.
    deps: Vec<TaskName>,
    /// Direct dependents: tasks that depend on this one.
    dependents: Vec<TaskName>,
}

/// Validated dependency graph keyed by task id, plus one topological order.
///
/// A `DagGraph` only exists for task sets with unique ids, resolvable
/// dependencies and no cycles; [`DagGraph::build`] rejects everything else.
#[derive(Debug, Clone)]
pub struct DagGraph {
    nodes: HashMap<TaskName, DagNode>,
    /// Ids in the order they were registered.
    registered: Vec<TaskName>,
    /// Dependencies always precede their dependents.
    order: Vec<TaskName>,
}

impl DagGraph {
    /// Build a graph from `(id, dependencies)` pairs.
    ///
    /// Fails with:
    /// - [`ScanflowError::DuplicateTask`] if an id is registered twice
    /// - [`ScanflowError::UnknownDependency`] if a dependency id is not registered
    /// - [`ScanflowError::DagCycle`] if the dependencies form a cycle
    ///   (a task depending on itself included)
    pub fn build<I>(entries: I) -> Result<Self>
    where
        I: IntoIterator<Item = (TaskName, Vec<TaskName>)>,
    {
        let mut nodes: HashMap<TaskName, DagNode> = HashMap::new();
        let mut registered: Vec<TaskName> = Vec::new();

        // First pass: one vertex per task id.
        for (name, deps) in entries {
            if nodes.contains_key(&name) {
                return Err(ScanflowError::DuplicateTask(name));
            }
            registered.push(name.clone());
            nodes.insert(
                name,
                DagNode {
                    deps,
                    dependents: Vec::new(),
                },
            );
        }

        // Second pass: dependency -> dependent edges.
        for name in registered.iter() {
            let deps = nodes
                .get(name)
                .map(|n| n.deps.clone())
                .unwrap_or_default();

            for dep in deps {
                match nodes.get_mut(&dep) {
                    Some(dep_node) => {
                        if !dep_node.dependents.contains(name) {
                            dep_node.dependents.push(name.clone());
                        }
                    }
                    None => {
                        return Err(ScanflowError::UnknownDependency {
                            task: name.clone(),
                            dependency: dep,
                        });
                    }
                }
            }
        }

        let order = topological_order(&registered, &nodes)?;

        Ok(Self {
            nodes,
            registered,
            order,
        })
    }

    /// Topological order: every id appears after all of its dependencies.
    pub fn order(&self) -> &[TaskName] {
        &self.order
    }

    /// All task ids, in registration order.
    pub fn tasks(&self) -> impl Iterator<Item = &str> {
        self.registered.iter().map(|s| s.as_str())
    }

    pub fn len(&self) -> usize {
        self.registered.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registered.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.nodes.contains_key(name)
    }

    /// Immediate dependencies of a task.
    pub fn dependencies_of(&self, name: &str) -> &[TaskName] {
        self.nodes
            .get(name)
            .map(|n| n.deps.as_slice())
            .unwrap_or(&[])
    }

    /// Immediate dependents of a task (tasks that list this one as a dependency).
    pub fn dependents_of(&self, name: &str) -> &[TaskName] {
        self.nodes
            .get(name)
            .map(|n| n.dependents.as_slice())
            .unwrap_or(&[])
    }

    /// Tasks without dependencies, in registration order.
    pub fn roots(&self) -> Vec<&str> {
        self.tasks()
            .filter(|name| self.dependencies_of(name).is_empty())
            .collect()
    }
}

fn topological_order(
    registered: &[TaskName],
    nodes: &HashMap<TaskName, DagNode>,
) -> Result<Vec<TaskName>> {
    // Edge direction: dep -> task
    let mut graph: DiGraphMap<&str, ()> = DiGraphMap::new();

    for name in registered {
        graph.add_node(name.as_str());
    }

    for name in registered {
        if let Some(node) = nodes.get(name) {
            for dep in node.deps.iter() {
                graph.add_edge(dep.as_str(), name.as_str(), ());
            }
        }
    }

    match toposort(&graph, None) {
        Ok(order) => Ok(order.into_iter().map(str::to_string).collect()),
        Err(cycle) => {
            let node = cycle.node_id();
            let mut members: Vec<&str> = kosaraju_scc(&graph)
                .into_iter()
                .find(|scc| scc.contains(&node))
                .unwrap_or_else(|| vec![node]);
            members.sort_unstable();

            Err(ScanflowError::DagCycle(format!(
                "cycle detected in task DAG involving tasks [{}]",
                members.join(", ")
            )))
        }
    }
}
