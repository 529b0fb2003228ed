// src/dag/graph.rs

use std::collections::{BTreeSet, HashMap};

use petgraph::algo::toposort;
use petgraph::graphmap::DiGraphMap;

use crate::config::model::GraphFile;
use crate::errors::{Result, RundagError};

/// Internal node structure: stores immediate deps and dependents.
#[derive(Debug, Clone)]
struct DagNode {
    /// Direct dependencies: tasks that must reach a terminal state first.
    deps: Vec<String>,
    /// Direct dependents: tasks that depend on this one.
    dependents: Vec<String>,
}

/// In-memory DAG representation keyed by task name.
///
/// Acyclicity is already validated in `config::validate`, so here we keep
/// adjacency information for scheduling plus a topological order for
/// deterministic listings, dry-run plans and exports.
#[derive(Debug, Clone)]
pub struct TaskDag {
    nodes: HashMap<String, DagNode>,
    topo: Vec<String>,
}

impl TaskDag {
    /// Build a DAG from a validated [`GraphFile`].
    ///
    /// Assumes that all `deps` references are valid and there are no cycles.
    pub fn from_graph(cfg: &GraphFile) -> Self {
        let mut nodes: HashMap<String, DagNode> = HashMap::new();

        for (name, task) in cfg.task.iter() {
            nodes.insert(
                name.clone(),
                DagNode {
                    deps: task.deps.clone(),
                    dependents: Vec::new(),
                },
            );
        }

        let task_names: Vec<String> = nodes.keys().cloned().collect();
        for task_name in task_names {
            let deps = nodes
                .get(&task_name)
                .map(|n| n.deps.clone())
                .unwrap_or_default();

            for dep in deps {
                if let Some(dep_node) = nodes.get_mut(&dep) {
                    dep_node.dependents.push(task_name.clone());
                }
            }
        }

        let topo = topo_order(cfg);

        Self { nodes, topo }
    }

    /// Return all task names.
    pub fn tasks(&self) -> impl Iterator<Item = &str> {
        self.nodes.keys().map(|s| s.as_str())
    }

    /// Immediate dependencies of a task.
    pub fn dependencies_of(&self, name: &str) -> &[String] {
        self.nodes
            .get(name)
            .map(|n| n.deps.as_slice())
            .unwrap_or(&[])
    }

    /// Immediate dependents of a task.
    pub fn dependents_of(&self, name: &str) -> &[String] {
        self.nodes
            .get(name)
            .map(|n| n.dependents.as_slice())
            .unwrap_or(&[])
    }

    /// Task names in topological order (dependencies before dependents).
    pub fn topo_order(&self) -> &[String] {
        &self.topo
    }

    /// The dependency closure of the given roots: the roots themselves plus
    /// every transitive dependency. Fails on unknown task names.
    pub fn closure(&self, roots: &[String]) -> Result<BTreeSet<String>> {
        let mut selected = BTreeSet::new();
        let mut stack: Vec<String> = Vec::new();

        for root in roots {
            if !self.nodes.contains_key(root) {
                return Err(RundagError::TaskNotFound(root.clone()));
            }
            stack.push(root.clone());
        }

        while let Some(name) = stack.pop() {
            if !selected.insert(name.clone()) {
                continue;
            }
            for dep in self.dependencies_of(&name) {
                stack.push(dep.clone());
            }
        }

        Ok(selected)
    }
}

/// Topological order of the validated graph.
///
/// Edge direction: dep -> task, so `toposort` yields dependencies first.
/// Cycles were rejected at load time; if one somehow slips through we fall
/// back to name order rather than panicking.
fn topo_order(cfg: &GraphFile) -> Vec<String> {
    let mut graph: DiGraphMap<&str, ()> = DiGraphMap::new();

    for name in cfg.task.keys() {
        graph.add_node(name.as_str());
    }

    for (name, task) in cfg.task.iter() {
        for dep in task.deps.iter() {
            graph.add_edge(dep.as_str(), name.as_str(), ());
        }
    }

    match toposort(&graph, None) {
        Ok(order) => order.into_iter().map(|s| s.to_string()).collect(),
        Err(_) => cfg.task.keys().cloned().collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::model::RawGraphFile;

    fn graph(doc: &str) -> GraphFile {
        let raw: RawGraphFile = toml::from_str(doc).unwrap();
        GraphFile::try_from(raw).unwrap()
    }

    fn diamond() -> GraphFile {
        graph(
            r#"
            [task.base]
            cmd = "echo base"
            [task.left]
            cmd = "echo left"
            deps = ["base"]
            [task.right]
            cmd = "echo right"
            deps = ["base"]
            [task.top]
            cmd = "echo top"
            deps = ["left", "right"]
            "#,
        )
    }

    #[test]
    fn adjacency_is_populated_both_ways() {
        let dag = TaskDag::from_graph(&diamond());
        assert_eq!(dag.dependencies_of("top"), &["left", "right"]);
        let mut dependents = dag.dependents_of("base").to_vec();
        dependents.sort();
        assert_eq!(dependents, vec!["left", "right"]);
    }

    #[test]
    fn topo_order_respects_edges() {
        let dag = TaskDag::from_graph(&diamond());
        let order = dag.topo_order();
        let pos = |name: &str| order.iter().position(|n| n == name).unwrap();
        assert!(pos("base") < pos("left"));
        assert!(pos("base") < pos("right"));
        assert!(pos("left") < pos("top"));
        assert!(pos("right") < pos("top"));
        assert_eq!(order.len(), 4);
    }

    #[test]
    fn closure_pulls_transitive_deps_only() {
        let dag = TaskDag::from_graph(&diamond());
        let selected = dag.closure(&["left".to_string()]).unwrap();
        assert_eq!(
            selected.iter().cloned().collect::<Vec<_>>(),
            vec!["base", "left"]
        );
    }

    #[test]
    fn closure_rejects_unknown_root() {
        let dag = TaskDag::from_graph(&diamond());
        assert!(matches!(
            dag.closure(&["ghost".to_string()]),
            Err(RundagError::TaskNotFound(_))
        ));
    }
}
