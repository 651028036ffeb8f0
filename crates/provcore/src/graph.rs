use crate::WorkflowError;
use petgraph::algo::has_path_connecting;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;
use std::collections::{BTreeSet, HashMap};

/// Dependency graph over the steps of a workflow.
///
/// Edges point from a dependency to its dependent, so a topological order
/// is a valid execution order. Cycles are rejected when an edge is added,
/// which keeps the graph a DAG at all times.
#[derive(Debug, Clone, Default)]
pub struct StepGraph {
    graph: DiGraph<String, ()>,
    index: HashMap<String, NodeIndex>,
}

impl StepGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_step(&mut self, name: impl Into<String>) -> Result<(), WorkflowError> {
        let name = name.into();
        if self.index.contains_key(&name) {
            return Err(WorkflowError::DuplicateStep(name));
        }
        let idx = self.graph.add_node(name.clone());
        self.index.insert(name, idx);
        Ok(())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    fn idx(&self, name: &str) -> Result<NodeIndex, WorkflowError> {
        self.index
            .get(name)
            .copied()
            .ok_or_else(|| WorkflowError::StepNotFound(name.to_string()))
    }

    /// Make `dependent` run only after `dependency` has completed
    pub fn add_dependency(&mut self, dependent: &str, dependency: &str) -> Result<(), WorkflowError> {
        let from = self.idx(dependency)?;
        let to = self.idx(dependent)?;

        // An existing path dependent -> dependency means the new edge closes a loop.
        if has_path_connecting(&self.graph, to, from, None) {
            return Err(WorkflowError::CyclicDependency {
                dependent: dependent.to_string(),
                dependency: dependency.to_string(),
            });
        }

        self.graph.update_edge(from, to, ());
        Ok(())
    }

    /// Whether `step` is `candidate` or transitively depends on it
    pub fn nested_depends(&self, step: &str, candidate: &str) -> bool {
        match (self.index.get(step), self.index.get(candidate)) {
            (Some(&step), Some(&candidate)) => has_path_connecting(&self.graph, candidate, step, None),
            _ => false,
        }
    }

    /// Direct dependencies of a step
    pub fn dependencies(&self, step: &str) -> Vec<&str> {
        let Some(&idx) = self.index.get(step) else {
            return Vec::new();
        };
        let mut deps: Vec<&str> = self
            .graph
            .neighbors_directed(idx, Direction::Incoming)
            .map(|d| self.graph[d].as_str())
            .collect();
        deps.sort_unstable();
        deps
    }

    pub fn steps(&self) -> impl Iterator<Item = &str> {
        self.graph.node_weights().map(String::as_str)
    }

    /// Steps ordered so every step follows all of its dependencies. Steps
    /// that are ready at the same time keep their declaration order.
    pub fn topological_order(&self) -> Result<Vec<String>, WorkflowError> {
        let mut indegree: Vec<usize> = self
            .graph
            .node_indices()
            .map(|n| self.graph.neighbors_directed(n, Direction::Incoming).count())
            .collect();
        let mut ready: BTreeSet<NodeIndex> = self
            .graph
            .node_indices()
            .filter(|n| indegree[n.index()] == 0)
            .collect();

        let mut order = Vec::with_capacity(self.graph.node_count());
        while let Some(idx) = ready.pop_first() {
            order.push(self.graph[idx].clone());
            for next in self.graph.neighbors_directed(idx, Direction::Outgoing) {
                indegree[next.index()] -= 1;
                if indegree[next.index()] == 0 {
                    ready.insert(next);
                }
            }
        }

        if order.len() != self.graph.node_count() {
            return Err(WorkflowError::Validation("step graph contains a cycle".to_string()));
        }
        Ok(order)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn graph(steps: &[&str]) -> StepGraph {
        let mut g = StepGraph::new();
        for s in steps {
            g.add_step(*s).unwrap();
        }
        g
    }

    #[test]
    fn test_nested_depends_is_transitive_and_reflexive() {
        let mut g = graph(&["a", "b", "c", "d"]);
        g.add_dependency("b", "a").unwrap();
        g.add_dependency("c", "b").unwrap();

        assert!(g.nested_depends("c", "a"));
        assert!(g.nested_depends("b", "a"));
        assert!(g.nested_depends("a", "a"));
        assert!(!g.nested_depends("a", "c"));
        assert!(!g.nested_depends("d", "a"));
        assert!(!g.nested_depends("missing", "a"));
    }

    #[test]
    fn test_cycle_rejected_on_insert() {
        let mut g = graph(&["a", "b", "c"]);
        g.add_dependency("b", "a").unwrap();
        g.add_dependency("c", "b").unwrap();

        let err = g.add_dependency("a", "c").unwrap_err();
        assert!(matches!(err, WorkflowError::CyclicDependency { .. }));
        assert!(g.add_dependency("a", "a").is_err());
        // The rejected edge left the graph unchanged.
        assert!(!g.nested_depends("a", "c"));
    }

    #[test]
    fn test_unknown_step_and_duplicate() {
        let mut g = graph(&["a"]);
        assert!(matches!(g.add_dependency("a", "zzz"), Err(WorkflowError::StepNotFound(_))));
        assert!(matches!(g.add_step("a"), Err(WorkflowError::DuplicateStep(_))));
    }

    #[test]
    fn test_topological_order_and_dependencies() {
        let mut g = graph(&["patch", "await", "gmi"]);
        g.add_dependency("await", "patch").unwrap();
        g.add_dependency("patch", "gmi").unwrap();
        g.add_dependency("patch", "gmi").unwrap();

        let order = g.topological_order().unwrap();
        let pos = |s: &str| order.iter().position(|o| o == s).unwrap();
        assert!(pos("gmi") < pos("patch"));
        assert!(pos("patch") < pos("await"));
        assert_eq!(g.dependencies("patch"), vec!["gmi"]);
        assert!(g.dependencies("gmi").is_empty());
    }

    #[test]
    fn test_topological_order_keeps_declaration_order() {
        let mut g = graph(&["c", "a", "b"]);
        g.add_dependency("c", "b").unwrap();

        assert_eq!(g.topological_order().unwrap(), vec!["a", "b", "c"]);
    }
}
