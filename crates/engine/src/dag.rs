//! DAG validation and execution grouping. Run validation before executing a
//! workflow.
//!
//! Rules enforced:
//! 1. Node IDs must be unique within the workflow.
//! 2. Every dependency must reference an existing node, and never the node
//!    itself.
//! 3. The directed graph must be acyclic (depth-first search finds no back
//!    edge).
//!
//! Grouping peels off, in insertion order, every node whose dependencies are
//! all placed in earlier groups (Kahn's algorithm, one layer at a time).

use std::collections::{HashMap, HashSet};

use crate::{
    EngineError, GraphError,
    models::{Node, WorkflowGraph},
};

impl WorkflowGraph {
    /// Human-readable validation errors; empty means the graph is runnable.
    pub fn validate(&self) -> Vec<String> {
        self.graph_errors().iter().map(ToString::to_string).collect()
    }

    /// Structured form of [`validate`](Self::validate).
    pub fn graph_errors(&self) -> Vec<GraphError> {
        let mut errors = Vec::new();

        // -------------------------------------------------------------------
        // 1. Ensure node IDs are unique
        // -------------------------------------------------------------------
        let mut seen_ids: HashSet<&str> = HashSet::new();
        let mut reported: HashSet<&str> = HashSet::new();
        for node in &self.nodes {
            if !seen_ids.insert(node.id.as_str()) && reported.insert(node.id.as_str()) {
                errors.push(GraphError::DuplicateNodeId(node.id.clone()));
            }
        }

        // -------------------------------------------------------------------
        // 2. Validate dependency targets
        // -------------------------------------------------------------------
        for node in &self.nodes {
            for dep in &node.dependencies {
                if dep == &node.id {
                    errors.push(GraphError::SelfDependency(node.id.clone()));
                } else if !seen_ids.contains(dep.as_str()) {
                    errors.push(GraphError::UnknownDependency {
                        node_id: node.id.clone(),
                        dependency: dep.clone(),
                    });
                }
            }
        }

        // -------------------------------------------------------------------
        // 3. Cycle detection (DFS, three colours)
        // -------------------------------------------------------------------
        errors.extend(find_cycles(&self.nodes));

        errors
    }

    /// Ordered execution groups. Every node appears exactly once, and each
    /// node's dependencies all sit in earlier groups. Within a group nodes
    /// keep their insertion order.
    ///
    /// # Errors
    /// [`EngineError::Validation`] if the graph is invalid.
    pub fn get_execution_order(&self) -> Result<Vec<Vec<String>>, EngineError> {
        let errors = self.validate();
        if !errors.is_empty() {
            return Err(EngineError::Validation(errors));
        }

        let mut placed: HashSet<&str> = HashSet::with_capacity(self.nodes.len());
        let mut remaining: Vec<&Node> = self.nodes.iter().collect();
        let mut groups: Vec<Vec<String>> = Vec::new();

        while !remaining.is_empty() {
            let group: Vec<&str> = remaining
                .iter()
                .filter(|n| n.dependencies.iter().all(|d| placed.contains(d.as_str())))
                .map(|n| n.id.as_str())
                .collect();

            // Unreachable after a clean validation.
            if group.is_empty() {
                let stuck = remaining.iter().map(|n| n.id.clone()).collect();
                return Err(EngineError::Validation(vec![
                    GraphError::CycleDetected { path: stuck }.to_string(),
                ]));
            }

            placed.extend(group.iter().copied());
            remaining.retain(|n| !placed.contains(n.id.as_str()));
            groups.push(group.into_iter().map(str::to_owned).collect());
        }

        Ok(groups)
    }
}

/// Validate the graph and return its execution groups.
///
/// # Errors
/// [`EngineError::Validation`] listing every problem found.
pub fn validate_dag(graph: &WorkflowGraph) -> Result<Vec<Vec<String>>, EngineError> {
    graph.get_execution_order()
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Colour {
    White,
    Grey,
    Black,
}

fn find_cycles(nodes: &[Node]) -> Vec<GraphError> {
    // First occurrence wins for duplicated ids; those are reported separately.
    let mut index: HashMap<&str, &Node> = HashMap::with_capacity(nodes.len());
    for node in nodes {
        index.entry(node.id.as_str()).or_insert(node);
    }

    let mut colour: HashMap<&str, Colour> =
        index.keys().map(|&id| (id, Colour::White)).collect();
    let mut cycles = Vec::new();
    let mut path: Vec<&str> = Vec::new();

    for node in nodes {
        if colour.get(node.id.as_str()) == Some(&Colour::White) {
            visit(node.id.as_str(), &index, &mut colour, &mut path, &mut cycles);
        }
    }

    cycles
}

fn visit<'a>(
    id: &'a str,
    index: &HashMap<&'a str, &'a Node>,
    colour: &mut HashMap<&'a str, Colour>,
    path: &mut Vec<&'a str>,
    cycles: &mut Vec<GraphError>,
) {
    colour.insert(id, Colour::Grey);
    path.push(id);

    if let Some(&node) = index.get(id) {
        for dep in &node.dependencies {
            let dep = dep.as_str();
            // Self edges and unknown targets are reported by the caller.
            if dep == id || !index.contains_key(dep) {
                continue;
            }
            match colour.get(dep).copied().unwrap_or(Colour::White) {
                Colour::White => visit(dep, index, colour, path, cycles),
                Colour::Grey => {
                    let start = path.iter().position(|&p| p == dep).unwrap_or(0);
                    let mut cycle: Vec<String> =
                        path[start..].iter().map(|&p| p.to_owned()).collect();
                    cycle.push(dep.to_owned());
                    // Edges point at dependencies; reverse to read in
                    // execution direction.
                    cycle.reverse();
                    cycles.push(GraphError::CycleDetected { path: cycle });
                }
                Colour::Black => {}
            }
        }
    }

    path.pop();
    colour.insert(id, Colour::Black);
}

// ============================================================
// Unit tests
// ============================================================
#[cfg(test)]
mod tests {
    use super::*;

    fn make_node(id: &str, deps: &[&str]) -> Node {
        Node::new(id, "mock").depends_on(deps.iter().copied())
    }

    fn make_graph(nodes: Vec<Node>) -> WorkflowGraph {
        WorkflowGraph { id: "wf".into(), name: "test".into(), nodes }
    }

    #[test]
    fn valid_linear_dag_returns_one_node_per_group() {
        // A → B → C
        let graph = make_graph(vec![
            make_node("a", &[]),
            make_node("b", &["a"]),
            make_node("c", &["b"]),
        ]);

        assert!(graph.validate().is_empty());
        let groups = graph.get_execution_order().expect("should be valid");
        assert_eq!(groups, vec![vec!["a"], vec!["b"], vec!["c"]]);
    }

    #[test]
    fn valid_diamond_dag_groups_siblings_in_insertion_order() {
        //   A
        //  / \
        // B   C
        //  \ /
        //   D
        let graph = make_graph(vec![
            make_node("a", &[]),
            make_node("b", &["a"]),
            make_node("c", &["a"]),
            make_node("d", &["b", "c"]),
        ]);

        let groups = validate_dag(&graph).expect("should be valid");
        assert_eq!(groups, vec![vec!["a"], vec!["b", "c"], vec!["d"]]);
    }

    #[test]
    fn insertion_order_breaks_ties_even_when_declared_out_of_order() {
        let graph = make_graph(vec![
            make_node("z", &["m"]),
            make_node("m", &[]),
            make_node("b", &[]),
        ]);
        let groups = graph.get_execution_order().unwrap();
        assert_eq!(groups, vec![vec!["m", "b"], vec!["z"]]);
    }

    #[test]
    fn duplicate_node_id_is_rejected() {
        let graph = make_graph(vec![
            make_node("a", &[]),
            make_node("a", &[]), // duplicate!
            make_node("a", &[]),
        ]);
        assert_eq!(
            graph.graph_errors(),
            vec![GraphError::DuplicateNodeId("a".into())]
        );
    }

    #[test]
    fn dependency_on_missing_node_is_rejected() {
        let graph = make_graph(vec![make_node("a", &["ghost"])]);
        let errors = graph.validate();
        assert_eq!(errors, vec!["node 'a' depends on unknown node 'ghost'"]);
        assert!(matches!(
            graph.get_execution_order(),
            Err(EngineError::Validation(e)) if e.len() == 1
        ));
    }

    #[test]
    fn self_dependency_is_rejected() {
        let graph = make_graph(vec![make_node("a", &["a"])]);
        assert_eq!(graph.graph_errors(), vec![GraphError::SelfDependency("a".into())]);
    }

    #[test]
    fn cycle_is_detected_with_its_path() {
        // A → B → C → A  (cycle!)
        let graph = make_graph(vec![
            make_node("a", &["c"]),
            make_node("b", &["a"]),
            make_node("c", &["b"]),
        ]);
        let errors = graph.graph_errors();
        assert_eq!(errors.len(), 1);
        match &errors[0] {
            GraphError::CycleDetected { path } => {
                assert_eq!(path.len(), 4);
                assert_eq!(path.first(), path.last());
            }
            other => panic!("expected a cycle, got {other:?}"),
        }
    }

    #[test]
    fn two_node_cycle_is_detected() {
        let graph = make_graph(vec![make_node("x", &["y"]), make_node("y", &["x"])]);
        assert!(!graph.validate().is_empty());
        assert!(graph.get_execution_order().is_err());
    }

    #[test]
    fn single_node_no_dependencies_is_valid() {
        let graph = make_graph(vec![make_node("solo", &[])]);
        assert_eq!(graph.get_execution_order().unwrap(), vec![vec!["solo"]]);
    }

    #[test]
    fn empty_graph_has_no_groups() {
        let graph = make_graph(vec![]);
        assert!(graph.get_execution_order().unwrap().is_empty());
    }

    #[test]
    fn generated_dags_place_every_node_after_its_dependencies() {
        // Deterministic pseudo-random DAGs: node i may only depend on j < i,
        // so every generated graph is acyclic.
        let mut seed: u64 = 0x2545_f491_4f6c_dd1d;
        let mut next = move || {
            seed ^= seed << 13;
            seed ^= seed >> 7;
            seed ^= seed << 17;
            seed
        };

        for _ in 0..50 {
            let size = (next() % 20 + 1) as usize;
            let mut nodes = Vec::with_capacity(size);
            for i in 0..size {
                let deps: Vec<String> = (0..i)
                    .filter(|_| next() % 4 == 0)
                    .map(|j| format!("n{j}"))
                    .collect();
                nodes.push(Node::new(format!("n{i}"), "mock").depends_on(deps));
            }
            let graph = make_graph(nodes);
            let groups = graph.get_execution_order().unwrap();

            let mut group_of: HashMap<&str, usize> = HashMap::new();
            for (idx, group) in groups.iter().enumerate() {
                for id in group {
                    assert!(group_of.insert(id.as_str(), idx).is_none(), "{id} placed twice");
                }
            }
            assert_eq!(group_of.len(), size);
            for node in &graph.nodes {
                for dep in &node.dependencies {
                    assert!(group_of[node.id.as_str()] > group_of[dep.as_str()]);
                }
            }
        }
    }
}
