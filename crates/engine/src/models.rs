//! Core domain models for the workflow engine.
//!
//! These types are the source of truth for what a workflow looks like in
//! memory. They serialise to/from the JSON workflow files read by the CLI;
//! nodes reference executors by id only, so a graph never embeds code.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::retry::RetryPolicy;

// ---------------------------------------------------------------------------
// Node
// ---------------------------------------------------------------------------

/// A single unit of work in the workflow graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    /// Unique identifier within this workflow (referenced by dependencies).
    pub id: String,
    /// Human-readable label; defaults to the id.
    #[serde(default)]
    pub name: String,
    /// Arbitrary configuration passed to the executor.
    #[serde(default)]
    pub config: Value,
    /// Ids of the nodes that must reach a terminal state first.
    #[serde(default)]
    pub dependencies: Vec<String>,
    /// Skip gate; the node runs only if this evaluates truthy.
    #[serde(default)]
    pub condition: Option<String>,
    #[serde(default)]
    pub retry: RetryPolicy,
    /// Id of the executor in the registry. `None` means unbound.
    #[serde(default)]
    pub executor: Option<String>,
}

impl Node {
    pub fn new(id: impl Into<String>, executor: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            config: Value::Null,
            dependencies: Vec::new(),
            condition: None,
            retry: RetryPolicy::default(),
            executor: Some(executor.into()),
        }
    }

    /// A node with no executor bound; every attempt fails.
    pub fn unbound(id: impl Into<String>) -> Self {
        Self { executor: None, ..Self::new(id, "") }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_config(mut self, config: Value) -> Self {
        self.config = config;
        self
    }

    /// Add dependencies, ignoring ids already present.
    pub fn depends_on<I, S>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for dep in deps {
            let dep = dep.into();
            if !self.dependencies.contains(&dep) {
                self.dependencies.push(dep);
            }
        }
        self
    }

    pub fn with_condition(mut self, condition: impl Into<String>) -> Self {
        self.condition = Some(condition.into());
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// The display name, falling back to the id when none was given.
    pub fn display_name(&self) -> &str {
        if self.name.is_empty() { &self.id } else { &self.name }
    }
}

// ---------------------------------------------------------------------------
// WorkflowGraph
// ---------------------------------------------------------------------------

/// A complete workflow definition. Nodes keep their insertion order, which
/// is the tie-break for execution grouping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowGraph {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub nodes: Vec<Node>,
}

impl WorkflowGraph {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            nodes: Vec::new(),
        }
    }

    /// Append a node (builder style).
    pub fn with_node(mut self, node: Node) -> Self {
        self.nodes.push(node);
        self
    }

    pub fn add_node(&mut self, node: Node) -> &mut Self {
        self.nodes.push(node);
        self
    }

    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.id == id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}
