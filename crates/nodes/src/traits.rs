//! The `Executable` trait: the contract every node executor must fulfil.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::NodeError;

/// Structured input handed to an executor for a single attempt.
///
/// Built by the engine right before the call, so `all_outputs` already
/// contains the outputs of siblings that finished earlier in the same group.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodeInput {
    pub workflow_id: String,
    pub execution_id: String,
    pub node_id: String,
    pub node_name: String,
    /// The node's opaque configuration map.
    pub config: Value,
    /// 1-based attempt number.
    pub attempt: u32,
    /// Outputs of completed dependencies, keyed by dependency id.
    pub dependency_outputs: HashMap<String, Value>,
    /// Artifacts registered by completed dependencies.
    pub dependency_artifacts: HashMap<String, Vec<String>>,
    /// Seeded global data for this run (read-only).
    pub global_context: Map<String, Value>,
    /// Every output recorded in the run so far.
    pub all_outputs: HashMap<String, Value>,
    /// Every artifact recorded in the run so far.
    pub all_artifacts: HashMap<String, Vec<String>>,
}

/// What an executor returns on success.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeOutput {
    /// The node's result value, stored as its output.
    pub value: Value,
    /// Opaque references (paths, URIs, ...) registered against the node.
    #[serde(default)]
    pub artifacts: Vec<String>,
}

impl NodeOutput {
    pub fn new(value: Value) -> Self {
        Self { value, artifacts: Vec::new() }
    }

    pub fn with_artifacts<I, S>(mut self, artifacts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.artifacts.extend(artifacts.into_iter().map(Into::into));
        self
    }
}

impl From<Value> for NodeOutput {
    fn from(value: Value) -> Self {
        Self::new(value)
    }
}

/// The core executor trait.
///
/// Nodes in a graph only store an executor id; the engine resolves it through
/// an [`ExecutorRegistry`](crate::ExecutorRegistry) to an implementation of
/// this trait.
#[async_trait]
pub trait Executable: Send + Sync {
    /// Run one attempt of the node.
    async fn execute(&self, input: NodeInput) -> Result<NodeOutput, NodeError>;
}
