//! Engine-level error types.

use nodes::ContextError;
use store::StoreError;
use thiserror::Error;

/// A single structural problem in a workflow graph.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GraphError {
    /// Two or more nodes share the same ID.
    #[error("duplicate node ID: '{0}'")]
    DuplicateNodeId(String),

    /// A node depends on an ID that doesn't exist in the workflow.
    #[error("node '{node_id}' depends on unknown node '{dependency}'")]
    UnknownDependency { node_id: String, dependency: String },

    /// A node lists itself as a dependency.
    #[error("node '{0}' depends on itself")]
    SelfDependency(String),

    /// Depth-first search found a back edge; `path` starts and ends on the
    /// same node.
    #[error("workflow graph contains a cycle: {}", path.join(" -> "))]
    CycleDetected { path: Vec<String> },
}

/// Errors produced by the workflow engine (validation + execution).
#[derive(Debug, Error)]
pub enum EngineError {
    // ------ Pre-execution errors ------

    /// The graph failed validation; nothing was executed or persisted.
    #[error("workflow validation failed: {}", .0.join("; "))]
    Validation(Vec<String>),

    /// A resume was requested for an execution id the store doesn't know.
    #[error("execution '{0}' not found")]
    NotFound(String),

    #[error("invalid retry policy: {0}")]
    InvalidRetryPolicy(String),

    // ------ Execution errors ------

    /// A node exhausted its attempts; the run was stopped and checkpointed.
    #[error("node '{node_id}' failed after {attempts} attempt(s): {message}")]
    NodeFailed {
        execution_id: String,
        node_id: String,
        attempts: u32,
        /// The error recorded on the node's state.
        message: String,
    },

    /// Checkpoint persistence failed.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// The execution context was used out of order.
    #[error("context error: {0}")]
    Context(#[from] ContextError),
}

impl EngineError {
    /// The id of the node that stopped the run, if any.
    pub fn failed_node(&self) -> Option<&str> {
        match self {
            Self::NodeFailed { node_id, .. } => Some(node_id),
            _ => None,
        }
    }
}
