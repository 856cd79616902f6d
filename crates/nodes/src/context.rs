//! Per-run execution state.
//!
//! Defined here (in the nodes crate) so the engine, the stores and executor
//! implementations can all import it without a circular dependency.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Statuses
// ---------------------------------------------------------------------------

/// Lifecycle of a single node within one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum NodeStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
}

impl NodeStatus {
    /// Completed, failed and skipped nodes are never re-executed.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Skipped)
    }
}

impl std::fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending   => write!(f, "pending"),
            Self::Running   => write!(f, "running"),
            Self::Completed => write!(f, "completed"),
            Self::Failed    => write!(f, "failed"),
            Self::Skipped   => write!(f, "skipped"),
        }
    }
}

/// Lifecycle of a whole run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RunStatus {
    #[default]
    Pending,
    Running,
    Completed,
    Failed,
    Paused,
    Cancelled,
}

impl RunStatus {
    /// A run in one of these states has stopped making progress.
    pub fn is_finished(self) -> bool {
        !matches!(self, Self::Pending | Self::Running)
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending   => write!(f, "pending"),
            Self::Running   => write!(f, "running"),
            Self::Completed => write!(f, "completed"),
            Self::Failed    => write!(f, "failed"),
            Self::Paused    => write!(f, "paused"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

// ---------------------------------------------------------------------------
// NodeState
// ---------------------------------------------------------------------------

/// Execution record of one node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeState {
    pub node_id: String,
    pub status: NodeStatus,
    pub attempt_count: u32,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub output: Option<Value>,
    pub error_message: Option<String>,
}

impl NodeState {
    /// A fresh, never-attempted state.
    pub fn pending(node_id: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            status: NodeStatus::Pending,
            attempt_count: 0,
            start_time: None,
            end_time: None,
            output: None,
            error_message: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Misuse of an [`ExecutionContext`]. These indicate a scheduling bug, not a
/// node failure.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ContextError {
    #[error("node '{node_id}' is already {status} and cannot be modified")]
    TerminalState { node_id: String, status: NodeStatus },

    #[error("dependency '{node_id}' is {status}, its output is not available yet")]
    DependencyNotCompleted { node_id: String, status: NodeStatus },

    #[error("unknown node '{0}'")]
    UnknownNode(String),
}

// ---------------------------------------------------------------------------
// ExecutionContext
// ---------------------------------------------------------------------------

/// Per-status node counts, used for logging run summaries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatusSummary {
    pub pending: usize,
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
    pub skipped: usize,
}

/// The full mutable state of one workflow run.
///
/// Exclusively owned by the engine driving the run; stores only ever receive
/// a shared reference to snapshot it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionContext {
    pub workflow_id: String,
    /// Unique per run attempt; the key used by context stores.
    pub execution_id: String,
    pub status: RunStatus,
    /// Seeded before the run starts and read-only afterwards.
    #[serde(default)]
    pub global_context: Map<String, Value>,
    #[serde(default)]
    node_states: HashMap<String, NodeState>,
    #[serde(default)]
    node_outputs: HashMap<String, Value>,
    #[serde(default)]
    artifacts: HashMap<String, Vec<String>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ExecutionContext {
    /// Create an empty context with a freshly generated execution id.
    pub fn new(workflow_id: impl Into<String>, global_context: Map<String, Value>) -> Self {
        let now = Utc::now();
        Self {
            workflow_id: workflow_id.into(),
            execution_id: Uuid::new_v4().to_string(),
            status: RunStatus::Pending,
            global_context,
            node_states: HashMap::new(),
            node_outputs: HashMap::new(),
            artifacts: HashMap::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Pin the execution id instead of using the generated one.
    pub fn with_execution_id(mut self, execution_id: impl Into<String>) -> Self {
        self.execution_id = execution_id.into();
        self
    }

    pub fn set_status(&mut self, status: RunStatus) {
        self.status = status;
        self.touch();
    }

    /// Bump `updated_at`.
    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    // -- node states --------------------------------------------------------

    pub fn get_node_state(&self, node_id: &str) -> Option<&NodeState> {
        self.node_states.get(node_id)
    }

    /// Insert or replace a node's state.
    ///
    /// # Errors
    /// [`ContextError::TerminalState`] if the stored state is already terminal.
    pub fn set_node_state(&mut self, state: NodeState) -> Result<(), ContextError> {
        if let Some(existing) = self.node_states.get(&state.node_id) {
            if existing.is_terminal() {
                return Err(ContextError::TerminalState {
                    node_id: state.node_id,
                    status: existing.status,
                });
            }
        }
        self.node_states.insert(state.node_id.clone(), state);
        self.touch();
        Ok(())
    }

    /// Register `node_id` as pending unless it already has a state.
    pub fn ensure_node(&mut self, node_id: &str) {
        if !self.node_states.contains_key(node_id) {
            self.node_states
                .insert(node_id.to_owned(), NodeState::pending(node_id));
        }
    }

    pub fn node_states(&self) -> &HashMap<String, NodeState> {
        &self.node_states
    }

    pub fn is_terminal(&self, node_id: &str) -> bool {
        self.node_states
            .get(node_id)
            .is_some_and(NodeState::is_terminal)
    }

    pub fn node_status(&self, node_id: &str) -> Option<NodeStatus> {
        self.node_states.get(node_id).map(|s| s.status)
    }

    // -- outputs ------------------------------------------------------------

    pub fn set_node_output(&mut self, node_id: &str, output: Value) {
        self.node_outputs.insert(node_id.to_owned(), output);
        self.touch();
    }

    pub fn get_node_output(&self, node_id: &str) -> Option<&Value> {
        self.node_outputs.get(node_id)
    }

    pub fn get_all_outputs(&self) -> &HashMap<String, Value> {
        &self.node_outputs
    }

    /// Outputs of the given dependencies.
    ///
    /// Completed dependencies contribute their output, skipped ones are left
    /// out. Anything else means the caller is asking too early.
    ///
    /// # Errors
    /// [`ContextError::DependencyNotCompleted`] for a pending, running or
    /// failed dependency, [`ContextError::UnknownNode`] for an id with no state.
    pub fn get_dependency_outputs<S: AsRef<str>>(
        &self,
        dep_ids: &[S],
    ) -> Result<HashMap<String, Value>, ContextError> {
        let mut outputs = HashMap::with_capacity(dep_ids.len());
        for dep in dep_ids {
            let dep = dep.as_ref();
            if self.completed_dependency(dep)? {
                let value = self.node_outputs.get(dep).cloned().unwrap_or(Value::Null);
                outputs.insert(dep.to_owned(), value);
            }
        }
        Ok(outputs)
    }

    /// Artifacts of the given dependencies, with the same rules as
    /// [`get_dependency_outputs`](Self::get_dependency_outputs).
    pub fn get_dependency_artifacts<S: AsRef<str>>(
        &self,
        dep_ids: &[S],
    ) -> Result<HashMap<String, Vec<String>>, ContextError> {
        let mut artifacts = HashMap::new();
        for dep in dep_ids {
            let dep = dep.as_ref();
            if self.completed_dependency(dep)? {
                if let Some(list) = self.artifacts.get(dep) {
                    artifacts.insert(dep.to_owned(), list.clone());
                }
            }
        }
        Ok(artifacts)
    }

    fn completed_dependency(&self, dep: &str) -> Result<bool, ContextError> {
        let state = self
            .node_states
            .get(dep)
            .ok_or_else(|| ContextError::UnknownNode(dep.to_owned()))?;
        match state.status {
            NodeStatus::Completed => Ok(true),
            NodeStatus::Skipped => Ok(false),
            status => Err(ContextError::DependencyNotCompleted {
                node_id: dep.to_owned(),
                status,
            }),
        }
    }

    // -- artifacts ----------------------------------------------------------

    pub fn add_artifact(&mut self, node_id: &str, reference: impl Into<String>) {
        self.artifacts
            .entry(node_id.to_owned())
            .or_default()
            .push(reference.into());
        self.touch();
    }

    pub fn get_artifacts(&self, node_id: &str) -> &[String] {
        self.artifacts.get(node_id).map_or(&[], Vec::as_slice)
    }

    pub fn get_all_artifacts(&self) -> &HashMap<String, Vec<String>> {
        &self.artifacts
    }

    // -- reporting ----------------------------------------------------------

    pub fn summary(&self) -> StatusSummary {
        let mut summary = StatusSummary::default();
        for state in self.node_states.values() {
            match state.status {
                NodeStatus::Pending   => summary.pending += 1,
                NodeStatus::Running   => summary.running += 1,
                NodeStatus::Completed => summary.completed += 1,
                NodeStatus::Failed    => summary.failed += 1,
                NodeStatus::Skipped   => summary.skipped += 1,
            }
        }
        summary
    }
}
