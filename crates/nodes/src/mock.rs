//! `MockNode`: a test double for `Executable`.
//!
//! Useful in unit and integration tests where a real executor is either
//! unavailable or irrelevant.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::{Executable, NodeError, NodeInput, NodeOutput};

/// Behaviour injected into `MockNode` at construction time.
pub enum MockBehaviour {
    /// Return a specific JSON value.
    ReturnValue(Value),
    /// Fail with a `Retryable` error.
    FailRetryable(String),
    /// Fail with a `Fatal` error.
    FailFatal(String),
    /// Fail with a `Retryable` error for the first `failures` calls, then
    /// return the value.
    Flaky { failures: usize, value: Value },
    /// Sleep for `delay`, then return the value.
    Slow { delay: Duration, value: Value },
}

/// A mock node that records every input it receives and returns a
/// programmer-specified result.
pub struct MockNode {
    /// Label used in test assertions and in the returned output.
    pub name: String,
    /// What the node will do when `execute` is called.
    pub behaviour: MockBehaviour,
    /// Artifacts attached to every successful output.
    pub artifacts: Vec<String>,
    /// All inputs seen by this node (in call order).
    pub calls: Arc<Mutex<Vec<NodeInput>>>,
}

impl MockNode {
    fn with_behaviour(name: impl Into<String>, behaviour: MockBehaviour) -> Self {
        Self {
            name: name.into(),
            behaviour,
            artifacts: Vec::new(),
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Create a mock that always succeeds with the given value.
    pub fn returning(name: impl Into<String>, value: Value) -> Self {
        Self::with_behaviour(name, MockBehaviour::ReturnValue(value))
    }

    /// Create a mock that always fails with a `Fatal` error.
    pub fn failing_fatal(name: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::with_behaviour(name, MockBehaviour::FailFatal(msg.into()))
    }

    /// Create a mock that always fails with a `Retryable` error.
    pub fn failing_retryable(name: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::with_behaviour(name, MockBehaviour::FailRetryable(msg.into()))
    }

    /// Create a mock that fails `failures` times before succeeding.
    pub fn flaky(name: impl Into<String>, failures: usize, value: Value) -> Self {
        Self::with_behaviour(name, MockBehaviour::Flaky { failures, value })
    }

    /// Create a mock that takes `delay` to succeed.
    pub fn slow(name: impl Into<String>, delay: Duration, value: Value) -> Self {
        Self::with_behaviour(name, MockBehaviour::Slow { delay, value })
    }

    /// Attach artifacts to every successful output.
    pub fn with_artifacts<I, S>(mut self, artifacts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.artifacts = artifacts.into_iter().map(Into::into).collect();
        self
    }

    /// Number of times this node has been executed.
    pub fn call_count(&self) -> usize {
        self.calls.lock().map(|calls| calls.len()).unwrap_or_else(|p| p.into_inner().len())
    }

    /// A copy of every input received so far.
    pub fn calls(&self) -> Vec<NodeInput> {
        match self.calls.lock() {
            Ok(calls) => calls.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Record the call and return its 1-based index.
    fn record(&self, input: NodeInput) -> usize {
        let mut calls = self.calls.lock().unwrap_or_else(|p| p.into_inner());
        calls.push(input);
        calls.len()
    }

    fn success(&self, value: &Value) -> NodeOutput {
        // Tag the output with the node name so tests can trace data flow.
        let mut out = json!({ "node": self.name });
        if let (Some(out_obj), Some(v_obj)) = (out.as_object_mut(), value.as_object()) {
            for (k, val) in v_obj {
                out_obj.insert(k.clone(), val.clone());
            }
        }
        NodeOutput::new(out).with_artifacts(self.artifacts.iter().cloned())
    }
}

#[async_trait]
impl Executable for MockNode {
    async fn execute(&self, input: NodeInput) -> Result<NodeOutput, NodeError> {
        let call = self.record(input);

        match &self.behaviour {
            MockBehaviour::ReturnValue(v) => Ok(self.success(v)),
            MockBehaviour::FailRetryable(msg) => Err(NodeError::Retryable(msg.clone())),
            MockBehaviour::FailFatal(msg) => Err(NodeError::Fatal(msg.clone())),
            MockBehaviour::Flaky { failures, value } => {
                if call <= *failures {
                    Err(NodeError::Retryable(format!("{} failed on call {call}", self.name)))
                } else {
                    Ok(self.success(value))
                }
            }
            MockBehaviour::Slow { delay, value } => {
                tokio::time::sleep(*delay).await;
                Ok(self.success(value))
            }
        }
    }
}
