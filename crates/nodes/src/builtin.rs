//! Built-in executors, enough to run workflow files from the command line.
//!
//! | id      | behaviour                                                   |
//! |---------|-------------------------------------------------------------|
//! | `noop`  | returns `null`                                              |
//! | `echo`  | returns its config plus the ids of its completed dependencies |
//! | `sleep` | waits `config.millis` milliseconds, returns `{"slept_ms": n}` |
//! | `fail`  | fails with `config.message`; fatal when `config.fatal` is true |

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use crate::{Executable, ExecutorRegistry, NodeError, NodeInput, NodeOutput};

pub(crate) fn register_builtins(registry: &mut ExecutorRegistry) {
    registry
        .register("noop", Arc::new(NoopNode))
        .register("echo", Arc::new(EchoNode))
        .register("sleep", Arc::new(SleepNode))
        .register("fail", Arc::new(FailNode));
}

pub struct NoopNode;

#[async_trait]
impl Executable for NoopNode {
    async fn execute(&self, _input: NodeInput) -> Result<NodeOutput, NodeError> {
        Ok(NodeOutput::new(Value::Null))
    }
}

pub struct EchoNode;

#[async_trait]
impl Executable for EchoNode {
    async fn execute(&self, input: NodeInput) -> Result<NodeOutput, NodeError> {
        let mut upstream: Vec<&String> = input.dependency_outputs.keys().collect();
        upstream.sort();
        Ok(NodeOutput::new(json!({
            "node": input.node_id,
            "config": input.config,
            "upstream": upstream,
        })))
    }
}

pub struct SleepNode;

#[async_trait]
impl Executable for SleepNode {
    async fn execute(&self, input: NodeInput) -> Result<NodeOutput, NodeError> {
        let millis = input
            .config
            .get("millis")
            .and_then(Value::as_u64)
            .unwrap_or(0);
        debug!("node '{}' sleeping for {}ms", input.node_id, millis);
        tokio::time::sleep(Duration::from_millis(millis)).await;
        Ok(NodeOutput::new(json!({ "slept_ms": millis })))
    }
}

pub struct FailNode;

#[async_trait]
impl Executable for FailNode {
    async fn execute(&self, input: NodeInput) -> Result<NodeOutput, NodeError> {
        let message = input
            .config
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("node failed")
            .to_owned();
        let fatal = input
            .config
            .get("fatal")
            .and_then(Value::as_bool)
            .unwrap_or(false);

        if fatal {
            Err(NodeError::Fatal(message))
        } else {
            Err(NodeError::Retryable(message))
        }
    }
}
