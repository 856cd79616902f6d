//! Execution events and the emitter that delivers them.
//!
//! Events are emitted during workflow execution so external consumers can
//! observe progress (dashboards, audit logs, ticketing). Delivery never
//! affects scheduling: listener errors and panics are logged and dropped.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::mpsc;
use tracing::{info, warn};

/// Kinds of events emitted during a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    WorkflowStarted,
    WorkflowResumed,
    WorkflowCompleted,
    WorkflowFailed,
    WorkflowPaused,
    WorkflowCancelled,
    NodeStarted,
    NodeCompleted,
    NodeFailed,
    NodeSkipped,
    NodeRetry,
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::WorkflowStarted   => "workflow_started",
            Self::WorkflowResumed   => "workflow_resumed",
            Self::WorkflowCompleted => "workflow_completed",
            Self::WorkflowFailed    => "workflow_failed",
            Self::WorkflowPaused    => "workflow_paused",
            Self::WorkflowCancelled => "workflow_cancelled",
            Self::NodeStarted       => "node_started",
            Self::NodeCompleted     => "node_completed",
            Self::NodeFailed        => "node_failed",
            Self::NodeSkipped       => "node_skipped",
            Self::NodeRetry         => "node_retry",
        };
        f.write_str(name)
    }
}

/// One immutable event record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionEvent {
    pub event_type: EventType,
    pub workflow_id: String,
    pub execution_id: String,
    pub node_id: Option<String>,
    pub data: Map<String, Value>,
    pub timestamp: DateTime<Utc>,
}

impl ExecutionEvent {
    pub fn new(
        event_type: EventType,
        workflow_id: impl Into<String>,
        execution_id: impl Into<String>,
    ) -> Self {
        Self {
            event_type,
            workflow_id: workflow_id.into(),
            execution_id: execution_id.into(),
            node_id: None,
            data: Map::new(),
            timestamp: Utc::now(),
        }
    }

    pub fn with_node(mut self, node_id: impl Into<String>) -> Self {
        self.node_id = Some(node_id.into());
        self
    }

    pub fn with_data(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }
}

// ---------------------------------------------------------------------------
// Listeners
// ---------------------------------------------------------------------------

/// Receives execution events.
///
/// Implementations decide what to do with them (persist, broadcast, log,
/// ignore). Returned errors are logged by the emitter and otherwise ignored.
#[async_trait]
pub trait EventListener: Send + Sync {
    async fn on_event(&self, event: &ExecutionEvent) -> anyhow::Result<()>;
}

/// Forwards events to an unbounded channel.
///
/// Use this when events are consumed on another task (e.g. streamed to a UI).
#[derive(Debug, Clone)]
pub struct ChannelListener {
    sender: mpsc::UnboundedSender<ExecutionEvent>,
}

impl ChannelListener {
    pub fn new(sender: mpsc::UnboundedSender<ExecutionEvent>) -> Self {
        Self { sender }
    }

    /// A listener plus the receiving end of its channel.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<ExecutionEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }
}

#[async_trait]
impl EventListener for ChannelListener {
    async fn on_event(&self, event: &ExecutionEvent) -> anyhow::Result<()> {
        // Receiver may have been dropped.
        let _ = self.sender.send(event.clone());
        Ok(())
    }
}

/// Logs every event at `info` level.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingListener;

#[async_trait]
impl EventListener for TracingListener {
    async fn on_event(&self, event: &ExecutionEvent) -> anyhow::Result<()> {
        let data = serde_json::Value::Object(event.data.clone());
        info!(
            event = %event.event_type,
            execution_id = %event.execution_id,
            node_id = event.node_id.as_deref().unwrap_or("-"),
            data = %data,
            "execution event"
        );
        Ok(())
    }
}

/// Adapts a synchronous closure into a listener.
pub struct FnListener<F>(pub F);

#[async_trait]
impl<F> EventListener for FnListener<F>
where
    F: Fn(&ExecutionEvent) -> anyhow::Result<()> + Send + Sync,
{
    async fn on_event(&self, event: &ExecutionEvent) -> anyhow::Result<()> {
        (self.0)(event)
    }
}

// ---------------------------------------------------------------------------
// Emitter
// ---------------------------------------------------------------------------

/// Delivers events to at most one listener, in emission order.
#[derive(Clone, Default)]
pub struct EventEmitter {
    listener: Option<Arc<dyn EventListener>>,
}

impl EventEmitter {
    /// An emitter with no listener; events are dropped.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_listener(listener: Arc<dyn EventListener>) -> Self {
        Self { listener: Some(listener) }
    }

    pub fn has_listener(&self) -> bool {
        self.listener.is_some()
    }

    pub async fn emit(&self, event: ExecutionEvent) {
        let Some(listener) = &self.listener else {
            return;
        };

        match AssertUnwindSafe(listener.on_event(&event)).catch_unwind().await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(
                event = %event.event_type,
                execution_id = %event.execution_id,
                error = %e,
                "event listener failed"
            ),
            Err(_) => warn!(
                event = %event.event_type,
                execution_id = %event.execution_id,
                "event listener panicked"
            ),
        }
    }
}

impl std::fmt::Debug for EventEmitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventEmitter")
            .field("has_listener", &self.has_listener())
            .finish()
    }
}
