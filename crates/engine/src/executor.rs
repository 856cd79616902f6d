//! Workflow execution engine.
//!
//! `Engine` is the central orchestrator:
//! 1. Loads a checkpointed context (resume) or starts a fresh one.
//! 2. Validates the DAG and splits it into execution groups.
//! 3. Runs each group's unfinished nodes concurrently on the caller's task,
//!    dispatching each via the `Executable` bound in the registry.
//! 4. Applies per-node skip conditions and retry/backoff policies.
//! 5. Checkpoints the context through the `ContextStore` after every group.
//! 6. Honours pause / cancel requests at group boundaries only.

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use futures::{FutureExt, StreamExt};
use serde_json::{json, Map, Value};
use tokio::sync::{watch, Mutex};
use tracing::{debug, error, info, instrument, warn};

use nodes::{
    ContextError, ExecutionContext, ExecutorRegistry, NodeError, NodeInput, NodeState,
    NodeStatus, RunStatus,
};
use store::ContextStore;

use crate::condition::ConditionEvaluator;
use crate::config::EngineConfig;
use crate::events::{EventEmitter, EventListener, EventType, ExecutionEvent};
use crate::models::{Node, WorkflowGraph};
use crate::EngineError;

/// Ids stamped on every event of one run.
struct RunIds {
    workflow_id: String,
    execution_id: String,
}

impl RunIds {
    fn of(ctx: &ExecutionContext) -> Self {
        Self {
            workflow_id: ctx.workflow_id.clone(),
            execution_id: ctx.execution_id.clone(),
        }
    }

    fn event(&self, kind: EventType) -> ExecutionEvent {
        ExecutionEvent::new(kind, &self.workflow_id, &self.execution_id)
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// Drives one workflow graph, one run at a time.
///
/// The engine owns its collaborators explicitly; nothing is global, so any
/// number of engines can run side by side in one process.
///
/// ```no_run
/// # use std::sync::Arc;
/// # use engine::{Engine, Node, WorkflowGraph};
/// # use nodes::ExecutorRegistry;
/// # use store::InMemoryContextStore;
/// # async fn demo() -> Result<(), engine::EngineError> {
/// let graph = WorkflowGraph::new("release", "Release")
///     .with_node(Node::new("build", "echo"))
///     .with_node(Node::new("test", "echo").depends_on(["build"]));
///
/// let engine = Engine::new(
///     graph,
///     ExecutorRegistry::with_builtins(),
///     Arc::new(InMemoryContextStore::new()),
/// );
/// let ctx = engine.run(serde_json::Map::new()).await?;
/// assert_eq!(ctx.summary().completed, 2);
/// # Ok(())
/// # }
/// ```
pub struct Engine {
    graph: WorkflowGraph,
    registry: ExecutorRegistry,
    store: Arc<dyn ContextStore>,
    emitter: EventEmitter,
    evaluator: ConditionEvaluator,
    config: EngineConfig,
    pause_requested: AtomicBool,
    cancel_requested: AtomicBool,
    status: watch::Sender<RunStatus>,
}

impl Engine {
    pub fn new(
        graph: WorkflowGraph,
        registry: ExecutorRegistry,
        store: Arc<dyn ContextStore>,
    ) -> Self {
        let (status, _) = watch::channel(RunStatus::Pending);
        Self {
            graph,
            registry,
            store,
            emitter: EventEmitter::new(),
            evaluator: ConditionEvaluator::new(),
            config: EngineConfig::default(),
            pause_requested: AtomicBool::new(false),
            cancel_requested: AtomicBool::new(false),
            status,
        }
    }

    /// Register the single listener that receives this engine's events.
    pub fn with_listener(mut self, listener: Arc<dyn EventListener>) -> Self {
        self.emitter = EventEmitter::with_listener(listener);
        self
    }

    pub fn with_emitter(mut self, emitter: EventEmitter) -> Self {
        self.emitter = emitter;
        self
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn graph(&self) -> &WorkflowGraph {
        &self.graph
    }

    /// Status of the current (or last) run.
    pub fn status(&self) -> RunStatus {
        *self.status.borrow()
    }

    /// Observe status transitions.
    pub fn subscribe_status(&self) -> watch::Receiver<RunStatus> {
        self.status.subscribe()
    }

    /// Ask the run to stop and checkpoint before its next group. The group
    /// in flight finishes first.
    pub fn pause(&self) {
        info!(workflow_id = %self.graph.id, "pause requested");
        self.pause_requested.store(true, Ordering::SeqCst);
    }

    /// Ask the run to stop before its next group. The group in flight
    /// finishes first.
    pub fn cancel(&self) {
        info!(workflow_id = %self.graph.id, "cancel requested");
        self.cancel_requested.store(true, Ordering::SeqCst);
    }

    /// Start a fresh run seeded with `global_context`.
    pub async fn run(&self, global_context: Map<String, Value>) -> Result<ExecutionContext, EngineError> {
        let ctx = ExecutionContext::new(self.graph.id.clone(), global_context);
        self.execute(Some(ctx), None).await
    }

    /// Continue a checkpointed run. Nodes already in a terminal state are
    /// not executed again.
    pub async fn resume(&self, execution_id: &str) -> Result<ExecutionContext, EngineError> {
        self.execute(None, Some(execution_id)).await
    }

    /// Run the workflow.
    ///
    /// With `resume_execution_id` the context is loaded from the store,
    /// otherwise `initial_context` (or an empty one) is used. Returns the
    /// final context for completed, paused and cancelled runs.
    ///
    /// # Errors
    /// - [`EngineError::NotFound`] if the resume id is unknown.
    /// - [`EngineError::Validation`] if the graph is invalid or the context
    ///   belongs to another workflow (nothing is persisted).
    /// - [`EngineError::NodeFailed`] once a node exhausts its attempts; the
    ///   failed context has been checkpointed.
    /// - [`EngineError::Store`] if a checkpoint cannot be written.
    #[instrument(skip(self, initial_context), fields(workflow_id = %self.graph.id))]
    pub async fn execute(
        &self,
        initial_context: Option<ExecutionContext>,
        resume_execution_id: Option<&str>,
    ) -> Result<ExecutionContext, EngineError> {
        // Requests made while no run was active do not carry over.
        self.clear_requests();

        // ------------------------------------------------------------------
        // Load or create the context.
        // ------------------------------------------------------------------
        let (ctx, resumed) = match resume_execution_id {
            Some(id) => {
                if initial_context.is_some() {
                    warn!("both an initial context and a resume id were given, resuming '{}'", id);
                }
                let ctx = self
                    .store
                    .load_context(id)
                    .await?
                    .ok_or_else(|| EngineError::NotFound(id.to_owned()))?;
                (ctx, true)
            }
            None => {
                let ctx = initial_context
                    .unwrap_or_else(|| ExecutionContext::new(self.graph.id.clone(), Map::new()));
                (ctx, false)
            }
        };

        if ctx.workflow_id != self.graph.id {
            let message = format!(
                "execution '{}' belongs to workflow '{}', not '{}'",
                ctx.execution_id, ctx.workflow_id, self.graph.id
            );
            error!("{}", message);
            return Err(EngineError::Validation(vec![message]));
        }

        // ------------------------------------------------------------------
        // Validate and group the DAG before touching any state.
        // ------------------------------------------------------------------
        let groups = self.graph.get_execution_order().map_err(|e| {
            error!("workflow '{}' is invalid: {}", self.graph.id, e);
            e
        })?;

        let result = self.drive(ctx, &groups, resumed).await;
        if result.is_err() {
            self.status.send_replace(RunStatus::Failed);
        }
        result
    }

    async fn drive(
        &self,
        mut ctx: ExecutionContext,
        groups: &[Vec<String>],
        resumed: bool,
    ) -> Result<ExecutionContext, EngineError> {
        let run = RunIds::of(&ctx);

        for node in &self.graph.nodes {
            ctx.ensure_node(&node.id);
            match node.executor.as_deref() {
                Some(id) if self.registry.contains(id) => {}
                Some(id) => warn!("node '{}' references unregistered executor '{}'", node.id, id),
                None => warn!("node '{}' has no executor bound", node.id),
            }
        }

        info!(
            execution_id = %run.execution_id,
            groups = groups.len(),
            nodes = self.graph.len(),
            resumed,
            "starting workflow execution"
        );

        self.transition(&mut ctx, RunStatus::Running);
        self.store.save_context(&ctx).await?;

        let start_kind = if resumed { EventType::WorkflowResumed } else { EventType::WorkflowStarted };
        self.emitter
            .emit(
                run.event(start_kind)
                    .with_data("groups", groups.len())
                    .with_data("nodes", self.graph.len()),
            )
            .await;

        for (index, group) in groups.iter().enumerate() {
            // --------------------------------------------------------------
            // Control requests are honoured between groups only.
            // --------------------------------------------------------------
            // Pause wins over a cancel raised in the same group; both are
            // consumed here.
            if self.pause_requested.load(Ordering::SeqCst) {
                self.clear_requests();
                self.transition(&mut ctx, RunStatus::Paused);
                self.store.save_context(&ctx).await?;
                info!(execution_id = %run.execution_id, next_group = index, "workflow paused");
                self.emitter
                    .emit(run.event(EventType::WorkflowPaused).with_data("next_group", index))
                    .await;
                return Ok(ctx);
            }

            if self.cancel_requested.load(Ordering::SeqCst) {
                self.clear_requests();
                self.transition(&mut ctx, RunStatus::Cancelled);
                if self.config.checkpoint_on_cancel {
                    self.store.save_context(&ctx).await?;
                }
                info!(execution_id = %run.execution_id, next_group = index, "workflow cancelled");
                self.emitter
                    .emit(run.event(EventType::WorkflowCancelled).with_data("next_group", index))
                    .await;
                return Ok(ctx);
            }

            self.run_group(index, group, &mut ctx, &run).await?;

            // --------------------------------------------------------------
            // Any failed node stops the run; completed work stays recorded.
            // --------------------------------------------------------------
            let failed = group
                .iter()
                .filter_map(|id| ctx.get_node_state(id))
                .find(|state| state.status == NodeStatus::Failed)
                .cloned();

            if let Some(state) = failed {
                let message = state
                    .error_message
                    .clone()
                    .unwrap_or_else(|| "unknown error".to_owned());

                self.transition(&mut ctx, RunStatus::Failed);
                self.store.save_context(&ctx).await?;
                self.clear_requests();

                error!(
                    execution_id = %run.execution_id,
                    node_id = %state.node_id,
                    "workflow failed: {}", message
                );
                self.emitter
                    .emit(
                        run.event(EventType::WorkflowFailed)
                            .with_node(state.node_id.clone())
                            .with_data("error", message.clone())
                            .with_data("group", index),
                    )
                    .await;

                return Err(EngineError::NodeFailed {
                    execution_id: run.execution_id,
                    node_id: state.node_id,
                    attempts: state.attempt_count,
                    message,
                });
            }

            self.store.save_context(&ctx).await?;
        }

        // ------------------------------------------------------------------
        // Every group finished.
        // ------------------------------------------------------------------
        self.transition(&mut ctx, RunStatus::Completed);
        self.store.save_context(&ctx).await?;
        self.clear_requests();

        let summary = ctx.summary();
        info!(
            execution_id = %run.execution_id,
            completed = summary.completed,
            skipped = summary.skipped,
            "workflow completed"
        );
        self.emitter
            .emit(
                run.event(EventType::WorkflowCompleted)
                    .with_data("completed", summary.completed)
                    .with_data("skipped", summary.skipped),
            )
            .await;

        Ok(ctx)
    }

    fn transition(&self, ctx: &mut ExecutionContext, status: RunStatus) {
        ctx.set_status(status);
        self.status.send_replace(status);
    }

    fn clear_requests(&self) {
        self.pause_requested.store(false, Ordering::SeqCst);
        self.cancel_requested.store(false, Ordering::SeqCst);
    }

    // -----------------------------------------------------------------------
    // Group execution
    // -----------------------------------------------------------------------

    /// Run every non-terminal node of the group and wait for all of them.
    async fn run_group(
        &self,
        index: usize,
        group: &[String],
        ctx: &mut ExecutionContext,
        run: &RunIds,
    ) -> Result<(), EngineError> {
        let pending: Vec<&Node> = group
            .iter()
            .filter_map(|id| self.graph.node(id))
            .filter(|node| !ctx.is_terminal(&node.id))
            .collect();

        if pending.is_empty() {
            debug!(group = index, "all nodes already finished, skipping group");
            return Ok(());
        }

        debug!(
            group = index,
            nodes = ?pending.iter().map(|n| n.id.as_str()).collect::<Vec<_>>(),
            "executing group"
        );

        // Held only for short reads and writes, never across an executor call.
        let shared = Mutex::new(ctx);
        let runs: Vec<_> = pending
            .iter()
            .map(|node| self.run_node(node, &shared, run))
            .collect();

        let results: Vec<Result<(), EngineError>> = match self.config.max_parallel_nodes {
            Some(limit) => {
                futures::stream::iter(runs)
                    .buffer_unordered(limit.get())
                    .collect()
                    .await
            }
            None => futures::future::join_all(runs).await,
        };

        results.into_iter().collect()
    }

    // -----------------------------------------------------------------------
    // Internal: execute a single node with condition and retry handling.
    // -----------------------------------------------------------------------

    async fn run_node(
        &self,
        node: &Node,
        ctx: &Mutex<&mut ExecutionContext>,
        run: &RunIds,
    ) -> Result<(), EngineError> {
        if let Some(condition) = &node.condition {
            let verdict = {
                let ctx = ctx.lock().await;
                self.evaluator
                    .evaluate(condition, ctx.get_all_outputs(), &ctx.global_context)
            };

            match verdict {
                Ok(true) => {}
                Ok(false) => {
                    let now = Utc::now();
                    let state = NodeState {
                        status: NodeStatus::Skipped,
                        start_time: Some(now),
                        end_time: Some(now),
                        ..NodeState::pending(&node.id)
                    };
                    ctx.lock().await.set_node_state(state)?;

                    info!("node '{}' skipped, condition is false: {}", node.id, condition);
                    self.emitter
                        .emit(
                            run.event(EventType::NodeSkipped)
                                .with_node(node.id.clone())
                                .with_data("condition", condition.clone()),
                        )
                        .await;
                    return Ok(());
                }
                Err(e) => {
                    warn!(
                        "condition for node '{}' could not be evaluated, running it anyway: {}",
                        node.id, e
                    );
                }
            }
        }

        let executor = node.executor.as_deref().and_then(|id| self.registry.get(id));
        let max_attempts = node.retry.max_attempts.max(1);
        let mut state = ctx
            .lock()
            .await
            .get_node_state(&node.id)
            .cloned()
            .unwrap_or_else(|| NodeState::pending(&node.id));

        for attempt in 1..=max_attempts {
            // --------------------------------------------------------------
            // Snapshot the inputs and mark the node running.
            // --------------------------------------------------------------
            let input = {
                let mut ctx = ctx.lock().await;
                let input = build_input(node, attempt, &ctx)?;
                state.status = NodeStatus::Running;
                state.attempt_count = attempt;
                state.start_time.get_or_insert_with(Utc::now);
                ctx.set_node_state(state.clone())?;
                input
            };

            self.emitter
                .emit(
                    run.event(EventType::NodeStarted)
                        .with_node(node.id.clone())
                        .with_data("attempt", attempt)
                        .with_data("max_attempts", max_attempts),
                )
                .await;

            let started = Instant::now();
            let result = match &executor {
                Some(executor) => AssertUnwindSafe(executor.execute(input))
                    .catch_unwind()
                    .await
                    .unwrap_or_else(|_| Err(NodeError::Fatal("executor panicked".into()))),
                None => Err(NodeError::ExecutorNotFound(
                    node.executor.clone().unwrap_or_else(|| "<unset>".into()),
                )),
            };

            match result {
                Ok(output) => {
                    {
                        let mut ctx = ctx.lock().await;
                        for artifact in &output.artifacts {
                            ctx.add_artifact(&node.id, artifact.clone());
                        }
                        ctx.set_node_output(&node.id, output.value.clone());
                        state.status = NodeStatus::Completed;
                        state.end_time = Some(Utc::now());
                        state.output = Some(output.value);
                        state.error_message = None;
                        ctx.set_node_state(state)?;
                    }

                    info!("node '{}' completed on attempt {}", node.id, attempt);
                    self.emitter
                        .emit(
                            run.event(EventType::NodeCompleted)
                                .with_node(node.id.clone())
                                .with_data("attempt", attempt)
                                .with_data("duration_ms", started.elapsed().as_millis() as u64)
                                .with_data("artifacts", json!(output.artifacts)),
                        )
                        .await;
                    return Ok(());
                }

                Err(err) if node.retry.should_retry(attempt, &err) => {
                    let delay = node.retry.delay_for(attempt, self.config.max_retry_delay);
                    state.error_message = Some(err.to_string());
                    ctx.lock().await.set_node_state(state.clone())?;

                    warn!(
                        "node '{}' failed (attempt {}/{}), retrying in {:?}: {}",
                        node.id, attempt, max_attempts, delay, err
                    );
                    self.emitter
                        .emit(
                            run.event(EventType::NodeRetry)
                                .with_node(node.id.clone())
                                .with_data("attempt", attempt)
                                .with_data("delay_seconds", delay.as_secs_f64())
                                .with_data("error", err.to_string()),
                        )
                        .await;

                    tokio::time::sleep(delay).await;
                }

                Err(err) => {
                    let message = err.to_string();
                    state.status = NodeStatus::Failed;
                    state.end_time = Some(Utc::now());
                    state.error_message = Some(message.clone());
                    ctx.lock().await.set_node_state(state)?;

                    error!("node '{}' failed after {} attempt(s): {}", node.id, attempt, message);
                    self.emitter
                        .emit(
                            run.event(EventType::NodeFailed)
                                .with_node(node.id.clone())
                                .with_data("attempt", attempt)
                                .with_data("error", message),
                        )
                        .await;
                    return Ok(());
                }
            }
        }

        Ok(())
    }
}

fn build_input(node: &Node, attempt: u32, ctx: &ExecutionContext) -> Result<NodeInput, ContextError> {
    let deps = node.dependencies.as_slice();
    Ok(NodeInput {
        workflow_id: ctx.workflow_id.clone(),
        execution_id: ctx.execution_id.clone(),
        node_id: node.id.clone(),
        node_name: node.display_name().to_owned(),
        config: node.config.clone(),
        attempt,
        dependency_outputs: ctx.get_dependency_outputs(deps)?,
        dependency_artifacts: ctx.get_dependency_artifacts(deps)?,
        global_context: ctx.global_context.clone(),
        all_outputs: ctx.get_all_outputs().clone(),
        all_artifacts: ctx.get_all_artifacts().clone(),
    })
}
