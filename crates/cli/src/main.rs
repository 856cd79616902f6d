//! `dagflow` CLI entry-point.
//!
//! Available sub-commands:
//! - `validate`: check a workflow JSON file and print its execution groups.
//! - `run`: execute a workflow, checkpointing into the store directory.
//! - `resume`: continue a paused, cancelled or failed execution.
//! - `list`, `show`, `delete`: inspect stored executions.
//!
//! Workflows may only reference the built-in executors (`noop`, `echo`,
//! `sleep`, `fail`). Ctrl-C pauses the run at the next group boundary; a
//! second Ctrl-C exits immediately.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand, ValueEnum};
use serde_json::{Map, Value};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use engine::{Engine, EngineConfig, EngineError, TracingListener, WorkflowGraph};
use nodes::{ExecutionContext, ExecutorRegistry, RunStatus};
use store::{ContextStore, JsonFileContextStore};

#[derive(Parser)]
#[command(name = "dagflow", about = "Run DAG workflows with retries, conditions and checkpoints", version)]
struct Cli {
    /// Directory holding execution checkpoints.
    #[arg(long, global = true, env = "DAGFLOW_STORE_DIR", default_value = ".dagflow")]
    store_dir: PathBuf,

    /// Maximum nodes running at once within a group (0 = unlimited).
    #[arg(long, global = true, env = "DAGFLOW_MAX_PARALLEL", default_value_t = 0)]
    max_parallel: usize,

    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Command {
    /// Validate a workflow definition JSON file.
    Validate {
        /// Path to the workflow JSON file.
        path: PathBuf,
    },
    /// Execute a workflow from the start.
    Run {
        path: PathBuf,
        /// Global context as a JSON object, visible to every node.
        #[arg(long, default_value = "{}")]
        global: String,
    },
    /// Continue a checkpointed execution of a workflow.
    Resume {
        path: PathBuf,
        execution_id: String,
    },
    /// List stored execution ids.
    List {
        /// Only list executions of this workflow.
        #[arg(long)]
        workflow: Option<String>,
    },
    /// Print a stored execution context as JSON.
    Show { execution_id: String },
    /// Delete a stored execution context.
    Delete { execution_id: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    match cli.command {
        Command::Validate { path } => {
            let graph = load_graph(&path)?;
            match engine::validate_dag(&graph) {
                Ok(groups) => {
                    println!("Workflow '{}' is valid. Execution groups:", graph.id);
                    for (index, group) in groups.iter().enumerate() {
                        println!("  {index}: {}", group.join(", "));
                    }
                }
                Err(e) => bail!("{e}"),
            }
        }
        Command::Run { path, global } => {
            let graph = load_graph(&path)?;
            let global: Map<String, Value> =
                serde_json::from_str(&global).context("--global must be a JSON object")?;
            let engine = build_engine(graph, &cli.store_dir, cli.max_parallel).await?;
            let ctx = ExecutionContext::new(engine.graph().id.clone(), global);
            info!(execution_id = %ctx.execution_id, "starting run");
            report(with_interrupts(&engine, engine.execute(Some(ctx), None)).await)?;
        }
        Command::Resume { path, execution_id } => {
            let graph = load_graph(&path)?;
            let engine = build_engine(graph, &cli.store_dir, cli.max_parallel).await?;
            report(with_interrupts(&engine, engine.resume(&execution_id)).await)?;
        }
        Command::List { workflow } => {
            let store = JsonFileContextStore::open(&cli.store_dir).await?;
            for id in store.list_executions(workflow.as_deref()).await? {
                println!("{id}");
            }
        }
        Command::Show { execution_id } => {
            let store = JsonFileContextStore::open(&cli.store_dir).await?;
            let Some(ctx) = store.load_context(&execution_id).await? else {
                bail!("execution '{execution_id}' not found");
            };
            println!("{}", serde_json::to_string_pretty(&ctx)?);
        }
        Command::Delete { execution_id } => {
            let store = JsonFileContextStore::open(&cli.store_dir).await?;
            if !store.delete_context(&execution_id).await? {
                bail!("execution '{execution_id}' not found");
            }
            println!("Deleted {execution_id}");
        }
    }

    Ok(())
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

fn load_graph(path: &Path) -> anyhow::Result<WorkflowGraph> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("cannot read file {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("invalid workflow JSON in {}", path.display()))
}

async fn build_engine(
    graph: WorkflowGraph,
    store_dir: &Path,
    max_parallel: usize,
) -> anyhow::Result<Engine> {
    let store = JsonFileContextStore::open(store_dir)
        .await
        .with_context(|| format!("cannot open store at {}", store_dir.display()))?;
    let config = EngineConfig::default().with_max_parallel_nodes(max_parallel);

    Ok(Engine::new(graph, ExecutorRegistry::with_builtins(), Arc::new(store))
        .with_listener(Arc::new(TracingListener))
        .with_config(config))
}

/// Drive `run` to completion, turning the first Ctrl-C into a pause request.
async fn with_interrupts<F>(engine: &Engine, run: F) -> Result<ExecutionContext, EngineError>
where
    F: std::future::Future<Output = Result<ExecutionContext, EngineError>>,
{
    tokio::pin!(run);
    tokio::select! {
        result = &mut run => return result,
        signal = tokio::signal::ctrl_c() => match signal {
            Ok(()) => {
                warn!("interrupt received, pausing after the current group (Ctrl-C again to abort)");
                engine.pause();
            }
            Err(e) => {
                warn!("cannot listen for Ctrl-C: {e}");
                return run.await;
            }
        },
    }

    tokio::select! {
        result = &mut run => result,
        _ = tokio::signal::ctrl_c() => {
            warn!("second interrupt, exiting without waiting for the current group");
            std::process::exit(130);
        }
    }
}

fn report(result: Result<ExecutionContext, EngineError>) -> anyhow::Result<()> {
    let ctx = result?;
    let summary = ctx.summary();
    println!(
        "Execution {} {}: {} completed, {} skipped, {} pending",
        ctx.execution_id, ctx.status, summary.completed, summary.skipped, summary.pending
    );
    if matches!(ctx.status, RunStatus::Paused | RunStatus::Cancelled) {
        println!("Resume with: dagflow resume <workflow.json> {}", ctx.execution_id);
    }
    Ok(())
}
