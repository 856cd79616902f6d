//! `engine` crate: workflow graph models, DAG validation, condition
//! evaluation, retry policies, events, and the execution engine.

pub mod condition;
pub mod config;
pub mod dag;
pub mod error;
pub mod events;
pub mod executor;
pub mod models;
pub mod retry;

pub use condition::{ConditionError, ConditionEvaluator};
pub use config::EngineConfig;
pub use dag::validate_dag;
pub use error::{EngineError, GraphError};
pub use events::{
    ChannelListener, EventEmitter, EventListener, EventType, ExecutionEvent, FnListener,
    TracingListener,
};
pub use executor::Engine;
pub use models::{Node, WorkflowGraph};
pub use retry::RetryPolicy;
