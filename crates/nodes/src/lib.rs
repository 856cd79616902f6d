//! `nodes` crate: the `Executable` trait, the executor registry, the shared
//! execution-context model, and built-in executor implementations.
//!
//! Every executor, built-in or user-supplied, must implement
//! [`Executable`]. The engine crate dispatches execution through this trait
//! object after resolving a node's executor id in an [`ExecutorRegistry`].

pub mod builtin;
pub mod context;
pub mod error;
pub mod mock;
pub mod registry;
pub mod traits;

pub use context::{ContextError, ExecutionContext, NodeState, NodeStatus, RunStatus, StatusSummary};
pub use error::NodeError;
pub use registry::ExecutorRegistry;
pub use traits::{Executable, NodeInput, NodeOutput};
