//! `store` crate: checkpoint persistence for execution contexts.
//!
//! The engine talks to persistence only through [`ContextStore`]. Two
//! implementations ship here: an in-memory reference store and a JSON-file
//! store for runs that must survive a process restart. No scheduling logic
//! lives here.

pub mod error;
pub mod file;
pub mod memory;

pub use error::StoreError;
pub use file::JsonFileContextStore;
pub use memory::InMemoryContextStore;

use async_trait::async_trait;
use nodes::ExecutionContext;

/// Persistence of [`ExecutionContext`] snapshots keyed by execution id.
#[async_trait]
pub trait ContextStore: Send + Sync {
    /// Insert or replace the snapshot for `context.execution_id`.
    async fn save_context(&self, context: &ExecutionContext) -> Result<(), StoreError>;

    /// Fetch a snapshot, or `None` if the id is unknown.
    async fn load_context(&self, execution_id: &str)
        -> Result<Option<ExecutionContext>, StoreError>;

    /// Remove a snapshot. Returns `false` if nothing was stored under the id.
    async fn delete_context(&self, execution_id: &str) -> Result<bool, StoreError>;

    /// Stored execution ids in sorted order, optionally restricted to one
    /// workflow.
    async fn list_executions(&self, workflow_id: Option<&str>) -> Result<Vec<String>, StoreError>;
}
