//! Non-durable reference store.

use std::collections::HashMap;

use async_trait::async_trait;
use nodes::ExecutionContext;
use tokio::sync::RwLock;
use tracing::debug;

use crate::{ContextStore, StoreError};

/// Keeps snapshots in a process-local map. Contents are lost on exit.
#[derive(Debug, Default)]
pub struct InMemoryContextStore {
    contexts: RwLock<HashMap<String, ExecutionContext>>,
}

impl InMemoryContextStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored snapshots.
    pub async fn len(&self) -> usize {
        self.contexts.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.contexts.read().await.is_empty()
    }
}

#[async_trait]
impl ContextStore for InMemoryContextStore {
    async fn save_context(&self, context: &ExecutionContext) -> Result<(), StoreError> {
        debug!(
            execution_id = %context.execution_id,
            status = %context.status,
            "saving context snapshot"
        );
        self.contexts
            .write()
            .await
            .insert(context.execution_id.clone(), context.clone());
        Ok(())
    }

    async fn load_context(
        &self,
        execution_id: &str,
    ) -> Result<Option<ExecutionContext>, StoreError> {
        Ok(self.contexts.read().await.get(execution_id).cloned())
    }

    async fn delete_context(&self, execution_id: &str) -> Result<bool, StoreError> {
        Ok(self.contexts.write().await.remove(execution_id).is_some())
    }

    async fn list_executions(&self, workflow_id: Option<&str>) -> Result<Vec<String>, StoreError> {
        let contexts = self.contexts.read().await;
        let mut ids: Vec<String> = contexts
            .values()
            .filter(|ctx| workflow_id.map_or(true, |wf| ctx.workflow_id == wf))
            .map(|ctx| ctx.execution_id.clone())
            .collect();
        ids.sort();
        Ok(ids)
    }
}
