//! Durable store writing one JSON document per execution.
//!
//! Layout: `<dir>/<execution_id>.json`. Writes go to a temporary sibling
//! first and are renamed into place, so a crash mid-write leaves the previous
//! checkpoint intact.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use nodes::ExecutionContext;
use tracing::{debug, warn};

use crate::{ContextStore, StoreError};

const EXTENSION: &str = "json";

#[derive(Debug, Clone)]
pub struct JsonFileContextStore {
    dir: PathBuf,
}

impl JsonFileContextStore {
    /// Use `dir` as the storage directory, creating it if needed.
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir).await?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, execution_id: &str) -> Result<PathBuf, StoreError> {
        let valid = !execution_id.is_empty()
            && !execution_id.starts_with('.')
            && !execution_id.contains(['/', '\\', '\0']);
        if !valid {
            return Err(StoreError::InvalidId(execution_id.to_owned()));
        }
        Ok(self.dir.join(format!("{execution_id}.{EXTENSION}")))
    }

    async fn read(path: &Path) -> Result<Option<ExecutionContext>, StoreError> {
        match tokio::fs::read(path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl ContextStore for JsonFileContextStore {
    async fn save_context(&self, context: &ExecutionContext) -> Result<(), StoreError> {
        let path = self.path_for(&context.execution_id)?;
        let tmp = path.with_extension(format!("{EXTENSION}.tmp"));
        let bytes = serde_json::to_vec_pretty(context)?;

        tokio::fs::write(&tmp, &bytes).await?;
        tokio::fs::rename(&tmp, &path).await?;

        debug!(
            execution_id = %context.execution_id,
            path = %path.display(),
            "checkpoint written"
        );
        Ok(())
    }

    async fn load_context(
        &self,
        execution_id: &str,
    ) -> Result<Option<ExecutionContext>, StoreError> {
        let path = self.path_for(execution_id)?;
        Self::read(&path).await
    }

    async fn delete_context(&self, execution_id: &str) -> Result<bool, StoreError> {
        let path = self.path_for(execution_id)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn list_executions(&self, workflow_id: Option<&str>) -> Result<Vec<String>, StoreError> {
        let mut ids = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.dir).await?;

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(EXTENSION) {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };

            match workflow_id {
                None => ids.push(stem.to_owned()),
                Some(wf) => match Self::read(&path).await {
                    Ok(Some(ctx)) if ctx.workflow_id == wf => ids.push(ctx.execution_id),
                    Ok(_) => {}
                    Err(e) => warn!("skipping unreadable checkpoint {}: {}", path.display(), e),
                },
            }
        }

        ids.sort();
        Ok(ids)
    }
}
