//! File-backed node state store
//!
//! Each record is a JSON document at `<base>/<namespace>/<name>.json`.
//! Writes go to a temporary sibling first and are renamed into place, so a
//! reader never observes a partially written record.

use async_trait::async_trait;
use gpudra_core::{DraError, DraResult, NodeAllocationState};
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::traits::NodeStateStore;

/// Node allocation state persisted as JSON files
pub struct FileStore {
    /// Base directory for records
    base_path: PathBuf,
    /// Serializes existence checks with the writes that depend on them
    write_lock: Mutex<()>,
}

impl FileStore {
    /// Create a new file store rooted at `base_path`
    pub fn new(base_path: PathBuf) -> Self {
        Self {
            base_path,
            write_lock: Mutex::new(()),
        }
    }

    /// Create the base directory if needed
    pub async fn init(&self) -> DraResult<()> {
        if !self.base_path.exists() {
            tokio::fs::create_dir_all(&self.base_path).await?;
            info!(path = %self.base_path.display(), "Created node state directory");
        }
        Ok(())
    }

    /// Get the path of a record. Names that are not a single plain path
    /// component are rejected.
    pub fn record_path(&self, namespace: &str, name: &str) -> DraResult<PathBuf> {
        Ok(self
            .base_path
            .join(check_component(namespace)?)
            .join(format!("{}.json", check_component(name)?)))
    }

    async fn read_record(&self, path: &Path, key: &str) -> DraResult<NodeAllocationState> {
        match tokio::fs::read(path).await {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(DraError::NotFound(key.to_string()))
            }
            Err(e) => Err(DraError::Store(format!("reading {}: {}", path.display(), e))),
        }
    }

    async fn write_record(&self, state: &NodeAllocationState) -> DraResult<()> {
        let path = self.record_path(&state.namespace, &state.name)?;
        if let Some(dir) = path.parent() {
            tokio::fs::create_dir_all(dir).await?;
        }
        let tmp = path.with_extension("json.tmp");
        let bytes = serde_json::to_vec_pretty(state)?;
        tokio::fs::write(&tmp, bytes)
            .await
            .map_err(|e| DraError::Store(format!("writing {}: {}", tmp.display(), e)))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| DraError::Store(format!("replacing {}: {}", path.display(), e)))?;
        debug!(record = %state.key(), path = %path.display(), "Wrote node allocation state");
        Ok(())
    }
}

fn check_component(s: &str) -> DraResult<&str> {
    if s.is_empty() || s.contains(['/', '\\', '\0']) || s.contains("..") {
        return Err(DraError::Validation(format!(
            "invalid record name '{}'",
            s
        )));
    }
    Ok(s)
}

#[async_trait]
impl NodeStateStore for FileStore {
    async fn get(&self, namespace: &str, name: &str) -> DraResult<NodeAllocationState> {
        let path = self.record_path(namespace, name)?;
        self.read_record(&path, &format!("{}/{}", namespace, name))
            .await
    }

    async fn create(&self, state: &NodeAllocationState) -> DraResult<NodeAllocationState> {
        let _guard = self.write_lock.lock().await;
        let path = self.record_path(&state.namespace, &state.name)?;
        if tokio::fs::try_exists(&path).await? {
            return Err(DraError::AlreadyExists(state.key()));
        }
        self.write_record(state).await?;
        Ok(state.clone())
    }

    async fn update(&self, state: &NodeAllocationState) -> DraResult<NodeAllocationState> {
        let _guard = self.write_lock.lock().await;
        let path = self.record_path(&state.namespace, &state.name)?;
        if !tokio::fs::try_exists(&path).await? {
            return Err(DraError::NotFound(state.key()));
        }
        self.write_record(state).await?;
        Ok(state.clone())
    }

    async fn delete(&self, namespace: &str, name: &str) -> DraResult<()> {
        let _guard = self.write_lock.lock().await;
        let path = self.record_path(namespace, name)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                info!(record = %format!("{}/{}", namespace, name), "Removed node allocation state");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(DraError::NotFound(format!("{}/{}", namespace, name)))
            }
            Err(e) => Err(DraError::Store(format!("removing {}: {}", path.display(), e))),
        }
    }

    async fn list(&self, namespace: &str) -> DraResult<Vec<NodeAllocationState>> {
        let mut states = Vec::new();
        let dir = self.base_path.join(check_component(namespace)?);

        if !dir.exists() {
            return Ok(states);
        }

        let mut entries = tokio::fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().is_some_and(|e| e == "json") {
                let bytes = tokio::fs::read(&path).await?;
                states.push(serde_json::from_slice::<NodeAllocationState>(&bytes)?);
            }
        }

        states.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(states)
    }

    fn name(&self) -> &'static str {
        "file"
    }
}
