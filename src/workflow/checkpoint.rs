//! Durable workflow progress snapshots.
//!
//! [`FileCheckpointStore`] follows a directory-creation-then-load-or-create idiom,
//! writing one JSON document per checkpoint at
//! `<base>/<workflow_id>/<checkpoint_id>.json`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::RwLock;

/// A durable snapshot of one workflow run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    pub checkpoint_id: String,
    pub workflow_id: String,
    pub structure_hash: String,
    pub timestamp: DateTime<Utc>,
    pub completed_step_ids: Vec<String>,
    pub pending_step_ids: Vec<String>,
    pub step_outputs: HashMap<String, Value>,
    pub shared_state: HashMap<String, Value>,
    pub metadata: HashMap<String, Value>,
}

/// Listing-only projection of a [`Checkpoint`], returned by `list_metadata` so callers
/// don't have to pull every `step_outputs`/`shared_state` blob just to see what exists.
#[derive(Debug, Clone)]
pub struct CheckpointMeta {
    pub checkpoint_id: String,
    pub workflow_id: String,
    pub timestamp: DateTime<Utc>,
}

#[async_trait]
pub trait CheckpointStore: Send + Sync {
    async fn save(&self, checkpoint: &Checkpoint) -> io::Result<()>;
    async fn load_latest(&self, workflow_id: &str) -> io::Result<Option<Checkpoint>>;
    async fn list_metadata(&self, workflow_id: Option<&str>) -> io::Result<Vec<CheckpointMeta>>;
    async fn delete(&self, checkpoint_id: &str) -> io::Result<()>;
}

/// Policy governing when and how a [`super::runner::WorkflowRunner`] persists progress.
pub struct CheckpointConfig {
    pub store: Arc<dyn CheckpointStore>,
    pub auto_save: bool,
    pub save_interval_steps: usize,
    pub auto_cleanup: bool,
    pub keep_last_n: usize,
}

impl CheckpointConfig {
    pub fn new(store: Arc<dyn CheckpointStore>) -> Self {
        Self {
            store,
            auto_save: true,
            save_interval_steps: 1,
            auto_cleanup: false,
            keep_last_n: 5,
        }
    }

    pub fn with_save_interval_steps(mut self, n: usize) -> Self {
        self.save_interval_steps = n.max(1);
        self
    }

    pub fn with_auto_cleanup(mut self, keep_last_n: usize) -> Self {
        self.auto_cleanup = true;
        self.keep_last_n = keep_last_n;
        self
    }
}

/// Keeps every workflow's checkpoints (in declared order) behind a single lock — the
/// in-process equivalent of [`FileCheckpointStore`], useful for tests and for runs that
/// never need to outlive the process.
#[derive(Default)]
pub struct InMemoryCheckpointStore {
    checkpoints: RwLock<HashMap<String, Vec<Checkpoint>>>,
}

impl InMemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CheckpointStore for InMemoryCheckpointStore {
    async fn save(&self, checkpoint: &Checkpoint) -> io::Result<()> {
        let mut guard = self.checkpoints.write().await;
        guard.entry(checkpoint.workflow_id.clone()).or_default().push(checkpoint.clone());
        Ok(())
    }

    async fn load_latest(&self, workflow_id: &str) -> io::Result<Option<Checkpoint>> {
        let guard = self.checkpoints.read().await;
        Ok(guard.get(workflow_id).and_then(|list| list.last().cloned()))
    }

    async fn list_metadata(&self, workflow_id: Option<&str>) -> io::Result<Vec<CheckpointMeta>> {
        let guard = self.checkpoints.read().await;
        let mut out = Vec::new();
        for (wf_id, list) in guard.iter() {
            if let Some(filter) = workflow_id {
                if filter != wf_id {
                    continue;
                }
            }
            for cp in list {
                out.push(CheckpointMeta {
                    checkpoint_id: cp.checkpoint_id.clone(),
                    workflow_id: cp.workflow_id.clone(),
                    timestamp: cp.timestamp,
                });
            }
        }
        Ok(out)
    }

    async fn delete(&self, checkpoint_id: &str) -> io::Result<()> {
        let mut guard = self.checkpoints.write().await;
        for list in guard.values_mut() {
            list.retain(|cp| cp.checkpoint_id != checkpoint_id);
        }
        Ok(())
    }
}

/// One JSON document per checkpoint on disk, at `<base>/<workflow_id>/<checkpoint_id>.json`.
pub struct FileCheckpointStore {
    base: PathBuf,
}

impl FileCheckpointStore {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }

    fn workflow_dir(&self, workflow_id: &str) -> PathBuf {
        self.base.join(workflow_id)
    }

    fn checkpoint_path(&self, workflow_id: &str, checkpoint_id: &str) -> PathBuf {
        self.workflow_dir(workflow_id).join(format!("{checkpoint_id}.json"))
    }
}

#[async_trait]
impl CheckpointStore for FileCheckpointStore {
    async fn save(&self, checkpoint: &Checkpoint) -> io::Result<()> {
        std::fs::create_dir_all(self.workflow_dir(&checkpoint.workflow_id))?;
        let path = self.checkpoint_path(&checkpoint.workflow_id, &checkpoint.checkpoint_id);
        let json = serde_json::to_string_pretty(checkpoint)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        std::fs::write(path, json)
    }

    async fn load_latest(&self, workflow_id: &str) -> io::Result<Option<Checkpoint>> {
        let dir = self.workflow_dir(workflow_id);
        if !dir.exists() {
            return Ok(None);
        }
        let mut latest: Option<Checkpoint> = None;
        for entry in std::fs::read_dir(&dir)? {
            let entry = entry?;
            if entry.path().extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let content = std::fs::read_to_string(entry.path())?;
            let checkpoint: Checkpoint = serde_json::from_str(&content)
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
            if latest.as_ref().is_none_or(|cur| checkpoint.timestamp > cur.timestamp) {
                latest = Some(checkpoint);
            }
        }
        Ok(latest)
    }

    async fn list_metadata(&self, workflow_id: Option<&str>) -> io::Result<Vec<CheckpointMeta>> {
        let mut out = Vec::new();
        let dirs: Vec<PathBuf> = match workflow_id {
            Some(id) => vec![self.workflow_dir(id)],
            None => {
                if !self.base.exists() {
                    return Ok(out);
                }
                std::fs::read_dir(&self.base)?
                    .filter_map(|e| e.ok())
                    .map(|e| e.path())
                    .filter(|p| p.is_dir())
                    .collect()
            }
        };
        for dir in dirs {
            if !dir.exists() {
                continue;
            }
            for entry in std::fs::read_dir(&dir)? {
                let entry = entry?;
                if entry.path().extension().and_then(|e| e.to_str()) != Some("json") {
                    continue;
                }
                let content = std::fs::read_to_string(entry.path())?;
                let checkpoint: Checkpoint = serde_json::from_str(&content)
                    .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
                out.push(CheckpointMeta {
                    checkpoint_id: checkpoint.checkpoint_id,
                    workflow_id: checkpoint.workflow_id,
                    timestamp: checkpoint.timestamp,
                });
            }
        }
        Ok(out)
    }

    async fn delete(&self, checkpoint_id: &str) -> io::Result<()> {
        if !self.base.exists() {
            return Ok(());
        }
        for entry in std::fs::read_dir(&self.base)? {
            let dir = entry?.path();
            if !dir.is_dir() {
                continue;
            }
            let path = dir.join(format!("{checkpoint_id}.json"));
            if path.exists() {
                std::fs::remove_file(path)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(workflow_id: &str, checkpoint_id: &str) -> Checkpoint {
        Checkpoint {
            checkpoint_id: checkpoint_id.to_string(),
            workflow_id: workflow_id.to_string(),
            structure_hash: "abc".to_string(),
            timestamp: Utc::now(),
            completed_step_ids: vec!["fetch".to_string()],
            pending_step_ids: vec!["process".to_string()],
            step_outputs: HashMap::new(),
            shared_state: HashMap::new(),
            metadata: HashMap::new(),
        }
    }

    #[tokio::test]
    async fn in_memory_store_round_trips_latest() {
        let store = InMemoryCheckpointStore::new();
        store.save(&sample("wf1", "cp1")).await.unwrap();
        store.save(&sample("wf1", "cp2")).await.unwrap();
        let latest = store.load_latest("wf1").await.unwrap().unwrap();
        assert_eq!(latest.checkpoint_id, "cp2");
    }

    #[tokio::test]
    async fn file_store_persists_and_reloads_across_instances() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCheckpointStore::new(dir.path());
        store.save(&sample("wf1", "cp1")).await.unwrap();

        let reopened = FileCheckpointStore::new(dir.path());
        let latest = reopened.load_latest("wf1").await.unwrap().unwrap();
        assert_eq!(latest.checkpoint_id, "cp1");
        assert_eq!(latest.completed_step_ids, vec!["fetch".to_string()]);
    }

    #[tokio::test]
    async fn file_store_delete_removes_checkpoint() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCheckpointStore::new(dir.path());
        store.save(&sample("wf1", "cp1")).await.unwrap();
        store.delete("cp1").await.unwrap();
        assert!(store.load_latest("wf1").await.unwrap().is_none());
    }
}
