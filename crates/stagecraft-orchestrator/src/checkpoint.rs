//! The Checkpoint Manager and its state store: file-backed by default,
//! with an atomic rename-on-save so a crash mid-write can never leave a
//! half-written checkpoint visible under its final name.

use async_trait::async_trait;
use std::path::PathBuf;
use stagecraft_core::{StagecraftError, StagecraftResult};
use uuid::Uuid;

use crate::state::{CheckpointDescriptor, ExecutionState};

/// A key-value store addressed by `(workflow_id, checkpoint_id)`.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    async fn save(&self, workflow_id: &str, checkpoint_id: Uuid, state: &ExecutionState) -> StagecraftResult<()>;
    async fn load(&self, workflow_id: &str, checkpoint_id: Uuid) -> StagecraftResult<Option<ExecutionState>>;
    async fn list(&self, workflow_id: &str) -> StagecraftResult<Vec<Uuid>>;
    async fn delete(&self, workflow_id: &str, checkpoint_id: Uuid) -> StagecraftResult<()>;
}

/// File-backed [`CheckpointStore`]. Each checkpoint is one JSON file named
/// `{workflow_id}__{checkpoint_id}.json`; saves go through a sibling `.tmp`
/// file and `rename`, so a crash mid-write never leaves a half-written
/// checkpoint visible under its final name.
pub struct FileCheckpointStore {
    dir: PathBuf,
}

impl FileCheckpointStore {
    pub fn new(dir: impl Into<PathBuf>) -> std::io::Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    fn path(&self, workflow_id: &str, checkpoint_id: Uuid) -> PathBuf {
        self.dir.join(format!("{workflow_id}__{checkpoint_id}.json"))
    }

    fn parse_filename(workflow_id: &str, name: &str) -> Option<Uuid> {
        let prefix = format!("{workflow_id}__");
        let rest = name.strip_prefix(&prefix)?;
        let rest = rest.strip_suffix(".json")?;
        Uuid::parse_str(rest).ok()
    }
}

#[async_trait]
impl CheckpointStore for FileCheckpointStore {
    async fn save(&self, workflow_id: &str, checkpoint_id: Uuid, state: &ExecutionState) -> StagecraftResult<()> {
        let path = self.path(workflow_id, checkpoint_id);
        let tmp = path.with_extension("json.tmp");
        let bytes = serde_json::to_vec_pretty(state)?;
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }

    async fn load(&self, workflow_id: &str, checkpoint_id: Uuid) -> StagecraftResult<Option<ExecutionState>> {
        let path = self.path(workflow_id, checkpoint_id);
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn list(&self, workflow_id: &str) -> StagecraftResult<Vec<Uuid>> {
        let mut out = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            if let Some(name) = entry.file_name().to_str() {
                if let Some(id) = Self::parse_filename(workflow_id, name) {
                    out.push(id);
                }
            }
        }
        Ok(out)
    }

    async fn delete(&self, workflow_id: &str, checkpoint_id: Uuid) -> StagecraftResult<()> {
        let path = self.path(workflow_id, checkpoint_id);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// `create(name?)`, `list()`, `restore(id)`, `delete(id)` over one
/// workflow's [`ExecutionState`]. Checkpoint writes are expected to run
/// under an exclusive lock against all state mutators for the duration of
/// serialization; callers are expected to hold that lock across the
/// `create` call themselves, since the lock is the caller's
/// `ExecutionState` guard, not something this type owns.
pub struct CheckpointManager {
    workflow_id: String,
    store: Box<dyn CheckpointStore>,
}

impl CheckpointManager {
    pub fn new(workflow_id: impl Into<String>, store: Box<dyn CheckpointStore>) -> Self {
        Self {
            workflow_id: workflow_id.into(),
            store,
        }
    }

    /// Snapshots `state`, records the new descriptor in the snapshot's own
    /// `checkpoints` list, and persists it.
    pub async fn create(
        &self,
        state: &ExecutionState,
        name: Option<String>,
    ) -> StagecraftResult<CheckpointDescriptor> {
        let descriptor = CheckpointDescriptor {
            id: stagecraft_core::new_id(),
            name,
            created_at: stagecraft_core::now(),
        };
        let mut snapshot = state.clone();
        snapshot.checkpoints.push(descriptor.clone());
        self.store.save(&self.workflow_id, descriptor.id, &snapshot).await?;
        Ok(descriptor)
    }

    /// Every checkpoint descriptor known to the store for this workflow,
    /// newest first.
    pub async fn list(&self) -> StagecraftResult<Vec<CheckpointDescriptor>> {
        let ids = self.store.list(&self.workflow_id).await?;
        let mut descriptors = Vec::new();
        for id in ids {
            if let Some(state) = self.store.load(&self.workflow_id, id).await? {
                if let Some(descriptor) = state.checkpoints.iter().find(|d| d.id == id) {
                    descriptors.push(descriptor.clone());
                }
            }
        }
        descriptors.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(descriptors)
    }

    /// Loads the full [`ExecutionState`] as of a checkpoint. Restore fully
    /// replaces the live state; the caller is responsible for swapping it in.
    pub async fn restore(&self, checkpoint_id: Uuid) -> StagecraftResult<ExecutionState> {
        self.store
            .load(&self.workflow_id, checkpoint_id)
            .await?
            .ok_or_else(|| StagecraftError::Execution(format!("checkpoint '{checkpoint_id}' not found")))
    }

    pub async fn delete(&self, checkpoint_id: Uuid) -> StagecraftResult<()> {
        self.store.delete(&self.workflow_id, checkpoint_id).await
    }
}
