//! # Workflow Snapshot Persistence
//!
//! Hook the state manager uses to mirror workflow snapshots into an external
//! store after every transition and to rehydrate active workflows on startup.
//! The in-process manager stays authoritative; a store only has to round-trip
//! [`WorkflowState`] faithfully.

use crate::error::{AgentflowError, Result};
use crate::models::WorkflowState;
use dashmap::DashMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Storage backend for workflow snapshots
pub trait StateStore: Send + Sync {
    /// Insert or replace the snapshot for `state.workflow_id()`
    fn save(&self, state: &WorkflowState) -> Result<()>;

    fn load(&self, workflow_id: &str) -> Result<Option<WorkflowState>>;

    /// Snapshots whose status is not Completed or Cancelled
    fn list_active(&self) -> Result<Vec<WorkflowState>>;

    fn delete(&self, workflow_id: &str) -> Result<bool>;
}

/// Process-local store, mainly for tests and single-node embedding
#[derive(Debug, Default)]
pub struct InMemoryStateStore {
    states: DashMap<String, WorkflowState>,
}

impl InMemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }
}

impl StateStore for InMemoryStateStore {
    fn save(&self, state: &WorkflowState) -> Result<()> {
        self.states
            .insert(state.workflow_id().to_string(), state.clone());
        Ok(())
    }

    fn load(&self, workflow_id: &str) -> Result<Option<WorkflowState>> {
        Ok(self.states.get(workflow_id).map(|entry| entry.clone()))
    }

    fn list_active(&self) -> Result<Vec<WorkflowState>> {
        Ok(self
            .states
            .iter()
            .filter(|entry| !entry.status().is_terminal())
            .map(|entry| entry.clone())
            .collect())
    }

    fn delete(&self, workflow_id: &str) -> Result<bool> {
        Ok(self.states.remove(workflow_id).is_some())
    }
}

/// One pretty-printed JSON document per workflow under a directory
#[derive(Debug, Clone)]
pub struct JsonFileStateStore {
    directory: PathBuf,
}

impl JsonFileStateStore {
    /// Create the store, creating `directory` if needed
    pub fn new(directory: impl AsRef<Path>) -> Result<Self> {
        let directory = directory.as_ref().to_path_buf();
        fs::create_dir_all(&directory).map_err(|e| {
            AgentflowError::Persistence(format!(
                "Failed to create state directory {}: {e}",
                directory.display()
            ))
        })?;
        Ok(Self { directory })
    }

    /// File for one workflow. Bytes outside `[A-Za-z0-9-]` are written as
    /// `_xx` hex escapes, so distinct ids never share a file.
    fn path_for(&self, workflow_id: &str) -> PathBuf {
        let mut file_name = String::with_capacity(workflow_id.len());
        for byte in workflow_id.bytes() {
            if byte.is_ascii_alphanumeric() || byte == b'-' {
                file_name.push(char::from(byte));
            } else {
                file_name.push_str(&format!("_{byte:02x}"));
            }
        }
        self.directory.join(format!("{file_name}.json"))
    }

    fn read_state(path: &Path) -> Result<WorkflowState> {
        let raw = fs::read_to_string(path).map_err(|e| {
            AgentflowError::Persistence(format!("Failed to read {}: {e}", path.display()))
        })?;
        Ok(serde_json::from_str(&raw)?)
    }
}

impl StateStore for JsonFileStateStore {
    fn save(&self, state: &WorkflowState) -> Result<()> {
        let path = self.path_for(state.workflow_id());
        let tmp_path = path.with_extension("json.tmp");
        let body = serde_json::to_string_pretty(state)?;

        // Write-then-rename keeps a reader from seeing a half-written file
        fs::write(&tmp_path, body).map_err(|e| {
            AgentflowError::Persistence(format!("Failed to write {}: {e}", tmp_path.display()))
        })?;
        fs::rename(&tmp_path, &path).map_err(|e| {
            AgentflowError::Persistence(format!("Failed to replace {}: {e}", path.display()))
        })?;

        debug!(workflow_id = state.workflow_id(), path = %path.display(), "Saved workflow snapshot");
        Ok(())
    }

    fn load(&self, workflow_id: &str) -> Result<Option<WorkflowState>> {
        let path = self.path_for(workflow_id);
        if !path.exists() {
            return Ok(None);
        }
        Self::read_state(&path).map(Some)
    }

    fn list_active(&self) -> Result<Vec<WorkflowState>> {
        let entries = fs::read_dir(&self.directory).map_err(|e| {
            AgentflowError::Persistence(format!(
                "Failed to list {}: {e}",
                self.directory.display()
            ))
        })?;

        let mut active = Vec::new();
        for entry in entries {
            let path = entry
                .map_err(|e| AgentflowError::Persistence(e.to_string()))?
                .path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }
            let state = Self::read_state(&path)?;
            if !state.status().is_terminal() {
                active.push(state);
            }
        }
        Ok(active)
    }

    fn delete(&self, workflow_id: &str) -> Result<bool> {
        let path = self.path_for(workflow_id);
        if !path.exists() {
            return Ok(false);
        }
        fs::remove_file(&path).map_err(|e| {
            AgentflowError::Persistence(format!("Failed to delete {}: {e}", path.display()))
        })?;
        Ok(true)
    }
}
