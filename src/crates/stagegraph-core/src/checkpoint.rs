//! Per-run checkpointing (§4.M, §6): a durable JSON snapshot written after
//! every stage completion, atomically (write `.tmp`, then rename).

use crate::error::{EngineError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;

/// A snapshot of engine state for one run, written to
/// `<logsRoot>/checkpoint.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    pub timestamp: DateTime<Utc>,
    pub current_node: Option<String>,
    pub completed_nodes: Vec<String>,
    pub node_retries: HashMap<String, u32>,
    pub context_values: HashMap<String, Value>,
    pub logs: Vec<String>,
}

impl Checkpoint {
    pub fn new(
        current_node: Option<String>,
        completed_nodes: Vec<String>,
        node_retries: HashMap<String, u32>,
        context_values: HashMap<String, Value>,
        logs: Vec<String>,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            current_node,
            completed_nodes,
            node_retries,
            context_values,
            logs,
        }
    }

    /// Write to `<logsRoot>/checkpoint.json` via a temp-file-then-rename,
    /// so an observer never sees a partially written file (TESTABLE
    /// PROPERTIES #9). Creates `logsRoot` if it doesn't exist.
    pub fn write_atomic(&self, logs_root: &Path) -> Result<()> {
        std::fs::create_dir_all(logs_root)?;
        let final_path = logs_root.join("checkpoint.json");
        let tmp_path = logs_root.join("checkpoint.json.tmp");
        let bytes = serde_json::to_vec_pretty(self)?;
        std::fs::write(&tmp_path, bytes)?;
        std::fs::rename(&tmp_path, &final_path)?;
        Ok(())
    }

    /// Best-effort write: failures are logged and swallowed per §4.M /
    /// §7 (`CheckpointWriteError` is non-fatal to the stage).
    pub fn write_best_effort(&self, logs_root: &Path) {
        if let Err(err) = self.write_atomic(logs_root) {
            tracing::warn!(error = %err, logs_root = %logs_root.display(), "checkpoint write failed");
        }
    }

    pub fn load(logs_root: &Path) -> Result<Option<Self>> {
        let path = logs_root.join("checkpoint.json");
        if !path.exists() {
            return Ok(None);
        }
        let bytes = std::fs::read(&path)?;
        let checkpoint: Self = serde_json::from_slice(&bytes)
            .map_err(|e| EngineError::CheckpointWrite(format!("corrupt checkpoint: {e}")))?;
        Ok(Some(checkpoint))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn atomic_write_then_load_round_trips() {
        let dir = tempdir().unwrap();
        let checkpoint = Checkpoint::new(
            Some("A".to_string()),
            vec!["start".to_string()],
            HashMap::new(),
            HashMap::new(),
            vec![],
        );
        checkpoint.write_atomic(dir.path()).unwrap();
        assert!(!dir.path().join("checkpoint.json.tmp").exists());
        let loaded = Checkpoint::load(dir.path()).unwrap().unwrap();
        assert_eq!(loaded.current_node.as_deref(), Some("A"));
    }

    #[test]
    fn missing_checkpoint_loads_as_none() {
        let dir = tempdir().unwrap();
        assert!(Checkpoint::load(dir.path()).unwrap().is_none());
    }

    #[test]
    fn second_write_replaces_first_without_partial_state() {
        let dir = tempdir().unwrap();
        let first = Checkpoint::new(Some("A".to_string()), vec![], HashMap::new(), HashMap::new(), vec![]);
        let second = Checkpoint::new(Some("B".to_string()), vec!["A".to_string()], HashMap::new(), HashMap::new(), vec![]);
        first.write_atomic(dir.path()).unwrap();
        second.write_atomic(dir.path()).unwrap();
        let loaded = Checkpoint::load(dir.path()).unwrap().unwrap();
        assert_eq!(loaded.current_node.as_deref(), Some("B"));
    }
}
