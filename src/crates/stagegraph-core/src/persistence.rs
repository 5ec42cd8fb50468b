//! Process-wide run persistence (§4.G, §4.M): all runs serialised to a
//! single JSON file, writes debounced by a 500ms timer and flushed
//! atomically. `init()` loads and reindexes; in-flight runs from a prior
//! process are not resumed automatically.

use crate::error::Result;
use crate::run::Run;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::time::Duration;

const DEBOUNCE: Duration = Duration::from_millis(500);

/// Debounced, atomic writer for the runs file. Cloning shares the same
/// background flush task and at-most-one-pending-save state.
#[derive(Clone)]
pub struct RunsStore {
    path: PathBuf,
    runs: Arc<Mutex<HashMap<String, Run>>>,
    flush_tx: mpsc::Sender<()>,
}

impl RunsStore {
    /// Load existing runs from `path` (empty set if missing, fresh start on
    /// parse error) and spawn the debounce-flush task.
    pub async fn init(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let runs = match std::fs::read(&path) {
            Ok(bytes) => match serde_json::from_slice::<Vec<Run>>(&bytes) {
                Ok(list) => list.into_iter().map(|r| (r.id.clone(), r)).collect(),
                Err(err) => {
                    tracing::warn!(error = %err, path = %path.display(), "runs file corrupt, starting fresh");
                    HashMap::new()
                }
            },
            Err(_) => HashMap::new(),
        };
        let runs = Arc::new(Mutex::new(runs));
        let (flush_tx, mut flush_rx) = mpsc::channel::<()>(1);

        let task_runs = runs.clone();
        let task_path = path.clone();
        tokio::spawn(async move {
            while flush_rx.recv().await.is_some() {
                tokio::time::sleep(DEBOUNCE).await;
                // Drain any additional requests that piled up during the
                // debounce window; we only need to flush once.
                while flush_rx.try_recv().is_ok() {}
                let snapshot: Vec<Run> = task_runs.lock().await.values().cloned().collect();
                if let Err(err) = write_atomic(&task_path, &snapshot) {
                    tracing::warn!(error = %err, "runs file flush failed");
                }
            }
        });

        Ok(Self {
            path,
            runs,
            flush_tx,
        })
    }

    pub async fn get(&self, id: &str) -> Option<Run> {
        self.runs.lock().await.get(id).cloned()
    }

    pub async fn all(&self) -> Vec<Run> {
        self.runs.lock().await.values().cloned().collect()
    }

    /// Insert/replace a run and schedule a debounced flush.
    pub async fn upsert(&self, run: Run) {
        self.runs.lock().await.insert(run.id.clone(), run);
        let _ = self.flush_tx.try_send(());
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn write_atomic(path: &Path, runs: &[Run]) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, serde_json::to_vec_pretty(runs)?)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}
