//! The [`Run`] record (§3 DATA MODEL): a pipeline execution in progress or
//! finished.

use crate::outcome::Outcome;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    Parse,
    Validate,
    Initialize,
    Execute,
    Finalize,
    Completed,
    Failed,
}

/// A run's full execution record.
///
/// Invariants maintained by [`crate::engine::PipelineEngine`]:
/// - `completed_nodes` is a prefix of execution order.
/// - every id in `completed_nodes` is a key of `node_outcomes`.
/// - `status == Completed` only once a terminal node was reached with all
///   goal gates satisfied.
/// - `status == Failed` only with `error` populated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
    pub id: String,
    pub source: String,
    pub graph_id: String,
    pub goal: Option<String>,
    pub status: RunStatus,
    pub current_node: Option<String>,
    pub completed_nodes: Vec<String>,
    pub node_outcomes: HashMap<String, Outcome>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub logs_root: String,
    pub error: Option<String>,
}

impl Run {
    pub fn new(id: String, source: String, graph_id: String, goal: Option<String>, logs_root: String) -> Self {
        Self {
            id,
            source,
            graph_id,
            goal,
            status: RunStatus::Parse,
            current_node: None,
            completed_nodes: Vec::new(),
            node_outcomes: HashMap::new(),
            started_at: Utc::now(),
            completed_at: None,
            logs_root,
            error: None,
        }
    }

    pub fn record_completion(&mut self, node_id: String, outcome: Outcome) {
        self.completed_nodes.push(node_id.clone());
        self.node_outcomes.insert(node_id, outcome);
    }

    pub fn mark_completed(&mut self) {
        self.status = RunStatus::Completed;
        self.completed_at = Some(Utc::now());
    }

    pub fn mark_failed(&mut self, error: impl Into<String>) {
        self.status = RunStatus::Failed;
        self.error = Some(error.into());
        self.completed_at = Some(Utc::now());
    }

    /// Invariant check used by tests (TESTABLE PROPERTIES #1-#3).
    pub fn check_invariants(&self) -> Result<(), String> {
        for id in &self.completed_nodes {
            if !self.node_outcomes.contains_key(id) {
                return Err(format!("completed node '{id}' has no recorded outcome"));
            }
        }
        if self.status == RunStatus::Completed && self.completed_nodes.is_empty() {
            return Err("run marked COMPLETED with no completed nodes".to_string());
        }
        if self.status == RunStatus::Failed && self.error.is_none() {
            return Err("run marked FAILED with no error message".to_string());
        }
        Ok(())
    }
}
