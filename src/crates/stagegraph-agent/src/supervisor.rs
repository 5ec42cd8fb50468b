//! Sub-Agent Supervisor (§4.L): spawns, rendezvous-waits on, and closes
//! child sessions, enforcing a strictly-increasing depth bound.
//!
//! Grounded on forge-agent's `session::subagents` handle bookkeeping
//! (a `Running`/`Completed`/`Failed` status per handle, reconciled from
//! a background task) but simplified to match this spec exactly: no
//! `send_input`, and `wait` is a repeatable rendezvous rather than a
//! one-shot `JoinHandle::await` — §8 scenario S6 requires a *second*
//! `wait` on an already-completed handle to return immediately, so the
//! outcome is cached behind a [`tokio::sync::Notify`] rather than
//! consumed once. Depth is modeled as the arena §9 describes: the
//! supervisor (owned by the parent session) holds every handle; a
//! spawned child only carries a clone of the shared outcome slot, never
//! a reference back to its parent.

use crate::error::{Result, SessionError};
use crate::truncate::{truncate, TruncateMode};
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;
use uuid::Uuid;

/// §4.L: `wait(agent_id)` truncates a completed transcript to this many
/// characters from each end before returning it to the model.
const WAIT_RESULT_TRUNCATE_CHARS: usize = 20_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubAgentStatus {
    Running,
    Completed,
    Failed,
}

#[derive(Debug, Clone)]
enum Outcome {
    Completed(String),
    Failed(String),
}

struct Handle {
    outcome: Mutex<Option<Outcome>>,
    notify: Notify,
}

pub struct SubAgentSupervisor {
    depth: u32,
    max_depth: u32,
    handles: Mutex<HashMap<String, Arc<Handle>>>,
}

impl SubAgentSupervisor {
    pub fn new(depth: u32, max_depth: u32) -> Self {
        Self { depth, max_depth, handles: Mutex::new(HashMap::new()) }
    }

    /// This supervisor's own depth (0 for a top-level session); a child
    /// spawned from it is created at `depth + 1`.
    pub fn depth(&self) -> u32 {
        self.depth
    }

    pub fn max_depth(&self) -> u32 {
        self.max_depth
    }

    /// Register a new sub-agent and drive `future` to completion in the
    /// background. Fails with [`SessionError::SubAgentDepthExceeded`] at
    /// `maxSubagentDepth` without spawning anything.
    pub fn spawn_agent<F>(&self, future: F) -> Result<String>
    where
        F: Future<Output = std::result::Result<String, String>> + Send + 'static,
    {
        if self.depth >= self.max_depth {
            return Err(SessionError::SubAgentDepthExceeded(self.max_depth));
        }
        let id = Uuid::new_v4().to_string();
        let handle = Arc::new(Handle { outcome: Mutex::new(None), notify: Notify::new() });
        let background = handle.clone();
        tokio::spawn(async move {
            let outcome = match future.await {
                Ok(text) => Outcome::Completed(text),
                Err(message) => Outcome::Failed(message),
            };
            *background.outcome.lock().unwrap() = Some(outcome);
            background.notify.notify_waiters();
        });
        self.handles.lock().unwrap().insert(id.clone(), handle);
        Ok(id)
    }

    /// Current status of `agent_id`, if tracked.
    pub fn status(&self, agent_id: &str) -> Option<SubAgentStatus> {
        let handle = self.handles.lock().unwrap().get(agent_id)?.clone();
        let outcome = handle.outcome.lock().unwrap();
        Some(match &*outcome {
            None => SubAgentStatus::Running,
            Some(Outcome::Completed(_)) => SubAgentStatus::Completed,
            Some(Outcome::Failed(_)) => SubAgentStatus::Failed,
        })
    }

    /// Block until `agent_id` resolves (no timeout, per §4.L), returning
    /// its head/tail-truncated transcript. Calling `wait` again after
    /// completion returns the same cached result immediately — it is not
    /// consumed. Returns an error result (not a [`SessionError`]) when
    /// the agent failed, matching how every other tool reports failure
    /// to the model rather than to the session.
    pub async fn wait(&self, agent_id: &str) -> Result<(String, bool)> {
        let handle = self
            .handles
            .lock()
            .unwrap()
            .get(agent_id)
            .ok_or_else(|| SessionError::UnknownSubAgent(agent_id.to_string()))?
            .clone();
        loop {
            {
                let outcome = handle.outcome.lock().unwrap();
                match &*outcome {
                    Some(Outcome::Completed(text)) => {
                        return Ok((truncate(text, WAIT_RESULT_TRUNCATE_CHARS, TruncateMode::HeadTail), false));
                    }
                    Some(Outcome::Failed(message)) => return Ok((message.clone(), true)),
                    None => {}
                }
            }
            handle.notify.notified().await;
        }
    }

    /// Forgets the handle. Per §4.L this does NOT abort any in-flight
    /// child work — the background task keeps running to completion, it
    /// simply becomes unreachable from this supervisor.
    pub fn close_agent(&self, agent_id: &str) -> Result<()> {
        self.handles
            .lock()
            .unwrap()
            .remove(agent_id)
            .map(|_| ())
            .ok_or_else(|| SessionError::UnknownSubAgent(agent_id.to_string()))
    }
}
