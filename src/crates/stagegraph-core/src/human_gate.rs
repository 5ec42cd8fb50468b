//! Human Gate Rendezvous (§4.H): a process-wide table of pending
//! wait-for-human prompts, each resolved at most once by a submitted
//! answer or a timeout.

use crate::graph::Edge;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{oneshot, Mutex};

/// One selectable response to a human-gate prompt, derived from an
/// outgoing edge's label.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Choice {
    pub key: String,
    pub label: String,
    pub to_node: String,
}

/// Parse `[K] label`, `K) label`, or `K - label` accelerators out of an
/// edge label; otherwise the key is the first alphanumeric character of
/// the label, uppercased. Labelless edges fall back to the `to` id.
pub fn choice_from_edge(edge: &Edge) -> Choice {
    let label = edge
        .attrs
        .label
        .clone()
        .unwrap_or_else(|| edge.to.clone());
    let key = extract_key(&label);
    Choice {
        key,
        label,
        to_node: edge.to.clone(),
    }
}

fn extract_key(label: &str) -> String {
    let trimmed = label.trim();
    if let Some(rest) = trimmed.strip_prefix('[') {
        if let Some(end) = rest.find(']') {
            return rest[..end].trim().to_uppercase();
        }
    }
    if let Some(idx) = trimmed.find(')') {
        let (head, _) = trimmed.split_at(idx);
        if !head.is_empty() && head.chars().all(|c| c.is_alphanumeric()) {
            return head.to_uppercase();
        }
    }
    if let Some(idx) = trimmed.find(" - ") {
        let head = &trimmed[..idx];
        if !head.is_empty() && head.chars().all(|c| c.is_alphanumeric()) {
            return head.to_uppercase();
        }
    }
    trimmed
        .chars()
        .find(|c| c.is_alphanumeric())
        .map(|c| c.to_uppercase().to_string())
        .unwrap_or_default()
}

/// Match a submitted answer against the enumerated choices: normalised
/// label equality, then case-insensitive key equality, then the first
/// choice as a fallback. Returns `None` only if `choices` is empty.
pub fn match_answer<'a>(answer: &str, choices: &'a [Choice]) -> Option<&'a Choice> {
    let normalised = |s: &str| s.trim().to_lowercase();
    let wanted = normalised(answer);
    if let Some(choice) = choices.iter().find(|c| normalised(&c.label) == wanted) {
        return Some(choice);
    }
    if let Some(choice) = choices
        .iter()
        .find(|c| c.key.to_lowercase() == answer.trim().to_lowercase())
    {
        return Some(choice);
    }
    choices.first()
}

/// The resolved outcome of a pending gate: either a human answer, or
/// notice that the resolver was cancelled without one (e.g. run aborted).
pub type GateAnswer = String;

struct Pending {
    sender: oneshot::Sender<GateAnswer>,
}

/// Process-wide table of pending human-gate rendezvous points, keyed by
/// `(runId, nodeId)`. Each entry is single-shot: the first `submit_answer`
/// call consumes it.
#[derive(Clone, Default)]
pub struct HumanGateTable {
    pending: Arc<Mutex<HashMap<(String, String), Pending>>>,
}

impl HumanGateTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a wait for `(run_id, node_id)`, returning a receiver that
    /// resolves when an answer is submitted. Overwrites (and silently
    /// drops) any prior unresolved wait for the same key.
    pub async fn register(&self, run_id: &str, node_id: &str) -> oneshot::Receiver<GateAnswer> {
        let (tx, rx) = oneshot::channel();
        self.pending
            .lock()
            .await
            .insert((run_id.to_string(), node_id.to_string()), Pending { sender: tx });
        rx
    }

    /// Resolve a pending wait. Returns `false` if nothing was pending for
    /// this key (already resolved, timed out, or never registered).
    pub async fn submit_answer(&self, run_id: &str, node_id: &str, text: String) -> bool {
        let pending = self
            .pending
            .lock()
            .await
            .remove(&(run_id.to_string(), node_id.to_string()));
        match pending {
            Some(entry) => entry.sender.send(text).is_ok(),
            None => false,
        }
    }

    /// Drop a registration without resolving it, e.g. after a timeout has
    /// already been handled by the caller.
    pub async fn cancel(&self, run_id: &str, node_id: &str) {
        self.pending
            .lock()
            .await
            .remove(&(run_id.to_string(), node_id.to_string()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::EdgeAttrs;

    fn edge_with_label(label: &str, to: &str) -> Edge {
        Edge {
            from: "A".to_string(),
            to: to.to_string(),
            attrs: EdgeAttrs {
                label: Some(label.to_string()),
                ..Default::default()
            },
        }
    }

    #[test]
    fn extracts_bracket_accelerator() {
        let choice = choice_from_edge(&edge_with_label("[Y] Yes, proceed", "B"));
        assert_eq!(choice.key, "Y");
    }

    #[test]
    fn extracts_paren_accelerator() {
        let choice = choice_from_edge(&edge_with_label("N) No, stop", "B"));
        assert_eq!(choice.key, "N");
    }

    #[test]
    fn extracts_dash_accelerator() {
        let choice = choice_from_edge(&edge_with_label("R - Retry the stage", "B"));
        assert_eq!(choice.key, "R");
    }

    #[test]
    fn falls_back_to_first_alphanumeric() {
        let choice = choice_from_edge(&edge_with_label("approve this change", "B"));
        assert_eq!(choice.key, "A");
    }

    #[test]
    fn match_prefers_label_then_key_then_first() {
        let choices = vec![
            Choice { key: "Y".into(), label: "[Y] Yes".into(), to_node: "B".into() },
            Choice { key: "N".into(), label: "[N] No".into(), to_node: "C".into() },
        ];
        assert_eq!(match_answer("[N] No", &choices).unwrap().to_node, "C");
        assert_eq!(match_answer("y", &choices).unwrap().to_node, "B");
        assert_eq!(match_answer("nonsense", &choices).unwrap().to_node, "B");
    }

    #[tokio::test]
    async fn register_then_submit_resolves_the_wait() {
        let table = HumanGateTable::new();
        let rx = table.register("run1", "gate").await;
        assert!(table.submit_answer("run1", "gate", "Y".to_string()).await);
        assert_eq!(rx.await.unwrap(), "Y");
    }

    #[tokio::test]
    async fn submit_without_pending_returns_false() {
        let table = HumanGateTable::new();
        assert!(!table.submit_answer("run1", "gate", "Y".to_string()).await);
    }
}
