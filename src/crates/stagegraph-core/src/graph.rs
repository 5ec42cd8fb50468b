//! The parsed-graph data model: [`Graph`], [`Node`], [`Edge`].
//!
//! A `Graph` is immutable once parsed from the DOT-subset DSL (see
//! [`crate::dsl`]). Nodes are polymorphic over a small capability set;
//! the concrete [`NodeType`] is either the explicit `type` attribute or
//! derived from the `shape` attribute (§4.F shape→type default table).

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// A node id, as it appears in the DSL (`node_id [k=v]`).
pub type NodeId = String;

/// The capability a node's handler implements. Either named explicitly via
/// the `type` node attribute, or inferred from `shape` by
/// [`NodeType::from_shape`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeType {
    Start,
    Exit,
    Conditional,
    CoderGen,
    WaitHuman,
    Tool,
    ParallelFanOut,
    ParallelFanIn,
    ManagerLoop,
}

impl NodeType {
    /// Parse the explicit `type=` node attribute. Accepts the canonical
    /// snake_case name and a handful of dotted aliases that appear in DSL
    /// authored against the shape-default table (e.g. `wait.human`).
    pub fn from_type_attr(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "start" => Some(Self::Start),
            "exit" => Some(Self::Exit),
            "conditional" => Some(Self::Conditional),
            "codergen" | "agent" | "coder_gen" => Some(Self::CoderGen),
            "human-gate" | "human_gate" | "wait.human" | "wait_human" => Some(Self::WaitHuman),
            "tool" => Some(Self::Tool),
            "parallel-fanout" | "parallel.fan_out" | "parallel_fan_out" | "parallel" => {
                Some(Self::ParallelFanOut)
            }
            "parallel-fanin" | "parallel.fan_in" | "parallel_fan_in" => Some(Self::ParallelFanIn),
            "manager-loop" | "stack.manager_loop" | "manager_loop" => Some(Self::ManagerLoop),
            _ => None,
        }
    }

    /// Map a DOT `shape` attribute to its default node type, per §4.F.
    pub fn from_shape(shape: &str) -> Option<Self> {
        match shape.trim().to_ascii_lowercase().as_str() {
            "mdiamond" => Some(Self::Start),
            "msquare" => Some(Self::Exit),
            "box" => Some(Self::CoderGen),
            "hexagon" => Some(Self::WaitHuman),
            "parallelogram" => Some(Self::Tool),
            "component" => Some(Self::ParallelFanOut),
            "tripleoctagon" => Some(Self::ParallelFanIn),
            "house" => Some(Self::ManagerLoop),
            "diamond" => Some(Self::Conditional),
            _ => None,
        }
    }
}

/// Attributes recognised on a `node_id [k=v, ...]` statement (§6).
///
/// Unrecognised keys (including the `manager.*` family consumed by the
/// manager-loop handler) are preserved in `extra` so handlers can read
/// their own namespaced configuration without the graph model needing to
/// know about every handler's private keys.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodeAttrs {
    pub label: Option<String>,
    pub shape: Option<String>,
    #[serde(rename = "type")]
    pub type_: Option<String>,
    pub prompt: Option<String>,
    pub max_retries: Option<u32>,
    #[serde(default)]
    pub goal_gate: bool,
    pub retry_target: Option<NodeId>,
    pub fallback_retry_target: Option<NodeId>,
    pub fidelity: Option<String>,
    pub thread_id: Option<String>,
    pub class: Option<String>,
    pub timeout: Option<Duration>,
    pub llm_model: Option<String>,
    pub llm_provider: Option<String>,
    pub reasoning_effort: Option<String>,
    pub auto_status: Option<String>,
    #[serde(default)]
    pub allow_partial: bool,
    pub tool_command: Option<String>,
    /// `human.default_choice`
    pub human_default_choice: Option<String>,
    pub join_policy: Option<String>,
    pub error_policy: Option<String>,
    pub max_parallel: Option<u32>,
    /// Everything else, including `manager.*` keys, verbatim.
    #[serde(default)]
    pub extra: HashMap<String, String>,
}

impl NodeAttrs {
    /// Resolve this node's [`NodeType`]: explicit `type` first, then the
    /// shape-implied default. Returns `None` if neither resolves, in which
    /// case the handler registry's default handler applies.
    pub fn resolve_type(&self) -> Option<NodeType> {
        self.type_
            .as_deref()
            .and_then(NodeType::from_type_attr)
            .or_else(|| self.shape.as_deref().and_then(NodeType::from_shape))
    }
}

/// A vertex in the graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    pub attrs: NodeAttrs,
}

/// Attributes recognised on an `a -> b [k=v]` statement (§6).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EdgeAttrs {
    pub label: Option<String>,
    pub condition: Option<String>,
    #[serde(default)]
    pub weight: i64,
    pub fidelity: Option<String>,
    pub thread_id: Option<String>,
    #[serde(default)]
    pub loop_restart: bool,
}

/// A directed edge. Multiple edges from the same node are permitted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Edge {
    pub from: NodeId,
    pub to: NodeId,
    pub attrs: EdgeAttrs,
}

/// Graph-level attributes recognised on `graph [k=v]` (§6).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GraphAttrs {
    pub goal: Option<String>,
    pub label: Option<String>,
    pub default_max_retry: Option<u32>,
    pub retry_target: Option<NodeId>,
    pub fallback_retry_target: Option<NodeId>,
    pub default_fidelity: Option<String>,
    pub rankdir: Option<String>,
}

/// An immutable, parsed graph: the output of [`crate::dsl::parse`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Graph {
    pub id: String,
    pub nodes: HashMap<NodeId, Node>,
    pub edges: Vec<Edge>,
    pub attrs: GraphAttrs,
}

impl Graph {
    /// Outgoing edges of `node_id`, in DSL declaration order.
    pub fn outgoing(&self, node_id: &str) -> Vec<&Edge> {
        self.edges.iter().filter(|e| e.from == node_id).collect()
    }

    /// Find the unique node whose resolved type is [`NodeType::Start`], if
    /// any. Graph validation requires exactly one.
    pub fn start_node(&self) -> Option<&Node> {
        self.nodes
            .values()
            .find(|n| n.attrs.resolve_type() == Some(NodeType::Start))
    }

    /// True if `node_id` resolves to a terminal ([`NodeType::Exit`]) node,
    /// or carries the conventional id `exit` with no other type resolved.
    pub fn is_terminal(&self, node_id: &str) -> bool {
        match self.nodes.get(node_id) {
            Some(n) => {
                n.attrs.resolve_type() == Some(NodeType::Exit)
                    || (node_id == "exit" && n.attrs.resolve_type().is_none())
            }
            None => false,
        }
    }

    /// Validate structural invariants: a resolvable start node, and every
    /// edge endpoint and retry-target naming a node that exists.
    pub fn validate(&self) -> Result<(), crate::error::EngineError> {
        use crate::error::EngineError;

        if self.start_node().is_none() {
            return Err(EngineError::GraphShape(
                "graph has no node resolving to type `start`".to_string(),
            ));
        }
        for edge in &self.edges {
            if !self.nodes.contains_key(&edge.from) {
                return Err(EngineError::GraphShape(format!(
                    "edge references unknown source node '{}'",
                    edge.from
                )));
            }
            if !self.nodes.contains_key(&edge.to) {
                return Err(EngineError::GraphShape(format!(
                    "edge references unknown target node '{}'",
                    edge.to
                )));
            }
        }
        for node in self.nodes.values() {
            for target in [&node.attrs.retry_target, &node.attrs.fallback_retry_target] {
                if let Some(target) = target {
                    if !self.nodes.contains_key(target) {
                        return Err(EngineError::GraphShape(format!(
                            "node '{}' retry target '{}' does not exist",
                            node.id, target
                        )));
                    }
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shape_defaults_match_table() {
        assert_eq!(NodeType::from_shape("Mdiamond"), Some(NodeType::Start));
        assert_eq!(NodeType::from_shape("Msquare"), Some(NodeType::Exit));
        assert_eq!(NodeType::from_shape("box"), Some(NodeType::CoderGen));
        assert_eq!(NodeType::from_shape("hexagon"), Some(NodeType::WaitHuman));
        assert_eq!(
            NodeType::from_shape("parallelogram"),
            Some(NodeType::Tool)
        );
        assert_eq!(
            NodeType::from_shape("component"),
            Some(NodeType::ParallelFanOut)
        );
        assert_eq!(
            NodeType::from_shape("tripleoctagon"),
            Some(NodeType::ParallelFanIn)
        );
        assert_eq!(NodeType::from_shape("house"), Some(NodeType::ManagerLoop));
        assert_eq!(
            NodeType::from_shape("diamond"),
            Some(NodeType::Conditional)
        );
        assert_eq!(NodeType::from_shape("unknown"), None);
    }

    #[test]
    fn explicit_type_wins_over_shape() {
        let attrs = NodeAttrs {
            type_: Some("tool".to_string()),
            shape: Some("Mdiamond".to_string()),
            ..Default::default()
        };
        assert_eq!(attrs.resolve_type(), Some(NodeType::Tool));
    }

    #[test]
    fn validate_rejects_dangling_edge() {
        let mut nodes = HashMap::new();
        nodes.insert(
            "start".to_string(),
            Node {
                id: "start".to_string(),
                attrs: NodeAttrs {
                    shape: Some("Mdiamond".to_string()),
                    ..Default::default()
                },
            },
        );
        let graph = Graph {
            id: "g".to_string(),
            nodes,
            edges: vec![Edge {
                from: "start".to_string(),
                to: "ghost".to_string(),
                attrs: EdgeAttrs::default(),
            }],
            attrs: GraphAttrs::default(),
        };
        assert!(graph.validate().is_err());
    }
}
