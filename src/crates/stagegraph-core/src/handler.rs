//! Handler Registry (§4.F) and the built-in stage handlers.
//!
//! A [`Handler`] executes one attempt of one node and produces an
//! [`Outcome`]; a thrown/returned error is treated by the engine as a
//! RETRY until attempts are exhausted (§4.G). `start`, `exit`,
//! `conditional`, `wait.human`, `parallel.fan_out`/`fan_in` ship with
//! built-in behaviour; `codergen`/`tool`/`stack.manager_loop` delegate to
//! a pluggable executor injected by the caller (`stagegraph-agent`,
//! `stagegraph-toolkit`, or a CLI harness), since the LLM client and
//! shell sandbox are external collaborators (§1).

use crate::context::Context;
use crate::event_bus::{Event, EventBus};
use crate::graph::{Node, NodeType};
use crate::human_gate::{choice_from_edge, match_answer, Choice, HumanGateTable};
use crate::outcome::Outcome;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

pub const DEFAULT_HUMAN_GATE_TIMEOUT: Duration = Duration::from_secs(300);

#[async_trait]
pub trait Handler: Send + Sync {
    async fn execute(&self, node: &Node, context: &Context) -> anyhow::Result<Outcome>;
}

/// Executes an agent session (or shell tool command) for a `codergen`
/// or `tool` node. Implemented by `stagegraph-agent`/`stagegraph-toolkit`
/// and registered into the engine's [`HandlerRegistry`]; the core crate
/// only needs the contract.
#[async_trait]
pub trait StageExecutor: Send + Sync {
    async fn run(&self, node: &Node, context: &Context) -> anyhow::Result<Outcome>;
}

struct StartHandler;

#[async_trait]
impl Handler for StartHandler {
    async fn execute(&self, _node: &Node, _context: &Context) -> anyhow::Result<Outcome> {
        Ok(Outcome::success())
    }
}

struct ExitHandler;

#[async_trait]
impl Handler for ExitHandler {
    async fn execute(&self, _node: &Node, _context: &Context) -> anyhow::Result<Outcome> {
        // Goal-gate enforcement happens in the engine before a terminal
        // node's handler would even run; reaching here means the gates
        // already passed (or there were none).
        Ok(Outcome::success())
    }
}

/// A conditional node does no work of its own: its outgoing edges carry
/// the `condition` attribute, and §4.D's edge selector does the routing
/// against the current outcome+context.
struct ConditionalHandler;

#[async_trait]
impl Handler for ConditionalHandler {
    async fn execute(&self, _node: &Node, _context: &Context) -> anyhow::Result<Outcome> {
        Ok(Outcome::success())
    }
}

/// A structural join/split point. The actual parallel dispatch of a
/// node's siblings is an engine-level concern (not yet part of this
/// spec's core loop); the handler itself is a pass-through so the graph
/// can still be driven serially when only one branch is populated.
struct ParallelPassthroughHandler;

#[async_trait]
impl Handler for ParallelPassthroughHandler {
    async fn execute(&self, _node: &Node, _context: &Context) -> anyhow::Result<Outcome> {
        Ok(Outcome::success())
    }
}

/// Waits for a human to answer via [`HumanGateTable::submit_answer`],
/// emitting a `HUMAN_GATE` event describing the enumerated choices
/// first. On timeout: the node's default choice (if any) resolves the
/// wait as SUCCESS; otherwise RETRY with reason "timeout, no default".
pub struct WaitHumanHandler {
    table: HumanGateTable,
    bus: EventBus,
    run_id: String,
    timeout: Duration,
    /// Outgoing edges of the node, supplied by the caller because the
    /// handler has no graph reference of its own.
    outgoing: Vec<crate::graph::Edge>,
}

impl WaitHumanHandler {
    pub fn new(
        table: HumanGateTable,
        bus: EventBus,
        run_id: String,
        timeout: Duration,
        outgoing: Vec<crate::graph::Edge>,
    ) -> Self {
        Self {
            table,
            bus,
            run_id,
            timeout,
            outgoing,
        }
    }
}

#[async_trait]
impl Handler for WaitHumanHandler {
    async fn execute(&self, node: &Node, _context: &Context) -> anyhow::Result<Outcome> {
        let choices: Vec<Choice> = self.outgoing.iter().map(choice_from_edge).collect();
        let rx = self.table.register(&self.run_id, &node.id).await;

        self.bus.emit(
            Event::new("HUMAN_GATE", self.run_id.clone())
                .with("node", serde_json::json!(node.id))
                .with(
                    "choices",
                    serde_json::to_value(&choices).unwrap_or_default(),
                ),
        );

        match tokio::time::timeout(self.timeout, rx).await {
            Ok(Ok(answer)) => {
                let choice = match_answer(&answer, &choices);
                let mut outcome = Outcome::success();
                if let Some(choice) = choice {
                    outcome = outcome.with_suggested_next_ids(vec![choice.to_node.clone()]);
                }
                Ok(outcome)
            }
            Ok(Err(_)) | Err(_) => {
                self.table.cancel(&self.run_id, &node.id).await;
                if let Some(default_choice) = &node.attrs.human_default_choice {
                    if let Some(choice) = match_answer(default_choice, &choices) {
                        return Ok(Outcome::success()
                            .with_suggested_next_ids(vec![choice.to_node.clone()])
                            .with_context_update(
                                "human_gate_timeout".to_string(),
                                serde_json::json!(true),
                            ));
                    }
                }
                Ok(Outcome::retry().with_context_update(
                    "failure_reason".to_string(),
                    serde_json::json!("timeout, no default"),
                ))
            }
        }
    }
}

/// A manager-loop stage (`stack.manager_loop`, shape `house`): polls the
/// run [`Context`] for its stop condition, waking at most once per
/// `manager.poll_interval` and giving up once `manager.max_cycles` is
/// exhausted (§5 "Manager-loop stages have both a max-cycle cap and a
/// poll-interval; polling wakes at most once per interval and checks the
/// stop condition."). `manager.stop_condition` is a condition expression
/// (§4.C) evaluated against the context each cycle; the node succeeds the
/// moment it's satisfied, and fails if the cap is reached first.
struct ManagerLoopHandler;

#[async_trait]
impl Handler for ManagerLoopHandler {
    async fn execute(&self, node: &Node, context: &Context) -> anyhow::Result<Outcome> {
        let max_cycles = node
            .attrs
            .extra
            .get("manager.max_cycles")
            .and_then(|v| v.parse::<u32>().ok())
            .unwrap_or(1000)
            .max(1);
        let poll_interval = node
            .attrs
            .extra
            .get("manager.poll_interval")
            .and_then(|v| crate::dsl::parse_duration(v))
            .unwrap_or(Duration::from_secs(45));
        let stop_condition = node
            .attrs
            .extra
            .get("manager.stop_condition")
            .map(|s| s.trim().to_string())
            .unwrap_or_default();

        for cycle in 1..=max_cycles {
            if !stop_condition.is_empty()
                && crate::condition::evaluate(&stop_condition, &Outcome::default(), context)
            {
                return Ok(Outcome::success()
                    .with_context_update("manager.cycles".to_string(), serde_json::json!(cycle))
                    .with_context_update(
                        "manager.poll_interval_ms".to_string(),
                        serde_json::json!(poll_interval.as_millis() as u64),
                    ));
            }
            if cycle < max_cycles && !poll_interval.is_zero() {
                tokio::time::sleep(poll_interval).await;
            }
        }

        Ok(Outcome::fail(format!(
            "manager loop exhausted {max_cycles} cycle(s) without satisfying its stop condition"
        )))
    }
}

/// Delegates to an injected [`StageExecutor`] — the bridge to
/// `stagegraph-agent`'s Agent Session for `codergen` nodes and to
/// `stagegraph-toolkit`'s shell runner for `tool` nodes.
struct DelegatingHandler {
    executor: Arc<dyn StageExecutor>,
}

#[async_trait]
impl Handler for DelegatingHandler {
    async fn execute(&self, node: &Node, context: &Context) -> anyhow::Result<Outcome> {
        self.executor.run(node, context).await
    }
}

/// Falls back when no handler is registered for a resolved [`NodeType`]
/// and no shape/type maps to one: a node the registry genuinely doesn't
/// know what to do with fails outright rather than silently no-opping.
struct UnresolvedHandler;

#[async_trait]
impl Handler for UnresolvedHandler {
    async fn execute(&self, node: &Node, _context: &Context) -> anyhow::Result<Outcome> {
        Ok(Outcome::fail(format!(
            "no handler registered for node '{}'",
            node.id
        )))
    }
}

/// Maps [`NodeType`] to a [`Handler`], falling back to the built-in
/// default when a type has no registered (or delegated) handler.
#[derive(Clone)]
pub struct HandlerRegistry {
    handlers: HashMap<NodeType, Arc<dyn Handler>>,
    default: Arc<dyn Handler>,
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        let mut handlers: HashMap<NodeType, Arc<dyn Handler>> = HashMap::new();
        handlers.insert(NodeType::Start, Arc::new(StartHandler));
        handlers.insert(NodeType::Exit, Arc::new(ExitHandler));
        handlers.insert(NodeType::Conditional, Arc::new(ConditionalHandler));
        handlers.insert(NodeType::ParallelFanOut, Arc::new(ParallelPassthroughHandler));
        handlers.insert(NodeType::ParallelFanIn, Arc::new(ParallelPassthroughHandler));
        handlers.insert(NodeType::ManagerLoop, Arc::new(ManagerLoopHandler));
        Self {
            handlers,
            default: Arc::new(UnresolvedHandler),
        }
    }
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, node_type: NodeType, handler: Arc<dyn Handler>) {
        self.handlers.insert(node_type, handler);
    }

    pub fn register_executor(&mut self, node_type: NodeType, executor: Arc<dyn StageExecutor>) {
        self.handlers
            .insert(node_type, Arc::new(DelegatingHandler { executor }));
    }

    /// Resolve the handler for `node`: explicit registration for its
    /// resolved [`NodeType`], else the default handler.
    pub fn resolve(&self, node: &Node) -> Arc<dyn Handler> {
        match node.attrs.resolve_type() {
            Some(node_type) => self
                .handlers
                .get(&node_type)
                .cloned()
                .unwrap_or_else(|| self.default.clone()),
            None => self.default.clone(),
        }
    }
}
