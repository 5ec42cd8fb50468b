//! The Pipeline Engine (§4.G): the core state machine driving a run from
//! its start node to a terminal node or failure.
//!
//! ```text
//! ENTER -> EXECUTE_ATTEMPT
//!   SUCCESS | PARTIAL_SUCCESS -> RECORD -> CHECKPOINT -> SELECT_EDGE -> next or finalize
//!   RETRY   -> attempts left?  sleep(delay) -> EXECUTE_ATTEMPT
//!              else allowPartial? synthesise PARTIAL_SUCCESS : synthesise FAIL
//!   FAIL    -> RECORD -> CHECKPOINT -> retry-target redirect or finalize FAILED
//!   (handler error) -> treated as RETRY until attempts exhausted, then FAIL
//! ```

use crate::checkpoint::Checkpoint;
use crate::context::Context;
use crate::dsl;
use crate::edge_selector;
use crate::event_bus::{Event, EventBus, Unsubscribe};
use crate::graph::{Graph, Node, NodeType};
use crate::handler::{HandlerRegistry, WaitHumanHandler};
use crate::human_gate::HumanGateTable;
use crate::outcome::{Outcome, OutcomeStatus};
use crate::persistence::RunsStore;
use crate::retry::RetryPolicy;
use crate::run::{Run, RunStatus};
use serde_json::json;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use uuid::Uuid;

/// Drives runs to completion. Holds the process-wide shared state named
/// in §9's "Global state" note (runs store, event bus, human-gate table)
/// as engine fields rather than module-level singletons, so multiple
/// engines can coexist in tests.
#[derive(Clone)]
pub struct PipelineEngine {
    runs: RunsStore,
    bus: EventBus,
    handlers: HandlerRegistry,
    human_gates: HumanGateTable,
    retry_policy: RetryPolicy,
    logs_root: PathBuf,
    human_gate_timeout: Duration,
    graphs: Arc<Mutex<HashMap<String, Graph>>>,
    contexts: Arc<Mutex<HashMap<String, Context>>>,
    node_retries: Arc<Mutex<HashMap<String, HashMap<String, u32>>>>,
}

impl PipelineEngine {
    pub fn new(runs: RunsStore, logs_root: impl Into<PathBuf>, handlers: HandlerRegistry) -> Self {
        Self {
            runs,
            bus: EventBus::new(),
            handlers,
            human_gates: HumanGateTable::new(),
            retry_policy: RetryPolicy::default(),
            logs_root: logs_root.into(),
            human_gate_timeout: crate::handler::DEFAULT_HUMAN_GATE_TIMEOUT,
            graphs: Arc::new(Mutex::new(HashMap::new())),
            contexts: Arc::new(Mutex::new(HashMap::new())),
            node_retries: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    pub fn with_human_gate_timeout(mut self, timeout: Duration) -> Self {
        self.human_gate_timeout = timeout;
        self
    }

    pub fn subscribe(
        &self,
        run_id: impl Into<String>,
        callback: impl Fn(&Event) + Send + Sync + 'static,
    ) -> Unsubscribe {
        self.bus.subscribe(run_id, callback)
    }

    pub async fn get_run(&self, id: &str) -> Option<Run> {
        self.runs.get(id).await
    }

    pub async fn get_all(&self) -> Vec<Run> {
        self.runs.all().await
    }

    /// Resolve a pending human-gate wait. Returns `false` if nothing was
    /// pending for `(run_id, node_id)`.
    pub async fn submit_human_answer(&self, run_id: &str, node_id: &str, text: String) -> bool {
        let resolved = self.human_gates.submit_answer(run_id, node_id, text.clone()).await;
        if resolved {
            self.bus.emit(
                Event::new("HUMAN_ANSWER", run_id.to_string())
                    .with("node", json!(node_id))
                    .with("text", json!(text)),
            );
        }
        resolved
    }

    /// Parse, validate, and drive a new run to completion (or failure).
    pub async fn start(&self, dsl_source: String) -> Run {
        self.start_with_id(Uuid::new_v4().to_string(), dsl_source).await
    }

    /// Like [`Self::start`], but with a caller-chosen run id. Lets a caller
    /// (e.g. `stagegraph-cli`) subscribe to the bus before the run begins
    /// emitting, since `EventBus::subscribe` is keyed by exact subject id
    /// and nothing about a run's events is buffered for a late joiner.
    pub async fn start_with_id(&self, run_id: String, dsl_source: String) -> Run {
        let logs_root = self.logs_root.join(&run_id);
        let mut run = Run::new(
            run_id.clone(),
            dsl_source.clone(),
            String::new(),
            None,
            logs_root.to_string_lossy().to_string(),
        );

        let graph = match dsl::parse(&dsl_source) {
            Ok(graph) => graph,
            Err(err) => {
                run.mark_failed(format!("parse error: {err}"));
                self.runs.upsert(run.clone()).await;
                self.emit_status(&run);
                return run;
            }
        };

        run.status = RunStatus::Validate;
        run.graph_id = graph.id.clone();
        run.goal = graph.attrs.goal.clone();
        run.status = RunStatus::Initialize;

        self.graphs.lock().await.insert(graph.id.clone(), graph.clone());
        self.contexts.lock().await.insert(run_id.clone(), Context::new());
        self.node_retries
            .lock()
            .await
            .insert(run_id.clone(), HashMap::new());

        run.status = RunStatus::Execute;
        self.runs.upsert(run.clone()).await;
        self.emit_status(&run);

        let Some(start_node) = graph.start_node() else {
            run.mark_failed("graph has no node resolving to type `start`");
            self.runs.upsert(run.clone()).await;
            self.emit_status(&run);
            return run;
        };
        let start_id = start_node.id.clone();

        self.drive(&mut run, &graph, start_id).await;

        self.contexts.lock().await.remove(&run_id);
        self.node_retries.lock().await.remove(&run_id);
        self.runs.upsert(run.clone()).await;
        self.emit_status(&run);
        run
    }

    fn emit_status(&self, run: &Run) {
        self.bus.emit(
            Event::new("STATUS_CHANGE", run.id.clone())
                .with("status", json!(run.status))
                .with("currentNode", json!(run.current_node)),
        );
    }

    /// The per-stage drive loop. Mutates `run` in place; returns once a
    /// terminal status (COMPLETED/FAILED) is reached, or a loop-restart
    /// hands off to a freshly started run.
    async fn drive(&self, run: &mut Run, graph: &Graph, mut current: String) {
        loop {
            if graph.is_terminal(&current) {
                self.finalize_at_terminal(run, graph, &current).await;
                return;
            }

            let Some(node) = graph.nodes.get(&current) else {
                run.mark_failed(format!("node not found: {current}"));
                return;
            };

            run.current_node = Some(node.id.clone());
            {
                let mut contexts = self.contexts.lock().await;
                let context = contexts.entry(run.id.clone()).or_default();
                context.set("current_node", json!(node.id));
            }

            let outcome = self.execute_and_record_node(run, graph, node).await;

            let outgoing = graph.outgoing(&node.id);
            let context = {
                let contexts = self.contexts.lock().await;
                contexts.get(&run.id).cloned().unwrap_or_default()
            };
            match edge_selector::select(&outgoing, &outcome, &context) {
                Some(edge) => {
                    self.bus.emit(
                        Event::new("EDGE_SELECTED", run.id.clone())
                            .with("from", json!(node.id))
                            .with("to", json!(edge.to)),
                    );
                    if edge.attrs.loop_restart {
                        let new_run = Box::pin(self.start(run.source.clone())).await;
                        run.mark_completed();
                        run.error = None;
                        self.bus.emit(
                            Event::new("LOG", run.id.clone()).with(
                                "message",
                                json!(format!("loop restart: new run {}", new_run.id)),
                            ),
                        );
                        return;
                    }
                    current = edge.to.clone();
                }
                // No edge selected. If the outcome was FAIL, fall back to a
                // retry-target redirect (§4.G); otherwise this is a dead end.
                None if outcome.status == Some(OutcomeStatus::Fail) => {
                    match self.retry_target_for(node, graph) {
                        Some(target) if graph.nodes.contains_key(&target) => {
                            current = target;
                        }
                        _ => {
                            run.mark_failed(format!(
                                "node '{}' failed with no retry target: {}",
                                node.id,
                                outcome.failure_reason.as_deref().unwrap_or("no reason given")
                            ));
                            return;
                        }
                    }
                }
                None => {
                    run.mark_failed(format!("node '{}' has no viable outgoing edge", node.id));
                    return;
                }
            }
        }
    }

    /// Executes one node's handler (with retry), records the outcome into
    /// `run` and the run's [`Context`], and emits the paired
    /// `NODE_START`/`NODE_COMPLETE` (or `NODE_FAIL`) events plus a
    /// checkpoint. Shared between the main drive loop and terminal-node
    /// completion so a run's terminal node is recorded into
    /// `completed_nodes`/`node_outcomes` the same way any other node is
    /// (§3 `completedNodes`, TESTABLE PROPERTY #1).
    async fn execute_and_record_node(&self, run: &mut Run, graph: &Graph, node: &Node) -> Outcome {
        self.bus.emit(
            Event::new("NODE_START", run.id.clone()).with("node", json!(node.id)),
        );

        let outcome = self.execute_with_retry(run, graph, node).await;

        {
            let mut contexts = self.contexts.lock().await;
            let context = contexts.entry(run.id.clone()).or_default();
            context.apply_updates(&outcome.context_updates);
            if let Some(status) = outcome.status {
                context.set("outcome", json!(status.as_context_value()));
            }
            if let Some(label) = &outcome.preferred_label {
                context.set("preferred_label", json!(label));
            }
        }

        run.record_completion(node.id.clone(), outcome.clone());
        self.bus.emit(
            Event::new(
                if outcome.status == Some(OutcomeStatus::Fail) {
                    "NODE_FAIL"
                } else {
                    "NODE_COMPLETE"
                },
                run.id.clone(),
            )
            .with("node", json!(node.id))
            .with("status", json!(outcome.status)),
        );

        self.checkpoint(run).await;
        self.runs.upsert(run.clone()).await;

        outcome
    }

    /// `node.retryTarget OR graph.retryTarget`, used for the FAIL redirect
    /// (§4.G "Retry-target redirect on failure").
    fn retry_target_for(&self, node: &Node, graph: &Graph) -> Option<String> {
        node.attrs
            .retry_target
            .clone()
            .or_else(|| graph.attrs.retry_target.clone())
    }

    /// Goal-gate enforcement on entering a terminal node (§4.G). Redirects
    /// to the first available of `node.retryTarget`, `node.fallbackRetryTarget`,
    /// `graph.retryTarget`, `graph.fallbackRetryTarget` if some gate failed.
    async fn finalize_at_terminal(&self, run: &mut Run, graph: &Graph, terminal_id: &str) {
        let terminal_node = graph.nodes.get(terminal_id);

        let failed_gate: Option<String> = run
            .completed_nodes
            .iter()
            .find(|id| {
                graph
                    .nodes
                    .get(*id)
                    .map(|n| n.attrs.goal_gate)
                    .unwrap_or(false)
                    && !run
                        .node_outcomes
                        .get(*id)
                        .map(Outcome::satisfies_goal_gate)
                        .unwrap_or(false)
            })
            .cloned();

        match failed_gate {
            None => {
                run.current_node = Some(terminal_id.to_string());

                // `is_terminal` guarantees `terminal_node` is `Some`. Most
                // terminal nodes resolve to `NodeType::Exit` and run
                // through the handler registry like any other node so
                // they land in `completed_nodes`/`node_outcomes`; the
                // conventional bare `exit` id with no resolvable type has
                // no handler to run, so its SUCCESS outcome is synthesised
                // directly.
                if let Some(node) = terminal_node {
                    if node.attrs.resolve_type() == Some(NodeType::Exit) {
                        {
                            let mut contexts = self.contexts.lock().await;
                            let context = contexts.entry(run.id.clone()).or_default();
                            context.set("current_node", json!(node.id));
                        }
                        self.execute_and_record_node(run, graph, node).await;
                    } else {
                        run.record_completion(terminal_id.to_string(), Outcome::success());
                        self.bus.emit(
                            Event::new("NODE_COMPLETE", run.id.clone())
                                .with("node", json!(terminal_id))
                                .with("status", json!(Some(OutcomeStatus::Success))),
                        );
                        self.checkpoint(run).await;
                        self.runs.upsert(run.clone()).await;
                    }
                }

                run.mark_completed();
                self.bus.emit(Event::new("STATUS_CHANGE", run.id.clone()).with(
                    "status",
                    json!(RunStatus::Completed),
                ));
            }
            Some(gate_node_id) => {
                let target = terminal_node.and_then(|n| n.attrs.retry_target.clone())
                    .or_else(|| terminal_node.and_then(|n| n.attrs.fallback_retry_target.clone()))
                    .or_else(|| graph.attrs.retry_target.clone())
                    .or_else(|| graph.attrs.fallback_retry_target.clone());
                match target {
                    Some(target) if graph.nodes.contains_key(&target) => {
                        self.bus.emit(
                            Event::new("LOG", run.id.clone()).with(
                                "message",
                                json!(format!(
                                    "goal gate failed at '{gate_node_id}', redirecting to '{target}'"
                                )),
                            ),
                        );
                        // Re-enter the drive loop at the redirect target.
                        Box::pin(self.drive(run, graph, target)).await;
                    }
                    _ => {
                        run.mark_failed(format!(
                            "goal gate failed at node '{gate_node_id}' with no retry target"
                        ));
                    }
                }
            }
        }
    }

    /// Runs the attempt loop for one node: retries on RETRY/handler-error
    /// until `maxAttempts`, then synthesises PARTIAL_SUCCESS (if
    /// `allowPartial`) or FAIL.
    async fn execute_with_retry(&self, run: &Run, graph: &Graph, node: &Node) -> Outcome {
        let max_attempts = RetryPolicy::max_attempts(node.attrs.max_retries, graph.attrs.default_max_retry);
        let mut attempt = 1u32;
        let mut retries_used = 0u32;

        loop {
            let context = {
                let contexts = self.contexts.lock().await;
                contexts.get(&run.id).cloned().unwrap_or_default()
            };
            let handler = self.resolve_handler(node, graph, run);
            let span = tracing::info_span!("execute_stage", run_id = %run.id, node = %node.id, attempt);
            let _enter = span.enter();
            let result = handler.execute(node, &context).await;
            drop(_enter);

            let should_retry = match &result {
                Ok(outcome) => outcome.status == Some(OutcomeStatus::Retry),
                Err(_) => true,
            };

            if !should_retry {
                return result.unwrap_or_else(|err| Outcome::fail(err.to_string()));
            }

            if attempt < max_attempts {
                retries_used += 1;
                self.set_node_retries(&run.id, &node.id, retries_used).await;
                let delay = self.retry_policy.delay(attempt);
                tokio::time::sleep(delay).await;
                attempt += 1;
                continue;
            }

            self.set_node_retries(&run.id, &node.id, retries_used).await;
            return if node.attrs.allow_partial {
                let reason = match &result {
                    Ok(outcome) => outcome.failure_reason.clone(),
                    Err(err) => Some(err.to_string()),
                };
                let mut synthesised = Outcome::partial_success();
                if let Some(reason) = reason {
                    synthesised = synthesised
                        .with_context_update("retry_exhausted_reason".to_string(), json!(reason));
                }
                synthesised
            } else {
                Outcome::fail(match result {
                    Ok(outcome) => outcome
                        .failure_reason
                        .unwrap_or_else(|| "retry attempts exhausted".to_string()),
                    Err(err) => err.to_string(),
                })
            };
        }
    }

    async fn set_node_retries(&self, run_id: &str, node_id: &str, count: u32) {
        let mut retries = self.node_retries.lock().await;
        retries
            .entry(run_id.to_string())
            .or_default()
            .insert(node_id.to_string(), count);
    }

    /// `wait.human` is constructed fresh per attempt (it needs the run id
    /// and the node's outgoing edges); every other type resolves through
    /// the shared [`HandlerRegistry`].
    fn resolve_handler(&self, node: &Node, graph: &Graph, run: &Run) -> Arc<dyn crate::handler::Handler> {
        if node.attrs.resolve_type() == Some(crate::graph::NodeType::WaitHuman) {
            let outgoing = graph.outgoing(&node.id).into_iter().cloned().collect();
            return Arc::new(WaitHumanHandler::new(
                self.human_gates.clone(),
                self.bus.clone(),
                run.id.clone(),
                node.attrs.timeout.unwrap_or(self.human_gate_timeout),
                outgoing,
            ));
        }
        self.handlers.resolve(node)
    }

    async fn checkpoint(&self, run: &Run) {
        let context_values = {
            let contexts = self.contexts.lock().await;
            contexts.get(&run.id).map(Context::snapshot).unwrap_or_default()
        };
        let node_retries = {
            let retries = self.node_retries.lock().await;
            retries.get(&run.id).cloned().unwrap_or_default()
        };
        let checkpoint = Checkpoint::new(
            run.current_node.clone(),
            run.completed_nodes.clone(),
            node_retries,
            context_values,
            Vec::new(),
        );
        let logs_root = PathBuf::from(&run.logs_root);
        checkpoint.write_best_effort(&logs_root);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Stands in for the real `codergen` handler `stagegraph-agent` wires
    /// in via `register_executor`; these unit tests only care about the
    /// engine's own state machine, not agent behaviour.
    struct AlwaysSucceed;

    #[async_trait::async_trait]
    impl crate::handler::Handler for AlwaysSucceed {
        async fn execute(&self, _node: &Node, _context: &Context) -> anyhow::Result<Outcome> {
            Ok(Outcome::success())
        }
    }

    async fn engine() -> PipelineEngine {
        let dir = tempfile::tempdir().unwrap();
        let runs = RunsStore::init(dir.path().join("runs.json")).await.unwrap();
        let mut handlers = HandlerRegistry::new();
        handlers.register(crate::graph::NodeType::CoderGen, Arc::new(AlwaysSucceed));
        PipelineEngine::new(runs, dir.path().join("logs"), handlers)
            .with_retry_policy(RetryPolicy {
                initial: Duration::from_millis(1),
                factor: 1.0,
                max_delay: Duration::from_millis(5),
            })
    }

    #[tokio::test]
    async fn diamond_with_condition_completes() {
        let engine = engine().await;
        let dsl = r#"
            digraph {
                start [shape=Mdiamond]
                a [shape=box]
                decision [shape=diamond]
                win [shape=box]
                done [shape=Msquare]
                start -> a
                a -> decision
                decision -> win [condition="outcome=success"]
                win -> done
            }
        "#;
        let run = engine.start(dsl.to_string()).await;
        assert_eq!(run.status, RunStatus::Completed);
        assert_eq!(
            run.completed_nodes,
            vec!["start", "a", "decision", "win", "done"]
        );
    }

    #[tokio::test]
    async fn missing_start_node_fails_fast() {
        let engine = engine().await;
        let run = engine.start("digraph { a [shape=box] }".to_string()).await;
        assert_eq!(run.status, RunStatus::Failed);
    }

    #[tokio::test]
    async fn goal_gate_pass_completes_normally() {
        let engine = engine().await;
        let dsl = r#"
            digraph {
                graph [retry_target=a]
                start [shape=Mdiamond]
                a [shape=box]
                g [shape=box, goal_gate=true, type=conditional]
                exit [shape=Msquare]
                start -> a
                a -> g
                g -> exit [condition="outcome=fail"]
                g -> exit [condition="outcome=success"]
            }
        "#;
        // `g` resolves to conditional (always SUCCESS), so the gate passes
        // here; this exercises the pass-through path deterministically
        // without a custom FAIL-returning handler.
        let run = engine.start(dsl.to_string()).await;
        assert_eq!(run.status, RunStatus::Completed);
    }

    /// Fails on its first invocation, succeeds on every one after —
    /// enough to exercise a redirect without looping forever.
    struct FailOnce(std::sync::atomic::AtomicBool);

    #[async_trait::async_trait]
    impl crate::handler::Handler for FailOnce {
        async fn execute(&self, _node: &Node, _context: &Context) -> anyhow::Result<Outcome> {
            if !self.0.swap(true, std::sync::atomic::Ordering::SeqCst) {
                Ok(Outcome::fail("simulated failure"))
            } else {
                Ok(Outcome::success())
            }
        }
    }

    #[tokio::test]
    async fn goal_gate_failure_redirects_to_retry_target() {
        let mut handlers = HandlerRegistry::new();
        handlers.register(crate::graph::NodeType::CoderGen, Arc::new(AlwaysSucceed));
        handlers.register(
            crate::graph::NodeType::Tool,
            Arc::new(FailOnce(std::sync::atomic::AtomicBool::new(false))),
        );
        let dir = tempfile::tempdir().unwrap();
        let runs = RunsStore::init(dir.path().join("runs.json")).await.unwrap();
        let engine = PipelineEngine::new(runs, dir.path().join("logs"), handlers);
        let dsl = r#"
            digraph {
                graph [retry_target=a]
                start [shape=Mdiamond]
                a [shape=box]
                g [shape=parallelogram, goal_gate=true]
                exit [shape=Msquare]
                start -> a
                a -> g
                g -> exit
            }
        "#;
        // `g` resolves to `tool` and FAILs on its first run via the
        // registered handler; `g -> exit` is unconditional so edge
        // selection still routes there despite the FAIL. Entering `exit`
        // then trips goal-gate enforcement (`g` is gated and did not
        // SUCCEED/PARTIAL_SUCCESS), redirecting via `graph.retryTarget=a`.
        // The second pass through `g` succeeds and the gate is satisfied.
        let run = engine.start(dsl.to_string()).await;
        assert_eq!(run.status, RunStatus::Completed);
        assert_eq!(
            run.completed_nodes.iter().filter(|id| *id == "g").count(),
            2
        );
    }
}
