//! End-to-end engine scenarios S1-S3 (spec §8) plus the run-invariant
//! checks (#1-#4) they exercise. Each test drives a real
//! `PipelineEngine` against a small DOT graph and a handful of scripted
//! `Handler`s that stand in for a real `codergen`/`tool` executor.

use async_trait::async_trait;
use stagegraph_core::context::Context;
use stagegraph_core::engine::PipelineEngine;
use stagegraph_core::graph::{Node, NodeType};
use stagegraph_core::handler::{Handler, HandlerRegistry};
use stagegraph_core::outcome::Outcome;
use stagegraph_core::persistence::RunsStore;
use stagegraph_core::retry::RetryPolicy;
use stagegraph_core::run::RunStatus;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Always reports SUCCESS, regardless of node/context. Stands in for a
/// `codergen`/`tool` node whose real work always succeeds.
struct AlwaysSucceed;

#[async_trait]
impl Handler for AlwaysSucceed {
    async fn execute(&self, _node: &Node, _context: &Context) -> anyhow::Result<Outcome> {
        Ok(Outcome::success())
    }
}

/// Always reports RETRY. Used to drive S2's "exhaust all attempts"
/// scenario.
struct AlwaysRetry {
    calls: AtomicU32,
}

#[async_trait]
impl Handler for AlwaysRetry {
    async fn execute(&self, _node: &Node, _context: &Context) -> anyhow::Result<Outcome> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(Outcome::retry())
    }
}

/// FAILs on its first call, SUCCEEDs on every call after. Used to drive
/// S3's goal-gate redirect-then-recover scenario.
struct FailThenSucceed {
    calls: AtomicU32,
}

#[async_trait]
impl Handler for FailThenSucceed {
    async fn execute(&self, _node: &Node, _context: &Context) -> anyhow::Result<Outcome> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if call == 1 {
            Ok(Outcome::fail("first attempt deliberately fails"))
        } else {
            Ok(Outcome::success())
        }
    }
}

/// Always FAILs. Used for S3's no-retry-target branch.
struct AlwaysFail;

#[async_trait]
impl Handler for AlwaysFail {
    async fn execute(&self, _node: &Node, _context: &Context) -> anyhow::Result<Outcome> {
        Ok(Outcome::fail("unrecoverable"))
    }
}

async fn engine_with(handlers: HandlerRegistry) -> (PipelineEngine, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let runs = RunsStore::init(dir.path().join("runs.json")).await.unwrap();
    let engine = PipelineEngine::new(runs, dir.path().join("logs"), handlers).with_retry_policy(
        RetryPolicy {
            initial: Duration::from_millis(1),
            factor: 1.0,
            max_delay: Duration::from_millis(5),
        },
    );
    (engine, dir)
}

/// S1 — diamond with condition: `decision`'s own outcome (always SUCCESS
/// via the built-in `ConditionalHandler`) selects the `win` edge over the
/// `outcome=fail`-gated `retry`/`retry2` edges.
#[tokio::test]
async fn s1_diamond_with_condition_takes_the_success_branch() {
    let mut handlers = HandlerRegistry::new();
    handlers.register(NodeType::CoderGen, Arc::new(AlwaysSucceed));
    let (engine, _dir) = engine_with(handlers).await;

    let dsl = r#"
        digraph s1 {
            start [shape=Mdiamond]
            A [type=codergen]
            decision [type=conditional]
            win [type=conditional]
            retry [type=conditional]
            retry2 [type=conditional]
            done [shape=Msquare]

            start -> A
            A -> decision
            decision -> win [condition="outcome=success"]
            decision -> retry [condition="outcome=fail", weight=2]
            decision -> retry2 [condition="outcome=fail", weight=1]
            win -> done
            retry -> A
            retry2 -> A
        }
    "#;

    let run = engine.start(dsl.to_string()).await;

    assert_eq!(run.status, RunStatus::Completed);
    assert_eq!(run.completed_nodes, vec!["start", "A", "decision", "win", "done"]);
    for id in &run.completed_nodes {
        assert!(run.node_outcomes.contains_key(id), "missing outcome for {id}");
    }
}

/// S2 — retry-then-partial: `maxRetries=2, allowPartial=true`; the
/// handler RETRYs on all 3 attempts, so the engine synthesises
/// PARTIAL_SUCCESS after exhausting `maxAttempts=3` and the run
/// continues past B.
#[tokio::test]
async fn s2_retry_then_partial_synthesises_partial_success_after_exhausting_attempts() {
    let mut handlers = HandlerRegistry::new();
    handlers.register(NodeType::CoderGen, Arc::new(AlwaysRetry { calls: AtomicU32::new(0) }));
    let (engine, _dir) = engine_with(handlers).await;

    let dsl = r#"
        digraph s2 {
            start [shape=Mdiamond]
            B [type=codergen, max_retries=2, allow_partial=true]
            done [shape=Msquare]

            start -> B
            B -> done
        }
    "#;

    let run = engine.start(dsl.to_string()).await;

    assert_eq!(run.status, RunStatus::Completed);
    let outcome = run.node_outcomes.get("B").expect("B has an outcome");
    assert_eq!(outcome.status, Some(stagegraph_core::outcome::OutcomeStatus::PartialSuccess));
}

/// S3a — goal-gate failure redirect, with a retry target: G fails once,
/// the engine redirects to A per `graph.retry_target`, A succeeds, G is
/// re-entered and succeeds the second time, and the run completes.
#[tokio::test]
async fn s3a_goal_gate_failure_redirects_to_retry_target_and_recovers() {
    let mut handlers = HandlerRegistry::new();
    handlers.register(NodeType::Conditional, Arc::new(AlwaysSucceed));
    handlers.register(NodeType::CoderGen, Arc::new(FailThenSucceed { calls: AtomicU32::new(0) }));
    let (engine, _dir) = engine_with(handlers).await;

    let dsl = r#"
        digraph s3a {
            graph [retry_target="A"]
            start [shape=Mdiamond]
            A [type=conditional]
            G [type=codergen, goal_gate=true]
            done [shape=Msquare]

            start -> A
            A -> G
            G -> done
        }
    "#;

    let run = engine.start(dsl.to_string()).await;

    assert_eq!(run.status, RunStatus::Completed);
    // G ran twice: once FAIL (triggering the redirect), once SUCCESS.
    assert_eq!(run.completed_nodes.iter().filter(|id| id.as_str() == "G").count(), 2);
    assert_eq!(run.node_outcomes.get("G").unwrap().status, Some(stagegraph_core::outcome::OutcomeStatus::Success));
}

/// S3b — goal-gate failure with no retry target anywhere: the run fails,
/// and the error names the failing node.
#[tokio::test]
async fn s3b_goal_gate_failure_with_no_retry_target_fails_the_run() {
    let mut handlers = HandlerRegistry::new();
    handlers.register(NodeType::CoderGen, Arc::new(AlwaysFail));
    let (engine, _dir) = engine_with(handlers).await;

    let dsl = r#"
        digraph s3b {
            start [shape=Mdiamond]
            G [type=codergen, goal_gate=true]
            done [shape=Msquare]

            start -> G
            G -> done
        }
    "#;

    let run = engine.start(dsl.to_string()).await;

    assert_eq!(run.status, RunStatus::Failed);
    assert!(run.error.as_deref().unwrap_or("").contains('G'));
}

/// TESTABLE PROPERTIES #1/#2: `completed_nodes` is a prefix of execution
/// order and every completed node has a recorded outcome.
#[tokio::test]
async fn run_invariants_hold_after_a_normal_completion() {
    let mut handlers = HandlerRegistry::new();
    handlers.register(NodeType::CoderGen, Arc::new(AlwaysSucceed));
    let (engine, _dir) = engine_with(handlers).await;

    let dsl = r#"
        digraph inv {
            start [shape=Mdiamond]
            A [type=codergen]
            done [shape=Msquare]
            start -> A
            A -> done
        }
    "#;

    let run = engine.start(dsl.to_string()).await;
    run.check_invariants().expect("run invariants hold");
}

/// A parse error is reported rather than panicking, and is reflected in
/// both the returned run and the persisted run index.
#[tokio::test]
async fn malformed_dsl_fails_the_run_with_a_parse_error() {
    let handlers = HandlerRegistry::new();
    let (engine, _dir) = engine_with(handlers).await;

    let run = engine.start("not a valid graph {{{".to_string()).await;

    assert_eq!(run.status, RunStatus::Failed);
    assert!(run.error.as_deref().unwrap_or("").contains("parse error"));
    assert_eq!(engine.get_run(&run.id).await.unwrap().status, RunStatus::Failed);
}
