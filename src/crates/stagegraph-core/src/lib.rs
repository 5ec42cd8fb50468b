//! # stagegraph-core — the graph pipeline orchestrator
//!
//! `stagegraph-core` parses a directed graph of pipeline stages from a
//! restricted DOT-subset DSL, drives each stage through a retrying state
//! machine, selects outgoing edges by a layered policy, enforces goal
//! gates at terminal nodes, persists checkpoints, and publishes a live
//! event stream — including human-gate rendezvous for stages that need
//! an operator's input before continuing.
//!
//! ## Core concepts
//!
//! ### 1. Graph — the parsed pipeline
//!
//! A [`graph::Graph`] is immutable once produced by [`dsl::parse`]. Nodes
//! are polymorphic over a small capability set ([`graph::NodeType`]); the
//! concrete type comes from an explicit `type` attribute or is inferred
//! from the node's `shape`.
//!
//! ### 2. PipelineEngine — the state machine
//!
//! [`engine::PipelineEngine`] drives one run at a time through
//! `ENTER -> EXECUTE_ATTEMPT -> RECORD -> CHECKPOINT -> SELECT_EDGE`,
//! retrying transient failures with jittered exponential backoff
//! ([`retry::RetryPolicy`]) and redirecting or failing the run when a
//! goal-gated node doesn't come back clean.
//!
//! ### 3. Handlers — pluggable stage behaviour
//!
//! `start`, `exit`, `conditional`, `wait.human`, and the parallel
//! structural nodes ship with built-in handlers. `codergen` and `tool`
//! nodes delegate to a [`handler::StageExecutor`] registered by the
//! caller — `stagegraph-agent` for LLM-driven stages, `stagegraph-toolkit`
//! or a CLI harness for shell commands — since the LLM client and
//! execution sandbox are external collaborators this crate only defines
//! the contract for.
//!
//! ### 4. Event bus and checkpoints
//!
//! Every stage transition is published to the [`event_bus::EventBus`]
//! and snapshotted to `<logsRoot>/checkpoint.json` via
//! [`checkpoint::Checkpoint::write_best_effort`], both before the engine
//! moves on. The full set of runs is persisted process-wide by
//! [`persistence::RunsStore`], debounced and written atomically.
//!
//! ## Quick start
//!
//! ```rust,ignore
//! use stagegraph_core::engine::PipelineEngine;
//! use stagegraph_core::handler::HandlerRegistry;
//! use stagegraph_core::persistence::RunsStore;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let runs = RunsStore::init("runs.json").await?;
//!     let engine = PipelineEngine::new(runs, "logs", HandlerRegistry::new());
//!     let run = engine
//!         .start("digraph { start [shape=Mdiamond] exit [shape=Msquare] start -> exit }".to_string())
//!         .await;
//!     println!("{:?}", run.status);
//!     Ok(())
//! }
//! ```

pub mod checkpoint;
pub mod condition;
pub mod context;
pub mod dsl;
pub mod edge_selector;
pub mod engine;
pub mod error;
pub mod event_bus;
pub mod graph;
pub mod handler;
pub mod human_gate;
pub mod outcome;
pub mod persistence;
pub mod retry;
pub mod run;
pub mod visualization;

pub use error::{EngineError, Result};
pub use graph::Graph;
pub use outcome::Outcome;
pub use run::Run;
