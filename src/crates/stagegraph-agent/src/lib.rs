//! # stagegraph-agent — the Agent Session Loop
//!
//! Everything a `codergen`/`tool` graph node delegates to once
//! `stagegraph-core`'s engine hands it off (§1): an append-only turn
//! history, a pluggable [`LlmClient`](stagegraph_llm::LlmClient) call per
//! iteration, a registry of filesystem/shell/search/patch tools run
//! against a sandboxed [`environment::ExecutionEnvironment`], and a
//! supervisor for spawning, awaiting, and forgetting child sessions.
//!
//! [`executor::CodergenExecutor`] is the seam back into the engine: it
//! implements [`stagegraph_core::handler::StageExecutor`] and is what a
//! caller registers into a `HandlerRegistry` for `NodeType::CoderGen`
//! (and, for a `tool` node whose work is itself a short agent run,
//! `NodeType::Tool`).

pub mod environment;
pub mod error;
pub mod executor;
pub mod project_docs;
pub mod session;
pub mod supervisor;
pub mod tools;
pub mod truncate;
pub mod turn;

pub use environment::{ExecutionEnvironment, LocalFilesystemEnvironment};
pub use error::{Result, SessionError};
pub use executor::CodergenExecutor;
pub use session::{AgentSession, SessionConfig, SessionState};
pub use supervisor::SubAgentSupervisor;
pub use tools::{AgentTool, ToolRegistry};
pub use turn::{ToolCall, ToolResult, Turn};
