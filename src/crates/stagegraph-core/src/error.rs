//! Error types for graph parsing, validation, and execution.
//!
//! All errors implement `std::error::Error` via `thiserror`. The taxonomy
//! mirrors the severity rules a [`crate::engine::PipelineEngine`] applies:
//! some variants are fatal to a run, some are recovered locally by the retry
//! policy, and some (like [`EngineError::CheckpointWrite`]) are logged and
//! never propagated out of the stage loop.
//!
//! ```text
//! EngineError
//! ├── Parse                  - fatal: DSL could not be parsed
//! ├── GraphShape             - fatal: missing/dangling node reference
//! ├── HandlerTransient       - recovered by RetryPolicy
//! ├── HandlerTerminal        - recorded as FAIL, may redirect via retry_target
//! ├── CheckpointWrite        - logged, non-fatal
//! ├── HumanGateTimeout       - resolved via default choice or RETRY outcome
//! └── RunNotFound/NodeNotFound - lookup failures on the public API
//! ```

use thiserror::Error;

/// Errors surfaced by graph parsing, validation, and pipeline execution.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The DOT-subset DSL could not be parsed. Fatal to the run being started.
    #[error("failed to parse graph DSL: {0}")]
    Parse(String),

    /// The graph structure is invalid: a dangling edge target, a missing
    /// start node, or a retry-target that names a non-existent node.
    #[error("invalid graph structure: {0}")]
    GraphShape(String),

    /// A handler raised an error that the retry policy should treat as
    /// transient (i.e. keep retrying until attempts are exhausted).
    #[error("transient handler error at node '{node}': {message}")]
    HandlerTransient { node: String, message: String },

    /// A handler raised an error that is terminal: no further attempts,
    /// record as FAIL immediately.
    #[error("terminal handler error at node '{node}': {message}")]
    HandlerTerminal { node: String, message: String },

    /// Writing `checkpoint.json` failed. Logged by the engine, never fatal
    /// to the stage that triggered it.
    #[error("checkpoint write failed: {0}")]
    CheckpointWrite(String),

    /// A human-gate wait timed out with no default choice configured.
    #[error("human gate at node '{0}' timed out with no default choice")]
    HumanGateTimeout(String),

    /// `getRun` / `submitHumanAnswer` referenced a run id that doesn't exist.
    #[error("run not found: {0}")]
    RunNotFound(String),

    /// An edge or retry-target named a node id absent from the graph.
    #[error("node not found: {0}")]
    NodeNotFound(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result alias used throughout `stagegraph-core`.
pub type Result<T> = std::result::Result<T, EngineError>;
