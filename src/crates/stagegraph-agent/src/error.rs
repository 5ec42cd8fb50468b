//! Errors surfaced by the agent session (§7).
//!
//! ```text
//! SessionError
//! ├── Tool               - a tool's execute() returned an error
//! ├── Llm                - stagegraph_llm::LlmError, surfaced through
//! ├── PathTraversal       - a tool path argument resolved outside the workspace root
//! ├── SubAgentDepthExceeded - spawn_agent at maxSubagentDepth
//! ├── UnknownTool         - a tool_call named something the registry doesn't have
//! ├── Io                  - #[from] std::io::Error
//! └── Serialization       - #[from] serde_json::Error
//! ```
//!
//! None of these crash the process (§7): a session surfaces the error as
//! a failed [`crate::turn::ToolResult`] or an `ERROR` event, the same way
//! `stagegraph-core::error::EngineError` never panics the engine.

use thiserror::Error;

/// Result type used throughout `stagegraph-agent`.
pub type Result<T> = std::result::Result<T, SessionError>;

#[derive(Debug, Error)]
pub enum SessionError {
    /// A tool's `execute` returned an error (distinct from the tool
    /// reporting a failed *result*, which is a successful dispatch that
    /// carries `is_error: true`).
    #[error("tool '{tool}' failed: {message}")]
    Tool { tool: String, message: String },

    /// The LLM client's `complete` call failed.
    #[error("LLM call failed: {0}")]
    Llm(#[from] stagegraph_llm::LlmError),

    /// A tool path argument resolved outside the session's workspace
    /// root (§4.J).
    #[error("path '{0}' escapes the workspace root")]
    PathTraversal(String),

    /// `spawn_agent` was called at `maxSubagentDepth` (§4.L).
    #[error("sub-agent depth limit ({0}) exceeded")]
    SubAgentDepthExceeded(u32),

    /// The model called a tool name not in the session's registry.
    #[error("unknown tool: {0}")]
    UnknownTool(String),

    /// `wait`/`close_agent` referenced a sub-agent handle id that isn't
    /// (or is no longer) tracked.
    #[error("unknown sub-agent handle: {0}")]
    UnknownSubAgent(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
