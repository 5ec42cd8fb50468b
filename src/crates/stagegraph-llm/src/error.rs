//! Errors surfaced by the LLM Client contract.

use thiserror::Error;

/// Result type for LLM operations.
pub type Result<T> = std::result::Result<T, LlmError>;

/// Errors a [`crate::LlmClient`] implementation may return from
/// [`crate::LlmClient::complete`]. This crate only defines the contract;
/// a concrete provider adapter (or the test double used by
/// `stagegraph-cli`) maps its own transport errors (HTTP status,
/// connection refused, malformed SSE, ...) onto this taxonomy.
#[derive(Debug, Error)]
pub enum LlmError {
    /// The request could not be serviced as constructed: bad model name,
    /// malformed tool schema, unsupported `reasoning_effort`, etc.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The provider's response didn't match the contract (missing
    /// `finish_reason`, a tool-call part with no `id`, ...).
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// The call did not complete within the caller's deadline.
    #[error("request timed out: {0}")]
    Timeout(String),

    /// The provider rejected or failed the call for a reason outside the
    /// categories above (rate limit, auth, 5xx, ...).
    #[error("provider error: {0}")]
    Provider(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl LlmError {
    /// Whether the caller should treat this as worth a retry at the
    /// handler level, rather than a terminal session error.
    pub fn is_retryable(&self) -> bool {
        matches!(self, LlmError::Timeout(_) | LlmError::Provider(_))
    }
}
