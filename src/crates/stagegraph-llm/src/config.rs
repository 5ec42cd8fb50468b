//! Configuration a `codergen` node carries for its LLM calls.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Per-node LLM configuration, read off a `codergen` node's
/// `llm_model`/`llm_provider`/`reasoning_effort` attributes and the
/// engine's defaults otherwise.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    pub model: String,
    pub provider: Option<String>,
    pub reasoning_effort: Option<String>,
    #[serde(default = "default_timeout")]
    pub timeout: Duration,
}

impl LlmConfig {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            provider: None,
            reasoning_effort: None,
            timeout: default_timeout(),
        }
    }

    pub fn with_provider(mut self, provider: impl Into<String>) -> Self {
        self.provider = Some(provider.into());
        self
    }

    pub fn with_reasoning_effort(mut self, effort: impl Into<String>) -> Self {
        self.reasoning_effort = Some(effort.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

fn default_timeout() -> Duration {
    Duration::from_secs(120)
}
