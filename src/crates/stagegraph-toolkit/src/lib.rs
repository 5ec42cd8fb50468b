//! Ambient stack shared by `stagegraph-core` and `stagegraph-agent`:
//! environment-driven configuration, error-context formatting, structured
//! logging helpers, stable JSON serialization, and the async retry/timeout
//! primitives the shell tool and human-gate waits are built on.
//!
//! # Modules
//!
//! - `config` - `EngineConfigBuilder` plus generic env-var loading (`STAGEGRAPH_` prefix)
//! - `error` - error-chain formatting and context utilities
//! - `async_utils` - retry policies and timeout wrappers for async operations
//! - `validation` - fluent validation API for config and tool-argument checks
//! - `serialization` - stable/sorted-key JSON, used for tool-call signatures
//! - `logging` - `timed`/`timed_with_level` tracing helpers

pub mod async_utils;
pub mod config;
pub mod error;
pub mod logging;
pub mod serialization;
pub mod validation;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised by the toolkit itself (as opposed to the crates that use it).
#[derive(Debug, Error)]
pub enum ToolingError {
    #[error("Tooling error: {0}")]
    General(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, ToolingError>;

/// Configuration structure for tooling
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ToolingConfig {
    pub verbose: bool,
    pub output_dir: Option<String>,
}

impl ToolingConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    pub fn with_output_dir(mut self, dir: impl Into<String>) -> Self {
        self.output_dir = Some(dir.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = ToolingConfig::default();
        assert!(!config.verbose);
        assert!(config.output_dir.is_none());
    }

    #[test]
    fn test_config_builder() {
        let config = ToolingConfig::new()
            .with_verbose(true)
            .with_output_dir("/tmp");

        assert!(config.verbose);
        assert_eq!(config.output_dir, Some("/tmp".to_string()));
    }
}
