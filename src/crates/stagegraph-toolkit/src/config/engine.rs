//! `EngineConfigBuilder` — environment-driven defaults for the orchestrator
//! and agent crates, in the `STAGEGRAPH_` namespace (§2.2).

use super::{get_env_bool, get_env_or, get_env_parse_or, ConfigBuilder};
use crate::Result;

/// Tunables both `stagegraph-core` and `stagegraph-agent` fall back to when
/// a caller doesn't set them explicitly. Every field has a literal default
/// so `EngineConfig::default()` alone is a valid config.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// Initial retry backoff interval, in seconds (§4.G).
    pub retry_initial_interval_secs: f64,
    /// Exponential backoff multiplier (§4.G).
    pub retry_backoff_factor: f64,
    /// Backoff cap, in seconds (§4.G).
    pub retry_max_interval_secs: f64,
    /// How long a `wait.human` node waits before falling back to its
    /// default choice or retrying (§4.H).
    pub human_gate_timeout_secs: u64,
    /// Byte cap on discovered project docs (§4.N).
    pub project_doc_byte_cap: usize,
    /// Tool-call rounds allowed per user input before the session forces a
    /// turn boundary (§4.K).
    pub max_tool_rounds_per_input: u32,
    /// Hard cap on turns in a session (§4.K).
    pub max_turns: u32,
    /// Sliding window size used by loop detection (§4.K).
    pub loop_detection_window: usize,
    /// Approximate context window size, in tokens, used for the context
    /// usage warning (§4.K).
    pub context_window_size: u32,
    /// Root directory for per-run checkpoint files (§4.G).
    pub logs_root: String,
    /// Path to the persisted run index (§4.M).
    pub runs_file: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            retry_initial_interval_secs: 1.0,
            retry_backoff_factor: 2.0,
            retry_max_interval_secs: 60.0,
            human_gate_timeout_secs: 300,
            project_doc_byte_cap: 32 * 1024,
            max_tool_rounds_per_input: 50,
            max_turns: 200,
            loop_detection_window: 4,
            context_window_size: 128_000,
            logs_root: "logs".to_string(),
            runs_file: "runs.json".to_string(),
        }
    }
}

impl ConfigBuilder for EngineConfig {
    fn validate(&self) -> Result<()> {
        if self.retry_backoff_factor < 1.0 {
            return Err(crate::ToolingError::General(
                "retry backoff factor must be >= 1.0".to_string(),
            ));
        }
        if self.retry_max_interval_secs < self.retry_initial_interval_secs {
            return Err(crate::ToolingError::General(
                "retry max interval must be >= initial interval".to_string(),
            ));
        }
        if self.max_tool_rounds_per_input == 0 || self.max_turns == 0 {
            return Err(crate::ToolingError::General(
                "max_tool_rounds_per_input and max_turns must be non-zero".to_string(),
            ));
        }
        Ok(())
    }

    fn from_env(prefix: &str) -> Result<Self> {
        let defaults = Self::default();
        Ok(Self {
            retry_initial_interval_secs: get_env_parse_or(
                &format!("{prefix}RETRY_INITIAL_INTERVAL_SECS"),
                defaults.retry_initial_interval_secs,
            )?,
            retry_backoff_factor: get_env_parse_or(
                &format!("{prefix}RETRY_BACKOFF_FACTOR"),
                defaults.retry_backoff_factor,
            )?,
            retry_max_interval_secs: get_env_parse_or(
                &format!("{prefix}RETRY_MAX_INTERVAL_SECS"),
                defaults.retry_max_interval_secs,
            )?,
            human_gate_timeout_secs: get_env_parse_or(
                &format!("{prefix}HUMAN_GATE_TIMEOUT_SECS"),
                defaults.human_gate_timeout_secs,
            )?,
            project_doc_byte_cap: get_env_parse_or(
                &format!("{prefix}PROJECT_DOC_BYTE_CAP"),
                defaults.project_doc_byte_cap,
            )?,
            max_tool_rounds_per_input: get_env_parse_or(
                &format!("{prefix}MAX_TOOL_ROUNDS_PER_INPUT"),
                defaults.max_tool_rounds_per_input,
            )?,
            max_turns: get_env_parse_or(&format!("{prefix}MAX_TURNS"), defaults.max_turns)?,
            loop_detection_window: get_env_parse_or(
                &format!("{prefix}LOOP_DETECTION_WINDOW"),
                defaults.loop_detection_window,
            )?,
            context_window_size: get_env_parse_or(
                &format!("{prefix}CONTEXT_WINDOW_SIZE"),
                defaults.context_window_size,
            )?,
            logs_root: get_env_or(&format!("{prefix}LOGS_ROOT"), defaults.logs_root)?,
            runs_file: get_env_or(&format!("{prefix}RUNS_FILE"), defaults.runs_file)?,
        })
    }

    fn merge(&mut self, other: Self) -> &mut Self {
        let default = Self::default();
        if other.retry_initial_interval_secs != default.retry_initial_interval_secs {
            self.retry_initial_interval_secs = other.retry_initial_interval_secs;
        }
        if other.retry_backoff_factor != default.retry_backoff_factor {
            self.retry_backoff_factor = other.retry_backoff_factor;
        }
        if other.retry_max_interval_secs != default.retry_max_interval_secs {
            self.retry_max_interval_secs = other.retry_max_interval_secs;
        }
        if other.human_gate_timeout_secs != default.human_gate_timeout_secs {
            self.human_gate_timeout_secs = other.human_gate_timeout_secs;
        }
        if other.project_doc_byte_cap != default.project_doc_byte_cap {
            self.project_doc_byte_cap = other.project_doc_byte_cap;
        }
        if other.max_tool_rounds_per_input != default.max_tool_rounds_per_input {
            self.max_tool_rounds_per_input = other.max_tool_rounds_per_input;
        }
        if other.max_turns != default.max_turns {
            self.max_turns = other.max_turns;
        }
        if other.loop_detection_window != default.loop_detection_window {
            self.loop_detection_window = other.loop_detection_window;
        }
        if other.context_window_size != default.context_window_size {
            self.context_window_size = other.context_window_size;
        }
        if other.logs_root != default.logs_root {
            self.logs_root = other.logs_root;
        }
        if other.runs_file != default.runs_file {
            self.runs_file = other.runs_file;
        }
        self
    }
}

/// Builder wrapper kept for call-site symmetry with the `*ConfigBuilder`
/// naming used elsewhere in this crate; `EngineConfig` already implements
/// the whole trait, so this just forwards to it.
pub struct EngineConfigBuilder;

impl EngineConfigBuilder {
    /// Load from `STAGEGRAPH_*` environment variables, falling back to the
    /// built-in literal defaults for anything unset.
    pub fn from_env() -> Result<EngineConfig> {
        EngineConfig::from_env_with_defaults("STAGEGRAPH_")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert!(EngineConfig::default().validate().is_ok());
    }

    #[test]
    fn rejects_backoff_factor_below_one() {
        let mut config = EngineConfig::default();
        config.retry_backoff_factor = 0.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn reads_overrides_from_environment() {
        std::env::set_var("STAGEGRAPH_TEST_MAX_TURNS", "500");
        let value: u32 = get_env_parse_or("STAGEGRAPH_TEST_MAX_TURNS", 1).unwrap();
        assert_eq!(value, 500);
        std::env::remove_var("STAGEGRAPH_TEST_MAX_TURNS");
    }

    #[test]
    fn merge_only_overwrites_non_default_fields() {
        let mut base = EngineConfig::default();
        let mut override_cfg = EngineConfig::default();
        override_cfg.max_turns = 10;
        base.merge(override_cfg);
        assert_eq!(base.max_turns, 10);
        assert_eq!(
            base.retry_initial_interval_secs,
            EngineConfig::default().retry_initial_interval_secs
        );
    }
}
