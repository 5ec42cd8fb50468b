//! The Agent Tool Registry (§4.J): the set of tools a session's model
//! may call, each advertised by name/description/JSON-schema parameters
//! and executed against an [`crate::environment::ExecutionEnvironment`].
//!
//! Built-ins live in sibling modules (`fs`, `shell`, `search`, `patch`)
//! and are assembled by [`ToolRegistry::with_builtins`]; `spawn_agent`,
//! `wait`, and `close_agent` are not registered here — the session loop
//! (§4.K) short-circuits those three names to the
//! [`crate::supervisor::SubAgentSupervisor`] before consulting the
//! registry at all (§4.L).

pub mod fs;
pub mod patch;
pub mod search;
pub mod shell;

use crate::environment::ExecutionEnvironment;
use crate::error::{Result, SessionError};
use async_trait::async_trait;
use serde_json::Value;
use stagegraph_llm::ToolDefinition as LlmToolDefinition;
use std::collections::HashMap;
use std::sync::Arc;

/// One tool the model may call. `execute` returns the result text that
/// becomes (after truncation) a [`crate::turn::ToolResult::content`];
/// returning `Err` is reserved for dispatch failures the caller should
/// treat as a session-level [`SessionError`], not a tool-level failure
/// the model should see and react to — most tool failures (file not
/// found, command non-zero exit) should be reported as `Ok` text
/// instead, since the model is the one meant to read and recover from
/// them.
#[async_trait]
pub trait AgentTool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    /// JSON Schema (draft-07-ish, object type) describing this tool's
    /// arguments.
    fn parameters(&self) -> Value;
    async fn execute(&self, args: Value, env: &dyn ExecutionEnvironment) -> Result<String>;

    fn definition(&self) -> LlmToolDefinition {
        LlmToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters(),
        }
    }
}

/// The set of tools one session (or sub-agent) was configured with.
#[derive(Default, Clone)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn AgentTool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The built-in filesystem/shell/search/patch tools, rooted at
    /// whatever [`ExecutionEnvironment`] the session later supplies at
    /// call time.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(fs::ReadFileTool);
        registry.register(fs::WriteFileTool);
        registry.register(fs::EditFileTool);
        registry.register(fs::ListDirectoryTool);
        registry.register(fs::MoveFileTool);
        registry.register(fs::DeleteFileTool);
        registry.register(shell::ShellTool);
        registry.register(search::GrepTool);
        registry.register(search::GlobTool);
        registry.register(patch::ApplyPatchTool);
        registry
    }

    pub fn register(&mut self, tool: impl AgentTool + 'static) {
        self.tools.insert(tool.name().to_string(), Arc::new(tool));
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn AgentTool>> {
        self.tools.get(name).cloned()
    }

    pub fn definitions(&self) -> Vec<LlmToolDefinition> {
        self.tools.values().map(|t| t.definition()).collect()
    }

    pub async fn execute(&self, name: &str, args: Value, env: &dyn ExecutionEnvironment) -> Result<String> {
        let tool = self.get(name).ok_or_else(|| SessionError::UnknownTool(name.to_string()))?;
        tool.execute(args, env).await
    }
}

/// A required string argument, failing with a tool-local error message
/// (surfaced to the model as the tool's own failed result, not a
/// session-level error) rather than panicking on a malformed call.
pub(crate) fn require_str<'a>(args: &'a Value, key: &str) -> std::result::Result<&'a str, String> {
    args.get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| format!("missing or non-string argument '{key}'"))
}

pub(crate) fn optional_usize(args: &Value, key: &str) -> Option<usize> {
    args.get(key).and_then(Value::as_u64).map(|n| n as usize)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn with_builtins_registers_the_expected_names() {
        let registry = ToolRegistry::with_builtins();
        for name in ["read_file", "write_file", "edit_file", "list_directory", "shell", "grep", "glob", "apply_patch"] {
            assert!(registry.get(name).is_some(), "missing tool {name}");
        }
    }

    #[test]
    fn definitions_carry_name_and_schema() {
        let registry = ToolRegistry::with_builtins();
        let defs = registry.definitions();
        assert!(!defs.is_empty());
        assert!(defs.iter().all(|d| d.parameters.is_object()));
    }
}
