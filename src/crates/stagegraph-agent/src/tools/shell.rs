//! The `shell` tool: runs one command through the execution
//! environment's wall-clock-bounded exec (§4.J, §5).

use super::{require_str, AgentTool};
use crate::environment::ExecutionEnvironment;
use crate::error::Result;
use async_trait::async_trait;
use serde_json::{json, Value};

const DEFAULT_TIMEOUT_MS: u64 = 30_000;
const MAX_TIMEOUT_MS: u64 = 600_000;

pub struct ShellTool;

#[async_trait]
impl AgentTool for ShellTool {
    fn name(&self) -> &str {
        "shell"
    }

    fn description(&self) -> &str {
        "Run a shell command in the workspace and return its combined stdout/stderr and exit code."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "command": {"type": "string"},
                "timeout_ms": {"type": "integer", "description": "wall-clock timeout, default 30000, max 600000"}
            },
            "required": ["command"]
        })
    }

    async fn execute(&self, args: Value, env: &dyn ExecutionEnvironment) -> Result<String> {
        let command = match require_str(&args, "command") {
            Ok(c) => c,
            Err(e) => return Ok(e),
        };
        let timeout_ms = args
            .get("timeout_ms")
            .and_then(Value::as_u64)
            .unwrap_or(DEFAULT_TIMEOUT_MS)
            .min(MAX_TIMEOUT_MS);

        let output = env.exec_command(command, timeout_ms).await?;
        let mut rendered = format!(
            "exit_code: {}\nduration_ms: {}\n",
            output.exit_code, output.duration_ms
        );
        if output.timed_out {
            rendered.push_str(&format!("timed out after {timeout_ms}ms\n"));
        }
        if !output.stdout.is_empty() {
            rendered.push_str("--- stdout ---\n");
            rendered.push_str(&output.stdout);
        }
        if !output.stderr.is_empty() {
            rendered.push_str("--- stderr ---\n");
            rendered.push_str(&output.stderr);
        }
        Ok(rendered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::environment::LocalFilesystemEnvironment;

    #[tokio::test]
    async fn runs_and_reports_exit_code() {
        let dir = tempfile::tempdir().unwrap();
        let env = LocalFilesystemEnvironment::new(dir.path());
        let out = ShellTool.execute(json!({"command": "exit 3"}), &env).await.unwrap();
        assert!(out.contains("exit_code: 3"));
    }

    #[tokio::test]
    async fn clamps_timeout_to_max() {
        let dir = tempfile::tempdir().unwrap();
        let env = LocalFilesystemEnvironment::new(dir.path());
        let out = ShellTool
            .execute(json!({"command": "echo ok", "timeout_ms": 10_000_000}), &env)
            .await
            .unwrap();
        assert!(out.contains("ok"));
    }
}
