//! Search tools: `grep` and `glob`, both capped so a broad pattern over
//! a large tree can't itself become the context blow-up the Tool Output
//! Truncator exists to prevent.

use super::{require_str, AgentTool};
use crate::environment::ExecutionEnvironment;
use crate::error::Result;
use async_trait::async_trait;
use serde_json::{json, Value};

const MAX_GREP_RESULTS: usize = 200;
const MAX_GLOB_RESULTS: usize = 500;

pub struct GrepTool;

#[async_trait]
impl AgentTool for GrepTool {
    fn name(&self) -> &str {
        "grep"
    }

    fn description(&self) -> &str {
        "Search file contents under a directory for a regex pattern."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "pattern": {"type": "string"},
                "path": {"type": "string", "default": "."},
                "include": {"type": "string", "description": "glob filter on file name, e.g. '*.rs'"}
            },
            "required": ["pattern"]
        })
    }

    async fn execute(&self, args: Value, env: &dyn ExecutionEnvironment) -> Result<String> {
        let pattern = match require_str(&args, "pattern") {
            Ok(p) => p,
            Err(e) => return Ok(e),
        };
        let path = args.get("path").and_then(Value::as_str).unwrap_or(".");
        let include = args.get("include").and_then(Value::as_str);

        let matches = match env.grep(pattern, path, include).await {
            Ok(m) => m,
            Err(e) => return Ok(format!("grep error: {e}")),
        };
        if matches.is_empty() {
            return Ok("no matches".to_string());
        }
        let total = matches.len();
        let mut lines: Vec<String> = matches
            .into_iter()
            .take(MAX_GREP_RESULTS)
            .map(|m| format!("{}:{}:{}", m.path, m.line_number, m.line))
            .collect();
        if total > MAX_GREP_RESULTS {
            lines.push(format!("... {} more matches not shown", total - MAX_GREP_RESULTS));
        }
        Ok(lines.join("\n"))
    }
}

pub struct GlobTool;

#[async_trait]
impl AgentTool for GlobTool {
    fn name(&self) -> &str {
        "glob"
    }

    fn description(&self) -> &str {
        "Expand a filesystem glob pattern (e.g. 'src/**/*.rs') relative to the workspace root."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {"pattern": {"type": "string"}},
            "required": ["pattern"]
        })
    }

    async fn execute(&self, args: Value, env: &dyn ExecutionEnvironment) -> Result<String> {
        let pattern = match require_str(&args, "pattern") {
            Ok(p) => p,
            Err(e) => return Ok(e),
        };
        let matches = match env.glob(pattern).await {
            Ok(m) => m,
            Err(e) => return Ok(format!("glob error: {e}")),
        };
        if matches.is_empty() {
            return Ok("no matches".to_string());
        }
        let total = matches.len();
        let mut paths: Vec<String> = matches.into_iter().take(MAX_GLOB_RESULTS).collect();
        if total > MAX_GLOB_RESULTS {
            paths.push(format!("... {} more matches not shown", total - MAX_GLOB_RESULTS));
        }
        Ok(paths.join("\n"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::environment::LocalFilesystemEnvironment;

    #[tokio::test]
    async fn grep_reports_no_matches() {
        let dir = tempfile::tempdir().unwrap();
        let env = LocalFilesystemEnvironment::new(dir.path());
        env.write_file("a.txt", "nothing interesting").await.unwrap();
        let out = GrepTool.execute(json!({"pattern": "TODO"}), &env).await.unwrap();
        assert_eq!(out, "no matches");
    }

    #[tokio::test]
    async fn glob_finds_files() {
        let dir = tempfile::tempdir().unwrap();
        let env = LocalFilesystemEnvironment::new(dir.path());
        env.write_file("a.rs", "").await.unwrap();
        env.write_file("b.rs", "").await.unwrap();
        let out = GlobTool.execute(json!({"pattern": "*.rs"}), &env).await.unwrap();
        assert!(out.contains("a.rs"));
        assert!(out.contains("b.rs"));
    }
}
