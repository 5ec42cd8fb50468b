//! Filesystem tools: `read_file`, `write_file`, `edit_file`,
//! `list_directory`, `move_file`, `delete_file`.

use super::{optional_usize, require_str, AgentTool};
use crate::environment::ExecutionEnvironment;
use crate::error::Result;
use async_trait::async_trait;
use serde_json::{json, Value};

pub struct ReadFileTool;

#[async_trait]
impl AgentTool for ReadFileTool {
    fn name(&self) -> &str {
        "read_file"
    }

    fn description(&self) -> &str {
        "Read a text file, optionally a line range, from the workspace."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {"type": "string"},
                "offset": {"type": "integer", "description": "1-indexed starting line"},
                "limit": {"type": "integer", "description": "maximum number of lines"}
            },
            "required": ["path"]
        })
    }

    async fn execute(&self, args: Value, env: &dyn ExecutionEnvironment) -> Result<String> {
        let path = match require_str(&args, "path") {
            Ok(p) => p,
            Err(e) => return Ok(e),
        };
        let offset = optional_usize(&args, "offset");
        let limit = optional_usize(&args, "limit");
        match env.read_file(path, offset, limit).await {
            Ok(content) => Ok(content),
            Err(e) => Ok(format!("error reading '{path}': {e}")),
        }
    }
}

pub struct WriteFileTool;

#[async_trait]
impl AgentTool for WriteFileTool {
    fn name(&self) -> &str {
        "write_file"
    }

    fn description(&self) -> &str {
        "Create or overwrite a file with the given content."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {"type": "string"},
                "content": {"type": "string"}
            },
            "required": ["path", "content"]
        })
    }

    async fn execute(&self, args: Value, env: &dyn ExecutionEnvironment) -> Result<String> {
        let path = match require_str(&args, "path") {
            Ok(p) => p,
            Err(e) => return Ok(e),
        };
        let content = match require_str(&args, "content") {
            Ok(c) => c,
            Err(e) => return Ok(e),
        };
        match env.write_file(path, content).await {
            Ok(()) => Ok(format!("wrote {} bytes to '{}'", content.len(), path)),
            Err(e) => Ok(format!("error writing '{path}': {e}")),
        }
    }
}

pub struct EditFileTool;

#[async_trait]
impl AgentTool for EditFileTool {
    fn name(&self) -> &str {
        "edit_file"
    }

    fn description(&self) -> &str {
        "Replace an exact, unique substring of a file's content. Fails if \
         `old_string` appears zero or more than once, unless `replace_all` is set."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {"type": "string"},
                "old_string": {"type": "string"},
                "new_string": {"type": "string"},
                "replace_all": {"type": "boolean", "default": false}
            },
            "required": ["path", "old_string", "new_string"]
        })
    }

    async fn execute(&self, args: Value, env: &dyn ExecutionEnvironment) -> Result<String> {
        let path = match require_str(&args, "path") {
            Ok(p) => p,
            Err(e) => return Ok(e),
        };
        let old_string = match require_str(&args, "old_string") {
            Ok(s) => s,
            Err(e) => return Ok(e),
        };
        let new_string = match require_str(&args, "new_string") {
            Ok(s) => s,
            Err(e) => return Ok(e),
        };
        let replace_all = args.get("replace_all").and_then(Value::as_bool).unwrap_or(false);

        let content = match env.read_file(path, None, None).await {
            Ok(c) => c,
            Err(e) => return Ok(format!("error reading '{path}': {e}")),
        };
        let occurrences = content.matches(old_string).count();
        if occurrences == 0 {
            return Ok(format!("no match for old_string in '{path}'"));
        }
        if occurrences > 1 && !replace_all {
            return Ok(format!(
                "old_string matches {occurrences} times in '{path}'; pass replace_all=true \
                 or narrow old_string to a unique match"
            ));
        }
        let updated = if replace_all {
            content.replace(old_string, new_string)
        } else {
            content.replacen(old_string, new_string, 1)
        };
        match env.write_file(path, &updated).await {
            Ok(()) => Ok(format!("replaced {occurrences} occurrence(s) in '{path}'")),
            Err(e) => Ok(format!("error writing '{path}': {e}")),
        }
    }
}

pub struct ListDirectoryTool;

#[async_trait]
impl AgentTool for ListDirectoryTool {
    fn name(&self) -> &str {
        "list_directory"
    }

    fn description(&self) -> &str {
        "List the entries of a directory."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {"path": {"type": "string", "default": "."}},
        })
    }

    async fn execute(&self, args: Value, env: &dyn ExecutionEnvironment) -> Result<String> {
        let path = args.get("path").and_then(Value::as_str).unwrap_or(".");
        match env.list_directory(path).await {
            Ok(entries) => {
                if entries.is_empty() {
                    return Ok(format!("'{path}' is empty"));
                }
                let mut lines = Vec::with_capacity(entries.len());
                for entry in entries {
                    let marker = if entry.is_dir { "/" } else { "" };
                    match entry.size {
                        Some(size) if !entry.is_dir => {
                            lines.push(format!("{}{} ({} bytes)", entry.relative_path, marker, size))
                        }
                        _ => lines.push(format!("{}{}", entry.relative_path, marker)),
                    }
                }
                Ok(lines.join("\n"))
            }
            Err(e) => Ok(format!("error listing '{path}': {e}")),
        }
    }
}

pub struct MoveFileTool;

#[async_trait]
impl AgentTool for MoveFileTool {
    fn name(&self) -> &str {
        "move_file"
    }

    fn description(&self) -> &str {
        "Rename or move a file within the workspace."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {"from": {"type": "string"}, "to": {"type": "string"}},
            "required": ["from", "to"]
        })
    }

    async fn execute(&self, args: Value, env: &dyn ExecutionEnvironment) -> Result<String> {
        let from = match require_str(&args, "from") {
            Ok(p) => p,
            Err(e) => return Ok(e),
        };
        let to = match require_str(&args, "to") {
            Ok(p) => p,
            Err(e) => return Ok(e),
        };
        match env.move_file(from, to).await {
            Ok(()) => Ok(format!("moved '{from}' to '{to}'")),
            Err(e) => Ok(format!("error moving '{from}' to '{to}': {e}")),
        }
    }
}

pub struct DeleteFileTool;

#[async_trait]
impl AgentTool for DeleteFileTool {
    fn name(&self) -> &str {
        "delete_file"
    }

    fn description(&self) -> &str {
        "Delete a file from the workspace."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {"path": {"type": "string"}},
            "required": ["path"]
        })
    }

    async fn execute(&self, args: Value, env: &dyn ExecutionEnvironment) -> Result<String> {
        let path = match require_str(&args, "path") {
            Ok(p) => p,
            Err(e) => return Ok(e),
        };
        match env.delete_file(path).await {
            Ok(()) => Ok(format!("deleted '{path}'")),
            Err(e) => Ok(format!("error deleting '{path}': {e}")),
        }
    }
}
