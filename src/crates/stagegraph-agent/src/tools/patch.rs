//! The `apply_patch` tool: a v4a-style unified-diff format (`*** Begin
//! Patch` / `*** Add File:` / `*** Update File:` / `*** Delete File:`,
//! `@@`-headed hunks with ` `/`-`/`+` prefixed lines) applied against the
//! session's [`ExecutionEnvironment`]. Grounded on the forge-agent crate's
//! `patch` module: the same operation set, the same two-tier match
//! strategy (exact subsequence match from the last hunk's end, falling
//! back to the start of file, then a whitespace-insensitive fuzzy match
//! that must resolve to a single unique candidate).

use super::{require_str, AgentTool};
use crate::environment::ExecutionEnvironment;
use crate::error::{Result, SessionError};
use async_trait::async_trait;
use serde_json::{json, Value};

#[derive(Debug, Clone, PartialEq, Eq)]
enum PatchOperation {
    AddFile { path: String, lines: Vec<String> },
    DeleteFile { path: String },
    UpdateFile { path: String, move_to: Option<String>, hunks: Vec<PatchHunk> },
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct PatchHunk {
    header: String,
    lines: Vec<PatchHunkLine>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum PatchHunkLine {
    Context(String),
    Delete(String),
    Add(String),
    EndOfFile,
}

fn is_patch_operation_start(line: &str) -> bool {
    line.starts_with("*** Add File: ") || line.starts_with("*** Delete File: ") || line.starts_with("*** Update File: ")
}

fn parse_apply_patch(patch: &str) -> std::result::Result<Vec<PatchOperation>, String> {
    let lines: Vec<&str> = patch.lines().collect();
    if lines.first().copied() != Some("*** Begin Patch") {
        return Err("apply_patch payload must start with '*** Begin Patch'".to_string());
    }
    if lines.last().copied() != Some("*** End Patch") {
        return Err("apply_patch payload must end with '*** End Patch'".to_string());
    }

    let mut operations = Vec::new();
    let mut idx = 1usize;
    let end = lines.len().saturating_sub(1);
    while idx < end {
        let line = lines[idx];
        if line.trim().is_empty() {
            idx += 1;
            continue;
        }

        if let Some(path) = line.strip_prefix("*** Add File: ") {
            idx += 1;
            let mut added = Vec::new();
            while idx < end && !is_patch_operation_start(lines[idx]) {
                let Some(payload) = lines[idx].strip_prefix('+') else {
                    return Err(format!("invalid add-file line: '{}'", lines[idx]));
                };
                added.push(payload.to_string());
                idx += 1;
            }
            operations.push(PatchOperation::AddFile { path: path.to_string(), lines: added });
            continue;
        }

        if let Some(path) = line.strip_prefix("*** Delete File: ") {
            operations.push(PatchOperation::DeleteFile { path: path.to_string() });
            idx += 1;
            continue;
        }

        if let Some(path) = line.strip_prefix("*** Update File: ") {
            idx += 1;
            let mut move_to = None;
            if idx < end {
                if let Some(target) = lines[idx].strip_prefix("*** Move to: ") {
                    move_to = Some(target.to_string());
                    idx += 1;
                }
            }

            let mut hunks = Vec::new();
            while idx < end && !is_patch_operation_start(lines[idx]) {
                let header = lines[idx];
                if !header.starts_with("@@") {
                    return Err(format!("invalid hunk header in update '{path}': '{header}'"));
                }
                idx += 1;

                let mut hunk_lines = Vec::new();
                while idx < end && !is_patch_operation_start(lines[idx]) && !lines[idx].starts_with("@@") {
                    let hunk_line = lines[idx];
                    if hunk_line == "*** End of File" {
                        hunk_lines.push(PatchHunkLine::EndOfFile);
                        idx += 1;
                        continue;
                    }
                    let Some(prefix) = hunk_line.chars().next() else {
                        return Err("empty hunk line is not allowed".to_string());
                    };
                    let value = hunk_line[1..].to_string();
                    let parsed = match prefix {
                        ' ' => PatchHunkLine::Context(value),
                        '-' => PatchHunkLine::Delete(value),
                        '+' => PatchHunkLine::Add(value),
                        _ => return Err(format!("invalid hunk line prefix '{prefix}' in '{hunk_line}'")),
                    };
                    hunk_lines.push(parsed);
                    idx += 1;
                }

                if hunk_lines.is_empty() {
                    return Err(format!("empty hunk in update '{path}'"));
                }
                hunks.push(PatchHunk { header: header.to_string(), lines: hunk_lines });
            }

            if hunks.is_empty() {
                return Err(format!("update operation for '{path}' must include at least one hunk"));
            }

            operations.push(PatchOperation::UpdateFile { path: path.to_string(), move_to, hunks });
            continue;
        }

        return Err(format!("unknown patch operation line: '{line}'"));
    }

    if operations.is_empty() {
        return Err("patch must contain at least one operation".to_string());
    }

    Ok(operations)
}

fn hunk_old_new_lines(hunk: &PatchHunk) -> (Vec<String>, Vec<String>) {
    let mut old_lines = Vec::new();
    let mut new_lines = Vec::new();
    for line in &hunk.lines {
        match line {
            PatchHunkLine::Context(value) => {
                old_lines.push(value.clone());
                new_lines.push(value.clone());
            }
            PatchHunkLine::Delete(value) => old_lines.push(value.clone()),
            PatchHunkLine::Add(value) => new_lines.push(value.clone()),
            PatchHunkLine::EndOfFile => {}
        }
    }
    (old_lines, new_lines)
}

fn split_content_lines(content: &str) -> Vec<String> {
    if content.is_empty() {
        return Vec::new();
    }
    let mut lines: Vec<String> = content.split('\n').map(str::to_string).collect();
    if content.ends_with('\n') && lines.last().is_some_and(String::is_empty) {
        lines.pop();
    }
    lines
}

/// Exact subsequence search for `needle` in `haystack`, starting at or
/// after `from`.
fn find_subsequence(haystack: &[String], needle: &[String], from: usize) -> Option<usize> {
    if needle.is_empty() || from + needle.len() > haystack.len() {
        return None;
    }
    (from..=haystack.len() - needle.len()).find(|&start| haystack[start..start + needle.len()] == *needle)
}

fn normalize_for_fuzzy(line: &str) -> String {
    line.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Whitespace-insensitive subsequence search. Returns `Ok(Some(index))`
/// on exactly one candidate, `Ok(None)` on zero, and `Err(count)` when
/// more than one candidate ties — the caller treats ambiguity as a
/// failure rather than guessing.
fn find_subsequence_fuzzy_unique(haystack: &[String], needle: &[String], from: usize) -> std::result::Result<Option<usize>, usize> {
    if needle.is_empty() || needle.len() > haystack.len() {
        return Ok(None);
    }
    let normalized_needle: Vec<String> = needle.iter().map(|l| normalize_for_fuzzy(l)).collect();
    let mut candidates = Vec::new();
    for start in 0..=haystack.len() - needle.len() {
        let window_matches = (0..needle.len()).all(|i| normalize_for_fuzzy(&haystack[start + i]) == normalized_needle[i]);
        if window_matches {
            candidates.push(start);
        }
    }
    if candidates.is_empty() {
        return Ok(None);
    }
    if candidates.len() == 1 {
        return Ok(Some(candidates[0]));
    }
    // Prefer a candidate at or after `from` when the tie would otherwise
    // be genuinely ambiguous about which occurrence the hunk meant.
    if let Some(&first_at_or_after) = candidates.iter().find(|&&c| c >= from) {
        if candidates.iter().filter(|&&c| c >= from).count() == 1 {
            return Ok(Some(first_at_or_after));
        }
    }
    Err(candidates.len())
}

fn apply_hunks_to_content(content: &str, hunks: &[PatchHunk]) -> std::result::Result<String, String> {
    let mut lines = split_content_lines(content);
    let had_trailing_newline = content.ends_with('\n');
    let mut search_from = 0usize;

    for hunk in hunks {
        let (old_lines, new_lines) = hunk_old_new_lines(hunk);
        if old_lines.is_empty() {
            let insert_at = search_from.min(lines.len());
            lines.splice(insert_at..insert_at, new_lines.clone());
            search_from = insert_at + new_lines.len();
            continue;
        }

        let position = if let Some(index) =
            find_subsequence(&lines, &old_lines, search_from).or_else(|| find_subsequence(&lines, &old_lines, 0))
        {
            index
        } else {
            match find_subsequence_fuzzy_unique(&lines, &old_lines, search_from) {
                Ok(Some(index)) => index,
                Ok(None) => {
                    return Err(format!("failed to match hunk '{}' (exact and fuzzy matching failed)", hunk.header));
                }
                Err(count) => {
                    return Err(format!(
                        "failed to match hunk '{}': fuzzy match is ambiguous ({count} candidates)",
                        hunk.header
                    ));
                }
            }
        };

        let end = position + old_lines.len();
        lines.splice(position..end, new_lines.clone());
        search_from = position + new_lines.len();
    }

    let mut updated = lines.join("\n");
    if had_trailing_newline {
        updated.push('\n');
    }
    Ok(updated)
}

async fn apply_patch_operations(operations: &[PatchOperation], env: &dyn ExecutionEnvironment) -> Result<String> {
    let mut summaries = Vec::new();
    for operation in operations {
        match operation {
            PatchOperation::AddFile { path, lines } => {
                if env.file_exists(path).await {
                    return Err(SessionError::Tool { tool: "apply_patch".into(), message: format!("file already exists: '{path}'") });
                }
                env.write_file(path, &lines.join("\n")).await?;
                summaries.push(format!("A {path}"));
            }
            PatchOperation::DeleteFile { path } => {
                if !env.file_exists(path).await {
                    return Err(SessionError::Tool { tool: "apply_patch".into(), message: format!("file not found: '{path}'") });
                }
                env.delete_file(path).await?;
                summaries.push(format!("D {path}"));
            }
            PatchOperation::UpdateFile { path, move_to, hunks } => {
                if !env.file_exists(path).await {
                    return Err(SessionError::Tool {
                        tool: "apply_patch".into(),
                        message: format!("cannot update missing file '{path}'"),
                    });
                }
                let original = env.read_file(path, None, None).await?;
                let updated = apply_hunks_to_content(&original, hunks)
                    .map_err(|message| SessionError::Tool { tool: "apply_patch".into(), message })?;

                let move_target = move_to.as_deref().filter(|target| *target != path.as_str());
                if let Some(target_path) = move_target {
                    if env.file_exists(target_path).await {
                        return Err(SessionError::Tool {
                            tool: "apply_patch".into(),
                            message: format!("move target already exists: '{target_path}'"),
                        });
                    }
                    env.write_file(path, &updated).await?;
                    env.move_file(path, target_path).await?;
                    summaries.push(format!("R {path} -> {target_path}"));
                } else {
                    env.write_file(path, &updated).await?;
                    summaries.push(format!("M {path}"));
                }
            }
        }
    }
    Ok(format!("Applied patch:\n{}", summaries.join("\n")))
}

pub struct ApplyPatchTool;

#[async_trait]
impl AgentTool for ApplyPatchTool {
    fn name(&self) -> &str {
        "apply_patch"
    }

    fn description(&self) -> &str {
        "Apply a v4a-style patch (*** Begin Patch / *** Add File: / *** Update File: / \
         *** Delete File: / *** End Patch, with @@ hunk headers and space/-/+ prefixed lines) \
         to one or more files in the workspace."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {"patch": {"type": "string"}},
            "required": ["patch"]
        })
    }

    async fn execute(&self, args: Value, env: &dyn ExecutionEnvironment) -> Result<String> {
        let patch = match require_str(&args, "patch") {
            Ok(p) => p,
            Err(e) => return Ok(e),
        };
        let operations = match parse_apply_patch(patch) {
            Ok(ops) => ops,
            Err(message) => return Ok(format!("invalid patch: {message}")),
        };
        match apply_patch_operations(&operations, env).await {
            Ok(summary) => Ok(summary),
            Err(e) => Ok(format!("apply_patch failed: {e}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::environment::LocalFilesystemEnvironment;

    #[test]
    fn parses_simple_update() {
        let patch = "*** Begin Patch\n*** Update File: a.txt\n@@ replace\n-one\n+two\n*** End Patch";
        let ops = parse_apply_patch(patch).expect("patch should parse");
        assert_eq!(ops.len(), 1);
    }

    #[test]
    fn rejects_missing_end_marker() {
        let patch = "*** Begin Patch\n*** Delete File: a.txt";
        let err = parse_apply_patch(patch).expect_err("parse should fail");
        assert!(err.contains("must end with '*** End Patch'"));
    }

    #[tokio::test]
    async fn add_file_writes_new_content() {
        let dir = tempfile::tempdir().unwrap();
        let env = LocalFilesystemEnvironment::new(dir.path());
        let patch = "*** Begin Patch\n*** Add File: new.txt\n+hello\n+world\n*** End Patch";
        let out = ApplyPatchTool.execute(json!({"patch": patch}), &env).await.unwrap();
        assert!(out.contains("A new.txt"));
        let content = env.read_file("new.txt", None, None).await.unwrap();
        assert_eq!(content, "hello\nworld");
    }

    #[tokio::test]
    async fn update_file_applies_hunk_exactly() {
        let dir = tempfile::tempdir().unwrap();
        let env = LocalFilesystemEnvironment::new(dir.path());
        env.write_file("a.txt", "line1\nline2\n").await.unwrap();
        let patch = "*** Begin Patch\n*** Update File: a.txt\n@@\n line1\n-line2\n+line-two\n*** End Patch";
        let out = ApplyPatchTool.execute(json!({"patch": patch}), &env).await.unwrap();
        assert!(out.contains("M a.txt"));
        let content = env.read_file("a.txt", None, None).await.unwrap();
        assert_eq!(content, "line1\nline-two\n");
    }

    #[tokio::test]
    async fn update_file_fuzzy_matches_whitespace_difference() {
        let dir = tempfile::tempdir().unwrap();
        let env = LocalFilesystemEnvironment::new(dir.path());
        env.write_file("a.rs", "fn  greet() {\nprintln!(\"hi\");\n}\n").await.unwrap();
        let patch = "*** Begin Patch\n*** Update File: a.rs\n@@\n-fn greet() {\n-println!(\"hi\");\n+fn greet() {\n+println!(\"hello\");\n*** End Patch";
        let out = ApplyPatchTool.execute(json!({"patch": patch}), &env).await.unwrap();
        assert!(out.contains("M a.rs"));
        let content = env.read_file("a.rs", None, None).await.unwrap();
        assert!(content.contains("println!(\"hello\")"));
    }

    #[tokio::test]
    async fn delete_file_removes_it() {
        let dir = tempfile::tempdir().unwrap();
        let env = LocalFilesystemEnvironment::new(dir.path());
        env.write_file("gone.txt", "bye").await.unwrap();
        let patch = "*** Begin Patch\n*** Delete File: gone.txt\n*** End Patch";
        let out = ApplyPatchTool.execute(json!({"patch": patch}), &env).await.unwrap();
        assert!(out.contains("D gone.txt"));
        assert!(!env.file_exists("gone.txt").await);
    }

    #[tokio::test]
    async fn update_missing_file_reports_failure() {
        let dir = tempfile::tempdir().unwrap();
        let env = LocalFilesystemEnvironment::new(dir.path());
        let patch = "*** Begin Patch\n*** Update File: missing.txt\n@@\n-x\n+y\n*** End Patch";
        let out = ApplyPatchTool.execute(json!({"patch": patch}), &env).await.unwrap();
        assert!(out.contains("apply_patch failed"));
    }
}
