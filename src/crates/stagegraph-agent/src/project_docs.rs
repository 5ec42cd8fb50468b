//! Project Doc Discovery (§4.N): walks from the git root (or the
//! session's workspace root, if none) down to the workspace root,
//! collecting a fixed set of marker files into one system-prompt
//! section, capped at 32 KiB total.
//!
//! Grounded on `stencila`'s `agents::project_docs` module: same
//! root-to-working-dir directory walk, same "generic marker always,
//! provider marker gated to the active provider" rule, same truncate-
//! at-byte-budget behaviour. Reads go straight through `tokio::fs`
//! rather than [`crate::environment::ExecutionEnvironment`] because the
//! git root may sit above the session's sandboxed working directory,
//! which the environment's path resolution deliberately refuses to
//! leave (§4.J).

use std::path::{Path, PathBuf};

/// §4.N's aggregate byte cap.
const MAX_PROJECT_DOCS_BYTES: usize = 32 * 1024;

const TRUNCATION_BANNER: &str = "\n... [project doc discovery truncated at 32KiB] ...\n";

/// Marker filenames always read, plus the one gated to `provider`.
fn marker_files(provider: &str) -> Vec<&'static str> {
    let mut files = vec!["AGENTS.md"];
    match provider.to_ascii_lowercase().as_str() {
        "anthropic" | "claude" => files.push("CLAUDE.md"),
        "openai" | "codex" => files.push("CODEX.md"),
        "gemini" | "google" => files.push("GEMINI.md"),
        _ => {}
    }
    files
}

/// Walk upward from `start` looking for a `.git` entry; falls back to
/// `start` itself when none is found (a non-repo workspace).
fn find_git_root(start: &Path) -> PathBuf {
    let mut current = start;
    loop {
        if current.join(".git").exists() {
            return current.to_path_buf();
        }
        match current.parent() {
            Some(parent) => current = parent,
            None => return start.to_path_buf(),
        }
    }
}

/// `root` and every intermediate directory on the way down to
/// `working_dir`, in that order (root first, so root-level docs load
/// before more specific subdirectory ones).
fn directories_from_root_to_working_dir(root: &Path, working_dir: &Path) -> Vec<PathBuf> {
    let Ok(suffix) = working_dir.strip_prefix(root) else {
        return vec![working_dir.to_path_buf()];
    };
    let mut dirs = vec![root.to_path_buf()];
    let mut current = root.to_path_buf();
    for component in suffix.components() {
        current = current.join(component);
        dirs.push(current.clone());
    }
    dirs
}

/// Discover and concatenate project docs for `working_dir`, gated to
/// `provider`. Never fails: a missing/unreadable file is skipped, a
/// workspace with no markers at all returns an empty string.
pub async fn discover_project_docs(working_dir: &Path, provider: &str) -> String {
    let root = find_git_root(working_dir);
    let markers = marker_files(provider);
    let directories = directories_from_root_to_working_dir(&root, working_dir);

    let mut sections: Vec<String> = Vec::new();
    let mut total_bytes = 0usize;

    'walk: for dir in &directories {
        for marker in &markers {
            let path = dir.join(marker);
            let Ok(content) = tokio::fs::read_to_string(&path).await else {
                continue;
            };
            let trimmed = content.trim();
            if trimmed.is_empty() {
                continue;
            }
            let section = format!("--- {} ---\n{trimmed}", path.display());
            if total_bytes + section.len() > MAX_PROJECT_DOCS_BYTES {
                let remaining = MAX_PROJECT_DOCS_BYTES.saturating_sub(total_bytes);
                let cut = floor_char_boundary(&section, remaining);
                sections.push(section[..cut].to_string());
                sections.push(TRUNCATION_BANNER.to_string());
                break 'walk;
            }
            total_bytes += section.len();
            sections.push(section);
        }
    }

    sections.join("\n\n")
}

fn floor_char_boundary(s: &str, n: usize) -> usize {
    let mut n = n.min(s.len());
    while n > 0 && !s.is_char_boundary(n) {
        n -= 1;
    }
    n
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn marker_files_always_includes_agents_md() {
        assert_eq!(marker_files("unknown"), vec!["AGENTS.md"]);
        assert_eq!(marker_files("anthropic"), vec!["AGENTS.md", "CLAUDE.md"]);
    }

    #[test]
    fn directories_include_every_intermediate_dir() {
        let root = Path::new("/repo");
        let wd = Path::new("/repo/crates/agent");
        let dirs = directories_from_root_to_working_dir(root, wd);
        assert_eq!(
            dirs,
            vec![
                PathBuf::from("/repo"),
                PathBuf::from("/repo/crates"),
                PathBuf::from("/repo/crates/agent"),
            ]
        );
    }

    #[test]
    fn working_dir_outside_root_falls_back_to_itself() {
        let dirs = directories_from_root_to_working_dir(Path::new("/other"), Path::new("/repo/sub"));
        assert_eq!(dirs, vec![PathBuf::from("/repo/sub")]);
    }

    #[tokio::test]
    async fn discovers_agents_md_at_workspace_root() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(dir.path().join("AGENTS.md"), "be careful with migrations").await.unwrap();
        let docs = discover_project_docs(dir.path(), "anthropic").await;
        assert!(docs.contains("be careful with migrations"));
    }

    #[tokio::test]
    async fn missing_markers_yield_empty_string() {
        let dir = tempfile::tempdir().unwrap();
        let docs = discover_project_docs(dir.path(), "anthropic").await;
        assert_eq!(docs, "");
    }

    #[tokio::test]
    async fn provider_specific_marker_is_gated() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(dir.path().join("CLAUDE.md"), "claude-only notes").await.unwrap();
        let docs_gemini = discover_project_docs(dir.path(), "gemini").await;
        assert!(!docs_gemini.contains("claude-only notes"));
        let docs_anthropic = discover_project_docs(dir.path(), "anthropic").await;
        assert!(docs_anthropic.contains("claude-only notes"));
    }
}
