//! The Execution Environment contract (§6): the sandbox a session's
//! built-in tools (`tools::fs`, `tools::shell`, `tools::search`) run
//! against. [`LocalFilesystemEnvironment`] is the concrete implementation
//! `stagegraph-cli` wires up; a test harness may substitute an in-memory
//! one without the session knowing the difference.

use crate::error::{Result, SessionError};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::process::{Child, Command};

/// The result of [`ExecutionEnvironment::exec_command`].
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
    pub timed_out: bool,
    pub duration_ms: u128,
}

/// One entry returned by [`ExecutionEnvironment::list_directory`].
#[derive(Debug, Clone)]
pub struct DirEntryInfo {
    pub relative_path: String,
    pub is_dir: bool,
    pub size: Option<u64>,
}

/// One match returned by [`ExecutionEnvironment::grep`].
#[derive(Debug, Clone)]
pub struct GrepMatch {
    pub path: String,
    pub line_number: usize,
    pub line: String,
}

/// The sandbox the agent's built-in tools operate against. Every path
/// argument is relative to [`ExecutionEnvironment::working_directory`];
/// implementations are responsible for rejecting paths that would
/// escape it with [`SessionError::PathTraversal`].
#[async_trait]
pub trait ExecutionEnvironment: Send + Sync {
    async fn initialize(&self) -> Result<()> {
        Ok(())
    }

    async fn cleanup(&self) -> Result<()> {
        Ok(())
    }

    fn working_directory(&self) -> &Path;
    fn platform(&self) -> &str;

    async fn read_file(&self, path: &str, offset: Option<usize>, limit: Option<usize>) -> Result<String>;
    async fn write_file(&self, path: &str, content: &str) -> Result<()>;
    async fn file_exists(&self, path: &str) -> bool;
    async fn list_directory(&self, path: &str) -> Result<Vec<DirEntryInfo>>;
    async fn move_file(&self, from: &str, to: &str) -> Result<()>;
    async fn delete_file(&self, path: &str) -> Result<()>;
    async fn exec_command(&self, command: &str, timeout_ms: u64) -> Result<CommandOutput>;
    async fn grep(&self, pattern: &str, path: &str, include: Option<&str>) -> Result<Vec<GrepMatch>>;
    async fn glob(&self, pattern: &str) -> Result<Vec<String>>;
}

/// Runs every tool against the real local filesystem and shell, rooted
/// at `working_directory`. Every relative path is joined under the root
/// and then canonicalized-checked to reject `..`-escapes (§4.J).
#[derive(Debug, Clone)]
pub struct LocalFilesystemEnvironment {
    working_directory: PathBuf,
    platform: String,
}

impl LocalFilesystemEnvironment {
    pub fn new(working_directory: impl Into<PathBuf>) -> Self {
        Self {
            working_directory: working_directory.into(),
            platform: std::env::consts::OS.to_string(),
        }
    }

    /// Resolve `path` under the workspace root, rejecting any result that
    /// would land outside it. Lexical, not `canonicalize`-based, so a
    /// path that doesn't exist yet (a file a tool is about to create)
    /// can still be validated.
    fn resolve(&self, path: &str) -> Result<PathBuf> {
        let candidate = Path::new(path);
        let joined = if candidate.is_absolute() {
            candidate.to_path_buf()
        } else {
            self.working_directory.join(candidate)
        };
        let normalized = normalize_lexically(&joined);
        if !normalized.starts_with(&self.working_directory) {
            return Err(SessionError::PathTraversal(path.to_string()));
        }
        Ok(normalized)
    }
}

/// Collapse `.`/`..` components without touching the filesystem (the
/// path may not exist yet).
fn normalize_lexically(path: &Path) -> PathBuf {
    use std::path::Component;
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::ParentDir => {
                out.pop();
            }
            Component::CurDir => {}
            other => out.push(other.as_os_str()),
        }
    }
    out
}

#[async_trait]
impl ExecutionEnvironment for LocalFilesystemEnvironment {
    fn working_directory(&self) -> &Path {
        &self.working_directory
    }

    fn platform(&self) -> &str {
        &self.platform
    }

    async fn read_file(&self, path: &str, offset: Option<usize>, limit: Option<usize>) -> Result<String> {
        let resolved = self.resolve(path)?;
        let content = tokio::fs::read_to_string(&resolved).await?;
        if offset.is_none() && limit.is_none() {
            return Ok(content);
        }
        let lines: Vec<&str> = content.lines().collect();
        let start = offset.unwrap_or(1).saturating_sub(1).min(lines.len());
        let end = start.saturating_add(limit.unwrap_or(usize::MAX)).min(lines.len());
        Ok(lines[start..end].join("\n"))
    }

    async fn write_file(&self, path: &str, content: &str) -> Result<()> {
        let resolved = self.resolve(path)?;
        if let Some(parent) = resolved.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&resolved, content).await?;
        Ok(())
    }

    async fn file_exists(&self, path: &str) -> bool {
        match self.resolve(path) {
            Ok(resolved) => tokio::fs::metadata(resolved).await.is_ok(),
            Err(_) => false,
        }
    }

    async fn list_directory(&self, path: &str) -> Result<Vec<DirEntryInfo>> {
        let root = self.resolve(path)?;
        let mut entries = Vec::new();
        let mut dir = tokio::fs::read_dir(&root).await?;
        while let Some(entry) = dir.next_entry().await? {
            let metadata = entry.metadata().await?;
            entries.push(DirEntryInfo {
                relative_path: entry.file_name().to_string_lossy().to_string(),
                is_dir: metadata.is_dir(),
                size: metadata.is_file().then(|| metadata.len()),
            });
        }
        entries.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
        Ok(entries)
    }

    async fn move_file(&self, from: &str, to: &str) -> Result<()> {
        let from = self.resolve(from)?;
        let to = self.resolve(to)?;
        if let Some(parent) = to.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::rename(from, to).await?;
        Ok(())
    }

    async fn delete_file(&self, path: &str) -> Result<()> {
        let resolved = self.resolve(path)?;
        tokio::fs::remove_file(resolved).await?;
        Ok(())
    }

    /// Wall-clock timeout with SIGTERM-then-SIGKILL escalation on Unix
    /// (§5): the process group gets a grace period to exit cleanly
    /// before it's force-killed.
    async fn exec_command(&self, command: &str, timeout_ms: u64) -> Result<CommandOutput> {
        let started = Instant::now();
        let mut cmd = build_shell_command(command);
        cmd.current_dir(&self.working_directory);
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());

        let mut child = cmd.spawn()?;
        let stdout_handle = child.stdout.take();
        let stderr_handle = child.stderr.take();
        let stdout_task = tokio::spawn(read_to_end(stdout_handle));
        let stderr_task = tokio::spawn(read_to_end(stderr_handle));

        let mut timed_out = false;
        let status = match tokio::time::timeout(Duration::from_millis(timeout_ms), child.wait()).await {
            Ok(status) => status?,
            Err(_) => {
                timed_out = true;
                terminate(&mut child).await;
                child.wait().await?
            }
        };

        let mut stdout = String::from_utf8_lossy(&stdout_task.await.unwrap_or_default()).to_string();
        let stderr = String::from_utf8_lossy(&stderr_task.await.unwrap_or_default()).to_string();

        if timed_out {
            if !stdout.is_empty() && !stdout.ends_with('\n') {
                stdout.push('\n');
            }
        }

        Ok(CommandOutput {
            stdout,
            stderr,
            exit_code: status.code().unwrap_or(if timed_out { 124 } else { -1 }),
            timed_out,
            duration_ms: started.elapsed().as_millis(),
        })
    }

    async fn grep(&self, pattern: &str, path: &str, include: Option<&str>) -> Result<Vec<GrepMatch>> {
        let root = self.resolve(path)?;
        let regex = regex::Regex::new(pattern)
            .map_err(|e| SessionError::Tool { tool: "grep".to_string(), message: e.to_string() })?;
        let include_glob = include
            .map(|pat| glob::Pattern::new(pat))
            .transpose()
            .map_err(|e| SessionError::Tool { tool: "grep".to_string(), message: e.to_string() })?;

        let mut matches = Vec::new();
        for entry in walkdir::WalkDir::new(&root).into_iter().filter_map(|e| e.ok()) {
            if !entry.file_type().is_file() {
                continue;
            }
            if let Some(filter) = &include_glob {
                let name = entry.file_name().to_string_lossy();
                if !filter.matches(&name) {
                    continue;
                }
            }
            let Ok(content) = tokio::fs::read_to_string(entry.path()).await else {
                continue;
            };
            for (i, line) in content.lines().enumerate() {
                if regex.is_match(line) {
                    matches.push(GrepMatch {
                        path: entry.path().to_string_lossy().to_string(),
                        line_number: i + 1,
                        line: line.to_string(),
                    });
                }
            }
        }
        Ok(matches)
    }

    async fn glob(&self, pattern: &str) -> Result<Vec<String>> {
        let pattern_path = self.working_directory.join(pattern);
        let pattern_string = pattern_path.to_string_lossy().to_string();
        let mut matches: Vec<PathBuf> = glob::glob(&pattern_string)
            .map_err(|e| SessionError::Tool { tool: "glob".to_string(), message: e.to_string() })?
            .filter_map(|r| r.ok())
            .collect();
        matches.sort();
        Ok(matches.into_iter().map(|p| p.to_string_lossy().to_string()).collect())
    }
}

#[cfg(unix)]
async fn terminate(child: &mut Child) {
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    if let Some(pid) = child.id() {
        let _ = killpg(Pid::from_raw(pid as i32), Signal::SIGTERM);
    }
    tokio::time::sleep(Duration::from_secs(2)).await;
    if matches!(child.try_wait(), Ok(None)) {
        if let Some(pid) = child.id() {
            let _ = killpg(Pid::from_raw(pid as i32), Signal::SIGKILL);
        }
    }
}

#[cfg(not(unix))]
async fn terminate(child: &mut Child) {
    let _ = child.kill().await;
}

fn build_shell_command(command: &str) -> Command {
    #[cfg(unix)]
    {
        let mut cmd = Command::new("/bin/sh");
        cmd.arg("-c").arg(command);
        // Put the child in its own session/process group so `terminate`
        // can signal the whole subtree via `killpg`, not just the shell.
        use std::os::unix::process::CommandExt;
        unsafe {
            cmd.pre_exec(|| {
                let _ = nix::unistd::setsid();
                Ok(())
            });
        }
        cmd
    }
    #[cfg(not(unix))]
    {
        let mut cmd = Command::new("cmd");
        cmd.arg("/C").arg(command);
        cmd
    }
}

async fn read_to_end(pipe: Option<impl tokio::io::AsyncRead + Unpin>) -> Vec<u8> {
    use tokio::io::AsyncReadExt;
    let mut buf = Vec::new();
    if let Some(mut pipe) = pipe {
        let _ = pipe.read_to_end(&mut buf).await;
    }
    buf
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn write_then_read_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let env = LocalFilesystemEnvironment::new(dir.path());
        env.write_file("a.txt", "hello\nworld\n").await.unwrap();
        let content = env.read_file("a.txt", None, None).await.unwrap();
        assert_eq!(content, "hello\nworld\n");
    }

    #[tokio::test]
    async fn read_file_respects_offset_and_limit() {
        let dir = tempfile::tempdir().unwrap();
        let env = LocalFilesystemEnvironment::new(dir.path());
        env.write_file("a.txt", "l1\nl2\nl3\nl4\n").await.unwrap();
        let content = env.read_file("a.txt", Some(2), Some(2)).await.unwrap();
        assert_eq!(content, "l2\nl3");
    }

    #[tokio::test]
    async fn path_traversal_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let env = LocalFilesystemEnvironment::new(dir.path());
        let err = env.write_file("../escape.txt", "x").await.unwrap_err();
        assert!(matches!(err, SessionError::PathTraversal(_)));
    }

    #[tokio::test]
    async fn exec_command_captures_stdout() {
        let dir = tempfile::tempdir().unwrap();
        let env = LocalFilesystemEnvironment::new(dir.path());
        let out = env.exec_command("echo hi", 5_000).await.unwrap();
        assert_eq!(out.stdout.trim(), "hi");
        assert_eq!(out.exit_code, 0);
        assert!(!out.timed_out);
    }

    #[tokio::test]
    async fn exec_command_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let env = LocalFilesystemEnvironment::new(dir.path());
        let out = env.exec_command("sleep 5", 50).await.unwrap();
        assert!(out.timed_out);
    }

    #[tokio::test]
    async fn grep_finds_matching_lines() {
        let dir = tempfile::tempdir().unwrap();
        let env = LocalFilesystemEnvironment::new(dir.path());
        env.write_file("a.rs", "fn main() {}\n// TODO: fix\n").await.unwrap();
        let matches = env.grep("TODO", ".", None).await.unwrap();
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].line_number, 2);
    }

    #[tokio::test]
    async fn file_exists_is_false_for_missing_path() {
        let dir = tempfile::tempdir().unwrap();
        let env = LocalFilesystemEnvironment::new(dir.path());
        assert!(!env.file_exists("nope.txt").await);
    }
}
