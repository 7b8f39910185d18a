//! Sandbox toolbox: the only code that touches the filesystem or spawns
//! processes on the model's behalf.
//!
//! Every path argument goes through [`resolve_in`] first.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use serde::Serialize;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info};

use foreman_core::{layout, CompletionMarker};

use crate::error::ToolError;
use crate::paths::{display_relative, resolve_in};

/// Per-stream cap on captured shell output.
pub const DEFAULT_OUTPUT_LIMIT: usize = 64 * 1024;

/// Captured result of a shell command. A non-zero exit is still a result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ShellOutput {
    pub stdout: String,
    pub stderr: String,
    /// `None` when the process was killed by a signal.
    pub exit_code: Option<i32>,
}

/// Tool operations confined to one workspace directory.
#[derive(Debug, Clone)]
pub struct Toolbox {
    root: PathBuf,
    task_id: String,
    shell_timeout: Duration,
    output_limit: usize,
}

impl Toolbox {
    /// Create a toolbox rooted at `workspace`, which must exist.
    pub fn new(workspace: &Path, task_id: impl Into<String>) -> Result<Self, ToolError> {
        let root = workspace
            .canonicalize()
            .map_err(|_| ToolError::NotFound(workspace.display().to_string()))?;
        Ok(Self {
            root,
            task_id: task_id.into(),
            shell_timeout: Duration::from_secs(60),
            output_limit: DEFAULT_OUTPUT_LIMIT,
        })
    }

    /// Set the default shell timeout.
    pub fn with_shell_timeout(mut self, timeout: Duration) -> Self {
        self.shell_timeout = timeout;
        self
    }

    /// Set the per-stream output cap.
    pub fn with_output_limit(mut self, bytes: usize) -> Self {
        self.output_limit = bytes;
        self
    }

    /// Canonical workspace root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Task this toolbox works for.
    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    /// Workspace-relative form of a resolved path.
    pub fn relative(&self, path: &Path) -> String {
        display_relative(&self.root, path)
    }

    /// Resolve a model-supplied path inside the workspace.
    pub fn resolve(&self, path: &str) -> Result<PathBuf, ToolError> {
        resolve_in(&self.root, path)
    }

    /// Run `command` through `sh -c` in the workspace.
    pub async fn execute_shell(
        &self,
        command: &str,
        timeout_secs: Option<u64>,
    ) -> Result<ShellOutput, ToolError> {
        if command.trim().is_empty() {
            return Err(ToolError::InvalidArgument("empty command".to_string()));
        }
        let timeout = timeout_secs
            .map(Duration::from_secs)
            .unwrap_or(self.shell_timeout);

        info!(command = %command, timeout_secs = timeout.as_secs(), "Executing shell command");

        let child = Command::new("sh")
            .arg("-c")
            .arg(command)
            .current_dir(&self.root)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(result) => result?,
            Err(_) => return Err(ToolError::Timeout(timeout.as_secs())),
        };

        debug!(exit_code = ?output.status.code(), "Shell command finished");
        Ok(ShellOutput {
            stdout: truncate(&String::from_utf8_lossy(&output.stdout), self.output_limit),
            stderr: truncate(&String::from_utf8_lossy(&output.stderr), self.output_limit),
            exit_code: output.status.code(),
        })
    }

    /// Create a new file. Missing parent directories are created.
    pub async fn create_file(&self, path: &str, content: &str) -> Result<PathBuf, ToolError> {
        let target = self.resolve(path)?;
        self.ensure_writable(&target)?;

        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).await?;
        }
        let mut file = fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&target)
            .await
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::AlreadyExists => ToolError::AlreadyExists(path.to_string()),
                _ => ToolError::Io(e),
            })?;
        file.write_all(content.as_bytes()).await?;
        file.flush().await?;
        Ok(target)
    }

    /// Read a file's content (lossily decoded as UTF-8).
    pub async fn read_file(&self, path: &str) -> Result<String, ToolError> {
        let target = self.resolve(path)?;
        let meta = self.existing(&target, path).await?;
        if meta.is_dir() {
            return Err(ToolError::InvalidArgument(format!("{path} is a directory")));
        }
        let bytes = fs::read(&target).await?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Overwrite an existing file, or only lines `start..=end` (1-based) of it.
    pub async fn edit_file(
        &self,
        path: &str,
        content: &str,
        start_line: Option<usize>,
        end_line: Option<usize>,
    ) -> Result<PathBuf, ToolError> {
        let target = self.resolve(path)?;
        self.ensure_writable(&target)?;
        let meta = self.existing(&target, path).await?;
        if meta.is_dir() {
            return Err(ToolError::InvalidArgument(format!("{path} is a directory")));
        }

        let new_content = match (start_line, end_line) {
            (None, None) => content.to_string(),
            (start, end) => {
                let existing = String::from_utf8_lossy(&fs::read(&target).await?).into_owned();
                replace_lines(&existing, start.unwrap_or(1), end, content)?
            }
        };
        fs::write(&target, new_content).await?;
        Ok(target)
    }

    /// List a directory. Recursive listings return workspace-relative paths.
    pub async fn list_files(&self, path: &str, recursive: bool) -> Result<Vec<String>, ToolError> {
        let target = self.resolve(path)?;
        let meta = self.existing(&target, path).await?;
        if !meta.is_dir() {
            return Err(ToolError::InvalidArgument(format!("{path} is not a directory")));
        }

        let mut entries = Vec::new();
        if recursive {
            let mut pending = vec![target];
            while let Some(dir) = pending.pop() {
                let mut read = fs::read_dir(&dir).await?;
                while let Some(entry) = read.next_entry().await? {
                    let entry_path = entry.path();
                    // file_type() does not follow symlinks, so links are listed but never walked.
                    let is_dir = entry.file_type().await?.is_dir();
                    let mut shown = display_relative(&self.root, &entry_path);
                    if is_dir {
                        shown.push('/');
                        pending.push(entry_path);
                    }
                    entries.push(shown);
                }
            }
        } else {
            let mut read = fs::read_dir(&target).await?;
            while let Some(entry) = read.next_entry().await? {
                let mut name = entry.file_name().to_string_lossy().into_owned();
                if entry.file_type().await?.is_dir() {
                    name.push('/');
                }
                entries.push(name);
            }
        }
        entries.sort();
        Ok(entries)
    }

    /// Write the completion marker. Succeeds at most once per workspace.
    pub async fn task_complete(&self, message: &str) -> Result<CompletionMarker, ToolError> {
        let marker = CompletionMarker::new(message).with_task_id(self.task_id.clone());
        let json = serde_json::to_vec_pretty(&marker)
            .map_err(|e| ToolError::InvalidArgument(e.to_string()))?;

        let path = self.root.join(layout::MARKER_FILE);
        let mut file = fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::AlreadyExists => ToolError::MarkerExists,
                _ => ToolError::Io(e),
            })?;
        file.write_all(&json).await?;
        file.sync_all().await?;

        info!(task_id = %self.task_id, "Completion marker written");
        Ok(marker)
    }

    /// Short description of the workspace's top level for the model.
    pub async fn summary(&self, max_entries: usize) -> Result<String, ToolError> {
        let entries = self.list_files(".", false).await?;
        let total = entries.len();
        let mut shown: Vec<String> = entries.into_iter().take(max_entries).collect();
        if total > max_entries {
            shown.push(format!("... and {} more", total - max_entries));
        }
        if shown.is_empty() {
            return Ok("Workspace is empty.".to_string());
        }
        Ok(format!("Workspace files: {}", shown.join(", ")))
    }

    fn ensure_writable(&self, target: &Path) -> Result<(), ToolError> {
        let relative = target.strip_prefix(&self.root).unwrap_or(target);
        // Anything at or below a reserved top-level name.
        if let Some(first) = relative.components().next() {
            let name = first.as_os_str().to_string_lossy();
            if layout::is_reserved(&name) {
                return Err(ToolError::ReservedPath(name.into_owned()));
            }
        }
        Ok(())
    }

    async fn existing(&self, target: &Path, shown: &str) -> Result<std::fs::Metadata, ToolError> {
        fs::metadata(target).await.map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => ToolError::NotFound(shown.to_string()),
            _ => ToolError::Io(e),
        })
    }
}

/// Replace lines `start..=end` (1-based). Line endings and the presence of
/// a final newline are kept as they were.
fn replace_lines(
    existing: &str,
    start: usize,
    end: Option<usize>,
    replacement: &str,
) -> Result<String, ToolError> {
    let eol = if existing.contains("\r\n") { "\r\n" } else { "\n" };
    let mut lines: Vec<(&str, &str)> = existing.split_inclusive('\n').map(split_eol).collect();
    let end = end.unwrap_or(start);
    if start == 0 || end < start || start > lines.len() + 1 {
        return Err(ToolError::InvalidArgument(format!(
            "invalid line range {start}..={end} for a file of {} lines",
            lines.len()
        )));
    }
    let end = end.min(lines.len());
    let tail = lines.split_off(end.max(start - 1));
    lines.truncate(start - 1);
    let touches_end = tail.is_empty();
    lines.extend(replacement.lines().map(|line| (line, eol)));
    lines.extend(tail);

    if touches_end {
        let final_newline = existing.is_empty() || existing.ends_with('\n');
        if let Some(last) = lines.last_mut() {
            if !final_newline {
                last.1 = "";
            } else if last.1.is_empty() {
                last.1 = eol;
            }
        }
    }

    let last = lines.len().saturating_sub(1);
    let mut out = String::with_capacity(existing.len() + replacement.len());
    for (i, (text, ending)) in lines.iter().enumerate() {
        out.push_str(text);
        // Only the final line may go unterminated.
        out.push_str(if ending.is_empty() && i < last { eol } else { ending });
    }
    Ok(out)
}

fn split_eol(line: &str) -> (&str, &str) {
    if let Some(text) = line.strip_suffix("\r\n") {
        (text, "\r\n")
    } else if let Some(text) = line.strip_suffix('\n') {
        (text, "\n")
    } else {
        (line, "")
    }
}

fn truncate(text: &str, limit: usize) -> String {
    if text.len() <= limit {
        return text.to_string();
    }
    let mut cut = limit;
    while !text.is_char_boundary(cut) {
        cut -= 1;
    }
    format!(
        "{}\n[truncated {} bytes]",
        &text[..cut],
        text.len() - cut
    )
}
