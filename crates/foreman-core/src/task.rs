//! Task record types.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{CoreError, TaskId, TaskState};

/// Reference to the prompt a task was submitted with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptRef {
    /// Snapshot of the prompt file owned by the controller.
    pub path: PathBuf,

    /// Hex-encoded SHA-256 of the prompt content.
    pub sha256: String,
}

impl PromptRef {
    /// Create a new PromptRef.
    pub fn new(path: impl Into<PathBuf>, sha256: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            sha256: sha256.into(),
        }
    }
}

/// Resource limits applied to a task's container, snapshotted at submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceLimits {
    /// Relative CPU weight (docker `--cpu-shares`).
    pub cpu_shares: u32,

    /// Memory ceiling in megabytes.
    pub memory_limit_mb: u64,

    /// Wall-clock timeout in seconds, measured from container start.
    pub timeout_secs: u64,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            cpu_shares: 1024,
            memory_limit_mb: 2048,
            timeout_secs: 1800,
        }
    }
}

/// A Task is one unit of sandboxed work tracked by the registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Unique task identifier.
    pub id: TaskId,

    /// Prompt the worker is launched with.
    pub prompt: PromptRef,

    /// Current lifecycle state.
    pub state: TaskState,

    /// When the task was submitted.
    pub submitted_at: DateTime<Utc>,

    /// When the container started.
    pub started_at: Option<DateTime<Utc>>,

    /// When the task reached a terminal state.
    pub finished_at: Option<DateTime<Utc>>,

    /// Limits in force for this task.
    pub limits: ResourceLimits,

    /// Container running this task, while it runs.
    pub container_id: Option<String>,

    /// Host directory holding the collected workspace.
    pub result_dir: Option<PathBuf>,

    /// Container exit code, if it exited on its own.
    pub exit_code: Option<i64>,

    /// Why the container was killed, if it was.
    pub termination: Option<String>,

    /// Launch error for failed tasks.
    pub error: Option<String>,
}

impl Task {
    /// Create a new pending Task.
    pub fn new(prompt: PromptRef, limits: ResourceLimits) -> Self {
        Self {
            id: TaskId::generate(),
            prompt,
            state: TaskState::Pending,
            submitted_at: Utc::now(),
            started_at: None,
            finished_at: None,
            limits,
            container_id: None,
            result_dir: None,
            exit_code: None,
            termination: None,
            error: None,
        }
    }

    /// Builder method to set a specific ID (useful for testing).
    pub fn with_id(mut self, id: TaskId) -> Self {
        self.id = id;
        self
    }

    /// Check if the task is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Move to `next`, applying `update`. Illegal transitions leave the task untouched.
    pub fn transition(&mut self, next: TaskState, update: TaskUpdate) -> Result<(), CoreError> {
        if !self.state.can_transition_to(next) {
            return Err(CoreError::InvalidStateTransition {
                from: self.state,
                to: next,
            });
        }

        let now = Utc::now();
        self.state = next;
        if next == TaskState::Running {
            self.started_at = Some(now);
        }
        if next.is_terminal() {
            self.finished_at = Some(now);
        }

        if let Some(cid) = update.container_id {
            self.container_id = Some(cid);
        }
        if let Some(dir) = update.result_dir {
            self.result_dir = Some(dir);
        }
        if update.exit_code.is_some() {
            self.exit_code = update.exit_code;
        }
        if update.termination.is_some() {
            self.termination = update.termination;
        }
        if update.error.is_some() {
            self.error = update.error;
        }
        Ok(())
    }
}

/// Optional fields recorded alongside a state transition.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskUpdate {
    pub container_id: Option<String>,
    pub result_dir: Option<PathBuf>,
    pub exit_code: Option<i64>,
    pub termination: Option<String>,
    pub error: Option<String>,
}

impl TaskUpdate {
    /// An update carrying no fields.
    pub fn none() -> Self {
        Self::default()
    }

    pub fn with_container(mut self, container_id: impl Into<String>) -> Self {
        self.container_id = Some(container_id.into());
        self
    }

    pub fn with_result_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.result_dir = Some(dir.into());
        self
    }

    pub fn with_exit_code(mut self, code: Option<i64>) -> Self {
        self.exit_code = code;
        self
    }

    pub fn with_termination(mut self, cause: impl Into<String>) -> Self {
        self.termination = Some(cause.into());
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }
}
