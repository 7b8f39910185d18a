//! Task lifecycle states.

use serde::{Deserialize, Serialize};
use std::fmt;

/// State of a Task in the registry.
///
/// ```text
/// pending -> dispatching -> running -> { complete | incomplete }
///                        \-> failed
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    /// Submitted and waiting in the queue.
    #[default]
    Pending,
    /// Claimed by the orchestrator; a container is being launched.
    Dispatching,
    /// A container started and is being supervised.
    Running,
    /// The container exited and the completion marker was collected.
    Complete,
    /// The container ran but exited or timed out without a completion marker.
    Incomplete,
    /// The container never started (image or launch failure).
    Failed,
}

impl TaskState {
    /// Returns true if the task is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete | Self::Incomplete | Self::Failed)
    }

    /// Returns true if `next` is a legal successor of this state.
    pub fn can_transition_to(&self, next: TaskState) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Dispatching)
                | (Self::Dispatching, Self::Running)
                | (Self::Dispatching, Self::Failed)
                | (Self::Running, Self::Complete)
                | (Self::Running, Self::Incomplete)
        )
    }

    /// Lowercase name as shown to users.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Dispatching => "dispatching",
            Self::Running => "running",
            Self::Complete => "complete",
            Self::Incomplete => "incomplete",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
