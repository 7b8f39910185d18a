//! The write-once completion marker.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Content of `complete.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionMarker {
    /// Message supplied with `task_complete`.
    pub message: String,

    /// When the marker was written.
    pub completed_at: DateTime<Utc>,

    /// Task that wrote the marker, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
}

impl CompletionMarker {
    /// Create a marker stamped with the current time.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            completed_at: Utc::now(),
            task_id: None,
        }
    }

    /// Builder method to record the task id.
    pub fn with_task_id(mut self, task_id: impl Into<String>) -> Self {
        self.task_id = Some(task_id.into());
        self
    }
}
