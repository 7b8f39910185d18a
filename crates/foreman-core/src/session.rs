//! Conversation state owned by the worker loop.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{CoreError, ToolCommand};

/// Role of a turn in the conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnRole {
    /// Instructions preceding the task.
    System,
    /// The task prompt.
    User,
    /// A model response.
    Assistant,
    /// The outcome of a tool command, or a validation error.
    Tool,
}

/// A single turn in the conversation history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    /// Role of this turn.
    pub role: TurnRole,

    /// Turn content as sent to the model.
    pub content: String,

    /// Command the assistant issued in this turn.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<ToolCommand>,

    /// Whether a tool turn reports a failure.
    #[serde(default)]
    pub is_error: bool,

    /// Unix timestamp (milliseconds) when the turn was recorded.
    pub timestamp_ms: i64,
}

impl Turn {
    /// Create a new turn.
    pub fn new(role: TurnRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            command: None,
            is_error: false,
            timestamp_ms: Utc::now().timestamp_millis(),
        }
    }

    /// Create a system turn.
    pub fn system(content: impl Into<String>) -> Self {
        Self::new(TurnRole::System, content)
    }

    /// Create a user turn.
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(TurnRole::User, content)
    }

    /// Create an assistant turn carrying the raw response.
    pub fn assistant(content: impl Into<String>, command: Option<ToolCommand>) -> Self {
        Self {
            command,
            ..Self::new(TurnRole::Assistant, content)
        }
    }

    /// Create a tool-result turn.
    pub fn tool_result(content: impl Into<String>, is_error: bool) -> Self {
        Self {
            is_error,
            ..Self::new(TurnRole::Tool, content)
        }
    }
}

/// Ordered conversation history of one task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    /// Task this session belongs to.
    pub task_id: String,

    /// Turns in the order they happened.
    pub turns: Vec<Turn>,

    /// Validation failures since the last valid command.
    #[serde(default)]
    pub consecutive_failures: u32,

    /// Last time the session was modified.
    pub updated_at: DateTime<Utc>,
}

impl Session {
    /// Create an empty session.
    pub fn new(task_id: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            turns: Vec::new(),
            consecutive_failures: 0,
            updated_at: Utc::now(),
        }
    }

    /// Append a turn.
    pub fn push(&mut self, turn: Turn) {
        self.turns.push(turn);
        self.updated_at = Utc::now();
    }

    /// Number of turns recorded.
    pub fn len(&self) -> usize {
        self.turns.len()
    }

    /// True if no turns have been recorded.
    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// Most recent turn, if any.
    pub fn last(&self) -> Option<&Turn> {
        self.turns.last()
    }

    /// Serialize to pretty JSON.
    pub fn to_json(&self) -> Result<String, CoreError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Parse from JSON.
    pub fn from_json(json: &str) -> Result<Self, CoreError> {
        Ok(serde_json::from_str(json)?)
    }
}
