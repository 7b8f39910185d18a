//! Audit events recorded by the worker for every action it takes.

use crate::ids::EventId;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A worker audit event, written as one JSON line to the audit log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    /// Unique event identifier.
    pub id: EventId,
    /// Task this event belongs to.
    pub task_id: String,
    /// Type of event.
    pub event_type: AuditEventType,
    /// Unix timestamp (milliseconds) when event occurred.
    pub timestamp_ms: i64,
    /// Event-specific metadata (tool name, error, etc.).
    pub metadata: HashMap<String, String>,
}

impl AuditEvent {
    /// Create a new audit event.
    pub fn new(
        task_id: impl Into<String>,
        event_type: AuditEventType,
        metadata: HashMap<String, String>,
    ) -> Self {
        Self {
            id: EventId::generate(),
            task_id: task_id.into(),
            event_type,
            timestamp_ms: chrono::Utc::now().timestamp_millis(),
            metadata,
        }
    }

    /// Create a SessionStarted event.
    pub fn session_started(task_id: &str, resumed: bool, turns: usize) -> Self {
        let mut metadata = HashMap::new();
        metadata.insert("resumed".to_string(), resumed.to_string());
        metadata.insert("turns".to_string(), turns.to_string());
        Self::new(task_id, AuditEventType::SessionStarted, metadata)
    }

    /// Create a ModelResponded event.
    pub fn model_responded(task_id: &str, payload: &str) -> Self {
        let mut metadata = HashMap::new();
        metadata.insert("payload".to_string(), payload.to_string());
        Self::new(task_id, AuditEventType::ModelResponded, metadata)
    }

    /// Create a ValidationFailed event.
    pub fn validation_failed(task_id: &str, detail: &str, consecutive: u32) -> Self {
        let mut metadata = HashMap::new();
        metadata.insert("detail".to_string(), detail.to_string());
        metadata.insert("consecutive".to_string(), consecutive.to_string());
        Self::new(task_id, AuditEventType::ValidationFailed, metadata)
    }

    /// Create a ToolRequested event.
    pub fn tool_requested(task_id: &str, tool_name: &str) -> Self {
        let mut metadata = HashMap::new();
        metadata.insert("tool_name".to_string(), tool_name.to_string());
        Self::new(task_id, AuditEventType::ToolRequested, metadata)
    }

    /// Create a ToolCompleted event.
    pub fn tool_completed(task_id: &str, tool_name: &str, is_error: bool) -> Self {
        let mut metadata = HashMap::new();
        metadata.insert("tool_name".to_string(), tool_name.to_string());
        metadata.insert("is_error".to_string(), is_error.to_string());
        Self::new(task_id, AuditEventType::ToolCompleted, metadata)
    }

    /// Create a TaskCompleted event.
    pub fn task_completed(task_id: &str, message: &str) -> Self {
        let mut metadata = HashMap::new();
        metadata.insert("message".to_string(), message.to_string());
        Self::new(task_id, AuditEventType::TaskCompleted, metadata)
    }

    /// Create a Fatal event.
    pub fn fatal(task_id: &str, error: &str) -> Self {
        let mut metadata = HashMap::new();
        metadata.insert("error".to_string(), error.to_string());
        Self::new(task_id, AuditEventType::Fatal, metadata)
    }
}

/// Type of audit event.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventType {
    /// Worker loop started, fresh or resumed.
    SessionStarted,
    /// Raw model response received.
    ModelResponded,
    /// Model response did not match any command shape.
    ValidationFailed,
    /// Tool command dispatched to the toolbox.
    ToolRequested,
    /// Tool command finished.
    ToolCompleted,
    /// Completion marker written.
    TaskCompleted,
    /// Unrecoverable worker error.
    Fatal,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tool_requested() {
        let event = AuditEvent::tool_requested("t1", "read_file");

        assert_eq!(event.task_id, "t1");
        assert_eq!(event.event_type, AuditEventType::ToolRequested);
        assert_eq!(
            event.metadata.get("tool_name"),
            Some(&"read_file".to_string())
        );
        assert!(event.timestamp_ms > 0);
    }

    #[test]
    fn test_validation_failed() {
        let event = AuditEvent::validation_failed("t1", "missing field `path`", 2);

        assert_eq!(event.event_type, AuditEventType::ValidationFailed);
        assert_eq!(event.metadata.get("consecutive"), Some(&"2".to_string()));
    }

    #[test]
    fn test_event_type_serializes_snake_case() {
        let json = serde_json::to_string(&AuditEventType::TaskCompleted).unwrap();
        assert_eq!(json, "\"task_completed\"");
    }
}
