//! Foreman Core Domain Types
//!
//! This crate contains pure domain types shared by the controller and the
//! sandboxed worker. It has no dependencies on:
//! - The container runtime
//! - The model API transport
//! - Async runtime specifics
//!
//! Everything here describes either the task lifecycle (controller side) or
//! the conversation and tool protocol (worker side).

pub mod command;
pub mod error;
pub mod event;
pub mod ids;
pub mod layout;
pub mod marker;
pub mod session;
pub mod status;
pub mod task;

// Re-export commonly used types
pub use command::ToolCommand;
pub use error::CoreError;
pub use event::{AuditEvent, AuditEventType};
pub use ids::{EventId, TaskId};
pub use marker::CompletionMarker;
pub use session::{Session, Turn, TurnRole};
pub use status::TaskState;
pub use task::{PromptRef, ResourceLimits, Task, TaskUpdate};
