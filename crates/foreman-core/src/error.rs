//! Core domain errors.

use thiserror::Error;

use crate::TaskState;

/// Core domain errors for Foreman.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Task not found.
    #[error("Task not found: {0}")]
    TaskNotFound(String),

    /// Invalid state transition.
    #[error("Invalid state transition: {from} -> {to}")]
    InvalidStateTransition { from: TaskState, to: TaskState },

    /// Invalid input.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
