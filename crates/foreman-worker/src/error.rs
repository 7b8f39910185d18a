//! Worker error types.
//!
//! `ToolError` and `ValidationError` are recovered inside the loop and shown
//! to the model. `WorkerError` is fatal: the worker process exits non-zero.

use thiserror::Error;

use foreman_core::CoreError;
use foreman_model::ModelError;

/// A tool operation failed. Rendered verbatim into the next tool turn.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("path escapes the workspace: {0}")]
    PathEscape(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("reserved workspace file: {0}")]
    ReservedPath(String),

    #[error("completion marker already written")]
    MarkerExists,

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("command timed out after {0}s")]
    Timeout(u64),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// A model payload did not match any command shape.
#[derive(Debug, Error)]
#[error("malformed command: {0}")]
pub struct ValidationError(pub String);

/// Unrecoverable worker errors.
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Failed to load prompt: {0}")]
    Prompt(String),

    #[error("Workspace unavailable: {0}")]
    Workspace(ToolError),

    #[error("Model error: {0}")]
    Model(#[from] ModelError),

    #[error("Session error: {0}")]
    Session(#[from] CoreError),

    #[error("Gave up after {limit} consecutive malformed commands")]
    TooManyValidationFailures { limit: u32 },

    #[error("Completion marker could not be written: {0}")]
    Completion(ToolError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
