//! Controller error types.

use std::path::PathBuf;

use thiserror::Error;

use foreman_core::{CoreError, TaskId};

/// Configuration could not be loaded.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Invalid YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Task registry errors.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error("Snapshot IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Another controller is dispatching from {0}")]
    DispatcherBusy(PathBuf),
}

/// A container runtime call failed.
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("Cannot connect to the container runtime: {0}")]
    Connect(#[source] bollard::errors::Error),

    #[error("Docker {operation} failed: {source}")]
    Docker {
        operation: &'static str,
        source: bollard::errors::Error,
    },

    #[error("Container not found: {0}")]
    NotFound(String),

    #[error("Image build failed: {0}")]
    Build(String),

    #[error("Archive error: {0}")]
    Archive(#[from] std::io::Error),

    #[error("Unexpected runtime response: {0}")]
    Protocol(String),
}

/// Container lifecycle errors.
#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("Image build failed: {0}")]
    Build(RuntimeError),

    #[error("Launch failed: {0}")]
    Launch(String),

    #[error("Artifact collection failed: {0}")]
    Collect(String),

    #[error("Kill failed: {0}")]
    Kill(RuntimeError),
}

/// Orchestrator errors.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("Cannot read prompt {path}: {source}")]
    PromptUnreadable {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Task is not running: {0}")]
    NotRunning(TaskId),

    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<CoreError> for OrchestratorError {
    fn from(e: CoreError) -> Self {
        Self::Registry(RegistryError::Core(e))
    }
}
