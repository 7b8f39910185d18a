//! Foreman sandbox worker.
//!
//! Runs inside the task container. The [`WorkerLoop`] reads `prompt.md` from
//! the workspace, converses with a [`foreman_model::ModelClient`] and carries
//! out the returned commands through the confined [`Toolbox`] until the model
//! calls `task_complete`.

pub mod agent;
pub mod audit;
pub mod config;
pub mod error;
pub mod paths;
pub mod prompt;
pub mod store;
pub mod toolbox;
pub mod validate;

pub use agent::{LoopOutcome, LoopPhase, WorkerLoop};
pub use config::WorkerConfig;
pub use error::{ToolError, ValidationError, WorkerError};
pub use toolbox::{ShellOutput, Toolbox};
