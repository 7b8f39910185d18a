//! Foreman controller library.
//!
//! Host-side half of Foreman: a task registry shared between controller
//! processes, a container lifecycle manager behind the [`ContainerRuntime`]
//! seam, and the [`Orchestrator`] composing them.

pub mod config;
pub mod error;
pub mod lifecycle;
pub mod lock;
pub mod orchestrator;
pub mod registry;
pub mod runtime;

pub use config::{ForemanConfig, ModelSettings, DEFAULT_CONFIG_FILE};
pub use error::{ConfigError, LifecycleError, OrchestratorError, RegistryError, RuntimeError};
pub use lifecycle::{ContainerHandle, ContainerManager, Outcome, TerminationCause};
pub use orchestrator::{Orchestrator, TaskResults};
pub use registry::{DispatcherLease, TaskRegistry};
pub use runtime::{ContainerRuntime, ContainerSpec, DockerRuntime, Mount};
