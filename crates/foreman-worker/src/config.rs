//! Worker configuration.
//!
//! The controller passes everything through environment variables; the
//! same values are accepted as flags for running the worker by hand.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;

use foreman_core::layout;
use foreman_model::{HttpModelClient, ModelClient, ModelError, ScriptedModel};

use crate::agent::DEFAULT_MAX_VALIDATION_FAILURES;

/// Worker configuration.
#[derive(Debug, Clone, Parser)]
#[command(name = "foreman-worker", about = "Foreman sandbox worker")]
pub struct WorkerConfig {
    /// Task identifier, used for the audit log name.
    #[arg(long, env = "TASK_ID", default_value = "task")]
    pub task_id: String,

    /// Workspace directory.
    #[arg(long, env = "FOREMAN_WORKSPACE", default_value = layout::WORKSPACE_ROOT)]
    pub workspace: PathBuf,

    /// Model name sent with each request.
    #[arg(long, env = "FOREMAN_MODEL", default_value = "gpt-4o")]
    pub model: String,

    /// Base URL of the OpenAI-compatible API.
    #[arg(long, env = "FOREMAN_API_BASE", default_value = "https://api.openai.com/v1")]
    pub api_base: String,

    /// Name of the environment variable holding the API key.
    #[arg(long, env = "FOREMAN_API_KEY_ENV", default_value = "OPENAI_API_KEY")]
    pub api_key_env: String,

    /// Consecutive malformed replies tolerated before giving up.
    #[arg(long, env = "FOREMAN_MAX_VALIDATION_FAILURES", default_value_t = DEFAULT_MAX_VALIDATION_FAILURES)]
    pub max_validation_failures: u32,

    /// Default timeout for shell commands (seconds).
    #[arg(long, env = "FOREMAN_SHELL_TIMEOUT_SECS", default_value_t = 60)]
    pub shell_timeout_secs: u64,

    /// Verify the workspace and exit.
    #[arg(long)]
    pub check: bool,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            task_id: "task".to_string(),
            workspace: PathBuf::from(layout::WORKSPACE_ROOT),
            model: "gpt-4o".to_string(),
            api_base: "https://api.openai.com/v1".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            max_validation_failures: DEFAULT_MAX_VALIDATION_FAILURES,
            shell_timeout_secs: 60,
            check: false,
        }
    }
}

impl WorkerConfig {
    /// API key from the configured variable; `None` if unset or empty.
    pub fn api_key(&self) -> Option<String> {
        std::env::var(&self.api_key_env)
            .ok()
            .filter(|key| !key.trim().is_empty())
    }

    /// Shell timeout as a duration.
    pub fn shell_timeout(&self) -> Duration {
        Duration::from_secs(self.shell_timeout_secs)
    }

    /// Build the model client. Without an API key the scripted demo model
    /// is used so the pipeline can run offline.
    pub fn model_client(&self) -> Result<Arc<dyn ModelClient>, ModelError> {
        match self.api_key() {
            Some(key) => {
                let client = HttpModelClient::new(&self.api_base)
                    .with_api_key(key)
                    .with_model(&self.model)
                    .with_timeout(Duration::from_secs(120))?;
                Ok(Arc::new(client))
            }
            None => Ok(Arc::new(ScriptedModel::demo())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_override_defaults() {
        let config = WorkerConfig::parse_from([
            "foreman-worker",
            "--task-id",
            "abc",
            "--workspace",
            "/tmp/ws",
            "--max-validation-failures",
            "2",
        ]);
        assert_eq!(config.task_id, "abc");
        assert_eq!(config.workspace, PathBuf::from("/tmp/ws"));
        assert_eq!(config.max_validation_failures, 2);
        assert!(!config.check);
    }

    #[test]
    fn test_missing_key_env_means_no_key() {
        let config = WorkerConfig {
            api_key_env: "FOREMAN_TEST_SURELY_UNSET_KEY".to_string(),
            ..Default::default()
        };
        assert_eq!(config.api_key(), None);
        assert!(config.model_client().is_ok());
    }
}
