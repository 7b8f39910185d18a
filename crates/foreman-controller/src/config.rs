//! Controller configuration.
//!
//! Loaded from a YAML file. Every field has a default, so a missing file
//! or a partial file is fine:
//!
//! ```yaml
//! image: foreman-worker:latest
//! state_dir: .foreman
//! timeout_secs: 600
//! model:
//!   name: gpt-4o-mini
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use foreman_core::{layout, ResourceLimits, TaskId};

use crate::error::ConfigError;

/// Default configuration file name.
pub const DEFAULT_CONFIG_FILE: &str = "foreman.yaml";

/// Controller configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ForemanConfig {
    /// Worker image tag.
    pub image: String,

    /// Docker build context for the worker image.
    pub build_context: PathBuf,

    /// Dockerfile, relative to the build context.
    pub dockerfile: PathBuf,

    /// Docker daemon socket; the platform default when unset.
    pub docker_socket: Option<PathBuf>,

    /// Root for prompt snapshots, workspaces, results and the task registry.
    pub state_dir: PathBuf,

    /// Relative CPU weight per container.
    pub cpu_shares: u32,

    /// Memory ceiling per container (MiB).
    pub memory_limit_mb: u64,

    /// Wall-clock limit per task (seconds).
    pub timeout_secs: u64,

    /// Containers allowed to run at once.
    pub max_concurrent: usize,

    /// Settings passed through to the worker.
    pub model: ModelSettings,
}

/// Worker-side model settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ModelSettings {
    pub name: String,
    pub api_base: String,
    /// Host environment variable holding the API key; forwarded under the
    /// same name.
    pub api_key_env: String,
    pub max_validation_failures: u32,
    pub shell_timeout_secs: u64,
}

impl Default for ForemanConfig {
    fn default() -> Self {
        let limits = ResourceLimits::default();
        Self {
            image: "foreman-worker:latest".to_string(),
            build_context: PathBuf::from("."),
            dockerfile: PathBuf::from("Dockerfile"),
            docker_socket: None,
            state_dir: PathBuf::from(".foreman"),
            cpu_shares: limits.cpu_shares,
            memory_limit_mb: limits.memory_limit_mb,
            timeout_secs: limits.timeout_secs,
            max_concurrent: 2,
            model: ModelSettings::default(),
        }
    }
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            name: "gpt-4o".to_string(),
            api_base: "https://api.openai.com/v1".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            max_validation_failures: 5,
            shell_timeout_secs: 60,
        }
    }
}

impl ForemanConfig {
    /// Load and validate `path`. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let config = match std::fs::read_to_string(path) {
            Ok(text) => Self::from_yaml(&text)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "No config file, using defaults");
                Self::default()
            }
            Err(source) => {
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };
        config.validate()?;
        Ok(config)
    }

    /// Parse YAML without validating.
    pub fn from_yaml(text: &str) -> Result<Self, ConfigError> {
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(text)?)
    }

    /// Reject values that would make every task fail.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_concurrent == 0 {
            return Err(ConfigError::Invalid("max_concurrent must be at least 1".into()));
        }
        if self.timeout_secs == 0 {
            return Err(ConfigError::Invalid("timeout_secs must be positive".into()));
        }
        if self.memory_limit_mb == 0 {
            return Err(ConfigError::Invalid("memory_limit_mb must be positive".into()));
        }
        if self.image.trim().is_empty() {
            return Err(ConfigError::Invalid("image must not be empty".into()));
        }
        Ok(())
    }

    /// Limits applied to newly submitted tasks.
    pub fn limits(&self) -> ResourceLimits {
        ResourceLimits {
            cpu_shares: self.cpu_shares,
            memory_limit_mb: self.memory_limit_mb,
            timeout_secs: self.timeout_secs,
        }
    }

    /// Content-addressed prompt snapshots.
    pub fn prompts_dir(&self) -> PathBuf {
        self.state_dir.join("prompts")
    }

    /// Host directory mounted as a task's workspace.
    pub fn workspace_dir(&self, id: &TaskId) -> PathBuf {
        self.state_dir.join("workspaces").join(id.as_str())
    }

    /// Host directory receiving a task's collected artifacts.
    pub fn results_dir(&self, id: &TaskId) -> PathBuf {
        self.state_dir.join("results").join(id.as_str())
    }

    /// Registry snapshot file.
    pub fn registry_path(&self) -> PathBuf {
        self.state_dir.join("tasks.json")
    }

    /// Environment for a task's worker container.
    pub fn worker_env(&self, id: &TaskId) -> Vec<(String, String)> {
        let mut env = vec![
            ("TASK_ID".to_string(), id.to_string()),
            (
                "FOREMAN_WORKSPACE".to_string(),
                layout::WORKSPACE_ROOT.to_string(),
            ),
            ("FOREMAN_MODEL".to_string(), self.model.name.clone()),
            ("FOREMAN_API_BASE".to_string(), self.model.api_base.clone()),
            (
                "FOREMAN_API_KEY_ENV".to_string(),
                self.model.api_key_env.clone(),
            ),
            (
                "FOREMAN_MAX_VALIDATION_FAILURES".to_string(),
                self.model.max_validation_failures.to_string(),
            ),
            (
                "FOREMAN_SHELL_TIMEOUT_SECS".to_string(),
                self.model.shell_timeout_secs.to_string(),
            ),
        ];
        if let Ok(key) = std::env::var(&self.model.api_key_env) {
            env.push((self.model.api_key_env.clone(), key));
        }
        env
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let config = ForemanConfig::from_yaml(
            "image: custom:1\ntimeout_secs: 5\nmodel:\n  name: small\n",
        )
        .unwrap();
        assert_eq!(config.image, "custom:1");
        assert_eq!(config.timeout_secs, 5);
        assert_eq!(config.model.name, "small");
        assert_eq!(config.model.api_key_env, "OPENAI_API_KEY");
        assert_eq!(config.max_concurrent, 2);
    }

    #[test]
    fn test_unknown_key_is_rejected() {
        assert!(ForemanConfig::from_yaml("imagee: typo\n").is_err());
    }

    #[test]
    fn test_validation() {
        let config = ForemanConfig {
            max_concurrent: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
        assert!(ForemanConfig::default().validate().is_ok());
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = ForemanConfig::load(&dir.path().join("absent.yaml")).unwrap();
        assert_eq!(config, ForemanConfig::default());
    }

    #[test]
    fn test_worker_env_carries_task_id() {
        let config = ForemanConfig::default();
        let env = config.worker_env(&TaskId::new("abc"));
        assert!(env.contains(&("TASK_ID".to_string(), "abc".to_string())));
        assert!(env.contains(&("FOREMAN_WORKSPACE".to_string(), "/workspace".to_string())));
    }
}
