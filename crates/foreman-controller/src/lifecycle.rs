//! Container lifecycle: build, launch, supervise, collect.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use foreman_core::{layout, Task, TaskId};

use crate::config::ForemanConfig;
use crate::error::LifecycleError;
use crate::runtime::{ContainerRuntime, ContainerSpec, Mount};

/// How long to wait for a killed container to be reaped.
const KILL_GRACE: Duration = Duration::from_secs(10);

/// A started worker container.
#[derive(Debug, Clone)]
pub struct ContainerHandle {
    pub container_id: String,
    pub task_id: TaskId,
    /// Host directory mounted at the container's workspace.
    pub workspace: PathBuf,
    pub started: Instant,
}

/// Why a container was stopped before it exited on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationCause {
    Timeout,
    Requested,
}

impl TerminationCause {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::Requested => "requested",
        }
    }
}

impl fmt::Display for TerminationCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of supervising one container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outcome {
    /// Exit status, when the runtime reported one.
    pub exit_code: Option<i64>,
    /// Set when the controller killed the container.
    pub forced: Option<TerminationCause>,
    pub elapsed: Duration,
}

impl Outcome {
    pub fn was_forced(&self) -> bool {
        self.forced.is_some()
    }
}

/// Drives worker containers through a [`ContainerRuntime`].
pub struct ContainerManager {
    runtime: Arc<dyn ContainerRuntime>,
    config: Arc<ForemanConfig>,
}

impl ContainerManager {
    pub fn new(runtime: Arc<dyn ContainerRuntime>, config: Arc<ForemanConfig>) -> Self {
        Self { runtime, config }
    }

    /// Build the worker image. Safe to repeat.
    pub async fn build_image(&self) -> Result<(), LifecycleError> {
        info!(image = %self.config.image, "Building worker image");
        self.runtime
            .build_image(
                &self.config.image,
                &self.config.build_context,
                &self.config.dockerfile,
            )
            .await
            .map_err(LifecycleError::Build)
    }

    /// Prepare a fresh workspace for `task` and start its container.
    pub async fn launch(&self, task: &Task) -> Result<ContainerHandle, LifecycleError> {
        let launch_err = |what: &str, e: &dyn std::error::Error| {
            LifecycleError::Launch(format!("{what}: {e}"))
        };

        let workspace = self.config.workspace_dir(&task.id);
        reset_dir(&workspace)
            .await
            .map_err(|e| launch_err("preparing workspace", &e))?;
        open_permissions(&workspace)
            .await
            .map_err(|e| launch_err("workspace permissions", &e))?;

        // Bind mounts need absolute host paths.
        let workspace = tokio::fs::canonicalize(&workspace)
            .await
            .map_err(|e| launch_err("resolving workspace", &e))?;
        let prompt = tokio::fs::canonicalize(&task.prompt.path)
            .await
            .map_err(|e| launch_err("resolving prompt", &e))?;

        let spec = ContainerSpec {
            name: container_name(&task.id),
            image: self.config.image.clone(),
            mounts: vec![
                Mount::rw(&workspace, layout::WORKSPACE_ROOT),
                Mount::ro(
                    prompt,
                    format!("{}/{}", layout::WORKSPACE_ROOT, layout::PROMPT_FILE),
                ),
            ],
            env: self.config.worker_env(&task.id),
            cpu_shares: task.limits.cpu_shares,
            memory_limit_mb: task.limits.memory_limit_mb,
        };

        let container_id = self
            .runtime
            .start(&spec)
            .await
            .map_err(|e| LifecycleError::Launch(e.to_string()))?;

        info!(task_id = %task.id, container_id = %container_id, "Container started");
        Ok(ContainerHandle {
            container_id,
            task_id: task.id.clone(),
            workspace,
            started: Instant::now(),
        })
    }

    /// Wait for the container to exit, killing it on timeout or cancellation.
    pub async fn supervise(
        &self,
        handle: &ContainerHandle,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Outcome {
        let cid = &handle.container_id;

        let cause = tokio::select! {
            result = self.runtime.wait(cid) => match result {
                Ok(code) => {
                    info!(task_id = %handle.task_id, exit_code = code, "Container exited");
                    return Outcome {
                        exit_code: Some(code),
                        forced: None,
                        elapsed: handle.started.elapsed(),
                    };
                }
                Err(e) => {
                    // Lost track of the container; make sure it is gone.
                    warn!(task_id = %handle.task_id, error = %e, "Waiting on container failed");
                    self.kill_quietly(cid).await;
                    return Outcome {
                        exit_code: None,
                        forced: None,
                        elapsed: handle.started.elapsed(),
                    };
                }
            },
            _ = tokio::time::sleep(timeout) => TerminationCause::Timeout,
            _ = cancel.cancelled() => TerminationCause::Requested,
        };

        warn!(task_id = %handle.task_id, cause = %cause, "Killing container");
        self.kill_quietly(cid).await;
        let exit_code = match tokio::time::timeout(KILL_GRACE, self.runtime.wait(cid)).await {
            Ok(Ok(code)) => Some(code),
            _ => None,
        };

        Outcome {
            exit_code,
            forced: Some(cause),
            elapsed: handle.started.elapsed(),
        }
    }

    /// Copy the workspace to the task's results directory, remove the
    /// container and report whether the completion marker was found.
    pub async fn collect_artifacts(&self, handle: &ContainerHandle) -> Result<bool, LifecycleError> {
        let collect_err = |e: std::io::Error| LifecycleError::Collect(e.to_string());
        let dest = self.config.results_dir(&handle.task_id);

        reset_dir(&dest).await.map_err(collect_err)?;

        match self
            .runtime
            .copy_from(&handle.container_id, layout::WORKSPACE_ROOT, &dest)
            .await
        {
            Ok(()) => debug!(task_id = %handle.task_id, "Copied workspace from container"),
            Err(e) => {
                warn!(
                    task_id = %handle.task_id,
                    error = %e,
                    "Container copy failed, copying the mounted workspace instead"
                );
                // Drop whatever a partial copy left behind.
                reset_dir(&dest).await.map_err(collect_err)?;
                let from = handle.workspace.clone();
                let to = dest.clone();
                tokio::task::spawn_blocking(move || copy_tree(&from, &to))
                    .await
                    .map_err(|e| LifecycleError::Collect(e.to_string()))?
                    .map_err(collect_err)?;
            }
        }

        let has_marker = tokio::fs::try_exists(dest.join(layout::MARKER_FILE))
            .await
            .map_err(collect_err)?;

        if let Err(e) = self.runtime.remove(&handle.container_id).await {
            warn!(task_id = %handle.task_id, error = %e, "Failed to remove container");
        }

        info!(
            task_id = %handle.task_id,
            dest = %dest.display(),
            has_marker,
            "Artifacts collected"
        );
        Ok(has_marker)
    }

    /// Kill a container by id.
    pub async fn kill(&self, container_id: &str) -> Result<(), LifecycleError> {
        self.runtime
            .kill(container_id)
            .await
            .map_err(LifecycleError::Kill)
    }

    async fn kill_quietly(&self, container_id: &str) {
        if let Err(e) = self.runtime.kill(container_id).await {
            debug!(container_id = %container_id, error = %e, "Kill failed");
        }
    }
}

/// Container name for a task.
pub fn container_name(id: &TaskId) -> String {
    format!("foreman-{id}")
}

/// Make `dir` an empty directory.
async fn reset_dir(dir: &Path) -> std::io::Result<()> {
    if tokio::fs::try_exists(dir).await? {
        tokio::fs::remove_dir_all(dir).await?;
    }
    tokio::fs::create_dir_all(dir).await
}

#[cfg(unix)]
async fn open_permissions(dir: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    // The worker runs without CAP_DAC_OVERRIDE and may not share our uid.
    tokio::fs::set_permissions(dir, std::fs::Permissions::from_mode(0o777)).await
}

#[cfg(not(unix))]
async fn open_permissions(_dir: &Path) -> std::io::Result<()> {
    Ok(())
}

/// Recursively copy `from` into `to`. Symlinks are copied as links.
fn copy_tree(from: &Path, to: &Path) -> std::io::Result<()> {
    std::fs::create_dir_all(to)?;
    for entry in std::fs::read_dir(from)? {
        let entry = entry?;
        let src = entry.path();
        let dst = to.join(entry.file_name());
        let file_type = entry.file_type()?;

        if file_type.is_dir() {
            copy_tree(&src, &dst)?;
        } else if file_type.is_symlink() {
            #[cfg(unix)]
            std::os::unix::fs::symlink(std::fs::read_link(&src)?, &dst)?;
        } else {
            std::fs::copy(&src, &dst)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_copy_tree() {
        let src = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(src.path().join("a/b")).unwrap();
        std::fs::write(src.path().join("a/b/c.txt"), "deep").unwrap();
        std::fs::write(src.path().join("top.txt"), "top").unwrap();

        let dst = tempfile::tempdir().unwrap();
        copy_tree(src.path(), dst.path()).unwrap();

        assert_eq!(
            std::fs::read_to_string(dst.path().join("a/b/c.txt")).unwrap(),
            "deep"
        );
        assert_eq!(
            std::fs::read_to_string(dst.path().join("top.txt")).unwrap(),
            "top"
        );
    }

    #[tokio::test]
    async fn test_reset_dir_empties_partial_output() {
        let root = tempfile::tempdir().unwrap();
        let dest = root.path().join("results");
        std::fs::create_dir_all(dest.join("half")).unwrap();
        std::fs::write(dest.join("half/file.txt"), "partial").unwrap();
        #[cfg(unix)]
        std::os::unix::fs::symlink("file.txt", dest.join("link")).unwrap();

        reset_dir(&dest).await.unwrap();
        assert_eq!(std::fs::read_dir(&dest).unwrap().count(), 0);

        // A copy into the emptied directory no longer collides.
        let src = tempfile::tempdir().unwrap();
        std::fs::write(src.path().join("file.txt"), "full").unwrap();
        #[cfg(unix)]
        std::os::unix::fs::symlink("file.txt", src.path().join("link")).unwrap();
        copy_tree(src.path(), &dest).unwrap();
        assert_eq!(std::fs::read_to_string(dest.join("file.txt")).unwrap(), "full");
    }

    #[test]
    fn test_termination_cause_names() {
        assert_eq!(TerminationCause::Timeout.to_string(), "timeout");
        assert_eq!(TerminationCause::Requested.as_str(), "requested");
    }

    #[test]
    fn test_container_name() {
        assert_eq!(container_name(&TaskId::new("abc")), "foreman-abc");
    }
}
