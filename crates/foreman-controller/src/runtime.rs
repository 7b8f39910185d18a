//! Container runtime seam.
//!
//! The lifecycle manager talks to containers only through
//! [`ContainerRuntime`]. [`DockerRuntime`] drives the Docker Engine API.

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, DownloadFromContainerOptions, KillContainerOptions,
    RemoveContainerOptions, WaitContainerOptions,
};
use bollard::errors::Error as BollardError;
use bollard::image::BuildImageOptions;
use bollard::models::{ContainerWaitResponse, HostConfig};
use bollard::{Docker, API_DEFAULT_VERSION};
use futures_util::TryStreamExt;
use tracing::debug;

use crate::error::RuntimeError;

const DOCKER_TIMEOUT_SECS: u64 = 120;
const DOCKERIGNORE: &str = ".dockerignore";

/// A bind mount into the container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mount {
    pub host: PathBuf,
    pub container: String,
    pub read_only: bool,
}

impl Mount {
    /// Read-write mount.
    pub fn rw(host: impl Into<PathBuf>, container: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            container: container.into(),
            read_only: false,
        }
    }

    /// Read-only mount.
    pub fn ro(host: impl Into<PathBuf>, container: impl Into<String>) -> Self {
        Self {
            read_only: true,
            ..Self::rw(host, container)
        }
    }

    fn to_bind(&self) -> String {
        let mode = if self.read_only { "ro" } else { "rw" };
        format!("{}:{}:{}", self.host.display(), self.container, mode)
    }
}

/// Everything needed to start one worker container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    pub mounts: Vec<Mount>,
    pub env: Vec<(String, String)>,
    pub cpu_shares: u32,
    pub memory_limit_mb: u64,
}

/// Operations the controller needs from a container runtime.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Build (or rebuild) an image.
    async fn build_image(
        &self,
        tag: &str,
        context: &Path,
        dockerfile: &Path,
    ) -> Result<(), RuntimeError>;

    /// Create and start a container, returning its id.
    async fn start(&self, spec: &ContainerSpec) -> Result<String, RuntimeError>;

    /// Wait for the container to exit and return its exit code.
    async fn wait(&self, container_id: &str) -> Result<i64, RuntimeError>;

    /// Forcibly stop the container.
    async fn kill(&self, container_id: &str) -> Result<(), RuntimeError>;

    /// Copy the contents of the container directory `src` into the host
    /// directory `dest`.
    async fn copy_from(&self, container_id: &str, src: &str, dest: &Path)
        -> Result<(), RuntimeError>;

    /// Remove the container.
    async fn remove(&self, container_id: &str) -> Result<(), RuntimeError>;
}

/// Runtime backed by the Docker Engine API.
#[derive(Debug, Clone)]
pub struct DockerRuntime {
    docker: Docker,
}

impl DockerRuntime {
    /// Connect to `socket`, or to the platform default when `None`.
    pub fn connect(socket: Option<&Path>) -> Result<Self, RuntimeError> {
        let docker = match socket {
            Some(path) => Docker::connect_with_socket(
                &path.to_string_lossy(),
                DOCKER_TIMEOUT_SECS,
                API_DEFAULT_VERSION,
            ),
            None => Docker::connect_with_local_defaults(),
        }
        .map_err(RuntimeError::Connect)?;
        Ok(Self { docker })
    }

    /// Wrap an existing client.
    pub fn with_client(docker: Docker) -> Self {
        Self { docker }
    }
}

/// Container configuration for `spec`: resource limits, bind mounts and
/// a dropped capability set.
pub fn container_config(spec: &ContainerSpec) -> Config<String> {
    let binds: Vec<String> = spec.mounts.iter().map(Mount::to_bind).collect();

    let host_config = HostConfig {
        binds: if binds.is_empty() { None } else { Some(binds) },
        memory: Some((spec.memory_limit_mb * 1024 * 1024) as i64),
        cpu_shares: Some(spec.cpu_shares as i64),
        cap_drop: Some(vec!["ALL".to_string()]),
        security_opt: Some(vec!["no-new-privileges:true".to_string()]),
        ..Default::default()
    };

    Config {
        image: Some(spec.image.clone()),
        env: Some(
            spec.env
                .iter()
                .map(|(key, value)| format!("{key}={value}"))
                .collect(),
        ),
        host_config: Some(host_config),
        ..Default::default()
    }
}

fn docker_err(operation: &'static str, container_id: &str, source: BollardError) -> RuntimeError {
    match source {
        BollardError::DockerResponseServerError {
            status_code: 404, ..
        } => RuntimeError::NotFound(container_id.to_string()),
        source => RuntimeError::Docker { operation, source },
    }
}

/// Exit code from the wait endpoint. Bollard reports non-zero exits as an
/// error carrying the code.
fn exit_code(
    container_id: &str,
    result: Result<Vec<ContainerWaitResponse>, BollardError>,
) -> Result<i64, RuntimeError> {
    match result {
        Ok(responses) => responses
            .last()
            .map(|r| r.status_code)
            .ok_or_else(|| RuntimeError::Protocol("wait returned no status".to_string())),
        Err(BollardError::DockerContainerWaitError { code, .. }) => Ok(code),
        Err(e) => Err(docker_err("wait", container_id, e)),
    }
}

/// Top-level names listed in the context's `.dockerignore`.
fn ignored_names(context: &Path) -> Vec<String> {
    let Ok(text) = std::fs::read_to_string(context.join(DOCKERIGNORE)) else {
        return Vec::new();
    };
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(|line| line.trim_matches('/').to_string())
        .collect()
}

/// Tar the build context, skipping top-level `.dockerignore` entries.
fn pack_context(context: &Path) -> std::io::Result<Vec<u8>> {
    let ignored = ignored_names(context);
    let mut builder = tar::Builder::new(Vec::new());
    builder.follow_symlinks(false);

    for entry in std::fs::read_dir(context)? {
        let entry = entry?;
        let name = entry.file_name();
        if name
            .to_str()
            .is_some_and(|n| ignored.iter().any(|i| i == n))
        {
            continue;
        }
        if entry.file_type()?.is_dir() {
            builder.append_dir_all(&name, entry.path())?;
        } else {
            builder.append_path_with_name(entry.path(), &name)?;
        }
    }
    builder.into_inner()
}

/// Unpack a container archive of one directory into `dest`, dropping the
/// directory's own name from every entry.
fn unpack_contents(archive: &[u8], dest: &Path) -> std::io::Result<()> {
    let mut archive = tar::Archive::new(archive);
    archive.set_preserve_permissions(false);

    for entry in archive.entries()? {
        let mut entry = entry?;
        let path = entry.path()?.into_owned();

        let mut components = path
            .components()
            .skip_while(|c| matches!(c, Component::CurDir));
        components.next();
        let relative: PathBuf = components.collect();
        if relative.as_os_str().is_empty() {
            continue;
        }
        if !relative
            .components()
            .all(|c| matches!(c, Component::Normal(_)))
        {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("unsafe path in archive: {}", path.display()),
            ));
        }

        let target = dest.join(&relative);
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)?;
        }
        entry.unpack(&target)?;
    }
    Ok(())
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn build_image(
        &self,
        tag: &str,
        context: &Path,
        dockerfile: &Path,
    ) -> Result<(), RuntimeError> {
        let dir = context.to_path_buf();
        let archive = tokio::task::spawn_blocking(move || pack_context(&dir))
            .await
            .map_err(|e| RuntimeError::Build(e.to_string()))??;

        let options = BuildImageOptions {
            dockerfile: dockerfile.to_string_lossy().into_owned(),
            t: tag.to_string(),
            rm: true,
            ..Default::default()
        };

        let mut stream = Box::pin(self.docker.build_image(options, None, Some(archive.into())));
        while let Some(info) = stream
            .try_next()
            .await
            .map_err(|source| RuntimeError::Docker {
                operation: "build",
                source,
            })?
        {
            if let Some(error) = info.error {
                return Err(RuntimeError::Build(error));
            }
            if let Some(line) = info.stream {
                debug!(tag = %tag, "{}", line.trim_end());
            }
        }
        Ok(())
    }

    async fn start(&self, spec: &ContainerSpec) -> Result<String, RuntimeError> {
        let options = CreateContainerOptions {
            name: spec.name.clone(),
            platform: None,
        };
        let response = self
            .docker
            .create_container(Some(options), container_config(spec))
            .await
            .map_err(|source| RuntimeError::Docker {
                operation: "create",
                source,
            })?;

        let id = response.id;
        self.docker
            .start_container::<String>(&id, None)
            .await
            .map_err(|e| docker_err("start", &id, e))?;

        debug!(container_id = %id, name = %spec.name, "Container created and started");
        Ok(id)
    }

    async fn wait(&self, container_id: &str) -> Result<i64, RuntimeError> {
        let result = self
            .docker
            .wait_container(container_id, None::<WaitContainerOptions<String>>)
            .try_collect::<Vec<_>>()
            .await;
        exit_code(container_id, result)
    }

    async fn kill(&self, container_id: &str) -> Result<(), RuntimeError> {
        self.docker
            .kill_container(container_id, None::<KillContainerOptions<String>>)
            .await
            .map_err(|e| docker_err("kill", container_id, e))
    }

    async fn copy_from(
        &self,
        container_id: &str,
        src: &str,
        dest: &Path,
    ) -> Result<(), RuntimeError> {
        let options = DownloadFromContainerOptions {
            path: src.to_string(),
        };
        let archive = self
            .docker
            .download_from_container(container_id, Some(options))
            .try_fold(Vec::new(), |mut buf, chunk| async move {
                buf.extend_from_slice(&chunk);
                Ok(buf)
            })
            .await
            .map_err(|e| docker_err("copy", container_id, e))?;

        let dest = dest.to_path_buf();
        tokio::task::spawn_blocking(move || unpack_contents(&archive, &dest))
            .await
            .map_err(|e| RuntimeError::Protocol(e.to_string()))??;
        Ok(())
    }

    async fn remove(&self, container_id: &str) -> Result<(), RuntimeError> {
        let options = RemoveContainerOptions {
            force: true,
            ..Default::default()
        };
        self.docker
            .remove_container(container_id, Some(options))
            .await
            .map_err(|e| docker_err("remove", container_id, e))
    }
}
