//! Orchestrator: admits submissions and moves tasks through their lifecycle.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use sha2::{Digest, Sha256};
use tokio::sync::{Mutex, RwLock, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use foreman_core::{layout, CompletionMarker, PromptRef, Task, TaskId, TaskState, TaskUpdate};

use crate::config::ForemanConfig;
use crate::error::OrchestratorError;
use crate::lifecycle::{ContainerHandle, ContainerManager};
use crate::registry::{DispatcherLease, TaskRegistry};
use crate::runtime::ContainerRuntime;

/// What a finished task left behind.
#[derive(Debug, Clone)]
pub struct TaskResults {
    pub task: Task,
    /// Collected workspace copy, once the task has run.
    pub dir: Option<PathBuf>,
    /// Parsed completion marker, if the worker wrote one.
    pub marker: Option<CompletionMarker>,
}

/// Composes the task registry and the container manager.
#[derive(Clone)]
pub struct Orchestrator {
    config: Arc<ForemanConfig>,
    registry: Arc<TaskRegistry>,
    manager: Arc<ContainerManager>,
    slots: Arc<Semaphore>,
    /// Cancellation handles of tasks supervised by this process.
    running: Arc<RwLock<HashMap<TaskId, CancellationToken>>>,
    /// Held once this process starts dispatching.
    lease: Arc<Mutex<Option<DispatcherLease>>>,
}

impl Orchestrator {
    /// Open the registry under the configured state directory.
    pub async fn open(
        config: ForemanConfig,
        runtime: Arc<dyn ContainerRuntime>,
    ) -> Result<Self, OrchestratorError> {
        let registry = TaskRegistry::open(config.registry_path()).await?;
        Ok(Self::with_registry(config, runtime, registry))
    }

    /// Build an orchestrator around an existing registry.
    pub fn with_registry(
        config: ForemanConfig,
        runtime: Arc<dyn ContainerRuntime>,
        registry: TaskRegistry,
    ) -> Self {
        let config = Arc::new(config);
        Self {
            slots: Arc::new(Semaphore::new(config.max_concurrent.max(1))),
            manager: Arc::new(ContainerManager::new(runtime, config.clone())),
            registry: Arc::new(registry),
            running: Arc::new(RwLock::new(HashMap::new())),
            lease: Arc::new(Mutex::new(None)),
            config,
        }
    }

    pub fn config(&self) -> &ForemanConfig {
        &self.config
    }

    pub fn registry(&self) -> &TaskRegistry {
        &self.registry
    }

    /// Build the worker image.
    pub async fn build_image(&self) -> Result<(), OrchestratorError> {
        Ok(self.manager.build_image().await?)
    }

    /// Snapshot the prompt and queue a task for it.
    ///
    /// Snapshots are content-addressed, so later edits to `prompt_path` do
    /// not affect queued tasks.
    pub async fn submit(&self, prompt_path: &Path) -> Result<TaskId, OrchestratorError> {
        let bytes = tokio::fs::read(prompt_path)
            .await
            .map_err(|source| OrchestratorError::PromptUnreadable {
                path: prompt_path.to_path_buf(),
                source,
            })?;
        let digest = hex::encode(Sha256::digest(&bytes));

        let dir = self.config.prompts_dir();
        tokio::fs::create_dir_all(&dir).await?;
        let snapshot = dir.join(format!("{digest}.md"));
        if !tokio::fs::try_exists(&snapshot).await? {
            let tmp = snapshot.with_extension("md.tmp");
            tokio::fs::write(&tmp, &bytes).await?;
            tokio::fs::rename(&tmp, &snapshot).await?;
        }

        let id = self
            .registry
            .add(PromptRef::new(snapshot, digest), self.config.limits())
            .await?;
        info!(task_id = %id, prompt = %prompt_path.display(), "Task submitted");
        Ok(id)
    }

    /// Take the dispatcher lease on first use and settle the tasks a
    /// previous dispatcher left in flight.
    ///
    /// Fails while another process is dispatching from the same state dir.
    pub async fn ensure_dispatcher(&self) -> Result<(), OrchestratorError> {
        let mut lease = self.lease.lock().await;
        if lease.is_some() {
            return Ok(());
        }

        let acquired = self.registry.acquire_dispatcher()?;
        let recovered = self.registry.recover_orphans(&acquired).await?;
        if !recovered.is_empty() {
            warn!(count = recovered.len(), "Settled tasks left by a previous controller");
        }
        *lease = Some(acquired);
        Ok(())
    }

    /// Start the oldest pending task once a slot is free.
    ///
    /// Returns `None` when the queue is empty.
    pub async fn dispatch_next(
        &self,
    ) -> Result<Option<JoinHandle<Result<Task, OrchestratorError>>>, OrchestratorError> {
        self.ensure_dispatcher().await?;
        let Ok(permit) = self.slots.clone().acquire_owned().await else {
            return Ok(None);
        };
        let Some(task) = self.registry.next().await? else {
            return Ok(None);
        };

        let this = self.clone();
        Ok(Some(tokio::spawn(async move {
            let _permit = permit;
            this.run_task(task).await
        })))
    }

    /// Dispatch until the queue is empty and wait for every started task.
    pub async fn run_until_idle(&self) -> Result<Vec<Task>, OrchestratorError> {
        let mut handles = Vec::new();
        while let Some(handle) = self.dispatch_next().await? {
            handles.push(handle);
        }

        let mut finished = Vec::with_capacity(handles.len());
        for handle in handles {
            match handle.await {
                Ok(Ok(task)) => finished.push(task),
                Ok(Err(e)) => error!(error = %e, "Task supervision failed"),
                Err(e) => error!(error = %e, "Task supervisor panicked"),
            }
        }
        Ok(finished)
    }

    /// Launch, supervise and collect one dispatched task.
    pub async fn run_task(&self, task: Task) -> Result<Task, OrchestratorError> {
        let token = CancellationToken::new();
        self.running
            .write()
            .await
            .insert(task.id.clone(), token.clone());

        let result = self.drive(&task, &token).await;

        self.running.write().await.remove(&task.id);
        result
    }

    async fn drive(&self, task: &Task, token: &CancellationToken) -> Result<Task, OrchestratorError> {
        let handle = match self.manager.launch(task).await {
            Ok(handle) => handle,
            Err(e) => {
                error!(task_id = %task.id, error = %e, "Launch failed");
                let failed = self
                    .registry
                    .set_state(
                        &task.id,
                        TaskState::Failed,
                        TaskUpdate::none().with_error(e.to_string()),
                    )
                    .await?;
                return Ok(failed);
            }
        };

        if let Err(e) = self
            .registry
            .set_state(
                &task.id,
                TaskState::Running,
                TaskUpdate::none().with_container(handle.container_id.clone()),
            )
            .await
        {
            error!(task_id = %task.id, error = %e, "Cannot record running task, stopping its container");
            self.abandon(&handle, &e.to_string()).await;
            return Err(e.into());
        }

        let timeout = Duration::from_secs(task.limits.timeout_secs);
        let outcome = self.manager.supervise(&handle, timeout, token).await;

        let mut update = TaskUpdate::none()
            .with_result_dir(self.config.results_dir(&task.id))
            .with_exit_code(outcome.exit_code);
        if let Some(cause) = outcome.forced {
            update = update.with_termination(cause.as_str());
        }

        // The marker, not the exit code, decides success.
        let has_marker = match self.manager.collect_artifacts(&handle).await {
            Ok(found) => found,
            Err(e) => {
                error!(task_id = %task.id, error = %e, "Artifact collection failed");
                update = update.with_error(e.to_string());
                false
            }
        };
        let state = if has_marker {
            TaskState::Complete
        } else {
            TaskState::Incomplete
        };

        let finished = self.registry.set_state(&task.id, state, update).await?;
        info!(
            task_id = %task.id,
            state = %state,
            exit_code = ?outcome.exit_code,
            forced = ?outcome.forced,
            elapsed_ms = outcome.elapsed.as_millis() as u64,
            "Task finished"
        );
        Ok(finished)
    }

    /// Stop and collect a container whose task could not be recorded as
    /// running.
    async fn abandon(&self, handle: &ContainerHandle, reason: &str) {
        if let Err(e) = self.manager.kill(&handle.container_id).await {
            warn!(task_id = %handle.task_id, error = %e, "Kill failed");
        }
        if let Err(e) = self.manager.collect_artifacts(handle).await {
            warn!(task_id = %handle.task_id, error = %e, "Artifact collection failed");
        }
        let update = TaskUpdate::none()
            .with_container(handle.container_id.clone())
            .with_result_dir(self.config.results_dir(&handle.task_id))
            .with_error(reason);
        if let Err(e) = self
            .registry
            .set_state(&handle.task_id, TaskState::Failed, update)
            .await
        {
            warn!(task_id = %handle.task_id, error = %e, "Cannot record failed task");
        }
    }

    /// Current record of a task.
    pub async fn status(&self, id: &TaskId) -> Result<Task, OrchestratorError> {
        Ok(self.registry.get(id).await?)
    }

    /// All tasks in submission order.
    pub async fn list(&self) -> Vec<Task> {
        self.registry.list().await
    }

    /// Stop a running task.
    ///
    /// A task supervised by this process is cancelled through its
    /// supervisor. Otherwise the container recorded on the task is killed
    /// and its own supervisor observes the exit.
    pub async fn terminate(&self, id: &TaskId) -> Result<(), OrchestratorError> {
        if let Some(token) = self.running.read().await.get(id) {
            info!(task_id = %id, "Termination requested");
            token.cancel();
            return Ok(());
        }

        let task = self.registry.get(id).await?;
        match (task.state, task.container_id.as_deref()) {
            (TaskState::Running, Some(container_id)) => {
                info!(task_id = %id, container_id = %container_id, "Killing container");
                self.manager.kill(container_id).await?;
                Ok(())
            }
            _ => Err(OrchestratorError::NotRunning(id.clone())),
        }
    }

    /// Collected artifacts of a task.
    pub async fn results(&self, id: &TaskId) -> Result<TaskResults, OrchestratorError> {
        let task = self.registry.get(id).await?;
        let dir = task.result_dir.clone();

        let marker = match &dir {
            Some(dir) => read_marker(&dir.join(layout::MARKER_FILE)).await,
            None => None,
        };

        Ok(TaskResults { task, dir, marker })
    }
}

async fn read_marker(path: &Path) -> Option<CompletionMarker> {
    let text = tokio::fs::read_to_string(path).await.ok()?;
    match serde_json::from_str(&text) {
        Ok(marker) => Some(marker),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Unreadable completion marker");
            None
        }
    }
}
