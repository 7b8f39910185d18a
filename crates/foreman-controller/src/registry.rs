//! Task registry: the single source of truth for task state.
//!
//! All mutations take the write lock, so `next()` can hand a pending task to
//! exactly one caller no matter how many dispatchers race for it.
//!
//! A persistent registry shares its snapshot with other controller
//! processes. Every mutation re-reads the snapshot under a file lock,
//! applies the change to that copy, writes it back and only then adopts
//! it in memory. Reads refresh from the snapshot. In-flight tasks are
//! recovered only by the process holding the [`DispatcherLease`].

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use foreman_core::{CoreError, PromptRef, ResourceLimits, Task, TaskId, TaskState, TaskUpdate};

use crate::error::RegistryError;
use crate::lock::FileLock;

const DISPATCHER_LOCK_FILE: &str = "dispatcher.lock";

#[derive(Default, Clone)]
struct Inner {
    tasks: HashMap<TaskId, Task>,
    /// Submission order.
    order: Vec<TaskId>,
}

impl Inner {
    fn ordered(&self) -> Vec<Task> {
        self.order
            .iter()
            .filter_map(|id| self.tasks.get(id))
            .cloned()
            .collect()
    }

    fn insert(&mut self, task: Task) {
        if !self.tasks.contains_key(&task.id) {
            self.order.push(task.id.clone());
        }
        self.tasks.insert(task.id.clone(), task);
    }

    fn task_mut(&mut self, id: &TaskId) -> Result<&mut Task, CoreError> {
        self.tasks
            .get_mut(id)
            .ok_or_else(|| CoreError::TaskNotFound(id.to_string()))
    }
}

#[derive(Serialize, Deserialize)]
struct Snapshot {
    tasks: Vec<Task>,
}

/// Proof that this process is the only one dispatching from a registry.
///
/// Released when dropped or when the process exits.
#[derive(Debug)]
pub struct DispatcherLease {
    _lock: Option<FileLock>,
}

/// Ordered, optionally persisted set of tasks.
pub struct TaskRegistry {
    inner: RwLock<Inner>,
    snapshot: Option<PathBuf>,
}

impl TaskRegistry {
    /// Create an in-memory registry.
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
            snapshot: None,
        }
    }

    /// Open a registry persisted at `path`. Nothing is written until the
    /// first mutation.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, RegistryError> {
        let path = path.into();
        let inner = load(&path).await?;
        info!(path = %path.display(), tasks = inner.order.len(), "Opened task registry");

        Ok(Self {
            inner: RwLock::new(inner),
            snapshot: Some(path),
        })
    }

    /// Become the dispatcher for this registry.
    ///
    /// Fails with [`RegistryError::DispatcherBusy`] while another process
    /// holds the lease.
    pub fn acquire_dispatcher(&self) -> Result<DispatcherLease, RegistryError> {
        let Some(path) = &self.snapshot else {
            return Ok(DispatcherLease { _lock: None });
        };
        let lock_path = path
            .parent()
            .unwrap_or_else(|| Path::new("."))
            .join(DISPATCHER_LOCK_FILE);

        match FileLock::try_exclusive(&lock_path)? {
            Some(lock) => {
                debug!(lock = %lock.path().display(), "Dispatcher lease acquired");
                Ok(DispatcherLease { _lock: Some(lock) })
            }
            None => Err(RegistryError::DispatcherBusy(lock_path)),
        }
    }

    /// Settle tasks a dead dispatcher left in flight.
    ///
    /// Tasks left `running` become `incomplete`; tasks left `dispatching`
    /// never launched and become `failed`. Only the lease holder may call
    /// this, since any other process could still be supervising them.
    pub async fn recover_orphans(
        &self,
        _lease: &DispatcherLease,
    ) -> Result<Vec<TaskId>, RegistryError> {
        self.mutate(|inner| {
            let mut recovered = Vec::new();
            for task in inner.tasks.values_mut() {
                if recover(task)? {
                    recovered.push(task.id.clone());
                }
            }
            let changed = !recovered.is_empty();
            Ok((recovered, changed))
        })
        .await
    }

    /// Record a new pending task and return its id.
    pub async fn add(
        &self,
        prompt: PromptRef,
        limits: ResourceLimits,
    ) -> Result<TaskId, RegistryError> {
        let task = Task::new(prompt, limits);
        let id = task.id.clone();

        self.mutate(move |inner| {
            inner.insert(task);
            Ok(((), true))
        })
        .await?;

        info!(task_id = %id, "Task queued");
        Ok(id)
    }

    /// Take the oldest pending task, marking it `dispatching`.
    pub async fn next(&self) -> Result<Option<Task>, RegistryError> {
        let task = self
            .mutate(|inner| {
                let Some(id) = inner
                    .order
                    .iter()
                    .find(|id| {
                        inner
                            .tasks
                            .get(*id)
                            .is_some_and(|t| t.state == TaskState::Pending)
                    })
                    .cloned()
                else {
                    return Ok((None, false));
                };

                let task = inner.task_mut(&id)?;
                task.transition(TaskState::Dispatching, TaskUpdate::none())?;
                Ok((Some(task.clone()), true))
            })
            .await?;

        if let Some(task) = &task {
            debug!(task_id = %task.id, "Task dispatching");
        }
        Ok(task)
    }

    /// Apply a validated state transition and return the updated task.
    pub async fn set_state(
        &self,
        id: &TaskId,
        state: TaskState,
        update: TaskUpdate,
    ) -> Result<Task, RegistryError> {
        let (from, task) = self
            .mutate(|inner| {
                let task = inner.task_mut(id)?;
                let from = task.state;
                task.transition(state, update)?;
                Ok(((from, task.clone()), true))
            })
            .await?;

        info!(task_id = %id, from = %from, to = %state, "Task state changed");
        Ok(task)
    }

    /// Look up one task.
    pub async fn get(&self, id: &TaskId) -> Result<Task, RegistryError> {
        self.refresh().await;
        let inner = self.inner.read().await;
        inner
            .tasks
            .get(id)
            .cloned()
            .ok_or_else(|| CoreError::TaskNotFound(id.to_string()).into())
    }

    /// All tasks in submission order.
    pub async fn list(&self) -> Vec<Task> {
        self.refresh().await;
        self.inner.read().await.ordered()
    }

    /// Number of tasks.
    pub async fn len(&self) -> usize {
        self.refresh().await;
        self.inner.read().await.order.len()
    }

    /// True if no task was ever submitted.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Snapshot file, if persistent.
    pub fn snapshot_path(&self) -> Option<&Path> {
        self.snapshot.as_deref()
    }

    /// Apply `change` to a fresh copy of the registry and adopt the copy
    /// once it is durable. `change` returns its result and whether it
    /// modified anything.
    async fn mutate<T>(
        &self,
        change: impl FnOnce(&mut Inner) -> Result<(T, bool), RegistryError>,
    ) -> Result<T, RegistryError> {
        let mut inner = self.inner.write().await;

        let Some(path) = &self.snapshot else {
            let mut draft = inner.clone();
            let (out, _) = change(&mut draft)?;
            *inner = draft;
            return Ok(out);
        };

        let _lock = FileLock::exclusive(path.with_extension("json.lock")).await?;
        let mut draft = load(path).await?;
        let (out, changed) = change(&mut draft)?;
        if changed {
            store(path, &draft).await?;
        }
        *inner = draft;
        Ok(out)
    }

    /// Pick up changes written by other processes.
    async fn refresh(&self) {
        let Some(path) = &self.snapshot else {
            return;
        };
        match load(path).await {
            Ok(fresh) => *self.inner.write().await = fresh,
            Err(e) => warn!(path = %path.display(), error = %e, "Cannot refresh task registry"),
        }
    }
}

impl Default for TaskRegistry {
    fn default() -> Self {
        Self::new()
    }
}

async fn load(path: &Path) -> Result<Inner, RegistryError> {
    let mut inner = Inner::default();
    match tokio::fs::read_to_string(path).await {
        Ok(json) => {
            let snapshot: Snapshot = serde_json::from_str(&json).map_err(CoreError::from)?;
            for task in snapshot.tasks {
                inner.insert(task);
            }
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(e.into()),
    }
    Ok(inner)
}

async fn store(path: &Path, inner: &Inner) -> Result<(), RegistryError> {
    let snapshot = Snapshot {
        tasks: inner.ordered(),
    };
    let json = serde_json::to_vec_pretty(&snapshot).map_err(CoreError::from)?;

    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, json).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}

fn recover(task: &mut Task) -> Result<bool, CoreError> {
    match task.state {
        TaskState::Running => {
            warn!(task_id = %task.id, "Task was running when the controller stopped");
            task.transition(
                TaskState::Incomplete,
                TaskUpdate::none().with_termination("controller_restart"),
            )?;
            Ok(true)
        }
        TaskState::Dispatching => {
            warn!(task_id = %task.id, "Task was never launched");
            task.transition(
                TaskState::Failed,
                TaskUpdate::none().with_error("controller stopped before launch"),
            )?;
            Ok(true)
        }
        _ => Ok(false),
    }
}
