//! Supervised background work.
//!
//! Every long-running piece of work (a capture session, a mic recording,
//! a replayed gesture) runs as a named task in a [`TaskPool`]. Each task
//! gets a child [`CancellationToken`] of the pool's root token, so a single
//! `shutdown` reaches all of them.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{TaskError, TetherError};

/// How long `shutdown` waits for a task to honour cancellation before
/// aborting it.
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(u64);

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

struct TaskEntry {
    name: String,
    token: CancellationToken,
    handle: JoinHandle<()>,
}

type TaskMap = Arc<Mutex<HashMap<TaskId, TaskEntry>>>;

fn lock(tasks: &TaskMap) -> MutexGuard<'_, HashMap<TaskId, TaskEntry>> {
    tasks.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Drops a task's pool entry when the task ends, including by panic.
struct Deregister {
    registry: TaskMap,
    id: TaskId,
}

impl Drop for Deregister {
    fn drop(&mut self) {
        lock(&self.registry).remove(&self.id);
    }
}

pub struct TaskPool {
    root: CancellationToken,
    tasks: TaskMap,
    next_id: AtomicU64,
}

impl Default for TaskPool {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskPool {
    pub fn new() -> Self {
        Self {
            root: CancellationToken::new(),
            tasks: Arc::new(Mutex::new(HashMap::new())),
            next_id: AtomicU64::new(1),
        }
    }

    /// Spawn `f` as a named task.
    ///
    /// The closure receives the task's cancellation token and is expected
    /// to check it between units of work. An `Err` result is logged; the
    /// task is forgotten by the pool once it returns either way.
    pub fn spawn<F, Fut>(&self, name: impl Into<String>, f: F) -> TaskId
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = Result<(), TetherError>> + Send + 'static,
    {
        let id = TaskId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let name = name.into();
        let token = self.root.child_token();
        let fut = f(token.clone());

        // Held across spawn + insert so the task's own removal cannot run
        // before its entry exists.
        let mut tasks = lock(&self.tasks);

        let registry = Arc::clone(&self.tasks);
        let task_name = name.clone();
        let handle = tokio::spawn(async move {
            let _deregister = Deregister { registry, id };
            match fut.await {
                Ok(()) => debug!(task = %task_name, %id, "task finished"),
                Err(TetherError::Task(TaskError::Cancelled)) => {
                    debug!(task = %task_name, %id, "task cancelled")
                }
                Err(e) => warn!(task = %task_name, %id, error = %e, "task failed"),
            }
        });

        tasks.insert(
            id,
            TaskEntry {
                name,
                token,
                handle,
            },
        );
        id
    }

    /// Request cancellation of one task. Returns `false` if it is no
    /// longer running.
    pub fn cancel(&self, id: TaskId) -> bool {
        match lock(&self.tasks).get(&id) {
            Some(entry) => {
                entry.token.cancel();
                true
            }
            None => false,
        }
    }

    /// Wait for a task to finish. A task that already finished is `Ok`.
    pub async fn join(&self, id: TaskId) -> Result<(), TaskError> {
        let entry = lock(&self.tasks).remove(&id);
        match entry {
            Some(entry) => entry
                .handle
                .await
                .map_err(|_| TaskError::Join(entry.name)),
            None => Ok(()),
        }
    }

    pub fn is_running(&self, id: TaskId) -> bool {
        lock(&self.tasks).contains_key(&id)
    }

    pub fn active_count(&self) -> usize {
        lock(&self.tasks).len()
    }

    /// Names of live tasks, sorted.
    pub fn active_names(&self) -> Vec<String> {
        let mut names: Vec<String> = lock(&self.tasks).values().map(|e| e.name.clone()).collect();
        names.sort();
        names
    }

    /// Cancel every task and wait for them, aborting stragglers after
    /// [`SHUTDOWN_GRACE`].
    pub async fn shutdown(&self) {
        self.root.cancel();
        let entries: Vec<TaskEntry> = lock(&self.tasks).drain().map(|(_, e)| e).collect();

        for entry in entries {
            let TaskEntry {
                name, mut handle, ..
            } = entry;
            match tokio::time::timeout(SHUTDOWN_GRACE, &mut handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(task = %name, error = %e, "task did not complete"),
                Err(_) => {
                    warn!(task = %name, "task ignored cancellation, aborting");
                    handle.abort();
                }
            }
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────
