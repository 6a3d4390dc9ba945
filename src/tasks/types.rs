//! Task Types
//!
//! Type definitions for the background task system.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

use parking_lot::{Condvar, Mutex};

/// Task identifier, unique per manager instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub u64);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for TaskId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse().map(TaskId)
    }
}

/// Task status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Task is created but not submitted
    Pending,
    /// Worker thread is running the task
    Running,
    /// Task completed successfully
    Completed,
    /// Task failed with error
    Failed,
    /// Task observed its cancellation signal and stopped
    Cancelled,
}

impl TaskStatus {
    /// Check if no further transition can happen
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskStatus::Pending => write!(f, "pending"),
            TaskStatus::Running => write!(f, "running"),
            TaskStatus::Completed => write!(f, "completed"),
            TaskStatus::Failed => write!(f, "failed"),
            TaskStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Error returned by a work function
#[derive(Debug, thiserror::Error)]
pub enum WorkError {
    /// The function saw its cancellation signal and stopped early
    #[error("Task cancelled")]
    Cancelled,

    #[error(transparent)]
    Failed(#[from] anyhow::Error),
}

impl WorkError {
    /// Failure carrying a plain message
    pub fn msg(message: impl fmt::Display + fmt::Debug + Send + Sync + 'static) -> Self {
        WorkError::Failed(anyhow::Error::msg(message))
    }
}

/// Value produced by a work function
pub type WorkResult = Result<serde_json::Value, WorkError>;

/// Work function run on the task's worker thread.
///
/// Every function receives the task's [`CancelHandle`]. Cancellation is
/// cooperative: the manager never interrupts a running function, so a
/// function that never looks at the handle always runs to the end.
pub type WorkFn = Box<dyn FnOnce(&CancelHandle) -> WorkResult + Send + 'static>;

/// Cancellation signal handed to work functions.
///
/// The signal is set at most once and never cleared. Reading it through
/// [`CancelHandle::is_cancelled`] or [`CancelHandle::check`] records that
/// the function observed the request, which decides whether a normal
/// return ends as `Cancelled` or `Completed`.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle {
    token: CancellationToken,
    observed: Arc<AtomicBool>,
}

impl CancelHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Check the signal, remembering it if set
    pub fn is_cancelled(&self) -> bool {
        let cancelled = self.token.is_cancelled();
        if cancelled {
            self.observed.store(true, Ordering::Release);
        }
        cancelled
    }

    /// Bail out with [`WorkError::Cancelled`] if the signal is set
    pub fn check(&self) -> Result<(), WorkError> {
        if self.is_cancelled() {
            Err(WorkError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Signal state without counting as an observation by the work function
    pub fn is_requested(&self) -> bool {
        self.token.is_cancelled()
    }

    pub(crate) fn request(&self) {
        self.token.cancel();
    }

    pub(crate) fn was_observed(&self) -> bool {
        self.observed.load(Ordering::Acquire)
    }
}

/// How a worker finished
#[derive(Debug, Clone)]
pub(crate) enum TaskOutcome {
    Completed(serde_json::Value),
    Failed(String),
    Cancelled,
}

impl TaskOutcome {
    pub(crate) fn status(&self) -> TaskStatus {
        match self {
            TaskOutcome::Completed(_) => TaskStatus::Completed,
            TaskOutcome::Failed(_) => TaskStatus::Failed,
            TaskOutcome::Cancelled => TaskStatus::Cancelled,
        }
    }
}

/// One-shot "worker finished" flag that waiters can block on
#[derive(Debug, Default)]
pub(crate) struct Completion {
    finished: Mutex<bool>,
    cond: Condvar,
}

impl Completion {
    pub(crate) fn notify(&self) {
        let mut finished = self.finished.lock();
        *finished = true;
        self.cond.notify_all();
    }

    pub(crate) fn is_finished(&self) -> bool {
        *self.finished.lock()
    }

    /// Block until finished or until `timeout` elapses
    pub(crate) fn wait(&self, timeout: Option<Duration>) -> bool {
        let mut finished = self.finished.lock();
        match timeout {
            None => {
                while !*finished {
                    self.cond.wait(&mut finished);
                }
            }
            Some(timeout) => {
                let deadline = Instant::now() + timeout;
                while !*finished {
                    if self.cond.wait_until(&mut finished, deadline).timed_out() {
                        break;
                    }
                }
            }
        }
        *finished
    }
}

/// Handle to the worker thread executing a task
pub(crate) struct WorkerHandle {
    thread: Option<JoinHandle<()>>,
    completion: Arc<Completion>,
}

impl WorkerHandle {
    pub(crate) fn new(completion: Arc<Completion>) -> Self {
        Self {
            thread: None,
            completion,
        }
    }

    pub(crate) fn with_thread(mut self, thread: JoinHandle<()>) -> Self {
        self.thread = Some(thread);
        self
    }

    pub(crate) fn completion(&self) -> Arc<Completion> {
        Arc::clone(&self.completion)
    }

    /// Take the join handle once the worker has signalled completion
    pub(crate) fn take_finished_thread(&mut self) -> Option<JoinHandle<()>> {
        if self.completion.is_finished() {
            self.thread.take()
        } else {
            None
        }
    }
}

/// Task record
pub struct Task {
    /// Unique task ID
    pub id: TaskId,
    /// Task name for display
    pub name: String,
    /// Current status
    pub status: TaskStatus,
    /// Value returned on success
    pub result: Option<serde_json::Value>,
    /// Error message on failure
    pub error: Option<String>,
    /// Created timestamp
    pub created_at: DateTime<Utc>,
    /// Started timestamp
    pub started_at: Option<DateTime<Utc>>,
    /// Completed timestamp
    pub completed_at: Option<DateTime<Utc>>,
    cancel: CancelHandle,
    work: Option<WorkFn>,
    pub(crate) worker: Option<WorkerHandle>,
}

impl Task {
    /// Create a new pending task
    pub fn new(id: TaskId, name: impl Into<String>, work: WorkFn) -> Self {
        Self {
            id,
            name: name.into(),
            status: TaskStatus::Pending,
            result: None,
            error: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            cancel: CancelHandle::new(),
            work: Some(work),
            worker: None,
        }
    }

    /// Request cancellation.
    ///
    /// Accepted only while the task is pending or running. Sets the
    /// cooperative signal and nothing else; the work function decides
    /// when, or whether, to stop.
    pub fn cancel(&self) -> bool {
        if !self.is_active() {
            return false;
        }
        self.cancel.request();
        true
    }

    /// Check if cancellation was requested
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_requested()
    }

    /// Check if task is active
    pub fn is_active(&self) -> bool {
        matches!(self.status, TaskStatus::Pending | TaskStatus::Running)
    }

    /// Check if task is terminal
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub(crate) fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    /// Move a pending task to running, handing out its work function
    pub(crate) fn start(&mut self) -> Option<WorkFn> {
        if self.status != TaskStatus::Pending {
            return None;
        }
        let work = self.work.take()?;
        self.status = TaskStatus::Running;
        self.started_at = Some(Utc::now());
        Some(work)
    }

    /// Record the terminal outcome of a running task
    pub(crate) fn finish(&mut self, outcome: TaskOutcome) -> bool {
        if self.status != TaskStatus::Running {
            return false;
        }
        self.status = outcome.status();
        match outcome {
            TaskOutcome::Completed(value) => self.result = Some(value),
            TaskOutcome::Failed(error) => self.error = Some(error),
            TaskOutcome::Cancelled => {}
        }
        self.completed_at = Some(Utc::now());
        true
    }

    /// Get duration in milliseconds
    pub fn duration_ms(&self) -> Option<u64> {
        let start = self.started_at?;
        let end = self.completed_at.unwrap_or_else(Utc::now);
        u64::try_from((end - start).num_milliseconds()).ok()
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("status", &self.status)
            .field("cancelled", &self.is_cancelled())
            .finish_non_exhaustive()
    }
}

/// Point-in-time snapshot of a task
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskInfo {
    pub id: TaskId,
    pub name: String,
    pub status: TaskStatus,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
    pub cancel_requested: bool,
    pub submitted: bool,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<u64>,
}

impl TaskInfo {
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

impl From<&Task> for TaskInfo {
    fn from(task: &Task) -> Self {
        Self {
            id: task.id,
            name: task.name.clone(),
            status: task.status,
            result: task.result.clone(),
            error: task.error.clone(),
            cancel_requested: task.is_cancelled(),
            submitted: task.worker.is_some(),
            created_at: task.created_at,
            started_at: task.started_at,
            completed_at: task.completed_at,
            duration_ms: task.duration_ms(),
        }
    }
}
