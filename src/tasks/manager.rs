//! Task Manager
//!
//! Thread-per-task execution behind a single reentrant lock.
//! Handles task lifecycle, status queries, waiting and cooperative cancellation.

use log::{debug, error, info, warn};
use parking_lot::ReentrantMutex;
use std::any::Any;
use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Weak};
use std::thread;
use std::time::Duration;
use tokio::sync::broadcast;

use super::types::{
    CancelHandle, Completion, Task, TaskId, TaskInfo, TaskOutcome, TaskStatus, WorkError, WorkFn,
    WorkResult, WorkerHandle,
};

/// Task event for broadcasts.
///
/// The interactive menu uses these to report finished tasks; embedders
/// can subscribe for the same lifecycle feed.
#[derive(Debug, Clone)]
pub enum TaskEvent {
    /// Task created
    Created(TaskInfo),
    /// Task handed to its worker thread
    Started(TaskId),
    /// Cancellation requested
    CancelRequested(TaskId),
    /// Task completed with its result
    Completed(TaskId, serde_json::Value),
    /// Task failed with an error message
    Failed(TaskId, String),
    /// Task stopped after observing cancellation
    Cancelled(TaskId),
    /// Task record removed
    Removed(TaskId),
}

#[derive(Default)]
struct Registry {
    tasks: HashMap<TaskId, Task>,
    next_id: u64,
    /// Workers whose task record was removed while they were still running
    detached: Vec<(TaskId, WorkerHandle)>,
}

type SharedRegistry = Arc<ReentrantMutex<RefCell<Registry>>>;

/// Task manager for running work on background threads.
///
/// Every task gets its own OS thread; there is no pool and no cap.
/// Cancellation only sets a signal the work function may observe, a
/// running thread is never interrupted.
pub struct TaskManager {
    registry: SharedRegistry,
    /// Event broadcaster
    event_tx: broadcast::Sender<TaskEvent>,
}

impl TaskManager {
    /// Create a new task manager
    pub fn new() -> Self {
        let (event_tx, _) = broadcast::channel(256);

        Self {
            registry: Arc::new(ReentrantMutex::new(RefCell::new(Registry::default()))),
            event_tx,
        }
    }

    /// Subscribe to task events
    pub fn subscribe(&self) -> broadcast::Receiver<TaskEvent> {
        self.event_tx.subscribe()
    }

    /// Create and register a new pending task
    pub fn create_task<F>(&self, name: impl Into<String>, work: F) -> TaskId
    where
        F: FnOnce(&CancelHandle) -> WorkResult + Send + 'static,
    {
        let guard = self.registry.lock();
        let mut registry = guard.borrow_mut();

        registry.next_id += 1;
        let id = TaskId(registry.next_id);
        let task = Task::new(id, name, Box::new(work) as WorkFn);
        let info = TaskInfo::from(&task);
        registry.tasks.insert(id, task);
        drop(registry);

        info!("Created task {} ({})", id, info.name);
        let _ = self.event_tx.send(TaskEvent::Created(info));
        id
    }

    /// Start a pending task on its own worker thread
    pub fn submit_task(&self, task_id: TaskId) -> bool {
        let guard = self.registry.lock();
        let mut registry = guard.borrow_mut();

        let Some(task) = registry.tasks.get_mut(&task_id) else {
            warn!("Cannot submit task {}: not found", task_id);
            return false;
        };
        let Some(work) = task.start() else {
            warn!("Cannot submit task {}: status is {}", task_id, task.status);
            return false;
        };

        let completion = Arc::new(Completion::default());
        let worker = Worker {
            registry: Arc::downgrade(&self.registry),
            event_tx: self.event_tx.clone(),
            task_id,
            name: task.name.clone(),
            cancel: task.cancel_handle(),
            completion: Arc::clone(&completion),
        };

        let spawned = thread::Builder::new()
            .name(format!("task-{}", task_id))
            .spawn(move || worker.run(work));

        match spawned {
            Ok(thread) => {
                task.worker = Some(WorkerHandle::new(completion).with_thread(thread));
                info!("Submitted task {} ({})", task_id, task.name);
                let _ = self.event_tx.send(TaskEvent::Started(task_id));
                true
            }
            Err(e) => {
                let message = format!("Failed to spawn worker thread: {}", e);
                error!("Task {} ({}): {}", task_id, task.name, message);
                task.finish(TaskOutcome::Failed(message.clone()));
                completion.notify();
                task.worker = Some(WorkerHandle::new(completion));
                let _ = self.event_tx.send(TaskEvent::Failed(task_id, message));
                false
            }
        }
    }

    /// Create a task and submit it right away
    pub fn spawn<F>(&self, name: impl Into<String>, work: F) -> TaskId
    where
        F: FnOnce(&CancelHandle) -> WorkResult + Send + 'static,
    {
        let task_id = self.create_task(name, work);
        self.submit_task(task_id);
        task_id
    }

    /// Request cooperative cancellation of a task
    pub fn cancel_task(&self, task_id: TaskId) -> bool {
        let guard = self.registry.lock();
        let registry = guard.borrow();

        let Some(task) = registry.tasks.get(&task_id) else {
            warn!("Cannot cancel task {}: not found", task_id);
            return false;
        };
        if !task.cancel() {
            debug!("Task {} is already {}, cancel ignored", task_id, task.status);
            return false;
        }

        info!("Cancellation requested for task {} ({})", task_id, task.name);
        let _ = self.event_tx.send(TaskEvent::CancelRequested(task_id));
        true
    }

    /// Cancel every pending or running task
    pub fn cancel_all(&self) -> Vec<TaskId> {
        let guard = self.registry.lock();
        let active: Vec<TaskId> = guard
            .borrow()
            .tasks
            .values()
            .filter(|t| t.is_active())
            .map(|t| t.id)
            .collect();

        active
            .into_iter()
            .filter(|id| self.cancel_task(*id))
            .collect()
    }

    /// Get the current status of a task
    pub fn get_task_status(&self, task_id: TaskId) -> Option<TaskStatus> {
        let guard = self.registry.lock();
        let status = guard.borrow().tasks.get(&task_id).map(|t| t.status);
        status
    }

    /// Get a snapshot of a task
    pub fn get_task(&self, task_id: TaskId) -> Option<TaskInfo> {
        let guard = self.registry.lock();
        let info = guard.borrow().tasks.get(&task_id).map(TaskInfo::from);
        info
    }

    /// Snapshot of every task, ordered by ID
    pub fn get_all_tasks(&self) -> BTreeMap<TaskId, TaskInfo> {
        let guard = self.registry.lock();
        let snapshot = guard
            .borrow()
            .tasks
            .iter()
            .map(|(id, task)| (*id, TaskInfo::from(task)))
            .collect();
        snapshot
    }

    /// Block until the task's worker finishes or `timeout` elapses.
    ///
    /// Returns whether the worker has finished. Unknown tasks and tasks
    /// that were never submitted return false without blocking. The
    /// timeout only bounds the wait, the worker keeps running.
    pub fn wait_task(&self, task_id: TaskId, timeout: Option<Duration>) -> bool {
        let completion = {
            let guard = self.registry.lock();
            let registry = guard.borrow();
            let completion = registry
                .tasks
                .get(&task_id)
                .and_then(|t| t.worker.as_ref())
                .map(WorkerHandle::completion);
            completion
        };
        let Some(completion) = completion else {
            return false;
        };

        if !completion.wait(timeout) {
            return false;
        }

        let thread = {
            let guard = self.registry.lock();
            let mut registry = guard.borrow_mut();
            let thread = registry
                .tasks
                .get_mut(&task_id)
                .and_then(|t| t.worker.as_mut())
                .and_then(WorkerHandle::take_finished_thread);
            thread
        };
        if let Some(thread) = thread {
            if thread.join().is_err() {
                warn!("Worker thread for task {} panicked after finishing", task_id);
            }
        }
        true
    }

    /// Remove a task record regardless of its status.
    ///
    /// A running worker is not stopped; its final status write is dropped.
    pub fn remove_task(&self, task_id: TaskId) -> bool {
        let guard = self.registry.lock();
        let removed = guard.borrow_mut().tasks.remove(&task_id);

        match removed {
            Some(mut task) => {
                if task.is_active() {
                    warn!("Removed task {} ({}) while {}", task_id, task.name, task.status);
                    if let Some(worker) = task.worker.take() {
                        guard.borrow_mut().detached.push((task_id, worker));
                    }
                } else {
                    info!("Removed task {} ({})", task_id, task.name);
                }
                let _ = self.event_tx.send(TaskEvent::Removed(task_id));
                true
            }
            None => false,
        }
    }

    /// Remove all completed, failed and cancelled tasks
    pub fn cleanup_finished(&self) -> usize {
        let guard = self.registry.lock();
        let finished: Vec<TaskId> = guard
            .borrow()
            .tasks
            .values()
            .filter(|t| t.is_terminal())
            .map(|t| t.id)
            .collect();

        let removed = finished
            .into_iter()
            .filter(|id| self.remove_task(*id))
            .count();
        debug!("Cleaned up {} finished tasks", removed);
        removed
    }

    /// Count active tasks
    pub fn active_count(&self) -> usize {
        let guard = self.registry.lock();
        let count = guard.borrow().tasks.values().filter(|t| t.is_active()).count();
        count
    }

    /// Count all tasks
    pub fn total_count(&self) -> usize {
        let guard = self.registry.lock();
        let count = guard.borrow().tasks.len();
        count
    }

    /// Cancel everything and wait for the workers, each up to `timeout`.
    ///
    /// Workers of removed tasks are waited for as well. Returns how many
    /// workers did not finish cleanly: still running, or died outside
    /// their work function.
    pub fn shutdown(&self, timeout: Duration) -> usize {
        let cancelled = self.cancel_all();
        if !cancelled.is_empty() {
            info!("Shutting down: cancelled {} active tasks", cancelled.len());
        }

        let submitted: Vec<TaskId> = self
            .get_all_tasks()
            .into_values()
            .filter(|t| t.submitted)
            .map(|t| t.id)
            .collect();

        let mut still_running = 0;
        for task_id in submitted {
            if !self.wait_task(task_id, Some(timeout)) {
                warn!("Task {} did not finish within {:?}", task_id, timeout);
                still_running += 1;
            }
        }
        still_running + self.join_detached(timeout)
    }

    fn join_detached(&self, timeout: Duration) -> usize {
        let detached = {
            let guard = self.registry.lock();
            let detached = std::mem::take(&mut guard.borrow_mut().detached);
            detached
        };

        let mut unfinished = 0;
        for (task_id, mut worker) in detached {
            if !worker.completion().wait(Some(timeout)) {
                warn!("Worker of removed task {} did not finish within {:?}", task_id, timeout);
                unfinished += 1;
                continue;
            }
            if let Some(thread) = worker.take_finished_thread() {
                if thread.join().is_err() {
                    warn!("Worker of removed task {} panicked after finishing", task_id);
                    unfinished += 1;
                }
            }
        }
        unfinished
    }
}

impl Default for TaskManager {
    fn default() -> Self {
        Self::new()
    }
}

/// State moved onto a worker thread
struct Worker {
    registry: Weak<ReentrantMutex<RefCell<Registry>>>,
    event_tx: broadcast::Sender<TaskEvent>,
    task_id: TaskId,
    name: String,
    cancel: CancelHandle,
    completion: Arc<Completion>,
}

impl Worker {
    fn run(self, work: WorkFn) {
        debug!("Worker for task {} ({}) started", self.task_id, self.name);

        let outcome = match panic::catch_unwind(AssertUnwindSafe(|| work(&self.cancel))) {
            Ok(Ok(_)) if self.cancel.was_observed() => TaskOutcome::Cancelled,
            Ok(Ok(value)) => TaskOutcome::Completed(value),
            Ok(Err(WorkError::Cancelled)) => TaskOutcome::Cancelled,
            Ok(Err(WorkError::Failed(e))) => TaskOutcome::Failed(e.to_string()),
            Err(payload) => TaskOutcome::Failed(panic_message(payload.as_ref())),
        };

        match &outcome {
            TaskOutcome::Completed(_) => info!("Completed task {} ({})", self.task_id, self.name),
            TaskOutcome::Cancelled => info!("Cancelled task {} ({})", self.task_id, self.name),
            TaskOutcome::Failed(e) => error!("Task {} ({}) failed: {}", self.task_id, self.name, e),
        }

        let recorded = match self.registry.upgrade() {
            Some(registry) => {
                let guard = registry.lock();
                let mut registry = guard.borrow_mut();
                let recorded = match registry.tasks.get_mut(&self.task_id) {
                    Some(task) => task.finish(outcome.clone()),
                    None => false,
                };
                recorded
            }
            None => false,
        };

        if recorded {
            let event = match outcome {
                TaskOutcome::Completed(value) => TaskEvent::Completed(self.task_id, value),
                TaskOutcome::Failed(e) => TaskEvent::Failed(self.task_id, e),
                TaskOutcome::Cancelled => TaskEvent::Cancelled(self.task_id),
            };
            let _ = self.event_tx.send(event);
        } else {
            debug!("Task {} was removed before its worker finished", self.task_id);
        }

        self.completion.notify();
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("Task panicked: {}", s)
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("Task panicked: {}", s)
    } else {
        "Task panicked".to_string()
    }
}
