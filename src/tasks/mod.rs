//! Tasks Module
//!
//! Background job management for dataset analysis and chat round-trips.
//! Handles thread-per-task execution, status tracking, and cooperative cancellation.

pub mod manager;
pub mod types;

pub use manager::{TaskEvent, TaskManager};
pub use types::{CancelHandle, Task, TaskId, TaskInfo, TaskStatus, WorkError, WorkFn, WorkResult};
