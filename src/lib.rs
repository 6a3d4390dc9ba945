//! Background task desk: a thread-per-task manager with cooperative
//! cancellation, plus the dataset analysis and chat jobs it runs.

pub mod chat;
pub mod config;
pub mod dataset;
pub mod jobs;
pub mod launcher;
pub mod tasks;
