//! Launcher
//!
//! Application context shared by the CLI commands and the interactive menu.
//! Owns the task manager and builds the chat session on first use.

pub mod menu;

use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use log::{info, warn};
use parking_lot::Mutex;
use std::path::Path;
use std::sync::Arc;

use crate::chat::{ChatBackend, ChatHistory, DeepSeekClient};
use crate::config::AppConfig;
use crate::dataset;
use crate::jobs;
use crate::tasks::{TaskId, TaskManager};

pub use menu::Menu;

/// Top-level application context
pub struct App {
    config: AppConfig,
    manager: TaskManager,
    started_at: DateTime<Local>,
    backend: Mutex<Option<Arc<dyn ChatBackend>>>,
    history: Mutex<Option<Arc<ChatHistory>>>,
}

impl App {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config,
            manager: TaskManager::new(),
            started_at: Local::now(),
            backend: Mutex::new(None),
            history: Mutex::new(None),
        }
    }

    /// Use `backend` instead of the configured remote API
    pub fn with_chat_backend(self, backend: Arc<dyn ChatBackend>) -> Self {
        *self.backend.lock() = Some(backend);
        self
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn manager(&self) -> &TaskManager {
        &self.manager
    }

    /// Submit one analysis task per CSV file in `dir` (default: the configured dataset dir)
    pub fn submit_dataset_jobs(&self, dir: Option<&Path>) -> Result<Vec<TaskId>> {
        let dir = dir.unwrap_or(&self.config.dataset_dir);
        let paths = dataset::discover(dir)
            .with_context(|| format!("Failed to list datasets in {}", dir.display()))?;
        if paths.is_empty() {
            warn!("No CSV files found in {}", dir.display());
        }

        let task_ids = paths
            .into_iter()
            .map(|path| {
                let name = format!("Analyze {}", dataset::dataset_name(&path));
                let job = jobs::dataset_job(
                    path,
                    self.config.max_categories,
                    self.config.output_dir.clone(),
                );
                self.manager.spawn(name, job)
            })
            .collect();
        Ok(task_ids)
    }

    /// Submit a chat round-trip through the shared conversation
    pub fn submit_chat(&self, message: &str) -> Result<TaskId> {
        let backend = self.chat_backend()?;
        let history = self.chat_history()?;

        let name = format!("Chat: {}", preview(message, 24));
        let job = jobs::chat_job(history, backend, message.to_string());
        Ok(self.manager.spawn(name, job))
    }

    fn chat_backend(&self) -> Result<Arc<dyn ChatBackend>> {
        let mut backend = self.backend.lock();
        if let Some(backend) = backend.as_ref() {
            return Ok(Arc::clone(backend));
        }

        let client: Arc<dyn ChatBackend> = Arc::new(
            DeepSeekClient::from_config(&self.config.chat)
                .context("Failed to set up chat client")?,
        );
        *backend = Some(Arc::clone(&client));
        Ok(client)
    }

    fn chat_history(&self) -> Result<Arc<ChatHistory>> {
        let mut history = self.history.lock();
        if let Some(history) = history.as_ref() {
            return Ok(Arc::clone(history));
        }

        let created = Arc::new(
            ChatHistory::new(
                &self.config.chat_history_dir,
                self.config.chat.system_prompt.clone(),
                self.started_at,
            )
            .context("Failed to prepare chat history")?,
        );
        info!("Chat transcript: {}", created.path().display());
        *history = Some(Arc::clone(&created));
        Ok(created)
    }

    /// Cancel outstanding work, wait for the workers and flush the chat transcript
    pub fn shutdown(&self) -> usize {
        let still_running = self.manager.shutdown(self.config.thread_timeout());
        if still_running > 0 {
            warn!("{} worker threads still running at exit", still_running);
        }

        if let Some(history) = self.history.lock().as_ref() {
            if history.message_count() > 1 {
                match history.save() {
                    Ok(()) => info!("Chat transcript saved to {}", history.path().display()),
                    Err(e) => warn!("Failed to save chat transcript: {}", e),
                }
            }
        }
        still_running
    }
}

/// First `max` characters of `text` on one line
fn preview(text: &str, max: usize) -> String {
    let line = text.lines().next().unwrap_or("").trim();
    if line.chars().count() > max {
        let cut: String = line.chars().take(max).collect();
        format!("{}...", cut)
    } else {
        line.to_string()
    }
}
