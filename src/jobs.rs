//! Jobs
//!
//! Work functions that bind dataset analysis and chat round-trips to the
//! task manager.

use log::info;
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;

use crate::chat::{ChatBackend, ChatHistory};
use crate::dataset::{self, Table};
use crate::tasks::{CancelHandle, WorkResult};

/// Analyse one CSV file and write its report to `output_dir`.
///
/// The result is a summary of the report: its path, row count and the
/// number of charted and failed columns.
pub fn dataset_job(
    path: PathBuf,
    max_categories: usize,
    output_dir: PathBuf,
) -> impl FnOnce(&CancelHandle) -> WorkResult + Send + 'static {
    move |cancel: &CancelHandle| {
        let name = dataset::dataset_name(&path);
        let table = Table::from_path(&path).map_err(anyhow::Error::from)?;
        cancel.check()?;

        let report = dataset::analyze(&table, &name, max_categories, cancel)?;
        cancel.check()?;
        let report_path = report.save(&output_dir).map_err(anyhow::Error::from)?;

        Ok(json!({
            "dataset": name,
            "report": report_path.display().to_string(),
            "rows": report.rows,
            "columns": report.columns.len(),
            "errors": report.errors.len(),
        }))
    }
}

/// Send one message through the shared conversation.
///
/// A request already in flight cannot be interrupted; cancellation is
/// only honoured before it is sent.
pub fn chat_job(
    history: Arc<ChatHistory>,
    backend: Arc<dyn ChatBackend>,
    message: String,
) -> impl FnOnce(&CancelHandle) -> WorkResult + Send + 'static {
    move |cancel: &CancelHandle| {
        cancel.check()?;
        let reply = history
            .exchange(backend.as_ref(), &message)
            .map_err(anyhow::Error::from)?;
        info!("Chat reply received ({} chars)", reply.chars().count());

        Ok(json!({
            "question": message,
            "answer": reply,
            "transcript": history.path().display().to_string(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::{ChatError, ChatMessage, ChatResult};
    use crate::tasks::{TaskManager, TaskStatus};
    use chrono::Local;
    use std::time::Duration;

    const WAIT: Option<Duration> = Some(Duration::from_secs(5));

    struct FixedBackend(&'static str);

    impl ChatBackend for FixedBackend {
        fn complete(&self, _messages: &[ChatMessage]) -> ChatResult<String> {
            Ok(self.0.to_string())
        }
    }

    struct FailingBackend;

    impl ChatBackend for FailingBackend {
        fn complete(&self, _messages: &[ChatMessage]) -> ChatResult<String> {
            Err(ChatError::Timeout)
        }
    }

    #[test]
    fn test_dataset_job_completes() {
        let dir = tempfile::tempdir().unwrap();
        let csv = dir.path().join("complaints.csv");
        std::fs::write(&csv, "Complaint ID,Product,State\n1,loan,CA\n2,card,NY\n3,loan,CA\n").unwrap();
        let out = dir.path().join("reports");

        let manager = TaskManager::new();
        let task_id = manager.spawn("Analyze complaints", dataset_job(csv, 10, out.clone()));
        assert!(manager.wait_task(task_id, WAIT));

        let task = manager.get_task(task_id).unwrap();
        assert_eq!(task.status, TaskStatus::Completed);
        let result = task.result.unwrap();
        assert_eq!(result["rows"], 3);
        assert_eq!(result["columns"], 2);
        assert!(out.join("complaints.json").exists());
    }

    #[test]
    fn test_dataset_job_missing_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let manager = TaskManager::new();
        let task_id = manager.spawn(
            "Analyze missing",
            dataset_job(dir.path().join("missing.csv"), 10, dir.path().to_path_buf()),
        );
        assert!(manager.wait_task(task_id, WAIT));

        let task = manager.get_task(task_id).unwrap();
        assert_eq!(task.status, TaskStatus::Failed);
        assert!(task.error.unwrap().contains("missing.csv"));
    }

    #[test]
    fn test_chat_job_records_answer() {
        let dir = tempfile::tempdir().unwrap();
        let history = Arc::new(ChatHistory::new(dir.path(), "system", Local::now()).unwrap());
        let manager = TaskManager::new();

        let task_id = manager.spawn(
            "Chat",
            chat_job(Arc::clone(&history), Arc::new(FixedBackend("42")), "answer?".into()),
        );
        assert!(manager.wait_task(task_id, WAIT));

        let task = manager.get_task(task_id).unwrap();
        assert_eq!(task.status, TaskStatus::Completed);
        assert_eq!(task.result.unwrap()["answer"], "42");
        assert_eq!(history.message_count(), 3);
    }

    #[test]
    fn test_chat_job_failure() {
        let dir = tempfile::tempdir().unwrap();
        let history = Arc::new(ChatHistory::new(dir.path(), "system", Local::now()).unwrap());
        let manager = TaskManager::new();

        let task_id = manager.spawn(
            "Chat",
            chat_job(Arc::clone(&history), Arc::new(FailingBackend), "hello".into()),
        );
        assert!(manager.wait_task(task_id, WAIT));

        let task = manager.get_task(task_id).unwrap();
        assert_eq!(task.status, TaskStatus::Failed);
        assert_eq!(task.error.as_deref(), Some("Request timed out"));
        assert_eq!(history.message_count(), 1);
    }

    #[test]
    fn test_chat_job_cancelled_before_send() {
        let dir = tempfile::tempdir().unwrap();
        let history = Arc::new(ChatHistory::new(dir.path(), "system", Local::now()).unwrap());
        let manager = TaskManager::new();

        let task_id = manager.create_task(
            "Chat",
            chat_job(Arc::clone(&history), Arc::new(FixedBackend("unused")), "hi".into()),
        );
        manager.cancel_task(task_id);
        manager.submit_task(task_id);
        assert!(manager.wait_task(task_id, WAIT));

        assert_eq!(manager.get_task_status(task_id), Some(TaskStatus::Cancelled));
        assert_eq!(history.message_count(), 1);
    }
}
