//! Interactive Menu
//!
//! Line-oriented menu loop over any reader/writer pair. Work runs in the
//! background while the menu keeps polling for input.

use anyhow::Result;
use chrono::Local;
use log::info;
use std::io::{BufRead, Write};
use tokio::sync::broadcast::{self, error::TryRecvError};

use super::App;
use crate::tasks::{TaskEvent, TaskId, TaskInfo};

const RULE_WIDTH: usize = 78;

/// Menu loop bound to an application context
pub struct Menu<'a, R, W> {
    app: &'a App,
    input: R,
    output: W,
    events: broadcast::Receiver<TaskEvent>,
}

impl<'a, R: BufRead, W: Write> Menu<'a, R, W> {
    pub fn new(app: &'a App, input: R, output: W) -> Self {
        Self {
            app,
            input,
            output,
            events: app.manager().subscribe(),
        }
    }

    /// Run until the user exits or input ends, then shut the workers down
    pub fn run(&mut self) -> Result<()> {
        loop {
            self.report_finished()?;
            self.print_menu()?;
            let Some(choice) = self.read_line()? else {
                info!("Input closed, leaving menu");
                break;
            };

            match choice.as_str() {
                "0" => self.show_tasks()?,
                "1" => self.cancel_task()?,
                "2" => self.cleanup_tasks()?,
                "3" => self.analyze_datasets()?,
                "4" => self.chat()?,
                "5" => self.show_task_details()?,
                "9" => {
                    writeln!(self.output, "Exiting...")?;
                    info!("User chose to exit");
                    break;
                }
                "" => {}
                _ => writeln!(self.output, "Invalid option, please try again.")?,
            }
        }

        let still_running = self.app.shutdown();
        if still_running > 0 {
            writeln!(
                self.output,
                "{} tasks did not finish in time and were left running.",
                still_running
            )?;
        }
        Ok(())
    }

    /// Announce tasks that finished since the menu was last shown
    fn report_finished(&mut self) -> Result<()> {
        loop {
            let line = match self.events.try_recv() {
                Ok(TaskEvent::Completed(id, _)) => format!("Task {} completed.", id),
                Ok(TaskEvent::Failed(id, error)) => format!("Task {} failed: {}", id, error),
                Ok(TaskEvent::Cancelled(id)) => format!("Task {} cancelled.", id),
                Ok(_) => continue,
                Err(TryRecvError::Lagged(missed)) => {
                    format!("{} task updates missed, use option 0 for the full list.", missed)
                }
                Err(TryRecvError::Empty | TryRecvError::Closed) => return Ok(()),
            };
            writeln!(self.output, "{}", line)?;
        }
    }

    fn print_menu(&mut self) -> Result<()> {
        let rule = "=".repeat(50);
        writeln!(self.output)?;
        writeln!(self.output, "{}", rule)?;
        writeln!(self.output, "{} - main menu", self.app.config().project_name)?;
        writeln!(self.output, "{}", rule)?;
        writeln!(self.output, "0. Show task status")?;
        writeln!(self.output, "1. Cancel a task")?;
        writeln!(self.output, "2. Clean up finished tasks")?;
        writeln!(self.output, "3. Analyze datasets")?;
        writeln!(self.output, "4. Chat")?;
        writeln!(self.output, "5. Show task details")?;
        writeln!(self.output, "9. Exit")?;
        writeln!(self.output, "{}", rule)?;
        write!(self.output, "Choose an option (0-5, 9): ")?;
        self.output.flush()?;
        Ok(())
    }

    fn read_line(&mut self) -> Result<Option<String>> {
        let mut line = String::new();
        if self.input.read_line(&mut line)? == 0 {
            return Ok(None);
        }
        Ok(Some(line.trim().to_string()))
    }

    fn prompt(&mut self, label: &str) -> Result<Option<String>> {
        write!(self.output, "{}", label)?;
        self.output.flush()?;
        self.read_line()
    }

    fn prompt_task_id(&mut self, label: &str) -> Result<Option<TaskId>> {
        let Some(answer) = self.prompt(label)? else {
            return Ok(None);
        };
        match answer.parse::<TaskId>() {
            Ok(id) => Ok(Some(id)),
            Err(_) => {
                writeln!(self.output, "Invalid task ID.")?;
                Ok(None)
            }
        }
    }

    fn show_tasks(&mut self) -> Result<()> {
        let tasks = self.app.manager().get_all_tasks();
        if tasks.is_empty() {
            writeln!(self.output, "\nNo tasks yet.")?;
            return Ok(());
        }

        let rule = "-".repeat(RULE_WIDTH);
        writeln!(self.output, "\n{}", rule)?;
        writeln!(
            self.output,
            "{:<8} {:<30} {:<10} {:<20}",
            "ID", "Name", "Status", "Created"
        )?;
        writeln!(self.output, "{}", rule)?;
        for task in tasks.values() {
            writeln!(self.output, "{}", format_row(task))?;
        }
        writeln!(self.output, "{}", rule)?;
        Ok(())
    }

    fn cancel_task(&mut self) -> Result<()> {
        self.show_tasks()?;
        let Some(task_id) = self.prompt_task_id("Task ID to cancel: ")? else {
            return Ok(());
        };

        if self.app.manager().cancel_task(task_id) {
            writeln!(self.output, "Cancellation requested for task {}.", task_id)?;
        } else {
            writeln!(
                self.output,
                "Cannot cancel task {}: check the ID and the task status.",
                task_id
            )?;
        }
        Ok(())
    }

    fn cleanup_tasks(&mut self) -> Result<()> {
        let removed = self.app.manager().cleanup_finished();
        writeln!(self.output, "Removed {} finished tasks.", removed)?;
        Ok(())
    }

    fn analyze_datasets(&mut self) -> Result<()> {
        match self.app.submit_dataset_jobs(None) {
            Ok(ids) if ids.is_empty() => writeln!(
                self.output,
                "No CSV files found in {}.",
                self.app.config().dataset_dir.display()
            )?,
            Ok(ids) => writeln!(self.output, "Submitted {} dataset tasks.", ids.len())?,
            Err(e) => writeln!(self.output, "Could not start analysis: {:#}", e)?,
        }
        Ok(())
    }

    fn chat(&mut self) -> Result<()> {
        let Some(message) = self.prompt("Message: ")? else {
            return Ok(());
        };
        if message.is_empty() {
            writeln!(self.output, "Empty message, nothing sent.")?;
            return Ok(());
        }

        match self.app.submit_chat(&message) {
            Ok(task_id) => writeln!(self.output, "Chat submitted as task {}.", task_id)?,
            Err(e) => writeln!(self.output, "Could not start chat: {:#}", e)?,
        }
        Ok(())
    }

    fn show_task_details(&mut self) -> Result<()> {
        let Some(task_id) = self.prompt_task_id("Task ID: ")? else {
            return Ok(());
        };
        let Some(task) = self.app.manager().get_task(task_id) else {
            writeln!(self.output, "Task {} not found.", task_id)?;
            return Ok(());
        };

        writeln!(self.output, "\nTask {} ({})", task.id, task.name)?;
        writeln!(self.output, "  status:    {}", task.status)?;
        if task.cancel_requested {
            writeln!(self.output, "  cancel requested")?;
        }
        if let Some(ms) = task.duration_ms {
            writeln!(self.output, "  duration:  {} ms", ms)?;
        }
        if let Some(error) = &task.error {
            writeln!(self.output, "  error:     {}", error)?;
        }
        if let Some(result) = &task.result {
            writeln!(self.output, "  result:    {}", serde_json::to_string_pretty(result)?)?;
        }
        Ok(())
    }
}

fn format_row(task: &TaskInfo) -> String {
    let created = task
        .created_at
        .with_timezone(&Local)
        .format("%Y-%m-%d %H:%M:%S");
    let name: String = task.name.chars().take(30).collect();
    format!(
        "{:<8} {:<30} {:<10} {:<20}",
        task.id.to_string(),
        name,
        task.status.to_string(),
        created.to_string()
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::tasks::TaskStatus;
    use std::io::Cursor;
    use std::time::Duration;

    fn run_menu(app: &App, input: &str) -> String {
        let mut output = Vec::new();
        Menu::new(app, Cursor::new(input.as_bytes()), &mut output)
            .run()
            .unwrap();
        String::from_utf8(output).unwrap()
    }

    fn app_in(dir: &std::path::Path) -> App {
        App::new(AppConfig {
            dataset_dir: dir.join("datasets"),
            output_dir: dir.join("reports"),
            chat_history_dir: dir.join("chats"),
            ..AppConfig::default()
        })
    }

    #[test]
    fn test_exit_and_invalid_option() {
        let dir = tempfile::tempdir().unwrap();
        let app = app_in(dir.path());
        let output = run_menu(&app, "7\n9\n");
        assert!(output.contains("Invalid option"));
        assert!(output.contains("Exiting..."));
    }

    #[test]
    fn test_empty_task_list() {
        let dir = tempfile::tempdir().unwrap();
        let app = app_in(dir.path());
        let output = run_menu(&app, "0\n");
        assert!(output.contains("No tasks yet."));
    }

    #[test]
    fn test_show_and_cancel_task() {
        let dir = tempfile::tempdir().unwrap();
        let app = app_in(dir.path());
        let task_id = app.manager().spawn("Long job", |cancel| loop {
            cancel.check()?;
            std::thread::sleep(Duration::from_millis(5));
        });

        let output = run_menu(&app, &format!("1\n{}\n9\n", task_id));
        assert!(output.contains("Long job"));
        assert!(output.contains("running"));
        assert!(output.contains(&format!("Cancellation requested for task {}.", task_id)));
        assert_eq!(app.manager().get_task_status(task_id), Some(TaskStatus::Cancelled));
    }

    #[test]
    fn test_cancel_invalid_id() {
        let dir = tempfile::tempdir().unwrap();
        let app = app_in(dir.path());
        let output = run_menu(&app, "1\nabc\n1\n77\n9\n");
        assert!(output.contains("Invalid task ID."));
        assert!(output.contains("Cannot cancel task 77"));
    }

    #[test]
    fn test_cleanup_and_details() {
        let dir = tempfile::tempdir().unwrap();
        let app = app_in(dir.path());
        let failed = app
            .manager()
            .spawn("Broken", |_| Err(crate::tasks::WorkError::msg("bad")));
        assert!(app.manager().wait_task(failed, Some(Duration::from_secs(5))));

        let output = run_menu(&app, &format!("5\n{}\n2\n0\n", failed));
        assert!(output.contains("status:    failed"));
        assert!(output.contains("error:     bad"));
        assert!(output.contains("Removed 1 finished tasks."));
        assert!(output.contains("No tasks yet."));
    }

    #[test]
    fn test_reports_finished_tasks() {
        let dir = tempfile::tempdir().unwrap();
        let app = app_in(dir.path());
        let mut output = Vec::new();
        let mut menu = Menu::new(&app, Cursor::new("9\n".as_bytes()), &mut output);

        let done = app.manager().spawn("Quick", |_| Ok(serde_json::json!(1)));
        let failed = app
            .manager()
            .spawn("Broken", |_| Err(crate::tasks::WorkError::msg("bad")));
        assert!(app.manager().wait_task(done, Some(Duration::from_secs(5))));
        assert!(app.manager().wait_task(failed, Some(Duration::from_secs(5))));

        menu.run().unwrap();
        drop(menu);
        let output = String::from_utf8(output).unwrap();
        assert!(output.contains(&format!("Task {} completed.", done)));
        assert!(output.contains(&format!("Task {} failed: bad", failed)));
    }

    #[test]
    fn test_analyze_without_datasets() {
        let dir = tempfile::tempdir().unwrap();
        let app = app_in(dir.path());
        std::fs::create_dir_all(dir.path().join("datasets")).unwrap();
        let output = run_menu(&app, "3\n9\n");
        assert!(output.contains("No CSV files found"));
    }

    #[test]
    fn test_chat_without_api_key_reports_error() {
        let dir = tempfile::tempdir().unwrap();
        let app = app_in(dir.path());
        let output = run_menu(&app, "4\nhello\n9\n");
        assert!(output.contains("Could not start chat"));
        assert!(output.contains("Missing API key"));
    }
}
