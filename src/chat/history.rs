//! Conversation History
//!
//! Message log shared by chat jobs, persisted to one JSON file per run.

use chrono::{DateTime, Local};
use log::{debug, warn};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use super::client::ChatBackend;
use super::error::ChatResult;

/// Author of a chat message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// A single chat message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Conversation shared across concurrently running chat jobs.
///
/// The message lock is held for a whole exchange, so turns from
/// different jobs never interleave.
pub struct ChatHistory {
    messages: Mutex<Vec<ChatMessage>>,
    path: PathBuf,
}

impl ChatHistory {
    /// Start a conversation whose transcript lives in `dir`, named after `started_at`
    pub fn new(
        dir: impl AsRef<Path>,
        system_prompt: impl Into<String>,
        started_at: DateTime<Local>,
    ) -> ChatResult<Self> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir)?;
        let path = dir.join(format!("{}.json", started_at.format("%Y%m%d_%H%M%S")));
        debug!("Chat history file: {}", path.display());

        Ok(Self {
            messages: Mutex::new(vec![ChatMessage::system(system_prompt)]),
            path,
        })
    }

    /// Transcript file path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Copy of the current messages
    pub fn messages(&self) -> Vec<ChatMessage> {
        self.messages.lock().clone()
    }

    /// Number of messages, system prompt included
    pub fn message_count(&self) -> usize {
        self.messages.lock().len()
    }

    /// Send `message` with the whole conversation and record the reply.
    ///
    /// A failed request or transcript write leaves the history as it was.
    /// The transcript is rewritten while the lock is still held.
    pub fn exchange(&self, backend: &dyn ChatBackend, message: &str) -> ChatResult<String> {
        let mut messages = self.messages.lock();
        messages.push(ChatMessage::user(message));

        let reply = match backend.complete(&messages) {
            Ok(reply) => reply,
            Err(e) => {
                messages.pop();
                return Err(e);
            }
        };
        messages.push(ChatMessage::assistant(reply.clone()));

        if let Err(e) = self.write(&messages) {
            warn!("Failed to save chat history to {}: {}", self.path.display(), e);
            let kept = messages.len() - 2;
            messages.truncate(kept);
            return Err(e);
        }
        Ok(reply)
    }

    /// Write the current conversation to the transcript file
    pub fn save(&self) -> ChatResult<()> {
        let messages = self.messages.lock();
        self.write(&messages)
    }

    fn write(&self, messages: &[ChatMessage]) -> ChatResult<()> {
        let json = serde_json::to_string_pretty(messages)?;
        fs::write(&self.path, json)?;
        Ok(())
    }
}
