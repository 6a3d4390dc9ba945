//! Chat Module
//!
//! Remote chat-completion client and the conversation history that chat
//! jobs share.

pub mod client;
pub mod error;
pub mod history;

pub use client::{ChatBackend, DeepSeekClient};
pub use error::{ChatError, ChatResult};
pub use history::{ChatHistory, ChatMessage, Role};
