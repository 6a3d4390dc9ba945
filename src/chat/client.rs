//! Chat Completion Client
//!
//! Blocking client for an OpenAI-compatible chat completion API.
//! Chat jobs run on their own worker threads, so requests block.

use log::debug;
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use url::Url;

use super::error::{ChatError, ChatResult};
use super::history::ChatMessage;
use crate::config::ChatConfig;

/// Anything that can answer a conversation
pub trait ChatBackend: Send + Sync {
    /// Reply to the last message given the whole conversation
    fn complete(&self, messages: &[ChatMessage]) -> ChatResult<String>;
}

#[derive(Debug, Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ReplyMessage,
}

#[derive(Debug, Deserialize)]
struct ReplyMessage {
    content: Option<String>,
}

/// DeepSeek chat API client
pub struct DeepSeekClient {
    /// HTTP client with configured timeouts
    client: Client,
    base_url: Url,
    api_key: String,
    model: String,
}

impl DeepSeekClient {
    /// Build a client from chat settings; fails without an API key
    pub fn from_config(config: &ChatConfig) -> ChatResult<Self> {
        let api_key = config.require_api_key()?.to_string();
        let base_url = config.base_url()?;

        let client = Client::builder()
            .timeout(config.request_timeout())
            .connect_timeout(std::time::Duration::from_secs(10))
            .build()
            .map_err(|e| ChatError::TransportError(e.to_string()))?;

        Ok(Self {
            client,
            base_url,
            api_key,
            model: config.model.clone(),
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Resolve an endpoint path against the base URL
    fn endpoint(&self, path: &str) -> ChatResult<Url> {
        endpoint_url(&self.base_url, path)
    }

    /// Query the remaining account balance
    pub fn balance(&self) -> ChatResult<serde_json::Value> {
        let response = self
            .client
            .get(self.endpoint("user/balance")?)
            .bearer_auth(&self.api_key)
            .header("Accept", "application/json")
            .send()?;

        let status = response.status();
        if !status.is_success() {
            return Err(ChatError::Api {
                status: status.as_u16(),
                body: response.text().unwrap_or_default(),
            });
        }
        Ok(response.json()?)
    }
}

impl ChatBackend for DeepSeekClient {
    fn complete(&self, messages: &[ChatMessage]) -> ChatResult<String> {
        let request = CompletionRequest {
            model: &self.model,
            messages,
            stream: false,
        };
        debug!(
            "Sending chat completion ({} messages, model {})",
            messages.len(),
            self.model
        );

        let response = self
            .client
            .post(self.endpoint("chat/completions")?)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()?;

        let status = response.status();
        if !status.is_success() {
            return Err(ChatError::Api {
                status: status.as_u16(),
                body: response.text().unwrap_or_default(),
            });
        }

        let body: CompletionResponse = response.json()?;
        extract_reply(body)
    }
}

fn endpoint_url(base: &Url, path: &str) -> ChatResult<Url> {
    // Url::join drops the last segment unless the base ends with '/'
    let mut base = base.clone();
    if !base.path().ends_with('/') {
        let path = format!("{}/", base.path());
        base.set_path(&path);
    }
    Ok(base.join(path)?)
}

fn extract_reply(body: CompletionResponse) -> ChatResult<String> {
    body.choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .filter(|c| !c.is_empty())
        .ok_or(ChatError::EmptyResponse)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_url() {
        let base = Url::parse("https://api.deepseek.com").unwrap();
        assert_eq!(
            endpoint_url(&base, "chat/completions").unwrap().as_str(),
            "https://api.deepseek.com/chat/completions"
        );

        let versioned = Url::parse("https://example.com/v1").unwrap();
        assert_eq!(
            endpoint_url(&versioned, "user/balance").unwrap().as_str(),
            "https://example.com/v1/user/balance"
        );
    }

    #[test]
    fn test_request_serialization() {
        let messages = vec![ChatMessage::system("be brief"), ChatMessage::user("hi")];
        let request = CompletionRequest {
            model: "deepseek-chat",
            messages: &messages,
            stream: false,
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["model"], "deepseek-chat");
        assert_eq!(json["messages"][0]["role"], "system");
        assert_eq!(json["messages"][1]["content"], "hi");
    }

    #[test]
    fn test_extract_reply() {
        let body: CompletionResponse = serde_json::from_str(
            r#"{"id":"x","choices":[{"index":0,"message":{"role":"assistant","content":"Hello!"}}]}"#,
        )
        .unwrap();
        assert_eq!(extract_reply(body).unwrap(), "Hello!");

        let empty: CompletionResponse = serde_json::from_str(r#"{"choices":[]}"#).unwrap();
        assert!(matches!(extract_reply(empty), Err(ChatError::EmptyResponse)));

        let null: CompletionResponse =
            serde_json::from_str(r#"{"choices":[{"message":{"content":null}}]}"#).unwrap();
        assert!(matches!(extract_reply(null), Err(ChatError::EmptyResponse)));
    }

    #[test]
    fn test_client_requires_api_key() {
        let config = ChatConfig::default();
        assert!(matches!(
            DeepSeekClient::from_config(&config),
            Err(ChatError::InvalidConfig(_))
        ));

        let config = ChatConfig {
            api_key: Some("sk-test".to_string()),
            model: "deepseek-reasoner".to_string(),
            ..ChatConfig::default()
        };
        let client = DeepSeekClient::from_config(&config).unwrap();
        assert_eq!(client.model(), "deepseek-reasoner");
    }
}
