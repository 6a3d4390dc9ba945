//! Application Configuration
//!
//! Settings come from built-in defaults, an optional TOML file, a `.env`
//! file and the process environment, in that order.

use log::debug;
use serde::Deserialize;
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

const DEFAULT_BASE_URL: &str = "https://api.deepseek.com";
const DEFAULT_SYSTEM_PROMPT: &str =
    "You are a helpful assistant for data analysis. Please answer the question using English.";

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid value for {key}: {value}")]
    InvalidValue { key: String, value: String },

    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("Missing API key: set API_KEY or DEEPSEEK_API_KEY")]
    MissingApiKey,
}

/// Chat API settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ChatConfig {
    /// Bearer token for the chat API
    pub api_key: Option<String>,
    /// Base URL of the API, without the endpoint path
    pub base_url: String,
    /// Model name sent with each completion request
    pub model: String,
    /// First message of every conversation
    pub system_prompt: String,
    pub request_timeout_secs: u64,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: DEFAULT_BASE_URL.to_string(),
            model: "deepseek-chat".to_string(),
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            request_timeout_secs: 120,
        }
    }
}

impl ChatConfig {
    /// Parsed base URL
    pub fn base_url(&self) -> Result<Url, ConfigError> {
        Ok(Url::parse(&self.base_url)?)
    }

    /// API key, required once a chat request is about to be made
    pub fn require_api_key(&self) -> Result<&str, ConfigError> {
        self.api_key
            .as_deref()
            .filter(|k| !k.is_empty())
            .ok_or(ConfigError::MissingApiKey)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Top-level application configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub project_name: String,
    /// Log filter used when no `-v` flag is given
    pub log_level: String,
    /// How long to wait for each worker thread on exit
    pub thread_timeout_secs: f64,
    /// Directory scanned for `*.csv` datasets
    pub dataset_dir: PathBuf,
    /// Directory receiving dataset reports
    pub output_dir: PathBuf,
    /// Maximum slices per column distribution
    pub max_categories: usize,
    /// Directory receiving per-run chat transcripts
    pub chat_history_dir: PathBuf,
    pub chat: ChatConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            project_name: "taskdesk".to_string(),
            log_level: "info".to_string(),
            thread_timeout_secs: 5.0,
            dataset_dir: PathBuf::from("datasets"),
            output_dir: PathBuf::from("reports"),
            max_categories: 10,
            chat_history_dir: PathBuf::from("chat_history"),
            chat: ChatConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from an optional TOML file, `.env` and the environment
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };

        if let Ok(dotenv_path) = dotenvy::dotenv() {
            debug!("Loaded environment from {}", dotenv_path.display());
        }
        config.apply_env(|key| env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Parse a TOML config file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Override settings from environment-style variables
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(name) = lookup("PROJECT_NAME") {
            self.project_name = name;
        }
        if let Some(level) = lookup("LOG_LEVEL") {
            self.log_level = level;
        }
        if let Some(timeout) = lookup("THREAD_TIMEOUT") {
            self.thread_timeout_secs = parse_value("THREAD_TIMEOUT", &timeout)?;
        }
        if let Some(dir) = lookup("DATASET_DIR") {
            self.dataset_dir = PathBuf::from(dir);
        }
        if let Some(dir) = lookup("OUTPUT_DIR") {
            self.output_dir = PathBuf::from(dir);
        }
        if let Some(max) = lookup("MAX_CATEGORIES") {
            self.max_categories = parse_value("MAX_CATEGORIES", &max)?;
        }
        if let Some(dir) = lookup("CHAT_HISTORY_DIR") {
            self.chat_history_dir = PathBuf::from(dir);
        }
        if let Some(key) = lookup("API_KEY").or_else(|| lookup("DEEPSEEK_API_KEY")) {
            self.chat.api_key = Some(key);
        }
        if let Some(url) = lookup("CHAT_BASE_URL") {
            self.chat.base_url = url;
        }
        if let Some(model) = lookup("CHAT_MODEL") {
            self.chat.model = model;
        }
        Ok(())
    }

    /// Reject values no component can work with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if Duration::try_from_secs_f64(self.thread_timeout_secs).is_err() {
            return Err(ConfigError::InvalidValue {
                key: "thread_timeout_secs".to_string(),
                value: self.thread_timeout_secs.to_string(),
            });
        }
        if self.max_categories < 2 {
            return Err(ConfigError::InvalidValue {
                key: "max_categories".to_string(),
                value: self.max_categories.to_string(),
            });
        }
        self.chat.base_url()?;
        Ok(())
    }

    /// Per-worker wait on exit; values `validate` rejects saturate
    pub fn thread_timeout(&self) -> Duration {
        match Duration::try_from_secs_f64(self.thread_timeout_secs) {
            Ok(timeout) => timeout,
            Err(_) if self.thread_timeout_secs > 0.0 => Duration::MAX,
            Err(_) => Duration::ZERO,
        }
    }
}

fn parse_value<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
    })
}
