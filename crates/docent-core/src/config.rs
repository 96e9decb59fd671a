use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

use crate::utils::AppPaths;

pub const API_KEY_ENV: &str = "OPENAI_API_KEY";
pub const BASE_URL_ENV: &str = "OPENAI_BASE_URL";
pub const MODEL_ENV: &str = "OPENAI_MODEL";
pub const HISTORY_FILE_ENV: &str = "DOCENT_HISTORY_FILE";
pub const SYSTEM_PROMPT_ENV: &str = "DOCENT_SYSTEM_PROMPT";

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_MODEL: &str = "gpt-4o-mini";
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are Docent, a documentation assistant backed by the \
Context7 MCP server. Use the Context7 tools to resolve library identifiers and fetch up-to-date \
documentation before answering questions about libraries, frameworks or APIs. Cite the documents \
you relied on, prefer concise answers with working code samples, and say so plainly when the \
retrieved documentation does not cover the question.";

pub const DEFAULT_TOOL_SERVER_NAME: &str = "context7";
pub const DEFAULT_TOOL_SERVER_COMMAND: &str = "npx";
pub const DEFAULT_TOOL_SERVER_ARGS: [&str; 2] = ["-y", "@upstash/context7-mcp@latest"];

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("OPENAI_API_KEY is required. Set it in your environment or in a .env file")]
    MissingApiKey,

    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Launch contract for the external retrieval tool server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolServerConfig {
    pub server_name: String,
    pub command: String,
    pub args: Vec<String>,
}

impl Default for ToolServerConfig {
    fn default() -> Self {
        Self {
            server_name: DEFAULT_TOOL_SERVER_NAME.to_string(),
            command: DEFAULT_TOOL_SERVER_COMMAND.to_string(),
            args: DEFAULT_TOOL_SERVER_ARGS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl ToolServerConfig {
    /// The full command line, for logs and error messages.
    pub fn command_line(&self) -> String {
        std::iter::once(self.command.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

#[derive(Clone, PartialEq, Eq)]
pub struct Config {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    pub history_file: PathBuf,
    pub system_prompt: String,
    pub tool_server: ToolServerConfig,
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("api_key", &"<redacted>")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("history_file", &self.history_file)
            .field("system_prompt", &self.system_prompt)
            .field("tool_server", &self.tool_server)
            .finish()
    }
}

impl Config {
    /// Build a configuration with defaults for everything but the API key.
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            history_file: AppPaths::default_history_file(),
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            tool_server: ToolServerConfig::default(),
        }
    }

    /// Read the configuration from the process environment.
    ///
    /// `.env` loading is the caller's job; this only consults variables that
    /// are already set.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read the configuration through an arbitrary variable lookup.
    ///
    /// Empty values are treated as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        let api_key = get(API_KEY_ENV).ok_or(ConfigError::MissingApiKey)?;
        let mut config = Self::new(api_key);

        if let Some(base_url) = get(BASE_URL_ENV) {
            config = config.with_base_url(base_url)?;
        }
        if let Some(model) = get(MODEL_ENV) {
            config.model = model;
        }
        if let Some(history_file) = get(HISTORY_FILE_ENV) {
            config.history_file = expand_home(&history_file);
        }
        if let Some(system_prompt) = get(SYSTEM_PROMPT_ENV) {
            config.system_prompt = system_prompt;
        }

        Ok(config)
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Result<Self, ConfigError> {
        let base_url = base_url.into();
        url::Url::parse(&base_url).map_err(|e| ConfigError::InvalidValue {
            key: BASE_URL_ENV.to_string(),
            message: format!("'{base_url}' is not a valid URL: {e}"),
        })?;
        self.base_url = base_url;
        Ok(self)
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_history_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.history_file = path.into();
        self
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    pub fn with_tool_server(mut self, tool_server: ToolServerConfig) -> Self {
        self.tool_server = tool_server;
        self
    }
}

fn expand_home(path: &str) -> PathBuf {
    match path.strip_prefix("~/") {
        Some(rest) => AppPaths::home_dir().join(rest),
        None if path == "~" => AppPaths::home_dir(),
        None => PathBuf::from(path),
    }
}
