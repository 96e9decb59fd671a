use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum McpError {
    #[error("Cannot start {server_name}: {message}")]
    SpawnFailed {
        server_name: String,
        message: String,
    },

    #[error("Cannot connect to {server_name}: {message}")]
    ConnectionFailed {
        server_name: String,
        message: String,
    },

    #[error("Failed to list tools from {server_name}: {message}")]
    ListToolsFailed {
        server_name: String,
        message: String,
    },

    #[error("Timeout listing tools from {server_name}")]
    ListToolsTimeout { server_name: String },

    #[error("Tool {tool} failed: {message}")]
    CallToolFailed { tool: String, message: String },

    #[error("Invalid arguments for {tool}: {message}")]
    InvalidArguments { tool: String, message: String },

    #[error("{server_name} is no longer running")]
    NotRunning { server_name: String },
}
