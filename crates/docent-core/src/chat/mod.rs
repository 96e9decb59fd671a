mod orchestrator;
mod session;

pub use orchestrator::{ChatOrchestrator, ChatStream, MAX_TOOL_ROUNDS};
pub use session::{ChatSession, TurnOutcome};

use thiserror::Error;

use crate::api::ApiError;
use crate::tools::McpError;

/// Why a chat turn failed.
#[derive(Debug, Error)]
pub enum ChatError {
    #[error("Tool server error: {0}")]
    ToolServer(#[from] McpError),

    #[error("Model call failed: {0}")]
    Model(ApiError),

    #[error("The model was still requesting tools after {limit} rounds")]
    ToolRoundLimit { limit: usize },

    #[error("Chat cancelled")]
    Cancelled,
}

impl From<ApiError> for ChatError {
    fn from(err: ApiError) -> Self {
        match err {
            ApiError::Cancelled { .. } => ChatError::Cancelled,
            other => ChatError::Model(other),
        }
    }
}

impl ChatError {
    /// Hint for the user when the failure looks like a setup problem.
    pub fn hint(&self) -> Option<&'static str> {
        match self {
            ChatError::Model(err) if err.is_connectivity() => {
                Some("Check OPENAI_API_KEY, OPENAI_BASE_URL and your network connection.")
            }
            ChatError::ToolServer(McpError::SpawnFailed { .. }) => {
                Some("The Context7 tool server needs Node.js and npx on your PATH.")
            }
            _ => None,
        }
    }
}
