pub mod cli;
pub mod logging;
pub mod repl;

use docent_core::api::OpenAIClient;
use docent_core::chat::{ChatOrchestrator, ChatSession};
use docent_core::config::Config;
use docent_core::store::ConversationStore;
use docent_core::tools::StdioLauncher;
use eyre::{Result, WrapErr};
use std::sync::Arc;

/// Wire the OpenAI client, the stdio tool-server launcher and the
/// conversation store into a chat session. Nothing is spawned or read yet.
pub fn build_session(config: &Config) -> Result<ChatSession> {
    let client = OpenAIClient::from_config(config).wrap_err("Failed to create the model client")?;
    let launcher = StdioLauncher::new(config.tool_server.clone());
    let orchestrator = ChatOrchestrator::new(Arc::new(client), Arc::new(launcher), config);
    let store = ConversationStore::new(&config.history_file);
    Ok(ChatSession::new(orchestrator, Arc::new(store)))
}
