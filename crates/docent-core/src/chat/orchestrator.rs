use futures::{Stream, StreamExt};
use std::pin::Pin;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::ChatError;
use crate::api::{
    ApiError, ChatMessage, CompletionRequest, CompletionResponse, ModelClient, StreamChunk,
};
use crate::config::Config;
use crate::store::Message;
use crate::stream::flatten_text_deltas;
use crate::tools::{ToolCall, ToolSchema, ToolServerHandle, ToolServerLauncher, ToolServerManager};

/// Tool rounds allowed per turn before the model must answer.
pub const MAX_TOOL_ROUNDS: usize = 8;

/// Text fragments of one streamed turn.
pub type ChatStream = Pin<Box<dyn Stream<Item = Result<String, ChatError>> + Send>>;

/// Runs chat turns against the model with a dedicated tool server per turn.
///
/// Cloning is cheap; clones share the model client and launcher but never
/// a tool server.
#[derive(Clone)]
pub struct ChatOrchestrator {
    client: Arc<dyn ModelClient>,
    tool_servers: ToolServerManager,
    model: String,
    system_prompt: String,
}

impl ChatOrchestrator {
    pub fn new(
        client: Arc<dyn ModelClient>,
        launcher: Arc<dyn ToolServerLauncher>,
        config: &Config,
    ) -> Self {
        Self {
            client,
            tool_servers: ToolServerManager::new(launcher),
            model: config.model.clone(),
            system_prompt: config.system_prompt.clone(),
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub async fn chat(&self, user_text: &str, prior_history: &[Message]) -> Result<String, ChatError> {
        self.chat_with_token(user_text, prior_history, CancellationToken::new())
            .await
    }

    /// Like [`chat`](Self::chat), aborting with [`ChatError::Cancelled`]
    /// once `token` fires. The turn's tool server is released either way.
    pub async fn chat_with_token(
        &self,
        user_text: &str,
        prior_history: &[Message],
        token: CancellationToken,
    ) -> Result<String, ChatError> {
        if token.is_cancelled() {
            return Err(ChatError::Cancelled);
        }
        info!(target: "docent::chat", model = %self.model, history = prior_history.len(), "Starting chat turn");

        let messages = conversation(user_text, prior_history);
        let turn = self.tool_servers.with_tool_server(|tools| {
            let token = token.clone();
            async move { self.run_rounds(&tools, messages, &token).await }
        });

        tokio::select! {
            biased;
            () = token.cancelled() => Err(ChatError::Cancelled),
            result = turn => result,
        }
    }

    async fn run_rounds(
        &self,
        tools: &ToolServerHandle,
        mut messages: Vec<ChatMessage>,
        token: &CancellationToken,
    ) -> Result<String, ChatError> {
        let schemas = tools.tool_schemas().await?;

        for round in 0..=MAX_TOOL_ROUNDS {
            let response = self
                .client
                .complete(self.request(&messages, &schemas), token.clone())
                .await?;

            if !response.has_tool_calls() {
                debug!(target: "docent::chat", rounds = round, "Chat turn complete");
                return Ok(response.text);
            }
            if round == MAX_TOOL_ROUNDS {
                break;
            }
            self.apply_tool_round(tools, &mut messages, response, token)
                .await?;
        }

        Err(ChatError::ToolRoundLimit {
            limit: MAX_TOOL_ROUNDS,
        })
    }

    pub fn chat_stream(&self, user_text: &str) -> ChatStream {
        self.chat_stream_with_token(user_text, &[], CancellationToken::new())
    }

    /// Streaming turn with prior history and cancellation.
    ///
    /// Tool rounds run between streamed model rounds. The tool server lives
    /// inside the stream: it is released when the stream finishes, fails,
    /// or is dropped.
    pub fn chat_stream_with_token(
        &self,
        user_text: &str,
        prior_history: &[Message],
        token: CancellationToken,
    ) -> ChatStream {
        let messages = conversation(user_text, prior_history);
        Box::pin(flatten_text_deltas(self.clone().chunk_stream(messages, token)))
    }

    fn chunk_stream(
        self,
        mut messages: Vec<ChatMessage>,
        token: CancellationToken,
    ) -> impl Stream<Item = Result<StreamChunk, ChatError>> + Send + 'static {
        async_stream::stream! {
            if token.is_cancelled() {
                yield Err(ChatError::Cancelled);
                return;
            }
            info!(target: "docent::chat", model = %self.model, "Starting streamed chat turn");

            let guard = match self.tool_servers.acquire().await {
                Ok(guard) => guard,
                Err(e) => {
                    yield Err(ChatError::from(e));
                    return;
                }
            };
            let tools = guard.handle().clone();

            let failure = 'rounds: {
                let schemas = match tools.tool_schemas().await {
                    Ok(schemas) => schemas,
                    Err(e) => break 'rounds Some(ChatError::from(e)),
                };

                let mut round = 0;
                loop {
                    let upstream = self
                        .client
                        .stream_complete(self.request(&messages, &schemas), token.clone())
                        .await;
                    let mut upstream = match upstream {
                        Ok(upstream) => upstream,
                        Err(e) => break 'rounds Some(ChatError::from(e)),
                    };

                    let mut completed = None;
                    loop {
                        let chunk = tokio::select! {
                            biased;
                            () = token.cancelled() => break 'rounds Some(ChatError::Cancelled),
                            chunk = upstream.next() => chunk,
                        };
                        match chunk {
                            None => break,
                            Some(StreamChunk::MessageComplete(response)) => completed = Some(response),
                            Some(StreamChunk::Error(e)) => {
                                let err = ApiError::from_stream_error(self.client.name(), e);
                                break 'rounds Some(ChatError::from(err));
                            }
                            Some(other) => yield Ok(other),
                        }
                    }

                    let Some(response) = completed else {
                        break 'rounds Some(ChatError::Model(ApiError::StreamError {
                            provider: self.client.name().to_string(),
                            details: "stream ended before the message completed".to_string(),
                        }));
                    };
                    if !response.has_tool_calls() {
                        break 'rounds None;
                    }
                    if round == MAX_TOOL_ROUNDS {
                        break 'rounds Some(ChatError::ToolRoundLimit { limit: MAX_TOOL_ROUNDS });
                    }
                    round += 1;

                    if let Err(e) = self.apply_tool_round(&tools, &mut messages, response, &token).await {
                        break 'rounds Some(e);
                    }
                }
            };

            guard.release().await;
            if let Some(err) = failure {
                yield Err(err);
            }
        }
    }

    fn request(&self, messages: &[ChatMessage], tools: &[ToolSchema]) -> CompletionRequest {
        CompletionRequest {
            model: self.model.clone(),
            system: Some(self.system_prompt.clone()),
            messages: messages.to_vec(),
            tools: tools.to_vec(),
        }
    }

    /// Record the assistant's tool requests and append each tool's output.
    async fn apply_tool_round(
        &self,
        tools: &ToolServerHandle,
        messages: &mut Vec<ChatMessage>,
        response: CompletionResponse,
        token: &CancellationToken,
    ) -> Result<(), ChatError> {
        let calls = response.tool_calls;
        messages.push(ChatMessage::Assistant {
            content: response.text,
            tool_calls: calls.clone(),
        });

        for call in calls {
            let output = tokio::select! {
                biased;
                () = token.cancelled() => return Err(ChatError::Cancelled),
                output = run_tool(tools, &call) => output,
            };
            messages.push(ChatMessage::Tool {
                tool_call_id: call.id,
                content: output,
            });
        }
        Ok(())
    }
}

/// Tool failures go back to the model as text so it can recover.
async fn run_tool(tools: &ToolServerHandle, call: &ToolCall) -> String {
    debug!(target: "docent::chat", tool = %call.name, "Executing tool call");
    match tools.call(call).await {
        Ok(output) => output,
        Err(e) => {
            warn!(target: "docent::chat", tool = %call.name, "Tool call failed: {}", e);
            format!("Error: {e}")
        }
    }
}

fn conversation(user_text: &str, prior_history: &[Message]) -> Vec<ChatMessage> {
    prior_history
        .iter()
        .map(ChatMessage::from)
        .chain(std::iter::once(ChatMessage::user(user_text)))
        .collect()
}
