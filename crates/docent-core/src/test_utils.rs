//! Test utilities for docent-core
//!
//! In-memory doubles for the model client and the tool server, shared by
//! unit tests and the integration tests under `tests/`. Nothing here talks
//! to the network or spawns processes.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio_util::sync::CancellationToken;

use crate::api::{
    ApiError, CompletionRequest, CompletionResponse, CompletionStream, ModelClient, StreamChunk,
};
use crate::tools::{InputSchema, McpError, ToolSchema, ToolServer, ToolServerLauncher};

const SCRIPTED_PROVIDER: &str = "scripted";

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Model client that replays queued responses and records every request.
///
/// `complete` and `stream_complete` draw from separate queues. An empty
/// queue yields `ApiError::NoChoices`.
#[derive(Default)]
pub struct ScriptedModelClient {
    responses: Mutex<VecDeque<Result<CompletionResponse, ApiError>>>,
    streams: Mutex<VecDeque<Vec<StreamChunk>>>,
    requests: Mutex<Vec<CompletionRequest>>,
    hang: bool,
}

impl ScriptedModelClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_response(self, response: CompletionResponse) -> Self {
        lock(&self.responses).push_back(Ok(response));
        self
    }

    pub fn with_text(self, text: &str) -> Self {
        self.with_response(CompletionResponse::text(text))
    }

    pub fn with_error(self, error: ApiError) -> Self {
        lock(&self.responses).push_back(Err(error));
        self
    }

    /// Queue a raw chunk sequence for one `stream_complete` call.
    pub fn with_stream(self, chunks: Vec<StreamChunk>) -> Self {
        lock(&self.streams).push_back(chunks);
        self
    }

    /// Queue one text delta per fragment followed by the completed message.
    pub fn with_text_stream(self, fragments: &[&str]) -> Self {
        let mut chunks: Vec<StreamChunk> = fragments
            .iter()
            .map(|f| StreamChunk::TextDelta((*f).to_string()))
            .collect();
        chunks.push(StreamChunk::MessageComplete(CompletionResponse::text(
            fragments.concat(),
        )));
        self.with_stream(chunks)
    }

    /// Make every call wait until its token is cancelled.
    pub fn hanging(mut self) -> Self {
        self.hang = true;
        self
    }

    pub fn requests(&self) -> Vec<CompletionRequest> {
        lock(&self.requests).clone()
    }

    fn exhausted() -> ApiError {
        ApiError::NoChoices {
            provider: SCRIPTED_PROVIDER.to_string(),
        }
    }
}

#[async_trait]
impl ModelClient for ScriptedModelClient {
    fn name(&self) -> &'static str {
        SCRIPTED_PROVIDER
    }

    async fn complete(
        &self,
        request: CompletionRequest,
        token: CancellationToken,
    ) -> Result<CompletionResponse, ApiError> {
        lock(&self.requests).push(request);
        if self.hang {
            token.cancelled().await;
            return Err(ApiError::Cancelled {
                provider: SCRIPTED_PROVIDER.to_string(),
            });
        }
        lock(&self.responses)
            .pop_front()
            .unwrap_or_else(|| Err(Self::exhausted()))
    }

    async fn stream_complete(
        &self,
        request: CompletionRequest,
        token: CancellationToken,
    ) -> Result<CompletionStream, ApiError> {
        lock(&self.requests).push(request);
        if self.hang {
            token.cancelled().await;
            return Err(ApiError::Cancelled {
                provider: SCRIPTED_PROVIDER.to_string(),
            });
        }
        let chunks = lock(&self.streams)
            .pop_front()
            .ok_or_else(Self::exhausted)?;
        Ok(Box::pin(futures::stream::iter(chunks)))
    }
}

#[derive(Default)]
struct FakeState {
    launches: AtomicUsize,
    shutdowns: AtomicUsize,
    calls: Mutex<Vec<(String, Value)>>,
}

/// Launcher for in-memory tool servers that count their own lifecycle.
///
/// Clones share counters, so a test can hand a clone to the code under
/// test and inspect the original.
#[derive(Clone)]
pub struct FakeLauncher {
    server_name: String,
    tools: Vec<ToolSchema>,
    outputs: HashMap<String, Result<String, String>>,
    failure: Option<McpError>,
    state: Arc<FakeState>,
}

impl FakeLauncher {
    pub fn new(server_name: &str) -> Self {
        Self {
            server_name: server_name.to_string(),
            tools: Vec::new(),
            outputs: HashMap::new(),
            failure: None,
            state: Arc::new(FakeState::default()),
        }
    }

    pub fn with_tool(mut self, name: &str, description: &str) -> Self {
        self.tools.push(ToolSchema {
            name: name.to_string(),
            description: description.to_string(),
            input_schema: InputSchema::default(),
        });
        self
    }

    pub fn with_output(mut self, tool: &str, output: &str) -> Self {
        self.outputs.insert(tool.to_string(), Ok(output.to_string()));
        self
    }

    pub fn with_tool_error(mut self, tool: &str, message: &str) -> Self {
        self.outputs.insert(tool.to_string(), Err(message.to_string()));
        self
    }

    /// Every launch fails with `error`.
    pub fn failing(mut self, error: McpError) -> Self {
        self.failure = Some(error);
        self
    }

    pub fn launches(&self) -> usize {
        self.state.launches.load(Ordering::SeqCst)
    }

    /// Servers shut down so far, each counted once.
    pub fn shutdowns(&self) -> usize {
        self.state.shutdowns.load(Ordering::SeqCst)
    }

    /// `(tool, arguments)` for every call, with the namespace stripped.
    pub fn calls(&self) -> Vec<(String, Value)> {
        lock(&self.state.calls).clone()
    }
}

#[async_trait]
impl ToolServerLauncher for FakeLauncher {
    fn server_name(&self) -> &str {
        &self.server_name
    }

    async fn launch(&self) -> Result<Arc<dyn ToolServer>, McpError> {
        if let Some(error) = &self.failure {
            return Err(error.clone());
        }
        self.state.launches.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(FakeToolServer {
            launcher: self.clone(),
            stopped: AtomicBool::new(false),
        }))
    }
}

struct FakeToolServer {
    launcher: FakeLauncher,
    stopped: AtomicBool,
}

#[async_trait]
impl ToolServer for FakeToolServer {
    fn name(&self) -> &str {
        &self.launcher.server_name
    }

    async fn list_tools(&self) -> Result<Vec<ToolSchema>, McpError> {
        Ok(self.launcher.tools.clone())
    }

    async fn call_tool(&self, tool: &str, arguments: Value) -> Result<String, McpError> {
        if self.stopped.load(Ordering::SeqCst) {
            return Err(McpError::NotRunning {
                server_name: self.launcher.server_name.clone(),
            });
        }
        lock(&self.launcher.state.calls).push((tool.to_string(), arguments));
        match self.launcher.outputs.get(tool) {
            Some(Ok(output)) => Ok(output.clone()),
            Some(Err(message)) => Err(McpError::CallToolFailed {
                tool: tool.to_string(),
                message: message.clone(),
            }),
            None => Ok(String::new()),
        }
    }

    async fn shutdown(&self) {
        if !self.stopped.swap(true, Ordering::SeqCst) {
            self.launcher.state.shutdowns.fetch_add(1, Ordering::SeqCst);
        }
    }
}
