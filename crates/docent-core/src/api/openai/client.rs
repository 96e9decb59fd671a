use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header;
use std::collections::{BTreeMap, HashSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use super::PROVIDER_NAME;
use super::types::{
    OpenAIFunction, OpenAIFunctionCall, OpenAIMessage, OpenAIRequest, OpenAIResponse,
    OpenAIStreamChunk, OpenAITool, OpenAIToolCall,
};
use crate::api::error::{ApiError, StreamError};
use crate::api::provider::{
    ChatMessage, CompletionRequest, CompletionResponse, CompletionStream, ModelClient,
    StreamChunk,
};
use crate::api::sse::{SseEvent, parse_sse_stream};
use crate::api::util::chat_completions_url;
use crate::config::Config;
use crate::tools::ToolCall;

/// Client for any OpenAI-compatible chat completions endpoint.
///
/// No request timeout is set; slow tool-augmented answers are normal and
/// callers cancel through the token instead.
#[derive(Clone)]
pub struct OpenAIClient {
    http_client: reqwest::Client,
    endpoint: String,
}

impl std::fmt::Debug for OpenAIClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAIClient")
            .field("endpoint", &self.endpoint)
            .finish_non_exhaustive()
    }
}

impl OpenAIClient {
    pub fn new(api_key: &str, base_url: &str) -> Result<Self, ApiError> {
        let mut auth = header::HeaderValue::from_str(&format!("Bearer {api_key}"))
            .map_err(|e| ApiError::Configuration(format!("Invalid API key format: {e}")))?;
        auth.set_sensitive(true);

        let mut headers = header::HeaderMap::new();
        headers.insert(header::AUTHORIZATION, auth);

        let http_client = reqwest::Client::builder()
            .default_headers(headers)
            .build()
            .map_err(|e| ApiError::Configuration(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            http_client,
            endpoint: chat_completions_url(base_url),
        })
    }

    pub fn from_config(config: &Config) -> Result<Self, ApiError> {
        Self::new(&config.api_key, &config.base_url)
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn build_request(request: CompletionRequest, stream: bool) -> OpenAIRequest {
        let mut messages = Vec::with_capacity(request.messages.len() + 1);
        if let Some(system) = request.system.filter(|s| !s.is_empty()) {
            messages.push(OpenAIMessage::System { content: system });
        }
        messages.extend(request.messages.into_iter().map(convert_message));

        let tools = if request.tools.is_empty() {
            None
        } else {
            Some(
                request
                    .tools
                    .into_iter()
                    .map(|tool| OpenAITool {
                        tool_type: "function".to_string(),
                        function: OpenAIFunction {
                            parameters: tool.input_schema.to_json(),
                            name: tool.name,
                            description: tool.description,
                        },
                    })
                    .collect(),
            )
        };

        OpenAIRequest {
            model: request.model,
            messages,
            tools,
            stream,
        }
    }

    async fn send(
        &self,
        body: &OpenAIRequest,
        token: &CancellationToken,
    ) -> Result<reqwest::Response, ApiError> {
        debug!(
            target: "docent::openai",
            model = %body.model,
            messages = body.messages.len(),
            stream = body.stream,
            "Sending chat completion request"
        );

        let response = tokio::select! {
            biased;
            () = token.cancelled() => {
                return Err(ApiError::Cancelled { provider: PROVIDER_NAME.to_string() });
            }
            response = self.http_client.post(&self.endpoint).json(body).send() => response?,
        };

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            debug!(target: "docent::openai", "API error status={} body={}", status, body);
            return Err(ApiError::from_status(PROVIDER_NAME, status.as_u16(), body));
        }
        Ok(response)
    }

    fn convert_response(parsed: OpenAIResponse) -> Result<CompletionResponse, ApiError> {
        let Some(choice) = parsed.choices.into_iter().next() else {
            return Err(ApiError::NoChoices {
                provider: PROVIDER_NAME.to_string(),
            });
        };

        let tool_calls = choice
            .message
            .tool_calls
            .unwrap_or_default()
            .into_iter()
            .map(|tc| ToolCall {
                parameters: parse_arguments(&tc.function.arguments),
                id: tc.id,
                name: tc.function.name,
            })
            .collect();

        Ok(CompletionResponse {
            text: choice.message.content.unwrap_or_default(),
            tool_calls,
        })
    }

    fn convert_openai_stream(
        mut sse_stream: impl futures::Stream<Item = Result<SseEvent, StreamError>>
        + Unpin
        + Send
        + 'static,
        token: CancellationToken,
    ) -> impl futures::Stream<Item = StreamChunk> + Send + 'static {
        #[derive(Default)]
        struct ToolCallAccumulator {
            id: String,
            name: String,
            args: String,
        }

        async_stream::stream! {
            let mut text = String::new();
            let mut tool_calls: BTreeMap<usize, ToolCallAccumulator> = BTreeMap::new();
            let mut started: HashSet<usize> = HashSet::new();

            loop {
                let event = tokio::select! {
                    biased;
                    () = token.cancelled() => {
                        yield StreamChunk::Error(StreamError::Cancelled);
                        return;
                    }
                    event = sse_stream.next() => event,
                };

                let event = match event {
                    None => break,
                    Some(Ok(event)) => event,
                    Some(Err(e)) => {
                        yield StreamChunk::Error(e);
                        return;
                    }
                };

                if event.data == "[DONE]" {
                    break;
                }

                let chunk: OpenAIStreamChunk = match serde_json::from_str(&event.data) {
                    Ok(chunk) => chunk,
                    Err(e) => {
                        debug!(target: "docent::openai", "Failed to parse chunk: {} data: {}", e, event.data);
                        continue;
                    }
                };

                if let Some(err) = chunk.error {
                    yield StreamChunk::Error(StreamError::Provider {
                        provider: PROVIDER_NAME.to_string(),
                        message: err.message,
                    });
                    return;
                }

                let Some(choice) = chunk.choices.into_iter().next() else {
                    continue;
                };

                if let Some(delta) = choice.delta.content.filter(|d| !d.is_empty()) {
                    text.push_str(&delta);
                    yield StreamChunk::TextDelta(delta);
                }

                for tc in choice.delta.tool_calls.unwrap_or_default() {
                    let entry = tool_calls.entry(tc.index).or_default();
                    if let Some(id) = tc.id.filter(|id| !id.is_empty()) {
                        entry.id = id;
                    }
                    if let Some(function) = tc.function {
                        if let Some(name) = function.name.filter(|n| !n.is_empty()) {
                            entry.name = name;
                        }
                        if let Some(args) = function.arguments {
                            entry.args.push_str(&args);
                        }
                    }

                    if !entry.id.is_empty() && !entry.name.is_empty() && started.insert(tc.index) {
                        yield StreamChunk::ToolCallStart {
                            id: entry.id.clone(),
                            name: entry.name.clone(),
                        };
                    }
                }
            }

            let tool_calls = tool_calls
                .into_values()
                .filter(|tc| {
                    let complete = !tc.id.is_empty() && !tc.name.is_empty();
                    if !complete {
                        debug!(
                            target: "docent::openai",
                            "Skipping tool call with missing id/name: id='{}' name='{}'",
                            tc.id,
                            tc.name
                        );
                    }
                    complete
                })
                .map(|tc| ToolCall {
                    parameters: parse_arguments(&tc.args),
                    id: tc.id,
                    name: tc.name,
                })
                .collect();

            yield StreamChunk::MessageComplete(CompletionResponse { text, tool_calls });
        }
    }
}

fn convert_message(message: ChatMessage) -> OpenAIMessage {
    match message {
        ChatMessage::System { content } => OpenAIMessage::System { content },
        ChatMessage::User { content } => OpenAIMessage::User { content },
        ChatMessage::Assistant {
            content,
            tool_calls,
        } => OpenAIMessage::Assistant {
            content: Some(content).filter(|c| !c.is_empty()),
            tool_calls: if tool_calls.is_empty() {
                None
            } else {
                Some(
                    tool_calls
                        .into_iter()
                        .map(|tc| OpenAIToolCall {
                            id: tc.id,
                            tool_type: "function".to_string(),
                            function: OpenAIFunctionCall {
                                name: tc.name,
                                arguments: tc.parameters.to_string(),
                            },
                        })
                        .collect(),
                )
            },
        },
        ChatMessage::Tool {
            tool_call_id,
            content,
        } => OpenAIMessage::Tool {
            content,
            tool_call_id,
        },
    }
}

/// Arguments arrive as a JSON string; anything unparsable becomes `{}`.
fn parse_arguments(raw: &str) -> serde_json::Value {
    if raw.trim().is_empty() {
        return serde_json::Value::Object(serde_json::Map::new());
    }
    serde_json::from_str(raw).unwrap_or_else(|e| {
        debug!(target: "docent::openai", "Unparsable tool arguments ({}): {}", e, raw);
        serde_json::Value::Object(serde_json::Map::new())
    })
}

#[async_trait]
impl ModelClient for OpenAIClient {
    fn name(&self) -> &'static str {
        PROVIDER_NAME
    }

    async fn complete(
        &self,
        request: CompletionRequest,
        token: CancellationToken,
    ) -> Result<CompletionResponse, ApiError> {
        let body = Self::build_request(request, false);
        let response = self.send(&body, &token).await?;

        let body_text = tokio::select! {
            biased;
            () = token.cancelled() => {
                return Err(ApiError::Cancelled { provider: PROVIDER_NAME.to_string() });
            }
            text = response.text() => text?,
        };

        let parsed: OpenAIResponse = serde_json::from_str(&body_text).map_err(|e| {
            error!(
                target: "docent::openai",
                "Failed to parse chat completion response: {} body={}", e, body_text
            );
            ApiError::ResponseParsingError {
                provider: PROVIDER_NAME.to_string(),
                details: e.to_string(),
            }
        })?;

        Self::convert_response(parsed)
    }

    async fn stream_complete(
        &self,
        request: CompletionRequest,
        token: CancellationToken,
    ) -> Result<CompletionStream, ApiError> {
        let body = Self::build_request(request, true);
        let response = self.send(&body, &token).await?;
        let sse_stream = parse_sse_stream(response.bytes_stream());
        Ok(Box::pin(Self::convert_openai_stream(sse_stream, token)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::{InputSchema, ToolSchema};
    use futures::stream;
    use serde_json::json;
    use std::pin::pin;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    fn event(data: &str) -> Result<SseEvent, StreamError> {
        Ok(SseEvent {
            event_type: "message".to_string(),
            data: data.to_string(),
        })
    }

    fn text_chunk(text: &str) -> String {
        json!({"choices": [{"index": 0, "delta": {"content": text}}]}).to_string()
    }

    /// Serve exactly one HTTP response on a local port and return its base URL.
    async fn serve_once(status: &'static str, body: String) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 4096];
            loop {
                let n = socket.read(&mut buf).await.unwrap();
                request.extend_from_slice(&buf[..n]);
                if n == 0 || request_complete(&request) {
                    break;
                }
            }
            let response = format!(
                "HTTP/1.1 {status}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                body.len()
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.ok();
        });
        format!("http://{addr}/v1")
    }

    fn request_complete(request: &[u8]) -> bool {
        let text = String::from_utf8_lossy(request);
        let Some(header_end) = text.find("\r\n\r\n") else {
            return false;
        };
        let content_length = text[..header_end]
            .lines()
            .find_map(|line| {
                let (name, value) = line.split_once(':')?;
                name.eq_ignore_ascii_case("content-length")
                    .then(|| value.trim().parse::<usize>().ok())
                    .flatten()
            })
            .unwrap_or(0);
        request.len() >= header_end + 4 + content_length
    }

    fn request_with(messages: Vec<ChatMessage>) -> CompletionRequest {
        CompletionRequest {
            model: "gpt-4o-mini".to_string(),
            system: Some("Be helpful.".to_string()),
            messages,
            tools: Vec::new(),
        }
    }

    #[test]
    fn request_puts_system_first_and_encodes_tool_calls() {
        let mut request = request_with(vec![
            ChatMessage::user("How do I use tokio?"),
            ChatMessage::Assistant {
                content: String::new(),
                tool_calls: vec![ToolCall {
                    id: "call_1".to_string(),
                    name: "mcp__context7__resolve-library-id".to_string(),
                    parameters: json!({"libraryName": "tokio"}),
                }],
            },
            ChatMessage::Tool {
                tool_call_id: "call_1".to_string(),
                content: "/tokio-rs/tokio".to_string(),
            },
        ]);
        request.tools.push(ToolSchema {
            name: "mcp__context7__resolve-library-id".to_string(),
            description: "Resolve a library".to_string(),
            input_schema: InputSchema::default(),
        });

        let body = serde_json::to_value(OpenAIClient::build_request(request, true)).unwrap();

        assert_eq!(body["stream"], json!(true));
        assert_eq!(body["messages"][0], json!({"role": "system", "content": "Be helpful."}));
        assert_eq!(body["messages"][1]["role"], json!("user"));
        let assistant = &body["messages"][2];
        assert!(assistant.get("content").is_none());
        assert_eq!(
            assistant["tool_calls"][0]["function"]["arguments"],
            json!("{\"libraryName\":\"tokio\"}")
        );
        assert_eq!(body["messages"][3]["tool_call_id"], json!("call_1"));
        assert_eq!(body["tools"][0]["type"], json!("function"));
        assert_eq!(body["tools"][0]["function"]["parameters"]["type"], json!("object"));
    }

    #[test]
    fn request_without_tools_omits_the_field() {
        let body =
            serde_json::to_value(OpenAIClient::build_request(request_with(vec![]), false)).unwrap();
        assert!(body.get("tools").is_none());
    }

    #[test]
    fn response_without_choices_is_an_error() {
        let parsed: OpenAIResponse = serde_json::from_value(json!({"choices": []})).unwrap();
        assert!(matches!(
            OpenAIClient::convert_response(parsed),
            Err(ApiError::NoChoices { .. })
        ));
    }

    #[test]
    fn response_tool_calls_are_decoded() {
        let parsed: OpenAIResponse = serde_json::from_value(json!({
            "choices": [{"message": {
                "role": "assistant",
                "content": null,
                "tool_calls": [{
                    "id": "call_9",
                    "type": "function",
                    "function": {"name": "lookup", "arguments": "{\"q\":\"axum\"}"}
                }]
            }}]
        }))
        .unwrap();

        let response = OpenAIClient::convert_response(parsed).unwrap();
        assert_eq!(response.text, "");
        assert_eq!(response.tool_calls[0].parameters, json!({"q": "axum"}));
    }

    #[tokio::test]
    async fn stream_yields_text_deltas_in_order() {
        let events = vec![
            event(&text_chunk("Hello")),
            event(&text_chunk(" ")),
            event(&text_chunk("world")),
            event("[DONE]"),
        ];

        let chunks: Vec<_> =
            OpenAIClient::convert_openai_stream(stream::iter(events), CancellationToken::new())
                .collect()
                .await;

        assert_eq!(
            chunks,
            vec![
                StreamChunk::TextDelta("Hello".to_string()),
                StreamChunk::TextDelta(" ".to_string()),
                StreamChunk::TextDelta("world".to_string()),
                StreamChunk::MessageComplete(CompletionResponse::text("Hello world")),
            ]
        );
    }

    #[tokio::test]
    async fn stream_accumulates_tool_call_arguments() {
        let events = vec![
            event(r#"{"choices":[{"index":0,"delta":{"tool_calls":[{"index":0,"id":"call_abc","function":{"name":"get_docs","arguments":""}}]}}]}"#),
            event(r#"{"choices":[{"index":0,"delta":{"tool_calls":[{"index":0,"function":{"arguments":"{\"lib"}}]}}]}"#),
            event(r#"{"choices":[{"index":0,"delta":{"tool_calls":[{"index":0,"function":{"arguments":"\":\"serde\"}"}}]}}]}"#),
            event("[DONE]"),
        ];

        let mut stream = pin!(OpenAIClient::convert_openai_stream(
            stream::iter(events),
            CancellationToken::new()
        ));

        assert_eq!(
            stream.next().await.unwrap(),
            StreamChunk::ToolCallStart {
                id: "call_abc".to_string(),
                name: "get_docs".to_string()
            }
        );
        match stream.next().await.unwrap() {
            StreamChunk::MessageComplete(response) => {
                assert_eq!(response.tool_calls.len(), 1);
                assert_eq!(response.tool_calls[0].parameters, json!({"lib": "serde"}));
            }
            other => panic!("expected MessageComplete, got {other:?}"),
        }
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn stream_without_done_marker_still_completes() {
        let events = vec![event(&text_chunk("partial"))];
        let chunks: Vec<_> =
            OpenAIClient::convert_openai_stream(stream::iter(events), CancellationToken::new())
                .collect()
                .await;
        assert_eq!(
            chunks.last(),
            Some(&StreamChunk::MessageComplete(CompletionResponse::text("partial")))
        );
    }

    #[tokio::test]
    async fn stream_error_ends_the_stream() {
        let events = vec![
            event(&text_chunk("a")),
            Err(StreamError::SseParse("bad frame".to_string())),
            event(&text_chunk("b")),
        ];
        let chunks: Vec<_> =
            OpenAIClient::convert_openai_stream(stream::iter(events), CancellationToken::new())
                .collect()
                .await;
        assert_eq!(
            chunks,
            vec![
                StreamChunk::TextDelta("a".to_string()),
                StreamChunk::Error(StreamError::SseParse("bad frame".to_string())),
            ]
        );
    }

    #[tokio::test]
    async fn cancelled_token_stops_the_stream() {
        let token = CancellationToken::new();
        token.cancel();
        let events = vec![event(&text_chunk("Hello"))];

        let chunks: Vec<_> = OpenAIClient::convert_openai_stream(stream::iter(events), token)
            .collect()
            .await;

        assert_eq!(chunks, vec![StreamChunk::Error(StreamError::Cancelled)]);
    }

    #[tokio::test]
    async fn unauthorized_response_is_an_authentication_error() {
        let base_url = serve_once(
            "401 Unauthorized",
            json!({"error": {"message": "Incorrect API key provided"}}).to_string(),
        )
        .await;
        let client = OpenAIClient::new("sk-bad", &base_url).unwrap();

        let err = client
            .complete(request_with(vec![ChatMessage::user("hi")]), CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, ApiError::AuthenticationFailed { .. }));
        assert!(err.to_string().contains("Incorrect API key"));
    }

    #[tokio::test]
    async fn successful_completion_returns_text() {
        let base_url = serve_once(
            "200 OK",
            json!({
                "id": "chatcmpl-1",
                "choices": [{"index": 0, "message": {"role": "assistant", "content": "Hello!"}}]
            })
            .to_string(),
        )
        .await;
        let client = OpenAIClient::new("sk-test", &base_url).unwrap();

        let response = client
            .complete(request_with(vec![ChatMessage::user("hi")]), CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(response, CompletionResponse::text("Hello!"));
    }

    #[test]
    fn endpoint_comes_from_the_base_url() {
        let client = OpenAIClient::new("sk-test", "https://api.openai.com/v1").unwrap();
        assert_eq!(client.endpoint(), "https://api.openai.com/v1/chat/completions");
    }

    #[test]
    fn api_key_with_newline_is_rejected() {
        assert!(matches!(
            OpenAIClient::new("sk-\nbad", "https://api.openai.com/v1"),
            Err(ApiError::Configuration(_))
        ));
    }
}
