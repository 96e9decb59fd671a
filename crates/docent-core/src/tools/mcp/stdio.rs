//! Tool servers spoken to over MCP on a child process's stdio.

use async_trait::async_trait;
use rmcp::{
    model::{CallToolRequestParam, Content, RawContent, Tool},
    service::{RoleClient, RunningService, ServiceExt},
    transport::{ConfigureCommandExt, TokioChildProcess},
};
use serde_json::Value;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{ChildStderr, Command};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use super::McpError;
use crate::config::ToolServerConfig;
use crate::tools::{InputSchema, ToolSchema, ToolServer, ToolServerLauncher};

const LIST_TOOLS_TIMEOUT: Duration = Duration::from_secs(10);

/// Spawns one MCP server process per launch from a [`ToolServerConfig`].
#[derive(Debug, Clone)]
pub struct StdioLauncher {
    config: ToolServerConfig,
}

impl StdioLauncher {
    pub fn new(config: ToolServerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ToolServerConfig {
        &self.config
    }
}

#[async_trait]
impl ToolServerLauncher for StdioLauncher {
    fn server_name(&self) -> &str {
        &self.config.server_name
    }

    async fn launch(&self) -> Result<Arc<dyn ToolServer>, McpError> {
        let server = McpToolServer::spawn(&self.config).await?;
        Ok(Arc::new(server))
    }
}

/// A connected MCP server. The child process is killed when the last
/// reference to the transport goes away.
pub struct McpToolServer {
    server_name: String,
    client: Arc<RwLock<Option<RunningService<RoleClient, ()>>>>,
    tools: Vec<ToolSchema>,
}

impl std::fmt::Debug for McpToolServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("McpToolServer")
            .field("server_name", &self.server_name)
            .field("tools", &self.tools.len())
            .finish_non_exhaustive()
    }
}

impl McpToolServer {
    pub async fn spawn(config: &ToolServerConfig) -> Result<Self, McpError> {
        let server_name = config.server_name.clone();
        info!(
            target: "docent::mcp",
            "Starting tool server '{}': {}",
            server_name,
            config.command_line()
        );

        let command = Command::new(&config.command).configure(|cmd| {
            cmd.args(&config.args).kill_on_drop(true);
        });

        let (transport, stderr) = TokioChildProcess::builder(command)
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| McpError::SpawnFailed {
                server_name: server_name.clone(),
                message: if e.kind() == std::io::ErrorKind::NotFound {
                    format!("'{}' was not found on PATH", config.command)
                } else {
                    e.to_string()
                },
            })?;

        if let Some(stderr) = stderr {
            forward_stderr(server_name.clone(), stderr);
        }

        let client = ().serve(transport).await.map_err(|e| McpError::ConnectionFailed {
            server_name: server_name.clone(),
            message: e.to_string(),
        })?;

        debug!(target: "docent::mcp", "Connected to server: {:?}", client.peer_info());

        let listed = tokio::time::timeout(LIST_TOOLS_TIMEOUT, client.list_tools(Option::default()))
            .await
            .map_err(|_| McpError::ListToolsTimeout {
                server_name: server_name.clone(),
            })?
            .map_err(|e| McpError::ListToolsFailed {
                server_name: server_name.clone(),
                message: e.to_string(),
            })?;

        let tools: Vec<ToolSchema> = listed
            .tools
            .iter()
            .map(|tool| to_schema(&server_name, tool))
            .collect();

        info!(
            target: "docent::mcp",
            "Discovered {} tools from '{}': {}",
            tools.len(),
            server_name,
            tools.iter().map(|t| t.name.as_str()).collect::<Vec<_>>().join(", ")
        );

        Ok(Self {
            server_name,
            client: Arc::new(RwLock::new(Some(client))),
            tools,
        })
    }
}

fn forward_stderr(server_name: String, stderr: ChildStderr) {
    tokio::spawn(async move {
        let mut lines = BufReader::new(stderr).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            debug!(target: "mcp_server", "[{}] {}", server_name, line.trim());
        }
    });
}

fn to_schema(server_name: &str, tool: &Tool) -> ToolSchema {
    let description = match &tool.description {
        Some(desc) if !desc.is_empty() => desc.to_string(),
        _ => format!("Tool '{}' from MCP server '{}'", tool.name, server_name),
    };

    ToolSchema {
        name: tool.name.to_string(),
        description,
        input_schema: InputSchema::from_json_schema(&tool.input_schema),
    }
}

#[async_trait]
impl ToolServer for McpToolServer {
    fn name(&self) -> &str {
        &self.server_name
    }

    async fn list_tools(&self) -> Result<Vec<ToolSchema>, McpError> {
        Ok(self.tools.clone())
    }

    async fn call_tool(&self, tool: &str, arguments: Value) -> Result<String, McpError> {
        let arguments = match arguments {
            Value::Object(map) => Some(map),
            Value::Null => None,
            other => {
                return Err(McpError::InvalidArguments {
                    tool: tool.to_string(),
                    message: format!("expected an object, got {other}"),
                });
            }
        };

        let guard = self.client.read().await;
        let service = guard.as_ref().ok_or_else(|| McpError::NotRunning {
            server_name: self.server_name.clone(),
        })?;

        debug!(target: "docent::mcp", "Calling '{}' on '{}'", tool, self.server_name);

        let result = service
            .call_tool(CallToolRequestParam {
                name: tool.to_string().into(),
                arguments,
            })
            .await
            .map_err(|e| McpError::CallToolFailed {
                tool: tool.to_string(),
                message: e.to_string(),
            })?;

        let output = render_content(result.content.as_deref());

        if result.is_error == Some(true) {
            return Err(McpError::CallToolFailed {
                tool: tool.to_string(),
                message: output,
            });
        }
        Ok(output)
    }

    async fn shutdown(&self) {
        let Some(service) = self.client.write().await.take() else {
            return;
        };
        match service.cancel().await {
            Ok(reason) => {
                debug!(target: "docent::mcp", "Tool server '{}' stopped: {:?}", self.server_name, reason);
            }
            Err(e) => {
                warn!(target: "docent::mcp", "Tool server '{}' did not stop cleanly: {}", self.server_name, e);
            }
        }
    }
}

/// Join the text parts of a tool result. A result without content renders
/// as an empty string.
fn render_content(content: Option<&[Content]>) -> String {
    content
        .unwrap_or_default()
        .iter()
        .map(|content| match &content.raw {
            RawContent::Text(text) => text.text.clone(),
            _ => "[Non-text content]".to_string(),
        })
        .collect::<Vec<_>>()
        .join("\n")
}

impl Drop for McpToolServer {
    fn drop(&mut self) {
        let client = Arc::clone(&self.client);
        if let Ok(runtime) = tokio::runtime::Handle::try_current() {
            runtime.spawn(async move {
                if let Some(service) = client.write().await.take() {
                    let _ = service.cancel().await;
                }
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_command_is_a_spawn_failure() {
        let config = ToolServerConfig {
            server_name: "ghost".to_string(),
            command: "docent-no-such-binary-for-tests".to_string(),
            args: vec![],
        };

        let Err(err) = StdioLauncher::new(config).launch().await else {
            panic!("launching a missing command should fail");
        };

        match err {
            McpError::SpawnFailed {
                server_name,
                message,
            } => {
                assert_eq!(server_name, "ghost");
                assert!(message.contains("not found"));
            }
            other => panic!("expected SpawnFailed, got {other:?}"),
        }
    }

    #[test]
    fn tool_result_without_content_renders_empty() {
        assert_eq!(render_content(None), "");
        assert_eq!(render_content(Some(&[])), "");
    }

    #[test]
    fn tool_result_text_parts_are_joined() {
        let content = vec![Content::text("first"), Content::text("second")];
        assert_eq!(render_content(Some(&content)), "first\nsecond");
    }

    #[test]
    fn schema_falls_back_to_a_generated_description() {
        let input: serde_json::Map<String, Value> = serde_json::from_value(serde_json::json!({
            "type": "object",
            "properties": {"topic": {"type": "string"}},
        }))
        .unwrap();
        let tool = Tool::new("get-library-docs", "", Arc::new(input));

        let schema = to_schema("context7", &tool);

        assert_eq!(schema.name, "get-library-docs");
        assert_eq!(
            schema.description,
            "Tool 'get-library-docs' from MCP server 'context7'"
        );
        assert!(schema.input_schema.properties.contains_key("topic"));
    }
}
