//! Retrieval tool servers and their per-call lifecycle.

pub mod guard;
pub mod mcp;

pub use guard::{ToolServerGuard, ToolServerHandle, ToolServerManager};
pub use mcp::{McpError, McpToolServer, StdioLauncher};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use std::sync::Arc;

/// JSON-schema object describing a tool's arguments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputSchema {
    #[serde(default)]
    pub properties: Map<String, Value>,
    #[serde(default)]
    pub required: Vec<String>,
    #[serde(rename = "type", default = "object_type")]
    pub schema_type: String,
}

fn object_type() -> String {
    "object".to_string()
}

impl Default for InputSchema {
    fn default() -> Self {
        Self {
            properties: Map::new(),
            required: Vec::new(),
            schema_type: object_type(),
        }
    }
}

impl InputSchema {
    /// Pull `properties` and `required` out of a raw JSON-schema object.
    pub fn from_json_schema(schema: &Map<String, Value>) -> Self {
        let required = schema
            .get("required")
            .and_then(Value::as_array)
            .map(|entries| {
                entries
                    .iter()
                    .filter_map(|v| v.as_str().map(String::from))
                    .collect()
            })
            .unwrap_or_default();

        Self {
            properties: schema
                .get("properties")
                .and_then(Value::as_object)
                .cloned()
                .unwrap_or_default(),
            required,
            schema_type: object_type(),
        }
    }

    pub fn to_json(&self) -> Value {
        json!({
            "type": self.schema_type,
            "properties": self.properties,
            "required": self.required,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    pub input_schema: InputSchema,
}

/// A tool invocation requested by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub parameters: Value,
}

/// A running retrieval tool server.
///
/// Tool names here are the server's own names; namespacing for the model
/// happens in [`ToolServerHandle`].
#[async_trait]
pub trait ToolServer: Send + Sync {
    fn name(&self) -> &str;

    async fn list_tools(&self) -> Result<Vec<ToolSchema>, McpError>;

    async fn call_tool(&self, tool: &str, arguments: Value) -> Result<String, McpError>;

    /// Stop the server. Safe to call more than once.
    async fn shutdown(&self);
}

/// Starts a fresh tool server. Each call yields an independent instance.
#[async_trait]
pub trait ToolServerLauncher: Send + Sync {
    fn server_name(&self) -> &str;

    async fn launch(&self) -> Result<Arc<dyn ToolServer>, McpError>;
}

const MCP_PREFIX: &str = "mcp__";

/// `mcp__<server>__<tool>`
pub fn namespaced_tool_name(server: &str, tool: &str) -> String {
    format!("{MCP_PREFIX}{server}__{tool}")
}

/// Strip the `mcp__<server>__` prefix if present.
pub fn strip_namespace<'a>(server: &str, name: &'a str) -> &'a str {
    name.strip_prefix(MCP_PREFIX)
        .and_then(|rest| rest.strip_prefix(server))
        .and_then(|rest| rest.strip_prefix("__"))
        .unwrap_or(name)
}
