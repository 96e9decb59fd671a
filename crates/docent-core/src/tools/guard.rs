//! Scoped acquisition of tool servers.
//!
//! Every chat call gets its own server instance. The [`ToolServerGuard`]
//! shuts it down on `release()`, and an unreleased guard schedules the
//! shutdown when dropped, which covers early returns, errors, cancelled
//! futures and abandoned streams.

use std::sync::Arc;
use tracing::debug;

use super::{
    McpError, ToolCall, ToolSchema, ToolServer, ToolServerLauncher, namespaced_tool_name,
    strip_namespace,
};

/// Shared view of the server owned by a guard.
#[derive(Clone)]
pub struct ToolServerHandle {
    server: Arc<dyn ToolServer>,
}

impl std::fmt::Debug for ToolServerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolServerHandle")
            .field("server", &self.server.name())
            .finish()
    }
}

impl ToolServerHandle {
    pub fn server_name(&self) -> &str {
        self.server.name()
    }

    /// Tool schemas with model-facing `mcp__<server>__<tool>` names.
    pub async fn tool_schemas(&self) -> Result<Vec<ToolSchema>, McpError> {
        let server_name = self.server.name();
        Ok(self
            .server
            .list_tools()
            .await?
            .into_iter()
            .map(|schema| ToolSchema {
                name: namespaced_tool_name(server_name, &schema.name),
                ..schema
            })
            .collect())
    }

    pub async fn call(&self, call: &ToolCall) -> Result<String, McpError> {
        let tool = strip_namespace(self.server.name(), &call.name);
        self.server.call_tool(tool, call.parameters.clone()).await
    }
}

#[must_use = "dropping the guard immediately shuts the tool server down"]
pub struct ToolServerGuard {
    handle: ToolServerHandle,
    released: bool,
}

impl ToolServerGuard {
    pub fn new(server: Arc<dyn ToolServer>) -> Self {
        Self {
            handle: ToolServerHandle { server },
            released: false,
        }
    }

    pub fn handle(&self) -> &ToolServerHandle {
        &self.handle
    }

    /// Shut the server down and wait for it to stop.
    pub async fn release(mut self) {
        self.released = true;
        debug!(target: "docent::mcp", "Releasing tool server '{}'", self.handle.server_name());
        self.handle.server.shutdown().await;
    }
}

impl Drop for ToolServerGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        let server = Arc::clone(&self.handle.server);
        debug!(
            target: "docent::mcp",
            "Tool server '{}' dropped without release; scheduling shutdown",
            server.name()
        );
        if let Ok(runtime) = tokio::runtime::Handle::try_current() {
            runtime.spawn(async move { server.shutdown().await });
        }
    }
}

/// Hands out a fresh tool server per call. Instances are never pooled.
#[derive(Clone)]
pub struct ToolServerManager {
    launcher: Arc<dyn ToolServerLauncher>,
}

impl ToolServerManager {
    pub fn new(launcher: Arc<dyn ToolServerLauncher>) -> Self {
        Self { launcher }
    }

    pub fn server_name(&self) -> &str {
        self.launcher.server_name()
    }

    pub async fn acquire(&self) -> Result<ToolServerGuard, McpError> {
        let server = self.launcher.launch().await?;
        debug!(target: "docent::mcp", "Acquired tool server '{}'", server.name());
        Ok(ToolServerGuard::new(server))
    }

    /// Run `f` against a fresh server and release it afterwards, whether
    /// `f` succeeds or fails.
    pub async fn with_tool_server<F, Fut, T, E>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce(ToolServerHandle) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<McpError>,
    {
        let guard = self.acquire().await?;
        let result = f(guard.handle().clone()).await;
        guard.release().await;
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::FakeLauncher;
    use serde_json::json;

    fn manager(launcher: &FakeLauncher) -> ToolServerManager {
        ToolServerManager::new(Arc::new(launcher.clone()))
    }

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn released_on_success() {
        let launcher = FakeLauncher::new("context7");
        let result: Result<u32, McpError> = manager(&launcher)
            .with_tool_server(|_| async { Ok(7) })
            .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(launcher.launches(), 1);
        assert_eq!(launcher.shutdowns(), 1);
    }

    #[tokio::test]
    async fn released_on_failure() {
        let launcher = FakeLauncher::new("context7");
        let result: Result<(), McpError> = manager(&launcher)
            .with_tool_server(|_| async {
                Err(McpError::CallToolFailed {
                    tool: "x".to_string(),
                    message: "boom".to_string(),
                })
            })
            .await;

        assert!(result.is_err());
        assert_eq!(launcher.shutdowns(), 1);
    }

    #[tokio::test]
    async fn each_call_gets_its_own_server() {
        let launcher = FakeLauncher::new("context7");
        let manager = manager(&launcher);
        for _ in 0..3 {
            let _: Result<(), McpError> = manager.with_tool_server(|_| async { Ok(()) }).await;
        }
        assert_eq!(launcher.launches(), 3);
        assert_eq!(launcher.shutdowns(), 3);
    }

    #[tokio::test]
    async fn launch_failure_is_propagated_without_shutdown() {
        let launcher = FakeLauncher::new("context7").failing(McpError::SpawnFailed {
            server_name: "context7".to_string(),
            message: "'npx' was not found on PATH".to_string(),
        });

        let result: Result<(), McpError> = manager(&launcher)
            .with_tool_server(|_| async { Ok(()) })
            .await;

        assert!(matches!(result, Err(McpError::SpawnFailed { .. })));
        assert_eq!(launcher.shutdowns(), 0);
    }

    #[tokio::test]
    async fn dropped_guard_schedules_shutdown() {
        let launcher = FakeLauncher::new("context7");
        let guard = manager(&launcher).acquire().await.unwrap();
        drop(guard);
        settle().await;
        assert_eq!(launcher.shutdowns(), 1);
    }

    #[tokio::test]
    async fn cancelled_call_still_releases() {
        let launcher = FakeLauncher::new("context7");
        let manager = manager(&launcher);
        let pending = manager.with_tool_server(|_| async {
            std::future::pending::<()>().await;
            Ok::<_, McpError>(())
        });

        let timed_out = tokio::time::timeout(std::time::Duration::from_millis(20), pending).await;
        assert!(timed_out.is_err());
        settle().await;

        assert_eq!(launcher.launches(), 1);
        assert_eq!(launcher.shutdowns(), 1);
    }

    #[tokio::test]
    async fn handle_namespaces_schemas_and_strips_calls() {
        let launcher = FakeLauncher::new("context7")
            .with_tool("get-library-docs", "Fetch docs")
            .with_output("get-library-docs", "docs body");
        let guard = manager(&launcher).acquire().await.unwrap();
        let handle = guard.handle().clone();

        let schemas = handle.tool_schemas().await.unwrap();
        assert_eq!(schemas[0].name, "mcp__context7__get-library-docs");

        let output = handle
            .call(&ToolCall {
                id: "call_1".to_string(),
                name: "mcp__context7__get-library-docs".to_string(),
                parameters: json!({"context7CompatibleLibraryID": "/tokio-rs/tokio"}),
            })
            .await
            .unwrap();
        assert_eq!(output, "docs body");
        assert_eq!(launcher.calls()[0].0, "get-library-docs");

        guard.release().await;
        assert_eq!(launcher.shutdowns(), 1);
    }
}
