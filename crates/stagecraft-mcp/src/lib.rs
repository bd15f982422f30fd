//! MCP (Model Context Protocol) client abstraction. Supports
//! `list_resources(server)`, `fetch_resource(uri)`, `call_tool(server, tool,
//! args)`; error semantics pass through as `StagecraftError::Execution`.
//! Absence disables MCP-backed invokers only; the engine otherwise remains
//! operational.

mod client;
pub mod protocol;

pub use client::StdioMcpServer;
pub use protocol::{McpContent, McpToolDef, McpToolResult, ResourceDef};

use async_trait::async_trait;
use serde_json::Value;
use stagecraft_core::StagecraftResult;
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Dispatch surface consumed by the MCP-backed [`Invoker`]
/// (`stagecraft-invoker`). Kept trait-object friendly so tests can swap in a
/// fake without spawning subprocesses.
#[async_trait]
pub trait McpClient: Send + Sync {
    async fn list_resources(&self, server: &str) -> StagecraftResult<Vec<ResourceDef>>;
    async fn fetch_resource(&self, server: &str, uri: &str) -> StagecraftResult<Value>;
    async fn call_tool(
        &self,
        server: &str,
        tool: &str,
        args: Value,
    ) -> StagecraftResult<McpToolResult>;
}

/// A named pool of MCP server connections, each spawned lazily on first use
/// and cached by server name, generalized to hold several configured
/// servers at once.
pub struct McpServerPool {
    commands: HashMap<String, (String, Vec<String>)>,
    servers: RwLock<HashMap<String, StdioMcpServer>>,
}

impl McpServerPool {
    /// `commands` maps a logical server name (as referenced by
    /// `skill.metadata.mcp.server`) to the subprocess command+args used to
    /// launch it.
    pub fn new(commands: HashMap<String, (String, Vec<String>)>) -> Self {
        Self {
            commands,
            servers: RwLock::new(HashMap::new()),
        }
    }

    async fn server(&self, name: &str) -> StagecraftResult<()> {
        if self.servers.read().await.contains_key(name) {
            return Ok(());
        }
        let mut servers = self.servers.write().await;
        if servers.contains_key(name) {
            return Ok(());
        }
        let (command, args) = self.commands.get(name).ok_or_else(|| {
            stagecraft_core::StagecraftError::Execution(format!(
                "unconfigured mcp server '{name}'"
            ))
        })?;
        let connected = StdioMcpServer::connect(name, command, args).await?;
        servers.insert(name.to_string(), connected);
        Ok(())
    }
}

#[async_trait]
impl McpClient for McpServerPool {
    async fn list_resources(&self, server: &str) -> StagecraftResult<Vec<ResourceDef>> {
        self.server(server).await?;
        let servers = self.servers.read().await;
        servers
            .get(server)
            .expect("just connected above")
            .list_resources()
            .await
    }

    async fn fetch_resource(&self, server: &str, uri: &str) -> StagecraftResult<Value> {
        self.server(server).await?;
        let servers = self.servers.read().await;
        servers
            .get(server)
            .expect("just connected above")
            .fetch_resource(uri)
            .await
    }

    async fn call_tool(
        &self,
        server: &str,
        tool: &str,
        args: Value,
    ) -> StagecraftResult<McpToolResult> {
        self.server(server).await?;
        let servers = self.servers.read().await;
        servers
            .get(server)
            .expect("just connected above")
            .call_tool(tool, args)
            .await
    }
}

#[cfg(test)]
pub mod test_util {
    use super::*;

    /// An in-memory stand-in for tests that exercise the invoker layer
    /// without spawning a subprocess.
    #[derive(Default)]
    pub struct StubMcpClient {
        pub tool_results: std::sync::Mutex<HashMap<(String, String), StagecraftResult<McpToolResult>>>,
    }

    #[async_trait]
    impl McpClient for StubMcpClient {
        async fn list_resources(&self, _server: &str) -> StagecraftResult<Vec<ResourceDef>> {
            Ok(vec![])
        }

        async fn fetch_resource(&self, _server: &str, _uri: &str) -> StagecraftResult<Value> {
            Ok(Value::Null)
        }

        async fn call_tool(
            &self,
            server: &str,
            tool: &str,
            _args: Value,
        ) -> StagecraftResult<McpToolResult> {
            let mut results = self.tool_results.lock().unwrap_or_else(|e| e.into_inner());
            results
                .remove(&(server.to_string(), tool.to_string()))
                .unwrap_or_else(|| {
                    Err(stagecraft_core::StagecraftError::Execution(format!(
                        "no stubbed result for {server}/{tool}"
                    )))
                })
        }
    }
}
