//! Stdio-subprocess JSON-RPC transport.

use crate::protocol::{
    InitializeResult, JsonRpcRequest, JsonRpcResponse, McpToolDef, McpToolResult, ResourceDef,
};
use serde_json::{json, Value};
use stagecraft_core::{StagecraftError, StagecraftResult};
use std::collections::HashMap;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin};
use tokio::sync::{oneshot, Mutex};
use tracing::{debug, warn};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// One spawned MCP server process, addressed by name in
/// [`crate::McpClient`] calls.
pub struct StdioMcpServer {
    stdin: Arc<Mutex<ChildStdin>>,
    _child: Child,
    pending: Arc<Mutex<HashMap<u64, oneshot::Sender<JsonRpcResponse>>>>,
    next_id: AtomicU64,
    name: String,
}

impl StdioMcpServer {
    /// Spawns `command` and completes the `initialize` handshake.
    pub async fn connect(
        name: impl Into<String>,
        command: &str,
        args: &[String],
    ) -> StagecraftResult<Self> {
        let name = name.into();
        let mut child = tokio::process::Command::new(command)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| StagecraftError::Execution(format!("spawn mcp server '{name}': {e}")))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| StagecraftError::Execution("mcp server has no stdin".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| StagecraftError::Execution("mcp server has no stdout".into()))?;

        let pending: Arc<Mutex<HashMap<u64, oneshot::Sender<JsonRpcResponse>>>> =
            Arc::new(Mutex::new(HashMap::new()));
        let reader_pending = pending.clone();
        let reader_name = name.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        if line.trim().is_empty() {
                            continue;
                        }
                        match serde_json::from_str::<JsonRpcResponse>(&line) {
                            Ok(response) => {
                                if let Some(id) = response.id {
                                    let mut pending = reader_pending.lock().await;
                                    if let Some(tx) = pending.remove(&id) {
                                        let _ = tx.send(response);
                                    }
                                }
                            }
                            Err(e) => warn!(server = %reader_name, error = %e, "malformed mcp response line"),
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        warn!(server = %reader_name, error = %e, "mcp stdout read failed");
                        break;
                    }
                }
            }
            debug!(server = %reader_name, "mcp reader task exiting");
        });

        let server = Self {
            stdin: Arc::new(Mutex::new(stdin)),
            _child: child,
            pending,
            next_id: AtomicU64::new(1),
            name,
        };
        server.initialize().await?;
        Ok(server)
    }

    async fn request(&self, method: &str, params: Option<Value>) -> StagecraftResult<Value> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id, tx);

        let request = JsonRpcRequest::new(id, method, params);
        let mut line = serde_json::to_string(&request)
            .map_err(|e| StagecraftError::Execution(format!("encode mcp request: {e}")))?;
        line.push('\n');

        {
            let mut stdin = self.stdin.lock().await;
            stdin
                .write_all(line.as_bytes())
                .await
                .map_err(|e| StagecraftError::Execution(format!("write to mcp server: {e}")))?;
            stdin
                .flush()
                .await
                .map_err(|e| StagecraftError::Execution(format!("flush mcp server stdin: {e}")))?;
        }

        let response = tokio::time::timeout(REQUEST_TIMEOUT, rx)
            .await
            .map_err(|_| StagecraftError::Timeout(REQUEST_TIMEOUT.as_millis() as u64))?
            .map_err(|_| StagecraftError::Execution("mcp server closed connection".into()))?;

        if let Some(error) = response.error {
            return Err(StagecraftError::Execution(format!(
                "mcp error {}: {}",
                error.code, error.message
            )));
        }
        Ok(response.result.unwrap_or(Value::Null))
    }

    async fn initialize(&self) -> StagecraftResult<InitializeResult> {
        let result = self
            .request(
                "initialize",
                Some(json!({
                    "protocolVersion": "2024-11-05",
                    "capabilities": {},
                    "clientInfo": {"name": "stagecraft", "version": env!("CARGO_PKG_VERSION")},
                })),
            )
            .await?;
        serde_json::from_value(result)
            .map_err(|e| StagecraftError::Execution(format!("invalid initialize result: {e}")))
    }

    pub async fn list_tools(&self) -> StagecraftResult<Vec<McpToolDef>> {
        let result = self.request("tools/list", None).await?;
        let tools = result
            .get("tools")
            .cloned()
            .ok_or_else(|| StagecraftError::Execution("tools/list missing 'tools'".into()))?;
        serde_json::from_value(tools)
            .map_err(|e| StagecraftError::Execution(format!("invalid tools/list result: {e}")))
    }

    pub async fn list_resources(&self) -> StagecraftResult<Vec<ResourceDef>> {
        let result = self.request("resources/list", None).await?;
        let resources = result.get("resources").cloned().ok_or_else(|| {
            StagecraftError::Execution("resources/list missing 'resources'".into())
        })?;
        serde_json::from_value(resources)
            .map_err(|e| StagecraftError::Execution(format!("invalid resources/list result: {e}")))
    }

    pub async fn fetch_resource(&self, uri: &str) -> StagecraftResult<Value> {
        self.request("resources/read", Some(json!({ "uri": uri })))
            .await
    }

    pub async fn call_tool(&self, tool: &str, args: Value) -> StagecraftResult<McpToolResult> {
        let result = self
            .request(
                "tools/call",
                Some(json!({ "name": tool, "arguments": args })),
            )
            .await?;
        let parsed: McpToolResult = serde_json::from_value(result)
            .map_err(|e| StagecraftError::Execution(format!("invalid tools/call result: {e}")))?;
        if parsed.is_error {
            let text = parsed
                .content
                .iter()
                .map(|c| c.text.as_str())
                .collect::<Vec<_>>()
                .join("; ");
            return Err(StagecraftError::Execution(format!(
                "tool '{tool}' on server '{}' reported an error: {text}",
                self.name
            )));
        }
        Ok(parsed)
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}
