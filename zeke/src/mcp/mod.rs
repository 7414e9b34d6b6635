//! MCP client: JSON-RPC 2.0 over stdio, WebSocket, or a docker-exec pipe.
//!
//! Connecting performs the `initialize` handshake and the `initialized`
//! notification. Requests carry integer ids and responses are correlated by
//! id; unsolicited notifications are queued and can be drained by the
//! caller. Supported operations: `tools/list`, `tools/call`,
//! `resources/list`, `resources/read`.

mod transport;

use std::time::Duration;

use serde_json::{json, Value};

use crate::error::{ZekeError, ZekeResult};
use crate::protocol::{RpcRequest, RpcResponse};
pub use transport::{McpTransport, StdioTransport, WsTransport};

const PROTOCOL_VERSION: &str = "2025-06-18";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(20);

/// Where the MCP server lives. Precedence when several are configured:
/// explicit command, then WebSocket, then docker.
#[derive(Clone, Debug, PartialEq)]
pub enum McpTransportConfig {
    Stdio {
        command: String,
        args: Vec<String>,
    },
    WebSocket {
        url: String,
    },
    Docker {
        container: String,
        command: String,
        args: Vec<String>,
    },
}

impl McpTransportConfig {
    /// Reads `ZEKE_MCP_COMMAND` / `ZEKE_MCP_WS` / `ZEKE_MCP_DOCKER_CONTAINER`.
    /// `None` when no MCP server is configured.
    pub fn from_env() -> Option<Self> {
        if let Ok(cmdline) = std::env::var("ZEKE_MCP_COMMAND") {
            let mut parts = cmdline.split_whitespace().map(String::from);
            let command = parts.next()?;
            return Some(Self::Stdio {
                command,
                args: parts.collect(),
            });
        }
        if let Ok(url) = std::env::var("ZEKE_MCP_WS") {
            if !url.is_empty() {
                return Some(Self::WebSocket { url });
            }
        }
        if let Ok(container) = std::env::var("ZEKE_MCP_DOCKER_CONTAINER") {
            if !container.is_empty() {
                return Some(Self::Docker {
                    container,
                    command: "mcp-server".into(),
                    args: Vec::new(),
                });
            }
        }
        None
    }
}

/// One MCP session. Owns the transport; not shareable across tasks without
/// external synchronisation.
pub struct McpClient {
    transport: Box<dyn McpTransport>,
    next_id: i64,
    notifications: Vec<RpcRequest>,
    request_timeout: Duration,
}

impl McpClient {
    /// Connects and completes the initialize handshake.
    pub async fn connect(config: &McpTransportConfig) -> ZekeResult<Self> {
        let transport: Box<dyn McpTransport> = match config {
            McpTransportConfig::Stdio { command, args } => {
                Box::new(StdioTransport::spawn(command, args, &[])?)
            }
            McpTransportConfig::WebSocket { url } => Box::new(WsTransport::connect(url).await?),
            McpTransportConfig::Docker {
                container,
                command,
                args,
            } => Box::new(StdioTransport::docker(container, command, args)?),
        };
        let mut client = Self {
            transport,
            next_id: 0,
            notifications: Vec::new(),
            request_timeout: REQUEST_TIMEOUT,
        };
        client.initialize().await?;
        Ok(client)
    }

    /// Wraps an already-built transport; used by tests with an in-memory pipe.
    pub fn over(transport: Box<dyn McpTransport>) -> Self {
        Self {
            transport,
            next_id: 0,
            notifications: Vec::new(),
            request_timeout: REQUEST_TIMEOUT,
        }
    }

    async fn initialize(&mut self) -> ZekeResult<()> {
        self.request(
            "initialize",
            json!({
                "protocolVersion": PROTOCOL_VERSION,
                "capabilities": { "tools": {}, "resources": {} },
                "clientInfo": {
                    "name": "zeke",
                    "version": env!("CARGO_PKG_VERSION"),
                },
            }),
        )
        .await?;
        let note = RpcRequest::notification("notifications/initialized", json!({}));
        self.send_message(&note).await
    }

    async fn send_message(&mut self, message: &RpcRequest) -> ZekeResult<()> {
        let line = serde_json::to_string(message)
            .map_err(|e| ZekeError::InvalidResponse(format!("mcp encode: {e}")))?;
        self.transport.send(&line).await
    }

    /// Issues one request and waits for its response, queueing any
    /// notifications that arrive in between.
    pub async fn request(&mut self, method: &str, params: Value) -> ZekeResult<Value> {
        self.next_id += 1;
        let id = self.next_id;
        self.send_message(&RpcRequest::new(id, method, params)).await?;

        let deadline = tokio::time::Instant::now() + self.request_timeout;
        loop {
            let line = tokio::time::timeout_at(deadline, self.transport.recv())
                .await
                .map_err(|_| ZekeError::Timeout(format!("mcp {method}")))??;
            let Some(line) = line else {
                return Err(ZekeError::Network("mcp server closed the pipe".into()));
            };

            // Requests/notifications from the server are passed up, not answered.
            if let Ok(incoming) = serde_json::from_str::<RpcRequest>(&line) {
                if !incoming.method.is_empty() {
                    self.notifications.push(incoming);
                    continue;
                }
            }
            let response: RpcResponse = serde_json::from_str(&line)
                .map_err(|e| ZekeError::InvalidResponse(format!("mcp response: {e}")))?;
            if response.id != json!(id) {
                continue;
            }
            if let Some(err) = response.error {
                return Err(ZekeError::InvalidResponse(format!(
                    "mcp {method}: {} ({})",
                    err.message, err.code
                )));
            }
            return Ok(response.result.unwrap_or(Value::Null));
        }
    }

    /// Notifications received so far, oldest first.
    pub fn drain_notifications(&mut self) -> Vec<RpcRequest> {
        std::mem::take(&mut self.notifications)
    }

    pub async fn tools_list(&mut self) -> ZekeResult<Vec<McpToolSpec>> {
        let result = self.request("tools/list", json!({})).await?;
        let tools = result
            .get("tools")
            .and_then(|t| t.as_array())
            .cloned()
            .unwrap_or_default();
        tools
            .into_iter()
            .map(|t| {
                serde_json::from_value(t)
                    .map_err(|e| ZekeError::InvalidResponse(format!("mcp tool spec: {e}")))
            })
            .collect()
    }

    pub async fn tools_call(&mut self, name: &str, arguments: Value) -> ZekeResult<Value> {
        self.request(
            "tools/call",
            json!({ "name": name, "arguments": arguments }),
        )
        .await
    }

    pub async fn resources_list(&mut self) -> ZekeResult<Value> {
        self.request("resources/list", json!({})).await
    }

    pub async fn resources_read(&mut self, uri: &str) -> ZekeResult<Value> {
        self.request("resources/read", json!({ "uri": uri })).await
    }
}

/// Tool advertised by the MCP server.
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct McpToolSpec {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(rename = "inputSchema", default)]
    pub input_schema: Value,
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::VecDeque;

    /// Scripted transport: records sends, replays canned receive lines.
    struct ScriptedTransport {
        sent: Vec<String>,
        replies: VecDeque<String>,
    }

    #[async_trait]
    impl McpTransport for ScriptedTransport {
        async fn send(&mut self, line: &str) -> ZekeResult<()> {
            self.sent.push(line.to_string());
            Ok(())
        }

        async fn recv(&mut self) -> ZekeResult<Option<String>> {
            Ok(self.replies.pop_front())
        }
    }

    fn client_with(replies: &[&str]) -> McpClient {
        McpClient::over(Box::new(ScriptedTransport {
            sent: Vec::new(),
            replies: replies.iter().map(|s| s.to_string()).collect(),
        }))
    }

    #[tokio::test]
    async fn request_correlates_by_integer_id() {
        let mut client = client_with(&[
            r#"{"jsonrpc":"2.0","id":1,"result":{"ok":true}}"#,
        ]);
        let result = client.request("tools/list", json!({})).await.unwrap();
        assert_eq!(result["ok"], json!(true));
    }

    #[tokio::test]
    async fn notifications_are_queued_not_returned() {
        let mut client = client_with(&[
            r#"{"jsonrpc":"2.0","method":"notifications/progress","params":{"n":1}}"#,
            r#"{"jsonrpc":"2.0","id":1,"result":{}}"#,
        ]);
        client.request("tools/call", json!({})).await.unwrap();
        let notes = client.drain_notifications();
        assert_eq!(notes.len(), 1);
        assert_eq!(notes[0].method, "notifications/progress");
        assert!(client.drain_notifications().is_empty());
    }

    #[tokio::test]
    async fn mismatched_response_ids_are_skipped() {
        let mut client = client_with(&[
            r#"{"jsonrpc":"2.0","id":99,"result":{"stale":true}}"#,
            r#"{"jsonrpc":"2.0","id":1,"result":{"fresh":true}}"#,
        ]);
        let result = client.request("resources/list", json!({})).await.unwrap();
        assert_eq!(result["fresh"], json!(true));
    }

    #[tokio::test]
    async fn error_response_surfaces_message_and_code() {
        let mut client = client_with(&[
            r#"{"jsonrpc":"2.0","id":1,"error":{"code":-32601,"message":"no such method"}}"#,
        ]);
        let err = client.request("tools/call", json!({})).await.unwrap_err();
        assert!(err.to_string().contains("no such method"));
        assert!(err.to_string().contains("-32601"));
    }

    #[tokio::test]
    async fn closed_pipe_is_a_network_error() {
        let mut client = client_with(&[]);
        let err = client.request("tools/list", json!({})).await.unwrap_err();
        assert!(matches!(err, ZekeError::Network(_)));
    }

    #[test]
    fn env_config_prefers_command() {
        std::env::set_var("ZEKE_MCP_COMMAND", "mcp-server --flag");
        std::env::set_var("ZEKE_MCP_WS", "ws://localhost:9000");
        let cfg = McpTransportConfig::from_env().unwrap();
        std::env::remove_var("ZEKE_MCP_COMMAND");
        std::env::remove_var("ZEKE_MCP_WS");
        assert_eq!(
            cfg,
            McpTransportConfig::Stdio {
                command: "mcp-server".into(),
                args: vec!["--flag".into()],
            }
        );
    }

    #[tokio::test]
    async fn tools_list_parses_specs() {
        let mut client = client_with(&[
            r#"{"jsonrpc":"2.0","id":1,"result":{"tools":[
                {"name":"search","description":"find things","inputSchema":{"type":"object"}}
            ]}}"#,
        ]);
        let tools = client.tools_list().await.unwrap();
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0].name, "search");
        assert_eq!(tools[0].description.as_deref(), Some("find things"));
    }
}
