//! Adapter exposing MCP server tools through the local tool registry.
//!
//! At daemon startup the configured MCP server is asked for `tools/list`;
//! each advertised tool is wrapped as an [`McpRemoteTool`] whose `execute`
//! delegates to `tools/call`. The shared client sits behind an async mutex
//! because one MCP session is one ordered pipe.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::error::ZekeResult;
use crate::mcp::{McpClient, McpToolSpec};
use crate::tools::{Tool, ToolCategory, ToolRegistry, ToolResult, ToolSchema};

/// One remote tool.
pub struct McpRemoteTool {
    spec: McpToolSpec,
    client: Arc<Mutex<McpClient>>,
}

#[async_trait]
impl Tool for McpRemoteTool {
    fn name(&self) -> &str {
        &self.spec.name
    }

    fn description(&self) -> &str {
        self.spec.description.as_deref().unwrap_or("MCP server tool")
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::Mcp
    }

    /// Remote side effects are opaque; always confirm.
    fn requires_confirmation(&self) -> bool {
        true
    }

    /// MCP advertises JSON Schema; parameter validation happens server-side,
    /// so the local schema stays permissive.
    fn schema(&self) -> ToolSchema {
        ToolSchema::new()
    }

    async fn execute(&self, params: serde_json::Value) -> ZekeResult<ToolResult> {
        let mut client = self.client.lock().await;
        let result = client.tools_call(&self.spec.name, params).await?;
        let is_error = result
            .get("isError")
            .and_then(|v| v.as_bool())
            .unwrap_or(false);
        let output = render_content(&result);
        if is_error {
            Ok(ToolResult::failed(output, "mcp tool reported an error"))
        } else {
            Ok(ToolResult::ok(output))
        }
    }
}

/// Joins the `content` blocks of a `tools/call` result into display text.
fn render_content(result: &serde_json::Value) -> String {
    match result.get("content").and_then(|c| c.as_array()) {
        Some(blocks) => blocks
            .iter()
            .filter_map(|b| b.get("text").and_then(|t| t.as_str()))
            .collect::<Vec<_>>()
            .join("\n"),
        None => result.to_string(),
    }
}

/// Lists the server's tools and registers each as a local tool.
pub async fn register_mcp_tools(
    registry: &mut ToolRegistry,
    client: McpClient,
) -> ZekeResult<usize> {
    let client = Arc::new(Mutex::new(client));
    let specs = client.lock().await.tools_list().await?;
    let count = specs.len();
    for spec in specs {
        registry.register(Arc::new(McpRemoteTool {
            spec,
            client: client.clone(),
        }));
    }
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_content_joins_text_blocks() {
        let result = serde_json::json!({
            "content": [
                {"type": "text", "text": "line one"},
                {"type": "text", "text": "line two"},
            ]
        });
        assert_eq!(render_content(&result), "line one\nline two");
    }

    #[test]
    fn render_content_falls_back_to_raw_json() {
        let result = serde_json::json!({"raw": 1});
        assert_eq!(render_content(&result), r#"{"raw":1}"#);
    }
}
