//! Anthropic Messages API adapter.
//!
//! Auth is either an API key (`x-api-key` header) or a Claude Max OAuth
//! access token (Bearer), whichever the credential store yields first. The
//! system prompt travels in the top-level `system` field, not the message
//! list.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::auth::{fresh_access_token, CredentialKind, CredentialStore};
use crate::catalog::{Capability, ModelRecord};
use crate::chat::{ChatDelta, ChatRequest, ChatResponse, Role};
use crate::error::{ZekeError, ZekeResult};
use crate::providers::sse::{SseDecoder, SseEvent};
use crate::providers::{
    map_status_error, map_transport_error, retry_after_secs, Provider, ProviderKind,
};

pub const DEFAULT_BASE: &str = "https://api.anthropic.com";
const API_VERSION: &str = "2023-06-01";
/// Messages API requires max_tokens; used when the request leaves it unset.
const DEFAULT_MAX_TOKENS: u32 = 4096;

enum AnthropicAuth {
    ApiKey(String),
    Bearer(String),
}

#[derive(Deserialize)]
struct WireMessageResponse {
    #[serde(default)]
    content: Vec<WireContentBlock>,
    model: Option<String>,
    usage: Option<WireUsage>,
    stop_reason: Option<String>,
}

#[derive(Deserialize)]
struct WireContentBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: String,
}

#[derive(Deserialize, Default)]
struct WireUsage {
    #[serde(default)]
    input_tokens: u32,
    #[serde(default)]
    output_tokens: u32,
}

/// One SSE event body; `type` discriminates.
#[derive(Deserialize)]
struct WireStreamEvent {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    delta: Option<WireStreamDelta>,
    #[serde(default)]
    usage: Option<WireUsage>,
    #[serde(default)]
    message: Option<WireStreamMessage>,
}

#[derive(Deserialize)]
struct WireStreamDelta {
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    stop_reason: Option<String>,
}

#[derive(Deserialize)]
struct WireStreamMessage {
    #[serde(default)]
    usage: Option<WireUsage>,
}

#[derive(Deserialize)]
struct WireModelList {
    #[serde(default)]
    data: Vec<WireModelEntry>,
}

#[derive(Deserialize)]
struct WireModelEntry {
    id: String,
    display_name: Option<String>,
}

/// Splits the normalised request into Anthropic's `(system, messages)` shape.
fn split_system(req: &ChatRequest) -> (Option<String>, Vec<serde_json::Value>) {
    let mut system = None;
    let mut messages = Vec::new();
    for m in &req.messages {
        match m.role {
            Role::System => system = Some(m.content.clone()),
            Role::User => messages.push(serde_json::json!({"role": "user", "content": m.content})),
            Role::Assistant => {
                messages.push(serde_json::json!({"role": "assistant", "content": m.content}))
            }
        }
    }
    (system, messages)
}

/// Anthropic Messages adapter.
pub struct AnthropicProvider {
    base_url: String,
    credentials: Arc<CredentialStore>,
    client: reqwest::Client,
    default_model: String,
    costs: (f64, f64),
}

impl AnthropicProvider {
    pub fn new(credentials: Arc<CredentialStore>, client: reqwest::Client) -> Self {
        let base =
            std::env::var("ZEKE_CLAUDE_ENDPOINT").unwrap_or_else(|_| DEFAULT_BASE.to_string());
        Self {
            base_url: base.trim_end_matches('/').to_string(),
            credentials,
            client,
            default_model: "claude-sonnet-4-20250514".into(),
            costs: (3.0, 15.0),
        }
    }

    async fn auth(&self) -> ZekeResult<AnthropicAuth> {
        if let Some(key) = self
            .credentials
            .get("anthropic", CredentialKind::ApiKey)
            .await?
        {
            return Ok(AnthropicAuth::ApiKey(key.value));
        }
        if let Some(token) =
            fresh_access_token(&self.credentials, "anthropic", &self.client).await?
        {
            return Ok(AnthropicAuth::Bearer(token));
        }
        Err(ZekeError::Unauthorised {
            provider: "anthropic".into(),
        })
    }

    fn request(&self, path: &str, auth: &AnthropicAuth) -> reqwest::RequestBuilder {
        let rb = self
            .client
            .post(format!("{}{path}", self.base_url))
            .header("anthropic-version", API_VERSION);
        match auth {
            AnthropicAuth::ApiKey(k) => rb.header("x-api-key", k.clone()),
            AnthropicAuth::Bearer(t) => rb.bearer_auth(t.clone()),
        }
    }

    fn body(&self, req: &ChatRequest, stream: bool) -> serde_json::Value {
        let (system, messages) = split_system(req);
        let mut body = serde_json::json!({
            "model": req.model.clone().unwrap_or_else(|| self.default_model()),
            "messages": messages,
            "max_tokens": req.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            "stream": stream,
        });
        if let Some(sys) = system {
            body["system"] = serde_json::Value::String(sys);
        }
        if let Some(t) = req.temperature {
            body["temperature"] = serde_json::json!(t);
        }
        body
    }
}

#[async_trait]
impl Provider for AnthropicProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Anthropic
    }

    fn default_model(&self) -> String {
        self.default_model.clone()
    }

    async fn complete(&self, req: &ChatRequest) -> ZekeResult<ChatResponse> {
        let auth = self.auth().await?;
        let model = req.model.clone().unwrap_or_else(|| self.default_model());
        let started = Instant::now();
        let response = self
            .request("/v1/messages", &auth)
            .json(&self.body(req, false))
            .send()
            .await
            .map_err(map_transport_error)?;
        let status = response.status();
        if !status.is_success() {
            let retry = retry_after_secs(&response);
            let text = response.text().await.unwrap_or_default();
            return Err(map_status_error(ProviderKind::Anthropic, status, retry, &text));
        }
        let parsed: WireMessageResponse = response
            .json()
            .await
            .map_err(|e| ZekeError::InvalidResponse(e.to_string()))?;
        if parsed.stop_reason.as_deref() == Some("refusal") {
            return Err(ZekeError::ContentFiltered);
        }
        let content: String = parsed
            .content
            .iter()
            .filter(|b| b.kind == "text")
            .map(|b| b.text.as_str())
            .collect();
        let usage = parsed.usage.unwrap_or_default();
        Ok(ChatResponse {
            content,
            model: parsed.model.unwrap_or(model),
            provider: "anthropic".into(),
            tokens_in: usage.input_tokens,
            tokens_out: usage.output_tokens,
            latency_ms: started.elapsed().as_millis() as u64,
            cached: false,
        })
    }

    async fn stream(
        &self,
        req: &ChatRequest,
        stream_id: &str,
        tx: mpsc::Sender<ChatDelta>,
        cancel: &CancellationToken,
    ) -> ZekeResult<ChatResponse> {
        let auth = self.auth().await?;
        let model = req.model.clone().unwrap_or_else(|| self.default_model());
        let started = Instant::now();
        let response = self
            .request("/v1/messages", &auth)
            .json(&self.body(req, true))
            .send()
            .await
            .map_err(map_transport_error)?;
        let status = response.status();
        if !status.is_success() {
            let retry = retry_after_secs(&response);
            let text = response.text().await.unwrap_or_default();
            return Err(map_status_error(ProviderKind::Anthropic, status, retry, &text));
        }

        let mut byte_stream = response.bytes_stream();
        let mut decoder = SseDecoder::new();
        let mut content = String::new();
        let mut tokens_in = 0u32;
        let mut tokens_out = 0u32;

        'read: loop {
            let chunk = tokio::select! {
                _ = cancel.cancelled() => return Err(ZekeError::Cancelled),
                chunk = futures_util::StreamExt::next(&mut byte_stream) => chunk,
            };
            let chunk = match chunk {
                Some(Ok(c)) => c,
                Some(Err(e)) => return Err(map_transport_error(e)),
                None => break 'read,
            };
            for event in decoder.feed(&chunk) {
                let SseEvent::Data(json) = event else {
                    break 'read;
                };
                let parsed: WireStreamEvent = serde_json::from_str(&json)
                    .map_err(|e| ZekeError::InvalidResponse(format!("stream event: {e}")))?;
                match parsed.kind.as_str() {
                    "message_start" => {
                        if let Some(u) = parsed.message.and_then(|m| m.usage) {
                            tokens_in = u.input_tokens;
                        }
                    }
                    "content_block_delta" => {
                        if let Some(text) = parsed.delta.and_then(|d| d.text) {
                            if !text.is_empty() {
                                content.push_str(&text);
                                if tx.send(ChatDelta::text(stream_id, text)).await.is_err() {
                                    return Err(ZekeError::Cancelled);
                                }
                            }
                        }
                    }
                    "message_delta" => {
                        if let Some(u) = parsed.usage {
                            tokens_out = u.output_tokens;
                        }
                        if parsed.delta.and_then(|d| d.stop_reason).as_deref()
                            == Some("refusal")
                        {
                            return Err(ZekeError::ContentFiltered);
                        }
                    }
                    "message_stop" => break 'read,
                    _ => {}
                }
            }
        }

        let _ = tx.send(ChatDelta::end(stream_id)).await;
        Ok(ChatResponse {
            content,
            model,
            provider: "anthropic".into(),
            tokens_in,
            tokens_out,
            latency_ms: started.elapsed().as_millis() as u64,
            cached: false,
        })
    }

    async fn list_models(&self) -> ZekeResult<Vec<ModelRecord>> {
        let auth = self.auth().await?;
        let rb = self
            .client
            .get(format!("{}/v1/models", self.base_url))
            .header("anthropic-version", API_VERSION);
        let rb = match &auth {
            AnthropicAuth::ApiKey(k) => rb.header("x-api-key", k.clone()),
            AnthropicAuth::Bearer(t) => rb.bearer_auth(t.clone()),
        };
        let response = rb.send().await.map_err(map_transport_error)?;
        let status = response.status();
        if !status.is_success() {
            let retry = retry_after_secs(&response);
            let text = response.text().await.unwrap_or_default();
            return Err(map_status_error(ProviderKind::Anthropic, status, retry, &text));
        }
        let list: WireModelList = response
            .json()
            .await
            .map_err(|e| ZekeError::InvalidResponse(e.to_string()))?;
        Ok(list
            .data
            .into_iter()
            .map(|entry| {
                let mut rec = ModelRecord::new("anthropic", &entry.id, 200_000)
                    .with_capabilities([
                        Capability::Code,
                        Capability::Chat,
                        Capability::Tools,
                        Capability::Vision,
                        Capability::Reasoning,
                    ])
                    .with_costs(self.costs.0, self.costs.1);
                rec.display_name = entry.display_name;
                rec
            })
            .collect())
    }

    fn cost_per_token(&self) -> (f64, f64) {
        self.costs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::ChatMessage;

    #[test]
    fn system_message_moves_to_top_level_field() {
        let req = ChatRequest {
            messages: vec![ChatMessage::system("terse"), ChatMessage::user("hi")],
            ..Default::default()
        };
        let (system, messages) = split_system(&req);
        assert_eq!(system.as_deref(), Some("terse"));
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0]["role"], serde_json::json!("user"));
    }

    #[test]
    fn stream_event_parses_content_block_delta() {
        let ev: WireStreamEvent = serde_json::from_str(
            r#"{"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"let"}}"#,
        )
        .unwrap();
        assert_eq!(ev.kind, "content_block_delta");
        assert_eq!(ev.delta.unwrap().text.as_deref(), Some("let"));
    }

    #[test]
    fn message_response_joins_text_blocks() {
        let resp: WireMessageResponse = serde_json::from_str(
            r#"{"content":[{"type":"text","text":"a"},{"type":"text","text":"b"}],
                "usage":{"input_tokens":3,"output_tokens":2}}"#,
        )
        .unwrap();
        let content: String = resp
            .content
            .iter()
            .filter(|b| b.kind == "text")
            .map(|b| b.text.as_str())
            .collect();
        assert_eq!(content, "ab");
    }
}
