//! OpenAI-compatible adapter: OpenAI itself, xAI, the aggregating proxy,
//! and any `/v1/chat/completions`-compliant endpoint.
//!
//! The wire DTOs here are shared with the Azure and Copilot adapters, which
//! speak the same body format with different URLs and auth headers.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::auth::{CredentialKind, CredentialStore};
use crate::catalog::{Capability, ModelRecord};
use crate::chat::{ChatDelta, ChatRequest, ChatResponse, RequestTags, Role};
use crate::error::{ZekeError, ZekeResult};
use crate::providers::sse::{SseDecoder, SseEvent};
use crate::providers::{
    map_status_error, map_transport_error, retry_after_secs, Provider, ProviderKind,
};

pub const DEFAULT_OPENAI_BASE: &str = "https://api.openai.com/v1";
pub const DEFAULT_XAI_BASE: &str = "https://api.x.ai/v1";

// ---------------------------------------------------------------------------
// Wire DTOs (shared with azure/copilot)
// ---------------------------------------------------------------------------

#[derive(Serialize)]
pub(crate) struct WireMessage {
    pub role: &'static str,
    pub content: String,
}

impl WireMessage {
    pub fn from_chat(messages: &[crate::chat::ChatMessage]) -> Vec<WireMessage> {
        messages
            .iter()
            .map(|m| WireMessage {
                role: match m.role {
                    Role::System => "system",
                    Role::User => "user",
                    Role::Assistant => "assistant",
                },
                content: m.content.clone(),
            })
            .collect()
    }
}

#[derive(Serialize)]
pub(crate) struct WireBody {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    pub messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    pub stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream_options: Option<serde_json::Value>,
    /// Routing tags; non-compatible upstreams ignore the extra field.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<RequestTags>,
}

impl WireBody {
    pub fn build(req: &ChatRequest, model: Option<String>, stream: bool, tags: bool) -> Self {
        WireBody {
            model,
            messages: WireMessage::from_chat(&req.messages),
            temperature: req.temperature,
            max_tokens: req.max_tokens,
            stream,
            stream_options: stream.then(|| serde_json::json!({"include_usage": true})),
            tags: tags.then(|| req.tags.clone()),
        }
    }
}

#[derive(Deserialize)]
pub(crate) struct WireUsage {
    #[serde(default)]
    pub prompt_tokens: u32,
    #[serde(default)]
    pub completion_tokens: u32,
}

#[derive(Deserialize)]
pub(crate) struct WireCompletion {
    #[serde(default)]
    pub choices: Vec<WireChoice>,
    pub usage: Option<WireUsage>,
    pub model: Option<String>,
}

#[derive(Deserialize)]
pub(crate) struct WireChoice {
    pub message: WireChoiceMessage,
    pub finish_reason: Option<String>,
}

#[derive(Deserialize)]
pub(crate) struct WireChoiceMessage {
    pub content: Option<String>,
}

#[derive(Deserialize)]
pub(crate) struct WireStreamChunk {
    #[serde(default)]
    pub choices: Vec<WireStreamChoice>,
    pub usage: Option<WireUsage>,
}

#[derive(Deserialize)]
pub(crate) struct WireStreamChoice {
    pub delta: WireStreamDelta,
    #[allow(dead_code)]
    pub finish_reason: Option<String>,
}

#[derive(Deserialize, Default)]
pub(crate) struct WireStreamDelta {
    pub content: Option<String>,
}

#[derive(Deserialize)]
struct WireModelList {
    #[serde(default)]
    data: Vec<WireModelEntry>,
}

#[derive(Deserialize)]
struct WireModelEntry {
    id: String,
}

/// Maps a completed finish reason to a terminal error when the provider
/// refused or truncated for policy/length reasons.
pub(crate) fn check_finish_reason(reason: Option<&str>) -> ZekeResult<()> {
    match reason {
        Some("content_filter") => Err(ZekeError::ContentFiltered),
        _ => Ok(()),
    }
}

// ---------------------------------------------------------------------------
// Adapter
// ---------------------------------------------------------------------------

/// Adapter for any `/v1/chat/completions` endpoint with Bearer auth.
pub struct OpenAiCompatibleProvider {
    kind: ProviderKind,
    base_url: String,
    credentials: Arc<CredentialStore>,
    client: reqwest::Client,
    default_model: String,
    costs: (f64, f64),
    /// Whether to put the routing `tags` object in the body (proxy mode).
    send_tags: bool,
}

impl OpenAiCompatibleProvider {
    pub fn new(
        kind: ProviderKind,
        base_url: impl Into<String>,
        credentials: Arc<CredentialStore>,
        client: reqwest::Client,
        default_model: impl Into<String>,
        costs: (f64, f64),
    ) -> Self {
        Self {
            kind,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            credentials,
            client,
            default_model: default_model.into(),
            costs,
            send_tags: kind == ProviderKind::Proxy,
        }
    }

    /// OpenAI at `ZEKE_OPENAI_ENDPOINT` or the public API.
    pub fn openai(credentials: Arc<CredentialStore>, client: reqwest::Client) -> Self {
        let base = std::env::var("ZEKE_OPENAI_ENDPOINT")
            .unwrap_or_else(|_| DEFAULT_OPENAI_BASE.to_string());
        Self::new(
            ProviderKind::Openai,
            base,
            credentials,
            client,
            "gpt-4o-mini",
            (0.15, 0.60),
        )
    }

    /// xAI at `ZEKE_XAI_ENDPOINT` or the public API.
    pub fn xai(credentials: Arc<CredentialStore>, client: reqwest::Client) -> Self {
        let base =
            std::env::var("ZEKE_XAI_ENDPOINT").unwrap_or_else(|_| DEFAULT_XAI_BASE.to_string());
        Self::new(
            ProviderKind::Xai,
            base,
            credentials,
            client,
            "grok-3-mini",
            (0.30, 0.50),
        )
    }

    /// Aggregating proxy at `ZEKE_API_BASE`. Sends the `tags` object.
    pub fn proxy(
        credentials: Arc<CredentialStore>,
        client: reqwest::Client,
        base: impl Into<String>,
    ) -> Self {
        Self::new(
            ProviderKind::Proxy,
            base,
            credentials,
            client,
            "auto",
            (0.0, 0.0),
        )
    }

    async fn bearer(&self) -> ZekeResult<Option<String>> {
        let cred = self
            .credentials
            .get(self.kind.as_str(), CredentialKind::ApiKey)
            .await?;
        match cred {
            Some(c) => Ok(Some(c.value)),
            // The proxy may be keyless on localhost; every other kind needs a key.
            None if self.kind == ProviderKind::Proxy => Ok(None),
            None => Err(ZekeError::Unauthorised {
                provider: self.kind.as_str().to_string(),
            }),
        }
    }

    fn request(&self, url: String, bearer: Option<&str>) -> reqwest::RequestBuilder {
        let mut rb = self.client.post(url);
        if let Some(token) = bearer {
            rb = rb.bearer_auth(token);
        }
        rb
    }

    fn model_for(&self, req: &ChatRequest) -> String {
        req.model.clone().unwrap_or_else(|| self.default_model())
    }
}

#[async_trait]
impl Provider for OpenAiCompatibleProvider {
    fn kind(&self) -> ProviderKind {
        self.kind
    }

    fn default_model(&self) -> String {
        self.default_model.clone()
    }

    async fn complete(&self, req: &ChatRequest) -> ZekeResult<ChatResponse> {
        let bearer = self.bearer().await?;
        let model = self.model_for(req);
        let body = WireBody::build(req, Some(model.clone()), false, self.send_tags);
        let started = Instant::now();

        let response = self
            .request(format!("{}/chat/completions", self.base_url), bearer.as_deref())
            .json(&body)
            .send()
            .await
            .map_err(map_transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let retry = retry_after_secs(&response);
            let text = response.text().await.unwrap_or_default();
            return Err(map_status_error(self.kind, status, retry, &text));
        }

        let completion: WireCompletion = response
            .json()
            .await
            .map_err(|e| ZekeError::InvalidResponse(e.to_string()))?;
        let choice = completion
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| ZekeError::InvalidResponse("no choices in completion".into()))?;
        check_finish_reason(choice.finish_reason.as_deref())?;

        let usage = completion.usage.unwrap_or(WireUsage {
            prompt_tokens: 0,
            completion_tokens: 0,
        });
        Ok(ChatResponse {
            content: choice.message.content.unwrap_or_default(),
            model: completion.model.unwrap_or(model),
            provider: self.kind.as_str().to_string(),
            tokens_in: usage.prompt_tokens,
            tokens_out: usage.completion_tokens,
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
        let bearer = self.bearer().await?;
        let model = self.model_for(req);
        let body = WireBody::build(req, Some(model.clone()), true, self.send_tags);
        let started = Instant::now();

        let response = self
            .request(format!("{}/chat/completions", self.base_url), bearer.as_deref())
            .json(&body)
            .send()
            .await
            .map_err(map_transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let retry = retry_after_secs(&response);
            let text = response.text().await.unwrap_or_default();
            return Err(map_status_error(self.kind, status, retry, &text));
        }

        let mut byte_stream = response.bytes_stream();
        let mut decoder = SseDecoder::new();
        let mut content = String::new();
        let mut usage: Option<WireUsage> = None;

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
                match event {
                    SseEvent::Done => break 'read,
                    SseEvent::Data(json) => {
                        let parsed: WireStreamChunk = match serde_json::from_str(&json) {
                            Ok(p) => p,
                            Err(e) => {
                                return Err(ZekeError::InvalidResponse(format!(
                                    "stream chunk: {e}"
                                )))
                            }
                        };
                        if let Some(u) = parsed.usage {
                            usage = Some(u);
                        }
                        if let Some(choice) = parsed.choices.into_iter().next() {
                            if let Some(text) = choice.delta.content {
                                if !text.is_empty() {
                                    content.push_str(&text);
                                    if tx
                                        .send(ChatDelta::text(stream_id, text))
                                        .await
                                        .is_err()
                                    {
                                        return Err(ZekeError::Cancelled);
                                    }
                                }
                            }
                        }
                    }
                }
            }
        }

        let _ = tx.send(ChatDelta::end(stream_id)).await;
        let usage = usage.unwrap_or(WireUsage {
            prompt_tokens: 0,
            completion_tokens: 0,
        });
        Ok(ChatResponse {
            content,
            model,
            provider: self.kind.as_str().to_string(),
            tokens_in: usage.prompt_tokens,
            tokens_out: usage.completion_tokens,
            latency_ms: started.elapsed().as_millis() as u64,
            cached: false,
        })
    }

    async fn list_models(&self) -> ZekeResult<Vec<ModelRecord>> {
        let bearer = self.bearer().await?;
        let mut rb = self.client.get(format!("{}/models", self.base_url));
        if let Some(token) = bearer {
            rb = rb.bearer_auth(token);
        }
        let response = rb.send().await.map_err(map_transport_error)?;
        let status = response.status();
        if !status.is_success() {
            let retry = retry_after_secs(&response);
            let text = response.text().await.unwrap_or_default();
            return Err(map_status_error(self.kind, status, retry, &text));
        }
        let list: WireModelList = response
            .json()
            .await
            .map_err(|e| ZekeError::InvalidResponse(e.to_string()))?;
        Ok(list
            .data
            .into_iter()
            .map(|entry| {
                ModelRecord::new(self.kind.as_str(), &entry.id, 128_000)
                    .with_capabilities([Capability::Code, Capability::Chat, Capability::Tools])
                    .with_costs(self.costs.0, self.costs.1)
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
    fn wire_body_omits_model_when_none() {
        let req = ChatRequest::from_prompt("hi");
        let body = WireBody::build(&req, None, false, false);
        let v = serde_json::to_value(&body).unwrap();
        assert!(v.get("model").is_none());
        assert!(v.get("tags").is_none());
        assert_eq!(v["stream"], serde_json::json!(false));
    }

    #[test]
    fn wire_body_includes_tags_in_proxy_mode() {
        let mut req = ChatRequest::from_prompt("hi");
        req.tags.intent = crate::chat::Intent::Refactor;
        let body = WireBody::build(&req, Some("auto".into()), true, true);
        let v = serde_json::to_value(&body).unwrap();
        assert_eq!(v["tags"]["intent"], serde_json::json!("refactor"));
        assert_eq!(v["stream_options"]["include_usage"], serde_json::json!(true));
    }

    #[test]
    fn wire_messages_preserve_roles_in_order() {
        let msgs = vec![
            ChatMessage::system("be brief"),
            ChatMessage::user("q"),
            ChatMessage::assistant("a"),
        ];
        let wire = WireMessage::from_chat(&msgs);
        assert_eq!(wire[0].role, "system");
        assert_eq!(wire[1].role, "user");
        assert_eq!(wire[2].role, "assistant");
    }

    #[test]
    fn content_filter_finish_reason_is_terminal() {
        assert!(matches!(
            check_finish_reason(Some("content_filter")),
            Err(ZekeError::ContentFiltered)
        ));
        assert!(check_finish_reason(Some("stop")).is_ok());
        assert!(check_finish_reason(None).is_ok());
    }

    #[test]
    fn stream_chunk_parses_delta_content() {
        let chunk: WireStreamChunk = serde_json::from_str(
            r#"{"choices":[{"delta":{"content":"fn "},"finish_reason":null}]}"#,
        )
        .unwrap();
        assert_eq!(chunk.choices[0].delta.content.as_deref(), Some("fn "));
    }
}
