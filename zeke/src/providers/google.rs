//! Google Gemini adapter (`generateContent` / `streamGenerateContent`).
//!
//! The API key travels as a query parameter; roles are `user`/`model` and a
//! system prompt becomes `systemInstruction`.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::auth::{CredentialKind, CredentialStore};
use crate::catalog::{Capability, ModelRecord};
use crate::chat::{ChatDelta, ChatRequest, ChatResponse, Role};
use crate::error::{ZekeError, ZekeResult};
use crate::providers::sse::{SseDecoder, SseEvent};
use crate::providers::{
    map_status_error, map_transport_error, retry_after_secs, Provider, ProviderKind,
};

pub const DEFAULT_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";

#[derive(Deserialize)]
struct WireGenerateResponse {
    #[serde(default)]
    candidates: Vec<WireCandidate>,
    #[serde(rename = "usageMetadata")]
    usage: Option<WireUsageMetadata>,
}

#[derive(Deserialize)]
struct WireCandidate {
    content: Option<WireContent>,
    #[serde(rename = "finishReason")]
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct WireContent {
    #[serde(default)]
    parts: Vec<WirePart>,
}

#[derive(Deserialize)]
struct WirePart {
    #[serde(default)]
    text: String,
}

#[derive(Deserialize, Default, Clone)]
struct WireUsageMetadata {
    #[serde(rename = "promptTokenCount", default)]
    prompt_tokens: u32,
    #[serde(rename = "candidatesTokenCount", default)]
    output_tokens: u32,
}

#[derive(Deserialize)]
struct WireModelList {
    #[serde(default)]
    models: Vec<WireModelEntry>,
}

#[derive(Deserialize)]
struct WireModelEntry {
    /// `models/gemini-2.0-flash` style resource name.
    name: String,
    #[serde(rename = "displayName")]
    display_name: Option<String>,
    #[serde(rename = "inputTokenLimit")]
    input_token_limit: Option<u32>,
}

fn candidate_text(resp: &WireGenerateResponse) -> ZekeResult<String> {
    let candidate = resp
        .candidates
        .first()
        .ok_or_else(|| ZekeError::InvalidResponse("no candidates".into()))?;
    if candidate.finish_reason.as_deref() == Some("SAFETY") {
        return Err(ZekeError::ContentFiltered);
    }
    Ok(candidate
        .content
        .as_ref()
        .map(|c| c.parts.iter().map(|p| p.text.as_str()).collect())
        .unwrap_or_default())
}

fn build_body(req: &ChatRequest) -> serde_json::Value {
    let mut contents = Vec::new();
    let mut system = None;
    for m in &req.messages {
        match m.role {
            Role::System => system = Some(m.content.clone()),
            Role::User => contents.push(serde_json::json!({
                "role": "user", "parts": [{"text": m.content}]
            })),
            Role::Assistant => contents.push(serde_json::json!({
                "role": "model", "parts": [{"text": m.content}]
            })),
        }
    }
    let mut body = serde_json::json!({ "contents": contents });
    if let Some(sys) = system {
        body["systemInstruction"] = serde_json::json!({"parts": [{"text": sys}]});
    }
    let mut gen = serde_json::Map::new();
    if let Some(t) = req.temperature {
        gen.insert("temperature".into(), serde_json::json!(t));
    }
    if let Some(m) = req.max_tokens {
        gen.insert("maxOutputTokens".into(), serde_json::json!(m));
    }
    if !gen.is_empty() {
        body["generationConfig"] = serde_json::Value::Object(gen);
    }
    body
}

/// Gemini adapter.
pub struct GoogleProvider {
    base_url: String,
    credentials: Arc<CredentialStore>,
    client: reqwest::Client,
    default_model: String,
    costs: (f64, f64),
}

impl GoogleProvider {
    pub fn new(credentials: Arc<CredentialStore>, client: reqwest::Client) -> Self {
        Self {
            base_url: DEFAULT_BASE.to_string(),
            credentials,
            client,
            default_model: "gemini-2.0-flash".into(),
            costs: (0.10, 0.40),
        }
    }

    async fn api_key(&self) -> ZekeResult<String> {
        self.credentials
            .get("google", CredentialKind::ApiKey)
            .await?
            .map(|c| c.value)
            .ok_or_else(|| ZekeError::Unauthorised {
                provider: "google".into(),
            })
    }

    fn model_for(&self, req: &ChatRequest) -> String {
        req.model.clone().unwrap_or_else(|| self.default_model())
    }
}

#[async_trait]
impl Provider for GoogleProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Google
    }

    fn default_model(&self) -> String {
        self.default_model.clone()
    }

    async fn complete(&self, req: &ChatRequest) -> ZekeResult<ChatResponse> {
        let key = self.api_key().await?;
        let model = self.model_for(req);
        let url = format!(
            "{}/models/{}:generateContent?key={}",
            self.base_url,
            model,
            urlencoding::encode(&key)
        );
        let started = Instant::now();
        let response = self
            .client
            .post(url)
            .json(&build_body(req))
            .send()
            .await
            .map_err(map_transport_error)?;
        let status = response.status();
        if !status.is_success() {
            let retry = retry_after_secs(&response);
            let text = response.text().await.unwrap_or_default();
            return Err(map_status_error(ProviderKind::Google, status, retry, &text));
        }
        let parsed: WireGenerateResponse = response
            .json()
            .await
            .map_err(|e| ZekeError::InvalidResponse(e.to_string()))?;
        let content = candidate_text(&parsed)?;
        let usage = parsed.usage.unwrap_or_default();
        Ok(ChatResponse {
            content,
            model,
            provider: "google".into(),
            tokens_in: usage.prompt_tokens,
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
        let key = self.api_key().await?;
        let model = self.model_for(req);
        let url = format!(
            "{}/models/{}:streamGenerateContent?alt=sse&key={}",
            self.base_url,
            model,
            urlencoding::encode(&key)
        );
        let started = Instant::now();
        let response = self
            .client
            .post(url)
            .json(&build_body(req))
            .send()
            .await
            .map_err(map_transport_error)?;
        let status = response.status();
        if !status.is_success() {
            let retry = retry_after_secs(&response);
            let text = response.text().await.unwrap_or_default();
            return Err(map_status_error(ProviderKind::Google, status, retry, &text));
        }

        let mut byte_stream = response.bytes_stream();
        let mut decoder = SseDecoder::new();
        let mut content = String::new();
        let mut usage = WireUsageMetadata::default();

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
                let parsed: WireGenerateResponse = serde_json::from_str(&json)
                    .map_err(|e| ZekeError::InvalidResponse(format!("stream chunk: {e}")))?;
                if let Some(ref u) = parsed.usage {
                    usage = u.clone();
                }
                let text = candidate_text(&parsed)?;
                if !text.is_empty() {
                    content.push_str(&text);
                    if tx.send(ChatDelta::text(stream_id, text)).await.is_err() {
                        return Err(ZekeError::Cancelled);
                    }
                }
            }
        }

        let _ = tx.send(ChatDelta::end(stream_id)).await;
        Ok(ChatResponse {
            content,
            model,
            provider: "google".into(),
            tokens_in: usage.prompt_tokens,
            tokens_out: usage.output_tokens,
            latency_ms: started.elapsed().as_millis() as u64,
            cached: false,
        })
    }

    async fn list_models(&self) -> ZekeResult<Vec<ModelRecord>> {
        let key = self.api_key().await?;
        let url = format!("{}/models?key={}", self.base_url, urlencoding::encode(&key));
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(map_transport_error)?;
        let status = response.status();
        if !status.is_success() {
            let retry = retry_after_secs(&response);
            let text = response.text().await.unwrap_or_default();
            return Err(map_status_error(ProviderKind::Google, status, retry, &text));
        }
        let list: WireModelList = response
            .json()
            .await
            .map_err(|e| ZekeError::InvalidResponse(e.to_string()))?;
        Ok(list
            .models
            .into_iter()
            .map(|entry| {
                let name = entry
                    .name
                    .strip_prefix("models/")
                    .unwrap_or(&entry.name)
                    .to_string();
                let mut rec =
                    ModelRecord::new("google", &name, entry.input_token_limit.unwrap_or(32_768))
                        .with_capabilities([
                            Capability::Code,
                            Capability::Chat,
                            Capability::Vision,
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
    fn assistant_role_becomes_model() {
        let req = ChatRequest {
            messages: vec![ChatMessage::user("q"), ChatMessage::assistant("a")],
            ..Default::default()
        };
        let body = build_body(&req);
        assert_eq!(body["contents"][1]["role"], serde_json::json!("model"));
    }

    #[test]
    fn system_becomes_system_instruction() {
        let req = ChatRequest {
            messages: vec![ChatMessage::system("short"), ChatMessage::user("q")],
            ..Default::default()
        };
        let body = build_body(&req);
        assert_eq!(
            body["systemInstruction"]["parts"][0]["text"],
            serde_json::json!("short")
        );
        assert_eq!(body["contents"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn safety_finish_reason_maps_to_content_filtered() {
        let resp: WireGenerateResponse = serde_json::from_str(
            r#"{"candidates":[{"finishReason":"SAFETY"}]}"#,
        )
        .unwrap();
        assert!(matches!(
            candidate_text(&resp),
            Err(ZekeError::ContentFiltered)
        ));
    }

    #[test]
    fn parts_concatenate_in_order() {
        let resp: WireGenerateResponse = serde_json::from_str(
            r#"{"candidates":[{"content":{"parts":[{"text":"foo"},{"text":"bar"}]}}]}"#,
        )
        .unwrap();
        assert_eq!(candidate_text(&resp).unwrap(), "foobar");
    }
}
