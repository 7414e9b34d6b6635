//! Ollama native adapter. No authentication; endpoint defaults to
//! `http://localhost:11434` and is overridable via `ZEKE_OLLAMA_ENDPOINT`.
//!
//! `complete` targets `/api/generate` with `stream: false`; streaming uses
//! the same endpoint with newline-delimited JSON rather than SSE.

use std::time::Instant;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::catalog::{Capability, ModelRecord};
use crate::chat::{ChatDelta, ChatRequest, ChatResponse, Role};
use crate::error::{ZekeError, ZekeResult};
use crate::providers::{
    map_status_error, map_transport_error, retry_after_secs, Provider, ProviderKind,
};

pub const DEFAULT_ENDPOINT: &str = "http://localhost:11434";

#[derive(Deserialize)]
struct WireGenerateResponse {
    #[serde(default)]
    response: String,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    prompt_eval_count: Option<u32>,
    #[serde(default)]
    eval_count: Option<u32>,
}

#[derive(Deserialize)]
struct WireTags {
    #[serde(default)]
    models: Vec<WireTagModel>,
}

#[derive(Deserialize)]
struct WireTagModel {
    name: String,
    #[serde(default)]
    details: Option<WireTagDetails>,
}

#[derive(Deserialize)]
struct WireTagDetails {
    #[serde(default)]
    parameter_size: Option<String>,
    #[serde(default)]
    quantization_level: Option<String>,
    #[serde(default)]
    family: Option<String>,
}

/// Flattens the message history into one prompt for `/api/generate`.
fn flatten_prompt(req: &ChatRequest) -> String {
    let mut prompt = String::new();
    for m in &req.messages {
        match m.role {
            Role::System => {
                prompt.push_str(&m.content);
                prompt.push_str("\n\n");
            }
            Role::User => {
                prompt.push_str(&m.content);
                prompt.push('\n');
            }
            Role::Assistant => {
                prompt.push_str(&m.content);
                prompt.push('\n');
            }
        }
    }
    prompt.trim_end().to_string()
}

/// Ollama adapter.
pub struct OllamaProvider {
    endpoint: String,
    client: reqwest::Client,
    default_model: String,
}

impl OllamaProvider {
    pub fn new(client: reqwest::Client) -> Self {
        let endpoint = std::env::var("ZEKE_OLLAMA_ENDPOINT")
            .unwrap_or_else(|_| DEFAULT_ENDPOINT.to_string());
        Self {
            endpoint: endpoint.trim_end_matches('/').to_string(),
            client,
            default_model: "qwen2.5-coder:7b".into(),
        }
    }

    pub fn with_endpoint(client: reqwest::Client, endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            client,
            default_model: "qwen2.5-coder:7b".into(),
        }
    }

    fn body(&self, req: &ChatRequest, stream: bool) -> serde_json::Value {
        let mut body = serde_json::json!({
            "model": req.model.clone().unwrap_or_else(|| self.default_model()),
            "prompt": flatten_prompt(req),
            "stream": stream,
        });
        if let Some(t) = req.temperature {
            body["options"] = serde_json::json!({ "temperature": t });
        }
        body
    }
}

#[async_trait]
impl Provider for OllamaProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Ollama
    }

    fn default_model(&self) -> String {
        self.default_model.clone()
    }

    async fn complete(&self, req: &ChatRequest) -> ZekeResult<ChatResponse> {
        let model = req.model.clone().unwrap_or_else(|| self.default_model());
        let started = Instant::now();
        let response = self
            .client
            .post(format!("{}/api/generate", self.endpoint))
            .json(&self.body(req, false))
            .send()
            .await
            .map_err(map_transport_error)?;
        let status = response.status();
        if !status.is_success() {
            let retry = retry_after_secs(&response);
            let text = response.text().await.unwrap_or_default();
            return Err(map_status_error(ProviderKind::Ollama, status, retry, &text));
        }
        let parsed: WireGenerateResponse = response
            .json()
            .await
            .map_err(|e| ZekeError::InvalidResponse(e.to_string()))?;
        Ok(ChatResponse {
            content: parsed.response,
            model,
            provider: "ollama".into(),
            tokens_in: parsed.prompt_eval_count.unwrap_or(0),
            tokens_out: parsed.eval_count.unwrap_or(0),
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
        let model = req.model.clone().unwrap_or_else(|| self.default_model());
        let started = Instant::now();
        let response = self
            .client
            .post(format!("{}/api/generate", self.endpoint))
            .json(&self.body(req, true))
            .send()
            .await
            .map_err(map_transport_error)?;
        let status = response.status();
        if !status.is_success() {
            let retry = retry_after_secs(&response);
            let text = response.text().await.unwrap_or_default();
            return Err(map_status_error(ProviderKind::Ollama, status, retry, &text));
        }

        let mut byte_stream = response.bytes_stream();
        let mut buf = String::new();
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
            buf.push_str(&String::from_utf8_lossy(&chunk));
            // NDJSON: one generate response per line.
            while let Some(pos) = buf.find('\n') {
                let line: String = buf.drain(..=pos).collect();
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                let parsed: WireGenerateResponse = serde_json::from_str(line)
                    .map_err(|e| ZekeError::InvalidResponse(format!("stream line: {e}")))?;
                if !parsed.response.is_empty() {
                    content.push_str(&parsed.response);
                    if tx
                        .send(ChatDelta::text(stream_id, parsed.response))
                        .await
                        .is_err()
                    {
                        return Err(ZekeError::Cancelled);
                    }
                }
                if parsed.done {
                    tokens_in = parsed.prompt_eval_count.unwrap_or(0);
                    tokens_out = parsed.eval_count.unwrap_or(0);
                    break 'read;
                }
            }
        }

        let _ = tx.send(ChatDelta::end(stream_id)).await;
        Ok(ChatResponse {
            content,
            model,
            provider: "ollama".into(),
            tokens_in,
            tokens_out,
            latency_ms: started.elapsed().as_millis() as u64,
            cached: false,
        })
    }

    async fn list_models(&self) -> ZekeResult<Vec<ModelRecord>> {
        let response = self
            .client
            .get(format!("{}/api/tags", self.endpoint))
            .send()
            .await
            .map_err(map_transport_error)?;
        let status = response.status();
        if !status.is_success() {
            let retry = retry_after_secs(&response);
            let text = response.text().await.unwrap_or_default();
            return Err(map_status_error(ProviderKind::Ollama, status, retry, &text));
        }
        let tags: WireTags = response
            .json()
            .await
            .map_err(|e| ZekeError::InvalidResponse(e.to_string()))?;
        Ok(tags
            .models
            .into_iter()
            .map(|m| {
                let mut rec = ModelRecord::new("ollama", &m.name, 8192)
                    .with_capabilities([Capability::Code, Capability::Chat])
                    .with_costs(0.0, 0.0);
                if let Some(d) = m.details {
                    rec.parameter_size = d.parameter_size;
                    rec.quantization = d.quantization_level;
                    rec.family = d.family;
                }
                rec
            })
            .collect())
    }

    /// Local inference costs nothing per token.
    fn cost_per_token(&self) -> (f64, f64) {
        (0.0, 0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::ChatMessage;

    #[test]
    fn flatten_prompt_joins_roles_in_order() {
        let req = ChatRequest {
            messages: vec![
                ChatMessage::system("you are terse"),
                ChatMessage::user("write a test"),
            ],
            ..Default::default()
        };
        let p = flatten_prompt(&req);
        assert!(p.starts_with("you are terse"));
        assert!(p.ends_with("write a test"));
    }

    #[test]
    fn body_sets_stream_and_temperature_options() {
        let client = reqwest::Client::new();
        let p = OllamaProvider::with_endpoint(client, "http://localhost:11434/");
        let mut req = ChatRequest::from_prompt("hi");
        req.temperature = Some(0.2);
        let body = p.body(&req, false);
        assert_eq!(body["stream"], serde_json::json!(false));
        assert_eq!(body["options"]["temperature"], serde_json::json!(0.2));
        assert_eq!(body["model"], serde_json::json!("qwen2.5-coder:7b"));
    }

    #[test]
    fn tags_parse_model_details() {
        let tags: WireTags = serde_json::from_str(
            r#"{"models":[{"name":"qwen2.5-coder:7b",
                "details":{"parameter_size":"7.6B","quantization_level":"Q4_K_M","family":"qwen2"}}]}"#,
        )
        .unwrap();
        assert_eq!(tags.models[0].name, "qwen2.5-coder:7b");
        assert_eq!(
            tags.models[0]
                .details
                .as_ref()
                .unwrap()
                .parameter_size
                .as_deref(),
            Some("7.6B")
        );
    }
}
