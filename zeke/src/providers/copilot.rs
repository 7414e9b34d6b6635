//! GitHub Copilot adapter: OpenAI-compatible bodies against the Copilot
//! editor endpoints, authenticated with the device-flow OAuth access token.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::auth::{CredentialKind, CredentialStore};
use crate::catalog::{Capability, ModelRecord};
use crate::chat::{ChatDelta, ChatRequest, ChatResponse};
use crate::error::{ZekeError, ZekeResult};
use crate::providers::openai::{
    check_finish_reason, WireBody, WireCompletion, WireStreamChunk, WireUsage,
};
use crate::providers::sse::{SseDecoder, SseEvent};
use crate::providers::{
    map_status_error, map_transport_error, retry_after_secs, user_agent, Provider, ProviderKind,
};

pub const EDITOR_BASE: &str = "https://api.githubcopilot.com";

/// Copilot adapter over the editor endpoint set.
pub struct CopilotProvider {
    base_url: String,
    credentials: Arc<CredentialStore>,
    client: reqwest::Client,
    default_model: String,
}

impl CopilotProvider {
    pub fn new(credentials: Arc<CredentialStore>, client: reqwest::Client) -> Self {
        Self {
            base_url: EDITOR_BASE.to_string(),
            credentials,
            client,
            default_model: "gpt-4o-copilot".into(),
        }
    }

    async fn access_token(&self) -> ZekeResult<String> {
        self.credentials
            .get("github", CredentialKind::OauthAccess)
            .await?
            .map(|c| c.value)
            .ok_or_else(|| ZekeError::Unauthorised {
                provider: "copilot".into(),
            })
    }

    fn request(&self, token: &str) -> reqwest::RequestBuilder {
        self.client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(token)
            .header("Editor-Version", user_agent())
            .header("Copilot-Integration-Id", "zeke-dev")
    }

    fn model_for(&self, req: &ChatRequest) -> String {
        req.model.clone().unwrap_or_else(|| self.default_model())
    }
}

#[async_trait]
impl Provider for CopilotProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Copilot
    }

    fn default_model(&self) -> String {
        self.default_model.clone()
    }

    async fn complete(&self, req: &ChatRequest) -> ZekeResult<ChatResponse> {
        let token = self.access_token().await?;
        let model = self.model_for(req);
        let body = WireBody::build(req, Some(model.clone()), false, false);
        let started = Instant::now();
        let response = self
            .request(&token)
            .json(&body)
            .send()
            .await
            .map_err(map_transport_error)?;
        let status = response.status();
        if !status.is_success() {
            let retry = retry_after_secs(&response);
            let text = response.text().await.unwrap_or_default();
            return Err(map_status_error(ProviderKind::Copilot, status, retry, &text));
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
            provider: "copilot".into(),
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
        let token = self.access_token().await?;
        let model = self.model_for(req);
        let body = WireBody::build(req, Some(model.clone()), true, false);
        let started = Instant::now();
        let response = self
            .request(&token)
            .json(&body)
            .send()
            .await
            .map_err(map_transport_error)?;
        let status = response.status();
        if !status.is_success() {
            let retry = retry_after_secs(&response);
            let text = response.text().await.unwrap_or_default();
            return Err(map_status_error(ProviderKind::Copilot, status, retry, &text));
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
                        let parsed: WireStreamChunk = serde_json::from_str(&json)
                            .map_err(|e| ZekeError::InvalidResponse(format!("stream chunk: {e}")))?;
                        if let Some(u) = parsed.usage {
                            usage = Some(u);
                        }
                        if let Some(text) = parsed
                            .choices
                            .into_iter()
                            .next()
                            .and_then(|c| c.delta.content)
                        {
                            if !text.is_empty() {
                                content.push_str(&text);
                                if tx.send(ChatDelta::text(stream_id, text)).await.is_err() {
                                    return Err(ZekeError::Cancelled);
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
            provider: "copilot".into(),
            tokens_in: usage.prompt_tokens,
            tokens_out: usage.completion_tokens,
            latency_ms: started.elapsed().as_millis() as u64,
            cached: false,
        })
    }

    async fn list_models(&self) -> ZekeResult<Vec<ModelRecord>> {
        // The editor endpoint has no public listing; the subscription grants
        // a fixed family.
        let _ = self.access_token().await?;
        Ok(vec![ModelRecord::new(
            "copilot",
            &self.default_model,
            128_000,
        )
        .with_capabilities([Capability::Code, Capability::Chat, Capability::Tools])
        .with_costs(0.0, 0.0)])
    }

    /// Flat-rate subscription; per-token cost is nil for budgeting purposes.
    fn cost_per_token(&self) -> (f64, f64) {
        (0.0, 0.0)
    }
}
