//! Azure OpenAI adapter. Same body format as the OpenAI family, but the
//! model is addressed by deployment in the URL, never in the JSON body, and
//! auth uses the `api-key` header.

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
    map_status_error, map_transport_error, retry_after_secs, Provider, ProviderKind,
};

pub const DEFAULT_API_VERSION: &str = "2024-02-15-preview";

/// Deployment coordinates. Resolved from `AZURE_OPENAI_*` env when absent.
#[derive(Clone, Debug)]
pub struct AzureConfig {
    /// Full endpoint, e.g. `https://myresource.openai.azure.com`. When not
    /// given, derived from `resource_name`.
    pub endpoint: Option<String>,
    pub resource_name: Option<String>,
    pub deployment_name: String,
    pub api_version: String,
}

impl AzureConfig {
    /// Reads the deployment coordinates from the environment. `None` when no
    /// deployment is configured.
    pub fn from_env() -> Option<Self> {
        let deployment = std::env::var("AZURE_OPENAI_DEPLOYMENT_NAME").ok()?;
        Some(Self {
            endpoint: std::env::var("AZURE_OPENAI_ENDPOINT").ok(),
            resource_name: std::env::var("AZURE_OPENAI_RESOURCE_NAME").ok(),
            deployment_name: deployment,
            api_version: std::env::var("AZURE_OPENAI_API_VERSION")
                .unwrap_or_else(|_| DEFAULT_API_VERSION.to_string()),
        })
    }

    /// `{endpoint}/openai/deployments/{deployment}/chat/completions?api-version={v}`
    pub fn completions_url(&self) -> ZekeResult<String> {
        let endpoint = match (&self.endpoint, &self.resource_name) {
            (Some(e), _) => e.trim_end_matches('/').to_string(),
            (None, Some(r)) => format!("https://{r}.openai.azure.com"),
            (None, None) => {
                return Err(ZekeError::InvalidArgument(
                    "azure requires endpoint or resource_name".into(),
                ))
            }
        };
        Ok(format!(
            "{endpoint}/openai/deployments/{}/chat/completions?api-version={}",
            urlencoding::encode(&self.deployment_name),
            urlencoding::encode(&self.api_version),
        ))
    }
}

/// Azure deployment adapter.
pub struct AzureProvider {
    config: AzureConfig,
    credentials: Arc<CredentialStore>,
    client: reqwest::Client,
    costs: (f64, f64),
}

impl AzureProvider {
    pub fn new(
        config: AzureConfig,
        credentials: Arc<CredentialStore>,
        client: reqwest::Client,
    ) -> Self {
        Self {
            config,
            credentials,
            client,
            costs: (2.50, 10.0),
        }
    }

    async fn api_key(&self) -> ZekeResult<String> {
        self.credentials
            .get("azure", CredentialKind::ApiKey)
            .await?
            .map(|c| c.value)
            .ok_or_else(|| ZekeError::Unauthorised {
                provider: "azure".into(),
            })
    }
}

#[async_trait]
impl Provider for AzureProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Azure
    }

    fn default_model(&self) -> String {
        self.config.deployment_name.clone()
    }

    async fn complete(&self, req: &ChatRequest) -> ZekeResult<ChatResponse> {
        let key = self.api_key().await?;
        let url = self.config.completions_url()?;
        // Model stays out of the body; the deployment in the URL decides.
        let body = WireBody::build(req, None, false, false);
        let started = Instant::now();

        let response = self
            .client
            .post(url)
            .header("api-key", key)
            .json(&body)
            .send()
            .await
            .map_err(map_transport_error)?;
        let status = response.status();
        if !status.is_success() {
            let retry = retry_after_secs(&response);
            let text = response.text().await.unwrap_or_default();
            return Err(map_status_error(ProviderKind::Azure, status, retry, &text));
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
            model: self.config.deployment_name.clone(),
            provider: "azure".into(),
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
        let key = self.api_key().await?;
        let url = self.config.completions_url()?;
        let body = WireBody::build(req, None, true, false);
        let started = Instant::now();

        let response = self
            .client
            .post(url)
            .header("api-key", key)
            .json(&body)
            .send()
            .await
            .map_err(map_transport_error)?;
        let status = response.status();
        if !status.is_success() {
            let retry = retry_after_secs(&response);
            let text = response.text().await.unwrap_or_default();
            return Err(map_status_error(ProviderKind::Azure, status, retry, &text));
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
            model: self.config.deployment_name.clone(),
            provider: "azure".into(),
            tokens_in: usage.prompt_tokens,
            tokens_out: usage.completion_tokens,
            latency_ms: started.elapsed().as_millis() as u64,
            cached: false,
        })
    }

    async fn list_models(&self) -> ZekeResult<Vec<ModelRecord>> {
        // Azure has no per-key listing endpoint worth probing; the deployment
        // itself is the catalog entry.
        Ok(vec![ModelRecord::new(
            "azure",
            &self.config.deployment_name,
            128_000,
        )
        .with_capabilities([Capability::Code, Capability::Chat, Capability::Tools])
        .with_costs(self.costs.0, self.costs.1)])
    }

    fn cost_per_token(&self) -> (f64, f64) {
        self.costs
    }
}
