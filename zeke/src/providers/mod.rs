//! Provider adapters: one per wire protocol family.
//!
//! The [`Provider`] trait is the polymorphic seam the router dispatches
//! through. Adapters are shared and immutable after construction; each
//! in-flight request exclusively owns its HTTP connection so cancellation
//! can drop it without side effects on other requests.
//!
//! Streaming is push-shaped: `stream` sends [`ChatDelta`]s through a channel
//! as they arrive and still returns the complete [`ChatResponse`] at the
//! end (the RPC server converts push to its own framing when bridging).

mod anthropic;
mod azure;
mod copilot;
mod google;
mod mock;
mod ollama;
mod openai;
pub mod sse;

pub use anthropic::AnthropicProvider;
pub use azure::{AzureConfig, AzureProvider};
pub use copilot::CopilotProvider;
pub use google::GoogleProvider;
pub use mock::{MockBehavior, MockProvider};
pub use ollama::OllamaProvider;
pub use openai::OpenAiCompatibleProvider;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::catalog::ModelRecord;
use crate::chat::{ChatDelta, ChatRequest, ChatResponse};
use crate::error::{ZekeError, ZekeResult};

/// Provider families Zeke can route to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Openai,
    Azure,
    Anthropic,
    Google,
    Xai,
    Ollama,
    Copilot,
    /// OpenAI-compatible aggregating proxy; receives the `tags` object.
    Proxy,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::Openai => "openai",
            ProviderKind::Azure => "azure",
            ProviderKind::Anthropic => "anthropic",
            ProviderKind::Google => "google",
            ProviderKind::Xai => "xai",
            ProviderKind::Ollama => "ollama",
            ProviderKind::Copilot => "copilot",
            ProviderKind::Proxy => "proxy",
        }
    }

    /// True for providers that run on this machine (no per-token cost).
    pub fn is_local(&self) -> bool {
        matches!(self, ProviderKind::Ollama)
    }
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ProviderKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "openai" => Ok(ProviderKind::Openai),
            "azure" => Ok(ProviderKind::Azure),
            "anthropic" | "claude" => Ok(ProviderKind::Anthropic),
            "google" | "gemini" => Ok(ProviderKind::Google),
            "xai" | "grok" => Ok(ProviderKind::Xai),
            "ollama" => Ok(ProviderKind::Ollama),
            "copilot" | "github" => Ok(ProviderKind::Copilot),
            "proxy" => Ok(ProviderKind::Proxy),
            _ => Err(format!("unknown provider: {s}")),
        }
    }
}

/// One provider adapter. Instances are `Arc`-shared by the router and must
/// not hold locks across awaits.
#[async_trait]
pub trait Provider: Send + Sync {
    fn kind(&self) -> ProviderKind;

    /// Model used when the request does not pin one.
    fn default_model(&self) -> String;

    /// One-shot completion. `req.model` has been resolved by the router.
    async fn complete(&self, req: &ChatRequest) -> ZekeResult<ChatResponse>;

    /// Streaming completion: pushes deltas through `tx` in arrival order and
    /// returns the assembled response. Implementations check `cancel`
    /// between reads and stop promptly, dropping the upstream connection.
    async fn stream(
        &self,
        req: &ChatRequest,
        stream_id: &str,
        tx: mpsc::Sender<ChatDelta>,
        cancel: &CancellationToken,
    ) -> ZekeResult<ChatResponse>;

    /// Queries the provider's listing endpoint for catalog records.
    async fn list_models(&self) -> ZekeResult<Vec<ModelRecord>>;

    /// `(input, output)` cost per 1k tokens for the default model.
    fn cost_per_token(&self) -> (f64, f64);

    /// Advertised rate limit `(requests/min, tokens/min)` when known.
    fn rate_limit(&self) -> Option<(u32, u32)> {
        None
    }
}

/// User agent sent on every outbound provider request.
pub fn user_agent() -> String {
    format!("zeke/{}", env!("CARGO_PKG_VERSION"))
}

/// Shared HTTP client: connect timeout 5 s, Zeke user agent, no overall
/// timeout (per-request deadlines are applied by callers so streams can run
/// long).
pub fn http_client(connect_timeout: std::time::Duration) -> ZekeResult<reqwest::Client> {
    reqwest::Client::builder()
        .connect_timeout(connect_timeout)
        .user_agent(user_agent())
        .build()
        .map_err(|e| ZekeError::Network(e.to_string()))
}

/// Maps a transport-level reqwest failure into the error taxonomy.
pub(crate) fn map_transport_error(e: reqwest::Error) -> ZekeError {
    if e.is_timeout() {
        ZekeError::Timeout("http request".into())
    } else {
        ZekeError::Network(e.to_string())
    }
}

/// Maps a non-success HTTP status plus body excerpt into the taxonomy.
/// Body sniffing covers the two 400-class conditions providers signal in
/// prose rather than status codes.
pub(crate) fn map_status_error(
    kind: ProviderKind,
    status: reqwest::StatusCode,
    retry_after: Option<u64>,
    body: &str,
) -> ZekeError {
    let excerpt: String = body.chars().take(200).collect();
    match status.as_u16() {
        401 | 403 => ZekeError::Unauthorised {
            provider: kind.as_str().to_string(),
        },
        429 => ZekeError::RateLimited { retry_after },
        400 | 413 if body.contains("context_length") || body.contains("maximum context") => {
            ZekeError::ContextLengthExceeded
        }
        400 if body.contains("content_filter") || body.contains("content_policy") => {
            ZekeError::ContentFiltered
        }
        s if s >= 500 => ZekeError::Server {
            status: s,
            excerpt,
        },
        s => ZekeError::Server {
            status: s,
            excerpt,
        },
    }
}

/// Reads `Retry-After` seconds from a response, when present and numeric.
pub(crate) fn retry_after_secs(response: &reqwest::Response) -> Option<u64> {
    response
        .headers()
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_kind_round_trips() {
        for kind in [
            ProviderKind::Openai,
            ProviderKind::Azure,
            ProviderKind::Anthropic,
            ProviderKind::Google,
            ProviderKind::Xai,
            ProviderKind::Ollama,
            ProviderKind::Copilot,
            ProviderKind::Proxy,
        ] {
            assert_eq!(kind.as_str().parse::<ProviderKind>().unwrap(), kind);
        }
    }

    #[test]
    fn friendly_aliases_parse() {
        assert_eq!("claude".parse::<ProviderKind>().unwrap(), ProviderKind::Anthropic);
        assert_eq!("grok".parse::<ProviderKind>().unwrap(), ProviderKind::Xai);
        assert_eq!("github".parse::<ProviderKind>().unwrap(), ProviderKind::Copilot);
    }

    #[test]
    fn only_ollama_is_local() {
        assert!(ProviderKind::Ollama.is_local());
        assert!(!ProviderKind::Openai.is_local());
        assert!(!ProviderKind::Proxy.is_local());
    }

    #[test]
    fn status_401_maps_to_unauthorised() {
        let e = map_status_error(
            ProviderKind::Openai,
            reqwest::StatusCode::UNAUTHORIZED,
            None,
            "",
        );
        assert!(matches!(e, ZekeError::Unauthorised { .. }));
    }

    #[test]
    fn status_429_carries_retry_after() {
        let e = map_status_error(
            ProviderKind::Xai,
            reqwest::StatusCode::TOO_MANY_REQUESTS,
            Some(12),
            "",
        );
        assert!(matches!(
            e,
            ZekeError::RateLimited {
                retry_after: Some(12)
            }
        ));
    }

    #[test]
    fn context_length_sniffed_from_body() {
        let e = map_status_error(
            ProviderKind::Openai,
            reqwest::StatusCode::BAD_REQUEST,
            None,
            r#"{"error":{"code":"context_length_exceeded"}}"#,
        );
        assert!(matches!(e, ZekeError::ContextLengthExceeded));
    }

    #[test]
    fn five_hundreds_map_to_server_error() {
        let e = map_status_error(
            ProviderKind::Google,
            reqwest::StatusCode::BAD_GATEWAY,
            None,
            "upstream unavailable",
        );
        assert!(matches!(e, ZekeError::Server { status: 502, .. }));
    }
}
