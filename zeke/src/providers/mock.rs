//! Scripted provider for tests: fixed deltas, configurable delay before the
//! first token, and injectable failures. Constructed and passed to the
//! router through its normal constructor, never via global replacement.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::catalog::{Capability, ModelRecord};
use crate::chat::{ChatDelta, ChatRequest, ChatResponse};
use crate::error::{ZekeError, ZekeResult};
use crate::providers::{Provider, ProviderKind};

/// What the mock does when invoked.
pub enum MockBehavior {
    /// Stream the given deltas, then finish.
    Respond(Vec<String>),
    /// Sleep before the first delta, then respond. Exercises the hybrid
    /// first-token escalation path.
    Stall(Duration, Vec<String>),
    /// Fail with the produced error.
    Fail(Box<dyn Fn() -> ZekeError + Send + Sync>),
}

/// Scripted provider. `calls()` counts invocations across complete and
/// stream so tests can assert fallback behaviour.
pub struct MockProvider {
    kind: ProviderKind,
    model: String,
    behavior: Mutex<MockBehavior>,
    calls: AtomicUsize,
    costs: (f64, f64),
}

impl MockProvider {
    pub fn new(kind: ProviderKind, model: impl Into<String>, behavior: MockBehavior) -> Self {
        Self {
            kind,
            model: model.into(),
            behavior: Mutex::new(behavior),
            calls: AtomicUsize::new(0),
            costs: if kind.is_local() { (0.0, 0.0) } else { (1.0, 2.0) },
        }
    }

    pub fn responding(
        kind: ProviderKind,
        model: impl Into<String>,
        deltas: &[&str],
    ) -> Self {
        Self::new(
            kind,
            model,
            MockBehavior::Respond(deltas.iter().map(|s| s.to_string()).collect()),
        )
    }

    pub fn failing(
        kind: ProviderKind,
        model: impl Into<String>,
        make_err: impl Fn() -> ZekeError + Send + Sync + 'static,
    ) -> Self {
        Self::new(kind, model, MockBehavior::Fail(Box::new(make_err)))
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn plan(&self) -> Result<(Duration, Vec<String>), ZekeError> {
        let behavior = self.behavior.lock().expect("mock behavior poisoned");
        match &*behavior {
            MockBehavior::Respond(deltas) => Ok((Duration::ZERO, deltas.clone())),
            MockBehavior::Stall(delay, deltas) => Ok((*delay, deltas.clone())),
            MockBehavior::Fail(make) => Err(make()),
        }
    }

    fn response_from(&self, content: String, latency_ms: u64) -> ChatResponse {
        ChatResponse {
            tokens_in: 8,
            tokens_out: content.split_whitespace().count() as u32,
            content,
            model: self.model.clone(),
            provider: self.kind.as_str().to_string(),
            latency_ms,
            cached: false,
        }
    }
}

#[async_trait]
impl Provider for MockProvider {
    fn kind(&self) -> ProviderKind {
        self.kind
    }

    fn default_model(&self) -> String {
        self.model.clone()
    }

    async fn complete(&self, _req: &ChatRequest) -> ZekeResult<ChatResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let (delay, deltas) = self.plan()?;
        tokio::time::sleep(delay).await;
        Ok(self.response_from(deltas.concat(), delay.as_millis() as u64))
    }

    async fn stream(
        &self,
        _req: &ChatRequest,
        stream_id: &str,
        tx: mpsc::Sender<ChatDelta>,
        cancel: &CancellationToken,
    ) -> ZekeResult<ChatResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let (delay, deltas) = self.plan()?;
        tokio::select! {
            _ = cancel.cancelled() => return Err(ZekeError::Cancelled),
            _ = tokio::time::sleep(delay) => {}
        }
        let mut content = String::new();
        for d in deltas {
            if cancel.is_cancelled() {
                return Err(ZekeError::Cancelled);
            }
            content.push_str(&d);
            if tx.send(ChatDelta::text(stream_id, d)).await.is_err() {
                return Err(ZekeError::Cancelled);
            }
        }
        let _ = tx.send(ChatDelta::end(stream_id)).await;
        Ok(self.response_from(content, delay.as_millis() as u64))
    }

    async fn list_models(&self) -> ZekeResult<Vec<ModelRecord>> {
        Ok(vec![ModelRecord::new(
            self.kind.as_str(),
            &self.model,
            32_768,
        )
        .with_capabilities([
            Capability::Code,
            Capability::Chat,
            Capability::Reasoning,
        ])
        .with_costs(self.costs.0, self.costs.1)])
    }

    fn cost_per_token(&self) -> (f64, f64) {
        self.costs
    }
}
