//! JSON-RPC method dispatch: every method the daemon serves, mapped onto
//! the router, the tool registry, the credential store, and the catalog.
//!
//! `chat.stream` answers immediately with the stream id and then emits
//! `stream.delta` notifications through the connection's outbound queue,
//! concluding with `stream.end`. Everything else is request/response.

use std::sync::Arc;

use serde_json::{json, Value};
use tokio::sync::mpsc;

use async_trait::async_trait;
use zeke::auth::{Credential, CredentialKind};
use zeke::chat::ChatRequest;
use zeke::protocol::{RpcRequest, RpcResponse};
use zeke::tools::{ApprovalDecision, ApprovalSet, Approver};
use zeke::{ZekeError, ZekeResult};

use crate::state::AppState;

/// Stands in for the terminal prompt over RPC: the editor already asked the
/// user and sends the outcome with the call. No outcome means deny.
struct ClientApprover(Option<ApprovalDecision>);

#[async_trait]
impl Approver for ClientApprover {
    async fn confirm(&self, _tool: &str, _summary: &str) -> ApprovalDecision {
        self.0.unwrap_or(ApprovalDecision::Deny)
    }
}

/// Per-connection context: session-scoped grants and the outbound frame
/// queue (a dedicated writer task drains it, keeping frame order).
pub struct ConnectionCtx {
    pub session_grants: ApprovalSet,
    pub outbound: mpsc::Sender<String>,
    pub project: String,
}

impl ConnectionCtx {
    pub fn new(outbound: mpsc::Sender<String>) -> Self {
        let project = std::env::current_dir()
            .map(|d| zeke::project_id(&d))
            .unwrap_or_else(|_| "default".to_string());
        Self {
            session_grants: ApprovalSet::new(),
            outbound,
            project,
        }
    }

    async fn notify(&self, method: &str, params: Value) {
        let frame = RpcRequest::notification(method, params);
        if let Ok(text) = serde_json::to_string(&frame) {
            let _ = self.outbound.send(text).await;
        }
    }
}

/// Dispatches one request. `None` when there is nothing for the caller to
/// send: notifications, and `chat.stream` (which queues its own response on
/// the outbound queue so it is ordered before the first `stream.delta`).
pub async fn dispatch(
    state: &Arc<AppState>,
    ctx: &Arc<ConnectionCtx>,
    req: RpcRequest,
) -> Option<RpcResponse> {
    let id = req.id.clone()?;
    if req.method == "chat.stream" {
        return match chat_stream(state, ctx, req.params, &id).await {
            Ok(()) => None,
            Err(e) => Some(RpcResponse::from_error(id, &e)),
        };
    }
    let result = route_method(state, ctx, &req.method, req.params).await;
    Some(match result {
        Ok(value) => RpcResponse::success(id, value),
        Err(e) => RpcResponse::from_error(id, &e),
    })
}

/// In-process entry point for the CLI's local backend: same routing as
/// [`dispatch`], but the real [`ZekeError`] comes back instead of an RPC
/// error envelope, so exit codes and messages survive intact. For
/// `chat.stream` the response and notifications still arrive in order on
/// the connection's outbound queue; the returned value is null.
pub async fn call_method(
    state: &Arc<AppState>,
    ctx: &Arc<ConnectionCtx>,
    method: &str,
    params: Value,
) -> ZekeResult<Value> {
    if method == "chat.stream" {
        chat_stream(state, ctx, params, &json!(1)).await?;
        return Ok(Value::Null);
    }
    route_method(state, ctx, method, params).await
}

async fn route_method(
    state: &Arc<AppState>,
    ctx: &Arc<ConnectionCtx>,
    method: &str,
    params: Value,
) -> ZekeResult<Value> {
    match method {
        "chat.complete" => chat_complete(state, ctx, params).await,
        "project.analyze" => project_analyze(params).await,
        "dependency.suggest" => dependency_suggest(params),
        "package.recommend" => package_recommend(params),
        "tool.list" => Ok(serde_json::to_value(state.tools.list())
            .map_err(|e| ZekeError::InvalidResponse(e.to_string()))?),
        "tool.execute" => tool_execute(state, ctx, params).await,
        "auth.status" => auth_status(state).await,
        "auth.set_key" => auth_set_key(state, params).await,
        "auth.logout" => auth_logout(state, params).await,
        "provider.list" => provider_list(state),
        "provider.status" => provider_status(state).await,
        "provider.test" => provider_test(state, params).await,
        "model.list" => model_list(state),
        "router.status" => router_status(state, ctx).await,
        "router.test" => router_test(state, ctx).await,
        "request.cancel" => request_cancel(state, params),
        other => Err(ZekeError::NotFound(format!("method: {other}"))),
    }
}

fn parse_chat_request(params: Value) -> ZekeResult<ChatRequest> {
    // Accept either a full ChatRequest or the short {prompt, ...} form.
    if let Some(prompt) = params.get("prompt").and_then(|p| p.as_str()) {
        let mut req = ChatRequest::from_prompt(prompt);
        if let Some(intent) = params.get("intent").and_then(|i| i.as_str()) {
            req.tags.intent = intent
                .parse()
                .map_err(ZekeError::InvalidArgument)?;
        }
        if let Some(complexity) = params.get("complexity") {
            req.tags.complexity = serde_json::from_value(complexity.clone())
                .map_err(|e| ZekeError::InvalidArgument(format!("complexity: {e}")))?;
        }
        if let Some(model) = params.get("model").and_then(|m| m.as_str()) {
            req.model = Some(model.to_string());
        }
        if let Some(provider) = params.get("provider").and_then(|p| p.as_str()) {
            req.provider = Some(provider.to_string());
        }
        if let Some(max_tokens) = params.get("max_tokens").and_then(|m| m.as_u64()) {
            req.max_tokens = Some(max_tokens as u32);
        }
        return Ok(req);
    }
    serde_json::from_value(params)
        .map_err(|e| ZekeError::InvalidArgument(format!("chat request: {e}")))
}

fn project_of(ctx: &ConnectionCtx, req: &ChatRequest) -> String {
    req.tags
        .project
        .clone()
        .unwrap_or_else(|| ctx.project.clone())
}

async fn chat_complete(
    state: &Arc<AppState>,
    ctx: &Arc<ConnectionCtx>,
    params: Value,
) -> ZekeResult<Value> {
    let req = parse_chat_request(params)?;
    let project = project_of(ctx, &req);
    let response = state.router.complete(&req, &project).await?;
    serde_json::to_value(response).map_err(|e| ZekeError::InvalidResponse(e.to_string()))
}

async fn chat_stream(
    state: &Arc<AppState>,
    ctx: &Arc<ConnectionCtx>,
    params: Value,
    request_id: &Value,
) -> ZekeResult<()> {
    let req = parse_chat_request(params)?;
    let project = project_of(ctx, &req);
    let stream_id = uuid::Uuid::new_v4().to_string();
    let cancel = state.track(&stream_id);

    // The response goes onto the outbound queue first, so the client sees
    // it before any delta for this stream.
    let response = RpcResponse::success(
        request_id.clone(),
        json!({ "stream_id": stream_id }),
    );
    if let Ok(text) = serde_json::to_string(&response) {
        let _ = ctx.outbound.send(text).await;
    }

    let (tx, mut rx) = mpsc::channel::<zeke::ChatDelta>(64);
    let stream_state = state.clone();
    let stream_ctx = ctx.clone();
    let task_id = stream_id.clone();
    tokio::spawn(async move {
        let run = stream_state
            .router
            .stream(&req, &project, &task_id, tx, cancel);
        let forward = async {
            let mut total = 0u32;
            while let Some(delta) = rx.recv().await {
                if delta.finished {
                    break;
                }
                total += 1;
                stream_ctx
                    .notify(
                        "stream.delta",
                        json!({"id": delta.id, "text": delta.delta, "finished": false}),
                    )
                    .await;
            }
            total
        };
        let (outcome, _) = tokio::join!(run, forward);
        match outcome {
            Ok(resp) => {
                stream_ctx
                    .notify(
                        "stream.end",
                        json!({
                            "id": task_id,
                            "total_tokens": resp.tokens_in + resp.tokens_out,
                        }),
                    )
                    .await;
            }
            Err(e) => {
                stream_ctx
                    .notify(
                        "stream.end",
                        json!({"id": task_id, "error": e.to_string(), "code": e.code_str()}),
                    )
                    .await;
            }
        }
        stream_state.untrack(&task_id);
    });

    Ok(())
}

async fn project_analyze(params: Value) -> ZekeResult<Value> {
    let path = std::path::PathBuf::from(
        params
            .get("path")
            .and_then(|p| p.as_str())
            .unwrap_or("."),
    );
    let analysis = tokio::task::spawn_blocking(move || {
        zeke::analyzer::analyze_project(&path, &zeke::analyzer::HeuristicScorer)
    })
    .await
    .map_err(|e| ZekeError::InvalidResponse(format!("analyze task: {e}")))??;
    serde_json::to_value(analysis).map_err(|e| ZekeError::InvalidResponse(e.to_string()))
}

/// Crates commonly reached for, by concern keyword. A static shortlist, not
/// a registry search.
const SUGGESTIONS: &[(&str, &[&str])] = &[
    ("http", &["reqwest", "axum", "hyper"]),
    ("serialization", &["serde", "serde_json", "toml"]),
    ("json", &["serde_json"]),
    ("async", &["tokio", "futures"]),
    ("cli", &["clap"]),
    ("database", &["rusqlite", "sqlx"]),
    ("sqlite", &["rusqlite"]),
    ("error", &["thiserror", "anyhow"]),
    ("logging", &["tracing", "tracing-subscriber"]),
    ("websocket", &["tokio-tungstenite", "axum"]),
    ("crypto", &["sha2", "base64"]),
    ("time", &["chrono"]),
    ("uuid", &["uuid"]),
];

fn suggestions_for(query: &str) -> Vec<&'static str> {
    let lowered = query.to_lowercase();
    let mut out = Vec::new();
    for (keyword, crates) in SUGGESTIONS {
        if lowered.contains(keyword) {
            for c in *crates {
                if !out.contains(c) {
                    out.push(*c);
                }
            }
        }
    }
    out
}

fn dependency_suggest(params: Value) -> ZekeResult<Value> {
    let query = params
        .get("query")
        .and_then(|q| q.as_str())
        .ok_or_else(|| ZekeError::InvalidArgument("missing query".into()))?;
    Ok(json!({ "query": query, "suggestions": suggestions_for(query) }))
}

fn package_recommend(params: Value) -> ZekeResult<Value> {
    let need = params
        .get("need")
        .and_then(|n| n.as_str())
        .ok_or_else(|| ZekeError::InvalidArgument("missing need".into()))?;
    let suggestions = suggestions_for(need);
    Ok(json!({
        "need": need,
        "recommendation": suggestions.first(),
        "alternatives": suggestions.get(1..).unwrap_or_default(),
    }))
}

async fn tool_execute(
    state: &Arc<AppState>,
    ctx: &Arc<ConnectionCtx>,
    params: Value,
) -> ZekeResult<Value> {
    let name = params
        .get("name")
        .and_then(|n| n.as_str())
        .ok_or_else(|| ZekeError::InvalidArgument("missing tool name".into()))?
        .to_string();
    let tool_params = params.get("params").cloned().unwrap_or(json!({}));

    // Editor clients do their own prompting and attach the outcome; an
    // `approve` of once/session/project stands in for the terminal prompt.
    let decision = match params.get("approve").and_then(|a| a.as_str()) {
        None => None,
        Some("once") => Some(ApprovalDecision::Once),
        Some("session") => Some(ApprovalDecision::Session),
        Some("project") => Some(ApprovalDecision::Project),
        Some(other) => {
            return Err(ZekeError::InvalidArgument(format!(
                "unknown approval scope: {other}"
            )))
        }
    };

    let result = state
        .tools
        .execute(
            &name,
            tool_params,
            &ctx.session_grants,
            &state.project_grants,
            &ClientApprover(decision),
        )
        .await?;
    serde_json::to_value(result).map_err(|e| ZekeError::InvalidResponse(e.to_string()))
}

async fn auth_status(state: &Arc<AppState>) -> ZekeResult<Value> {
    let metas = state.credentials.list()?;
    let now = chrono::Utc::now().timestamp();
    let entries: Vec<Value> = metas
        .iter()
        .map(|m| {
            json!({
                "provider": m.provider,
                "kind": m.kind,
                "expires_at": m.expires_at,
                "expired": m.expires_at.map(|t| t <= now).unwrap_or(false),
            })
        })
        .collect();
    Ok(json!({
        "backend": if state.credentials.uses_keyring() { "keyring" } else { "file" },
        "credentials": entries,
    }))
}

async fn auth_set_key(state: &Arc<AppState>, params: Value) -> ZekeResult<Value> {
    let provider = params
        .get("provider")
        .and_then(|p| p.as_str())
        .ok_or_else(|| ZekeError::InvalidArgument("missing provider".into()))?;
    let value = params
        .get("value")
        .and_then(|v| v.as_str())
        .ok_or_else(|| ZekeError::InvalidArgument("missing value".into()))?;
    state
        .credentials
        .set(provider, CredentialKind::ApiKey, Credential::new(value))
        .await?;
    Ok(json!({ "provider": provider, "stored": true }))
}

async fn auth_logout(state: &Arc<AppState>, params: Value) -> ZekeResult<Value> {
    let provider = params
        .get("provider")
        .and_then(|p| p.as_str())
        .ok_or_else(|| ZekeError::InvalidArgument("missing provider".into()))?;
    state.credentials.delete_provider(provider).await?;
    Ok(json!({ "provider": provider, "logged_out": true }))
}

fn provider_list(state: &Arc<AppState>) -> ZekeResult<Value> {
    let kinds: Vec<&str> = state
        .router
        .provider_kinds()
        .iter()
        .map(|k| k.as_str())
        .collect();
    Ok(json!({ "providers": kinds }))
}

async fn provider_status(state: &Arc<AppState>) -> ZekeResult<Value> {
    let mut statuses = Vec::new();
    for kind in state.router.provider_kinds() {
        let models = state.catalog.list_provider(kind.as_str());
        statuses.push(json!({
            "provider": kind.as_str(),
            "local": kind.is_local(),
            "models_cached": models.len(),
            "available": models.iter().any(|m| m.available) || models.is_empty(),
        }));
    }
    Ok(json!({ "providers": statuses }))
}

async fn provider_test(state: &Arc<AppState>, params: Value) -> ZekeResult<Value> {
    let name = params
        .get("provider")
        .and_then(|p| p.as_str())
        .ok_or_else(|| ZekeError::InvalidArgument("missing provider".into()))?;
    let kind: zeke::ProviderKind = name.parse().map_err(ZekeError::InvalidArgument)?;
    let provider = state
        .router
        .provider(kind)
        .ok_or_else(|| ZekeError::NotFound(format!("provider not configured: {name}")))?;
    let started = std::time::Instant::now();
    match tokio::time::timeout(std::time::Duration::from_secs(10), provider.list_models()).await
    {
        Ok(Ok(models)) => {
            for m in &models {
                state.catalog.upsert(m.clone());
                let _ = state.db.upsert_model(m.clone()).await;
            }
            Ok(json!({
                "provider": name,
                "ok": true,
                "models": models.len(),
                "latency_ms": started.elapsed().as_millis() as u64,
            }))
        }
        Ok(Err(e)) => Ok(json!({
            "provider": name,
            "ok": false,
            "error": e.to_string(),
            "code": e.code_str(),
        })),
        Err(_) => Ok(json!({
            "provider": name,
            "ok": false,
            "error": "probe timed out",
            "code": "timeout",
        })),
    }
}

fn model_list(state: &Arc<AppState>) -> ZekeResult<Value> {
    serde_json::to_value(state.catalog.list())
        .map_err(|e| ZekeError::InvalidResponse(e.to_string()))
}

async fn router_status(state: &Arc<AppState>, ctx: &Arc<ConnectionCtx>) -> ZekeResult<Value> {
    let prefs = state.router.db().get_prefs(&ctx.project).await?;
    let recent = state.router.db().recent_stats(&ctx.project, 10).await?;
    let spent = state.router.db().month_cost_cents(&ctx.project).await?;
    Ok(json!({
        "project": ctx.project,
        "mode": match state.router.config().mode {
            zeke::RouterMode::Direct => "direct",
            zeke::RouterMode::Proxy => "proxy",
            zeke::RouterMode::Auto => "auto",
        },
        "prefs": prefs,
        "month_cost_cents": spent,
        "recent": recent,
    }))
}

async fn router_test(state: &Arc<AppState>, ctx: &Arc<ConnectionCtx>) -> ZekeResult<Value> {
    let mut req = ChatRequest::from_prompt("Reply with the single word: pong");
    req.tags.intent = zeke::Intent::Completion;
    req.max_tokens = Some(8);
    let response = state.router.complete(&req, &ctx.project).await?;
    Ok(json!({
        "ok": !response.content.is_empty(),
        "provider": response.provider,
        "model": response.model,
        "latency_ms": response.latency_ms,
    }))
}

fn request_cancel(state: &Arc<AppState>, params: Value) -> ZekeResult<Value> {
    let id = params
        .get("id")
        .and_then(|i| i.as_str())
        .ok_or_else(|| ZekeError::InvalidArgument("missing request id".into()))?;
    Ok(json!({ "id": id, "cancelled": state.cancel(id) }))
}
