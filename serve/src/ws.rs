//! WebSocket streaming endpoint for editor plugins (axum + ws).
//!
//! Clients authenticate with the lock-file bearer token (query `token` or
//! `Authorization` header), then send `chat_request` frames; the server
//! answers with `chat_start`, `chat_delta`* and `stream_end`/`error`. A
//! heartbeat pings every 30 s and closes after two missed pongs.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use tokio::sync::mpsc;

use zeke::protocol::WsFrame;

use crate::dispatch::ConnectionCtx;
use crate::state::AppState;

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
const MAX_MISSED_PONGS: u32 = 2;

pub fn router(state: Arc<AppState>) -> Router {
    Router::new().route("/ws", get(ws_handler)).with_state(state)
}

#[derive(serde::Deserialize, Default)]
struct WsQuery {
    token: Option<String>,
}

fn bearer_from(headers: &HeaderMap) -> Option<String> {
    headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(String::from)
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Query(query): Query<WsQuery>,
    headers: HeaderMap,
) -> Response {
    let presented = query.token.or_else(|| bearer_from(&headers));
    if presented.as_deref() != Some(state.auth_token.as_str()) {
        tracing::warn!("ws connection rejected: bad token");
        return StatusCode::UNAUTHORIZED.into_response();
    }
    ws.on_upgrade(move |socket| handle_ws(socket, state))
}

async fn handle_ws(mut socket: WebSocket, state: Arc<AppState>) {
    let client_id = uuid::Uuid::new_v4().to_string();
    state
        .ws_clients
        .lock()
        .expect("ws clients poisoned")
        .insert(client_id.clone(), chrono::Utc::now().timestamp());

    let (out_tx, mut out_rx) = mpsc::channel::<WsFrame>(64);
    let ctx = Arc::new(ConnectionCtx::new(mpsc::channel(1).0));
    // First ping one interval after connect, then every interval.
    let mut heartbeat = tokio::time::interval_at(
        tokio::time::Instant::now() + HEARTBEAT_INTERVAL,
        HEARTBEAT_INTERVAL,
    );
    heartbeat.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let mut missed_pongs: u32 = 0;

    loop {
        tokio::select! {
            _ = heartbeat.tick() => {
                if missed_pongs >= MAX_MISSED_PONGS {
                    tracing::debug!("ws client {client_id}: missed pongs, closing");
                    break;
                }
                missed_pongs += 1;
                let ping = WsFrame::Ping { ts: chrono::Utc::now().timestamp_millis() };
                if send_frame(&mut socket, &ping).await.is_err() {
                    break;
                }
            }
            outgoing = out_rx.recv() => {
                match outgoing {
                    Some(frame) => {
                        if send_frame(&mut socket, &frame).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
            incoming = socket.recv() => {
                let Some(Ok(message)) = incoming else { break };
                let text = match message {
                    Message::Text(t) => t.to_string(),
                    Message::Binary(b) => String::from_utf8_lossy(&b).into_owned(),
                    Message::Close(_) => break,
                    _ => continue,
                };
                match serde_json::from_str::<WsFrame>(&text) {
                    Ok(WsFrame::Pong { .. }) => {
                        missed_pongs = 0;
                    }
                    Ok(WsFrame::Ping { ts }) => {
                        let _ = send_frame(&mut socket, &WsFrame::Pong { ts }).await;
                    }
                    Ok(WsFrame::ChatRequest { id, request }) => {
                        spawn_chat(state.clone(), ctx.clone(), out_tx.clone(), id, request);
                    }
                    Ok(other) => {
                        tracing::debug!("ws client sent server-side frame: {other:?}");
                    }
                    Err(e) => {
                        let frame = WsFrame::Error {
                            id: String::new(),
                            error: format!("parse error: {e}"),
                            code: Some("invalid_argument".into()),
                        };
                        if send_frame(&mut socket, &frame).await.is_err() {
                            break;
                        }
                    }
                }
            }
        }
    }

    state
        .ws_clients
        .lock()
        .expect("ws clients poisoned")
        .remove(&client_id);
}

async fn send_frame(socket: &mut WebSocket, frame: &WsFrame) -> Result<(), axum::Error> {
    let text = serde_json::to_string(frame).unwrap_or_else(|_| {
        r#"{"type":"error","id":"","error":"serialization error"}"#.to_string()
    });
    socket.send(Message::Text(text.into())).await
}

/// Runs one chat stream, pushing frames into the connection's outbound
/// queue. Deltas keep adapter order because a single task forwards them.
fn spawn_chat(
    state: Arc<AppState>,
    ctx: Arc<ConnectionCtx>,
    out_tx: mpsc::Sender<WsFrame>,
    id: String,
    request: zeke::ChatRequest,
) {
    tokio::spawn(async move {
        let project = request
            .tags
            .project
            .clone()
            .unwrap_or_else(|| ctx.project.clone());
        let cancel = state.track(&id);
        let (tx, mut rx) = mpsc::channel::<zeke::ChatDelta>(64);

        let started = WsFrame::ChatStart {
            id: id.clone(),
            model: request.model.clone().unwrap_or_else(|| "auto".into()),
            provider: request.provider.clone().unwrap_or_else(|| "auto".into()),
        };
        let _ = out_tx.send(started).await;

        let run = state.router.stream(&request, &project, &id, tx, cancel);
        let forward = async {
            while let Some(delta) = rx.recv().await {
                if delta.finished {
                    break;
                }
                let frame = WsFrame::ChatDelta {
                    id: delta.id,
                    delta: delta.delta,
                    finished: false,
                };
                if out_tx.send(frame).await.is_err() {
                    break;
                }
            }
        };
        let (outcome, _) = tokio::join!(run, forward);

        let last = match outcome {
            Ok(resp) => WsFrame::StreamEnd {
                id: id.clone(),
                total_tokens: Some(resp.tokens_in + resp.tokens_out),
            },
            Err(e) => WsFrame::Error {
                id: id.clone(),
                error: e.to_string(),
                code: Some(e.code_str().into()),
            },
        };
        let _ = out_tx.send(last).await;
        state.untrack(&id);
    });
}
