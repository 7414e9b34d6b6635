//! WebSocket endpoint end-to-end: token gate, chat_request →
//! chat_start/chat_delta/stream_end, ping/pong.

use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::Message;

use serve::AppState;
use zeke::auth::CredentialStore;
use zeke::protocol::WsFrame;
use zeke::providers::{MockProvider, Provider, ProviderKind};
use zeke::router::db::RoutingDb;
use zeke::router::{RouterConfig, SmartRouter};
use zeke::tools::ToolRegistry;
use zeke::ModelCatalog;

const TOKEN: &str = "ws-test-token";

async fn start_ws(deltas: &[&str]) -> (tempfile::TempDir, String) {
    let dir = tempfile::tempdir().unwrap();
    let db = RoutingDb::open(dir.path().join("zeke.db")).unwrap();
    let catalog = Arc::new(ModelCatalog::new());
    let providers: Vec<Arc<dyn Provider>> = vec![Arc::new(MockProvider::responding(
        ProviderKind::Ollama,
        "qwen2.5-coder:7b",
        deltas,
    ))];
    let router = SmartRouter::new(providers, catalog.clone(), db.clone(), RouterConfig::default());
    let creds = Arc::new(CredentialStore::open_at(dir.path().join("creds.json")));
    let state = AppState::with_parts(router, ToolRegistry::new(), creds, catalog, db, TOKEN);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, serve::ws_router(state)).await.unwrap();
    });
    (dir, format!("ws://{addr}/ws"))
}

async fn next_frame(
    stream: &mut tokio_tungstenite::WebSocketStream<
        tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
    >,
) -> WsFrame {
    loop {
        match stream.next().await.expect("frame").expect("ws ok") {
            Message::Text(text) => return serde_json::from_str(&text).expect("ws frame json"),
            Message::Ping(_) | Message::Pong(_) => continue,
            other => panic!("unexpected message: {other:?}"),
        }
    }
}

#[tokio::test]
async fn chat_request_streams_start_deltas_end() {
    let (_dir, url) = start_ws(&["one ", "two"]).await;
    let (mut stream, _) = tokio_tungstenite::connect_async(format!("{url}?token={TOKEN}"))
        .await
        .unwrap();

    let request = serde_json::json!({
        "type": "chat_request",
        "id": "chat-1",
        "messages": [{"role": "user", "content": "count"}],
        "tags": {"intent": "code"},
    });
    stream
        .send(Message::Text(request.to_string().into()))
        .await
        .unwrap();

    loop {
        match next_frame(&mut stream).await {
            WsFrame::ChatStart { id, .. } => {
                assert_eq!(id, "chat-1");
                break;
            }
            WsFrame::Ping { .. } => continue,
            other => panic!("expected chat_start, got {other:?}"),
        }
    }
    let mut text = String::new();
    loop {
        match next_frame(&mut stream).await {
            WsFrame::ChatDelta { id, delta, .. } => {
                assert_eq!(id, "chat-1");
                text.push_str(&delta);
            }
            WsFrame::StreamEnd { id, total_tokens } => {
                assert_eq!(id, "chat-1");
                assert!(total_tokens.is_some());
                break;
            }
            WsFrame::Ping { .. } => continue,
            other => panic!("unexpected frame: {other:?}"),
        }
    }
    assert_eq!(text, "one two");
}

#[tokio::test]
async fn bad_token_is_rejected_at_upgrade() {
    let (_dir, url) = start_ws(&["x"]).await;
    let err = tokio_tungstenite::connect_async(format!("{url}?token=wrong")).await;
    assert!(err.is_err());
}

#[tokio::test]
async fn client_ping_gets_pong() {
    let (_dir, url) = start_ws(&["x"]).await;
    let (mut stream, _) = tokio_tungstenite::connect_async(format!("{url}?token={TOKEN}"))
        .await
        .unwrap();
    let ping = serde_json::json!({"type": "ping", "ts": 123});
    stream
        .send(Message::Text(ping.to_string().into()))
        .await
        .unwrap();
    match next_frame(&mut stream).await {
        WsFrame::Pong { ts } => assert_eq!(ts, 123),
        other => panic!("expected pong, got {other:?}"),
    }
}
