//! RPC server end-to-end over a real TCP socket: framing detection, the
//! auth handshake, request dispatch, streaming notifications, tools.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, BufReader};
use tokio::net::TcpStream;

use serve::{run_rpc, AppState, RpcListener};
use zeke::auth::CredentialStore;
use zeke::protocol::{Framing, RpcRequest, RpcResponse};
use zeke::providers::{MockProvider, Provider, ProviderKind};
use zeke::router::db::RoutingDb;
use zeke::router::{RouterConfig, SmartRouter};
use zeke::tools::analyze::ProjectAnalyzeTool;
use zeke::tools::file_edit::FileEditTool;
use zeke::tools::ToolRegistry;
use zeke::ModelCatalog;

const TOKEN: &str = "test-token";

async fn start_server(deltas: &[&str]) -> (tempfile::TempDir, std::net::SocketAddr) {
    let dir = tempfile::tempdir().unwrap();
    let db = RoutingDb::open(dir.path().join("zeke.db")).unwrap();
    let catalog = Arc::new(ModelCatalog::new());
    let providers: Vec<Arc<dyn Provider>> = vec![Arc::new(MockProvider::responding(
        ProviderKind::Ollama,
        "qwen2.5-coder:7b",
        deltas,
    ))];
    let router = SmartRouter::new(providers, catalog.clone(), db.clone(), RouterConfig::default());

    let mut tools = ToolRegistry::new();
    tools.register(FileEditTool::new(None, dir.path().join("backups")));
    tools.register(ProjectAnalyzeTool::new());

    let creds = Arc::new(CredentialStore::open_at(dir.path().join("creds.json")));
    let state = AppState::with_parts(router, tools, creds, catalog, db, TOKEN);

    let listener = RpcListener::bind_tcp(0).await.unwrap();
    let addr: std::net::SocketAddr = listener.describe().parse().unwrap();
    tokio::spawn(run_rpc(listener, state));
    (dir, addr)
}

struct Client {
    reader: BufReader<tokio::net::tcp::OwnedReadHalf>,
    writer: tokio::net::tcp::OwnedWriteHalf,
    framing: Framing,
    next_id: i64,
}

impl Client {
    async fn connect(addr: std::net::SocketAddr, framing: Framing, token: &str) -> Self {
        let stream = TcpStream::connect(addr).await.unwrap();
        let (read, writer) = stream.into_split();
        let mut client = Self {
            reader: BufReader::new(read),
            writer,
            framing,
            next_id: 0,
        };
        client
            .send("auth.hello", serde_json::json!({"token": token}))
            .await;
        client
    }

    async fn send(&mut self, method: &str, params: serde_json::Value) -> i64 {
        self.next_id += 1;
        let req = RpcRequest::new(self.next_id, method, params);
        self.framing
            .write_frame(&mut self.writer, &serde_json::to_vec(&req).unwrap())
            .await
            .unwrap();
        self.next_id
    }

    async fn read_frame(&mut self) -> Option<serde_json::Value> {
        let frame = tokio::time::timeout(
            Duration::from_secs(5),
            self.framing.read_frame(&mut self.reader),
        )
        .await
        .ok()?
        .ok()??;
        serde_json::from_slice(&frame).ok()
    }

    /// Reads frames until the response with the given id arrives; returns
    /// `(response, notifications seen before it)`.
    async fn read_response(&mut self, id: i64) -> (RpcResponse, Vec<serde_json::Value>) {
        let mut notifications = Vec::new();
        loop {
            let value = self.read_frame().await.expect("frame before timeout");
            if value.get("id").map(|v| v == &serde_json::json!(id)) == Some(true) {
                return (serde_json::from_value(value).unwrap(), notifications);
            }
            notifications.push(value);
        }
    }
}

#[tokio::test]
async fn handshake_then_chat_complete_line_framing() {
    let (_dir, addr) = start_server(&["hi ", "there"]).await;
    let mut client = Client::connect(addr, Framing::LineDelimited, TOKEN).await;
    let (hello, _) = client.read_response(1).await;
    assert!(hello.result.unwrap()["ok"].as_bool().unwrap());

    let id = client
        .send(
            "chat.complete",
            serde_json::json!({"prompt": "hello", "intent": "code"}),
        )
        .await;
    let (resp, _) = client.read_response(id).await;
    let result = resp.result.unwrap();
    assert_eq!(result["provider"], serde_json::json!("ollama"));
    assert_eq!(result["model"], serde_json::json!("qwen2.5-coder:7b"));
    assert_eq!(result["content"], serde_json::json!("hi there"));
}

#[tokio::test]
async fn wrong_token_is_rejected() {
    let (_dir, addr) = start_server(&["x"]).await;
    let stream = TcpStream::connect(addr).await.unwrap();
    let (read, mut writer) = stream.into_split();
    let mut reader = BufReader::new(read);

    let req = RpcRequest::new(1, "auth.hello", serde_json::json!({"token": "wrong"}));
    Framing::LineDelimited
        .write_frame(&mut writer, &serde_json::to_vec(&req).unwrap())
        .await
        .unwrap();

    // Server answers with an auth failure and closes.
    let frame = Framing::LineDelimited
        .read_frame(&mut reader)
        .await
        .unwrap()
        .unwrap();
    let resp: RpcResponse = serde_json::from_slice(&frame).unwrap();
    assert_eq!(resp.error.unwrap().code, -32002);
    let mut rest = Vec::new();
    let n = reader.read_to_end(&mut rest).await.unwrap();
    assert_eq!(n, 0);
}

#[tokio::test]
async fn first_frame_selects_length_prefixed_framing() {
    let (_dir, addr) = start_server(&["ok"]).await;
    let mut client = Client::connect(addr, Framing::LengthPrefixed, TOKEN).await;
    let (hello, _) = client.read_response(1).await;
    assert!(hello.error.is_none());

    let id = client.send("tool.list", serde_json::json!({})).await;
    let (resp, _) = client.read_response(id).await;
    let tools = resp.result.unwrap();
    let names: Vec<&str> = tools
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|t| t["name"].as_str())
        .collect();
    assert!(names.contains(&"file_write"));
    assert!(names.contains(&"project_analyze"));
}

#[tokio::test]
async fn chat_stream_emits_ordered_deltas_then_end() {
    let (_dir, addr) = start_server(&["a", "b", "c"]).await;
    let mut client = Client::connect(addr, Framing::LineDelimited, TOKEN).await;
    client.read_response(1).await;

    let id = client
        .send(
            "chat.stream",
            serde_json::json!({"prompt": "stream it", "intent": "code"}),
        )
        .await;
    let (resp, _) = client.read_response(id).await;
    let stream_id = resp.result.unwrap()["stream_id"]
        .as_str()
        .unwrap()
        .to_string();

    let mut texts = Vec::new();
    loop {
        let frame = client.read_frame().await.expect("stream frame");
        match frame["method"].as_str() {
            Some("stream.delta") => {
                assert_eq!(frame["params"]["id"].as_str(), Some(stream_id.as_str()));
                texts.push(frame["params"]["text"].as_str().unwrap().to_string());
            }
            Some("stream.end") => {
                assert_eq!(frame["params"]["id"].as_str(), Some(stream_id.as_str()));
                assert!(frame["params"]["error"].is_null());
                break;
            }
            other => panic!("unexpected frame: {other:?}"),
        }
    }
    assert_eq!(texts, vec!["a", "b", "c"]);
}

#[tokio::test]
async fn tool_execute_writes_file_with_approval() {
    let (dir, addr) = start_server(&["x"]).await;
    let mut client = Client::connect(addr, Framing::LineDelimited, TOKEN).await;
    client.read_response(1).await;

    let target = dir.path().join("hello.txt");
    let id = client
        .send(
            "tool.execute",
            serde_json::json!({
                "name": "file_write",
                "approve": "once",
                "params": {
                    "path": target.to_string_lossy(),
                    "content": "written over rpc",
                    "create_backup": false,
                }
            }),
        )
        .await;
    let (resp, _) = client.read_response(id).await;
    assert!(resp.error.is_none(), "{:?}", resp.error);
    assert_eq!(std::fs::read_to_string(&target).unwrap(), "written over rpc");

    // Without approval the same call is declined before any side effect.
    let id = client
        .send(
            "tool.execute",
            serde_json::json!({
                "name": "file_write",
                "params": {
                    "path": dir.path().join("denied.txt").to_string_lossy(),
                    "content": "nope",
                }
            }),
        )
        .await;
    let (resp, _) = client.read_response(id).await;
    assert!(resp.error.is_some());
    assert!(!dir.path().join("denied.txt").exists());
}

#[tokio::test]
async fn unknown_method_is_not_found() {
    let (_dir, addr) = start_server(&["x"]).await;
    let mut client = Client::connect(addr, Framing::LineDelimited, TOKEN).await;
    client.read_response(1).await;

    let id = client.send("no.such.method", serde_json::json!({})).await;
    let (resp, _) = client.read_response(id).await;
    assert_eq!(resp.error.unwrap().code, -32001);
}
