//! JSON-RPC server over a Unix-domain socket or local TCP.
//!
//! The first client frame selects the framing (line-delimited or 4-byte
//! length prefix) and must be `auth.hello` carrying the lock-file token;
//! anything else closes the socket. One task per connection reads frames in
//! arrival order; a dedicated writer task drains the outbound queue so
//! responses and stream notifications never interleave mid-frame.

use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, BufReader};
use tokio::net::TcpListener;
#[cfg(unix)]
use tokio::net::UnixListener;
use tokio::sync::mpsc;

use zeke::protocol::{Framing, RpcRequest, RpcResponse};
use zeke::{ZekeError, ZekeResult};

use crate::dispatch::{dispatch, ConnectionCtx};
use crate::state::AppState;

/// Where the RPC server listens.
pub enum RpcListener {
    #[cfg(unix)]
    Unix(UnixListener),
    Tcp(TcpListener),
}

impl RpcListener {
    /// Binds a Unix socket at `path` (removing a stale file first).
    #[cfg(unix)]
    pub fn bind_unix(path: &std::path::Path) -> ZekeResult<Self> {
        if path.exists() {
            std::fs::remove_file(path)?;
        }
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Ok(RpcListener::Unix(UnixListener::bind(path)?))
    }

    /// Binds TCP on `127.0.0.1:<port>` (0 picks a free port).
    pub async fn bind_tcp(port: u16) -> ZekeResult<Self> {
        Ok(RpcListener::Tcp(
            TcpListener::bind(("127.0.0.1", port)).await?,
        ))
    }

    /// Human-readable address for the session lock file.
    pub fn describe(&self) -> String {
        match self {
            #[cfg(unix)]
            RpcListener::Unix(l) => l
                .local_addr()
                .ok()
                .and_then(|a| a.as_pathname().map(|p| p.display().to_string()))
                .unwrap_or_else(|| "unix".into()),
            RpcListener::Tcp(l) => l
                .local_addr()
                .map(|a| a.to_string())
                .unwrap_or_else(|_| "tcp".into()),
        }
    }

    pub fn tcp_port(&self) -> Option<u16> {
        match self {
            RpcListener::Tcp(l) => l.local_addr().ok().map(|a| a.port()),
            #[cfg(unix)]
            _ => None,
        }
    }
}

/// Accept loop. Runs until the listener errors or the task is aborted.
pub async fn run_rpc(listener: RpcListener, state: Arc<AppState>) -> ZekeResult<()> {
    match listener {
        #[cfg(unix)]
        RpcListener::Unix(l) => loop {
            let (stream, _) = l.accept().await?;
            let state = state.clone();
            tokio::spawn(async move {
                if let Err(e) = handle_connection(stream, state).await {
                    tracing::debug!("rpc connection ended: {e}");
                }
            });
        },
        RpcListener::Tcp(l) => loop {
            let (stream, peer) = l.accept().await?;
            tracing::debug!("rpc connection from {peer}");
            let state = state.clone();
            tokio::spawn(async move {
                if let Err(e) = handle_connection(stream, state).await {
                    tracing::debug!("rpc connection ended: {e}");
                }
            });
        },
    }
}

/// Serves one connection: framing detection, auth handshake, request loop.
pub async fn handle_connection<S>(stream: S, state: Arc<AppState>) -> ZekeResult<()>
where
    S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    let (read_half, mut write_half) = tokio::io::split(stream);
    let mut reader = BufReader::new(read_half);

    // First byte of the first frame picks the framing for the session.
    let first = reader.fill_buf().await?;
    let Some(&first_byte) = first.first() else {
        return Ok(());
    };
    let framing = Framing::detect(first_byte);

    // The handshake must come before anything else.
    let Some(frame) = framing.read_frame(&mut reader).await? else {
        return Ok(());
    };
    let hello: RpcRequest = serde_json::from_slice(&frame)
        .map_err(|e| ZekeError::InvalidArgument(format!("handshake frame: {e}")))?;
    let token = hello
        .params
        .get("token")
        .and_then(|t| t.as_str())
        .unwrap_or_default();
    if hello.method != "auth.hello" || token != state.auth_token {
        tracing::warn!("rpc connection rejected: bad handshake");
        if let Some(id) = hello.id {
            let resp = RpcResponse::failure(id, -32002, "authentication failed");
            let _ = framing
                .write_frame(&mut write_half, &serde_json::to_vec(&resp).unwrap_or_default())
                .await;
        }
        return Ok(());
    }

    let (out_tx, mut out_rx) = mpsc::channel::<String>(64);
    let ctx = Arc::new(ConnectionCtx::new(out_tx.clone()));

    if let Some(id) = hello.id {
        let resp = RpcResponse::success(id, serde_json::json!({"ok": true}));
        let _ = out_tx
            .send(serde_json::to_string(&resp).unwrap_or_default())
            .await;
    }

    // Writer: sole owner of the write half, keeps frames whole and ordered.
    let writer = tokio::spawn(async move {
        while let Some(text) = out_rx.recv().await {
            if framing
                .write_frame(&mut write_half, text.as_bytes())
                .await
                .is_err()
            {
                break;
            }
        }
    });

    // Per-connection messages process in arrival order.
    while let Some(frame) = framing.read_frame(&mut reader).await? {
        if frame.is_empty() {
            continue;
        }
        let request: RpcRequest = match serde_json::from_slice(&frame) {
            Ok(r) => r,
            Err(e) => {
                let resp = RpcResponse::failure(
                    serde_json::Value::Null,
                    -32700,
                    format!("parse error: {e}"),
                );
                let _ = out_tx
                    .send(serde_json::to_string(&resp).unwrap_or_default())
                    .await;
                continue;
            }
        };
        if let Some(response) = dispatch(&state, &ctx, request).await {
            let _ = out_tx
                .send(serde_json::to_string(&response).unwrap_or_default())
                .await;
        }
    }

    drop(out_tx);
    drop(ctx);
    let _ = writer.await;
    Ok(())
}

/// `zeke --rpc`: serve one JSON-RPC session on stdin/stdout, line-delimited.
/// No auth handshake; the pipe itself is the trust boundary.
pub async fn run_stdio_rpc(state: Arc<AppState>) -> ZekeResult<()> {
    let stdin = tokio::io::stdin();
    let mut stdout = tokio::io::stdout();
    let mut reader = BufReader::new(stdin);
    let framing = Framing::LineDelimited;

    let (out_tx, mut out_rx) = mpsc::channel::<String>(64);
    let ctx = Arc::new(ConnectionCtx::new(out_tx.clone()));

    // Writer owns stdout so stream notifications and responses interleave
    // only at frame boundaries.
    let writer = tokio::spawn(async move {
        while let Some(text) = out_rx.recv().await {
            if framing
                .write_frame(&mut stdout, text.as_bytes())
                .await
                .is_err()
            {
                break;
            }
        }
    });

    while let Some(frame) = framing.read_frame(&mut reader).await? {
        if frame.is_empty() {
            continue;
        }
        let request: RpcRequest = match serde_json::from_slice(&frame) {
            Ok(r) => r,
            Err(e) => {
                let resp = RpcResponse::failure(
                    serde_json::Value::Null,
                    -32700,
                    format!("parse error: {e}"),
                );
                let _ = out_tx
                    .send(serde_json::to_string(&resp).unwrap_or_default())
                    .await;
                continue;
            }
        };
        if let Some(response) = dispatch(&state, &ctx, request).await {
            let _ = out_tx
                .send(serde_json::to_string(&response).unwrap_or_default())
                .await;
        }
    }

    drop(out_tx);
    drop(ctx);
    let _ = writer.await;
    Ok(())
}
