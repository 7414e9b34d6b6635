//! Zeke daemon: JSON-RPC socket server plus WebSocket streaming endpoint.
//!
//! `run_serve` binds both transports, writes the session lock file with the
//! bearer token, and runs until ctrl-c; shutdown flushes the routing DB and
//! removes the lock. Editor clients find the daemon through the lock file.
//!
//! **Public API**: [`run_serve`], [`ServeOptions`], [`AppState`],
//! [`InitOptions`], [`run_stdio_rpc`], the lock-file helpers.

mod dispatch;
mod lockfile;
mod rpc;
mod state;
mod ws;

use std::sync::Arc;

pub use dispatch::{call_method, dispatch, ConnectionCtx};
pub use lockfile::{cleanup_dead_locks, find_live_lock, remove_lock, write_lock, SessionLock};
pub use rpc::{handle_connection, run_rpc, run_stdio_rpc, RpcListener};
pub use state::{AppState, InitOptions};
pub use ws::router as ws_router;

use zeke::{ZekeError, ZekeResult};

/// Daemon options.
#[derive(Clone, Debug, Default)]
pub struct ServeOptions {
    /// TCP port for RPC and WebSocket; `None` prefers the Unix socket.
    pub port: Option<u16>,
}

/// Runs the daemon until ctrl-c. Binds RPC on a Unix socket (or TCP when a
/// port is requested or the platform lacks Unix sockets) and the WebSocket
/// endpoint on a TCP port next to it.
pub async fn run_serve(state: Arc<AppState>, opts: ServeOptions) -> ZekeResult<()> {
    let removed = cleanup_dead_locks().unwrap_or(0);
    if removed > 0 {
        tracing::info!("removed {removed} stale session lock(s)");
    }

    // RPC transport.
    #[cfg(unix)]
    let rpc_listener = match opts.port {
        Some(port) => RpcListener::bind_tcp(port).await?,
        None => {
            let dir = env_config::state_dir()
                .map_err(|e| ZekeError::InvalidArgument(format!("state dir: {e}")))?;
            RpcListener::bind_unix(&dir.join("zeke.sock"))?
        }
    };
    #[cfg(not(unix))]
    let rpc_listener = RpcListener::bind_tcp(opts.port.unwrap_or(0)).await?;

    let rpc_addr = rpc_listener.describe();
    let lock_name = rpc_listener
        .tcp_port()
        .map(|p| p.to_string())
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    // WebSocket endpoint on its own TCP port.
    let ws_port = opts.port.map(|p| p.saturating_add(1)).unwrap_or(0);
    let ws_listener = tokio::net::TcpListener::bind(("127.0.0.1", ws_port)).await?;
    let ws_addr = ws_listener.local_addr()?;

    let lock = SessionLock {
        pid: std::process::id(),
        socket_or_port: rpc_addr.clone(),
        auth_token: state.auth_token.clone(),
    };
    write_lock(&lock_name, &lock)?;
    tracing::info!("rpc listening on {rpc_addr}");
    tracing::info!("websocket listening on ws://{ws_addr}/ws");

    let ws_app = ws::router(state.clone());
    let rpc_state = state.clone();
    let rpc_task = tokio::spawn(async move { run_rpc(rpc_listener, rpc_state).await });
    let ws_task = tokio::spawn(async move {
        axum::serve(ws_listener, ws_app)
            .await
            .map_err(|e| ZekeError::Network(e.to_string()))
    });

    let result = tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutting down");
            Ok(())
        }
        r = rpc_task => match r {
            Ok(inner) => inner,
            Err(e) => Err(ZekeError::Network(format!("rpc task: {e}"))),
        },
        r = ws_task => match r {
            Ok(inner) => inner,
            Err(e) => Err(ZekeError::Network(format!("ws task: {e}"))),
        },
    };

    // Flush pending stats before the writer thread dies with the process.
    let _ = state.db.flush().await;
    remove_lock(&lock_name);
    result
}
