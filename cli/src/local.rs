//! Local backend: build daemon state in-process and call the dispatcher
//! directly, no socket involved. One-shot commands stay stateless between
//! invocations except for credentials and the routing DB.

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::mpsc;

use serve::{call_method, AppState, ConnectionCtx, InitOptions};
use zeke::router::{RouterConfig, RouterMode};
use zeke::{ZekeError, ZekeResult};

/// In-process backend: app state plus a connection context whose outbound
/// queue delivers stream notifications.
pub struct LocalBackend {
    pub state: Arc<AppState>,
    pub ctx: Arc<ConnectionCtx>,
    pub notifications: mpsc::Receiver<String>,
}

impl LocalBackend {
    pub async fn initialize(no_keyring: bool) -> ZekeResult<Self> {
        let mut router_config = RouterConfig::default();
        if let Some(mode) = saved_router_mode() {
            router_config.mode = mode;
        }
        let state = AppState::initialize(InitOptions {
            no_keyring,
            workspace_root: std::env::current_dir().ok(),
            db_path: None,
            router: Some(router_config),
        })
        .await?;
        let (tx, rx) = mpsc::channel(256);
        Ok(Self {
            state,
            ctx: Arc::new(ConnectionCtx::new(tx)),
            notifications: rx,
        })
    }

    /// Calls one method on the in-process dispatcher. The dispatcher's real
    /// `ZekeError` is returned as-is, so messages and exit codes match what
    /// the daemon would log.
    pub async fn call(&self, method: &str, params: Value) -> ZekeResult<Value> {
        call_method(&self.state, &self.ctx, method, params).await
    }

    /// Starts a `chat.stream`; the response and all stream notifications
    /// arrive on the `notifications` receiver, in order.
    pub async fn start_stream(&self, params: Value) -> ZekeResult<()> {
        call_method(&self.state, &self.ctx, "chat.stream", params).await?;
        Ok(())
    }
}

fn mode_file() -> Option<std::path::PathBuf> {
    env_config::state_dir().ok().map(|d| d.join("router_mode"))
}

/// Router mode chosen by `zeke router switch`, surviving across runs.
pub fn saved_router_mode() -> Option<RouterMode> {
    if let Ok(raw) = std::env::var("ZEKE_ROUTER_MODE") {
        if let Ok(mode) = raw.parse() {
            return Some(mode);
        }
    }
    let path = mode_file()?;
    std::fs::read_to_string(path).ok()?.trim().parse().ok()
}

pub fn save_router_mode(mode: RouterMode) -> ZekeResult<()> {
    let path = mode_file()
        .ok_or_else(|| ZekeError::InvalidArgument("no state directory".into()))?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let name = match mode {
        RouterMode::Direct => "direct",
        RouterMode::Proxy => "proxy",
        RouterMode::Auto => "auto",
    };
    std::fs::write(path, name)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn router_mode_round_trips_through_state_file() {
        let dir = tempfile::tempdir().unwrap();
        let prev = std::env::var("ZEKE_STATE_DIR").ok();
        std::env::set_var("ZEKE_STATE_DIR", dir.path());
        std::env::remove_var("ZEKE_ROUTER_MODE");

        save_router_mode(RouterMode::Proxy).unwrap();
        let got = saved_router_mode();

        match prev {
            Some(v) => std::env::set_var("ZEKE_STATE_DIR", v),
            None => std::env::remove_var("ZEKE_STATE_DIR"),
        }
        assert_eq!(got, Some(RouterMode::Proxy));
    }

    #[test]
    fn env_var_overrides_mode_file() {
        std::env::set_var("ZEKE_ROUTER_MODE", "direct");
        let got = saved_router_mode();
        std::env::remove_var("ZEKE_ROUTER_MODE");
        assert_eq!(got, Some(RouterMode::Direct));
    }
}
