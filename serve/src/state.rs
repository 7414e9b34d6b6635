//! Shared daemon state: router, tools, credentials, catalog, in-flight map.
//!
//! Everything process-wide lives here and is constructed once at startup;
//! tests inject mocks through [`AppState::with_parts`] rather than any
//! global replacement.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use zeke::auth::CredentialStore;
use zeke::catalog::ModelCatalog;
use zeke::providers::{
    AnthropicProvider, AzureConfig, AzureProvider, CopilotProvider, GoogleProvider,
    OllamaProvider, OpenAiCompatibleProvider, Provider,
};
use zeke::router::db::RoutingDb;
use zeke::router::{RouterConfig, SmartRouter};
use zeke::tools::analyze::ProjectAnalyzeTool;
use zeke::tools::file_edit::FileEditTool;
use zeke::tools::shell::ShellExecTool;
use zeke::tools::{ApprovalSet, ToolRegistry};
use zeke::{ZekeError, ZekeResult};

/// Startup options, resolved from CLI flags and env.
#[derive(Clone, Debug, Default)]
pub struct InitOptions {
    pub no_keyring: bool,
    pub workspace_root: Option<PathBuf>,
    pub db_path: Option<PathBuf>,
    pub router: Option<RouterConfig>,
}

/// Process-wide daemon state.
pub struct AppState {
    pub router: SmartRouter,
    pub tools: ToolRegistry,
    pub credentials: Arc<CredentialStore>,
    pub catalog: Arc<ModelCatalog>,
    pub db: RoutingDb,
    /// Bearer for RPC and WebSocket clients; written to the lock file.
    pub auth_token: String,
    /// Project-scope approval grants (daemon lifetime).
    pub project_grants: ApprovalSet,
    /// Cancellation tokens of in-flight streaming requests, by request id.
    pub inflight: Mutex<HashMap<String, CancellationToken>>,
    /// Connected WebSocket clients: id → connect timestamp. The heartbeat
    /// task holds the lock only to update its own entry.
    pub ws_clients: Mutex<HashMap<String, i64>>,
}

impl AppState {
    /// Builds the full state from environment and options: credential store,
    /// routing DB, catalog warm start, provider set, tool registry.
    pub async fn initialize(opts: InitOptions) -> ZekeResult<Arc<Self>> {
        let credentials = Arc::new(CredentialStore::open(opts.no_keyring)?);
        let db_path = match &opts.db_path {
            Some(p) => p.clone(),
            None => env_config::state_dir()
                .map_err(|e| ZekeError::InvalidArgument(format!("state dir: {e}")))?
                .join("zeke.db"),
        };
        let db = RoutingDb::open(&db_path)?;

        let catalog = Arc::new(ModelCatalog::new());
        for record in db.load_models().await.unwrap_or_default() {
            catalog.upsert(record);
        }

        let client = zeke::providers::http_client(Duration::from_secs(5))?;
        let providers = configured_providers(&credentials, &client).await;

        let router = SmartRouter::new(
            providers,
            catalog.clone(),
            db.clone(),
            opts.router.clone().unwrap_or_default(),
        );

        let mut tools = default_tools(&opts)?;

        // Delegate context/tool calls to an external MCP server when one is
        // configured. Failure to reach it is not fatal to startup.
        if let Some(mcp_config) = zeke::McpTransportConfig::from_env() {
            match zeke::McpClient::connect(&mcp_config).await {
                Ok(client) => {
                    match zeke::tools::mcp_remote::register_mcp_tools(&mut tools, client).await
                    {
                        Ok(count) => tracing::info!("registered {count} MCP tool(s)"),
                        Err(e) => tracing::warn!("mcp tools/list failed: {e}"),
                    }
                }
                Err(e) => tracing::warn!("mcp server unreachable: {e}"),
            }
        }

        Ok(Arc::new(Self {
            router,
            tools,
            credentials,
            catalog,
            db,
            auth_token: generate_token(),
            project_grants: ApprovalSet::new(),
            inflight: Mutex::new(HashMap::new()),
            ws_clients: Mutex::new(HashMap::new()),
        }))
    }

    /// Assembles state from pre-built parts. Test seam.
    pub fn with_parts(
        router: SmartRouter,
        tools: ToolRegistry,
        credentials: Arc<CredentialStore>,
        catalog: Arc<ModelCatalog>,
        db: RoutingDb,
        auth_token: impl Into<String>,
    ) -> Arc<Self> {
        Arc::new(Self {
            router,
            tools,
            credentials,
            catalog,
            db,
            auth_token: auth_token.into(),
            project_grants: ApprovalSet::new(),
            inflight: Mutex::new(HashMap::new()),
            ws_clients: Mutex::new(HashMap::new()),
        })
    }

    /// Registers an in-flight request and returns its cancellation token.
    pub fn track(&self, request_id: &str) -> CancellationToken {
        let token = CancellationToken::new();
        self.inflight
            .lock()
            .expect("inflight map poisoned")
            .insert(request_id.to_string(), token.clone());
        token
    }

    pub fn untrack(&self, request_id: &str) {
        self.inflight
            .lock()
            .expect("inflight map poisoned")
            .remove(request_id);
    }

    /// Signals cancellation for a request id. Returns false when unknown.
    pub fn cancel(&self, request_id: &str) -> bool {
        match self
            .inflight
            .lock()
            .expect("inflight map poisoned")
            .get(request_id)
        {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }
}

/// Every adapter whose configuration is present. Ollama is always offered;
/// cloud adapters need a credential or endpoint.
async fn configured_providers(
    credentials: &Arc<CredentialStore>,
    client: &reqwest::Client,
) -> Vec<Arc<dyn Provider>> {
    use zeke::auth::CredentialKind;

    let mut providers: Vec<Arc<dyn Provider>> = Vec::new();
    providers.push(Arc::new(OllamaProvider::new(client.clone())));

    let has = |provider: &str| {
        let credentials = credentials.clone();
        let provider = provider.to_string();
        async move {
            credentials
                .get(&provider, CredentialKind::ApiKey)
                .await
                .ok()
                .flatten()
                .is_some()
        }
    };

    if let Ok(base) = std::env::var("ZEKE_API_BASE") {
        if !base.is_empty() {
            providers.push(Arc::new(OpenAiCompatibleProvider::proxy(
                credentials.clone(),
                client.clone(),
                base,
            )));
        }
    }
    if has("openai").await {
        providers.push(Arc::new(OpenAiCompatibleProvider::openai(
            credentials.clone(),
            client.clone(),
        )));
    }
    if has("xai").await {
        providers.push(Arc::new(OpenAiCompatibleProvider::xai(
            credentials.clone(),
            client.clone(),
        )));
    }
    if let Some(azure) = AzureConfig::from_env() {
        providers.push(Arc::new(AzureProvider::new(
            azure,
            credentials.clone(),
            client.clone(),
        )));
    }

    let has_anthropic = has("anthropic").await
        || credentials
            .get("anthropic", CredentialKind::OauthAccess)
            .await
            .ok()
            .flatten()
            .is_some();
    if has_anthropic {
        providers.push(Arc::new(AnthropicProvider::new(
            credentials.clone(),
            client.clone(),
        )));
    }
    if has("google").await {
        providers.push(Arc::new(GoogleProvider::new(
            credentials.clone(),
            client.clone(),
        )));
    }
    if credentials
        .get("github", CredentialKind::OauthAccess)
        .await
        .ok()
        .flatten()
        .is_some()
    {
        providers.push(Arc::new(CopilotProvider::new(
            credentials.clone(),
            client.clone(),
        )));
    }
    providers
}

fn default_tools(opts: &InitOptions) -> ZekeResult<ToolRegistry> {
    let backup_dir = env_config::state_dir()
        .map_err(|e| ZekeError::InvalidArgument(format!("state dir: {e}")))?
        .join("backups");
    let mut tools = ToolRegistry::new();
    tools.register(FileEditTool::new(opts.workspace_root.clone(), backup_dir));
    tools.register(ShellExecTool::new(
        shell_allow_list(),
        Duration::from_secs(5),
    ));
    tools.register(ProjectAnalyzeTool::new());
    Ok(tools)
}

/// Optional allow-list from `ZEKE_SHELL_ALLOW` (comma-separated).
fn shell_allow_list() -> Option<Vec<String>> {
    std::env::var("ZEKE_SHELL_ALLOW").ok().map(|raw| {
        raw.split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect()
    })
}

fn generate_token() -> String {
    use rand::Rng;
    let bytes: [u8; 24] = rand::thread_rng().gen();
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_tokens_are_unique_hex() {
        let a = generate_token();
        let b = generate_token();
        assert_ne!(a, b);
        assert_eq!(a.len(), 48);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn allow_list_parses_comma_separated() {
        std::env::set_var("ZEKE_SHELL_ALLOW", "git, cargo ,ls");
        let list = shell_allow_list().unwrap();
        std::env::remove_var("ZEKE_SHELL_ALLOW");
        assert_eq!(list, vec!["git", "cargo", "ls"]);
    }

    #[test]
    fn cancel_unknown_request_is_false() {
        let (_dir, state) = test_state();
        assert!(!state.cancel("nope"));
        let token = state.track("req");
        assert!(state.cancel("req"));
        assert!(token.is_cancelled());
        state.untrack("req");
    }

    fn test_state() -> (tempfile::TempDir, Arc<AppState>) {
        let dir = tempfile::tempdir().unwrap();
        let db = RoutingDb::open(dir.path().join("t.db")).unwrap();
        let catalog = Arc::new(ModelCatalog::new());
        let creds = Arc::new(CredentialStore::open_at(dir.path().join("c.json")));
        let router = SmartRouter::new(vec![], catalog.clone(), db.clone(), RouterConfig::default());
        let state = AppState::with_parts(router, ToolRegistry::new(), creds, catalog, db, "tok");
        (dir, state)
    }
}
