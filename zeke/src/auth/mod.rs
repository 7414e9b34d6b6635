//! Credential store: API keys and OAuth tokens, keyed by `(provider, kind)`.
//!
//! Backend selection at startup: probe the OS keyring; if unavailable (or
//! `no_keyring` is requested) fall back to a 0600 JSON file in the config
//! directory. Reads resolve in order: in-process cache → keyring → file →
//! environment variable. The environment is read-only and never written back.
//!
//! Values are opaque; nothing in this module logs a credential value.

pub mod device;
pub mod pkce;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::RwLock;

use serde::{Deserialize, Serialize};

use crate::error::{ZekeError, ZekeResult};

/// What a stored value is.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialKind {
    ApiKey,
    OauthAccess,
    OauthRefresh,
}

impl CredentialKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CredentialKind::ApiKey => "api_key",
            CredentialKind::OauthAccess => "oauth_access",
            CredentialKind::OauthRefresh => "oauth_refresh",
        }
    }
}

/// A stored credential value with optional expiry (unix seconds) and scopes.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Credential {
    pub value: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scopes: Option<Vec<String>>,
}

impl Credential {
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            expires_at: None,
            scopes: None,
        }
    }

    pub fn expiring(value: impl Into<String>, expires_at: i64) -> Self {
        Self {
            value: value.into(),
            expires_at: Some(expires_at),
            scopes: None,
        }
    }

    /// True when the value expires within `margin_secs` from now.
    pub fn expires_within(&self, margin_secs: i64) -> bool {
        match self.expires_at {
            Some(t) => chrono::Utc::now().timestamp() + margin_secs >= t,
            None => false,
        }
    }
}

/// Metadata-only view returned by `list`; never carries the value.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CredentialMeta {
    pub provider: String,
    pub kind: CredentialKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<i64>,
}

/// On-disk entry. Under the keyring backend the value lives in the keyring
/// and the file keeps a metadata stub (`value: None`) so `list` works.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
struct FileEntry {
    #[serde(skip_serializing_if = "Option::is_none")]
    value: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    expires_at: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    scopes: Option<Vec<String>>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Backend {
    Keyring,
    File,
}

/// Keyring service name for Zeke entries.
const KEYRING_SERVICE: &str = "zeke";

fn entry_key(provider: &str, kind: CredentialKind) -> String {
    format!("{provider}:{}", kind.as_str())
}

/// Environment variable that supplies an API key for a provider, when set.
pub fn env_var_for(provider: &str) -> Option<&'static str> {
    match provider {
        "anthropic" => Some("ANTHROPIC_API_KEY"),
        "openai" => Some("OPENAI_API_KEY"),
        "xai" => Some("XAI_API_KEY"),
        "azure" => Some("AZURE_OPENAI_API_KEY"),
        "proxy" => Some("ZEKE_API_KEY"),
        _ => None,
    }
}

/// Credential store over keyring-or-file with an in-process cache.
pub struct CredentialStore {
    backend: Backend,
    file_path: PathBuf,
    cache: RwLock<HashMap<String, Credential>>,
}

impl CredentialStore {
    /// Opens the store. Probes for a keyring agent unless `no_keyring`; a
    /// failed probe downgrades to the file backend with a warning.
    pub fn open(no_keyring: bool) -> ZekeResult<Self> {
        let dir = env_config::config_dir()
            .map_err(|e| ZekeError::InvalidArgument(format!("config dir: {e}")))?;
        let file_path = dir.join("credentials.json");
        let backend = if no_keyring {
            Backend::File
        } else {
            match probe_keyring() {
                Ok(()) => Backend::Keyring,
                Err(e) => {
                    tracing::warn!("keyring unavailable, using credentials file: {e}");
                    Backend::File
                }
            }
        };
        Ok(Self {
            backend,
            file_path,
            cache: RwLock::new(HashMap::new()),
        })
    }

    /// Opens a file-backed store at an explicit path. Used by tests and by
    /// deployments with a managed secrets directory.
    pub fn open_at(file_path: PathBuf) -> Self {
        Self {
            backend: Backend::File,
            file_path,
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// True when values are held by the OS keyring rather than the file.
    pub fn uses_keyring(&self) -> bool {
        self.backend == Backend::Keyring
    }

    /// Stores a credential, replacing any previous value for the pair.
    pub async fn set(
        &self,
        provider: &str,
        kind: CredentialKind,
        credential: Credential,
    ) -> ZekeResult<()> {
        let key = entry_key(provider, kind);
        if self.backend == Backend::Keyring {
            let value = credential.value.clone();
            let k = key.clone();
            tokio::task::spawn_blocking(move || keyring_set(&k, &value))
                .await
                .map_err(|e| ZekeError::KeyringUnavailable(e.to_string()))??;
        }
        let stub = FileEntry {
            value: (self.backend == Backend::File).then(|| credential.value.clone()),
            expires_at: credential.expires_at,
            scopes: credential.scopes.clone(),
        };
        self.update_file(|map| {
            map.insert(key.clone(), stub);
        })?;
        self.cache
            .write()
            .expect("credential cache poisoned")
            .insert(key, credential);
        Ok(())
    }

    /// Resolves a credential: cache → keyring → file → environment.
    pub async fn get(
        &self,
        provider: &str,
        kind: CredentialKind,
    ) -> ZekeResult<Option<Credential>> {
        let key = entry_key(provider, kind);
        if let Some(hit) = self
            .cache
            .read()
            .expect("credential cache poisoned")
            .get(&key)
        {
            return Ok(Some(hit.clone()));
        }

        let file_map = self.read_file()?;
        let meta = file_map.get(&key).cloned();

        let found = if self.backend == Backend::Keyring {
            let k = key.clone();
            let value = tokio::task::spawn_blocking(move || keyring_get(&k))
                .await
                .map_err(|e| ZekeError::KeyringUnavailable(e.to_string()))??;
            value.map(|v| Credential {
                value: v,
                expires_at: meta.as_ref().and_then(|m| m.expires_at),
                scopes: meta.as_ref().and_then(|m| m.scopes.clone()),
            })
        } else {
            meta.and_then(|m| {
                m.value.map(|v| Credential {
                    value: v,
                    expires_at: m.expires_at,
                    scopes: m.scopes,
                })
            })
        };

        let found = match found {
            Some(c) => Some(c),
            None => self.from_env(provider, kind),
        };

        if let Some(ref c) = found {
            self.cache
                .write()
                .expect("credential cache poisoned")
                .insert(key, c.clone());
        }
        Ok(found)
    }

    /// Deletes a credential everywhere except the environment.
    pub async fn delete(&self, provider: &str, kind: CredentialKind) -> ZekeResult<()> {
        let key = entry_key(provider, kind);
        if self.backend == Backend::Keyring {
            let k = key.clone();
            tokio::task::spawn_blocking(move || keyring_delete(&k))
                .await
                .map_err(|e| ZekeError::KeyringUnavailable(e.to_string()))??;
        }
        self.update_file(|map| {
            map.remove(&key);
        })?;
        self.cache
            .write()
            .expect("credential cache poisoned")
            .remove(&key);
        Ok(())
    }

    /// Deletes every credential for a provider (`auth logout`).
    pub async fn delete_provider(&self, provider: &str) -> ZekeResult<()> {
        for kind in [
            CredentialKind::ApiKey,
            CredentialKind::OauthAccess,
            CredentialKind::OauthRefresh,
        ] {
            self.delete(provider, kind).await?;
        }
        Ok(())
    }

    /// Lists stored credentials as metadata only. Environment-supplied keys
    /// are not listed; they are not stored.
    pub fn list(&self) -> ZekeResult<Vec<CredentialMeta>> {
        let map = self.read_file()?;
        let mut out = Vec::with_capacity(map.len());
        for (key, entry) in map {
            let Some((provider, kind_str)) = key.rsplit_once(':') else {
                continue;
            };
            let kind = match kind_str {
                "api_key" => CredentialKind::ApiKey,
                "oauth_access" => CredentialKind::OauthAccess,
                "oauth_refresh" => CredentialKind::OauthRefresh,
                _ => continue,
            };
            out.push(CredentialMeta {
                provider: provider.to_string(),
                kind,
                expires_at: entry.expires_at,
            });
        }
        out.sort_by(|a, b| (&a.provider, a.kind.as_str()).cmp(&(&b.provider, b.kind.as_str())));
        Ok(out)
    }

    /// Invalidates the cache entry for one pair (after a refresh elsewhere).
    pub fn invalidate(&self, provider: &str, kind: CredentialKind) {
        self.cache
            .write()
            .expect("credential cache poisoned")
            .remove(&entry_key(provider, kind));
    }

    fn from_env(&self, provider: &str, kind: CredentialKind) -> Option<Credential> {
        if kind != CredentialKind::ApiKey {
            return None;
        }
        let var = env_var_for(provider)?;
        match std::env::var(var) {
            Ok(v) if !v.is_empty() => Some(Credential::new(v)),
            _ => None,
        }
    }

    fn read_file(&self) -> ZekeResult<HashMap<String, FileEntry>> {
        match std::fs::read_to_string(&self.file_path) {
            Ok(content) => serde_json::from_str(&content)
                .map_err(|e| ZekeError::InvalidResponse(format!("credentials file: {e}"))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(HashMap::new()),
            Err(e) => Err(ZekeError::Io(e)),
        }
    }

    /// Atomic read-modify-write of the credentials file: write to a temp file
    /// beside it, set 0600, then rename over the target.
    fn update_file(
        &self,
        mutate: impl FnOnce(&mut HashMap<String, FileEntry>),
    ) -> ZekeResult<()> {
        let mut map = self.read_file()?;
        mutate(&mut map);
        if let Some(parent) = self.file_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = self
            .file_path
            .with_extension(format!("tmp.{}", std::process::id()));
        let body = serde_json::to_vec_pretty(&map)
            .map_err(|e| ZekeError::InvalidResponse(format!("credentials encode: {e}")))?;
        std::fs::write(&tmp, body)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&tmp, std::fs::Permissions::from_mode(0o600))?;
        }
        std::fs::rename(&tmp, &self.file_path)?;
        Ok(())
    }
}

fn probe_keyring() -> Result<(), String> {
    let entry =
        keyring::Entry::new(KEYRING_SERVICE, "zeke-probe").map_err(|e| e.to_string())?;
    match entry.get_password() {
        Ok(_) | Err(keyring::Error::NoEntry) => Ok(()),
        Err(e) => Err(e.to_string()),
    }
}

fn keyring_set(key: &str, value: &str) -> ZekeResult<()> {
    keyring::Entry::new(KEYRING_SERVICE, key)
        .and_then(|e| e.set_password(value))
        .map_err(|e| ZekeError::KeyringUnavailable(e.to_string()))
}

fn keyring_get(key: &str) -> ZekeResult<Option<String>> {
    match keyring::Entry::new(KEYRING_SERVICE, key).and_then(|e| e.get_password()) {
        Ok(v) => Ok(Some(v)),
        Err(keyring::Error::NoEntry) => Ok(None),
        Err(e) => Err(ZekeError::KeyringUnavailable(e.to_string())),
    }
}

fn keyring_delete(key: &str) -> ZekeResult<()> {
    match keyring::Entry::new(KEYRING_SERVICE, key).and_then(|e| e.delete_credential()) {
        Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
        Err(e) => Err(ZekeError::KeyringUnavailable(e.to_string())),
    }
}

/// Returns a usable OAuth access token for `provider`, refreshing through
/// the provider's token endpoint when the stored token is within 60 s of
/// expiry. On refresh failure the stale token stays in place and
/// `ReAuthRequired` is returned.
pub async fn fresh_access_token(
    store: &CredentialStore,
    provider: &str,
    client: &reqwest::Client,
) -> ZekeResult<Option<String>> {
    let Some(access) = store.get(provider, CredentialKind::OauthAccess).await? else {
        return Ok(None);
    };
    if !access.expires_within(60) {
        return Ok(Some(access.value));
    }

    let Some(refresh) = store.get(provider, CredentialKind::OauthRefresh).await? else {
        return Err(ZekeError::ReAuthRequired {
            provider: provider.to_string(),
        });
    };
    match pkce::refresh(client, &refresh.value).await {
        Ok(tokens) => {
            let expires_at = chrono::Utc::now().timestamp() + tokens.expires_in as i64;
            store
                .set(
                    provider,
                    CredentialKind::OauthAccess,
                    Credential::expiring(&tokens.access_token, expires_at),
                )
                .await?;
            if let Some(rt) = tokens.refresh_token {
                store
                    .set(provider, CredentialKind::OauthRefresh, Credential::new(rt))
                    .await?;
            }
            Ok(Some(tokens.access_token))
        }
        Err(e) => {
            tracing::warn!("token refresh for {provider} failed: {e}");
            Err(ZekeError::ReAuthRequired {
                provider: provider.to_string(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_store() -> (tempfile::TempDir, CredentialStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = CredentialStore::open_at(dir.path().join("credentials.json"));
        (dir, store)
    }

    #[tokio::test]
    async fn set_get_returns_latest_value() {
        let (_dir, store) = temp_store();
        store
            .set("openai", CredentialKind::ApiKey, Credential::new("sk-one"))
            .await
            .unwrap();
        store
            .set("openai", CredentialKind::ApiKey, Credential::new("sk-two"))
            .await
            .unwrap();
        let got = store.get("openai", CredentialKind::ApiKey).await.unwrap();
        assert_eq!(got.unwrap().value, "sk-two");
    }

    #[tokio::test]
    async fn delete_then_get_returns_absent() {
        let (_dir, store) = temp_store();
        store
            .set("xai", CredentialKind::ApiKey, Credential::new("xai-key"))
            .await
            .unwrap();
        store.delete("xai", CredentialKind::ApiKey).await.unwrap();
        assert!(store
            .get("xai", CredentialKind::ApiKey)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn list_returns_metadata_without_values() {
        let (_dir, store) = temp_store();
        store
            .set(
                "anthropic",
                CredentialKind::OauthAccess,
                Credential::expiring("tok", 4_102_444_800),
            )
            .await
            .unwrap();
        let metas = store.list().unwrap();
        assert_eq!(metas.len(), 1);
        assert_eq!(metas[0].provider, "anthropic");
        assert_eq!(metas[0].kind, CredentialKind::OauthAccess);
        assert_eq!(metas[0].expires_at, Some(4_102_444_800));
        let json = serde_json::to_string(&metas).unwrap();
        assert!(!json.contains("tok"));
    }

    #[tokio::test]
    async fn values_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("credentials.json");
        {
            let store = CredentialStore::open_at(path.clone());
            store
                .set("openai", CredentialKind::ApiKey, Credential::new("sk-persist"))
                .await
                .unwrap();
        }
        let store = CredentialStore::open_at(path);
        let got = store.get("openai", CredentialKind::ApiKey).await.unwrap();
        assert_eq!(got.unwrap().value, "sk-persist");
    }

    #[tokio::test]
    async fn env_fallback_for_api_key_only() {
        let (_dir, store) = temp_store();
        std::env::set_var("XAI_API_KEY", "from-env");
        let got = store.get("xai", CredentialKind::ApiKey).await.unwrap();
        std::env::remove_var("XAI_API_KEY");
        assert_eq!(got.unwrap().value, "from-env");
        assert!(store
            .get("xai", CredentialKind::OauthAccess)
            .await
            .unwrap()
            .is_none());
    }

    #[test]
    fn expires_within_margin() {
        let soon = Credential::expiring("t", chrono::Utc::now().timestamp() + 30);
        assert!(soon.expires_within(60));
        let later = Credential::expiring("t", chrono::Utc::now().timestamp() + 3600);
        assert!(!later.expires_within(60));
        assert!(!Credential::new("t").expires_within(60));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn credentials_file_is_0600() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("credentials.json");
        let store = CredentialStore::open_at(path.clone());
        store
            .set("openai", CredentialKind::ApiKey, Credential::new("sk"))
            .await
            .unwrap();
        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}
