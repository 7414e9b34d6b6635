//! Auth commands: OAuth flows (`auth claude`, `auth copilot`), key
//! management (`set-key`, `get-key`, `status`, `logout`, `list`, `test`).

use std::io::Write as _;

use serde_json::json;

use zeke::auth::{device, pkce, Credential, CredentialKind};
use zeke::{ZekeError, ZekeResult};

use crate::local::LocalBackend;

/// PKCE flow against Anthropic: open browser, take the pasted
/// `<code>#<state>`, exchange, persist both tokens.
pub async fn login_claude(backend: &LocalBackend) -> ZekeResult<()> {
    let session = pkce::begin();
    if pkce::open_browser(&session) {
        println!("Opened your browser for Anthropic sign-in.");
    } else {
        println!("Open this URL to sign in:");
    }
    println!("  {}\n", session.authorize_url);
    print!("Paste the authorisation code shown after approval: ");
    std::io::stdout().flush()?;

    let mut pasted = String::new();
    std::io::stdin().read_line(&mut pasted)?;
    let code = pkce::parse_authorization_code(&pasted, session.state())?;

    let client = reqwest::Client::new();
    let tokens = pkce::exchange(&client, &session, &code).await?;
    let expires_at = chrono::Utc::now().timestamp() + tokens.expires_in as i64;

    backend
        .state
        .credentials
        .set(
            "anthropic",
            CredentialKind::OauthAccess,
            Credential::expiring(&tokens.access_token, expires_at),
        )
        .await?;
    if let Some(refresh) = tokens.refresh_token {
        backend
            .state
            .credentials
            .set(
                "anthropic",
                CredentialKind::OauthRefresh,
                Credential::new(refresh),
            )
            .await?;
    }
    println!("anthropic: signed in (token expires in {}h)", tokens.expires_in / 3600);
    Ok(())
}

/// Device-code flow against GitHub: show code + URL with a spinner while
/// polling, persist the access token for the Copilot adapter.
pub async fn login_copilot(backend: &LocalBackend) -> ZekeResult<()> {
    let client = reqwest::Client::new();
    let auth = device::start(&client).await?;
    println!("Open {} and enter the code:", auth.verification_uri);
    println!("\n    {}\n", auth.user_code);

    const FRAMES: [char; 4] = ['|', '/', '-', '\\'];
    let token = device::poll(&client, &auth, |attempt| {
        let frame = FRAMES[attempt as usize % FRAMES.len()];
        print!("\r{frame} waiting for authorisation…");
        let _ = std::io::stdout().flush();
    })
    .await?;
    println!("\r✓ authorised                    ");

    backend
        .state
        .credentials
        .set("github", CredentialKind::OauthAccess, Credential::new(token))
        .await?;
    println!("github: signed in");
    Ok(())
}

pub async fn set_key(backend: &LocalBackend, provider: &str, value: &str) -> ZekeResult<()> {
    backend
        .call("auth.set_key", json!({"provider": provider, "value": value}))
        .await?;
    println!("stored api key for {provider}");
    Ok(())
}

/// Prints the stored key. The one deliberate exception to "reads never
/// print values": the user asked for it by name.
pub async fn get_key(backend: &LocalBackend, provider: &str) -> ZekeResult<()> {
    match backend
        .state
        .credentials
        .get(provider, CredentialKind::ApiKey)
        .await?
    {
        Some(cred) => {
            println!("{}", cred.value);
            Ok(())
        }
        None => Err(ZekeError::NotFound(format!("api key for {provider}"))),
    }
}

pub async fn logout(backend: &LocalBackend, provider: &str) -> ZekeResult<()> {
    backend
        .call("auth.logout", json!({"provider": provider}))
        .await?;
    println!("logged out of {provider}");
    Ok(())
}

pub async fn status(backend: &LocalBackend, json_output: bool) -> ZekeResult<()> {
    let status = backend.call("auth.status", json!({})).await?;
    if json_output {
        println!("{status}");
        return Ok(());
    }
    println!(
        "credential backend: {}",
        status["backend"].as_str().unwrap_or("?")
    );
    let entries = status["credentials"].as_array().cloned().unwrap_or_default();
    if entries.is_empty() {
        println!("no stored credentials");
        return Ok(());
    }
    for entry in entries {
        let provider = entry["provider"].as_str().unwrap_or("?");
        let kind = entry["kind"].as_str().unwrap_or("?");
        let state = if entry["expired"].as_bool() == Some(true) {
            "EXPIRED"
        } else {
            "OK"
        };
        println!("{provider:<12} {kind:<14} {state}");
    }
    Ok(())
}

pub async fn list(backend: &LocalBackend) -> ZekeResult<()> {
    for meta in backend.state.credentials.list()? {
        println!("{}:{}", meta.provider, meta.kind.as_str());
    }
    Ok(())
}

/// `auth test <provider>`: probes the provider's listing endpoint with the
/// stored credential.
pub async fn test(backend: &LocalBackend, provider: &str) -> ZekeResult<()> {
    let result = backend
        .call("provider.test", json!({"provider": provider}))
        .await?;
    if result["ok"].as_bool() == Some(true) {
        println!(
            "{provider}: OK ({} models, {}ms)",
            result["models"].as_u64().unwrap_or(0),
            result["latency_ms"].as_u64().unwrap_or(0),
        );
        Ok(())
    } else {
        Err(ZekeError::Unauthorised {
            provider: provider.to_string(),
        })
    }
}
