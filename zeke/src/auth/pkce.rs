//! PKCE authorisation-code flow for Anthropic Claude Max (RFC 7636, S256).
//!
//! The browser is opened at the authorisation URL; the user pastes back a
//! string of the form `<code>#<state>`. The trailing state must match the
//! one generated here. Token exchange POSTs JSON (not form-urlencoded) and
//! tolerates gzip-compressed responses.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use rand::RngCore;
use serde::Deserialize;
use sha2::{Digest, Sha256};

use crate::error::{ZekeError, ZekeResult};

pub const AUTHORIZE_URL: &str = "https://claude.ai/oauth/authorize";
pub const TOKEN_URL: &str = "https://console.anthropic.com/v1/oauth/token";
pub const CLIENT_ID: &str = "9d1c250a-e61b-44d9-88ed-5944d1962f5e";
pub const REDIRECT_URI: &str = "https://console.anthropic.com/oauth/code/callback";
pub const SCOPES: &str = "org:create_api_key user:profile user:inference";

/// Tokens returned by the exchange or refresh endpoint.
#[derive(Clone, Debug, Deserialize)]
pub struct TokenSet {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// Seconds until the access token expires.
    pub expires_in: u64,
}

/// One in-flight PKCE attempt: verifier and state live for the duration of
/// the paste-back prompt.
pub struct PkceSession {
    code_verifier: String,
    state: String,
    pub authorize_url: String,
}

impl PkceSession {
    pub fn state(&self) -> &str {
        &self.state
    }
}

fn random_b64url(bytes: usize) -> String {
    let mut buf = vec![0u8; bytes];
    rand::thread_rng().fill_bytes(&mut buf);
    URL_SAFE_NO_PAD.encode(buf)
}

/// S256 challenge for a verifier.
fn challenge_for(verifier: &str) -> String {
    let digest = Sha256::digest(verifier.as_bytes());
    URL_SAFE_NO_PAD.encode(digest)
}

/// Starts a PKCE attempt: generates verifier and state, builds the
/// authorisation URL. The caller opens the browser and prompts for the code.
pub fn begin() -> PkceSession {
    let code_verifier = random_b64url(32);
    let state = random_b64url(32);
    let challenge = challenge_for(&code_verifier);
    let authorize_url = format!(
        "{AUTHORIZE_URL}?client_id={}&redirect_uri={}&response_type=code&scope={}&code_challenge={}&code_challenge_method=S256&state={}",
        urlencoding::encode(CLIENT_ID),
        urlencoding::encode(REDIRECT_URI),
        urlencoding::encode(SCOPES),
        urlencoding::encode(&challenge),
        urlencoding::encode(&state),
    );
    PkceSession {
        code_verifier,
        state,
        authorize_url,
    }
}

/// Opens the system browser at the session's authorisation URL. Failure is
/// non-fatal; the caller prints the URL for manual copy.
pub fn open_browser(session: &PkceSession) -> bool {
    open::that(&session.authorize_url).is_ok()
}

/// Parses the pasted `<code>#<state>` string, checking the state against the
/// session. A missing `#` suffix or a state mismatch is rejected.
pub fn parse_authorization_code(pasted: &str, expected_state: &str) -> ZekeResult<String> {
    let trimmed = pasted.trim();
    let Some((code, state)) = trimmed.split_once('#') else {
        return Err(ZekeError::InvalidArgument(
            "authorisation code must be of the form <code>#<state>".into(),
        ));
    };
    if code.is_empty() {
        return Err(ZekeError::InvalidArgument("empty authorisation code".into()));
    }
    if state != expected_state {
        return Err(ZekeError::InvalidArgument("state mismatch".into()));
    }
    Ok(code.to_string())
}

/// Reads a token-endpoint response body, decompressing when the server sent
/// `Content-Encoding: gzip`.
async fn read_token_body(response: reqwest::Response) -> ZekeResult<TokenSet> {
    let status = response.status();
    let gzipped = response
        .headers()
        .get(reqwest::header::CONTENT_ENCODING)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.contains("gzip"))
        .unwrap_or(false);
    let bytes = response
        .bytes()
        .await
        .map_err(|e| ZekeError::Network(e.to_string()))?;
    let body = if gzipped {
        decompress_gzip(&bytes)?
    } else {
        bytes.to_vec()
    };
    if !status.is_success() {
        let excerpt = String::from_utf8_lossy(&body[..body.len().min(200)]).into_owned();
        return Err(ZekeError::Server {
            status: status.as_u16(),
            excerpt,
        });
    }
    serde_json::from_slice(&body)
        .map_err(|e| ZekeError::InvalidResponse(format!("token response: {e}")))
}

pub(crate) fn decompress_gzip(bytes: &[u8]) -> ZekeResult<Vec<u8>> {
    use std::io::Read;
    let mut decoder = flate2::read::GzDecoder::new(bytes);
    let mut out = Vec::new();
    decoder
        .read_to_end(&mut out)
        .map_err(|e| ZekeError::InvalidResponse(format!("gzip body: {e}")))?;
    Ok(out)
}

/// Exchanges an authorisation code for tokens. The body is JSON per the
/// Anthropic endpoint's contract.
pub async fn exchange(
    client: &reqwest::Client,
    session: &PkceSession,
    code: &str,
) -> ZekeResult<TokenSet> {
    let response = client
        .post(TOKEN_URL)
        .json(&serde_json::json!({
            "grant_type": "authorization_code",
            "code": code,
            "code_verifier": session.code_verifier,
            "client_id": CLIENT_ID,
            "redirect_uri": REDIRECT_URI,
        }))
        .send()
        .await
        .map_err(|e| ZekeError::Network(e.to_string()))?;
    read_token_body(response).await
}

/// Refreshes an access token from a stored refresh token.
pub async fn refresh(client: &reqwest::Client, refresh_token: &str) -> ZekeResult<TokenSet> {
    let response = client
        .post(TOKEN_URL)
        .json(&serde_json::json!({
            "grant_type": "refresh_token",
            "refresh_token": refresh_token,
            "client_id": CLIENT_ID,
        }))
        .send()
        .await
        .map_err(|e| ZekeError::Network(e.to_string()))?;
    read_token_body(response).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn challenge_is_base64url_sha256_of_verifier() {
        // RFC 7636 appendix B reference vector.
        let verifier = "dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk";
        assert_eq!(
            challenge_for(verifier),
            "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM"
        );
    }

    #[test]
    fn authorize_url_carries_pkce_parameters() {
        let s = begin();
        assert!(s.authorize_url.starts_with(AUTHORIZE_URL));
        assert!(s.authorize_url.contains("code_challenge_method=S256"));
        assert!(s.authorize_url.contains("response_type=code"));
        assert!(s
            .authorize_url
            .contains(&format!("state={}", urlencoding::encode(s.state()))));
    }

    #[test]
    fn verifier_and_state_are_unique_per_session() {
        let a = begin();
        let b = begin();
        assert_ne!(a.code_verifier, b.code_verifier);
        assert_ne!(a.state, b.state);
    }

    #[test]
    fn pasted_code_without_state_suffix_rejected() {
        let err = parse_authorization_code("just-a-code", "expected").unwrap_err();
        assert!(err.to_string().contains("<code>#<state>"));
    }

    #[test]
    fn pasted_code_with_wrong_state_rejected() {
        let err = parse_authorization_code("code#wrong", "expected").unwrap_err();
        assert!(err.to_string().contains("state mismatch"));
    }

    #[test]
    fn pasted_code_with_matching_state_accepted() {
        let code = parse_authorization_code("  abc123#st-1  ", "st-1").unwrap();
        assert_eq!(code, "abc123");
    }

    #[test]
    fn gzip_round_trip_decodes() {
        use flate2::write::GzEncoder;
        use flate2::Compression;
        use std::io::Write;
        let payload = br#"{"access_token":"A","refresh_token":"R","expires_in":28800}"#;
        let mut enc = GzEncoder::new(Vec::new(), Compression::default());
        enc.write_all(payload).unwrap();
        let compressed = enc.finish().unwrap();
        let plain = decompress_gzip(&compressed).unwrap();
        let tokens: TokenSet = serde_json::from_slice(&plain).unwrap();
        assert_eq!(tokens.access_token, "A");
        assert_eq!(tokens.refresh_token.as_deref(), Some("R"));
        assert_eq!(tokens.expires_in, 28800);
    }
}
