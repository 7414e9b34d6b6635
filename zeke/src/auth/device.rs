//! Device-code flow for GitHub Copilot (RFC 8628).
//!
//! `start` obtains the user code and verification URI; the caller shows both
//! (the CLI draws a spinner) while [`poll`] hits the token endpoint every
//! `interval` seconds. `authorization_pending` keeps waiting; `slow_down`
//! adds 5 s to the interval; everything else is terminal.

use serde::Deserialize;

use crate::error::{ZekeError, ZekeResult};

pub const DEVICE_CODE_URL: &str = "https://github.com/login/device/code";
pub const TOKEN_URL: &str = "https://github.com/login/oauth/access_token";
pub const CLIENT_ID: &str = "Iv1.b507a08c87ecfe98";
pub const SCOPE: &str = "read:user";

/// Hard bound on the whole flow regardless of the server's `expires_in`.
const MAX_FLOW_SECS: u64 = 600;
/// `slow_down` increases the poll interval by this many seconds.
const SLOW_DOWN_STEP: u64 = 5;

/// Response of the device-authorisation endpoint.
#[derive(Clone, Debug, Deserialize)]
pub struct DeviceAuthorization {
    pub device_code: String,
    pub user_code: String,
    pub verification_uri: String,
    pub interval: u64,
    pub expires_in: u64,
}

/// Outcome of one poll of the token endpoint.
#[derive(Clone, Debug, PartialEq)]
pub enum PollOutcome {
    /// Access token granted.
    Token(String),
    /// User has not finished authorising; poll again.
    Pending,
    /// Polling too fast; add [`SLOW_DOWN_STEP`] to the interval.
    SlowDown,
    /// Terminal error from the endpoint.
    Failed(String),
}

/// Classifies one token-endpoint response body.
pub fn classify_poll(body: &serde_json::Value) -> PollOutcome {
    if let Some(token) = body.get("access_token").and_then(|v| v.as_str()) {
        return PollOutcome::Token(token.to_string());
    }
    match body.get("error").and_then(|v| v.as_str()) {
        Some("authorization_pending") => PollOutcome::Pending,
        Some("slow_down") => PollOutcome::SlowDown,
        Some(other) => PollOutcome::Failed(other.to_string()),
        None => PollOutcome::Failed("token endpoint returned neither token nor error".into()),
    }
}

/// Next poll interval after an outcome.
pub fn next_interval(current: u64, outcome: &PollOutcome) -> u64 {
    match outcome {
        PollOutcome::SlowDown => current + SLOW_DOWN_STEP,
        _ => current,
    }
}

/// Starts the flow: POSTs the client id and scope, returns codes and pacing.
pub async fn start(client: &reqwest::Client) -> ZekeResult<DeviceAuthorization> {
    let response = client
        .post(DEVICE_CODE_URL)
        .header(reqwest::header::ACCEPT, "application/json")
        .form(&[("client_id", CLIENT_ID), ("scope", SCOPE)])
        .send()
        .await
        .map_err(|e| ZekeError::Network(e.to_string()))?;
    let status = response.status();
    if !status.is_success() {
        let excerpt = response.text().await.unwrap_or_default();
        return Err(ZekeError::Server {
            status: status.as_u16(),
            excerpt: excerpt.chars().take(200).collect(),
        });
    }
    response
        .json()
        .await
        .map_err(|e| ZekeError::InvalidResponse(format!("device authorisation: {e}")))
}

/// Polls until granted, denied, or timed out. `on_poll` is called before each
/// attempt (the CLI advances its spinner there).
pub async fn poll(
    client: &reqwest::Client,
    auth: &DeviceAuthorization,
    mut on_poll: impl FnMut(u32),
) -> ZekeResult<String> {
    let deadline = tokio::time::Instant::now()
        + std::time::Duration::from_secs(auth.expires_in.min(MAX_FLOW_SECS));
    let mut interval = auth.interval.max(1);
    let mut attempt: u32 = 0;

    loop {
        tokio::time::sleep(std::time::Duration::from_secs(interval)).await;
        if tokio::time::Instant::now() >= deadline {
            return Err(ZekeError::Timeout("device authorisation expired".into()));
        }
        attempt += 1;
        on_poll(attempt);

        let response = client
            .post(TOKEN_URL)
            .header(reqwest::header::ACCEPT, "application/json")
            .form(&[
                (
                    "grant_type",
                    "urn:ietf:params:oauth:grant-type:device_code",
                ),
                ("device_code", auth.device_code.as_str()),
                ("client_id", CLIENT_ID),
            ])
            .send()
            .await
            .map_err(|e| ZekeError::Network(e.to_string()))?;
        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| ZekeError::InvalidResponse(format!("token poll: {e}")))?;

        let outcome = classify_poll(&body);
        interval = next_interval(interval, &outcome);
        match outcome {
            PollOutcome::Token(token) => return Ok(token),
            PollOutcome::Pending | PollOutcome::SlowDown => continue,
            PollOutcome::Failed(reason) => {
                return Err(ZekeError::Unauthorised {
                    provider: format!("github ({reason})"),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn classify_token_response() {
        let out = classify_poll(&json!({"access_token": "G", "token_type": "bearer"}));
        assert_eq!(out, PollOutcome::Token("G".into()));
    }

    #[test]
    fn classify_pending_and_slow_down() {
        assert_eq!(
            classify_poll(&json!({"error": "authorization_pending"})),
            PollOutcome::Pending
        );
        assert_eq!(
            classify_poll(&json!({"error": "slow_down"})),
            PollOutcome::SlowDown
        );
    }

    #[test]
    fn classify_terminal_errors() {
        assert!(matches!(
            classify_poll(&json!({"error": "access_denied"})),
            PollOutcome::Failed(_)
        ));
        assert!(matches!(classify_poll(&json!({})), PollOutcome::Failed(_)));
    }

    #[test]
    fn slow_down_adds_five_seconds() {
        assert_eq!(next_interval(5, &PollOutcome::SlowDown), 10);
        assert_eq!(next_interval(10, &PollOutcome::SlowDown), 15);
        assert_eq!(next_interval(5, &PollOutcome::Pending), 5);
        assert_eq!(next_interval(5, &PollOutcome::Token("t".into())), 5);
    }

    #[test]
    fn device_authorization_parses_github_shape() {
        let auth: DeviceAuthorization = serde_json::from_value(json!({
            "device_code": "dc-1",
            "user_code": "ABCD-1234",
            "verification_uri": "https://github.com/login/device",
            "interval": 5,
            "expires_in": 900
        }))
        .unwrap();
        assert_eq!(auth.user_code, "ABCD-1234");
        assert_eq!(auth.interval, 5);
    }
}
