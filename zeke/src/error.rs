//! Error taxonomy shared across all Zeke subsystems.
//!
//! One tagged union propagated outward; message text is user-safe (no
//! credential material, no raw response bodies beyond a short excerpt).
//! The router recovers from some kinds (rate limits, timeouts, network)
//! by falling back to the next candidate; everything else surfaces.

use thiserror::Error;

/// Result alias used throughout the core crate.
pub type ZekeResult<T> = Result<T, ZekeError>;

/// Error kinds for every subsystem. Variant order follows the taxonomy table
/// in the design docs; `code_str` is the stable machine-readable identifier
/// stored in `routing_stats.error_code` and sent in RPC error frames.
#[derive(Debug, Error)]
pub enum ZekeError {
    /// Parameter or schema validation failed before any side effect.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Missing or rejected credentials for a provider.
    #[error("unauthorised for {provider}; run `zeke auth {provider}`")]
    Unauthorised { provider: String },

    /// A stored OAuth token expired and refresh failed.
    #[error("re-authentication required for {provider}")]
    ReAuthRequired { provider: String },

    /// Tool, file, model, or method not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// Provider rejected the request with 429. `retry_after` is seconds.
    #[error("rate limited{}", retry_after.map(|s| format!(" (retry after {s}s)")).unwrap_or_default())]
    RateLimited { retry_after: Option<u64> },

    /// Connect, first-token, or overall deadline expired.
    #[error("timed out: {0}")]
    Timeout(String),

    /// Transport-level failure (DNS, connect reset, TLS).
    #[error("network error: {0}")]
    Network(String),

    /// Provider returned a 5xx (or unexpected 4xx) status.
    #[error("server error {status}: {excerpt}")]
    Server { status: u16, excerpt: String },

    /// Response did not parse as the expected wire format.
    #[error("invalid provider response: {0}")]
    InvalidResponse(String),

    /// Prompt plus requested output exceeds the model context window.
    #[error("context length exceeded")]
    ContextLengthExceeded,

    /// The provider's safety layer refused the content.
    #[error("content filtered by provider")]
    ContentFiltered,

    /// Month-to-date cloud spend reached the project cap.
    #[error("cloud budget exceeded: spent {spent_cents}c of {limit_cents}c; raise max_cloud_cost_cents to continue")]
    BudgetExceeded { spent_cents: i64, limit_cents: i64 },

    /// Client cancelled the in-flight request.
    #[error("cancelled")]
    Cancelled,

    /// Routing database failure. The request may still complete.
    #[error("database error: {0}")]
    Database(String),

    /// No keyring agent available; non-fatal, store downgrades to file.
    #[error("keyring unavailable: {0}")]
    KeyringUnavailable(String),

    /// Shell command matched the hard denylist.
    #[error("dangerous command rejected: {0}")]
    DangerousCommand(String),

    /// Shell command exceeds the 4096-byte limit.
    #[error("command too long: {len} bytes (max {max})")]
    CommandTooLong { len: usize, max: usize },

    /// Path escapes the workspace root or contains `..`.
    #[error("path traversal not allowed: {0}")]
    PathTraversal(String),

    /// File-edit content exceeds the 10 MiB limit.
    #[error("content too large: {size} bytes (max {max})")]
    ContentTooLarge { size: usize, max: usize },

    /// Filesystem failure outside the specific cases above.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl ZekeError {
    /// Stable machine-readable code, recorded in `routing_stats.error_code`
    /// and carried in RPC/WS error frames.
    pub fn code_str(&self) -> &'static str {
        match self {
            ZekeError::InvalidArgument(_) => "invalid_argument",
            ZekeError::Unauthorised { .. } => "unauthorised",
            ZekeError::ReAuthRequired { .. } => "reauth_required",
            ZekeError::NotFound(_) => "not_found",
            ZekeError::RateLimited { .. } => "rate_limited",
            ZekeError::Timeout(_) => "timeout",
            ZekeError::Network(_) => "network_error",
            ZekeError::Server { .. } => "server_error",
            ZekeError::InvalidResponse(_) => "invalid_response",
            ZekeError::ContextLengthExceeded => "context_length_exceeded",
            ZekeError::ContentFiltered => "content_filtered",
            ZekeError::BudgetExceeded { .. } => "budget_exceeded",
            ZekeError::Cancelled => "cancelled",
            ZekeError::Database(_) => "database_error",
            ZekeError::KeyringUnavailable(_) => "keyring_unavailable",
            ZekeError::DangerousCommand(_) => "dangerous_command",
            ZekeError::CommandTooLong { .. } => "command_too_long",
            ZekeError::PathTraversal(_) => "path_traversal",
            ZekeError::ContentTooLarge { .. } => "content_too_large",
            ZekeError::Io(_) => "io_error",
        }
    }

    /// CLI process exit code: 0 success, 1 generic, 2 usage, 3 auth,
    /// 4 provider unavailable, 5 budget.
    pub fn exit_code(&self) -> i32 {
        match self {
            ZekeError::InvalidArgument(_) => 2,
            ZekeError::Unauthorised { .. } | ZekeError::ReAuthRequired { .. } => 3,
            ZekeError::RateLimited { .. }
            | ZekeError::Timeout(_)
            | ZekeError::Network(_)
            | ZekeError::Server { .. } => 4,
            ZekeError::BudgetExceeded { .. } => 5,
            _ => 1,
        }
    }

    /// JSON-RPC error code. Standard codes for argument/method problems,
    /// implementation-defined codes (-32000 block) for domain errors.
    pub fn rpc_code(&self) -> i64 {
        match self {
            ZekeError::InvalidArgument(_) => -32602,
            ZekeError::NotFound(_) => -32001,
            ZekeError::Unauthorised { .. } | ZekeError::ReAuthRequired { .. } => -32002,
            ZekeError::RateLimited { .. } => -32003,
            ZekeError::Timeout(_) => -32004,
            ZekeError::BudgetExceeded { .. } => -32005,
            ZekeError::Cancelled => -32006,
            ZekeError::Database(_) => -32603,
            _ => -32000,
        }
    }

    /// Whether the router may try the next candidate after this failure.
    pub fn recoverable_by_fallback(&self) -> bool {
        matches!(
            self,
            ZekeError::RateLimited { .. }
                | ZekeError::Timeout(_)
                | ZekeError::Network(_)
                | ZekeError::Server { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_follow_cli_contract() {
        assert_eq!(ZekeError::InvalidArgument("x".into()).exit_code(), 2);
        assert_eq!(
            ZekeError::Unauthorised {
                provider: "openai".into()
            }
            .exit_code(),
            3
        );
        assert_eq!(ZekeError::Network("down".into()).exit_code(), 4);
        assert_eq!(
            ZekeError::BudgetExceeded {
                spent_cents: 600,
                limit_cents: 500
            }
            .exit_code(),
            5
        );
        assert_eq!(ZekeError::ContentFiltered.exit_code(), 1);
    }

    #[test]
    fn unauthorised_is_not_recoverable() {
        assert!(!ZekeError::Unauthorised {
            provider: "xai".into()
        }
        .recoverable_by_fallback());
        assert!(ZekeError::RateLimited { retry_after: None }.recoverable_by_fallback());
        assert!(ZekeError::Timeout("first token".into()).recoverable_by_fallback());
    }

    #[test]
    fn rate_limited_display_mentions_retry_after() {
        let e = ZekeError::RateLimited {
            retry_after: Some(30),
        };
        assert!(e.to_string().contains("30"));
        let e = ZekeError::RateLimited { retry_after: None };
        assert_eq!(e.to_string(), "rate limited");
    }
}
