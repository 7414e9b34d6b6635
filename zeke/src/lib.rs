//! # Zeke
//!
//! Core library of the Zeke AI coding companion: one programmatic surface
//! over heterogeneous LLM providers, with smart routing, credential
//! management, tool execution, and an MCP client. The `serve` crate puts a
//! daemon (JSON-RPC socket + WebSocket) on top; the `cli` crate is the
//! `zeke` binary.
//!
//! ## Main modules
//!
//! - [`chat`]: normalised request/response types ([`ChatRequest`],
//!   [`ChatResponse`], [`ChatDelta`], [`Intent`], [`Complexity`]).
//! - [`providers`]: the [`Provider`] trait and one adapter per wire family
//!   (OpenAI-compatible, Azure deployments, Anthropic Messages, Gemini,
//!   Ollama native, Copilot-over-OAuth), plus the shared SSE decoder and a
//!   scripted [`MockProvider`] for tests.
//! - [`router`]: the smart router ([`SmartRouter`], [`RouterConfig`]) and
//!   the routing database ([`RoutingDb`]).
//! - [`catalog`]: [`ModelCatalog`] of [`ModelRecord`]s.
//! - [`auth`]: [`CredentialStore`] (keyring or 0600 file, env fallback),
//!   PKCE and device-code OAuth flows.
//! - [`tools`]: [`Tool`] trait, [`ToolRegistry`] with schema validation and
//!   approval policy, the file-edit / shell-exec / project-analyze tools,
//!   and the MCP remote-tool adapter.
//! - [`mcp`]: [`McpClient`] over stdio, WebSocket, or docker exec.
//! - [`analyzer`]: project analysis behind `project.analyze`.
//! - [`protocol`]: JSON-RPC envelopes, socket framing, WebSocket frames.
//! - [`error`]: the [`ZekeError`] taxonomy with exit-code and RPC-code maps.

pub mod analyzer;
pub mod auth;
pub mod catalog;
pub mod chat;
pub mod error;
pub mod mcp;
pub mod protocol;
pub mod providers;
pub mod router;
pub mod tools;

pub use catalog::{Capability, ModelCatalog, ModelRecord};
pub use chat::{ChatDelta, ChatMessage, ChatRequest, ChatResponse, Complexity, Intent};
pub use error::{ZekeError, ZekeResult};
pub use mcp::{McpClient, McpTransportConfig};
pub use providers::{MockProvider, Provider, ProviderKind};
pub use router::db::{RoutingDb, RoutingPrefs};
pub use router::{project_id, RouterConfig, RouterMode, SmartRouter};
pub use tools::{Tool, ToolRegistry, ToolResult};

pub use auth::{Credential, CredentialKind, CredentialStore};
