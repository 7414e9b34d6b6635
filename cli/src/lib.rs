//! CLI support library: command implementations behind the `zeke` binary.
//!
//! Commands run against the same dispatcher the daemon serves, so local and
//! remote invocations exercise identical code paths.

pub mod auth_cmd;
pub mod chat_cmd;
pub mod config_cmd;
pub mod info_cmd;
pub mod local;
