//! Env and config loading for Zeke.
//!
//! One place for everything the process reads from disk at startup:
//!
//! - `~/.config/zeke/zeke.toml` (or `config.toml`) — user-editable TOML with an
//!   `[env]` table applied to the process environment.
//! - A project `.env` in the working directory.
//! - Platform directories: [`config_dir`] and [`state_dir`], honouring
//!   `ZEKE_CONFIG_DIR` / `XDG_*` overrides.
//!
//! Precedence when applying keys: **existing env > .env > TOML**. The
//! environment is never written back to disk.

mod dotenv;
mod paths;
mod toml_file;
#[cfg(feature = "tracing-init")]
mod tracing_init;

pub use dotenv::parse_dotenv;
pub use paths::{config_dir, sessions_dir, state_dir};
pub use toml_file::{config_file_path, load_env_table};
#[cfg(feature = "tracing-init")]
pub use tracing_init::{init_tracing, init_tracing_with_file};

use std::path::Path;
use thiserror::Error;

/// Application name used for config/state paths (`~/.config/zeke`, `~/.local/state/zeke`).
pub const APP_NAME: &str = "zeke";

#[derive(Error, Debug)]
pub enum LoadError {
    #[error("config dir: {0}")]
    ConfigDir(String),
    #[error("read config file: {0}")]
    Read(#[from] std::io::Error),
    #[error("parse config toml: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Loads `[env]` from the Zeke TOML config and the project `.env`, then sets
/// each key that is not already present in the process environment.
///
/// * `override_dir` — when `Some`, look for `.env` there instead of the
///   current directory (used by tests and by `--project` style flags).
pub fn load_and_apply(override_dir: Option<&Path>) -> Result<(), LoadError> {
    let toml_map = toml_file::load_env_table()?;
    let dotenv_map = dotenv::load_env_file(override_dir)?;

    for (key, value) in toml_map {
        if std::env::var(&key).is_err() && !dotenv_map.contains_key(&key) {
            std::env::set_var(&key, value);
        }
    }
    for (key, value) in dotenv_map {
        if std::env::var(&key).is_err() {
            std::env::set_var(&key, value);
        }
    }
    Ok(())
}
