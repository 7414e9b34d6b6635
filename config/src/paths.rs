//! Platform directory resolution for Zeke.
//!
//! `ZEKE_CONFIG_DIR` overrides everything for the config directory; otherwise
//! XDG conventions apply via the `dirs` crate. The state directory holds the
//! routing database and daemon session lock files.

use std::path::PathBuf;

use crate::{LoadError, APP_NAME};

/// Config directory: `$ZEKE_CONFIG_DIR`, else `$XDG_CONFIG_HOME/zeke`
/// (`~/.config/zeke`). Created on first use by callers that write to it.
pub fn config_dir() -> Result<PathBuf, LoadError> {
    if let Ok(dir) = std::env::var("ZEKE_CONFIG_DIR") {
        if !dir.is_empty() {
            return Ok(PathBuf::from(dir));
        }
    }
    dirs::config_dir()
        .map(|d| d.join(APP_NAME))
        .ok_or_else(|| LoadError::ConfigDir("no platform config directory".into()))
}

/// State directory: `$XDG_STATE_HOME/zeke` (`~/.local/state/zeke`). Falls back
/// to the config directory on platforms without a state home.
pub fn state_dir() -> Result<PathBuf, LoadError> {
    if let Ok(dir) = std::env::var("ZEKE_STATE_DIR") {
        if !dir.is_empty() {
            return Ok(PathBuf::from(dir));
        }
    }
    match dirs::state_dir() {
        Some(d) => Ok(d.join(APP_NAME)),
        None => config_dir(),
    }
}

/// Directory for daemon session lock files: `<state_dir>/sessions`.
pub fn sessions_dir() -> Result<PathBuf, LoadError> {
    Ok(state_dir()?.join("sessions"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zeke_config_dir_env_wins() {
        let prev = std::env::var("ZEKE_CONFIG_DIR").ok();
        std::env::set_var("ZEKE_CONFIG_DIR", "/tmp/zeke-test-config");
        let dir = config_dir().unwrap();
        match prev {
            Some(v) => std::env::set_var("ZEKE_CONFIG_DIR", v),
            None => std::env::remove_var("ZEKE_CONFIG_DIR"),
        }
        assert_eq!(dir, PathBuf::from("/tmp/zeke-test-config"));
    }

    #[test]
    fn sessions_dir_is_under_state_dir() {
        let prev = std::env::var("ZEKE_STATE_DIR").ok();
        std::env::set_var("ZEKE_STATE_DIR", "/tmp/zeke-test-state");
        let dir = sessions_dir().unwrap();
        match prev {
            Some(v) => std::env::set_var("ZEKE_STATE_DIR", v),
            None => std::env::remove_var("ZEKE_STATE_DIR"),
        }
        assert_eq!(dir, PathBuf::from("/tmp/zeke-test-state/sessions"));
    }
}
