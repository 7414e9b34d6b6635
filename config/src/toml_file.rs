//! `zeke.toml` / `config.toml` loading: the `[env]` table.
//!
//! The rest of the TOML file (provider endpoints, tool allow-lists) is read
//! lazily by the subsystems that own those settings; this module only applies
//! the `[env]` table so every knob can also be set declaratively.

use std::collections::HashMap;
use std::path::PathBuf;

use crate::{paths, LoadError};

#[derive(serde::Deserialize, Default)]
struct EnvTable {
    #[serde(default)]
    env: HashMap<String, String>,
}

/// Path of the config file if one exists: `<config_dir>/zeke.toml`, falling
/// back to `<config_dir>/config.toml`.
pub fn config_file_path() -> Result<Option<PathBuf>, LoadError> {
    let dir = paths::config_dir()?;
    for name in ["zeke.toml", "config.toml"] {
        let p = dir.join(name);
        if p.is_file() {
            return Ok(Some(p));
        }
    }
    Ok(None)
}

/// Returns the `[env]` table from the config file. Missing file or missing
/// table yields an empty map; a malformed file is an error.
pub fn load_env_table() -> Result<HashMap<String, String>, LoadError> {
    let Some(path) = config_file_path()? else {
        return Ok(HashMap::new());
    };
    let content = std::fs::read_to_string(&path)?;
    let table: EnvTable = toml::from_str(&content)?;
    Ok(table.env)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with_config_dir<R>(f: impl FnOnce(&std::path::Path) -> R) -> R {
        let dir = tempfile::tempdir().unwrap();
        let prev = std::env::var("ZEKE_CONFIG_DIR").ok();
        std::env::set_var("ZEKE_CONFIG_DIR", dir.path());
        let out = f(dir.path());
        match prev {
            Some(v) => std::env::set_var("ZEKE_CONFIG_DIR", v),
            None => std::env::remove_var("ZEKE_CONFIG_DIR"),
        }
        out
    }

    #[test]
    fn zeke_toml_preferred_over_config_toml() {
        with_config_dir(|dir| {
            std::fs::write(dir.join("config.toml"), "[env]\nA = \"cfg\"\n").unwrap();
            std::fs::write(dir.join("zeke.toml"), "[env]\nA = \"zeke\"\n").unwrap();
            let map = load_env_table().unwrap();
            assert_eq!(map.get("A").map(String::as_str), Some("zeke"));
        });
    }

    #[test]
    fn missing_file_is_empty() {
        with_config_dir(|_| {
            assert!(load_env_table().unwrap().is_empty());
        });
    }

    #[test]
    fn malformed_toml_is_error() {
        with_config_dir(|dir| {
            std::fs::write(dir.join("zeke.toml"), "not [[ toml").unwrap();
            assert!(matches!(load_env_table(), Err(LoadError::Parse(_))));
        });
    }
}
