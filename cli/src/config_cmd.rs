//! `config` subcommands: show, edit, validate, set.
//!
//! The file is `<config_dir>/zeke.toml` (created on first `set`). Only the
//! `[env]` table is manipulated here; everything else is hand-edited.

use std::path::PathBuf;

use zeke::{ZekeError, ZekeResult};

fn config_path() -> ZekeResult<PathBuf> {
    if let Some(existing) = env_config::config_file_path()
        .map_err(|e| ZekeError::InvalidArgument(format!("config dir: {e}")))?
    {
        return Ok(existing);
    }
    env_config::config_dir()
        .map(|d| d.join("zeke.toml"))
        .map_err(|e| ZekeError::InvalidArgument(format!("config dir: {e}")))
}

pub fn show() -> ZekeResult<()> {
    let path = config_path()?;
    println!("# {}", path.display());
    match std::fs::read_to_string(&path) {
        Ok(content) => println!("{content}"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => println!("(no config file yet)"),
        Err(e) => return Err(ZekeError::Io(e)),
    }
    Ok(())
}

pub fn edit() -> ZekeResult<()> {
    let path = config_path()?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let editor = std::env::var("EDITOR").unwrap_or_else(|_| "vi".to_string());
    let status = std::process::Command::new(editor).arg(&path).status()?;
    if !status.success() {
        return Err(ZekeError::InvalidArgument("editor exited with error".into()));
    }
    validate()
}

pub fn validate() -> ZekeResult<()> {
    let path = config_path()?;
    match std::fs::read_to_string(&path) {
        Ok(content) => {
            toml::from_str::<toml::Table>(&content)
                .map_err(|e| ZekeError::InvalidArgument(format!("invalid config: {e}")))?;
            println!("config ok: {}", path.display());
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            println!("no config file, nothing to validate");
            Ok(())
        }
        Err(e) => Err(ZekeError::Io(e)),
    }
}

/// Sets `[env] KEY = "value"`, preserving the rest of the document.
pub fn set(key: &str, value: &str) -> ZekeResult<()> {
    let path = config_path()?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut doc: toml::Table = match std::fs::read_to_string(&path) {
        Ok(content) => toml::from_str(&content)
            .map_err(|e| ZekeError::InvalidArgument(format!("invalid config: {e}")))?,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => toml::Table::new(),
        Err(e) => return Err(ZekeError::Io(e)),
    };
    let env = doc
        .entry("env".to_string())
        .or_insert_with(|| toml::Value::Table(toml::Table::new()));
    let env_table = env
        .as_table_mut()
        .ok_or_else(|| ZekeError::InvalidArgument("[env] is not a table".into()))?;
    env_table.insert(key.to_string(), toml::Value::String(value.to_string()));

    let body = toml::to_string_pretty(&doc)
        .map_err(|e| ZekeError::InvalidArgument(format!("config encode: {e}")))?;
    let tmp = path.with_extension("toml.tmp");
    std::fs::write(&tmp, body)?;
    std::fs::rename(&tmp, &path)?;
    println!("set {key} in {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with_config_dir<R>(f: impl FnOnce() -> R) -> R {
        let dir = tempfile::tempdir().unwrap();
        let prev = std::env::var("ZEKE_CONFIG_DIR").ok();
        std::env::set_var("ZEKE_CONFIG_DIR", dir.path());
        let out = f();
        match prev {
            Some(v) => std::env::set_var("ZEKE_CONFIG_DIR", v),
            None => std::env::remove_var("ZEKE_CONFIG_DIR"),
        }
        out
    }

    #[test]
    fn set_creates_env_table_and_preserves_other_keys() {
        with_config_dir(|| {
            set("ZEKE_LOG_LEVEL", "debug").unwrap();
            set("OPENAI_API_KEY", "sk-x").unwrap();
            let path = config_path().unwrap();
            let doc: toml::Table =
                toml::from_str(&std::fs::read_to_string(path).unwrap()).unwrap();
            let env = doc["env"].as_table().unwrap();
            assert_eq!(env["ZEKE_LOG_LEVEL"].as_str(), Some("debug"));
            assert_eq!(env["OPENAI_API_KEY"].as_str(), Some("sk-x"));
        });
    }

    #[test]
    fn validate_accepts_valid_and_missing_config() {
        with_config_dir(|| {
            assert!(validate().is_ok());
            set("A", "b").unwrap();
            assert!(validate().is_ok());
        });
    }
}
