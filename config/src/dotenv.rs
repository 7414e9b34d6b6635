//! Minimal `.env` parser. Keys are applied by `load_and_apply` in `lib.rs`;
//! this module never touches the process environment itself.

use std::collections::HashMap;
use std::path::Path;

/// Parses `.env` content: `KEY=VALUE` per line, `#` comment lines skipped,
/// keys and values trimmed. Double-quoted values support `\"`; single-quoted
/// values are stripped verbatim. No multiline values.
pub fn parse_dotenv(content: &str) -> HashMap<String, String> {
    let mut map = HashMap::new();
    for raw in content.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some((key, rest)) = line.split_once('=') else {
            continue;
        };
        let key = key.trim();
        if key.is_empty() {
            continue;
        }
        map.insert(key.to_string(), unquote(rest.trim()));
    }
    map
}

fn unquote(value: &str) -> String {
    if let Some(inner) = value
        .strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
    {
        return inner.replace("\\\"", "\"");
    }
    if let Some(inner) = value
        .strip_prefix('\'')
        .and_then(|s| s.strip_suffix('\''))
    {
        return inner.to_string();
    }
    value.to_string()
}

/// Loads `.env` from `override_dir` (or the current directory) into a map.
/// A missing file is not an error; it returns an empty map.
pub fn load_env_file(override_dir: Option<&Path>) -> std::io::Result<HashMap<String, String>> {
    let dir = match override_dir {
        Some(d) => d.to_path_buf(),
        None => match std::env::current_dir() {
            Ok(d) => d,
            Err(_) => return Ok(HashMap::new()),
        },
    };
    let path = dir.join(".env");
    if !path.is_file() {
        return Ok(HashMap::new());
    }
    Ok(parse_dotenv(&std::fs::read_to_string(path)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_pairs() {
        let m = parse_dotenv("ANTHROPIC_API_KEY=sk-test\nZEKE_LOG_LEVEL=debug\n");
        assert_eq!(m.get("ANTHROPIC_API_KEY").map(String::as_str), Some("sk-test"));
        assert_eq!(m.get("ZEKE_LOG_LEVEL").map(String::as_str), Some("debug"));
    }

    #[test]
    fn skips_comments_blank_lines_and_bare_words() {
        let m = parse_dotenv("# comment\n\nnot_a_pair\nKEY=v\n");
        assert_eq!(m.len(), 1);
        assert_eq!(m.get("KEY").map(String::as_str), Some("v"));
    }

    #[test]
    fn double_quotes_with_escape() {
        let m = parse_dotenv(r#"KEY="a \"b\" c""#);
        assert_eq!(m.get("KEY").map(String::as_str), Some(r#"a "b" c"#));
    }

    #[test]
    fn single_quotes_verbatim() {
        let m = parse_dotenv("KEY='raw \\\" text'");
        assert_eq!(m.get("KEY").map(String::as_str), Some("raw \\\" text"));
    }

    #[test]
    fn empty_value_kept() {
        let m = parse_dotenv("KEY=\n");
        assert_eq!(m.get("KEY").map(String::as_str), Some(""));
    }

    #[test]
    fn empty_key_dropped() {
        let m = parse_dotenv("=orphan\n");
        assert!(m.is_empty());
    }

    #[test]
    fn missing_file_is_empty_map() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_env_file(Some(dir.path())).unwrap().is_empty());
    }
}
