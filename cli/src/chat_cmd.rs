//! Chat-family commands: `chat`, `ask`, `explain`, `fix`, `test`, `edit`,
//! `refactor`, `generate`.
//!
//! Code-action commands wrap the file content into an intent-tagged prompt;
//! `edit` asks the model for the complete new file and applies it through
//! the file-edit tool (diff preview first, `--dry-run` stops there).

use std::io::Write as _;
use std::path::{Path, PathBuf};

use serde_json::json;

use zeke::chat::Intent;
use zeke::tools::file_edit::{apply_edit, preview, FileEdit};
use zeke::{ZekeError, ZekeResult};

use crate::local::LocalBackend;

/// Runs one chat turn. Streaming prints deltas as they arrive; otherwise
/// the full response is printed at the end.
pub async fn chat(
    backend: &mut LocalBackend,
    prompt: &str,
    intent: Intent,
    provider: Option<&str>,
    model: Option<&str>,
    stream: bool,
    json_output: bool,
) -> ZekeResult<()> {
    let mut params = json!({
        "prompt": prompt,
        "intent": intent.as_str(),
    });
    if let Some(p) = provider {
        params["provider"] = json!(p);
    }
    if let Some(m) = model {
        params["model"] = json!(m);
    }

    if stream {
        backend.start_stream(params).await?;
        // The first queued frame is the response carrying the stream id;
        // stream.delta / stream.end notifications follow in order.
        let mut stream_id: Option<String> = None;
        while let Some(raw) = backend.notifications.recv().await {
            let Ok(frame) = serde_json::from_str::<serde_json::Value>(&raw) else {
                continue;
            };
            if stream_id.is_none() {
                if let Some(sid) = frame["result"]["stream_id"].as_str() {
                    stream_id = Some(sid.to_string());
                }
                continue;
            }
            let params = &frame["params"];
            if params["id"].as_str() != stream_id.as_deref() {
                continue;
            }
            match frame["method"].as_str() {
                Some("stream.delta") => {
                    if let Some(text) = params["text"].as_str() {
                        print!("{text}");
                        let _ = std::io::stdout().flush();
                    }
                }
                Some("stream.end") => {
                    println!();
                    if let Some(err) = params["error"].as_str() {
                        return Err(ZekeError::InvalidResponse(err.to_string()));
                    }
                    break;
                }
                _ => {}
            }
        }
        return Ok(());
    }

    let response = backend.call("chat.complete", params).await?;
    if json_output {
        println!("{response}");
    } else {
        println!(
            "{}",
            response.get("content").and_then(|c| c.as_str()).unwrap_or("")
        );
        tracing::debug!(
            "answered by {}:{} in {}ms",
            response["provider"].as_str().unwrap_or("?"),
            response["model"].as_str().unwrap_or("?"),
            response["latency_ms"].as_u64().unwrap_or(0),
        );
    }
    Ok(())
}

fn read_source(file: &Path) -> ZekeResult<String> {
    std::fs::read_to_string(file).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => ZekeError::NotFound(format!("file: {}", file.display())),
        _ => ZekeError::Io(e),
    })
}

/// `explain <file>`: walk through what the code does.
pub async fn explain(backend: &mut LocalBackend, file: &Path, stream: bool) -> ZekeResult<()> {
    let source = read_source(file)?;
    let prompt = format!(
        "Explain what this file does, section by section.\n\nFile: {}\n```\n{source}\n```",
        file.display()
    );
    chat(backend, &prompt, Intent::Explain, None, None, stream, false).await
}

/// `fix <file>`: point out bugs and propose fixes.
pub async fn fix(backend: &mut LocalBackend, file: &Path, stream: bool) -> ZekeResult<()> {
    let source = read_source(file)?;
    let prompt = format!(
        "Find bugs in this file and show the corrected code for each.\n\nFile: {}\n```\n{source}\n```",
        file.display()
    );
    chat(backend, &prompt, Intent::Code, None, None, stream, false).await
}

/// `test <file>`: generate tests for the file.
pub async fn test(backend: &mut LocalBackend, file: &Path, stream: bool) -> ZekeResult<()> {
    let source = read_source(file)?;
    let prompt = format!(
        "Write tests covering the public behaviour of this file.\n\nFile: {}\n```\n{source}\n```",
        file.display()
    );
    chat(backend, &prompt, Intent::Tests, None, None, stream, false).await
}

/// `refactor <instruction>`: refactoring advice for the current project.
pub async fn refactor(backend: &mut LocalBackend, instruction: &str) -> ZekeResult<()> {
    let prompt = format!("Refactoring task for the current project: {instruction}");
    chat(backend, &prompt, Intent::Refactor, None, None, false, false).await
}

/// `generate function|test <desc>`.
pub async fn generate(backend: &mut LocalBackend, what: &str, desc: &str) -> ZekeResult<()> {
    let (intent, prompt) = match what {
        "function" => (
            Intent::Code,
            format!("Write a function that does the following: {desc}"),
        ),
        "test" => (Intent::Tests, format!("Write a test for: {desc}")),
        other => {
            return Err(ZekeError::InvalidArgument(format!(
                "generate takes `function` or `test`, got {other}"
            )))
        }
    };
    chat(backend, &prompt, intent, None, None, false, false).await
}

/// `edit <file> <instruction> [--dry-run]`: model rewrites the file, we show
/// the diff, then apply atomically (with backup) unless dry-running.
pub async fn edit(
    backend: &mut LocalBackend,
    file: &Path,
    instruction: &str,
    dry_run: bool,
) -> ZekeResult<()> {
    let source = read_source(file)?;
    let prompt = format!(
        "Apply this instruction to the file and output ONLY the complete new file content, \
         no fences and no commentary.\n\nInstruction: {instruction}\n\nFile: {}\n```\n{source}\n```",
        file.display()
    );
    let response = backend
        .call(
            "chat.complete",
            json!({"prompt": prompt, "intent": "refactor"}),
        )
        .await?;
    let new_content = response
        .get("content")
        .and_then(|c| c.as_str())
        .ok_or_else(|| ZekeError::InvalidResponse("empty edit response".into()))?;
    let new_content = strip_code_fences(new_content);

    println!("{}", preview(file, &source, &new_content));
    if dry_run {
        println!("(dry run, file unchanged)");
        return Ok(());
    }

    let backup_dir = backup_dir()?;
    let edit = FileEdit {
        file_path: file.to_path_buf(),
        new_content,
        create_backup: true,
    };
    let backup = apply_edit(&edit, None, &backup_dir)?;
    println!("applied edit to {}", file.display());
    if let Some(b) = backup {
        println!("backup: {}", b.display());
    }
    Ok(())
}

fn backup_dir() -> ZekeResult<PathBuf> {
    env_config::state_dir()
        .map(|d| d.join("backups"))
        .map_err(|e| ZekeError::InvalidArgument(format!("state dir: {e}")))
}

/// Models often fence the output anyway; tolerate it.
fn strip_code_fences(content: &str) -> String {
    let trimmed = content.trim();
    let Some(inner) = trimmed.strip_prefix("```") else {
        return content.to_string();
    };
    let Some(inner) = inner.strip_suffix("```") else {
        return content.to_string();
    };
    // Drop the language tag on the opening fence, keep the rest verbatim.
    match inner.split_once('\n') {
        Some((_, body)) => body.to_string(),
        None => inner.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fenced_output_is_unwrapped() {
        let fenced = "```rust\nfn main() {}\n```";
        assert_eq!(strip_code_fences(fenced), "fn main() {}\n");
    }

    #[test]
    fn unfenced_output_is_untouched() {
        assert_eq!(strip_code_fences("plain text"), "plain text");
    }

    #[test]
    fn partial_fence_is_untouched() {
        assert_eq!(strip_code_fences("```rust\nunfinished"), "```rust\nunfinished");
    }
}
