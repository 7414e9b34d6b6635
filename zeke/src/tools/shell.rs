//! Shell-exec tool: one command through `/bin/sh -c` with captured output.
//!
//! Validation order: length cap, hard denylist, metacharacter budget, then
//! the allow-list when one is configured. All checks run before the process
//! spawns.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;

use crate::error::{ZekeError, ZekeResult};
use crate::tools::{ParamType, Tool, ToolCategory, ToolResult, ToolSchema};

pub const TOOL_SHELL_EXEC: &str = "shell_exec";

/// Longest accepted command, in bytes.
pub const MAX_COMMAND_BYTES: usize = 4096;
/// Shell metacharacters counted against the budget.
const METACHARACTERS: [char; 6] = ['`', '$', '(', ')', '{', '}'];
/// Commands with more metacharacters than this are rejected.
const MAX_METACHARACTERS: usize = 10;

/// Patterns that are never allowed, regardless of allow-list.
const DENYLIST: &[&str] = &[
    "rm -rf /",
    "rm -rf /*",
    ":(){ :|:& };:",
    "mkfs",
    "dd if=/dev/zero",
    "dd if=/dev/random",
    "> /dev/sda",
    "chmod -R 777 /",
    "shutdown",
    "reboot",
];

/// Captured execution outcome.
#[derive(Clone, Debug, serde::Serialize)]
pub struct ExecOutcome {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
    pub duration_ms: u64,
}

/// Validates one command against all static rules.
pub fn validate_command(command: &str, allow_list: Option<&[String]>) -> ZekeResult<()> {
    if command.len() > MAX_COMMAND_BYTES {
        return Err(ZekeError::CommandTooLong {
            len: command.len(),
            max: MAX_COMMAND_BYTES,
        });
    }
    for pattern in DENYLIST {
        if command.contains(pattern) {
            return Err(ZekeError::DangerousCommand(format!(
                "matches denied pattern: {pattern}"
            )));
        }
    }
    let meta_count = command
        .chars()
        .filter(|c| METACHARACTERS.contains(c))
        .count();
    if meta_count > MAX_METACHARACTERS {
        return Err(ZekeError::DangerousCommand(format!(
            "too many shell metacharacters ({meta_count})"
        )));
    }
    if let Some(allowed) = allow_list {
        let base = command.split_whitespace().next().unwrap_or_default();
        if !allowed.iter().any(|a| a == base) {
            return Err(ZekeError::DangerousCommand(format!(
                "base command not in allow-list: {base}"
            )));
        }
    }
    Ok(())
}

/// Runs the command with stdout/stderr capture and an optional timeout.
pub async fn run_command(
    command: &str,
    timeout: Option<Duration>,
) -> ZekeResult<ExecOutcome> {
    let started = Instant::now();
    let child = tokio::process::Command::new("/bin/sh")
        .arg("-c")
        .arg(command)
        .stdout(std::process::Stdio::piped())
        .stderr(std::process::Stdio::piped())
        .kill_on_drop(true)
        .spawn()?;
    let output = match timeout {
        Some(t) => tokio::time::timeout(t, child.wait_with_output())
            .await
            .map_err(|_| ZekeError::Timeout(format!("command after {t:?}")))??,
        None => child.wait_with_output().await?,
    };
    Ok(ExecOutcome {
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        exit_code: output.status.code().unwrap_or(-1),
        duration_ms: started.elapsed().as_millis() as u64,
    })
}

/// The `shell_exec` tool.
pub struct ShellExecTool {
    allow_list: Option<Vec<String>>,
    timeout: Duration,
}

impl ShellExecTool {
    pub fn new(allow_list: Option<Vec<String>>, timeout: Duration) -> Arc<Self> {
        Arc::new(Self {
            allow_list,
            timeout,
        })
    }
}

#[async_trait]
impl Tool for ShellExecTool {
    fn name(&self) -> &str {
        TOOL_SHELL_EXEC
    }

    fn description(&self) -> &str {
        "Run one shell command with captured stdout/stderr and an allow-list guard"
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::Shell
    }

    fn requires_confirmation(&self) -> bool {
        true
    }

    fn schema(&self) -> ToolSchema {
        ToolSchema::new().required("command", ParamType::String, "Command line to execute")
    }

    async fn execute(&self, params: serde_json::Value) -> ZekeResult<ToolResult> {
        let command = params["command"]
            .as_str()
            .ok_or_else(|| ZekeError::InvalidArgument("command must be a string".into()))?;
        validate_command(command, self.allow_list.as_deref())?;
        let outcome = run_command(command, Some(self.timeout)).await?;
        let body = serde_json::to_string(&outcome)
            .map_err(|e| ZekeError::InvalidResponse(format!("exec outcome: {e}")))?;
        if outcome.exit_code == 0 {
            Ok(ToolResult::ok(body))
        } else {
            Ok(ToolResult::failed(
                body,
                format!("exit code {}", outcome.exit_code),
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn length_boundary_is_exact() {
        let at = "x".repeat(MAX_COMMAND_BYTES);
        assert!(validate_command(&at, None).is_ok());
        let over = "x".repeat(MAX_COMMAND_BYTES + 1);
        assert!(matches!(
            validate_command(&over, None),
            Err(ZekeError::CommandTooLong { len: 4097, .. })
        ));
    }

    #[test]
    fn denylist_patterns_rejected() {
        for cmd in [
            "rm -rf / --no-preserve-root",
            "echo hi && mkfs.ext4 /dev/sda1",
            "dd if=/dev/zero of=/dev/sda",
            ":(){ :|:& };:",
        ] {
            assert!(
                matches!(
                    validate_command(cmd, None),
                    Err(ZekeError::DangerousCommand(_))
                ),
                "expected rejection: {cmd}"
            );
        }
    }

    #[test]
    fn metacharacter_budget_enforced() {
        let ten = "echo $(a) $(b) $(c) $HOME"; // 3 per $(..) plus one $
        assert!(validate_command(ten, None).is_ok());
        let eleven = "echo $(a) $(b) $(c) $1 $2"; // one over budget
        assert!(matches!(
            validate_command(eleven, None),
            Err(ZekeError::DangerousCommand(_))
        ));
    }

    #[test]
    fn braces_count_against_the_budget() {
        let ten = "echo {a,b} {c,d} {e,f} {g,h} {i,j}"; // 2 per expansion
        assert!(validate_command(ten, None).is_ok());
        let eleven = "echo {a,b} {c,d} {e,f} {g,h} {i,j} {"; // one over budget
        assert!(matches!(
            validate_command(eleven, None),
            Err(ZekeError::DangerousCommand(_))
        ));
    }

    #[test]
    fn allow_list_matches_base_command_only() {
        let allowed = vec!["git".to_string(), "cargo".to_string()];
        assert!(validate_command("git status", Some(&allowed)).is_ok());
        assert!(validate_command("cargo build --release", Some(&allowed)).is_ok());
        assert!(matches!(
            validate_command("curl http://example.com", Some(&allowed)),
            Err(ZekeError::DangerousCommand(_))
        ));
    }

    #[tokio::test]
    async fn captures_stdout_stderr_and_exit_code() {
        let outcome = run_command("echo out; echo err 1>&2; exit 3", None)
            .await
            .unwrap();
        assert_eq!(outcome.stdout.trim(), "out");
        assert_eq!(outcome.stderr.trim(), "err");
        assert_eq!(outcome.exit_code, 3);
    }

    #[tokio::test]
    async fn timeout_stops_long_commands() {
        let err = run_command("sleep 5", Some(Duration::from_millis(100)))
            .await
            .unwrap_err();
        assert!(matches!(err, ZekeError::Timeout(_)));
    }

    #[tokio::test]
    async fn tool_reports_nonzero_exit_as_failure() {
        let tool = ShellExecTool::new(None, Duration::from_secs(5));
        let result = tool
            .execute(serde_json::json!({"command": "false"}))
            .await
            .unwrap();
        assert!(!result.success);
        assert!(result.error.unwrap().contains("exit code 1"));
    }
}
