//! File-edit tool: diff preview, optional backup, atomic write.
//!
//! Path checks are defence in depth, not a sandbox: `..` segments are
//! rejected outright and absolute paths must stay under the configured
//! workspace root when one is set. Writes go through a temp file and a
//! rename on the same filesystem, so no error path leaves a partial file.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::{ZekeError, ZekeResult};
use crate::tools::{ParamType, Tool, ToolCategory, ToolResult, ToolSchema};

/// Content cap for one edit.
pub const MAX_CONTENT_BYTES: usize = 10 * 1024 * 1024;

pub const TOOL_FILE_WRITE: &str = "file_write";

/// One requested edit.
#[derive(Clone, Debug)]
pub struct FileEdit {
    pub file_path: PathBuf,
    pub new_content: String,
    pub create_backup: bool,
}

/// Validates the path: no `..` anywhere; absolute paths must be under
/// `workspace_root` when configured.
pub fn check_path(path: &Path, workspace_root: Option<&Path>) -> ZekeResult<()> {
    if path
        .components()
        .any(|c| matches!(c, std::path::Component::ParentDir))
    {
        return Err(ZekeError::PathTraversal(path.display().to_string()));
    }
    if let (true, Some(root)) = (path.is_absolute(), workspace_root) {
        if !path.starts_with(root) {
            return Err(ZekeError::PathTraversal(path.display().to_string()));
        }
    }
    Ok(())
}

/// Unified-diff-like preview from a naïve line-by-line walk. Good enough for
/// editor display; not a minimal edit script.
pub fn preview(path: &Path, old: &str, new: &str) -> String {
    let mut out = String::new();
    out.push_str(&format!("--- {}\n", path.display()));
    out.push_str(&format!("+++ {}\n", path.display()));
    let old_lines: Vec<&str> = old.lines().collect();
    let new_lines: Vec<&str> = new.lines().collect();
    let common = old_lines.len().min(new_lines.len());
    for i in 0..common {
        if old_lines[i] == new_lines[i] {
            out.push_str(&format!(" {}\n", old_lines[i]));
        } else {
            out.push_str(&format!("-{}\n", old_lines[i]));
            out.push_str(&format!("+{}\n", new_lines[i]));
        }
    }
    for line in &old_lines[common..] {
        out.push_str(&format!("-{line}\n"));
    }
    for line in &new_lines[common..] {
        out.push_str(&format!("+{line}\n"));
    }
    out
}

/// Applies one edit. Returns the backup path when one was written.
pub fn apply_edit(
    edit: &FileEdit,
    workspace_root: Option<&Path>,
    backup_dir: &Path,
) -> ZekeResult<Option<PathBuf>> {
    check_path(&edit.file_path, workspace_root)?;
    if edit.new_content.len() > MAX_CONTENT_BYTES {
        return Err(ZekeError::ContentTooLarge {
            size: edit.new_content.len(),
            max: MAX_CONTENT_BYTES,
        });
    }

    let existing = match std::fs::read_to_string(&edit.file_path) {
        Ok(content) => Some(content),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
        Err(e) => return Err(ZekeError::Io(e)),
    };

    let mut backup_path = None;
    if edit.create_backup {
        if let Some(content) = &existing {
            std::fs::create_dir_all(backup_dir)?;
            let basename = edit
                .file_path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "file".into());
            let target = backup_dir.join(format!(
                "{basename}.{}.backup",
                chrono::Utc::now().timestamp()
            ));
            std::fs::write(&target, content)?;
            backup_path = Some(target);
        }
    }

    if let Some(parent) = edit.file_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    // Temp file beside the target keeps the rename on one filesystem.
    let tmp = edit.file_path.with_extension(format!(
        "zeke-tmp.{}",
        uuid::Uuid::new_v4().simple()
    ));
    std::fs::write(&tmp, &edit.new_content)?;
    if let Err(e) = std::fs::rename(&tmp, &edit.file_path) {
        let _ = std::fs::remove_file(&tmp);
        return Err(ZekeError::Io(e));
    }
    Ok(backup_path)
}

/// The `file_write` tool.
pub struct FileEditTool {
    workspace_root: Option<PathBuf>,
    backup_dir: PathBuf,
}

impl FileEditTool {
    pub fn new(workspace_root: Option<PathBuf>, backup_dir: PathBuf) -> Arc<Self> {
        Arc::new(Self {
            workspace_root,
            backup_dir,
        })
    }
}

#[async_trait]
impl Tool for FileEditTool {
    fn name(&self) -> &str {
        TOOL_FILE_WRITE
    }

    fn description(&self) -> &str {
        "Write content to a file with diff preview, optional backup, and atomic replace"
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::File
    }

    fn requires_confirmation(&self) -> bool {
        true
    }

    fn schema(&self) -> ToolSchema {
        ToolSchema::new()
            .required("path", ParamType::String, "Target file path")
            .required("content", ParamType::String, "New file content")
            .optional(
                "create_backup",
                ParamType::Boolean,
                "Copy the previous content into the backup directory first",
                Some(serde_json::json!(true)),
            )
            .optional(
                "preview_only",
                ParamType::Boolean,
                "Return the diff without writing",
                Some(serde_json::json!(false)),
            )
    }

    async fn execute(&self, params: serde_json::Value) -> ZekeResult<ToolResult> {
        let path = PathBuf::from(
            params["path"]
                .as_str()
                .ok_or_else(|| ZekeError::InvalidArgument("path must be a string".into()))?,
        );
        let content = params["content"]
            .as_str()
            .ok_or_else(|| ZekeError::InvalidArgument("content must be a string".into()))?
            .to_string();
        let create_backup = params["create_backup"].as_bool().unwrap_or(true);
        let preview_only = params["preview_only"].as_bool().unwrap_or(false);

        let edit = FileEdit {
            file_path: path.clone(),
            new_content: content,
            create_backup,
        };

        if preview_only {
            check_path(&edit.file_path, self.workspace_root.as_deref())?;
            let old = std::fs::read_to_string(&edit.file_path).unwrap_or_default();
            return Ok(ToolResult::ok(preview(&path, &old, &edit.new_content)));
        }

        let workspace_root = self.workspace_root.clone();
        let backup_dir = self.backup_dir.clone();
        let backup = tokio::task::spawn_blocking(move || {
            apply_edit(&edit, workspace_root.as_deref(), &backup_dir)
        })
        .await
        .map_err(|e| ZekeError::InvalidResponse(format!("edit task: {e}")))??;

        let mut message = format!("wrote {}", path.display());
        if let Some(b) = backup {
            message.push_str(&format!(" (backup: {})", b.display()));
        }
        Ok(ToolResult::ok(message))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dotdot_anywhere_is_rejected() {
        assert!(matches!(
            check_path(Path::new("src/../etc/passwd"), None),
            Err(ZekeError::PathTraversal(_))
        ));
        assert!(matches!(
            check_path(Path::new("../x"), None),
            Err(ZekeError::PathTraversal(_))
        ));
        assert!(check_path(Path::new("src/main.rs"), None).is_ok());
    }

    #[test]
    fn absolute_path_outside_workspace_rejected() {
        let root = Path::new("/workspace/proj");
        assert!(check_path(Path::new("/workspace/proj/src/a.rs"), Some(root)).is_ok());
        assert!(matches!(
            check_path(Path::new("/etc/passwd"), Some(root)),
            Err(ZekeError::PathTraversal(_))
        ));
    }

    #[test]
    fn content_at_limit_accepted_over_limit_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let at_limit = FileEdit {
            file_path: dir.path().join("big.txt"),
            new_content: "a".repeat(MAX_CONTENT_BYTES),
            create_backup: false,
        };
        assert!(apply_edit(&at_limit, None, dir.path()).is_ok());

        let over = FileEdit {
            file_path: dir.path().join("bigger.txt"),
            new_content: "a".repeat(MAX_CONTENT_BYTES + 1),
            create_backup: false,
        };
        assert!(matches!(
            apply_edit(&over, None, dir.path()),
            Err(ZekeError::ContentTooLarge { .. })
        ));
        assert!(!dir.path().join("bigger.txt").exists());
    }

    #[test]
    fn backup_written_for_existing_file_only() {
        let dir = tempfile::tempdir().unwrap();
        let backups = dir.path().join("backups");
        let target = dir.path().join("a.txt");

        // New file: no backup even when requested.
        let first = FileEdit {
            file_path: target.clone(),
            new_content: "v1".into(),
            create_backup: true,
        };
        assert!(apply_edit(&first, None, &backups).unwrap().is_none());

        // Overwrite: previous content is preserved.
        let second = FileEdit {
            file_path: target.clone(),
            new_content: "v2".into(),
            create_backup: true,
        };
        let backup = apply_edit(&second, None, &backups).unwrap().unwrap();
        assert_eq!(std::fs::read_to_string(&backup).unwrap(), "v1");
        assert_eq!(std::fs::read_to_string(&target).unwrap(), "v2");
    }

    #[test]
    fn parent_directories_created() {
        let dir = tempfile::tempdir().unwrap();
        let edit = FileEdit {
            file_path: dir.path().join("deep/nested/file.rs"),
            new_content: "fn x() {}".into(),
            create_backup: false,
        };
        apply_edit(&edit, None, dir.path()).unwrap();
        assert_eq!(
            std::fs::read_to_string(dir.path().join("deep/nested/file.rs")).unwrap(),
            "fn x() {}"
        );
    }

    #[test]
    fn preview_marks_changed_added_removed_lines() {
        let p = Path::new("x.rs");
        let diff = preview(p, "a\nb\nc\n", "a\nB\nc\nd\n");
        assert!(diff.starts_with("--- x.rs\n+++ x.rs\n"));
        assert!(diff.contains(" a\n"));
        assert!(diff.contains("-b\n"));
        assert!(diff.contains("+B\n"));
        assert!(diff.contains("+d\n"));
    }

    #[test]
    fn preview_for_new_file_is_all_additions() {
        let diff = preview(Path::new("new.rs"), "", "one\ntwo\n");
        assert!(diff.contains("+one\n"));
        assert!(diff.contains("+two\n"));
        assert!(diff.lines().skip(2).all(|l| !l.starts_with('-')));
    }

    #[tokio::test]
    async fn tool_executes_end_to_end() {
        let dir = tempfile::tempdir().unwrap();
        let tool = FileEditTool::new(None, dir.path().join("backups"));
        let path = dir.path().join("out.txt");
        let result = tool
            .execute(serde_json::json!({
                "path": path.to_string_lossy(),
                "content": "hello",
                "create_backup": false,
                "preview_only": false,
            }))
            .await
            .unwrap();
        assert!(result.success);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "hello");
    }
}
