//! Project-analysis tool: wraps the analyzer for `tool.execute`.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;

use crate::analyzer::{analyze_project, DependencyScorer, HeuristicScorer};
use crate::error::{ZekeError, ZekeResult};
use crate::tools::{ParamType, Tool, ToolCategory, ToolResult, ToolSchema};

pub const TOOL_PROJECT_ANALYZE: &str = "project_analyze";

/// Analysis as a tool. Read-only, so no confirmation required.
pub struct ProjectAnalyzeTool {
    scorer: Arc<dyn DependencyScorer>,
}

impl ProjectAnalyzeTool {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            scorer: Arc::new(HeuristicScorer),
        })
    }

    pub fn with_scorer(scorer: Arc<dyn DependencyScorer>) -> Arc<Self> {
        Arc::new(Self { scorer })
    }
}

#[async_trait]
impl Tool for ProjectAnalyzeTool {
    fn name(&self) -> &str {
        TOOL_PROJECT_ANALYZE
    }

    fn description(&self) -> &str {
        "Analyze a project: manifest, dependencies, module count, health summary"
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::Analysis
    }

    fn schema(&self) -> ToolSchema {
        ToolSchema::new().optional(
            "path",
            ParamType::String,
            "Project root (defaults to the current directory)",
            Some(serde_json::json!(".")),
        )
    }

    async fn execute(&self, params: serde_json::Value) -> ZekeResult<ToolResult> {
        let path = PathBuf::from(params["path"].as_str().unwrap_or("."));
        let scorer = self.scorer.clone();
        let analysis =
            tokio::task::spawn_blocking(move || analyze_project(&path, scorer.as_ref()))
                .await
                .map_err(|e| ZekeError::InvalidResponse(format!("analyze task: {e}")))??;
        let body = serde_json::to_string_pretty(&analysis)
            .map_err(|e| ZekeError::InvalidResponse(format!("analysis encode: {e}")))?;
        Ok(ToolResult::ok(body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn analyzes_a_minimal_project() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("Cargo.toml"),
            "[package]\nname = \"t\"\nversion = \"1.0.0\"\n",
        )
        .unwrap();
        std::fs::create_dir_all(dir.path().join("src")).unwrap();
        std::fs::write(dir.path().join("src/main.rs"), "fn main() {}\n").unwrap();

        let tool = ProjectAnalyzeTool::new();
        let result = tool
            .execute(serde_json::json!({"path": dir.path().to_string_lossy()}))
            .await
            .unwrap();
        assert!(result.success);
        let parsed: crate::analyzer::ProjectAnalysis =
            serde_json::from_str(&result.output).unwrap();
        assert_eq!(parsed.project_info.name, "t");
        assert_eq!(parsed.module_count, 1);
    }

    #[tokio::test]
    async fn missing_project_surfaces_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let tool = ProjectAnalyzeTool::new();
        let err = tool
            .execute(serde_json::json!({"path": dir.path().join("nope").to_string_lossy()}))
            .await
            .unwrap_err();
        assert!(matches!(err, ZekeError::NotFound(_)));
    }
}
