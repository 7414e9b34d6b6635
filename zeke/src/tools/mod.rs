//! Tool registry: named tools with typed parameter schemas, confirmation
//! policy, and an execution vtable.
//!
//! `execute` validates parameters against the tool's schema before any side
//! effect, then consults the approval policy: a tool with
//! `requires_confirmation` runs only under an [`ApprovalGrant`] or after the
//! connected [`Approver`] (terminal prompt, editor dialog) says yes.

pub mod analyze;
pub mod file_edit;
pub mod mcp_remote;
pub mod shell;

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{ZekeError, ZekeResult};

/// Tool grouping for listings.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolCategory {
    File,
    Shell,
    Analysis,
    Mcp,
}

/// JSON type of one parameter.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamType {
    String,
    Integer,
    Number,
    Boolean,
    Object,
    Array,
}

impl ParamType {
    fn matches(&self, value: &serde_json::Value) -> bool {
        match self {
            ParamType::String => value.is_string(),
            ParamType::Integer => value.is_i64() || value.is_u64(),
            ParamType::Number => value.is_number(),
            ParamType::Boolean => value.is_boolean(),
            ParamType::Object => value.is_object(),
            ParamType::Array => value.is_array(),
        }
    }
}

/// One parameter: type, required flag, description, optional default.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ParamSpec {
    #[serde(rename = "type")]
    pub param_type: ParamType,
    pub required: bool,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<serde_json::Value>,
}

/// Parameter schema: name → spec. Ordered so listings are stable.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ToolSchema {
    pub params: BTreeMap<String, ParamSpec>,
}

impl ToolSchema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn required(
        mut self,
        name: &str,
        param_type: ParamType,
        description: &str,
    ) -> Self {
        self.params.insert(
            name.to_string(),
            ParamSpec {
                param_type,
                required: true,
                description: description.to_string(),
                default: None,
            },
        );
        self
    }

    pub fn optional(
        mut self,
        name: &str,
        param_type: ParamType,
        description: &str,
        default: Option<serde_json::Value>,
    ) -> Self {
        self.params.insert(
            name.to_string(),
            ParamSpec {
                param_type,
                required: false,
                description: description.to_string(),
                default,
            },
        );
        self
    }

    /// Validates `params` in place: required fields present, types match,
    /// defaults applied. Fails before any side effect.
    pub fn validate(&self, params: &mut serde_json::Value) -> ZekeResult<()> {
        if params.is_null() {
            *params = serde_json::json!({});
        }
        let obj = params
            .as_object_mut()
            .ok_or_else(|| ZekeError::InvalidArgument("params must be an object".into()))?;
        for (name, spec) in &self.params {
            match obj.get(name) {
                Some(value) => {
                    if !spec.param_type.matches(value) {
                        return Err(ZekeError::InvalidArgument(format!(
                            "parameter {name} has wrong type (expected {:?})",
                            spec.param_type
                        )));
                    }
                }
                None if spec.required => {
                    return Err(ZekeError::InvalidArgument(format!(
                        "missing required parameter: {name}"
                    )));
                }
                None => {
                    if let Some(default) = &spec.default {
                        obj.insert(name.clone(), default.clone());
                    }
                }
            }
        }
        Ok(())
    }
}

/// Execution result of a tool invocation.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ToolResult {
    pub success: bool,
    pub output: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ToolResult {
    pub fn ok(output: impl Into<String>) -> Self {
        Self {
            success: true,
            output: output.into(),
            error: None,
        }
    }

    pub fn failed(output: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            success: false,
            output: output.into(),
            error: Some(error.into()),
        }
    }
}

/// One named tool.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    fn category(&self) -> ToolCategory;

    /// Whether execution needs an approval grant or a confirmation prompt.
    fn requires_confirmation(&self) -> bool {
        false
    }

    fn schema(&self) -> ToolSchema;

    /// Runs the tool. `params` has already passed schema validation.
    async fn execute(&self, params: serde_json::Value) -> ZekeResult<ToolResult>;
}

/// Listing entry for `tool.list`.
#[derive(Clone, Debug, Serialize)]
pub struct ToolInfo {
    pub name: String,
    pub description: String,
    pub category: ToolCategory,
    pub requires_confirmation: bool,
    pub schema: ToolSchema,
}

/// Scope of one approval.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApprovalScope {
    Once,
    Session,
    Project,
}

/// An in-memory grant: `action` is the tool name.
#[derive(Clone, Debug)]
pub struct ApprovalGrant {
    pub action: String,
    pub scope: ApprovalScope,
    pub granted_at: i64,
}

/// Grants held for one session (RPC connection) or for the daemon process
/// (project scope). Dropped with the owner.
#[derive(Default)]
pub struct ApprovalSet {
    grants: Mutex<Vec<ApprovalGrant>>,
}

impl ApprovalSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn grant(&self, action: &str, scope: ApprovalScope) {
        self.grants
            .lock()
            .expect("approval set poisoned")
            .push(ApprovalGrant {
                action: action.to_string(),
                scope,
                granted_at: chrono::Utc::now().timestamp(),
            });
    }

    pub fn is_granted(&self, action: &str) -> bool {
        self.grants
            .lock()
            .expect("approval set poisoned")
            .iter()
            .any(|g| g.action == action)
    }
}

/// How a confirmation request was answered.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ApprovalDecision {
    Once,
    Session,
    Project,
    Deny,
}

/// Confirmation source: terminal prompt in the CLI, pre-granted policy in
/// headless runs.
#[async_trait]
pub trait Approver: Send + Sync {
    async fn confirm(&self, tool: &str, summary: &str) -> ApprovalDecision;
}

/// Approver that denies everything; the headless default.
pub struct DenyAll;

#[async_trait]
impl Approver for DenyAll {
    async fn confirm(&self, _tool: &str, _summary: &str) -> ApprovalDecision {
        ApprovalDecision::Deny
    }
}

/// Name → tool map. Constructed at startup, immutable afterwards.
#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn list(&self) -> Vec<ToolInfo> {
        let mut infos: Vec<ToolInfo> = self
            .tools
            .values()
            .map(|t| ToolInfo {
                name: t.name().to_string(),
                description: t.description().to_string(),
                category: t.category(),
                requires_confirmation: t.requires_confirmation(),
                schema: t.schema(),
            })
            .collect();
        infos.sort_by(|a, b| a.name.cmp(&b.name));
        infos
    }

    /// Looks up, validates, confirms, executes — in that order. Validation
    /// and confirmation failures happen before any side effect.
    pub async fn execute(
        &self,
        name: &str,
        mut params: serde_json::Value,
        session_grants: &ApprovalSet,
        project_grants: &ApprovalSet,
        approver: &dyn Approver,
    ) -> ZekeResult<ToolResult> {
        let tool = self
            .get(name)
            .ok_or_else(|| ZekeError::NotFound(format!("tool: {name}")))?;
        tool.schema().validate(&mut params)?;

        if tool.requires_confirmation()
            && !session_grants.is_granted(name)
            && !project_grants.is_granted(name)
        {
            let summary = summarize_params(&params);
            match approver.confirm(name, &summary).await {
                ApprovalDecision::Once => {}
                ApprovalDecision::Session => session_grants.grant(name, ApprovalScope::Session),
                ApprovalDecision::Project => project_grants.grant(name, ApprovalScope::Project),
                ApprovalDecision::Deny => {
                    return Err(ZekeError::InvalidArgument(format!(
                        "execution of {name} declined"
                    )))
                }
            }
        }
        tool.execute(params).await
    }
}

fn summarize_params(params: &serde_json::Value) -> String {
    let text = params.to_string();
    if text.chars().count() > 120 {
        let head: String = text.chars().take(120).collect();
        format!("{head}…")
    } else {
        text
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EchoTool {
        confirm: bool,
    }

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            "echo"
        }
        fn description(&self) -> &str {
            "echo back the text parameter"
        }
        fn category(&self) -> ToolCategory {
            ToolCategory::Analysis
        }
        fn requires_confirmation(&self) -> bool {
            self.confirm
        }
        fn schema(&self) -> ToolSchema {
            ToolSchema::new()
                .required("text", ParamType::String, "Text to echo")
                .optional(
                    "repeat",
                    ParamType::Integer,
                    "Times to repeat",
                    Some(serde_json::json!(1)),
                )
        }
        async fn execute(&self, params: serde_json::Value) -> ZekeResult<ToolResult> {
            let text = params["text"].as_str().unwrap_or_default();
            let repeat = params["repeat"].as_u64().unwrap_or(1) as usize;
            Ok(ToolResult::ok(text.repeat(repeat)))
        }
    }

    struct GrantOnce;

    #[async_trait]
    impl Approver for GrantOnce {
        async fn confirm(&self, _tool: &str, _summary: &str) -> ApprovalDecision {
            ApprovalDecision::Once
        }
    }

    struct GrantSession;

    #[async_trait]
    impl Approver for GrantSession {
        async fn confirm(&self, _tool: &str, _summary: &str) -> ApprovalDecision {
            ApprovalDecision::Session
        }
    }

    fn registry(confirm: bool) -> ToolRegistry {
        let mut reg = ToolRegistry::new();
        reg.register(Arc::new(EchoTool { confirm }));
        reg
    }

    #[tokio::test]
    async fn missing_required_param_fails_before_execution() {
        let reg = registry(false);
        let err = reg
            .execute(
                "echo",
                serde_json::json!({}),
                &ApprovalSet::new(),
                &ApprovalSet::new(),
                &DenyAll,
            )
            .await
            .unwrap_err();
        assert!(err.to_string().contains("missing required parameter"));
    }

    #[tokio::test]
    async fn wrong_type_rejected() {
        let reg = registry(false);
        let err = reg
            .execute(
                "echo",
                serde_json::json!({"text": 42}),
                &ApprovalSet::new(),
                &ApprovalSet::new(),
                &DenyAll,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ZekeError::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn defaults_applied_and_tool_runs() {
        let reg = registry(false);
        let out = reg
            .execute(
                "echo",
                serde_json::json!({"text": "ab"}),
                &ApprovalSet::new(),
                &ApprovalSet::new(),
                &DenyAll,
            )
            .await
            .unwrap();
        assert_eq!(out.output, "ab");
    }

    #[tokio::test]
    async fn unknown_tool_is_not_found() {
        let reg = registry(false);
        let err = reg
            .execute(
                "nope",
                serde_json::json!({}),
                &ApprovalSet::new(),
                &ApprovalSet::new(),
                &DenyAll,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ZekeError::NotFound(_)));
    }

    #[tokio::test]
    async fn denied_confirmation_blocks_execution() {
        let reg = registry(true);
        let err = reg
            .execute(
                "echo",
                serde_json::json!({"text": "x"}),
                &ApprovalSet::new(),
                &ApprovalSet::new(),
                &DenyAll,
            )
            .await
            .unwrap_err();
        assert!(err.to_string().contains("declined"));
    }

    #[tokio::test]
    async fn session_grant_skips_later_prompts() {
        let reg = registry(true);
        let session = ApprovalSet::new();
        let project = ApprovalSet::new();
        reg.execute(
            "echo",
            serde_json::json!({"text": "x"}),
            &session,
            &project,
            &GrantSession,
        )
        .await
        .unwrap();
        assert!(session.is_granted("echo"));
        // Second call: DenyAll would refuse, but the grant short-circuits.
        reg.execute(
            "echo",
            serde_json::json!({"text": "y"}),
            &session,
            &project,
            &DenyAll,
        )
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn once_grant_does_not_persist() {
        let reg = registry(true);
        let session = ApprovalSet::new();
        let project = ApprovalSet::new();
        reg.execute(
            "echo",
            serde_json::json!({"text": "x"}),
            &session,
            &project,
            &GrantOnce,
        )
        .await
        .unwrap();
        assert!(!session.is_granted("echo"));
        assert!(!project.is_granted("echo"));
    }
}
