// ABOUTME: defines the shared chat, plan, and tool protocol types used by opsh and opsd.
// ABOUTME: provides parsing, validation, and tool schema helpers so both sides agree on the wire format.

use std::collections::BTreeMap;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

pub const MAX_MESSAGE_CHARS: usize = 4000;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    PlanOnly,
    ExecuteSafe,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::PlanOnly => "plan_only",
            Mode::ExecuteSafe => "execute_safe",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ChatRequest {
    pub message: String,
    pub mode: Mode,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    ParseFailed,
    ValidationFailed,
    RequestTooLarge,
    ModeForbidden,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct RequestError {
    pub code: ErrorCode,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub message: String,
}

pub fn parse_chat_request(input: &str) -> Result<ChatRequest, serde_json::Error> {
    serde_json::from_str(input)
}

pub fn validate_chat_request(request: &ChatRequest) -> Result<(), ValidationError> {
    if request.message.trim().is_empty() {
        return Err(ValidationError {
            message: "message must be non-empty".to_string(),
        });
    }
    if request.message.chars().count() > MAX_MESSAGE_CHARS {
        return Err(ValidationError {
            message: format!("message exceeds {MAX_MESSAGE_CHARS} characters"),
        });
    }
    Ok(())
}

/// The closed set of tools the orchestrator knows how to dispatch.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ToolName {
    GetLogs,
    GetSystemStatus,
    RunCommand,
    UpdateConfig,
}

impl ToolName {
    pub const ALL: [ToolName; 4] = [
        ToolName::GetLogs,
        ToolName::GetSystemStatus,
        ToolName::RunCommand,
        ToolName::UpdateConfig,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ToolName::GetLogs => "get_logs",
            ToolName::GetSystemStatus => "get_system_status",
            ToolName::RunCommand => "run_command",
            ToolName::UpdateConfig => "update_config",
        }
    }

    pub fn from_name(name: &str) -> Option<ToolName> {
        ToolName::ALL.into_iter().find(|t| t.as_str() == name)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct GetLogsArgs {
    pub source: String,
    #[serde(default = "default_tail")]
    pub tail: usize,
}

fn default_tail() -> usize {
    100
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct GetSystemStatusArgs {}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct RunCommandArgs {
    pub command: String,
    #[serde(default = "default_dry_run")]
    pub dry_run: bool,
}

fn default_dry_run() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct UpdateConfigArgs {
    pub key: String,
    pub value: serde_json::Value,
}

/// Describes one tool to a plan generator.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

pub fn tool_schemas() -> Vec<ToolSchema> {
    ToolName::ALL
        .into_iter()
        .map(|tool| {
            let (description, schema) = match tool {
                ToolName::GetLogs => (
                    "Retrieve recent log lines from syslog, joblog, audit, or error",
                    schemars::schema_for!(GetLogsArgs),
                ),
                ToolName::GetSystemStatus => (
                    "Get current system status including CPU, memory, jobs, and subsystems",
                    schemars::schema_for!(GetSystemStatusArgs),
                ),
                ToolName::RunCommand => (
                    "Run a read-only diagnostic command under /sim (dry_run defaults to true)",
                    schemars::schema_for!(RunCommandArgs),
                ),
                ToolName::UpdateConfig => (
                    "Update a non-sensitive configuration value",
                    schemars::schema_for!(UpdateConfigArgs),
                ),
            };
            ToolSchema {
                name: tool.as_str().to_string(),
                description: description.to_string(),
                parameters: serde_json::to_value(schema).unwrap_or(serde_json::Value::Null),
            }
        })
        .collect()
}

pub type ToolArgs = BTreeMap<String, serde_json::Value>;

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct ToolCall {
    pub tool: String,
    pub args: ToolArgs,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct PlanStep {
    #[serde(flatten)]
    pub call: ToolCall,
    pub reasoning: String,
    pub executed: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct ActionResult {
    pub tool: String,
    pub args: ToolArgs,
    pub success: bool,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
}

impl ActionResult {
    pub fn succeeded(call: &ToolCall, result: serde_json::Value) -> Self {
        Self {
            tool: call.tool.clone(),
            args: call.args.clone(),
            success: true,
            result: Some(result),
            error: None,
        }
    }

    pub fn failed(call: &ToolCall, error: impl Into<String>) -> Self {
        Self {
            tool: call.tool.clone(),
            args: call.args.clone(),
            success: false,
            result: None,
            error: Some(error.into()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub struct AuditRecord {
    pub trace_id: String,
    pub mode: Mode,
    pub tool_count: usize,
    pub executed_count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct OrchestratorResponse {
    pub answer: String,
    pub plan: Vec<PlanStep>,
    pub actions_taken: Vec<ActionResult>,
    pub generated_script: Option<String>,
    pub audit: AuditRecord,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct ChatResult {
    pub response: Option<OrchestratorResponse>,
    pub error: Option<RequestError>,
}
