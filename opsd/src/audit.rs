// ABOUTME: appends one json line per chat request with the caller, the request, and the outcome.
// ABOUTME: command output and refused config values are redacted before anything reaches disk.

use anyhow::Context;
use ops_common::{ChatRequest, ChatResult};

use crate::policy::CommandPolicy;

const REDACTED: &str = "[redacted]";

#[derive(Debug, Clone, Copy, serde::Serialize)]
#[serde(deny_unknown_fields)]
pub struct PeerCredentials {
    pub pid: i32,
    pub uid: u32,
    pub gid: u32,
}

#[derive(Debug, serde::Serialize)]
#[serde(deny_unknown_fields)]
struct AuditLine<'a> {
    ts_unix_ms: u64,
    peer: Option<PeerCredentials>,
    trace_id: Option<&'a str>,
    mode: &'a str,
    request: &'a ChatRequest,
    result: serde_json::Value,
}

pub async fn append_record(
    audit_path: &str,
    ts_unix_ms: u64,
    peer: Option<PeerCredentials>,
    request: &ChatRequest,
    result: &ChatResult,
) -> anyhow::Result<()> {
    let record = AuditLine {
        ts_unix_ms,
        peer,
        trace_id: result.response.as_ref().map(|r| r.audit.trace_id.as_str()),
        mode: request.mode.as_str(),
        request,
        result: redact_result(result)?,
    };

    let mut line = serde_json::to_vec(&record)?;
    line.push(b'\n');

    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(audit_path)
        .await
        .with_context(|| format!("open audit log at {audit_path}"))?;

    use tokio::io::AsyncWriteExt;
    file.write_all(&line).await?;
    file.flush().await?;
    Ok(())
}

fn redact_result(result: &ChatResult) -> anyhow::Result<serde_json::Value> {
    let policy = CommandPolicy::default();
    let mut v = serde_json::to_value(result)?;

    let steps = v.pointer_mut("/response/plan").and_then(|p| p.as_array_mut());
    for step in steps.into_iter().flatten() {
        let Some(step_obj) = step.as_object_mut() else {
            continue;
        };
        if step_obj.get("tool").and_then(|t| t.as_str()) != Some("update_config") {
            continue;
        }
        if let Some(args) = step_obj.get_mut("args").and_then(|a| a.as_object_mut()) {
            redact_config_value(&policy, args, false);
        }
    }

    let actions = v
        .pointer_mut("/response/actions_taken")
        .and_then(|a| a.as_array_mut());

    for action in actions.into_iter().flatten() {
        let Some(action_obj) = action.as_object_mut() else {
            continue;
        };
        let tool = action_obj
            .get("tool")
            .and_then(|t| t.as_str())
            .unwrap_or("")
            .to_string();
        let success = action_obj.get("success").and_then(|s| s.as_bool()).unwrap_or(false);

        match tool.as_str() {
            "run_command" => {
                if let Some(payload) = action_obj.get_mut("result").and_then(|r| r.as_object_mut()) {
                    for field in ["stdout", "stderr"] {
                        if payload.contains_key(field) {
                            payload.insert(field.to_string(), REDACTED.into());
                        }
                    }
                }
            }
            "update_config" => {
                if let Some(args) = action_obj.get_mut("args").and_then(|a| a.as_object_mut()) {
                    redact_config_value(&policy, args, !success);
                }
            }
            _ => {}
        }
    }
    Ok(v)
}

fn redact_config_value(
    policy: &CommandPolicy,
    args: &mut serde_json::Map<String, serde_json::Value>,
    refused: bool,
) {
    let key = args.get("key").and_then(|k| k.as_str()).unwrap_or("");
    let sensitive = !policy.evaluate_config_key(key).allowed;
    if (refused || sensitive) && args.contains_key("value") {
        args.insert("value".to_string(), REDACTED.into());
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use ops_common::{ActionResult, AuditRecord, Mode, OrchestratorResponse, PlanStep, ToolCall};
    use serde_json::json;

    use super::*;
    use crate::fixtures::FixtureStore;
    use crate::orchestrator::Orchestrator;
    use crate::planner::ScriptedPlanner;
    use crate::sandbox::SimulatedExecutor;
    use crate::tools::{ConfigStore, ToolSet};

    fn call(tool: &str, args: serde_json::Value) -> ToolCall {
        let args = match args {
            serde_json::Value::Object(map) => map.into_iter().collect(),
            _ => Default::default(),
        };
        ToolCall {
            tool: tool.to_string(),
            args,
        }
    }

    fn step(call: ToolCall, executed: bool) -> PlanStep {
        PlanStep {
            call,
            reasoning: "requested".to_string(),
            executed,
        }
    }

    fn result_with(plan: Vec<PlanStep>, actions: Vec<ActionResult>) -> ChatResult {
        ChatResult {
            response: Some(OrchestratorResponse {
                answer: "done".to_string(),
                plan,
                actions_taken: actions,
                generated_script: None,
                audit: AuditRecord {
                    trace_id: "trace-1".to_string(),
                    mode: Mode::ExecuteSafe,
                    tool_count: 0,
                    executed_count: 0,
                },
            }),
            error: None,
        }
    }

    #[tokio::test]
    async fn record_redacts_command_output_and_refused_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.jsonl");
        let path_str = path.to_string_lossy().to_string();

        let request = ChatRequest {
            message: "run it".to_string(),
            mode: Mode::ExecuteSafe,
        };
        let command = call("run_command", json!({"command": "cat /sim/a", "dry_run": false}));
        let secret = call("update_config", json!({"key": "db_password", "value": "hunter2"}));
        let level = call("update_config", json!({"key": "log_level", "value": "DEBUG"}));
        let result = result_with(
            vec![
                step(command.clone(), true),
                step(secret.clone(), false),
                step(level.clone(), true),
            ],
            vec![
                ActionResult::succeeded(
                    &command,
                    json!({"executed": true, "stdout": "secret contents", "stderr": "", "exit_code": 0}),
                ),
                ActionResult::failed(&secret, "policy denied: config key blocked"),
                ActionResult::succeeded(
                    &level,
                    json!({"ok": true, "key": "log_level", "value": "DEBUG"}),
                ),
            ],
        );

        append_record(&path_str, 42, None, &request, &result).await.unwrap();
        append_record(&path_str, 43, None, &request, &result).await.unwrap();

        let text = tokio::fs::read_to_string(&path).await.unwrap();
        assert_eq!(text.lines().count(), 2);
        assert!(!text.contains("secret contents"));
        assert!(!text.contains("hunter2"));

        let v: serde_json::Value = serde_json::from_str(text.lines().next().unwrap()).unwrap();
        assert_eq!(v["ts_unix_ms"], 42);
        assert_eq!(v["trace_id"], "trace-1");
        assert_eq!(v["mode"], "execute_safe");
        assert_eq!(v["request"]["message"], "run it");
        let actions = &v["result"]["response"]["actions_taken"];
        assert_eq!(actions[0]["result"]["stdout"], REDACTED);
        assert_eq!(actions[0]["result"]["exit_code"], 0);
        assert_eq!(actions[1]["args"]["value"], REDACTED);
        assert_eq!(actions[2]["args"]["value"], "DEBUG");
        let plan = &v["result"]["response"]["plan"];
        assert_eq!(plan[1]["args"]["value"], REDACTED);
        assert_eq!(plan[1]["args"]["key"], "db_password");
        assert_eq!(plan[2]["args"]["value"], "DEBUG");
    }

    #[tokio::test]
    async fn plan_only_record_redacts_sensitive_config_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.jsonl");
        let path_str = path.to_string_lossy().to_string();

        let request = ChatRequest {
            message: "rotate the token".to_string(),
            mode: Mode::PlanOnly,
        };
        let rotate = call("update_config", json!({"key": "API_Token", "value": "tok-123"}));
        let result = result_with(vec![step(rotate, false)], vec![]);
        append_record(&path_str, 7, None, &request, &result).await.unwrap();

        let text = tokio::fs::read_to_string(&path).await.unwrap();
        assert!(!text.contains("tok-123"));
    }

    #[tokio::test]
    async fn orchestrated_refusal_never_reaches_the_audit_log() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.jsonl");
        let path_str = path.to_string_lossy().to_string();

        let planner = ScriptedPlanner::new(
            r#"{"answer":"ok","tool_calls":[{"tool":"update_config","args":{"key":"db_password","value":"hunter2"},"reasoning":"rotate"}]}"#,
        );
        let tools = ToolSet::new(
            CommandPolicy::default(),
            FixtureStore::new(dir.path()),
            ConfigStore::seeded(),
            Arc::new(SimulatedExecutor),
        );
        let orchestrator = Orchestrator::new(Arc::new(planner), tools);

        for mode in [Mode::PlanOnly, Mode::ExecuteSafe] {
            let request = ChatRequest {
                message: "rotate the database password".to_string(),
                mode,
            };
            let result = ChatResult {
                response: Some(orchestrator.process(&request.message, mode).await),
                error: None,
            };
            append_record(&path_str, 1, None, &request, &result).await.unwrap();
        }

        let text = tokio::fs::read_to_string(&path).await.unwrap();
        assert_eq!(text.lines().count(), 2);
        assert!(!text.contains("hunter2"));
    }

    #[tokio::test]
    async fn error_results_are_recorded_without_trace_id() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.jsonl");
        let path_str = path.to_string_lossy().to_string();

        let request = ChatRequest {
            message: "run it".to_string(),
            mode: Mode::ExecuteSafe,
        };
        let result = ChatResult {
            response: None,
            error: Some(ops_common::RequestError {
                code: ops_common::ErrorCode::ModeForbidden,
                message: "no".to_string(),
            }),
        };
        append_record(&path_str, 1, None, &request, &result).await.unwrap();

        let text = tokio::fs::read_to_string(&path).await.unwrap();
        let v: serde_json::Value = serde_json::from_str(text.trim()).unwrap();
        assert!(v["trace_id"].is_null());
        assert_eq!(v["result"]["error"]["code"], "mode_forbidden");
    }
}
