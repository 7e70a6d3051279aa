// ABOUTME: defines the plan generator boundary and two offline implementations of it.
// ABOUTME: plans are untrusted proposals; nothing here validates or executes them.

use std::collections::BTreeSet;
use std::time::Duration;

use async_trait::async_trait;
use ops_common::{ToolArgs, ToolCall, ToolSchema};
use serde::Deserialize;
use serde_json::json;

#[derive(Debug, Clone, PartialEq)]
pub struct ProposedCall {
    pub call: ToolCall,
    pub reasoning: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Plan {
    pub answer: String,
    pub calls: Vec<ProposedCall>,
}

#[derive(Debug, thiserror::Error)]
pub enum PlannerError {
    #[error("plan generator unavailable: {0}")]
    Unavailable(String),
    #[error("plan generator timed out after {0:?}")]
    TimedOut(Duration),
    #[error("plan generator returned malformed output: {0}")]
    Malformed(String),
}

/// Turns a user message into proposed tool calls. Treat every implementation as adversarial.
#[async_trait]
pub trait PlanGenerator: Send + Sync {
    async fn generate(&self, message: &str, tools: &[ToolSchema]) -> Result<Plan, PlannerError>;
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct WirePlan {
    answer: String,
    tool_calls: Vec<WireCall>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct WireCall {
    tool: String,
    #[serde(default)]
    args: ToolArgs,
    #[serde(default)]
    reasoning: String,
}

/// Parses the `{"answer": .., "tool_calls": [{"tool", "args", "reasoning"}]}` shape.
pub fn parse_plan(input: &str) -> Result<Plan, PlannerError> {
    let wire: WirePlan =
        serde_json::from_str(input).map_err(|err| PlannerError::Malformed(err.to_string()))?;
    Ok(Plan {
        answer: wire.answer,
        calls: wire
            .tool_calls
            .into_iter()
            .map(|c| ProposedCall {
                call: ToolCall {
                    tool: c.tool,
                    args: c.args,
                },
                reasoning: c.reasoning,
            })
            .collect(),
    })
}

/// Replays one fixed plan for every message. Useful for rehearsing hostile plans.
pub struct ScriptedPlanner {
    plan: String,
}

impl ScriptedPlanner {
    pub fn new(plan: impl Into<String>) -> Self {
        Self { plan: plan.into() }
    }
}

#[async_trait]
impl PlanGenerator for ScriptedPlanner {
    async fn generate(&self, _message: &str, _tools: &[ToolSchema]) -> Result<Plan, PlannerError> {
        parse_plan(&self.plan)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Intent {
    Status,
    Logs,
    Command,
    Config,
    Destructive,
}

const INTENT_WORDS: &[(Intent, &[&str])] = &[
    (Intent::Status, &["status", "cpu", "memory", "job", "jobs", "health", "metric", "metrics"]),
    (Intent::Logs, &["log", "logs", "syslog", "error", "audit", "joblog", "entries"]),
    (
        Intent::Command,
        &["list", "show", "cat", "grep", "head", "tail", "file", "files", "directory", "run", "execute"],
    ),
    (Intent::Config, &["config", "set", "update", "level", "setting", "change"]),
    (Intent::Destructive, &["delete", "remove", "rm", "drop", "kill", "shutdown"]),
];

/// Deterministic keyword router standing in for a language model.
///
/// Destructive requests are translated literally rather than refused, the way a
/// manipulated model would, so the policy engine is what stops them.
pub struct KeywordPlanner;

impl KeywordPlanner {
    fn intents(words: &BTreeSet<String>) -> BTreeSet<Intent> {
        INTENT_WORDS
            .iter()
            .filter(|(_, keywords)| keywords.iter().any(|k| words.contains(*k)))
            .map(|(intent, _)| *intent)
            .collect()
    }

    fn log_source(message: &str) -> &'static str {
        if message.contains("error") {
            "error"
        } else if message.contains("audit") {
            "audit"
        } else if message.contains("job") {
            "joblog"
        } else {
            "syslog"
        }
    }

    fn read_only_command(message: &str) -> &'static str {
        if message.contains("list") || message.contains("files") || message.contains("directory") {
            "ls /sim/"
        } else if message.contains("cat") {
            "cat /sim/syslog.log"
        } else if message.contains("grep") {
            "grep ERROR /sim/syslog.log"
        } else if message.contains("head") {
            "head -n 10 /sim/syslog.log"
        } else if message.contains("tail") {
            "tail -n 10 /sim/syslog.log"
        } else {
            "ls /sim/"
        }
    }

    fn destructive_command(words: &BTreeSet<String>) -> &'static str {
        if words.contains("kill") {
            "kill -9 1"
        } else if words.contains("shutdown") {
            "shutdown -h now"
        } else {
            "rm -rf /"
        }
    }

    fn config_change(message: &str) -> (&'static str, &'static str) {
        if message.contains("debug") {
            ("log_level", "DEBUG")
        } else if message.contains("warn") {
            ("log_level", "WARN")
        } else if message.contains("error") && message.contains("level") {
            ("log_level", "ERROR")
        } else {
            ("log_level", "INFO")
        }
    }

    fn plan(message: &str) -> Plan {
        let lowered = message.to_lowercase();
        let words: BTreeSet<String> = lowered
            .split(|c: char| !c.is_alphanumeric() && c != '_')
            .filter(|w| !w.is_empty())
            .map(str::to_string)
            .collect();
        let intents = Self::intents(&words);

        let mut calls = Vec::new();
        let mut answer = Vec::new();

        if intents.contains(&Intent::Destructive) {
            let command = Self::destructive_command(&words);
            calls.push(proposed(
                "run_command",
                json!({"command": command, "dry_run": false}),
                "User requested a destructive operation",
            ));
            answer.push(format!("I'll attempt: {command}"));
        } else {
            if intents.contains(&Intent::Status) {
                calls.push(proposed(
                    "get_system_status",
                    json!({}),
                    "User requested system status information",
                ));
                answer.push("I'll check the current system status.".to_string());
            }
            if intents.contains(&Intent::Logs) {
                let source = Self::log_source(&lowered);
                calls.push(proposed(
                    "get_logs",
                    json!({"source": source, "tail": 20}),
                    &format!("User requested {source} logs"),
                ));
                answer.push(format!("I'll retrieve the recent {source} logs."));
            }
            if intents.contains(&Intent::Command) {
                let command = Self::read_only_command(&lowered);
                calls.push(proposed(
                    "run_command",
                    json!({"command": command, "dry_run": true}),
                    "User requested to run a command",
                ));
                answer.push(format!("I'll plan to execute: {command}"));
            }
            if intents.contains(&Intent::Config) {
                let (key, value) = Self::config_change(&lowered);
                calls.push(proposed(
                    "update_config",
                    json!({"key": key, "value": value}),
                    &format!("User requested to update {key} configuration"),
                ));
                answer.push(format!("I'll update the {key} setting to {value}."));
            }
        }

        if calls.is_empty() {
            calls.push(proposed(
                "get_system_status",
                json!({}),
                "Default action: check system status",
            ));
            answer.push("I'll check the system status to help answer your question.".to_string());
        }

        Plan {
            answer: answer.join(" "),
            calls,
        }
    }
}

#[async_trait]
impl PlanGenerator for KeywordPlanner {
    async fn generate(&self, message: &str, _tools: &[ToolSchema]) -> Result<Plan, PlannerError> {
        let plan = Self::plan(message);
        tracing::debug!(calls = plan.calls.len(), "keyword planner produced plan");
        Ok(plan)
    }
}

fn proposed(tool: &str, args: serde_json::Value, reasoning: &str) -> ProposedCall {
    let args = match args {
        serde_json::Value::Object(map) => map.into_iter().collect(),
        _ => ToolArgs::new(),
    };
    ProposedCall {
        call: ToolCall {
            tool: tool.to_string(),
            args,
        },
        reasoning: reasoning.to_string(),
    }
}
