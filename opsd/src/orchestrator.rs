// ABOUTME: drives one chat request through planning, mode-gated execution, and response assembly.
// ABOUTME: every proposed step ends up in the response; failures are recorded, never dropped.

use std::sync::Arc;
use std::time::Duration;

use ops_common::{
    tool_schemas, ActionResult, AuditRecord, Mode, OrchestratorResponse, PlanStep, ToolName,
    ToolSchema,
};
use tracing::Instrument;
use uuid::Uuid;

use crate::planner::{PlanGenerator, PlannerError};
use crate::tools::ToolSet;

const DEFAULT_PLANNER_TIMEOUT: Duration = Duration::from_secs(30);
const PLANNER_FAILURE_ANSWER: &str =
    "The planner is currently unavailable, so no actions were planned or executed. Please try again.";
const PLAN_ONLY_SUFFIX: &str = " (Plan only - no actions executed)";

enum Stage {
    Planning,
    PlanOnlyDone { answer: String, plan: Vec<PlanStep> },
    Executing { answer: String, plan: Vec<PlanStep> },
    Done(Outcome),
}

struct Outcome {
    answer: String,
    plan: Vec<PlanStep>,
    actions: Vec<ActionResult>,
    script: Option<String>,
}

#[derive(Clone)]
pub struct Orchestrator {
    planner: Arc<dyn PlanGenerator>,
    tools: ToolSet,
    schemas: Arc<[ToolSchema]>,
    planner_timeout: Duration,
}

impl Orchestrator {
    pub fn new(planner: Arc<dyn PlanGenerator>, tools: ToolSet) -> Self {
        Self {
            planner,
            tools,
            schemas: tool_schemas().into(),
            planner_timeout: DEFAULT_PLANNER_TIMEOUT,
        }
    }

    pub fn with_planner_timeout(mut self, timeout: Duration) -> Self {
        self.planner_timeout = timeout;
        self
    }

    /// `mode` must already be resolved by the caller; this never consults the environment.
    pub async fn process(&self, message: &str, mode: Mode) -> OrchestratorResponse {
        let trace_id = Uuid::new_v4().to_string();
        let span = tracing::info_span!("chat_request", trace_id = %trace_id, mode = mode.as_str());
        self.run(message, mode, trace_id).instrument(span).await
    }

    async fn run(&self, message: &str, mode: Mode, trace_id: String) -> OrchestratorResponse {
        let mut stage = Stage::Planning;
        loop {
            stage = match stage {
                Stage::Planning => match self.plan(message).await {
                    Ok((answer, plan)) => match mode {
                        Mode::PlanOnly => Stage::PlanOnlyDone { answer, plan },
                        Mode::ExecuteSafe => Stage::Executing { answer, plan },
                    },
                    Err(err) => {
                        tracing::error!(error = %err, "plan generation failed");
                        Stage::Done(Outcome {
                            answer: PLANNER_FAILURE_ANSWER.to_string(),
                            plan: Vec::new(),
                            actions: Vec::new(),
                            script: None,
                        })
                    }
                },
                Stage::PlanOnlyDone { answer, plan } => Stage::Done(Outcome {
                    answer: format!("{answer}{PLAN_ONLY_SUFFIX}"),
                    script: generate_script(&plan),
                    plan,
                    actions: Vec::new(),
                }),
                Stage::Executing { answer, mut plan } => {
                    let actions = self.execute(&mut plan).await;
                    Stage::Done(Outcome {
                        answer: summarize(&answer, &actions),
                        plan,
                        actions,
                        script: None,
                    })
                }
                Stage::Done(outcome) => return finish(outcome, trace_id, mode),
            };
        }
    }

    async fn plan(&self, message: &str) -> Result<(String, Vec<PlanStep>), PlannerError> {
        tracing::info!("requesting plan");
        let plan = match tokio::time::timeout(
            self.planner_timeout,
            self.planner.generate(message, &self.schemas),
        )
        .await
        {
            Ok(res) => res?,
            Err(_) => return Err(PlannerError::TimedOut(self.planner_timeout)),
        };

        let steps = plan
            .calls
            .into_iter()
            .map(|proposed| PlanStep {
                call: proposed.call,
                reasoning: proposed.reasoning,
                executed: false,
            })
            .collect::<Vec<_>>();
        tracing::info!(steps = steps.len(), "plan received");
        Ok((plan.answer, steps))
    }

    async fn execute(&self, plan: &mut [PlanStep]) -> Vec<ActionResult> {
        let mut actions = Vec::with_capacity(plan.len());
        for step in plan.iter_mut() {
            let result = match ToolName::from_name(&step.call.tool) {
                Some(tool) => self.tools.dispatch(tool, &step.call).await,
                None => {
                    tracing::warn!(tool = %step.call.tool, "plan proposed unknown tool");
                    ActionResult::failed(&step.call, format!("unknown tool: {}", step.call.tool))
                }
            };
            step.executed = result.success;
            actions.push(result);
        }
        actions
    }
}

fn finish(outcome: Outcome, trace_id: String, mode: Mode) -> OrchestratorResponse {
    let executed_count = outcome.plan.iter().filter(|s| s.executed).count();
    let audit = AuditRecord {
        trace_id,
        mode,
        tool_count: outcome.plan.len(),
        executed_count,
    };
    tracing::info!(
        plan_size = outcome.plan.len(),
        actions = outcome.actions.len(),
        executed_count,
        "response assembled"
    );

    OrchestratorResponse {
        answer: outcome.answer,
        plan: outcome.plan,
        actions_taken: outcome.actions,
        generated_script: outcome.script,
        audit,
    }
}

/// Display-only transcript of the proposed commands. Never executed.
fn generate_script(plan: &[PlanStep]) -> Option<String> {
    let mut lines = Vec::new();
    for step in plan {
        if step.call.tool != ToolName::RunCommand.as_str() {
            continue;
        }
        let command = match step.call.args.get("command").and_then(|v| v.as_str()) {
            Some(c) if !c.trim().is_empty() => c,
            _ => continue,
        };
        let reasoning = if step.reasoning.trim().is_empty() {
            "Execute command"
        } else {
            step.reasoning.as_str()
        };
        lines.push(format!("# {}", single_line(reasoning)));
        lines.push(single_line(command));
    }

    if lines.is_empty() {
        return None;
    }

    Some(format!(
        "#!/bin/sh\n# Generated from a proposed plan for review only; it has not been executed.\nset -e\n\n{}\n",
        lines.join("\n")
    ))
}

fn single_line(text: &str) -> String {
    text.replace('\r', "\\r").replace('\n', "\\n")
}

fn summarize(base: &str, actions: &[ActionResult]) -> String {
    let summaries: Vec<String> = actions.iter().map(summarize_action).collect();
    if summaries.is_empty() {
        return base.to_string();
    }
    let results = format!("Results:\n- {}", summaries.join("\n- "));
    if base.trim().is_empty() {
        results
    } else {
        format!("{base}\n\n{results}")
    }
}

fn summarize_action(action: &ActionResult) -> String {
    if !action.success {
        let error = action.error.as_deref().unwrap_or("unknown error");
        return format!("Tool {} failed: {error}", action.tool);
    }

    let result = action.result.as_ref().unwrap_or(&serde_json::Value::Null);
    match ToolName::from_name(&action.tool) {
        Some(ToolName::GetSystemStatus) => format!(
            "System: CPU {}%, Memory {}%",
            result["cpu"], result["memory"]["percent"]
        ),
        Some(ToolName::GetLogs) => {
            let source = result["source"].as_str().unwrap_or("unknown");
            let mut line = format!("Retrieved {} lines from {source}", result["count"]);
            if let Some(requested) = result["requested_source"].as_str() {
                line.push_str(&format!(" (unknown source '{requested}' fell back to {source})"));
            }
            line
        }
        Some(ToolName::RunCommand) => {
            let command = result["command"].as_str().unwrap_or("");
            if result["executed"].as_bool() == Some(true) {
                format!("Command executed: {command} (exit code {})", result["exit_code"])
            } else {
                format!("Command validated (dry run): {command}")
            }
        }
        Some(ToolName::UpdateConfig) => format!(
            "Config updated: {} = {}",
            result["key"].as_str().unwrap_or(""),
            result["value"].as_str().unwrap_or("")
        ),
        None => format!("Tool {} succeeded", action.tool),
    }
}
