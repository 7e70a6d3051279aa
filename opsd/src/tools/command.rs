// ABOUTME: implements run_command: policy check, then a dry-run description or a sandboxed execution.
// ABOUTME: the argv handed to the executor is tokenized from the same string the policy approved.

use ops_common::RunCommandArgs;
use serde_json::json;

use super::ToolError;
use crate::policy::{tokenize, CommandPolicy};
use crate::sandbox::CommandExecutor;

pub async fn run_command(
    policy: &CommandPolicy,
    executor: &dyn CommandExecutor,
    args: RunCommandArgs,
) -> Result<serde_json::Value, ToolError> {
    let decision = policy.evaluate(&args.command);
    if let Some(reason) = decision.reason {
        tracing::warn!(
            command = %args.command,
            reason = reason.code(),
            "command denied by policy"
        );
        return Err(ToolError::PolicyDenied(reason));
    }

    let argv = tokenize(&args.command);

    if args.dry_run {
        return Ok(json!({
            "allowed": true,
            "executed": false,
            "dry_run": true,
            "command": args.command,
            "argv": argv,
            "reason": "dry run - command validated but not executed",
        }));
    }

    let output = executor.execute(&argv).await?;
    tracing::info!(command = %args.command, exit_code = ?output.exit_code, "command executed");

    Ok(json!({
        "allowed": true,
        "executed": true,
        "dry_run": false,
        "command": args.command,
        "stdout": output.stdout,
        "stderr": output.stderr,
        "exit_code": output.exit_code,
        "stdout_truncated": output.stdout_truncated,
        "stderr_truncated": output.stderr_truncated,
    }))
}
