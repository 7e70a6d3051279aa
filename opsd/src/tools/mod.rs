// ABOUTME: dispatches validated tool calls to the four capability adapters.
// ABOUTME: turns every adapter outcome, including policy denials, into a structured action result.

pub mod command;
pub mod config;
pub mod logs;
pub mod status;

use std::sync::Arc;

use ops_common::{ActionResult, ToolArgs, ToolCall, ToolName};
use serde::de::DeserializeOwned;

use crate::fixtures::FixtureStore;
use crate::policy::{CommandPolicy, DenialReason};
use crate::sandbox::{CommandExecutor, ExecutorError};

pub use config::ConfigStore;

#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),
    #[error("policy denied: {0}")]
    PolicyDenied(#[from] DenialReason),
    #[error("command execution failed: {0}")]
    Executor(#[from] ExecutorError),
    #[error("failed to encode result: {0}")]
    Encode(#[from] serde_json::Error),
}

#[derive(Clone)]
pub struct ToolSet {
    policy: Arc<CommandPolicy>,
    fixtures: FixtureStore,
    config: ConfigStore,
    executor: Arc<dyn CommandExecutor>,
}

impl ToolSet {
    pub fn new(
        policy: CommandPolicy,
        fixtures: FixtureStore,
        config: ConfigStore,
        executor: Arc<dyn CommandExecutor>,
    ) -> Self {
        Self {
            policy: Arc::new(policy),
            fixtures,
            config,
            executor,
        }
    }

    #[cfg(test)]
    pub fn config(&self) -> &ConfigStore {
        &self.config
    }

    pub async fn dispatch(&self, tool: ToolName, call: &ToolCall) -> ActionResult {
        tracing::info!(tool = tool.as_str(), args = ?call.args, "dispatching tool");

        let outcome = match tool {
            ToolName::GetLogs => match decode(&call.args) {
                Ok(args) => logs::get_logs(&self.fixtures, args).await,
                Err(err) => Err(err),
            },
            ToolName::GetSystemStatus => match decode(&call.args) {
                Ok(args) => status::get_system_status(&self.fixtures, args).await,
                Err(err) => Err(err),
            },
            ToolName::RunCommand => match decode(&call.args) {
                Ok(args) => command::run_command(&self.policy, self.executor.as_ref(), args).await,
                Err(err) => Err(err),
            },
            ToolName::UpdateConfig => match decode(&call.args) {
                Ok(args) => config::update_config(&self.policy, &self.config, args),
                Err(err) => Err(err),
            },
        };

        match outcome {
            Ok(result) => ActionResult::succeeded(call, result),
            Err(err) => {
                match &err {
                    ToolError::Executor(_) | ToolError::Encode(_) => {
                        tracing::error!(tool = tool.as_str(), error = %err, "tool failed")
                    }
                    _ => tracing::warn!(tool = tool.as_str(), error = %err, "tool refused"),
                }
                ActionResult::failed(call, err.to_string())
            }
        }
    }
}

fn decode<T: DeserializeOwned>(args: &ToolArgs) -> Result<T, ToolError> {
    let object: serde_json::Map<String, serde_json::Value> =
        args.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
    serde_json::from_value(serde_json::Value::Object(object))
        .map_err(|err| ToolError::InvalidArguments(err.to_string()))
}
