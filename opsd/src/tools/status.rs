// ABOUTME: implements the get_system_status tool.
// ABOUTME: always returns the fixed-shape snapshot from the fixture store.

use ops_common::GetSystemStatusArgs;

use super::ToolError;
use crate::fixtures::FixtureStore;

pub async fn get_system_status(
    fixtures: &FixtureStore,
    _args: GetSystemStatusArgs,
) -> Result<serde_json::Value, ToolError> {
    let status = fixtures.status().await;
    Ok(serde_json::to_value(status)?)
}
