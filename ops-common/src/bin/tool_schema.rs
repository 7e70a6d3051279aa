// ABOUTME: emits json schemas for the chat protocol and the four tool argument shapes to stdout.
// ABOUTME: intended for wiring a real plan generator and for external request validators.

fn main() {
    let schemas = serde_json::json!({
        "chat_request": schemars::schema_for!(ops_common::ChatRequest),
        "chat_result": schemars::schema_for!(ops_common::ChatResult),
        "tools": ops_common::tool_schemas(),
    });
    let json = serde_json::to_string_pretty(&schemas).expect("serialize schema");
    println!("{json}");
}
