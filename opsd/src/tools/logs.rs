// ABOUTME: implements the get_logs tool over the fixture store.
// ABOUTME: substitutes the default source for unknown names and says so in the payload.

use ops_common::GetLogsArgs;
use serde_json::json;

use super::ToolError;
use crate::fixtures::{FixtureStore, DEFAULT_LOG_SOURCE, LOG_SOURCES};

pub const MAX_TAIL: usize = 1000;

pub async fn get_logs(fixtures: &FixtureStore, args: GetLogsArgs) -> Result<serde_json::Value, ToolError> {
    let tail = args.tail.min(MAX_TAIL);
    let requested = args.source.trim();

    // Unknown sources fall back to the default source and are flagged in the payload.
    let fallback = !LOG_SOURCES.contains(&requested);
    let source = if fallback {
        tracing::warn!(
            requested_source = requested,
            fallback_source = DEFAULT_LOG_SOURCE,
            "unknown log source, falling back"
        );
        DEFAULT_LOG_SOURCE
    } else {
        requested
    };

    let lines = fixtures.log_lines(source, tail).await;
    let mut payload = json!({
        "source": source,
        "count": lines.len(),
        "lines": lines,
        "fallback": fallback,
    });
    if fallback {
        payload["requested_source"] = json!(requested);
    }
    Ok(payload)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(source: &str, tail: usize) -> GetLogsArgs {
        GetLogsArgs {
            source: source.to_string(),
            tail,
        }
    }

    #[tokio::test]
    async fn returns_requested_source() {
        let dir = tempfile::tempdir().unwrap();
        let store = FixtureStore::new(dir.path());

        let payload = get_logs(&store, args("error", 2)).await.unwrap();
        assert_eq!(payload["source"], "error");
        assert_eq!(payload["count"], 2);
        assert_eq!(payload["fallback"], false);
        assert!(payload.get("requested_source").is_none());
    }

    #[tokio::test]
    async fn unknown_source_falls_back_observably() {
        let dir = tempfile::tempdir().unwrap();
        let store = FixtureStore::new(dir.path());

        let payload = get_logs(&store, args("kernel", 5)).await.unwrap();
        assert_eq!(payload["source"], DEFAULT_LOG_SOURCE);
        assert_eq!(payload["fallback"], true);
        assert_eq!(payload["requested_source"], "kernel");
        assert_eq!(payload["count"], 5);
    }

    #[tokio::test]
    async fn tail_is_clamped() {
        let dir = tempfile::tempdir().unwrap();
        let lines: Vec<String> = (0..MAX_TAIL + 50).map(|i| format!("line {i}")).collect();
        std::fs::write(dir.path().join("syslog.log"), lines.join("\n")).unwrap();
        let store = FixtureStore::new(dir.path());

        let payload = get_logs(&store, args("syslog", usize::MAX)).await.unwrap();
        assert_eq!(payload["count"], MAX_TAIL);
    }
}
