// ABOUTME: serves log lines and the status snapshot from files under the simulator root.
// ABOUTME: falls back to built-in mainframe fixtures when a file is missing or malformed.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

pub const LOG_SOURCES: &[&str] = &["syslog", "joblog", "audit", "error"];
pub const DEFAULT_LOG_SOURCE: &str = "syslog";

const SYSLOG: &[&str] = &[
    "2026-02-13T10:00:00Z INFO  System startup complete",
    "2026-02-13T10:01:00Z INFO  Job scheduler initialized",
    "2026-02-13T10:02:00Z WARN  High memory usage detected: 85%",
    "2026-02-13T10:03:00Z INFO  Batch JOB001 started",
    "2026-02-13T10:04:00Z INFO  Batch JOB001 completed successfully",
    "2026-02-13T10:05:00Z ERROR Connection timeout to DB2 subsystem",
    "2026-02-13T10:06:00Z INFO  Reconnection successful",
    "2026-02-13T10:07:00Z INFO  Processing queue depth: 12",
    "2026-02-13T10:08:00Z WARN  CPU utilization at 78%",
    "2026-02-13T10:09:00Z INFO  Health check passed",
];

const JOBLOG: &[&str] = &[
    "JOB001 STARTED  2026-02-13T10:00:00Z user=BATCH01",
    "JOB001 STEP01   RC=0000 CPU=00:00:12",
    "JOB001 STEP02   RC=0000 CPU=00:00:45",
    "JOB001 ENDED    RC=0000 2026-02-13T10:05:00Z",
    "JOB002 STARTED  2026-02-13T10:10:00Z user=BATCH02",
    "JOB002 STEP01   RC=0004 CPU=00:00:08",
    "JOB002 ABENDED  S0C7 2026-02-13T10:12:00Z",
    "JOB003 STARTED  2026-02-13T10:15:00Z user=BATCH01",
    "JOB003 STEP01   RC=0000 CPU=00:01:20",
    "JOB003 RUNNING  2026-02-13T10:16:00Z",
];

const AUDIT: &[&str] = &[
    "2026-02-13T10:00:00Z AUDIT LOGIN  user=ADMIN01 terminal=TSO001",
    "2026-02-13T10:01:00Z AUDIT ACCESS dataset=PROD.DATA.FILE01 user=BATCH01",
    "2026-02-13T10:02:00Z AUDIT SUBMIT job=JOB001 user=BATCH01",
    "2026-02-13T10:03:00Z AUDIT CONFIG key=log_level old=INFO new=DEBUG user=ADMIN01",
    "2026-02-13T10:04:00Z AUDIT ACCESS dataset=PROD.DATA.FILE02 user=BATCH02",
];

const ERROR: &[&str] = &[
    "2026-02-13T10:05:00Z ERROR IEF450I JOB002 ABENDED S0C7",
    "2026-02-13T10:05:01Z ERROR Data exception in program PROG01",
    "2026-02-13T10:06:00Z ERROR Connection refused: DB2 subsystem",
    "2026-02-13T10:07:00Z ERROR Retry 1 of 3 for DB2 connection",
    "2026-02-13T10:08:00Z ERROR Timeout waiting for response",
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryStatus {
    pub used_mb: u64,
    pub total_mb: u64,
    pub percent: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobCounts {
    pub running: u64,
    pub queued: u64,
    pub completed_today: u64,
    pub failed_today: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemStatus {
    pub cpu: f64,
    pub memory: MemoryStatus,
    pub jobs: JobCounts,
    pub subsystems: BTreeMap<String, String>,
    pub timestamp: String,
}

impl SystemStatus {
    fn simulated() -> Self {
        let subsystems = ["db2", "cics", "mq", "jes2"]
            .into_iter()
            .map(|name| (name.to_string(), "active".to_string()))
            .collect();
        Self {
            cpu: 45.2,
            memory: MemoryStatus {
                used_mb: 12800,
                total_mb: 16384,
                percent: 78.1,
            },
            jobs: JobCounts {
                running: 3,
                queued: 12,
                completed_today: 47,
                failed_today: 2,
            },
            subsystems,
            timestamp: "2026-02-13T10:30:00Z".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct FixtureStore {
    root: PathBuf,
}

impl FixtureStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Returns the last `tail` lines of a known source. Callers resolve unknown sources first.
    pub async fn log_lines(&self, source: &str, tail: usize) -> Vec<String> {
        let path = self.root.join(format!("{source}.log"));
        let lines = match tokio::fs::read_to_string(&path).await {
            Ok(text) => text.lines().map(str::to_string).collect(),
            Err(err) => {
                if err.kind() != std::io::ErrorKind::NotFound {
                    tracing::warn!(path = %path.display(), error = %err, "log fixture unreadable, using built-in lines");
                }
                builtin_lines(source)
            }
        };
        last_n(lines, tail)
    }

    pub async fn status(&self) -> SystemStatus {
        let path = self.root.join("status.json");
        let text = match tokio::fs::read_to_string(&path).await {
            Ok(text) => text,
            Err(_) => return SystemStatus::simulated(),
        };
        match serde_json::from_str(&text) {
            Ok(status) => status,
            Err(err) => {
                tracing::warn!(path = %path.display(), error = %err, "status fixture malformed, using built-in snapshot");
                SystemStatus::simulated()
            }
        }
    }
}

fn builtin_lines(source: &str) -> Vec<String> {
    let lines = match source {
        "syslog" => SYSLOG,
        "joblog" => JOBLOG,
        "audit" => AUDIT,
        "error" => ERROR,
        _ => &[],
    };
    lines.iter().map(|l| l.to_string()).collect()
}

fn last_n(mut lines: Vec<String>, n: usize) -> Vec<String> {
    let start = lines.len().saturating_sub(n);
    lines.split_off(start)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn builtin_logs_are_tailed() {
        let dir = tempfile::tempdir().unwrap();
        let store = FixtureStore::new(dir.path());

        let lines = store.log_lines("syslog", 3).await;
        assert_eq!(lines.len(), 3);
        assert!(lines[2].contains("Health check passed"));

        assert!(store.log_lines("syslog", 0).await.is_empty());
        assert_eq!(store.log_lines("audit", 500).await.len(), AUDIT.len());
    }

    #[tokio::test]
    async fn fixture_files_take_precedence() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("joblog.log"), "JOBX STARTED\nJOBX ENDED\n").unwrap();
        let store = FixtureStore::new(dir.path());

        let lines = store.log_lines("joblog", 10).await;
        assert_eq!(lines, vec!["JOBX STARTED".to_string(), "JOBX ENDED".to_string()]);
    }

    #[tokio::test]
    async fn status_falls_back_when_fixture_is_malformed() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("status.json"), "{not json").unwrap();
        let store = FixtureStore::new(dir.path());

        let status = store.status().await;
        assert_eq!(status, SystemStatus::simulated());
    }

    #[tokio::test]
    async fn status_reads_fixture() {
        let dir = tempfile::tempdir().unwrap();
        let mut custom = SystemStatus::simulated();
        custom.cpu = 91.5;
        std::fs::write(
            dir.path().join("status.json"),
            serde_json::to_string(&custom).unwrap(),
        )
        .unwrap();
        let store = FixtureStore::new(dir.path());

        assert_eq!(store.status().await.cpu, 91.5);
    }
}
