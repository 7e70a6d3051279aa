// ABOUTME: runs already-validated argv vectors, either simulated or as a bounded subprocess.
// ABOUTME: never goes through a shell so the validated tokens are exactly what executes.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tokio::process::Command;

const MAX_STDIO_BYTES: usize = 8192;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExecOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
    pub stdout_truncated: bool,
    pub stderr_truncated: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum ExecutorError {
    #[error("missing argv[0]")]
    MissingProgram,
    #[error("spawn failed: {0}")]
    Spawn(#[from] std::io::Error),
    #[error("timed out after {0:?}")]
    TimedOut(Duration),
}

/// The sandbox boundary. Implementations receive argv that already passed the policy engine.
#[async_trait]
pub trait CommandExecutor: Send + Sync {
    async fn execute(&self, argv: &[String]) -> Result<ExecOutput, ExecutorError>;
}

pub struct ProcessExecutor {
    workdir: PathBuf,
    timeout: Duration,
}

impl ProcessExecutor {
    pub fn new(workdir: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            workdir: workdir.into(),
            timeout,
        }
    }
}

#[async_trait]
impl CommandExecutor for ProcessExecutor {
    async fn execute(&self, argv: &[String]) -> Result<ExecOutput, ExecutorError> {
        let (program, args) = argv.split_first().ok_or(ExecutorError::MissingProgram)?;

        let mut cmd = Command::new(program);
        cmd.args(args)
            .current_dir(&self.workdir)
            .env_clear()
            .env("PATH", "/usr/bin:/bin")
            .kill_on_drop(true);

        let output = match tokio::time::timeout(self.timeout, cmd.output()).await {
            Ok(res) => res?,
            Err(_) => return Err(ExecutorError::TimedOut(self.timeout)),
        };

        let (stdout, stdout_truncated) = truncate_bytes(&output.stdout);
        let (stderr, stderr_truncated) = truncate_bytes(&output.stderr);

        Ok(ExecOutput {
            stdout,
            stderr,
            exit_code: output.status.code(),
            stdout_truncated,
            stderr_truncated,
        })
    }
}

/// Canned output keyed by binary; stands in for the mainframe simulator container.
pub struct SimulatedExecutor;

#[async_trait]
impl CommandExecutor for SimulatedExecutor {
    async fn execute(&self, argv: &[String]) -> Result<ExecOutput, ExecutorError> {
        let (program, args) = argv.split_first().ok_or(ExecutorError::MissingProgram)?;

        let stdout = match program.as_str() {
            "echo" => args.join(" "),
            "cat" => "Simulated file content from /sim/\nLine 1\nLine 2\nLine 3".to_string(),
            "ls" => "syslog.log\njoblog.log\naudit.log\nerror.log\nstatus.json".to_string(),
            "head" => "First lines of simulated file".to_string(),
            "tail" => "Last lines of simulated file".to_string(),
            "grep" => "Matching lines from simulated search".to_string(),
            "date" => "2026-02-13T10:30:00Z".to_string(),
            "hostname" => "mainframe-sim-01".to_string(),
            _ => format!("Simulated output for: {}", argv.join(" ")),
        };

        Ok(ExecOutput {
            stdout,
            stderr: String::new(),
            exit_code: Some(0),
            stdout_truncated: false,
            stderr_truncated: false,
        })
    }
}

fn truncate_bytes(bytes: &[u8]) -> (String, bool) {
    if bytes.len() <= MAX_STDIO_BYTES {
        return (String::from_utf8_lossy(bytes).to_string(), false);
    }

    let mut out = String::from_utf8_lossy(&bytes[..MAX_STDIO_BYTES]).to_string();
    out.push_str("\n[truncated]\n");
    (out, true)
}
