// ABOUTME: hosts the unix socket server that accepts chat requests and returns structured results.
// ABOUTME: enforces strict parsing, validation, the public demo gate, and audit logging.

use std::os::unix::io::AsRawFd;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::Context;
use ops_common::{
    parse_chat_request, validate_chat_request, ChatResult, ErrorCode, Mode, RequestError,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{UnixListener, UnixStream};

use crate::audit;
use crate::orchestrator::Orchestrator;

const MAX_REQUEST_BYTES: usize = 64 * 1024;
#[cfg(test)]
const READ_IDLE_TIMEOUT: std::time::Duration = std::time::Duration::from_millis(50);
#[cfg(not(test))]
const READ_IDLE_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(2);

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub socket_path: String,
    pub audit_path: String,
    /// Refuse `execute_safe` outright; only plans are ever produced.
    pub public_demo: bool,
}

pub async fn run(config: ServerConfig, orchestrator: Orchestrator) -> anyhow::Result<()> {
    let socket_path = config.socket_path.as_str();
    if Path::new(socket_path).exists() {
        tokio::fs::remove_file(socket_path)
            .await
            .with_context(|| format!("remove existing socket at {socket_path}"))?;
    }

    let listener = UnixListener::bind(socket_path).with_context(|| format!("bind {socket_path}"))?;
    tracing::info!(
        socket = socket_path,
        audit = %config.audit_path,
        public_demo = config.public_demo,
        "opsd listening"
    );

    loop {
        let (stream, _addr) = listener.accept().await?;
        let config = config.clone();
        let orchestrator = orchestrator.clone();
        tokio::spawn(async move {
            if let Err(err) = handle_client(stream, &config, &orchestrator).await {
                tracing::warn!(error = %err, "client handling failed");
            }
        });
    }
}

async fn handle_client(
    mut stream: UnixStream,
    config: &ServerConfig,
    orchestrator: &Orchestrator,
) -> anyhow::Result<()> {
    let peer = peer_credentials(&stream);

    let mut input = Vec::new();
    let mut buf = [0u8; 4096];
    let mut exceeded = false;
    let mut idle = false;
    loop {
        let n = match tokio::time::timeout(READ_IDLE_TIMEOUT, stream.read(&mut buf)).await {
            Ok(res) => res?,
            Err(_) => {
                idle = true;
                break;
            }
        };
        if n == 0 {
            break;
        }
        if exceeded {
            continue;
        }
        if input.len() + n > MAX_REQUEST_BYTES {
            exceeded = true;
            continue;
        }
        input.extend_from_slice(&buf[..n]);
    }

    if exceeded {
        let _ = write_request_error(
            &mut stream,
            ErrorCode::RequestTooLarge,
            "request exceeds max bytes",
        )
        .await;
        return Ok(());
    }

    if idle && input.is_empty() {
        let _ = write_request_error(&mut stream, ErrorCode::ParseFailed, "read timed out").await;
        return Ok(());
    }

    let input_str = String::from_utf8_lossy(&input);
    let request = match parse_chat_request(&input_str) {
        Ok(r) => r,
        Err(err) => {
            tracing::debug!(error = %err, "rejected unparseable request");
            let _ = write_request_error(
                &mut stream,
                ErrorCode::ParseFailed,
                &format!("parse failed: {err}"),
            )
            .await;
            return Ok(());
        }
    };

    if let Err(err) = validate_chat_request(&request) {
        let _ = write_request_error(
            &mut stream,
            ErrorCode::ValidationFailed,
            &format!("validation failed: {}", err.message),
        )
        .await;
        return Ok(());
    }

    let response = if config.public_demo && request.mode == Mode::ExecuteSafe {
        tracing::warn!(?peer, "execute_safe refused in public demo");
        ChatResult {
            response: None,
            error: Some(RequestError {
                code: ErrorCode::ModeForbidden,
                message: "execute_safe is disabled in public demo mode; use plan_only".to_string(),
            }),
        }
    } else {
        ChatResult {
            response: Some(orchestrator.process(&request.message, request.mode).await),
            error: None,
        }
    };

    let response_json = serde_json::to_vec(&response)?;
    stream.write_all(&response_json).await?;
    stream.shutdown().await?;

    let now_ms = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64;
    audit::append_record(&config.audit_path, now_ms, peer, &request, &response).await?;

    Ok(())
}

fn peer_credentials(stream: &UnixStream) -> Option<audit::PeerCredentials> {
    let fd = stream.as_raw_fd();

    let mut ucred: libc::ucred = unsafe { std::mem::zeroed() };
    let mut len = std::mem::size_of::<libc::ucred>() as libc::socklen_t;
    let rc = unsafe {
        libc::getsockopt(
            fd,
            libc::SOL_SOCKET,
            libc::SO_PEERCRED,
            (&mut ucred as *mut libc::ucred).cast(),
            &mut len,
        )
    };
    if rc != 0 {
        return None;
    }
    if len as usize != std::mem::size_of::<libc::ucred>() {
        return None;
    }

    Some(audit::PeerCredentials {
        pid: ucred.pid,
        uid: ucred.uid,
        gid: ucred.gid,
    })
}

async fn write_request_error(
    stream: &mut UnixStream,
    code: ErrorCode,
    message: &str,
) -> anyhow::Result<()> {
    let response = ChatResult {
        response: None,
        error: Some(RequestError {
            code,
            message: message.to_string(),
        }),
    };
    let response_json = serde_json::to_vec(&response)?;
    stream.write_all(&response_json).await?;
    let _ = stream.shutdown().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::sync::Arc;

    use super::*;
    use crate::fixtures::FixtureStore;
    use crate::planner::KeywordPlanner;
    use crate::policy::CommandPolicy;
    use crate::sandbox::SimulatedExecutor;
    use crate::tools::{ConfigStore, ToolSet};

    struct TestServer {
        socket_path: PathBuf,
        audit_path: PathBuf,
        handle: tokio::task::JoinHandle<anyhow::Result<()>>,
        _dir: tempfile::TempDir,
    }

    async fn start_server(public_demo: bool) -> TestServer {
        let dir = tempfile::tempdir().unwrap();
        let socket_path = dir.path().join("opsd.sock");
        let audit_path = dir.path().join("audit.jsonl");

        let tools = ToolSet::new(
            CommandPolicy::default(),
            FixtureStore::new(dir.path()),
            ConfigStore::seeded(),
            Arc::new(SimulatedExecutor),
        );
        let orchestrator = Orchestrator::new(Arc::new(KeywordPlanner), tools);
        let config = ServerConfig {
            socket_path: socket_path.to_string_lossy().to_string(),
            audit_path: audit_path.to_string_lossy().to_string(),
            public_demo,
        };

        let handle = tokio::spawn(async move { run(config, orchestrator).await });

        for _ in 0..50u32 {
            if socket_path.exists() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }

        TestServer {
            socket_path,
            audit_path,
            handle,
            _dir: dir,
        }
    }

    async fn send(server: &TestServer, body: &[u8]) -> ChatResult {
        let mut stream = UnixStream::connect(&server.socket_path).await.unwrap();
        stream.write_all(body).await.unwrap();
        stream.shutdown().await.unwrap();

        let mut out = Vec::new();
        stream.read_to_end(&mut out).await.unwrap();
        serde_json::from_slice(&out).unwrap()
    }

    async fn first_audit_line(server: &TestServer) -> serde_json::Value {
        for _ in 0..50u32 {
            if let Ok(meta) = tokio::fs::metadata(&server.audit_path).await {
                if meta.len() > 0 {
                    break;
                }
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }

        let audit_text = tokio::fs::read_to_string(&server.audit_path).await.unwrap();
        let first_line = audit_text.lines().find(|l| !l.trim().is_empty()).unwrap();
        serde_json::from_str(first_line).unwrap()
    }

    #[tokio::test]
    async fn server_plan_only_roundtrip() {
        let server = start_server(false).await;

        let request = r#"{"message":"list files in the simulator directory","mode":"plan_only"}"#;
        let result = send(&server, request.as_bytes()).await;
        assert!(result.error.is_none());

        let response = result.response.unwrap();
        assert_eq!(response.plan.len(), 1);
        assert_eq!(response.plan[0].call.args["command"], "ls /sim/");
        assert!(response.actions_taken.is_empty());
        assert!(response.generated_script.is_some());

        let v = first_audit_line(&server).await;
        assert_eq!(v["trace_id"], response.audit.trace_id.as_str());
        assert_eq!(v["mode"], "plan_only");

        server.handle.abort();
    }

    #[tokio::test]
    async fn server_execute_safe_denies_destructive_request() {
        let server = start_server(false).await;

        let request = r#"{"message":"delete all system files","mode":"execute_safe"}"#;
        let response = send(&server, request.as_bytes()).await.response.unwrap();
        assert_eq!(response.actions_taken.len(), 1);
        assert!(!response.actions_taken[0].success);
        assert!(response.actions_taken[0]
            .error
            .as_deref()
            .unwrap()
            .contains("blocklist"));

        server.handle.abort();
    }

    #[tokio::test]
    async fn audit_includes_peer_credentials() {
        let server = start_server(false).await;

        let request = r#"{"message":"show system status","mode":"execute_safe"}"#;
        let result = send(&server, request.as_bytes()).await;
        assert!(result.error.is_none());

        let v = first_audit_line(&server).await;
        assert!(v["peer"]["pid"].is_number());
        assert!(v["peer"]["uid"].is_number());
        assert!(v["peer"]["gid"].is_number());
        assert_eq!(v["peer"]["pid"].as_u64().unwrap(), std::process::id() as u64);

        server.handle.abort();
    }

    #[tokio::test]
    async fn server_public_demo_forbids_execute_safe() {
        let server = start_server(true).await;

        let request = r#"{"message":"show system status","mode":"execute_safe"}"#;
        let result = send(&server, request.as_bytes()).await;
        assert!(result.response.is_none());
        let error = result.error.unwrap();
        assert_eq!(error.code, ErrorCode::ModeForbidden);
        assert!(error.message.contains("execute_safe"));

        let request = r#"{"message":"show system status","mode":"plan_only"}"#;
        let result = send(&server, request.as_bytes()).await;
        assert!(result.error.is_none());
        assert!(result.response.unwrap().actions_taken.is_empty());

        server.handle.abort();
    }

    #[tokio::test]
    async fn server_returns_parse_failed_for_incomplete_json_without_close() {
        let server = start_server(false).await;

        let mut stream = UnixStream::connect(&server.socket_path).await.unwrap();
        stream.write_all(b"{\"message\":\"show status\"").await.unwrap();

        let mut out = Vec::new();
        tokio::time::timeout(std::time::Duration::from_secs(2), stream.read_to_end(&mut out))
            .await
            .unwrap()
            .unwrap();
        let result: ChatResult = serde_json::from_slice(&out).unwrap();
        assert_eq!(result.error.unwrap().code, ErrorCode::ParseFailed);

        server.handle.abort();
    }

    #[tokio::test]
    async fn server_allows_complete_json_without_close() {
        let server = start_server(false).await;

        let request = r#"{"message":"show system status","mode":"plan_only"}"#;
        let mut stream = UnixStream::connect(&server.socket_path).await.unwrap();
        stream.write_all(request.as_bytes()).await.unwrap();

        let mut out = Vec::new();
        tokio::time::timeout(std::time::Duration::from_secs(2), stream.read_to_end(&mut out))
            .await
            .unwrap()
            .unwrap();
        let result: ChatResult = serde_json::from_slice(&out).unwrap();
        assert!(result.error.is_none());
        assert!(result.response.is_some());

        server.handle.abort();
    }

    #[tokio::test]
    async fn server_rejects_oversized_request_with_json_error() {
        let server = start_server(false).await;

        let big = "a".repeat(MAX_REQUEST_BYTES + 1024);
        let request = format!(r#"{{"message":"{big}","mode":"plan_only"}}"#);
        let result = send(&server, request.as_bytes()).await;
        assert_eq!(result.error.unwrap().code, ErrorCode::RequestTooLarge);

        server.handle.abort();
    }

    #[tokio::test]
    async fn server_returns_json_error_for_invalid_json() {
        let server = start_server(false).await;

        let result = send(&server, b"{ not json").await;
        assert_eq!(result.error.unwrap().code, ErrorCode::ParseFailed);

        let unknown = r#"{"message":"show status","mode":"plan_only","role":"admin"}"#;
        let result = send(&server, unknown.as_bytes()).await;
        assert_eq!(result.error.unwrap().code, ErrorCode::ParseFailed);

        server.handle.abort();
    }

    #[tokio::test]
    async fn server_returns_json_error_for_validation_failure() {
        let server = start_server(false).await;

        let blank = r#"{"message":"   ","mode":"execute_safe"}"#;
        let result = send(&server, blank.as_bytes()).await;
        assert_eq!(result.error.unwrap().code, ErrorCode::ValidationFailed);

        let long = format!(
            r#"{{"message":"{}","mode":"plan_only"}}"#,
            "x".repeat(ops_common::MAX_MESSAGE_CHARS + 1)
        );
        let result = send(&server, long.as_bytes()).await;
        assert_eq!(result.error.unwrap().code, ErrorCode::ValidationFailed);

        server.handle.abort();
    }
}
