// ABOUTME: provides a user-facing cli for sending chat requests to the local operations daemon.
// ABOUTME: prints the daemon's json reply verbatim, or a plain-text summary on request.

use clap::{Parser, Subcommand, ValueEnum};
use ops_common::{ChatResult, Mode};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixStream;

use opsh::{build_request, parse_and_validate, render_summary, validate_verdict};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum CliMode {
    PlanOnly,
    ExecuteSafe,
}

impl From<CliMode> for Mode {
    fn from(mode: CliMode) -> Self {
        match mode {
            CliMode::PlanOnly => Mode::PlanOnly,
            CliMode::ExecuteSafe => Mode::ExecuteSafe,
        }
    }
}

#[derive(Debug, Parser)]
#[command(name = "opsh")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Send a natural-language request to opsd.
    Send {
        #[arg(long, env = "OPSD_SOCKET_PATH", default_value = "/tmp/opsd.sock")]
        socket_path: String,

        #[arg(long, value_enum, default_value = "plan-only")]
        mode: CliMode,

        /// Print answer, plan, and script instead of raw json.
        #[arg(long)]
        summary: bool,

        /// Full request json; overrides the message and --mode.
        #[arg(long, conflicts_with = "message")]
        json: Option<String>,

        message: Option<String>,
    },
    Validate {
        #[arg(long)]
        file: Option<String>,

        #[arg(long)]
        json: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    match args.command {
        Command::Send {
            socket_path,
            mode,
            summary,
            json,
            message,
        } => {
            let request = match (json, message) {
                (Some(json), _) => parse_and_validate(&json)?,
                (None, Some(message)) => build_request(&message, mode.into())?,
                (None, None) => {
                    let input = read_stdin().await?;
                    build_request(input.trim(), mode.into())?
                }
            };
            let canonical = serde_json::to_string(&request)?;
            let response = send(&socket_path, &canonical).await?;
            if summary {
                let result: ChatResult = serde_json::from_str(&response)?;
                print!("{}", render_summary(&result));
            } else {
                print!("{response}");
            }
        }
        Command::Validate { file, json } => {
            let input = match (json, file) {
                (Some(json), _) => json,
                (None, Some(file)) => tokio::fs::read_to_string(file).await?,
                (None, None) => read_stdin().await?,
            };
            let verdict = validate_verdict(&input);
            print!("{}", serde_json::to_string_pretty(&verdict)?);
        }
    }

    Ok(())
}

async fn read_stdin() -> anyhow::Result<String> {
    let mut input = String::new();
    tokio::io::stdin().read_to_string(&mut input).await?;
    Ok(input)
}

async fn send(socket_path: &str, input: &str) -> anyhow::Result<String> {
    let mut stream = UnixStream::connect(socket_path).await?;
    stream.write_all(input.as_bytes()).await?;
    stream.shutdown().await?;

    let mut response = String::new();
    stream.read_to_string(&mut response).await?;
    Ok(response)
}
