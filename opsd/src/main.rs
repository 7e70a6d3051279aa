// ABOUTME: runs the operations daemon that plans and safely executes chat requests against the simulator.
// ABOUTME: wires the planner, policy engine, tools, and executor behind a local unix socket.

mod audit;
mod fixtures;
mod orchestrator;
mod planner;
mod policy;
mod sandbox;
mod server;
mod tools;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, ValueEnum};
use tracing_subscriber::EnvFilter;

use crate::fixtures::FixtureStore;
use crate::orchestrator::Orchestrator;
use crate::planner::{KeywordPlanner, PlanGenerator, ScriptedPlanner};
use crate::policy::CommandPolicy;
use crate::sandbox::{CommandExecutor, ProcessExecutor, SimulatedExecutor};
use crate::server::ServerConfig;
use crate::tools::{ConfigStore, ToolSet};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ExecutorKind {
    /// Canned output; nothing is spawned.
    Simulated,
    /// Real subprocesses confined to the simulator root.
    Process,
}

#[derive(Debug, Parser)]
#[command(name = "opsd", about = "Natural-language operations daemon for the mainframe simulator")]
struct Args {
    #[arg(long, env = "OPSD_SOCKET_PATH", default_value = "/tmp/opsd.sock")]
    socket_path: String,

    #[arg(long, env = "OPSD_AUDIT_PATH", default_value = "./opsd-audit.jsonl")]
    audit_path: String,

    /// Directory holding log and status fixtures; also the path jail root.
    #[arg(long, env = "OPSD_SIM_ROOT", default_value = policy::DEFAULT_JAIL_ROOT)]
    sim_root: PathBuf,

    #[arg(long, env = "OPSD_PUBLIC_DEMO")]
    public_demo: bool,

    #[arg(long, env = "OPSD_EXECUTOR", value_enum, default_value = "simulated")]
    executor: ExecutorKind,

    #[arg(long, env = "OPSD_EXEC_TIMEOUT_SEC", default_value_t = 10)]
    exec_timeout_sec: u64,

    #[arg(long, env = "OPSD_PLANNER_TIMEOUT_SEC", default_value_t = 30)]
    planner_timeout_sec: u64,

    /// Replay the plan in this json file for every request instead of keyword planning.
    #[arg(long, env = "OPSD_PLAN_FILE")]
    plan_file: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("opsd=info")),
        )
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();

    let args = Args::parse();

    let planner: Arc<dyn PlanGenerator> = match &args.plan_file {
        Some(path) => {
            let plan = tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("read plan file {}", path.display()))?;
            planner::parse_plan(&plan)
                .with_context(|| format!("parse plan file {}", path.display()))?;
            Arc::new(ScriptedPlanner::new(plan))
        }
        None => Arc::new(KeywordPlanner),
    };

    let executor: Arc<dyn CommandExecutor> = match args.executor {
        ExecutorKind::Simulated => Arc::new(SimulatedExecutor),
        ExecutorKind::Process => Arc::new(ProcessExecutor::new(
            &args.sim_root,
            Duration::from_secs(args.exec_timeout_sec),
        )),
    };

    let policy = CommandPolicy::default().with_jail_root(&args.sim_root);
    tracing::info!(
        jail_root = %policy.jail_root().display(),
        checks = ?CommandPolicy::check_order(),
        executor = ?args.executor,
        "policy loaded"
    );

    let tools = ToolSet::new(
        policy,
        FixtureStore::new(&args.sim_root),
        ConfigStore::seeded(),
        executor,
    );
    let orchestrator = Orchestrator::new(planner, tools)
        .with_planner_timeout(Duration::from_secs(args.planner_timeout_sec));

    server::run(
        ServerConfig {
            socket_path: args.socket_path,
            audit_path: args.audit_path,
            public_demo: args.public_demo,
        },
        orchestrator,
    )
    .await
}
