//! CLI entry point: load configuration, wire up a `CompletionClient`, and
//! drive one task through the EPCC pipeline to a terminal status.
//!
//! Tracing init, config load, a single-task drive loop, and an exit status
//! reflecting the run's terminal outcome. No issue tracker or worktree
//! integration lives here — those are external collaborators outside this
//! core's scope.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use coordination::ScriptedClient;
use swarm_agents::{CouncilStatus, Orchestrator, ShellTestRunner, SwarmConfig};
use tracing::{error, info};

/// Drive a single task through the swarm-agents EPCC pipeline.
///
/// No concrete LLM provider adapter ships with this crate; responses are
/// read from a canned-response script file instead, in the order each
/// agent call consumes them. Swap `build_client` for a real
/// `CompletionClient` to wire this CLI up to a live provider.
#[derive(Parser, Debug)]
#[command(name = "swarm-agents", about = "Run a task through the EPCC orchestrator")]
struct Cli {
    /// The task to carry out, e.g. "fix the off-by-one in the parser"
    task: String,

    /// Path to a TOML config file; falls back to `SwarmConfig::default()`
    #[arg(long)]
    config: Option<PathBuf>,

    /// Path to a canned-response script file: completions separated by a
    /// line containing only `---`, consumed in order by agent calls.
    #[arg(long)]
    script: PathBuf,
}

fn build_client(script_path: &PathBuf) -> Result<ScriptedClient> {
    let raw = std::fs::read_to_string(script_path)
        .with_context(|| format!("reading script file {}", script_path.display()))?;
    let responses: Vec<&str> = raw.split("\n---\n").map(str::trim).filter(|s| !s.is_empty()).collect();
    if responses.is_empty() {
        anyhow::bail!("script file {} contained no responses", script_path.display());
    }
    Ok(ScriptedClient::ok(responses))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => SwarmConfig::load(path).with_context(|| format!("loading config from {}", path.display()))?,
        None => SwarmConfig::default(),
    };

    info!(task = %cli.task, test_command = %config.test_command, "starting orchestrator run");

    let client = build_client(&cli.script)?;
    let test_runner = ShellTestRunner::new(config.test_command.clone());
    let orchestrator = Orchestrator::new(config, Arc::new(client), test_runner);

    let state = orchestrator.run(&cli.task).await?;

    for entry in &state.log {
        info!(status = %entry.status, "{}", entry.message);
    }

    match state.status {
        CouncilStatus::Completed => {
            info!("task completed");
            Ok(())
        }
        CouncilStatus::Failed => {
            error!("task failed");
            std::process::exit(1);
        }
        CouncilStatus::HumanRequired => {
            error!("task requires human review");
            std::process::exit(2);
        }
        other => {
            error!(status = %other, "orchestrator exited in a non-terminal state");
            std::process::exit(3);
        }
    }
}
