//! One-shot CLI for the healing pipeline.
//!
//! `mender run` executes a single run in the foreground and prints the final
//! report as JSON; the long-running HTTP daemon lives in `mender-server`.

use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand};
use uuid::Uuid;

use mender::config::AgentConfig;
use mender::events::EventBus;
use mender::io::github::parse_repo_url;
use mender::io::sandbox::docker_status;
use mender::logging;
use mender::pipeline::{RunRequest, run_managed};

#[derive(Parser)]
#[command(name = "mender", version, about = "Autonomous repo-healing agent")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Heal a repository once and print the final report.
    Run {
        /// Repository URL (https://github.com/{owner}/{repo}).
        #[arg(long)]
        repo: String,
        /// Team name, used to derive the push branch.
        #[arg(long)]
        team: String,
        /// Leader name, used to derive the push branch.
        #[arg(long)]
        leader: String,
        /// Override the configured repair-iteration budget.
        #[arg(long)]
        retry_limit: Option<u32>,
    },
    /// Probe the container daemon and print its status.
    Doctor,
}

fn main() {
    if let Err(err) = run() {
        eprintln!("{err:#}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Command::Run {
            repo,
            team,
            leader,
            retry_limit,
        } => cmd_run(repo, team, leader, retry_limit),
        Command::Doctor => cmd_doctor(),
    }
}

fn cmd_run(repo: String, team: String, leader: String, retry_limit: Option<u32>) -> Result<()> {
    let mut config = AgentConfig::from_env().context("load configuration")?;
    if let Some(limit) = retry_limit {
        config.retry_limit = limit;
        config.validate()?;
    }
    logging::init_with_file(&config.log_dir).context("init logging")?;

    parse_repo_url(&repo)
        .ok_or_else(|| anyhow!("repository URL must look like https://github.com/{{owner}}/{{repo}}"))?;
    if team.trim().is_empty() || leader.trim().is_empty() {
        return Err(anyhow!("--team and --leader must be non-empty"));
    }

    let request = RunRequest {
        run_id: Uuid::new_v4().to_string(),
        repo_url: repo,
        team_name: team,
        leader_name: leader,
    };
    let report = run_managed(&config, Arc::new(EventBus::new()), request);

    let mut rendered = serde_json::to_string_pretty(&report)?;
    rendered.push('\n');
    print!("{rendered}");
    Ok(())
}

fn cmd_doctor() -> Result<()> {
    logging::init();
    let status = docker_status();
    let mut rendered = serde_json::to_string_pretty(&status)?;
    rendered.push('\n');
    print!("{rendered}");
    Ok(())
}
