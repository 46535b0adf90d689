use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use nostrbot::agents::{self, AgentError, AgentSettings};
use nostrbot::config::RuntimeConfig;
use nostrbot::scheduler::Scheduler;

/// Run bots on the nostr network
#[derive(Parser)]
#[command(name = "nostrbot", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run bots until interrupted
    Run {
        /// Bot to run (can be given multiple times)
        #[arg(short = 'c', long = "bot", default_value = "nostr")]
        bots: Vec<String>,

        /// Relay address (can be given multiple times)
        #[arg(short = 'r', long = "relay", env = "NOSTR_RELAYS", value_delimiter = ',')]
        relays: Vec<String>,

        /// Debug logging
        #[arg(short, long)]
        verbose: bool,
    },
    /// List the available bots
    List,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<ExitCode> {
    match Cli::parse().command {
        Command::Run {
            bots,
            relays,
            verbose,
        } => run(bots, relays, verbose).await,
        Command::List => {
            for name in agents::NAMES {
                println!("{}", name);
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}

async fn run(bots: Vec<String>, relays: Vec<String>, verbose: bool) -> anyhow::Result<ExitCode> {
    // Initialize logging
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    // Load config, command line relays win
    let mut runtime = RuntimeConfig::load()?;
    if !relays.is_empty() {
        runtime.relays = relays;
    }
    let settings = AgentSettings::from_env()?;

    let cancel = CancellationToken::new();
    let mut scheduler = Scheduler::new(cancel.clone()).shared_relays(runtime.relays());

    for name in &bots {
        match agents::build(name, &runtime, &settings).await {
            Ok(entry) => scheduler.add(entry),
            Err(AgentError::NotFound(_)) => {
                eprintln!("bot not found: {}", name);
                return Ok(ExitCode::FAILURE);
            }
            Err(e) => return Err(e.into()),
        }
    }

    tracing::info!(bots = ?bots, relays = ?runtime.relays(), "nostrbot starting");

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupted, shutting down");
            cancel.cancel();
        }
    });

    let report = scheduler.run().await;
    if report.is_clean() {
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::FAILURE)
    }
}
