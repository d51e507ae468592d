//! quorum-lock CLI
//!
//! Runs a command while holding a lease on a set of independent lock stores.

mod commands;
mod config;

use std::path::Path;

use clap::{Parser, Subcommand};
use tracing_subscriber::{EnvFilter, fmt};

use crate::config::FileConfig;

/// Run commands under a quorum lock.
#[derive(Parser, Debug)]
#[command(name = "quorum-lock", version, about)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(short, long, default_value = "quorum-lock.toml", global = true)]
    config: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Acquire a lock, run a command while keeping it alive, then release.
    Exec(commands::exec::ExecArgs),
    /// Validate the configuration and print the quorum layout.
    CheckConfig,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = FileConfig::load(Path::new(&cli.config))?;

    match cli.command {
        Command::Exec(args) => {
            let code = commands::exec::run(&config, &args).await?;
            std::process::exit(code);
        }
        Command::CheckConfig => commands::check_config::run(&config),
    }
}
