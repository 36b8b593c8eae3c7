//! dockwright - deploy containerized projects when their repositories change.
//!
//! Usage:
//!   dockwright deploy <project> <environment> [--force]
//!   dockwright status [<project>]
//!   dockwright containers [<project>]

mod commands;
mod config;
mod history;

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::Config;
use crate::history::HistoryStore;

#[derive(Parser)]
#[command(name = "dockwright", version)]
#[command(about = "Deploy containerized projects when their repositories change", long_about = None)]
struct Cli {
    /// Config file (default: $XDG_CONFIG_HOME/dockwright/config.json)
    #[arg(long, short, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build and deploy a project to an environment
    Deploy {
        /// Project name from the config
        project: String,
        /// Environment name from the config
        environment: String,
        /// Deploy even if the revision is unchanged
        #[arg(long, short)]
        force: bool,
    },

    /// Show revision and build descriptor state
    Status {
        /// Only this project
        project: Option<String>,
    },

    /// List project containers on every environment target
    Containers {
        /// Only this project
        project: Option<String>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    match run(Cli::parse()).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<bool> {
    info!(version = env!("CARGO_PKG_VERSION"), "dockwright starting");

    let config_path = cli.config.unwrap_or_else(config::default_config_path);
    let config = Config::load(&config_path)?;
    let store = HistoryStore::beside(&config_path);
    let cancel = cancel_on_interrupt(&config);

    match cli.command {
        Commands::Deploy {
            project,
            environment,
            force,
        } => commands::deploy(&config, &store, &project, &environment, force, &cancel).await,
        Commands::Status { project } => {
            commands::status(&config, &store, project.as_deref(), &cancel).await?;
            Ok(true)
        }
        Commands::Containers { project } => {
            commands::containers(&config, project.as_deref(), &cancel).await?;
            Ok(true)
        }
    }
}

/// Token cancelled by Ctrl-C or by the configured deadline.
fn cancel_on_interrupt(config: &Config) -> CancellationToken {
    let cancel = CancellationToken::new();

    let token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupted, cancelling");
            token.cancel();
        }
    });

    if let Some(deadline) = config.deadline() {
        let token = cancel.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = tokio::time::sleep(deadline) => {
                    warn!(secs = deadline.as_secs(), "deadline reached, cancelling");
                    token.cancel();
                }
            }
        });
    }

    cancel
}
