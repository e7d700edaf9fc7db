//! itemsync CLI - reconcile analytics workspace items.
//!
//! The main entry point for the `itemsync` binary.

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use itemsync_cli::{Cli, Commands};

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = cli.config();

    let default_level = if cli.verbose { "info" } else { "warn" };
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .init();

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async {
        match cli.command {
            Commands::Deploy(args) => itemsync_cli::commands::deploy::execute(args, &config).await,
            Commands::Plan(args) => itemsync_cli::commands::plan::execute(args, &config).await,
            Commands::Items(args) => itemsync_cli::commands::items::execute(args, &config).await,
            Commands::Workspaces => itemsync_cli::commands::workspaces::execute(&config).await,
            Commands::Export(args) => itemsync_cli::commands::export::execute(args, &config).await,
        }
    })
}
