//! vaultsync: one-way Notion database to Obsidian vault sync.
//!
//! # Usage
//!
//! ```text
//! vaultsync [--config <path>] [--verbose] [--log-file <path>] <command>
//!
//! vaultsync sync [--item <id>]... [--since YYYY-MM-DD] [--filter <json>] [--force] [--recover] [--dry-run]
//! vaultsync test [--detailed]
//! vaultsync preview [--max-items N] [--json]
//! vaultsync status [--detailed] [--json]
//! vaultsync cleanup [--force]
//! vaultsync config --validate | --create | --show
//! ```

mod commands;
mod logging;
mod notion;

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};

use commands::{
    cleanup::CleanupArgs, config::ConfigArgs, preview::PreviewArgs, status::StatusArgs,
    sync::SyncArgs, test::TestArgs,
};

// ---------------------------------------------------------------------------
// CLI entry point
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "vaultsync",
    version,
    about = "Sync a Notion database into an Obsidian vault as Markdown",
    long_about = None,
)]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,

    #[command(subcommand)]
    command: Commands,
}

/// Options shared by every command.
#[derive(Args, Debug, Clone)]
pub struct GlobalArgs {
    /// Config file (default: $VAULTSYNC_CONFIG, then ~/.vaultsync/config.yaml).
    #[arg(long, short = 'c', global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Log at debug level.
    #[arg(long, short = 'v', global = true)]
    pub verbose: bool,

    /// Also append logs to this file.
    #[arg(long, global = true, value_name = "PATH")]
    pub log_file: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Fetch changed items and write them into the vault.
    Sync(SyncArgs),

    /// Check the API credentials and the vault destination.
    Test(TestArgs),

    /// Show what a sync would write, without writing.
    Preview(PreviewArgs),

    /// Compare the database with the vault and show cache state.
    Status(StatusArgs),

    /// Remove unreadable documents and prune old backups.
    Cleanup(CleanupArgs),

    /// Validate, create or show the configuration file.
    Config(ConfigArgs),
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    let global = cli.global;

    let command = match cli.command {
        // Works without a valid config, so it never touches the runtime.
        Commands::Config(args) => return args.run(&global),
        other => other,
    };

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start the async runtime")?;

    runtime.block_on(async move {
        match command {
            Commands::Sync(args) => args.run(&global).await,
            Commands::Test(args) => args.run(&global).await,
            Commands::Preview(args) => args.run(&global).await,
            Commands::Status(args) => args.run(&global).await,
            Commands::Cleanup(args) => args.run(&global).await,
            Commands::Config(args) => args.run(&global),
        }
    })
}
