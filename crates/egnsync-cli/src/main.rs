//! egnsync CLI - Command-line interface for egnsync
//!
//! Provides commands for:
//! - Running one sync pass, or a dry run of it
//! - Adding, removing and listing sync pairs
//! - Showing stored sync state per pair
//! - Watching pairs continuously
//! - Inspecting, editing and validating configuration
//! - Listing, uploading and downloading single remote files
//! - Managing the stored refresh token

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use egnsync_core::config::LoggingConfig;
use tracing_subscriber::EnvFilter;

mod commands;
mod output;

use commands::{
    auth::AuthCommand,
    config::ConfigCommand,
    files::{DownloadCommand, LsCommand, UploadCommand},
    status::StatusCommand,
    sync::SyncCommand,
    watch::WatchCommand,
    CommandContext,
};
use output::OutputFormat;

#[derive(Debug, Parser)]
#[command(name = "egnsync", version, about = "Bidirectional sync between local folders and Egnyte")]
pub struct Cli {
    /// Output in JSON format
    #[arg(long, global = true)]
    json: bool,

    /// Verbose output (can be repeated: -v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Use alternate config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Minimal output
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Run one sync pass, or manage pairs with `sync add|remove|list`
    Sync(SyncCommand),
    /// Show stored sync state
    Status(StatusCommand),
    /// Sync continuously until interrupted
    Watch(WatchCommand),
    /// View, edit and validate configuration
    #[command(subcommand)]
    Config(ConfigCommand),
    /// Manage stored credentials
    #[command(subcommand)]
    Auth(AuthCommand),
    /// List a remote folder
    Ls(LsCommand),
    /// Upload one file, outside of any pair
    Upload(UploadCommand),
    /// Download one file, outside of any pair
    Download(DownloadCommand),
}

/// Level used when `RUST_LOG` is not set
fn default_level(cli: &Cli, logging: &LoggingConfig) -> String {
    match (cli.quiet, cli.verbose) {
        (true, _) => "warn".to_string(),
        (false, 0) => logging.level.clone(),
        (false, 1) => "debug".to_string(),
        _ => "trace".to_string(),
    }
}

fn init_tracing(cli: &Cli, logging: &LoggingConfig) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level(cli, logging)));

    // Logs go to stderr so that `--json` output on stdout stays parseable
    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    if logging.format == "json" {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let format = if cli.json {
        OutputFormat::Json
    } else {
        OutputFormat::Human
    };
    let ctx = CommandContext::new(format, cli.quiet, cli.verbose, cli.config.clone());

    let config = ctx.load_config();
    let logging = config
        .as_ref()
        .map(|c| c.logging.clone())
        .unwrap_or_default();
    init_tracing(&cli, &logging);
    let config = config?;

    match cli.command {
        Commands::Sync(cmd) => cmd.execute(&ctx, &config).await,
        Commands::Status(cmd) => cmd.execute(&ctx, &config).await,
        Commands::Watch(cmd) => cmd.execute(&ctx, &config).await,
        Commands::Config(cmd) => cmd.execute(&ctx, &config).await,
        Commands::Auth(cmd) => cmd.execute(&ctx, &config).await,
        Commands::Ls(cmd) => cmd.execute(&ctx, &config).await,
        Commands::Upload(cmd) => cmd.execute(&ctx, &config).await,
        Commands::Download(cmd) => cmd.execute(&ctx, &config).await,
    }
}
