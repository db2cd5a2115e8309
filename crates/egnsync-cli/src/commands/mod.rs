//! CLI subcommands and the wiring they share

pub mod auth;
pub mod config;
pub mod files;
pub mod pairs;
pub mod status;
pub mod sync;
pub mod watch;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use egnsync_conflict::PolicyEngine;
use egnsync_core::config::{Config, ValidationError};
use egnsync_core::domain::SyncPair;
use egnsync_core::ports::IStateStore;
use egnsync_remote::{EgnyteClient, KeyringTokenProvider, RateBudget, TokenManager};
use egnsync_state::JsonStateStore;
use egnsync_sync::{LocalFileSystem, SyncEngine};
use tracing::{info, warn};

use crate::output::{get_formatter, OutputFormat, OutputFormatter};

/// Global flags every command sees
#[derive(Debug, Clone)]
pub struct CommandContext {
    pub format: OutputFormat,
    pub quiet: bool,
    pub verbose: u8,
    /// Set when `--config` was given; the file must then exist
    config_override: Option<PathBuf>,
}

impl CommandContext {
    pub fn new(format: OutputFormat, quiet: bool, verbose: u8, config_override: Option<PathBuf>) -> Self {
        Self {
            format,
            quiet,
            verbose,
            config_override,
        }
    }

    pub fn config_path(&self) -> PathBuf {
        self.config_override
            .clone()
            .unwrap_or_else(Config::default_path)
    }

    /// Loads the config; a missing default file yields the defaults
    pub fn load_config(&self) -> Result<Config> {
        match &self.config_override {
            Some(path) => Config::load(path),
            None => Ok(Config::load_or_default(&Config::default_path())),
        }
    }

    pub fn formatter(&self) -> Box<dyn OutputFormatter> {
        get_formatter(self.format == OutputFormat::Json)
    }

    pub fn is_json(&self) -> bool {
        self.format == OutputFormat::Json
    }
}

/// Fails with every validation error of the config
pub fn ensure_valid(config: &Config) -> Result<()> {
    let errors = config.validate();
    if errors.is_empty() {
        return Ok(());
    }
    let details: Vec<String> = errors
        .iter()
        .map(|e| format!("{}: {}", e.field, e.message))
        .collect();
    bail!("Invalid configuration: {}", details.join("; "))
}

/// Writes an edited config back to its file
///
/// Refuses edits that introduce validation errors the file did not already
/// have, so a half-configured file can still be filled in step by step.
pub fn save_config(ctx: &CommandContext, before: &Config, after: &Config) -> Result<()> {
    let introduced = introduced_errors(&before.validate(), &after.validate());
    if !introduced.is_empty() {
        let details: Vec<String> = introduced.iter().map(ToString::to_string).collect();
        bail!("Refusing to save invalid configuration: {}", details.join("; "));
    }
    let path = ctx.config_path();
    after.save(&path)?;
    info!(path = %path.display(), "Configuration saved");
    Ok(())
}

fn introduced_errors(before: &[ValidationError], after: &[ValidationError]) -> Vec<ValidationError> {
    after
        .iter()
        .filter(|e| !before.contains(e))
        .cloned()
        .collect()
}

/// Configured pairs, narrowed to one when `only` is given
pub fn select_pairs(config: &Config, only: Option<&str>) -> Result<Vec<SyncPair>> {
    let pairs = config
        .sync_pairs()
        .context("Invalid pair in configuration")?;
    match only {
        None => Ok(pairs),
        Some(id) => {
            let selected: Vec<SyncPair> = pairs.into_iter().filter(|p| p.id.as_str() == id).collect();
            if selected.is_empty() {
                bail!("Unknown pair '{id}'");
            }
            Ok(selected)
        }
    }
}

pub async fn open_state(config: &Config) -> Result<Arc<JsonStateStore>> {
    let store = JsonStateStore::open(&config.sync.state_file)
        .await
        .with_context(|| {
            format!(
                "Failed to open sync state {}",
                config.sync.state_file.display()
            )
        })?;
    Ok(Arc::new(store))
}

/// Egnyte client with keyring tokens and the configured request budget
pub fn build_client(config: &Config) -> Result<EgnyteClient> {
    let provider = Arc::new(
        KeyringTokenProvider::from_config(config).context("Failed to set up token refresh")?,
    );
    let tokens = Arc::new(TokenManager::new(
        provider,
        Duration::from_secs(config.auth.refresh_buffer_secs),
    ));
    let budget = Arc::new(RateBudget::new(
        config.remote.requests_per_second,
        Some(config.remote.daily_request_limit),
    ));
    EgnyteClient::from_config(&config.remote, tokens, budget).context("Failed to create API client")
}

/// Builds the engine with the Egnyte client, keyring tokens and JSON state
pub async fn build_engine(config: &Config) -> Result<(SyncEngine, Arc<JsonStateStore>)> {
    let client = build_client(config)?;
    let state = open_state(config).await?;
    let engine = SyncEngine::new(
        Arc::new(client),
        state.clone(),
        Arc::new(LocalFileSystem::new()),
        PolicyEngine::from_config(&config.conflicts),
    )
    .with_workers(config.sync.workers)
    .with_ignored_path(config.sync.state_file.clone());

    info!(
        domain = %config.remote.domain,
        workers = config.sync.workers,
        "Sync engine ready"
    );
    Ok((engine, state))
}

/// Drops stored records of pairs no longer in the config
pub async fn prune_removed_pairs(state: &dyn IStateStore, config: &Config) -> Result<usize> {
    let configured = config
        .sync_pairs()
        .context("Invalid pair in configuration")?;
    let mut pruned = 0;
    for stored in state.pairs().await? {
        if !configured.iter().any(|p| p.id == stored) {
            warn!(pair = %stored, "Pair removed from configuration, pruning its records");
            pruned += state.prune_pair(&stored).await?;
        }
    }
    Ok(pruned)
}

/// `"1 file"` / `"2 files"`
pub fn plural(count: usize, noun: &str) -> String {
    if count == 1 {
        format!("{count} {noun}")
    } else {
        format!("{count} {noun}s")
    }
}
