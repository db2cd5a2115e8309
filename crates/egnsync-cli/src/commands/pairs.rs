//! Pair management - `egnsync sync add|remove|list|enable|disable`
//!
//! Edits the `pairs` list of the config file. Removing a pair also drops
//! its stored records unless `--keep-state` is given, so re-adding it later
//! starts from a clean baseline.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::Subcommand;
use egnsync_core::config::{Config, PairConfig};
use egnsync_core::domain::PairId;
use egnsync_core::ports::IStateStore;
use serde_json::json;

use super::{open_state, plural, save_config, CommandContext};

#[derive(Debug, Subcommand)]
pub enum PairAction {
    /// Add a pair to the configuration
    Add {
        /// Pair id, used in state and log output
        id: String,
        /// Absolute local folder
        local_root: PathBuf,
        /// Remote folder, e.g. /Shared/docs
        remote_root: String,
        /// Add the pair disabled
        #[arg(long)]
        disabled: bool,
        /// Conflict policy override for this pair
        #[arg(long)]
        conflict_policy: Option<String>,
    },
    /// Remove a pair from the configuration
    Remove {
        id: String,
        /// Keep the pair's stored sync records
        #[arg(long)]
        keep_state: bool,
    },
    /// List configured pairs
    List,
    /// Enable a configured pair
    Enable { id: String },
    /// Disable a configured pair; its files are left alone
    Disable { id: String },
}

/// Resolves a relative path against the current directory
fn absolute(path: &Path) -> Result<PathBuf> {
    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }
    let cwd = std::env::current_dir().context("Failed to read current directory")?;
    Ok(cwd.join(path))
}

fn pair_json(pair: &PairConfig) -> serde_json::Value {
    json!({
        "id": pair.id,
        "local_root": pair.local_root.display().to_string(),
        "remote_root": pair.remote_root,
        "enabled": pair.enabled,
        "conflict_policy": pair.conflict_policy,
    })
}

impl PairAction {
    pub async fn execute(&self, ctx: &CommandContext, config: &Config) -> Result<()> {
        match self {
            Self::List => {
                self.list(ctx, config);
                Ok(())
            }
            Self::Add {
                id,
                local_root,
                remote_root,
                disabled,
                conflict_policy,
            } => {
                let mut edited = config.clone();
                edited.add_pair(PairConfig {
                    id: id.clone(),
                    local_root: absolute(local_root)?,
                    remote_root: remote_root.clone(),
                    enabled: !disabled,
                    conflict_policy: conflict_policy.clone(),
                    remote_deleted: None,
                    local_deleted: None,
                })?;
                save_config(ctx, config, &edited)?;
                self.report(ctx, id, &format!("Added pair '{id}'"));
                Ok(())
            }
            Self::Remove { id, keep_state } => {
                let mut edited = config.clone();
                if edited.remove_pair(id).is_none() {
                    bail!("Unknown pair '{id}'");
                }
                save_config(ctx, config, &edited)?;

                let mut pruned = 0;
                if !keep_state {
                    let pair_id = PairId::new(id.clone())?;
                    let state = open_state(config).await?;
                    pruned = state.prune_pair(&pair_id).await?;
                }
                self.report(
                    ctx,
                    id,
                    &format!("Removed pair '{id}' ({} dropped)", plural(pruned, "record")),
                );
                Ok(())
            }
            Self::Enable { id } | Self::Disable { id } => {
                let enable = matches!(self, Self::Enable { .. });
                let mut edited = config.clone();
                let pair = edited
                    .pair_mut(id)
                    .with_context(|| format!("Unknown pair '{id}'"))?;
                pair.enabled = enable;
                save_config(ctx, config, &edited)?;
                let verb = if enable { "Enabled" } else { "Disabled" };
                self.report(ctx, id, &format!("{verb} pair '{id}'"));
                Ok(())
            }
        }
    }

    fn list(&self, ctx: &CommandContext, config: &Config) {
        let fmt = ctx.formatter();
        if ctx.is_json() {
            fmt.print_json(&json!({
                "pairs": config.pairs.iter().map(pair_json).collect::<Vec<_>>(),
            }));
            return;
        }
        if config.pairs.is_empty() {
            fmt.info("No pairs configured");
            return;
        }
        for pair in &config.pairs {
            let state = if pair.enabled { "" } else { " (disabled)" };
            fmt.success(&format!("{}{state}", pair.id));
            fmt.item(&format!(
                "{} <-> {}",
                pair.local_root.display(),
                pair.remote_root
            ));
        }
    }

    fn report(&self, ctx: &CommandContext, id: &str, message: &str) {
        let fmt = ctx.formatter();
        if ctx.is_json() {
            fmt.print_json(&json!({"success": true, "pair": id, "message": message}));
        } else {
            fmt.success(message);
            fmt.info(&format!("Saved to {}", ctx.config_path().display()));
        }
    }
}
