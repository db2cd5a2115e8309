//! Sync command - Run one pass over the configured pairs
//!
//! Provides the `egnsync sync` CLI command which:
//! 1. Validates the configuration and selects the pairs
//! 2. Wires the Egnyte client, keyring tokens and the state store
//! 3. Runs one full pass (or a dry run) and prints the summary
//!
//! The command fails when the pass halted or any path failed, so scripts
//! can rely on the exit status. With a subcommand (`add`, `remove`, `list`,
//! `enable`, `disable`) it edits the configured pairs instead.

use anyhow::{bail, Result};
use clap::Args;
use egnsync_core::config::Config;
use egnsync_sync::{PassOptions, PassSummary, PathState, SkipReason};
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::pairs::PairAction;
use super::{build_engine, ensure_valid, plural, prune_removed_pairs, select_pairs, CommandContext};
use crate::output::{format_duration_ms, OutputFormatter};

#[derive(Debug, Args)]
#[command(args_conflicts_with_subcommands = true)]
pub struct SyncCommand {
    #[command(subcommand)]
    pub action: Option<PairAction>,

    /// Only sync this pair
    #[arg(long)]
    pub pair: Option<String>,

    /// Show what would be done without making changes
    #[arg(long)]
    pub dry_run: bool,
}

impl SyncCommand {
    pub async fn execute(&self, ctx: &CommandContext, config: &Config) -> Result<()> {
        if let Some(action) = &self.action {
            return action.execute(ctx, config).await;
        }

        let fmt = ctx.formatter();
        ensure_valid(config)?;
        let pairs = select_pairs(config, self.pair.as_deref())?;
        if pairs.is_empty() {
            fmt.warn("No pairs configured");
            return Ok(());
        }

        let (engine, state) = build_engine(config).await?;
        if !self.dry_run && self.pair.is_none() {
            let pruned = prune_removed_pairs(state.as_ref(), config).await?;
            if pruned > 0 {
                fmt.info(&format!("Pruned {} of removed pairs", plural(pruned, "record")));
            }
        }

        let options = PassOptions {
            dry_run: self.dry_run,
        };
        info!(pairs = pairs.len(), dry_run = self.dry_run, "Running sync pass");
        let summary = engine
            .run_pass(&pairs, options, &CancellationToken::new())
            .await?;

        print_summary(ctx, fmt.as_ref(), &summary)?;

        if let Some(reason) = &summary.halted {
            bail!("Sync halted: {reason}");
        }
        let failed = summary.failed_count();
        if failed > 0 {
            bail!("{} failed", plural(failed, "path"));
        }
        Ok(())
    }
}

/// Prints a pass summary as JSON or as a human report
pub(crate) fn print_summary(
    ctx: &CommandContext,
    fmt: &dyn OutputFormatter,
    summary: &PassSummary,
) -> Result<()> {
    if ctx.is_json() {
        let mut json = serde_json::to_value(summary)?;
        json["counts"] = serde_json::json!({
            "by_state": summary.counts_by_state(),
            "by_failure": summary.counts_by_failure(),
            "by_classification": summary
                .counts_by_classification()
                .into_iter()
                .map(|(k, v)| (k.to_string(), v))
                .collect::<std::collections::BTreeMap<_, _>>(),
        });
        fmt.print_json(&json);
        return Ok(());
    }

    let states = summary.counts_by_state();
    let count = |key: &str| states.get(key).copied().unwrap_or(0);

    match &summary.halted {
        Some(reason) => fmt.error(&format!("Sync halted: {reason}")),
        None if summary.failed_count() > 0 => fmt.warn(&format!(
            "Sync finished with {} in {}",
            plural(summary.failed_count(), "failure"),
            format_duration_ms(summary.duration_ms)
        )),
        None if count("committed") == 0 => fmt.success("Already up to date"),
        None => fmt.success(&format!(
            "Sync completed in {}",
            format_duration_ms(summary.duration_ms)
        )),
    }

    fmt.info(&format!(
        "Committed: {}  Skipped: {}  Failed: {}",
        count("committed"),
        count("skipped"),
        count("failed")
    ));

    for outcome in &summary.outcomes {
        let action = outcome
            .action
            .map(|a| a.to_string())
            .unwrap_or_else(|| "-".to_string());
        let line = format!("{}:{} {}", outcome.pair, outcome.path, action);
        match &outcome.state {
            PathState::Failed { failure } => {
                fmt.item(&format!("{line} failed ({}): {}", failure.kind, failure.message));
            }
            PathState::Skipped {
                reason: SkipReason::DryRun,
            } => {
                fmt.item(&format!("{line} (planned)"));
            }
            PathState::Committed if !ctx.quiet && ctx.verbose > 0 => fmt.item(&line),
            _ => {}
        }
    }
    Ok(())
}
