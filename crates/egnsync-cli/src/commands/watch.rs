//! Watch command - Sync continuously until interrupted
//!
//! Runs a full pass every poll interval and syncs local changes reported by
//! the file watcher in between. Ctrl-C stops the service after in-flight
//! paths finish their current step.

use anyhow::{Context, Result};
use clap::Args;
use egnsync_core::config::Config;
use egnsync_sync::{FileWatcher, HintQueue, SyncService};
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::{build_engine, ensure_valid, prune_removed_pairs, select_pairs, CommandContext};

#[derive(Debug, Args)]
pub struct WatchCommand {
    /// Only watch this pair
    #[arg(long)]
    pub pair: Option<String>,
}

impl WatchCommand {
    pub async fn execute(&self, ctx: &CommandContext, config: &Config) -> Result<()> {
        let fmt = ctx.formatter();
        ensure_valid(config)?;
        let pairs = select_pairs(config, self.pair.as_deref())?;
        if pairs.iter().all(|p| !p.enabled) {
            fmt.warn("No enabled pairs to watch");
            return Ok(());
        }

        let (engine, state) = build_engine(config).await?;
        if self.pair.is_none() {
            prune_removed_pairs(state.as_ref(), config).await?;
        }

        let (sender, queue) = HintQueue::channel(config.sync.hint_queue_capacity);
        // Dropping the watcher stops event delivery
        let mut watcher = FileWatcher::new(&pairs, sender).context("Failed to create file watcher")?;
        watcher.watch_all().context("Failed to watch sync roots")?;

        let cancel = CancellationToken::new();
        let on_signal = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Interrupt received, stopping");
                on_signal.cancel();
            }
        });

        fmt.success(&format!(
            "Watching {} pair(s), full pass every {}s (Ctrl-C to stop)",
            pairs.iter().filter(|p| p.enabled).count(),
            config.sync.poll_interval_secs
        ));

        SyncService::from_config(engine, pairs, &config.sync)
            .run(queue, cancel)
            .await?;

        drop(watcher);
        fmt.success("Stopped");
        Ok(())
    }
}
