//! Status command - Show stored sync state per pair
//!
//! Lists what the state store remembers for each configured pair and flags
//! stored pairs that are no longer configured. With `--plan` it also runs a
//! dry-run pass and shows what the next sync would do.

use anyhow::Result;
use clap::Args;
use egnsync_core::config::Config;
use egnsync_core::domain::FileRecord;
use egnsync_core::ports::IStateStore;
use egnsync_sync::PassOptions;
use serde_json::json;
use tokio_util::sync::CancellationToken;

use super::{build_engine, open_state, plural, select_pairs, CommandContext};
use crate::commands::sync::print_summary;

#[derive(Debug, Args)]
pub struct StatusCommand {
    /// Only show this pair
    #[arg(long)]
    pub pair: Option<String>,

    /// Also show the actions the next sync would take (contacts the server)
    #[arg(long)]
    pub plan: bool,
}

fn record_json(record: &FileRecord) -> serde_json::Value {
    json!({
        "path": record.relative_path.as_str(),
        "local_fingerprint": record.last_synced_local_fingerprint.as_ref().map(|f| f.as_str()),
        "remote_version": record.last_synced_remote_version.as_ref().map(|v| v.as_str()),
        "last_synced_at": record.last_synced_at.to_rfc3339(),
    })
}

impl StatusCommand {
    pub async fn execute(&self, ctx: &CommandContext, config: &Config) -> Result<()> {
        let fmt = ctx.formatter();
        let pairs = select_pairs(config, self.pair.as_deref())?;
        let state = open_state(config).await?;

        let mut pair_reports = Vec::new();
        for pair in &pairs {
            let records = state.records(&pair.id).await?;
            let last_sync = records.iter().map(|r| r.last_synced_at).max();

            if ctx.is_json() {
                pair_reports.push(json!({
                    "id": pair.id.as_str(),
                    "local_root": pair.local_root.display().to_string(),
                    "remote_root": pair.remote_root.as_str(),
                    "enabled": pair.enabled,
                    "tracked_files": records.len(),
                    "last_sync": last_sync.map(|t| t.to_rfc3339()),
                    "records": records.iter().map(record_json).collect::<Vec<_>>(),
                }));
                continue;
            }

            let disabled = if pair.enabled { "" } else { " (disabled)" };
            fmt.success(&format!(
                "{}{}: {} <-> {}",
                pair.id,
                disabled,
                pair.local_root.display(),
                pair.remote_root
            ));
            fmt.info(&format!("Tracked: {}", plural(records.len(), "file")));
            match last_sync {
                Some(at) => fmt.info(&format!("Last sync: {}", at.format("%Y-%m-%d %H:%M:%S UTC"))),
                None => fmt.info("Last sync: never"),
            }
            if !ctx.quiet && ctx.verbose > 0 {
                for record in &records {
                    let version = record
                        .last_synced_remote_version
                        .as_ref()
                        .map_or("-", |v| v.as_str());
                    fmt.item(&format!("{} (version {version})", record.relative_path));
                }
            }
        }

        let orphaned: Vec<String> = if self.pair.is_some() {
            Vec::new()
        } else {
            let configured = config.sync_pairs()?;
            state
                .pairs()
                .await?
                .into_iter()
                .filter(|stored| !configured.iter().any(|p| &p.id == stored))
                .map(|stored| stored.to_string())
                .collect()
        };

        if ctx.is_json() {
            let mut report = json!({
                "state_file": config.sync.state_file.display().to_string(),
                "pairs": pair_reports,
                "orphaned_pairs": orphaned,
            });
            if self.plan {
                let (engine, _) = build_engine(config).await?;
                let summary = engine
                    .run_pass(&pairs, PassOptions { dry_run: true }, &CancellationToken::new())
                    .await?;
                report["plan"] = serde_json::to_value(&summary)?;
            }
            fmt.print_json(&report);
            return Ok(());
        }

        for stored in &orphaned {
            fmt.warn(&format!(
                "Stored records for '{stored}' which is no longer configured; the next sync prunes them"
            ));
        }

        if self.plan && !pairs.is_empty() {
            let (engine, _) = build_engine(config).await?;
            let summary = engine
                .run_pass(&pairs, PassOptions { dry_run: true }, &CancellationToken::new())
                .await?;
            println!();
            fmt.success("Planned actions:");
            print_summary(ctx, fmt.as_ref(), &summary)?;
        }
        Ok(())
    }
}
