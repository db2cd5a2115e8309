//! One-off remote commands - `egnsync ls`, `upload` and `download`
//!
//! These call the file API directly and never read or write the sync
//! state. A later pass sees whatever they changed as an ordinary edit.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::Args;
use egnsync_core::config::Config;
use egnsync_core::domain::{RemoteError, RemotePath, RemoteVersion};
use egnsync_core::ports::{ILocalFileSystem, IRemoteStore, RemoteEntry};
use egnsync_sync::LocalFileSystem;
use serde_json::json;
use tracing::info;

use super::{build_client, plural, CommandContext};

#[derive(Debug, Args)]
pub struct LsCommand {
    /// Remote folder
    #[arg(default_value = "/Shared")]
    pub path: String,

    /// Descend into subfolders
    #[arg(short, long)]
    pub recursive: bool,
}

#[derive(Debug, Args)]
pub struct UploadCommand {
    /// Local file
    pub local: PathBuf,

    /// Remote file path, or an existing folder to upload into
    pub remote: String,

    /// Replace the remote file if it exists
    #[arg(long)]
    pub overwrite: bool,
}

#[derive(Debug, Args)]
pub struct DownloadCommand {
    /// Remote file path
    pub remote: String,

    /// Local file path, or an existing directory to download into
    pub local: PathBuf,

    /// Replace the local file if it exists
    #[arg(long)]
    pub overwrite: bool,
}

fn remote_path(raw: &str) -> Result<RemotePath> {
    RemotePath::new(raw.to_string()).with_context(|| format!("Invalid remote path '{raw}'"))
}

fn entry_json(entry: &RemoteEntry) -> serde_json::Value {
    json!({
        "path": entry.path.as_str(),
        "is_folder": entry.is_folder,
        "size": entry.size,
        "version": entry.version.as_ref().map(|v| v.as_str()),
        "modified_at": entry.modified_at.map(|t| t.to_rfc3339()),
    })
}

/// Entries of a folder sorted by path, with subfolders expanded when `recursive`
pub(crate) async fn list_entries(
    remote: &dyn IRemoteStore,
    folder: &RemotePath,
    recursive: bool,
) -> Result<Vec<RemoteEntry>, RemoteError> {
    let mut entries = Vec::new();
    let mut pending = vec![folder.clone()];
    while let Some(folder) = pending.pop() {
        for entry in remote.list(&folder).await? {
            if recursive && entry.is_folder {
                pending.push(entry.path.clone());
            }
            entries.push(entry);
        }
    }
    entries.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(entries)
}

/// Uploads one file and returns where it landed and its new version
///
/// An existing remote file is only replaced with `overwrite`, and then
/// under its current version so a concurrent edit is not lost.
pub(crate) async fn upload_file(
    remote: &dyn IRemoteStore,
    local: &Path,
    target: &RemotePath,
    overwrite: bool,
) -> Result<(RemotePath, RemoteVersion)> {
    let content = tokio::fs::read(local)
        .await
        .with_context(|| format!("Failed to read {}", local.display()))?;

    let mut target = target.clone();
    let mut existing = remote.stat(&target).await?;
    if existing.as_ref().is_some_and(|e| e.is_folder) {
        let name = local
            .file_name()
            .and_then(|n| n.to_str())
            .with_context(|| format!("{} has no file name", local.display()))?;
        target = target.join(name)?;
        existing = remote.stat(&target).await?;
    }

    let expected = match existing {
        Some(entry) if entry.is_folder => bail!("{target} is a folder"),
        Some(_) if !overwrite => bail!("{target} already exists; use --overwrite to replace it"),
        Some(entry) => entry.version,
        None => None,
    };

    let version = remote.upload(&target, content, expected.as_ref()).await?;
    Ok((target, version))
}

/// Downloads one file and returns the local path and byte count
pub(crate) async fn download_file(
    remote: &dyn IRemoteStore,
    local_fs: &dyn ILocalFileSystem,
    source: &RemotePath,
    local: &Path,
    overwrite: bool,
) -> Result<(PathBuf, usize)> {
    let Some(entry) = remote.stat(source).await? else {
        bail!("{source} does not exist");
    };
    if entry.is_folder {
        bail!("{source} is a folder");
    }

    let target = if local.is_dir() {
        local.join(&entry.name)
    } else {
        local.to_path_buf()
    };
    if !overwrite && local_fs.stat(&target).await?.is_some() {
        bail!("{} already exists; use --overwrite to replace it", target.display());
    }

    let downloaded = remote.download(source).await?;
    local_fs
        .write_atomic(&target, &downloaded.content, entry.modified_at)
        .await?;
    Ok((target, downloaded.content.len()))
}

impl LsCommand {
    pub async fn execute(&self, ctx: &CommandContext, config: &Config) -> Result<()> {
        let folder = remote_path(&self.path)?;
        let client = build_client(config)?;
        let entries = list_entries(&client, &folder, self.recursive).await?;

        let fmt = ctx.formatter();
        if ctx.is_json() {
            fmt.print_json(&json!({
                "path": folder.as_str(),
                "entries": entries.iter().map(entry_json).collect::<Vec<_>>(),
            }));
            return Ok(());
        }

        fmt.success(&format!("{folder} ({})", plural(entries.len(), "item")));
        for entry in &entries {
            let shown = entry
                .path
                .relative_to(&folder)
                .map(|p| p.as_str().to_string())
                .unwrap_or_else(|| entry.path.to_string());
            if entry.is_folder {
                fmt.item(&format!("{shown}/"));
            } else {
                fmt.item(&format!("{shown}  {} bytes", entry.size));
            }
        }
        Ok(())
    }
}

impl UploadCommand {
    pub async fn execute(&self, ctx: &CommandContext, config: &Config) -> Result<()> {
        let target = remote_path(&self.remote)?;
        let client = build_client(config)?;
        let (target, version) = upload_file(&client, &self.local, &target, self.overwrite).await?;
        info!(remote = %target, version = %version, "Uploaded");

        let fmt = ctx.formatter();
        if ctx.is_json() {
            fmt.print_json(&json!({
                "success": true,
                "remote": target.as_str(),
                "version": version.as_str(),
            }));
        } else {
            fmt.success(&format!("Uploaded {} to {target}", self.local.display()));
        }
        Ok(())
    }
}

impl DownloadCommand {
    pub async fn execute(&self, ctx: &CommandContext, config: &Config) -> Result<()> {
        let source = remote_path(&self.remote)?;
        let client = build_client(config)?;
        let (target, bytes) = download_file(
            &client,
            &LocalFileSystem::new(),
            &source,
            &self.local,
            self.overwrite,
        )
        .await?;
        info!(remote = %source, local = %target.display(), bytes, "Downloaded");

        let fmt = ctx.formatter();
        if ctx.is_json() {
            fmt.print_json(&json!({
                "success": true,
                "local": target.display().to_string(),
                "bytes": bytes,
            }));
        } else {
            fmt.success(&format!("Downloaded {source} to {}", target.display()));
        }
        Ok(())
    }
}
