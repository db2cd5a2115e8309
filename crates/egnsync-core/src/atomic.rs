//! Atomic replace-on-write for small files
//!
//! The new content goes to a sibling temp file which is fsynced and then
//! renamed over the target, so readers and crashes only ever observe the
//! old or the new file. The parent directory is fsynced afterwards so the
//! rename itself survives a power loss.

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

/// Sibling path `<dir>/<file name><suffix>`
pub fn sibling_tmp(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(suffix);
    path.with_file_name(name)
}

/// Writes `bytes` to `tmp`, optionally stamps its mtime, then renames it over `path`
///
/// The temp file is removed if any step before the rename fails.
pub fn replace_file(
    path: &Path,
    tmp: &Path,
    bytes: &[u8],
    modified: Option<SystemTime>,
) -> io::Result<()> {
    let written = (|| {
        let mut file = File::create(tmp)?;
        file.write_all(bytes)?;
        if let Some(mtime) = modified {
            file.set_modified(mtime)?;
        }
        file.sync_all()
    })();
    if let Err(e) = written {
        let _ = fs::remove_file(tmp);
        return Err(e);
    }

    if let Err(e) = fs::rename(tmp, path) {
        let _ = fs::remove_file(tmp);
        return Err(e);
    }
    sync_parent_dir(path);
    Ok(())
}

/// Best-effort fsync of the directory holding `path`
pub fn sync_parent_dir(path: &Path) {
    #[cfg(unix)]
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        if let Ok(dir) = File::open(parent) {
            let _ = dir.sync_all();
        }
    }
    #[cfg(not(unix))]
    let _ = path;
}
