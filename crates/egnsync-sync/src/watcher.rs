//! File watching
//!
//! [`FileWatcher`] wraps the `notify` crate, watches the local root of every
//! enabled pair recursively, and turns raw OS events into [`ChangeHint`]s on
//! the hint queue. Event kinds are not forwarded: the engine re-reads both
//! sides for every hinted path anyway.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use egnsync_core::domain::{PairId, RelativePath, SyncPair};
use egnsync_core::ports::ChangeHint;
use notify::event::{ModifyKind, RenameMode};
use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tracing::{debug, error, info, trace};

use crate::filesystem::is_partial_file;
use crate::hints::HintSender;

// ============================================================================
// Pair root lookup
// ============================================================================

/// Maps absolute local paths back to `(pair, relative path)`
#[derive(Debug, Clone)]
struct PairRoots {
    roots: Vec<(PairId, PathBuf)>,
}

impl PairRoots {
    fn new(pairs: &[SyncPair]) -> Self {
        let mut roots: Vec<_> = pairs
            .iter()
            .filter(|p| p.enabled)
            .map(|p| (p.id.clone(), p.local_root.clone()))
            .collect();
        // Longest root first so nested roots win
        roots.sort_by_key(|(_, root)| std::cmp::Reverse(root.components().count()));
        Self { roots }
    }

    fn hint_for(&self, path: &Path) -> Option<ChangeHint> {
        if is_partial_file(path) {
            return None;
        }
        self.roots.iter().find_map(|(pair, root)| {
            let relative = RelativePath::from_local(root, path).ok()?;
            Some(ChangeHint::new(pair.clone(), relative))
        })
    }
}

// ============================================================================
// FileWatcher
// ============================================================================

/// Watches pair roots and feeds the hint queue
///
/// Dropping the watcher stops all watches.
pub struct FileWatcher {
    watcher: RecommendedWatcher,
    roots: PairRoots,
}

impl FileWatcher {
    /// Creates a watcher that sends hints for the given pairs
    ///
    /// # Errors
    /// Returns an error if the underlying OS watcher cannot be created
    pub fn new(pairs: &[SyncPair], sender: HintSender) -> Result<Self> {
        let roots = PairRoots::new(pairs);
        let callback_roots = roots.clone();

        let watcher = RecommendedWatcher::new(
            move |res: std::result::Result<notify::Event, notify::Error>| match res {
                Ok(event) => {
                    for path in event_paths(&event) {
                        if let Some(hint) = callback_roots.hint_for(&path) {
                            trace!(pair = %hint.pair, path = %hint.relative_path, "Change hint");
                            sender.try_send(hint);
                        }
                    }
                }
                Err(err) => {
                    error!(error = %err, "File watcher error");
                }
            },
            notify::Config::default(),
        )
        .context("Failed to create file watcher")?;

        Ok(Self { watcher, roots })
    }

    /// Starts watching every pair root recursively
    ///
    /// Roots that do not exist yet are created first.
    ///
    /// # Errors
    /// Returns an error if a root cannot be watched (permissions, inotify
    /// watch limit reached)
    pub fn watch_all(&mut self) -> Result<()> {
        for (pair, root) in &self.roots.roots {
            std::fs::create_dir_all(root)
                .with_context(|| format!("Failed to create {}", root.display()))?;
            self.watcher
                .watch(root, RecursiveMode::Recursive)
                .with_context(|| format!("Failed to watch path: {}", root.display()))?;
            info!(pair = %pair, root = %root.display(), "Watching pair root");
        }
        Ok(())
    }

    /// Number of watched roots
    pub fn root_count(&self) -> usize {
        self.roots.roots.len()
    }
}

/// Paths touched by a `notify::Event`
///
/// A rename with both ends known yields both paths; access events yield
/// nothing.
fn event_paths(event: &notify::Event) -> Vec<PathBuf> {
    match &event.kind {
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => event.paths.clone(),
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_) => {
            event.paths.first().cloned().into_iter().collect()
        }
        _ => {
            debug!(kind = ?event.kind, "Ignoring event kind");
            Vec::new()
        }
    }
}
