//! Change hint queue and debouncer
//!
//! ```text
//! FileWatcher ──→ HintSender ──→ HintQueue ──→ HintDebouncer ──→ SyncEngine::sync_hints
//! ```
//!
//! A hint only names a path to look at again. Repeated hints for the same
//! `(pair, path)` collapse into one, and a path is released only after it
//! has been quiet for the debounce delay.

use std::collections::HashMap;
use std::time::Duration;

use egnsync_core::domain::{PairId, RelativePath};
use egnsync_core::ports::ChangeHint;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::time::Instant;
use tracing::{debug, warn};

// ============================================================================
// Bounded channel
// ============================================================================

/// Producer side of the hint queue
#[derive(Debug, Clone)]
pub struct HintSender {
    tx: mpsc::Sender<ChangeHint>,
}

impl HintSender {
    /// Enqueues a hint, waiting for capacity
    ///
    /// Returns `false` if the consumer is gone.
    pub async fn send(&self, hint: ChangeHint) -> bool {
        self.tx.send(hint).await.is_ok()
    }

    /// Enqueues a hint without waiting
    ///
    /// A full queue drops the hint; the next full pass picks the path up.
    pub fn try_send(&self, hint: ChangeHint) -> bool {
        match self.tx.try_send(hint) {
            Ok(()) => true,
            Err(TrySendError::Full(hint)) => {
                warn!(pair = %hint.pair, path = %hint.relative_path, "Hint queue full, dropping hint");
                false
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }
}

/// Consumer side of the hint queue
#[derive(Debug)]
pub struct HintQueue {
    rx: mpsc::Receiver<ChangeHint>,
}

impl HintQueue {
    /// Creates a queue holding at most `capacity` undelivered hints
    pub fn channel(capacity: usize) -> (HintSender, HintQueue) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (HintSender { tx }, HintQueue { rx })
    }

    /// Next hint, `None` once every sender is dropped
    pub async fn recv(&mut self) -> Option<ChangeHint> {
        self.rx.recv().await
    }
}

// ============================================================================
// Debouncer
// ============================================================================

/// Coalesces hints per `(pair, path)` until they settle
#[derive(Debug)]
pub struct HintDebouncer {
    pending: HashMap<(PairId, RelativePath), Instant>,
    delay: Duration,
}

impl HintDebouncer {
    pub fn new(delay: Duration) -> Self {
        Self {
            pending: HashMap::new(),
            delay,
        }
    }

    /// Records a hint, restarting its quiet period
    pub fn push(&mut self, hint: ChangeHint) {
        debug!(pair = %hint.pair, path = %hint.relative_path, "Debouncing hint");
        self.pending
            .insert((hint.pair, hint.relative_path), Instant::now());
    }

    /// Removes and returns every hint quiet for at least the delay
    pub fn drain_settled(&mut self) -> Vec<ChangeHint> {
        let now = Instant::now();
        let delay = self.delay;
        let mut settled = Vec::new();
        self.pending.retain(|(pair, path), last_seen| {
            if now.duration_since(*last_seen) >= delay {
                settled.push(ChangeHint::new(pair.clone(), path.clone()));
                false
            } else {
                true
            }
        });
        if !settled.is_empty() {
            debug!(count = settled.len(), "Hints settled");
        }
        settled
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}
