//! Sync service - the long-running `watch` mode
//!
//! Runs one `tokio::select!` loop until cancelled:
//!
//! 1. **Full pass** every poll interval (the first one immediately).
//! 2. **Hints** from the watcher are fed into a [`HintDebouncer`].
//! 3. **Settle tick** drains quiet hints into [`SyncEngine::sync_hints`].
//!
//! When a pass hits the service's request quota, the next full pass waits
//! a growing backoff instead of the poll interval. A clean pass resets it.

use std::time::Duration;

use egnsync_core::config::SyncConfig;
use egnsync_core::domain::SyncPair;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::engine::{PassOptions, SyncEngine};
use crate::hints::{HintDebouncer, HintQueue};
use crate::summary::PassSummary;
use crate::SyncError;

/// First delay after a rate-limited pass
const RATE_LIMIT_BACKOFF_MIN: Duration = Duration::from_secs(30);
/// Upper bound of the rate-limit backoff
const RATE_LIMIT_BACKOFF_MAX: Duration = Duration::from_secs(300);
/// How often settled hints are drained
const SETTLE_TICK: Duration = Duration::from_millis(250);

// ============================================================================
// PassBackoff
// ============================================================================

/// Delay until the next full pass
#[derive(Debug, Clone)]
pub struct PassBackoff {
    poll_interval: Duration,
    current: Option<Duration>,
}

impl PassBackoff {
    pub fn new(poll_interval: Duration) -> Self {
        Self {
            poll_interval,
            current: None,
        }
    }

    /// Updates the backoff from a finished pass and returns the next delay
    pub fn after_pass(&mut self, summary: &PassSummary) -> Duration {
        let cap = RATE_LIMIT_BACKOFF_MAX.max(self.poll_interval);
        if summary.has_rate_limit_failures() {
            let next = match self.current {
                None => self.poll_interval.max(RATE_LIMIT_BACKOFF_MIN),
                Some(current) => current.saturating_mul(2),
            }
            .min(cap);
            warn!(
                backoff_ms = next.as_millis() as u64,
                "Rate limit reached, delaying next pass"
            );
            self.current = Some(next);
            return next;
        }

        if summary.is_clean() && self.current.take().is_some() {
            info!("Clean pass, rate-limit backoff reset");
        }
        self.current.unwrap_or(self.poll_interval)
    }

    pub fn current(&self) -> Option<Duration> {
        self.current
    }
}

// ============================================================================
// SyncService
// ============================================================================

/// Periodic full passes plus hint-driven passes until cancelled
pub struct SyncService {
    engine: SyncEngine,
    pairs: Vec<SyncPair>,
    poll_interval: Duration,
    debounce_delay: Duration,
}

impl SyncService {
    pub fn new(
        engine: SyncEngine,
        pairs: Vec<SyncPair>,
        poll_interval: Duration,
        debounce_delay: Duration,
    ) -> Self {
        Self {
            engine,
            pairs,
            poll_interval,
            debounce_delay,
        }
    }

    /// Builds a service with the intervals of the `sync` config section
    pub fn from_config(engine: SyncEngine, pairs: Vec<SyncPair>, config: &SyncConfig) -> Self {
        Self::new(
            engine,
            pairs,
            Duration::from_secs(config.poll_interval_secs),
            Duration::from_millis(config.debounce_delay_ms),
        )
    }

    /// Runs until `cancel` fires
    ///
    /// # Errors
    /// Returns [`SyncError::Halted`] when a pass stopped on an authentication
    /// failure, and [`SyncError::StateStore`] when the store is unreadable.
    pub async fn run(self, mut hints: HintQueue, cancel: CancellationToken) -> Result<(), SyncError> {
        info!(
            pairs = self.pairs.len(),
            poll_ms = self.poll_interval.as_millis() as u64,
            debounce_ms = self.debounce_delay.as_millis() as u64,
            "Sync service starting"
        );

        let mut backoff = PassBackoff::new(self.poll_interval);
        let mut debouncer = HintDebouncer::new(self.debounce_delay);
        let mut settle = tokio::time::interval(SETTLE_TICK);
        settle.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut next_pass = Instant::now();
        let mut hints_open = true;

        loop {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => {
                    info!("Sync service stopping");
                    return Ok(());
                }

                _ = tokio::time::sleep_until(next_pass) => {
                    let summary = self
                        .engine
                        .run_pass(&self.pairs, PassOptions::default(), &cancel)
                        .await?;
                    check_halted(&summary)?;
                    let delay = backoff.after_pass(&summary);
                    next_pass = Instant::now() + delay;
                    debug!(delay_ms = delay.as_millis() as u64, "Next full pass scheduled");
                }

                hint = hints.recv(), if hints_open => match hint {
                    Some(hint) => debouncer.push(hint),
                    None => {
                        debug!("Hint channel closed");
                        hints_open = false;
                    }
                },

                _ = settle.tick() => {
                    let settled = debouncer.drain_settled();
                    if !settled.is_empty() {
                        let summary = self
                            .engine
                            .sync_hints(&self.pairs, settled, PassOptions::default(), &cancel)
                            .await;
                        check_halted(&summary)?;
                    }
                }
            }
        }
    }
}

fn check_halted(summary: &PassSummary) -> Result<(), SyncError> {
    match &summary.halted {
        Some(reason) => Err(SyncError::Halted(reason.clone())),
        None => Ok(()),
    }
}
