//! Retry and backoff policy for remote requests

use std::time::Duration;

use egnsync_core::config::RemoteConfig;

/// Why a request is being retried
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryKind {
    /// HTTP 429
    Throttled,
    /// HTTP 5xx, network failure or timeout
    Transient,
}

/// Exponential backoff with separate caps for throttling and transient failures
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub throttle_cap: Duration,
    pub transient_cap: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_secs(1),
            throttle_cap: Duration::from_secs(60),
            transient_cap: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &RemoteConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: Duration::from_millis(config.backoff_base_ms),
            throttle_cap: Duration::from_secs(config.throttle_backoff_cap_secs),
            transient_cap: Duration::from_secs(config.transient_backoff_cap_secs),
        }
    }

    fn cap(&self, kind: RetryKind) -> Duration {
        match kind {
            RetryKind::Throttled => self.throttle_cap,
            RetryKind::Transient => self.transient_cap,
        }
    }

    /// Delay before the attempt following `attempt` (1-based)
    ///
    /// A server-provided `retry_after` replaces the computed backoff but is
    /// still clamped to the cap for `kind`.
    pub fn delay(&self, attempt: u32, kind: RetryKind, retry_after: Option<Duration>) -> Duration {
        let cap = self.cap(kind);
        if let Some(hint) = retry_after {
            return hint.min(cap);
        }
        let exponent = attempt.saturating_sub(1).min(16);
        self.base_delay
            .checked_mul(1u32 << exponent)
            .unwrap_or(cap)
            .min(cap)
    }

    /// True if another attempt is allowed after `attempt` (1-based)
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }
}
