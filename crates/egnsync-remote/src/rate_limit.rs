//! Process-wide request budget for the remote file API
//!
//! The service enforces a fixed request-per-second ceiling and a daily
//! ceiling, and only reports violations through HTTP 429. [`RateBudget`]
//! keeps every caller under both ceilings before a request is sent.
//!
//! ## Architecture
//!
//! - A token bucket of capacity 1 refilled at `requests_per_second`. With a
//!   capacity of 1, two grants are never closer than `1 / rps` seconds, so
//!   no 1-second window can hold more than `rps` requests.
//! - A rolling 24-hour log of grant times for the daily ceiling. An exhausted
//!   daily budget fails fast instead of sleeping for hours.
//!
//! All state sits behind one `std::sync::Mutex`; the lock is never held
//! across an `.await`.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use egnsync_remote::rate_limit::RateBudget;
//!
//! # async fn example() -> Result<(), egnsync_core::domain::RemoteError> {
//! let budget = Arc::new(RateBudget::new(2.0, Some(1000)));
//! budget.acquire().await?;
//! // ... send one request ...
//! # Ok(())
//! # }
//! ```

use std::{
    collections::VecDeque,
    sync::{Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use egnsync_core::domain::RemoteError;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Length of the window the daily ceiling applies to
const DAY: Duration = Duration::from_secs(24 * 60 * 60);

/// Smallest sleep between refill checks
const MIN_WAIT: Duration = Duration::from_millis(1);

// ============================================================================
// RateBudget
// ============================================================================

/// Mutable budget state, protected by the budget's mutex.
#[derive(Debug)]
struct BudgetState {
    /// Available tokens, fractional for smooth refill
    tokens_available: f64,
    /// Timestamp of the last refill calculation
    last_refill_at: Instant,
    /// Grant times inside the current 24-hour window, oldest first
    daily_grants: VecDeque<Instant>,
}

/// Shared request budget
///
/// Created once at process start and shared via `Arc` by every client.
#[derive(Debug)]
pub struct RateBudget {
    capacity: f64,
    refill_rate: f64,
    daily_limit: Option<u32>,
    state: Mutex<BudgetState>,
}

impl RateBudget {
    /// Creates a full budget
    ///
    /// # Arguments
    /// * `requests_per_second` - Refill rate; values that are not positive are clamped to 0.01
    /// * `daily_limit` - Requests allowed per rolling 24 hours, `None` for unlimited
    pub fn new(requests_per_second: f64, daily_limit: Option<u32>) -> Self {
        let refill_rate = if requests_per_second.is_finite() && requests_per_second > 0.0 {
            requests_per_second
        } else {
            0.01
        };
        Self {
            capacity: 1.0,
            refill_rate,
            daily_limit: daily_limit.filter(|&limit| limit > 0),
            state: Mutex::new(BudgetState {
                tokens_available: 1.0,
                last_refill_at: Instant::now(),
                daily_grants: VecDeque::new(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BudgetState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Adds the tokens accrued since the last refill, capped at capacity.
    fn refill(&self, state: &mut BudgetState, now: Instant) {
        let elapsed = now.duration_since(state.last_refill_at).as_secs_f64();
        if elapsed > 0.0 {
            state.tokens_available =
                (state.tokens_available + elapsed * self.refill_rate).min(self.capacity);
            state.last_refill_at = now;
        }
    }

    /// Drops grants older than 24 hours.
    fn expire_daily(state: &mut BudgetState, now: Instant) {
        while let Some(&oldest) = state.daily_grants.front() {
            if now.duration_since(oldest) >= DAY {
                state.daily_grants.pop_front();
            } else {
                break;
            }
        }
    }

    /// Takes one unit if available, otherwise returns how long to wait.
    fn try_take(&self) -> Result<Option<Duration>, RemoteError> {
        let now = Instant::now();
        let mut state = self.lock();

        if let Some(limit) = self.daily_limit {
            Self::expire_daily(&mut state, now);
            if state.daily_grants.len() >= limit as usize {
                warn!(limit, "Daily request ceiling reached");
                return Err(RemoteError::RateLimitExceeded { attempts: 0 });
            }
        }

        self.refill(&mut state, now);
        if state.tokens_available >= 1.0 {
            state.tokens_available -= 1.0;
            if self.daily_limit.is_some() {
                state.daily_grants.push_back(now);
            }
            return Ok(None);
        }

        let deficit = 1.0 - state.tokens_available;
        Ok(Some(
            Duration::from_secs_f64(deficit / self.refill_rate).max(MIN_WAIT),
        ))
    }

    /// Waits for one unit of budget
    ///
    /// # Errors
    /// `RateLimitExceeded { attempts: 0 }` immediately when the daily ceiling is exhausted
    pub async fn acquire(&self) -> Result<(), RemoteError> {
        loop {
            match self.try_take()? {
                None => return Ok(()),
                Some(wait) => {
                    debug!(wait_ms = wait.as_millis() as u64, "Waiting for request budget");
                    tokio::time::sleep(wait).await;
                }
            }
        }
    }

    /// Requests per second this budget enforces
    pub fn requests_per_second(&self) -> f64 {
        self.refill_rate
    }

    /// Requests left in the rolling daily window, `None` when unlimited
    pub fn daily_remaining(&self) -> Option<u32> {
        let limit = self.daily_limit?;
        let mut state = self.lock();
        Self::expire_daily(&mut state, Instant::now());
        Some(limit.saturating_sub(state.daily_grants.len() as u32))
    }
}

// ============================================================================
// Retry-After header parsing
// ============================================================================

/// Parses a Retry-After header value into a Duration.
///
/// The header can be either:
/// - An integer number of seconds (e.g., "30")
/// - An HTTP-date (e.g., "Fri, 31 Dec 2027 23:59:59 GMT") - parsed as seconds from now
///
/// Returns `None` if the value is neither.
pub fn parse_retry_after(value: &str) -> Option<Duration> {
    let value = value.trim();
    if let Ok(seconds) = value.parse::<u64>() {
        return Some(Duration::from_secs(seconds));
    }

    if let Ok(date) = chrono::DateTime::parse_from_rfc2822(value) {
        let target = date.with_timezone(&chrono::Utc);
        let diff = target - chrono::Utc::now();
        return Some(diff.to_std().unwrap_or(Duration::ZERO));
    }

    warn!(value, "Could not parse Retry-After header");
    None
}

// ============================================================================
// Unit tests
// ============================================================================
