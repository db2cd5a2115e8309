//! Access token lifecycle
//!
//! [`TokenManager`] hands out valid access tokens to the remote client and
//! refreshes them through an [`ITokenProvider`] shortly before they expire
//! or after the service rejected one with 401.
//!
//! Refresh is single-flight: callers that find the token stale queue on an
//! async gate, and whoever gets through first performs the refresh. Every
//! caller that queued behind it observes the bumped refresh epoch and reuses
//! that refresh's outcome, including its error, instead of issuing another
//! call to the token endpoint.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::Duration;
use egnsync_core::domain::AuthError;
use egnsync_core::ports::{ITokenProvider, Token};
use tracing::{debug, info, warn};

#[derive(Debug, Default)]
struct TokenState {
    token: Option<Token>,
    loaded: bool,
    invalidated: bool,
    /// Incremented after every completed refresh attempt
    epoch: u64,
    /// Outcome of the latest refresh attempt when it failed
    last_error: Option<AuthError>,
}

impl TokenState {
    fn usable(&self, buffer: Duration) -> Option<Token> {
        match &self.token {
            Some(token) if !self.invalidated && !token.expires_within(buffer) => {
                Some(token.clone())
            }
            _ => None,
        }
    }
}

/// Owner of the access/refresh token pair
pub struct TokenManager {
    provider: Arc<dyn ITokenProvider>,
    refresh_buffer: Duration,
    state: Mutex<TokenState>,
    refresh_gate: tokio::sync::Mutex<()>,
}

impl std::fmt::Debug for TokenManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenManager")
            .field("refresh_buffer", &self.refresh_buffer)
            .finish_non_exhaustive()
    }
}

impl TokenManager {
    /// Creates a manager that loads its token from `provider` on first use
    pub fn new(provider: Arc<dyn ITokenProvider>, refresh_buffer: std::time::Duration) -> Self {
        Self {
            provider,
            refresh_buffer: Duration::from_std(refresh_buffer).unwrap_or(Duration::seconds(60)),
            state: Mutex::new(TokenState::default()),
            refresh_gate: tokio::sync::Mutex::new(()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, TokenState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns a token with more than the refresh buffer of validity left
    ///
    /// # Errors
    /// - `NoRefreshToken` if nothing is stored or the stored set cannot be refreshed
    /// - `RefreshRejected` if the token endpoint refused the refresh token
    /// - `Unavailable` if the token endpoint could not be reached
    pub async fn get_valid_token(&self) -> Result<Token, AuthError> {
        let observed_epoch = {
            let state = self.lock();
            if let Some(token) = state.usable(self.refresh_buffer) {
                return Ok(token);
            }
            state.epoch
        };

        let _gate = self.refresh_gate.lock().await;

        {
            let state = self.lock();
            if state.epoch != observed_epoch {
                // A refresh completed while we waited; share its outcome
                if let Some(err) = &state.last_error {
                    return Err(err.clone());
                }
            }
            if let Some(token) = state.usable(self.refresh_buffer) {
                return Ok(token);
            }
            if let Some(err @ (AuthError::RefreshRejected(_) | AuthError::NoRefreshToken)) =
                &state.last_error
            {
                return Err(err.clone());
            }
        }

        self.ensure_loaded().await?;
        if let Some(token) = self.lock().usable(self.refresh_buffer) {
            return Ok(token);
        }

        self.refresh_locked().await
    }

    /// Loads the stored token once. Called with the refresh gate held.
    async fn ensure_loaded(&self) -> Result<(), AuthError> {
        if self.lock().loaded {
            return Ok(());
        }
        let stored = self.provider.load().await?;
        let mut state = self.lock();
        debug!(found = stored.is_some(), "Loaded stored token");
        state.token = stored;
        state.loaded = true;
        Ok(())
    }

    /// Performs the refresh call. Called with the refresh gate held.
    async fn refresh_locked(&self) -> Result<Token, AuthError> {
        let refresh_token = {
            let mut state = self.lock();
            match state.token.as_ref().and_then(|t| t.refresh_token.clone()) {
                Some(rt) => rt,
                None => {
                    state.epoch += 1;
                    state.last_error = Some(AuthError::NoRefreshToken);
                    return Err(AuthError::NoRefreshToken);
                }
            }
        };

        info!("Refreshing access token");
        let result = self.provider.refresh(&refresh_token).await;

        let refreshed = {
            let mut state = self.lock();
            state.epoch += 1;
            match result {
                Ok(mut token) => {
                    if token.refresh_token.is_none() {
                        token.refresh_token = Some(refresh_token);
                    }
                    state.token = Some(token.clone());
                    state.invalidated = false;
                    state.last_error = None;
                    token
                }
                Err(err) => {
                    warn!(error = %err, "Token refresh failed");
                    state.last_error = Some(err.clone());
                    return Err(err);
                }
            }
        };

        if let Err(e) = self.provider.persist(&refreshed).await {
            warn!(error = %e, "Failed to persist refreshed token");
        }
        Ok(refreshed)
    }

    /// Forces the next `get_valid_token` call to refresh
    pub fn invalidate(&self) {
        let mut state = self.lock();
        state.invalidated = true;
    }

    /// Invalidates only if `stale` is still the current token
    ///
    /// Requests that were all rejected with the same token trigger a single
    /// refresh; a request that raced with a completed refresh does not
    /// throw away the fresh token.
    pub fn invalidate_stale(&self, stale: &Token) {
        let mut state = self.lock();
        let is_current = state
            .token
            .as_ref()
            .is_some_and(|t| t.access_token == stale.access_token);
        if is_current {
            debug!("Invalidating rejected access token");
            state.invalidated = true;
        }
    }

    /// Replaces the token set, e.g. after the operator stored a new refresh token
    pub fn replace_token(&self, token: Token) {
        let mut state = self.lock();
        state.token = Some(token);
        state.loaded = true;
        state.invalidated = false;
        state.last_error = None;
    }

    /// The cached token without any validity check
    pub fn cached_token(&self) -> Option<Token> {
        self.lock().token.clone()
    }
}
