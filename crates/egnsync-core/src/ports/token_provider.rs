//! Token provider port (driven/secondary port)
//!
//! The token manager in `egnsync-remote` owns the token lifecycle; this
//! port is how it loads, refreshes and persists the underlying token set.
//! Interactive authorization is outside the sync core, so a provider only
//! needs a stored refresh token to work.

use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::AuthError;

/// OAuth token set
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
    /// Bearer token for API requests
    pub access_token: String,
    /// Token used to obtain a new access token
    pub refresh_token: Option<String>,
    /// When the access token expires
    pub expires_at: DateTime<Utc>,
}

impl Token {
    /// Returns true if the access token has expired
    #[must_use]
    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at
    }

    /// Returns true if the access token will expire within the given duration
    #[must_use]
    pub fn expires_within(&self, duration: Duration) -> bool {
        Utc::now() + duration >= self.expires_at
    }
}

// Never print secrets in logs
impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Token")
            .field("access_token", &"<redacted>")
            .field(
                "refresh_token",
                &self.refresh_token.as_ref().map(|_| "<redacted>"),
            )
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Port trait for the token source backing the token manager
#[async_trait::async_trait]
pub trait ITokenProvider: Send + Sync {
    /// Loads the stored token set, `None` if nothing is stored
    async fn load(&self) -> Result<Option<Token>, AuthError>;

    /// Exchanges a refresh token for a new token set
    ///
    /// # Errors
    /// `RefreshRejected` if the refresh token is invalid or revoked
    async fn refresh(&self, refresh_token: &str) -> Result<Token, AuthError>;

    /// Stores a token set for later runs
    async fn persist(&self, token: &Token) -> Result<(), AuthError>;
}
