//! Domain error types
//!
//! This module defines the error taxonomy shared by every egnsync crate:
//! validation failures on domain values, credential failures, and the typed
//! failures surfaced by the remote client.

use std::fmt::{self, Display, Formatter};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised when constructing domain values
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// Invalid relative path under a sync pair root
    #[error("Invalid relative path: {0}")]
    InvalidRelativePath(String),

    /// Invalid remote path format
    #[error("Invalid remote path: {0}")]
    InvalidRemotePath(String),

    /// Invalid sync pair identifier
    #[error("Invalid pair id: {0}")]
    InvalidPairId(String),

    /// Invalid content fingerprint
    #[error("Invalid fingerprint: {0}")]
    InvalidFingerprint(String),

    /// Invalid remote version token
    #[error("Invalid remote version: {0}")]
    InvalidVersion(String),

    /// Unknown policy name
    #[error("Unknown policy: {0}")]
    UnknownPolicy(String),
}

/// Unrecoverable credential failure
///
/// `Clone` so that one failed refresh can be handed to every caller that
/// was waiting on it.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthError {
    /// No refresh token is stored, the account must be authorized first
    #[error("No refresh token available")]
    NoRefreshToken,

    /// The token endpoint rejected the refresh token
    #[error("Token refresh rejected: {0}")]
    RefreshRejected(String),

    /// Loading or saving the token set failed
    #[error("Token storage error: {0}")]
    Storage(String),

    /// The token endpoint could not be reached; credentials may still be valid
    #[error("Token endpoint unavailable: {0}")]
    Unavailable(String),
}

impl AuthError {
    /// True when retrying later may succeed without operator action
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

/// Machine-readable reason attached to a non-retryable 4xx response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    NotFound,
    Forbidden,
    Conflict,
    BadRequest,
    PayloadTooLarge,
    Other,
}

impl RejectReason {
    /// Maps an HTTP status code to its reason slug
    #[must_use]
    pub fn from_status(status: u16) -> Self {
        match status {
            400 => Self::BadRequest,
            403 => Self::Forbidden,
            404 => Self::NotFound,
            409 => Self::Conflict,
            413 => Self::PayloadTooLarge,
            _ => Self::Other,
        }
    }

    /// Returns the slug used in logs and JSON output
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotFound => "not_found",
            Self::Forbidden => "forbidden",
            Self::Conflict => "conflict",
            Self::BadRequest => "bad_request",
            Self::PayloadTooLarge => "payload_too_large",
            Self::Other => "other",
        }
    }
}

impl Display for RejectReason {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failures surfaced by remote store operations
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RemoteError {
    /// Credentials are unusable; halts the pass
    #[error("Authentication failed: {0}")]
    Auth(AuthError),

    /// The local retry budget ran out against the service quota
    #[error("Rate limit exceeded after {attempts} attempts")]
    RateLimitExceeded {
        /// Number of attempts made, 0 when the daily ceiling blocked the request
        attempts: u32,
    },

    /// Network failure, timeout or 5xx after all retries
    #[error("Transient remote error after {attempts} attempts: {reason}")]
    Transient {
        /// Number of attempts made
        attempts: u32,
        /// Last observed failure
        reason: String,
    },

    /// Non-retryable 4xx response
    #[error("Remote rejected request ({status} {reason}): {message}")]
    Rejected {
        /// HTTP status code
        status: u16,
        /// Reason slug
        reason: RejectReason,
        /// Message returned by the service
        message: String,
    },

    /// Conditional write failed because the live version moved on
    #[error("Remote version mismatch (expected {expected:?})")]
    VersionMismatch {
        /// Version the caller believed was current
        expected: Option<String>,
    },

    /// The response body could not be interpreted
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

impl From<AuthError> for RemoteError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::Unavailable(reason) => Self::Transient {
                attempts: 1,
                reason: format!("token refresh: {reason}"),
            },
            other => Self::Auth(other),
        }
    }
}

impl RemoteError {
    /// True for a 404 rejection
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::Rejected {
                reason: RejectReason::NotFound,
                ..
            }
        )
    }

    /// True when the error means no further remote call can succeed
    #[must_use]
    pub fn is_auth(&self) -> bool {
        matches!(self, Self::Auth(_))
    }
}
