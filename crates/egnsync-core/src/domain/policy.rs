//! Conflict and deletion policies
//!
//! Every policy is an explicit tagged variant so the engine can match on it
//! exhaustively. The string forms are the ones accepted in `config.yaml`.

use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::errors::DomainError;

/// How a path changed on both sides is resolved
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictPolicy {
    /// The side with the later modification time wins, remote on ties
    #[default]
    Newest,
    /// Local copy always overwrites remote
    Local,
    /// Remote copy always overwrites local
    Remote,
}

impl ConflictPolicy {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Newest => "newest",
            Self::Local => "local",
            Self::Remote => "remote",
        }
    }
}

impl Display for ConflictPolicy {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConflictPolicy {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "newest" | "newer_wins" => Ok(Self::Newest),
            "local" | "keep_local" => Ok(Self::Local),
            "remote" | "keep_remote" => Ok(Self::Remote),
            other => Err(DomainError::UnknownPolicy(other.to_string())),
        }
    }
}

/// Outcome of applying a [`ConflictPolicy`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
    /// Upload the local copy over the remote one
    KeepLocal,
    /// Download the remote copy over the local one
    KeepRemote,
    /// Both sides already hold the same content; only the baseline is adopted
    AlreadyInSync,
}

impl Display for Resolution {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::KeepLocal => "keep_local",
            Self::KeepRemote => "keep_remote",
            Self::AlreadyInSync => "already_in_sync",
        })
    }
}

/// What to do when a synced file vanished remotely but is unchanged locally
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemoteDeletedPolicy {
    /// Upload the local copy again
    #[default]
    Reupload,
    /// Remove the local copy
    DeleteLocal,
}

impl RemoteDeletedPolicy {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Reupload => "reupload",
            Self::DeleteLocal => "delete_local",
        }
    }
}

impl Display for RemoteDeletedPolicy {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RemoteDeletedPolicy {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "reupload" => Ok(Self::Reupload),
            "delete_local" => Ok(Self::DeleteLocal),
            other => Err(DomainError::UnknownPolicy(other.to_string())),
        }
    }
}

/// What to do when a synced file vanished locally but is unchanged remotely
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LocalDeletedPolicy {
    /// Propagate the deletion to the remote copy
    #[default]
    DeleteRemote,
    /// Download the remote copy back
    Restore,
}

impl LocalDeletedPolicy {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DeleteRemote => "delete_remote",
            Self::Restore => "restore",
        }
    }
}

impl Display for LocalDeletedPolicy {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LocalDeletedPolicy {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "delete_remote" => Ok(Self::DeleteRemote),
            "restore" => Ok(Self::Restore),
            other => Err(DomainError::UnknownPolicy(other.to_string())),
        }
    }
}
