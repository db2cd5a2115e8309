//! Policy engine for conflict and deletion handling
//!
//! Conflict policies come from three places, strongest first:
//! 1. Glob rules from configuration, first match wins
//! 2. The sync pair's own override
//! 3. The configured default
//!
//! Deletion policies have no glob rules; the pair override beats the default.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use egnsync_core::config::ConflictsConfig;
use egnsync_core::domain::{
    ConflictPolicy, FileRecord, LocalDeletedPolicy, LocalState, RelativePath,
    RemoteDeletedPolicy, RemoteState, Resolution, SyncPair,
};
use glob::Pattern;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

use crate::detector::ChangeDetector;
use crate::error::ConflictError;

/// A single conflict policy rule from configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConflictRule {
    /// Glob pattern matched against the path relative to the pair root
    pub pattern: String,
    /// `newest`, `local` or `remote`
    pub policy: String,
}

impl ConflictRule {
    /// Validates the rule's glob pattern and policy name
    pub fn validate(&self) -> Result<(Pattern, ConflictPolicy), ConflictError> {
        let pattern = Pattern::new(&self.pattern).map_err(|e| ConflictError::InvalidRule {
            pattern: self.pattern.clone(),
            reason: e.to_string(),
        })?;

        let policy =
            ConflictPolicy::from_str(&self.policy).map_err(|e| ConflictError::InvalidRule {
                pattern: self.pattern.clone(),
                reason: format!("{e}; valid: newest, local, remote"),
            })?;

        Ok((pattern, policy))
    }
}

/// Engine that picks and applies conflict and deletion policies
pub struct PolicyEngine {
    rules: Vec<(Pattern, ConflictPolicy)>,
    default_policy: ConflictPolicy,
    remote_deleted: RemoteDeletedPolicy,
    local_deleted: LocalDeletedPolicy,
}

impl Default for PolicyEngine {
    fn default() -> Self {
        Self::new(ConflictPolicy::default(), &[])
    }
}

impl PolicyEngine {
    /// Creates an engine from a default policy and a list of rules
    ///
    /// Invalid rules are logged and skipped.
    pub fn new(default_policy: ConflictPolicy, rules: &[ConflictRule]) -> Self {
        let compiled: Vec<(Pattern, ConflictPolicy)> = rules
            .iter()
            .filter_map(|rule| match rule.validate() {
                Ok(compiled) => Some(compiled),
                Err(e) => {
                    warn!(error = %e, "Skipping invalid conflict rule");
                    None
                }
            })
            .collect();

        debug!(
            rules_count = compiled.len(),
            default = %default_policy,
            "PolicyEngine initialized"
        );

        Self {
            rules: compiled,
            default_policy,
            remote_deleted: RemoteDeletedPolicy::default(),
            local_deleted: LocalDeletedPolicy::default(),
        }
    }

    /// Builds the engine from the `conflicts` config section
    ///
    /// Unknown policy names fall back to the defaults with a warning;
    /// `Config::validate` reports them before this point.
    pub fn from_config(config: &ConflictsConfig) -> Self {
        fn parse_or_default<T: FromStr + Default>(value: &str, field: &str) -> T {
            value.parse().unwrap_or_else(|_| {
                warn!(field, value, "Unknown policy, using default");
                T::default()
            })
        }

        let rules: Vec<ConflictRule> = config
            .rules
            .iter()
            .map(|r| ConflictRule {
                pattern: r.pattern.clone(),
                policy: r.policy.clone(),
            })
            .collect();

        Self::new(
            parse_or_default(&config.default_policy, "conflicts.default_policy"),
            &rules,
        )
        .with_deletion_policies(
            parse_or_default(&config.remote_deleted, "conflicts.remote_deleted"),
            parse_or_default(&config.local_deleted, "conflicts.local_deleted"),
        )
    }

    pub fn with_deletion_policies(
        mut self,
        remote_deleted: RemoteDeletedPolicy,
        local_deleted: LocalDeletedPolicy,
    ) -> Self {
        self.remote_deleted = remote_deleted;
        self.local_deleted = local_deleted;
        self
    }

    /// Conflict policy for a path: glob rule, then pair override, then default
    pub fn policy_for(&self, pair: &SyncPair, relative_path: &RelativePath) -> ConflictPolicy {
        for (pattern, policy) in &self.rules {
            if pattern.matches(relative_path.as_str()) {
                trace!(
                    path = %relative_path,
                    pattern = %pattern,
                    policy = %policy,
                    "Conflict rule matched"
                );
                return *policy;
            }
        }
        pair.conflict_policy.unwrap_or(self.default_policy)
    }

    pub fn remote_deleted_for(&self, pair: &SyncPair) -> RemoteDeletedPolicy {
        pair.remote_deleted.unwrap_or(self.remote_deleted)
    }

    pub fn local_deleted_for(&self, pair: &SyncPair) -> LocalDeletedPolicy {
        pair.local_deleted.unwrap_or(self.local_deleted)
    }

    /// Applies a policy to the two modification times
    ///
    /// Under `Newest` the strictly later side wins. A missing timestamp is
    /// older than any present one. Ties go to the remote side.
    pub fn resolve(
        policy: ConflictPolicy,
        local_modified: Option<DateTime<Utc>>,
        remote_modified: Option<DateTime<Utc>>,
    ) -> Resolution {
        match policy {
            ConflictPolicy::Local => Resolution::KeepLocal,
            ConflictPolicy::Remote => Resolution::KeepRemote,
            ConflictPolicy::Newest => {
                // Option orders None below Some
                if local_modified > remote_modified {
                    Resolution::KeepLocal
                } else {
                    Resolution::KeepRemote
                }
            }
        }
    }

    /// Decides a `Conflict` classification for one path
    ///
    /// Without a baseline, identical content on both sides is adopted as
    /// already in sync instead of being transferred.
    pub fn resolve_conflict(
        &self,
        pair: &SyncPair,
        relative_path: &RelativePath,
        local: &LocalState,
        remote: &RemoteState,
        record: Option<&FileRecord>,
    ) -> Resolution {
        let has_baseline = record.is_some_and(|r| !r.is_never_synced());
        if !has_baseline && ChangeDetector::contents_match(local, remote) {
            debug!(path = %relative_path, "Both sides hold identical content");
            return Resolution::AlreadyInSync;
        }

        let policy = self.policy_for(pair, relative_path);
        let resolution = Self::resolve(policy, local.modified_at(), remote.modified_at());
        debug!(
            path = %relative_path,
            policy = %policy,
            resolution = %resolution,
            "Resolved conflict"
        );
        resolution
    }

    pub fn default_policy(&self) -> ConflictPolicy {
        self.default_policy
    }

    /// Returns the number of compiled rules
    pub fn rules_count(&self) -> usize {
        self.rules.len()
    }
}
