//! Configuration module for egnsync.
//!
//! Provides typed configuration structs that map to the YAML configuration file,
//! with loading, validation, defaults, and a builder pattern for programmatic use.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::{anyhow, bail, Context};
use serde::{Deserialize, Serialize};
use serde_yaml::Value;

use crate::atomic;
use crate::domain::{
    ConflictPolicy, DomainError, LocalDeletedPolicy, PairId, RemoteDeletedPolicy, RemotePath,
    SyncPair,
};

// ---------------------------------------------------------------------------
// Config struct with sub-sections
// ---------------------------------------------------------------------------

/// Top-level configuration for egnsync.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub remote: RemoteConfig,
    pub auth: AuthConfig,
    pub sync: SyncConfig,
    pub conflicts: ConflictsConfig,
    pub logging: LoggingConfig,
    pub pairs: Vec<PairConfig>,
}

/// Remote service and request-quota settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    /// Egnyte domain, the `acme` in `acme.egnyte.com`.
    pub domain: String,
    /// Overrides `https://{domain}.egnyte.com`.
    pub base_url: Option<String>,
    /// Request-per-second ceiling enforced by the service.
    pub requests_per_second: f64,
    /// Requests allowed per rolling 24 hours; 0 disables the check.
    pub daily_request_limit: u32,
    /// Attempts per operation before giving up.
    pub max_attempts: u32,
    /// First retry delay in milliseconds; doubles on each retry.
    pub backoff_base_ms: u64,
    /// Upper bound on the delay after a 429.
    pub throttle_backoff_cap_secs: u64,
    /// Upper bound on the delay after a 5xx or network failure.
    pub transient_backoff_cap_secs: u64,
    /// Deadline for a single HTTP request.
    pub operation_timeout_secs: u64,
}

/// OAuth client settings used for token refresh.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    pub client_id: String,
    pub client_secret: Option<String>,
    /// Overrides `https://{domain}.egnyte.com/puboauth/token`.
    pub token_url: Option<String>,
    /// Refresh once fewer than this many seconds of validity remain.
    pub refresh_buffer_secs: u64,
}

/// Synchronization settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Location of the persisted sync state.
    pub state_file: PathBuf,
    /// Concurrent per-path workers.
    pub workers: usize,
    /// Seconds between full passes in watch mode.
    pub poll_interval_secs: u64,
    /// Quiet period before a local change hint is acted on.
    pub debounce_delay_ms: u64,
    /// Capacity of the change hint channel.
    pub hint_queue_capacity: usize,
}

/// A glob rule selecting a conflict policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictRuleConfig {
    pub pattern: String,
    pub policy: String,
}

/// Conflict and deletion policy settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConflictsConfig {
    /// `newest`, `local` or `remote`.
    pub default_policy: String,
    /// First matching rule wins.
    pub rules: Vec<ConflictRuleConfig>,
    /// `reupload` or `delete_local`.
    pub remote_deleted: String,
    /// `delete_remote` or `restore`.
    pub local_deleted: String,
}

/// Logging / tracing settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: `trace`, `debug`, `info`, `warn`, or `error`.
    pub level: String,
    /// `text` or `json`.
    pub format: String,
}

/// One configured sync pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PairConfig {
    pub id: String,
    pub local_root: PathBuf,
    pub remote_root: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conflict_policy: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_deleted: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_deleted: Option<String>,
}

fn default_enabled() -> bool {
    true
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

impl Config {
    /// Load configuration from a YAML file at `path`.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: Config = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        Ok(config)
    }

    /// Try to load from `path`; fall back to [`Config::default`] on any error.
    pub fn load_or_default(path: &Path) -> Self {
        Self::load(path).unwrap_or_default()
    }

    /// Platform-appropriate default path for the configuration file.
    ///
    /// Typically `$XDG_CONFIG_HOME/egnsync/config.yaml` on Linux.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("~/.config"))
            .join("egnsync")
            .join("config.yaml")
    }

    /// Convert the `pairs` entries into domain sync pairs.
    pub fn sync_pairs(&self) -> Result<Vec<SyncPair>, DomainError> {
        self.pairs.iter().map(PairConfig::to_sync_pair).collect()
    }
}

// ---------------------------------------------------------------------------
// Saving and editing
// ---------------------------------------------------------------------------

impl Config {
    /// Write the configuration as YAML to `path`, replacing any existing file atomically.
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let yaml = serde_yaml::to_string(self).context("Failed to serialize configuration")?;
        atomic::replace_file(path, &atomic::sibling_tmp(path, ".tmp"), yaml.as_bytes(), None)
            .with_context(|| format!("Failed to write config file {}", path.display()))
    }

    /// Value at a dotted key such as `sync.workers`; `None` for unknown keys.
    pub fn get_value(&self, key: &str) -> anyhow::Result<Option<Value>> {
        let root = serde_yaml::to_value(self).context("Failed to serialize configuration")?;
        Ok(lookup(&root, key).cloned())
    }

    /// Set the setting at a dotted key from its YAML text.
    ///
    /// The edited document must still deserialize into a [`Config`]; on any
    /// error `self` is left unchanged. Text that does not parse as the
    /// field's type is tried once more as a plain string. Sections and
    /// lists (such as `pairs`) cannot be set this way.
    pub fn set_value(&mut self, key: &str, raw: &str) -> anyhow::Result<()> {
        let root = serde_yaml::to_value(&*self).context("Failed to serialize configuration")?;
        let unknown = || anyhow!("Unknown configuration key '{key}'");
        let (section, leaf) = key.rsplit_once('.').ok_or_else(unknown)?;
        let current = lookup(&root, section)
            .and_then(Value::as_mapping)
            .ok_or_else(unknown)?
            .get(leaf)
            .ok_or_else(unknown)?;
        if current.is_mapping() || current.is_sequence() {
            bail!("'{key}' is a section, not a single setting");
        }

        let parsed: Value = serde_yaml::from_str(raw).unwrap_or_else(|_| Value::String(raw.into()));
        let mut candidates = vec![parsed];
        if !candidates[0].is_string() {
            candidates.push(Value::String(raw.to_string()));
        }

        let mut first_error = None;
        for candidate in candidates {
            let mut edited = root.clone();
            if let Some(slot) = lookup_mut(&mut edited, key) {
                *slot = candidate;
            }
            match serde_yaml::from_value::<Config>(edited) {
                Ok(config) => {
                    *self = config;
                    return Ok(());
                }
                Err(e) => {
                    first_error.get_or_insert(e);
                }
            }
        }
        match first_error {
            Some(e) => Err(e).with_context(|| format!("Invalid value for '{key}'")),
            None => Err(unknown()),
        }
    }

    /// Every single-valued setting as `(dotted key, value)` in file order.
    ///
    /// Lists such as `pairs` and `conflicts.rules` are left out.
    pub fn entries(&self) -> anyhow::Result<Vec<(String, Value)>> {
        let root = serde_yaml::to_value(self).context("Failed to serialize configuration")?;
        let mut out = Vec::new();
        flatten("", &root, &mut out);
        Ok(out)
    }

    /// Append a pair, rejecting a duplicate id.
    pub fn add_pair(&mut self, pair: PairConfig) -> anyhow::Result<()> {
        if self.pairs.iter().any(|p| p.id == pair.id) {
            bail!("Pair '{}' already exists", pair.id);
        }
        self.pairs.push(pair);
        Ok(())
    }

    /// Remove a pair by id and return it.
    pub fn remove_pair(&mut self, id: &str) -> Option<PairConfig> {
        let index = self.pairs.iter().position(|p| p.id == id)?;
        Some(self.pairs.remove(index))
    }

    pub fn pair_mut(&mut self, id: &str) -> Option<&mut PairConfig> {
        self.pairs.iter_mut().find(|p| p.id == id)
    }
}

fn lookup<'a>(root: &'a Value, key: &str) -> Option<&'a Value> {
    key.split('.')
        .try_fold(root, |node, part| node.as_mapping()?.get(part))
}

fn lookup_mut<'a>(root: &'a mut Value, key: &str) -> Option<&'a mut Value> {
    key.split('.')
        .try_fold(root, |node, part| node.as_mapping_mut()?.get_mut(part))
}

fn flatten(prefix: &str, value: &Value, out: &mut Vec<(String, Value)>) {
    match value {
        Value::Mapping(map) => {
            for (k, v) in map {
                let Some(k) = k.as_str() else { continue };
                let key = if prefix.is_empty() {
                    k.to_string()
                } else {
                    format!("{prefix}.{k}")
                };
                flatten(&key, v, out);
            }
        }
        Value::Sequence(_) => {}
        _ => out.push((prefix.to_string(), value.clone())),
    }
}

impl RemoteConfig {
    /// Base URL of the file API.
    pub fn base_url(&self) -> String {
        match &self.base_url {
            Some(url) => url.trim_end_matches('/').to_string(),
            None => format!("https://{}.egnyte.com", self.domain),
        }
    }
}

impl AuthConfig {
    /// Token endpoint for the given domain.
    pub fn token_url(&self, domain: &str) -> String {
        self.token_url
            .clone()
            .unwrap_or_else(|| format!("https://{domain}.egnyte.com/puboauth/token"))
    }
}

impl PairConfig {
    pub fn to_sync_pair(&self) -> Result<SyncPair, DomainError> {
        let mut pair = SyncPair::new(
            PairId::new(self.id.clone())?,
            self.local_root.clone(),
            RemotePath::new(self.remote_root.clone())?,
        );
        pair.enabled = self.enabled;
        pair.conflict_policy = self
            .conflict_policy
            .as_deref()
            .map(ConflictPolicy::from_str)
            .transpose()?;
        pair.remote_deleted = self
            .remote_deleted
            .as_deref()
            .map(RemoteDeletedPolicy::from_str)
            .transpose()?;
        pair.local_deleted = self
            .local_deleted
            .as_deref()
            .map(LocalDeletedPolicy::from_str)
            .transpose()?;
        Ok(pair)
    }
}

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            domain: String::new(),
            base_url: None,
            requests_per_second: 2.0,
            daily_request_limit: 1000,
            max_attempts: 5,
            backoff_base_ms: 1000,
            throttle_backoff_cap_secs: 60,
            transient_backoff_cap_secs: 30,
            operation_timeout_secs: 60,
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            client_secret: None,
            token_url: None,
            refresh_buffer_secs: 60,
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        let data_dir = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("~/.local/share"))
            .join("egnsync");
        Self {
            state_file: data_dir.join("sync-state.json"),
            workers: 4,
            poll_interval_secs: 300,
            debounce_delay_ms: 2000,
            hint_queue_capacity: 1024,
        }
    }
}

impl Default for ConflictsConfig {
    fn default() -> Self {
        Self {
            default_policy: ConflictPolicy::default().as_str().to_string(),
            rules: Vec::new(),
            remote_deleted: RemoteDeletedPolicy::default().as_str().to_string(),
            local_deleted: LocalDeletedPolicy::default().as_str().to_string(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "text".to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// A single validation error found in the configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted path to the offending field, e.g. `"sync.workers"`.
    pub field: String,
    /// Human-readable explanation.
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Valid values for `logging.level`.
const VALID_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Valid values for `logging.format`.
const VALID_LOG_FORMATS: &[&str] = &["text", "json"];

fn positive(errors: &mut Vec<ValidationError>, field: &str, value: u64) {
    if value == 0 {
        errors.push(ValidationError {
            field: field.into(),
            message: "must be greater than 0".into(),
        });
    }
}

fn known<T: FromStr>(errors: &mut Vec<ValidationError>, field: &str, value: &str) {
    if value.parse::<T>().is_err() {
        errors.push(ValidationError {
            field: field.into(),
            message: format!("unknown policy '{value}'"),
        });
    }
}

impl Config {
    /// Validate the configuration and return all errors found.
    ///
    /// An empty vector means the configuration is valid.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        // --- remote ---
        if !(self.remote.requests_per_second.is_finite() && self.remote.requests_per_second > 0.0)
        {
            errors.push(ValidationError {
                field: "remote.requests_per_second".into(),
                message: "must be a positive number".into(),
            });
        }
        positive(&mut errors, "remote.max_attempts", self.remote.max_attempts.into());
        positive(&mut errors, "remote.backoff_base_ms", self.remote.backoff_base_ms);
        positive(
            &mut errors,
            "remote.throttle_backoff_cap_secs",
            self.remote.throttle_backoff_cap_secs,
        );
        positive(
            &mut errors,
            "remote.transient_backoff_cap_secs",
            self.remote.transient_backoff_cap_secs,
        );
        positive(
            &mut errors,
            "remote.operation_timeout_secs",
            self.remote.operation_timeout_secs,
        );
        if self.remote.domain.is_empty() && self.remote.base_url.is_none() {
            errors.push(ValidationError {
                field: "remote.domain".into(),
                message: "domain or base_url must be set".into(),
            });
        }

        // --- sync ---
        positive(&mut errors, "sync.workers", self.sync.workers as u64);
        positive(&mut errors, "sync.poll_interval_secs", self.sync.poll_interval_secs);
        positive(
            &mut errors,
            "sync.hint_queue_capacity",
            self.sync.hint_queue_capacity as u64,
        );

        // --- conflicts ---
        known::<ConflictPolicy>(
            &mut errors,
            "conflicts.default_policy",
            &self.conflicts.default_policy,
        );
        known::<RemoteDeletedPolicy>(
            &mut errors,
            "conflicts.remote_deleted",
            &self.conflicts.remote_deleted,
        );
        known::<LocalDeletedPolicy>(
            &mut errors,
            "conflicts.local_deleted",
            &self.conflicts.local_deleted,
        );
        for (i, rule) in self.conflicts.rules.iter().enumerate() {
            known::<ConflictPolicy>(
                &mut errors,
                &format!("conflicts.rules[{i}].policy"),
                &rule.policy,
            );
            if glob::Pattern::new(&rule.pattern).is_err() {
                errors.push(ValidationError {
                    field: format!("conflicts.rules[{i}].pattern"),
                    message: format!("invalid glob pattern '{}'", rule.pattern),
                });
            }
        }

        // --- logging ---
        if !VALID_LOG_LEVELS.contains(&self.logging.level.as_str()) {
            errors.push(ValidationError {
                field: "logging.level".into(),
                message: format!(
                    "invalid level '{}'; valid options: {}",
                    self.logging.level,
                    VALID_LOG_LEVELS.join(", ")
                ),
            });
        }
        if !VALID_LOG_FORMATS.contains(&self.logging.format.as_str()) {
            errors.push(ValidationError {
                field: "logging.format".into(),
                message: format!(
                    "invalid format '{}'; valid options: {}",
                    self.logging.format,
                    VALID_LOG_FORMATS.join(", ")
                ),
            });
        }

        // --- pairs ---
        let mut seen = HashSet::new();
        for (i, pair) in self.pairs.iter().enumerate() {
            let prefix = format!("pairs[{i}]");
            if let Err(e) = PairId::new(pair.id.clone()) {
                errors.push(ValidationError {
                    field: format!("{prefix}.id"),
                    message: e.to_string(),
                });
            } else if !seen.insert(pair.id.as_str()) {
                errors.push(ValidationError {
                    field: format!("{prefix}.id"),
                    message: format!("duplicate pair id '{}'", pair.id),
                });
            }
            if !pair.local_root.is_absolute() {
                errors.push(ValidationError {
                    field: format!("{prefix}.local_root"),
                    message: "must be an absolute path".into(),
                });
            }
            if let Err(e) = RemotePath::new(pair.remote_root.clone()) {
                errors.push(ValidationError {
                    field: format!("{prefix}.remote_root"),
                    message: e.to_string(),
                });
            }
            if let Some(policy) = &pair.conflict_policy {
                known::<ConflictPolicy>(&mut errors, &format!("{prefix}.conflict_policy"), policy);
            }
            if let Some(policy) = &pair.remote_deleted {
                known::<RemoteDeletedPolicy>(
                    &mut errors,
                    &format!("{prefix}.remote_deleted"),
                    policy,
                );
            }
            if let Some(policy) = &pair.local_deleted {
                known::<LocalDeletedPolicy>(&mut errors, &format!("{prefix}.local_deleted"), policy);
            }
        }

        errors
    }
}

// ---------------------------------------------------------------------------
// ConfigBuilder
// ---------------------------------------------------------------------------

/// Builder for constructing a [`Config`] programmatically.
///
/// Starts from [`Config::default`] and allows selective overrides.
///
/// # Example
///
/// ```rust,no_run
/// use egnsync_core::config::ConfigBuilder;
/// use std::path::PathBuf;
///
/// let config = ConfigBuilder::new()
///     .remote_domain("acme")
///     .pair("docs", PathBuf::from("/home/user/Docs"), "/Shared/Docs")
///     .logging_level("debug")
///     .build();
/// ```
#[derive(Debug, Clone)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Create a new builder initialised with default values.
    pub fn new() -> Self {
        Self {
            config: Config::default(),
        }
    }

    // --- remote ---

    pub fn remote_domain(mut self, domain: impl Into<String>) -> Self {
        self.config.remote.domain = domain.into();
        self
    }

    pub fn remote_base_url(mut self, url: impl Into<String>) -> Self {
        self.config.remote.base_url = Some(url.into());
        self
    }

    pub fn remote_requests_per_second(mut self, rps: f64) -> Self {
        self.config.remote.requests_per_second = rps;
        self
    }

    pub fn remote_daily_request_limit(mut self, limit: u32) -> Self {
        self.config.remote.daily_request_limit = limit;
        self
    }

    pub fn remote_max_attempts(mut self, attempts: u32) -> Self {
        self.config.remote.max_attempts = attempts;
        self
    }

    pub fn remote_operation_timeout_secs(mut self, secs: u64) -> Self {
        self.config.remote.operation_timeout_secs = secs;
        self
    }

    // --- auth ---

    pub fn auth_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.config.auth.client_id = client_id.into();
        self
    }

    pub fn auth_client_secret(mut self, secret: impl Into<String>) -> Self {
        self.config.auth.client_secret = Some(secret.into());
        self
    }

    // --- sync ---

    pub fn sync_state_file(mut self, path: PathBuf) -> Self {
        self.config.sync.state_file = path;
        self
    }

    pub fn sync_workers(mut self, workers: usize) -> Self {
        self.config.sync.workers = workers;
        self
    }

    pub fn sync_poll_interval_secs(mut self, secs: u64) -> Self {
        self.config.sync.poll_interval_secs = secs;
        self
    }

    pub fn sync_debounce_delay_ms(mut self, ms: u64) -> Self {
        self.config.sync.debounce_delay_ms = ms;
        self
    }

    // --- conflicts ---

    pub fn conflicts_default_policy(mut self, policy: impl Into<String>) -> Self {
        self.config.conflicts.default_policy = policy.into();
        self
    }

    pub fn conflicts_rule(mut self, pattern: impl Into<String>, policy: impl Into<String>) -> Self {
        self.config.conflicts.rules.push(ConflictRuleConfig {
            pattern: pattern.into(),
            policy: policy.into(),
        });
        self
    }

    pub fn conflicts_remote_deleted(mut self, policy: impl Into<String>) -> Self {
        self.config.conflicts.remote_deleted = policy.into();
        self
    }

    pub fn conflicts_local_deleted(mut self, policy: impl Into<String>) -> Self {
        self.config.conflicts.local_deleted = policy.into();
        self
    }

    // --- logging ---

    pub fn logging_level(mut self, level: impl Into<String>) -> Self {
        self.config.logging.level = level.into();
        self
    }

    pub fn logging_format(mut self, format: impl Into<String>) -> Self {
        self.config.logging.format = format.into();
        self
    }

    // --- pairs ---

    /// Add an enabled pair without policy overrides.
    pub fn pair(
        mut self,
        id: impl Into<String>,
        local_root: PathBuf,
        remote_root: impl Into<String>,
    ) -> Self {
        self.config.pairs.push(PairConfig {
            id: id.into(),
            local_root,
            remote_root: remote_root.into(),
            enabled: true,
            conflict_policy: None,
            remote_deleted: None,
            local_deleted: None,
        });
        self
    }

    // --- build ---

    /// Consume the builder and return the finished [`Config`].
    pub fn build(self) -> Config {
        self.config
    }

    /// Build and validate in one step. Returns `Err` with the list of
    /// validation errors if the configuration is invalid.
    pub fn build_validated(self) -> Result<Config, Vec<ValidationError>> {
        let config = self.build();
        let errors = config.validate();
        if errors.is_empty() {
            Ok(config)
        } else {
            Err(errors)
        }
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
