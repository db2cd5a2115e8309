//! Egnyte file API client
//!
//! Implements [`IRemoteStore`] over the public file system API. Every
//! operation goes through one send loop that takes a unit of the shared
//! [`RateBudget`], attaches a fresh bearer token and retries 429, 5xx and
//! network failures with the configured backoff. Response bodies are read
//! inside that loop, so a body that times out mid-transfer is retried too.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use egnsync_core::config::Config;
//! use egnsync_core::domain::RemotePath;
//! use egnsync_core::ports::IRemoteStore;
//! use egnsync_remote::{EgnyteClient, KeyringTokenProvider, RateBudget, TokenManager};
//!
//! # async fn example(config: Config) -> anyhow::Result<()> {
//! let provider = Arc::new(KeyringTokenProvider::from_config(&config)?);
//! let tokens = Arc::new(TokenManager::new(provider, std::time::Duration::from_secs(60)));
//! let budget = Arc::new(RateBudget::new(2.0, Some(1000)));
//! let client = EgnyteClient::from_config(&config.remote, tokens, budget)?;
//! let entries = client.list(&RemotePath::new("/Shared".to_string())?).await?;
//! println!("{} entries", entries.len());
//! # Ok(())
//! # }
//! ```

use std::{future::Future, sync::Arc, time::Duration};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use egnsync_core::config::RemoteConfig;
use egnsync_core::domain::{
    AuthError, Fingerprint, RejectReason, RemoteError, RemotePath, RemoteVersion,
};
use egnsync_core::ports::{Downloaded, IRemoteStore, RemoteEntry};
use reqwest::{header, Client, RequestBuilder, Response, StatusCode, Url};
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::rate_limit::{parse_retry_after, RateBudget};
use crate::retry::{RetryKind, RetryPolicy};
use crate::token::TokenManager;

// ============================================================================
// API response types
// ============================================================================

/// File or folder metadata as returned by `GET /fs`
#[derive(Debug, Default, Deserialize)]
struct EntryResponse {
    name: Option<String>,
    path: Option<String>,
    #[serde(default)]
    is_folder: bool,
    #[serde(default)]
    size: u64,
    checksum: Option<String>,
    entry_id: Option<String>,
    /// HTTP-date, RFC 3339 or epoch milliseconds depending on the endpoint
    last_modified: Option<serde_json::Value>,
    #[serde(default)]
    folders: Vec<EntryResponse>,
    #[serde(default)]
    files: Vec<EntryResponse>,
}

/// Body of a successful upload
#[derive(Debug, Default, Deserialize)]
struct UploadResponse {
    checksum: Option<String>,
    entry_id: Option<String>,
}

/// Error body; the service uses several shapes
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ErrorResponse {
    error_message: Option<String>,
    message: Option<String>,
    #[serde(rename = "error")]
    error: Option<String>,
}

impl EntryResponse {
    /// Converts the wire entry; `fallback` is used when the response omits its path
    fn into_entry(self, fallback: &RemotePath) -> RemoteEntry {
        let path = self
            .path
            .and_then(|p| RemotePath::new(p).ok())
            .unwrap_or_else(|| fallback.clone());
        let name = self
            .name
            .unwrap_or_else(|| path.file_name().unwrap_or_default().to_string());
        let checksum = self
            .checksum
            .as_ref()
            .and_then(|c| Fingerprint::new(c.clone()).ok());
        let version = if self.is_folder {
            None
        } else {
            self.entry_id
                .or(self.checksum)
                .and_then(|v| RemoteVersion::new(v).ok())
        };

        RemoteEntry {
            path,
            name,
            is_folder: self.is_folder,
            size: self.size,
            version,
            checksum,
            modified_at: self.last_modified.as_ref().and_then(parse_timestamp),
        }
    }
}

/// Parses `last_modified` in any of the formats the API emits
fn parse_timestamp(value: &serde_json::Value) -> Option<DateTime<Utc>> {
    match value {
        serde_json::Value::Number(n) => n.as_i64().and_then(DateTime::from_timestamp_millis),
        serde_json::Value::String(s) => DateTime::parse_from_rfc2822(s)
            .or_else(|_| DateTime::parse_from_rfc3339(s))
            .map(|d| d.with_timezone(&Utc))
            .ok()
            .or_else(|| s.parse::<i64>().ok().and_then(DateTime::from_timestamp_millis)),
        _ => None,
    }
}

// ============================================================================
// URL construction
// ============================================================================

/// The two API trees a path can be addressed under
#[derive(Debug, Clone, Copy)]
enum Api {
    /// Metadata and folder operations
    Fs,
    /// File content
    FsContent,
}

impl Api {
    fn segment(self) -> &'static str {
        match self {
            Self::Fs => "fs",
            Self::FsContent => "fs-content",
        }
    }
}

/// Builds `{base}/pubapi/v1/{api}{path}`, percent-encoding each segment
fn api_url(base: &Url, api: Api, path: &RemotePath) -> Url {
    let mut url = base.clone();
    if let Ok(mut segments) = url.path_segments_mut() {
        segments
            .pop_if_empty()
            .extend(["pubapi", "v1", api.segment()])
            .extend(path.as_str().split('/').filter(|s| !s.is_empty()));
    }
    url
}

// ============================================================================
// Response reading
// ============================================================================

/// Why reading a response inside the send loop did not produce a value
#[derive(Debug)]
enum ReadError {
    /// The body transfer failed; the request is sent again
    Body(String),
    /// The response was read and is unusable
    Fatal(RemoteError),
}

impl From<RemoteError> for ReadError {
    fn from(err: RemoteError) -> Self {
        Self::Fatal(err)
    }
}

async fn body_bytes(response: Response) -> Result<Vec<u8>, ReadError> {
    response
        .bytes()
        .await
        .map(|b| b.to_vec())
        .map_err(|e| {
            if e.is_timeout() {
                ReadError::Body("response body timed out".to_string())
            } else {
                ReadError::Body(format!("reading response body: {e}"))
            }
        })
}

// ============================================================================
// EgnyteClient
// ============================================================================

/// HTTP client for the Egnyte public file API
pub struct EgnyteClient {
    http: Client,
    base_url: Url,
    tokens: Arc<TokenManager>,
    budget: Arc<RateBudget>,
    retry: RetryPolicy,
    timeout: Duration,
}

impl EgnyteClient {
    /// Creates a client for the given base URL with the default retry policy
    ///
    /// # Arguments
    /// * `base_url` - Scheme and host, e.g. `https://acme.egnyte.com`
    /// * `tokens` - Shared token manager
    /// * `budget` - Shared request budget
    pub fn with_base_url(
        base_url: &str,
        tokens: Arc<TokenManager>,
        budget: Arc<RateBudget>,
    ) -> Result<Self> {
        let base_url = Url::parse(base_url).context("Invalid API base URL")?;
        if base_url.cannot_be_a_base() {
            anyhow::bail!("API base URL cannot carry a path: {base_url}");
        }
        let http = Client::builder()
            .user_agent(concat!("egnsync/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            http,
            base_url,
            tokens,
            budget,
            retry: RetryPolicy::default(),
            timeout: Duration::from_secs(60),
        })
    }

    /// Creates a client from the remote section of the config
    pub fn from_config(
        config: &RemoteConfig,
        tokens: Arc<TokenManager>,
        budget: Arc<RateBudget>,
    ) -> Result<Self> {
        Ok(Self::with_base_url(&config.base_url(), tokens, budget)?
            .with_retry_policy(RetryPolicy::from_config(config))
            .with_timeout(Duration::from_secs(config.operation_timeout_secs)))
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Sets the per-request deadline
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub fn budget(&self) -> &Arc<RateBudget> {
        &self.budget
    }

    /// Sends a request with budget, token, 401 replay and retry handling.
    ///
    /// `build` is called once per attempt. Responses other than 401, 429
    /// and 5xx are handed to `read`, whose body failures count as transient
    /// attempts.
    async fn send<T, F, R, Fut>(&self, op: &'static str, build: F, read: R) -> Result<T, RemoteError>
    where
        F: Fn(&Client) -> RequestBuilder,
        R: Fn(Response) -> Fut,
        Fut: Future<Output = Result<T, ReadError>>,
    {
        let mut attempt: u32 = 0;
        let mut replayed_401 = false;

        loop {
            attempt += 1;
            self.budget.acquire().await?;
            let token = self.tokens.get_valid_token().await?;

            let result = build(&self.http)
                .bearer_auth(&token.access_token)
                .timeout(self.timeout)
                .send()
                .await;

            let (kind, reason, retry_after) = match result {
                Err(e) if e.is_timeout() => {
                    (RetryKind::Transient, "request timed out".to_string(), None)
                }
                Err(e) => (RetryKind::Transient, e.to_string(), None),
                Ok(response) => {
                    let status = response.status();
                    if status == StatusCode::UNAUTHORIZED {
                        if replayed_401 {
                            warn!(op, "Access token rejected after refresh");
                            return Err(RemoteError::Auth(AuthError::RefreshRejected(
                                "access token rejected after refresh".to_string(),
                            )));
                        }
                        info!(op, "Received 401, refreshing token and replaying once");
                        replayed_401 = true;
                        self.tokens.invalidate_stale(&token);
                        // The replay does not count against the retry budget
                        attempt -= 1;
                        continue;
                    }
                    if status == StatusCode::TOO_MANY_REQUESTS {
                        let retry_after = response
                            .headers()
                            .get(header::RETRY_AFTER)
                            .and_then(|v| v.to_str().ok())
                            .and_then(parse_retry_after);
                        (RetryKind::Throttled, "HTTP 429".to_string(), retry_after)
                    } else if status.is_server_error() {
                        (RetryKind::Transient, format!("HTTP {status}"), None)
                    } else {
                        match read(response).await {
                            Ok(value) => {
                                if attempt > 1 {
                                    info!(op, attempt, "Request succeeded after retry");
                                }
                                return Ok(value);
                            }
                            Err(ReadError::Fatal(err)) => return Err(err),
                            Err(ReadError::Body(reason)) => (RetryKind::Transient, reason, None),
                        }
                    }
                }
            };

            if !self.retry.should_retry(attempt) {
                warn!(op, attempts = attempt, reason = %reason, "Retry limit exhausted");
                return Err(match kind {
                    RetryKind::Throttled => RemoteError::RateLimitExceeded { attempts: attempt },
                    RetryKind::Transient => RemoteError::Transient {
                        attempts: attempt,
                        reason,
                    },
                });
            }

            let delay = self.retry.delay(attempt, kind, retry_after);
            warn!(
                op,
                attempt,
                reason = %reason,
                delay_ms = delay.as_millis() as u64,
                "Backing off before retry"
            );
            tokio::time::sleep(delay).await;
        }
    }

    /// Passes 2xx through and turns anything else into `Rejected`
    async fn ensure_success(response: Response) -> Result<Response, RemoteError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ErrorResponse>(&body)
            .ok()
            .and_then(|e| e.error_message.or(e.message).or(e.error))
            .unwrap_or_else(|| {
                if body.trim().is_empty() {
                    status.canonical_reason().unwrap_or("unknown").to_string()
                } else {
                    body.trim().chars().take(500).collect()
                }
            });
        Err(RemoteError::Rejected {
            status: status.as_u16(),
            reason: RejectReason::from_status(status.as_u16()),
            message,
        })
    }

    async fn read_json<T: serde::de::DeserializeOwned>(response: Response) -> Result<T, ReadError> {
        let bytes = body_bytes(Self::ensure_success(response).await?).await?;
        serde_json::from_slice(&bytes)
            .map_err(|e| RemoteError::InvalidResponse(e.to_string()).into())
    }

    async fn read_stat(response: Response, path: &RemotePath) -> Result<Option<RemoteEntry>, ReadError> {
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let raw: EntryResponse = Self::read_json(response).await?;
        Ok(Some(raw.into_entry(path)))
    }

    async fn read_download(response: Response) -> Result<Downloaded, ReadError> {
        let response = Self::ensure_success(response).await?;
        let version = etag_version(&response);
        let content = body_bytes(response).await?;
        Ok(Downloaded { content, version })
    }

    /// Reads the new version from an upload response
    ///
    /// An empty body falls back to the `ETag`. A body that is present but
    /// unparseable is rejected rather than guessed around.
    async fn read_upload(
        response: Response,
        expected_version: Option<&RemoteVersion>,
    ) -> Result<RemoteVersion, ReadError> {
        // Every upload carries a precondition, so a conflict means it failed
        if matches!(
            response.status(),
            StatusCode::PRECONDITION_FAILED | StatusCode::CONFLICT
        ) {
            debug!(status = response.status().as_u16(), "Upload precondition failed");
            return Err(RemoteError::VersionMismatch {
                expected: expected_version.map(|v| v.as_str().to_string()),
            }
            .into());
        }

        let response = Self::ensure_success(response).await?;
        let etag = etag_version(&response);
        let bytes = body_bytes(response).await?;
        let body = if bytes.iter().all(u8::is_ascii_whitespace) {
            UploadResponse::default()
        } else {
            serde_json::from_slice::<UploadResponse>(&bytes).map_err(|e| {
                RemoteError::InvalidResponse(format!("malformed upload response: {e}"))
            })?
        };

        body.entry_id
            .or(body.checksum)
            .and_then(|v| RemoteVersion::new(v).ok())
            .or(etag)
            .ok_or_else(|| {
                RemoteError::InvalidResponse("upload response carried no version".to_string())
                    .into()
            })
    }

    async fn read_empty(response: Response) -> Result<(), ReadError> {
        Self::ensure_success(response).await?;
        Ok(())
    }

    async fn entry_action(
        &self,
        op: &'static str,
        src: &RemotePath,
        dst: &RemotePath,
    ) -> Result<(), RemoteError> {
        let url = api_url(&self.base_url, Api::Fs, src);
        let body = serde_json::json!({ "action": op, "destination": dst.as_str() });
        self.send(op, |http| http.post(url.clone()).json(&body), Self::read_empty)
            .await
    }
}

fn etag_version(response: &Response) -> Option<RemoteVersion> {
    response
        .headers()
        .get(header::ETAG)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim_start_matches("W/").trim_matches('"').to_string())
        .and_then(|v| RemoteVersion::new(v).ok())
}

#[async_trait::async_trait]
impl IRemoteStore for EgnyteClient {
    #[tracing::instrument(skip(self), fields(path = %path))]
    async fn list(&self, path: &RemotePath) -> Result<Vec<RemoteEntry>, RemoteError> {
        let url = api_url(&self.base_url, Api::Fs, path);
        let listing: EntryResponse = self
            .send("list", |http| http.get(url.clone()), Self::read_json::<EntryResponse>)
            .await?;

        if !listing.is_folder {
            return Err(RemoteError::Rejected {
                status: 400,
                reason: RejectReason::BadRequest,
                message: format!("{path} is not a folder"),
            });
        }

        let entries: Vec<RemoteEntry> = listing
            .folders
            .into_iter()
            .chain(listing.files)
            .filter_map(|child| {
                let fallback = child.name.as_deref().and_then(|n| path.join(n).ok())?;
                Some(child.into_entry(&fallback))
            })
            .collect();

        debug!(count = entries.len(), "Listed folder");
        Ok(entries)
    }

    #[tracing::instrument(skip(self), fields(path = %path))]
    async fn stat(&self, path: &RemotePath) -> Result<Option<RemoteEntry>, RemoteError> {
        let url = api_url(&self.base_url, Api::Fs, path);
        self.send(
            "stat",
            |http| http.get(url.clone()),
            |response| Self::read_stat(response, path),
        )
        .await
    }

    #[tracing::instrument(skip(self), fields(path = %path))]
    async fn download(&self, path: &RemotePath) -> Result<Downloaded, RemoteError> {
        let url = api_url(&self.base_url, Api::FsContent, path);
        let downloaded = self
            .send("download", |http| http.get(url.clone()), Self::read_download)
            .await?;
        debug!(bytes = downloaded.content.len(), "Downloaded file");
        Ok(downloaded)
    }

    #[tracing::instrument(skip(self, content), fields(path = %path, bytes = content.len()))]
    async fn upload(
        &self,
        path: &RemotePath,
        content: Vec<u8>,
        expected_version: Option<&RemoteVersion>,
    ) -> Result<RemoteVersion, RemoteError> {
        let url = api_url(&self.base_url, Api::FsContent, path);
        let version = self
            .send(
                "upload",
                |http| {
                    let request = http
                        .post(url.clone())
                        .header(header::CONTENT_TYPE, "application/octet-stream")
                        .body(content.clone());
                    match expected_version {
                        Some(version) => request.header(header::IF_MATCH, version.as_str()),
                        None => request.header(header::IF_NONE_MATCH, "*"),
                    }
                },
                |response| Self::read_upload(response, expected_version),
            )
            .await?;

        info!(version = %version, "Uploaded file");
        Ok(version)
    }

    #[tracing::instrument(skip(self), fields(path = %path))]
    async fn create_folder(&self, path: &RemotePath) -> Result<(), RemoteError> {
        let url = api_url(&self.base_url, Api::Fs, path);
        let body = serde_json::json!({ "action": "add_folder" });
        self.send(
            "create_folder",
            |http| http.post(url.clone()).json(&body),
            |response| async move {
                if response.status() == StatusCode::CONFLICT {
                    debug!("Folder already exists");
                    return Ok(());
                }
                Self::read_empty(response).await
            },
        )
        .await
    }

    #[tracing::instrument(skip(self), fields(path = %path))]
    async fn delete(&self, path: &RemotePath) -> Result<(), RemoteError> {
        let url = api_url(&self.base_url, Api::Fs, path);
        self.send("delete", |http| http.delete(url.clone()), Self::read_empty)
            .await?;
        info!("Deleted remote entry");
        Ok(())
    }

    #[tracing::instrument(skip(self), fields(src = %src, dst = %dst))]
    async fn move_entry(&self, src: &RemotePath, dst: &RemotePath) -> Result<(), RemoteError> {
        self.entry_action("move", src, dst).await
    }

    #[tracing::instrument(skip(self), fields(src = %src, dst = %dst))]
    async fn copy_entry(&self, src: &RemotePath, dst: &RemotePath) -> Result<(), RemoteError> {
        self.entry_action("copy", src, dst).await
    }
}
