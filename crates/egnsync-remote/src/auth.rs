//! OAuth2 token refresh and keyring-backed token storage
//!
//! Interactive authorization is not handled here: a refresh token is
//! obtained once out of band (see `egnsync auth set-token`) and from then
//! on only the refresh-token grant is used.
//!
//! ## Components
//!
//! - [`OAuthConfig`] - Client credentials and token endpoint
//! - [`OAuthRefresher`] - Refresh-token grant using the `oauth2` crate
//! - [`KeyringTokenStorage`] - Token set storage in the system keyring
//! - [`KeyringTokenProvider`] - [`ITokenProvider`] combining the two

use anyhow::{Context, Result};
use chrono::{Duration, Utc};
use egnsync_core::config::Config;
use egnsync_core::domain::AuthError;
use egnsync_core::ports::{ITokenProvider, Token};
use oauth2::{
    basic::BasicClient, AuthType, ClientId, ClientSecret, EndpointNotSet, EndpointSet,
    RefreshToken, RequestTokenError, TokenResponse, TokenUrl,
};
use tracing::{debug, info, warn};

/// Keyring service name for storing tokens
const KEYRING_SERVICE: &str = "egnsync";

/// Lifetime assumed when the token endpoint omits `expires_in`
const DEFAULT_TOKEN_LIFETIME_SECS: i64 = 3600;

// ============================================================================
// OAuthConfig
// ============================================================================

/// Client credentials for the refresh-token grant
#[derive(Debug, Clone)]
pub struct OAuthConfig {
    /// Application (client) ID registered with the service
    pub client_id: String,
    /// Client secret, sent in the request body
    pub client_secret: Option<String>,
    /// Token endpoint URL
    pub token_url: String,
}

impl OAuthConfig {
    pub fn new(client_id: impl Into<String>, token_url: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: None,
            token_url: token_url.into(),
        }
    }

    pub fn with_client_secret(mut self, secret: impl Into<String>) -> Self {
        self.client_secret = Some(secret.into());
        self
    }

    /// Builds the OAuth settings from the application config
    pub fn from_config(config: &Config) -> Self {
        Self {
            client_id: config.auth.client_id.clone(),
            client_secret: config.auth.client_secret.clone(),
            token_url: config.auth.token_url(&config.remote.domain),
        }
    }
}

// ============================================================================
// OAuthRefresher
// ============================================================================

type TokenClient =
    BasicClient<EndpointNotSet, EndpointNotSet, EndpointNotSet, EndpointNotSet, EndpointSet>;

/// Exchanges refresh tokens for new token sets
pub struct OAuthRefresher {
    client: TokenClient,
    http: reqwest::Client,
}

impl OAuthRefresher {
    /// Creates a refresher for the given endpoint
    pub fn new(config: &OAuthConfig) -> Result<Self> {
        let mut client = BasicClient::new(ClientId::new(config.client_id.clone()))
            .set_token_uri(TokenUrl::new(config.token_url.clone()).context("Invalid token URL")?)
            .set_auth_type(AuthType::RequestBody);
        if let Some(secret) = &config.client_secret {
            client = client.set_client_secret(ClientSecret::new(secret.clone()));
        }

        // Following redirects on the token endpoint would leak credentials
        let http = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .context("Failed to build token HTTP client")?;

        Ok(Self { client, http })
    }

    /// Refreshes an access token using a refresh token
    ///
    /// The previous refresh token is kept when the response does not rotate it.
    ///
    /// # Errors
    /// - `RefreshRejected` when the endpoint answers with an OAuth error
    /// - `Unavailable` when the endpoint cannot be reached or answers garbage
    pub async fn refresh(&self, refresh_token: &str) -> Result<Token, AuthError> {
        debug!("Requesting refresh-token grant");

        let response = self
            .client
            .exchange_refresh_token(&RefreshToken::new(refresh_token.to_string()))
            .request_async(&self.http)
            .await
            .map_err(|e| match e {
                RequestTokenError::ServerResponse(resp) => {
                    AuthError::RefreshRejected(resp.to_string())
                }
                RequestTokenError::Request(e) => AuthError::Unavailable(e.to_string()),
                RequestTokenError::Parse(e, _) => {
                    AuthError::Unavailable(format!("malformed token response: {e}"))
                }
                RequestTokenError::Other(msg) => AuthError::Unavailable(msg),
            })?;

        let expires_at = response
            .expires_in()
            .and_then(|d| Duration::from_std(d).ok())
            .map(|d| Utc::now() + d)
            .unwrap_or_else(|| Utc::now() + Duration::seconds(DEFAULT_TOKEN_LIFETIME_SECS));

        let token = Token {
            access_token: response.access_token().secret().to_string(),
            refresh_token: response
                .refresh_token()
                .map(|t| t.secret().to_string())
                .or_else(|| Some(refresh_token.to_string())),
            expires_at,
        };

        info!(expires_at = %token.expires_at, "Refreshed access token");
        Ok(token)
    }
}

// ============================================================================
// KeyringTokenStorage
// ============================================================================

/// Stores and retrieves token sets from the system keyring
///
/// Tokens are serialized as JSON under the service name "egnsync" with the
/// account domain as the username.
pub struct KeyringTokenStorage;

impl KeyringTokenStorage {
    /// Stores a token set for the given domain
    pub fn store(domain: &str, token: &Token) -> Result<()> {
        let entry = keyring::Entry::new(KEYRING_SERVICE, domain)
            .context("Failed to create keyring entry")?;

        let json = serde_json::to_string(token).context("Failed to serialize token")?;

        entry
            .set_password(&json)
            .context("Failed to store token in keyring")?;

        debug!(domain, "Stored token in keyring");
        Ok(())
    }

    /// Loads the token set for the given domain, `None` if none is stored
    pub fn load(domain: &str) -> Result<Option<Token>> {
        let entry = keyring::Entry::new(KEYRING_SERVICE, domain)
            .context("Failed to create keyring entry")?;

        match entry.get_password() {
            Ok(json) => {
                let token: Token = serde_json::from_str(&json)
                    .context("Failed to deserialize token from keyring")?;
                debug!(domain, "Loaded token from keyring");
                Ok(Some(token))
            }
            Err(keyring::Error::NoEntry) => {
                debug!(domain, "No token found in keyring");
                Ok(None)
            }
            Err(e) => Err(anyhow::Error::new(e).context("Failed to read from keyring")),
        }
    }

    /// Removes the token set for the given domain
    pub fn clear(domain: &str) -> Result<()> {
        let entry = keyring::Entry::new(KEYRING_SERVICE, domain)
            .context("Failed to create keyring entry")?;

        match entry.delete_credential() {
            Ok(()) => {
                info!(domain, "Cleared token from keyring");
                Ok(())
            }
            Err(keyring::Error::NoEntry) => {
                debug!(domain, "No token to clear");
                Ok(())
            }
            Err(e) => Err(anyhow::Error::new(e).context("Failed to delete from keyring")),
        }
    }
}

// ============================================================================
// KeyringTokenProvider
// ============================================================================

/// Token provider backed by the keyring and the OAuth token endpoint
pub struct KeyringTokenProvider {
    domain: String,
    refresher: OAuthRefresher,
}

impl KeyringTokenProvider {
    pub fn new(domain: impl Into<String>, refresher: OAuthRefresher) -> Self {
        Self {
            domain: domain.into(),
            refresher,
        }
    }

    /// Builds a provider from the application config
    pub fn from_config(config: &Config) -> Result<Self> {
        let refresher = OAuthRefresher::new(&OAuthConfig::from_config(config))?;
        Ok(Self::new(config.remote.domain.clone(), refresher))
    }
}

fn storage_error(err: impl std::fmt::Display) -> AuthError {
    AuthError::Storage(err.to_string())
}

#[async_trait::async_trait]
impl ITokenProvider for KeyringTokenProvider {
    async fn load(&self) -> Result<Option<Token>, AuthError> {
        let domain = self.domain.clone();
        tokio::task::spawn_blocking(move || KeyringTokenStorage::load(&domain))
            .await
            .map_err(storage_error)?
            .map_err(|e| storage_error(format!("{e:#}")))
    }

    async fn refresh(&self, refresh_token: &str) -> Result<Token, AuthError> {
        self.refresher.refresh(refresh_token).await
    }

    async fn persist(&self, token: &Token) -> Result<(), AuthError> {
        let domain = self.domain.clone();
        let token = token.clone();
        let result = tokio::task::spawn_blocking(move || KeyringTokenStorage::store(&domain, &token))
            .await
            .map_err(storage_error)?;
        if let Err(e) = &result {
            warn!(error = %format!("{e:#}"), "Keyring write failed");
        }
        result.map_err(|e| storage_error(format!("{e:#}")))
    }
}
