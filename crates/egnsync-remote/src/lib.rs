//! egnsync Remote - Egnyte file API client
//!
//! Provides the async building blocks every remote call goes through:
//! - A process-wide request budget that keeps callers under the service quota
//! - Retry with exponential backoff for throttling and transient failures
//! - Access token lifecycle with single-flight refresh
//! - An [`IRemoteStore`](egnsync_core::ports::IRemoteStore) implementation
//!
//! ## Modules
//!
//! - [`auth`] - OAuth2 refresh-token grant and keyring token storage
//! - [`client`] - HTTP client for the public file API
//! - [`rate_limit`] - Shared token-bucket request budget
//! - [`retry`] - Backoff policy
//! - [`token`] - Token manager

pub mod auth;
pub mod client;
pub mod rate_limit;
pub mod retry;
pub mod token;

pub use auth::{KeyringTokenProvider, KeyringTokenStorage, OAuthConfig, OAuthRefresher};
pub use client::EgnyteClient;
pub use rate_limit::RateBudget;
pub use retry::RetryPolicy;
pub use token::TokenManager;
