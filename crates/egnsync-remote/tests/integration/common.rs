//! Shared test helpers for remote API integration tests
//!
//! Provides a wiremock server plus an [`EgnyteClient`] wired to an
//! in-memory token provider, with retry delays shrunk so that retry
//! tests finish quickly.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use egnsync_core::domain::{AuthError, RemotePath};
use egnsync_core::ports::{ITokenProvider, Token};
use egnsync_remote::{EgnyteClient, RateBudget, RetryPolicy, TokenManager};
use wiremock::MockServer;

/// Token provider that hands out `access-0` and counts refreshes
pub struct CountingTokens {
    pub refreshes: AtomicUsize,
}

impl CountingTokens {
    pub fn refresh_count(&self) -> usize {
        self.refreshes.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl ITokenProvider for CountingTokens {
    async fn load(&self) -> Result<Option<Token>, AuthError> {
        Ok(Some(Token {
            access_token: "access-0".to_string(),
            refresh_token: Some("refresh-0".to_string()),
            expires_at: Utc::now() + chrono::Duration::hours(1),
        }))
    }

    async fn refresh(&self, _refresh_token: &str) -> Result<Token, AuthError> {
        let n = self.refreshes.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(Token {
            access_token: format!("refreshed-{n}"),
            refresh_token: Some("refresh-0".to_string()),
            expires_at: Utc::now() + chrono::Duration::hours(1),
        })
    }

    async fn persist(&self, _token: &Token) -> Result<(), AuthError> {
        Ok(())
    }
}

/// Retry policy with millisecond delays
pub fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 5,
        base_delay: Duration::from_millis(1),
        throttle_cap: Duration::from_millis(20),
        transient_cap: Duration::from_millis(10),
    }
}

/// Starts a mock server and returns a client pointed at it
pub async fn setup_remote_mock() -> (MockServer, EgnyteClient, Arc<CountingTokens>) {
    setup_remote_mock_with_budget(RateBudget::new(1000.0, None)).await
}

pub async fn setup_remote_mock_with_budget(
    budget: RateBudget,
) -> (MockServer, EgnyteClient, Arc<CountingTokens>) {
    let server = MockServer::start().await;
    let provider = Arc::new(CountingTokens {
        refreshes: AtomicUsize::new(0),
    });
    let tokens = Arc::new(TokenManager::new(
        Arc::clone(&provider) as Arc<dyn ITokenProvider>,
        Duration::from_secs(60),
    ));

    let client = EgnyteClient::with_base_url(&server.uri(), tokens, Arc::new(budget))
        .expect("valid mock base url")
        .with_retry_policy(fast_retry())
        .with_timeout(Duration::from_secs(5));

    (server, client, provider)
}

pub fn remote(path: &str) -> RemotePath {
    RemotePath::new(path.to_string()).unwrap()
}

/// Number of requests the mock server has seen
pub async fn request_count(server: &MockServer) -> usize {
    server
        .received_requests()
        .await
        .map(|r| r.len())
        .unwrap_or_default()
}
