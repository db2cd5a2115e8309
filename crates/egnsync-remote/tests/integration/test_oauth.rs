//! Integration tests for the refresh-token grant

use egnsync_core::domain::AuthError;
use egnsync_remote::{OAuthConfig, OAuthRefresher};
use wiremock::{
    matchers::{body_string_contains, method, path},
    Mock, MockServer, ResponseTemplate,
};

async fn refresher(server: &MockServer) -> OAuthRefresher {
    let config = OAuthConfig::new("client-1", format!("{}/puboauth/token", server.uri()))
        .with_client_secret("s3cret");
    OAuthRefresher::new(&config).unwrap()
}

#[tokio::test]
async fn test_refresh_keeps_unrotated_refresh_token() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/puboauth/token"))
        .and(body_string_contains("grant_type=refresh_token"))
        .and(body_string_contains("refresh_token=refresh-0"))
        .and(body_string_contains("client_secret=s3cret"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "access_token": "access-new",
            "token_type": "bearer",
            "expires_in": 3600
        })))
        .expect(1)
        .mount(&server)
        .await;

    let token = refresher(&server).await.refresh("refresh-0").await.unwrap();
    assert_eq!(token.access_token, "access-new");
    assert_eq!(token.refresh_token.as_deref(), Some("refresh-0"));
    assert!(!token.is_expired());
}

#[tokio::test]
async fn test_invalid_grant_is_rejected() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/puboauth/token"))
        .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
            "error": "invalid_grant",
            "error_description": "refresh token revoked"
        })))
        .mount(&server)
        .await;

    let err = refresher(&server).await.refresh("revoked").await.unwrap_err();
    assert!(matches!(err, AuthError::RefreshRejected(_)), "{err:?}");
    assert!(!err.is_transient());
}

#[tokio::test]
async fn test_unreachable_endpoint_is_unavailable() {
    // Nothing listens on the discard port
    let config = OAuthConfig::new("client-1", "http://127.0.0.1:9/puboauth/token");
    let err = OAuthRefresher::new(&config)
        .unwrap()
        .refresh("refresh-0")
        .await
        .unwrap_err();
    assert!(err.is_transient(), "{err:?}");
}
