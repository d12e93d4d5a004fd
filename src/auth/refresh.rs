// Token refresh call

use reqwest::{Client, Url};
use std::time::Duration;

use super::types::{token_prefix, Credential, RefreshRequest, TokenResponse};
use crate::error::{transport_error_kind, RefreshError};
use crate::http_client::endpoint_url;

/// Path of the refresh endpoint, relative to the API base URL
pub const REFRESH_PATH: &str = "/api/auth/refresh";

/// Exchange a refresh token for a new credential pair
///
/// Performs exactly one `POST /api/auth/refresh`, bounded by `timeout`.
/// This call bypasses the interceptor and failure detector.
pub async fn refresh_credential(
    client: &Client,
    base_url: &Url,
    refresh_token: &str,
    timeout: Duration,
) -> Result<Credential, RefreshError> {
    let url = endpoint_url(base_url, REFRESH_PATH);

    tracing::info!(
        url = %url,
        refresh_token = %token_prefix(refresh_token),
        "Refreshing access token..."
    );

    match tokio::time::timeout(timeout, send_refresh(client, url, refresh_token)).await {
        Ok(result) => result,
        Err(_) => {
            tracing::error!(timeout = ?timeout, "Token refresh timed out");
            Err(RefreshError::Timeout(timeout))
        }
    }
}

async fn send_refresh(
    client: &Client,
    url: String,
    refresh_token: &str,
) -> Result<Credential, RefreshError> {
    let response = client
        .post(url)
        .json(&RefreshRequest { refresh_token })
        .send()
        .await
        .map_err(|e| {
            tracing::error!(
                error_kind = transport_error_kind(&e),
                error = %e,
                "Failed to send refresh request"
            );
            RefreshError::Network(e.to_string())
        })?;

    let status = response.status();
    if !status.is_success() {
        let error_text = response.text().await.unwrap_or_default();
        tracing::error!(
            status = %status,
            body = %error_text,
            "Token refresh rejected"
        );
        return Err(RefreshError::Rejected {
            status: status.as_u16(),
            message: error_text,
        });
    }

    let data: TokenResponse = response
        .json()
        .await
        .map_err(|e| RefreshError::InvalidResponse(e.to_string()))?;

    if data.token.is_empty() || data.refresh_token.is_empty() {
        return Err(RefreshError::InvalidResponse(
            "refresh response does not contain both tokens".to_string(),
        ));
    }

    tracing::info!(
        access_token = %token_prefix(&data.token),
        "Access token refreshed"
    );

    Ok(data.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;
    use serde_json::json;

    fn base(server: &mockito::ServerGuard) -> Url {
        Url::parse(&server.url()).unwrap()
    }

    #[tokio::test]
    async fn test_refresh_success() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", REFRESH_PATH)
            .match_body(Matcher::Json(json!({ "refreshToken": "old-refresh" })))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"token":"new-access","refreshToken":"new-refresh"}"#)
            .expect(1)
            .create_async()
            .await;

        let credential = refresh_credential(
            &Client::new(),
            &base(&server),
            "old-refresh",
            Duration::from_secs(5),
        )
        .await
        .unwrap();

        assert_eq!(credential, Credential::new("new-access", "new-refresh"));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_refresh_keeps_base_path_prefix() {
        let mut server = mockito::Server::new_async().await;
        let prefixed = server
            .mock("POST", "/v1/api/auth/refresh")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"token":"new-access","refreshToken":"new-refresh"}"#)
            .expect(1)
            .create_async()
            .await;
        let root = server
            .mock("POST", REFRESH_PATH)
            .with_status(404)
            .expect(0)
            .create_async()
            .await;

        let base_url = Url::parse(&format!("{}/v1/", server.url())).unwrap();
        let credential =
            refresh_credential(&Client::new(), &base_url, "old-refresh", Duration::from_secs(5))
                .await
                .unwrap();

        assert_eq!(credential.access_token, "new-access");
        prefixed.assert_async().await;
        root.assert_async().await;
    }

    #[tokio::test]
    async fn test_refresh_rejected() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", REFRESH_PATH)
            .with_status(401)
            .with_body("Invalid refresh token")
            .create_async()
            .await;

        let err = refresh_credential(
            &Client::new(),
            &base(&server),
            "expired",
            Duration::from_secs(5),
        )
        .await
        .unwrap_err();

        assert_eq!(
            err,
            RefreshError::Rejected {
                status: 401,
                message: "Invalid refresh token".to_string(),
            }
        );
    }

    #[tokio::test]
    async fn test_refresh_missing_tokens_is_invalid() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", REFRESH_PATH)
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"token":"","refreshToken":"r"}"#)
            .create_async()
            .await;

        let err = refresh_credential(
            &Client::new(),
            &base(&server),
            "refresh",
            Duration::from_secs(5),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, RefreshError::InvalidResponse(_)));
    }

    #[tokio::test]
    async fn test_refresh_network_error() {
        // Nothing listens on port 9 of localhost
        let base_url = Url::parse("http://127.0.0.1:9").unwrap();
        let err = refresh_credential(&Client::new(), &base_url, "refresh", Duration::from_secs(5))
            .await
            .unwrap_err();

        assert!(matches!(err, RefreshError::Network(_)));
    }
}
