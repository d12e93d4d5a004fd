use anyhow::Context;
use reqwest::{Client, Method, Request, RequestBuilder, Response, Url};
use serde::{de::DeserializeOwned, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

use crate::auth::{
    token_prefix, CredentialStore, LoginRequest, RefreshCoordinator, SessionEvent,
    SessionTerminator, TerminationReason, TokenResponse,
};
use crate::error::{transport_error_kind, ApiError, Result};
use crate::failure::{self, RequestAttempt, Verdict, LOGIN_PATH};
use crate::interceptor;

/// Transport settings for [`ApiClient`]
#[derive(Debug, Clone)]
pub struct ClientSettings {
    pub max_connections: usize,
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
    /// Upper bound for a single refresh call
    pub refresh_timeout: Duration,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            max_connections: 20,
            connect_timeout: Duration::from_secs(30),
            request_timeout: Duration::from_secs(300),
            refresh_timeout: Duration::from_secs(30),
        }
    }
}

/// HTTP client for the TravelQuest API
///
/// Every call goes through the same pipeline:
/// - the stored access token is attached as a bearer credential
/// - a 401 on a non-login endpoint triggers one shared refresh and a single replay
/// - a 401 after that replay, or a failed refresh, ends the session
/// - everything else is returned to the caller unchanged
pub struct ApiClient {
    /// Shared HTTP client with connection pooling
    client: Client,

    /// API root, e.g. `http://localhost:8080`
    base_url: Url,

    store: Arc<dyn CredentialStore>,

    coordinator: RefreshCoordinator,

    terminator: SessionTerminator,
}

impl ApiClient {
    /// Create a new API client
    pub fn new(
        base_url: &str,
        store: Arc<dyn CredentialStore>,
        settings: ClientSettings,
    ) -> anyhow::Result<Self> {
        let base_url =
            Url::parse(base_url).with_context(|| format!("Invalid API base URL: {}", base_url))?;

        let client = Client::builder()
            .pool_max_idle_per_host(settings.max_connections)
            .connect_timeout(settings.connect_timeout)
            .timeout(settings.request_timeout)
            .build()
            .context("Failed to create HTTP client")?;

        let terminator = SessionTerminator::new(store.clone());
        let coordinator = RefreshCoordinator::new(
            terminator.clone(),
            client.clone(),
            base_url.clone(),
            settings.refresh_timeout,
        );

        Ok(Self {
            client,
            base_url,
            store,
            coordinator,
            terminator,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Whether a session credential is stored
    pub fn is_logged_in(&self) -> bool {
        matches!(self.store.get(), Ok(Some(_)))
    }

    /// Subscribe to login, refresh and termination notifications
    pub fn session_events(&self) -> broadcast::Receiver<SessionEvent> {
        self.terminator.subscribe()
    }

    /// Absolute URL for an API path
    fn url(&self, path: &str) -> String {
        endpoint_url(&self.base_url, path)
    }

    /// Start building a request to `path`; send it with [`ApiClient::send`]
    pub fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.client.request(method, self.url(path))
    }

    /// Build and execute a request
    pub async fn send(&self, builder: RequestBuilder) -> Result<Response> {
        let request = builder
            .build()
            .map_err(|e| ApiError::Internal(anyhow::Error::new(e).context("Invalid request")))?;
        self.execute(request).await
    }

    /// GET `path` and decode the JSON body
    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let response = self.send(self.request(Method::GET, path)).await?;
        decode(response).await
    }

    /// POST a JSON body to `path` and decode the JSON response
    pub async fn post_json<B, T>(&self, path: &str, body: &B) -> Result<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let response = self.send(self.request(Method::POST, path).json(body)).await?;
        decode(response).await
    }

    /// Sign in and store the returned credential pair
    ///
    /// A 401 here means bad credentials and is returned as-is.
    pub async fn login(&self, email: &str, password: &str) -> Result<()> {
        tracing::info!(email = %email, "Logging in...");

        let tokens: TokenResponse = self
            .post_json(LOGIN_PATH, &LoginRequest { email, password })
            .await?;

        self.terminator
            .establish(tokens.into())
            .context("Failed to store credentials")?;

        tracing::info!("Login successful");
        Ok(())
    }

    /// Sign out locally
    pub fn logout(&self) {
        self.terminator.terminate(TerminationReason::LoggedOut);
    }

    /// Profile of the signed-in user
    pub async fn current_user(&self) -> Result<serde_json::Value> {
        self.get_json("/api/users/me").await
    }

    /// Execute a request through the auth pipeline
    pub async fn execute(&self, mut request: Request) -> Result<Response> {
        let request_id = uuid::Uuid::new_v4().to_string()[..8].to_string();
        let method = request.method().clone();
        let url = request.url().clone();
        let is_login = failure::is_login_request(&url);

        let sent_with = interceptor::attach_stored(&mut request, self.store.as_ref());
        let mut attempt = RequestAttempt::new(sent_with);

        tracing::debug!(
            request_id = %request_id,
            method = %method,
            url = %url,
            authenticated = attempt.sent_with.is_some(),
            "Sending HTTP request"
        );

        loop {
            // The original stays in hand for a possible replay
            let req = request.try_clone().ok_or_else(|| {
                ApiError::Internal(anyhow::anyhow!("Request body is not cloneable"))
            })?;

            let result = self.client.execute(req).await;
            let status = result.as_ref().ok().map(|response| response.status());

            match failure::classify(status, is_login, attempt.retried) {
                Verdict::Success => {
                    tracing::debug!(
                        request_id = %request_id,
                        status = ?status,
                        retried = attempt.retried,
                        "Request successful"
                    );
                    return result.map_err(|e| ApiError::from_transport(&e));
                }

                Verdict::NonAuth | Verdict::LoginFailure => {
                    return Err(propagate(&request_id, &url, result).await);
                }

                Verdict::AuthInvalid => {
                    tracing::warn!(
                        request_id = %request_id,
                        url = %url,
                        "Received 401 again after refresh, ending session"
                    );
                    self.terminator
                        .terminate(TerminationReason::RejectedAfterRefresh);
                    return Err(propagate(&request_id, &url, result).await);
                }

                Verdict::AuthExpired => {
                    tracing::warn!(
                        request_id = %request_id,
                        url = %url,
                        "Received 401, refreshing token and retrying..."
                    );
                    attempt.retried = true;

                    let credential = self
                        .coordinator
                        .refreshed_credential(attempt.sent_with.as_deref())
                        .await?;

                    tracing::debug!(
                        request_id = %request_id,
                        access_token = %token_prefix(&credential.access_token),
                        "Replaying request with refreshed token"
                    );
                    if !interceptor::attach(&mut request, &credential.access_token) {
                        return Err(ApiError::Internal(anyhow::anyhow!(
                            "Refreshed access token is not a valid header value"
                        )));
                    }
                    attempt.sent_with = Some(credential.access_token);
                }
            }
        }
    }
}

/// Join an API path onto the base URL, keeping any path prefix the base has
pub(crate) fn endpoint_url(base_url: &Url, path: &str) -> String {
    let base = base_url.as_str().trim_end_matches('/');
    if path.starts_with('/') {
        format!("{}{}", base, path)
    } else {
        format!("{}/{}", base, path)
    }
}

/// Turn a failed outcome into the error the caller sees
async fn propagate(
    request_id: &str,
    url: &Url,
    result: std::result::Result<Response, reqwest::Error>,
) -> ApiError {
    match result {
        Ok(response) => {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();

            tracing::warn!(
                request_id = %request_id,
                status = status.as_u16(),
                url = %url,
                response_body = %error_text,
                "HTTP request failed with error response"
            );

            ApiError::Status {
                status: status.as_u16(),
                message: error_text,
            }
        }
        Err(e) => {
            tracing::warn!(
                request_id = %request_id,
                error_kind = transport_error_kind(&e),
                error = %e,
                url = %url,
                "HTTP request error"
            );
            ApiError::from_transport(&e)
        }
    }
}

async fn decode<T: DeserializeOwned>(response: Response) -> Result<T> {
    response.json().await.map_err(|e| {
        ApiError::Internal(anyhow::Error::new(e).context("Failed to parse response body"))
    })
}
