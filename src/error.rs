// Error handling module
// Defines the client error taxonomy

use std::time::Duration;
use thiserror::Error;

/// Reasons a token refresh can fail
///
/// Cloneable so the same failure can be delivered to every queued caller.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RefreshError {
    /// Server refused the refresh token
    #[error("refresh rejected: {status} - {message}")]
    Rejected { status: u16, message: String },

    /// Refresh call never produced a response
    #[error("refresh request failed: {0}")]
    Network(String),

    /// Refresh call exceeded the configured timeout
    #[error("refresh timed out after {0:?}")]
    Timeout(Duration),

    /// No refresh token is stored
    #[error("no refresh token available")]
    MissingCredential,

    /// New credential could not be persisted
    #[error("failed to store refreshed credential: {0}")]
    Storage(String),

    /// Server answered 2xx with an unusable body
    #[error("invalid refresh response: {0}")]
    InvalidResponse(String),

    /// The session was ended or replaced while the refresh was in flight
    #[error("session ended while refreshing")]
    SessionEnded,

    /// The task driving the refresh went away before resolving it
    #[error("refresh was abandoned before completing")]
    Abandoned,
}

/// Errors returned to callers of the API client
#[derive(Error, Debug)]
pub enum ApiError {
    /// Non-2xx response from the API
    #[error("API error: {status} - {message}")]
    Status { status: u16, message: String },

    /// Transport-level failure (connection, timeout, body)
    #[error("Network error: {0}")]
    Network(String),

    /// Session could not be recovered and has been terminated
    #[error("Session expired: {0}")]
    SessionExpired(#[from] RefreshError),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl ApiError {
    /// HTTP status carried by the error, if any
    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Whether the caller should treat this as "not signed in"
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, ApiError::SessionExpired(_)) || self.status() == Some(401)
    }

    /// Categorize a reqwest transport error
    pub fn from_transport(e: &reqwest::Error) -> Self {
        ApiError::Network(format!("{} (kind: {})", e, transport_error_kind(e)))
    }
}

/// Short label for a reqwest error, used in logs and messages
pub fn transport_error_kind(e: &reqwest::Error) -> &'static str {
    if e.is_timeout() {
        "timeout"
    } else if e.is_connect() {
        "connection_failed"
    } else if e.is_request() {
        "request_error"
    } else if e.is_body() {
        "body_error"
    } else if e.is_decode() {
        "decode_error"
    } else {
        "unknown"
    }
}

/// Result type alias for API operations
pub type Result<T> = std::result::Result<T, ApiError>;
