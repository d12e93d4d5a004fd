// Failure detector: decides what happens to each response

use reqwest::{StatusCode, Url};

/// Path of the login endpoint; 401s from it are never intercepted
pub const LOGIN_PATH: &str = "/api/auth/login";

/// Per-call retry bookkeeping
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestAttempt {
    /// Set once the request has been replayed after a refresh
    pub retried: bool,
    /// Access token the request was last sent with
    pub sent_with: Option<String>,
}

impl RequestAttempt {
    pub fn new(sent_with: Option<String>) -> Self {
        Self {
            retried: false,
            sent_with,
        }
    }
}

/// Outcome of classifying a response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// 2xx, hand the response to the caller
    Success,
    /// Any non-auth failure, propagate unchanged
    NonAuth,
    /// 401 from the login endpoint, propagate unchanged
    LoginFailure,
    /// 401 on the first attempt, refresh and replay
    AuthExpired,
    /// 401 after a replay, terminate the session and propagate
    AuthInvalid,
}

/// Classify a dispatched request's result
///
/// `status` is `None` when the request failed at the network level.
pub fn classify(status: Option<StatusCode>, is_login: bool, retried: bool) -> Verdict {
    let status = match status {
        Some(status) => status,
        None => return Verdict::NonAuth,
    };

    if status.is_success() {
        return Verdict::Success;
    }

    if status != StatusCode::UNAUTHORIZED {
        return Verdict::NonAuth;
    }

    if is_login {
        Verdict::LoginFailure
    } else if retried {
        Verdict::AuthInvalid
    } else {
        Verdict::AuthExpired
    }
}

/// Whether `url` targets the login endpoint
pub fn is_login_request(url: &Url) -> bool {
    url.path().trim_end_matches('/').ends_with(LOGIN_PATH)
}
