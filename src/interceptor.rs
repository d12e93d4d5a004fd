// Request interceptor: attaches the bearer credential to outgoing requests

use reqwest::header::{HeaderValue, AUTHORIZATION};
use reqwest::Request;

use crate::auth::CredentialStore;

/// Attach the stored access token, if any
///
/// Returns the token that was attached. A store that cannot be read is
/// treated as empty.
pub fn attach_stored(request: &mut Request, store: &dyn CredentialStore) -> Option<String> {
    let token = match store.get() {
        Ok(credential) => credential.map(|c| c.access_token),
        Err(e) => {
            tracing::warn!("Failed to read credentials, sending request unauthenticated: {:#}", e);
            None
        }
    };

    match token {
        Some(token) => attach(request, &token).then_some(token),
        None => None,
    }
}

/// Set `Authorization: Bearer <token>`, replacing any existing value
///
/// Returns `false` if the token cannot be represented as a header value.
pub fn attach(request: &mut Request, token: &str) -> bool {
    match HeaderValue::from_str(&format!("Bearer {}", token)) {
        Ok(mut value) => {
            value.set_sensitive(true);
            request.headers_mut().insert(AUTHORIZATION, value);
            true
        }
        Err(_) => {
            tracing::warn!("Access token contains invalid header characters, not attaching it");
            false
        }
    }
}
