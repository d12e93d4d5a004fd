// TravelQuest API client - library root

pub mod auth;
pub mod config;
pub mod error;
pub mod failure;
pub mod http_client;
pub mod interceptor;

#[cfg(test)]
mod testutil;

pub use auth::{Credential, CredentialStore, SessionEvent, TerminationReason};
pub use error::{ApiError, RefreshError};
pub use http_client::{ApiClient, ClientSettings};
