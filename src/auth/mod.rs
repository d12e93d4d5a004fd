// Authentication module
// Manages the credential lifecycle: storage, refresh, termination

mod coordinator;
mod credentials;
mod refresh;
mod session;
mod types;

pub use coordinator::RefreshCoordinator;
pub use credentials::{CredentialStore, MemoryCredentialStore, SqliteCredentialStore};
pub use refresh::REFRESH_PATH;
pub use session::{SessionEvent, SessionTerminator, TerminationReason};
pub use types::{token_prefix, Credential, LoginRequest, TokenResponse};
