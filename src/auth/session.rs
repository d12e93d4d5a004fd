// Session lifecycle: termination and session events

use anyhow::Result;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::broadcast;

use super::credentials::CredentialStore;
use super::types::Credential;

/// Capacity of the session event channel
const EVENT_CAPACITY: usize = 16;

/// Why a session was ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationReason {
    /// The refresh call failed or the refresh token was rejected
    RefreshFailed,
    /// A request was rejected with 401 again after being retried with a fresh token
    RejectedAfterRefresh,
    /// The user signed out
    LoggedOut,
}

/// Notifications for the layer that owns navigation/re-authentication
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    LoggedIn,
    Refreshed,
    Terminated { reason: TerminationReason },
}

/// Clears credentials and tells subscribers the session is over
///
/// Every session start and end bumps a generation counter. A refresh that
/// began under one generation can only write its result back while that
/// generation is still current, so a logout or a new login during the
/// refresh is never undone by it.
#[derive(Clone)]
pub struct SessionTerminator {
    store: Arc<dyn CredentialStore>,
    generation: Arc<Mutex<u64>>,
    events: broadcast::Sender<SessionEvent>,
}

impl SessionTerminator {
    pub fn new(store: Arc<dyn CredentialStore>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            store,
            generation: Arc::new(Mutex::new(0)),
            events,
        }
    }

    fn lock_generation(&self) -> MutexGuard<'_, u64> {
        self.generation.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Subscribe to session events
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// Publish an event; having no subscribers is fine
    pub(crate) fn publish(&self, event: SessionEvent) {
        let _ = self.events.send(event);
    }

    /// Current generation together with the stored credential
    pub(crate) fn snapshot(&self) -> Result<(u64, Option<Credential>)> {
        let generation = self.lock_generation();
        let credential = self.store.get()?;
        Ok((*generation, credential))
    }

    /// Start a new session with a freshly issued credential
    pub(crate) fn establish(&self, credential: Credential) -> Result<()> {
        let mut generation = self.lock_generation();
        self.store.set(credential)?;
        *generation += 1;
        self.publish(SessionEvent::LoggedIn);
        Ok(())
    }

    /// Store a refreshed credential if `generation` is still current
    ///
    /// Returns `false` when the session ended or was replaced in the meantime;
    /// the store is left untouched in that case.
    pub(crate) fn replace(&self, generation: u64, credential: Credential) -> Result<bool> {
        let current = self.lock_generation();
        if *current != generation {
            return Ok(false);
        }

        self.store.set(credential)?;
        self.publish(SessionEvent::Refreshed);
        Ok(true)
    }

    /// End the session
    ///
    /// Idempotent: only the call that actually removes the credential emits
    /// `SessionEvent::Terminated`. Never fails.
    pub fn terminate(&self, reason: TerminationReason) {
        let mut generation = self.lock_generation();
        *generation += 1;
        self.clear(reason);
    }

    /// End the session only if it is still the one from `generation`
    pub(crate) fn terminate_if_current(&self, generation: u64, reason: TerminationReason) {
        let mut current = self.lock_generation();
        if *current != generation {
            tracing::debug!(reason = ?reason, "Session already replaced, not terminating");
            return;
        }
        *current += 1;
        self.clear(reason);
    }

    fn clear(&self, reason: TerminationReason) {
        match self.store.clear() {
            Ok(true) => {
                tracing::warn!(reason = ?reason, "Session terminated, re-authentication required");
                self.publish(SessionEvent::Terminated { reason });
            }
            Ok(false) => {
                tracing::debug!(reason = ?reason, "Session already terminated");
            }
            Err(e) => {
                tracing::error!(reason = ?reason, "Failed to clear credentials: {:#}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{Credential, MemoryCredentialStore};

    #[tokio::test]
    async fn test_terminate_clears_and_notifies_once() {
        let store = Arc::new(MemoryCredentialStore::with_credential(Credential::new(
            "a", "r",
        )));
        let terminator = SessionTerminator::new(store.clone());
        let mut events = terminator.subscribe();

        terminator.terminate(TerminationReason::RefreshFailed);
        terminator.terminate(TerminationReason::RejectedAfterRefresh);

        assert_eq!(store.get().unwrap(), None);
        assert_eq!(
            events.recv().await.unwrap(),
            SessionEvent::Terminated {
                reason: TerminationReason::RefreshFailed
            }
        );
        assert!(matches!(
            events.try_recv(),
            Err(broadcast::error::TryRecvError::Empty)
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_terminations() {
        let store = Arc::new(MemoryCredentialStore::with_credential(Credential::new(
            "a", "r",
        )));
        let terminator = SessionTerminator::new(store.clone());
        let mut events = terminator.subscribe();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let terminator = terminator.clone();
                tokio::spawn(async move {
                    terminator.terminate(TerminationReason::RefreshFailed);
                })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(store.get().unwrap(), None);
        assert!(events.try_recv().is_ok());
        assert!(events.try_recv().is_err());
    }

    #[test]
    fn test_refresh_write_after_logout_is_discarded() {
        let store = Arc::new(MemoryCredentialStore::with_credential(Credential::new(
            "a", "r",
        )));
        let terminator = SessionTerminator::new(store.clone());
        let mut events = terminator.subscribe();

        let (generation, _) = terminator.snapshot().unwrap();
        terminator.terminate(TerminationReason::LoggedOut);

        let written = terminator
            .replace(generation, Credential::new("a2", "r2"))
            .unwrap();

        assert!(!written);
        assert_eq!(store.get().unwrap(), None);
        assert_eq!(
            events.try_recv().unwrap(),
            SessionEvent::Terminated {
                reason: TerminationReason::LoggedOut
            }
        );
        assert!(events.try_recv().is_err());
    }

    #[test]
    fn test_stale_generation_leaves_new_login_alone() {
        let store = Arc::new(MemoryCredentialStore::with_credential(Credential::new(
            "a", "r",
        )));
        let terminator = SessionTerminator::new(store.clone());

        let (generation, _) = terminator.snapshot().unwrap();
        terminator
            .establish(Credential::new("login-access", "login-refresh"))
            .unwrap();

        assert!(!terminator
            .replace(generation, Credential::new("a2", "r2"))
            .unwrap());
        terminator.terminate_if_current(generation, TerminationReason::RefreshFailed);

        assert_eq!(
            store.get().unwrap(),
            Some(Credential::new("login-access", "login-refresh"))
        );
    }

    #[test]
    fn test_replace_in_current_generation() {
        let store = Arc::new(MemoryCredentialStore::with_credential(Credential::new(
            "a", "r",
        )));
        let terminator = SessionTerminator::new(store.clone());
        let mut events = terminator.subscribe();

        let (generation, credential) = terminator.snapshot().unwrap();
        assert_eq!(credential, Some(Credential::new("a", "r")));

        assert!(terminator
            .replace(generation, Credential::new("a2", "r2"))
            .unwrap());
        assert_eq!(store.get().unwrap(), Some(Credential::new("a2", "r2")));
        assert_eq!(events.try_recv().unwrap(), SessionEvent::Refreshed);
    }

    #[test]
    fn test_terminate_without_subscribers() {
        let store = Arc::new(MemoryCredentialStore::new());
        let terminator = SessionTerminator::new(store);
        terminator.terminate(TerminationReason::LoggedOut);
    }
}
