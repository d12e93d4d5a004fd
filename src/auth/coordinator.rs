// Single-flight token refresh coordination

use reqwest::{Client, Url};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::oneshot;

use super::refresh;
use super::session::{SessionTerminator, TerminationReason};
use super::types::{token_prefix, Credential};
use crate::error::RefreshError;

type RefreshOutcome = Result<Credential, RefreshError>;

/// A caller suspended until the in-flight refresh resolves
type PendingCaller = oneshot::Sender<RefreshOutcome>;

/// Whether a refresh is in flight
///
/// The queue only exists while refreshing, so an idle coordinator never
/// holds waiters.
enum CoordinatorState {
    Idle,
    Refreshing { waiters: VecDeque<PendingCaller> },
}

/// What a caller does after inspecting the state
enum Role {
    /// A refresh already completed since the failing request was sent
    Current(Credential),
    /// Nothing to refresh with; `None` when the store could not be read
    Missing { generation: Option<u64> },
    /// Wait for the in-flight refresh
    Follower(oneshot::Receiver<RefreshOutcome>),
    /// Start the refresh for everyone
    Leader {
        generation: u64,
        refresh_token: String,
    },
}

/// Ensures at most one refresh call runs at a time
///
/// Callers that hit an expired access token all go through
/// [`RefreshCoordinator::refreshed_credential`]; the first one starts the
/// refresh, later ones queue behind it and receive the same outcome. The
/// refresh itself runs on its own task, so a caller that stops waiting
/// does not cancel it for the others.
pub struct RefreshCoordinator {
    shared: Arc<Shared>,
}

struct Shared {
    state: Mutex<CoordinatorState>,
    terminator: SessionTerminator,
    client: Client,
    base_url: Url,
    refresh_timeout: Duration,
}

impl RefreshCoordinator {
    pub fn new(
        terminator: SessionTerminator,
        client: Client,
        base_url: Url,
        refresh_timeout: Duration,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(CoordinatorState::Idle),
                terminator,
                client,
                base_url,
                refresh_timeout,
            }),
        }
    }

    /// Whether a refresh is currently in flight
    pub fn is_refreshing(&self) -> bool {
        matches!(*self.shared.lock_state(), CoordinatorState::Refreshing { .. })
    }

    /// Number of callers queued behind the in-flight refresh
    pub fn pending_callers(&self) -> usize {
        match &*self.shared.lock_state() {
            CoordinatorState::Idle => 0,
            CoordinatorState::Refreshing { waiters } => waiters.len(),
        }
    }

    /// Obtain a credential fresher than `sent_with`
    ///
    /// `sent_with` is the access token the failing request carried. On
    /// failure the session has already been terminated when this returns.
    pub async fn refreshed_credential(
        &self,
        sent_with: Option<&str>,
    ) -> Result<Credential, RefreshError> {
        match self.shared.assign_role(sent_with) {
            Role::Current(credential) => {
                tracing::debug!(
                    access_token = %token_prefix(&credential.access_token),
                    "Credential already refreshed since request was sent"
                );
                Ok(credential)
            }
            Role::Missing { generation } => {
                tracing::warn!("Cannot refresh: no credential stored");
                let terminator = &self.shared.terminator;
                match generation {
                    Some(generation) => terminator
                        .terminate_if_current(generation, TerminationReason::RefreshFailed),
                    None => terminator.terminate(TerminationReason::RefreshFailed),
                }
                Err(RefreshError::MissingCredential)
            }
            Role::Follower(rx) => rx.await.unwrap_or(Err(RefreshError::Abandoned)),
            Role::Leader {
                generation,
                refresh_token,
            } => {
                let shared = self.shared.clone();
                // Detached: dropping this future only cancels this caller's wait
                let episode = tokio::spawn(async move {
                    shared.run_episode(generation, refresh_token).await
                });
                episode.await.unwrap_or(Err(RefreshError::Abandoned))
            }
        }
    }
}

impl Shared {
    fn lock_state(&self) -> MutexGuard<'_, CoordinatorState> {
        // State transitions never panic midway, so a poisoned lock still holds a valid state
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Check-and-set under one lock acquisition
    fn assign_role(&self, sent_with: Option<&str>) -> Role {
        let mut state = self.lock_state();

        if let CoordinatorState::Refreshing { waiters } = &mut *state {
            let (tx, rx) = oneshot::channel();
            waiters.push_back(tx);
            tracing::debug!(waiters = waiters.len(), "Refresh in flight, queueing caller");
            return Role::Follower(rx);
        }

        let (generation, current) = match self.terminator.snapshot() {
            Ok(snapshot) => snapshot,
            Err(e) => {
                tracing::error!("Failed to read credentials: {:#}", e);
                return Role::Missing { generation: None };
            }
        };

        match current {
            None => Role::Missing {
                generation: Some(generation),
            },
            Some(credential) if Some(credential.access_token.as_str()) != sent_with => {
                Role::Current(credential)
            }
            Some(credential) => {
                *state = CoordinatorState::Refreshing {
                    waiters: VecDeque::new(),
                };
                Role::Leader {
                    generation,
                    refresh_token: credential.refresh_token,
                }
            }
        }
    }

    async fn run_episode(&self, generation: u64, refresh_token: String) -> RefreshOutcome {
        let episode = Episode {
            shared: self,
            resolved: false,
        };

        let outcome = match refresh::refresh_credential(
            &self.client,
            &self.base_url,
            &refresh_token,
            self.refresh_timeout,
        )
        .await
        {
            Ok(credential) => self.commit(generation, credential),
            Err(e) => Err(e),
        };

        match &outcome {
            Ok(_) => {}
            Err(RefreshError::SessionEnded) => {
                tracing::warn!("Session ended during refresh, discarding new credential");
            }
            Err(e) => {
                tracing::error!(error = %e, "Token refresh failed, ending session");
                self.terminator
                    .terminate_if_current(generation, TerminationReason::RefreshFailed);
            }
        }

        let released = episode.resolve(&outcome);
        tracing::info!(
            success = outcome.is_ok(),
            released = released,
            "Refresh episode finished"
        );

        outcome
    }

    /// Write the new credential back unless the session moved on
    fn commit(&self, generation: u64, credential: Credential) -> RefreshOutcome {
        match self.terminator.replace(generation, credential.clone()) {
            Ok(true) => Ok(credential),
            Ok(false) => Err(RefreshError::SessionEnded),
            Err(e) => Err(RefreshError::Storage(format!("{:#}", e))),
        }
    }

    /// Return to idle and hand `outcome` to every queued caller in FIFO order
    fn release(&self, outcome: &RefreshOutcome) -> usize {
        let waiters = match std::mem::replace(&mut *self.lock_state(), CoordinatorState::Idle) {
            CoordinatorState::Refreshing { waiters } => waiters,
            CoordinatorState::Idle => VecDeque::new(),
        };

        let count = waiters.len();
        for waiter in waiters {
            // A dropped receiver just means that caller stopped waiting
            let _ = waiter.send(outcome.clone());
        }
        count
    }
}

/// One refresh in flight; fails the queue if dropped unresolved
struct Episode<'a> {
    shared: &'a Shared,
    resolved: bool,
}

impl Episode<'_> {
    fn resolve(mut self, outcome: &RefreshOutcome) -> usize {
        self.resolved = true;
        self.shared.release(outcome)
    }
}

impl Drop for Episode<'_> {
    fn drop(&mut self) {
        if !self.resolved {
            tracing::warn!("Refresh abandoned before completion");
            self.shared.release(&Err(RefreshError::Abandoned));
        }
    }
}
