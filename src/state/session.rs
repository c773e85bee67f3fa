//! Session Store: the single writer of credential, profile and privilege state.
//!
//! SYSTEM CONTEXT
//! ==============
//! UI actions call `login`/`register`/`logout`/`refresh`; the Capability Gate
//! and any identity-aware component subscribe to [`SessionState`] through a
//! `watch` channel. The Transport Guard reaches back in through
//! [`SessionReset`] when the server rejects the credential.
//!
//! DESIGN
//! ======
//! Each combined fetch takes a generation number when issued. Logout, forced
//! logout, a new credential, and a newer fetch all advance the generation, and
//! a result is applied only if its generation is still current when it
//! arrives. The generation counter and the loading depth share one mutex
//! with the state write, so the check-then-apply is atomic with respect to
//! every other writer. Nothing is awaited while the mutex is held.

#[cfg(test)]
#[path = "session_test.rs"]
mod session_test;

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use tokio::sync::watch;

use super::gate::{CapabilityGate, Requirement};
use crate::config::LogoutPolicy;
use crate::error::{CredentialError, SessionInvalidError, TransportError};
use crate::net::api;
use crate::net::transport::{SessionReset, TransportGuard};
use crate::net::types::{AdminStatus, Credential, UserProfile};

// =============================================================================
// STATE
// =============================================================================

/// Snapshot of the session as seen by readers.
///
/// `profile` is present only with a `credential`; `is_admin` is meaningless
/// without a profile and [`SessionState::is_admin`] treats it as `false`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SessionState {
    pub credential: Option<Credential>,
    pub profile: Option<UserProfile>,
    pub is_admin: bool,
    /// True during startup rehydration or an explicit refresh.
    pub loading: bool,
}

impl SessionState {
    /// A profile has been fetched for the current credential.
    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.credential.is_some() && self.profile.is_some()
    }

    /// Privilege flag, forced to `false` without a profile.
    #[must_use]
    pub fn is_admin(&self) -> bool {
        self.is_admin && self.is_authenticated()
    }

    /// Reset to the unauthenticated baseline, keeping `loading`. Returns
    /// whether anything changed.
    fn clear_session(&mut self) -> bool {
        let changed = self.credential.is_some() || self.profile.is_some() || self.is_admin;
        self.credential = None;
        self.profile = None;
        self.is_admin = false;
        changed
    }
}

/// How a combined fetch that did not invalidate the session ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// Profile and privilege flag were written together.
    Applied,
    /// A newer operation started first; the result was dropped.
    Superseded,
    /// The fetch failed transiently and the lenient policy kept the session.
    Retained,
    /// No credential, so nothing was fetched.
    NoCredential,
}

#[derive(Debug, Default)]
struct Sequencer {
    generation: u64,
    loading_depth: usize,
}

// =============================================================================
// STORE
// =============================================================================

/// Owns the session state. Cheap to clone; clones share the same session.
#[derive(Clone)]
pub struct SessionStore {
    inner: Arc<StoreInner>,
}

struct StoreInner {
    guard: TransportGuard,
    state: watch::Sender<SessionState>,
    sequencer: Mutex<Sequencer>,
    policy: LogoutPolicy,
}

impl SessionStore {
    /// Create the store over `guard`, seeded from the durable credential with
    /// `loading = true`. Call [`SessionStore::rehydrate`] once at startup.
    #[must_use]
    pub fn new(guard: TransportGuard, policy: LogoutPolicy) -> Self {
        let credential = guard.durable_credential();
        let (state, _) = watch::channel(SessionState { credential, profile: None, is_admin: false, loading: true });
        let inner = Arc::new(StoreInner { guard, state, sequencer: Mutex::new(Sequencer::default()), policy });
        let weak: Weak<StoreInner> = Arc::downgrade(&inner);
        let target: Weak<dyn SessionReset> = weak;
        inner.guard.attach_session(target);
        Self { inner }
    }

    /// Current state.
    #[must_use]
    pub fn snapshot(&self) -> SessionState {
        self.inner.state.borrow().clone()
    }

    /// Observe state changes.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.inner.state.subscribe()
    }

    /// Gate over this store's state.
    #[must_use]
    pub fn gate(&self, requirement: Requirement) -> CapabilityGate {
        CapabilityGate::new(self.subscribe(), requirement)
    }

    /// Guard used for this session's requests, for other components that
    /// call privileged endpoints.
    #[must_use]
    pub fn transport(&self) -> &TransportGuard {
        &self.inner.guard
    }

    /// Startup: with a stored credential, run the combined fetch under
    /// `loading`; without one, clear `loading` with no network call.
    ///
    /// # Errors
    ///
    /// Returns [`SessionInvalidError`] if the stored credential did not
    /// survive the fetch; the store is logged out by then.
    pub async fn rehydrate(&self) -> Result<RefreshOutcome, SessionInvalidError> {
        let has_credential = self.inner.state.borrow().credential.is_some();
        if !has_credential {
            let seq = self.inner.lock_sequencer();
            self.inner.publish_loading(&seq);
            tracing::debug!("no stored credential; starting unauthenticated");
            return Ok(RefreshOutcome::NoCredential);
        }
        self.inner.combined_fetch(true).await
    }

    /// Log in, persist the credential, then fetch profile and privilege.
    ///
    /// A successful login can still end logged out if the follow-up fetch
    /// fails; inspect the returned state.
    ///
    /// # Errors
    ///
    /// Returns [`CredentialError`] if the server refuses the pair or the
    /// credential cannot be stored. Session state is untouched in that case.
    pub async fn login(&self, identifier: &str, secret: &str) -> Result<SessionState, CredentialError> {
        let credential = api::login(&self.inner.guard, identifier, secret).await?;
        self.establish(credential).await
    }

    /// Same contract as [`SessionStore::login`] against the registration endpoint.
    ///
    /// # Errors
    ///
    /// Returns [`CredentialError`] if registration is refused or the
    /// credential cannot be stored.
    pub async fn register(&self, identifier: &str, secret: &str) -> Result<SessionState, CredentialError> {
        let credential = api::register(&self.inner.guard, identifier, secret).await?;
        self.establish(credential).await
    }

    /// Clear the durable credential and session state. No-op when logged out.
    pub fn logout(&self) {
        let mut seq = self.inner.lock_sequencer();
        if self.inner.reset_locked(&mut seq) {
            tracing::info!("logged out");
        }
    }

    /// Re-run the combined profile/privilege fetch, e.g. after a purchase.
    ///
    /// # Errors
    ///
    /// Returns [`SessionInvalidError`] if the fetch failed and the session
    /// was reset.
    pub async fn refresh(&self) -> Result<RefreshOutcome, SessionInvalidError> {
        self.inner.combined_fetch(true).await
    }

    async fn establish(&self, credential: Credential) -> Result<SessionState, CredentialError> {
        self.inner.install_credential(credential)?;
        match self.inner.combined_fetch(false).await {
            Ok(outcome) => tracing::debug!(?outcome, "post-login profile fetch settled"),
            Err(e) => tracing::debug!(error = %e, "credential issued but session could not be established"),
        }
        Ok(self.snapshot())
    }
}

impl StoreInner {
    fn lock_sequencer(&self) -> MutexGuard<'_, Sequencer> {
        self.sequencer.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish_loading(&self, seq: &Sequencer) {
        let loading = seq.loading_depth > 0;
        self.state.send_if_modified(|s| {
            if s.loading == loading {
                return false;
            }
            s.loading = loading;
            true
        });
    }

    /// Persist and adopt a fresh credential, dropping any previous profile.
    /// `loading` settles to the current depth, so a login without a prior
    /// rehydrate does not leave it raised.
    fn install_credential(&self, credential: Credential) -> Result<(), CredentialError> {
        let mut seq = self.lock_sequencer();
        self.guard.store_credential(&credential)?;
        seq.generation += 1;
        let loading = seq.loading_depth > 0;
        self.state.send_modify(|s| {
            s.credential = Some(credential);
            s.profile = None;
            s.is_admin = false;
            s.loading = loading;
        });
        tracing::debug!(generation = seq.generation, "credential installed");
        Ok(())
    }

    /// Logout cleanup. Caller holds the sequencer. Returns whether the
    /// published state changed.
    fn reset_locked(&self, seq: &mut Sequencer) -> bool {
        seq.generation += 1;
        self.guard.clear_credential();
        let loading = seq.loading_depth > 0;
        self.state.send_if_modified(|s| {
            let cleared = s.clear_session();
            let settled = s.loading != loading;
            s.loading = loading;
            cleared || settled
        })
    }

    fn begin_fetch(&self, track_loading: bool) -> Option<u64> {
        let mut seq = self.lock_sequencer();
        let has_credential = self.state.borrow().credential.is_some();
        if !has_credential {
            return None;
        }
        seq.generation += 1;
        if track_loading {
            seq.loading_depth += 1;
            self.publish_loading(&seq);
        }
        Some(seq.generation)
    }

    async fn combined_fetch(&self, track_loading: bool) -> Result<RefreshOutcome, SessionInvalidError> {
        let Some(generation) = self.begin_fetch(track_loading) else {
            return Ok(RefreshOutcome::NoCredential);
        };
        tracing::debug!(generation, "combined profile fetch issued");

        let result = futures::future::try_join(
            api::fetch_profile(&self.guard),
            api::fetch_admin_status(&self.guard),
        )
        .await;

        self.settle(generation, track_loading, result)
    }

    fn settle(
        &self,
        generation: u64,
        track_loading: bool,
        result: Result<(UserProfile, AdminStatus), TransportError>,
    ) -> Result<RefreshOutcome, SessionInvalidError> {
        let mut seq = self.lock_sequencer();
        if track_loading {
            seq.loading_depth = seq.loading_depth.saturating_sub(1);
        }
        let current = seq.generation == generation && self.state.borrow().credential.is_some();

        let outcome = match result {
            // The guard has already reset the session for this credential.
            Err(err @ TransportError::Auth(_)) => {
                tracing::info!(generation, "session invalidated during profile fetch");
                Err(SessionInvalidError::new(err))
            }
            _ if !current => {
                tracing::debug!(generation, current = seq.generation, "discarding stale profile fetch");
                Ok(RefreshOutcome::Superseded)
            }
            Ok((profile, admin)) => {
                tracing::info!(
                    generation,
                    user_id = profile.id,
                    credits = profile.credit_balance,
                    is_admin = admin.is_admin,
                    "session profile applied"
                );
                self.state.send_modify(|s| {
                    s.profile = Some(profile);
                    s.is_admin = admin.is_admin;
                });
                Ok(RefreshOutcome::Applied)
            }
            Err(err) if self.policy == LogoutPolicy::AuthFailureOnly && !err.is_auth_failure() => {
                tracing::warn!(generation, error = %err, "profile fetch failed; keeping session");
                Ok(RefreshOutcome::Retained)
            }
            Err(err) => {
                tracing::warn!(generation, error = %err, "profile fetch failed; logging out");
                self.reset_locked(&mut seq);
                Err(SessionInvalidError::new(err))
            }
        };

        if track_loading {
            self.publish_loading(&seq);
        }
        outcome
    }
}

impl SessionReset for StoreInner {
    fn reset_session(&self, sent: &Credential) -> bool {
        let mut seq = self.lock_sequencer();
        if self.guard.durable_credential().as_ref() != Some(sent) {
            return false;
        }
        self.reset_locked(&mut seq);
        tracing::info!(generation = seq.generation, "forced logout");
        true
    }
}
