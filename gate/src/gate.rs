//! The session gate: authentication + allow-list authorization state machine.
//!
//! ARCHITECTURE
//! ============
//! ```text
//! Anonymous ──sign_in──▶ Authenticating ──ok──▶ PendingAuthorization
//!   ▲   ▲                      │ rejected              │ match
//!   │   └──────────────────────┘                       ├──────▶ Authorized
//!   │                                                  │ no match / error
//!   │                                                  ▼
//!   └──── forced global sign-out (no match) ─────── Denied
//! ```
//!
//! Every session change bumps `generation`; responses that come back for an
//! older generation are dropped instead of applied. `transitioning_out` is
//! held for the whole of a sign-out so that lifecycle events and
//! authorization checks racing with it become no-ops.
//!
//! TRADE-OFFS
//! ==========
//! A failed allow-list lookup leaves the gate in `Denied` with the session
//! intact. That keeps authorized features hidden without revoking a session
//! the allow-list never actually refused; `authorize` can be re-run.

#[cfg(test)]
#[path = "gate_test.rs"]
mod gate_test;

use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::error::GateError;
use crate::notify::{Notice, Notifier};
use crate::provider::IdentityProvider;
use crate::storage::{SessionStorage, purge_prefix};
use crate::store::{Query, RecordStore};
use crate::types::{ALLOWED_EMAILS, AuthEvent, AuthEventKind, Project, RedirectTokens, Session, SignOutScope, User};

pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 10;

/// Revoked access tokens remembered for ignoring stale lifecycle events.
const REVOKED_TOKENS_KEPT: usize = 4;

/// Tunables for the gate.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GateConfig {
    /// Upper bound on every collaborator call the gate awaits.
    pub request_timeout: Duration,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self { request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS) }
    }
}

// =============================================================================
// STATE
// =============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GateState {
    Anonymous,
    Authenticating,
    PendingAuthorization,
    Authorized,
    Denied,
}

impl GateState {
    /// True in every state that holds a session.
    #[must_use]
    pub fn has_session(self) -> bool {
        matches!(self, Self::PendingAuthorization | Self::Authorized | Self::Denied)
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Anonymous => "anonymous",
            Self::Authenticating => "authenticating",
            Self::PendingAuthorization => "pending_authorization",
            Self::Authorized => "authorized",
            Self::Denied => "denied",
        }
    }
}

impl fmt::Display for GateState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Point-in-time copy of what the UI renders.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GateView {
    pub state: GateState,
    pub user: Option<User>,
    pub projects: Vec<Project>,
}

pub(crate) struct Inner {
    pub(crate) state: GateState,
    pub(crate) session: Option<Session>,
    pub(crate) projects: Vec<Project>,
    pub(crate) generation: u64,
    /// Most recent access tokens this gate has signed out; events carrying them are stale.
    pub(crate) revoked: VecDeque<String>,
}

impl Inner {
    fn revoke(&mut self, access_token: String) {
        if self.revoked.contains(&access_token) {
            return;
        }
        if self.revoked.len() == REVOKED_TOKENS_KEPT {
            self.revoked.pop_front();
        }
        self.revoked.push_back(access_token);
    }

    /// True while `generation` is still the live, authorized session.
    pub(crate) fn is_current(&self, generation: u64) -> bool {
        self.generation == generation && self.state == GateState::Authorized
    }
}

/// Holds the sign-out flag; clears it on drop, including on cancellation.
struct TransitionGuard<'a> {
    flag: &'a AtomicBool,
}

impl<'a> TransitionGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self { flag })
    }
}

impl Drop for TransitionGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

enum Relation {
    Unrelated,
    Duplicate,
    SameUser,
    Ignored(&'static str),
}

// =============================================================================
// GATE
// =============================================================================

/// Owns authentication/authorization state and mediates record access.
pub struct SessionGate {
    pub(crate) provider: Arc<dyn IdentityProvider>,
    pub(crate) store: Arc<dyn RecordStore>,
    storage: Arc<dyn SessionStorage>,
    pub(crate) notifier: Arc<dyn Notifier>,
    config: GateConfig,
    inner: Mutex<Inner>,
    transitioning_out: AtomicBool,
}

impl SessionGate {
    #[must_use]
    pub fn new(
        provider: Arc<dyn IdentityProvider>,
        store: Arc<dyn RecordStore>,
        storage: Arc<dyn SessionStorage>,
        notifier: Arc<dyn Notifier>,
        config: GateConfig,
    ) -> Self {
        Self {
            provider,
            store,
            storage,
            notifier,
            config,
            inner: Mutex::new(Inner {
                state: GateState::Anonymous,
                session: None,
                projects: Vec::new(),
                generation: 0,
                revoked: VecDeque::with_capacity(REVOKED_TOKENS_KEPT),
            }),
            transitioning_out: AtomicBool::new(false),
        }
    }

    pub(crate) fn inner(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[must_use]
    pub fn state(&self) -> GateState {
        self.inner().state
    }

    #[must_use]
    pub fn session(&self) -> Option<Session> {
        self.inner().session.clone()
    }

    #[must_use]
    pub fn view(&self) -> GateView {
        let inner = self.inner();
        GateView {
            state: inner.state,
            user: inner.session.as_ref().map(|s| s.user.clone()),
            projects: inner.projects.clone(),
        }
    }

    /// True while a sign-out is being carried out.
    #[must_use]
    pub fn is_transitioning_out(&self) -> bool {
        self.transitioning_out.load(Ordering::Acquire)
    }

    pub(crate) async fn bounded<F: Future>(&self, fut: F) -> Option<F::Output> {
        tokio::time::timeout(self.config.request_timeout, fut)
            .await
            .ok()
    }

    pub(crate) fn timeout_message(&self, what: &str) -> String {
        format!("{what} timed out after {}s", self.config.request_timeout.as_secs())
    }

    // -------------------------------------------------------------------------
    // Startup
    // -------------------------------------------------------------------------

    /// Restore a persisted session, if any, and run the authorization check on it.
    pub async fn start(&self) -> GateState {
        match self.bounded(self.provider.current_session()).await {
            Some(Some(session)) => {
                info!(email = %session.user.email, "restored persisted session");
                if let Err(e) = self.establish(session).await {
                    debug!(error = %e, "restored session not authorized");
                }
            }
            Some(None) => debug!("no persisted session"),
            None => warn!("{}", self.timeout_message("session restore")),
        }
        self.state()
    }

    // -------------------------------------------------------------------------
    // Authentication
    // -------------------------------------------------------------------------

    /// Sign in with email + password, then authorize the resulting session.
    ///
    /// # Errors
    ///
    /// [`GateError::Credential`] if the provider rejects the credentials, or
    /// the authorization errors of [`SessionGate::authorize`].
    pub async fn sign_in(&self, email: &str, password: &str) -> Result<(), GateError> {
        let email = email.trim();
        if email.is_empty() || password.is_empty() {
            return Err(GateError::InvalidInput("email and password are required"));
        }
        let generation = self.begin_authentication()?;

        info!(%email, "signing in with password");
        let result = match self
            .bounded(self.provider.sign_in_with_password(email, password))
            .await
        {
            Some(result) => result.map_err(|e| e.to_string()),
            None => Err(self.timeout_message("sign-in")),
        };
        self.finish_authentication(generation, result).await
    }

    /// Ask the provider to email a one-time sign-in link.
    ///
    /// # Errors
    ///
    /// [`GateError::Credential`] if the provider refuses or cannot be reached.
    pub async fn request_magic_link(&self, email: &str, redirect_to: Option<&str>) -> Result<(), GateError> {
        let email = email.trim();
        if email.is_empty() {
            return Err(GateError::InvalidInput("email is required"));
        }
        if self.state() != GateState::Anonymous {
            return Err(GateError::SessionActive);
        }

        let result = match self
            .bounded(self.provider.sign_in_with_otp(email, redirect_to))
            .await
        {
            Some(result) => result.map_err(|e| e.to_string()),
            None => Err(self.timeout_message("magic link request")),
        };
        match result {
            Ok(()) => {
                info!(%email, "magic link requested");
                self.notifier.notify(Notice::MagicLinkSent).await;
                Ok(())
            }
            Err(message) => {
                warn!(%email, error = %message, "magic link request failed");
                self.notifier
                    .notify(Notice::CredentialRejected(message.clone()))
                    .await;
                Err(GateError::Credential(message))
            }
        }
    }

    /// Complete a sign-in redirect, then authorize the resulting session.
    ///
    /// # Errors
    ///
    /// Same as [`SessionGate::sign_in`].
    pub async fn complete_redirect(&self, tokens: RedirectTokens) -> Result<(), GateError> {
        let generation = self.begin_authentication()?;
        info!("completing sign-in redirect");
        let result = match self
            .bounded(self.provider.session_from_redirect(tokens))
            .await
        {
            Some(result) => result.map_err(|e| e.to_string()),
            None => Err(self.timeout_message("redirect sign-in")),
        };
        self.finish_authentication(generation, result).await
    }

    /// Surface an error the provider reported through a redirect.
    pub async fn report_redirect_error(&self, description: &str) {
        warn!(error = %description, "sign-in redirect carried an error");
        self.notifier
            .notify(Notice::CredentialRejected(description.to_owned()))
            .await;
    }

    fn begin_authentication(&self) -> Result<u64, GateError> {
        let mut inner = self.inner();
        if inner.state != GateState::Anonymous {
            return Err(GateError::SessionActive);
        }
        inner.state = GateState::Authenticating;
        Ok(inner.generation)
    }

    /// Apply a sign-in response, unless the gate moved on while it was in flight.
    async fn finish_authentication(&self, generation: u64, result: Result<Session, String>) -> Result<(), GateError> {
        let relevant = {
            let inner = self.inner();
            inner.state == GateState::Authenticating && inner.generation == generation
        };
        match result {
            Ok(session) if relevant => self.establish(session).await,
            Ok(session) => {
                debug!(email = %session.user.email, "sign-in completed after the gate moved on; session discarded");
                self.discard_late_session(session).await;
                Err(GateError::Superseded)
            }
            Err(message) if relevant => {
                self.inner().state = GateState::Anonymous;
                warn!(error = %message, "sign-in rejected");
                self.notifier
                    .notify(Notice::CredentialRejected(message.clone()))
                    .await;
                Err(GateError::Credential(message))
            }
            Err(message) => {
                debug!(error = %message, "sign-in failed after the gate moved on; ignored");
                Err(GateError::Superseded)
            }
        }
    }

    /// The provider may already have persisted a session the gate no longer
    /// wants. Revoke it so its lifecycle events are ignored, and end it locally
    /// unless another session has taken its place.
    async fn discard_late_session(&self, session: Session) {
        let vacant = {
            let mut inner = self.inner();
            inner.revoke(session.access_token);
            inner.session.is_none() && inner.state == GateState::Anonymous
        };
        if !vacant {
            return;
        }
        let Some(_guard) = TransitionGuard::acquire(&self.transitioning_out) else {
            return;
        };
        match self.bounded(self.provider.sign_out(SignOutScope::Local)).await {
            Some(Ok(())) => debug!("late session signed out"),
            Some(Err(e)) => warn!(error = %e, "failed to sign out late session"),
            None => warn!("{}", self.timeout_message("sign-out")),
        }
        self.clear_local();
    }

    async fn establish(&self, session: Session) -> Result<(), GateError> {
        {
            let mut inner = self.inner();
            inner.generation += 1;
            inner.session = Some(session);
            inner.projects.clear();
            inner.state = GateState::PendingAuthorization;
        }
        self.authorize().await
    }

    // -------------------------------------------------------------------------
    // Authorization
    // -------------------------------------------------------------------------

    /// Check the current session's email against the allow-list.
    ///
    /// Callable again after a transient failure to retry.
    ///
    /// # Errors
    ///
    /// - [`GateError::AuthorizationDenied`]: no entry; the session was revoked globally.
    /// - [`GateError::AuthorizationUnavailable`]: lookup failed; session kept, state `Denied`.
    /// - [`GateError::NotAuthorized`]: no session, or a sign-out is already in progress.
    /// - [`GateError::Superseded`]: the session changed while the lookup was in flight.
    pub async fn authorize(&self) -> Result<(), GateError> {
        if self.is_transitioning_out() {
            debug!("sign-out in progress; authorization check skipped");
            return Err(GateError::NotAuthorized);
        }

        let (email, generation) = {
            let mut inner = self.inner();
            let Some(session) = &inner.session else {
                return Err(GateError::NotAuthorized);
            };
            let email = session.user.email.clone();
            inner.state = GateState::PendingAuthorization;
            (email, inner.generation)
        };

        let query = Query::all().eq("email", &email).limit(1);
        let lookup = match self
            .bounded(self.store.query(ALLOWED_EMAILS, &query))
            .await
        {
            Some(result) => result.map(|rows| !rows.is_empty()).map_err(|e| e.to_string()),
            None => Err(self.timeout_message("allow-list lookup")),
        };

        {
            let mut inner = self.inner();
            if inner.generation != generation || inner.session.is_none() {
                debug!(%email, "session changed during authorization check; result dropped");
                return Err(GateError::Superseded);
            }
            inner.state = if lookup == Ok(true) { GateState::Authorized } else { GateState::Denied };
        }

        match lookup {
            Ok(true) => {
                info!(%email, "session authorized");
                Ok(())
            }
            Ok(false) => {
                warn!(%email, "email not on allow-list");
                self.deny().await
            }
            Err(message) => {
                warn!(%email, error = %message, "allow-list lookup failed; session kept");
                self.notifier.notify(Notice::TemporaryIssue).await;
                Err(GateError::AuthorizationUnavailable(message))
            }
        }
    }

    async fn deny(&self) -> Result<(), GateError> {
        let Some(_guard) = TransitionGuard::acquire(&self.transitioning_out) else {
            debug!("denial already being handled");
            return Err(GateError::NotAuthorized);
        };
        self.notifier.notify(Notice::AccessDenied).await;
        self.terminate(SignOutScope::Global).await;
        Err(GateError::AuthorizationDenied)
    }

    // -------------------------------------------------------------------------
    // Sign-out
    // -------------------------------------------------------------------------

    /// Explicit sign-out of this client.
    pub async fn sign_out(&self) {
        let Some(_guard) = TransitionGuard::acquire(&self.transitioning_out) else {
            debug!("sign-out already in progress");
            return;
        };
        self.terminate(SignOutScope::Local).await;
    }

    async fn terminate(&self, scope: SignOutScope) {
        let had_session = self.inner().session.is_some();
        if had_session {
            match self.bounded(self.provider.sign_out(scope)).await {
                Some(Ok(())) => info!(scope = scope.as_str(), "signed out"),
                Some(Err(e)) => {
                    warn!(error = %e, scope = scope.as_str(), "provider sign-out failed; clearing locally anyway");
                }
                None => warn!("{}; clearing local state anyway", self.timeout_message("sign-out")),
            }
        }
        self.clear_local();
    }

    /// Drop cached user/project state and erase the provider's persisted keys.
    fn clear_local(&self) {
        {
            let mut inner = self.inner();
            let previous = inner.session.take();
            if let Some(session) = previous {
                inner.revoke(session.access_token);
            }
            inner.projects.clear();
            inner.state = GateState::Anonymous;
            inner.generation += 1;
        }

        let prefix = self.provider.storage_key_prefix();
        match purge_prefix(self.storage.as_ref(), &prefix) {
            Ok(0) => {}
            Ok(removed) => debug!(removed, %prefix, "erased persisted session artifacts"),
            Err(e) => warn!(error = %e, %prefix, "failed to erase persisted session artifacts"),
        }
    }

    // -------------------------------------------------------------------------
    // Lifecycle events
    // -------------------------------------------------------------------------

    /// React to a provider lifecycle event.
    pub async fn handle_event(&self, event: AuthEvent) {
        debug!(event = %event.kind, "auth event received");
        if self.is_transitioning_out() {
            debug!(event = %event.kind, "event ignored during sign-out");
            return;
        }

        match (event.kind, event.session) {
            (AuthEventKind::SignedOut, _) => {
                if self.inner().session.is_some() {
                    info!("session ended by provider");
                }
                self.clear_local();
            }
            (kind @ (AuthEventKind::SignedIn | AuthEventKind::TokenRefreshed), Some(session)) => {
                self.adopt(kind, session).await;
            }
            (kind, None) => debug!(event = %kind, "event without session ignored"),
        }
    }

    async fn adopt(&self, kind: AuthEventKind, session: Session) {
        let relation = {
            let mut inner = self.inner();
            let relation = if inner.revoked.contains(&session.access_token) {
                Relation::Ignored("session was revoked")
            } else if inner.state == GateState::Authenticating {
                Relation::Ignored("sign-in in flight")
            } else {
                match &inner.session {
                    None => Relation::Unrelated,
                    Some(current) if current.access_token == session.access_token => Relation::Duplicate,
                    Some(current) if current.same_user(&session) => Relation::SameUser,
                    Some(_) => Relation::Unrelated,
                }
            };
            if matches!(relation, Relation::SameUser) {
                inner.session = Some(session.clone());
            }
            relation
        };

        match relation {
            Relation::Ignored(reason) => debug!(event = %kind, reason, "event ignored"),
            Relation::Duplicate => debug!(event = %kind, "event for current session"),
            Relation::SameUser => debug!(event = %kind, "session tokens updated"),
            Relation::Unrelated => {
                info!(event = %kind, email = %session.user.email, "adopting session from provider");
                if let Err(e) = self.establish(session).await {
                    debug!(error = %e, "adopted session not authorized");
                }
            }
        }
    }
}
