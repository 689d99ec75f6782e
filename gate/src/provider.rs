//! Identity provider seam and lifecycle-event fan-out.
//!
//! DESIGN
//! ======
//! Providers broadcast lifecycle events through an [`EventHub`]. Each
//! subscriber gets its own unbounded channel; the returned [`Subscription`]
//! unregisters itself on drop, so a listener's lifetime is exactly the
//! lifetime of the value that owns it.

#[cfg(test)]
#[path = "provider_test.rs"]
mod provider_test;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use tokio::sync::mpsc;

use crate::error::AuthError;
use crate::types::{AuthEvent, RedirectTokens, Session, SignOutScope};

/// Hosted authentication service as seen by the gate.
#[async_trait::async_trait]
pub trait IdentityProvider: Send + Sync {
    /// The currently persisted session, if it is still usable.
    ///
    /// Implementations may refresh an expiring token here (emitting
    /// `TOKEN_REFRESHED`) or drop a session the provider no longer accepts
    /// (emitting `SIGNED_OUT`).
    async fn current_session(&self) -> Option<Session>;

    /// Exchange email + password for a session. Emits `SIGNED_IN` on success.
    ///
    /// # Errors
    ///
    /// [`AuthError::Rejected`] when the credentials are refused.
    async fn sign_in_with_password(&self, email: &str, password: &str) -> Result<Session, AuthError>;

    /// Send a one-time sign-in link to `email`.
    ///
    /// # Errors
    ///
    /// Returns an error if the provider refuses or cannot be reached.
    async fn sign_in_with_otp(&self, email: &str, redirect_to: Option<&str>) -> Result<(), AuthError>;

    /// Validate tokens carried back by a sign-in redirect and persist them.
    /// Emits `SIGNED_IN` on success.
    ///
    /// # Errors
    ///
    /// [`AuthError::Rejected`] when the provider does not accept the tokens.
    async fn session_from_redirect(&self, tokens: RedirectTokens) -> Result<Session, AuthError>;

    /// Revoke the session and drop it from storage. Emits `SIGNED_OUT`.
    ///
    /// # Errors
    ///
    /// Returns an error if revocation fails; local state is dropped regardless.
    async fn sign_out(&self, scope: SignOutScope) -> Result<(), AuthError>;

    /// Register a lifecycle-event listener.
    fn subscribe(&self) -> Subscription;

    /// Prefix shared by every storage key this provider persists.
    fn storage_key_prefix(&self) -> String;
}

// =============================================================================
// EVENT HUB
// =============================================================================

type Listeners = Mutex<HashMap<u64, mpsc::UnboundedSender<AuthEvent>>>;

/// Fan-out registry for lifecycle events.
#[derive(Default)]
pub struct EventHub {
    next_id: AtomicU64,
    listeners: Arc<Listeners>,
}

impl EventHub {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new listener.
    #[must_use]
    pub fn subscribe(&self) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();
        lock(&self.listeners).insert(id, tx);
        tracing::debug!(listener = id, "auth listener registered");
        Subscription { id, rx, listeners: Arc::downgrade(&self.listeners) }
    }

    /// Deliver `event` to every live listener, pruning closed ones.
    pub fn emit(&self, event: &AuthEvent) {
        let mut listeners = lock(&self.listeners);
        listeners.retain(|_, tx| tx.send(event.clone()).is_ok());
        tracing::debug!(event = %event.kind, listeners = listeners.len(), "auth event emitted");
    }

    #[must_use]
    pub fn listener_count(&self) -> usize {
        lock(&self.listeners).len()
    }
}

fn lock(listeners: &Listeners) -> std::sync::MutexGuard<'_, HashMap<u64, mpsc::UnboundedSender<AuthEvent>>> {
    listeners
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
}

/// A registered lifecycle listener. Dropping it unregisters the listener.
pub struct Subscription {
    id: u64,
    rx: mpsc::UnboundedReceiver<AuthEvent>,
    listeners: Weak<Listeners>,
}

impl Subscription {
    /// Wait for the next event. `None` once the provider is gone.
    pub async fn recv(&mut self) -> Option<AuthEvent> {
        self.rx.recv().await
    }

    /// Take the next already-delivered event without waiting.
    pub fn try_recv(&mut self) -> Option<AuthEvent> {
        self.rx.try_recv().ok()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(listeners) = self.listeners.upgrade() {
            lock(&listeners).remove(&self.id);
            tracing::debug!(listener = self.id, "auth listener unregistered");
        }
    }
}
