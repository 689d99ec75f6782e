//! Session gate for the moods admin console.
//!
//! SYSTEM CONTEXT
//! ==============
//! The console talks to two hosted collaborators: an identity provider
//! (sessions, lifecycle events) and a record store (the `projects` and
//! `allowed_emails` collections). This crate owns the only stateful logic in
//! between: deciding whether the signed-in user may use the console, and
//! refusing record access until that is settled.
//!
//! Collaborators are reached through the [`IdentityProvider`],
//! [`RecordStore`], [`SessionStorage`] and [`Notifier`] traits so the state
//! machine can be driven by in-memory fakes in tests and by HTTP adapters in
//! the binary.

pub mod error;
pub mod gate;
pub mod notify;
pub mod projects;
pub mod provider;
pub mod storage;
pub mod store;
pub mod types;

#[cfg(test)]
pub(crate) mod test_helpers;

pub use error::{AuthError, GateError, StorageError, StoreError};
pub use gate::{GateConfig, GateState, GateView, SessionGate};
pub use notify::{Notice, Notifier};
pub use provider::{EventHub, IdentityProvider, Subscription};
pub use storage::{MemoryStorage, SessionStorage, purge_prefix};
pub use store::{Filter, Order, Query, Record, RecordStore};
pub use types::{
    ALLOWED_EMAILS, AuthEvent, AuthEventKind, NewProject, PROJECTS, Project, RedirectTokens, Session, SignOutScope,
    User,
};
