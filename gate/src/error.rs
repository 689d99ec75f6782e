//! Error taxonomy for the gate and its collaborators.
//!
//! ERROR HANDLING
//! ==============
//! Collaborator errors (`AuthError`, `StoreError`, `StorageError`) describe
//! what went wrong at a boundary. `GateError` describes what the gate did
//! about it. A denied allow-list lookup and a failed one are separate
//! variants and must stay that way: only the former signs the user out.

/// Errors reported by an identity provider.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    /// The provider refused the credentials or token; carries its message.
    #[error("{0}")]
    Rejected(String),

    /// The request never produced a response.
    #[error("auth request failed: {0}")]
    Request(String),

    /// The provider answered with an unexpected status.
    #[error("auth response error: status {status}: {message}")]
    Response { status: u16, message: String },

    /// The response body could not be decoded.
    #[error("auth response parse failed: {0}")]
    Parse(String),

    /// Persisting or reading the session failed.
    #[error("session storage failed: {0}")]
    Storage(#[from] StorageError),
}

/// Errors reported by a record store.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// The request never produced a response (network, timeout).
    #[error("store request failed: {0}")]
    Request(String),

    /// The store answered with a non-success status.
    #[error("store response error: status {status}: {message}")]
    Response { status: u16, message: String },

    /// A row could not be encoded or decoded.
    #[error("store payload invalid: {0}")]
    Parse(String),
}

/// Errors reported by persisted session storage.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StorageError {
    #[error("storage io failed: {0}")]
    Io(String),

    #[error("storage contents corrupt: {0}")]
    Corrupt(String),
}

/// Outcome errors of gate operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GateError {
    /// Sign-in was rejected or could not complete; the gate is anonymous.
    #[error("sign-in failed: {0}")]
    Credential(String),

    /// The allow-list has no entry for the session; the session was revoked.
    #[error("access denied")]
    AuthorizationDenied,

    /// The allow-list lookup itself failed; the session is kept.
    #[error("authorization check unavailable: {0}")]
    AuthorizationUnavailable(String),

    /// Listing or inserting records failed; cached state is untouched.
    #[error("record operation failed: {0}")]
    Record(#[from] StoreError),

    /// The operation requires a state the gate is not in.
    #[error("not authorized")]
    NotAuthorized,

    /// A session is already active.
    #[error("already signed in")]
    SessionActive,

    /// The session changed while the operation was in flight; its result was dropped.
    #[error("session changed before the operation completed")]
    Superseded,

    /// Required caller input was empty.
    #[error("invalid input: {0}")]
    InvalidInput(&'static str),
}
