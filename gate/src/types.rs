//! Session, lifecycle-event and project DTOs shared by the gate and its adapters.
//!
//! DESIGN
//! ======
//! These types mirror the JSON shapes the hosted auth and table APIs return,
//! so adapters can deserialize straight into them. Tokens are carried as
//! plain strings but never printed: `Session` has a redacting `Debug`.

#[cfg(test)]
#[path = "types_test.rs"]
mod types_test;

use std::fmt;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};
use time::OffsetDateTime;

/// Collection holding the managed project rows.
pub const PROJECTS: &str = "projects";

/// Collection holding one row per email permitted past the gate.
pub const ALLOWED_EMAILS: &str = "allowed_emails";

// =============================================================================
// SESSION
// =============================================================================

/// Identity attached to a session.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    /// Opaque provider-assigned user id.
    pub id: String,
    /// Email the user signed in with.
    #[serde(default, deserialize_with = "null_as_empty")]
    pub email: String,
}

/// An authenticated session as issued by the identity provider.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub access_token: String,
    pub refresh_token: String,
    /// Unix seconds at which `access_token` stops being accepted.
    #[serde(default)]
    pub expires_at: Option<i64>,
    pub user: User,
}

impl Session {
    /// True when the access token expires within `margin_secs` of `now_unix`.
    ///
    /// Sessions without an expiry are treated as never expiring.
    #[must_use]
    pub fn expires_within(&self, now_unix: i64, margin_secs: i64) -> bool {
        self.expires_at
            .is_some_and(|expires_at| expires_at - now_unix <= margin_secs)
    }

    /// True when `other` belongs to the same user as `self`.
    #[must_use]
    pub fn same_user(&self, other: &Session) -> bool {
        self.user.id == other.user.id
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("access_token", &"<redacted>")
            .field("refresh_token", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .field("user", &self.user)
            .finish()
    }
}

/// Tokens carried back by an implicit-flow redirect (magic link).
#[derive(Clone, PartialEq, Eq)]
pub struct RedirectTokens {
    pub access_token: String,
    pub refresh_token: String,
    /// Absolute expiry, when the redirect carried one.
    pub expires_at: Option<i64>,
    /// Relative expiry in seconds, when the redirect carried one.
    pub expires_in: Option<i64>,
}

impl RedirectTokens {
    /// Resolve the absolute expiry, preferring `expires_at` over `expires_in`.
    #[must_use]
    pub fn resolve_expiry(&self, now_unix: i64) -> Option<i64> {
        self.expires_at
            .or_else(|| self.expires_in.map(|secs| now_unix + secs))
    }
}

impl fmt::Debug for RedirectTokens {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedirectTokens")
            .field("expires_at", &self.expires_at)
            .field("expires_in", &self.expires_in)
            .finish_non_exhaustive()
    }
}

/// Where a sign-out takes effect.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SignOutScope {
    /// Only the current client's session.
    Local,
    /// Every session of the user, on every device.
    Global,
}

impl SignOutScope {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Global => "global",
        }
    }
}

// =============================================================================
// LIFECYCLE EVENTS
// =============================================================================

/// Session lifecycle event kinds emitted by the identity provider.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuthEventKind {
    SignedIn,
    SignedOut,
    TokenRefreshed,
}

impl fmt::Display for AuthEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::SignedIn => "SIGNED_IN",
            Self::SignedOut => "SIGNED_OUT",
            Self::TokenRefreshed => "TOKEN_REFRESHED",
        })
    }
}

/// A lifecycle event paired with the session it concerns, if any.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AuthEvent {
    pub kind: AuthEventKind,
    pub session: Option<Session>,
}

impl AuthEvent {
    #[must_use]
    pub fn signed_in(session: Session) -> Self {
        Self { kind: AuthEventKind::SignedIn, session: Some(session) }
    }

    #[must_use]
    pub fn signed_out() -> Self {
        Self { kind: AuthEventKind::SignedOut, session: None }
    }

    #[must_use]
    pub fn token_refreshed(session: Session) -> Self {
        Self { kind: AuthEventKind::TokenRefreshed, session: Some(session) }
    }
}

// =============================================================================
// PROJECTS
// =============================================================================

/// A row of the `projects` collection.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    /// Store-assigned identifier (bigint or UUID on the wire).
    #[serde(deserialize_with = "deserialize_id")]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub status: Option<String>,
    pub owner_uid: String,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

/// Insert payload for a new project. The owner is never caller-supplied.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct NewProject {
    pub name: String,
    pub owner_uid: String,
}

// Phone-only identities carry `"email": null`.
fn null_as_empty<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

fn deserialize_id<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::String(s) => Ok(s),
        serde_json::Value::Number(n) => Ok(n.to_string()),
        other => Err(D::Error::custom(format!("invalid project id: {other}"))),
    }
}
