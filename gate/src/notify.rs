//! User-visible notices and the alert surface that shows them.

use std::fmt;

/// Something the operator must see and acknowledge.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Notice {
    /// Sign-in failed; carries the provider's message.
    CredentialRejected(String),
    /// The signed-in email is not on the allow-list.
    AccessDenied,
    /// The allow-list lookup failed; access could not be verified.
    TemporaryIssue,
    /// A project list or insert failed; carries the store's message.
    RecordFailed(String),
    /// A magic link was sent.
    MagicLinkSent,
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CredentialRejected(message) | Self::RecordFailed(message) => f.write_str(message),
            Self::AccessDenied => f.write_str("Access denied: this account is not allowed to use the console."),
            Self::TemporaryIssue => {
                f.write_str("Temporary issue verifying access. Your session was kept; try again shortly.")
            }
            Self::MagicLinkSent => f.write_str("Check your email for the sign-in link."),
        }
    }
}

/// Modal alert surface. `notify` returns once the operator acknowledged it.
#[async_trait::async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, notice: Notice);
}
