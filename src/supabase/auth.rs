//! GoTrue client: password and magic-link sign-in, refresh, sign-out.
//!
//! DESIGN
//! ======
//! The session lives in [`SessionStorage`] under `sb-<ref>-auth-token` as
//! JSON, so a restart restores it. Reading the session refreshes it first
//! when it expires within [`EXPIRY_MARGIN_SECS`]; refreshes are serialized
//! because a refresh token is single-use. Every change is announced on the
//! client's [`EventHub`].
//!
//! ERROR HANDLING
//! ==============
//! 4xx answers other than 429 become [`AuthError::Rejected`] carrying the
//! provider's message; those are what the operator sees. A rejected refresh
//! ends the session (`SIGNED_OUT`); a refresh that merely fails to reach the
//! provider keeps the current tokens.

use std::sync::Arc;

use gate::{
    AuthError, AuthEvent, EventHub, IdentityProvider, RedirectTokens, Session, SessionStorage, SignOutScope,
    Subscription, User,
};
use reqwest::Method;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info, warn};

use super::Endpoint;

/// Refresh when the access token expires within this many seconds.
pub const EXPIRY_MARGIN_SECS: i64 = 60;

pub struct GoTrueClient {
    http: reqwest::Client,
    endpoint: Endpoint,
    storage: Arc<dyn SessionStorage>,
    hub: EventHub,
    refresh_lock: tokio::sync::Mutex<()>,
}

impl GoTrueClient {
    #[must_use]
    pub fn new(http: reqwest::Client, endpoint: Endpoint, storage: Arc<dyn SessionStorage>) -> Self {
        Self { http, endpoint, storage, hub: EventHub::new(), refresh_lock: tokio::sync::Mutex::new(()) }
    }

    /// Access token of the current session, refreshed if about to expire.
    pub async fn access_token(&self) -> Option<String> {
        self.current_session().await.map(|s| s.access_token)
    }

    // -------------------------------------------------------------------------
    // Persistence
    // -------------------------------------------------------------------------

    fn load(&self) -> Option<Session> {
        let key = self.endpoint.session_key();
        let raw = match self.storage.get_item(&key) {
            Ok(raw) => raw?,
            Err(e) => {
                warn!(error = %e, "failed to read persisted session");
                return None;
            }
        };
        match serde_json::from_str(&raw) {
            Ok(session) => Some(session),
            Err(e) => {
                warn!(error = %e, "persisted session unreadable; discarding");
                if let Err(e) = self.storage.remove_item(&key) {
                    warn!(error = %e, "failed to discard persisted session");
                }
                None
            }
        }
    }

    fn persist(&self, session: &Session) -> Result<(), AuthError> {
        let raw = serde_json::to_string(session).map_err(|e| AuthError::Parse(e.to_string()))?;
        self.storage.set_item(&self.endpoint.session_key(), &raw)?;
        Ok(())
    }

    fn forget(&self) -> Result<(), AuthError> {
        self.storage.remove_item(&self.endpoint.session_key())?;
        Ok(())
    }

    /// Persist `session` and announce it.
    fn adopt(&self, session: Session, event: fn(Session) -> AuthEvent) -> Result<Session, AuthError> {
        self.persist(&session)?;
        self.hub.emit(&event(session.clone()));
        Ok(session)
    }

    // -------------------------------------------------------------------------
    // HTTP
    // -------------------------------------------------------------------------

    fn request(&self, method: Method, path: &str, bearer: &str) -> reqwest::RequestBuilder {
        self.http
            .request(method, self.endpoint.url(path))
            .header("apikey", &self.endpoint.anon_key)
            .bearer_auth(bearer)
    }

    async fn send(builder: reqwest::RequestBuilder) -> Result<String, AuthError> {
        let response = builder
            .send()
            .await
            .map_err(|e| AuthError::Request(e.to_string()))?;
        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| AuthError::Request(e.to_string()))?;
        if (200..300).contains(&status) { Ok(body) } else { Err(classify(status, &body)) }
    }

    async fn token_grant(&self, grant_type: &str, body: &impl Serialize) -> Result<Session, AuthError> {
        let builder = self
            .request(Method::POST, "/auth/v1/token", &self.endpoint.anon_key)
            .query(&[("grant_type", grant_type)])
            .json(body);
        let text = Self::send(builder).await?;
        parse_session(&text, now_unix())
    }

    async fn fetch_user(&self, access_token: &str) -> Result<User, AuthError> {
        let text = Self::send(self.request(Method::GET, "/auth/v1/user", access_token)).await?;
        serde_json::from_str(&text).map_err(|e| AuthError::Parse(e.to_string()))
    }

    async fn refresh(&self, stale: Session) -> Option<Session> {
        let _lock = self.refresh_lock.lock().await;
        // Someone else may have refreshed or signed out while we waited.
        match self.load() {
            None => return None,
            Some(current) if current.access_token != stale.access_token => return Some(current),
            Some(_) => {}
        }

        debug!(email = %stale.user.email, "refreshing access token");
        let grant = json!({ "refresh_token": stale.refresh_token });
        match self.token_grant("refresh_token", &grant).await {
            Ok(session) => match self.adopt(session, AuthEvent::token_refreshed) {
                Ok(session) => {
                    info!(email = %session.user.email, "access token refreshed");
                    Some(session)
                }
                Err(e) => {
                    warn!(error = %e, "refreshed session could not be persisted");
                    None
                }
            },
            Err(AuthError::Rejected(message)) => {
                warn!(error = %message, "refresh token rejected; session ended");
                if let Err(e) = self.forget() {
                    warn!(error = %e, "failed to remove rejected session");
                }
                self.hub.emit(&AuthEvent::signed_out());
                None
            }
            Err(e) => {
                warn!(error = %e, "token refresh failed; keeping current session");
                Some(stale)
            }
        }
    }
}

#[async_trait::async_trait]
impl IdentityProvider for GoTrueClient {
    async fn current_session(&self) -> Option<Session> {
        let session = self.load()?;
        if session.expires_within(now_unix(), EXPIRY_MARGIN_SECS) {
            self.refresh(session).await
        } else {
            Some(session)
        }
    }

    async fn sign_in_with_password(&self, email: &str, password: &str) -> Result<Session, AuthError> {
        let session = self
            .token_grant("password", &json!({ "email": email, "password": password }))
            .await?;
        info!(email = %session.user.email, "password sign-in accepted");
        self.adopt(session, AuthEvent::signed_in)
    }

    async fn sign_in_with_otp(&self, email: &str, redirect_to: Option<&str>) -> Result<(), AuthError> {
        let mut builder = self
            .request(Method::POST, "/auth/v1/otp", &self.endpoint.anon_key)
            .json(&json!({ "email": email, "create_user": true }));
        if let Some(redirect_to) = redirect_to {
            builder = builder.query(&[("redirect_to", redirect_to)]);
        }
        Self::send(builder).await?;
        Ok(())
    }

    async fn session_from_redirect(&self, tokens: RedirectTokens) -> Result<Session, AuthError> {
        let user = self.fetch_user(&tokens.access_token).await?;
        let expires_at = tokens.resolve_expiry(now_unix());
        let session = Session {
            access_token: tokens.access_token,
            refresh_token: tokens.refresh_token,
            expires_at,
            user,
        };
        info!(email = %session.user.email, "redirect session accepted");
        self.adopt(session, AuthEvent::signed_in)
    }

    async fn sign_out(&self, scope: SignOutScope) -> Result<(), AuthError> {
        let revoked = match self.load() {
            Some(session) => {
                let builder = self
                    .request(Method::POST, "/auth/v1/logout", &session.access_token)
                    .query(&[("scope", scope.as_str())]);
                match Self::send(builder).await {
                    // Already revoked or expired server-side.
                    Err(AuthError::Rejected(message)) => {
                        debug!(error = %message, "logout rejected; session already gone");
                        Ok(())
                    }
                    other => other.map(|_| ()),
                }
            }
            None => Ok(()),
        };
        self.forget()?;
        self.hub.emit(&AuthEvent::signed_out());
        revoked
    }

    fn subscribe(&self) -> Subscription {
        self.hub.subscribe()
    }

    fn storage_key_prefix(&self) -> String {
        self.endpoint.storage_key_prefix()
    }
}

// =============================================================================
// WIRE
// =============================================================================

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    expires_at: Option<i64>,
    user: User,
}

pub(crate) fn parse_session(body: &str, now_unix: i64) -> Result<Session, AuthError> {
    let token: TokenResponse = serde_json::from_str(body).map_err(|e| AuthError::Parse(e.to_string()))?;
    let expires_at = token
        .expires_at
        .or_else(|| token.expires_in.map(|secs| now_unix + secs));
    Ok(Session { access_token: token.access_token, refresh_token: token.refresh_token, expires_at, user: token.user })
}

pub(crate) fn classify(status: u16, body: &str) -> AuthError {
    let message = super::error_message(body);
    match status {
        429 => AuthError::Response { status, message },
        400..=499 => AuthError::Rejected(message),
        _ => AuthError::Response { status, message },
    }
}

fn now_unix() -> i64 {
    time::OffsetDateTime::now_utc().unix_timestamp()
}

#[cfg(test)]
#[path = "auth_test.rs"]
mod tests;
