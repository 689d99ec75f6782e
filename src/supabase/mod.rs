//! HTTP adapters for the hosted identity provider and record store.
//!
//! SYSTEM CONTEXT
//! ==============
//! One Supabase project backs the console. `auth` speaks the GoTrue API
//! under `/auth/v1` and implements [`gate::IdentityProvider`]; `rest` speaks
//! PostgREST under `/rest/v1` and implements [`gate::RecordStore`]. Both
//! send the project's anon key as `apikey`; record requests carry the
//! signed-in user's access token as bearer so row-level security applies.

pub mod auth;
pub mod rest;

use std::time::Duration;

pub use auth::GoTrueClient;
pub use rest::PostgrestClient;

const REQUEST_TIMEOUT_SECS: u64 = 15;
const CONNECT_TIMEOUT_SECS: u64 = 5;

/// Base URL and public key of one project.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub base_url: String,
    pub anon_key: String,
}

impl Endpoint {
    #[must_use]
    pub fn new(base_url: &str, anon_key: &str) -> Self {
        Self { base_url: base_url.trim_end_matches('/').to_owned(), anon_key: anon_key.to_owned() }
    }

    /// First label of the project host, e.g. `abcdefgh` for `https://abcdefgh.supabase.co`.
    #[must_use]
    pub fn project_ref(&self) -> String {
        reqwest::Url::parse(&self.base_url)
            .ok()
            .and_then(|url| url.host_str().map(|host| host.split('.').next().unwrap_or(host).to_owned()))
            .unwrap_or_else(|| "local".to_owned())
    }

    /// Prefix shared by every key the auth client writes to session storage.
    #[must_use]
    pub fn storage_key_prefix(&self) -> String {
        format!("sb-{}-", self.project_ref())
    }

    #[must_use]
    pub fn session_key(&self) -> String {
        format!("{}auth-token", self.storage_key_prefix())
    }

    pub(crate) fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

/// Shared HTTP client with the adapters' request and connect timeouts.
pub fn http_client() -> Result<reqwest::Client, reqwest::Error> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
        .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
        .build()
}

/// Pull a human-readable message out of an error body.
///
/// GoTrue uses `msg` or `error_description`, PostgREST uses `message`;
/// `error` is the last resort. Non-JSON bodies are returned trimmed.
pub(crate) fn error_message(body: &str) -> String {
    let fallback = || {
        let trimmed = body.trim();
        if trimmed.is_empty() { "empty response body".to_owned() } else { trimmed.to_owned() }
    };
    let Ok(json) = serde_json::from_str::<serde_json::Value>(body) else {
        return fallback();
    };
    ["msg", "error_description", "message", "error"]
        .iter()
        .find_map(|key| json.get(*key).and_then(serde_json::Value::as_str))
        .map_or_else(fallback, str::to_owned)
}

#[cfg(test)]
#[path = "mod_test.rs"]
mod tests;
