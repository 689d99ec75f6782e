//! Sign-in redirect handling.
//!
//! SYSTEM CONTEXT
//! ==============
//! An emailed sign-in link lands the browser on the redirect URL with the
//! outcome in the fragment: either tokens
//! (`#access_token=..&refresh_token=..&expires_in=..`) or an error
//! (`#error=..&error_description=..`). The operator can paste that URL
//! into the console, or let the loopback listener receive it: `GET /`
//! serves a page that strips the fragment from the address bar with
//! `history.replaceState` and posts it to `POST /callback`, which hands the
//! parsed outcome to the console over a channel.

use std::net::SocketAddr;

use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::Html;
use axum::routing::{get, post};
use gate::{RedirectTokens, SessionGate};
use reqwest::Url;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CallbackError {
    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    #[error("redirect is missing `{0}`")]
    MissingField(&'static str),

    #[error("redirect field `{field}` is not a number: {value}")]
    InvalidNumber { field: &'static str, value: String },
}

/// What a sign-in redirect carried.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RedirectOutcome {
    Tokens(RedirectTokens),
    Error(String),
}

/// Parse a form-encoded fragment (without the leading `#`).
///
/// Returns `Ok(None)` when the fragment carries no sign-in data at all.
pub fn parse_fragment(fragment: &str) -> Result<Option<RedirectOutcome>, CallbackError> {
    let fragment = fragment.strip_prefix('#').unwrap_or(fragment);
    let mut carrier = Url::parse("http://fragment.invalid/").map_err(|e| CallbackError::InvalidUrl(e.to_string()))?;
    carrier.set_query(Some(fragment));

    let mut fields = RedirectFields::default();
    for (key, value) in carrier.query_pairs() {
        let value = value.into_owned();
        match &*key {
            "access_token" => fields.access_token = Some(value),
            "refresh_token" => fields.refresh_token = Some(value),
            "expires_in" => fields.expires_in = Some(value),
            "expires_at" => fields.expires_at = Some(value),
            "error" => fields.error = Some(value),
            "error_description" => fields.error_description = Some(value),
            _ => {}
        }
    }
    fields.into_outcome()
}

#[derive(Default)]
struct RedirectFields {
    access_token: Option<String>,
    refresh_token: Option<String>,
    expires_in: Option<String>,
    expires_at: Option<String>,
    error: Option<String>,
    error_description: Option<String>,
}

impl RedirectFields {
    fn into_outcome(self) -> Result<Option<RedirectOutcome>, CallbackError> {
        if let Some(error) = self.error {
            let description = self.error_description.filter(|d| !d.is_empty()).unwrap_or(error);
            return Ok(Some(RedirectOutcome::Error(description)));
        }
        let Some(access_token) = self.access_token.filter(|t| !t.is_empty()) else {
            return Ok(None);
        };
        let refresh_token = self
            .refresh_token
            .filter(|t| !t.is_empty())
            .ok_or(CallbackError::MissingField("refresh_token"))?;
        Ok(Some(RedirectOutcome::Tokens(RedirectTokens {
            access_token,
            refresh_token,
            expires_at: parse_number("expires_at", self.expires_at)?,
            expires_in: parse_number("expires_in", self.expires_in)?,
        })))
    }
}

fn parse_number(field: &'static str, raw: Option<String>) -> Result<Option<i64>, CallbackError> {
    raw.map(|value| {
        value
            .parse::<i64>()
            .map_err(|_| CallbackError::InvalidNumber { field, value })
    })
    .transpose()
}

/// Split an entry URL into its fragment-free form and whatever sign-in data the fragment held.
pub fn parse_entry_url(raw: &str) -> Result<(String, Option<RedirectOutcome>), CallbackError> {
    let mut url = Url::parse(raw.trim()).map_err(|e| CallbackError::InvalidUrl(format!("{raw}: {e}")))?;
    let outcome = match url.fragment() {
        Some(fragment) => parse_fragment(fragment)?,
        None => None,
    };
    url.set_fragment(None);
    Ok((url.to_string(), outcome))
}

/// Feed a redirect outcome to the gate.
pub async fn apply(gate: &SessionGate, outcome: RedirectOutcome) {
    match outcome {
        RedirectOutcome::Tokens(tokens) => {
            if let Err(e) = gate.complete_redirect(tokens).await {
                warn!(error = %e, "redirect sign-in did not complete");
            }
        }
        RedirectOutcome::Error(description) => gate.report_redirect_error(&description).await,
    }
}

// =============================================================================
// LOOPBACK LISTENER
// =============================================================================

const LANDING_PAGE: &str = r#"<!doctype html>
<html>
<head><meta charset="utf-8"><title>Moods Admin</title></head>
<body style="font-family: sans-serif; padding: 24px">
<h1>Moods Admin</h1>
<p id="status">Completing sign-in&hellip;</p>
<script>
  const fragment = window.location.hash.slice(1);
  history.replaceState(null, "", window.location.pathname + window.location.search);
  const status = document.getElementById("status");
  if (!fragment) {
    status.textContent = "Nothing to complete. Open the link from your email.";
  } else {
    fetch("/callback", { method: "POST", headers: { "content-type": "text/plain" }, body: fragment })
      .then((r) => {
        status.textContent = r.ok
          ? "Signed in. Return to the console; you can close this tab."
          : "Sign-in could not be completed. Check the console.";
      })
      .catch(() => { status.textContent = "The console is no longer listening."; });
  }
</script>
</body>
</html>
"#;

#[derive(Clone)]
pub struct CallbackState {
    tx: mpsc::Sender<RedirectOutcome>,
}

#[must_use]
pub fn router(tx: mpsc::Sender<RedirectOutcome>) -> Router {
    Router::new()
        .route("/", get(landing))
        .route("/callback", post(receive))
        .layer(TraceLayer::new_for_http())
        .with_state(CallbackState { tx })
}

/// `GET /`: the page the redirect URL points at.
async fn landing() -> Html<&'static str> {
    Html(LANDING_PAGE)
}

/// `POST /callback`: body is the raw fragment.
async fn receive(State(state): State<CallbackState>, body: String) -> StatusCode {
    let outcome = match parse_fragment(body.trim()) {
        Ok(Some(outcome)) => outcome,
        Ok(None) => {
            warn!("callback without sign-in data");
            return StatusCode::BAD_REQUEST;
        }
        Err(e) => {
            warn!(error = %e, "callback fragment rejected");
            return StatusCode::BAD_REQUEST;
        }
    };
    let accepted = matches!(outcome, RedirectOutcome::Tokens(_));
    if state.tx.send(outcome).await.is_err() {
        warn!("callback received after the console stopped listening");
        return StatusCode::SERVICE_UNAVAILABLE;
    }
    if accepted { StatusCode::ACCEPTED } else { StatusCode::UNPROCESSABLE_ENTITY }
}

/// Bind the loopback listener and serve it in the background.
///
/// # Errors
///
/// Returns the bind error if `addr` is unavailable.
pub async fn serve(
    addr: SocketAddr,
    tx: mpsc::Sender<RedirectOutcome>,
) -> std::io::Result<(SocketAddr, JoinHandle<()>)> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    let local = listener.local_addr()?;
    info!(%local, "sign-in callback listening");
    let handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, router(tx)).await {
            warn!(error = %e, "sign-in callback listener stopped");
        }
    });
    Ok((local, handle))
}

#[cfg(test)]
#[path = "callback_test.rs"]
mod tests;
