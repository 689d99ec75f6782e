//! Background token refresh.
//!
//! Reading the provider's session refreshes it when close to expiry, so the
//! task only has to read it on a fixed cadence. Resulting `TOKEN_REFRESHED`
//! or `SIGNED_OUT` events reach the gate through the console's event pump.

use std::sync::Arc;
use std::time::Duration;

use gate::IdentityProvider;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

/// Spawn the refresh loop. Abort the handle to stop it.
pub fn spawn_refresh_task(provider: Arc<dyn IdentityProvider>, interval: Duration) -> JoinHandle<()> {
    info!(interval_secs = interval.as_secs(), "token refresh configured");
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // The first tick completes immediately; startup already reads the session.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let signed_in = provider.current_session().await.is_some();
            debug!(signed_in, "session checked for refresh");
        }
    })
}

#[cfg(test)]
#[path = "refresh_test.rs"]
mod tests;
