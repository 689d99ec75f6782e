//! Console configuration parsed from environment variables.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use gate::gate::DEFAULT_REQUEST_TIMEOUT_SECS;

pub const DEFAULT_STORAGE_PATH: &str = ".moods-admin/storage.json";
pub const DEFAULT_REFRESH_INTERVAL_SECS: u64 = 60;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    Missing(&'static str),

    #[error("invalid {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    /// Project API root, without a trailing slash.
    pub supabase_url: String,
    pub anon_key: String,
    pub storage_path: PathBuf,
    /// Where emailed sign-in links send the browser.
    pub redirect_url: Option<String>,
    /// Loopback address for the sign-in callback listener.
    pub callback_addr: Option<SocketAddr>,
    pub request_timeout: Duration,
    pub refresh_interval: Duration,
}

impl AppConfig {
    /// Build typed config from environment variables.
    ///
    /// Required:
    /// - `SUPABASE_URL`
    /// - `SUPABASE_ANON_KEY`
    ///
    /// Optional:
    /// - `MOODS_STORAGE_PATH`: default `.moods-admin/storage.json`
    /// - `MOODS_REDIRECT_URL`: defaults to the callback listener when one is configured
    /// - `MOODS_CALLBACK_ADDR`: e.g. `127.0.0.1:54321`
    /// - `MOODS_REQUEST_TIMEOUT_SECS`: default 10
    /// - `MOODS_REFRESH_INTERVAL_SECS`: default 60
    pub fn from_env() -> Result<Self, ConfigError> {
        let supabase_url = required("SUPABASE_URL")?.trim_end_matches('/').to_owned();
        validate_base_url(&supabase_url)?;
        let anon_key = required("SUPABASE_ANON_KEY")?;

        let storage_path =
            optional("MOODS_STORAGE_PATH").map_or_else(|| PathBuf::from(DEFAULT_STORAGE_PATH), PathBuf::from);

        let callback_addr = optional("MOODS_CALLBACK_ADDR")
            .map(|raw| {
                raw.parse::<SocketAddr>().map_err(|e| ConfigError::Invalid {
                    key: "MOODS_CALLBACK_ADDR",
                    reason: format!("{raw}: {e}"),
                })
            })
            .transpose()?;
        let redirect_url =
            optional("MOODS_REDIRECT_URL").or_else(|| callback_addr.map(|addr| format!("http://{addr}/")));

        let request_timeout =
            Duration::from_secs(env_parse("MOODS_REQUEST_TIMEOUT_SECS", DEFAULT_REQUEST_TIMEOUT_SECS).max(1));
        let refresh_interval =
            Duration::from_secs(env_parse("MOODS_REFRESH_INTERVAL_SECS", DEFAULT_REFRESH_INTERVAL_SECS).max(1));

        Ok(Self {
            supabase_url,
            anon_key,
            storage_path,
            redirect_url,
            callback_addr,
            request_timeout,
            refresh_interval,
        })
    }
}

fn required(key: &'static str) -> Result<String, ConfigError> {
    optional(key).ok_or(ConfigError::Missing(key))
}

fn optional(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_owned())
        .filter(|v| !v.is_empty())
}

pub(crate) fn env_parse<T>(key: &str, default: T) -> T
where
    T: std::str::FromStr + Copy,
{
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<T>().ok())
        .unwrap_or(default)
}

fn validate_base_url(raw: &str) -> Result<(), ConfigError> {
    let invalid = |reason: String| ConfigError::Invalid { key: "SUPABASE_URL", reason };
    let url = reqwest::Url::parse(raw).map_err(|e| invalid(format!("{raw}: {e}")))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(invalid(format!("{raw}: expected an http(s) URL")));
    }
    if url.host_str().is_none() {
        return Err(invalid(format!("{raw}: missing host")));
    }
    Ok(())
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
