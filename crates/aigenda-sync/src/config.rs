//! Sync engine configuration.

use std::time::Duration;

use crate::error::{Error, Result};
use crate::util::{is_http_url, normalize_text_option};

const DEFAULT_SYNC_INTERVAL_SECS: u64 = 60;
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 10;

/// Configuration for the sync engine.
///
/// `endpoint` is the base URL of the sync API; the engine appends `/sync`
/// for both pull and push. The auth token is sent as a bearer header on
/// every request and is redacted from `Debug` output.
#[derive(Clone, PartialEq, Eq)]
pub struct SyncSettings {
    /// Base URL of the sync endpoint (e.g. `https://api.example.com`)
    pub endpoint: String,
    /// Bearer token for the sync endpoint
    pub auth_token: String,
    /// Scheduler tick interval (default: 60 seconds)
    pub sync_interval: Duration,
    /// Per-request timeout for pull/push calls (default: 10 seconds)
    pub request_timeout: Duration,
}

impl SyncSettings {
    /// Create settings with defaults, validating the endpoint URL.
    pub fn new(endpoint: impl Into<String>, auth_token: impl Into<String>) -> Result<Self> {
        let endpoint = normalize_endpoint(endpoint.into())?;
        let auth_token = normalize_text_option(Some(auth_token.into())).ok_or_else(|| {
            Error::InvalidConfiguration("auth token must not be empty".to_string())
        })?;

        Ok(Self {
            endpoint,
            auth_token,
            sync_interval: Duration::from_secs(DEFAULT_SYNC_INTERVAL_SECS),
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
        })
    }

    /// Set the scheduler tick interval
    #[must_use]
    pub const fn with_sync_interval(mut self, interval: Duration) -> Self {
        self.sync_interval = interval;
        self
    }

    /// Set the per-request timeout for transport calls
    #[must_use]
    pub const fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }
}

impl std::fmt::Debug for SyncSettings {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("SyncSettings")
            .field("endpoint", &self.endpoint)
            .field("auth_token", &"[REDACTED]")
            .field("sync_interval", &self.sync_interval)
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}

fn normalize_endpoint(raw: String) -> Result<String> {
    let endpoint = normalize_text_option(Some(raw)).ok_or_else(|| {
        Error::InvalidConfiguration("endpoint must not be empty".to_string())
    })?;
    if is_http_url(&endpoint) {
        Ok(endpoint.trim_end_matches('/').to_string())
    } else {
        Err(Error::InvalidConfiguration(
            "endpoint must include http:// or https://".to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_rejects_invalid_endpoint() {
        assert!(SyncSettings::new("", "token").is_err());
        assert!(SyncSettings::new("api.example.com", "token").is_err());
    }

    #[test]
    fn new_rejects_empty_token() {
        assert!(SyncSettings::new("https://api.example.com", "  ").is_err());
    }

    #[test]
    fn new_strips_trailing_slash() {
        let settings = SyncSettings::new("https://api.example.com/", "token").unwrap();
        assert_eq!(settings.endpoint, "https://api.example.com");
    }

    #[test]
    fn debug_redacts_token() {
        let settings = SyncSettings::new("https://api.example.com", "secret").unwrap();
        let debug = format!("{settings:?}");
        assert!(!debug.contains("secret"));
        assert!(debug.contains("[REDACTED]"));
    }

    #[test]
    fn builder_overrides_intervals() {
        let settings = SyncSettings::new("https://api.example.com", "token")
            .unwrap()
            .with_sync_interval(Duration::from_secs(5))
            .with_request_timeout(Duration::from_secs(2));
        assert_eq!(settings.sync_interval, Duration::from_secs(5));
        assert_eq!(settings.request_timeout, Duration::from_secs(2));
    }
}
