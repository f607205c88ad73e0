//! Sync transport: the pull and push network operations.

use std::future::Future;

use reqwest::StatusCode;
use serde::Deserialize;

use crate::config::SyncSettings;
use crate::error::{Error, Result};
use crate::models::{PullResponse, PushBatch, PushReceipt};
use crate::util::compact_text;

/// The two network operations of a sync cycle.
///
/// Kept as a trait so the contract stays transport-agnostic and tests can
/// script responses without a server. The returned futures must be `Send`
/// because the scheduler runs cycles on a spawned task.
pub trait SyncTransport {
    /// Fetch all remote changes since the given checkpoint (0 if never
    /// synced).
    fn pull(&self, since: i64) -> impl Future<Output = Result<PullResponse>> + Send;

    /// Submit the full unsynced map. Callers skip the call entirely when
    /// the batch is empty.
    fn push(&self, batch: &PushBatch) -> impl Future<Output = Result<PushReceipt>> + Send;
}

/// REST implementation of [`SyncTransport`] against `{endpoint}/sync`.
#[derive(Clone)]
pub struct HttpTransport {
    endpoint: String,
    auth_token: String,
    client: reqwest::Client,
}

impl HttpTransport {
    /// Build a transport from validated settings. The request timeout
    /// bounds hung pull/push calls; a timeout surfaces as a phase failure.
    pub fn new(settings: &SyncSettings) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(settings.request_timeout)
            .build()?;
        Ok(Self {
            endpoint: format!("{}/sync", settings.endpoint),
            auth_token: settings.auth_token.clone(),
            client,
        })
    }
}

impl SyncTransport for HttpTransport {
    async fn pull(&self, since: i64) -> Result<PullResponse> {
        let response = self
            .client
            .get(&self.endpoint)
            .query(&[("since", since)])
            .bearer_auth(&self.auth_token)
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Api(parse_api_error(status, &body)));
        }

        Ok(response.json::<PullResponse>().await?)
    }

    async fn push(&self, batch: &PushBatch) -> Result<PushReceipt> {
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.auth_token)
            .json(batch)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Api(parse_api_error(status, &body)));
        }

        Ok(response.json::<PushReceipt>().await?)
    }
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: Option<String>,
    message: Option<String>,
}

fn parse_api_error(status: StatusCode, body: &str) -> String {
    if let Ok(payload) = serde_json::from_str::<ApiErrorBody>(body) {
        if let Some(message) = payload.message.or(payload.error) {
            return format!("{} ({})", message.trim(), status.as_u16());
        }
    }

    let trimmed = body.trim();
    if trimmed.is_empty() {
        format!("HTTP {}", status.as_u16())
    } else {
        format!("{} ({})", compact_text(trimmed), status.as_u16())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_api_error_prefers_structured_message() {
        let message = parse_api_error(
            StatusCode::UNAUTHORIZED,
            r#"{"message": "token expired"}"#,
        );
        assert_eq!(message, "token expired (401)");
    }

    #[test]
    fn parse_api_error_falls_back_to_error_field() {
        let message = parse_api_error(StatusCode::FORBIDDEN, r#"{"error": "nope"}"#);
        assert_eq!(message, "nope (403)");
    }

    #[test]
    fn parse_api_error_handles_plain_bodies() {
        assert_eq!(
            parse_api_error(StatusCode::BAD_GATEWAY, ""),
            "HTTP 502".to_string()
        );
        assert_eq!(
            parse_api_error(StatusCode::INTERNAL_SERVER_ERROR, "boom"),
            "boom (500)".to_string()
        );
    }

    #[test]
    fn transport_builds_sync_url_from_endpoint() {
        let settings =
            crate::config::SyncSettings::new("https://api.example.com/", "token").unwrap();
        let transport = HttpTransport::new(&settings).unwrap();
        assert_eq!(transport.endpoint, "https://api.example.com/sync");
    }

    #[test]
    fn transport_futures_are_send() {
        fn require_send<F: Send>(_: &F) {}

        let settings =
            crate::config::SyncSettings::new("https://api.example.com", "token").unwrap();
        let transport = HttpTransport::new(&settings).unwrap();
        let batch = PushBatch::default();

        // Never awaited: this only has to type-check against the trait's
        // Send bound, which the spawned scheduler relies on.
        require_send(&transport.pull(0));
        require_send(&transport.push(&batch));
    }
}
