//! JSON POST with retry and exponential backoff, shared by the remote
//! embedding and generation providers.
//!
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors → retry
//! - Backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)
//!
//! Credentials travel in headers only, and request URLs are stripped from
//! errors, so a failed call never echoes a key into logs or answers.

use anyhow::{bail, Result};
use std::time::Duration;
use tracing::warn;

pub(crate) fn build_client(timeout_secs: u64) -> Result<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()?)
}

/// How a request authenticates.
#[derive(Clone, Copy)]
pub(crate) enum Auth<'a> {
    None,
    /// `Authorization: Bearer <key>`.
    Bearer(&'a str),
    /// A provider-specific key header, e.g. `x-goog-api-key`.
    Header(&'static str, &'a str),
}

/// POST `body` to `url` and parse the JSON response.
///
/// `label` names the service in error messages (e.g. `"OpenAI"`).
pub(crate) async fn post_json(
    client: &reqwest::Client,
    url: &str,
    auth: Auth<'_>,
    body: &serde_json::Value,
    max_retries: u32,
    label: &str,
) -> Result<serde_json::Value> {
    let mut last_err = None;

    for attempt in 0..=max_retries {
        if attempt > 0 {
            let delay = Duration::from_secs(1 << (attempt - 1).min(5));
            tokio::time::sleep(delay).await;
        }

        let mut request = client
            .post(url)
            .header("Content-Type", "application/json")
            .json(body);
        request = match auth {
            Auth::None => request,
            Auth::Bearer(key) => request.header("Authorization", format!("Bearer {}", key)),
            Auth::Header(name, key) => request.header(name, key),
        };

        match request.send().await {
            Ok(response) => {
                let status = response.status();

                if status.is_success() {
                    return response.json().await.map_err(|e| {
                        anyhow::anyhow!("{} returned an invalid response: {}", label, e.without_url())
                    });
                }

                if status.as_u16() == 429 || status.is_server_error() {
                    let body_text = response.text().await.unwrap_or_default();
                    warn!(service = label, %status, attempt, "retryable API error");
                    last_err = Some(anyhow::anyhow!(
                        "{} API error {}: {}",
                        label,
                        status,
                        body_text
                    ));
                    continue;
                }

                let body_text = response.text().await.unwrap_or_default();
                bail!("{} API error {}: {}", label, status, body_text);
            }
            Err(e) => {
                let e = e.without_url();
                warn!(service = label, attempt, error = %e, "request failed");
                last_err = Some(anyhow::anyhow!("{} connection error: {}", label, e));
                continue;
            }
        }
    }

    Err(last_err.unwrap_or_else(|| anyhow::anyhow!("{} request failed after retries", label)))
}

/// Read an API key from the environment, with a helpful message when missing.
pub(crate) fn api_key_from_env(var: &str) -> Result<String> {
    std::env::var(var).map_err(|_| anyhow::anyhow!("{} environment variable not set", var))
}
