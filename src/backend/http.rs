//! JSON POST with exponential backoff, shared by the HTTP backends.

use anyhow::Result;
use reqwest::header::HeaderMap;
use reqwest::StatusCode;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};

/// Whether a response status is worth another attempt.
pub(crate) fn is_retryable(status: StatusCode) -> bool {
    status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS
}

/// POST `body` to `url` and return the decoded JSON response.
///
/// Retries 429, 5xx and network errors up to `max_retries` times with delays
/// of 2s, 4s, 8s... Other error statuses fail immediately.
#[allow(tail_expr_drop_order)]
pub(crate) async fn post_json(
    client: &reqwest::Client,
    backend: &str,
    url: &str,
    headers: HeaderMap,
    body: &Value,
    max_retries: u32,
) -> Result<Value> {
    let max_attempts = max_retries + 1;
    let mut last_error = None;

    for attempt in 0..max_attempts {
        if attempt > 0 {
            let delay_secs = 1u64 << attempt.min(6);
            debug!(
                "{} retry attempt {} after {}s delay",
                backend,
                attempt + 1,
                delay_secs
            );
            tokio::time::sleep(Duration::from_secs(delay_secs)).await;
        }

        match client
            .post(url)
            .headers(headers.clone())
            .json(body)
            .send()
            .await
        {
            Ok(response) => {
                let status = response.status();
                if status.is_success() {
                    return Ok(response.json().await?);
                }

                let text = response.text().await.unwrap_or_default();
                if is_retryable(status) {
                    warn!("{} returned {}, will retry", backend, status);
                    last_error = Some(format!("{backend} returned {status}: {text}"));
                    continue;
                }

                anyhow::bail!("{backend} returned error status {status}: {text}");
            }
            Err(e) => {
                warn!("{} request failed: {}", backend, e);
                last_error = Some(e.to_string());
            }
        }
    }

    anyhow::bail!(
        "{backend} request failed after {max_attempts} attempts: {}",
        last_error.unwrap_or_else(|| "unknown error".to_string())
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_statuses() {
        assert!(is_retryable(StatusCode::TOO_MANY_REQUESTS));
        assert!(is_retryable(StatusCode::INTERNAL_SERVER_ERROR));
        assert!(is_retryable(StatusCode::BAD_GATEWAY));
        assert!(!is_retryable(StatusCode::BAD_REQUEST));
        assert!(!is_retryable(StatusCode::UNAUTHORIZED));
    }

    #[tokio::test]
    async fn test_connection_refused_exhausts_attempts() {
        let client = reqwest::Client::new();
        let err = post_json(
            &client,
            "test",
            "http://127.0.0.1:9/v1/chat",
            HeaderMap::new(),
            &serde_json::json!({}),
            0,
        )
        .await
        .unwrap_err();
        assert!(err.to_string().contains("after 1 attempts"));
    }
}
