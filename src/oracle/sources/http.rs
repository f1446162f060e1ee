//! Shared REST plumbing for provider clients
//!
//! One GET per attempt, linear backoff (`base × attempt`) between attempts.
//! A payload that cannot be interpreted counts as a failed attempt.

use anyhow::{Context, Result};
use reqwest::{Client, StatusCode};
use std::future::Future;
use std::time::Duration;
use thiserror::Error;

use crate::config::RetryPolicy;
use crate::types::Provider;

/// Why a single attempt failed
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FetchError {
    /// Non-success HTTP status
    #[error("HTTP {0}")]
    Status(StatusCode),
    /// Connection, TLS or timeout failure
    #[error("transport error: {0}")]
    Transport(String),
    /// Body was not the expected JSON shape
    #[error("invalid payload: {0}")]
    Payload(String),
}

impl FetchError {
    /// Client errors other than 408/429 will not change on retry
    pub fn is_retryable(&self) -> bool {
        match self {
            FetchError::Status(status) => {
                !status.is_client_error()
                    || *status == StatusCode::REQUEST_TIMEOUT
                    || *status == StatusCode::TOO_MANY_REQUESTS
            }
            FetchError::Transport(_) | FetchError::Payload(_) => true,
        }
    }
}

/// Run `op` up to `policy.attempts` times, sleeping `base × attempt` after each failure
pub async fn retry_with_backoff<T, F, Fut>(
    source: &str,
    policy: RetryPolicy,
    mut op: F,
) -> Result<T, FetchError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, FetchError>>,
{
    let attempts = policy.attempts.max(1);
    let mut attempt = 1;
    loop {
        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(e) if !e.is_retryable() || attempt >= attempts => {
                tracing::warn!(
                    source,
                    attempt,
                    error = %e,
                    "Giving up on upstream request"
                );
                return Err(e);
            }
            Err(e) => {
                let delay = policy.delay_after(attempt);
                tracing::debug!(
                    source,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Upstream request failed, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

/// HTTP client bound to one provider's base URL and retry policy
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
    base_url: String,
    provider: Provider,
    policy: RetryPolicy,
}

impl HttpFetcher {
    pub fn new(
        provider: Provider,
        base_url: &str,
        policy: RetryPolicy,
        request_timeout: Duration,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(request_timeout)
            .user_agent(concat!("arbscan/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            provider,
            policy,
        })
    }

    async fn get_once(&self, path: &str, query: &[(&str, String)]) -> Result<serde_json::Value, FetchError> {
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .client
            .get(&url)
            .query(query)
            .send()
            .await
            .map_err(|e| FetchError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status(status));
        }

        response
            .json::<serde_json::Value>()
            .await
            .map_err(|e| FetchError::Payload(e.to_string()))
    }

    /// GET `path` and interpret the body with `parse`, retrying both steps together
    pub async fn fetch<T, P>(&self, path: &str, query: &[(&str, String)], parse: P) -> Result<T, FetchError>
    where
        P: Fn(serde_json::Value) -> Result<T, String>,
    {
        let parse = &parse;
        retry_with_backoff(self.provider.key(), self.policy, move |attempt| async move {
            tracing::trace!(provider = %self.provider, path, attempt, "GET");
            let body = self.get_once(path, query).await?;
            parse(body).map_err(FetchError::Payload)
        })
        .await
    }
}
