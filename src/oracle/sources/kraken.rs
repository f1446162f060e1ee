//! Kraken public ticker client
//!
//! Kraken reports failures inside a 200 response via a non-empty `error`
//! array; those count as a failed attempt.

use async_trait::async_trait;
use std::time::Duration;

use crate::error::SourceError;
use crate::oracle::sources::{unavailable, BatchBuilder, HttpFetcher, SourceBatch, SourceClient};
use crate::types::Provider;

const TICKER_PATH: &str = "/0/public/Ticker";
const PAIRS: &str = "XXBTZUSD,XETHZUSD";

#[derive(Debug, Clone)]
pub struct KrakenClient {
    http: HttpFetcher,
    ttl: Duration,
}

impl KrakenClient {
    pub fn new(http: HttpFetcher, ttl: Duration) -> Self {
        Self { http, ttl }
    }
}

#[async_trait]
impl SourceClient for KrakenClient {
    fn provider(&self) -> Provider {
        Provider::Kraken
    }

    fn ttl(&self) -> Duration {
        self.ttl
    }

    async fn fetch(&self) -> Result<SourceBatch, SourceError> {
        let query = [("pair", PAIRS.to_string())];
        self.http
            .fetch(TICKER_PATH, &query, parse_payload)
            .await
            .map_err(|e| unavailable(Provider::Kraken, e))
    }
}

/// `{"error": [], "result": {"XXBTZUSD": {"c": ["50000.1", "0.01"], ...}}}`
fn parse_payload(body: serde_json::Value) -> Result<SourceBatch, String> {
    if let Some(errors) = body.get("error").and_then(|e| e.as_array()) {
        if !errors.is_empty() {
            let joined: Vec<String> = errors
                .iter()
                .map(|e| e.as_str().map(str::to_string).unwrap_or_else(|| e.to_string()))
                .collect();
            return Err(format!("kraken error: {}", joined.join(", ")));
        }
    }

    let result = body
        .get("result")
        .and_then(|r| r.as_object())
        .ok_or_else(|| "missing 'result' object".to_string())?;

    let mut builder = BatchBuilder::new(Provider::Kraken);
    for (pair, ticker) in result {
        // `c` = last trade closed: [price, lot volume]
        let last = ticker.get("c").and_then(|c| c.get(0));
        builder.push(Some(pair.as_str()), last);
    }
    Ok(builder.finish())
}
