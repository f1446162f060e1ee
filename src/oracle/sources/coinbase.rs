//! Coinbase spot price client
//!
//! `GET /v2/prices/spot?currency=USD`. The endpoint answers with a single
//! `{base, currency, amount}` object or an array of them depending on API
//! version; both shapes are accepted.

use async_trait::async_trait;
use std::time::Duration;

use crate::error::SourceError;
use crate::oracle::sources::{unavailable, BatchBuilder, HttpFetcher, SourceBatch, SourceClient};
use crate::types::Provider;

const SPOT_PATH: &str = "/v2/prices/spot";

#[derive(Debug, Clone)]
pub struct CoinbaseClient {
    http: HttpFetcher,
    ttl: Duration,
}

impl CoinbaseClient {
    pub fn new(http: HttpFetcher, ttl: Duration) -> Self {
        Self { http, ttl }
    }
}

#[async_trait]
impl SourceClient for CoinbaseClient {
    fn provider(&self) -> Provider {
        Provider::Coinbase
    }

    fn ttl(&self) -> Duration {
        self.ttl
    }

    async fn fetch(&self) -> Result<SourceBatch, SourceError> {
        let query = [("currency", "USD".to_string())];
        self.http
            .fetch(SPOT_PATH, &query, parse_payload)
            .await
            .map_err(|e| unavailable(Provider::Coinbase, e))
    }
}

fn parse_payload(body: serde_json::Value) -> Result<SourceBatch, String> {
    let data = body
        .get("data")
        .ok_or_else(|| "missing 'data' field".to_string())?;

    let entries: Vec<&serde_json::Value> = match data {
        serde_json::Value::Array(items) => items.iter().collect(),
        serde_json::Value::Object(_) => vec![data],
        _ => return Err("'data' is neither object nor array".to_string()),
    };

    let mut builder = BatchBuilder::new(Provider::Coinbase);
    for entry in entries {
        builder.push(entry.get("base").and_then(|b| b.as_str()), entry.get("amount"));
    }
    Ok(builder.finish())
}
