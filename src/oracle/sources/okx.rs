//! OKX spot tickers client (USDT markets only)

use async_trait::async_trait;
use std::time::Duration;

use crate::error::SourceError;
use crate::oracle::sources::{
    parse_millis, unavailable, BatchBuilder, HttpFetcher, SourceBatch, SourceClient,
};
use crate::types::Provider;

const TICKERS_PATH: &str = "/api/v5/market/tickers";
const QUOTE_SUFFIX: &str = "-USDT";

#[derive(Debug, Clone)]
pub struct OkxClient {
    http: HttpFetcher,
    ttl: Duration,
}

impl OkxClient {
    pub fn new(http: HttpFetcher, ttl: Duration) -> Self {
        Self { http, ttl }
    }
}

#[async_trait]
impl SourceClient for OkxClient {
    fn provider(&self) -> Provider {
        Provider::Okx
    }

    fn ttl(&self) -> Duration {
        self.ttl
    }

    async fn fetch(&self) -> Result<SourceBatch, SourceError> {
        let query = [("instType", "SPOT".to_string())];
        self.http
            .fetch(TICKERS_PATH, &query, parse_payload)
            .await
            .map_err(|e| unavailable(Provider::Okx, e))
    }
}

/// `{"code": "0", "data": [{"instId": "BTC-USDT", "last": "...", "ts": "..."}]}`
fn parse_payload(body: serde_json::Value) -> Result<SourceBatch, String> {
    match body.get("code").and_then(|c| c.as_str()) {
        Some("0") | None => {}
        Some(code) => {
            let msg = body.get("msg").and_then(|m| m.as_str()).unwrap_or_default();
            return Err(format!("okx error {}: {}", code, msg));
        }
    }

    let tickers = body
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| "missing 'data' array".to_string())?;

    let mut builder = BatchBuilder::new(Provider::Okx);
    for ticker in tickers {
        let symbol = ticker.get("instId").and_then(|s| s.as_str());
        if matches!(symbol, Some(s) if !s.ends_with(QUOTE_SUFFIX)) {
            continue;
        }
        builder.push_at(symbol, ticker.get("last"), parse_millis(ticker.get("ts")));
    }
    Ok(builder.finish())
}
