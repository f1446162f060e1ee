//! Gate.io spot tickers client (USDT markets only)

use async_trait::async_trait;
use std::time::Duration;

use crate::error::SourceError;
use crate::oracle::sources::{unavailable, BatchBuilder, HttpFetcher, SourceBatch, SourceClient};
use crate::types::Provider;

const TICKERS_PATH: &str = "/api/v4/spot/tickers";
const QUOTE_SUFFIX: &str = "_USDT";

#[derive(Debug, Clone)]
pub struct GateIoClient {
    http: HttpFetcher,
    ttl: Duration,
}

impl GateIoClient {
    pub fn new(http: HttpFetcher, ttl: Duration) -> Self {
        Self { http, ttl }
    }
}

#[async_trait]
impl SourceClient for GateIoClient {
    fn provider(&self) -> Provider {
        Provider::GateIo
    }

    fn ttl(&self) -> Duration {
        self.ttl
    }

    async fn fetch(&self) -> Result<SourceBatch, SourceError> {
        self.http
            .fetch(TICKERS_PATH, &[], parse_payload)
            .await
            .map_err(|e| unavailable(Provider::GateIo, e))
    }
}

/// `[{"currency_pair": "BTC_USDT", "last": "50000", ...}, ...]`
fn parse_payload(body: serde_json::Value) -> Result<SourceBatch, String> {
    let tickers = body
        .as_array()
        .ok_or_else(|| "expected array of tickers".to_string())?;

    let mut builder = BatchBuilder::new(Provider::GateIo);
    for ticker in tickers {
        let symbol = ticker.get("currency_pair").and_then(|s| s.as_str());
        if matches!(symbol, Some(s) if !s.ends_with(QUOTE_SUFFIX)) {
            continue;
        }
        builder.push(symbol, ticker.get("last"));
    }
    Ok(builder.finish())
}
