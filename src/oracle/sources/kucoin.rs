//! KuCoin all-tickers client (USDT markets only)

use async_trait::async_trait;
use std::time::Duration;

use crate::error::SourceError;
use crate::oracle::sources::{
    parse_millis, unavailable, BatchBuilder, HttpFetcher, SourceBatch, SourceClient,
};
use crate::types::Provider;

const TICKERS_PATH: &str = "/api/v1/market/allTickers";
const QUOTE_SUFFIX: &str = "-USDT";

#[derive(Debug, Clone)]
pub struct KuCoinClient {
    http: HttpFetcher,
    ttl: Duration,
}

impl KuCoinClient {
    pub fn new(http: HttpFetcher, ttl: Duration) -> Self {
        Self { http, ttl }
    }
}

#[async_trait]
impl SourceClient for KuCoinClient {
    fn provider(&self) -> Provider {
        Provider::KuCoin
    }

    fn ttl(&self) -> Duration {
        self.ttl
    }

    async fn fetch(&self) -> Result<SourceBatch, SourceError> {
        self.http
            .fetch(TICKERS_PATH, &[], parse_payload)
            .await
            .map_err(|e| unavailable(Provider::KuCoin, e))
    }
}

/// `{"code": "200000", "data": {"time": 1700000000000, "ticker": [{"symbol": "BTC-USDT", "last": "..."}]}}`
fn parse_payload(body: serde_json::Value) -> Result<SourceBatch, String> {
    let data = body
        .get("data")
        .ok_or_else(|| "missing 'data' field".to_string())?;
    let tickers = data
        .get("ticker")
        .and_then(|t| t.as_array())
        .ok_or_else(|| "missing 'data.ticker' array".to_string())?;

    let mut builder = BatchBuilder::new(Provider::KuCoin);
    if let Some(ts) = parse_millis(data.get("time")) {
        builder = builder.observed_at(ts);
    }

    for ticker in tickers {
        let symbol = ticker.get("symbol").and_then(|s| s.as_str());
        if matches!(symbol, Some(s) if !s.ends_with(QUOTE_SUFFIX)) {
            continue;
        }
        builder.push(symbol, ticker.get("last"));
    }
    Ok(builder.finish())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_keeps_usdt_markets() {
        let batch = parse_payload(json!({
            "code": "200000",
            "data": {
                "time": 1_700_000_000_000i64,
                "ticker": [
                    {"symbol": "BTC-USDT", "last": "50010"},
                    {"symbol": "ETH-BTC", "last": "0.06"},
                    {"symbol": "ETH-USDT", "last": "3001"},
                    {"symbol": "DEAD-USDT", "last": null}
                ]
            }
        }))
        .unwrap();

        assert_eq!(batch.records.len(), 2);
        assert_eq!(batch.malformed, 1);
        assert_eq!(batch.records[0].observed_at.timestamp(), 1_700_000_000);
    }

    #[test]
    fn test_missing_ticker_is_invalid() {
        assert!(parse_payload(json!({"code": "400100", "msg": "error"})).is_err());
    }
}
