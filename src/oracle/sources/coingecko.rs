//! CoinGecko markets client
//!
//! Aggregator rather than an exchange; quotes are keyed by CoinGecko coin id.

use async_trait::async_trait;
use std::time::Duration;

use crate::error::SourceError;
use crate::oracle::normalizer::PriceNormalizer;
use crate::oracle::sources::{unavailable, BatchBuilder, HttpFetcher, SourceBatch, SourceClient};
use crate::types::Provider;

const MARKETS_PATH: &str = "/api/v3/coins/markets";

#[derive(Debug, Clone)]
pub struct CoinGeckoClient {
    http: HttpFetcher,
    ttl: Duration,
    ids: Vec<&'static str>,
}

impl CoinGeckoClient {
    pub fn new(http: HttpFetcher, ttl: Duration) -> Self {
        Self {
            http,
            ttl,
            ids: PriceNormalizer::new().known_symbols(Provider::CoinGecko),
        }
    }
}

#[async_trait]
impl SourceClient for CoinGeckoClient {
    fn provider(&self) -> Provider {
        Provider::CoinGecko
    }

    fn ttl(&self) -> Duration {
        self.ttl
    }

    async fn fetch(&self) -> Result<SourceBatch, SourceError> {
        let query = [
            ("vs_currency", "usd".to_string()),
            ("ids", self.ids.join(",")),
            ("order", "market_cap_desc".to_string()),
            ("per_page", "10".to_string()),
            ("page", "1".to_string()),
            ("sparkline", "false".to_string()),
        ];
        self.http
            .fetch(MARKETS_PATH, &query, parse_payload)
            .await
            .map_err(|e| unavailable(Provider::CoinGecko, e))
    }
}

/// `[{"id": "bitcoin", "current_price": 50000.0, ...}, ...]`
fn parse_payload(body: serde_json::Value) -> Result<SourceBatch, String> {
    let coins = body
        .as_array()
        .ok_or_else(|| "expected array of markets".to_string())?;

    let mut builder = BatchBuilder::new(Provider::CoinGecko);
    for coin in coins {
        builder.push(coin.get("id").and_then(|s| s.as_str()), coin.get("current_price"));
    }
    Ok(builder.finish())
}
