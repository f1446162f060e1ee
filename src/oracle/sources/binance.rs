//! Binance spot REST client
//!
//! Polls the symbol price ticker for the USDT markets we can normalize.
//! Binance answers HTTP 451 from restricted jurisdictions; that is treated
//! as "no prices available here", not as an outage.

use async_trait::async_trait;
use reqwest::StatusCode;
use std::time::Duration;

use crate::error::SourceError;
use crate::oracle::normalizer::PriceNormalizer;
use crate::oracle::sources::{unavailable, BatchBuilder, FetchError, HttpFetcher, SourceBatch, SourceClient};
use crate::types::Provider;

const TICKER_PATH: &str = "/api/v3/ticker/price";

#[derive(Debug, Clone)]
pub struct BinanceClient {
    http: HttpFetcher,
    ttl: Duration,
    symbols: Vec<&'static str>,
}

impl BinanceClient {
    pub fn new(http: HttpFetcher, ttl: Duration) -> Self {
        Self {
            http,
            ttl,
            symbols: PriceNormalizer::new().known_symbols(Provider::Binance),
        }
    }

    /// `symbols` query value: a JSON array of tickers
    fn symbols_param(&self) -> String {
        serde_json::to_string(&self.symbols).unwrap_or_else(|_| "[]".to_string())
    }
}

#[async_trait]
impl SourceClient for BinanceClient {
    fn provider(&self) -> Provider {
        Provider::Binance
    }

    fn ttl(&self) -> Duration {
        self.ttl
    }

    async fn fetch(&self) -> Result<SourceBatch, SourceError> {
        let query = [("symbols", self.symbols_param())];
        settle(self.http.fetch(TICKER_PATH, &query, parse_payload).await)
    }
}

/// A 451 (restricted jurisdiction) is an empty answer, everything else is an outage
fn settle(result: Result<SourceBatch, FetchError>) -> Result<SourceBatch, SourceError> {
    match result {
        Ok(batch) => Ok(batch),
        Err(FetchError::Status(StatusCode::UNAVAILABLE_FOR_LEGAL_REASONS)) => {
            tracing::info!(
                provider = %Provider::Binance,
                "Binance unavailable from this jurisdiction (451), treating as zero records"
            );
            Ok(SourceBatch::empty(Provider::Binance))
        }
        Err(e) => Err(unavailable(Provider::Binance, e)),
    }
}

/// `[{"symbol": "BTCUSDT", "price": "50000.01"}, ...]`
fn parse_payload(body: serde_json::Value) -> Result<SourceBatch, String> {
    let tickers = body
        .as_array()
        .ok_or_else(|| "expected array of tickers".to_string())?;

    let mut builder = BatchBuilder::new(Provider::Binance);
    for ticker in tickers {
        builder.push(
            ticker.get("symbol").and_then(|s| s.as_str()),
            ticker.get("price"),
        );
    }
    Ok(builder.finish())
}
