//! Price source implementations (CoinGecko, Coinbase, Kraken, Binance, KuCoin, OKX, Gate.io)

mod binance;
mod coinbase;
mod coingecko;
mod gateio;
mod http;
mod kraken;
mod kucoin;
mod okx;

pub use binance::BinanceClient;
pub use coinbase::CoinbaseClient;
pub use coingecko::CoinGeckoClient;
pub use gateio::GateIoClient;
pub use http::{retry_with_backoff, FetchError, HttpFetcher};
pub use kraken::KrakenClient;
pub use kucoin::KuCoinClient;
pub use okx::OkxClient;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use crate::config::{AppConfig, ProviderSettings};
use crate::error::{MalformedRecord, SourceError};
use crate::types::{Provider, RawPriceRecord};

/// Trait for price source clients
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SourceClient: Send + Sync {
    /// Which provider this client polls
    fn provider(&self) -> Provider;

    /// Freshness window for this provider's prices
    fn ttl(&self) -> Duration;

    /// Fetch one snapshot of prices. Malformed entries are skipped and counted.
    async fn fetch(&self) -> Result<SourceBatch, SourceError>;
}

/// Records from one successful fetch
#[derive(Debug, Clone, PartialEq)]
pub struct SourceBatch {
    pub provider: Provider,
    pub records: Vec<RawPriceRecord>,
    /// Entries skipped because they could not be read
    pub malformed: usize,
}

impl SourceBatch {
    pub fn empty(provider: Provider) -> Self {
        Self {
            provider,
            records: Vec::new(),
            malformed: 0,
        }
    }
}

/// Accumulates records, counting entries that fail to parse
pub(crate) struct BatchBuilder {
    batch: SourceBatch,
    observed_at: DateTime<Utc>,
}

impl BatchBuilder {
    pub fn new(provider: Provider) -> Self {
        Self {
            batch: SourceBatch::empty(provider),
            observed_at: Utc::now(),
        }
    }

    /// Timestamp applied to records pushed without their own
    pub fn observed_at(mut self, ts: DateTime<Utc>) -> Self {
        self.observed_at = ts;
        self
    }

    /// Add one entry; `symbol` and `price` come straight from the payload
    pub fn push(&mut self, symbol: Option<&str>, price: Option<&serde_json::Value>) {
        self.push_at(symbol, price, None);
    }

    pub fn push_at(
        &mut self,
        symbol: Option<&str>,
        price: Option<&serde_json::Value>,
        observed_at: Option<DateTime<Utc>>,
    ) {
        match self.record(symbol, price, observed_at) {
            Ok(record) => self.batch.records.push(record),
            Err(e) => {
                tracing::debug!(provider = %e.provider, reason = %e.reason, "Skipping malformed record");
                self.batch.malformed += 1;
            }
        }
    }

    fn record(
        &self,
        symbol: Option<&str>,
        price: Option<&serde_json::Value>,
        observed_at: Option<DateTime<Utc>>,
    ) -> Result<RawPriceRecord, MalformedRecord> {
        let provider = self.batch.provider;
        let malformed = |reason: String| MalformedRecord { provider, reason };

        let symbol = symbol
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| malformed("missing symbol".to_string()))?;
        let price = price
            .ok_or_else(|| malformed(format!("{symbol}: missing price")))
            .and_then(|v| parse_price(v).map_err(|e| malformed(format!("{symbol}: {e}"))))?;

        Ok(RawPriceRecord {
            provider,
            raw_symbol: symbol.to_string(),
            price,
            observed_at: observed_at.unwrap_or(self.observed_at),
        })
    }

    pub fn finish(self) -> SourceBatch {
        self.batch
    }
}

/// Upper bound on any quoted price or rate; leaves headroom for fee and ratio arithmetic
pub const MAX_PRICE: Decimal = dec!(1000000000000);

/// Read a strictly positive decimal from a JSON string or number
pub fn parse_price(value: &serde_json::Value) -> Result<Decimal, String> {
    let price = match value {
        serde_json::Value::String(s) => Decimal::from_str(s.trim())
            .or_else(|_| Decimal::from_scientific(s.trim()))
            .map_err(|e| format!("unparseable price '{}': {}", s, e))?,
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Decimal::from(i)
            } else if let Some(u) = n.as_u64() {
                Decimal::from(u)
            } else {
                let f = n.as_f64().ok_or_else(|| format!("unrepresentable price {}", n))?;
                Decimal::from_str(&f.to_string())
                    .or_else(|_| Decimal::try_from(f))
                    .map_err(|e| format!("unrepresentable price {}: {}", n, e))?
            }
        }
        serde_json::Value::Null => return Err("null price".to_string()),
        other => return Err(format!("unexpected price type: {}", other)),
    };

    if price <= Decimal::ZERO {
        return Err(format!("non-positive price {}", price));
    }
    if price > MAX_PRICE {
        return Err(format!("price {} above plausible range", price));
    }
    Ok(price)
}

/// Millisecond epoch (number or numeric string) to a timestamp
pub(crate) fn parse_millis(value: Option<&serde_json::Value>) -> Option<DateTime<Utc>> {
    let ms = match value? {
        serde_json::Value::Number(n) => n.as_i64()?,
        serde_json::Value::String(s) => s.parse::<i64>().ok()?,
        _ => return None,
    };
    Utc.timestamp_millis_opt(ms).single()
}

/// Build a client for every enabled provider
pub fn build_sources(config: &AppConfig) -> Result<Vec<Arc<dyn SourceClient>>> {
    config
        .enabled_providers()
        .into_iter()
        .map(|(provider, settings)| build_source(provider, settings))
        .collect()
}

pub fn build_source(provider: Provider, settings: &ProviderSettings) -> Result<Arc<dyn SourceClient>> {
    let http = HttpFetcher::new(
        provider,
        &settings.base_url,
        settings.retry_policy(),
        Duration::from_millis(settings.request_timeout_ms),
    )?;
    let ttl = settings.ttl();

    let client: Arc<dyn SourceClient> = match provider {
        Provider::CoinGecko => Arc::new(CoinGeckoClient::new(http, ttl)),
        Provider::Coinbase => Arc::new(CoinbaseClient::new(http, ttl)),
        Provider::Kraken => Arc::new(KrakenClient::new(http, ttl)),
        Provider::Binance => Arc::new(BinanceClient::new(http, ttl)),
        Provider::KuCoin => Arc::new(KuCoinClient::new(http, ttl)),
        Provider::Okx => Arc::new(OkxClient::new(http, ttl)),
        Provider::GateIo => Arc::new(GateIoClient::new(http, ttl)),
    };
    Ok(client)
}

/// Wrap an exhausted fetch as the provider-level error
pub(crate) fn unavailable(provider: Provider, e: FetchError) -> SourceError {
    SourceError::Unavailable {
        provider,
        last_error: e.to_string(),
    }
}
