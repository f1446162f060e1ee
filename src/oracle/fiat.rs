//! Fiat conversion rates
//!
//! Independent of the crypto venues: one GET to a public currency endpoint,
//! cached under its own key and TTL. Failures are reported to the caller,
//! never replaced by an empty table.

use anyhow::Result;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use crate::config::{FiatConfig, RetryPolicy};
use crate::error::EngineError;
use crate::oracle::cache::{Cached, TtlCache};
use crate::oracle::sources::{parse_price, retry_with_backoff, FetchError};
use crate::types::{CanonicalAssetId, FiatRateTable};

pub const FIAT_CACHE_KEY: &str = "fiat_rates";

/// Raw fetch of the rate table, separated from caching
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RateFetcher: Send + Sync {
    async fn fetch_rates(&self) -> Result<FiatRateTable, String>;
}

/// Frankfurter-style `GET /latest?from=USD`
pub struct HttpRateFetcher {
    client: reqwest::Client,
    url: String,
    base_currency: String,
    policy: RetryPolicy,
}

impl HttpRateFetcher {
    pub fn new(config: &FiatConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .build()?;
        Ok(Self {
            client,
            url: format!("{}/latest", config.base_url.trim_end_matches('/')),
            base_currency: config.base_currency.to_uppercase(),
            policy: config.retry_policy(),
        })
    }

    async fn get_once(&self) -> Result<FiatRateTable, FetchError> {
        let response = self
            .client
            .get(&self.url)
            .query(&[("from", self.base_currency.as_str())])
            .send()
            .await
            .map_err(|e| FetchError::Transport(e.to_string()))?;

        if !response.status().is_success() {
            return Err(FetchError::Status(response.status()));
        }

        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| FetchError::Payload(e.to_string()))?;
        parse_rates(&self.base_currency, body).map_err(FetchError::Payload)
    }
}

#[async_trait]
impl RateFetcher for HttpRateFetcher {
    async fn fetch_rates(&self) -> Result<FiatRateTable, String> {
        retry_with_backoff("fiat", self.policy, move |_| self.get_once())
            .await
            .map_err(|e| e.to_string())
    }
}

/// `{"base": "USD", "rates": {"EUR": 0.92, ...}}`; unusable rates are skipped
pub fn parse_rates(base_currency: &str, body: serde_json::Value) -> Result<FiatRateTable, String> {
    let base = body
        .get("base")
        .and_then(|b| b.as_str())
        .unwrap_or(base_currency);
    let rates = body
        .get("rates")
        .and_then(|r| r.as_object())
        .ok_or_else(|| "missing 'rates' object".to_string())?;

    let mut table = BTreeMap::new();
    for (code, value) in rates {
        match parse_price(value) {
            Ok(rate) => {
                table.insert(CanonicalAssetId::new(code.to_lowercase()), rate);
            }
            Err(e) => tracing::debug!(currency = %code, error = %e, "Skipping unusable fiat rate"),
        }
    }

    Ok(FiatRateTable::new(CanonicalAssetId::new(base.to_lowercase()), table))
}

/// Cached fiat rate table with its own TTL
pub struct FiatRateSource {
    fetcher: Arc<dyn RateFetcher>,
    cache: Arc<TtlCache>,
    ttl: Duration,
}

impl FiatRateSource {
    pub fn new(fetcher: Arc<dyn RateFetcher>, cache: Arc<TtlCache>, ttl: Duration) -> Self {
        Self { fetcher, cache, ttl }
    }

    pub fn from_config(config: &FiatConfig, cache: Arc<TtlCache>) -> Result<Self> {
        Ok(Self::new(
            Arc::new(HttpRateFetcher::new(config)?),
            cache,
            config.ttl(),
        ))
    }

    /// Current rate table, refreshed at most once per TTL window
    pub async fn rates(&self) -> Result<Cached<FiatRateTable>, EngineError> {
        self.cache
            .get_or_compute(FIAT_CACHE_KEY, self.ttl, || async {
                let table = self
                    .fetcher
                    .fetch_rates()
                    .await
                    .map_err(EngineError::RateSourceUnavailable)?;
                tracing::debug!(
                    base = %table.base,
                    currencies = table.rates.len(),
                    "Fiat rates refreshed"
                );
                Ok(table)
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oracle::cache::Freshness;
    use rust_decimal_macros::dec;
    use serde_json::json;

    fn table() -> FiatRateTable {
        let mut rates = BTreeMap::new();
        rates.insert(CanonicalAssetId::from("eur"), dec!(0.92));
        FiatRateTable::new(CanonicalAssetId::from("usd"), rates)
    }

    #[test]
    fn test_parse_rates_lowercases_codes() {
        let table = parse_rates(
            "USD",
            json!({"amount": 1.0, "base": "USD", "date": "2024-01-02",
                   "rates": {"EUR": 0.92, "JPY": 141.5, "BAD": "x"}}),
        )
        .unwrap();

        assert_eq!(table.base, CanonicalAssetId::from("usd"));
        assert_eq!(table.rate(&"eur".into()), Some(dec!(0.92)));
        assert_eq!(table.rate(&"jpy".into()), Some(dec!(141.5)));
        assert_eq!(table.rate(&"usd".into()), Some(dec!(1)));
        assert!(table.rate(&"bad".into()).is_none());
    }

    #[test]
    fn test_parse_rates_requires_rates_object() {
        assert!(parse_rates("USD", json!({"message": "not found"})).is_err());
    }

    #[tokio::test]
    async fn test_rates_cached_within_ttl() {
        let mut fetcher = MockRateFetcher::new();
        fetcher.expect_fetch_rates().times(1).returning(|| Ok(table()));

        let source = FiatRateSource::new(
            Arc::new(fetcher),
            Arc::new(TtlCache::default()),
            Duration::from_secs(60),
        );

        let first = source.rates().await.unwrap();
        let second = source.rates().await.unwrap();
        assert!(Arc::ptr_eq(&first.value, &second.value));
    }

    #[tokio::test]
    async fn test_failure_without_cache_is_reported() {
        let mut fetcher = MockRateFetcher::new();
        fetcher
            .expect_fetch_rates()
            .returning(|| Err("HTTP 502 Bad Gateway".to_string()));

        let source = FiatRateSource::new(
            Arc::new(fetcher),
            Arc::new(TtlCache::default()),
            Duration::from_secs(60),
        );

        let err = source.rates().await.unwrap_err();
        assert_eq!(
            err,
            EngineError::RateSourceUnavailable("HTTP 502 Bad Gateway".to_string())
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_after_expiry_serves_stale() {
        let mut fetcher = MockRateFetcher::new();
        let mut seq = mockall::Sequence::new();
        fetcher
            .expect_fetch_rates()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|| Ok(table()));
        fetcher
            .expect_fetch_rates()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|| Err("timeout".to_string()));

        let source = FiatRateSource::new(
            Arc::new(fetcher),
            Arc::new(TtlCache::new(Some(Duration::from_secs(300)))),
            Duration::from_secs(60),
        );

        source.rates().await.unwrap();
        tokio::time::advance(Duration::from_secs(61)).await;

        let degraded = source.rates().await.unwrap();
        assert!(degraded.freshness.is_stale());
        assert!(matches!(degraded.freshness, Freshness::Stale { ref error, .. } if error.contains("timeout")));
    }
}
