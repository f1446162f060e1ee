//! Price Aggregator - Combines price data from multiple sources
//!
//! Fans out to every configured source at once, waits for all of them (or
//! the cycle deadline), normalizes whatever succeeded and publishes one
//! fee-annotated price table through the shared cache. A provider failing
//! only shrinks the table; the cycle fails when nothing succeeded.

use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use crate::error::{EngineError, SourceError};
use crate::oracle::cache::{Cached, TtlCache};
use crate::oracle::normalizer::{Normalized, PriceNormalizer};
use crate::oracle::sources::{SourceBatch, SourceClient};
use crate::types::{CanonicalAssetId, NormalizedPriceTable, PriceQuote, Provider};

pub const PRICE_CACHE_KEY: &str = "normalized_prices";

/// Validated provider → proportional fee mapping
#[derive(Debug, Clone, Default)]
pub struct FeeSchedule {
    fees: HashMap<Provider, Decimal>,
}

impl FeeSchedule {
    pub fn new(fees: HashMap<Provider, Decimal>) -> Result<Self, EngineError> {
        if let Some((provider, fee)) = fees
            .iter()
            .find(|(_, fee)| **fee < Decimal::ZERO || **fee >= Decimal::ONE)
        {
            return Err(EngineError::Config(format!(
                "fee for {} must be in [0, 1), got {}",
                provider, fee
            )));
        }
        Ok(Self { fees })
    }

    /// Fee for a provider; providers without a configured fee trade at zero
    pub fn fee(&self, provider: Provider) -> Decimal {
        self.fees.get(&provider).copied().unwrap_or(Decimal::ZERO)
    }
}

/// A symbol that was kept via the lowercase fallback
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct FallbackSymbol {
    pub provider: Provider,
    pub raw_symbol: String,
    pub asset: CanonicalAssetId,
}

/// Which providers made it into a cycle and what was lost on the way
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Coverage {
    pub succeeded: Vec<Provider>,
    /// Provider → failure reason
    pub missing: BTreeMap<Provider, String>,
    pub fallback_symbols: Vec<FallbackSymbol>,
    /// Provider → count of skipped malformed entries
    pub malformed: BTreeMap<Provider, usize>,
}

/// Output of one aggregation cycle
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PriceSnapshot {
    pub table: NormalizedPriceTable,
    pub coverage: Coverage,
    pub fetched_at: DateTime<Utc>,
}

/// Orchestrates the sources and owns the price cache key
pub struct PriceAggregator {
    sources: Vec<Arc<dyn SourceClient>>,
    normalizer: PriceNormalizer,
    fees: FeeSchedule,
    cache: Arc<TtlCache>,
    /// Bound on a whole fan-out; late providers count as failed for the cycle
    cycle_timeout: Duration,
}

impl PriceAggregator {
    pub fn new(
        sources: Vec<Arc<dyn SourceClient>>,
        normalizer: PriceNormalizer,
        fees: FeeSchedule,
        cache: Arc<TtlCache>,
        cycle_timeout: Duration,
    ) -> Self {
        Self {
            sources,
            normalizer,
            fees,
            cache,
            cycle_timeout,
        }
    }

    pub fn providers(&self) -> Vec<Provider> {
        self.sources.iter().map(|s| s.provider()).collect()
    }

    /// Cached snapshot, refreshing it when absent or expired
    pub async fn aggregate(&self) -> Result<Cached<PriceSnapshot>, EngineError> {
        self.cache
            .get_or_compute_with(PRICE_CACHE_KEY, move || self.collect())
            .await
    }

    /// Run one uncached cycle. Returns the snapshot and the TTL it may be cached for.
    pub async fn collect(&self) -> Result<(PriceSnapshot, Duration), EngineError> {
        let cycle_id = uuid::Uuid::new_v4();
        let deadline = tokio::time::Instant::now() + self.cycle_timeout;

        tracing::debug!(
            cycle_id = %cycle_id,
            sources = self.sources.len(),
            timeout_ms = self.cycle_timeout.as_millis() as u64,
            "Starting aggregation cycle"
        );

        // Every fetch is created up front and driven together; join_all is the fan-in barrier
        let fetches = self.sources.iter().map(|source| {
            let source = Arc::clone(source);
            async move {
                let provider = source.provider();
                let result = match tokio::time::timeout_at(deadline, source.fetch()).await {
                    Ok(result) => result,
                    Err(_) => Err(SourceError::TimedOut { provider }),
                };
                (source.ttl(), result)
            }
        });
        let outcomes = join_all(fetches).await;

        let mut table = NormalizedPriceTable::new();
        let mut coverage = Coverage::default();
        let mut failures = Vec::new();
        let mut ttl: Option<Duration> = None;

        for (source_ttl, outcome) in outcomes {
            match outcome {
                Ok(batch) => {
                    ttl = Some(ttl.map_or(source_ttl, |t| t.min(source_ttl)));
                    self.merge_batch(batch, &mut table, &mut coverage);
                }
                Err(e) => {
                    tracing::warn!(
                        cycle_id = %cycle_id,
                        provider = %e.provider(),
                        error = %e,
                        "Provider missing from this cycle"
                    );
                    coverage.missing.insert(e.provider(), e.to_string());
                    failures.push(e);
                }
            }
        }

        let ttl = match ttl {
            Some(ttl) => ttl,
            None => {
                tracing::error!(cycle_id = %cycle_id, "All providers failed");
                return Err(EngineError::AggregationFailed { failures });
            }
        };

        coverage.succeeded.sort();
        coverage.fallback_symbols.sort();

        if !coverage.fallback_symbols.is_empty() {
            tracing::debug!(
                cycle_id = %cycle_id,
                count = coverage.fallback_symbols.len(),
                "Symbols normalized via lowercase fallback"
            );
        }

        tracing::info!(
            cycle_id = %cycle_id,
            providers = coverage.succeeded.len(),
            missing = coverage.missing.len(),
            entries = table.len(),
            ttl_secs = ttl.as_secs(),
            "✅ Aggregation cycle complete"
        );

        Ok((
            PriceSnapshot {
                table,
                coverage,
                fetched_at: Utc::now(),
            },
            ttl,
        ))
    }

    fn merge_batch(&self, batch: SourceBatch, table: &mut NormalizedPriceTable, coverage: &mut Coverage) {
        let provider = batch.provider;
        let fee = self.fees.fee(provider);

        coverage.succeeded.push(provider);
        if batch.malformed > 0 {
            coverage.malformed.insert(provider, batch.malformed);
        }

        for record in batch.records {
            let normalized = self.normalizer.normalize(provider, &record.raw_symbol);
            if let Normalized::Fallback(asset) = &normalized {
                coverage.fallback_symbols.push(FallbackSymbol {
                    provider,
                    raw_symbol: record.raw_symbol.clone(),
                    asset: asset.clone(),
                });
            }
            table.insert(
                normalized.into_asset(),
                provider,
                PriceQuote {
                    price: record.price,
                    fee,
                },
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oracle::sources::MockSourceClient;
    use crate::types::RawPriceRecord;
    use rust_decimal_macros::dec;

    fn record(provider: Provider, symbol: &str, price: Decimal) -> RawPriceRecord {
        RawPriceRecord {
            provider,
            raw_symbol: symbol.to_string(),
            price,
            observed_at: Utc::now(),
        }
    }

    fn healthy(provider: Provider, ttl_secs: u64, records: Vec<RawPriceRecord>) -> Arc<dyn SourceClient> {
        let mut mock = MockSourceClient::new();
        mock.expect_provider().return_const(provider);
        mock.expect_ttl().return_const(Duration::from_secs(ttl_secs));
        mock.expect_fetch().returning(move || {
            Ok(SourceBatch {
                provider,
                records: records.clone(),
                malformed: 0,
            })
        });
        Arc::new(mock)
    }

    fn failing(provider: Provider) -> Arc<dyn SourceClient> {
        let mut mock = MockSourceClient::new();
        mock.expect_provider().return_const(provider);
        mock.expect_ttl().return_const(Duration::from_secs(60));
        mock.expect_fetch().returning(move || {
            Err(SourceError::Unavailable {
                provider,
                last_error: "HTTP 503 Service Unavailable".to_string(),
            })
        });
        Arc::new(mock)
    }

    fn aggregator(sources: Vec<Arc<dyn SourceClient>>) -> PriceAggregator {
        let fees = FeeSchedule::new(HashMap::from([
            (Provider::Binance, dec!(0.001)),
            (Provider::Kraken, dec!(0.0026)),
        ]))
        .unwrap();
        PriceAggregator::new(
            sources,
            PriceNormalizer::new(),
            fees,
            Arc::new(TtlCache::default()),
            Duration::from_secs(5),
        )
    }

    #[tokio::test]
    async fn test_partial_failure_keeps_healthy_providers() {
        let agg = aggregator(vec![
            healthy(Provider::Binance, 60, vec![record(Provider::Binance, "BTCUSDT", dec!(50000))]),
            failing(Provider::Okx),
            healthy(Provider::Kraken, 45, vec![record(Provider::Kraken, "XXBTZUSD", dec!(50100))]),
        ]);

        let (snapshot, ttl) = agg.collect().await.unwrap();
        let btc = CanonicalAssetId::from("bitcoin");

        assert_eq!(snapshot.table.len(), 2);
        assert_eq!(
            snapshot.table.get(&btc, Provider::Binance),
            Some(&PriceQuote { price: dec!(50000), fee: dec!(0.001) })
        );
        assert_eq!(
            snapshot.table.get(&btc, Provider::Kraken).map(|q| q.price),
            Some(dec!(50100))
        );
        assert_eq!(snapshot.coverage.succeeded, vec![Provider::Kraken, Provider::Binance]);
        assert!(snapshot.coverage.missing.contains_key(&Provider::Okx));
        // TTL follows the fastest-changing participant
        assert_eq!(ttl, Duration::from_secs(45));
    }

    #[tokio::test]
    async fn test_all_failed_is_aggregation_failure() {
        let agg = aggregator(vec![failing(Provider::Binance), failing(Provider::Kraken)]);

        match agg.aggregate().await {
            Err(EngineError::AggregationFailed { failures }) => assert_eq!(failures.len(), 2),
            other => panic!("expected AggregationFailed, got {:?}", other.map(|c| c.value)),
        }
    }

    #[tokio::test]
    async fn test_fallback_symbols_reported() {
        let agg = aggregator(vec![healthy(
            Provider::GateIo,
            60,
            vec![
                record(Provider::GateIo, "BTC_USDT", dec!(50000)),
                record(Provider::GateIo, "PEPE_USDT", dec!(0.000001)),
            ],
        )]);

        let (snapshot, _) = agg.collect().await.unwrap();
        assert_eq!(
            snapshot.coverage.fallback_symbols,
            vec![FallbackSymbol {
                provider: Provider::GateIo,
                raw_symbol: "PEPE_USDT".to_string(),
                asset: CanonicalAssetId::from("pepe_usdt"),
            }]
        );
        assert!(snapshot
            .table
            .get(&CanonicalAssetId::from("pepe_usdt"), Provider::GateIo)
            .is_some());
    }

    #[tokio::test]
    async fn test_empty_provider_counts_as_success() {
        let agg = aggregator(vec![healthy(Provider::Binance, 60, vec![])]);
        let (snapshot, _) = agg.collect().await.unwrap();
        assert!(snapshot.table.is_empty());
        assert_eq!(snapshot.coverage.succeeded, vec![Provider::Binance]);
    }

    #[tokio::test]
    async fn test_aggregate_is_cached() {
        let mut mock = MockSourceClient::new();
        mock.expect_provider().return_const(Provider::Binance);
        mock.expect_ttl().return_const(Duration::from_secs(60));
        mock.expect_fetch().times(1).returning(|| {
            Ok(SourceBatch {
                provider: Provider::Binance,
                records: vec![record(Provider::Binance, "ETHUSDT", dec!(3000))],
                malformed: 0,
            })
        });
        let agg = aggregator(vec![Arc::new(mock)]);

        let first = agg.aggregate().await.unwrap();
        let second = agg.aggregate().await.unwrap();
        assert!(Arc::ptr_eq(&first.value, &second.value));
    }

    struct SlowSource;

    #[async_trait::async_trait]
    impl SourceClient for SlowSource {
        fn provider(&self) -> Provider {
            Provider::Okx
        }

        fn ttl(&self) -> Duration {
            Duration::from_secs(60)
        }

        async fn fetch(&self) -> Result<SourceBatch, SourceError> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(SourceBatch::empty(Provider::Okx))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_provider_misses_deadline() {
        let agg = aggregator(vec![
            healthy(Provider::Binance, 60, vec![record(Provider::Binance, "BTCUSDT", dec!(50000))]),
            Arc::new(SlowSource),
        ]);

        let start = tokio::time::Instant::now();
        let (snapshot, _) = agg.collect().await.unwrap();

        assert!(start.elapsed() < Duration::from_secs(30));
        assert_eq!(snapshot.coverage.succeeded, vec![Provider::Binance]);
        assert!(snapshot.coverage.missing[&Provider::Okx].contains("deadline"));
    }

    #[test]
    fn test_fee_schedule_rejects_out_of_range() {
        assert!(FeeSchedule::new(HashMap::from([(Provider::Okx, dec!(1.0))])).is_err());
        assert!(FeeSchedule::new(HashMap::from([(Provider::Okx, dec!(-0.1))])).is_err());
        let fees = FeeSchedule::new(HashMap::from([(Provider::Okx, dec!(0.001))])).unwrap();
        assert_eq!(fees.fee(Provider::Okx), dec!(0.001));
        assert_eq!(fees.fee(Provider::Kraken), Decimal::ZERO);
    }
}
