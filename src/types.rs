//! Core types used throughout ArbScan
//!
//! Defines provider identifiers, canonical assets, raw and normalized price
//! records, and the opportunity records handed to callers.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Supported price providers (exchanges and aggregators)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    CoinGecko,
    Coinbase,
    Kraken,
    Binance,
    KuCoin,
    Okx,
    GateIo,
}

impl Provider {
    pub const ALL: [Provider; 7] = [
        Provider::CoinGecko,
        Provider::Coinbase,
        Provider::Kraken,
        Provider::Binance,
        Provider::KuCoin,
        Provider::Okx,
        Provider::GateIo,
    ];

    /// Configuration key (lowercase, the `config` crate folds keys to lowercase)
    pub fn key(&self) -> &'static str {
        match self {
            Provider::CoinGecko => "coingecko",
            Provider::Coinbase => "coinbase",
            Provider::Kraken => "kraken",
            Provider::Binance => "binance",
            Provider::KuCoin => "kucoin",
            Provider::Okx => "okx",
            Provider::GateIo => "gateio",
        }
    }

    /// Parse from a configuration key
    pub fn from_key(s: &str) -> Option<Self> {
        Provider::ALL
            .iter()
            .copied()
            .find(|p| p.key().eq_ignore_ascii_case(s.trim()))
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Provider::CoinGecko => write!(f, "CoinGecko"),
            Provider::Coinbase => write!(f, "Coinbase"),
            Provider::Kraken => write!(f, "Kraken"),
            Provider::Binance => write!(f, "Binance"),
            Provider::KuCoin => write!(f, "KuCoin"),
            Provider::Okx => write!(f, "OKX"),
            Provider::GateIo => write!(f, "Gate.io"),
        }
    }
}

/// Venue-independent asset identifier (lowercase slug, e.g. `bitcoin`)
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CanonicalAssetId(String);

impl CanonicalAssetId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CanonicalAssetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CanonicalAssetId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// One price point as reported by a provider, before normalization
#[derive(Debug, Clone, PartialEq)]
pub struct RawPriceRecord {
    pub provider: Provider,
    pub raw_symbol: String,
    pub price: Decimal,
    pub observed_at: DateTime<Utc>,
}

/// Quoted price annotated with the venue's proportional fee
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PriceQuote {
    pub price: Decimal,
    pub fee: Decimal,
}

impl PriceQuote {
    /// Price approximating realizable execution cost: `price × (1 + fee)`.
    /// `None` when the product leaves the decimal range.
    pub fn fee_adjusted(&self) -> Option<Decimal> {
        self.fee
            .checked_add(Decimal::ONE)
            .and_then(|factor| self.price.checked_mul(factor))
    }
}

/// `(asset, provider) -> quote`, ordered for deterministic iteration
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct NormalizedPriceTable {
    entries: BTreeMap<CanonicalAssetId, BTreeMap<Provider, PriceQuote>>,
}

impl NormalizedPriceTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a quote. A later quote for the same `(asset, provider)` wins.
    pub fn insert(&mut self, asset: CanonicalAssetId, provider: Provider, quote: PriceQuote) {
        self.entries.entry(asset).or_default().insert(provider, quote);
    }

    pub fn get(&self, asset: &CanonicalAssetId, provider: Provider) -> Option<&PriceQuote> {
        self.entries.get(asset)?.get(&provider)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&CanonicalAssetId, &BTreeMap<Provider, PriceQuote>)> {
        self.entries.iter()
    }

    /// Providers that contributed at least one quote
    pub fn providers(&self) -> Vec<Provider> {
        let mut providers: Vec<Provider> = self
            .entries
            .values()
            .flat_map(|quotes| quotes.keys().copied())
            .collect();
        providers.sort();
        providers.dedup();
        providers
    }

    /// Number of `(asset, provider)` entries
    pub fn len(&self) -> usize {
        self.entries.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Mean raw price per asset across every provider quoting it.
    /// Assets whose sum overflows are left out.
    pub fn merged_prices(&self) -> BTreeMap<CanonicalAssetId, Decimal> {
        let mut merged = BTreeMap::new();
        for (asset, quotes) in &self.entries {
            if quotes.is_empty() {
                continue;
            }
            let sum = quotes
                .values()
                .try_fold(Decimal::ZERO, |acc, q| acc.checked_add(q.price));
            match sum.and_then(|s| s.checked_div(Decimal::from(quotes.len()))) {
                Some(mean) => {
                    merged.insert(asset.clone(), mean);
                }
                None => tracing::warn!(asset = %asset, "Merged price out of decimal range, skipping asset"),
            }
        }
        merged
    }
}

/// Fiat conversion rates relative to a fixed base currency
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FiatRateTable {
    pub base: CanonicalAssetId,
    pub rates: BTreeMap<CanonicalAssetId, Decimal>,
}

impl FiatRateTable {
    /// Build a table; the base currency is always present with rate 1
    pub fn new(base: CanonicalAssetId, rates: BTreeMap<CanonicalAssetId, Decimal>) -> Self {
        let mut rates = rates;
        rates.insert(base.clone(), Decimal::ONE);
        Self { base, rates }
    }

    pub fn rate(&self, asset: &CanonicalAssetId) -> Option<Decimal> {
        self.rates.get(asset).copied()
    }
}

/// Which detector produced an opportunity
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OpportunityKind {
    CrossVenue,
    CrossAsset,
}

/// A detected profit opportunity. Produced per query, never persisted.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ArbitrageOpportunity {
    pub kind: OpportunityKind,
    #[serde(rename = "from")]
    pub from_asset: CanonicalAssetId,
    #[serde(rename = "to")]
    pub to_asset: CanonicalAssetId,
    #[serde(rename = "venue", skip_serializing_if = "Option::is_none")]
    pub venue_or_pair: Option<String>,
    #[serde(rename = "price", with = "rust_decimal::serde::float")]
    pub market_price_ratio: Decimal,
    #[serde(rename = "rate", with = "rust_decimal::serde::float")]
    pub reference_rate_ratio: Decimal,
    #[serde(rename = "profit", serialize_with = "serialize_percent")]
    pub profit_percent: Decimal,
}

/// `profit` is rendered as a JSON number rounded to two decimals
fn serialize_percent<S>(value: &Decimal, serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    rust_decimal::serde::float::serialize(&value.round_dp(2), serializer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_provider_key_roundtrip() {
        for provider in Provider::ALL {
            assert_eq!(Provider::from_key(provider.key()), Some(provider));
        }
        assert_eq!(Provider::from_key("GATEIO"), Some(Provider::GateIo));
        assert_eq!(Provider::from_key("bitstamp"), None);
    }

    #[test]
    fn test_fee_adjusted_price() {
        let quote = PriceQuote {
            price: dec!(100),
            fee: dec!(0.001),
        };
        assert_eq!(quote.fee_adjusted(), Some(dec!(100.1)));
    }

    #[test]
    fn test_fee_adjusted_overflow_is_none() {
        let quote = PriceQuote {
            price: Decimal::MAX,
            fee: dec!(0.001),
        };
        assert_eq!(quote.fee_adjusted(), None);
    }

    #[test]
    fn test_merged_prices_skips_overflowing_asset() {
        let mut table = NormalizedPriceTable::new();
        let junk = CanonicalAssetId::from("junk");
        let eth = CanonicalAssetId::from("ethereum");
        table.insert(junk.clone(), Provider::Okx, PriceQuote { price: Decimal::MAX, fee: dec!(0) });
        table.insert(junk.clone(), Provider::GateIo, PriceQuote { price: Decimal::MAX, fee: dec!(0) });
        table.insert(eth.clone(), Provider::Okx, PriceQuote { price: dec!(3000), fee: dec!(0) });

        let merged = table.merged_prices();
        assert!(!merged.contains_key(&junk));
        assert_eq!(merged.get(&eth), Some(&dec!(3000)));
    }

    #[test]
    fn test_merged_prices_average_across_providers() {
        let mut table = NormalizedPriceTable::new();
        let btc = CanonicalAssetId::from("bitcoin");
        table.insert(btc.clone(), Provider::Binance, PriceQuote { price: dec!(100), fee: dec!(0) });
        table.insert(btc.clone(), Provider::Kraken, PriceQuote { price: dec!(102), fee: dec!(0.0026) });

        let merged = table.merged_prices();
        assert_eq!(merged.get(&btc), Some(&dec!(101)));
        assert_eq!(table.len(), 2);
        assert_eq!(table.providers(), vec![Provider::Kraken, Provider::Binance]);
    }

    #[test]
    fn test_fiat_table_always_contains_base() {
        let table = FiatRateTable::new(CanonicalAssetId::from("usd"), BTreeMap::new());
        assert_eq!(table.rate(&CanonicalAssetId::from("usd")), Some(Decimal::ONE));
    }

    #[test]
    fn test_opportunity_json_shape() {
        let opp = ArbitrageOpportunity {
            kind: OpportunityKind::CrossAsset,
            from_asset: "bitcoin".into(),
            to_asset: "ethereum".into(),
            venue_or_pair: None,
            market_price_ratio: dec!(16.7),
            reference_rate_ratio: dec!(16.5),
            profit_percent: dec!(1.21212121),
        };

        let json = serde_json::to_value(&opp).unwrap();
        assert_eq!(json["from"], "bitcoin");
        assert_eq!(json["to"], "ethereum");
        assert_eq!(json["kind"], "cross_asset");
        assert_eq!(json["profit"].as_f64(), Some(1.21));
        assert_eq!(json["price"].as_f64(), Some(16.7));
        assert!(json.get("venue").is_none());
    }
}
