//! Symbol normalization
//!
//! Maps each provider's spelling of a market onto a canonical asset id.
//! Unknown symbols fall back to their lowercase form and are flagged so the
//! aggregator can report coverage gaps.

use crate::types::{CanonicalAssetId, Provider};

/// Result of normalizing one raw symbol
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Normalized {
    /// Found in the provider's lookup table
    Mapped(CanonicalAssetId),
    /// Not in the table; lowercase of the raw symbol
    Fallback(CanonicalAssetId),
}

impl Normalized {
    pub fn asset(&self) -> &CanonicalAssetId {
        match self {
            Normalized::Mapped(id) | Normalized::Fallback(id) => id,
        }
    }

    pub fn into_asset(self) -> CanonicalAssetId {
        match self {
            Normalized::Mapped(id) | Normalized::Fallback(id) => id,
        }
    }

    pub fn is_fallback(&self) -> bool {
        matches!(self, Normalized::Fallback(_))
    }
}

const COINGECKO: &[(&str, &str)] = &[
    ("bitcoin", "bitcoin"),
    ("ethereum", "ethereum"),
    ("binancecoin", "binancecoin"),
];

const COINBASE: &[(&str, &str)] = &[("BTC", "bitcoin"), ("ETH", "ethereum")];

const KRAKEN: &[(&str, &str)] = &[
    ("XXBTZUSD", "bitcoin"),
    ("XETHZUSD", "ethereum"),
    ("XXBT", "bitcoin"),
    ("XETH", "ethereum"),
];

const BINANCE: &[(&str, &str)] = &[
    ("BTCUSDT", "bitcoin"),
    ("ETHUSDT", "ethereum"),
    ("BNBUSDT", "binancecoin"),
    ("XRPUSDT", "ripple"),
    ("ADAUSDT", "cardano"),
];

const KUCOIN: &[(&str, &str)] = &[
    ("BTC-USDT", "bitcoin"),
    ("ETH-USDT", "ethereum"),
    ("BNB-USDT", "binancecoin"),
    ("XRP-USDT", "ripple"),
    ("ADA-USDT", "cardano"),
];

const OKX: &[(&str, &str)] = &[
    ("BTC-USDT", "bitcoin"),
    ("ETH-USDT", "ethereum"),
    ("BNB-USDT", "binancecoin"),
    ("XRP-USDT", "ripple"),
    ("ADA-USDT", "cardano"),
    ("SOL-USDT", "solana"),
    ("DOT-USDT", "polkadot"),
    ("DOGE-USDT", "dogecoin"),
];

const GATEIO: &[(&str, &str)] = &[
    ("BTC_USDT", "bitcoin"),
    ("ETH_USDT", "ethereum"),
    ("BNB_USDT", "binancecoin"),
    ("XRP_USDT", "ripple"),
    ("ADA_USDT", "cardano"),
    ("SOL_USDT", "solana"),
    ("DOT_USDT", "polkadot"),
    ("DOGE_USDT", "dogecoin"),
];

/// Static per-provider symbol tables
#[derive(Debug, Clone, Copy, Default)]
pub struct PriceNormalizer;

impl PriceNormalizer {
    pub fn new() -> Self {
        Self
    }

    fn table(provider: Provider) -> &'static [(&'static str, &'static str)] {
        match provider {
            Provider::CoinGecko => COINGECKO,
            Provider::Coinbase => COINBASE,
            Provider::Kraken => KRAKEN,
            Provider::Binance => BINANCE,
            Provider::KuCoin => KUCOIN,
            Provider::Okx => OKX,
            Provider::GateIo => GATEIO,
        }
    }

    /// Canonical id for a provider symbol. Pure: same input, same output.
    pub fn normalize(&self, provider: Provider, raw_symbol: &str) -> Normalized {
        Self::table(provider)
            .iter()
            .find(|(symbol, _)| *symbol == raw_symbol)
            .map(|(_, canonical)| Normalized::Mapped(CanonicalAssetId::from(*canonical)))
            .unwrap_or_else(|| Normalized::Fallback(CanonicalAssetId::new(raw_symbol.to_lowercase())))
    }

    /// Raw symbols a provider is known to quote; used to build request filters
    pub fn known_symbols(&self, provider: Provider) -> Vec<&'static str> {
        Self::table(provider).iter().map(|(symbol, _)| *symbol).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_table_entry_maps() {
        let normalizer = PriceNormalizer::new();
        for provider in Provider::ALL {
            for (symbol, canonical) in PriceNormalizer::table(provider) {
                assert_eq!(
                    normalizer.normalize(provider, symbol),
                    Normalized::Mapped(CanonicalAssetId::from(*canonical)),
                    "{provider} {symbol}"
                );
            }
        }
    }

    #[test]
    fn test_venue_spellings_converge() {
        let n = PriceNormalizer::new();
        let btc = CanonicalAssetId::from("bitcoin");
        assert_eq!(n.normalize(Provider::Binance, "BTCUSDT").asset(), &btc);
        assert_eq!(n.normalize(Provider::Okx, "BTC-USDT").asset(), &btc);
        assert_eq!(n.normalize(Provider::GateIo, "BTC_USDT").asset(), &btc);
        assert_eq!(n.normalize(Provider::Kraken, "XXBTZUSD").asset(), &btc);
        assert_eq!(n.normalize(Provider::Coinbase, "BTC").asset(), &btc);
    }

    #[test]
    fn test_unknown_symbol_falls_back_lowercase() {
        let n = PriceNormalizer::new();
        let result = n.normalize(Provider::KuCoin, "PEPE-USDT");
        assert!(result.is_fallback());
        assert_eq!(result.into_asset(), CanonicalAssetId::from("pepe-usdt"));
    }

    #[test]
    fn test_tables_are_provider_specific() {
        let n = PriceNormalizer::new();
        // Gate.io spelling is not known to Binance
        assert!(n.normalize(Provider::Binance, "BTC_USDT").is_fallback());
    }

    #[test]
    fn test_normalize_is_deterministic() {
        let n = PriceNormalizer::new();
        assert_eq!(
            n.normalize(Provider::Okx, "SOL-USDT"),
            n.normalize(Provider::Okx, "SOL-USDT")
        );
        assert_eq!(
            n.normalize(Provider::Okx, "Weird-Coin"),
            n.normalize(Provider::Okx, "Weird-Coin")
        );
    }
}
