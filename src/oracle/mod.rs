//! Oracle module - Multi-source price aggregation
//!
//! Polls REST price providers and a fiat rate endpoint, normalizes venue
//! symbols into canonical assets and publishes the results through one
//! shared TTL cache.

mod aggregator;
pub mod cache;
pub mod fiat;
pub mod normalizer;
pub mod sources;

pub use aggregator::{
    Coverage, FallbackSymbol, FeeSchedule, PriceAggregator, PriceSnapshot, PRICE_CACHE_KEY,
};
pub use cache::{Cached, Freshness, TtlCache};
pub use fiat::{FiatRateSource, HttpRateFetcher, RateFetcher, FIAT_CACHE_KEY};
pub use normalizer::{Normalized, PriceNormalizer};
pub use sources::{SourceBatch, SourceClient};
