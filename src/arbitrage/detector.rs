//! Arbitrage detection over one aggregation cycle
//!
//! Two detectors share the same snapshot:
//! - cross-venue: the same asset quoted apart by more than a minimum spread
//!   once each venue's fee is applied
//! - cross-asset: the market-implied ratio of two assets beating their fiat
//!   reference ratio by more than a multiplicative threshold
//!
//! All arithmetic is `Decimal`; thresholds live in fractions of a percent.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Serialize;
use std::collections::BTreeSet;

use crate::config::ArbitrageConfig;
use crate::types::{
    ArbitrageOpportunity, CanonicalAssetId, FiatRateTable, NormalizedPriceTable, OpportunityKind,
    PriceQuote, Provider,
};

const HUNDRED: Decimal = dec!(100);

/// Inputs the detectors could not use, recorded instead of treated as zero
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DetectionGaps {
    /// `(provider, asset)` whose price was borrowed from the other side of a venue pair
    pub substituted_prices: BTreeSet<(Provider, CanonicalAssetId)>,
    /// Assets priced by the market but absent from (or unusable in) the fiat table
    pub missing_rates: BTreeSet<CanonicalAssetId>,
}

/// Fee-adjusted price difference for one asset between two venues
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VenueComparison {
    pub asset: CanonicalAssetId,
    pub venue_a: Provider,
    pub venue_b: Provider,
    pub price_a: Decimal,
    pub price_b: Decimal,
    pub difference: Decimal,
    /// Venue whose missing price was replaced by the other venue's
    pub substituted: Option<Provider>,
}

/// Detector output for one cycle
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Detection {
    pub opportunities: Vec<ArbitrageOpportunity>,
    pub gaps: DetectionGaps,
}

#[derive(Debug, Clone)]
pub struct ArbitrageDetector {
    /// Cross-venue spread (percent) that must be exceeded
    min_difference_percent: Decimal,
    /// Cross-asset multiplier slightly above 1
    profit_threshold: Decimal,
    /// Pairwise venue differences above this are logged
    comparison_log_threshold: Decimal,
}

impl ArbitrageDetector {
    pub fn new(
        min_difference_percent: Decimal,
        profit_threshold: Decimal,
        comparison_log_threshold: Decimal,
    ) -> Self {
        Self {
            min_difference_percent,
            profit_threshold,
            comparison_log_threshold,
        }
    }

    pub fn from_config(config: &ArbitrageConfig) -> Self {
        Self::new(
            config.min_difference_percent,
            config.profit_threshold,
            config.comparison_log_threshold,
        )
    }

    /// Run both detectors. Without fiat rates only cross-venue runs.
    pub fn detect(&self, table: &NormalizedPriceTable, rates: Option<&FiatRateTable>) -> Detection {
        let mut gaps = DetectionGaps::default();

        let comparisons = self.compare_venues(table, &mut gaps);
        tracing::debug!(
            comparisons = comparisons.len(),
            substituted = gaps.substituted_prices.len(),
            "Venue comparisons computed"
        );

        let mut opportunities = self.cross_venue(table);
        if let Some(rates) = rates {
            opportunities.extend(self.cross_asset(table, rates, &mut gaps));
        }
        sort_opportunities(&mut opportunities);

        Detection { opportunities, gaps }
    }

    /// Assets quoted by at least two venues whose fee-adjusted spread exceeds the minimum
    pub fn cross_venue(&self, table: &NormalizedPriceTable) -> Vec<ArbitrageOpportunity> {
        let mut opportunities = Vec::new();

        for (asset, quotes) in table.iter() {
            if quotes.len() < 2 {
                continue;
            }

            let adjusted: Vec<(Provider, Decimal)> = quotes
                .iter()
                .filter_map(|(provider, quote)| match quote.fee_adjusted() {
                    Some(price) => Some((*provider, price)),
                    None => {
                        tracing::warn!(asset = %asset, provider = %provider, "Fee-adjusted price out of range, skipping quote");
                        None
                    }
                })
                .collect();
            if adjusted.len() < 2 {
                continue;
            }

            // Ties resolve to the earliest provider
            let Some(&(min_venue, min)) = adjusted
                .iter()
                .reduce(|best, candidate| if candidate.1 < best.1 { candidate } else { best })
            else {
                continue;
            };
            let Some(&(max_venue, max)) = adjusted
                .iter()
                .reduce(|best, candidate| if candidate.1 > best.1 { candidate } else { best })
            else {
                continue;
            };

            if min <= Decimal::ZERO {
                continue;
            }

            let (Some(ratio), Some(spread_percent)) = (
                max.checked_div(min),
                (max - min).checked_div(min).and_then(|r| r.checked_mul(HUNDRED)),
            ) else {
                continue;
            };

            if spread_percent > self.min_difference_percent {
                opportunities.push(ArbitrageOpportunity {
                    kind: OpportunityKind::CrossVenue,
                    from_asset: asset.clone(),
                    to_asset: asset.clone(),
                    venue_or_pair: Some(format!("{} -> {}", min_venue, max_venue)),
                    market_price_ratio: ratio,
                    reference_rate_ratio: Decimal::ONE,
                    profit_percent: spread_percent,
                });
            }
        }

        opportunities
    }

    /// Pairwise fee-adjusted differences for every venue pair.
    ///
    /// When only one venue of a pair quotes an asset, its price stands in for
    /// the missing side. This keeps the pair in the comparison set at the cost
    /// of reporting a zero difference, and every substitution is recorded in
    /// `gaps` so the loss is visible.
    pub fn compare_venues(
        &self,
        table: &NormalizedPriceTable,
        gaps: &mut DetectionGaps,
    ) -> Vec<VenueComparison> {
        let providers = table.providers();
        let mut comparisons = Vec::new();

        for (i, &venue_a) in providers.iter().enumerate() {
            for &venue_b in &providers[i + 1..] {
                for (asset, quotes) in table.iter() {
                    // An out-of-range quote counts as missing
                    let price_a = quotes.get(&venue_a).and_then(PriceQuote::fee_adjusted);
                    let price_b = quotes.get(&venue_b).and_then(PriceQuote::fee_adjusted);

                    let (price_a, price_b, substituted) = match (price_a, price_b) {
                        (Some(a), Some(b)) => (a, b, None),
                        (Some(a), None) => (a, a, Some(venue_b)),
                        (None, Some(b)) => (b, b, Some(venue_a)),
                        (None, None) => continue,
                    };

                    if let Some(venue) = substituted {
                        gaps.substituted_prices.insert((venue, asset.clone()));
                    }

                    let difference = (price_a - price_b).abs();
                    if difference > self.comparison_log_threshold {
                        tracing::debug!(
                            asset = %asset,
                            venue_a = %venue_a,
                            venue_b = %venue_b,
                            difference = %difference,
                            "Price difference between venues"
                        );
                    }

                    comparisons.push(VenueComparison {
                        asset: asset.clone(),
                        venue_a,
                        venue_b,
                        price_a,
                        price_b,
                        difference,
                        substituted,
                    });
                }
            }
        }

        comparisons
    }

    /// Ordered asset pairs whose market ratio beats the fiat reference ratio
    pub fn cross_asset(
        &self,
        table: &NormalizedPriceTable,
        rates: &FiatRateTable,
        gaps: &mut DetectionGaps,
    ) -> Vec<ArbitrageOpportunity> {
        let merged = table.merged_prices();

        let mut usable: Vec<(&CanonicalAssetId, Decimal, Decimal)> = Vec::new();
        for (asset, price) in &merged {
            match rates.rate(asset) {
                Some(rate) if rate > Decimal::ZERO && *price > Decimal::ZERO => {
                    usable.push((asset, *price, rate))
                }
                _ => {
                    gaps.missing_rates.insert(asset.clone());
                }
            }
        }

        let mut opportunities = Vec::new();
        for &(from, price_from, rate_from) in &usable {
            for &(to, price_to, rate_to) in &usable {
                if from == to {
                    continue;
                }

                let (Some(market), Some(reference)) =
                    (price_from.checked_div(price_to), rate_from.checked_div(rate_to))
                else {
                    tracing::debug!(from = %from, to = %to, "Ratio out of decimal range, skipping pair");
                    continue;
                };

                let Some(hurdle) = reference.checked_mul(self.profit_threshold) else {
                    continue;
                };

                if market > hurdle {
                    let Some(profit_percent) = (market - reference)
                        .checked_div(reference)
                        .and_then(|r| r.checked_mul(HUNDRED))
                    else {
                        continue;
                    };
                    opportunities.push(ArbitrageOpportunity {
                        kind: OpportunityKind::CrossAsset,
                        from_asset: from.clone(),
                        to_asset: to.clone(),
                        venue_or_pair: None,
                        market_price_ratio: market,
                        reference_rate_ratio: reference,
                        profit_percent,
                    });
                }
            }
        }

        opportunities
    }
}

/// Deterministic order: profit descending, then kind, assets and venue
pub fn sort_opportunities(opportunities: &mut [ArbitrageOpportunity]) {
    opportunities.sort_by(|a, b| {
        b.profit_percent
            .cmp(&a.profit_percent)
            .then_with(|| a.kind.cmp(&b.kind))
            .then_with(|| a.from_asset.cmp(&b.from_asset))
            .then_with(|| a.to_asset.cmp(&b.to_asset))
            .then_with(|| a.venue_or_pair.cmp(&b.venue_or_pair))
    });
}
