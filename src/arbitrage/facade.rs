//! Read-only query surface
//!
//! Resolves prices and fiat rates together, runs the detectors and returns
//! either the bare opportunity list or a report that also carries the
//! degradation flags a caller needs to judge it.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;

use crate::arbitrage::detector::{ArbitrageDetector, DetectionGaps};
use crate::config::AppConfig;
use crate::error::EngineError;
use crate::oracle::sources::build_sources;
use crate::oracle::{
    Cached, Coverage, FeeSchedule, FiatRateSource, Freshness, PriceAggregator, PriceNormalizer,
    PriceSnapshot, TtlCache,
};
use crate::types::{ArbitrageOpportunity, FiatRateTable};

/// Whether cross-asset detection had rates to work with
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RatesStatus {
    Fresh,
    Stale { error: String },
    Unavailable { error: String },
}

/// Opportunities plus everything that limited them
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OpportunityReport {
    pub opportunities: Vec<ArbitrageOpportunity>,
    /// Served from an expired price snapshot after a failed refresh
    pub prices_stale: bool,
    pub rates: RatesStatus,
    pub coverage: Coverage,
    pub gaps: DetectionGaps,
    pub fetched_at: DateTime<Utc>,
}

impl RatesStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RatesStatus::Fresh => "fresh",
            RatesStatus::Stale { .. } => "stale",
            RatesStatus::Unavailable { .. } => "unavailable",
        }
    }
}

impl OpportunityReport {
    /// Built from at least one expired input
    pub fn is_stale(&self) -> bool {
        self.prices_stale || matches!(self.rates, RatesStatus::Stale { .. })
    }
}

/// Bare opportunity list with the degradation flag it was computed under
#[derive(Debug, Clone, PartialEq)]
pub struct Opportunities {
    pub items: Vec<ArbitrageOpportunity>,
    /// Prices or rates came from an expired cache entry
    pub stale: bool,
}

pub struct QueryFacade {
    aggregator: Arc<PriceAggregator>,
    fiat: Arc<FiatRateSource>,
    detector: ArbitrageDetector,
}

impl QueryFacade {
    pub fn new(
        aggregator: Arc<PriceAggregator>,
        fiat: Arc<FiatRateSource>,
        detector: ArbitrageDetector,
    ) -> Self {
        Self {
            aggregator,
            fiat,
            detector,
        }
    }

    /// Wire the HTTP sources, fiat endpoint and detector from configuration.
    /// Prices and rates share one cache instance.
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let cache = Arc::new(TtlCache::new(config.engine.stale_grace()));

        let sources = build_sources(config).context("Failed to build price sources")?;
        let fees = FeeSchedule::new(config.fee_map()).context("Invalid fee schedule")?;
        let aggregator = PriceAggregator::new(
            sources,
            PriceNormalizer::new(),
            fees,
            Arc::clone(&cache),
            config.engine.cycle_timeout(),
        );

        let fiat = FiatRateSource::from_config(&config.fiat, cache)
            .context("Failed to build fiat rate source")?;

        tracing::info!(
            providers = ?aggregator.providers(),
            "Query facade initialized"
        );

        Ok(Self::new(
            Arc::new(aggregator),
            Arc::new(fiat),
            ArbitrageDetector::from_config(&config.arbitrage),
        ))
    }

    pub async fn get_opportunities(&self) -> Result<Opportunities, EngineError> {
        let report = self.report().await?;
        Ok(Opportunities {
            stale: report.is_stale(),
            items: report.opportunities,
        })
    }

    /// Current normalized price snapshot
    pub async fn prices(&self) -> Result<Cached<PriceSnapshot>, EngineError> {
        self.aggregator.aggregate().await
    }

    /// Current fiat rate table
    pub async fn rates(&self) -> Result<Cached<FiatRateTable>, EngineError> {
        self.fiat.rates().await
    }

    pub async fn report(&self) -> Result<OpportunityReport, EngineError> {
        let (prices, rates) = tokio::join!(self.aggregator.aggregate(), self.fiat.rates());
        let prices = prices?;

        let (rates, rates_status) = match rates {
            Ok(cached) => {
                let status = match &cached.freshness {
                    Freshness::Fresh => RatesStatus::Fresh,
                    Freshness::Stale { error, .. } => RatesStatus::Stale {
                        error: error.clone(),
                    },
                };
                (Some(cached.value), status)
            }
            Err(e) => {
                tracing::warn!(error = %e, "Fiat rates unavailable, skipping cross-asset detection");
                (None, RatesStatus::Unavailable { error: e.to_string() })
            }
        };

        let snapshot = &prices.value;
        let detection = self.detector.detect(&snapshot.table, rates.as_deref());

        if prices.freshness.is_stale() {
            tracing::warn!(
                fetched_at = %snapshot.fetched_at,
                "Serving opportunities from a stale price snapshot"
            );
        }

        tracing::debug!(
            opportunities = detection.opportunities.len(),
            missing_rates = detection.gaps.missing_rates.len(),
            "Detection complete"
        );

        Ok(OpportunityReport {
            opportunities: detection.opportunities,
            prices_stale: prices.freshness.is_stale(),
            rates: rates_status,
            coverage: snapshot.coverage.clone(),
            gaps: detection.gaps,
            fetched_at: snapshot.fetched_at,
        })
    }
}
