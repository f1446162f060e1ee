//! ArbScan binary
//!
//! Serves the opportunity API when built with `dashboard`, otherwise polls
//! the facade on a fixed interval and logs what it finds.

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use arbscan::arbitrage::QueryFacade;
use arbscan::config::{AppConfig, LogConfig};

#[tokio::main]
async fn main() -> Result<()> {
    let config = AppConfig::load().context("Failed to load configuration")?;
    init_tracing(&config.log);

    tracing::info!(config = %config.digest(), "🚀 ArbScan starting");

    let facade = Arc::new(QueryFacade::from_config(&config)?);

    #[cfg(feature = "dashboard")]
    return arbscan::dashboard::serve(facade, &config.server.bind).await;

    #[cfg(not(feature = "dashboard"))]
    return poll(facade, Duration::from_secs(config.engine.poll_interval_secs.max(1))).await;
}

fn init_tracing(log: &LogConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&log.level));

    let registry = tracing_subscriber::registry().with(filter);
    if log.json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

#[cfg_attr(feature = "dashboard", allow(dead_code))]
async fn poll(facade: Arc<QueryFacade>, every: Duration) -> Result<()> {
    let mut interval = tokio::time::interval(every);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = interval.tick() => {}
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Shutdown signal received");
                return Ok(());
            }
        }

        match facade.report().await {
            Ok(report) => {
                tracing::info!(
                    opportunities = report.opportunities.len(),
                    providers = report.coverage.succeeded.len(),
                    missing = report.coverage.missing.len(),
                    prices_stale = report.prices_stale,
                    rates = ?report.rates,
                    "📊 Scan complete"
                );
                for opp in &report.opportunities {
                    tracing::info!(
                        kind = ?opp.kind,
                        from = %opp.from_asset,
                        to = %opp.to_asset,
                        venue = opp.venue_or_pair.as_deref().unwrap_or("-"),
                        profit_percent = %opp.profit_percent.round_dp(4),
                        "Opportunity"
                    );
                }
            }
            Err(e) => tracing::error!(error = %e, "Scan failed"),
        }
    }
}
