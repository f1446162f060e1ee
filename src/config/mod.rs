//! Configuration management for ArbScan
//!
//! Loads from optional config files + environment variables via .env

mod types;

pub use types::*;

use anyhow::{bail, Context, Result};
use config::{Config, ConfigBuilder, Environment, File};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};

use crate::types::Provider;

/// Main application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub engine: EngineConfig,
    /// Keyed by `Provider::key()`
    pub providers: BTreeMap<String, ProviderSettings>,
    pub arbitrage: ArbitrageConfig,
    pub fiat: FiatConfig,
    pub server: ServerConfig,
    pub log: LogConfig,
}

/// Defaults per provider: (base_url, retries, ttl_secs, fee)
fn provider_defaults(provider: Provider) -> (&'static str, u32, u64, &'static str) {
    match provider {
        Provider::CoinGecko => ("https://api.coingecko.com", 3, 60, "0.0025"),
        Provider::Coinbase => ("https://api.coinbase.com", 2, 30, "0.005"),
        Provider::Kraken => ("https://api.kraken.com", 3, 45, "0.0026"),
        Provider::Binance => ("https://api.binance.com", 3, 60, "0.001"),
        Provider::KuCoin => ("https://api.kucoin.com", 2, 45, "0.001"),
        Provider::Okx => ("https://www.okx.com", 3, 60, "0.001"),
        Provider::GateIo => ("https://api.gateio.ws", 3, 60, "0.002"),
    }
}

impl AppConfig {
    /// Load configuration from file and environment
    pub fn load() -> Result<Self> {
        // Load .env file first
        dotenvy::dotenv().ok();

        let config = Self::defaults()?
            // Load config file if exists
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name("config/local").required(false))
            // Override with environment variables (ARBSCAN_*)
            .add_source(Environment::with_prefix("ARBSCAN").separator("__"))
            .build()
            .context("Failed to build configuration")?;

        let app_config: AppConfig = config
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        app_config.validate()?;
        Ok(app_config)
    }

    /// Builder pre-populated with every default
    fn defaults() -> Result<ConfigBuilder<config::builder::DefaultState>> {
        let mut builder = Config::builder()
            // Engine defaults
            .set_default("engine.cycle_timeout_ms", 15_000)?
            .set_default("engine.stale_grace_secs", 600)?
            .set_default("engine.poll_interval_secs", 30)?
            // Arbitrage defaults (decimals as strings to stay exact)
            .set_default("arbitrage.profit_threshold", "1.0001")?
            .set_default("arbitrage.min_difference_percent", "0.5")?
            .set_default("arbitrage.comparison_log_threshold", "0.0001")?
            // Fiat defaults
            .set_default("fiat.base_url", "https://api.frankfurter.app")?
            .set_default("fiat.base_currency", "USD")?
            .set_default("fiat.ttl_secs", 60)?
            .set_default("fiat.retries", 3)?
            .set_default("fiat.retry_base_delay_ms", 1000)?
            .set_default("fiat.request_timeout_ms", 10_000)?
            // Server defaults
            .set_default("server.bind", "127.0.0.1:3001")?
            // Logging defaults
            .set_default("log.json", false)?
            .set_default("log.level", "info")?;

        for provider in Provider::ALL {
            let (base_url, retries, ttl_secs, fee) = provider_defaults(provider);
            let prefix = format!("providers.{}", provider.key());
            builder = builder
                .set_default(format!("{prefix}.enabled"), true)?
                .set_default(format!("{prefix}.base_url"), base_url)?
                .set_default(format!("{prefix}.retries"), retries)?
                .set_default(format!("{prefix}.retry_base_delay_ms"), 1000)?
                .set_default(format!("{prefix}.ttl_secs"), ttl_secs)?
                .set_default(format!("{prefix}.fee"), fee)?
                .set_default(format!("{prefix}.request_timeout_ms"), 10_000)?;
        }

        Ok(builder)
    }

    /// Defaults only, no files or environment
    pub fn default_config() -> Result<Self> {
        let config = Self::defaults()?
            .build()
            .context("Failed to build default configuration")?;
        let app_config: AppConfig = config
            .try_deserialize()
            .context("Failed to deserialize default configuration")?;
        app_config.validate()?;
        Ok(app_config)
    }

    /// Reject values the engine cannot work with
    pub fn validate(&self) -> Result<()> {
        for (key, settings) in &self.providers {
            if Provider::from_key(key).is_none() {
                bail!("Unknown provider '{}' in configuration", key);
            }
            if settings.fee < Decimal::ZERO || settings.fee >= Decimal::ONE {
                bail!("Fee for provider '{}' must be in [0, 1), got {}", key, settings.fee);
            }
            if settings.enabled && settings.ttl_secs == 0 {
                bail!("ttl_secs for provider '{}' must be positive", key);
            }
        }

        if self.enabled_providers().is_empty() {
            bail!("At least one provider must be enabled");
        }
        if self.arbitrage.profit_threshold < Decimal::ONE {
            bail!(
                "arbitrage.profit_threshold must be >= 1, got {}",
                self.arbitrage.profit_threshold
            );
        }
        if self.arbitrage.min_difference_percent < Decimal::ZERO {
            bail!("arbitrage.min_difference_percent must be non-negative");
        }
        if self.engine.cycle_timeout_ms == 0 {
            bail!("engine.cycle_timeout_ms must be positive");
        }

        Ok(())
    }

    /// Enabled providers in declaration order
    pub fn enabled_providers(&self) -> Vec<(Provider, &ProviderSettings)> {
        Provider::ALL
            .iter()
            .filter_map(|&p| {
                self.providers
                    .get(p.key())
                    .filter(|s| s.enabled)
                    .map(|s| (p, s))
            })
            .collect()
    }

    /// Fee per enabled provider
    pub fn fee_map(&self) -> HashMap<Provider, Decimal> {
        self.enabled_providers()
            .into_iter()
            .map(|(p, s)| (p, s.fee))
            .collect()
    }

    /// Generate a digest of the config for logging
    pub fn digest(&self) -> String {
        let providers: Vec<&str> = self
            .enabled_providers()
            .iter()
            .map(|(p, _)| p.key())
            .collect();
        format!(
            "providers={:?} profit_threshold={} min_diff_pct={} fiat_ttl={}s cycle_timeout={}ms",
            providers,
            self.arbitrage.profit_threshold,
            self.arbitrage.min_difference_percent,
            self.fiat.ttl_secs,
            self.engine.cycle_timeout_ms
        )
    }
}

impl std::fmt::Display for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.digest())
    }
}
