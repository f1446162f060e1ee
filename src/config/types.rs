//! Configuration section types

use rust_decimal::Decimal;
use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    /// Deadline for a whole aggregation cycle in milliseconds
    pub cycle_timeout_ms: u64,
    /// How long an expired cache entry may still be served after a failed refresh
    /// (seconds, 0 disables stale serving)
    pub stale_grace_secs: u64,
    /// Polling interval for the headless loop in seconds
    pub poll_interval_secs: u64,
}

impl EngineConfig {
    pub fn cycle_timeout(&self) -> Duration {
        Duration::from_millis(self.cycle_timeout_ms)
    }

    pub fn stale_grace(&self) -> Option<Duration> {
        (self.stale_grace_secs > 0).then(|| Duration::from_secs(self.stale_grace_secs))
    }
}

/// Per-provider connection and caching settings
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderSettings {
    /// Poll this provider
    pub enabled: bool,
    /// Public REST base URL
    pub base_url: String,
    /// Total attempts per fetch
    pub retries: u32,
    /// Backoff base; attempt `n` waits `n × base`
    pub retry_base_delay_ms: u64,
    /// Freshness window for this provider's prices
    pub ttl_secs: u64,
    /// Proportional taker fee (0.001 = 0.1%)
    pub fee: Decimal,
    /// Per-request HTTP timeout
    pub request_timeout_ms: u64,
}

impl ProviderSettings {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            attempts: self.retries.max(1),
            base_delay: Duration::from_millis(self.retry_base_delay_ms),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ArbitrageConfig {
    /// Cross-asset multiplier; market ratio must exceed `reference × threshold`
    pub profit_threshold: Decimal,
    /// Cross-venue minimum spread in percent
    pub min_difference_percent: Decimal,
    /// Pairwise venue differences above this are logged
    pub comparison_log_threshold: Decimal,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FiatConfig {
    pub base_url: String,
    /// Base currency code; all rates are relative to it
    pub base_currency: String,
    pub ttl_secs: u64,
    pub retries: u32,
    pub retry_base_delay_ms: u64,
    pub request_timeout_ms: u64,
}

impl FiatConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            attempts: self.retries.max(1),
            base_delay: Duration::from_millis(self.retry_base_delay_ms),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Bind address for the opportunities API
    pub bind: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LogConfig {
    /// Emit JSON lines instead of human-readable output
    pub json: bool,
    /// Default filter when RUST_LOG is unset
    pub level: String,
}

/// Attempt count and linear backoff base
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    /// Delay after failed attempt `attempt` (1-based)
    pub fn delay_after(&self, attempt: u32) -> Duration {
        self.base_delay * attempt
    }
}
