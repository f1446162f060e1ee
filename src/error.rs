//! Error types for the aggregation engine
//!
//! Provider-level failures stay recoverable and are absorbed by the
//! aggregator; only total failures reach callers as `EngineError`.

use thiserror::Error;

use crate::types::Provider;

/// Failure of a single provider fetch
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SourceError {
    #[error("{provider} unavailable: {last_error}")]
    Unavailable { provider: Provider, last_error: String },

    #[error("{provider} did not respond before the cycle deadline")]
    TimedOut { provider: Provider },
}

impl SourceError {
    pub fn provider(&self) -> Provider {
        match self {
            SourceError::Unavailable { provider, .. } | SourceError::TimedOut { provider } => {
                *provider
            }
        }
    }
}

/// A single unusable entry inside an otherwise valid payload
#[derive(Error, Debug, Clone, PartialEq)]
#[error("malformed record from {provider}: {reason}")]
pub struct MalformedRecord {
    pub provider: Provider,
    pub reason: String,
}

/// Errors surfaced to callers of the query facade
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    #[error("price aggregation failed: no provider succeeded ({})", format_failures(.failures))]
    AggregationFailed { failures: Vec<SourceError> },

    #[error("fiat rate source unavailable: {0}")]
    RateSourceUnavailable(String),

    #[error("invalid configuration: {0}")]
    Config(String),
}

fn format_failures(failures: &[SourceError]) -> String {
    if failures.is_empty() {
        return "no providers configured".to_string();
    }
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aggregation_failed_lists_providers() {
        let err = EngineError::AggregationFailed {
            failures: vec![
                SourceError::Unavailable {
                    provider: Provider::Kraken,
                    last_error: "HTTP 503".to_string(),
                },
                SourceError::TimedOut {
                    provider: Provider::Okx,
                },
            ],
        };
        let msg = err.to_string();
        assert!(msg.contains("Kraken unavailable: HTTP 503"));
        assert!(msg.contains("OKX did not respond"));
    }

    #[test]
    fn test_aggregation_failed_without_providers() {
        let err = EngineError::AggregationFailed { failures: vec![] };
        assert!(err.to_string().contains("no providers configured"));
    }
}
