//! ArbScan Library
//!
//! Multi-source crypto price aggregation with cross-venue and cross-asset
//! arbitrage detection

pub mod arbitrage;
pub mod config;
pub mod error;
pub mod oracle;
pub mod types;

#[cfg(feature = "dashboard")]
pub mod dashboard;
