//! Arbitrage module - Opportunity detection and the query surface
//!
//! Pure detectors over a normalized price table plus the facade that
//! drives aggregation and fiat lookups for them.

pub mod detector;
mod facade;

pub use detector::{
    sort_opportunities, ArbitrageDetector, Detection, DetectionGaps, VenueComparison,
};
pub use facade::{Opportunities, OpportunityReport, QueryFacade, RatesStatus};
