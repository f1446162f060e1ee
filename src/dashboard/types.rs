//! Dashboard API Types

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::oracle::Coverage;
use crate::types::NormalizedPriceTable;

/// Body returned with a non-2xx status
#[derive(Debug, Clone, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl ErrorResponse {
    pub fn new(msg: impl Into<String>) -> Self {
        Self { error: msg.into() }
    }
}

/// `/api/prices` body: `{asset: {provider: {price, fee}}}` plus coverage
#[derive(Debug, Serialize)]
pub struct PricesResponse<'a> {
    pub prices: &'a NormalizedPriceTable,
    pub coverage: &'a Coverage,
    pub fetched_at: DateTime<Utc>,
}
