//! Dashboard HTTP API
//!
//! REST endpoints over the query facade.

use axum::{
    extract::State,
    http::{HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use super::types::{ErrorResponse, PricesResponse};
use crate::arbitrage::QueryFacade;
use crate::error::EngineError;

/// Set when any input behind a response came from an expired cache entry
pub const STALE_HEADER: &str = "x-data-stale";

/// Create the API router with all endpoints
pub fn create_router(facade: Arc<QueryFacade>) -> Router {
    Router::new()
        .route("/api/opportunities", get(get_opportunities))
        .route("/api/report", get(get_report))
        .route("/api/prices", get(get_prices))
        .route("/api/conversion-rates", get(get_conversion_rates))
        .with_state(facade)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
}

// ─────────────────────────────────────────────────────────────────
// API Handlers
// ─────────────────────────────────────────────────────────────────

/// GET /api/opportunities - Current opportunities as a bare array
async fn get_opportunities(State(facade): State<Arc<QueryFacade>>) -> Response {
    match facade.get_opportunities().await {
        Ok(opportunities) => with_freshness(Json(opportunities.items), opportunities.stale),
        Err(e) => error_response(e),
    }
}

/// GET /api/report - Opportunities with coverage and degradation flags
async fn get_report(State(facade): State<Arc<QueryFacade>>) -> Response {
    match facade.report().await {
        Ok(report) => {
            let stale = report.is_stale();
            with_freshness(Json(report), stale)
        }
        Err(e) => error_response(e),
    }
}

/// GET /api/prices - Normalized prices per asset and venue
async fn get_prices(State(facade): State<Arc<QueryFacade>>) -> Response {
    match facade.prices().await {
        Ok(cached) => {
            let snapshot = &cached.value;
            let body = PricesResponse {
                prices: &snapshot.table,
                coverage: &snapshot.coverage,
                fetched_at: snapshot.fetched_at,
            };
            with_freshness(Json(body), cached.freshness.is_stale())
        }
        Err(e) => error_response(e),
    }
}

/// GET /api/conversion-rates - Fiat rates against the base currency
async fn get_conversion_rates(State(facade): State<Arc<QueryFacade>>) -> Response {
    match facade.rates().await {
        Ok(cached) => with_freshness(Json(cached.value.as_ref()), cached.freshness.is_stale()),
        Err(e) => error_response(e),
    }
}

fn with_freshness(body: impl IntoResponse, stale: bool) -> Response {
    let mut response = body.into_response();
    if stale {
        response
            .headers_mut()
            .insert(STALE_HEADER, HeaderValue::from_static("true"));
    }
    response
}

fn error_response(err: EngineError) -> Response {
    let status = match err {
        EngineError::AggregationFailed { .. } | EngineError::RateSourceUnavailable(_) => {
            StatusCode::SERVICE_UNAVAILABLE
        }
        EngineError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    tracing::error!(status = %status, error = %err, "Query failed");
    (status, Json(ErrorResponse::new(err.to_string()))).into_response()
}
