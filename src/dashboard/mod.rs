//! Dashboard Module
//!
//! Read-only HTTP API over the query facade.
//! Only compiled when the `dashboard` feature is enabled.

mod api;
mod types;

pub use api::create_router;
pub use types::ErrorResponse;

use anyhow::{Context, Result};
use std::sync::Arc;

use crate::arbitrage::QueryFacade;

/// Bind and serve the API until the process is asked to stop
pub async fn serve(facade: Arc<QueryFacade>, bind: &str) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .with_context(|| format!("Failed to bind {}", bind))?;

    tracing::info!(bind = %bind, "🌐 API server listening");

    axum::serve(listener, create_router(facade))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Shutdown signal received");
        })
        .await
        .context("API server failed")
}
