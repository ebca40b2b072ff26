//! HTTP control API
//!
//! Operators feed snapshots, run and stop chains, test pools and watch the
//! alert event stream.

pub mod handlers;
pub mod sse;

use axum::{
    routing::{get, post},
    Router,
};
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::engine::AlertEngine;
use crate::error::{Error, Result};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<AlertEngine>,
    /// Server port
    pub port: u16,
}

/// Create the API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health check (no prefix for health endpoint)
        .route("/health", get(handlers::health))
        .nest(
            "/api/v1",
            Router::new()
                .route("/status", get(handlers::status))
                .route("/snapshots", post(handlers::ingest_snapshots))
                .route("/chains/:chain_id/run", post(handlers::run_chain))
                .route("/chains/:chain_id/stop", post(handlers::stop_chain))
                .route("/pools/:pool_id/test", get(handlers::test_pool))
                .route("/events", get(sse::event_stream)),
        )
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// Serve the API on `listener` until `shutdown` completes
pub async fn serve<F>(listener: TcpListener, state: AppState, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let addr = listener
        .local_addr()
        .map_err(|e| Error::Http(format!("Failed to read listener address: {}", e)))?;
    info!("Starting HTTP server on {}", addr);

    axum::serve(listener, create_router(state))
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|e| Error::Http(format!("Server error: {}", e)))?;

    info!("HTTP server stopped");
    Ok(())
}
