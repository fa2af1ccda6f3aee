//! HTTP surface for the launch-data service (axum).
//!
//! Routes, request/response DTOs and the error→status mapping live
//! here; all business logic is in `tma-core` behind the flow layer.

pub mod error;
pub mod routes;

use std::sync::Arc;

use tma_core::{config::Config, flows::Flows, journal::ErrorJournal, Result};

/// Shared application state. Read-only per request: each request builds
/// and owns its own protocol client inside the flow layer.
#[derive(Clone)]
pub struct AppState {
    pub flows: Arc<Flows>,
    pub journal: ErrorJournal,
}

/// Serve the API until the process is stopped.
pub async fn run(cfg: Arc<Config>, state: AppState) -> Result<()> {
    let app = routes::router(state);

    let listener = tokio::net::TcpListener::bind(&cfg.bind_addr).await?;
    tracing::info!(addr = %cfg.bind_addr, "launch-data service listening");
    axum::serve(listener, app).await?;
    Ok(())
}
