pub mod api;
pub mod cache;
pub mod clock;
pub mod config;
pub mod error;
pub mod metrics;
pub mod observability;
pub mod rate_limit;
pub mod store;
pub mod summary;

use crate::api::{build_router, AppState};
use crate::clock::SystemClock;
use crate::config::AppConfig;
use crate::error::{ApiError, Result};
use crate::metrics::MetricsService;
use crate::summary::SummarySource;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;

/// Start the API server and run until it stops
pub async fn run(config: AppConfig, source: Arc<dyn SummarySource>) -> Result<()> {
    config.validate()?;

    info!("Starting ledger API");
    info!(
        max_requests = config.rate_limit.max_requests,
        window_ms = config.rate_limit.window_ms,
        algorithm = ?config.rate_limit.algorithm,
        enabled = config.rate_limit.enabled,
        "Rate limiting configured"
    );

    let metrics = if config.metrics.enabled {
        Some(MetricsService::new()?)
    } else {
        None
    };

    let state = AppState::new(&config, SystemClock::shared(), source);
    let app = build_router(state, metrics);

    let addr = config.bind_addr();
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    info!("Server listening on {}", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .map_err(|e| ApiError::Internal(format!("Server error: {}", e)))?;

    Ok(())
}
