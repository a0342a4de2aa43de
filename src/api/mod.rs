//! HTTP composition root: shared state, routes and middleware stack.

use crate::cache::KeyedCache;
use crate::clock::SharedClock;
use crate::config::AppConfig;
use crate::error::{ApiError, Result};
use crate::metrics::{metrics_handler, track_metrics, MetricsService};
use crate::observability::request_id_middleware;
use crate::rate_limit::{rate_limit_middleware, RateLimiter};
use crate::summary::{summary_cache_key, Summary, SummaryFilters, SummarySource};
use axum::{
    extract::{Path, Query, State},
    middleware,
    routing::get,
    Json, Router,
};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tower_http::trace::TraceLayer;

/// State shared by every request handler
#[derive(Clone)]
pub struct AppState {
    pub limiter: Arc<RateLimiter>,
    pub summary_cache: KeyedCache<Summary, ApiError>,
    pub source: Arc<dyn SummarySource>,
    pub summary_ttl: Duration,
}

impl AppState {
    /// Build the process-wide stores from configuration
    pub fn new(config: &AppConfig, clock: SharedClock, source: Arc<dyn SummarySource>) -> Self {
        Self {
            limiter: Arc::new(RateLimiter::new(config.rate_limit.clone(), clock.clone())),
            summary_cache: KeyedCache::with_config("summary", clock, &config.cache),
            source,
            summary_ttl: config.cache.summary_ttl(),
        }
    }
}

/// Build the application router
pub fn build_router(state: AppState, metrics: Option<MetricsService>) -> Router {
    let api = Router::new()
        .route("/health", get(health))
        .route("/summary/:user_id", get(get_summary))
        .with_state(state.clone());

    let mut app = Router::new().nest("/api", api);

    if state.limiter.config().enabled {
        app = app.layer(middleware::from_fn_with_state(
            state.limiter.clone(),
            rate_limit_middleware,
        ));
    }

    if let Some(metrics) = metrics {
        app = app.route("/metrics", get(metrics_handler).with_state(metrics));
    }

    app.layer(middleware::from_fn(track_metrics))
        .layer(middleware::from_fn(request_id_middleware))
        .layer(TraceLayer::new_for_http())
}

/// GET /api/health
async fn health() -> Json<Value> {
    Json(json!({ "status": "API is running" }))
}

/// GET /api/summary/:user_id: total income, expenses and balance, cached per
/// user and filter set
async fn get_summary(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    Query(filters): Query<SummaryFilters>,
) -> Result<Json<Value>> {
    let key = summary_cache_key(&user_id, &filters)?;
    let source = state.source.clone();

    let summary = state
        .summary_cache
        .get_or_set(&key, Some(state.summary_ttl), move || async move {
            source.calculate_summary(&user_id, &filters).await
        })
        .await?;

    Ok(Json(json!({ "summary": summary })))
}
