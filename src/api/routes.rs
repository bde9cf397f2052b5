use axum::{
    http::Uri,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::api::handlers::combine;
use crate::api::middleware::AppError;
use crate::config::Config;
use crate::services::CombinePipeline;

/// Application state
#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub pipeline: Arc<CombinePipeline>,
}

/// Create router with application state
pub fn create_router_with_state(config: Config, pipeline: Arc<CombinePipeline>) -> Router {
    let state = AppState { config, pipeline };

    Router::new()
        .route("/health", get(health_check))
        .route("/api/combine/compile", post(combine::compile_plan))
        .route("/api/combine/execute", post(combine::execute_plan))
        .route("/api/combine/cache/stats", get(combine::cache_stats))
        .fallback(not_found)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Health check endpoint
async fn health_check() -> &'static str {
    "OK"
}

async fn not_found(uri: Uri) -> AppError {
    AppError::NotFound(format!("No route for {}", uri.path()))
}
