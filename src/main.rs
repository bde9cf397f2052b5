use axum::Router;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{error, info};

use db_query_combine::api;
use db_query_combine::config::Config;
use db_query_combine::services::{CombinePipeline, PipelineConfig};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::from_env().map_err(|e| {
        eprintln!("Failed to load configuration: {}", e);
        e
    })?;

    // Initialize logging, RUST_LOG wins over the configured level
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.logging.level)),
        )
        .init();

    let pipeline_config = PipelineConfig::from_config(&config).map_err(|e| {
        error!("Invalid pipeline configuration: {}", e);
        e.to_string()
    })?;
    info!(
        "Combine engine: {} backend, {} workers, {}s timeout",
        pipeline_config.backend,
        pipeline_config.max_workers,
        pipeline_config.timeout.as_secs()
    );
    let pipeline = Arc::new(CombinePipeline::new(pipeline_config));

    // Create router with state
    let app: Router = api::routes::create_router_with_state(config.clone(), pipeline);

    // Start server
    let addr: SocketAddr = config.server_address().parse()?;
    info!("Server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
