mod error;
mod handlers;

use crate::{
    config::Config,
    media::{FfmpegRemuxer, HttpStreamFetcher, MediaResolver, Remuxer, StreamFetcher, YtDlpExtractor},
};
use anyhow::{Context, Result};
use axum::{routing::get, Router};
use std::sync::Arc;
use tracing::{info, warn};

/// Immutable collaborators shared by every request.
#[derive(Clone)]
pub struct AppState {
    pub resolver: Arc<MediaResolver>,
    pub fetcher: Arc<dyn StreamFetcher>,
    pub remuxer: Arc<dyn Remuxer>,
}

impl AppState {
    pub fn from_config(config: &Config) -> Result<Self> {
        let extractor = YtDlpExtractor::new(&config.tools);
        let fetcher = HttpStreamFetcher::new(&config.tools)
            .context("Failed to build upstream HTTP client")?;
        let remuxer = FfmpegRemuxer::new(&config.tools, &config.remux);

        Ok(Self {
            resolver: Arc::new(MediaResolver::new(Arc::new(extractor))),
            fetcher: Arc::new(fetcher),
            remuxer: Arc::new(remuxer),
        })
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(handlers::index))
        .route("/health", get(handlers::health))
        .route("/info", get(handlers::info))
        .route("/download", get(handlers::download))
        .with_state(state)
}

pub async fn run(config: Config) -> Result<()> {
    if let Err(e) = MediaResolver::test_setup(&config.tools).await {
        warn!("Media tool setup test failed: {}", e);
    }

    let state = AppState::from_config(&config)?;
    let app = router(state);

    let addr = config.bind_address();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("Listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
