use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use imgscope::{Config, ImageService, server};
use tokio::net::TcpListener;
use tracing::{info, warn};

pub async fn run(config: Config, bind: SocketAddr) -> Result<()> {
    if config.api_key.is_none() {
        warn!("API_KEY is not set; data and cache endpoints are open");
    }

    let service = Arc::new(ImageService::from_config(Arc::new(config)));
    let listener = TcpListener::bind(bind)
        .await
        .with_context(|| format!("Failed to bind {bind}"))?;

    server::serve(listener, service, shutdown_signal())
        .await
        .context("HTTP server failed")?;

    info!("server stopped");
    Ok(())
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("shutdown requested"),
        Err(e) => {
            warn!("cannot listen for ctrl-c: {e}");
            std::future::pending::<()>().await;
        }
    }
}
