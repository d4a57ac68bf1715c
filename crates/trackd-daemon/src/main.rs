//! trackd - media-fetch daemon.

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use trackd_daemon::{DaemonConfig, Server, Store, YtDlpFetcher};

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let config = DaemonConfig::load();
    info!(
        socket_path = %config.socket_path.display(),
        download_dir = %config.download_dir.display(),
        database_path = %config.database_path.display(),
        allowed_origins = ?config.allowed_origins,
        "starting trackd"
    );

    std::fs::create_dir_all(&config.download_dir).with_context(|| {
        format!(
            "failed to create download directory {}",
            config.download_dir.display()
        )
    })?;

    let store = Arc::new(Store::open(&config.database_path).context("failed to open catalog")?);
    let fetcher = Arc::new(YtDlpFetcher::new(
        config.extractor.clone(),
        config.download_dir.clone(),
        config.allowed_origins.clone(),
        Arc::clone(&store),
    ));

    let server = Server::new(config, fetcher, store);
    if !server.start().await.context("failed to start server")? {
        anyhow::bail!("server already running");
    }

    wait_for_shutdown_signal().await;
    info!("shutdown signal received");

    if !server.stop().await {
        error!("server was no longer running at shutdown");
    }

    Ok(())
}

async fn wait_for_shutdown_signal() {
    let mut sigterm = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
    {
        Ok(signal) => signal,
        Err(err) => {
            error!(error = %err, "failed to install SIGTERM handler");
            if let Err(err) = tokio::signal::ctrl_c().await {
                error!(error = %err, "failed to listen for ctrl-c");
            }
            return;
        },
    };

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(err) = result {
                error!(error = %err, "failed to listen for ctrl-c");
            }
        },
        _ = sigterm.recv() => {},
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}
