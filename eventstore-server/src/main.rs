//! Event Store Server - HTTP API for the event store

mod api;
mod config;
mod protocol;

use clap::Parser;
use config::CliArgs;
use eventstore_core::EventStore;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

fn init_logging(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false);

    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Resolves on SIGINT or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT, shutting down"),
        _ = terminate => info!("Received SIGTERM, shutting down"),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = CliArgs::parse().to_server_config();
    init_logging(config.log_json);

    info!("Starting event store server...");
    info!("Storage: {}", config.db_uri);

    let store = Arc::new(EventStore::open(&config.db_uri, config.engine.clone())?);

    let app = api::create_router(store.clone());

    let listener = tokio::net::TcpListener::bind(&config.http_addr).await?;
    info!("Event store listening on {}", config.http_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Flushing store before exit");
    let closing = store.clone();
    tokio::task::spawn_blocking(move || closing.close()).await??;

    info!("Server shut down");
    Ok(())
}
