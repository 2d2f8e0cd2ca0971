//! proxypool - Entry Point
//!
//! Loads the endpoint list from the environment and serves the CONNECT
//! gateway until shutdown.

use std::sync::Arc;

use anyhow::Context;
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use proxypool::config::{Config, LogConfig};
use proxypool::{Pool, ProxyServer};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env().context("Failed to load configuration")?;
    init_tracing(&config.log);

    info!("Starting proxypool");

    let pool = Pool::new(config.pool_config()).context("Failed to build TLS connector")?;
    let options = config.pool.endpoint_options();
    for url in &config.pool.endpoints {
        pool.add_endpoint(url, options)
            .with_context(|| format!("Invalid entry in POOL_ENDPOINTS: {}", url))?;
    }
    if pool.is_empty() {
        warn!("POOL_ENDPOINTS is empty, every CONNECT will be answered with 503");
    }
    info!("Loaded {} proxy endpoints", pool.len());

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let server = ProxyServer::new(config.gateway.clone(), Arc::new(pool));
    let server_task = tokio::spawn(async move {
        if let Err(e) = server.run(shutdown_rx).await {
            error!("Gateway error: {}", e);
        }
    });

    info!("Gateway started on {}", config.gateway_addr());

    shutdown_signal().await;
    info!("Shutdown signal received");

    let _ = shutdown_tx.send(true);
    let _ = server_task.await;

    info!("proxypool stopped");
    Ok(())
}

fn init_tracing(log: &LogConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("proxypool={}", log.level)));
    let registry = tracing_subscriber::registry().with(filter);

    if log.format == "json" {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer()).init();
    }
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
