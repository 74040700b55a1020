//! # Tenant Gateway - Main Entry Point
//!
//! Loads the configuration, sets up logging and metrics, then serves the redirect stack
//! until SIGINT or SIGTERM.
//!
//! The configuration path comes from `TENANT_GATEWAY_CONFIG` and defaults to
//! `config/gateway.yaml`. Individual fields can be overridden through
//! `TENANT_GATEWAY_<FIELD>` variables.

use anyhow::Context;
use tokio::signal;
use tracing::{error, info};

use tenant_gateway::core::config::GatewayConfig;
use tenant_gateway::observability::{init_metrics, init_tracing};
use tenant_gateway::GatewayServer;

const CONFIG_ENV: &str = "TENANT_GATEWAY_CONFIG";
const DEFAULT_CONFIG_PATH: &str = "config/gateway.yaml";

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        // Logging may not be up yet if the configuration failed to load.
        eprintln!("tenant-gateway: {:#}", e);
        error!(error = %format!("{:#}", e), "Gateway exited with an error");
        std::process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    let config_path =
        std::env::var(CONFIG_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());

    let config = GatewayConfig::load_from_file(&config_path)
        .await
        .with_context(|| format!("loading configuration from {}", config_path))?;

    init_tracing(&config.observability.logging);
    info!(version = env!("CARGO_PKG_VERSION"), config = %config_path, "Starting tenant gateway");

    init_metrics(&config.observability.metrics, &config.server.bind_address)
        .context("starting metrics exporter")?;

    info!(
        target_namespace = %config.target_namespace,
        physical = %config.physical_cluster.server,
        virtual_cluster = %config.virtual_cluster.server,
        rules = config.redirect.rules.len(),
        "Configuration loaded"
    );

    let server = GatewayServer::bind(&config)
        .await
        .context("binding gateway listener")?;
    server.run(shutdown_signal()).await?;

    info!("Tenant gateway stopped");
    Ok(())
}

/// Resolves on the first SIGTERM or SIGINT
async fn shutdown_signal() {
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    tokio::select! {
        _ = terminate => info!("Received SIGTERM"),
        result = signal::ctrl_c() => match result {
            Ok(()) => info!("Received SIGINT"),
            Err(e) => error!(error = %e, "Failed to listen for SIGINT"),
        },
    }
}
