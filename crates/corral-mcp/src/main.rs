//! Corral MCP Server entry point.
//!
//! Starts the MCP server on stdio, streamable HTTP, or both, as selected by
//! `CORRAL_TRANSPORT`.

use corral_mcp::{http, CorralConfig, CorralServer, TransportMode};
use rmcp::transport::stdio;
use rmcp::ServiceExt;
use tokio::signal;
use tokio::sync::broadcast;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logs go to stderr; stdout is the MCP stdio transport
    tracing_subscriber::registry()
        .with(
            EnvFilter::from_default_env()
                .add_directive("corral_mcp=info".parse()?)
                .add_directive("corral_core=info".parse()?)
                .add_directive("corral_runtime=info".parse()?),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "Starting Corral MCP Server");

    let config = CorralConfig::from_env();
    tracing::info!(
        backend = %config.backend,
        registry = %config.registry_path.display(),
        pool = %config.pool_path.display(),
        admins = config.admin_ids.len(),
        transport = ?config.transport_mode,
        "Configuration loaded"
    );

    // Warn-only so a fresh host can come up before its state dirs exist
    config.validate_warn();

    let server = CorralServer::from_config(&config)?;

    let (shutdown_tx, _) = broadcast::channel::<()>(1);
    let mut handles = Vec::new();

    if config.transport_mode.http_enabled() {
        let http_server = server.clone();
        let http_addr = config.http_addr;
        let mut shutdown_rx = shutdown_tx.subscribe();

        handles.push(tokio::spawn(async move {
            let shutdown = async move {
                let _ = shutdown_rx.recv().await;
            };
            if let Err(e) = http::serve(http_server, http_addr, shutdown).await {
                tracing::error!(error = %e, "HTTP server error");
            }
        }));
    }

    if config.transport_mode.stdio_enabled() {
        let stdio_server = server.clone();
        let mut shutdown_rx = shutdown_tx.subscribe();

        handles.push(tokio::spawn(async move {
            match stdio_server.serve(stdio()).await {
                Ok(service) => {
                    tokio::select! {
                        result = service.waiting() => {
                            if let Err(e) = result {
                                tracing::error!(error = %e, "Stdio service error");
                            }
                        }
                        _ = shutdown_rx.recv() => {
                            tracing::info!("Stdio transport shutting down");
                        }
                    }
                }
                Err(e) => tracing::error!(error = %e, "Failed to start stdio transport"),
            }
        }));
    }

    match config.transport_mode {
        TransportMode::Both => {
            tracing::info!(http_addr = %config.http_addr, "Server ready (stdio + HTTP)")
        }
        TransportMode::Http => {
            tracing::info!(http_addr = %config.http_addr, "Server ready (HTTP only)")
        }
        TransportMode::Stdio => tracing::info!("Server ready (stdio only)"),
    }

    signal::ctrl_c().await?;
    tracing::info!("Received shutdown signal");

    // VPSes outlive the server; only the transports stop
    let _ = shutdown_tx.send(());
    for handle in handles {
        let _ = handle.await;
    }

    tracing::info!("Server shutdown complete");
    Ok(())
}
