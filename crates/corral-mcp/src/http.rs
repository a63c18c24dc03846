//! Streamable HTTP transport.
//!
//! Exposes the MCP protocol via rmcp's StreamableHttpService so a chat
//! bridge on another machine can drive VPS operations. Tools trust the
//! `caller_id` they are given; bind to loopback or front this with an
//! authenticating proxy.
//!
//! ## Endpoints
//!
//! - `POST /mcp` - JSON-RPC requests
//! - `GET /mcp` - SSE stream for server-initiated messages
//! - `GET /health` - Health check
//! - `GET /` - Server info

use crate::server::CorralServer;
use axum::{
    extract::State,
    http::StatusCode,
    response::{Html, IntoResponse, Json},
    routing::get,
    Router,
};
use rmcp::transport::streamable_http_server::{
    session::local::LocalSessionManager, StreamableHttpServerConfig, StreamableHttpService,
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Build the HTTP router for the MCP server.
///
/// `/health` and `/` are plain axum routes; everything else falls through
/// to the MCP service.
pub fn build_router(server: CorralServer) -> Router {
    let mcp_server = server.clone();
    let mcp_service = StreamableHttpService::new(
        move || Ok(mcp_server.clone()),
        Arc::new(LocalSessionManager::default()),
        StreamableHttpServerConfig::default(),
    );

    Router::new()
        .route("/health", get(health_handler))
        .route("/", get(root_handler))
        .with_state(server)
        .fallback_service(mcp_service)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}

/// Health check: the registry must be readable.
async fn health_handler(State(server): State<CorralServer>) -> impl IntoResponse {
    match server.orchestrator().registry().load().await {
        Ok(registry) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "status": "healthy",
                "service": "corral-mcp",
                "version": env!("CARGO_PKG_VERSION"),
                "vps_count": registry.len(),
            })),
        ),
        Err(e) => {
            tracing::warn!(error = %e, "Health check failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(serde_json::json!({
                    "status": "degraded",
                    "service": "corral-mcp",
                    "error": e.to_string(),
                })),
            )
        }
    }
}

/// Root endpoint with server info.
async fn root_handler() -> impl IntoResponse {
    Html(
        r#"<!DOCTYPE html>
<html>
<head>
    <title>Corral MCP Server</title>
    <style>
        body { font-family: system-ui; max-width: 800px; margin: 50px auto; padding: 20px; }
        code { background: #f4f4f4; padding: 2px 6px; border-radius: 3px; }
        pre { background: #f4f4f4; padding: 16px; border-radius: 6px; overflow-x: auto; }
    </style>
</head>
<body>
    <h1>Corral MCP Server</h1>
    <p>Model Context Protocol server for container VPS hosting.</p>

    <h2>Endpoints</h2>
    <ul>
        <li><code>POST /mcp</code> - MCP JSON-RPC requests</li>
        <li><code>GET /mcp</code> - SSE stream for server messages</li>
        <li><code>GET /health</code> - Health check</li>
    </ul>

    <h2>Example</h2>
    <pre>curl -X POST http://localhost:8080/mcp \
  -H "Content-Type: application/json" \
  -d '{"jsonrpc":"2.0","id":1,"method":"tools/list"}'</pre>

    <h2>Available Tools</h2>
    <ul>
        <li><code>provision_vps</code> - Create and start a VPS (privileged)</li>
        <li><code>describe_vps</code> - Access details and live status</li>
        <li><code>start_vps</code> / <code>stop_vps</code> / <code>restart_vps</code> - Power control</li>
        <li><code>reinstall_vps</code> - Wipe and recreate, keeping IP and resources</li>
        <li><code>change_password</code> - Rotate the root password</li>
        <li><code>delete_vps</code> - Destroy a VPS</li>
        <li><code>list_vps</code> - List the caller's VPSes</li>
    </ul>
</body>
</html>"#,
    )
}

/// Start the HTTP server.
///
/// This function runs until the server is shut down via the provided
/// shutdown signal.
pub async fn serve(
    server: CorralServer,
    addr: std::net::SocketAddr,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> Result<(), std::io::Error> {
    let router = build_router(server);

    tracing::info!(%addr, "Starting HTTP/SSE server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::debug!(%addr, "TCP listener bound");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await
}
