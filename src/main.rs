//! # Realtime Voice Relay - Main Application Entry Point
//!
//! Bridges a telephony client channel, reached through a WebSocket gateway's
//! webhooks and its connection management API, to a realtime speech backend
//! reached over an outbound WebSocket.
//!
//! ## Key Rust Concepts Used:
//! - **async/await**: every socket and HTTP call is asynchronous
//! - **modules**: one file per concern (mod statements below)
//! - **Result<T, E>**: startup failures bubble up through `?` and end the process
//! - **trait objects**: the backend dialer and gateway client sit behind traits so
//!   tests can swap in in-memory fakes
//!
//! ## Application Architecture:
//! - **config**: layered configuration (defaults, config.toml, environment)
//! - **error**: `AppError` and its HTTP mapping
//! - **protocol**: telephony and backend wire formats plus the translator
//! - **backend**: outbound WebSocket dialer
//! - **gateway**: client delivery through the connection management API
//! - **relay**: session registry, stream contexts, listeners and lifecycle
//! - **state / health / middleware / handlers**: the HTTP surface

mod backend;
mod config;
mod error;
mod gateway;
mod handlers;
mod health;
mod middleware;
mod protocol;
mod relay;
mod state;
#[cfg(test)]
mod testing;

use actix_web::{web, App, HttpServer};
use anyhow::{Context, Result};
use crate::backend::RealtimeDialer;
use crate::config::{AppConfig, GatewayKind};
use crate::gateway::{GatewayClient, HttpGatewayClient, ManagementApiClient};
use crate::relay::SessionRelay;
use crate::state::AppState;
use std::sync::Arc;
use tracing::{error, info};
use tracing_actix_web::TracingLogger;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// The main application entry point.
///
/// ## What this function does:
/// 1. **Loads and validates configuration**; a missing endpoint or credential stops here
/// 2. **Sets up logging**
/// 3. **Builds the relay** (backend dialer + gateway client) and shared state
/// 4. **Serves the webhooks** until SIGTERM/SIGINT
/// 5. **Tears down every live session** so no backend socket outlives the process
#[actix_web::main]
async fn main() -> Result<()> {
    // Fine if there's no .env file
    dotenv::dotenv().ok();

    init_tracing()?;

    let config = AppConfig::load().context("failed to load configuration")?;
    if let Err(e) = config.validate() {
        error!("Invalid configuration: {}", e);
        return Err(e.context("configuration is incomplete, refusing to start"));
    }

    info!("Starting {} v{}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));
    info!(
        host = %config.server.host,
        port = config.server.port,
        mode = config.relay.mode.as_str(),
        gateway = %config.gateway.endpoint,
        gateway_kind = config.gateway.kind.as_str(),
        backend = %config.backend.url,
        "Configuration loaded"
    );

    let gateway: Arc<dyn GatewayClient> = match config.gateway.kind {
        GatewayKind::Aws => Arc::new(ManagementApiClient::new(&config.gateway).await),
        GatewayKind::Http => {
            Arc::new(HttpGatewayClient::new(&config.gateway).context("failed to build gateway client")?)
        }
    };
    let dialer = Arc::new(RealtimeDialer::new(config.backend.clone()));
    let relay = SessionRelay::new(&config, dialer, gateway);

    let bind_addr = format!("{}:{}", config.server.host, config.server.port);
    let app_state = AppState::new(config, relay.clone());

    info!("Starting HTTP server on {}", bind_addr);

    let server = HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(app_state.clone()))
            // Middleware executes in reverse order for responses
            .wrap(middleware::MetricsMiddleware)
            .wrap(TracingLogger::default())
            .configure(handlers::configure)
    })
    // Shutdown signals are handled below
    .disable_signals()
    .bind(&bind_addr)
    .with_context(|| format!("failed to bind {bind_addr}"))?
    .run();

    let server_handle = server.handle();
    let server_task = tokio::spawn(server);

    tokio::select! {
        result = server_task => {
            match result {
                Ok(Err(e)) => error!("Server error: {}", e),
                Err(e) => error!("Server task error: {}", e),
                Ok(Ok(())) => {}
            }
        }
        signal = wait_for_shutdown() => {
            signal?;
            info!("Shutdown signal received, stopping server...");
            server_handle.stop(true).await;
        }
    }

    relay.shutdown().await;
    info!("Server stopped gracefully");
    Ok(())
}

/// Initialize tracing.
///
/// ## Environment Variables:
/// - `RUST_LOG`: filter directives, e.g. `realtime_voice_relay=trace`
/// - defaults to `realtime_voice_relay=debug,actix_web=info`
fn init_tracing() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "realtime_voice_relay=debug,actix_web=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .try_init()?;

    Ok(())
}

/// Resolve on SIGTERM (orchestrator stop) or SIGINT (Ctrl+C).
async fn wait_for_shutdown() -> Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate()).context("failed to install SIGTERM handler")?;
    let mut sigint = signal(SignalKind::interrupt()).context("failed to install SIGINT handler")?;

    tokio::select! {
        _ = sigterm.recv() => info!("Received SIGTERM"),
        _ = sigint.recv() => info!("Received SIGINT"),
    }
    Ok(())
}
