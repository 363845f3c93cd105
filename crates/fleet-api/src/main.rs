//! # Fleet Tracking Server
//!
//! Main entry point for the live fleet tracker. Wires the upstream
//! telemetry connection into the tracker, drives render ticks, streams
//! snapshots to viewers and serves the REST API.

mod config;
mod error;
mod handlers;
mod pipeline;
mod routes;
mod state;

use crate::config::AppConfig;
use crate::pipeline::{FleetCommands, MeteredUpdates, SnapshotFanout};
use crate::routes::create_router;
use crate::state::AppState;

use anyhow::Context;
use chrono::Utc;
use fleet_ingest::{ConnectionManager, WebSocketTransport};
use fleet_telemetry::MetricsCollector;
use fleet_tracker::{FleetTracker, RenderScheduler, WatchSink};
use fleet_websocket::ViewerHub;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging();

    info!("Starting Fleet Tracking Server v{}", env!("CARGO_PKG_VERSION"));
    info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    // Load configuration
    let config = AppConfig::load()?;
    info!("Configuration loaded");
    info!("   API Port: {}", config.api_port);
    info!("   WebSocket Port: {}", config.ws_port);
    info!("   Upstream: {}", config.ingest.url);

    // Core components
    let tracker = Arc::new(FleetTracker::new(config.tracker.clone())?);
    let metrics = Arc::new(MetricsCollector::new().context("registering metrics")?);
    let hub = Arc::new(ViewerHub::new());

    // Upstream connection
    let manager = ConnectionManager::from_config(
        &config.ingest,
        Arc::new(WebSocketTransport::new(config.ingest.url.clone())),
        Arc::new(MeteredUpdates::new(tracker.clone(), metrics.clone())),
    )?;
    let commands = FleetCommands::new(tracker.clone(), manager.controller());
    let mut events = manager.subscribe_events();
    let connection = manager.start();

    let event_metrics = metrics.clone();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => event_metrics.record_connection_event(&event),
                Err(RecvError::Lagged(n)) => warn!("Dropped {} connection events", n),
                Err(RecvError::Closed) => break,
            }
        }
    });

    // Viewer commands
    let viewer_commands = commands.clone();
    hub.set_command_handler(move |message| viewer_commands.handle_viewer_message(message));

    // Render ticks
    let cancel = CancellationToken::new();
    let (latest_sink, latest) = WatchSink::channel();
    let scheduler = RenderScheduler::new(
        tracker.clone(),
        Arc::new(SnapshotFanout::new(hub.clone(), latest_sink, metrics.clone())),
    );
    let render_task = scheduler.spawn(cancel.clone());

    // Viewer WebSocket server
    let ws_hub = hub.clone();
    let ws_port = config.ws_port;
    let ws_cancel = cancel.clone();
    tokio::spawn(async move {
        tokio::select! {
            _ = ws_cancel.cancelled() => {}
            result = fleet_websocket::start_server(ws_hub, ws_port) => {
                if let Err(e) = result {
                    error!("WebSocket server error: {}", e);
                }
            }
        }
    });

    let state = AppState {
        config: Arc::new(config.clone()),
        tracker,
        hub,
        metrics,
        commands,
        connection: connection.watch_state(),
        latest,
        started_at: Utc::now(),
    };

    let app = create_router(state);
    info!("Routes configured");

    // Start API server
    let addr = SocketAddr::from(([0, 0, 0, 0], config.api_port));
    info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    info!("API server listening on http://{}", addr);
    info!("Viewer WebSocket server on ws://0.0.0.0:{}", config.ws_port);
    info!("Metrics available at http://{}/metrics", addr);
    info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Stop producers before the process exits
    cancel.cancel();
    connection.stop().await;
    if let Err(e) = render_task.await {
        warn!("Render task failed: {}", e);
    }

    info!("Server shutdown complete");
    Ok(())
}

/// Initialize logging with tracing. `LOG_FORMAT=json` switches to JSON
/// lines.
fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(
            "info,fleet_api=debug,fleet_ingest=debug,fleet_websocket=debug,fleet_tracker=info",
        )
    });

    let json = std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));
    let registry = tracing_subscriber::registry().with(filter);

    if json {
        registry.with(fmt::layer().json().with_current_span(false)).init();
    } else {
        registry
            .with(fmt::layer().with_target(true).with_thread_ids(true))
            .init();
    }
}

/// Graceful shutdown handler
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
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down...");
        }
        _ = terminate => {
            info!("Received terminate signal, shutting down...");
        }
    }
}
