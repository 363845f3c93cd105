//! Application state management

use crate::config::AppConfig;
use crate::pipeline::FleetCommands;

use chrono::{DateTime, Utc};
use fleet_core::ConnectionState;
use fleet_telemetry::MetricsCollector;
use fleet_tracker::{FleetTracker, PresentationSnapshot};
use fleet_websocket::ViewerHub;
use std::sync::Arc;
use tokio::sync::watch;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub tracker: Arc<FleetTracker>,
    /// Viewer WebSocket hub
    pub hub: Arc<ViewerHub>,
    pub metrics: Arc<MetricsCollector>,
    pub commands: FleetCommands,
    /// Upstream connection state
    pub connection: watch::Receiver<ConnectionState>,
    /// Most recent render tick output
    pub latest: watch::Receiver<Option<Arc<PresentationSnapshot>>>,
    pub started_at: DateTime<Utc>,
}

impl AppState {
    pub fn connection_state(&self) -> ConnectionState {
        *self.connection.borrow()
    }

    pub fn latest_snapshot(&self) -> Option<Arc<PresentationSnapshot>> {
        self.latest.borrow().clone()
    }
}
