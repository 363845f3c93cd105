//! Glue between ingestion, the tracker, the render tick and the viewers

use fleet_core::{EntityId, PositionUpdatePayload};
use fleet_ingest::{SubscriptionController, UpdateSink};
use fleet_telemetry::MetricsCollector;
use fleet_tracker::{
    AppliedResult, FleetTracker, PresentationSnapshot, SelectionChange, SnapshotSink, WatchSink,
};
use fleet_websocket::{ViewerHub, ViewerMessage};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, warn};

// ============================================================================
// COMMANDS
// ============================================================================

/// Selection, removal and zoom commands from HTTP clients and viewers.
///
/// Keeps the upstream subscription in step with the tracker's selection.
/// Selection changes and their upstream forwards are serialized, so the
/// last subscription queued always matches the tracker.
#[derive(Clone)]
pub struct FleetCommands {
    tracker: Arc<FleetTracker>,
    subscriptions: SubscriptionController,
    forward: Arc<Mutex<()>>,
}

impl FleetCommands {
    pub fn new(tracker: Arc<FleetTracker>, subscriptions: SubscriptionController) -> Self {
        Self {
            tracker,
            subscriptions,
            forward: Arc::new(Mutex::new(())),
        }
    }

    /// Replace the selection and resubscribe upstream
    pub fn select(&self, ids: impl IntoIterator<Item = EntityId>) -> SelectionChange {
        let _guard = self.forward.lock();
        let change = self.tracker.set_selection(ids);
        if !self.subscriptions.set_subscriptions(change.selected.iter().cloned()) {
            warn!("Connection manager stopped; selection not forwarded upstream");
        }
        change
    }

    /// Drop one entity. A selected entity is also unsubscribed.
    pub fn remove(&self, id: &EntityId) -> bool {
        let _guard = self.forward.lock();
        let was_selected = self.tracker.selection().contains(id);
        let removed = self.tracker.remove(id);
        if removed || was_selected {
            self.subscriptions.set_subscriptions(self.tracker.selection());
        }
        removed
    }

    pub fn set_zoom(&self, zoom: u8) -> u8 {
        self.tracker.set_zoom(zoom)
    }

    /// Route one viewer command
    pub fn handle_viewer_message(&self, message: ViewerMessage) {
        match message {
            ViewerMessage::Select { ids } => {
                self.select(ids);
            }
            ViewerMessage::Remove { id } => {
                if !self.remove(&id) {
                    debug!(entity = %id, "Viewer removed unknown entity");
                }
            }
            ViewerMessage::SetZoom { zoom } => {
                self.set_zoom(zoom);
            }
            ViewerMessage::Pong { .. } => {}
        }
    }
}

// ============================================================================
// METERED SINKS
// ============================================================================

/// Update sink that counts merge outcomes and frame kinds
pub struct MeteredUpdates {
    tracker: Arc<FleetTracker>,
    metrics: Arc<MetricsCollector>,
}

impl MeteredUpdates {
    pub fn new(tracker: Arc<FleetTracker>, metrics: Arc<MetricsCollector>) -> Self {
        Self { tracker, metrics }
    }
}

impl UpdateSink for MeteredUpdates {
    fn apply_position(&self, payload: PositionUpdatePayload) -> AppliedResult {
        let result = self.tracker.apply_payload(payload);
        self.metrics.record_apply(result);
        result
    }

    fn record_frame(&self, kind: &str) {
        self.metrics.record_frame(kind);
    }
}

/// Fans each snapshot out to the viewers and the latest-snapshot slot,
/// updating metrics on the way
pub struct SnapshotFanout {
    hub: Arc<ViewerHub>,
    latest: WatchSink,
    metrics: Arc<MetricsCollector>,
}

impl SnapshotFanout {
    pub fn new(hub: Arc<ViewerHub>, latest: WatchSink, metrics: Arc<MetricsCollector>) -> Self {
        Self {
            hub,
            latest,
            metrics,
        }
    }
}

impl SnapshotSink for SnapshotFanout {
    fn publish(&self, snapshot: Arc<PresentationSnapshot>) {
        self.metrics.observe_snapshot(&snapshot);
        self.metrics.set_viewer_connections(self.hub.client_count());
        self.hub.publish(snapshot.clone());
        self.latest.publish(snapshot);
    }
}

// ============================================================================
// TESTS
// ============================================================================
