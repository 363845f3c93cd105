//! Viewer connection hub
//!
//! Tracks connected viewers and fans presentation snapshots out to them.
//! Snapshots are serialized once per tick; every viewer receives the same
//! frame.

use crate::protocol::{ServerMessage, ViewerMessage};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use fleet_tracker::{PresentationSnapshot, SnapshotSink};
use parking_lot::RwLock;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Broadcast channel capacity; slow viewers skip ahead to newer frames
const BROADCAST_CAPACITY: usize = 16;

type CommandHandler = Box<dyn Fn(ViewerMessage) + Send + Sync>;

/// Viewer connection hub
pub struct ViewerHub {
    /// Serialized snapshot frames
    broadcast_tx: broadcast::Sender<Arc<str>>,
    /// Last frame, sent to viewers as they connect
    latest: RwLock<Option<Arc<str>>>,
    /// Connected viewers
    clients: DashMap<Uuid, ViewerInfo>,
    /// Snapshots published
    frame_count: AtomicU64,
    /// Receives selection, removal and zoom commands
    command_handler: RwLock<Option<CommandHandler>>,
}

/// State for a connected viewer
#[derive(Debug, Clone)]
pub struct ViewerInfo {
    pub addr: Option<SocketAddr>,
    pub connected_at: DateTime<Utc>,
    /// Timestamp carried by the last pong
    pub last_pong: Option<i64>,
}

impl ViewerHub {
    pub fn new() -> Self {
        let (broadcast_tx, _) = broadcast::channel(BROADCAST_CAPACITY);

        Self {
            broadcast_tx,
            latest: RwLock::new(None),
            clients: DashMap::new(),
            frame_count: AtomicU64::new(0),
            command_handler: RwLock::new(None),
        }
    }

    /// Register a viewer, returning the most recent frame and a receiver
    /// for the ones that follow
    pub fn register_client(
        &self,
        client_id: Uuid,
        addr: Option<SocketAddr>,
    ) -> (Option<Arc<str>>, broadcast::Receiver<Arc<str>>) {
        // Subscribe before reading `latest` so no frame falls in between
        let rx = self.broadcast_tx.subscribe();
        let latest = self.latest.read().clone();

        self.clients.insert(
            client_id,
            ViewerInfo {
                addr,
                connected_at: Utc::now(),
                last_pong: None,
            },
        );
        info!(client = %client_id, total = self.clients.len(), "Viewer registered");

        (latest, rx)
    }

    pub fn unregister_client(&self, client_id: Uuid) {
        self.clients.remove(&client_id);
        info!(client = %client_id, remaining = self.clients.len(), "Viewer unregistered");
    }

    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    pub fn client(&self, client_id: Uuid) -> Option<ViewerInfo> {
        self.clients.get(&client_id).map(|c| c.clone())
    }

    pub fn frame_count(&self) -> u64 {
        self.frame_count.load(Ordering::Relaxed)
    }

    /// Latest serialized snapshot frame
    pub fn latest_frame(&self) -> Option<Arc<str>> {
        self.latest.read().clone()
    }

    /// Serialize and fan out one snapshot
    pub fn broadcast_snapshot(&self, snapshot: &PresentationSnapshot) {
        let frame: Arc<str> = match serde_json::to_string(&ServerMessage::Snapshot(snapshot)) {
            Ok(json) => json.into(),
            Err(e) => {
                warn!(error = %e, seq = snapshot.seq, "Failed to serialize snapshot");
                return;
            }
        };

        *self.latest.write() = Some(frame.clone());
        self.frame_count.fetch_add(1, Ordering::Relaxed);

        // No viewers is fine
        let _ = self.broadcast_tx.send(frame);
    }

    pub fn set_command_handler<F>(&self, handler: F)
    where
        F: Fn(ViewerMessage) + Send + Sync + 'static,
    {
        *self.command_handler.write() = Some(Box::new(handler));
    }

    /// Route one viewer message
    pub fn handle_message(&self, client_id: Uuid, message: ViewerMessage) {
        if let ViewerMessage::Pong { timestamp } = message {
            if let Some(mut client) = self.clients.get_mut(&client_id) {
                client.last_pong = Some(timestamp);
            }
            debug!(client = %client_id, timestamp, "Viewer pong");
            return;
        }

        match *self.command_handler.read() {
            Some(ref handler) => handler(message),
            None => warn!(client = %client_id, "No command handler registered"),
        }
    }
}

impl Default for ViewerHub {
    fn default() -> Self {
        Self::new()
    }
}

impl SnapshotSink for ViewerHub {
    fn publish(&self, snapshot: Arc<PresentationSnapshot>) {
        self.broadcast_snapshot(&snapshot);
    }
}

// ============================================================================
// TESTS
// ============================================================================
