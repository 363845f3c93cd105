//! Upstream connection manager
//!
//! Owns the transport, reconnects until stopped and keeps the upstream
//! subscription in line with the selected entity set.

use crate::backoff::Backoff;
use crate::error::{IngestError, IngestResult};
use crate::transport::{Transport, TransportConnection};

use fleet_core::{
    ConnectionEvent, ConnectionState, CoreError, EntityId, InboundMessage, OutboundCommand,
    PositionUpdatePayload,
};
use fleet_tracker::{AppliedResult, FleetTracker};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

/// Frame kind label for frames that failed to decode
pub const FRAME_MALFORMED: &str = "malformed";
/// Frame kind label for well-formed frames of an unknown type
pub const FRAME_UNKNOWN: &str = "unknown";

// ============================================================================
// CONFIGURATION
// ============================================================================

/// Connection manager configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    /// Upstream WebSocket URL
    pub url: String,
    /// Reconnect delay, or the base delay with exponential backoff
    pub reconnect_delay_ms: u64,
    pub exponential_backoff: bool,
    /// Ceiling for exponential backoff
    pub max_reconnect_delay_ms: u64,
    /// Fraction of each delay to randomize, 0.0 to 1.0
    pub jitter_ratio: f64,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            url: "ws://127.0.0.1:8765/telemetry".to_string(),
            reconnect_delay_ms: 5_000,
            exponential_backoff: false,
            max_reconnect_delay_ms: 60_000,
            jitter_ratio: 0.0,
        }
    }
}

impl IngestConfig {
    pub fn backoff(&self) -> Backoff {
        let base = Duration::from_millis(self.reconnect_delay_ms);
        let backoff = if self.exponential_backoff {
            Backoff::exponential(base, Duration::from_millis(self.max_reconnect_delay_ms))
        } else {
            Backoff::fixed(base)
        };
        backoff.with_jitter(self.jitter_ratio)
    }

    pub fn validate(&self) -> IngestResult<()> {
        if !(self.url.starts_with("ws://") || self.url.starts_with("wss://")) {
            return Err(CoreError::configuration(format!(
                "ingest url must be ws:// or wss://, got {}",
                self.url
            ))
            .into());
        }
        if !(0.0..=1.0).contains(&self.jitter_ratio) {
            return Err(CoreError::configuration("jitter_ratio must be within [0, 1]").into());
        }
        Ok(())
    }
}

// ============================================================================
// UPDATE SINK
// ============================================================================

/// Receives decoded telemetry from the connection manager
pub trait UpdateSink: Send + Sync {
    fn apply_position(&self, payload: PositionUpdatePayload) -> AppliedResult;

    /// Called once per inbound frame with its kind
    fn record_frame(&self, _kind: &str) {}
}

impl UpdateSink for FleetTracker {
    fn apply_position(&self, payload: PositionUpdatePayload) -> AppliedResult {
        self.apply_payload(payload)
    }
}

// ============================================================================
// HANDLES
// ============================================================================

#[derive(Debug)]
enum Command {
    SetSubscriptions(BTreeSet<EntityId>),
}

/// Cloneable handle for changing the upstream subscription
#[derive(Debug, Clone)]
pub struct SubscriptionController {
    tx: mpsc::UnboundedSender<Command>,
}

impl SubscriptionController {
    /// Replace the subscribed set. Sent immediately when connected,
    /// otherwise sent once on the next connect. Returns `false` if the
    /// manager has stopped.
    pub fn set_subscriptions(&self, ids: impl IntoIterator<Item = EntityId>) -> bool {
        let ids = ids.into_iter().filter(|id| !id.is_blank()).collect();
        self.tx.send(Command::SetSubscriptions(ids)).is_ok()
    }
}

/// Running connection manager
pub struct ConnectionHandle {
    controller: SubscriptionController,
    state_rx: watch::Receiver<ConnectionState>,
    events_tx: broadcast::Sender<ConnectionEvent>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl ConnectionHandle {
    pub fn controller(&self) -> SubscriptionController {
        self.controller.clone()
    }

    pub fn set_subscriptions(&self, ids: impl IntoIterator<Item = EntityId>) -> bool {
        self.controller.set_subscriptions(ids)
    }

    pub fn state(&self) -> ConnectionState {
        *self.state_rx.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.events_tx.subscribe()
    }

    /// Stop reconnecting, close the connection and wait for the task
    pub async fn stop(self) {
        self.cancel.cancel();
        if let Err(e) = self.task.await {
            warn!(error = %e, "Connection manager task failed");
        }
    }
}

// ============================================================================
// CONNECTION MANAGER
// ============================================================================

/// Upstream connection manager; construct, then [`start`](Self::start)
pub struct ConnectionManager {
    transport: Arc<dyn Transport>,
    sink: Arc<dyn UpdateSink>,
    backoff: Backoff,
    state_tx: watch::Sender<ConnectionState>,
    events_tx: broadcast::Sender<ConnectionEvent>,
    commands_tx: mpsc::UnboundedSender<Command>,
    commands_rx: mpsc::UnboundedReceiver<Command>,
}

impl ConnectionManager {
    pub fn new(backoff: Backoff, transport: Arc<dyn Transport>, sink: Arc<dyn UpdateSink>) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        let (events_tx, _) = broadcast::channel(64);
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();

        Self {
            transport,
            sink,
            backoff,
            state_tx,
            events_tx,
            commands_tx,
            commands_rx,
        }
    }

    pub fn from_config(
        config: &IngestConfig,
        transport: Arc<dyn Transport>,
        sink: Arc<dyn UpdateSink>,
    ) -> IngestResult<Self> {
        config.validate()?;
        Ok(Self::new(config.backoff(), transport, sink))
    }

    pub fn controller(&self) -> SubscriptionController {
        SubscriptionController {
            tx: self.commands_tx.clone(),
        }
    }

    /// Events are only delivered to receivers that exist when they are
    /// sent, so subscribe before [`start`](Self::start) to see the first
    /// connect.
    pub fn subscribe_events(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.events_tx.subscribe()
    }

    pub fn start(self) -> ConnectionHandle {
        let cancel = CancellationToken::new();
        let controller = self.controller();
        let state_rx = self.state_tx.subscribe();
        let events_tx = self.events_tx.clone();

        let worker = Worker {
            transport: self.transport,
            sink: self.sink,
            backoff: self.backoff,
            state_tx: self.state_tx,
            events_tx: self.events_tx,
            commands: self.commands_rx,
            commands_open: true,
            desired: BTreeSet::new(),
            cancel: cancel.clone(),
        };

        info!("Connection manager started");
        let task = tokio::spawn(worker.run());

        ConnectionHandle {
            controller,
            state_rx,
            events_tx,
            cancel,
            task,
        }
    }
}

/// Why a connected session ended
enum SessionEnd {
    Cancelled,
    Lost(String),
}

struct Worker {
    transport: Arc<dyn Transport>,
    sink: Arc<dyn UpdateSink>,
    backoff: Backoff,
    state_tx: watch::Sender<ConnectionState>,
    events_tx: broadcast::Sender<ConnectionEvent>,
    commands: mpsc::UnboundedReceiver<Command>,
    commands_open: bool,
    desired: BTreeSet<EntityId>,
    cancel: CancellationToken,
}

impl Worker {
    async fn run(mut self) {
        let mut failures: u32 = 0;

        loop {
            self.set_state(ConnectionState::Connecting);
            self.emit(ConnectionEvent::Connecting {
                attempt: failures.saturating_add(1),
            });

            let Some(connected) = self.connect().await else {
                break;
            };

            match connected {
                Ok(conn) => {
                    failures = 0;
                    self.set_state(ConnectionState::Connected);
                    self.emit(ConnectionEvent::Connected);
                    info!(subscribed = self.desired.len(), "Connected to upstream feed");

                    match self.session(conn).await {
                        SessionEnd::Cancelled => break,
                        SessionEnd::Lost(reason) => {
                            warn!(%reason, "Upstream connection lost");
                            self.disconnected(reason);
                            failures = 1;
                        }
                    }
                }
                Err(e) => {
                    warn!(error = %e, "Failed to connect to upstream feed");
                    self.disconnected(e.to_string());
                    failures = failures.saturating_add(1);
                }
            }

            let delay = self.backoff.delay(failures);
            self.emit(ConnectionEvent::ReconnectScheduled {
                attempt: failures,
                delay_ms: delay.as_millis() as u64,
            });
            debug!(delay_ms = delay.as_millis() as u64, "Reconnect scheduled");

            if !self.wait(delay).await {
                break;
            }
        }

        if *self.state_tx.borrow() != ConnectionState::Disconnected {
            self.disconnected("stopped".to_string());
        }
        info!("Connection manager stopped");
    }

    /// Open a connection, folding subscription changes into the desired set
    /// while the handshake is pending. Returns `None` when cancelled.
    async fn connect(&mut self) -> Option<IngestResult<Box<dyn TransportConnection>>> {
        let transport = self.transport.clone();
        let connect = transport.connect();
        tokio::pin!(connect);

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => return None,
                result = &mut connect => return Some(result),
                command = self.commands.recv(), if self.commands_open => {
                    self.buffer(command);
                }
            }
        }
    }

    /// Sleep for `delay` while still folding subscription changes into the
    /// desired set. Returns `false` when cancelled.
    async fn wait(&mut self, delay: Duration) -> bool {
        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => return false,
                _ = &mut sleep => return true,
                command = self.commands.recv(), if self.commands_open => {
                    self.buffer(command);
                }
            }
        }
    }

    /// Record a subscription change while not connected
    fn buffer(&mut self, command: Option<Command>) {
        match command {
            Some(Command::SetSubscriptions(ids)) => {
                debug!(count = ids.len(), "Subscription buffered until connected");
                self.desired = ids;
            }
            None => self.commands_open = false,
        }
    }

    async fn session(&mut self, mut conn: Box<dyn TransportConnection>) -> SessionEnd {
        // Changes queued since the handshake finished still belong to the
        // initial flush
        while let Ok(command) = self.commands.try_recv() {
            self.buffer(Some(command));
        }

        if !self.desired.is_empty() {
            if let Err(e) = self.send_subscription(conn.as_mut()).await {
                return SessionEnd::Lost(e.to_string());
            }
        }
        let mut sent = self.desired.clone();

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => return SessionEnd::Cancelled,
                command = self.commands.recv(), if self.commands_open => match command {
                    Some(Command::SetSubscriptions(ids)) => {
                        self.desired = ids;
                        if self.desired != sent {
                            if let Err(e) = self.send_subscription(conn.as_mut()).await {
                                return SessionEnd::Lost(e.to_string());
                            }
                            sent = self.desired.clone();
                        }
                    }
                    None => self.commands_open = false,
                },
                frame = conn.next_text() => match frame {
                    Some(Ok(text)) => self.dispatch(&text),
                    Some(Err(e)) => return SessionEnd::Lost(e.to_string()),
                    None => return SessionEnd::Lost(IngestError::ConnectionClosed.to_string()),
                },
            }
        }
    }

    async fn send_subscription(&self, conn: &mut dyn TransportConnection) -> IngestResult<()> {
        let command = OutboundCommand::subscribe(self.desired.iter().cloned());
        conn.send_text(command.encode()?).await?;

        let count = self.desired.len();
        debug!(count, "Subscription sent");
        self.emit(ConnectionEvent::SubscriptionSent { count });
        Ok(())
    }

    fn dispatch(&self, text: &str) {
        match InboundMessage::decode(text) {
            Ok(message) => {
                self.sink.record_frame(message.kind());
                match message {
                    InboundMessage::PositionUpdate(payload) => {
                        let result = self.sink.apply_position(payload);
                        trace!(%result, "Position update applied");
                    }
                    InboundMessage::BulkUpdate(bulk) => {
                        if bulk.malformed > 0 {
                            warn!(malformed = bulk.malformed, "Skipped malformed bulk items");
                        }
                        let count = bulk.updates.len();
                        for payload in bulk.updates {
                            self.sink.apply_position(payload);
                        }
                        debug!(count, "Bulk update applied");
                    }
                    InboundMessage::StatusUpdate(status) => {
                        debug!(
                            entity = %status.id,
                            status = ?status.status,
                            "Device status report"
                        );
                    }
                }
            }
            Err(CoreError::UnknownMessageType(kind)) => {
                self.sink.record_frame(FRAME_UNKNOWN);
                debug!(%kind, "Ignoring unknown message type");
            }
            Err(e) => {
                self.sink.record_frame(FRAME_MALFORMED);
                warn!(error = %e, "Dropping malformed frame");
            }
        }
    }

    fn disconnected(&self, reason: String) {
        self.set_state(ConnectionState::Disconnected);
        self.emit(ConnectionEvent::Disconnected { reason });
    }

    fn set_state(&self, state: ConnectionState) {
        self.state_tx.send_replace(state);
    }

    fn emit(&self, event: ConnectionEvent) {
        // No receivers is fine
        let _ = self.events_tx.send(event);
    }
}

// ============================================================================
// TESTS
// ============================================================================
