//! # Fleet Ingest - Upstream Telemetry Connection
//!
//! Keeps a WebSocket connection to the telemetry feed open, decodes the
//! frames it delivers and hands position updates to an [`UpdateSink`].
//!
//! ## Lifecycle
//! `Disconnected -> Connecting -> Connected -> Disconnected -> ...` until
//! [`ConnectionHandle::stop`] is called. The current state is published on a
//! watch channel and every transition as a [`fleet_core::ConnectionEvent`].

pub mod backoff;
pub mod error;
pub mod manager;
pub mod transport;

pub use backoff::Backoff;
pub use error::{IngestError, IngestResult};
pub use manager::{
    ConnectionHandle, ConnectionManager, IngestConfig, SubscriptionController, UpdateSink,
};
pub use transport::{Transport, TransportConnection, WebSocketTransport};
