//! # Fleet WebSocket Server
//!
//! Streams presentation snapshots to map viewers and accepts their
//! selection, removal and zoom commands.
//!
//! ## Protocol
//!
//! - Server -> viewer: [`ServerMessage`]. The latest snapshot is sent as
//!   soon as a viewer connects, then one per render tick.
//! - Viewer -> server: [`ViewerMessage`]. Unparseable messages are answered
//!   with an `error` frame; the connection stays open.

pub mod error;
pub mod hub;
pub mod protocol;

pub use error::{WsError, WsResult};
pub use hub::{ViewerHub, ViewerInfo};
pub use protocol::{ErrorPayload, ServerMessage, ViewerMessage};

use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio_tungstenite::{WebSocketStream, accept_async, tungstenite::Message};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Bind `port` and serve viewers until the task is dropped
pub async fn start_server(hub: Arc<ViewerHub>, port: u16) -> WsResult<()> {
    let addr = format!("0.0.0.0:{}", port);
    let listener = TcpListener::bind(&addr).await?;

    info!("Viewer WebSocket server listening on ws://{}", addr);
    serve(hub, listener).await
}

/// Accept viewers on an already bound listener
pub async fn serve(hub: Arc<ViewerHub>, listener: TcpListener) -> WsResult<()> {
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                let hub = hub.clone();
                tokio::spawn(async move {
                    if let Err(e) = handle_connection(hub, stream, addr).await {
                        warn!("Viewer connection error from {}: {}", addr, e);
                    }
                });
            }
            Err(e) => {
                error!("Failed to accept viewer connection: {}", e);
            }
        }
    }
}

/// Handle a single viewer connection
async fn handle_connection(hub: Arc<ViewerHub>, stream: TcpStream, addr: SocketAddr) -> WsResult<()> {
    let ws_stream = accept_async(stream).await?;

    let client_id = Uuid::new_v4();
    info!("Viewer {} connected from {}", client_id, addr);

    let (latest, frames) = hub.register_client(client_id, Some(addr));
    let result = run_session(&hub, client_id, ws_stream, latest, frames).await;

    hub.unregister_client(client_id);
    info!("Viewer {} disconnected", client_id);

    result
}

/// Forward snapshot frames to the viewer and route its messages until
/// either side closes
async fn run_session(
    hub: &ViewerHub,
    client_id: Uuid,
    ws_stream: WebSocketStream<TcpStream>,
    latest: Option<Arc<str>>,
    mut frames: broadcast::Receiver<Arc<str>>,
) -> WsResult<()> {
    let (mut ws_sender, mut ws_receiver) = ws_stream.split();

    if let Some(frame) = latest {
        ws_sender.send(Message::Text(frame.to_string().into())).await?;
    }

    loop {
        tokio::select! {
            frame = frames.recv() => match frame {
                Ok(frame) => {
                    ws_sender.send(Message::Text(frame.to_string().into())).await?;
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    debug!("Viewer {} skipped {} frames", client_id, n);
                }
                Err(broadcast::error::RecvError::Closed) => {
                    info!("Snapshot channel closed");
                    return Ok(());
                }
            },
            incoming = ws_receiver.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    if let Err(e) = handle_viewer_message(hub, client_id, text.as_str()) {
                        warn!("Bad message from viewer {}: {}", client_id, e);
                        let reply = serde_json::to_string(&ServerMessage::error(
                            "invalid_message",
                            e.to_string(),
                        ))?;
                        ws_sender.send(Message::Text(reply.into())).await?;
                    }
                }
                Some(Ok(Message::Close(_))) | None => {
                    debug!("Viewer {} closed the connection", client_id);
                    return Ok(());
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => return Err(e.into()),
            },
        }
    }
}

/// Parse and route one viewer message
fn handle_viewer_message(hub: &ViewerHub, client_id: Uuid, text: &str) -> WsResult<()> {
    let message: ViewerMessage =
        serde_json::from_str(text).map_err(|e| WsError::InvalidMessage(e.to_string()))?;

    debug!("Viewer {} sent {:?}", client_id, message);
    hub.handle_message(client_id, message);
    Ok(())
}

// ============================================================================
// TESTS
// ============================================================================
