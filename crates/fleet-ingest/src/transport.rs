//! Upstream transport abstraction

use crate::error::{IngestError, IngestResult};

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, trace};

/// Opens connections to the upstream feed
#[async_trait]
pub trait Transport: Send + Sync {
    async fn connect(&self) -> IngestResult<Box<dyn TransportConnection>>;
}

/// One open, text-framed connection.
///
/// `next_text` must be cancel safe; the connection manager polls it inside
/// `select!`.
#[async_trait]
pub trait TransportConnection: Send {
    async fn send_text(&mut self, text: String) -> IngestResult<()>;

    /// Next text frame, or `None` once the peer has closed
    async fn next_text(&mut self) -> Option<IngestResult<String>>;
}

// ============================================================================
// WEBSOCKET TRANSPORT
// ============================================================================

/// WebSocket client transport
#[derive(Debug, Clone)]
pub struct WebSocketTransport {
    url: String,
}

impl WebSocketTransport {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn connect(&self) -> IngestResult<Box<dyn TransportConnection>> {
        let (stream, response) = connect_async(self.url.as_str()).await?;
        debug!(url = %self.url, status = %response.status(), "WebSocket handshake complete");
        Ok(Box::new(WebSocketConnection { stream }))
    }
}

struct WebSocketConnection {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl TransportConnection for WebSocketConnection {
    async fn send_text(&mut self, text: String) -> IngestResult<()> {
        self.stream.send(Message::Text(text.into())).await?;
        Ok(())
    }

    async fn next_text(&mut self) -> Option<IngestResult<String>> {
        loop {
            match self.stream.next().await? {
                Ok(Message::Text(text)) => return Some(Ok(text.as_str().to_owned())),
                Ok(Message::Binary(bytes)) => match String::from_utf8(bytes.to_vec()) {
                    Ok(text) => return Some(Ok(text)),
                    Err(_) => trace!(len = bytes.len(), "Skipping non-UTF-8 binary frame"),
                },
                Ok(Message::Close(frame)) => {
                    debug!(?frame, "Upstream sent close frame");
                    return None;
                }
                Ok(_) => continue,
                Err(e) => return Some(Err(IngestError::from(e))),
            }
        }
    }
}

// ============================================================================
// SCRIPTED TRANSPORT (tests)
// ============================================================================
