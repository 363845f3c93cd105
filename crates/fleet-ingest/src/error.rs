//! Ingestion error types

use fleet_core::CoreError;
use thiserror::Error;

/// Upstream connection errors
#[derive(Error, Debug)]
pub enum IngestError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Connection refused: {0}")]
    Connect(String),

    #[error(transparent)]
    Core(#[from] CoreError),
}

pub type IngestResult<T> = Result<T, IngestError>;
