//! Error types for the fleet tracking core

use thiserror::Error;

/// Core error type for the fleet tracking service
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Blank entity identifier")]
    BlankEntityId,

    #[error("Invalid position: longitude={lon}, latitude={lat}")]
    InvalidPosition { lon: f64, lat: f64 },

    #[error("Invalid heading: {0}")]
    InvalidHeading(f64),

    #[error("Invalid speed: {0}")]
    InvalidSpeed(f64),

    #[error("Invalid timestamp: {0}")]
    InvalidTimestamp(f64),

    #[error("Unknown message type: {0}")]
    UnknownMessageType(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl CoreError {
    pub fn invalid_position(lon: f64, lat: f64) -> Self {
        Self::InvalidPosition { lon, lat }
    }

    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }
}

pub type CoreResult<T> = Result<T, CoreError>;
