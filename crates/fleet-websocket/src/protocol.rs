//! Viewer wire protocol
//!
//! - Server -> viewer: [`ServerMessage`], `{"type": ..., "payload": ...}`
//! - Viewer -> server: [`ViewerMessage`], `{"type": ..., <fields>}`

use fleet_core::EntityId;
use fleet_tracker::PresentationSnapshot;
use serde::{Deserialize, Serialize};

/// Message pushed to viewers
#[derive(Debug, Serialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ServerMessage<'a> {
    Snapshot(&'a PresentationSnapshot),
    Error(ErrorPayload),
}

impl ServerMessage<'_> {
    pub fn error(code: &str, message: impl Into<String>) -> Self {
        ServerMessage::Error(ErrorPayload {
            code: code.to_string(),
            message: message.into(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub code: String,
    pub message: String,
}

/// Message received from a viewer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ViewerMessage {
    /// Replace the selected entity set
    Select { ids: Vec<EntityId> },
    /// Stop tracking one entity
    Remove { id: EntityId },
    /// Map zoom changed
    SetZoom { zoom: u8 },
    /// Keepalive reply; timestamp in unix milliseconds
    Pong { timestamp: i64 },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_viewer_message_wire_format() {
        let msg: ViewerMessage = serde_json::from_str(r#"{"type":"select","ids":["A","B"]}"#).unwrap();
        assert_eq!(
            msg,
            ViewerMessage::Select {
                ids: vec![EntityId::new("A"), EntityId::new("B")]
            }
        );

        let msg: ViewerMessage = serde_json::from_str(r#"{"type":"set_zoom","zoom":12}"#).unwrap();
        assert_eq!(msg, ViewerMessage::SetZoom { zoom: 12 });

        assert!(serde_json::from_str::<ViewerMessage>(r#"{"type":"set_zoom","zoom":300}"#).is_err());
        assert!(serde_json::from_str::<ViewerMessage>(r#"{"type":"launch"}"#).is_err());
    }

    #[test]
    fn test_server_message_envelope() {
        let snapshot = PresentationSnapshot::empty(9);
        let json: serde_json::Value =
            serde_json::to_value(ServerMessage::Snapshot(&snapshot)).unwrap();
        assert_eq!(json["type"], "snapshot");
        assert_eq!(json["payload"]["zoom"], 9);

        let json = serde_json::to_value(ServerMessage::error("bad_request", "nope")).unwrap();
        assert_eq!(json["type"], "error");
        assert_eq!(json["payload"]["code"], "bad_request");
    }
}
