//! Wire protocol and connection events
//!
//! Upstream telemetry arrives as `{ "type": ..., "payload": ... }` JSON
//! frames; the only command we send back is `subscribe`.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;
use std::fmt;

use crate::{
    Coordinates, CoreError, CoreResult, EntityId, PositionSample, timestamp_from_unix_seconds,
};

// ============================================================================
// INBOUND MESSAGES
// ============================================================================

/// Raw envelope, decoded before the payload shape is known
#[derive(Debug, Deserialize)]
struct RawEnvelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    payload: Value,
}

/// Message received from the upstream telemetry feed
#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    /// Single position report
    PositionUpdate(PositionUpdatePayload),
    /// Batch of position reports, fanned out per entity
    BulkUpdate(BulkUpdate),
    /// Device-reported status; informational only, liveness is derived
    StatusUpdate(StatusUpdatePayload),
}

impl InboundMessage {
    pub const POSITION_UPDATE: &'static str = "position_update";
    pub const BULK_UPDATE: &'static str = "bulk_update";
    pub const STATUS_UPDATE: &'static str = "status_update";

    /// Decode a text frame. Unrecognized `type`s yield
    /// [`CoreError::UnknownMessageType`] so the caller can ignore them.
    pub fn decode(text: &str) -> CoreResult<Self> {
        let envelope: RawEnvelope = serde_json::from_str(text)?;

        match envelope.kind.as_str() {
            Self::POSITION_UPDATE => Ok(Self::PositionUpdate(serde_json::from_value(
                envelope.payload,
            )?)),
            Self::BULK_UPDATE => {
                let items: Vec<Value> = serde_json::from_value(envelope.payload)?;
                Ok(Self::BulkUpdate(BulkUpdate::from_items(items)))
            }
            Self::STATUS_UPDATE => Ok(Self::StatusUpdate(serde_json::from_value(
                envelope.payload,
            )?)),
            other => Err(CoreError::UnknownMessageType(other.to_string())),
        }
    }

    /// Wire name of this message kind
    pub fn kind(&self) -> &'static str {
        match self {
            InboundMessage::PositionUpdate(_) => Self::POSITION_UPDATE,
            InboundMessage::BulkUpdate(_) => Self::BULK_UPDATE,
            InboundMessage::StatusUpdate(_) => Self::STATUS_UPDATE,
        }
    }
}

/// `position_update` payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionUpdatePayload {
    pub id: String,
    pub lon: f64,
    pub lat: f64,
    /// km/h; absent means stationary
    #[serde(default)]
    pub speed: f64,
    pub heading: f64,
    /// Unix seconds
    pub timestamp: f64,
}

impl PositionUpdatePayload {
    /// Convert into a merge key and sample. Range checks on the numeric
    /// fields are left to the store so they surface as rejections there.
    pub fn into_sample(self) -> CoreResult<(EntityId, PositionSample)> {
        let id = EntityId::new(self.id);
        if id.is_blank() {
            return Err(CoreError::BlankEntityId);
        }

        let timestamp = timestamp_from_unix_seconds(self.timestamp)?;
        let sample = PositionSample::new(
            Coordinates::new(self.lon, self.lat),
            self.speed,
            self.heading,
            timestamp,
        );

        Ok((id, sample))
    }
}

/// `bulk_update` payload; items that fail to decode are counted, not fatal
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BulkUpdate {
    pub updates: Vec<PositionUpdatePayload>,
    pub malformed: usize,
}

impl BulkUpdate {
    fn from_items(items: Vec<Value>) -> Self {
        let mut bulk = Self::default();
        for item in items {
            match serde_json::from_value(item) {
                Ok(update) => bulk.updates.push(update),
                Err(_) => bulk.malformed += 1,
            }
        }
        bulk
    }
}

/// `status_update` payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusUpdatePayload {
    pub id: String,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub timestamp: Option<f64>,
}

// ============================================================================
// OUTBOUND COMMANDS
// ============================================================================

/// Command sent to the upstream feed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundCommand {
    /// Replace the set of entities the feed should stream
    Subscribe { ids: Vec<EntityId> },
}

impl OutboundCommand {
    /// Build a subscribe command; ids are deduplicated and sorted
    pub fn subscribe(ids: impl IntoIterator<Item = EntityId>) -> Self {
        let ids: BTreeSet<EntityId> = ids.into_iter().collect();
        Self::Subscribe {
            ids: ids.into_iter().collect(),
        }
    }

    pub fn encode(&self) -> CoreResult<String> {
        Ok(serde_json::to_string(self)?)
    }
}

// ============================================================================
// CONNECTION EVENTS
// ============================================================================

/// State of the upstream connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Observable connection lifecycle event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ConnectionEvent {
    Connecting { attempt: u32 },
    Connected,
    Disconnected { reason: String },
    ReconnectScheduled { attempt: u32, delay_ms: u64 },
    SubscriptionSent { count: usize },
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_position_update() {
        let text = r#"{"type":"position_update","payload":{"id":"IMEI-1","lon":69.2,"lat":34.5,"speed":42.5,"heading":90,"timestamp":1700000000}}"#;

        let msg = InboundMessage::decode(text).unwrap();
        assert_eq!(msg.kind(), "position_update");

        let InboundMessage::PositionUpdate(payload) = msg else {
            panic!("expected position update");
        };
        let (id, sample) = payload.into_sample().unwrap();
        assert_eq!(id.as_str(), "IMEI-1");
        assert_eq!(sample.coordinates, Coordinates::new(69.2, 34.5));
        assert_eq!(sample.speed_kmh, 42.5);
        assert_eq!(sample.heading_deg, 90.0);
        assert_eq!(sample.timestamp.timestamp(), 1_700_000_000);
    }

    #[test]
    fn test_missing_speed_defaults_to_zero() {
        let text = r#"{"type":"position_update","payload":{"id":"A","lon":0,"lat":0,"heading":0,"timestamp":1}}"#;
        let InboundMessage::PositionUpdate(payload) = InboundMessage::decode(text).unwrap() else {
            panic!("expected position update");
        };
        assert_eq!(payload.speed, 0.0);
    }

    #[test]
    fn test_decode_bulk_update_skips_malformed_items() {
        let text = r#"{"type":"bulk_update","payload":[
            {"id":"A","lon":1,"lat":1,"speed":1,"heading":1,"timestamp":1},
            {"id":"B","lon":"oops"},
            {"id":"C","lon":2,"lat":2,"speed":2,"heading":2,"timestamp":2}
        ]}"#;

        let InboundMessage::BulkUpdate(bulk) = InboundMessage::decode(text).unwrap() else {
            panic!("expected bulk update");
        };
        assert_eq!(bulk.updates.len(), 2);
        assert_eq!(bulk.malformed, 1);
        assert_eq!(bulk.updates[1].id, "C");
    }

    #[test]
    fn test_decode_status_update() {
        let text = r#"{"type":"status_update","payload":{"id":"A","status":"ignition_off"}}"#;
        let msg = InboundMessage::decode(text).unwrap();
        assert_eq!(
            msg,
            InboundMessage::StatusUpdate(StatusUpdatePayload {
                id: "A".into(),
                status: Some("ignition_off".into()),
                timestamp: None,
            })
        );
    }

    #[test]
    fn test_unknown_type_is_distinguishable() {
        let err = InboundMessage::decode(r#"{"type":"geofence_alert","payload":{}}"#).unwrap_err();
        assert!(matches!(err, CoreError::UnknownMessageType(kind) if kind == "geofence_alert"));
    }

    #[test]
    fn test_malformed_frame() {
        assert!(matches!(
            InboundMessage::decode("not json"),
            Err(CoreError::Serialization(_))
        ));
        assert!(matches!(
            InboundMessage::decode(r#"{"type":"position_update","payload":{"id":"A"}}"#),
            Err(CoreError::Serialization(_))
        ));
    }

    #[test]
    fn test_blank_id_rejected() {
        let payload = PositionUpdatePayload {
            id: " ".into(),
            lon: 0.0,
            lat: 0.0,
            speed: 0.0,
            heading: 0.0,
            timestamp: 1.0,
        };
        assert!(matches!(payload.into_sample(), Err(CoreError::BlankEntityId)));
    }

    #[test]
    fn test_subscribe_command_wire_format() {
        let cmd = OutboundCommand::subscribe(vec![
            EntityId::new("B"),
            EntityId::new("A"),
            EntityId::new("B"),
        ]);

        assert_eq!(cmd.encode().unwrap(), r#"{"type":"subscribe","ids":["A","B"]}"#);
    }

    #[test]
    fn test_connection_event_serialization() {
        let json = serde_json::to_string(&ConnectionEvent::ReconnectScheduled {
            attempt: 2,
            delay_ms: 5000,
        })
        .unwrap();
        assert_eq!(json, r#"{"event":"reconnect_scheduled","attempt":2,"delay_ms":5000}"#);
        assert_eq!(ConnectionState::Connected.to_string(), "connected");
    }
}
