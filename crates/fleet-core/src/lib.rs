//! # Fleet Core
//!
//! Core domain models and types for the live fleet tracking service.
//! This crate provides the shared types used by the tracker, the ingestion
//! client, the viewer stream and the API binary.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

pub mod error;
pub mod events;
pub mod geo;
pub mod status;

pub use error::{CoreError, CoreResult};
pub use events::*;
pub use geo::*;
pub use status::{LivenessStatus, StatusThresholds};

// ============================================================================
// ENTITY MODELS
// ============================================================================

/// Hardware identifier of a tracked entity (e.g. a device IMEI).
///
/// This is the merge key for incoming telemetry. It is not the primary key
/// of whatever domain object the asset is known as elsewhere.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EntityId(pub String);

impl EntityId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Blank identifiers can never be merged
    pub fn is_blank(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for EntityId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for EntityId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

// ============================================================================
// TELEMETRY MODELS
// ============================================================================

/// A single position report from a tracker device
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PositionSample {
    pub coordinates: Coordinates,
    /// Reported ground speed in km/h
    pub speed_kmh: f64,
    /// Reported heading in degrees, [0, 360)
    pub heading_deg: f64,
    /// Device timestamp of this reading
    pub timestamp: DateTime<Utc>,
}

impl PositionSample {
    /// Create a sample. A heading of exactly 360 is folded onto 0; anything
    /// else outside [0, 360] is kept as-is so that `validate` rejects it.
    pub fn new(
        coordinates: Coordinates,
        speed_kmh: f64,
        heading_deg: f64,
        timestamp: DateTime<Utc>,
    ) -> Self {
        let heading_deg = if (0.0..=360.0).contains(&heading_deg) {
            heading_deg % 360.0
        } else {
            heading_deg
        };

        Self {
            coordinates,
            speed_kmh,
            heading_deg,
            timestamp,
        }
    }

    /// Check that every numeric field is finite and within range
    pub fn validate(&self) -> CoreResult<()> {
        if !self.coordinates.is_valid() {
            return Err(CoreError::invalid_position(
                self.coordinates.lon,
                self.coordinates.lat,
            ));
        }

        if !self.heading_deg.is_finite() || !(0.0..360.0).contains(&self.heading_deg) {
            return Err(CoreError::InvalidHeading(self.heading_deg));
        }

        if !self.speed_kmh.is_finite() || self.speed_kmh < 0.0 {
            return Err(CoreError::InvalidSpeed(self.speed_kmh));
        }

        Ok(())
    }
}

/// Convert a unix timestamp in (possibly fractional) seconds.
///
/// Kept to microsecond precision, so samples less than a millisecond
/// apart still order correctly.
pub fn timestamp_from_unix_seconds(secs: f64) -> CoreResult<DateTime<Utc>> {
    if !secs.is_finite() || secs < 0.0 {
        return Err(CoreError::InvalidTimestamp(secs));
    }

    DateTime::<Utc>::from_timestamp_micros((secs * 1_000_000.0).round() as i64)
        .ok_or(CoreError::InvalidTimestamp(secs))
}

// ============================================================================
// TESTS
// ============================================================================
