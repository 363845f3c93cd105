//! Presentation views and snapshots handed to renderers

use crate::cluster::Cluster;
use crate::store::EntityState;

use chrono::{DateTime, Utc};
use fleet_core::{Coordinates, EntityId, GeoBounds, LivenessStatus, StatusThresholds};
use serde::{Deserialize, Serialize};

/// Number of trailing samples used for the average speed figure
pub const AVERAGE_SPEED_WINDOW: usize = 5;

/// Read-only view of one entity as it should be drawn
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityView {
    pub id: EntityId,
    pub coordinates: Coordinates,
    /// Heading to draw; differs from `reported_heading` mid-rotation
    pub display_heading: f64,
    pub reported_heading: f64,
    /// Speed to draw; zero when offline
    pub speed_kmh: f64,
    pub status: LivenessStatus,
    pub last_update: DateTime<Utc>,
    pub subscribed: bool,
    pub trail: Vec<Coordinates>,
    pub average_speed_kmh: Option<f64>,
    pub trail_distance_km: f64,
}

impl EntityView {
    /// Build a view of `state` as seen at `now`
    pub fn from_state(state: &EntityState, now: DateTime<Utc>, thresholds: &StatusThresholds) -> Self {
        let status = state.status(now, thresholds);

        Self {
            id: state.id.clone(),
            coordinates: state.latest.coordinates,
            display_heading: state.display_heading,
            reported_heading: state.latest.heading_deg,
            speed_kmh: state.displayed_speed_kmh(now, thresholds),
            status,
            last_update: state.latest.timestamp,
            subscribed: state.subscribed,
            trail: state.history.trail(),
            average_speed_kmh: state.history.average_speed_kmh(AVERAGE_SPEED_WINDOW),
            trail_distance_km: state.history.distance_km(),
        }
    }
}

/// Per-tick counters carried with every snapshot
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotStats {
    pub entity_count: usize,
    pub online: usize,
    pub warning: usize,
    pub offline: usize,
    pub cluster_count: usize,
    pub active_animations: usize,
    /// Time spent building this snapshot
    pub build_micros: u64,
}

impl SnapshotStats {
    pub fn count(&self, status: LivenessStatus) -> usize {
        match status {
            LivenessStatus::Online => self.online,
            LivenessStatus::Warning => self.warning,
            LivenessStatus::Offline => self.offline,
        }
    }
}

/// Everything a renderer needs for one frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PresentationSnapshot {
    /// Increases by one per tick
    pub seq: u64,
    pub generated_at: DateTime<Utc>,
    pub zoom: u8,
    /// Extent of all entities, for fitting the viewport
    pub bounds: Option<GeoBounds>,
    /// Ordered by entity id
    pub entities: Vec<EntityView>,
    /// Ordered by grid cell
    pub clusters: Vec<Cluster>,
    pub stats: SnapshotStats,
}

impl PresentationSnapshot {
    pub fn new(
        seq: u64,
        generated_at: DateTime<Utc>,
        zoom: u8,
        entities: Vec<EntityView>,
        clusters: Vec<Cluster>,
        active_animations: usize,
    ) -> Self {
        let mut stats = SnapshotStats {
            entity_count: entities.len(),
            cluster_count: clusters.len(),
            active_animations,
            ..Default::default()
        };
        for entity in &entities {
            match entity.status {
                LivenessStatus::Online => stats.online += 1,
                LivenessStatus::Warning => stats.warning += 1,
                LivenessStatus::Offline => stats.offline += 1,
            }
        }

        Self {
            seq,
            generated_at,
            zoom,
            bounds: GeoBounds::from_points(entities.iter().map(|e| &e.coordinates)),
            entities,
            clusters,
            stats,
        }
    }

    /// Snapshot with nothing in it, e.g. before the first tick
    pub fn empty(zoom: u8) -> Self {
        Self::new(0, Utc::now(), zoom, Vec::new(), Vec::new(), 0)
    }

    pub fn entity(&self, id: &EntityId) -> Option<&EntityView> {
        self.entities
            .binary_search_by(|e| e.id.cmp(id))
            .ok()
            .map(|idx| &self.entities[idx])
    }
}

// ============================================================================
// TESTS
// ============================================================================
