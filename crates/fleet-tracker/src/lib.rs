//! # Fleet Tracker - Live State Reconciliation
//!
//! Merges unordered telemetry into one canonical state per entity and turns
//! it into renderable snapshots.
//!
//! ## Features
//! - Idempotent, timestamp-ordered merge keyed by hardware id
//! - Liveness derived from time since last report
//! - Smooth shortest-path heading rotation
//! - Bounded route trails
//! - Deterministic grid clustering
//! - Periodic render ticks pushed to a non-blocking sink
//!
//! A single [`parking_lot::Mutex`] guards the store and the rotation set
//! together. It is never held across an `.await`.

pub mod animator;
pub mod cluster;
pub mod history;
pub mod scheduler;
pub mod state;
pub mod store;

pub use animator::{RotationAnimation, RotationAnimator};
pub use cluster::{Cluster, ClusterIndex};
pub use history::RouteHistory;
pub use scheduler::{RenderScheduler, SnapshotSink, WatchSink};
pub use state::{EntityView, PresentationSnapshot, SnapshotStats};
pub use store::{AppliedResult, EntityState, EntityStore, SelectionChange};

use chrono::{DateTime, Utc};
use fleet_core::{
    CoreError, CoreResult, EntityId, PositionSample, PositionUpdatePayload, StatusThresholds,
};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, info};

// ============================================================================
// CONFIGURATION
// ============================================================================

/// Tracker configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// Below this age an entity is online
    pub online_threshold_ms: u64,
    /// Below this age (and at or above online) an entity is in warning
    pub warning_threshold_ms: u64,
    /// Samples kept per entity for trails
    pub history_capacity: usize,
    /// Length of one heading rotation
    pub animation_duration_ms: u64,
    /// Heading changes at or below this snap instead of animating
    pub heading_epsilon_deg: f64,
    /// Cluster cell edge in screen pixels
    pub cluster_cell_size: u32,
    /// Above this zoom every entity is its own cluster
    pub max_cluster_zoom: u8,
    pub initial_zoom: u8,
    /// Render tick period
    pub tick_interval_ms: u64,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            online_threshold_ms: 60_000,
            warning_threshold_ms: 300_000,
            history_capacity: history::DEFAULT_HISTORY_CAPACITY,
            animation_duration_ms: 300,
            heading_epsilon_deg: 1.0,
            cluster_cell_size: 60,
            max_cluster_zoom: 16,
            initial_zoom: 10,
            tick_interval_ms: 33,
        }
    }
}

impl TrackerConfig {
    pub fn thresholds(&self) -> StatusThresholds {
        StatusThresholds {
            online_ms: self.online_threshold_ms,
            warning_ms: self.warning_threshold_ms,
        }
    }

    pub fn animation_duration(&self) -> Duration {
        Duration::from_millis(self.animation_duration_ms)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn validate(&self) -> CoreResult<()> {
        self.thresholds().validate()?;

        if self.history_capacity == 0 {
            return Err(CoreError::configuration("history_capacity must be at least 1"));
        }
        if self.tick_interval_ms == 0 {
            return Err(CoreError::configuration("tick_interval_ms must be at least 1"));
        }
        if !self.heading_epsilon_deg.is_finite() || self.heading_epsilon_deg < 0.0 {
            return Err(CoreError::configuration(
                "heading_epsilon_deg must be a non-negative number",
            ));
        }
        Ok(())
    }
}

// ============================================================================
// TRACKER
// ============================================================================

/// Single-writer coordinator shared by ingestion, the render scheduler and
/// the API
pub struct FleetTracker {
    config: TrackerConfig,
    store: Mutex<EntityStore>,
    clusters: ClusterIndex,
    zoom: AtomicU8,
    seq: AtomicU64,
}

impl FleetTracker {
    pub fn new(config: TrackerConfig) -> CoreResult<Self> {
        config.validate()?;

        info!(
            history_capacity = config.history_capacity,
            online_ms = config.online_threshold_ms,
            warning_ms = config.warning_threshold_ms,
            "Fleet tracker initialized"
        );

        Ok(Self {
            store: Mutex::new(EntityStore::new(&config)),
            clusters: ClusterIndex::new(config.cluster_cell_size, config.max_cluster_zoom),
            zoom: AtomicU8::new(config.initial_zoom.min(cluster::MAX_ZOOM)),
            seq: AtomicU64::new(0),
            config,
        })
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    /// Merge one sample observed now
    pub fn apply(&self, id: EntityId, sample: PositionSample) -> AppliedResult {
        self.apply_at(id, sample, Utc::now())
    }

    pub fn apply_at(&self, id: EntityId, sample: PositionSample, now: DateTime<Utc>) -> AppliedResult {
        self.store.lock().apply(id, sample, now)
    }

    /// Decode and merge a wire payload. Payloads that cannot become a
    /// sample are rejected like any other malformed input.
    pub fn apply_payload(&self, payload: PositionUpdatePayload) -> AppliedResult {
        match payload.into_sample() {
            Ok((id, sample)) => self.apply(id, sample),
            Err(e) => {
                debug!(error = %e, "Rejected undecodable position payload");
                AppliedResult::Rejected
            }
        }
    }

    pub fn remove(&self, id: &EntityId) -> bool {
        self.store.lock().remove(id)
    }

    pub fn set_selection(&self, ids: impl IntoIterator<Item = EntityId>) -> SelectionChange {
        self.store.lock().set_selection(ids)
    }

    pub fn selection(&self) -> Vec<EntityId> {
        self.store.lock().selection()
    }

    /// Set the map zoom used for clustering, clamped to the supported range
    pub fn set_zoom(&self, zoom: u8) -> u8 {
        let zoom = zoom.min(cluster::MAX_ZOOM);
        let previous = self.zoom.swap(zoom, Ordering::Relaxed);
        if previous != zoom {
            debug!(from = previous, to = zoom, "Zoom changed");
        }
        zoom
    }

    pub fn zoom(&self) -> u8 {
        self.zoom.load(Ordering::Relaxed)
    }

    pub fn entity(&self, id: &EntityId) -> Option<EntityView> {
        self.store.lock().view(id, Utc::now())
    }

    /// Past samples for `id`, oldest first
    pub fn history(&self, id: &EntityId) -> Option<Vec<PositionSample>> {
        self.store
            .lock()
            .get(id)
            .map(|state| state.history.iter().copied().collect())
    }

    pub fn entity_count(&self) -> usize {
        self.store.lock().len()
    }

    /// Current views without advancing animations
    pub fn snapshot_at(&self, now: DateTime<Utc>) -> Vec<EntityView> {
        self.store.lock().snapshot(now)
    }

    /// Run one render tick now
    pub fn tick(&self) -> PresentationSnapshot {
        self.tick_at(Utc::now())
    }

    /// Advance animations, take a snapshot and cluster it. Clustering runs
    /// after the lock is released.
    pub fn tick_at(&self, now: DateTime<Utc>) -> PresentationSnapshot {
        let started = Instant::now();
        let (entities, active_animations) = {
            let mut store = self.store.lock();
            let active = store.advance_animations(now);
            (store.snapshot(now), active)
        };

        let zoom = self.zoom();
        let points: Vec<(EntityId, fleet_core::Coordinates)> = entities
            .iter()
            .map(|e| (e.id.clone(), e.coordinates))
            .collect();
        let clusters = self.clusters.compute(&points, zoom);
        let seq = self.seq.fetch_add(1, Ordering::Relaxed) + 1;

        let mut snapshot =
            PresentationSnapshot::new(seq, now, zoom, entities, clusters, active_animations);
        snapshot.stats.build_micros = started.elapsed().as_micros() as u64;
        snapshot
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;
    use fleet_core::{Coordinates, LivenessStatus};

    fn sample(lon: f64, heading: f64, at: DateTime<Utc>) -> PositionSample {
        PositionSample::new(Coordinates::new(lon, 34.5), 50.0, heading, at)
    }

    #[test]
    fn test_config_validation() {
        assert!(TrackerConfig::default().validate().is_ok());

        let inverted = TrackerConfig {
            online_threshold_ms: 300_000,
            warning_threshold_ms: 60_000,
            ..Default::default()
        };
        assert!(inverted.validate().is_err());

        let no_history = TrackerConfig {
            history_capacity: 0,
            ..Default::default()
        };
        assert!(FleetTracker::new(no_history).is_err());

        let no_tick = TrackerConfig {
            tick_interval_ms: 0,
            ..Default::default()
        };
        assert!(no_tick.validate().is_err());
    }

    #[test]
    fn test_config_deserializes_partial() {
        let config: TrackerConfig =
            serde_json::from_str(r#"{"history_capacity": 50, "tick_interval_ms": 100}"#).unwrap();
        assert_eq!(config.history_capacity, 50);
        assert_eq!(config.tick_interval(), Duration::from_millis(100));
        assert_eq!(config.online_threshold_ms, 60_000);
    }

    #[test]
    fn test_tick_sequence_and_contents() {
        let tracker = FleetTracker::new(TrackerConfig::default()).unwrap();
        let now = Utc::now();
        tracker.apply_at(EntityId::new("B"), sample(69.2, 10.0, now), now);
        tracker.apply_at(EntityId::new("A"), sample(69.2001, 20.0, now), now);

        let first = tracker.tick_at(now);
        let second = tracker.tick_at(now);

        assert_eq!(first.seq, 1);
        assert_eq!(second.seq, 2);
        assert_eq!(first.entities.len(), 2);
        assert_eq!(first.entities[0].id, EntityId::new("A"));
        assert_eq!(first.stats.count(LivenessStatus::Online), 2);
        assert_eq!(first.clusters.len(), 1);
        assert_eq!(first.clusters[0].len(), 2);
    }

    #[test]
    fn test_tick_advances_rotation_to_target() {
        let tracker = FleetTracker::new(TrackerConfig::default()).unwrap();
        let id = EntityId::new("A");
        let t0 = Utc::now();
        tracker.apply_at(id.clone(), sample(69.0, 350.0, t0), t0);
        tracker.apply_at(id.clone(), sample(69.0, 10.0, t0 + ChronoDuration::seconds(1)), t0);

        let mid = tracker.tick_at(t0 + ChronoDuration::milliseconds(100));
        let heading = mid.entity(&id).unwrap().display_heading;
        assert!(heading > 350.0 || heading < 10.0);
        assert_eq!(mid.stats.active_animations, 1);

        let done = tracker.tick_at(t0 + ChronoDuration::milliseconds(400));
        assert_eq!(done.entity(&id).unwrap().display_heading, 10.0);
        assert_eq!(done.stats.active_animations, 0);
    }

    #[test]
    fn test_remove_visible_in_next_snapshot() {
        let tracker = FleetTracker::new(TrackerConfig::default()).unwrap();
        let id = EntityId::new("A");
        let now = Utc::now();
        tracker.apply_at(id.clone(), sample(69.0, 0.0, now), now);
        assert_eq!(tracker.tick_at(now).entities.len(), 1);

        assert!(tracker.remove(&id));
        let snapshot = tracker.tick_at(now);
        assert!(snapshot.entities.is_empty());
        assert!(snapshot.clusters.is_empty());
        assert!(tracker.history(&id).is_none());
    }

    #[test]
    fn test_zoom_clamped_and_applied() {
        let tracker = FleetTracker::new(TrackerConfig::default()).unwrap();
        assert_eq!(tracker.zoom(), 10);
        assert_eq!(tracker.set_zoom(40), cluster::MAX_ZOOM);

        let now = Utc::now();
        tracker.apply_at(EntityId::new("A"), sample(69.0, 0.0, now), now);
        tracker.apply_at(EntityId::new("B"), sample(69.0, 0.0, now), now);
        let snapshot = tracker.tick_at(now);
        assert_eq!(snapshot.zoom, cluster::MAX_ZOOM);
        assert_eq!(snapshot.clusters.len(), 2);
    }

    #[test]
    fn test_apply_payload_rejects_blank_id() {
        let tracker = FleetTracker::new(TrackerConfig::default()).unwrap();
        let payload = PositionUpdatePayload {
            id: "".into(),
            lon: 0.0,
            lat: 0.0,
            speed: 0.0,
            heading: 0.0,
            timestamp: 1.0,
        };
        assert_eq!(tracker.apply_payload(payload), AppliedResult::Rejected);
        assert_eq!(tracker.entity_count(), 0);
    }

    #[test]
    fn test_history_is_chronological() {
        let tracker = FleetTracker::new(TrackerConfig::default()).unwrap();
        let id = EntityId::new("A");
        let t0 = Utc::now();
        for step in 0..3 {
            let at = t0 + ChronoDuration::seconds(step);
            tracker.apply_at(id.clone(), sample(69.0 + step as f64 * 0.01, 0.0, at), at);
        }

        let history = tracker.history(&id).unwrap();
        assert_eq!(history.len(), 3);
        assert!(history.windows(2).all(|w| w[0].timestamp < w[1].timestamp));
    }
}
