//! Canonical per-entity state and merge rules

use crate::animator::RotationAnimator;
use crate::history::RouteHistory;
use crate::state::EntityView;
use crate::TrackerConfig;

use chrono::{DateTime, Utc};
use fleet_core::{
    EntityId, LivenessStatus, PositionSample, StatusThresholds, shortest_heading_delta,
};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use tracing::{debug, info, warn};

/// Outcome of merging one sample
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AppliedResult {
    /// Newer than anything seen; state updated
    Accepted,
    /// Not newer than the current sample; nothing changed
    Stale,
    /// Malformed sample; nothing changed
    Rejected,
}

impl AppliedResult {
    pub const ALL: [AppliedResult; 3] = [Self::Accepted, Self::Stale, Self::Rejected];

    pub fn as_str(&self) -> &'static str {
        match self {
            AppliedResult::Accepted => "accepted",
            AppliedResult::Stale => "stale",
            AppliedResult::Rejected => "rejected",
        }
    }
}

impl fmt::Display for AppliedResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Current state of one tracked entity.
///
/// Liveness is not stored; it is derived from `latest.timestamp` every time
/// it is read.
#[derive(Debug, Clone)]
pub struct EntityState {
    pub id: EntityId,
    pub latest: PositionSample,
    pub display_heading: f64,
    pub history: RouteHistory,
    pub subscribed: bool,
}

impl EntityState {
    fn new(id: EntityId, sample: PositionSample, history_capacity: usize, subscribed: bool) -> Self {
        let mut history = RouteHistory::new(history_capacity);
        history.push(sample);

        Self {
            id,
            latest: sample,
            display_heading: sample.heading_deg,
            history,
            subscribed,
        }
    }

    pub fn status(&self, now: DateTime<Utc>, thresholds: &StatusThresholds) -> LivenessStatus {
        thresholds.classify_at(self.latest.timestamp, now)
    }

    /// Speed to show; a stale reading never shows motion
    pub fn displayed_speed_kmh(&self, now: DateTime<Utc>, thresholds: &StatusThresholds) -> f64 {
        match self.status(now, thresholds) {
            LivenessStatus::Offline => 0.0,
            _ => self.latest.speed_kmh,
        }
    }
}

/// Result of replacing the selected entity set
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SelectionChange {
    pub added: Vec<EntityId>,
    pub removed: Vec<EntityId>,
    /// Full selection after the change, sorted
    pub selected: Vec<EntityId>,
}

impl SelectionChange {
    pub fn is_unchanged(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

/// Map of entity id to state, plus the rotations in flight.
///
/// Merging a sample and retargeting its rotation happen in the same `&mut`
/// call, so callers guard the whole store with a single lock.
#[derive(Debug)]
pub struct EntityStore {
    thresholds: StatusThresholds,
    history_capacity: usize,
    heading_epsilon_deg: f64,
    entities: BTreeMap<EntityId, EntityState>,
    selection: BTreeSet<EntityId>,
    animator: RotationAnimator,
}

impl EntityStore {
    pub fn new(config: &TrackerConfig) -> Self {
        Self {
            thresholds: config.thresholds(),
            history_capacity: config.history_capacity,
            heading_epsilon_deg: config.heading_epsilon_deg,
            entities: BTreeMap::new(),
            selection: BTreeSet::new(),
            animator: RotationAnimator::new(config.animation_duration()),
        }
    }

    pub fn thresholds(&self) -> &StatusThresholds {
        &self.thresholds
    }

    /// Merge one sample for `id`
    pub fn apply(&mut self, id: EntityId, sample: PositionSample, now: DateTime<Utc>) -> AppliedResult {
        if id.is_blank() {
            warn!("Rejected sample with blank entity id");
            return AppliedResult::Rejected;
        }

        if let Err(e) = sample.validate() {
            warn!(entity = %id, error = %e, "Rejected malformed sample");
            return AppliedResult::Rejected;
        }

        let Some(state) = self.entities.get_mut(&id) else {
            let subscribed = self.selection.contains(&id);
            info!(entity = %id, subscribed, "Tracking new entity");
            let state = EntityState::new(id.clone(), sample, self.history_capacity, subscribed);
            self.entities.insert(id, state);
            return AppliedResult::Accepted;
        };

        if sample.timestamp <= state.latest.timestamp {
            debug!(
                entity = %id,
                sample = %sample.timestamp,
                latest = %state.latest.timestamp,
                "Ignoring stale sample"
            );
            return AppliedResult::Stale;
        }

        state.latest = sample;
        state.history.push(sample);

        let current = self
            .animator
            .current_angle(&id, now)
            .unwrap_or(state.display_heading);

        if shortest_heading_delta(current, sample.heading_deg).abs() > self.heading_epsilon_deg {
            state.display_heading = current;
            self.animator.retarget(id, current, sample.heading_deg, now);
        } else {
            self.animator.cancel(&id);
            state.display_heading = sample.heading_deg;
        }

        AppliedResult::Accepted
    }

    /// Forget an entity: state, history and any rotation. Unknown ids are
    /// ignored.
    pub fn remove(&mut self, id: &EntityId) -> bool {
        self.animator.cancel(id);
        self.selection.remove(id);

        match self.entities.remove(id) {
            Some(_) => {
                info!(entity = %id, "Stopped tracking entity");
                true
            }
            None => {
                debug!(entity = %id, "Remove requested for unknown entity");
                false
            }
        }
    }

    /// Replace the selected set. Entities dropped from the selection are
    /// removed outright.
    pub fn set_selection(&mut self, ids: impl IntoIterator<Item = EntityId>) -> SelectionChange {
        let next: BTreeSet<EntityId> = ids.into_iter().filter(|id| !id.is_blank()).collect();

        let added: Vec<EntityId> = next.difference(&self.selection).cloned().collect();
        let removed: Vec<EntityId> = self.selection.difference(&next).cloned().collect();

        for id in &removed {
            self.remove(id);
        }

        self.selection = next;
        for (id, state) in self.entities.iter_mut() {
            state.subscribed = self.selection.contains(id);
        }

        if !added.is_empty() || !removed.is_empty() {
            info!(
                added = added.len(),
                removed = removed.len(),
                selected = self.selection.len(),
                "Selection changed"
            );
        }

        SelectionChange {
            added,
            removed,
            selected: self.selection.iter().cloned().collect(),
        }
    }

    pub fn selection(&self) -> Vec<EntityId> {
        self.selection.iter().cloned().collect()
    }

    /// Step every rotation to `now`, returning how many are still running
    pub fn advance_animations(&mut self, now: DateTime<Utc>) -> usize {
        for (id, heading) in self.animator.advance(now) {
            if let Some(state) = self.entities.get_mut(&id) {
                state.display_heading = heading;
            }
        }
        self.animator.active_count()
    }

    pub fn active_animations(&self) -> usize {
        self.animator.active_count()
    }

    pub fn is_animating(&self, id: &EntityId) -> bool {
        self.animator.is_animating(id)
    }

    pub fn get(&self, id: &EntityId) -> Option<&EntityState> {
        self.entities.get(id)
    }

    pub fn view(&self, id: &EntityId, now: DateTime<Utc>) -> Option<EntityView> {
        self.entities
            .get(id)
            .map(|state| EntityView::from_state(state, now, &self.thresholds))
    }

    /// Point-in-time views of every entity, ordered by id
    pub fn snapshot(&self, now: DateTime<Utc>) -> Vec<EntityView> {
        self.entities
            .values()
            .map(|state| EntityView::from_state(state, now, &self.thresholds))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }
}

// ============================================================================
// TESTS
// ============================================================================
