//! Heading rotation animation
//!
//! Each entity has at most one in-flight rotation. Retargeting replaces it,
//! starting from whatever angle is on screen at that moment, so a change of
//! direction mid-turn never snaps back to the old start angle.

use chrono::{DateTime, Utc};
use fleet_core::{EntityId, normalize_heading};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::trace;

/// Default rotation duration
pub const DEFAULT_ANIMATION_DURATION: Duration = Duration::from_millis(300);

/// Cubic ease-out: fast start, gentle settle
pub fn ease_out_cubic(progress: f64) -> f64 {
    let p = progress.clamp(0.0, 1.0);
    1.0 - (1.0 - p).powi(3)
}

/// One heading interpolation
#[derive(Debug, Clone, PartialEq)]
pub struct RotationAnimation {
    pub entity: EntityId,
    /// Start angle; may be lifted by 360 to take the short way round
    pub from_deg: f64,
    /// Target angle; may be lifted by 360 to take the short way round
    pub to_deg: f64,
    pub start_time: DateTime<Utc>,
    pub duration: Duration,
    pub cancelled: bool,
}

impl RotationAnimation {
    pub fn new(
        entity: EntityId,
        from_deg: f64,
        to_deg: f64,
        start_time: DateTime<Utc>,
        duration: Duration,
    ) -> Self {
        let mut from = normalize_heading(from_deg);
        let mut to = normalize_heading(to_deg);

        if (to - from).abs() > 180.0 {
            if from < to {
                from += 360.0;
            } else {
                to += 360.0;
            }
        }

        Self {
            entity,
            from_deg: from,
            to_deg: to,
            start_time,
            duration,
            cancelled: false,
        }
    }

    /// Linear progress in [0, 1]
    pub fn progress(&self, now: DateTime<Utc>) -> f64 {
        if self.duration.is_zero() {
            return 1.0;
        }

        let elapsed = now
            .signed_duration_since(self.start_time)
            .to_std()
            .unwrap_or(Duration::ZERO);

        (elapsed.as_secs_f64() / self.duration.as_secs_f64()).min(1.0)
    }

    pub fn is_complete(&self, now: DateTime<Utc>) -> bool {
        self.progress(now) >= 1.0
    }

    /// Displayed angle at `now`, in [0, 360)
    pub fn angle_at(&self, now: DateTime<Utc>) -> f64 {
        if self.is_complete(now) {
            return self.target();
        }

        let eased = ease_out_cubic(self.progress(now));
        normalize_heading(self.from_deg + (self.to_deg - self.from_deg) * eased)
    }

    /// Final resting angle, in [0, 360)
    pub fn target(&self) -> f64 {
        normalize_heading(self.to_deg)
    }

    /// Angular distance this animation covers
    pub fn span(&self) -> f64 {
        (self.to_deg - self.from_deg).abs()
    }
}

/// Active rotations keyed by entity
#[derive(Debug, Clone)]
pub struct RotationAnimator {
    duration: Duration,
    active: BTreeMap<EntityId, RotationAnimation>,
}

impl RotationAnimator {
    pub fn new(duration: Duration) -> Self {
        Self {
            duration,
            active: BTreeMap::new(),
        }
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    /// Start rotating `entity` from `current_deg` towards `target_deg`,
    /// replacing any rotation already in flight
    pub fn retarget(
        &mut self,
        entity: EntityId,
        current_deg: f64,
        target_deg: f64,
        now: DateTime<Utc>,
    ) -> &RotationAnimation {
        let animation =
            RotationAnimation::new(entity.clone(), current_deg, target_deg, now, self.duration);
        trace!(
            entity = %entity,
            from = animation.from_deg,
            to = animation.to_deg,
            "rotation retargeted"
        );

        self.active.insert(entity.clone(), animation);
        &self.active[&entity]
    }

    /// Drop the in-flight rotation for `entity`, returning it marked cancelled
    pub fn cancel(&mut self, entity: &EntityId) -> Option<RotationAnimation> {
        self.active.remove(entity).map(|mut animation| {
            animation.cancelled = true;
            animation
        })
    }

    /// Angle currently shown for `entity`, if it is rotating
    pub fn current_angle(&self, entity: &EntityId, now: DateTime<Utc>) -> Option<f64> {
        self.active.get(entity).map(|a| a.angle_at(now))
    }

    pub fn get(&self, entity: &EntityId) -> Option<&RotationAnimation> {
        self.active.get(entity)
    }

    pub fn is_animating(&self, entity: &EntityId) -> bool {
        self.active.contains_key(entity)
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    /// Advance every rotation to `now`. Returns the angle to display for
    /// each animated entity; finished rotations are removed.
    pub fn advance(&mut self, now: DateTime<Utc>) -> Vec<(EntityId, f64)> {
        let frames: Vec<(EntityId, f64)> = self
            .active
            .iter()
            .map(|(id, animation)| (id.clone(), animation.angle_at(now)))
            .collect();

        self.active.retain(|_, animation| !animation.is_complete(now));
        frames
    }
}

impl Default for RotationAnimator {
    fn default() -> Self {
        Self::new(DEFAULT_ANIMATION_DURATION)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    fn at(start: DateTime<Utc>, ms: i64) -> DateTime<Utc> {
        start + ChronoDuration::milliseconds(ms)
    }

    #[test]
    fn test_ease_out_cubic() {
        assert_eq!(ease_out_cubic(0.0), 0.0);
        assert_eq!(ease_out_cubic(1.0), 1.0);
        assert_eq!(ease_out_cubic(0.5), 0.875);
        assert_eq!(ease_out_cubic(2.0), 1.0);
    }

    #[test]
    fn test_shortest_path_across_north() {
        let start = Utc::now();
        let anim = RotationAnimation::new(
            EntityId::new("A"),
            350.0,
            10.0,
            start,
            DEFAULT_ANIMATION_DURATION,
        );

        assert_eq!(anim.span(), 20.0);

        // Every intermediate angle stays within the 20 degree arc through north
        for ms in (0..=300).step_by(10) {
            let angle = anim.angle_at(at(start, ms));
            assert!(
                angle >= 350.0 || angle <= 10.0,
                "angle {angle} left the short arc at {ms} ms"
            );
        }
    }

    #[test]
    fn test_shortest_path_other_direction() {
        let anim = RotationAnimation::new(
            EntityId::new("A"),
            10.0,
            350.0,
            Utc::now(),
            DEFAULT_ANIMATION_DURATION,
        );
        assert_eq!(anim.span(), 20.0);
        assert!(anim.from_deg > anim.to_deg);
    }

    #[test]
    fn test_span_never_exceeds_half_turn() {
        let now = Utc::now();
        for from in (0..360).step_by(15) {
            for to in (0..360).step_by(15) {
                let anim = RotationAnimation::new(
                    EntityId::new("A"),
                    from as f64,
                    to as f64,
                    now,
                    DEFAULT_ANIMATION_DURATION,
                );
                assert!(anim.span() <= 180.0, "{from} -> {to} spans {}", anim.span());
            }
        }
    }

    #[test]
    fn test_converges_exactly() {
        let start = Utc::now();
        let mut animator = RotationAnimator::default();
        animator.retarget(EntityId::new("A"), 350.0, 10.0, start);

        let frames = animator.advance(at(start, 300));
        assert_eq!(frames, vec![(EntityId::new("A"), 10.0)]);
        assert_eq!(animator.active_count(), 0);
    }

    #[test]
    fn test_midway_uses_ease_out() {
        let start = Utc::now();
        let mut animator = RotationAnimator::default();
        animator.retarget(EntityId::new("A"), 0.0, 80.0, start);

        let frames = animator.advance(at(start, 150));
        // progress 0.5 -> eased 0.875
        assert!((frames[0].1 - 70.0).abs() < 1e-9);
        assert!(animator.is_animating(&EntityId::new("A")));
    }

    #[test]
    fn test_retarget_starts_from_current_angle() {
        let start = Utc::now();
        let id = EntityId::new("A");
        let mut animator = RotationAnimator::default();
        animator.retarget(id.clone(), 0.0, 80.0, start);

        let midway = at(start, 150);
        let current = animator.current_angle(&id, midway).unwrap();
        let replaced = animator.retarget(id.clone(), current, 0.0, midway).clone();

        assert!((replaced.from_deg - 70.0).abs() < 1e-9);
        assert_eq!(replaced.to_deg, 0.0);
        assert_eq!(animator.active_count(), 1);
    }

    #[test]
    fn test_latest_retarget_wins() {
        let start = Utc::now();
        let id = EntityId::new("A");
        let mut animator = RotationAnimator::default();
        animator.retarget(id.clone(), 0.0, 90.0, start);
        animator.retarget(id.clone(), 0.0, 180.0, start);

        let frames = animator.advance(at(start, 1_000));
        assert_eq!(frames, vec![(id, 180.0)]);
    }

    #[test]
    fn test_cancel_marks_cancelled() {
        let id = EntityId::new("A");
        let mut animator = RotationAnimator::default();
        animator.retarget(id.clone(), 0.0, 90.0, Utc::now());

        let cancelled = animator.cancel(&id).unwrap();
        assert!(cancelled.cancelled);
        assert!(!animator.is_animating(&id));
        assert!(animator.cancel(&id).is_none());
    }

    #[test]
    fn test_zero_duration_completes_immediately() {
        let now = Utc::now();
        let mut animator = RotationAnimator::new(Duration::ZERO);
        animator.retarget(EntityId::new("A"), 0.0, 45.0, now);

        assert_eq!(animator.advance(now), vec![(EntityId::new("A"), 45.0)]);
        assert_eq!(animator.active_count(), 0);
    }
}
