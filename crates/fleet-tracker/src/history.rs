//! Bounded per-entity route history

use fleet_core::{Coordinates, PositionSample};
use std::collections::VecDeque;
use std::collections::vec_deque;

/// Default number of samples kept per entity
pub const DEFAULT_HISTORY_CAPACITY: usize = 20;

/// Ring buffer of past positions, oldest first.
///
/// Only used for trails and trend figures; the entity's current state is
/// always its `latest` sample, never the tail of this buffer.
#[derive(Debug, Clone)]
pub struct RouteHistory {
    capacity: usize,
    samples: VecDeque<PositionSample>,
}

impl RouteHistory {
    /// Create an empty history. A capacity of zero is raised to one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            samples: VecDeque::with_capacity(capacity),
        }
    }

    /// Append a sample, evicting the oldest when full
    pub fn push(&mut self, sample: PositionSample) {
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(sample);
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }

    /// Most recent sample
    pub fn latest(&self) -> Option<&PositionSample> {
        self.samples.back()
    }

    /// Chronological iterator; cheap to clone and restart
    pub fn iter(&self) -> vec_deque::Iter<'_, PositionSample> {
        self.samples.iter()
    }

    /// Trail polyline, oldest point first
    pub fn trail(&self) -> Vec<Coordinates> {
        self.iter().map(|s| s.coordinates).collect()
    }

    /// Mean reported speed over the most recent `last` samples
    pub fn average_speed_kmh(&self, last: usize) -> Option<f64> {
        let take = last.min(self.samples.len());
        if take == 0 {
            return None;
        }

        let total: f64 = self.iter().rev().take(take).map(|s| s.speed_kmh).sum();
        Some(total / take as f64)
    }

    /// Length of the trail polyline in kilometers
    pub fn distance_km(&self) -> f64 {
        self.iter()
            .zip(self.iter().skip(1))
            .map(|(a, b)| a.coordinates.distance_to(&b.coordinates))
            .sum()
    }
}

impl Default for RouteHistory {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_CAPACITY)
    }
}

impl<'a> IntoIterator for &'a RouteHistory {
    type Item = &'a PositionSample;
    type IntoIter = vec_deque::Iter<'a, PositionSample>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Utc};

    fn sample(secs: i64, speed: f64) -> PositionSample {
        PositionSample::new(
            Coordinates::new(secs as f64 * 0.01, 0.0),
            speed,
            0.0,
            DateTime::<Utc>::from_timestamp(secs, 0).unwrap(),
        )
    }

    #[test]
    fn test_bounded_eviction_keeps_order() {
        let mut history = RouteHistory::new(3);
        for secs in 1..=5 {
            history.push(sample(secs, 10.0));
        }

        assert_eq!(history.len(), 3);
        let times: Vec<i64> = history.iter().map(|s| s.timestamp.timestamp()).collect();
        assert_eq!(times, vec![3, 4, 5]);
        assert_eq!(history.latest().unwrap().timestamp.timestamp(), 5);
    }

    #[test]
    fn test_capacity_plus_k() {
        let capacity = DEFAULT_HISTORY_CAPACITY;
        let mut history = RouteHistory::default();
        for secs in 0..(capacity as i64 + 7) {
            history.push(sample(secs, 0.0));
        }

        assert_eq!(history.len(), capacity);
        assert_eq!(history.iter().next().unwrap().timestamp.timestamp(), 7);
    }

    #[test]
    fn test_iteration_is_restartable() {
        let mut history = RouteHistory::new(4);
        history.push(sample(1, 0.0));
        history.push(sample(2, 0.0));

        let iter = history.iter();
        assert_eq!(iter.clone().count(), 2);
        assert_eq!(iter.count(), 2);
        assert_eq!((&history).into_iter().count(), 2);
    }

    #[test]
    fn test_zero_capacity_is_raised() {
        let mut history = RouteHistory::new(0);
        history.push(sample(1, 0.0));
        history.push(sample(2, 0.0));
        assert_eq!(history.capacity(), 1);
        assert_eq!(history.len(), 1);
    }

    #[test]
    fn test_average_speed_over_recent_samples() {
        let mut history = RouteHistory::new(10);
        assert!(history.average_speed_kmh(5).is_none());

        history.push(sample(1, 100.0));
        history.push(sample(2, 10.0));
        history.push(sample(3, 20.0));

        assert_eq!(history.average_speed_kmh(2), Some(15.0));
        assert_eq!(history.average_speed_kmh(50), Some(130.0 / 3.0));
    }

    #[test]
    fn test_trail_distance() {
        let mut history = RouteHistory::new(10);
        assert_eq!(history.distance_km(), 0.0);

        history.push(sample(0, 0.0));
        history.push(sample(100, 0.0));
        // one degree of longitude at the equator
        assert!((history.distance_km() - 111.19).abs() < 0.1);
        assert_eq!(history.trail().len(), 2);
    }
}
